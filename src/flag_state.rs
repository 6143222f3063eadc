//! Evaluation of many flags for one context, as used to bootstrap client-side SDKs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

use crate::context::EvaluationContext;
use crate::eval::{ErrorCode, FlagContext, Reason};
use crate::flag::Flag;
use crate::store::Store;

/// FlagState is the outcome of one flag within a batch evaluation.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlagState {
    /// The served value. A disabled flag carries `null`.
    pub value: Value,
    /// Unix time of the evaluation, in seconds.
    pub timestamp: i64,
    /// Name of the served variation. Empty for a disabled flag.
    pub variation_type: String,
    pub track_events: bool,
    #[serde(skip)]
    pub failed: bool,
    pub error_code: Option<ErrorCode>,
    pub reason: Reason,
    pub metadata: Option<Map<String, Value>>,
}

impl FlagState {
    /// Evaluates `flag` for `context` as it stands at `now`.
    pub fn from_evaluation(
        flag: &Flag,
        flag_key: &str,
        context: &EvaluationContext,
        options: &FlagContext,
        now: DateTime<Utc>,
    ) -> Self {
        let (value, details) = flag.value_at(flag_key, context, options, now);
        let disabled = details.reason == Reason::Disabled;
        FlagState {
            value: if disabled {
                Value::Null
            } else {
                value.as_json().unwrap_or_default()
            },
            timestamp: now.timestamp(),
            variation_type: if disabled {
                String::new()
            } else {
                details.variant
            },
            track_events: flag.is_track_events(),
            failed: details.error_code.is_some(),
            error_code: details.error_code,
            reason: details.reason,
            metadata: details.metadata,
        }
    }
}

/// AllFlags collects the states of a batch evaluation. A flag that fails does not stop the
/// others from being evaluated; it only marks the batch as not valid.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AllFlags {
    flags: BTreeMap<String, FlagState>,
    valid: bool,
}

impl Default for AllFlags {
    fn default() -> Self {
        AllFlags {
            flags: BTreeMap::new(),
            valid: true,
        }
    }
}

impl AllFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_flag(&mut self, flag_key: &str, state: FlagState) {
        if state.failed {
            self.valid = false;
        }
        self.flags.insert(flag_key.to_string(), state);
    }

    /// Returns false if at least one flag of the batch failed to evaluate.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn flags(&self) -> &BTreeMap<String, FlagState> {
        &self.flags
    }

    pub fn get(&self, flag_key: &str) -> Option<&FlagState> {
        self.flags.get(flag_key)
    }
}

/// Evaluates the flags named in `flag_keys`, or every flag in `store` if `flag_keys` is empty.
///
/// Keys that do not name a flag are left out of the result.
pub fn flag_states<S: Store + ?Sized>(
    store: &S,
    flag_keys: &[&str],
    context: &EvaluationContext,
    options: &FlagContext,
) -> AllFlags {
    flag_states_at(store, flag_keys, context, options, Utc::now())
}

/// Same as [flag_states], evaluated as the flags stand at `now`.
pub fn flag_states_at<S: Store + ?Sized>(
    store: &S,
    flag_keys: &[&str],
    context: &EvaluationContext,
    options: &FlagContext,
    now: DateTime<Utc>,
) -> AllFlags {
    let keys = if flag_keys.is_empty() {
        store.flag_keys()
    } else {
        flag_keys.to_vec()
    };

    let mut states = AllFlags::new();
    for flag_key in keys {
        match store.flag(flag_key) {
            Some(flag) => states.add_flag(
                flag_key,
                FlagState::from_evaluation(flag, flag_key, context, options, now),
            ),
            None => debug!("flag '{}' not found, leaving it out of the batch", flag_key),
        }
    }
    states
}

/// Evaluates every flag in `store` for `context`.
pub fn all_flags_state<S: Store + ?Sized>(
    store: &S,
    context: &EvaluationContext,
    options: &FlagContext,
) -> AllFlags {
    flag_states(store, &[], context, options)
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use thiserror::Error;

use crate::attribute_value::AttributeValue;
use crate::context::EvaluationContext;
use crate::flag::Flag;
use crate::flag_value::FlagValue;
use crate::scheduled::apply_scheduled_steps;
use crate::store::Store;

/// Variant name reported when the caller's default value is served.
pub const VARIATION_SDK_DEFAULT: &str = "SdkDefault";

/// Metadata key holding the name of the rule that produced a result.
pub const EVALUATED_RULE_NAME: &str = "evaluatedRuleName";

/// Reason describes why an evaluation produced a particular value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// A targeting rule with a fixed variation matched.
    TargetingMatch,
    /// A targeting rule matched and split callers between variations.
    TargetingMatchSplit,
    /// No targeting rule matched and the default rule split callers between variations.
    Split,
    /// No targeting rule matched and the default rule served a fixed variation.
    Default,
    /// The flag has no targeting rules and serves a fixed variation.
    Static,
    /// The flag is disabled or outside its experimentation window.
    Disabled,
    /// The flag could not be evaluated. See the accompanying [ErrorCode].
    Error,
    #[default]
    Unknown,
}

/// ErrorCode is returned alongside [Reason::Error] and says why a flag could not be evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ProviderNotReady,
    /// The key did not match any known flag.
    FlagNotFound,
    /// The input document could not be parsed.
    ParseError,
    /// The variation value is not of the requested type.
    TypeMismatch,
    /// The flag needs a bucketing key that the context does not provide.
    TargetingKeyMissing,
    /// The flag configuration is inconsistent, e.g. a rule names a variation that does not exist.
    FlagConfig,
    General,
}

/// Errors raised while evaluating a flag. They are never returned to callers directly; the
/// orchestrator turns them into a [ResolutionDetails] with [Reason::Error].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvalError {
    /// The rule does not apply to this context; evaluation moves on to the next rule.
    #[error("rule does not apply")]
    RuleNotApplicable,
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    MissingBucketingKey(String),
    #[error("{0}")]
    InvalidBucketingKey(String),
}

impl EvalError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EvalError::Configuration(_) => ErrorCode::FlagConfig,
            EvalError::MissingBucketingKey(_) | EvalError::InvalidBucketingKey(_) => {
                ErrorCode::TargetingKeyMissing
            }
            EvalError::RuleNotApplicable => ErrorCode::General,
        }
    }
}

/// Options for one evaluation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlagContext {
    /// Attributes added to every context. Attributes set on the context itself take precedence.
    #[serde(default, rename = "evaluationContextEnrichment")]
    pub common_attributes: HashMap<String, AttributeValue>,
    /// Value served when the flag cannot serve one of its variations.
    #[serde(default)]
    pub default_sdk_value: FlagValue,
}

/// ResolutionDetails explains how an evaluation produced its value.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionDetails {
    /// Name of the served variation, or [VARIATION_SDK_DEFAULT].
    pub variant: String,
    pub reason: Reason,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    /// Index of the targeting rule that matched.
    pub rule_index: Option<usize>,
    pub rule_name: Option<String>,
    /// True if the same context will get the same answer until the flag definition changes.
    pub cacheable: bool,
    pub metadata: Option<Map<String, Value>>,
}

impl ResolutionDetails {
    fn sdk_default(reason: Reason) -> Self {
        ResolutionDetails {
            variant: VARIATION_SDK_DEFAULT.to_string(),
            reason,
            ..Default::default()
        }
    }

    pub(crate) fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ResolutionDetails {
            error_code: Some(code),
            error_message: Some(message.into()),
            ..Self::sdk_default(Reason::Error)
        }
    }

    fn from_eval_error(error: &EvalError, metadata: Option<Map<String, Value>>) -> Self {
        ResolutionDetails {
            metadata,
            ..Self::error(error.code(), error.to_string())
        }
    }
}

struct Selection<'a> {
    variant: &'a str,
    reason: Reason,
    rule_index: Option<usize>,
    rule_name: Option<String>,
    cacheable: bool,
}

impl Flag {
    /// Evaluates the flag for `context` at the current time.
    pub fn value(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        options: &FlagContext,
    ) -> (FlagValue, ResolutionDetails) {
        self.value_at(flag_key, context, options, Utc::now())
    }

    /// Evaluates the flag for `context` as it stands at `now`.
    ///
    /// Never fails: problems are reported through [ResolutionDetails] and the options' default
    /// value is served.
    pub fn value_at(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        options: &FlagContext,
        now: DateTime<Utc>,
    ) -> (FlagValue, ResolutionDetails) {
        self.resolve(
            flag_key,
            context,
            &options.common_attributes,
            &options.default_sdk_value,
            now,
        )
    }

    pub(crate) fn resolve(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        common_attributes: &HashMap<String, AttributeValue>,
        default_value: &FlagValue,
        now: DateTime<Utc>,
    ) -> (FlagValue, ResolutionDetails) {
        let flag = apply_scheduled_steps(self, now);

        if flag.is_disabled() || flag.is_experimentation_over(now) {
            debug!("flag '{}' is disabled at {}", flag_key, now);
            return (
                default_value.clone(),
                ResolutionDetails {
                    cacheable: self.is_cacheable(),
                    metadata: flag.metadata.clone(),
                    ..ResolutionDetails::sdk_default(Reason::Disabled)
                },
            );
        }

        let failure = |error: EvalError| {
            warn!("error while evaluating flag '{}': {}", flag_key, error);
            (
                default_value.clone(),
                ResolutionDetails::from_eval_error(&error, flag.metadata.clone()),
            )
        };

        let attributes = context.query_map(common_attributes);
        let bucketing_key = match flag.bucketing_key_in(context.key(), &attributes) {
            Ok(key) => key,
            Err(e) => return failure(e),
        };

        let cacheable = self.is_cacheable();
        let selection =
            match flag.select_variation(flag_key, &bucketing_key, &attributes, now, cacheable) {
                Ok(selection) => selection,
                Err(e) => return failure(e),
            };

        let value = match flag.variation_value(selection.variant) {
            Some(value) => value.clone(),
            None => {
                return failure(EvalError::Configuration(format!(
                    "variation {} does not exist",
                    selection.variant
                )))
            }
        };

        let metadata = result_metadata(flag.metadata.as_ref(), selection.rule_name.as_deref());
        (
            value,
            ResolutionDetails {
                variant: selection.variant.to_string(),
                reason: selection.reason,
                error_code: None,
                error_message: None,
                rule_index: selection.rule_index,
                rule_name: selection.rule_name,
                cacheable: selection.cacheable,
                metadata,
            },
        )
    }

    fn select_variation(
        &self,
        flag_key: &str,
        bucketing_key: &str,
        attributes: &HashMap<String, AttributeValue>,
        now: DateTime<Utc>,
        cacheable: bool,
    ) -> Result<Selection<'_>, EvalError> {
        for (index, rule) in self.rules.iter().enumerate() {
            match rule.evaluate(flag_key, bucketing_key, attributes, now, false) {
                Ok(variant) => {
                    return Ok(Selection {
                        variant,
                        reason: if rule.is_dynamic() {
                            Reason::TargetingMatchSplit
                        } else {
                            Reason::TargetingMatch
                        },
                        rule_index: Some(index),
                        rule_name: rule.name.clone(),
                        cacheable: cacheable && rule.progressive_rollout.is_none(),
                    })
                }
                Err(EvalError::RuleNotApplicable) => continue,
                Err(e) => return Err(e),
            }
        }

        let default_rule = self
            .default_rule
            .as_ref()
            .ok_or_else(|| EvalError::Configuration("no default targeting for the flag".into()))?;
        let variant = default_rule.evaluate(flag_key, bucketing_key, attributes, now, true)?;
        let reason = if default_rule.is_dynamic() {
            Reason::Split
        } else if !self.rules.is_empty() {
            Reason::Default
        } else {
            Reason::Static
        };

        Ok(Selection {
            variant,
            reason,
            rule_index: None,
            rule_name: None,
            cacheable: cacheable && default_rule.progressive_rollout.is_none(),
        })
    }
}

/// Builds the metadata returned with a result: the flag's metadata plus the name of the rule
/// that produced the result, if it has one.
fn result_metadata(
    flag_metadata: Option<&Map<String, Value>>,
    rule_name: Option<&str>,
) -> Option<Map<String, Value>> {
    match rule_name.filter(|name| !name.is_empty()) {
        None => flag_metadata.cloned(),
        Some(name) => {
            let mut metadata = flag_metadata.cloned().unwrap_or_default();
            metadata.insert(EVALUATED_RULE_NAME.to_string(), Value::from(name));
            Some(metadata)
        }
    }
}

/// Looks `flag_key` up in `store` and evaluates it for `context`.
///
/// An unknown key serves the options' default value with [ErrorCode::FlagNotFound].
pub fn evaluate<S: Store + ?Sized>(
    store: &S,
    flag_key: &str,
    context: &EvaluationContext,
    options: &FlagContext,
) -> (FlagValue, ResolutionDetails) {
    match store.flag(flag_key) {
        Some(flag) => flag.value(flag_key, context, options),
        None => {
            warn!("flag '{}' not found", flag_key);
            (
                options.default_sdk_value.clone(),
                ResolutionDetails::error(
                    ErrorCode::FlagNotFound,
                    format!("flag {} not found", flag_key),
                ),
            )
        }
    }
}

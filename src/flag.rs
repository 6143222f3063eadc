use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::attribute_value::AttributeValue;
use crate::context::EvaluationContext;
use crate::eval::EvalError;
use crate::flag_value::FlagValue;
use crate::rule::Rule;
use crate::scheduled::ScheduledStep;
use crate::util::lookup_path;

/// Flag describes an individual feature flag.
///
/// The flag is immutable during evaluation. Scheduled steps are applied to a per-call working
/// copy, see [crate::apply_scheduled_steps].
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    /// Variation name to value. Every value must have the same JSON type.
    #[serde(default)]
    pub variations: BTreeMap<String, FlagValue>,

    /// Targeting rules, checked in order. The first one that applies wins.
    #[serde(default, rename = "targeting", skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,

    /// Evaluated when no targeting rule applies.
    pub default_rule: Option<Rule>,

    /// Outside this window the flag serves the caller's default value.
    pub experimentation: Option<ExperimentationRollout>,

    #[serde(default, rename = "scheduledRollout", skip_serializing_if = "Vec::is_empty")]
    pub scheduled: Vec<ScheduledStep>,

    pub disable: Option<bool>,
    pub track_events: Option<bool>,
    pub version: Option<String>,

    /// Custom attribute used instead of the targeting key to bucket callers. Dots descend into
    /// object attributes.
    #[serde(rename = "bucketingKey")]
    pub bucketing_key_attribute: Option<String>,

    /// Free-form information about the flag, returned with every evaluation result.
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// ExperimentationRollout bounds the time during which a flag is served. A missing bound is
/// unbounded on that side.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ExperimentationRollout {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ExperimentationRollout {
    /// Returns true if `now` falls outside the window.
    pub fn is_over(&self, now: DateTime<Utc>) -> bool {
        self.start.map(|start| now < start).unwrap_or(false)
            || self.end.map(|end| now > end).unwrap_or(false)
    }

    pub(crate) fn merge(&mut self, update: &ExperimentationRollout) {
        if update.start.is_some() {
            self.start = update.start;
        }
        if update.end.is_some() {
            self.end = update.end;
        }
    }
}

impl Flag {
    pub fn is_disabled(&self) -> bool {
        self.disable.unwrap_or(false)
    }

    /// Whether evaluations of this flag should be exported. Defaults to true.
    pub fn is_track_events(&self) -> bool {
        self.track_events.unwrap_or(true)
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or_default()
    }

    /// Returns the value of the named variation.
    pub fn variation_value(&self, name: &str) -> Option<&FlagValue> {
        self.variations.get(name)
    }

    /// Returns the index of the first targeting rule with the given name.
    pub fn rule_index_by_name(&self, name: &str) -> Option<usize> {
        self.rules.iter().position(|rule| rule.name() == name)
    }

    pub(crate) fn is_experimentation_over(&self, now: DateTime<Utc>) -> bool {
        self.experimentation
            .as_ref()
            .map(|e| e.is_over(now))
            .unwrap_or(false)
    }

    /// Results can be cached only if the flag cannot change over time by itself.
    pub(crate) fn is_cacheable(&self) -> bool {
        self.scheduled.is_empty() && self.experimentation.is_none()
    }

    /// Returns true if any rule reachable from this flag, including the rules carried by
    /// scheduled steps, needs a bucketing key.
    pub fn requires_bucketing(&self) -> bool {
        self.default_rule
            .iter()
            .chain(self.rules.iter())
            .any(Rule::requires_bucketing)
            || self.scheduled.iter().any(ScheduledStep::requires_bucketing)
    }

    /// Resolves the key used to bucket `context`.
    ///
    /// The key is the targeting key unless the flag names a bucketing attribute. That attribute
    /// is looked up the way queries see it, so a `common` attribute can supply it when the
    /// context does not. An empty key is accepted only if nothing in the flag needs to bucket.
    pub fn bucketing_key(
        &self,
        context: &EvaluationContext,
        common: &HashMap<String, AttributeValue>,
    ) -> Result<String, EvalError> {
        self.bucketing_key_in(context.key(), &context.query_map(common))
    }

    pub(crate) fn bucketing_key_in(
        &self,
        targeting_key: &str,
        attributes: &HashMap<String, AttributeValue>,
    ) -> Result<String, EvalError> {
        let key = match self.bucketing_key_attribute.as_deref() {
            None | Some("") => targeting_key.to_string(),
            Some(attribute) => match lookup_path(attributes, attribute) {
                Some(AttributeValue::String(value)) => value.clone(),
                None | Some(AttributeValue::Null) => String::new(),
                Some(_) => {
                    return Err(EvalError::InvalidBucketingKey(format!(
                        "invalid bucketing key: attribute '{}' is not a string",
                        attribute
                    )))
                }
            },
        };

        if key.is_empty() && self.requires_bucketing() {
            let source = match self.bucketing_key_attribute.as_deref() {
                None | Some("") => "targeting key",
                Some(_) => "bucketing key",
            };
            return Err(EvalError::MissingBucketingKey(format!("empty {}", source)));
        }
        Ok(key)
    }

    /// Checks that the flag can be evaluated.
    ///
    /// Variations must be present, non-null and share one JSON type. A default rule is required,
    /// every rule must be valid, and targeting rule names must be unique.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.variations.is_empty() {
            return Err(EvalError::Configuration("no variation available".into()));
        }

        let mut types = Vec::with_capacity(self.variations.len());
        for (name, value) in &self.variations {
            match value.json_type() {
                Some(json_type) => types.push(json_type),
                None => {
                    return Err(EvalError::Configuration(format!(
                        "nil value for variation: {}",
                        name
                    )))
                }
            }
        }
        if !types.iter().all_equal() {
            return Err(EvalError::Configuration(
                "all variations should have the same type".into(),
            ));
        }

        let default_rule = self
            .default_rule
            .as_ref()
            .ok_or_else(|| EvalError::Configuration("missing default rule".into()))?;
        default_rule.validate(true, &self.variations)?;

        for rule in &self.rules {
            rule.validate(false, &self.variations)?;
        }

        if let Some(name) = self
            .rules
            .iter()
            .map(Rule::name)
            .filter(|name| !name.is_empty())
            .duplicates()
            .next()
        {
            return Err(EvalError::Configuration(format!(
                "duplicated rule name: {}",
                name
            )));
        }

        Ok(())
    }
}

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::attribute_value::AttributeValue;
use crate::bucketing::{self, PROGRESSIVE_SPACE};
use crate::eval::EvalError;
use crate::flag_value::FlagValue;
use crate::progressive::ProgressiveRollout;
use crate::query;

/// A Rule decides whether a flag applies to a context and, if so, which variation it serves.
///
/// Every field is optional so that a scheduled step can carry a partial rule. A rule serves its
/// variation through exactly one decision mode. When several are set, a progressive rollout wins
/// over a non-empty percentage split, which wins over a fixed variation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Stable identifier used by scheduled steps to address the rule.
    pub name: Option<String>,
    /// Targeting query. Absent or empty matches every context. Ignored on the default rule.
    pub query: Option<String>,
    #[serde(rename = "variation")]
    pub variation_result: Option<String>,
    #[serde(rename = "percentage")]
    pub percentages: Option<BTreeMap<String, f64>>,
    pub progressive_rollout: Option<ProgressiveRollout>,
    pub disable: Option<bool>,
}

/// The decision mode a rule uses to pick a variation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decision<'a> {
    Progressive(&'a ProgressiveRollout),
    Percentage(&'a BTreeMap<String, f64>),
    Variation(&'a str),
}

impl Rule {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn is_disabled(&self) -> bool {
        self.disable.unwrap_or(false)
    }

    /// Returns the non-empty percentage split, if any. An empty map counts as not set.
    pub fn percentages(&self) -> Option<&BTreeMap<String, f64>> {
        self.percentages.as_ref().filter(|p| !p.is_empty())
    }

    /// Returns the active decision mode.
    pub fn decision(&self) -> Option<Decision<'_>> {
        if let Some(rollout) = &self.progressive_rollout {
            Some(Decision::Progressive(rollout))
        } else if let Some(percentages) = self.percentages() {
            Some(Decision::Percentage(percentages))
        } else {
            self.variation_result.as_deref().map(Decision::Variation)
        }
    }

    /// Returns true if evaluating this rule hashes the bucketing key.
    pub fn requires_bucketing(&self) -> bool {
        self.progressive_rollout.is_some() || self.percentages().is_some()
    }

    /// Returns true if two callers matching this rule may be served different variations.
    ///
    /// A split where one variation holds 100% always serves that variation, so it is static.
    pub fn is_dynamic(&self) -> bool {
        self.progressive_rollout.is_some()
            || self
                .percentages()
                .map(|p| !p.values().any(|pct| *pct == 100.0))
                .unwrap_or(false)
    }

    /// Evaluates the rule and returns the name of the variation it serves.
    ///
    /// For targeting rules a disabled rule or a query that does not match yields
    /// [EvalError::RuleNotApplicable]. The default rule always applies.
    pub fn evaluate(
        &self,
        flag_key: &str,
        bucketing_key: &str,
        context: &HashMap<String, AttributeValue>,
        now: DateTime<Utc>,
        is_default: bool,
    ) -> Result<&str, EvalError> {
        if !is_default {
            if self.is_disabled() {
                debug!("rule '{}' of flag '{}' is disabled", self.name(), flag_key);
                return Err(EvalError::RuleNotApplicable);
            }
            if !query::evaluate(self.query.as_deref().unwrap_or_default(), context) {
                return Err(EvalError::RuleNotApplicable);
            }
        }

        match self.decision() {
            Some(Decision::Progressive(rollout)) => {
                if bucketing_key.is_empty() {
                    return Err(EvalError::MissingBucketingKey(
                        "progressive rollout requires a bucketing key".into(),
                    ));
                }
                let hash = bucketing::bucket(flag_key, bucketing_key, PROGRESSIVE_SPACE);
                rollout.resolve(hash, now)
            }
            Some(Decision::Percentage(percentages)) => {
                if bucketing_key.is_empty() {
                    return Err(EvalError::MissingBucketingKey(
                        "percentage rollout requires a bucketing key".into(),
                    ));
                }
                if percentages.values().any(|p| *p < 0.0) {
                    return Err(EvalError::Configuration(
                        "invalid percentages: should not be negative".into(),
                    ));
                }
                let space = bucketing::percentage_space(percentages);
                let hash = bucketing::bucket(flag_key, bucketing_key, space);
                match bucketing::variation_for_hash(percentages, hash) {
                    Some(variation) => Ok(variation),
                    None if is_default => Err(EvalError::Configuration(
                        "impossible to find the variation".into(),
                    )),
                    None => Err(EvalError::RuleNotApplicable),
                }
            }
            Some(Decision::Variation(variation)) => Ok(variation),
            None => Err(EvalError::Configuration(
                "error in the configuration, no variation available for this rule".into(),
            )),
        }
    }

    /// Overwrites the fields that `update` sets.
    ///
    /// Percentages merge per variation; a negative percentage removes that variation from the
    /// split. Progressive rollouts merge field by field.
    pub fn merge(&mut self, update: &Rule) {
        if update.disable.is_some() {
            self.disable = update.disable;
        }
        if update.query.is_some() {
            self.query = update.query.clone();
        }
        if update.variation_result.is_some() {
            self.variation_result = update.variation_result.clone();
        }
        if let Some(rollout) = &update.progressive_rollout {
            self.progressive_rollout
                .get_or_insert_with(ProgressiveRollout::default)
                .merge(rollout);
        }
        if let Some(updated) = &update.percentages {
            let merged = self.percentages.get_or_insert_with(BTreeMap::new);
            for (variation, pct) in updated {
                if *pct < 0.0 {
                    merged.remove(variation);
                } else {
                    merged.insert(variation.clone(), *pct);
                }
            }
        }
    }

    /// Checks that the rule can produce a variation that exists in `variations`.
    ///
    /// A disabled targeting rule is always valid since it is never evaluated.
    pub fn validate(
        &self,
        is_default: bool,
        variations: &BTreeMap<String, FlagValue>,
    ) -> Result<(), EvalError> {
        if !is_default && self.is_disabled() {
            return Ok(());
        }

        if self.percentages.is_none()
            && self.progressive_rollout.is_none()
            && self.variation_result.is_none()
        {
            return Err(config_error("impossible to return value"));
        }

        if !is_default {
            let query = self
                .query
                .as_deref()
                .ok_or_else(|| config_error("each targeting should have a query"))?;
            query::validate(query).map_err(|e| config_error(e.to_string()))?;
        }

        if let Some(percentages) = &self.percentages {
            if percentages.is_empty() {
                return Err(config_error("invalid percentages: should not be empty"));
            }
            if let Some(unknown) = percentages.keys().find(|k| !variations.contains_key(*k)) {
                return Err(config_error(format!(
                    "invalid percentage: variation {} does not exist",
                    unknown
                )));
            }
            if percentages.values().any(|p| *p < 0.0 || !p.is_finite()) {
                return Err(config_error("invalid percentages: should not be negative"));
            }
            if percentages.values().sum::<f64>() == 0.0 {
                return Err(config_error("invalid percentages: should not be equal to 0"));
            }
        }

        if let Some(rollout) = &self.progressive_rollout {
            let initial = rollout.initial.clone().unwrap_or_default();
            let end = rollout.end.clone().unwrap_or_default();
            let (initial_pct, end_pct) = (
                initial.percentage.unwrap_or(0.0),
                end.percentage.unwrap_or(0.0),
            );
            if end_pct < initial_pct {
                return Err(config_error(format!(
                    "invalid progressive rollout, initial percentage should be lower than end \
                     percentage: {}/{}",
                    initial_pct, end_pct
                )));
            }
            for (which, step) in [("end", &end), ("initial", &initial)] {
                let variation = step.variation.as_deref().unwrap_or_default();
                if !variations.contains_key(variation) {
                    return Err(config_error(format!(
                        "invalid progressive rollout, {} variation {} does not exist",
                        which, variation
                    )));
                }
            }
        }

        if self.percentages.is_none() && self.progressive_rollout.is_none() {
            if let Some(variation) = &self.variation_result {
                if !variations.contains_key(variation) {
                    return Err(config_error(format!(
                        "invalid variation: {} does not exist",
                        variation
                    )));
                }
            }
        }

        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> EvalError {
    EvalError::Configuration(message.into())
}

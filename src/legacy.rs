//! Conversion of flags written in the legacy (v0) configuration format.
//!
//! A legacy flag has three fixed variations, `True`, `False` and `Default`, and a single rule
//! that serves `True` to a percentage of the contexts matching it. It is converted into a
//! [Flag] with one targeting rule named [LEGACY_RULE_NAME] and a default rule serving `Default`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use maplit::btreemap;
use serde::{Deserialize, Serialize};

use crate::flag::{ExperimentationRollout, Flag};
use crate::flag_value::FlagValue;
use crate::progressive::{ProgressiveRollout, ProgressiveRolloutStep};
use crate::rule::Rule;
use crate::scheduled::{FlagPatch, ScheduledStep};

/// Name of the targeting rule created for a legacy flag. Scheduled steps address it by name.
pub const LEGACY_RULE_NAME: &str = "legacyRuleV0";

const TRUE_VARIATION: &str = "True";
const FALSE_VARIATION: &str = "False";
const DEFAULT_VARIATION: &str = "Default";

/// A flag in the legacy configuration format.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LegacyFlag {
    /// Query selecting the contexts that may get the `True` variation. Empty matches everyone.
    pub rule: Option<String>,
    /// Share of the matching contexts served `True`, between 0 and 100.
    pub percentage: Option<f64>,
    #[serde(rename = "true")]
    pub true_value: Option<FlagValue>,
    #[serde(rename = "false")]
    pub false_value: Option<FlagValue>,
    #[serde(rename = "default")]
    pub default_value: Option<FlagValue>,
    pub track_events: Option<bool>,
    pub disable: Option<bool>,
    pub version: Option<LegacyVersion>,
    pub rollout: Option<LegacyRollout>,
}

/// Legacy files allow the version to be written as a number.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum LegacyVersion {
    Number(f64),
    Text(String),
}

impl fmt::Display for LegacyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyVersion::Number(n) => write!(f, "{}", n),
            LegacyVersion::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LegacyRollout {
    pub experimentation: Option<ExperimentationRollout>,
    pub progressive: Option<LegacyProgressive>,
    pub scheduled: Option<LegacyScheduled>,
}

/// Ramps the `True` percentage from `percentage.initial` to `percentage.end` over the release
/// ramp. Ignored unless both ramp dates are set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LegacyProgressive {
    #[serde(default)]
    pub percentage: LegacyProgressivePercentage,
    #[serde(default)]
    pub release_ramp: LegacyReleaseRamp,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LegacyProgressivePercentage {
    pub initial: Option<f64>,
    pub end: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LegacyReleaseRamp {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LegacyScheduled {
    #[serde(default)]
    pub steps: Vec<LegacyScheduledStep>,
}

/// A dated partial legacy flag.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LegacyScheduledStep {
    #[serde(flatten)]
    pub flag: LegacyFlag,
    pub date: Option<DateTime<Utc>>,
}

impl LegacyFlag {
    /// Converts this flag into the canonical format.
    pub fn into_flag(self) -> Flag {
        let rollout = self.rollout.clone().unwrap_or_default();
        Flag {
            variations: self.variations(),
            rules: self.legacy_rule(false).into_iter().collect(),
            default_rule: Some(Rule {
                variation_result: Some(DEFAULT_VARIATION.to_string()),
                ..Default::default()
            }),
            experimentation: rollout.experimentation,
            scheduled: rollout
                .scheduled
                .map(|scheduled| {
                    scheduled
                        .steps
                        .into_iter()
                        .map(LegacyScheduledStep::into_step)
                        .collect()
                })
                .unwrap_or_default(),
            disable: self.disable,
            track_events: self.track_events,
            version: self.version.as_ref().map(LegacyVersion::to_string),
            bucketing_key_attribute: None,
            metadata: None,
        }
    }

    /// Converts this flag into a patch. Only the fields that are set end up in the patch.
    fn into_patch(self) -> FlagPatch {
        let variations = self.variations();
        FlagPatch {
            variations: if variations.is_empty() {
                None
            } else {
                Some(variations.into_iter().map(|(k, v)| (k, Some(v))).collect())
            },
            rules: self.legacy_rule(true).map(|rule| vec![rule]),
            default_rule: None,
            experimentation: self.rollout.and_then(|rollout| rollout.experimentation),
            track_events: self.track_events,
            disable: self.disable,
            version: self.version.as_ref().map(LegacyVersion::to_string),
        }
    }

    fn variations(&self) -> BTreeMap<String, FlagValue> {
        [
            (TRUE_VARIATION, &self.true_value),
            (FALSE_VARIATION, &self.false_value),
            (DEFAULT_VARIATION, &self.default_value),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|value| (name.to_string(), value)))
        .collect()
    }

    fn legacy_rule(&self, is_step: bool) -> Option<Rule> {
        let progressive_rollout = self
            .rollout
            .as_ref()
            .and_then(|rollout| rollout.progressive.as_ref())
            .and_then(LegacyProgressive::to_progressive_rollout);

        let splits = !is_step || self.percentage.is_some();
        let percentages = if progressive_rollout.is_none() && splits {
            let percentage = self.percentage.unwrap_or(0.0);
            Some(btreemap! {
                TRUE_VARIATION.to_string() => percentage,
                FALSE_VARIATION.to_string() => 100.0 - percentage,
            })
        } else {
            None
        };

        let query = match &self.rule {
            Some(rule) => Some(rule.clone()),
            None if !is_step => Some(String::new()),
            None => None,
        };

        if query.is_none() && percentages.is_none() && progressive_rollout.is_none() {
            return None;
        }
        Some(Rule {
            name: Some(LEGACY_RULE_NAME.to_string()),
            query,
            percentages,
            progressive_rollout,
            ..Default::default()
        })
    }
}

impl LegacyProgressive {
    fn to_progressive_rollout(&self) -> Option<ProgressiveRollout> {
        let (start, end) = (self.release_ramp.start?, self.release_ramp.end?);
        Some(ProgressiveRollout {
            initial: Some(ProgressiveRolloutStep {
                variation: Some(FALSE_VARIATION.to_string()),
                percentage: self.percentage.initial,
                date: Some(start),
            }),
            end: Some(ProgressiveRolloutStep {
                variation: Some(TRUE_VARIATION.to_string()),
                percentage: self.percentage.end,
                date: Some(end),
            }),
        })
    }
}

impl LegacyScheduledStep {
    fn into_step(self) -> ScheduledStep {
        ScheduledStep {
            patch: self.flag.into_patch(),
            date: self.date,
        }
    }
}

impl From<LegacyFlag> for Flag {
    fn from(legacy: LegacyFlag) -> Self {
        legacy.into_flag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvaluationContext;
    use crate::eval::{FlagContext, Reason};
    use crate::scheduled::apply_scheduled_steps;
    use chrono::TimeZone;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    fn legacy(value: serde_json::Value) -> Flag {
        serde_json::from_value::<LegacyFlag>(value).unwrap().into()
    }

    #[test]
    fn converts_a_percentage_flag() {
        let flag = legacy(json!({
            "rule": "key eq \"user-123\"",
            "percentage": 50,
            "true": "on",
            "false": "off",
            "default": "default",
            "trackEvents": false,
            "version": 1.5
        }));

        assert_that!(flag.variations.len()).is_equal_to(3);
        assert_that!(flag.rules).has_length(1);
        let rule = &flag.rules[0];
        assert_that!(rule.name()).is_equal_to(LEGACY_RULE_NAME);
        assert_that!(rule.query).contains_value("key eq \"user-123\"".to_string());
        assert_that!(rule.percentages).contains_value(btreemap! {
            "True".to_string() => 50.0,
            "False".to_string() => 50.0,
        });
        assert_that!(flag.default_rule.as_ref().unwrap().variation_result)
            .contains_value("Default".to_string());
        assert_that!(flag.version()).is_equal_to("1.5");
        assert_that!(flag.is_track_events()).is_false();
        assert!(flag.validate().is_ok());
    }

    #[test]
    fn converted_flag_evaluates() {
        let flag = legacy(json!({
            "rule": "key sw \"user\"",
            "percentage": 50,
            "true": true,
            "false": false,
            "default": false
        }));
        let options = FlagContext::default();

        let context = EvaluationContext::new("user-123");
        let (value, details) = flag.value("legacyFlag", &context, &options);
        assert_that!(value).is_equal_to(FlagValue::Bool(true));
        assert_that!(details.reason).is_equal_to(Reason::TargetingMatchSplit);

        let (_, details) = flag.value("legacyFlag", &EvaluationContext::new("admin"), &options);
        assert_that!(details.variant).is_equal_to("Default".to_string());
        assert_that!(details.reason).is_equal_to(Reason::Default);
    }

    #[test]
    fn missing_rule_matches_everyone() {
        let flag = legacy(json!({"true": 1, "false": 2, "default": 3}));
        let rule = &flag.rules[0];
        assert_that!(rule.query).contains_value(String::new());
        assert_that!(rule.percentages).contains_value(btreemap! {
            "True".to_string() => 0.0,
            "False".to_string() => 100.0,
        });
    }

    #[test_case(json!(2), "2")]
    #[test_case(json!(0.1), "0.1")]
    #[test_case(json!("v3"), "v3")]
    fn versions(version: serde_json::Value, expected: &str) {
        let flag = legacy(json!({"true": 1, "false": 2, "default": 3, "version": version}));
        assert_that!(flag.version()).is_equal_to(expected);
    }

    #[test]
    fn converts_progressive_rollout() {
        let flag = legacy(json!({
            "true": true,
            "false": false,
            "default": false,
            "percentage": 10,
            "rollout": {
                "progressive": {
                    "percentage": {"initial": 0, "end": 100},
                    "releaseRamp": {"start": "2024-01-01T00:00:00Z", "end": "2024-01-02T00:00:00Z"}
                }
            }
        }));
        let rule = &flag.rules[0];
        assert_that!(rule.percentages).is_none();
        let rollout = rule.progressive_rollout.as_ref().unwrap();
        assert_that!(rollout.initial.as_ref().unwrap().variation)
            .contains_value("False".to_string());
        assert_that!(rollout.end.as_ref().unwrap().variation).contains_value("True".to_string());
        assert_that!(rollout.is_valid()).is_true();
    }

    #[test]
    fn incomplete_ramp_is_ignored() {
        let flag = legacy(json!({
            "true": true, "false": false, "default": false, "percentage": 10,
            "rollout": {"progressive": {"releaseRamp": {"start": "2024-01-01T00:00:00Z"}}}
        }));
        assert_that!(flag.rules[0].progressive_rollout).is_none();
        assert_that!(flag.rules[0].percentages).is_some();
    }

    #[test]
    fn converts_experimentation_and_scheduled_steps() {
        let flag = legacy(json!({
            "true": "on",
            "false": "off",
            "default": "off",
            "percentage": 0,
            "rollout": {
                "experimentation": {"start": "2024-01-01T00:00:00Z"},
                "scheduled": {
                    "steps": [
                        {"date": "2024-02-01T00:00:00Z", "percentage": 40},
                        {"date": "2024-03-01T00:00:00Z", "true": "ON", "disable": true}
                    ]
                }
            }
        }));

        assert_that!(flag.experimentation.as_ref().unwrap().start)
            .contains_value(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_that!(flag.scheduled).has_length(2);

        let first = &flag.scheduled[0].patch;
        assert_that!(first.variations).is_none();
        assert_that!(first.default_rule).is_none();
        let rules = first.rules.as_ref().unwrap();
        assert_that!(rules[0].name()).is_equal_to(LEGACY_RULE_NAME);
        assert_that!(rules[0].query).is_none();

        let second = &flag.scheduled[1].patch;
        assert_that!(second.rules).is_none();
        assert_that!(second.disable).contains_value(true);

        let march = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let merged = apply_scheduled_steps(&flag, march);
        assert_that!(merged.rules).has_length(1);
        assert_that!(merged.rules[0].percentages).contains_value(btreemap! {
            "True".to_string() => 40.0,
            "False".to_string() => 60.0,
        });
        assert_that!(merged.rules[0].query).contains_value(String::new());
        assert_that!(merged.variation_value("True")).contains_value(&FlagValue::Str("ON".into()));
        assert_that!(merged.is_disabled()).is_true();
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::bucketing::PERCENTAGE_MULTIPLIER;
use crate::eval::EvalError;

/// A ProgressiveRollout ramps a rule from its initial variation to its end variation over a
/// time window. The share of callers served the end variation grows linearly from
/// `initial.percentage` to `end.percentage` between the two dates.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProgressiveRollout {
    pub initial: Option<ProgressiveRolloutStep>,
    pub end: Option<ProgressiveRolloutStep>,
}

/// One end of a [ProgressiveRollout].
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProgressiveRolloutStep {
    pub variation: Option<String>,
    pub percentage: Option<f64>,
    pub date: Option<DateTime<Utc>>,
}

impl ProgressiveRolloutStep {
    fn merge(&mut self, update: &ProgressiveRolloutStep) {
        if update.variation.is_some() {
            self.variation = update.variation.clone();
        }
        if update.percentage.is_some() {
            self.percentage = update.percentage;
        }
        if update.date.is_some() {
            self.date = update.date;
        }
    }
}

/// The checked view of a rollout: every field the ramp needs is present.
struct Ramp<'a> {
    initial_variation: &'a str,
    initial_percentage: f64,
    initial_date: DateTime<Utc>,
    end_variation: &'a str,
    end_percentage: f64,
    end_date: DateTime<Utc>,
}

impl ProgressiveRollout {
    fn ramp(&self) -> Result<Ramp<'_>, EvalError> {
        let missing = || {
            EvalError::Configuration("error in the progressive rollout, missing params".into())
        };
        let initial = self.initial.as_ref().ok_or_else(missing)?;
        let end = self.end.as_ref().ok_or_else(missing)?;

        let ramp = Ramp {
            initial_variation: initial.variation.as_deref().ok_or_else(missing)?,
            initial_percentage: initial.percentage.unwrap_or(0.0),
            initial_date: initial.date.ok_or_else(missing)?,
            end_variation: end.variation.as_deref().ok_or_else(missing)?,
            end_percentage: match end.percentage {
                Some(p) if p > 0.0 && p <= 100.0 => p,
                _ => 100.0,
            },
            end_date: end.date.ok_or_else(missing)?,
        };

        if ramp.end_date <= ramp.initial_date {
            return Err(missing());
        }
        Ok(ramp)
    }

    /// Returns true if every field needed to compute the ramp is set and the end date is after
    /// the initial date.
    pub fn is_valid(&self) -> bool {
        self.ramp().is_ok()
    }

    /// Picks the variation for a caller whose progressive bucket is `hash` at instant `now`.
    ///
    /// `hash` must come from a bucket space of `100 * PERCENTAGE_MULTIPLIER`.
    pub fn resolve(&self, hash: u32, now: DateTime<Utc>) -> Result<&str, EvalError> {
        let ramp = self.ramp()?;
        if now < ramp.initial_date {
            return Ok(ramp.initial_variation);
        }

        let initial = ramp.initial_percentage * PERCENTAGE_MULTIPLIER;
        let end = ramp.end_percentage * PERCENTAGE_MULTIPLIER;
        let threshold = if now >= ramp.end_date {
            end
        } else {
            let total = (ramp.end_date.timestamp() - ramp.initial_date.timestamp()) as f64;
            let elapsed = (now.timestamp() - ramp.initial_date.timestamp()) as f64;
            initial + elapsed * (end - initial) / total
        };

        if hash < threshold as u32 {
            Ok(ramp.end_variation)
        } else {
            Ok(ramp.initial_variation)
        }
    }

    pub(crate) fn merge(&mut self, update: &ProgressiveRollout) {
        merge_step(&mut self.initial, &update.initial);
        merge_step(&mut self.end, &update.end);
    }
}

fn merge_step(
    current: &mut Option<ProgressiveRolloutStep>,
    update: &Option<ProgressiveRolloutStep>,
) {
    match (current.as_mut(), update) {
        (Some(current), Some(update)) => current.merge(update),
        (None, Some(update)) => *current = Some(update.clone()),
        (_, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use spectral::prelude::*;
    use test_case::test_case;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn rollout(initial_pct: Option<f64>, end_pct: Option<f64>, seconds: i64) -> ProgressiveRollout {
        ProgressiveRollout {
            initial: Some(ProgressiveRolloutStep {
                variation: Some("off".into()),
                percentage: initial_pct,
                date: Some(start()),
            }),
            end: Some(ProgressiveRolloutStep {
                variation: Some("on".into()),
                percentage: end_pct,
                date: Some(start() + Duration::seconds(seconds)),
            }),
        }
    }

    #[test]
    fn before_start_serves_initial_variation_to_everyone() {
        let rollout = rollout(Some(50.0), Some(100.0), 60);
        let before = start() - Duration::seconds(1);
        assert_that!(rollout.resolve(0, before)).is_ok_containing("off");
        assert_that!(rollout.resolve(99_999, before)).is_ok_containing("off");
    }

    #[test]
    fn after_end_uses_end_percentage() {
        let rollout = rollout(Some(0.0), Some(40.0), 60);
        let after = start() + Duration::days(3);
        assert_that!(rollout.resolve(39_999, after)).is_ok_containing("on");
        assert_that!(rollout.resolve(40_000, after)).is_ok_containing("off");
    }

    #[test_case(0, 0, "off"; "at start nobody is ramped")]
    #[test_case(1, 49_999, "on"; "halfway below threshold")]
    #[test_case(1, 50_000, "off"; "halfway at threshold")]
    #[test_case(2, 99_999, "on"; "at end everyone is ramped")]
    fn two_second_ramp(seconds: i64, hash: u32, expected: &str) {
        let rollout = rollout(Some(0.0), Some(100.0), 2);
        let now = start() + Duration::seconds(seconds);
        assert_that!(rollout.resolve(hash, now)).is_ok_containing(expected);
    }

    #[test_case(None; "missing")]
    #[test_case(Some(0.0); "zero")]
    #[test_case(Some(150.0); "above one hundred")]
    fn end_percentage_defaults_to_full(end_pct: Option<f64>) {
        let rollout = rollout(None, end_pct, 10);
        let after = start() + Duration::seconds(10);
        assert_that!(rollout.resolve(99_999, after)).is_ok_containing("on");
    }

    #[test]
    fn invalid_configurations_are_errors() {
        let mut reversed = rollout(None, None, 10);
        reversed.end.as_mut().unwrap().date = Some(start() - Duration::seconds(10));
        assert_that!(reversed.resolve(0, start())).is_err();

        let mut no_variation = rollout(None, None, 10);
        no_variation.initial.as_mut().unwrap().variation = None;
        assert_that!(no_variation.is_valid()).is_false();

        assert_that!(ProgressiveRollout::default().resolve(0, start())).is_err();
    }

    #[test]
    fn merge_is_field_wise() {
        let mut base = rollout(Some(10.0), Some(50.0), 10);
        base.merge(&ProgressiveRollout {
            initial: None,
            end: Some(ProgressiveRolloutStep {
                percentage: Some(90.0),
                ..Default::default()
            }),
        });
        let end = base.end.unwrap();
        assert_that!(end.percentage).contains_value(90.0);
        assert_that!(end.variation).contains_value("on".to_string());
        assert_that!(base.initial.unwrap().percentage).contains_value(10.0);
    }

    #[test]
    fn deserializes_rfc3339_dates() {
        let rollout: ProgressiveRollout = serde_json::from_str(
            r#"{
                "initial": {"variation": "off", "percentage": 0, "date": "2024-01-01T00:00:00Z"},
                "end": {"variation": "on", "percentage": 100, "date": "2024-01-01T00:00:02+00:00"}
            }"#,
        )
        .unwrap();
        assert_that!(rollout).is_equal_to(self::rollout(Some(0.0), Some(100.0), 2));
    }
}

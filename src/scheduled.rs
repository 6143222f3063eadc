use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::flag::{ExperimentationRollout, Flag};
use crate::flag_value::FlagValue;
use crate::rule::Rule;

/// A partial flag carried by a [ScheduledStep]. Only the fields that are set are applied.
///
/// A `null` variation value removes that variation from the flag.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlagPatch {
    pub variations: Option<BTreeMap<String, Option<FlagValue>>>,
    #[serde(rename = "targeting")]
    pub rules: Option<Vec<Rule>>,
    pub default_rule: Option<Rule>,
    pub experimentation: Option<ExperimentationRollout>,
    pub track_events: Option<bool>,
    pub disable: Option<bool>,
    pub version: Option<String>,
}

/// A dated change to a flag. Steps without a date never apply.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ScheduledStep {
    #[serde(flatten)]
    pub patch: FlagPatch,
    pub date: Option<DateTime<Utc>>,
}

impl ScheduledStep {
    /// Returns true if any rule this step carries would hash the bucketing key.
    pub fn requires_bucketing(&self) -> bool {
        self.patch
            .default_rule
            .iter()
            .chain(self.patch.rules.iter().flatten())
            .any(Rule::requires_bucketing)
    }
}

/// Returns the flag as it stands at `now`, with every step dated at or before `now` applied.
///
/// Steps apply in date order; steps sharing a date apply in declaration order. The base flag is
/// never modified. When no step is due the base flag is returned as is.
pub fn apply_scheduled_steps(flag: &Flag, now: DateTime<Utc>) -> Cow<'_, Flag> {
    let due: Vec<(&DateTime<Utc>, &FlagPatch)> = flag
        .scheduled
        .iter()
        .filter_map(|step| step.date.as_ref().map(|date| (date, &step.patch)))
        .filter(|(date, _)| **date <= now)
        .sorted_by_key(|(date, _)| **date)
        .collect();

    if due.is_empty() {
        return Cow::Borrowed(flag);
    }

    let mut working = flag.clone();
    for (date, patch) in due {
        debug!("applying scheduled step dated {}", date);
        patch.apply_to(&mut working);
    }
    Cow::Owned(working)
}

impl FlagPatch {
    fn apply_to(&self, flag: &mut Flag) {
        if let Some(variations) = &self.variations {
            for (name, value) in variations {
                match value {
                    Some(value) => {
                        flag.variations.insert(name.clone(), value.clone());
                    }
                    None => {
                        flag.variations.remove(name);
                    }
                }
            }
        }

        if let Some(updates) = &self.rules {
            merge_rules(&mut flag.rules, updates);
        }

        if let Some(update) = &self.default_rule {
            match flag.default_rule.as_mut() {
                Some(rule) => rule.merge(update),
                None => flag.default_rule = Some(update.clone()),
            }
        }

        if let Some(update) = &self.experimentation {
            flag.experimentation
                .get_or_insert_with(ExperimentationRollout::default)
                .merge(update);
        }

        if self.disable.is_some() {
            flag.disable = self.disable;
        }
        if self.track_events.is_some() {
            flag.track_events = self.track_events;
        }
        if self.version.is_some() {
            flag.version = self.version.clone();
        }
    }
}

/// Merges named updates into the rules they address and appends every other update.
fn merge_rules(rules: &mut Vec<Rule>, updates: &[Rule]) {
    for update in updates {
        let target = update
            .name
            .as_deref()
            .and_then(|name| rules.iter_mut().find(|rule| rule.name.as_deref() == Some(name)));
        match target {
            Some(rule) => rule.merge(update),
            None => rules.push(update.clone()),
        }
    }
}

#![cfg(test)]

use crate::flag::Flag;
use crate::store::Store;
use maplit::hashmap;
use std::collections::HashMap;

pub fn flag_from_json(value: serde_json::Value) -> Flag {
    serde_json::from_value(value).unwrap()
}

pub struct TestStore {
    flags: HashMap<String, Flag>,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            flags: hashmap! {
                "staticFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"on": true, "off": false},
                        "defaultRule": {"variation": "on"}
                    }"#).unwrap(),
                "splitFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"A": true, "B": false},
                        "defaultRule": {"percentage": {"A": 20, "B": 80}},
                        "version": "1"
                    }"#).unwrap(),
                "targetedFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"a": "a", "b": "b", "c": "c"},
                        "targeting": [
                            {"name": "beta", "query": "beta eq true", "variation": "a"},
                            {"name": "email", "query": "email ew \"@example.com\"",
                             "variation": "b"},
                            {"name": "everyone", "query": "key pr", "variation": "a",
                             "disable": true}
                        ],
                        "defaultRule": {"variation": "c"},
                        "metadata": {"owner": "team-a"}
                    }"#).unwrap(),
                "scheduledSplitFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"on": true, "off": false},
                        "defaultRule": {"variation": "off"},
                        "scheduledRollout": [
                            {
                                "date": "2024-05-01T00:00:00Z",
                                "targeting": [
                                    {"name": "later", "query": "beta eq true",
                                     "percentage": {"on": 50, "off": 50}}
                                ],
                                "defaultRule": {"variation": "on"}
                            }
                        ]
                    }"#).unwrap(),
                "progressiveFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"on": true, "off": false},
                        "defaultRule": {
                            "progressiveRollout": {
                                "initial": {"variation": "off", "percentage": 0,
                                            "date": "2024-01-01T00:00:00Z"},
                                "end": {"variation": "on", "percentage": 100,
                                        "date": "2024-01-01T00:00:02Z"}
                            }
                        }
                    }"#).unwrap(),
                "experimentFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"on": true, "off": false},
                        "defaultRule": {"variation": "on"},
                        "experimentation": {
                            "start": "2024-03-01T00:00:00Z",
                            "end": "2024-04-01T00:00:00Z"
                        }
                    }"#).unwrap(),
                "disabledFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"on": true, "off": false},
                        "defaultRule": {"variation": "on"},
                        "disable": true,
                        "trackEvents": false
                    }"#).unwrap(),
                "bucketingKeyFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"A": "a", "B": "b"},
                        "bucketingKey": "teamId",
                        "defaultRule": {"percentage": {"A": 40, "B": 60}}
                    }"#).unwrap(),
                "jsonLogicFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"on": true, "off": false},
                        "targeting": [
                            {"name": "prod", "query": "{\"==\": [{\"var\": \"env\"}, \"prod\"]}",
                             "variation": "on"}
                        ],
                        "defaultRule": {"variation": "off"}
                    }"#).unwrap(),
                "splitTargetFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"A": "a", "B": "b", "C": "c"},
                        "targeting": [
                            {"name": "half", "query": "key sw \"user\"",
                             "percentage": {"A": 20, "B": 80}}
                        ],
                        "defaultRule": {"variation": "C"}
                    }"#).unwrap(),
                "numberFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"low": 1.9, "high": 42},
                        "defaultRule": {"variation": "low"},
                        "version": "3",
                        "metadata": {"team": "core"}
                    }"#).unwrap(),
                "jsonFlag".to_string() => serde_json::from_str(r#"{
                        "variations": {"small": {"size": 1}, "large": {"size": 10}},
                        "targeting": [
                            {"name": "big spender", "query": "spend gt 100", "variation": "large"}
                        ],
                        "defaultRule": {"variation": "small"}
                    }"#).unwrap(),
            },
        }
    }

    pub fn flag(&self, flag_key: &str) -> Option<&Flag> {
        self.flags.get(flag_key)
    }
}

impl Store for TestStore {
    fn flag(&self, flag_key: &str) -> Option<&Flag> {
        self.flags.get(flag_key)
    }

    fn flag_keys(&self) -> Vec<&str> {
        self.flags.keys().map(String::as_str).collect()
    }
}

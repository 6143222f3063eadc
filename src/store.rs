use std::collections::{BTreeMap, HashMap};

use crate::flag::Flag;

/// Store is an interface for a data store that holds feature flags by key.
///
/// The engine only reads from it. Implementations that refresh their flags must hand out a
/// consistent snapshot for the duration of one evaluation.
pub trait Store {
    /// Retrieve the flag with key `flag_key`.
    fn flag(&self, flag_key: &str) -> Option<&Flag>;

    /// Keys of every flag in the store.
    fn flag_keys(&self) -> Vec<&str>;
}

impl Store for HashMap<String, Flag> {
    fn flag(&self, flag_key: &str) -> Option<&Flag> {
        self.get(flag_key)
    }

    fn flag_keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

impl Store for BTreeMap<String, Flag> {
    fn flag(&self, flag_key: &str) -> Option<&Flag> {
        self.get(flag_key)
    }

    fn flag_keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::flag_from_json;
    use maplit::{btreemap, hashmap};
    use serde_json::json;
    use spectral::prelude::*;

    fn flag() -> Flag {
        flag_from_json(json!({"variations": {"a": 1}, "defaultRule": {"variation": "a"}}))
    }

    #[test]
    fn maps_are_stores() {
        let hash = hashmap! {"f".to_string() => flag()};
        let tree = btreemap! {"f".to_string() => flag()};
        let stores: [&dyn Store; 2] = [&hash, &tree];
        for store in stores {
            assert_that!(store.flag("f")).is_some();
            assert_that!(store.flag("g")).is_none();
            assert_that!(store.flag_keys()).is_equal_to(vec!["f"]);
        }
    }
}

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;
use crate::util::lookup_path;

const ANONYMOUS_ATTRIBUTE: &str = "anonymous";
const KEY_ATTRIBUTE: &str = "key";

/// An EvaluationContext identifies the subject of a flag evaluation (an end user, a service, a
/// device) through a targeting key and a set of custom attributes.
///
/// The targeting key seeds percentage bucketing unless the flag selects another attribute with
/// its `bucketingKey`. It may be empty for flags that never need to bucket.
///
/// To create a context, use [EvaluationContextBuilder].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    #[serde(default)]
    targeting_key: String,
    #[serde(flatten)]
    attributes: HashMap<String, AttributeValue>,
}

impl EvaluationContext {
    /// Shorthand for a context with a targeting key and no custom attributes.
    pub fn new(targeting_key: impl Into<String>) -> Self {
        EvaluationContextBuilder::new(targeting_key).build()
    }

    /// Returns the targeting key.
    pub fn key(&self) -> &str {
        &self.targeting_key
    }

    /// Returns true if the `anonymous` custom attribute is set to `true`.
    pub fn is_anonymous(&self) -> bool {
        self.attributes
            .get(ANONYMOUS_ATTRIBUTE)
            .and_then(AttributeValue::as_bool)
            .unwrap_or(false)
    }

    /// Returns all custom attributes.
    pub fn attributes(&self) -> &HashMap<String, AttributeValue> {
        &self.attributes
    }

    /// Looks up a custom attribute. Dots in `path` descend into object attributes.
    pub fn value_of(&self, path: &str) -> Option<&AttributeValue> {
        lookup_path(&self.attributes, path)
    }

    /// Builds the flat map that targeting queries are evaluated against.
    ///
    /// `common` attributes sit underneath the context's own attributes, so a value set on the
    /// context wins. The synthetic `key` and `anonymous` entries are always present.
    pub(crate) fn query_map(
        &self,
        common: &HashMap<String, AttributeValue>,
    ) -> HashMap<String, AttributeValue> {
        let mut map = HashMap::with_capacity(common.len() + self.attributes.len() + 2);
        map.extend(common.iter().map(|(k, v)| (k.clone(), v.clone())));
        map.extend(self.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        map.insert(
            KEY_ATTRIBUTE.to_string(),
            AttributeValue::String(self.targeting_key.clone()),
        );
        map.insert(
            ANONYMOUS_ATTRIBUTE.to_string(),
            AttributeValue::Bool(self.is_anonymous()),
        );
        map
    }
}

/// Contains methods for building an [EvaluationContext] with a specified targeting key.
///
/// If you do not change any values, the context has the targeting key passed to
/// [EvaluationContextBuilder::new], is not anonymous, and has no custom attributes.
pub struct EvaluationContextBuilder {
    targeting_key: String,
    attributes: HashMap<String, AttributeValue>,
}

impl EvaluationContextBuilder {
    /// Create a new context builder with the provided targeting key.
    pub fn new(targeting_key: impl Into<String>) -> Self {
        Self {
            targeting_key: targeting_key.into(),
            attributes: HashMap::new(),
        }
    }

    /// Sets the targeting key.
    pub fn key(&mut self, key: impl Into<String>) -> &mut Self {
        self.targeting_key = key.into();
        self
    }

    /// Marks the context as anonymous. This is stored as the `anonymous` custom attribute.
    pub fn anonymous(&mut self, anonymous: bool) -> &mut Self {
        self.set_value(ANONYMOUS_ATTRIBUTE, AttributeValue::Bool(anonymous))
    }

    pub fn set_bool(&mut self, attribute_name: &str, value: bool) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::Bool(value))
    }

    pub fn set_float(&mut self, attribute_name: &str, value: f64) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::Number(value))
    }

    pub fn set_string(&mut self, attribute_name: &str, value: impl Into<String>) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::String(value.into()))
    }

    /// Sets the value of any custom attribute.
    ///
    /// An empty attribute name is ignored. Setting [AttributeValue::Null] removes the attribute.
    pub fn set_value(&mut self, attribute_name: &str, value: AttributeValue) -> &mut Self {
        match (attribute_name, value) {
            ("", _) => warn!("Provided attribute name is empty. Ignoring."),
            (_, AttributeValue::Null) => {
                self.attributes.remove(attribute_name);
            }
            (_, value) => {
                self.attributes.insert(attribute_name.to_string(), value);
            }
        }
        self
    }

    pub fn build(&self) -> EvaluationContext {
        EvaluationContext {
            targeting_key: self.targeting_key.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

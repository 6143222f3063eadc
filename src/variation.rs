use std::collections::HashMap;

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

use crate::attribute_value::AttributeValue;
use crate::context::EvaluationContext;
use crate::eval::{ErrorCode, Reason, ResolutionDetails, VARIATION_SDK_DEFAULT};
use crate::flag::Flag;
use crate::flag_value::FlagValue;

/// VariationResult is the caller-facing outcome of a typed evaluation.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariationResult<T> {
    pub track_events: bool,
    /// Name of the served variation, or [VARIATION_SDK_DEFAULT] when the caller's default was
    /// served.
    pub variation_type: String,
    /// True if an error prevented the flag from serving one of its variations.
    pub failed: bool,
    pub version: String,
    pub reason: Reason,
    pub error_code: Option<ErrorCode>,
    pub error_details: Option<String>,
    pub value: T,
    pub cacheable: bool,
    pub metadata: Option<Map<String, Value>>,
}

impl<T> VariationResult<T> {
    pub(crate) fn from_resolution(
        value: T,
        details: ResolutionDetails,
        track_events: bool,
        version: String,
    ) -> Self {
        VariationResult {
            track_events,
            variation_type: details.variant,
            failed: details.error_code.is_some(),
            version,
            reason: details.reason,
            error_code: details.error_code,
            error_details: details.error_message,
            value,
            cacheable: details.cacheable,
            metadata: details.metadata,
        }
    }

    fn type_mismatch(flag: &Flag, flag_key: &str, default: T, details: ResolutionDetails) -> Self {
        VariationResult {
            track_events: flag.is_track_events(),
            variation_type: VARIATION_SDK_DEFAULT.to_string(),
            failed: true,
            version: flag.version().to_string(),
            reason: Reason::Error,
            error_code: Some(ErrorCode::TypeMismatch),
            error_details: Some(format!(
                "variation {} of flag {} does not have the requested type",
                details.variant, flag_key
            )),
            value: default,
            cacheable: false,
            metadata: details.metadata,
        }
    }
}

fn typed_variation<T: Clone>(
    flag: &Flag,
    flag_key: &str,
    context: &EvaluationContext,
    common_attributes: &HashMap<String, AttributeValue>,
    default: T,
    into_flag_value: impl FnOnce(T) -> FlagValue,
    from_flag_value: impl FnOnce(&FlagValue) -> Option<T>,
) -> VariationResult<T> {
    let sdk_default = into_flag_value(default.clone());
    let (value, details) =
        flag.resolve(flag_key, context, common_attributes, &sdk_default, Utc::now());

    if details.variant == VARIATION_SDK_DEFAULT {
        return VariationResult::from_resolution(
            default,
            details,
            flag.is_track_events(),
            flag.version().to_string(),
        );
    }

    match from_flag_value(&value) {
        Some(converted) => VariationResult::from_resolution(
            converted,
            details,
            flag.is_track_events(),
            flag.version().to_string(),
        ),
        None => {
            warn!("type mismatch for flag '{}': {:?}", flag_key, value);
            VariationResult::type_mismatch(flag, flag_key, default, details)
        }
    }
}

/// Evaluates a boolean flag.
pub fn bool_variation(
    flag: &Flag,
    flag_key: &str,
    context: &EvaluationContext,
    common_attributes: &HashMap<String, AttributeValue>,
    default: bool,
) -> VariationResult<bool> {
    typed_variation(
        flag,
        flag_key,
        context,
        common_attributes,
        default,
        FlagValue::from,
        FlagValue::as_bool,
    )
}

/// Evaluates a string flag.
pub fn string_variation(
    flag: &Flag,
    flag_key: &str,
    context: &EvaluationContext,
    common_attributes: &HashMap<String, AttributeValue>,
    default: String,
) -> VariationResult<String> {
    typed_variation(
        flag,
        flag_key,
        context,
        common_attributes,
        default,
        FlagValue::from,
        FlagValue::as_string,
    )
}

/// Evaluates a numeric flag as a float.
pub fn float_variation(
    flag: &Flag,
    flag_key: &str,
    context: &EvaluationContext,
    common_attributes: &HashMap<String, AttributeValue>,
    default: f64,
) -> VariationResult<f64> {
    typed_variation(
        flag,
        flag_key,
        context,
        common_attributes,
        default,
        FlagValue::from,
        FlagValue::as_float,
    )
}

/// Evaluates a numeric flag as an integer. Fractional variations are truncated toward zero.
pub fn int_variation(
    flag: &Flag,
    flag_key: &str,
    context: &EvaluationContext,
    common_attributes: &HashMap<String, AttributeValue>,
    default: i64,
) -> VariationResult<i64> {
    typed_variation(
        flag,
        flag_key,
        context,
        common_attributes,
        default,
        FlagValue::from,
        FlagValue::as_int,
    )
}

/// Evaluates a flag whose variations are JSON objects or arrays.
pub fn json_variation(
    flag: &Flag,
    flag_key: &str,
    context: &EvaluationContext,
    common_attributes: &HashMap<String, AttributeValue>,
    default: Value,
) -> VariationResult<Value> {
    typed_variation(
        flag,
        flag_key,
        context,
        common_attributes,
        default,
        FlagValue::Json,
        |value| match value {
            FlagValue::Json(json @ (Value::Object(_) | Value::Array(_))) => Some(json.clone()),
            _ => None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvaluationContextBuilder;
    use crate::test_common::TestStore;
    use serde_json::json;
    use spectral::prelude::*;

    fn no_common() -> HashMap<String, AttributeValue> {
        HashMap::new()
    }

    #[test]
    fn bool_variation_serves_the_variation() {
        let store = TestStore::new();
        let result = bool_variation(
            store.flag("staticFlag").unwrap(),
            "staticFlag",
            &EvaluationContext::new(""),
            &no_common(),
            false,
        );
        assert_that!(result.value).is_true();
        assert_that!(result.variation_type).is_equal_to("on".to_string());
        assert_that!(result.failed).is_false();
        assert_that!(result.reason).is_equal_to(Reason::Static);
        assert_that!(result.track_events).is_true();
        assert_that!(result.cacheable).is_true();
    }

    #[test]
    fn wrong_type_is_a_type_mismatch() {
        let store = TestStore::new();
        let result = string_variation(
            store.flag("staticFlag").unwrap(),
            "staticFlag",
            &EvaluationContext::new(""),
            &no_common(),
            "fallback".to_string(),
        );
        assert_that!(result.value).is_equal_to("fallback".to_string());
        assert_that!(result.variation_type).is_equal_to(VARIATION_SDK_DEFAULT.to_string());
        assert_that!(result.failed).is_true();
        assert_that!(result.reason).is_equal_to(Reason::Error);
        assert_that!(result.error_code).contains_value(ErrorCode::TypeMismatch);
        assert_that!(result.error_details).is_some();
    }

    #[test]
    fn numbers_convert_between_int_and_float() {
        let store = TestStore::new();
        let flag = store.flag("numberFlag").unwrap();
        let context = EvaluationContext::new("user-1");

        let int = int_variation(flag, "numberFlag", &context, &no_common(), 0);
        assert_that!(int.value).is_equal_to(1);
        assert_that!(int.version).is_equal_to("3".to_string());
        assert_that!(int.metadata)
            .contains_value(json!({"team": "core"}).as_object().unwrap().clone());

        let float = float_variation(flag, "numberFlag", &context, &no_common(), 0.0);
        assert_that!(float.value).is_equal_to(1.9);
        assert_that!(float.failed).is_false();

        let json = json_variation(flag, "numberFlag", &context, &no_common(), json!({}));
        assert_that!(json.error_code).contains_value(ErrorCode::TypeMismatch);
        assert_that!(json.value).is_equal_to(json!({}));
    }

    #[test]
    fn json_variation_serves_objects() {
        let store = TestStore::new();
        let context = EvaluationContextBuilder::new("user-1").set_float("spend", 150.0).build();
        let result = json_variation(
            store.flag("jsonFlag").unwrap(),
            "jsonFlag",
            &context,
            &no_common(),
            json!(null),
        );
        assert_that!(result.value).is_equal_to(json!({"size": 10}));
        assert_that!(result.reason).is_equal_to(Reason::TargetingMatch);
        let expected = json!({"evaluatedRuleName": "big spender"});
        assert_that!(result.metadata).contains_value(expected.as_object().unwrap().clone());
    }

    #[test]
    fn disabled_flag_serves_the_default_without_failing() {
        let store = TestStore::new();
        let result = bool_variation(
            store.flag("disabledFlag").unwrap(),
            "disabledFlag",
            &EvaluationContext::new("user-1"),
            &no_common(),
            false,
        );
        assert_that!(result.value).is_false();
        assert_that!(result.failed).is_false();
        assert_that!(result.reason).is_equal_to(Reason::Disabled);
        assert_that!(result.track_events).is_false();
    }

    #[test]
    fn evaluation_errors_serve_the_default() {
        let store = TestStore::new();
        let result = bool_variation(
            store.flag("splitFlag").unwrap(),
            "splitFlag",
            &EvaluationContext::new(""),
            &no_common(),
            false,
        );
        assert_that!(result.value).is_false();
        assert_that!(result.failed).is_true();
        assert_that!(result.error_code).contains_value(ErrorCode::TargetingKeyMissing);
        assert_that!(result.version).is_equal_to("1".to_string());
    }

    #[test]
    fn serializes_camel_case() {
        let store = TestStore::new();
        let result = bool_variation(
            store.flag("splitFlag").unwrap(),
            "splitFlag",
            &EvaluationContext::new("user-123"),
            &no_common(),
            false,
        );
        assert_that!(serde_json::to_value(&result).unwrap()).is_equal_to(json!({
            "trackEvents": true,
            "variationType": "A",
            "failed": false,
            "version": "1",
            "reason": "SPLIT",
            "value": true,
            "cacheable": true
        }));
    }
}

//! Single-document evaluation, for hosts that can only exchange strings with the engine (for
//! example a WebAssembly sandbox).

use log::{error, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::context::EvaluationContext;
use crate::eval::{ErrorCode, FlagContext, ResolutionDetails};
use crate::flag::Flag;
use crate::variation::VariationResult;

const TARGETING_KEY: &str = "targetingKey";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationRequest {
    flag: Flag,
    flag_key: String,
    #[serde(default, rename = "evalContext")]
    context: Map<String, Value>,
    #[serde(default)]
    flag_context: FlagContext,
}

/// Evaluates the flag described by a JSON document and returns the result as a JSON document.
///
/// The input has the shape `{"flag": ..., "flagKey": ..., "evalContext": ..., "flagContext": ...}`.
/// The output is a serialized [VariationResult]. This function never panics: a document that
/// cannot be parsed yields `PARSE_ERROR` and a context without a string `targetingKey` yields
/// `TARGETING_KEY_MISSING`.
pub fn evaluate_document(input: &str) -> String {
    to_document(&evaluate_request(input))
}

fn evaluate_request(input: &str) -> VariationResult<Value> {
    let request: EvaluationRequest = match serde_json::from_str(input) {
        Ok(request) => request,
        Err(e) => {
            warn!("unable to parse evaluation document: {}", e);
            return failure(ErrorCode::ParseError, e.to_string());
        }
    };

    if !matches!(request.context.get(TARGETING_KEY), Some(Value::String(_))) {
        return failure(ErrorCode::TargetingKeyMissing, "targetingKey not found in context");
    }
    let context: EvaluationContext = match serde_json::from_value(Value::Object(request.context)) {
        Ok(context) => context,
        Err(e) => return failure(ErrorCode::ParseError, e.to_string()),
    };

    let flag = &request.flag;
    let (value, details) = flag.value(&request.flag_key, &context, &request.flag_context);
    VariationResult::from_resolution(
        value.as_json().unwrap_or_default(),
        details,
        flag.is_track_events(),
        flag.version().to_string(),
    )
}

fn failure(code: ErrorCode, message: impl Into<String>) -> VariationResult<Value> {
    VariationResult::from_resolution(
        Value::Null,
        ResolutionDetails::error(code, message),
        false,
        String::new(),
    )
}

fn to_document(result: &VariationResult<Value>) -> String {
    serde_json::to_string(result).unwrap_or_else(|e| {
        error!("unable to serialize evaluation result: {}", e);
        format!(
            r#"{{"failed":true,"reason":"ERROR","errorCode":"GENERAL","errorDetails":{}}}"#,
            Value::from(e.to_string())
        )
    })
}

//! Backend response envelope
//!
//! Every backend response is a one-element JSON array wrapping
//! `{statusCode, message, data, metadata, error}`. [`unwrap_envelope`] is
//! the only place that shape is interpreted.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    status_code: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    #[allow(dead_code)]
    metadata: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Unwrap a backend response body into `T`
///
/// # Errors
///
/// - `ApiError::Malformed` if the body is not an enveloped JSON array, the
///   status code is missing, or `data` is missing or not a `T`
/// - `ApiError::Application` if the status code is outside `200..=299`;
///   the backend message (or error detail) is kept when present
///
/// # Examples
///
/// ```
/// use estimate_chat::api::unwrap_envelope;
///
/// let body = br#"[{"statusCode":200,"message":"ok","data":[1,2,3],"metadata":null,"error":null}]"#;
/// let data: Vec<u32> = unwrap_envelope(body).unwrap();
/// assert_eq!(data, vec![1, 2, 3]);
/// ```
pub fn unwrap_envelope<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::Malformed(format!("response is not JSON: {}", e)))?;

    let first = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        Value::Array(_) => return Err(ApiError::Malformed("empty envelope array".to_string())),
        _ => return Err(ApiError::Malformed("envelope is not an array".to_string())),
    };

    let envelope: Envelope = serde_json::from_value(first)
        .map_err(|e| ApiError::Malformed(format!("envelope is not an object: {}", e)))?;

    let status_code = envelope
        .status_code
        .as_ref()
        .and_then(status_as_u16)
        .ok_or_else(|| ApiError::Malformed("envelope has no statusCode".to_string()))?;

    if !(200..=299).contains(&status_code) {
        let message =
            text_of(envelope.message.as_ref()).or_else(|| error_text(envelope.error.as_ref()));
        tracing::debug!(status_code, ?message, "Backend reported failure");
        return Err(ApiError::application(status_code, message));
    }

    match envelope.data {
        None | Some(Value::Null) => Err(ApiError::Malformed("envelope has no data".to_string())),
        Some(data) => serde_json::from_value(data)
            .map_err(|e| ApiError::Malformed(format!("unexpected data shape: {}", e))),
    }
}

fn status_as_u16(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn error_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(_) => text_of(value),
        Value::Object(map) => text_of(map.get("message")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GENERIC_FAILURE_MESSAGE;
    use serde_json::json;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_success_unwraps_data() {
        let raw = body(json!([{
            "statusCode": 200,
            "message": "OK",
            "data": {"uuid": "abc"},
            "metadata": {"total": 1},
            "error": null
        }]));
        let data: Value = unwrap_envelope(&raw).unwrap();
        assert_eq!(data["uuid"], "abc");
    }

    #[test]
    fn test_string_status_code_accepted() {
        let raw = body(json!([{"statusCode": "201", "data": 5}]));
        let data: u32 = unwrap_envelope(&raw).unwrap();
        assert_eq!(data, 5);
    }

    #[test]
    fn test_failure_status_keeps_backend_message() {
        let raw = body(json!([{"statusCode": 404, "message": "Session not found", "data": null}]));
        let err = unwrap_envelope::<Value>(&raw).unwrap_err();
        assert_eq!(
            err,
            ApiError::Application {
                status_code: 404,
                message: "Session not found".to_string()
            }
        );
    }

    #[test]
    fn test_failure_status_reads_error_object() {
        let raw = body(json!([{"statusCode": 422, "error": {"message": "title too long"}}]));
        let err = unwrap_envelope::<Value>(&raw).unwrap_err();
        assert_eq!(err.user_message(), "title too long");
    }

    #[test]
    fn test_failure_without_message_uses_fallback() {
        let raw = body(json!([{"statusCode": 500}]));
        let err = unwrap_envelope::<Value>(&raw).unwrap_err();
        assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn test_missing_data_is_malformed() {
        let raw = body(json!([{"statusCode": 200, "message": "OK"}]));
        assert!(matches!(
            unwrap_envelope::<Value>(&raw),
            Err(ApiError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_data_shape_is_malformed() {
        let raw = body(json!([{"statusCode": 200, "data": "not a list"}]));
        assert!(matches!(
            unwrap_envelope::<Vec<u32>>(&raw),
            Err(ApiError::Malformed(_))
        ));
    }

    #[test]
    fn test_bare_object_and_empty_array_are_malformed() {
        assert!(matches!(
            unwrap_envelope::<Value>(&body(json!({"statusCode": 200, "data": 1}))),
            Err(ApiError::Malformed(_))
        ));
        assert!(matches!(
            unwrap_envelope::<Value>(&body(json!([]))),
            Err(ApiError::Malformed(_))
        ));
        assert!(matches!(
            unwrap_envelope::<Value>(b"<html>502</html>"),
            Err(ApiError::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_status_code_is_malformed() {
        let raw = body(json!([{"data": 1}]));
        assert!(matches!(
            unwrap_envelope::<Value>(&raw),
            Err(ApiError::Malformed(_))
        ));
    }
}

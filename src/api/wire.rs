//! Backend error bodies.

use reqwest::StatusCode;
use serde_json::Value;

use crate::error::IbtikarError;

/// Map a non-2xx response into an error.
///
/// The backend reports failures as `{"detail": "..."}` or, for upstream rate
/// limits, `{"detail": {"error": "rate_limited", "resource": ..., "reset_time": ...}}`.
/// Anything else is appended verbatim.
pub fn classify_error(status: u16, body: &str) -> IbtikarError {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or_default();
    let mut message = format!("HTTP {status} {reason}").trim_end().to_string();

    let detail = match serde_json::from_str::<Value>(body) {
        Ok(json) => match json.get("detail") {
            Some(Value::String(detail)) if !detail.is_empty() => Some(detail.clone()),
            Some(detail) if is_rate_limited(detail) => {
                return IbtikarError::RateLimited {
                    resource: detail.get("resource").and_then(scalar_to_string),
                    reset: detail
                        .get("reset_time")
                        .and_then(scalar_to_string)
                        .or_else(|| detail.get("reset_epoch").and_then(scalar_to_string)),
                };
            }
            Some(detail) if is_present(detail) => Some(detail.to_string()),
            _ => Some(body.to_string()),
        },
        Err(_) => Some(body.to_string()),
    };
    if let Some(detail) = detail.filter(|d| !d.trim().is_empty()) {
        message.push_str(" - ");
        message.push_str(detail.trim());
    }
    IbtikarError::api(status, message)
}

fn is_rate_limited(detail: &Value) -> bool {
    detail.get("error").and_then(Value::as_str) == Some("rate_limited")
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decode a 2xx body. A body that is not JSON at all counts as empty.
pub fn decode_body<T>(body: &str) -> Result<T, IbtikarError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match serde_json::from_str::<Value>(body) {
        Ok(value) => Ok(serde_json::from_value(value)?),
        Err(_) => Ok(T::default()),
    }
}

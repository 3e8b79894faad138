use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    error::{AulaError, ChannelError, ErrorCategory},
    types::NotificationEvent,
};

/// Decode one list payload that may be paginated (`{"results": [...]}`) or a
/// bare array.
pub fn normalize_list_response<T: DeserializeOwned>(payload: Value) -> Result<Vec<T>, AulaError> {
    let items = match payload {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => match map.remove("results") {
            Some(results @ Value::Array(_)) => results,
            _ => {
                return Err(AulaError::new(
                    ErrorCategory::Serialization,
                    "unexpected_list_shape",
                    "list response is neither an array nor a paginated object",
                ));
            }
        },
        _ => {
            return Err(AulaError::new(
                ErrorCategory::Serialization,
                "unexpected_list_shape",
                "list response is neither an array nor a paginated object",
            ));
        }
    };

    serde_json::from_value(items).map_err(|err| {
        AulaError::new(
            ErrorCategory::Serialization,
            "list_item_decode_error",
            err.to_string(),
        )
    })
}

/// Decode a `{"message": ...}` notification frame.
pub fn decode_notification_frame(raw: &str) -> Result<NotificationEvent, ChannelError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| ChannelError::Decode(err.to_string()))?;
    match value {
        Value::Object(mut map) => map
            .remove("message")
            .map(|message| NotificationEvent { message })
            .ok_or_else(|| ChannelError::Decode("frame has no 'message' field".to_owned())),
        _ => Err(ChannelError::Decode("frame is not a JSON object".to_owned())),
    }
}

/// Best human-readable message of an error body (`detail`, `error`, `message`).
pub fn api_error_message(body: &Value) -> Option<String> {
    ["detail", "error", "message"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
}

/// Flatten a validation error body into one message per problem.
///
/// Accepts `{"errors": [...]}`, a bare array of strings, or a field map such
/// as `{"title": ["This field is required."]}`.
pub fn collect_validation_errors(body: &Value) -> Vec<String> {
    match body {
        Value::Array(items) => items.iter().filter_map(message_of).collect(),
        Value::Object(map) => {
            if let Some(errors) = map.get("errors") {
                return collect_validation_errors(errors);
            }
            let mut out = Vec::new();
            for (field, value) in map {
                if matches!(field.as_str(), "valid" | "detail") {
                    continue;
                }
                match value {
                    Value::Array(items) => out.extend(
                        items
                            .iter()
                            .filter_map(message_of)
                            .map(|msg| format!("{field}: {msg}")),
                    ),
                    Value::String(msg) => out.push(format!("{field}: {msg}")),
                    Value::Object(_) => out.extend(
                        collect_validation_errors(value)
                            .into_iter()
                            .map(|msg| format!("{field}.{msg}")),
                    ),
                    _ => {}
                }
            }
            if out.is_empty()
                && let Some(detail) = api_error_message(body)
            {
                out.push(detail);
            }
            out
        }
        Value::String(msg) => vec![msg.clone()],
        _ => Vec::new(),
    }
}

fn message_of(value: &Value) -> Option<String> {
    match value {
        Value::String(msg) => Some(msg.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

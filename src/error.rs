use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Fixed fallback shown when a failure carries no usable information.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred";

/// Transport-level failure raised by the daemon client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to decode daemon response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Non-2xx response, with the daemon's error body parsed when possible.
    #[error("daemon returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Stable error vocabulary shared with the UI layer.
///
/// Codes the daemon emits that fall outside the known set are preserved
/// verbatim in `Other` rather than collapsed into a generic bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    ServerNotRunning,
    RepositoryNotConnected,
    NotFound,
    PolicyNotFound,
    HttpRequestFailed,
    ResponseParseError,
    OperationFailed,
    Other(String),
}

impl ErrorCode {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SERVER_NOT_RUNNING" => ErrorCode::ServerNotRunning,
            "REPOSITORY_NOT_CONNECTED" => ErrorCode::RepositoryNotConnected,
            "NOT_FOUND" => ErrorCode::NotFound,
            "POLICY_NOT_FOUND" => ErrorCode::PolicyNotFound,
            "HTTP_REQUEST_FAILED" => ErrorCode::HttpRequestFailed,
            "RESPONSE_PARSE_ERROR" => ErrorCode::ResponseParseError,
            "OPERATION_FAILED" => ErrorCode::OperationFailed,
            other => ErrorCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::ServerNotRunning => "SERVER_NOT_RUNNING",
            ErrorCode::RepositoryNotConnected => "REPOSITORY_NOT_CONNECTED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::PolicyNotFound => "POLICY_NOT_FOUND",
            ErrorCode::HttpRequestFailed => "HTTP_REQUEST_FAILED",
            ErrorCode::ResponseParseError => "RESPONSE_PARSE_ERROR",
            ErrorCode::OperationFailed => "OPERATION_FAILED",
            ErrorCode::Other(raw) => raw,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(raw: String) -> Self {
        ErrorCode::parse(&raw)
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single typed error value every transport failure is folded into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(
        default,
        rename = "httpStatus",
        skip_serializing_if = "Option::is_none"
    )]
    pub http_status: Option<u16>,
    #[serde(
        default,
        rename = "upstreamCode",
        skip_serializing_if = "Option::is_none"
    )]
    pub upstream_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl NormalizedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            http_status: None,
            upstream_code: None,
            details: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            code: Some(code),
            ..Self::new(message)
        }
    }

    fn unknown() -> Self {
        Self::new(UNKNOWN_ERROR_MESSAGE)
    }

    /// Fold an arbitrary JSON payload into the typed vocabulary.
    ///
    /// Shapes are tried in order: an already-normalized object is returned
    /// unchanged, a bare `message` object is wrapped without a code, a
    /// discriminated object (`type`/`code` plus nested payload) is decoded
    /// field by field, and everything else collapses to the fixed fallback.
    pub fn from_value(raw: &Value) -> Self {
        let Some(object) = raw.as_object() else {
            return Self::unknown();
        };

        let discriminated = object.contains_key("type") || object.contains_key("data");
        if !discriminated {
            if let Some(message) = object.get("message").and_then(Value::as_str) {
                if let Ok(normalized) = serde_json::from_value::<NormalizedError>(raw.clone()) {
                    return normalized;
                }
                return Self::new(message);
            }
        }

        let discriminator = object
            .get("type")
            .or_else(|| object.get("code"))
            .and_then(Value::as_str);
        if let Some(kind) = discriminator {
            let payload = object.get("data").or_else(|| object.get("details"));
            let nested = payload.and_then(Value::as_object);
            let message = nested
                .and_then(|data| data.get("message"))
                .and_then(Value::as_str)
                .or_else(|| object.get("error").and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| humanize_code(kind));
            let http_status = nested
                .and_then(|data| data.get("status_code").or_else(|| data.get("httpStatus")))
                .and_then(Value::as_u64)
                .map(|status| status as u16);
            let upstream_code = nested
                .and_then(|data| data.get("code"))
                .and_then(Value::as_str)
                .map(str::to_string);
            return Self {
                message,
                code: Some(ErrorCode::parse(kind)),
                http_status,
                upstream_code,
                details: payload.cloned(),
            };
        }

        Self::unknown()
    }

    /// Human-readable string for the UI. Never empty.
    pub fn user_message(&self) -> String {
        if let Some(code) = &self.code {
            if let Some(localized) = localized_message(code) {
                return localized.to_string();
            }
        }
        let trimmed = self.message.trim();
        if trimmed.is_empty() {
            UNKNOWN_ERROR_MESSAGE.to_string()
        } else {
            self.message.clone()
        }
    }

    pub fn is_auth_error(&self) -> bool {
        if matches!(self.http_status, Some(401) | Some(403)) {
            return true;
        }
        matches!(
            self.upstream_code.as_deref(),
            Some("ACCESS_DENIED") | Some("INVALID_PASSWORD")
        )
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.code,
            Some(ErrorCode::ServerNotRunning) | Some(ErrorCode::HttpRequestFailed)
        )
    }

    /// Missing-resource family: an expected state when an entity has never
    /// been saved, not a genuine failure.
    pub fn is_not_found(&self) -> bool {
        if matches!(
            self.code,
            Some(ErrorCode::NotFound) | Some(ErrorCode::PolicyNotFound)
        ) {
            return true;
        }
        self.http_status == Some(404)
    }
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl From<ClientError> for NormalizedError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Http(source) => {
                let code = if source.is_connect() || source.is_timeout() {
                    ErrorCode::ServerNotRunning
                } else {
                    ErrorCode::HttpRequestFailed
                };
                Self {
                    http_status: source.status().map(|status| status.as_u16()),
                    ..Self::with_code(source.to_string(), code)
                }
            }
            ClientError::WebSocket(source) => {
                Self::with_code(source.to_string(), ErrorCode::HttpRequestFailed)
            }
            ClientError::Decode(source) => {
                Self::with_code(source.to_string(), ErrorCode::ResponseParseError)
            }
            ClientError::Api {
                status,
                code,
                message,
            } => {
                let parsed = code
                    .as_deref()
                    .map(ErrorCode::parse)
                    .unwrap_or(ErrorCode::OperationFailed);
                Self {
                    message,
                    code: Some(parsed),
                    http_status: Some(status),
                    upstream_code: code,
                    details: None,
                }
            }
            ClientError::Config(message) => {
                Self::with_code(message, ErrorCode::OperationFailed)
            }
        }
    }
}

fn localized_message(code: &ErrorCode) -> Option<&'static str> {
    match code {
        ErrorCode::ServerNotRunning => Some("The backup daemon is not running."),
        ErrorCode::RepositoryNotConnected => Some("No repository is connected."),
        ErrorCode::NotFound => Some("The requested item was not found."),
        ErrorCode::PolicyNotFound => Some("No policy is defined for this target."),
        ErrorCode::HttpRequestFailed => Some("Could not reach the backup daemon."),
        ErrorCode::ResponseParseError => Some("The daemon sent an unreadable response."),
        ErrorCode::OperationFailed | ErrorCode::Other(_) => None,
    }
}

/// `SERVER_NOT_RUNNING` -> "Server Not Running"
fn humanize_code(code: &str) -> String {
    code.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let lower = word.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitives_normalize_to_unknown() {
        for raw in [Value::Null, json!(123), json!(true), json!({})] {
            let normalized = NormalizedError::from_value(&raw);
            assert_eq!(normalized.message, UNKNOWN_ERROR_MESSAGE);
            assert!(normalized.code.is_none());
        }
    }

    #[test]
    fn bare_message_is_wrapped_without_code() {
        let normalized = NormalizedError::from_value(&json!({ "message": "boom" }));
        assert_eq!(normalized.message, "boom");
        assert!(normalized.code.is_none());
    }

    #[test]
    fn discriminated_shape_is_decoded() {
        let raw = json!({
            "type": "SERVER_NOT_RUNNING",
            "data": { "message": "Server is not running", "status_code": 500 }
        });
        let normalized = NormalizedError::from_value(&raw);
        assert_eq!(normalized.code, Some(ErrorCode::ServerNotRunning));
        assert_eq!(normalized.message, "Server is not running");
        assert_eq!(normalized.http_status, Some(500));
        assert!(normalized.details.is_some());
    }

    #[test]
    fn discriminator_without_message_is_humanized() {
        let raw = json!({ "type": "REPOSITORY_NOT_CONNECTED", "data": {} });
        let normalized = NormalizedError::from_value(&raw);
        assert_eq!(normalized.message, "Repository Not Connected");
    }

    #[test]
    fn normalize_is_idempotent() {
        let raw = json!({
            "type": "SERVER_NOT_RUNNING",
            "data": { "message": "Server is not running", "status_code": 500 }
        });
        let once = NormalizedError::from_value(&raw);
        let round_trip = serde_json::to_value(&once).expect("serialize");
        let twice = NormalizedError::from_value(&round_trip);
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_codes_are_preserved() {
        let raw = json!({ "type": "INVALID_PASSWORD", "data": {} });
        let normalized = NormalizedError::from_value(&raw);
        assert_eq!(
            normalized.code,
            Some(ErrorCode::Other("INVALID_PASSWORD".to_string()))
        );
        assert_eq!(normalized.message, "Invalid Password");
    }

    #[test]
    fn api_error_maps_status_and_upstream_code() {
        let err = ClientError::Api {
            status: 404,
            code: Some("POLICY_NOT_FOUND".to_string()),
            message: "policy not found".to_string(),
        };
        let normalized = NormalizedError::from(err);
        assert_eq!(normalized.code, Some(ErrorCode::PolicyNotFound));
        assert_eq!(normalized.http_status, Some(404));
        assert!(normalized.is_not_found());
        assert!(!normalized.is_auth_error());
    }

    #[test]
    fn auth_classification_uses_status_and_upstream_code() {
        let by_status = NormalizedError {
            http_status: Some(403),
            ..NormalizedError::new("denied")
        };
        assert!(by_status.is_auth_error());

        let by_code = NormalizedError {
            upstream_code: Some("ACCESS_DENIED".to_string()),
            ..NormalizedError::new("denied")
        };
        assert!(by_code.is_auth_error());
    }

    #[test]
    fn user_message_never_empty() {
        let blank = NormalizedError::new("   ");
        assert_eq!(blank.user_message(), UNKNOWN_ERROR_MESSAGE);

        let coded = NormalizedError::with_code("raw text", ErrorCode::ServerNotRunning);
        assert_eq!(coded.user_message(), "The backup daemon is not running.");

        let passthrough =
            NormalizedError::with_code("boom", ErrorCode::Other("X".to_string()));
        assert_eq!(passthrough.user_message(), "boom");
    }
}

//! Error taxonomy: coded error objects and classification of arbitrary failures.
//!
//! Every failure that leaves the execution engine is an [`ActionError`]. Raw
//! `anyhow` errors and panic payloads are converted by [`classify`] and
//! [`classify_panic`]; nothing above the engine sees an unclassified failure.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::schema::Issue;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable classification of an action failure.
///
/// Serialized as its `SCREAMING_SNAKE_CASE` wire name. Names outside the
/// built-in set deserialize to [`ErrorCode::Custom`] and keep their spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Input failed schema validation. Never retried.
    InputParseError,
    /// Handler output failed schema validation. Never retried.
    OutputParseError,
    /// Generic failure raised by a chain link or handler.
    Error,
    NotAuthorized,
    Timeout,
    InternalServerError,
    NotFound,
    Forbidden,
    Conflict,
    PreconditionFailed,
    PayloadTooLarge,
    MethodNotSupported,
    UnprocessableContent,
    TooManyRequests,
    /// Application-defined code. Maps to 500 and is retryable.
    Custom(String),
}

impl ErrorCode {
    /// Returns the wire name of this code (e.g. `"INPUT_PARSE_ERROR"`).
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::InputParseError => "INPUT_PARSE_ERROR",
            Self::OutputParseError => "OUTPUT_PARSE_ERROR",
            Self::Error => "ERROR",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::Timeout => "TIMEOUT",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::Conflict => "CONFLICT",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::MethodNotSupported => "METHOD_NOT_SUPPORTED",
            Self::UnprocessableContent => "UNPROCESSABLE_CONTENT",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::Custom(name) => name,
        }
    }

    /// Parses a wire name. Never fails: unknown names become `Custom`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "INPUT_PARSE_ERROR" => Self::InputParseError,
            "OUTPUT_PARSE_ERROR" => Self::OutputParseError,
            "ERROR" => Self::Error,
            "NOT_AUTHORIZED" => Self::NotAuthorized,
            "TIMEOUT" => Self::Timeout,
            "INTERNAL_SERVER_ERROR" => Self::InternalServerError,
            "NOT_FOUND" => Self::NotFound,
            "FORBIDDEN" => Self::Forbidden,
            "CONFLICT" => Self::Conflict,
            "PRECONDITION_FAILED" => Self::PreconditionFailed,
            "PAYLOAD_TOO_LARGE" => Self::PayloadTooLarge,
            "METHOD_NOT_SUPPORTED" => Self::MethodNotSupported,
            "UNPROCESSABLE_CONTENT" => Self::UnprocessableContent,
            "TOO_MANY_REQUESTS" => Self::TooManyRequests,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Maps the code to the HTTP status the request adapter responds with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InputParseError => 400,
            Self::NotAuthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotSupported => 405,
            Self::Timeout => 408,
            Self::Conflict => 409,
            Self::PreconditionFailed => 412,
            Self::PayloadTooLarge => 413,
            Self::UnprocessableContent => 422,
            Self::TooManyRequests => 429,
            Self::OutputParseError
            | Self::Error
            | Self::InternalServerError
            | Self::Custom(_) => 500,
        }
    }

    /// Whether a failure with this code may be retried by a retry policy.
    ///
    /// Parse errors are deterministic: retrying them can only loop.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InputParseError | Self::OutputParseError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// Status for a code given by its wire name. Unrecognized names map to 500.
#[must_use]
pub fn status_for_code_name(name: &str) -> u16 {
    ErrorCode::from_name(name).http_status()
}

// ---------------------------------------------------------------------------
// ActionError
// ---------------------------------------------------------------------------

/// Structured failure returned in the error slot of every action result.
///
/// `field_errors`, `formatted_errors`, and `form_errors` are only populated
/// for parse errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct ActionError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_errors: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_errors: Option<Vec<String>>,
}

/// Result type passed between every layer: engine, adapter, and hook.
pub type ActionResult<T> = Result<T, ActionError>;

impl ActionError {
    /// Error with a code and message and no payload.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            field_errors: None,
            formatted_errors: None,
            form_errors: None,
        }
    }

    /// Attaches arbitrary payload data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotAuthorized, message)
    }

    /// `TIMEOUT` naming the limit that elapsed.
    #[must_use]
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("action timed out after {timeout_ms}ms"),
        )
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Builds an `INPUT_PARSE_ERROR` from validator issues.
    #[must_use]
    pub fn input_parse(issues: &[Issue]) -> Self {
        Self::from_issues(ErrorCode::InputParseError, issues)
    }

    /// Builds an `OUTPUT_PARSE_ERROR` from validator issues.
    #[must_use]
    pub fn output_parse(issues: &[Issue]) -> Self {
        Self::from_issues(ErrorCode::OutputParseError, issues)
    }

    fn from_issues(code: ErrorCode, issues: &[Issue]) -> Self {
        let mut field_errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut form_errors = Vec::new();
        for issue in issues {
            match issue.path.first() {
                Some(field) => field_errors
                    .entry(field.clone())
                    .or_default()
                    .push(issue.message.clone()),
                None => form_errors.push(issue.message.clone()),
            }
        }

        let message = issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            code,
            message,
            data: Some(serde_json::to_value(issues).unwrap_or(Value::Null)),
            field_errors: Some(field_errors),
            formatted_errors: Some(format_issue_tree(issues)),
            form_errors: Some(form_errors),
        }
    }

    /// Whether a retry policy may retry this failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

/// Nests issues into a tree keyed by path segment; every node carries its own
/// `_errors` list.
fn format_issue_tree(issues: &[Issue]) -> Value {
    let mut root = Map::new();
    root.insert("_errors".to_string(), Value::Array(Vec::new()));
    for issue in issues {
        insert_issue(&mut root, &issue.path, &issue.message);
    }
    Value::Object(root)
}

fn insert_issue(node: &mut Map<String, Value>, path: &[String], message: &str) {
    match path.split_first() {
        None => {
            if let Some(Value::Array(errors)) = node.get_mut("_errors") {
                errors.push(Value::String(message.to_string()));
            }
        }
        Some((head, rest)) => {
            let child = node
                .entry(head.clone())
                .or_insert_with(|| serde_json::json!({ "_errors": [] }));
            if let Value::Object(child) = child {
                insert_issue(child, rest, message);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classifies an arbitrary failure raised by a chain link or handler.
///
/// An `ActionError` carried inside the `anyhow::Error` is returned unchanged.
/// Anything else becomes a generic `ERROR` that keeps the display message and
/// attaches the cause chain as `data`.
#[must_use]
pub fn classify(err: anyhow::Error) -> ActionError {
    match err.downcast::<ActionError>() {
        Ok(action_error) => action_error,
        Err(other) => {
            let chain: Vec<Value> = other
                .chain()
                .map(|cause| Value::String(cause.to_string()))
                .collect();
            ActionError::new(ErrorCode::Error, other.to_string()).with_data(Value::Array(chain))
        }
    }
}

/// Classifies a panic payload caught at the engine boundary.
#[must_use]
pub fn classify_panic(payload: &(dyn Any + Send)) -> ActionError {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "action panicked".to_string()
    };
    ActionError::new(ErrorCode::Error, message).with_data(Value::String("panic".to_string()))
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        ActionError::new(ErrorCode::Error, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error code attached to every failed submission.
pub const SUBMIT_ERROR: &str = "SUBMIT_ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Fatal,
}

/// Fields a normalizer uses to describe a raw failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub name: String,
    pub code: String,
    pub message: String,
    pub info: Value,
    pub severity: Severity,
    pub handled: bool,
}

impl ErrorContext {
    pub fn new(name: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            message: message.into(),
            info: Value::Null,
            severity: Severity::Medium,
            handled: false,
        }
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = info;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn handled(mut self, handled: bool) -> Self {
        self.handled = handled;
        self
    }
}

/// Normalized failure. Immutable once built.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{name} [{code}]: {message}")]
pub struct ErrorEnvelope {
    pub name: String,
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub handled: bool,
    pub info: Value,
    /// Text of the raw failure this envelope was built from.
    pub cause: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEnvelope {
    pub fn from_context(context: ErrorContext, cause: Option<String>) -> Self {
        Self {
            name: context.name,
            code: context.code,
            message: context.message,
            severity: context.severity,
            handled: context.handled,
            info: context.info,
            cause,
            timestamp: Utc::now(),
        }
    }

    pub fn is_submit_error(&self) -> bool {
        self.code == SUBMIT_ERROR
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_takes_every_field_from_context() {
        let context = ErrorContext::new("NetworkManagerError", SUBMIT_ERROR, "Unable to submit")
            .with_info(json!({ "submitOptions": { "disabled": false } }))
            .with_severity(Severity::High)
            .handled(true);

        let envelope = ErrorEnvelope::from_context(context, Some("Unable to fetch".into()));

        assert_eq!(envelope.name, "NetworkManagerError");
        assert!(envelope.is_submit_error());
        assert_eq!(envelope.severity, Severity::High);
        assert!(envelope.handled);
        assert_eq!(envelope.info["submitOptions"]["disabled"], json!(false));
        assert_eq!(envelope.cause.as_deref(), Some("Unable to fetch"));
        assert_eq!(
            envelope.to_string(),
            "NetworkManagerError [SUBMIT_ERROR]: Unable to submit"
        );
    }

    #[test]
    fn severity_serializes_in_screaming_case() {
        let raw = serde_json::to_string(&Severity::High).expect("serialize");
        assert_eq!(raw, "\"HIGH\"");
    }
}

//! Live Reload Message Protocol
//!
//! Defines the JSON message format for WebSocket communication between the
//! dev server and browser clients.
//!
//! # Message Types
//!
//! - `building`: a rebuild started (files in the batch)
//! - `success`: the rebuild finished (duration in ms)
//! - `reload`: apply the change (stylesheet-only when scope is `ui`)
//! - `error`: display the error overlay, no reload

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::compile::{CompileError, CompilePhase, Severity};
use crate::impact::ChangeScope;
use crate::util::unix_now;

/// Error details for the browser overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<CompilePhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// Reload message sent over WebSocket. All kinds carry a unix-second
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReloadMessage {
    /// A rebuild started
    Building { timestamp: u64, files: Vec<String> },

    /// The rebuild finished
    Success {
        timestamp: u64,
        /// Wall-clock duration in milliseconds
        duration: u64,
    },

    /// Apply the change in the browser
    Reload {
        timestamp: u64,
        scope: ChangeScope,
    },

    /// Compilation or build failure (display overlay, no reload)
    Error {
        timestamp: u64,
        error: ErrorPayload,
    },
}

impl ReloadMessage {
    /// Create a building message
    pub fn building(files: Vec<String>) -> Self {
        Self::Building {
            timestamp: unix_now(),
            files,
        }
    }

    /// Create a success message
    pub fn success(duration: std::time::Duration) -> Self {
        Self::Success {
            timestamp: unix_now(),
            duration: duration.as_millis() as u64,
        }
    }

    /// Create a reload message
    pub fn reload(scope: ChangeScope) -> Self {
        Self::Reload {
            timestamp: unix_now(),
            scope,
        }
    }

    /// Create an error message from a payload
    pub fn error(error: ErrorPayload) -> Self {
        Self::Error {
            timestamp: unix_now(),
            error,
        }
    }

    /// Create an error message from a per-file compile failure
    pub fn compile_error(path: &Path, error: &CompileError) -> Self {
        let payload = match error.diagnostic() {
            Some(d) => ErrorPayload {
                message: d.message.clone(),
                file: Some(
                    d.file
                        .as_deref()
                        .unwrap_or(path)
                        .display()
                        .to_string(),
                ),
                line: d.line,
                column: d.column,
                code: d.code.clone(),
                phase: Some(d.phase),
                severity: Some(d.severity),
            },
            None => ErrorPayload {
                message: error.to_string(),
                file: Some(path.display().to_string()),
                line: None,
                column: None,
                code: None,
                phase: None,
                severity: Some(Severity::Error),
            },
        };
        Self::error(payload)
    }

    /// Create an error message carrying only a message string
    pub fn error_text(message: impl Into<String>) -> Self {
        Self::error(ErrorPayload {
            message: message.into(),
            file: None,
            line: None,
            column: None,
            code: None,
            phase: None,
            severity: Some(Severity::Error),
        })
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"reload","timestamp":0,"scope":"backend"}"#.to_string())
    }

    /// Parse from JSON string
    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Diagnostic;
    use std::path::PathBuf;

    #[test]
    fn building_serialization() {
        let msg = ReloadMessage::building(vec!["app/users.sm".into()]);
        let json = msg.to_json();
        assert!(json.contains(r#""type":"building""#));
        assert!(json.contains(r#""files":["app/users.sm"]"#));
        assert!(json.contains(r#""timestamp":"#));
    }

    #[test]
    fn reload_carries_scope() {
        let json = ReloadMessage::reload(ChangeScope::Ui).to_json();
        assert!(json.contains(r#""type":"reload""#));
        assert!(json.contains(r#""scope":"ui""#));
    }

    #[test]
    fn success_duration_is_millis() {
        let msg = ReloadMessage::success(std::time::Duration::from_millis(420));
        let json = msg.to_json();
        assert!(json.contains(r#""duration":420"#));
    }

    #[test]
    fn error_roundtrip_keeps_position() {
        let diag = Diagnostic {
            message: "unknown identifier `usr`".into(),
            file: Some(PathBuf::from("app/users.sm")),
            line: Some(12),
            column: Some(5),
            code: Some("E0404".into()),
            phase: CompilePhase::Typecheck,
            severity: Severity::Error,
        };
        let err = CompileError::Type(diag);
        let msg = ReloadMessage::compile_error(Path::new("app/users.sm"), &err);

        let parsed = ReloadMessage::from_json(&msg.to_json()).unwrap();
        let ReloadMessage::Error { error, .. } = parsed else {
            panic!("expected error message");
        };
        assert_eq!(error.file.as_deref(), Some("app/users.sm"));
        assert_eq!(error.line, Some(12));
        assert_eq!(error.column, Some(5));
        assert_eq!(error.code.as_deref(), Some("E0404"));
        assert_eq!(error.phase, Some(CompilePhase::Typecheck));
        assert_eq!(error.severity, Some(Severity::Error));
    }

    #[test]
    fn tool_error_has_message_only() {
        let err = CompileError::Tool("go build exited with 1".into());
        let msg = ReloadMessage::compile_error(Path::new("app/users.sm"), &err);
        let json = msg.to_json();
        assert!(json.contains("go build exited with 1"));
        assert!(!json.contains(r#""line""#));
    }
}

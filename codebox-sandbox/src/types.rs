//! Core types for sandbox execution

use serde::{Deserialize, Serialize};

/// Timeout applied when a request does not name one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Request to execute code in the shared session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The code to execute
    pub code: String,

    /// Wall-clock limit in seconds (`None` = configured default)
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl ExecutionRequest {
    /// Create a request with the configured default timeout
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout: None,
        }
    }

    /// Set timeout in seconds
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }
}

/// A regular file inside the scratch directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    /// Lowercase suffix including the dot, or `unknown`
    #[serde(rename = "type")]
    pub file_type: String,
    pub size: u64,
    pub path: String,
}

/// Result of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,

    /// Wall-clock duration in seconds
    pub execution_time: f64,

    /// Scratch directory contents after the run
    pub files: Vec<FileInfo>,

    /// Exception message when `success` is false
    pub error: Option<String>,

    /// Whether the run was terminated by its timeout
    #[serde(default)]
    pub timed_out: bool,
}

/// Text written to the two output channels during one capture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// An unhandled exception raised by submitted code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    /// Exception message without the error class prefix
    pub message: String,
    /// Full formatted trace as reported by the engine
    pub trace: String,
}

impl ScriptFailure {
    /// Build a failure from an engine error report such as
    /// `Uncaught ReferenceError: x is not defined\n    at <session>:1:1`.
    pub fn from_report(report: &str) -> Self {
        // The message runs up to the first stack frame and may span lines
        let text = report
            .lines()
            .take_while(|line| !line.starts_with("    at "))
            .collect::<Vec<_>>()
            .join("\n");
        let headline = text.trim();
        let headline = headline.strip_prefix("Uncaught ").unwrap_or(headline);
        let message = match headline.split_once(": ") {
            Some((name, rest)) if is_error_class(name) => rest.to_string(),
            _ => headline.to_string(),
        };

        Self {
            message,
            trace: report.trim_end().to_string(),
        }
    }
}

fn is_error_class(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && (name.ends_with("Error") || name.ends_with("Exception"))
}

/// How a single script run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(ScriptFailure),
    TimedOut,
}

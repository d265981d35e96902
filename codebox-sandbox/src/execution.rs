//! Execution controller
//!
//! Runs one request at a time against the session and turns the raw run into
//! an [`ExecutionResult`]: captured output, error reporting, figure extraction
//! and the scratch listing.

use crate::limits::ResourceLimits;
use crate::scratch::ScratchDir;
use crate::session::Session;
use crate::types::{ExecutionRequest, ExecutionResult, RunOutcome};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Global bound to the absolute scratch path before every run
pub const SCRATCH_BINDING: &str = "__scratch_dir__";

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionPhase {
    Idle,
    Capturing,
    Succeeded,
    Failed,
    TimedOut,
    Reported,
}

fn transition(id: ExecutionId, phase: ExecutionPhase) {
    tracing::debug!(execution_id = %id, phase = ?phase, "Execution phase");
}

/// Serializes executions against the one session
pub struct ExecutionController {
    session: Arc<Session>,
    scratch: ScratchDir,
    limits: ResourceLimits,
    lock: Mutex<()>,
}

impl ExecutionController {
    pub fn new(session: Arc<Session>, scratch: ScratchDir, limits: ResourceLimits) -> Self {
        Self {
            session,
            scratch,
            limits,
            lock: Mutex::new(()),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Run a request and report its outcome.
    ///
    /// Script errors and timeouts are part of the result; `Err` means the
    /// session itself could not serve the request.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let _serialized = self.lock.lock().await;
        let id = ExecutionId::new();
        let started = Instant::now();
        let timeout = self.limits.resolve(request.timeout);
        transition(id, ExecutionPhase::Idle);

        tracing::info!(
            execution_id = %id,
            code_len = request.code.len(),
            timeout_secs = timeout.as_secs(),
            "Executing code"
        );

        let bindings = vec![(
            SCRATCH_BINDING.to_string(),
            json!(self.scratch.path().to_string_lossy()),
        )];
        transition(id, ExecutionPhase::Capturing);
        let reply = self.session.execute(request.code, bindings, timeout).await?;

        let mut stderr = reply.output.stderr;
        let (success, error, timed_out) = match reply.outcome {
            RunOutcome::Completed => {
                transition(id, ExecutionPhase::Succeeded);
                match self.session.extract_artifacts().await {
                    Ok(written) if !written.is_empty() => {
                        tracing::info!(execution_id = %id, figures = written.len(), "Figures saved");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(execution_id = %id, error = %e, "Error saving figures"),
                }
                (true, None, false)
            }
            RunOutcome::Failed(failure) => {
                transition(id, ExecutionPhase::Failed);
                stderr.push_str(&failure.trace);
                stderr.push('\n');
                (false, Some(failure.message), false)
            }
            RunOutcome::TimedOut => {
                transition(id, ExecutionPhase::TimedOut);
                let message = format!("Execution timed out after {} seconds", timeout.as_secs());
                stderr.push_str(&format!("TimeoutError: {message}\n"));
                (false, Some(message), true)
            }
        };

        let execution_time = started.elapsed().as_secs_f64();
        let files = self.scratch.list_files();
        transition(id, ExecutionPhase::Reported);

        tracing::info!(
            execution_id = %id,
            success,
            timed_out,
            execution_time,
            files = files.len(),
            "Execution finished"
        );

        Ok(ExecutionResult {
            stdout: reply.output.stdout,
            stderr,
            success,
            execution_time,
            files,
            error,
            timed_out,
        })
    }

    /// Reset the session once no execution is running
    pub async fn reset(&self) -> Result<()> {
        let _serialized = self.lock.lock().await;
        self.session.reset().await
    }
}

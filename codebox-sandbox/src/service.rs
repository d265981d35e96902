//! Sandbox service - main entry point

use crate::capture::OutputCapture;
use crate::execution::ExecutionController;
use crate::limits::ResourceLimits;
use crate::runtime::{EngineFactory, HostContext, V8EngineFactory};
use crate::scratch::ScratchDir;
use crate::session::Session;
use crate::types::{ExecutionRequest, ExecutionResult, FileInfo};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Where the service keeps files and how long executions may run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub scratch_dir: PathBuf,
    pub limits: ResourceLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("/scratch"),
            limits: ResourceLimits::default(),
        }
    }
}

/// Snapshot of the session and scratch area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_variables: Vec<String>,
    pub scratch_files: usize,
    pub files: Vec<FileInfo>,
}

/// Stateful execution service: one session, one scratch directory
pub struct SandboxService {
    scratch: ScratchDir,
    session: Arc<Session>,
    controller: ExecutionController,
}

impl SandboxService {
    /// Start the service on the V8 engine
    pub async fn start(config: SandboxConfig) -> Result<Self> {
        Self::start_with_engine(config, V8EngineFactory).await
    }

    /// Start the service on a custom engine
    pub async fn start_with_engine<F: EngineFactory>(config: SandboxConfig, factory: F) -> Result<Self> {
        let scratch = ScratchDir::create(&config.scratch_dir)?;
        let host = HostContext {
            capture: OutputCapture::new(),
            scratch: scratch.clone(),
        };
        let session = Arc::new(Session::start(factory, host).await?);
        let controller = ExecutionController::new(session.clone(), scratch.clone(), config.limits);

        tracing::info!(
            scratch = %scratch.path().display(),
            default_timeout_secs = controller.limits().default_timeout.as_secs(),
            max_timeout_secs = controller.limits().max_timeout.as_secs(),
            "Sandbox service started"
        );

        Ok(Self {
            scratch,
            session,
            controller,
        })
    }

    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        self.controller.execute(request).await
    }

    /// Discard every binding and re-run the preamble
    pub async fn reset_session(&self) -> Result<()> {
        self.controller.reset().await?;
        tracing::info!("Session reset");
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        let files = self.scratch.list_files();
        SessionStatus {
            session_variables: self.session.variables(),
            scratch_files: files.len(),
            files,
        }
    }

    pub fn list_files(&self) -> Vec<FileInfo> {
        self.scratch.list_files()
    }

    /// Delete every file in the scratch directory; returns how many were removed
    pub fn clear_files(&self) -> Result<usize> {
        self.scratch.clear_files()
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub async fn shutdown(&self) {
        self.session.teardown().await;
    }
}

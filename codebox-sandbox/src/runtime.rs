//! Script engine abstraction and implementations

pub mod v8;

use crate::capture::OutputCapture;
use crate::error::Result;
use crate::scratch::ScratchDir;
use crate::types::ScriptFailure;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use self::v8::{V8Engine, V8EngineFactory, PREAMBLE_BINDINGS};

/// Host capabilities handed to every engine a session creates
#[derive(Debug, Clone)]
pub struct HostContext {
    pub capture: OutputCapture,
    pub scratch: ScratchDir,
}

/// Set when an execution has been asked to stop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Thread-safe handle that stops a running script
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// A live execution context holding the session namespace.
///
/// Engines are created and driven on a single thread and need not be `Send`.
pub trait ScriptEngine {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Handle the controller uses to enforce timeouts
    fn interrupt_handle(&mut self) -> Arc<dyn Interrupt>;

    /// Clear a pending interrupt so the namespace keeps serving
    fn clear_interrupt(&mut self);

    /// Bind `name` to a JSON value in the namespace
    fn set_global(&mut self, name: &str, value: &serde_json::Value) -> Result<()>;

    /// Run `code` against the namespace
    fn run(&mut self, code: &str, cancel: &CancelToken) -> std::result::Result<(), ScriptFailure>;

    /// Names bound in the namespace, excluding the engine's own globals
    fn variables(&mut self) -> Result<Vec<String>>;

    /// Persist pending figures to the scratch directory and close them all
    fn extract_artifacts(&mut self) -> Vec<PathBuf>;

    /// Ids of figures still open
    fn open_figures(&mut self) -> Vec<u32>;
}

/// Creates initialized engines; the factory moves to the session thread
pub trait EngineFactory: Send + 'static {
    type Engine: ScriptEngine;

    /// Build an engine and run its preamble. Failure is fatal for the session.
    fn create(&self, host: HostContext) -> Result<Self::Engine>;
}

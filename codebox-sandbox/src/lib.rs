//! Codebox sandbox - persistent script sessions
//!
//! One long-lived JavaScript namespace per process. Code snippets run against
//! it one at a time with their output captured; figures they leave open are
//! saved into a shared scratch directory.

mod artifacts;
mod capture;
mod error;
mod execution;
mod limits;
mod render;
mod runtime;
mod scratch;
mod service;
mod session;
mod types;

pub use artifacts::{
    CloseTarget, Figure, FigureRegistry, PlotCommand, PlotError, SeriesKind, EXTRACT_DPI,
    MAX_BINS, MAX_SUBPLOTS,
};
pub use capture::{CaptureGuard, OutputCapture, Stream};
pub use error::{Result, SandboxError};
pub use execution::{ExecutionController, ExecutionId, ExecutionPhase, SCRATCH_BINDING};
pub use limits::ResourceLimits;
pub use render::{render_figure, ImageFormat};
pub use runtime::{
    CancelToken, EngineFactory, HostContext, Interrupt, ScriptEngine, V8Engine, V8EngineFactory,
    PREAMBLE_BINDINGS,
};
pub use scratch::ScratchDir;
pub use service::{SandboxConfig, SandboxService, SessionStatus};
pub use session::{ExecuteReply, Session};
pub use types::{
    CapturedOutput, ExecutionRequest, ExecutionResult, FileInfo, RunOutcome, ScriptFailure,
    DEFAULT_TIMEOUT_SECS,
};

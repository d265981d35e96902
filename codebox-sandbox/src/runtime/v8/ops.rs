//! Host ops exposed to scripts through `Deno.core.ops`

use crate::artifacts::{FigureRegistry, PlotCommand, EXTRACT_DPI};
use crate::capture::{OutputCapture, Stream};
use crate::render::{self, ImageFormat};
use crate::runtime::{CancelToken, HostContext};
use crate::scratch::ScratchDir;
use deno_core::{op2, Extension, OpState};
use deno_error::JsErrorBox;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Longest uninterrupted slice of a `time.sleep` call
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Per-engine host state kept in the op state
pub(crate) struct HostState {
    pub capture: OutputCapture,
    pub scratch: ScratchDir,
    pub figures: FigureRegistry,
    pub cancel: CancelToken,
}

impl HostState {
    pub fn new(host: HostContext) -> Self {
        Self {
            capture: host.capture,
            scratch: host.scratch,
            figures: FigureRegistry::new(),
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    stream: Stream,
    text: String,
}

#[derive(Debug, Deserialize)]
struct SaveFigArgs {
    path: String,
    format: Option<String>,
    dpi: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum FsCommand {
    ScratchDir,
    Listdir { path: Option<String> },
    ReadText { path: String },
    WriteText { path: String, contents: String },
    Remove { path: String },
    Exists { path: String },
}

#[op2]
fn op_codebox_write(state: &mut OpState, #[serde] args: WriteArgs) {
    state.borrow::<HostState>().capture.write(args.stream, &args.text);
}

#[op2]
#[serde]
fn op_codebox_plot(
    state: &mut OpState,
    #[serde] command: PlotCommand,
) -> Result<serde_json::Value, JsErrorBox> {
    state
        .borrow_mut::<HostState>()
        .figures
        .apply(command)
        .map_err(|e| JsErrorBox::range_error(e.to_string()))
}

/// Save the current figure; returns the path written
#[op2]
#[string]
fn op_codebox_savefig(
    state: &mut OpState,
    #[serde] args: SaveFigArgs,
) -> Result<String, JsErrorBox> {
    let host = state.borrow_mut::<HostState>();
    let mut path = host.scratch.resolve(&args.path);

    let format = match args.format.as_deref() {
        Some(name) => ImageFormat::parse(name)
            .ok_or_else(|| JsErrorBox::type_error(format!("Unsupported image format: {name}")))?,
        None => ImageFormat::from_path(&path).unwrap_or(ImageFormat::Png),
    };
    if ImageFormat::from_path(&path) != Some(format) {
        path = PathBuf::from(format!("{}.{}", path.display(), format.extension()));
    }

    let figure = host.figures.gcf();
    render::render_figure(figure, &path, format, args.dpi.unwrap_or(EXTRACT_DPI))
        .map_err(|e| JsErrorBox::generic(e.to_string()))?;

    tracing::debug!(figure = figure.id, path = %path.display(), "Figure saved by script");
    Ok(path.to_string_lossy().into_owned())
}

#[op2]
#[serde]
fn op_codebox_fs(state: &mut OpState, #[serde] command: FsCommand) -> Result<serde_json::Value, JsErrorBox> {
    let scratch = &state.borrow::<HostState>().scratch;
    let io_error = |path: &str, e: std::io::Error| JsErrorBox::generic(format!("{path}: {e}"));

    let value = match command {
        FsCommand::ScratchDir => json!(scratch.path().to_string_lossy()),
        FsCommand::Listdir { path } => {
            let target = path
                .as_deref()
                .map(|p| scratch.resolve(p))
                .unwrap_or_else(|| scratch.path().to_path_buf());
            let entries = std::fs::read_dir(&target)
                .map_err(|e| io_error(&target.to_string_lossy(), e))?;
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| io_error(&target.to_string_lossy(), e))?;
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            json!(names)
        }
        FsCommand::ReadText { path } => {
            let contents = std::fs::read_to_string(scratch.resolve(&path))
                .map_err(|e| io_error(&path, e))?;
            json!(contents)
        }
        FsCommand::WriteText { path, contents } => {
            let target = scratch.resolve(&path);
            std::fs::write(&target, contents).map_err(|e| io_error(&path, e))?;
            json!(target.to_string_lossy())
        }
        FsCommand::Remove { path } => {
            std::fs::remove_file(scratch.resolve(&path)).map_err(|e| io_error(&path, e))?;
            Value::Null
        }
        FsCommand::Exists { path } => json!(scratch.resolve(&path).exists()),
    };
    Ok(value)
}

/// Block for `seconds`, returning early once the execution is cancelled
#[op2(fast)]
fn op_codebox_sleep(state: &mut OpState, seconds: f64) {
    let cancel = state.borrow::<HostState>().cancel.clone();
    if !seconds.is_finite() || seconds <= 0.0 {
        return;
    }
    let deadline = Instant::now() + Duration::from_secs_f64(seconds.min(86_400.0));
    while !cancel.is_cancelled() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        std::thread::sleep(remaining.min(SLEEP_SLICE));
    }
}

/// Names of the ops the preamble requires
pub(crate) const REQUIRED_OPS: [&str; 5] = [
    "op_codebox_write",
    "op_codebox_plot",
    "op_codebox_savefig",
    "op_codebox_fs",
    "op_codebox_sleep",
];

pub(crate) fn create_host_extension() -> Extension {
    let ops = vec![
        op_codebox_write(),
        op_codebox_plot(),
        op_codebox_savefig(),
        op_codebox_fs(),
        op_codebox_sleep(),
    ];

    Extension {
        name: "codebox_host",
        ops: std::borrow::Cow::Owned(ops),
        ..Default::default()
    }
}

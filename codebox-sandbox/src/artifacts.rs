//! Figure registry and artifact extraction
//!
//! The registry is the session's plotting state: scripts create and populate
//! figures through the `plt` preamble binding, and after a successful run the
//! extractor renders every populated figure into the scratch directory and
//! empties the registry.

use crate::render::{self, ImageFormat};
use crate::scratch::ScratchDir;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Resolution used for extracted figures
pub const EXTRACT_DPI: u32 = 100;

const DEFAULT_FIGSIZE: (f64, f64) = (6.4, 4.8);

/// Most axes one figure's subplot grid may hold
pub const MAX_SUBPLOTS: u32 = 1024;

/// Most bins a histogram may use
pub const MAX_BINS: u32 = 100_000;

/// A plotting command the registry refuses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlotError {
    #[error("Subplot grid {rows}x{cols} exceeds {MAX_SUBPLOTS} axes")]
    GridTooLarge { rows: u32, cols: u32 },

    #[error("Number of bins must be at most {MAX_BINS}, got {0}")]
    TooManyBins(u32),
}

/// Validated `(rows, cols, slots)` of a subplot grid
fn grid_slots(rows: u32, cols: u32) -> Result<(u32, u32, usize), PlotError> {
    let (rows, cols) = (rows.max(1), cols.max(1));
    match rows.checked_mul(cols) {
        Some(slots) if slots <= MAX_SUBPLOTS => Ok((rows, cols, slots as usize)),
        _ => Err(PlotError::GridTooLarge { rows, cols }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    Line,
    Scatter,
    Bar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub kind: SeriesKind,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub label: Option<String>,
    pub color: Option<String>,
    /// Bar width in data units
    pub width: Option<f64>,
}

impl Series {
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x
            .iter()
            .copied()
            .zip(self.y.iter().copied())
            .filter(|(x, y)| x.is_finite() && y.is_finite())
    }

    /// `(left, right, height)` for each bar
    pub fn bars(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        let half = self.width.unwrap_or(0.8) / 2.0;
        self.points().map(move |(x, y)| (x - half, x + half, y))
    }
}

/// One subplot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub legend: bool,
    pub series: Vec<Series>,
}

impl Axes {
    /// Padded data bounds, falling back to the unit square
    pub fn bounds(&self) -> (Range<f64>, Range<f64>) {
        let mut xs: Vec<f64> = Vec::new();
        let mut ys: Vec<f64> = Vec::new();
        for series in &self.series {
            match series.kind {
                SeriesKind::Bar => {
                    for (left, right, height) in series.bars() {
                        xs.extend([left, right]);
                        ys.extend([0.0, height]);
                    }
                }
                SeriesKind::Line | SeriesKind::Scatter => {
                    for (x, y) in series.points() {
                        xs.push(x);
                        ys.push(y);
                    }
                }
            }
        }
        (padded_range(&xs), padded_range(&ys))
    }
}

fn padded_range(values: &[f64]) -> Range<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    if min == max {
        let pad = if min == 0.0 { 0.5 } else { min.abs() * 0.05 };
        return (min - pad)..(max + pad);
    }
    let pad = (max - min) * 0.05;
    (min - pad)..(max + pad)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub id: u32,
    /// Size in inches
    pub size: (f64, f64),
    /// Subplot grid as `(rows, cols)`
    pub grid: (u32, u32),
    /// Axes keyed by zero-based grid slot
    pub axes: BTreeMap<usize, Axes>,
    current_slot: usize,
}

impl Figure {
    fn new(id: u32) -> Self {
        Self {
            id,
            size: DEFAULT_FIGSIZE,
            grid: (1, 1),
            axes: BTreeMap::new(),
            current_slot: 0,
        }
    }

    /// Whether the figure has any subplot worth saving
    pub fn has_axes(&self) -> bool {
        !self.axes.is_empty()
    }

    fn gca(&mut self) -> &mut Axes {
        self.axes.entry(self.current_slot).or_default()
    }

    /// Switch to a `rows x cols` grid and return its slot count
    fn set_grid(&mut self, rows: u32, cols: u32) -> Result<usize, PlotError> {
        let (rows, cols, slots) = grid_slots(rows, cols)?;
        if self.grid != (rows, cols) {
            self.grid = (rows, cols);
            self.axes.retain(|slot, _| *slot < slots);
        }
        Ok(slots)
    }
}

/// Which figures `close` discards
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseTarget {
    All,
    Current,
    Id(u32),
}

/// Commands issued by the `plt` binding
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlotCommand {
    Figure {
        num: Option<u32>,
        figsize: Option<(f64, f64)>,
    },
    Subplots {
        nrows: u32,
        ncols: u32,
    },
    Subplot {
        nrows: u32,
        ncols: u32,
        index: u32,
    },
    Plot {
        kind: SeriesKind,
        x: Vec<f64>,
        y: Vec<f64>,
        label: Option<String>,
        color: Option<String>,
        width: Option<f64>,
    },
    Hist {
        values: Vec<f64>,
        bins: u32,
        label: Option<String>,
        color: Option<String>,
    },
    Title {
        text: String,
    },
    Xlabel {
        text: String,
    },
    Ylabel {
        text: String,
    },
    Legend,
    Gcf,
    GetFignums,
    Clf,
    Close {
        target: CloseTarget,
    },
}

/// Open figures of one session
#[derive(Debug, Clone)]
pub struct FigureRegistry {
    figures: BTreeMap<u32, Figure>,
    current: Option<u32>,
    next_id: u32,
}

impl Default for FigureRegistry {
    fn default() -> Self {
        Self {
            figures: BTreeMap::new(),
            current: None,
            next_id: 1,
        }
    }
}

impl FigureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of open figures in ascending order
    pub fn fignums(&self) -> Vec<u32> {
        self.figures.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Figure> {
        self.figures.get(&id)
    }

    /// Open a figure, or make an existing one current.
    ///
    /// Ids only move forward so artifacts of later figures never reuse a name.
    pub fn figure(&mut self, num: Option<u32>) -> u32 {
        let id = num.unwrap_or(self.next_id);
        self.next_id = self.next_id.max(id.saturating_add(1));
        self.figures.entry(id).or_insert_with(|| Figure::new(id));
        self.current = Some(id);
        id
    }

    /// The current figure, creating one if none is open
    pub fn gcf(&mut self) -> &mut Figure {
        let id = match self.current.filter(|id| self.figures.contains_key(id)) {
            Some(id) => id,
            None => self.figure(None),
        };
        self.figures.entry(id).or_insert_with(|| Figure::new(id))
    }

    pub fn close(&mut self, target: &CloseTarget) {
        match target {
            CloseTarget::All => {
                self.figures.clear();
                self.current = None;
            }
            CloseTarget::Current => {
                if let Some(id) = self.current.take() {
                    self.figures.remove(&id);
                }
                self.current = self.figures.keys().next_back().copied();
            }
            CloseTarget::Id(id) => {
                self.figures.remove(id);
                if self.current == Some(*id) {
                    self.current = self.figures.keys().next_back().copied();
                }
            }
        }
    }

    /// Apply a script command and return its JSON result.
    ///
    /// Commands are validated before any state changes.
    pub fn apply(&mut self, command: PlotCommand) -> Result<Value, PlotError> {
        let value = match command {
            PlotCommand::Figure { num, figsize } => {
                let id = self.figure(num);
                if let (Some(size), Some(figure)) = (figsize, self.figures.get_mut(&id)) {
                    figure.size = size;
                }
                json!(id)
            }
            PlotCommand::Subplots { nrows, ncols } => {
                grid_slots(nrows, ncols)?;
                let id = self.figure(None);
                let figure = self.gcf();
                let slots = figure.set_grid(nrows, ncols)?;
                for slot in 0..slots {
                    figure.axes.entry(slot).or_default();
                }
                json!(id)
            }
            PlotCommand::Subplot {
                nrows,
                ncols,
                index,
            } => {
                grid_slots(nrows, ncols)?;
                let figure = self.gcf();
                let slots = figure.set_grid(nrows, ncols)?;
                figure.current_slot = (index.max(1) as usize - 1).min(slots - 1);
                figure.gca();
                json!(figure.id)
            }
            PlotCommand::Plot {
                kind,
                x,
                y,
                label,
                color,
                width,
            } => {
                let len = x.len().min(y.len());
                let series = Series {
                    kind,
                    x: x[..len].to_vec(),
                    y: y[..len].to_vec(),
                    label,
                    color,
                    width,
                };
                let figure = self.gcf();
                figure.gca().series.push(series);
                json!(figure.id)
            }
            PlotCommand::Hist {
                values,
                bins,
                label,
                color,
            } => {
                if bins > MAX_BINS {
                    return Err(PlotError::TooManyBins(bins));
                }
                let (centers, counts, width) = histogram(&values, bins.max(1));
                let figure = self.gcf();
                figure.gca().series.push(Series {
                    kind: SeriesKind::Bar,
                    x: centers,
                    y: counts.clone(),
                    label,
                    color,
                    width: Some(width),
                });
                json!(counts)
            }
            PlotCommand::Title { text } => {
                self.gcf().gca().title = Some(text);
                Value::Null
            }
            PlotCommand::Xlabel { text } => {
                self.gcf().gca().xlabel = Some(text);
                Value::Null
            }
            PlotCommand::Ylabel { text } => {
                self.gcf().gca().ylabel = Some(text);
                Value::Null
            }
            PlotCommand::Legend => {
                self.gcf().gca().legend = true;
                Value::Null
            }
            PlotCommand::Gcf => json!(self.gcf().id),
            PlotCommand::GetFignums => json!(self.fignums()),
            PlotCommand::Clf => {
                let figure = self.gcf();
                figure.axes.clear();
                figure.grid = (1, 1);
                figure.current_slot = 0;
                Value::Null
            }
            PlotCommand::Close { target } => {
                self.close(&target);
                Value::Null
            }
        };
        Ok(value)
    }

    /// Render every populated figure into the scratch directory, then close all.
    ///
    /// Rendering failures are logged and skipped.
    pub fn extract_and_clear(&mut self, scratch: &ScratchDir) -> Vec<PathBuf> {
        let timestamp = chrono::Utc::now().timestamp();
        let figures = std::mem::take(&mut self.figures);
        self.current = None;

        let mut written = Vec::new();
        for figure in figures.values().filter(|figure| figure.has_axes()) {
            let stem = format!("plot_{}_{}", figure.id, timestamp);
            let path = unique_path(scratch.path(), &stem, ImageFormat::Png.extension());
            match render::render_figure(figure, &path, ImageFormat::Png, EXTRACT_DPI) {
                Ok(()) => {
                    tracing::debug!(figure = figure.id, path = %path.display(), "Figure saved");
                    written.push(path);
                }
                Err(e) => {
                    tracing::warn!(figure = figure.id, error = %e, "Error capturing figure");
                }
            }
        }

        if !figures.is_empty() {
            tracing::info!(
                open = figures.len(),
                saved = written.len(),
                "Figures extracted and closed"
            );
        }
        written
    }
}

/// `dir/stem.ext`, or `dir/stem_<n>.ext` when taken
fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{extension}"));
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{stem}_{n}.{extension}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Bin centers, counts and bin width over the finite values
fn histogram(values: &[f64], bins: u32) -> (Vec<f64>, Vec<f64>, f64) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let range = padded_bins_range(&finite);
    let width = (range.end - range.start) / bins as f64;

    let mut counts = vec![0.0; bins as usize];
    for value in &finite {
        let index = (((value - range.start) / width) as usize).min(bins as usize - 1);
        counts[index] += 1.0;
    }
    let centers = (0..bins)
        .map(|i| range.start + width * (i as f64 + 0.5))
        .collect();
    (centers, counts, width)
}

fn padded_bins_range(values: &[f64]) -> Range<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    match (min.is_finite(), max.is_finite()) {
        (true, true) if min < max => min..max,
        (true, true) => (min - 0.5)..(max + 0.5),
        _ => 0.0..1.0,
    }
}

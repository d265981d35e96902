//! Headless figure rendering
//!
//! Text (titles, tick labels, legends) depends on a font backend being
//! available; when it is not, figures are still rendered without text.

use crate::artifacts::{Axes, Figure, SeriesKind};
use crate::error::{Result, SandboxError};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;
use std::sync::OnceLock;

/// Matplotlib's default color cycle
const PALETTE: [RGBColor; 10] = [
    RGBColor(0x1f, 0x77, 0xb4),
    RGBColor(0xff, 0x7f, 0x0e),
    RGBColor(0x2c, 0xa0, 0x2c),
    RGBColor(0xd6, 0x27, 0x28),
    RGBColor(0x94, 0x67, 0xbd),
    RGBColor(0x8c, 0x56, 0x4b),
    RGBColor(0xe3, 0x77, 0xc2),
    RGBColor(0x7f, 0x7f, 0x7f),
    RGBColor(0xbc, 0xbd, 0x22),
    RGBColor(0x17, 0xbe, 0xcf),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Bmp,
    Svg,
}

impl ImageFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "bmp" => Some(Self::Bmp),
            "svg" => Some(Self::Svg),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::parse)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Bmp => "bmp",
            Self::Svg => "svg",
        }
    }
}

/// Pixel size of a figure at `dpi`
pub fn pixel_size(figure: &Figure, dpi: u32) -> (u32, u32) {
    let scale = |inches: f64| ((inches * dpi as f64).round() as u32).clamp(16, 8000);
    (scale(figure.size.0), scale(figure.size.1))
}

/// Write `figure` to `path`.
///
/// Raster formats take their encoding from the path extension, so `path`
/// must end in the extension of `format`.
pub fn render_figure(figure: &Figure, path: &Path, format: ImageFormat, dpi: u32) -> Result<()> {
    let size = pixel_size(figure, dpi);
    match format {
        ImageFormat::Svg => {
            let root = SVGBackend::new(path, size).into_drawing_area();
            draw_figure(&root, figure).map_err(render_error)?;
            root.present().map_err(render_error)?;
        }
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp => {
            let root = BitMapBackend::new(path, size).into_drawing_area();
            draw_figure(&root, figure).map_err(render_error)?;
            root.present().map_err(render_error)?;
        }
    }
    Ok(())
}

fn render_error(e: impl std::fmt::Display) -> SandboxError {
    SandboxError::Render(e.to_string())
}

fn text_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| {
        let mut buffer = vec![0u8; 32 * 32 * 3];
        let area = BitMapBackend::with_buffer(&mut buffer, (32, 32)).into_drawing_area();
        let style = TextStyle::from(("sans-serif", 12.0).into_font());
        let supported = area.draw_text("0", &style, (0, 0)).is_ok();
        if !supported {
            tracing::debug!("No font backend available, figures render without text");
        }
        supported
    })
}

fn draw_figure<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    figure: &Figure,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    root.fill(&WHITE)?;

    let (rows, cols) = figure.grid;
    let cells = root.split_evenly((rows as usize, cols as usize));
    for (slot, axes) in &figure.axes {
        if let Some(cell) = cells.get(*slot) {
            draw_axes(cell, axes)?;
        }
    }
    Ok(())
}

fn draw_axes<DB: DrawingBackend>(
    cell: &DrawingArea<DB, Shift>,
    axes: &Axes,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    let text = text_supported();

    let area = match axes.title.as_deref() {
        Some(title) if text => match cell.titled(title, ("sans-serif", 16.0)) {
            Ok(inner) => inner,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping figure title");
                cell.clone()
            }
        },
        _ => cell.clone(),
    };

    let (x_range, y_range) = axes.bounds();
    let label_area = if text { 32 } else { 0 };
    let mut chart = ChartBuilder::on(&area)
        .margin(8)
        .x_label_area_size(label_area)
        .y_label_area_size(label_area + 8)
        .build_cartesian_2d(x_range, y_range)?;

    let mut mesh = chart.configure_mesh();
    if text {
        mesh.x_labels(6).y_labels(6);
        if let Some(label) = axes.xlabel.as_deref() {
            mesh.x_desc(label);
        }
        if let Some(label) = axes.ylabel.as_deref() {
            mesh.y_desc(label);
        }
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    if let Err(e) = mesh.draw() {
        tracing::debug!(error = %e, "Axis decorations incomplete");
    }

    for (index, series) in axes.series.iter().enumerate() {
        let color = series
            .color
            .as_deref()
            .and_then(parse_color)
            .unwrap_or(PALETTE[index % PALETTE.len()]);

        let annotation = match series.kind {
            SeriesKind::Line => {
                chart.draw_series(LineSeries::new(series.points(), color.stroke_width(2)))?
            }
            SeriesKind::Scatter => chart.draw_series(
                series
                    .points()
                    .map(|point| Circle::new(point, 3, color.filled())),
            )?,
            SeriesKind::Bar => chart.draw_series(series.bars().map(|(left, right, height)| {
                Rectangle::new([(left, 0.0), (right, height)], color.filled())
            }))?,
        };

        if let Some(label) = series.label.as_deref() {
            annotation
                .label(label)
                .legend(move |(x, y)| Rectangle::new([(x, y - 4), (x + 16, y + 4)], color.filled()));
        }
    }

    let labelled = axes.series.iter().any(|series| series.label.is_some());
    if axes.legend && labelled && text {
        if let Err(e) = chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
        {
            tracing::debug!(error = %e, "Skipping legend");
        }
    }

    Ok(())
}

/// `#rrggbb` or one of the single-letter / basic color names
fn parse_color(name: &str) -> Option<RGBColor> {
    let name = name.trim();
    if let Some(hex) = name.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        return Some(RGBColor(channel(0)?, channel(2)?, channel(4)?));
    }
    let color = match name.to_ascii_lowercase().as_str() {
        "b" | "blue" => PALETTE[0],
        "orange" => PALETTE[1],
        "g" | "green" => PALETTE[2],
        "r" | "red" => PALETTE[3],
        "purple" => PALETTE[4],
        "brown" => PALETTE[5],
        "pink" => PALETTE[6],
        "gray" | "grey" => PALETTE[7],
        "olive" => PALETTE[8],
        "c" | "cyan" => PALETTE[9],
        "m" | "magenta" => RGBColor(0xbf, 0x00, 0xbf),
        "y" | "yellow" => RGBColor(0xbf, 0xbf, 0x00),
        "k" | "black" => RGBColor(0, 0, 0),
        "w" | "white" => RGBColor(0xff, 0xff, 0xff),
        _ => return None,
    };
    Some(color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{FigureRegistry, PlotCommand};

    fn sample_figure(kind: SeriesKind) -> Figure {
        let mut registry = FigureRegistry::new();
        registry
            .apply(PlotCommand::Plot {
                kind,
                x: vec![0.0, 1.0, 2.0, 3.0],
                y: vec![1.0, 3.0, 2.0, 5.0],
                label: Some("series".into()),
                color: Some("#ff0000".into()),
                width: None,
            })
            .unwrap();
        registry
            .apply(PlotCommand::Title {
                text: "Sample".into(),
            })
            .unwrap();
        registry.apply(PlotCommand::Legend).unwrap();
        registry.get(1).cloned().unwrap()
    }

    #[test]
    fn test_pixel_size_uses_dpi() {
        let figure = sample_figure(SeriesKind::Line);
        assert_eq!(pixel_size(&figure, 100), (640, 480));
        assert_eq!(pixel_size(&figure, 50), (320, 240));
    }

    #[test]
    fn test_render_png_and_svg() {
        let temp = tempfile::tempdir().unwrap();
        for kind in [SeriesKind::Line, SeriesKind::Scatter, SeriesKind::Bar] {
            let figure = sample_figure(kind);

            let png = temp.path().join(format!("{kind:?}.png"));
            render_figure(&figure, &png, ImageFormat::Png, 100).unwrap();
            let bytes = std::fs::read(&png).unwrap();
            assert_eq!(&bytes[1..4], b"PNG");

            let svg = temp.path().join(format!("{kind:?}.svg"));
            render_figure(&figure, &svg, ImageFormat::Svg, 100).unwrap();
            let text = std::fs::read_to_string(&svg).unwrap();
            assert!(text.contains("<svg"));
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(ImageFormat::parse("PNG"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::parse(".jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::parse("pdf"), None);
        assert_eq!(
            ImageFormat::from_path(Path::new("/tmp/plot.svg")),
            Some(ImageFormat::Svg)
        );
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#102030"), Some(RGBColor(0x10, 0x20, 0x30)));
        assert_eq!(parse_color("r"), Some(PALETTE[3]));
        assert_eq!(parse_color("#12"), None);
        assert_eq!(parse_color("chartreuse"), None);
    }
}

//! Chart rendering for aggregated delivery durations.
//!
//! Charts are drawn into an in-memory RGB buffer and PNG-encoded; writing
//! them anywhere is left to the output module.

use crate::analyzers::bucket::bucket_label;
use crate::analyzers::types::Aggregation;
use crate::config::{ChartStyle, MAX_CHART_SIDE};
use crate::error::{AnalysisError, Result};
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::collections::BTreeMap;
use tracing::{info, warn};

type DrawResult = std::result::Result<(), Box<dyn std::error::Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    /// Mean duration per bucket, one line per category combination
    MeanTrend,
    /// Pooled mean and spread per category combination
    CategoryDistribution,
}

impl ChartKind {
    pub const ALL: [ChartKind; 2] = [ChartKind::MeanTrend, ChartKind::CategoryDistribution];

    pub fn name(&self) -> &'static str {
        match self {
            ChartKind::MeanTrend => "mean_duration_trend",
            ChartKind::CategoryDistribution => "duration_by_category",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.png", self.name())
    }
}

/// A PNG-encoded chart held in memory.
#[derive(Debug, Clone)]
pub struct RenderedChart {
    pub kind: ChartKind,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl RenderedChart {
    pub fn file_name(&self) -> String {
        self.kind.file_name()
    }
}

/// Charts that rendered, and the ones that were skipped with the reason.
#[derive(Debug, Default)]
pub struct ChartSet {
    pub charts: Vec<RenderedChart>,
    pub skipped: Vec<(ChartKind, String)>,
}

/// One line on the trend chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    /// `(bucket index, mean duration)`
    pub points: Vec<(f64, f64)>,
}

/// Durations of one category combination pooled across all buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorySummary {
    pub label: String,
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
}

/// Renders every chart kind. A chart that fails is logged and skipped.
#[tracing::instrument(skip_all, fields(groups = aggregation.groups.len()))]
pub fn render_charts(aggregation: &Aggregation, style: &ChartStyle) -> ChartSet {
    let mut set = ChartSet::default();

    for kind in ChartKind::ALL {
        match render_chart(kind, aggregation, style) {
            Ok(chart) => {
                info!(chart = kind.name(), bytes = chart.png.len(), "Chart rendered");
                set.charts.push(chart);
            }
            Err(e) => {
                warn!(chart = kind.name(), error = %e, "Skipping chart");
                set.skipped.push((kind, e.to_string()));
            }
        }
    }

    set
}

/// Renders a single chart.
///
/// # Errors
///
/// `Render` when there is nothing to plot or drawing/encoding fails.
pub fn render_chart(
    kind: ChartKind,
    aggregation: &Aggregation,
    style: &ChartStyle,
) -> Result<RenderedChart> {
    if aggregation.groups.is_empty() {
        return Err(AnalysisError::render(kind.name(), "no groups to plot"));
    }

    let (width, height) = (style.width, style.height);
    if width > MAX_CHART_SIDE || height > MAX_CHART_SIDE {
        return Err(AnalysisError::render(
            kind.name(),
            format!("{width}x{height} exceeds the {MAX_CHART_SIDE} pixel limit"),
        ));
    }
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(3))
        .ok_or_else(|| AnalysisError::render(kind.name(), "chart buffer size overflows"))?;
    let mut buffer = vec![0u8; len];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        let drawn = match kind {
            ChartKind::MeanTrend => {
                let (labels, series) = trend_series(aggregation);
                draw_trend(&root, &labels, &series, style)
            }
            ChartKind::CategoryDistribution => {
                draw_categories(&root, &pooled_by_category(aggregation), style)
            }
        };
        drawn.map_err(|e| AnalysisError::render(kind.name(), e))?;
        root.present()
            .map_err(|e| AnalysisError::render(kind.name(), e))?;
    }

    let png = encode_png(&buffer, width, height)
        .map_err(|e| AnalysisError::render(kind.name(), e))?;

    Ok(RenderedChart {
        kind,
        width,
        height,
        png,
    })
}

/// Bucket labels and one mean-duration series per category combination.
pub fn trend_series(aggregation: &Aggregation) -> (Vec<String>, Vec<Series>) {
    let buckets = aggregation.buckets();
    let labels = buckets
        .iter()
        .map(|b| bucket_label(*b, aggregation.granularity))
        .collect();

    let mut by_category: BTreeMap<&[Option<String>], Series> = BTreeMap::new();
    for group in &aggregation.groups {
        let x = buckets
            .binary_search(&group.key.bucket_start)
            .unwrap_or_default() as f64;
        by_category
            .entry(group.key.categories.as_slice())
            .or_insert_with(|| Series {
                label: group.key.category_label(),
                points: Vec::new(),
            })
            .points
            .push((x, group.stats.mean));
    }

    (labels, by_category.into_values().collect())
}

/// Pools every bucket of a category combination into a single mean and
/// standard deviation, weighting each group by its count.
pub fn pooled_by_category(aggregation: &Aggregation) -> Vec<CategorySummary> {
    // (count, sum, sum of squares)
    let mut pooled: BTreeMap<&[Option<String>], (String, usize, f64, f64)> = BTreeMap::new();

    for group in &aggregation.groups {
        let n = group.stats.count as f64;
        let mean = group.stats.mean;
        let sd = group.stats.std_dev;
        let entry = pooled
            .entry(group.key.categories.as_slice())
            .or_insert_with(|| (group.key.category_label(), 0, 0.0, 0.0));
        entry.1 += group.stats.count;
        entry.2 += n * mean;
        entry.3 += n * (sd * sd + mean * mean);
    }

    pooled
        .into_values()
        .map(|(label, count, sum, sum_sq)| {
            let n = count as f64;
            let mean = sum / n;
            let variance = (sum_sq / n - mean * mean).max(0.0);
            CategorySummary {
                label,
                count,
                mean,
                std_dev: variance.sqrt(),
            }
        })
        .collect()
}

/// Parses a `#RRGGBB` string, falling back to black.
pub fn parse_color(color: &str) -> RGBColor {
    if let Some(hex) = color.strip_prefix('#') {
        if hex.len() == 6 && hex.is_ascii() {
            if let (Ok(r), Ok(g), Ok(b)) = (
                u8::from_str_radix(&hex[0..2], 16),
                u8::from_str_radix(&hex[2..4], 16),
                u8::from_str_radix(&hex[4..6], 16),
            ) {
                return RGBColor(r, g, b);
            }
        }
    }
    RGBColor(0, 0, 0)
}

fn palette(style: &ChartStyle) -> Vec<RGBColor> {
    if style.palette.is_empty() {
        return vec![RGBColor(31, 119, 180)];
    }
    style.palette.iter().map(|c| parse_color(c)).collect()
}

/// Maps an axis position back to the label of the nearest whole index.
fn label_at(labels: &[String], x: f64) -> String {
    let rounded = x.round();
    if (x - rounded).abs() > 1e-6 || rounded < 0.0 {
        return String::new();
    }
    labels.get(rounded as usize).cloned().unwrap_or_default()
}

fn axis_max(value: f64) -> f64 {
    if value > 0.0 { value * 1.1 } else { 1.0 }
}

fn draw_trend(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    labels: &[String],
    series: &[Series],
    style: &ChartStyle,
) -> DrawResult {
    root.fill(&parse_color(&style.background))?;

    let y_max = axis_max(
        series
            .iter()
            .flat_map(|s| s.points.iter().map(|p| p.1))
            .fold(0.0, f64::max),
    );
    let x_max = labels.len() as f64 - 0.5;

    let mut chart = ChartBuilder::on(root)
        .caption(
            "Mean delivery duration per bucket",
            (style.font_family.as_str(), 24),
        )
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..x_max, 0f64..y_max)?;

    chart
        .configure_mesh()
        .x_labels(labels.len().clamp(1, 12))
        .x_label_formatter(&|x| label_at(labels, *x))
        .x_desc("Bucket")
        .y_desc(format!("Mean duration ({})", style.unit.label()))
        .draw()?;

    let colors = palette(style);
    for (i, s) in series.iter().enumerate() {
        let color = colors[i % colors.len()];
        chart
            .draw_series(LineSeries::new(
                s.points.iter().copied(),
                color.stroke_width(2),
            ))?
            .label(s.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], color.stroke_width(2)));
        // markers keep single-bucket series visible
        chart.draw_series(s.points.iter().map(|p| Circle::new(*p, 4, color.filled())))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    Ok(())
}

fn draw_categories(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    summaries: &[CategorySummary],
    style: &ChartStyle,
) -> DrawResult {
    root.fill(&parse_color(&style.background))?;

    let labels: Vec<String> = summaries
        .iter()
        .map(|s| format!("{} (n={})", s.label, s.count))
        .collect();
    let y_max = axis_max(
        summaries
            .iter()
            .map(|s| s.mean + s.std_dev)
            .fold(0.0, f64::max),
    );
    let x_max = summaries.len() as f64 - 0.5;

    let mut chart = ChartBuilder::on(root)
        .caption(
            "Delivery duration by category (mean ± std dev)",
            (style.font_family.as_str(), 24),
        )
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..x_max, 0f64..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(summaries.len().clamp(1, 24))
        .x_label_formatter(&|x| label_at(&labels, *x))
        .y_desc(format!("Duration ({})", style.unit.label()))
        .draw()?;

    let colors = palette(style);
    chart.draw_series(summaries.iter().enumerate().map(|(i, s)| {
        let x = i as f64;
        Rectangle::new(
            [(x - 0.35, 0.0), (x + 0.35, s.mean)],
            colors[i % colors.len()].filled(),
        )
    }))?;
    chart.draw_series(summaries.iter().enumerate().map(|(i, s)| {
        ErrorBar::new_vertical(
            i as f64,
            (s.mean - s.std_dev).max(0.0),
            s.mean,
            s.mean + s.std_dev,
            BLACK.stroke_width(1),
            12,
        )
    }))?;

    Ok(())
}

fn encode_png(rgb: &[u8], width: u32, height: u32) -> image::ImageResult<Vec<u8>> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(rgb, width, height, ColorType::Rgb8)?;
    Ok(png)
}

// src/analysis/figures.rs
//
// PNG figures for the screen. Values are clamped to the display range here and
// nowhere else; clustering and exports always see the raw fitness.

use std::fmt::Display;
use std::fs;
use std::path::Path;

use plotters::prelude::*;
use tracing::{info, warn};

use crate::analysis::aggregation::ConditionShift;
use crate::analysis::clustering::ClusterOrder;
use crate::analysis::pivot::WideMatrix;
use crate::error::{PipelineError, PipelineResult};

const LOW_COLOUR: RGBColor = RGBColor(33, 102, 172);
const MID_COLOUR: RGBColor = RGBColor(247, 247, 247);
const HIGH_COLOUR: RGBColor = RGBColor(178, 24, 43);
const HISTOGRAM_BINS: usize = 30;

fn figure_err(path: &Path, e: impl Display) -> PipelineError {
    PipelineError::Figure {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn prepare(path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn clamp_for_display(value: f64, range: (f64, f64)) -> f64 {
    value.clamp(range.0, range.1)
}

fn blend(a: RGBColor, b: RGBColor, t: f64) -> RGBColor {
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
    RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Diverging blue-white-red scale centred on the middle of `range`.
pub fn fitness_colour(value: f64, range: (f64, f64)) -> RGBColor {
    let (lo, hi) = range;
    let t = (clamp_for_display(value, range) - lo) / (hi - lo);
    if t <= 0.5 {
        blend(LOW_COLOUR, MID_COLOUR, t * 2.0)
    } else {
        blend(MID_COLOUR, HIGH_COLOUR, (t - 0.5) * 2.0)
    }
}

/// One heatmap tile: `column` indexes conditions, `row` the leaf order.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapCell {
    pub row: usize,
    pub column: usize,
    pub value: f64,
    pub display: f64,
}

pub fn heatmap_cells(order: &ClusterOrder, range: (f64, f64)) -> Vec<HeatmapCell> {
    order
        .row_order()
        .into_iter()
        .enumerate()
        .flat_map(move |(row, matrix_row)| {
            order.matrix.rows[matrix_row]
                .values
                .iter()
                .enumerate()
                .filter_map(move |(column, v)| {
                    v.map(|value| HeatmapCell {
                        row,
                        column,
                        value,
                        display: clamp_for_display(value, range),
                    })
                })
        })
        .collect()
}

/// Equal-width bins over the observed range as (start, end, count).
pub fn histogram_bins(values: &[f64], bins: usize) -> Vec<(f64, f64, usize)> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = finite.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = finite.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };

    let mut counts = vec![0usize; bins];
    for v in &finite {
        let idx = (((v - min) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| {
            let start = min + i as f64 * width;
            (start, start + width, count)
        })
        .collect()
}

fn tick_label(labels: &[String], val: f64) -> String {
    let idx = val.round();
    if (val - idx).abs() > 1e-6 || idx < 0.0 {
        return String::new();
    }
    labels.get(idx as usize).cloned().unwrap_or_default()
}

/// One fitness histogram per condition of `wide`, laid out in a grid. Null
/// cells are left out.
pub fn fitness_histograms(wide: &WideMatrix, path: &Path) -> PipelineResult<()> {
    let cells = wide.to_long();
    let mut conditions: Vec<&str> = Vec::new();
    for cell in &cells {
        if !conditions.contains(&cell.condition.as_str()) {
            conditions.push(cell.condition.as_str());
        }
    }
    if conditions.is_empty() {
        warn!("No fitness values, skipping {}", path.display());
        return Ok(());
    }
    prepare(path)?;

    let cols = conditions.len().min(3);
    let grid_rows = conditions.len().div_ceil(cols);
    let root = BitMapBackend::new(path, (400 * cols as u32, 300 * grid_rows as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| figure_err(path, e))?;

    for (area, condition) in root.split_evenly((grid_rows, cols)).iter().zip(&conditions) {
        let values: Vec<f64> = cells
            .iter()
            .filter(|c| c.condition == *condition)
            .map(|c| c.value)
            .collect();
        let bins = histogram_bins(&values, HISTOGRAM_BINS);
        let (Some(first), Some(last)) = (bins.first(), bins.last()) else {
            continue;
        };
        let max_count = bins.iter().map(|b| b.2).max().unwrap_or(1).max(1);

        let mut chart = ChartBuilder::on(area)
            .caption(*condition, ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d(first.0..last.1, 0f64..max_count as f64)
            .map_err(|e| figure_err(path, e))?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("Fitness")
            .y_desc("Genes")
            .draw()
            .map_err(|e| figure_err(path, e))?;
        chart
            .draw_series(bins.iter().map(|&(x0, x1, count)| {
                Rectangle::new([(x0, 0.0), (x1, count as f64)], LOW_COLOUR.mix(0.7).filled())
            }))
            .map_err(|e| figure_err(path, e))?;
    }

    root.present().map_err(|e| figure_err(path, e))?;
    info!("Histograms saved to {}", path.display());
    Ok(())
}

/// Genes (rows, dendrogram order) × conditions heatmap.
pub fn clustered_heatmap(order: &ClusterOrder, title: &str, range: (f64, f64), path: &Path) -> PipelineResult<()> {
    let n_genes = order.labels.len();
    let n_conditions = order.matrix.conditions.len();
    if n_genes == 0 || n_conditions == 0 {
        warn!("Nothing to draw for {}", title);
        return Ok(());
    }
    prepare(path)?;

    let height = (200 + 18 * n_genes as u32).max(400);
    let width = (250 + 60 * n_conditions as u32).max(500);
    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| figure_err(path, e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(120)
        .build_cartesian_2d(-0.5..n_conditions as f64 - 0.5, -0.5..n_genes as f64 - 0.5)
        .map_err(|e| figure_err(path, e))?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n_conditions)
        .y_labels(n_genes)
        .x_label_formatter(&|v: &f64| tick_label(&order.matrix.conditions, *v))
        .y_label_formatter(&|v: &f64| tick_label(&order.labels, *v))
        .draw()
        .map_err(|e| figure_err(path, e))?;

    chart
        .draw_series(heatmap_cells(order, range).into_iter().map(|cell| {
            let (x, y) = (cell.column as f64, cell.row as f64);
            Rectangle::new(
                [(x - 0.5, y - 0.5), (x + 0.5, y + 0.5)],
                fitness_colour(cell.display, range).filled(),
            )
        }))
        .map_err(|e| figure_err(path, e))?;

    root.present().map_err(|e| figure_err(path, e))?;
    info!("Heatmap saved to {}", path.display());
    Ok(())
}

/// Same layout as the heatmap, with dot size growing with |fitness|.
pub fn dot_plot(order: &ClusterOrder, title: &str, range: (f64, f64), path: &Path) -> PipelineResult<()> {
    let n_genes = order.labels.len();
    let n_conditions = order.matrix.conditions.len();
    if n_genes == 0 || n_conditions == 0 {
        warn!("Nothing to draw for {}", title);
        return Ok(());
    }
    prepare(path)?;

    let height = (200 + 22 * n_genes as u32).max(400);
    let width = (250 + 60 * n_conditions as u32).max(500);
    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| figure_err(path, e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(120)
        .build_cartesian_2d(-0.5..n_conditions as f64 - 0.5, -0.5..n_genes as f64 - 0.5)
        .map_err(|e| figure_err(path, e))?;
    chart
        .configure_mesh()
        .x_labels(n_conditions)
        .y_labels(n_genes)
        .x_label_formatter(&|v: &f64| tick_label(&order.matrix.conditions, *v))
        .y_label_formatter(&|v: &f64| tick_label(&order.labels, *v))
        .draw()
        .map_err(|e| figure_err(path, e))?;

    let max_abs = range.0.abs().max(range.1.abs()).max(f64::EPSILON);
    chart
        .draw_series(heatmap_cells(order, range).into_iter().map(|cell| {
            let radius = 2 + (8.0 * cell.display.abs() / max_abs).round() as i32;
            Circle::new(
                (cell.column as f64, cell.row as f64),
                radius,
                fitness_colour(cell.display, range).filled(),
            )
        }))
        .map_err(|e| figure_err(path, e))?;

    root.present().map_err(|e| figure_err(path, e))?;
    info!("Dot plot saved to {}", path.display());
    Ok(())
}

/// Control fitness against one supplemented condition, shifted genes in red.
pub fn condition_scatter(
    wide: &WideMatrix,
    control: &str,
    condition: &str,
    shifts: &[ConditionShift],
    path: &Path,
) -> PipelineResult<()> {
    let (Some(cx), Some(cy)) = (wide.condition_index(control), wide.condition_index(condition)) else {
        warn!("{} or {} missing from the wide table", control, condition);
        return Ok(());
    };
    let points: Vec<(String, f64, f64)> = wide
        .rows
        .iter()
        .enumerate()
        .filter_map(|(r, row)| Some((wide.row_label(r), row.values[cx]?, row.values[cy]?)))
        .collect();
    if points.is_empty() {
        return Ok(());
    }
    prepare(path)?;

    let lo = points.iter().map(|p| p.1.min(p.2)).fold(f64::INFINITY, f64::min) - 0.5;
    let hi = points.iter().map(|p| p.1.max(p.2)).fold(f64::NEG_INFINITY, f64::max) + 0.5;

    let root = BitMapBackend::new(path, (700, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| figure_err(path, e))?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{} vs {}", condition, control), ("sans-serif", 20))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(lo..hi, lo..hi)
        .map_err(|e| figure_err(path, e))?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc(format!("Fitness ({})", control))
        .y_desc(format!("Fitness ({})", condition))
        .draw()
        .map_err(|e| figure_err(path, e))?;

    chart
        .draw_series(LineSeries::new(vec![(lo, lo), (hi, hi)], BLACK.mix(0.4)))
        .map_err(|e| figure_err(path, e))?;

    let shifted = |gene: &str| shifts.iter().any(|s| s.condition == condition && s.gene == gene);
    chart
        .draw_series(
            points
                .iter()
                .filter(|p| !shifted(&p.0))
                .map(|p| Circle::new((p.1, p.2), 3, LOW_COLOUR.mix(0.6).filled())),
        )
        .map_err(|e| figure_err(path, e))?;
    for (gene, x, y) in points.iter().filter(|p| shifted(&p.0)) {
        chart
            .draw_series(std::iter::once(Circle::new((*x, *y), 4, HIGH_COLOUR.filled())))
            .map_err(|e| figure_err(path, e))?;
        chart
            .draw_series(std::iter::once(Text::new(
                gene.clone(),
                (*x + 0.05, *y),
                ("sans-serif", 12).into_font().color(&BLACK),
            )))
            .map_err(|e| figure_err(path, e))?;
    }

    root.present().map_err(|e| figure_err(path, e))?;
    info!("Scatter saved to {}", path.display());
    Ok(())
}

use anyhow::{anyhow, Result};
use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::aggregate::{metric_series, MetricSeries};
use crate::layout::PolicyResults;
use crate::metrics::Metric;
use crate::reader::{ConfusionTable, PolicyViews, SensorRecord};
use crate::schema::{
    ConfusionSource, SchemaResult, FN_COLUMN, FP_COLUMN, TN_COLUMN, TP_COLUMN, UNKNOWN_COLUMN,
};

/// 5.5 x 3.75 inches at 200 dpi.
const SWEEP_FIGURE_SIZE: (u32, u32) = (1100, 750);
const FIGURE_SIZE: (u32, u32) = (1024, 768);
const VIEW_FIGURE_SIZE: (u32, u32) = (1024, 1024);

pub const RAW_CONFUSION_FILE: &str = "raw_confusion.png";
pub const ACC_PRE_FILE: &str = "acc_pre.png";
pub const VIEWS_FILE: &str = "views.png";
pub const SENSOR_RECORDS_FILE: &str = "sensor_records.png";

const WIREFRAME: RGBColor = RGBColor(255, 127, 14);
const ORIGIN_LINEWIDTH: u32 = 5;
const VIEW_Z_LINEWIDTH: u32 = 3;
const VIEW_XY_LINEWIDTH: u32 = 2;
const WIREFRAME_LINEWIDTH: u32 = 4;
const VIEW_XY_SCALE: f64 = 0.25;
const VIEW_Z_SCALE: f64 = 0.5;

type P3 = (f64, f64, f64);

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| anyhow!("cannot create figure directory {}: {}", parent.display(), e))?;
    }
    Ok(())
}

/// Where a figure goes when no save location was given: next to the file it
/// was read from.
pub fn default_figure_path(result_file: &Path, name: &str) -> PathBuf {
    result_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(name)
}

fn finite_max(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.filter(|v| v.is_finite()).reduce(f64::max)
}

// ---------------------------------------------------------------- sweep figures

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetLine {
    pub label: String,
    pub series: MetricSeries,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFigure {
    pub source: ConfusionSource,
    pub lines: Vec<BudgetLine>,
}

pub fn sweep_figure_path(
    figures_root: &Path,
    policy: &PolicyResults,
    source: ConfusionSource,
    metric: Metric,
) -> PathBuf {
    figures_root
        .join(&policy.scene)
        .join(source.label())
        .join(format!("{}_{}_Results.jpeg", policy.policy, metric.file_label()))
}

/// One figure per confusion source, one line per view budget. `load` reads a
/// confusion table from one repetition's result file.
pub fn policy_sweep_figures<F>(
    policy: &PolicyResults,
    metric: Metric,
    mut load: F,
) -> Result<Vec<SourceFigure>>
where
    F: FnMut(&Path, ConfusionSource) -> SchemaResult<ConfusionTable>,
{
    let mut figures: Vec<SourceFigure> = ConfusionSource::SWEEP
        .iter()
        .map(|&source| SourceFigure {
            source,
            lines: Vec::new(),
        })
        .collect();
    for budget in &policy.budgets {
        if budget.runs.is_empty() {
            warn!(dir = %budget.dir.display(), "no results for view budget, skipping");
            continue;
        }
        let mut label = format!("{} Views", budget.n_views);
        if budget.runs.len() > 1 {
            label.push_str(" (Average)");
        }
        for figure in figures.iter_mut() {
            let source = figure.source;
            let tables = budget
                .runs
                .iter()
                .map(|run| load(run, source).map_err(|e| anyhow!("{}: {}", run.display(), e)))
                .collect::<Result<Vec<_>>>()?;
            figure.lines.push(BudgetLine {
                label: label.clone(),
                series: metric_series(&tables, metric),
            });
        }
    }
    Ok(figures)
}

pub fn render_policy_sweep<F>(
    policy: &PolicyResults,
    figures_root: &Path,
    metric: Metric,
    load: F,
) -> Result<Vec<PathBuf>>
where
    F: FnMut(&Path, ConfusionSource) -> SchemaResult<ConfusionTable>,
{
    let mut written = Vec::new();
    for figure in policy_sweep_figures(policy, metric, load)? {
        let path = sweep_figure_path(figures_root, policy, figure.source, metric);
        ensure_parent(&path)?;
        draw_sweep_figure(&path, metric, &figure.lines)?;
        info!(figure = %path.display(), "saved figure");
        written.push(path);
    }
    Ok(written)
}

fn draw_sweep_figure(path: &Path, metric: Metric, lines: &[BudgetLine]) -> Result<()> {
    let x_max = finite_max(lines.iter().flat_map(|l| l.series.steps.iter().copied())).unwrap_or(1.0);
    let y_max = if metric.is_ratio() {
        1.1
    } else {
        finite_max(lines.iter().flat_map(|l| l.series.stats.iter().map(|s| s.max))).unwrap_or(1.0) * 1.1
    };

    let root = BitMapBackend::new(path, SWEEP_FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Reconstruction {}", metric), ("sans-serif", 28))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..x_max.max(1.0), 0.0..y_max.max(f64::EPSILON))?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("Views Added")
        .draw()?;

    for (i, line) in lines.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        let points: Vec<_> = line
            .series
            .steps
            .iter()
            .zip(&line.series.stats)
            .filter(|(_, s)| s.mean.is_finite())
            .map(|(x, s)| (*x, *s))
            .collect();

        if line.series.is_averaged() {
            let mut band: Vec<(f64, f64)> = points.iter().map(|(x, s)| (*x, s.max)).collect();
            band.extend(points.iter().rev().map(|(x, s)| (*x, s.min)));
            chart.draw_series(std::iter::once(Polygon::new(band, color.mix(0.2).filled())))?;
            chart.draw_series(points.iter().map(|(x, s)| {
                ErrorBar::new_vertical(*x, s.mean - s.std, s.mean, s.mean + s.std, color.stroke_width(1), 9)
            }))?;
        }
        chart
            .draw_series(LineSeries::new(
                points.iter().map(|(x, s)| (*x, s.mean)),
                color.stroke_width(2),
            ))?
            .label(line.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

// ------------------------------------------------------------ confusion figures

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionPlotOptions {
    pub raw: bool,
    pub unknown: bool,
}

type NamedLine = (String, Vec<(f64, f64)>);

pub fn raw_confusion_lines(table: &ConfusionTable, unknown: bool) -> Result<Vec<NamedLine>> {
    let mut lines = vec![
        (table.column_label(TP_COLUMN), table.rows.iter().map(|r| (r.step, r.counts.tp)).collect()),
        (table.column_label(TN_COLUMN), table.rows.iter().map(|r| (r.step, r.counts.tn)).collect()),
        (table.column_label(FP_COLUMN), table.rows.iter().map(|r| (r.step, r.counts.fp)).collect()),
        (table.column_label(FN_COLUMN), table.rows.iter().map(|r| (r.step, r.counts.fn_)).collect()),
    ];
    if unknown {
        if !table.has_unknown() {
            return Err(anyhow!("confusion data has no unknown column"));
        }
        lines.push((
            table.column_label(UNKNOWN_COLUMN),
            table
                .rows
                .iter()
                .filter_map(|r| r.unknown.map(|u| (r.step, u)))
                .collect(),
        ));
    }
    Ok(lines)
}

pub fn accuracy_precision_lines(table: &ConfusionTable) -> Vec<NamedLine> {
    [Metric::Accuracy, Metric::Precision]
        .iter()
        .map(|metric| {
            let name = if *metric == Metric::Accuracy { "Accuracy" } else { "Precision" };
            let points = table
                .rows
                .iter()
                .map(|r| (r.step, metric.evaluate(&r.counts)))
                .filter(|(_, v)| v.is_finite())
                .collect();
            (name.to_string(), points)
        })
        .collect()
}

fn draw_lines_figure(path: &Path, title: &str, y_desc: &str, lines: &[NamedLine]) -> Result<()> {
    let all = || lines.iter().flat_map(|(_, pts)| pts.iter());
    let x_min = all().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let x_max = finite_max(all().map(|p| p.0)).unwrap_or(1.0);
    let y_max = finite_max(all().map(|p| p.1)).unwrap_or(1.0) * 1.05;
    let x_min = if x_min.is_finite() && x_min < x_max { x_min } else { 0.0 };

    let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d(x_min..x_max.max(x_min + 1.0), 0.0..y_max.max(f64::EPSILON))?;
    chart
        .configure_mesh()
        .x_desc("Views Added")
        .y_desc(y_desc)
        .draw()?;
    for (i, (label, points)) in lines.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?
            .label(label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Writes `raw_confusion.png` (when asked) and `acc_pre.png` into `save_dir`.
pub fn render_confusion(
    table: &ConfusionTable,
    save_dir: &Path,
    options: ConfusionPlotOptions,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(save_dir)
        .map_err(|e| anyhow!("cannot create {}: {}", save_dir.display(), e))?;
    let mut written = Vec::new();
    if options.raw {
        let path = save_dir.join(RAW_CONFUSION_FILE);
        let lines = raw_confusion_lines(table, options.unknown)?;
        draw_lines_figure(&path, "Raw Confusion Values", "Voxel Count", &lines)?;
        info!(figure = %path.display(), "saved figure");
        written.push(path);
    }
    let path = save_dir.join(ACC_PRE_FILE);
    draw_lines_figure(
        &path,
        "Reconstruction Accuracy and Precision",
        "",
        &accuracy_precision_lines(table),
    )?;
    info!(figure = %path.display(), "saved figure");
    written.push(path);
    Ok(written)
}

// ----------------------------------------------------------------- 3D figures

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewPlotOptions {
    pub plot_rejects: bool,
    pub no_id: bool,
    pub only_z: bool,
}

/// The four faces of the grid box drawn as closed outlines.
pub fn grid_wireframe(upper: [f64; 3]) -> Vec<Vec<P3>> {
    let [ux, uy, uz] = upper;
    vec![
        vec![(0.0, 0.0, 0.0), (ux, 0.0, 0.0), (ux, uy, 0.0), (0.0, uy, 0.0), (0.0, 0.0, 0.0)],
        vec![(0.0, 0.0, 0.0), (0.0, uy, 0.0), (0.0, uy, uz), (0.0, 0.0, uz), (0.0, 0.0, 0.0)],
        vec![(0.0, 0.0, uz), (ux, 0.0, uz), (ux, uy, uz), (0.0, uy, uz), (0.0, 0.0, uz)],
        vec![(ux, 0.0, 0.0), (ux, uy, 0.0), (ux, uy, uz), (ux, 0.0, uz), (ux, 0.0, 0.0)],
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewGlyph {
    pub accepted: bool,
    pub origin: P3,
    pub z_tip: P3,
    pub xy_tips: Option<(P3, P3)>,
    pub label: Option<(String, P3)>,
}

fn add(a: P3, b: P3) -> P3 {
    (a.0 + b.0, a.1 + b.1, a.2 + b.2)
}

fn scale(a: P3, s: f64) -> P3 {
    (a.0 * s, a.1 * s, a.2 * s)
}

fn norm(a: P3) -> f64 {
    (a.0 * a.0 + a.1 * a.1 + a.2 * a.2).sqrt()
}

pub fn view_glyphs(policies: &[PolicyViews], options: ViewPlotOptions) -> Vec<ViewGlyph> {
    let mut glyphs = Vec::new();
    for view in policies.iter().flat_map(|p| &p.views) {
        if !view.accepted && !options.plot_rejects {
            continue;
        }
        let column = |c: usize| (view.pose[[0, c]], view.pose[[1, c]], view.pose[[2, c]]);
        let x_axis = scale(column(0), VIEW_XY_SCALE);
        let y_axis = scale(column(1), VIEW_XY_SCALE);
        let z_axis = scale(column(2), VIEW_Z_SCALE);
        let origin = column(3);

        let label = if options.no_id {
            None
        } else {
            let sum = add(add(x_axis, y_axis), z_axis);
            let n = norm(sum);
            let offset = if n > 0.0 { scale(sum, -0.1 / n) } else { (0.0, 0.0, 0.0) };
            Some((view.id.clone(), add(origin, offset)))
        };
        glyphs.push(ViewGlyph {
            accepted: view.accepted,
            origin,
            z_tip: add(origin, z_axis),
            xy_tips: if options.only_z {
                None
            } else {
                Some((add(origin, x_axis), add(origin, y_axis)))
            },
            label,
        });
    }
    glyphs
}

pub fn render_views(
    grid: [f64; 3],
    policies: &[PolicyViews],
    options: ViewPlotOptions,
    out: &Path,
) -> Result<PathBuf> {
    ensure_parent(out)?;
    let limit = grid.iter().copied().fold(0.0, f64::max) + 1.0;
    let root = BitMapBackend::new(out, VIEW_FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Reconstruction Views", ("sans-serif", 28))
        .margin(20)
        .build_cartesian_3d(-1.0..limit, -1.0..limit, -1.0..limit)?;
    chart.with_projection(|mut pb| {
        pb.yaw = 0.6;
        pb.pitch = 0.4;
        pb.scale = 0.85;
        pb.into_matrix()
    });
    chart.configure_axes().draw()?;

    let origin = (0.0, 0.0, 0.0);
    for (tip, color) in [((1.0, 0.0, 0.0), RED), ((0.0, 1.0, 0.0), GREEN), ((0.0, 0.0, 1.0), BLUE)] {
        chart.draw_series(LineSeries::new(vec![origin, tip], color.stroke_width(ORIGIN_LINEWIDTH)))?;
    }
    let center = (grid[0] / 2.0, grid[1] / 2.0, grid[2] / 2.0);
    chart.draw_series(std::iter::once(Cross::new(center, 6, WIREFRAME.stroke_width(2))))?;
    for side in grid_wireframe(grid) {
        chart.draw_series(LineSeries::new(side, WIREFRAME.stroke_width(WIREFRAME_LINEWIDTH)))?;
    }

    for glyph in view_glyphs(policies, options) {
        let marker = if glyph.accepted { GREEN } else { RED };
        chart.draw_series(LineSeries::new(
            vec![glyph.origin, glyph.z_tip],
            BLUE.stroke_width(VIEW_Z_LINEWIDTH),
        ))?;
        chart.draw_series(std::iter::once(Circle::new(glyph.origin, 4, marker.filled())))?;
        if let Some((x_tip, y_tip)) = glyph.xy_tips {
            chart.draw_series(LineSeries::new(
                vec![glyph.origin, x_tip],
                RED.stroke_width(VIEW_XY_LINEWIDTH),
            ))?;
            chart.draw_series(LineSeries::new(
                vec![glyph.origin, y_tip],
                GREEN.stroke_width(VIEW_XY_LINEWIDTH),
            ))?;
        }
        if let Some((id, at)) = glyph.label {
            chart.draw_series(std::iter::once(Text::new(
                id,
                at,
                ("sans-serif", 22).into_font().color(&marker),
            )))?;
        }
    }
    root.present()?;
    info!(figure = %out.display(), "saved figure");
    Ok(out.to_path_buf())
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorArrow {
    pub index: usize,
    pub position: P3,
    /// Unit view direction.
    pub direction: P3,
    /// Position along the colour ramp, 0 for the first record and 1 for the last.
    pub ramp: f64,
}

pub fn sensor_arrows(records: &[SensorRecord]) -> Vec<SensorArrow> {
    let last = records.len().saturating_sub(1).max(1) as f64;
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let column = |c: usize| (record.pose[[0, c]], record.pose[[1, c]], record.pose[[2, c]]);
            let z = column(2);
            let n = norm(z);
            SensorArrow {
                index,
                position: column(3),
                direction: if n > 0.0 { scale(z, 1.0 / n) } else { z },
                ramp: index as f64 / last,
            }
        })
        .collect()
}

pub fn render_sensor_records(records: &[SensorRecord], out: &Path) -> Result<PathBuf> {
    if records.is_empty() {
        return Err(anyhow!("no sensor records to plot"));
    }
    ensure_parent(out)?;
    let arrows = sensor_arrows(records);
    let coords = || arrows.iter().flat_map(|a| [a.position.0, a.position.1, a.position.2]);
    let lo = coords().fold(f64::INFINITY, f64::min) - 1.5;
    let hi = coords().fold(f64::NEG_INFINITY, f64::max) + 1.5;

    let root = BitMapBackend::new(out, VIEW_FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Sensor Views", ("sans-serif", 28))
        .margin(20)
        .build_cartesian_3d(lo..hi, lo..hi, lo..hi)?;
    chart.with_projection(|mut pb| {
        pb.yaw = 0.6;
        pb.pitch = 0.4;
        pb.scale = 0.85;
        pb.into_matrix()
    });
    chart.configure_axes().draw()?;

    for arrow in &arrows {
        let color = HSLColor(0.8 * arrow.ramp, 0.85, 0.45);
        chart.draw_series(LineSeries::new(
            vec![arrow.position, add(arrow.position, arrow.direction)],
            color.stroke_width(2),
        ))?;
        chart.draw_series(std::iter::once(Text::new(
            arrow.index.to_string(),
            arrow.position,
            ("sans-serif", 18).into_font().color(&color),
        )))?;
    }
    root.present()?;
    info!(figure = %out.display(), "saved figure");
    Ok(out.to_path_buf())
}

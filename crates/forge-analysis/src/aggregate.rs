use ndarray::{Array2, Axis};
use tracing::warn;

use crate::metrics::Metric;
use crate::reader::ConfusionTable;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepStats {
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Min or max that keeps a NaN instead of skipping it.
fn fold_nan(values: impl Iterator<Item = f64>, pick: fn(f64, f64) -> f64) -> f64 {
    values
        .reduce(|acc, v| if acc.is_nan() || v.is_nan() { f64::NAN } else { pick(acc, v) })
        .unwrap_or(f64::NAN)
}

/// Per-step statistics across repetitions. Each inner vector is one
/// repetition's series; series of unequal length are cut to the shortest.
pub fn aggregate(series: &[Vec<f64>]) -> Vec<StepStats> {
    let Some(steps) = series.iter().map(|s| s.len()).min() else {
        return Vec::new();
    };
    if series.iter().any(|s| s.len() != steps) {
        warn!(
            steps,
            repetitions = series.len(),
            "repetitions differ in length, truncating to the shortest"
        );
    }
    let reps = series.len();
    let table = Array2::from_shape_fn((steps, reps), |(step, rep)| series[rep][step]);

    let means = table.mean_axis(Axis(1));
    let stds = table.std_axis(Axis(1), 0.0);
    table
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(step, row)| StepStats {
            mean: means.as_ref().map(|m| m[step]).unwrap_or(f64::NAN),
            std: stds[step],
            min: fold_nan(row.iter().copied(), f64::min),
            max: fold_nan(row.iter().copied(), f64::max),
        })
        .collect()
}

/// One view budget's metric curve across its repetitions.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    pub steps: Vec<f64>,
    pub stats: Vec<StepStats>,
    pub repetitions: usize,
}

impl MetricSeries {
    pub fn is_averaged(&self) -> bool {
        self.repetitions > 1
    }
}

pub fn metric_series(tables: &[ConfusionTable], metric: Metric) -> MetricSeries {
    let values: Vec<Vec<f64>> = tables.iter().map(|t| t.metric_series(metric)).collect();
    let stats = aggregate(&values);
    let steps = tables
        .iter()
        .min_by_key(|t| t.rows.len())
        .map(|t| t.steps())
        .unwrap_or_default();
    MetricSeries {
        steps: steps.into_iter().take(stats.len()).collect(),
        stats,
        repetitions: tables.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Confusion;
    use crate::reader::ConfusionRow;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn population_statistics_per_step() {
        let stats = aggregate(&[vec![1.0, 10.0], vec![3.0, 10.0]]);
        assert_eq!(stats.len(), 2);
        assert!(close(stats[0].mean, 2.0));
        // Population std of {1, 3} is 1, sample std would be sqrt(2).
        assert!(close(stats[0].std, 1.0));
        assert_eq!((stats[0].min, stats[0].max), (1.0, 3.0));
        assert!(close(stats[1].std, 0.0));
    }

    #[test]
    fn single_repetition_has_zero_spread() {
        let stats = aggregate(&[vec![0.5, 0.7]]);
        assert_eq!(
            stats[1],
            StepStats {
                mean: 0.7,
                std: 0.0,
                min: 0.7,
                max: 0.7
            }
        );
    }

    #[test]
    fn unequal_lengths_truncate_to_shortest() {
        let stats = aggregate(&[vec![1.0, 2.0, 3.0], vec![1.0, 2.0]]);
        assert_eq!(stats.len(), 2);
        assert!(aggregate(&[]).is_empty());
    }

    #[test]
    fn nan_propagates_into_every_statistic() {
        let stats = aggregate(&[vec![f64::NAN], vec![1.0]]);
        assert!(stats[0].mean.is_nan());
        assert!(stats[0].min.is_nan());
        assert!(stats[0].max.is_nan());
    }

    #[test]
    fn metric_series_uses_step_column() {
        let table = |tp: f64| ConfusionTable {
            header: Vec::new(),
            rows: (1..=3)
                .map(|step| ConfusionRow {
                    step: step as f64,
                    counts: Confusion::new(tp, 10.0, 5.0, 5.0),
                    unknown: None,
                })
                .collect(),
        };
        let series = metric_series(&[table(80.0), table(80.0)], Metric::TruePositive);
        assert_eq!(series.steps, vec![1.0, 2.0, 3.0]);
        assert!(series.is_averaged());
        assert!(series.stats.iter().all(|s| s.mean == 80.0 && s.std == 0.0));
    }
}

//! Offline analysis of engine result files: typed reading, confusion
//! metrics, aggregation across repetitions and figure rendering.

pub mod aggregate;
pub mod layout;
pub mod metrics;
pub mod plot;
pub mod reader;
pub mod schema;
pub mod source;

pub use aggregate::{aggregate, metric_series, MetricSeries, StepStats};
pub use layout::{experiment_dirs, figures_root, select_experiment, PolicyResults, ResultsTree, ViewBudget};
pub use metrics::{Confusion, Metric, MetricParseError};
pub use plot::{
    render_confusion, render_policy_sweep, render_sensor_records, render_views, ConfusionPlotOptions,
    ViewPlotOptions,
};
pub use reader::{ConfusionRow, ConfusionTable, PolicyViews, ResultFile, SensorRecord, ViewPose};
pub use schema::{ConfusionSource, ResultSchemaError, SchemaResult};
#[cfg(feature = "hdf5")]
pub use source::Hdf5Source;
pub use source::{MemorySource, Member, NodeKind, ResultSource};

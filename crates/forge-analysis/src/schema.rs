//! Group, dataset and attribute names the engine writes into `results.h5`.
//!
//! Every lookup in [`crate::reader`] goes through these names so a file that
//! does not match fails with a [`ResultSchemaError`] naming the exact path.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResultSchemaError {
    #[error("missing group '{path}'")]
    MissingGroup { path: String },
    #[error("missing dataset '{path}'")]
    MissingDataset { path: String },
    #[error("missing attribute '{key}' on '{path}'")]
    MissingAttribute { path: String, key: String },
    #[error("'{path}' has shape {found:?}, expected {expected}")]
    ShapeMismatch {
        path: String,
        expected: String,
        found: Vec<usize>,
    },
    #[error("result file error: {0}")]
    Backend(String),
}

pub type SchemaResult<T> = std::result::Result<T, ResultSchemaError>;

pub const METRIC_GROUP: &str = "Metric";
pub const POLICY_GROUP: &str = "Policy";
pub const RECONSTRUCTION_GROUP: &str = "Reconstruction";
pub const SENSOR_RECORD_GROUP: &str = "Metrics/SensorRecord";

pub const DATA_DATASET: &str = "data";
pub const HEADER_ATTR: &str = "header";
pub const GRID_DIMENSIONS_ATTR: &str = "VoxelGrid Dimensions";
pub const ACCEPT_GROUP: &str = "ACCEPT";
pub const REJECT_GROUP: &str = "REJECT";

pub const POSE_ATTR: &str = "pose";
pub const TOTAL_FIRST_ATTR: &str = "total_first";
pub const TOTAL_VIEWS_ATTR: &str = "total_views";
pub const TOTAL_UPDATES_ATTR: &str = "total_updates";
pub const MAX_VARIANCE_UPDATE_ATTR: &str = "max_variance_update";

/// Confusion dataset columns.
pub const STEP_COLUMN: usize = 0;
pub const TP_COLUMN: usize = 1;
pub const TN_COLUMN: usize = 2;
pub const FP_COLUMN: usize = 3;
pub const FN_COLUMN: usize = 4;
pub const UNKNOWN_COLUMN: usize = 5;
pub const MIN_CONFUSION_COLUMNS: usize = 5;

pub const DEFAULT_CONFUSION_HEADER: [&str; 6] = [
    "Step",
    "True Positive",
    "True Negative",
    "False Positive",
    "False Negative",
    "Unknown",
];

pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Which occupancy reconstruction a confusion table was scored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfusionSource {
    Occupancy,
    Tsdf,
    Binary,
    Probability,
}

impl ConfusionSource {
    /// The three reconstructions compared in a policy sweep figure.
    pub const SWEEP: [ConfusionSource; 3] = [
        ConfusionSource::Tsdf,
        ConfusionSource::Binary,
        ConfusionSource::Probability,
    ];

    pub fn group_name(&self) -> &'static str {
        match self {
            ConfusionSource::Occupancy => "OccupancyConfusion",
            ConfusionSource::Tsdf => "OccupancyConfusion_TSDF",
            ConfusionSource::Binary => "OccupancyConfusion_binary",
            ConfusionSource::Probability => "OccupancyConfusion_probability",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfusionSource::Occupancy => "Occupancy",
            ConfusionSource::Tsdf => "TSDF",
            ConfusionSource::Binary => "Space Carving",
            ConfusionSource::Probability => "Occupation Probability",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfusionSource::Occupancy => "occupancy",
            ConfusionSource::Tsdf => "tsdf",
            ConfusionSource::Binary => "binary",
            ConfusionSource::Probability => "probability",
        }
    }

    pub fn dataset_path(&self) -> String {
        join_path(&join_path(METRIC_GROUP, self.group_name()), DATA_DATASET)
    }
}

impl fmt::Display for ConfusionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfusionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "occupancy" => Ok(ConfusionSource::Occupancy),
            "tsdf" => Ok(ConfusionSource::Tsdf),
            "binary" => Ok(ConfusionSource::Binary),
            "probability" => Ok(ConfusionSource::Probability),
            other => Err(format!(
                "invalid confusion source '{}', expected occupancy|tsdf|binary|probability",
                other
            )),
        }
    }
}

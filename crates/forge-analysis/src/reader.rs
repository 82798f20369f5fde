use ndarray::{Array2, ArrayView1};
use tracing::warn;

use crate::metrics::{Confusion, Metric};
use crate::schema::*;
use crate::source::{NodeKind, ResultSource};

#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionRow {
    pub step: f64,
    pub counts: Confusion,
    pub unknown: Option<f64>,
}

impl ConfusionRow {
    fn from_row(row: ArrayView1<'_, f64>) -> Self {
        Self {
            step: row[STEP_COLUMN],
            counts: Confusion::new(row[TP_COLUMN], row[TN_COLUMN], row[FP_COLUMN], row[FN_COLUMN]),
            unknown: row.get(UNKNOWN_COLUMN).copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionTable {
    pub header: Vec<String>,
    pub rows: Vec<ConfusionRow>,
}

impl ConfusionTable {
    pub fn steps(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.step).collect()
    }

    pub fn metric_series(&self, metric: Metric) -> Vec<f64> {
        self.rows.iter().map(|r| metric.evaluate(&r.counts)).collect()
    }

    pub fn has_unknown(&self) -> bool {
        self.rows.iter().all(|r| r.unknown.is_some()) && !self.rows.is_empty()
    }

    /// Column label from the file header, falling back to the standard names.
    pub fn column_label(&self, column: usize) -> String {
        self.header
            .get(column)
            .cloned()
            .or_else(|| DEFAULT_CONFUSION_HEADER.get(column).map(|s| s.to_string()))
            .unwrap_or_else(|| format!("column {}", column))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewPose {
    pub id: String,
    pub accepted: bool,
    /// Camera extrinsic; columns are the x, y, z axes and the origin.
    pub pose: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyViews {
    pub policy: String,
    pub views: Vec<ViewPose>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub id: String,
    pub pose: Array2<f64>,
    pub total_first: f64,
    pub total_views: f64,
    pub total_updates: f64,
    pub max_variance_update: f64,
}

/// Sorts numeric ids numerically and everything else after them by name.
fn sort_ids<T>(items: &mut [T], id: impl Fn(&T) -> &str) {
    items.sort_by(|a, b| {
        let (a, b) = (id(a), id(b));
        match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        }
    });
}

fn pose_4x4(path: &str, values: Vec<f64>) -> SchemaResult<Array2<f64>> {
    let found = values.len();
    Array2::from_shape_vec((4, 4), values).map_err(|_| ResultSchemaError::ShapeMismatch {
        path: path.to_string(),
        expected: "4x4 matrix".to_string(),
        found: vec![found],
    })
}

fn scalar_attr<S: ResultSource>(source: &S, path: &str, key: &str) -> SchemaResult<f64> {
    let values = source.attr_f64(path, key)?;
    match values.as_slice() {
        [value] => Ok(*value),
        _ => Err(ResultSchemaError::ShapeMismatch {
            path: format!("{}@{}", path, key),
            expected: "scalar".to_string(),
            found: vec![values.len()],
        }),
    }
}

/// Typed view over one engine result file.
pub struct ResultFile<S> {
    source: S,
}

#[cfg(feature = "hdf5")]
impl ResultFile<crate::source::Hdf5Source> {
    pub fn open(path: &std::path::Path) -> SchemaResult<Self> {
        Ok(Self::new(crate::source::Hdf5Source::open(path)?))
    }
}

impl<S: ResultSource> ResultFile<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Reads `Metric/<source group>/data`. A file without a `Metric` group
    /// is an error, never an empty table.
    pub fn confusion(&self, which: ConfusionSource) -> SchemaResult<ConfusionTable> {
        let path = which.dataset_path();
        let data = self.source.dataset_2d(&path)?;
        if data.ncols() < MIN_CONFUSION_COLUMNS {
            return Err(ResultSchemaError::ShapeMismatch {
                path,
                expected: format!("N x {}+ (step, TP, TN, FP, FN)", MIN_CONFUSION_COLUMNS),
                found: data.shape().to_vec(),
            });
        }
        // An unreadable header falls back to the default labels.
        let header = match self.source.attr_strings(&path, HEADER_ATTR) {
            Ok(header) => header,
            Err(ResultSchemaError::MissingAttribute { .. }) => Vec::new(),
            Err(e) => {
                warn!(path = %path, error = %e, "unreadable confusion header, using default labels");
                Vec::new()
            }
        };
        let rows = data.rows().into_iter().map(ConfusionRow::from_row).collect();
        Ok(ConfusionTable { header, rows })
    }

    /// Upper corner of the voxel grid in grid units.
    pub fn grid_dimensions(&self) -> SchemaResult<[f64; 3]> {
        let values = self
            .source
            .attr_f64(RECONSTRUCTION_GROUP, GRID_DIMENSIONS_ATTR)?;
        match values.as_slice() {
            [x, y, z] => Ok([*x, *y, *z]),
            _ => Err(ResultSchemaError::ShapeMismatch {
                path: format!("{}@{}", RECONSTRUCTION_GROUP, GRID_DIMENSIONS_ATTR),
                expected: "3 values".to_string(),
                found: vec![values.len()],
            }),
        }
    }

    /// Accepted and rejected views for every policy stored in the file.
    pub fn policy_views(&self) -> SchemaResult<Vec<PolicyViews>> {
        let mut out = Vec::new();
        for policy in self.source.members(POLICY_GROUP)? {
            if policy.kind != NodeKind::Group {
                continue;
            }
            let policy_path = join_path(POLICY_GROUP, &policy.name);
            let mut views = Vec::new();
            for group in self.source.members(&policy_path)? {
                let accepted = match group.name.as_str() {
                    ACCEPT_GROUP => true,
                    REJECT_GROUP => false,
                    _ => continue,
                };
                if group.kind != NodeKind::Group {
                    continue;
                }
                let group_path = join_path(&policy_path, &group.name);
                for view in self.source.members(&group_path)? {
                    if view.kind != NodeKind::Dataset {
                        continue;
                    }
                    let view_path = join_path(&group_path, &view.name);
                    let pose = self.source.dataset_2d(&view_path)?;
                    if pose.shape() != [4, 4] {
                        return Err(ResultSchemaError::ShapeMismatch {
                            path: view_path,
                            expected: "4x4 matrix".to_string(),
                            found: pose.shape().to_vec(),
                        });
                    }
                    views.push(ViewPose {
                        id: view.name,
                        accepted,
                        pose,
                    });
                }
            }
            sort_ids(&mut views, |v| v.id.as_str());
            out.push(PolicyViews {
                policy: policy.name,
                views,
            });
        }
        Ok(out)
    }

    /// Sensor records in id order. Poses are stored transposed and are
    /// returned in camera-to-world form.
    pub fn sensor_records(&self) -> SchemaResult<Vec<SensorRecord>> {
        let mut records = Vec::new();
        for member in self.source.members(SENSOR_RECORD_GROUP)? {
            let path = join_path(SENSOR_RECORD_GROUP, &member.name);
            let stored = pose_4x4(&path, self.source.attr_f64(&path, POSE_ATTR)?)?;
            records.push(SensorRecord {
                pose: stored.reversed_axes().as_standard_layout().to_owned(),
                total_first: scalar_attr(&self.source, &path, TOTAL_FIRST_ATTR)?,
                total_views: scalar_attr(&self.source, &path, TOTAL_VIEWS_ATTR)?,
                total_updates: scalar_attr(&self.source, &path, TOTAL_UPDATES_ATTR)?,
                max_variance_update: scalar_attr(&self.source, &path, MAX_VARIANCE_UPDATE_ATTR)?,
                id: member.name,
            });
        }
        sort_ids(&mut records, |r| r.id.as_str());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use ndarray::{array, Array2};

    fn confusion_data() -> Array2<f64> {
        array![
            [1.0, 80.0, 10.0, 5.0, 5.0, 900.0],
            [2.0, 90.0, 12.0, 2.0, 1.0, 895.0],
        ]
    }

    fn identity_at(x: f64, y: f64, z: f64) -> Array2<f64> {
        array![
            [1.0, 0.0, 0.0, x],
            [0.0, 1.0, 0.0, y],
            [0.0, 0.0, 1.0, z],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    #[test]
    fn missing_metric_group_is_a_lookup_error() {
        let mut source = MemorySource::new();
        source.add_group("Reconstruction");
        let file = ResultFile::new(source);
        let err = file.confusion(ConfusionSource::Tsdf).expect_err("no Metric group");
        assert_eq!(
            err,
            ResultSchemaError::MissingGroup {
                path: "Metric".to_string()
            }
        );
    }

    #[test]
    fn confusion_rows_and_header() {
        let mut source = MemorySource::new();
        let path = ConfusionSource::Occupancy.dataset_path();
        source.add_dataset(&path, confusion_data()).set_attr_strings(
            &path,
            HEADER_ATTR,
            &["Step", "TP", "TN", "FP", "FN", "Unknown"],
        );
        let table = ResultFile::new(source)
            .confusion(ConfusionSource::Occupancy)
            .expect("table");
        assert_eq!(table.steps(), vec![1.0, 2.0]);
        assert_eq!(table.rows[0].counts, Confusion::new(80.0, 10.0, 5.0, 5.0));
        assert_eq!(table.rows[1].unknown, Some(895.0));
        assert!(table.has_unknown());
        assert_eq!(table.column_label(TP_COLUMN), "TP");
        let accuracy = table.metric_series(Metric::Accuracy);
        assert!((accuracy[0] - 0.9).abs() < 1e-9);
    }

    #[test]
    fn header_falls_back_to_standard_names() {
        let mut source = MemorySource::new();
        source.add_dataset(
            &ConfusionSource::Binary.dataset_path(),
            array![[1.0, 1.0, 1.0, 1.0, 1.0]],
        );
        let table = ResultFile::new(source)
            .confusion(ConfusionSource::Binary)
            .expect("table");
        assert!(table.header.is_empty());
        assert!(!table.has_unknown());
        assert_eq!(table.column_label(FN_COLUMN), "False Negative");
    }

    #[test]
    fn undecodable_header_falls_back_to_standard_names() {
        let mut source = MemorySource::new();
        let path = ConfusionSource::Probability.dataset_path();
        source
            .add_dataset(&path, confusion_data())
            .set_attr_f64(&path, HEADER_ATTR, vec![0.0, 1.0]);
        let table = ResultFile::new(source)
            .confusion(ConfusionSource::Probability)
            .expect("numeric header is not fatal");
        assert!(table.header.is_empty());
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.column_label(UNKNOWN_COLUMN), "Unknown");
    }

    #[test]
    fn narrow_confusion_data_is_a_shape_error() {
        let mut source = MemorySource::new();
        source.add_dataset(
            &ConfusionSource::Tsdf.dataset_path(),
            array![[1.0, 2.0, 3.0]],
        );
        let err = ResultFile::new(source)
            .confusion(ConfusionSource::Tsdf)
            .expect_err("three columns");
        match err {
            ResultSchemaError::ShapeMismatch { found, .. } => assert_eq!(found, vec![1, 3]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn grid_dimensions_need_three_values() {
        let mut source = MemorySource::new();
        source
            .add_group(RECONSTRUCTION_GROUP)
            .set_attr_f64(RECONSTRUCTION_GROUP, GRID_DIMENSIONS_ATTR, vec![100.0, 100.0, 50.0]);
        let file = ResultFile::new(source.clone());
        assert_eq!(file.grid_dimensions().expect("dims"), [100.0, 100.0, 50.0]);

        source.set_attr_f64(RECONSTRUCTION_GROUP, GRID_DIMENSIONS_ATTR, vec![1.0]);
        assert!(matches!(
            ResultFile::new(source).grid_dimensions(),
            Err(ResultSchemaError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn policy_views_sorted_numerically() {
        let mut source = MemorySource::new();
        for id in ["10", "2", "1"] {
            source.add_dataset(
                &format!("Policy/Sphere/ACCEPT/{}", id),
                identity_at(id.parse().expect("id"), 0.0, 0.0),
            );
        }
        source.add_dataset("Policy/Sphere/REJECT/3", identity_at(0.0, 3.0, 0.0));
        source.add_dataset("Policy/Sphere/notes", Array2::zeros((1, 1)));

        let policies = ResultFile::new(source).policy_views().expect("views");
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].policy, "Sphere");
        let ids: Vec<_> = policies[0].views.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "10"]);
        assert!(!policies[0].views[2].accepted);
        assert_eq!(policies[0].views[3].pose[[0, 3]], 10.0);
    }

    #[test]
    fn view_pose_must_be_4x4() {
        let mut source = MemorySource::new();
        source.add_dataset("Policy/Sphere/ACCEPT/0", Array2::zeros((3, 4)));
        let err = ResultFile::new(source).policy_views().expect_err("3x4");
        assert!(err.to_string().contains("Policy/Sphere/ACCEPT/0"), "{}", err);
    }

    #[test]
    fn sensor_record_pose_is_transposed_back() {
        let mut source = MemorySource::new();
        let path = "Metrics/SensorRecord/0";
        // Stored transposed: translation lands in the last row.
        let stored = identity_at(1.0, 2.0, 3.0).reversed_axes();
        source
            .add_group(path)
            .set_attr_f64(path, POSE_ATTR, stored.iter().copied().collect())
            .set_attr_f64(path, TOTAL_FIRST_ATTR, vec![12.0])
            .set_attr_f64(path, TOTAL_VIEWS_ATTR, vec![40.0])
            .set_attr_f64(path, TOTAL_UPDATES_ATTR, vec![52.0])
            .set_attr_f64(path, MAX_VARIANCE_UPDATE_ATTR, vec![0.25]);
        let records = ResultFile::new(source).sensor_records().expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pose, identity_at(1.0, 2.0, 3.0));
        assert_eq!(records[0].total_updates, 52.0);
        assert_eq!(records[0].max_variance_update, 0.25);
    }

    #[test]
    fn sensor_record_missing_attribute_names_key() {
        let mut source = MemorySource::new();
        let path = "Metrics/SensorRecord/0";
        source
            .add_group(path)
            .set_attr_f64(path, POSE_ATTR, vec![0.0; 16]);
        let err = ResultFile::new(source).sensor_records().expect_err("no totals");
        assert_eq!(
            err,
            ResultSchemaError::MissingAttribute {
                path: path.to_string(),
                key: TOTAL_FIRST_ATTR.to_string()
            }
        );
    }
}

use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};

use crate::schema::{ResultSchemaError, SchemaResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Dataset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub kind: NodeKind,
}

/// Read-only access to a hierarchical result container. Paths are
/// `/`-separated and relative to the file root; `""` is the root group.
pub trait ResultSource {
    fn dataset_2d(&self, path: &str) -> SchemaResult<Array2<f64>>;
    /// Numeric attribute flattened in row-major order.
    fn attr_f64(&self, path: &str, key: &str) -> SchemaResult<Vec<f64>>;
    fn attr_strings(&self, path: &str, key: &str) -> SchemaResult<Vec<String>>;
    /// Direct children of a group, ordered by name.
    fn members(&self, path: &str) -> SchemaResult<Vec<Member>>;
}

/// Every proper ancestor of `path`: `a/b/c` gives `a`, `a/b`.
fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/').map(|(i, _)| &path[..i]).collect()
}

fn parent_of(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

#[derive(Debug, Clone, PartialEq)]
enum AttrValue {
    Numbers(Vec<f64>),
    Strings(Vec<String>),
}

/// An in-memory result tree. Parent groups are created implicitly.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    groups: BTreeSet<String>,
    datasets: BTreeMap<String, Array2<f64>>,
    attrs: BTreeMap<(String, String), AttrValue>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_parents(&mut self, path: &str) {
        for ancestor in ancestors(path) {
            self.groups.insert(ancestor.to_string());
        }
    }

    pub fn add_group(&mut self, path: &str) -> &mut Self {
        self.add_parents(path);
        self.groups.insert(path.to_string());
        self
    }

    pub fn add_dataset(&mut self, path: &str, data: Array2<f64>) -> &mut Self {
        self.add_parents(path);
        self.datasets.insert(path.to_string(), data);
        self
    }

    pub fn set_attr_f64(&mut self, path: &str, key: &str, values: Vec<f64>) -> &mut Self {
        self.attrs
            .insert((path.to_string(), key.to_string()), AttrValue::Numbers(values));
        self
    }

    pub fn set_attr_strings(&mut self, path: &str, key: &str, values: &[&str]) -> &mut Self {
        self.attrs.insert(
            (path.to_string(), key.to_string()),
            AttrValue::Strings(values.iter().map(|s| s.to_string()).collect()),
        );
        self
    }

    fn require_parents(&self, path: &str) -> SchemaResult<()> {
        for ancestor in ancestors(path) {
            if !self.groups.contains(ancestor) {
                return Err(ResultSchemaError::MissingGroup {
                    path: ancestor.to_string(),
                });
            }
        }
        Ok(())
    }

    fn attr(&self, path: &str, key: &str) -> SchemaResult<&AttrValue> {
        self.require_parents(path)?;
        let exists = path.is_empty() || self.groups.contains(path) || self.datasets.contains_key(path);
        if !exists {
            return Err(ResultSchemaError::MissingGroup {
                path: path.to_string(),
            });
        }
        self.attrs
            .get(&(path.to_string(), key.to_string()))
            .ok_or_else(|| ResultSchemaError::MissingAttribute {
                path: path.to_string(),
                key: key.to_string(),
            })
    }
}

impl ResultSource for MemorySource {
    fn dataset_2d(&self, path: &str) -> SchemaResult<Array2<f64>> {
        self.require_parents(path)?;
        self.datasets
            .get(path)
            .cloned()
            .ok_or_else(|| ResultSchemaError::MissingDataset {
                path: path.to_string(),
            })
    }

    fn attr_f64(&self, path: &str, key: &str) -> SchemaResult<Vec<f64>> {
        match self.attr(path, key)? {
            AttrValue::Numbers(values) => Ok(values.clone()),
            AttrValue::Strings(_) => Err(ResultSchemaError::Backend(format!(
                "attribute '{}' on '{}' is not numeric",
                key, path
            ))),
        }
    }

    fn attr_strings(&self, path: &str, key: &str) -> SchemaResult<Vec<String>> {
        match self.attr(path, key)? {
            AttrValue::Strings(values) => Ok(values.clone()),
            AttrValue::Numbers(_) => Err(ResultSchemaError::Backend(format!(
                "attribute '{}' on '{}' is not a string",
                key, path
            ))),
        }
    }

    fn members(&self, path: &str) -> SchemaResult<Vec<Member>> {
        self.require_parents(path)?;
        if !path.is_empty() && !self.groups.contains(path) {
            return Err(ResultSchemaError::MissingGroup {
                path: path.to_string(),
            });
        }
        let name_of = |child: &str| child.rsplit('/').next().unwrap_or(child).to_string();
        let mut members: Vec<Member> = self
            .groups
            .iter()
            .filter(|g| parent_of(g) == path && g.as_str() != path)
            .map(|g| Member {
                name: name_of(g),
                kind: NodeKind::Group,
            })
            .chain(
                self.datasets
                    .keys()
                    .filter(|d| parent_of(d) == path)
                    .map(|d| Member {
                        name: name_of(d),
                        kind: NodeKind::Dataset,
                    }),
            )
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(members)
    }
}

#[cfg(feature = "hdf5")]
pub use self::h5::Hdf5Source;

#[cfg(feature = "hdf5")]
mod h5 {
    use super::*;
    use hdf5::types::{VarLenAscii, VarLenUnicode};
    use std::path::{Path, PathBuf};

    fn backend(e: hdf5::Error) -> ResultSchemaError {
        ResultSchemaError::Backend(e.to_string())
    }

    fn h5_path(path: &str) -> &str {
        if path.is_empty() {
            "/"
        } else {
            path
        }
    }

    /// A `results.h5` file opened read-only.
    pub struct Hdf5Source {
        file: hdf5::File,
        path: PathBuf,
    }

    impl Hdf5Source {
        pub fn open(path: &Path) -> SchemaResult<Self> {
            let file = hdf5::File::open(path)
                .map_err(|e| ResultSchemaError::Backend(format!("{}: {}", path.display(), e)))?;
            Ok(Self {
                file,
                path: path.to_path_buf(),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn require_parents(&self, path: &str) -> SchemaResult<()> {
            for ancestor in ancestors(path) {
                if !self.file.link_exists(ancestor) || self.file.group(ancestor).is_err() {
                    return Err(ResultSchemaError::MissingGroup {
                        path: ancestor.to_string(),
                    });
                }
            }
            Ok(())
        }

        fn attribute(&self, path: &str, key: &str) -> SchemaResult<hdf5::Attribute> {
            self.require_parents(path)?;
            let attr = if let Ok(group) = self.file.group(h5_path(path)) {
                group.attr(key)
            } else if let Ok(dataset) = self.file.dataset(path) {
                dataset.attr(key)
            } else {
                return Err(ResultSchemaError::MissingGroup {
                    path: path.to_string(),
                });
            };
            attr.map_err(|_| ResultSchemaError::MissingAttribute {
                path: path.to_string(),
                key: key.to_string(),
            })
        }
    }

    impl ResultSource for Hdf5Source {
        fn dataset_2d(&self, path: &str) -> SchemaResult<Array2<f64>> {
            self.require_parents(path)?;
            if !self.file.link_exists(path) {
                return Err(ResultSchemaError::MissingDataset {
                    path: path.to_string(),
                });
            }
            let dataset = self
                .file
                .dataset(path)
                .map_err(|_| ResultSchemaError::MissingDataset {
                    path: path.to_string(),
                })?;
            let shape = dataset.shape();
            if shape.len() != 2 {
                return Err(ResultSchemaError::ShapeMismatch {
                    path: path.to_string(),
                    expected: "2-D array".to_string(),
                    found: shape,
                });
            }
            dataset.read_2d::<f64>().map_err(backend)
        }

        fn attr_f64(&self, path: &str, key: &str) -> SchemaResult<Vec<f64>> {
            self.attribute(path, key)?.read_raw::<f64>().map_err(backend)
        }

        fn attr_strings(&self, path: &str, key: &str) -> SchemaResult<Vec<String>> {
            let attr = self.attribute(path, key)?;
            if let Ok(values) = attr.read_raw::<VarLenUnicode>() {
                return Ok(values.iter().map(|v| v.as_str().to_string()).collect());
            }
            attr.read_raw::<VarLenAscii>()
                .map(|values| values.iter().map(|v| v.as_str().to_string()).collect())
                .map_err(backend)
        }

        fn members(&self, path: &str) -> SchemaResult<Vec<Member>> {
            self.require_parents(path)?;
            let group = self
                .file
                .group(h5_path(path))
                .map_err(|_| ResultSchemaError::MissingGroup {
                    path: path.to_string(),
                })?;
            let mut members = Vec::new();
            for name in group.member_names().map_err(backend)? {
                let kind = if group.group(&name).is_ok() {
                    NodeKind::Group
                } else {
                    NodeKind::Dataset
                };
                members.push(Member { name, kind });
            }
            members.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(members)
        }
    }
}

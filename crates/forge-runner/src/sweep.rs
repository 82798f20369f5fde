use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

use crate::config::{IntrinsicProfile, PolicyDescriptor, SweepTables};

pub const HDF5_EXTENSION: &str = ".h5";
pub const RESULTS_FILE: &str = "results.h5";

/// A ground-truth scene file. `name` is the file stem used in output paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scene {
    pub name: String,
    pub path: PathBuf,
}

impl Scene {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let name = file_name
            .strip_suffix(HDF5_EXTENSION)
            .unwrap_or(file_name)
            .to_string();
        Self { name, path }
    }
}

/// Lists the `*.h5` scenes in a ground-truth directory, sorted by name so the
/// sweep order does not depend on directory iteration order.
pub fn discover_scenes(dir: &Path, filter: Option<&[String]>) -> Result<Vec<Scene>> {
    if !dir.is_dir() {
        return Err(anyhow!(
            "Cannot find GroundTruth directory: {}",
            dir.display()
        ));
    }
    let mut scenes = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_h5 = entry
            .file_name()
            .to_str()
            .map(|n| n.ends_with(HDF5_EXTENSION))
            .unwrap_or(false);
        if !is_h5 {
            continue;
        }
        let scene = Scene::new(entry.path());
        if let Some(names) = filter {
            if !names.iter().any(|n| n == &scene.name) {
                continue;
            }
        }
        scenes.push(scene);
    }
    scenes.sort_by(|a, b| a.name.cmp(&b.name));

    if let Some(names) = filter {
        if scenes.len() != names.len() {
            return Err(anyhow!(
                "Found {} of {} expected files in: {}\n\tfiles were: [{}]",
                scenes.len(),
                names.len(),
                dir.display(),
                scenes
                    .iter()
                    .map(|s| s.path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }
    Ok(scenes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedMode {
    /// Seed equals the repetition index.
    Repetition,
    /// Seeds drawn from the tables' seed range. A fixed `rng_seed` makes the
    /// draw reproducible.
    Random { rng_seed: Option<u64> },
}

impl SeedMode {
    pub fn for_tables(tables: &SweepTables, rng_seed: Option<u64>) -> Self {
        if tables.random_seed {
            SeedMode::Random { rng_seed }
        } else {
            SeedMode::Repetition
        }
    }
}

/// One engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig<'a> {
    /// 1-based position in the full sweep.
    pub index: usize,
    pub intrinsic: &'a IntrinsicProfile,
    pub scene: &'a Scene,
    pub policy: &'a PolicyDescriptor,
    pub n_views: u32,
    pub repetition: u32,
    pub seed: u64,
}

impl SweepConfig<'_> {
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(&self.intrinsic.name)
            .join(&self.scene.name)
            .join(&self.policy.name)
            .join(self.n_views.to_string())
            .join(self.repetition.to_string())
    }

    pub fn output_dir(&self, results_root: &Path) -> PathBuf {
        results_root.join(self.relative_dir())
    }

    pub fn output_file(&self, results_root: &Path) -> PathBuf {
        self.output_dir(results_root).join(RESULTS_FILE)
    }
}

pub struct SweepPlan<'a> {
    tables: &'a SweepTables,
    scenes: &'a [Scene],
}

impl<'a> SweepPlan<'a> {
    pub fn new(tables: &'a SweepTables, scenes: &'a [Scene]) -> Self {
        Self { tables, scenes }
    }

    pub fn tables(&self) -> &'a SweepTables {
        self.tables
    }

    pub fn scenes(&self) -> &'a [Scene] {
        self.scenes
    }

    pub fn total(&self) -> usize {
        self.tables.intrinsics.len()
            * self.scenes.len()
            * self.tables.view_counts.len()
            * self.tables.repetitions_per_view_count()
    }

    pub fn configs(&self, seed_mode: &SeedMode) -> Result<Vec<SweepConfig<'a>>> {
        self.configs_from(1, seed_mode)
    }

    /// Configurations with index >= `start_at`. Seeds are drawn for every
    /// configuration, skipped or not, so a resumed random sweep reproduces
    /// the seeds of an uninterrupted one.
    pub fn configs_from(&self, start_at: usize, seed_mode: &SeedMode) -> Result<Vec<SweepConfig<'a>>> {
        let (low, high) = self.tables.seed_range;
        if matches!(seed_mode, SeedMode::Random { .. }) && low >= high {
            return Err(anyhow!("seed_range is empty: {}..{}", low, high));
        }
        let mut rng = match seed_mode {
            SeedMode::Random {
                rng_seed: Some(seed),
            } => Some(StdRng::seed_from_u64(*seed)),
            SeedMode::Random { rng_seed: None } => Some(StdRng::from_entropy()),
            SeedMode::Repetition => None,
        };

        let mut out = Vec::new();
        let mut index = 0usize;
        for intrinsic in &self.tables.intrinsics {
            for scene in self.scenes {
                for policy in &self.tables.policies {
                    for &n_views in &self.tables.view_counts {
                        for repetition in 1..=policy.repetitions {
                            index += 1;
                            let seed = match rng.as_mut() {
                                Some(rng) => rng.gen_range(low..high),
                                None => repetition as u64,
                            };
                            if index < start_at {
                                continue;
                            }
                            out.push(SweepConfig {
                                index,
                                intrinsic,
                                scene,
                                policy,
                                n_views,
                                repetition,
                                seed,
                            });
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Preset, SweepTables};
    use crate::ensure_dir;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::fs;

    fn two_scenes() -> Vec<Scene> {
        vec![Scene::new("/gt/box.h5"), Scene::new("/gt/bunny.h5")]
    }

    #[test]
    fn total_matches_cartesian_product() {
        let tables = SweepTables::preset(Preset::Standard);
        let scenes = two_scenes();
        let plan = SweepPlan::new(&tables, &scenes);
        assert_eq!(plan.total(), 3 * 2 * 4 * 34);
        let configs = plan.configs(&SeedMode::Repetition).expect("configs");
        assert_eq!(configs.len(), plan.total());
    }

    #[test]
    fn every_config_visited_once_in_order() {
        let tables = SweepTables::preset(Preset::Standard);
        let scenes = two_scenes();
        let plan = SweepPlan::new(&tables, &scenes);
        let configs = plan.configs(&SeedMode::Repetition).expect("configs");
        let indices: Vec<_> = configs.iter().map(|c| c.index).collect();
        assert_eq!(indices, (1..=plan.total()).collect::<Vec<_>>());

        let paths: BTreeSet<_> = configs.iter().map(|c| c.relative_dir()).collect();
        assert_eq!(paths.len(), configs.len(), "output paths must be unique");

        assert_eq!(configs[0].intrinsic.name, "RealSense_d455");
        assert_eq!(configs[0].scene.name, "box");
        assert_eq!(configs[0].policy.name, "Sphere_Uniform");
        assert_eq!(configs[0].n_views, 5);
        // Sphere_Uniform has one repetition so the next config bumps the view count.
        assert_eq!(configs[1].n_views, 10);
        assert_eq!(configs[4].policy.name, "Sphere_Unordered");
        assert_eq!(configs[4].repetition, 1);
        assert_eq!(configs[5].repetition, 2);

        let again = plan.configs(&SeedMode::Repetition).expect("configs");
        assert_eq!(configs, again);
    }

    #[test]
    fn start_at_skips_earlier_configs() {
        let tables = SweepTables::preset(Preset::Occplane);
        let scenes = vec![Scene::new("/gt/bunny.h5"), Scene::new("/gt/rotor-blade.h5")];
        let plan = SweepPlan::new(&tables, &scenes);
        let all = plan.configs(&SeedMode::Repetition).expect("all");
        let resumed = plan.configs_from(25, &SeedMode::Repetition).expect("resumed");
        assert_eq!(resumed.len(), plan.total() - 24);
        assert_eq!(resumed[0], all[24]);
        assert_eq!(plan.configs_from(0, &SeedMode::Repetition).expect("zero").len(), all.len());
    }

    #[test]
    fn repetition_seed_equals_repetition_index() {
        let tables = SweepTables::preset(Preset::Occplane);
        let scenes = vec![Scene::new("/gt/bunny.h5")];
        let plan = SweepPlan::new(&tables, &scenes);
        for config in plan.configs(&SeedMode::Repetition).expect("configs") {
            assert_eq!(config.seed, config.repetition as u64);
        }
    }

    #[test]
    fn random_seeds_are_reproducible_with_rng_seed_and_survive_resume() {
        let tables = SweepTables::preset(Preset::Occplane);
        let scenes = vec![Scene::new("/gt/bunny.h5")];
        let plan = SweepPlan::new(&tables, &scenes);
        let mode = SeedMode::Random { rng_seed: Some(42) };
        let a = plan.configs(&mode).expect("a");
        let b = plan.configs_from(4, &mode).expect("b");
        assert_eq!(a[3].seed, b[0].seed);
        for c in &a {
            assert!((1..100_000_000).contains(&c.seed));
        }
    }

    #[test]
    fn output_file_layout() {
        let tables = SweepTables::preset(Preset::Standard);
        let scenes = vec![Scene::new("/gt/bunny.h5")];
        let plan = SweepPlan::new(&tables, &scenes);
        let configs = plan.configs(&SeedMode::Repetition).expect("configs");
        let path = configs[0].output_file(Path::new("/results"));
        assert_eq!(
            path,
            PathBuf::from("/results/RealSense_d455/bunny/Sphere_Uniform/5/1/results.h5")
        );
    }

    #[test]
    fn discover_scenes_sorts_and_filters() {
        let root = std::env::temp_dir().join(format!(
            "forge_scenes_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("root");
        for name in ["sphere.h5", "bunny.h5", "rotor-blade.h5", "notes.txt"] {
            fs::write(root.join(name), b"").expect("write");
        }
        let all = discover_scenes(&root, None).expect("all");
        let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["bunny", "rotor-blade", "sphere"]);

        let filter = vec!["rotor-blade".to_string(), "bunny".to_string()];
        let some = discover_scenes(&root, Some(&filter)).expect("filtered");
        assert_eq!(some.len(), 2);

        let missing = vec!["bunny".to_string(), "bin".to_string()];
        let err = discover_scenes(&root, Some(&missing)).expect_err("should fail");
        assert!(err.to_string().contains("Found 1 of 2"), "{}", err);

        assert!(discover_scenes(&root.join("nope"), None).is_err());
        let _ = fs::remove_dir_all(root);
    }
}

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod config;
pub mod driver;
pub mod execute;
pub mod groundtruth;
pub mod protocol;
pub mod sweep;

pub use config::{
    ChannelBounds, ChannelSpec, IntrinsicProfile, NoiseBound, PolicyDescriptor, PolicyKind, Preset,
    SweepTables,
};
pub use driver::{
    locate_executable, verify_output, EngineOutput, EngineRunner, ProcessEngine, MAKE_GROUND_TRUTH,
    PRECOMPUTE_VIEWS, RUN_EXPERIMENT,
};
pub use execute::{
    run_ground_truth, run_precompute_views, run_sweep, FailedRun, SweepOptions, SweepReport,
};
pub use groundtruth::{GroundTruthPreset, PrecomputePreset, SceneSetup, ViewSampling};
pub use protocol::{encode_run_experiment, parse_run_experiment, EngineInput, FlagLine};
pub use sweep::{discover_scenes, Scene, SeedMode, SweepConfig, SweepPlan};

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| anyhow!("cannot create directory {}: {}", path.display(), e))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

/// Directory names under the project root the engine tooling agrees on.
pub const BIN_DIR: &str = "bin";
pub const SHARE_DIR: &str = "share";
pub const EXPERIMENTS_DIR: &str = "Experiments";
pub const GROUND_TRUTH_DIR: &str = "GroundTruth";
pub const PRECOMPUTED_DIR: &str = "Precomputed";

/// Walks up from `start` to the first directory holding `share/Experiments`.
/// Falls back to `start` itself so a fresh checkout still resolves.
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut cur = Some(start);
    while let Some(p) = cur {
        if p.join(SHARE_DIR).join(EXPERIMENTS_DIR).is_dir() {
            return p.to_path_buf();
        }
        cur = p.parent();
    }
    start.to_path_buf()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub experiments_dir: PathBuf,
    pub ground_truth_dir: PathBuf,
    pub precomputed_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: &Path) -> Self {
        let experiments_dir = root.join(SHARE_DIR).join(EXPERIMENTS_DIR);
        Self {
            root: root.to_path_buf(),
            bin_dir: root.join(BIN_DIR),
            ground_truth_dir: experiments_dir.join(GROUND_TRUTH_DIR),
            precomputed_dir: experiments_dir.join(PRECOMPUTED_DIR),
            experiments_dir,
        }
    }

    pub fn discover(start: &Path) -> Self {
        Self::new(&find_project_root(start))
    }

    pub fn results_dir(&self, tables: &SweepTables) -> PathBuf {
        if tables.results_dir.is_absolute() {
            tables.results_dir.clone()
        } else {
            self.experiments_dir.join(&tables.results_dir)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepSummary {
    pub intrinsics: Vec<String>,
    pub scenes: Vec<String>,
    pub policies: Vec<(String, u32)>,
    pub view_counts: Vec<u32>,
    pub channels: Vec<String>,
    pub random_seed: bool,
    pub total: usize,
    pub tables_digest: String,
    pub results_dir: PathBuf,
}

pub fn describe_sweep(plan: &SweepPlan<'_>, results_dir: &Path) -> Result<SweepSummary> {
    let tables = plan.tables();
    tables.validate()?;
    Ok(SweepSummary {
        intrinsics: tables.intrinsics.iter().map(|i| i.name.clone()).collect(),
        scenes: plan.scenes().iter().map(|s| s.name.clone()).collect(),
        policies: tables
            .policies
            .iter()
            .map(|p| (p.name.clone(), p.repetitions))
            .collect(),
        view_counts: tables.view_counts.clone(),
        channels: tables.channels.iter().map(|c| c.name.clone()).collect(),
        random_seed: tables.random_seed,
        total: plan.total(),
        tables_digest: tables.digest()?,
        results_dir: results_dir.to_path_buf(),
    })
}

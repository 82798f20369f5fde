//! Discovery of sweep results on disk.
//!
//! A results directory holds one directory per experiment (the sensor
//! profile of a sweep), laid out as
//! `<experiment>/<scene>/<policy>/<views>/<repetition>/results.h5`.

use anyhow::{anyhow, Result};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

pub const RESULTS_FILE: &str = "results.h5";
pub const FIGURES_DIR: &str = "Figures";

/// Visible subdirectories of `dir`, sorted by name.
fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let hidden = entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with('.'))
            .unwrap_or(true);
        if entry.file_type().is_dir() && !hidden {
            out.push(entry.into_path());
        }
    }
    out.sort();
    Ok(out)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewBudget {
    pub n_views: u32,
    pub dir: PathBuf,
    /// One `results.h5` per repetition that produced one.
    pub runs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyResults {
    pub scene: String,
    pub policy: String,
    pub dir: PathBuf,
    /// Ordered by view count, largest first.
    pub budgets: Vec<ViewBudget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsTree {
    pub experiment: String,
    pub root: PathBuf,
    pub policies: Vec<PolicyResults>,
}

impl ResultsTree {
    pub fn scan(experiment_dir: &Path) -> Result<Self> {
        if !experiment_dir.is_dir() {
            return Err(anyhow!(
                "experiment directory not found: {}",
                experiment_dir.display()
            ));
        }
        let mut policies = Vec::new();
        for scene_dir in subdirs(experiment_dir)? {
            for policy_dir in subdirs(&scene_dir)? {
                policies.push(scan_policy(&scene_dir, &policy_dir)?);
            }
        }
        Ok(Self {
            experiment: dir_name(experiment_dir),
            root: experiment_dir.to_path_buf(),
            policies,
        })
    }

    pub fn run_count(&self) -> usize {
        self.policies
            .iter()
            .flat_map(|p| &p.budgets)
            .map(|b| b.runs.len())
            .sum()
    }
}

fn scan_policy(scene_dir: &Path, policy_dir: &Path) -> Result<PolicyResults> {
    let mut budgets = Vec::new();
    for views_dir in subdirs(policy_dir)? {
        let name = dir_name(&views_dir);
        let n_views = name.parse::<u32>().map_err(|_| {
            anyhow!(
                "Could not turn directory name into integer for the number of views generated by the policy: {}",
                views_dir.display()
            )
        })?;
        let mut runs = Vec::new();
        for rep_dir in subdirs(&views_dir)? {
            let file = rep_dir.join(RESULTS_FILE);
            if file.is_file() {
                runs.push(file);
            } else {
                warn!(dir = %rep_dir.display(), "repetition has no {}, skipping", RESULTS_FILE);
            }
        }
        budgets.push(ViewBudget {
            n_views,
            dir: views_dir,
            runs,
        });
    }
    budgets.sort_by(|a, b| b.n_views.cmp(&a.n_views));
    Ok(PolicyResults {
        scene: dir_name(scene_dir),
        policy: dir_name(policy_dir),
        dir: policy_dir.to_path_buf(),
        budgets,
    })
}

/// Experiment directories under a results directory. The figures output
/// directory is not an experiment.
pub fn experiment_dirs(results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !results_dir.is_dir() {
        return Err(anyhow!(
            "results directory not found: {}",
            results_dir.display()
        ));
    }
    Ok(subdirs(results_dir)?
        .into_iter()
        .filter(|p| dir_name(p) != FIGURES_DIR)
        .collect())
}

/// Picks the experiment to plot: the named one, the only one, or whichever
/// the operator chooses from a numbered list.
pub fn select_experiment(
    results_dir: &Path,
    name: Option<&str>,
    console: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<PathBuf> {
    let experiments = experiment_dirs(results_dir)?;
    if let Some(name) = name {
        return experiments
            .into_iter()
            .find(|p| dir_name(p) == name)
            .ok_or_else(|| {
                anyhow!(
                    "experiment '{}' not found in {}",
                    name,
                    results_dir.display()
                )
            });
    }
    match experiments.len() {
        0 => Err(anyhow!(
            "No experiment directories available in {}",
            results_dir.display()
        )),
        1 => Ok(experiments[0].clone()),
        _ => {
            writeln!(out, "Please select which experiment directory to use:")?;
            for (i, experiment) in experiments.iter().enumerate() {
                writeln!(out, "[{}] {}", i, dir_name(experiment))?;
            }
            write!(out, "Enter experiment number: ")?;
            out.flush()?;
            let mut line = String::new();
            console.read_line(&mut line)?;
            let idx = line
                .trim()
                .parse::<usize>()
                .map_err(|_| anyhow!("invalid experiment number: '{}'", line.trim()))?;
            experiments
                .get(idx)
                .cloned()
                .ok_or_else(|| anyhow!("experiment number {} out of range", idx))
        }
    }
}

pub fn figures_root(results_dir: &Path, experiment: &str) -> PathBuf {
    results_dir.join(FIGURES_DIR).join(experiment)
}

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::driver::{pause_for_inspection, verify_output, EngineOutput, EngineRunner};
use crate::groundtruth::{encode_make_ground_truth, encode_precompute_views, SceneSetup, ViewSampling};
use crate::protocol::encode_run_experiment;
use crate::sweep::{SeedMode, SweepPlan};
use crate::{atomic_write_bytes, atomic_write_json_pretty, ensure_dir};

pub const ENGINE_INPUT_FILE: &str = "engine_input.txt";
pub const SWEEPS_DIR: &str = ".sweeps";

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub results_root: PathBuf,
    pub start_at: usize,
    pub no_override: bool,
    pub save_images: bool,
    pub pause: bool,
    pub seed_mode: SeedMode,
}

impl SweepOptions {
    pub fn new(results_root: PathBuf) -> Self {
        Self {
            results_root,
            start_at: 0,
            no_override: false,
            save_images: false,
            pause: false,
            seed_mode: SeedMode::Repetition,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedRun {
    pub index: usize,
    pub output_file: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub sweep_id: String,
    pub total: usize,
    pub start_at: usize,
    pub attempted: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedRun>,
    pub interrupted: bool,
    /// Configuration that was running when the stop flag was raised. Its
    /// outcome is neither a success nor a failure.
    pub interrupted_at: Option<usize>,
    pub manifest_path: PathBuf,
}

impl SweepReport {
    pub fn status(&self) -> &'static str {
        if self.interrupted {
            "interrupted"
        } else if self.failed.is_empty() {
            "completed"
        } else {
            "completed_with_failures"
        }
    }
}

fn write_sweep_manifest(path: &Path, report: &SweepReport, digest: &str, status: &str) -> Result<()> {
    let failed: Vec<_> = report
        .failed
        .iter()
        .map(|f| {
            json!({
                "index": f.index,
                "output_file": f.output_file.display().to_string(),
                "reason": f.reason,
            })
        })
        .collect();
    let payload = json!({
        "schema_version": "sweep_manifest_v1",
        "sweep_id": report.sweep_id,
        "status": status,
        "tables_digest": digest,
        "total": report.total,
        "start_at": report.start_at,
        "attempted": report.attempted,
        "skipped": report.skipped,
        "succeeded": report.succeeded,
        "failed": failed,
        "interrupted_at": report.interrupted_at,
        "updated_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(path, &payload)
}

/// Marks the manifest `failed` if the sweep unwinds before reporting.
struct ManifestGuard<'a> {
    path: &'a Path,
    digest: &'a str,
    done: bool,
}

impl<'a> ManifestGuard<'a> {
    fn new(path: &'a Path, digest: &'a str) -> Self {
        Self {
            path,
            digest,
            done: false,
        }
    }

    fn update(&self, report: &SweepReport, status: &str) -> Result<()> {
        write_sweep_manifest(self.path, report, self.digest, status)
    }

    fn complete(&mut self, report: &SweepReport) -> Result<()> {
        self.update(report, report.status())?;
        self.done = true;
        Ok(())
    }
}

impl Drop for ManifestGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            let payload = json!({
                "schema_version": "sweep_manifest_v1",
                "status": "failed",
                "tables_digest": self.digest,
                "updated_at": Utc::now().to_rfc3339(),
            });
            let _ = atomic_write_json_pretty(self.path, &payload);
        }
    }
}

/// Runs every configuration from `options.start_at` through `runner`.
///
/// Each configuration is independent: its output directory is created, an
/// existing result is skipped under `no_override`, and the stdin block is
/// kept next to the result as `engine_input.txt`. The stop flag is checked
/// between configurations and again when the engine returns; files already
/// written are left in place.
pub fn run_sweep(
    plan: &SweepPlan<'_>,
    options: &SweepOptions,
    runner: &dyn EngineRunner,
    stop: &AtomicBool,
) -> Result<SweepReport> {
    let stdin = io::stdin();
    let mut console = stdin.lock();
    let mut out = io::stdout();
    run_sweep_with_console(plan, options, runner, stop, &mut console, &mut out)
}

pub fn run_sweep_with_console(
    plan: &SweepPlan<'_>,
    options: &SweepOptions,
    runner: &dyn EngineRunner,
    stop: &AtomicBool,
    console: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<SweepReport> {
    let tables = plan.tables();
    tables.validate()?;
    let total = plan.total();
    info!(
        "Generating {} experiments, beginning at experiment {}...",
        total, options.start_at
    );

    ensure_dir(&options.results_root)?;
    let sweep_id = format!("sweep_{}", Utc::now().format("%Y%m%d_%H%M%S_%6f"));
    let manifest_path = options
        .results_root
        .join(SWEEPS_DIR)
        .join(format!("{}.json", sweep_id));
    let digest = tables.digest()?;
    let mut report = SweepReport {
        sweep_id,
        total,
        start_at: options.start_at,
        attempted: 0,
        skipped: 0,
        succeeded: 0,
        failed: Vec::new(),
        interrupted: false,
        interrupted_at: None,
        manifest_path: manifest_path.clone(),
    };
    let mut guard = ManifestGuard::new(&manifest_path, &digest);
    guard.update(&report, "running")?;

    for config in plan.configs_from(options.start_at, &options.seed_mode)? {
        if stop.load(Ordering::SeqCst) {
            report.interrupted = true;
            break;
        }
        info!("({} / {}) {}", config.index, total, config.relative_dir().display());

        let output_dir = config.output_dir(&options.results_root);
        ensure_dir(&output_dir)?;
        let output_file = config.output_file(&options.results_root);
        if options.no_override && output_file.exists() {
            info!("\tAlready exists. Skipping experiment...");
            report.skipped += 1;
            continue;
        }

        let stdin_text = encode_run_experiment(&config, tables, &output_file, options.save_images)?;
        atomic_write_bytes(&output_dir.join(ENGINE_INPUT_FILE), stdin_text.as_bytes())?;

        report.attempted += 1;
        let result = runner.run(&stdin_text);
        // Ctrl-C reaches the engine too; whatever it returned is not a verdict.
        if stop.load(Ordering::SeqCst) {
            warn!(index = config.index, "interrupted while the engine was running");
            report.interrupted = true;
            report.interrupted_at = Some(config.index);
            break;
        }
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(index = config.index, error = %e, "engine invocation failed");
                report.failed.push(FailedRun {
                    index: config.index,
                    output_file,
                    reason: e.to_string(),
                });
                guard.update(&report, "running")?;
                continue;
            }
        };
        if options.pause {
            pause_for_inspection(&stdin_text, &output, console, out)?;
        }
        match verify_output(&output_file, &output) {
            Ok(()) => report.succeeded += 1,
            Err(reason) => {
                warn!(index = config.index, %reason, "experiment produced no usable result");
                report.failed.push(FailedRun {
                    index: config.index,
                    output_file,
                    reason,
                });
            }
        }
        guard.update(&report, "running")?;
    }

    guard.complete(&report)?;
    Ok(report)
}

/// Generates one ground-truth scene. Returns the stdin block sent and the
/// engine's output.
pub fn run_ground_truth(
    runner: &dyn EngineRunner,
    dir: &Path,
    name: &str,
    setup: &SceneSetup,
) -> Result<(String, EngineOutput)> {
    ensure_dir(dir)?;
    let stdin_text = encode_make_ground_truth(&dir.join(name), setup);
    let output = runner.run(&stdin_text)?;
    if !output.success() {
        warn!(status = %output.status_label(), "MakeGroundTruth exited unsuccessfully");
    }
    Ok((stdin_text, output))
}

pub fn run_precompute_views(
    runner: &dyn EngineRunner,
    dir: &Path,
    name: &str,
    setup: &SceneSetup,
    sampling: &ViewSampling,
) -> Result<(String, EngineOutput)> {
    ensure_dir(dir)?;
    let stdin_text = encode_precompute_views(&dir.join(name), setup, sampling);
    let output = runner.run(&stdin_text)?;
    if !output.success() {
        warn!(status = %output.status_label(), "PrecomputeViews exited unsuccessfully");
    }
    Ok((stdin_text, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Preset, SweepTables};
    use crate::groundtruth::GroundTruthPreset;
    use crate::protocol::parse_run_experiment;
    use crate::sweep::Scene;
    use anyhow::anyhow;
    use serde_json::Value;
    use std::cell::RefCell;
    use std::fs;
    use std::io::Cursor;

    /// Records every stdin block and optionally writes the result file the
    /// block asks for.
    struct FakeEngine {
        calls: RefCell<Vec<String>>,
        write_results: bool,
        fail_on_call: Option<usize>,
    }

    impl FakeEngine {
        fn new(write_results: bool) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                write_results,
                fail_on_call: None,
            }
        }
    }

    impl EngineRunner for FakeEngine {
        fn run(&self, stdin: &str) -> Result<EngineOutput> {
            let call = self.calls.borrow().len() + 1;
            self.calls.borrow_mut().push(stdin.to_string());
            if self.fail_on_call == Some(call) {
                return Err(anyhow!("spawn failed"));
            }
            if self.write_results {
                let input = parse_run_experiment(stdin)?;
                fs::write(&input.output, b"\x89HDF")?;
            }
            Ok(EngineOutput {
                status: Some(0),
                stdout: "Finished!".to_string(),
            })
        }
    }

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "forge_exec_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        dir
    }

    fn small_tables() -> SweepTables {
        let mut tables = SweepTables::preset(Preset::Occplane);
        tables.intrinsics.truncate(1);
        tables.policies[0].repetitions = 2;
        tables
    }

    fn run(
        plan: &SweepPlan<'_>,
        options: &SweepOptions,
        engine: &FakeEngine,
        stop: &AtomicBool,
    ) -> SweepReport {
        let mut console = Cursor::new(Vec::new());
        let mut out = Vec::new();
        run_sweep_with_console(plan, options, engine, stop, &mut console, &mut out).expect("sweep")
    }

    #[test]
    fn sweep_runs_every_config_and_records_inputs() {
        let root = temp_root("all");
        let tables = small_tables();
        let scenes = vec![Scene::new("/gt/bunny.h5")];
        let plan = SweepPlan::new(&tables, &scenes);
        let engine = FakeEngine::new(true);
        let options = SweepOptions::new(root.clone());
        let report = run(&plan, &options, &engine, &AtomicBool::new(false));

        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 2);
        assert!(report.failed.is_empty());
        assert_eq!(engine.calls.borrow().len(), 2);

        let run_dir = root.join("RealSense_D455_Noise_0/bunny/Occplane/9/2");
        assert!(run_dir.join("results.h5").exists());
        let recorded = fs::read_to_string(run_dir.join(ENGINE_INPUT_FILE)).expect("input");
        assert_eq!(recorded, engine.calls.borrow()[1]);

        let manifest: Value =
            serde_json::from_slice(&fs::read(&report.manifest_path).expect("manifest")).expect("json");
        assert_eq!(manifest["status"], "completed");
        assert_eq!(manifest["succeeded"], 2);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn no_override_never_invokes_engine_for_existing_results() {
        let root = temp_root("skip");
        let tables = small_tables();
        let scenes = vec![Scene::new("/gt/bunny.h5")];
        let plan = SweepPlan::new(&tables, &scenes);

        let existing = root.join("RealSense_D455_Noise_0/bunny/Occplane/9/1");
        ensure_dir(&existing).expect("dir");
        fs::write(existing.join("results.h5"), b"old").expect("write");

        let engine = FakeEngine::new(true);
        let mut options = SweepOptions::new(root.clone());
        options.no_override = true;
        let report = run(&plan, &options, &engine, &AtomicBool::new(false));

        assert_eq!(report.skipped, 1);
        assert_eq!(report.attempted, 1);
        let calls = engine.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("/9/2/results.h5"));
        assert_eq!(fs::read(existing.join("results.h5")).expect("read"), b"old");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_result_is_reported_as_failure() {
        let root = temp_root("missing");
        let tables = small_tables();
        let scenes = vec![Scene::new("/gt/bunny.h5")];
        let plan = SweepPlan::new(&tables, &scenes);
        let mut engine = FakeEngine::new(false);
        engine.fail_on_call = Some(2);
        let report = run(&plan, &SweepOptions::new(root.clone()), &engine, &AtomicBool::new(false));

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].reason.contains("did not write"));
        assert!(report.failed[1].reason.contains("spawn failed"));
        assert_eq!(report.status(), "completed_with_failures");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn stop_flag_ends_sweep_before_next_config() {
        let root = temp_root("stop");
        let tables = small_tables();
        let scenes = vec![Scene::new("/gt/bunny.h5")];
        let plan = SweepPlan::new(&tables, &scenes);
        let engine = FakeEngine::new(true);
        let report = run(&plan, &SweepOptions::new(root.clone()), &engine, &AtomicBool::new(true));
        assert!(report.interrupted);
        assert!(engine.calls.borrow().is_empty());
        let manifest: Value =
            serde_json::from_slice(&fs::read(&report.manifest_path).expect("manifest")).expect("json");
        assert_eq!(manifest["status"], "interrupted");
        let _ = fs::remove_dir_all(root);
    }

    /// Raises the stop flag while "running" the given call, the way Ctrl-C
    /// reaches both the sweep and the engine child.
    struct InterruptedEngine<'a> {
        stop: &'a AtomicBool,
        on_call: usize,
        calls: RefCell<usize>,
    }

    impl EngineRunner for InterruptedEngine<'_> {
        fn run(&self, stdin: &str) -> Result<EngineOutput> {
            *self.calls.borrow_mut() += 1;
            if *self.calls.borrow() == self.on_call {
                self.stop.store(true, Ordering::SeqCst);
                return Ok(EngineOutput {
                    status: None,
                    stdout: String::new(),
                });
            }
            let input = parse_run_experiment(stdin)?;
            fs::write(&input.output, b"\x89HDF")?;
            Ok(EngineOutput {
                status: Some(0),
                stdout: "Finished!".to_string(),
            })
        }
    }

    #[test]
    fn interrupt_during_last_run_is_not_a_failure() {
        let root = temp_root("interrupt");
        let tables = small_tables();
        let scenes = vec![Scene::new("/gt/bunny.h5")];
        let plan = SweepPlan::new(&tables, &scenes);
        let stop = AtomicBool::new(false);
        let engine = InterruptedEngine {
            stop: &stop,
            on_call: 2,
            calls: RefCell::new(0),
        };
        let mut console = Cursor::new(Vec::new());
        let mut out = Vec::new();
        let report = run_sweep_with_console(
            &plan,
            &SweepOptions::new(root.clone()),
            &engine,
            &stop,
            &mut console,
            &mut out,
        )
        .expect("sweep");

        assert!(report.interrupted);
        assert_eq!(report.interrupted_at, Some(2));
        assert!(report.failed.is_empty());
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.status(), "interrupted");
        let manifest: Value =
            serde_json::from_slice(&fs::read(&report.manifest_path).expect("manifest")).expect("json");
        assert_eq!(manifest["status"], "interrupted");
        assert_eq!(manifest["interrupted_at"], 2);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn start_at_resumes_mid_sweep() {
        let root = temp_root("resume");
        let tables = small_tables();
        let scenes = vec![Scene::new("/gt/bunny.h5"), Scene::new("/gt/rotor-blade.h5")];
        let plan = SweepPlan::new(&tables, &scenes);
        let engine = FakeEngine::new(true);
        let mut options = SweepOptions::new(root.clone());
        options.start_at = 3;
        let report = run(&plan, &options, &engine, &AtomicBool::new(false));
        assert_eq!(report.attempted, 2);
        assert!(engine.calls.borrow()[0].contains("/rotor-blade/Occplane/9/1/"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn pause_echoes_each_run() {
        let root = temp_root("pause");
        let mut tables = small_tables();
        tables.policies[0].repetitions = 1;
        let scenes = vec![Scene::new("/gt/bunny.h5")];
        let plan = SweepPlan::new(&tables, &scenes);
        let engine = FakeEngine::new(true);
        let mut options = SweepOptions::new(root.clone());
        options.pause = true;
        let mut console = Cursor::new(b"\n".to_vec());
        let mut out = Vec::new();
        run_sweep_with_console(&plan, &options, &engine, &AtomicBool::new(false), &mut console, &mut out)
            .expect("sweep");
        let shown = String::from_utf8(out).expect("utf8");
        assert!(shown.contains("--type occplane"), "{}", shown);
        assert!(shown.contains("Finished!"), "{}", shown);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn ground_truth_run_targets_named_file() {
        struct Echo;
        impl EngineRunner for Echo {
            fn run(&self, stdin: &str) -> Result<EngineOutput> {
                Ok(EngineOutput {
                    status: Some(0),
                    stdout: stdin.lines().next().unwrap_or_default().to_string(),
                })
            }
        }
        let root = temp_root("gt");
        let setup = GroundTruthPreset::Sphere.setup();
        let (stdin, output) = run_ground_truth(&Echo, &root, "sphere", &setup).expect("run");
        assert!(stdin.starts_with(&root.join("sphere").display().to_string()));
        assert_eq!(output.stdout, root.join("sphere").display().to_string());
        let _ = fs::remove_dir_all(root);
    }
}

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forge_analysis::{
    figures_root, render_confusion, render_policy_sweep, render_sensor_records, render_views,
    select_experiment, ConfusionPlotOptions, ConfusionSource, ConfusionTable, Metric, ResultFile,
    ResultsTree, SchemaResult, ViewPlotOptions,
};
use forge_runner::{
    describe_sweep, discover_scenes, encode_run_experiment, find_project_root, run_ground_truth,
    run_precompute_views, run_sweep, GroundTruthPreset, PrecomputePreset, ProcessEngine,
    ProjectLayout, SeedMode, SweepOptions, SweepPlan, SweepReport, SweepSummary, SweepTables,
    ViewSampling, MAKE_GROUND_TRUTH, PRECOMPUTE_VIEWS, RUN_EXPERIMENT,
};

#[derive(Parser)]
#[command(name = "forge", version = "0.3.0", about = "ForgeScan experiment lab")]
struct Cli {
    /// Debug logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetArg {
    #[value(name = "standard")]
    Standard,
    #[value(name = "occplane")]
    Occplane,
}

impl From<PresetArg> for forge_runner::Preset {
    fn from(value: PresetArg) -> Self {
        match value {
            PresetArg::Standard => forge_runner::Preset::Standard,
            PresetArg::Occplane => forge_runner::Preset::Occplane,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceArg {
    #[value(name = "occupancy")]
    Occupancy,
    #[value(name = "tsdf")]
    Tsdf,
    #[value(name = "binary")]
    Binary,
    #[value(name = "probability")]
    Probability,
}

impl From<SourceArg> for ConfusionSource {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Occupancy => ConfusionSource::Occupancy,
            SourceArg::Tsdf => ConfusionSource::Tsdf,
            SourceArg::Binary => ConfusionSource::Binary,
            SourceArg::Probability => ConfusionSource::Probability,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct TableArgs {
    #[arg(long, value_enum, default_value = "standard")]
    preset: PresetArg,
    /// YAML sweep tables; replaces the preset.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Draw seeds at random instead of using the repetition index.
    #[arg(long)]
    random_seed: bool,
    /// Seed for the random seed draw.
    #[arg(long, requires = "random_seed")]
    rng_seed: Option<u64>,
}

#[derive(Args, Clone, Debug, Default)]
struct PathArgs {
    /// Project root holding bin/ and share/Experiments/.
    #[arg(long)]
    root: Option<PathBuf>,
    #[arg(long)]
    bin_dir: Option<PathBuf>,
    #[arg(long)]
    ground_truth_dir: Option<PathBuf>,
    #[arg(long)]
    results_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configuration of a sweep through RunExperiment.
    Sweep {
        #[command(flatten)]
        tables: TableArgs,
        #[command(flatten)]
        paths: PathArgs,
        /// 1-based index of the first configuration to run.
        #[arg(long, default_value_t = 0)]
        start_at: usize,
        /// Skip configurations whose results.h5 already exists.
        #[arg(long)]
        no_override: bool,
        #[arg(long)]
        save_images: bool,
        /// Echo engine input/output and wait for enter after each run.
        #[arg(long)]
        pause: bool,
        #[arg(long)]
        json: bool,
    },
    /// Summarize a sweep without running it.
    Describe {
        #[command(flatten)]
        tables: TableArgs,
        #[command(flatten)]
        paths: PathArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print the engine input for one sweep index.
    Encode {
        index: usize,
        #[command(flatten)]
        tables: TableArgs,
        #[command(flatten)]
        paths: PathArgs,
        #[arg(long)]
        save_images: bool,
        #[arg(long)]
        json: bool,
    },
    /// Generate a ground-truth scene with MakeGroundTruth.
    GroundTruth {
        #[arg(short, long)]
        name: String,
        /// Output directory (default share/Experiments/GroundTruth).
        #[arg(short, long)]
        dir: Option<PathBuf>,
        #[command(flatten)]
        paths: PathArgs,
        #[arg(long)]
        json: bool,
    },
    /// Precompute candidate views with PrecomputeViews.
    PrecomputeViews {
        #[arg(short, long)]
        name: String,
        /// Output directory (default share/Experiments/Precomputed).
        #[arg(short, long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        radius: Option<f64>,
        #[arg(long)]
        min_similarity: Option<f64>,
        #[arg(long)]
        n_views: Option<u32>,
        #[arg(long)]
        n_store: Option<u32>,
        #[arg(long)]
        alpha: Option<f64>,
        #[command(flatten)]
        paths: PathArgs,
        #[arg(long)]
        json: bool,
    },
    /// Per-step confusion metrics of one result file.
    Metrics {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, value_enum, default_value = "occupancy")]
        source: SourceArg,
        #[arg(long)]
        json: bool,
    },
    /// Plot one metric for every policy of an experiment.
    PlotSweep {
        /// Results directory (default share/Experiments/Results).
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Metric to plot, e.g. accuracy, precision.
        #[arg(short, long)]
        plot: String,
        /// Experiment directory name; prompts when several exist.
        #[arg(long)]
        experiment: Option<String>,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Plot confusion counts, accuracy and precision of one result file.
    PlotConfusion {
        #[arg(short, long)]
        file: PathBuf,
        /// Directory to save the plots within (default: beside the file).
        #[arg(short, long)]
        save: Option<PathBuf>,
        #[arg(long)]
        plot_raw: bool,
        #[arg(long)]
        raw_unknown: bool,
        #[arg(long, value_enum, default_value = "occupancy")]
        source: SourceArg,
        #[arg(long)]
        json: bool,
    },
    /// Plot the voxel grid and the views a policy took.
    PlotViews {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        plot_rejects: bool,
        #[arg(long)]
        no_id: bool,
        #[arg(long)]
        only_z: bool,
        #[arg(short, long)]
        save: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Plot sensor positions and view directions.
    PlotSensorRecords {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long)]
        save: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            if payload.get("ok") == Some(&Value::Bool(false)) {
                std::process::exit(1);
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(error_code(&err), err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Sweep {
            tables,
            paths,
            start_at,
            no_override,
            save_images,
            pause,
            json,
        } => {
            let sweep_tables = load_tables(&tables)?;
            let layout = resolve_layout(&paths)?;
            let scenes = discover_scenes(&layout.ground_truth_dir, sweep_tables.scenes.as_deref())?;
            let results_dir = resolve_results_dir(&paths, &layout, &sweep_tables);
            let engine = ProcessEngine::locate(&layout.bin_dir, RUN_EXPERIMENT)?;
            info!(engine = %engine.executable.display(), "using engine");

            let stop = Arc::new(AtomicBool::new(false));
            let handler_flag = stop.clone();
            ctrlc::set_handler(move || {
                handler_flag.store(true, Ordering::SeqCst);
            })?;

            let plan = SweepPlan::new(&sweep_tables, &scenes);
            let options = SweepOptions {
                results_root: results_dir,
                start_at,
                no_override,
                save_images,
                pause,
                seed_mode: SeedMode::for_tables(&sweep_tables, tables.rng_seed),
            };
            let report = run_sweep(&plan, &options, &engine, &stop)?;
            if report.interrupted {
                warn!("Exiting early on interrupt.");
            }
            let failure = sweep_failure(&report);
            if json {
                let mut payload = report_to_json(&report);
                payload["ok"] = json!(failure.is_none());
                return Ok(Some(payload));
            }
            print_report(&report);
            if let Some(err) = failure {
                return Err(err);
            }
        }
        Commands::Describe { tables, paths, json } => {
            let sweep_tables = load_tables(&tables)?;
            let layout = resolve_layout(&paths)?;
            let scenes = discover_scenes(&layout.ground_truth_dir, sweep_tables.scenes.as_deref())?;
            let results_dir = resolve_results_dir(&paths, &layout, &sweep_tables);
            let plan = SweepPlan::new(&sweep_tables, &scenes);
            let summary = describe_sweep(&plan, &results_dir)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "summary": summary_to_json(&summary)
                })));
            }
            print_summary(&summary);
        }
        Commands::Encode {
            index,
            tables,
            paths,
            save_images,
            json,
        } => {
            let sweep_tables = load_tables(&tables)?;
            let layout = resolve_layout(&paths)?;
            let scenes = discover_scenes(&layout.ground_truth_dir, sweep_tables.scenes.as_deref())?;
            let results_dir = resolve_results_dir(&paths, &layout, &sweep_tables);
            let plan = SweepPlan::new(&sweep_tables, &scenes);
            if index == 0 || index > plan.total() {
                return Err(anyhow!(
                    "index_out_of_range: {} not in 1..={}",
                    index,
                    plan.total()
                ));
            }
            let seed_mode = SeedMode::for_tables(&sweep_tables, tables.rng_seed);
            let configs = plan.configs_from(index, &seed_mode)?;
            let config = configs
                .first()
                .ok_or_else(|| anyhow!("index_out_of_range: {}", index))?;
            let output_file = config.output_file(&results_dir);
            let stdin = encode_run_experiment(config, &sweep_tables, &output_file, save_images)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "encode",
                    "index": index,
                    "output_file": output_file.display().to_string(),
                    "seed": config.seed,
                    "stdin": stdin
                })));
            }
            print!("{}", stdin);
        }
        Commands::GroundTruth {
            name,
            dir,
            paths,
            json,
        } => {
            let preset: GroundTruthPreset = name.parse()?;
            let layout = resolve_layout(&paths)?;
            let dir = dir.unwrap_or_else(|| layout.ground_truth_dir.clone());
            let engine = ProcessEngine::locate(&layout.bin_dir, MAKE_GROUND_TRUTH)?;
            let (stdin, output) = run_ground_truth(&engine, &dir, preset.as_str(), &preset.setup())?;
            if json {
                return Ok(Some(json!({
                    "ok": output.success(),
                    "command": "ground-truth",
                    "name": preset.as_str(),
                    "path": dir.join(preset.as_str()).display().to_string(),
                    "status": output.status,
                    "stdin": stdin,
                    "stdout": output.stdout
                })));
            }
            println!("{}", stdin);
            println!("{}", output.stdout);
            println!("status: {}", output.status_label());
        }
        Commands::PrecomputeViews {
            name,
            dir,
            radius,
            min_similarity,
            n_views,
            n_store,
            alpha,
            paths,
            json,
        } => {
            let preset: PrecomputePreset = name.parse()?;
            let layout = resolve_layout(&paths)?;
            let dir = dir.unwrap_or_else(|| layout.precomputed_dir.clone());
            let defaults = ViewSampling::default();
            let sampling = ViewSampling {
                radius: radius.unwrap_or(defaults.radius),
                min_similarity: min_similarity.unwrap_or(defaults.min_similarity),
                n_views: n_views.unwrap_or(defaults.n_views),
                n_store: n_store.unwrap_or(defaults.n_store),
                alpha: alpha.unwrap_or(defaults.alpha),
            };
            let engine = ProcessEngine::locate(&layout.bin_dir, PRECOMPUTE_VIEWS)?
                .with_args(forge_runner::groundtruth::PRECOMPUTE_ENGINE_ARGS);
            let (stdin, output) =
                run_precompute_views(&engine, &dir, preset.as_str(), &preset.setup(), &sampling)?;
            if json {
                return Ok(Some(json!({
                    "ok": output.success(),
                    "command": "precompute-views",
                    "name": preset.as_str(),
                    "path": dir.join(preset.as_str()).display().to_string(),
                    "status": output.status,
                    "stdin": stdin,
                    "stdout": output.stdout
                })));
            }
            println!("{}", stdin);
            println!("{}", output.stdout);
            println!("status: {}", output.status_label());
        }
        Commands::Metrics { file, source, json } => {
            let source: ConfusionSource = source.into();
            let table = open_result(&file)
                .and_then(|r| r.confusion(source))
                .map_err(|e| anyhow!("{}: {}", file.display(), e))?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "metrics",
                    "file": file.display().to_string(),
                    "source": source.as_str(),
                    "rows": metric_rows_to_json(&table)
                })));
            }
            print_metric_table(&table);
        }
        Commands::PlotSweep {
            dir,
            plot,
            experiment,
            root,
            json,
        } => {
            let metric: Metric = plot.parse()?;
            let results_dir = match dir {
                Some(dir) => dir,
                None => {
                    let paths = PathArgs {
                        root,
                        ..PathArgs::default()
                    };
                    resolve_layout(&paths)?.experiments_dir.join("Results")
                }
            };
            let stdin = io::stdin();
            let experiment_dir = select_experiment(
                &results_dir,
                experiment.as_deref(),
                &mut stdin.lock(),
                &mut io::stdout(),
            )?;
            let tree = ResultsTree::scan(&experiment_dir)?;
            let figures = figures_root(&results_dir, &tree.experiment);
            let mut written = Vec::new();
            for policy in &tree.policies {
                written.extend(render_policy_sweep(policy, &figures, metric, load_confusion)?);
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plot-sweep",
                    "experiment": tree.experiment,
                    "metric": metric.as_str(),
                    "figures": paths_to_json(&written)
                })));
            }
            print_figures(&written);
        }
        Commands::PlotConfusion {
            file,
            save,
            plot_raw,
            raw_unknown,
            source,
            json,
        } => {
            let table = open_result(&file)
                .and_then(|r| r.confusion(source.into()))
                .map_err(|e| anyhow!("{}: {}", file.display(), e))?;
            let save_dir = save.unwrap_or_else(|| {
                file.parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."))
            });
            let options = ConfusionPlotOptions {
                raw: plot_raw,
                unknown: raw_unknown,
            };
            let written = render_confusion(&table, &save_dir, options)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plot-confusion",
                    "figures": paths_to_json(&written)
                })));
            }
            print_figures(&written);
        }
        Commands::PlotViews {
            file,
            plot_rejects,
            no_id,
            only_z,
            save,
            json,
        } => {
            let result = open_result(&file).map_err(|e| anyhow!("{}: {}", file.display(), e))?;
            let grid = result
                .grid_dimensions()
                .map_err(|e| anyhow!("{}: {}", file.display(), e))?;
            let policies = result
                .policy_views()
                .map_err(|e| anyhow!("{}: {}", file.display(), e))?;
            let options = ViewPlotOptions {
                plot_rejects,
                no_id,
                only_z,
            };
            let out = figure_path(&file, save, forge_analysis::plot::VIEWS_FILE);
            let written = render_views(grid, &policies, options, &out)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plot-views",
                    "views": policies.iter().map(|p| p.views.len()).sum::<usize>(),
                    "figures": paths_to_json(&[written])
                })));
            }
            print_figures(&[written]);
        }
        Commands::PlotSensorRecords { file, save, json } => {
            let records = open_result(&file)
                .and_then(|r| r.sensor_records())
                .map_err(|e| anyhow!("{}: {}", file.display(), e))?;
            let out = figure_path(&file, save, forge_analysis::plot::SENSOR_RECORDS_FILE);
            let written = render_sensor_records(&records, &out)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plot-sensor-records",
                    "records": records.len(),
                    "figures": paths_to_json(&[written])
                })));
            }
            print_figures(&[written]);
        }
    }
    Ok(None)
}

#[cfg(feature = "hdf5")]
fn open_result(path: &Path) -> SchemaResult<ResultFile<forge_analysis::Hdf5Source>> {
    ResultFile::open(path)
}

#[cfg(not(feature = "hdf5"))]
fn open_result(path: &Path) -> SchemaResult<ResultFile<forge_analysis::MemorySource>> {
    Err(forge_analysis::ResultSchemaError::Backend(format!(
        "forge was built without the hdf5 feature, cannot read {}",
        path.display()
    )))
}

fn load_confusion(path: &Path, source: ConfusionSource) -> SchemaResult<ConfusionTable> {
    open_result(path)?.confusion(source)
}

fn load_tables(args: &TableArgs) -> Result<SweepTables> {
    let mut tables = match &args.config {
        Some(path) => SweepTables::from_yaml_path(path)?,
        None => SweepTables::preset(args.preset.into()),
    };
    if args.random_seed {
        tables.random_seed = true;
    }
    Ok(tables)
}

fn resolve_layout(paths: &PathArgs) -> Result<ProjectLayout> {
    let root = match &paths.root {
        Some(root) => root.clone(),
        None => find_project_root(&std::env::current_dir()?),
    };
    let mut layout = ProjectLayout::new(&root);
    if let Some(bin) = &paths.bin_dir {
        layout.bin_dir = bin.clone();
    }
    if let Some(gt) = &paths.ground_truth_dir {
        layout.ground_truth_dir = gt.clone();
    }
    Ok(layout)
}

fn resolve_results_dir(paths: &PathArgs, layout: &ProjectLayout, tables: &SweepTables) -> PathBuf {
    paths
        .results_dir
        .clone()
        .unwrap_or_else(|| layout.results_dir(tables))
}

fn figure_path(file: &Path, save: Option<PathBuf>, name: &str) -> PathBuf {
    match save {
        Some(dir) => dir.join(name),
        None => forge_analysis::plot::default_figure_path(file, name),
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

/// Errors raised as `code: message` keep their code in the envelope.
fn error_code(err: &anyhow::Error) -> &'static str {
    let msg = err.to_string();
    for code in [
        "ambiguous_executable",
        "index_out_of_range",
        "sweep_failures",
    ] {
        if msg.starts_with(code) {
            return code;
        }
    }
    if err.downcast_ref::<forge_analysis::MetricParseError>().is_some() {
        return "invalid_metric";
    }
    "command_failed"
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Sweep { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Encode { json, .. }
        | Commands::GroundTruth { json, .. }
        | Commands::PrecomputeViews { json, .. }
        | Commands::Metrics { json, .. }
        | Commands::PlotSweep { json, .. }
        | Commands::PlotConfusion { json, .. }
        | Commands::PlotViews { json, .. }
        | Commands::PlotSensorRecords { json, .. } => *json,
    }
}

fn paths_to_json(paths: &[PathBuf]) -> Value {
    json!(paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>())
}

/// An interrupted sweep exits cleanly; otherwise any failed run fails the command.
fn sweep_failure(report: &SweepReport) -> Option<anyhow::Error> {
    if report.interrupted || report.failed.is_empty() {
        return None;
    }
    Some(anyhow!(
        "sweep_failures: {} of {} attempted experiments failed",
        report.failed.len(),
        report.attempted
    ))
}

fn report_to_json(report: &SweepReport) -> Value {
    json!({
        "command": "sweep",
        "sweep_id": report.sweep_id,
        "status": report.status(),
        "total": report.total,
        "start_at": report.start_at,
        "attempted": report.attempted,
        "skipped": report.skipped,
        "succeeded": report.succeeded,
        "interrupted": report.interrupted,
        "interrupted_at": report.interrupted_at,
        "failed": report.failed.iter().map(|f| json!({
            "index": f.index,
            "output_file": f.output_file.display().to_string(),
            "reason": f.reason
        })).collect::<Vec<_>>(),
        "manifest": report.manifest_path.display().to_string()
    })
}

fn print_report(report: &SweepReport) {
    println!("sweep_id: {}", report.sweep_id);
    println!("status: {}", report.status());
    println!("total: {}", report.total);
    println!("attempted: {}", report.attempted);
    println!("skipped: {}", report.skipped);
    println!("succeeded: {}", report.succeeded);
    for failed in &report.failed {
        println!(
            "failed: ({}) {}: {}",
            failed.index,
            failed.output_file.display(),
            failed.reason
        );
    }
    if let Some(index) = report.interrupted_at {
        println!("interrupted_at: {}", index);
    }
    println!("manifest: {}", report.manifest_path.display());
}

fn summary_to_json(summary: &SweepSummary) -> Value {
    json!({
        "intrinsics": summary.intrinsics,
        "scenes": summary.scenes,
        "policies": summary.policies.iter().map(|(name, reps)| json!({
            "name": name,
            "repetitions": reps
        })).collect::<Vec<_>>(),
        "view_counts": summary.view_counts,
        "channels": summary.channels,
        "random_seed": summary.random_seed,
        "total": summary.total,
        "tables_digest": summary.tables_digest,
        "results_dir": summary.results_dir.display().to_string()
    })
}

fn print_summary(summary: &SweepSummary) {
    println!("intrinsics: {}", summary.intrinsics.join(", "));
    println!("scenes: {}", summary.scenes.join(", "));
    for (name, reps) in &summary.policies {
        println!("policy: {} (x{})", name, reps);
    }
    println!(
        "view_counts: {}",
        summary
            .view_counts
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("channels: {}", summary.channels.join(", "));
    println!("random_seed: {}", summary.random_seed);
    println!("total: {}", summary.total);
    println!("tables_digest: {}", summary.tables_digest);
    println!("results_dir: {}", summary.results_dir.display());
}

fn metric_rows_to_json(table: &ConfusionTable) -> Value {
    json!(table
        .rows
        .iter()
        .map(|row| {
            let metrics: serde_json::Map<String, Value> = Metric::ALL
                .iter()
                .map(|m| (m.as_str().to_string(), json!(m.evaluate(&row.counts))))
                .collect();
            json!({
                "step": row.step,
                "unknown": row.unknown,
                "metrics": metrics
            })
        })
        .collect::<Vec<_>>())
}

fn print_metric_table(table: &ConfusionTable) {
    let mut header = vec!["step".to_string()];
    header.extend(Metric::ALL.iter().map(|m| m.as_str().to_string()));
    println!("{}", header.join("\t"));
    for row in &table.rows {
        let mut cells = vec![row.step.to_string()];
        cells.extend(Metric::ALL.iter().map(|m| {
            let v = m.evaluate(&row.counts);
            if m.is_ratio() {
                format!("{:.4}", v)
            } else {
                format!("{}", v)
            }
        }));
        println!("{}", cells.join("\t"));
    }
}

fn print_figures(paths: &[PathBuf]) {
    for path in paths {
        println!("figure: {}", path.display());
    }
}

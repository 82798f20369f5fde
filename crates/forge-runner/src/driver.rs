use anyhow::{anyhow, Result};
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

pub const RUN_EXPERIMENT: &str = "RunExperiment";
pub const MAKE_GROUND_TRUTH: &str = "MakeGroundTruth";
pub const PRECOMPUTE_VIEWS: &str = "PrecomputeViews";

/// Finds the single file in `bin_dir` whose name starts with `prefix`,
/// whatever its extension. More than one match is a configuration error.
pub fn locate_executable(bin_dir: &Path, prefix: &str) -> Result<PathBuf> {
    if !bin_dir.is_dir() {
        return Err(anyhow!(
            "Cannot find binary directory: {}",
            bin_dir.display()
        ));
    }
    let mut matches = Vec::new();
    for entry in fs::read_dir(bin_dir)? {
        let entry = entry?;
        let path = entry.path();
        let name_matches = entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with(prefix))
            .unwrap_or(false);
        if name_matches && path.is_file() {
            matches.push(path);
        }
    }
    matches.sort();
    match matches.len() {
        0 => Err(anyhow!(
            "Cannot find executable '{}' in: {}",
            prefix,
            bin_dir.display()
        )),
        1 => Ok(matches.remove(0)),
        _ => Err(anyhow!(
            "ambiguous_executable: {} files in {} start with '{}': {}",
            matches.len(),
            bin_dir.display(),
            prefix,
            matches
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Exit code, `None` when the process was ended by a signal.
    pub status: Option<i32>,
    pub stdout: String,
}

impl EngineOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn status_label(&self) -> String {
        self.status
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string())
    }
}

/// Something that accepts an engine stdin block and runs it to completion.
pub trait EngineRunner {
    fn run(&self, stdin: &str) -> Result<EngineOutput>;
}

#[derive(Debug, Clone)]
pub struct ProcessEngine {
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl ProcessEngine {
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn locate(bin_dir: &Path, prefix: &str) -> Result<Self> {
        Ok(Self::new(locate_executable(bin_dir, prefix)?))
    }
}

impl EngineRunner for ProcessEngine {
    /// Blocks until the engine exits. There is no timeout: a hung engine
    /// hangs the caller.
    fn run(&self, stdin_text: &str) -> Result<EngineOutput> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow!("failed to launch {}: {}", self.executable.display(), e))?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(stdin_text.as_bytes()) {
                debug!(error = %e, "engine closed stdin early");
            }
        }
        let output = child.wait_with_output()?;
        Ok(EngineOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }
}

/// Checks what the engine left behind. A non-zero exit or a missing/empty
/// result file is reported as the failure reason.
pub fn verify_output(output_file: &Path, output: &EngineOutput) -> std::result::Result<(), String> {
    if !output.success() {
        return Err(format!("engine exited with status {}", output.status_label()));
    }
    match fs::metadata(output_file) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(format!("result file is empty: {}", output_file.display())),
        Err(_) => Err(format!(
            "engine did not write result file: {}",
            output_file.display()
        )),
    }
}

/// Echoes both streams and waits for the operator to press enter.
pub fn pause_for_inspection(
    stdin_text: &str,
    output: &EngineOutput,
    console: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "{}", stdin_text)?;
    writeln!(out, "{}", output.stdout)?;
    write!(out, "End of process...")?;
    out.flush()?;
    let mut line = String::new();
    console.read_line(&mut line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensure_dir;
    use chrono::Utc;
    use std::io::Cursor;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "forge_driver_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        dir
    }

    #[test]
    fn locate_requires_exactly_one_match() {
        let bin = temp_dir("locate");
        let err = locate_executable(&bin, RUN_EXPERIMENT).expect_err("empty dir");
        assert!(err.to_string().contains("Cannot find executable"), "{}", err);

        fs::write(bin.join("RunExperiment.exe"), b"").expect("write");
        fs::write(bin.join("MakeGroundTruth"), b"").expect("write");
        let found = locate_executable(&bin, RUN_EXPERIMENT).expect("single match");
        assert_eq!(found, bin.join("RunExperiment.exe"));

        fs::write(bin.join("RunExperimentOld"), b"").expect("write");
        let err = locate_executable(&bin, RUN_EXPERIMENT).expect_err("two matches");
        let msg = err.to_string();
        assert!(msg.contains("ambiguous_executable"), "{}", msg);
        assert!(msg.contains("RunExperimentOld"), "{}", msg);

        assert!(locate_executable(&bin.join("missing"), RUN_EXPERIMENT).is_err());
        let _ = fs::remove_dir_all(bin);
    }

    #[test]
    fn locate_ignores_directories() {
        let bin = temp_dir("locate_dirs");
        ensure_dir(&bin.join("PrecomputeViews.d")).expect("dir");
        fs::write(bin.join("PrecomputeViews"), b"").expect("write");
        let found = locate_executable(&bin, PRECOMPUTE_VIEWS).expect("file only");
        assert_eq!(found, bin.join("PrecomputeViews"));
        let _ = fs::remove_dir_all(bin);
    }

    #[test]
    fn verify_output_detects_silent_failures() {
        let dir = temp_dir("verify");
        let file = dir.join("results.h5");
        let ok = EngineOutput {
            status: Some(0),
            stdout: String::new(),
        };
        let reason = verify_output(&file, &ok).expect_err("missing file");
        assert!(reason.contains("did not write"), "{}", reason);

        fs::write(&file, b"").expect("write");
        assert!(verify_output(&file, &ok).expect_err("empty").contains("empty"));

        fs::write(&file, b"\x89HDF").expect("write");
        verify_output(&file, &ok).expect("valid");

        let crashed = EngineOutput {
            status: None,
            stdout: String::new(),
        };
        assert!(verify_output(&file, &crashed)
            .expect_err("signal")
            .contains("signal"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn pause_echoes_streams_and_waits_for_a_line() {
        let output = EngineOutput {
            status: Some(0),
            stdout: "Finished!".to_string(),
        };
        let mut console = Cursor::new(b"\n".to_vec());
        let mut out = Vec::new();
        pause_for_inspection("stdin block", &output, &mut console, &mut out).expect("pause");
        let shown = String::from_utf8(out).expect("utf8");
        assert!(shown.starts_with("stdin block\nFinished!\n"), "{}", shown);
        assert!(shown.ends_with("End of process..."));
    }

    #[cfg(unix)]
    #[test]
    fn process_engine_pipes_stdin_to_stdout() {
        let engine = ProcessEngine::new(PathBuf::from("/bin/cat"));
        let output = engine.run("hello\nengine\n").expect("run cat");
        assert!(output.success());
        assert_eq!(output.stdout, "hello\nengine\n");
    }
}

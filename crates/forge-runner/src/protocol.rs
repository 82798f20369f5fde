//! Line protocol spoken by the `RunExperiment` engine on stdin.
//!
//! The engine prompts for each field in a fixed order and parses every line
//! positionally or by flag, so the encoder never reorders fields or respells
//! flags. [`parse_run_experiment`] reads a block back in the same order.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{PolicyDescriptor, SweepTables};
use crate::sweep::SweepConfig;

pub const STDIN_NEWLINE: &str = "\n";
pub const SAVE_IMAGES: &str = "y";
pub const SKIP_IMAGES: &str = "don't save images";
/// Views taken per axis before the axis-random policy picks a new axis.
pub const AXIS_RANDOM_BLOCK: u32 = 5;

/// Renders a float the way the engine scripts always have: `2.5`, `0.0`, `0.05`.
pub fn fmt_float(value: f64) -> String {
    format!("{:?}", value)
}

/// Policy arguments with the view budget and seed appended.
pub fn policy_line(policy: &PolicyDescriptor, view_radius: f64, n_views: u32, seed: u64) -> String {
    let mut line = policy.render_args(view_radius);
    if policy.is_axis_random() {
        line.push_str(&format!(
            " --n-views {} --n-repeat {}",
            AXIS_RANDOM_BLOCK,
            n_views / AXIS_RANDOM_BLOCK
        ));
    } else {
        line.push_str(&format!(" --n-views {}", n_views));
    }
    line.push_str(&format!(" --seed {}", seed));
    line
}

pub fn encode_run_experiment(
    config: &SweepConfig<'_>,
    tables: &SweepTables,
    output_file: &Path,
    save_images: bool,
) -> Result<String> {
    let noise = config.intrinsic.noise(tables)?;
    let mut lines = vec![
        output_file.display().to_string(),
        if save_images { SAVE_IMAGES } else { SKIP_IMAGES }.to_string(),
        config.scene.path.display().to_string(),
        fmt_float(tables.rejection_rate),
        config.intrinsic.engine_args(tables)?,
        policy_line(config.policy, tables.view_radius, config.n_views, config.seed),
    ];
    for channel in &tables.channels {
        lines.push(channel.engine_args(noise));
    }
    // Blank line closes the channel prompt. Metrics are left to the engine defaults.
    lines.push(String::new());
    let mut stdin = lines.join(STDIN_NEWLINE);
    stdin.push_str(STDIN_NEWLINE);
    Ok(stdin)
}

/// A whitespace separated line of `--flag [value]` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagLine {
    flags: Vec<(String, Option<String>)>,
}

impl FlagLine {
    pub fn parse(line: &str) -> Self {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut flags = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            let value = tokens
                .get(i + 1)
                .filter(|next| !next.starts_with("--"))
                .map(|s| s.to_string());
            i += if value.is_some() { 2 } else { 1 };
            flags.push((token.to_string(), value));
        }
        Self { flags }
    }

    pub fn has(&self, flag: &str) -> bool {
        self.flags.iter().any(|(f, _)| f == flag)
    }

    pub fn get(&self, flag: &str) -> Option<&str> {
        self.flags
            .iter()
            .find(|(f, _)| f == flag)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn parse_value<T>(&self, flag: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(flag) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow!("invalid value for {}: '{}' ({})", flag, raw, e)),
        }
    }

    pub fn flags(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.flags.iter().map(|(f, v)| (f.as_str(), v.as_deref()))
    }
}

/// A `RunExperiment` stdin block read back into its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInput {
    pub output: PathBuf,
    pub save_images: bool,
    pub scene: PathBuf,
    pub rejection_rate: f64,
    pub intrinsic: FlagLine,
    pub policy: FlagLine,
    pub channels: Vec<FlagLine>,
}

pub fn parse_run_experiment(text: &str) -> Result<EngineInput> {
    let mut lines = text.split(STDIN_NEWLINE);
    let mut next = |field: &str| {
        lines
            .next()
            .ok_or_else(|| anyhow!("engine input truncated before {}", field))
    };
    let output = PathBuf::from(next("output path")?);
    let save_images = next("save images flag")? == SAVE_IMAGES;
    let scene = PathBuf::from(next("scene path")?);
    let raw_rate = next("rejection rate")?;
    let rejection_rate = raw_rate
        .trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("invalid rejection rate: '{}'", raw_rate))?;
    let intrinsic = FlagLine::parse(next("intrinsics")?);
    let policy = FlagLine::parse(next("policy")?);
    let mut channels = Vec::new();
    loop {
        let line = next("channel terminator")?;
        if line.trim().is_empty() {
            break;
        }
        channels.push(FlagLine::parse(line));
    }
    Ok(EngineInput {
        output,
        save_images,
        scene,
        rejection_rate,
        intrinsic,
        policy,
        channels,
    })
}

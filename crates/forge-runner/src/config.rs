use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::protocol::fmt_float;
use crate::sha256_hex;

pub const REGULAR_RERUNS: u32 = 1;
pub const RANDOM_RERUNS: u32 = 10;
/// Policy name the engine scripts have always encoded in blocks of five.
pub const AXIS_RANDOM_POLICY: &str = "Axis_Random";
/// Policy flag that re-draws the scan axis between blocks.
pub const RANDOM_AXIS_FLAG: &str = "--random-axis";

/// Half-widths used to bound the TSDF and probability data channels, paired
/// with the sensor noise fraction they were tuned for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseBound {
    pub tsdf_half_width: f64,
    pub probability_half_width: f64,
    pub noise_fraction: f64,
}

impl NoiseBound {
    pub fn new(tsdf_half_width: f64, probability_half_width: f64, noise_fraction: f64) -> Self {
        Self {
            tsdf_half_width,
            probability_half_width,
            noise_fraction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicProfile {
    pub name: String,
    /// Sensor model flags, e.g. `--d455 1.0`.
    pub sensor: String,
    pub noise_index: usize,
}

impl IntrinsicProfile {
    pub fn new(name: impl Into<String>, sensor: impl Into<String>, noise_index: usize) -> Self {
        Self {
            name: name.into(),
            sensor: sensor.into(),
            noise_index,
        }
    }

    pub fn noise<'a>(&self, tables: &'a SweepTables) -> Result<&'a NoiseBound> {
        tables.noise_bounds.get(self.noise_index).ok_or_else(|| {
            anyhow!(
                "intrinsic '{}' references noise bound {} but only {} are defined",
                self.name,
                self.noise_index,
                tables.noise_bounds.len()
            )
        })
    }

    /// The intrinsic line sent to the engine.
    pub fn engine_args(&self, tables: &SweepTables) -> Result<String> {
        let noise = self.noise(tables)?;
        Ok(format!(
            "{} --noise {}",
            self.sensor.trim(),
            fmt_float(noise.noise_fraction)
        ))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Standard,
    /// Takes a fixed block of five views and repeats it on a new random axis.
    AxisRandom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    pub name: String,
    /// Argument template; `{radius}` is replaced by the sweep view radius.
    pub args: String,
    pub repetitions: u32,
    #[serde(default)]
    pub kind: PolicyKind,
}

impl PolicyDescriptor {
    pub fn new(name: &str, args: &str, repetitions: u32) -> Self {
        Self {
            name: name.to_string(),
            args: args.to_string(),
            repetitions,
            kind: PolicyKind::Standard,
        }
    }

    pub fn axis_random(name: &str, args: &str, repetitions: u32) -> Self {
        Self {
            kind: PolicyKind::AxisRandom,
            ..Self::new(name, args, repetitions)
        }
    }

    /// Axis-random encoding applies to the declared kind, and also to any
    /// policy named `Axis_Random` or passing `--random-axis`, whatever `kind`
    /// a sweep file left at its default.
    pub fn is_axis_random(&self) -> bool {
        self.kind == PolicyKind::AxisRandom
            || self.name == AXIS_RANDOM_POLICY
            || self.args.split_whitespace().any(|a| a == RANDOM_AXIS_FLAG)
    }

    pub fn render_args(&self, view_radius: f64) -> String {
        let rendered = self.args.replace("{radius}", &fmt_float(view_radius));
        rendered.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelBounds {
    #[default]
    None,
    /// `--d-min -tsdf --d-max +tsdf`
    Tsdf,
    /// `--d-min -tsdf --d-max +probability`
    Probability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default)]
    pub bounds: ChannelBounds,
    #[serde(default)]
    pub dtype: Option<String>,
}

impl ChannelSpec {
    pub fn new(name: &str, channel_type: &str, bounds: ChannelBounds, dtype: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            channel_type: channel_type.to_string(),
            bounds,
            dtype: dtype.map(|s| s.to_string()),
        }
    }

    pub fn engine_args(&self, noise: &NoiseBound) -> String {
        let mut line = format!("--name {} --type {}", self.name, self.channel_type);
        let range = match self.bounds {
            ChannelBounds::None => None,
            ChannelBounds::Tsdf => Some((noise.tsdf_half_width, noise.tsdf_half_width)),
            ChannelBounds::Probability => {
                Some((noise.tsdf_half_width, noise.probability_half_width))
            }
        };
        if let Some((lower, upper)) = range {
            line.push_str(&format!(
                " --d-min -{} --d-max {}",
                fmt_float(lower),
                fmt_float(upper)
            ));
        }
        if let Some(dtype) = &self.dtype {
            line.push_str(&format!(" --dtype {}", dtype));
        }
        line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Standard,
    Occplane,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Standard => "standard",
            Preset::Occplane => "occplane",
        }
    }
}

impl FromStr for Preset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(Preset::Standard),
            "occplane" => Ok(Preset::Occplane),
            other => Err(anyhow!(
                "unknown sweep preset '{}' (expected standard or occplane)",
                other
            )),
        }
    }
}

/// The fixed lookup tables a sweep is generated from. Built once and passed
/// explicitly to the plan; nothing here changes while a sweep runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepTables {
    pub intrinsics: Vec<IntrinsicProfile>,
    pub noise_bounds: Vec<NoiseBound>,
    pub policies: Vec<PolicyDescriptor>,
    pub view_counts: Vec<u32>,
    pub channels: Vec<ChannelSpec>,
    /// Restrict the sweep to these ground-truth scene names.
    pub scenes: Option<Vec<String>>,
    pub view_radius: f64,
    pub rejection_rate: f64,
    pub random_seed: bool,
    pub seed_range: (u64, u64),
    /// Results location relative to `share/Experiments`.
    pub results_dir: PathBuf,
}

impl Default for SweepTables {
    fn default() -> Self {
        Self::preset(Preset::Standard)
    }
}

impl SweepTables {
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Standard => standard_tables(),
            Preset::Occplane => occplane_tables(),
        }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let tables: SweepTables = serde_yaml::from_str(raw)?;
        tables.validate()?;
        Ok(tables)
    }

    pub fn from_yaml_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow!("cannot read sweep file {}: {}", path.display(), e))?;
        Self::from_yaml_str(&raw).map_err(|e| anyhow!("{}: {}", path.display(), e))
    }

    pub fn repetitions_per_view_count(&self) -> usize {
        self.policies.iter().map(|p| p.repetitions as usize).sum()
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.intrinsics.is_empty() {
            problems.push("intrinsics: at least one profile is required".to_string());
        }
        if self.policies.is_empty() {
            problems.push("policies: at least one policy is required".to_string());
        }
        if self.view_counts.is_empty() {
            problems.push("view_counts: at least one view count is required".to_string());
        }
        for intr in &self.intrinsics {
            if intr.noise_index >= self.noise_bounds.len() {
                problems.push(format!(
                    "intrinsics.{}: noise_index {} out of range ({} noise bounds)",
                    intr.name,
                    intr.noise_index,
                    self.noise_bounds.len()
                ));
            }
        }
        for policy in &self.policies {
            if policy.repetitions == 0 {
                problems.push(format!("policies.{}: repetitions must be > 0", policy.name));
            }
            if policy.is_axis_random() {
                for n in &self.view_counts {
                    if n % 5 != 0 {
                        problems.push(format!(
                            "policies.{}: view count {} is not a multiple of 5",
                            policy.name, n
                        ));
                    }
                }
            }
        }
        for (i, bound) in self.noise_bounds.iter().enumerate() {
            for (field, value) in [
                ("tsdf_half_width", bound.tsdf_half_width),
                ("probability_half_width", bound.probability_half_width),
                ("noise_fraction", bound.noise_fraction),
            ] {
                if value.is_nan() || value < 0.0 {
                    problems.push(format!(
                        "noise_bounds[{}].{}: {} must be a non-negative number",
                        i, field, value
                    ));
                }
            }
        }
        if self.view_counts.contains(&0) {
            problems.push("view_counts: view counts must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.rejection_rate) {
            problems.push(format!(
                "rejection_rate: {} outside [0, 1]",
                self.rejection_rate
            ));
        }
        if self.seed_range.0 >= self.seed_range.1 {
            problems.push(format!(
                "seed_range: empty range {}..{}",
                self.seed_range.0, self.seed_range.1
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "sweep tables invalid:\n{}",
                problems
                    .iter()
                    .map(|p| format!("  - {}", p))
                    .collect::<Vec<_>>()
                    .join("\n")
            ))
        }
    }

    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(sha256_hex(&bytes))
    }
}

fn d455_channels() -> Vec<ChannelSpec> {
    vec![
        ChannelSpec::new(
            "probability",
            "Probability",
            ChannelBounds::Probability,
            Some("float"),
        ),
        ChannelSpec::new("TSDF", "TSDF", ChannelBounds::Tsdf, Some("float")),
        ChannelSpec::new("binary", "binary", ChannelBounds::None, None),
    ]
}

fn standard_tables() -> SweepTables {
    let view_radius = 2.5;
    // RealSense uncertainty model: channel bounds scale with the view radius.
    let dist = 0.02 * view_radius;
    SweepTables {
        // Every profile carries `--noise`, the noiseless one as `--noise 0.0`.
        // The engine default is 0, so this matches a bare `--d455 1.0` line.
        intrinsics: vec![
            IntrinsicProfile::new("RealSense_d455", "--d455 1.0", 0),
            IntrinsicProfile::new("RealSense_d455_Noise_02", "--d455 1.0", 1),
            IntrinsicProfile::new("RealSense_d455_Noise_10", "--d455 1.0", 2),
        ],
        noise_bounds: vec![
            NoiseBound::new(dist, dist, 0.0),
            NoiseBound::new(dist, dist, 0.02),
            NoiseBound::new(dist, dist, 0.10),
        ],
        policies: vec![
            PolicyDescriptor::new(
                "Sphere_Uniform",
                "--type sphere --uniform --r {radius}",
                REGULAR_RERUNS,
            ),
            PolicyDescriptor::new(
                "Sphere_Unordered",
                "--type sphere --uniform --unordered --r {radius}",
                RANDOM_RERUNS,
            ),
            PolicyDescriptor::new("Sphere_Random", "--type sphere --r {radius}", RANDOM_RERUNS),
            PolicyDescriptor::new(
                "Axis_X-axis",
                "--type axis --x-axis --uniform --r {radius}",
                REGULAR_RERUNS,
            ),
            PolicyDescriptor::new(
                "Axis_Y-axis",
                "--type axis --y-axis --uniform --r {radius}",
                REGULAR_RERUNS,
            ),
            PolicyDescriptor::new(
                "Axis_Z-axis",
                "--type axis --z-axis --uniform --r {radius}",
                REGULAR_RERUNS,
            ),
            PolicyDescriptor::axis_random(
                "Axis_Random",
                "--type axis --random-axis --uniform --change-random --r {radius}",
                RANDOM_RERUNS,
            ),
        ],
        view_counts: vec![5, 10, 15, 20],
        channels: d455_channels(),
        scenes: None,
        view_radius,
        rejection_rate: 0.0,
        random_seed: false,
        seed_range: (1, 100_000_000),
        results_dir: PathBuf::from("Results"),
    }
}

fn occplane_tables() -> SweepTables {
    let noise_bounds = vec![
        NoiseBound::new(0.06, 0.03, 0.0),
        NoiseBound::new(0.06, 0.03, 0.02),
        NoiseBound::new(0.18, 0.10, 0.06),
    ];
    let intrinsics = noise_bounds
        .iter()
        .enumerate()
        .map(|(i, b)| {
            IntrinsicProfile::new(
                format!("RealSense_D455_Noise_{}", (b.noise_fraction * 100.0).round() as u32),
                "--d455 1.0",
                i,
            )
        })
        .collect();
    SweepTables {
        intrinsics,
        noise_bounds,
        policies: vec![PolicyDescriptor::new(
            "Occplane",
            "--type occplane --keep-top-n 3 --complete-after 9 --radius {radius}",
            RANDOM_RERUNS,
        )],
        view_counts: vec![9],
        channels: d455_channels(),
        scenes: Some(vec!["rotor-blade".to_string(), "bunny".to_string()]),
        view_radius: 2.5,
        rejection_rate: 0.0,
        random_seed: false,
        seed_range: (1, 100_000_000),
        results_dir: PathBuf::from("Experiment_3").join("Results"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_preset_is_valid_and_sums_repetitions() {
        let tables = SweepTables::preset(Preset::Standard);
        tables.validate().expect("standard preset valid");
        assert_eq!(tables.repetitions_per_view_count(), 1 + 10 + 10 + 1 + 1 + 1 + 10);
        assert_eq!(tables.view_counts, vec![5, 10, 15, 20]);
    }

    #[test]
    fn occplane_preset_names_profiles_by_noise_percent() {
        let tables = SweepTables::preset(Preset::Occplane);
        tables.validate().expect("occplane preset valid");
        let names: Vec<_> = tables.intrinsics.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "RealSense_D455_Noise_0",
                "RealSense_D455_Noise_2",
                "RealSense_D455_Noise_6"
            ]
        );
        assert_eq!(
            tables.intrinsics[2].engine_args(&tables).expect("args"),
            "--d455 1.0 --noise 0.06"
        );
    }

    #[test]
    fn channel_args_follow_bound_kind() {
        let noise = NoiseBound::new(0.06, 0.03, 0.0);
        let channels = d455_channels();
        assert_eq!(
            channels[0].engine_args(&noise),
            "--name probability --type Probability --d-min -0.06 --d-max 0.03 --dtype float"
        );
        assert_eq!(
            channels[1].engine_args(&noise),
            "--name TSDF --type TSDF --d-min -0.06 --d-max 0.06 --dtype float"
        );
        assert_eq!(channels[2].engine_args(&noise), "--name binary --type binary");
    }

    #[test]
    fn policy_args_substitute_radius_and_collapse_spaces() {
        let policy = PolicyDescriptor::new("p", "--type occplane  --radius {radius} ", 1);
        assert_eq!(policy.render_args(2.5), "--type occplane --radius 2.5");
    }

    #[test]
    fn yaml_overrides_fall_back_to_standard_values() {
        let raw = "\
view_counts: [10]
policies:
  - name: Axis_Random
    args: --type axis --random-axis --r {radius}
    repetitions: 2
    kind: axis_random
";
        let tables = SweepTables::from_yaml_str(raw).expect("parse yaml");
        assert_eq!(tables.view_counts, vec![10]);
        assert_eq!(tables.policies[0].kind, PolicyKind::AxisRandom);
        assert_eq!(tables.intrinsics.len(), 3);
        assert_eq!(tables.view_radius, 2.5);
    }

    #[test]
    fn yaml_policy_named_axis_random_needs_no_kind() {
        let raw = "\
view_counts: [10]
policies:
  - name: Axis_Random
    args: --type axis --random-axis --r {radius}
    repetitions: 2
  - name: Spin
    args: --type axis --random-axis --uniform --r {radius}
    repetitions: 1
";
        let tables = SweepTables::from_yaml_str(raw).expect("parse yaml");
        assert_eq!(tables.policies[0].kind, PolicyKind::Standard);
        assert!(tables.policies[0].is_axis_random());
        assert!(tables.policies[1].is_axis_random());
        assert!(!SweepTables::preset(Preset::Standard).policies[0].is_axis_random());

        let err = SweepTables::from_yaml_str(&raw.replace("[10]", "[7]"))
            .expect_err("7 views cannot split into blocks of five");
        let msg = err.to_string();
        assert!(msg.contains("policies.Axis_Random: view count 7"), "{}", msg);
        assert!(msg.contains("policies.Spin: view count 7"), "{}", msg);
    }

    #[test]
    fn negative_noise_bounds_are_rejected() {
        let mut tables = SweepTables::preset(Preset::Occplane);
        tables.noise_bounds[1].tsdf_half_width = -0.06;
        tables.noise_bounds[2].noise_fraction = f64::NAN;
        let msg = tables.validate().expect_err("negative bound").to_string();
        assert!(msg.contains("noise_bounds[1].tsdf_half_width: -0.06"), "{}", msg);
        assert!(msg.contains("noise_bounds[2].noise_fraction"), "{}", msg);
    }

    #[test]
    fn standard_profiles_always_carry_noise_flag() {
        let tables = SweepTables::preset(Preset::Standard);
        let lines: Vec<_> = tables
            .intrinsics
            .iter()
            .map(|i| i.engine_args(&tables).expect("args"))
            .collect();
        assert_eq!(
            lines,
            vec![
                "--d455 1.0 --noise 0.0",
                "--d455 1.0 --noise 0.02",
                "--d455 1.0 --noise 0.1"
            ]
        );
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut tables = SweepTables::preset(Preset::Standard);
        tables.view_counts = vec![5, 7];
        tables.intrinsics.push(IntrinsicProfile::new("bad", "--d455 1.0", 9));
        tables.rejection_rate = 1.5;
        let msg = tables.validate().expect_err("should fail").to_string();
        assert!(msg.contains("view count 7 is not a multiple of 5"), "{}", msg);
        assert!(msg.contains("noise_index 9 out of range"), "{}", msg);
        assert!(msg.contains("rejection_rate"), "{}", msg);
    }

    #[test]
    fn digest_changes_with_tables() {
        let a = SweepTables::preset(Preset::Standard);
        let mut b = a.clone();
        assert_eq!(a.digest().expect("digest"), b.digest().expect("digest"));
        b.view_radius = 3.0;
        assert_ne!(a.digest().expect("digest"), b.digest().expect("digest"));
    }
}

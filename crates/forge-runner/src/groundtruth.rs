//! Stdin blocks for the `MakeGroundTruth` and `PrecomputeViews` helpers.

use anyhow::{anyhow, Result};
use std::path::Path;
use std::str::FromStr;

use crate::protocol::{fmt_float, STDIN_NEWLINE};

/// Fixed arguments the precompute executable is launched with.
pub const PRECOMPUTE_ENGINE_ARGS: &[&str] = &["--d455", "0.5", "--noise", "0"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridProperties {
    pub nx: u32,
    pub ny: u32,
    pub nz: u32,
    pub resolution: f64,
}

impl Default for GridProperties {
    fn default() -> Self {
        Self {
            nx: 101,
            ny: 101,
            nz: 101,
            resolution: 0.02,
        }
    }
}

impl GridProperties {
    pub fn new(nx: u32, ny: u32, nz: u32, resolution: f64) -> Self {
        Self {
            nx,
            ny,
            nz,
            resolution,
        }
    }

    pub fn engine_args(&self) -> String {
        format!(
            "--nx {} --ny {} --nz {} --resolution {}",
            self.nx,
            self.ny,
            self.nz,
            fmt_float(self.resolution)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rotation {
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
    pub degrees: bool,
}

impl Rotation {
    pub fn degrees(rx: f64, ry: f64, rz: f64) -> Self {
        Self {
            rx,
            ry,
            rz,
            degrees: true,
        }
    }

    pub fn engine_args(&self) -> String {
        let mut line = format!(
            "--rx {} --ry {} --rz {}",
            fmt_float(self.rx),
            fmt_float(self.ry),
            fmt_float(self.rz)
        );
        if self.degrees {
            line.push_str(" --degrees");
        }
        line
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Translation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Translation {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn engine_args(&self) -> String {
        format!(
            "--x {} --y {} --z {}",
            fmt_float(self.x),
            fmt_float(self.y),
            fmt_float(self.z)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapePose {
    pub rotation: Option<Rotation>,
    pub translation: Option<Translation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeSpec {
    Mesh {
        file: String,
        scale: Option<f64>,
        pose: ShapePose,
    },
    Sphere {
        radius: f64,
        pose: ShapePose,
    },
    Box {
        l: f64,
        w: f64,
        h: f64,
        pose: ShapePose,
    },
}

impl ShapeSpec {
    pub fn mesh(file: &str) -> Self {
        ShapeSpec::Mesh {
            file: file.to_string(),
            scale: None,
            pose: ShapePose::default(),
        }
    }

    pub fn scaled_mesh(file: &str, scale: f64) -> Self {
        ShapeSpec::Mesh {
            file: file.to_string(),
            scale: Some(scale),
            pose: ShapePose::default(),
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.pose_mut().rotation = Some(rotation);
        self
    }

    pub fn with_translation(mut self, translation: Translation) -> Self {
        self.pose_mut().translation = Some(translation);
        self
    }

    fn pose_mut(&mut self) -> &mut ShapePose {
        match self {
            ShapeSpec::Mesh { pose, .. }
            | ShapeSpec::Sphere { pose, .. }
            | ShapeSpec::Box { pose, .. } => pose,
        }
    }

    fn pose(&self) -> &ShapePose {
        match self {
            ShapeSpec::Mesh { pose, .. }
            | ShapeSpec::Sphere { pose, .. }
            | ShapeSpec::Box { pose, .. } => pose,
        }
    }

    pub fn engine_args(&self) -> String {
        let mut line = match self {
            ShapeSpec::Mesh { file, scale, .. } => {
                let mut s = format!("--file {}", file);
                if let Some(scale) = scale {
                    s.push_str(&format!(" --scale {}", fmt_float(*scale)));
                }
                s
            }
            ShapeSpec::Sphere { radius, .. } => {
                format!("--shape sphere --radius {}", fmt_float(*radius))
            }
            ShapeSpec::Box { l, w, h, .. } => format!(
                "--shape box --l {} --w {} --h {}",
                fmt_float(*l),
                fmt_float(*w),
                fmt_float(*h)
            ),
        };
        let pose = self.pose();
        if let Some(rotation) = &pose.rotation {
            line.push(' ');
            line.push_str(&rotation.engine_args());
        }
        if let Some(translation) = &pose.translation {
            line.push(' ');
            line.push_str(&translation.engine_args());
        }
        line
    }
}

/// Reconstruction grid placement plus the shape placed in it.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSetup {
    pub grid: GridProperties,
    pub rotation: Rotation,
    pub translation: Translation,
    pub shape: ShapeSpec,
}

impl SceneSetup {
    fn push_grid_lines(&self, lines: &mut Vec<String>) {
        lines.push(self.grid.engine_args());
        lines.push(self.rotation.engine_args());
        lines.push(self.translation.engine_args());
    }
}

const GROUND_TRUTH_NAMES: &[&str] = &[
    "sphere",
    "box",
    "box-rotated",
    "bin",
    "bunny",
    "rotor-blade",
    "rotor-blade-real",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundTruthPreset {
    Sphere,
    Box,
    BoxRotated,
    Bin,
    Bunny,
    RotorBlade,
    RotorBladeReal,
}

impl GroundTruthPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroundTruthPreset::Sphere => "sphere",
            GroundTruthPreset::Box => "box",
            GroundTruthPreset::BoxRotated => "box-rotated",
            GroundTruthPreset::Bin => "bin",
            GroundTruthPreset::Bunny => "bunny",
            GroundTruthPreset::RotorBlade => "rotor-blade",
            GroundTruthPreset::RotorBladeReal => "rotor-blade-real",
        }
    }

    pub fn setup(&self) -> SceneSetup {
        let cube = Translation::new(-1.0, -1.0, -1.0);
        let (grid, translation, shape) = match self {
            GroundTruthPreset::Sphere => (
                GridProperties {
                    resolution: 0.01,
                    ..GridProperties::default()
                },
                Translation::new(-0.5, -0.5, -0.5),
                ShapeSpec::mesh("sphere.stl"),
            ),
            GroundTruthPreset::Box => (GridProperties::default(), cube, ShapeSpec::mesh("box.stl")),
            // Rotated so no voxel face lines up with a mesh face or edge.
            GroundTruthPreset::BoxRotated => (
                GridProperties::default(),
                cube,
                ShapeSpec::mesh("box.stl").with_rotation(Rotation::degrees(23.81, 15.92, 0.0)),
            ),
            GroundTruthPreset::Bin => (GridProperties::default(), cube, ShapeSpec::mesh("bin.stl")),
            GroundTruthPreset::Bunny => (
                GridProperties::default(),
                cube,
                ShapeSpec::mesh("bunny.stl").with_translation(Translation::new(-0.2, 0.0, -0.4)),
            ),
            GroundTruthPreset::RotorBlade => (
                GridProperties::new(151, 451, 101, 0.01),
                Translation::new(-0.75, -2.25, -0.5),
                ShapeSpec::scaled_mesh("rotor_blade.stl", 0.3),
            ),
            GroundTruthPreset::RotorBladeReal => real_rotor_blade(),
        };
        SceneSetup {
            grid,
            rotation: Rotation::default(),
            translation,
            shape,
        }
    }
}

impl FromStr for GroundTruthPreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "sphere" => GroundTruthPreset::Sphere,
            "box" => GroundTruthPreset::Box,
            "box-rotated" => GroundTruthPreset::BoxRotated,
            "bin" => GroundTruthPreset::Bin,
            "bunny" => GroundTruthPreset::Bunny,
            "rotor-blade" => GroundTruthPreset::RotorBlade,
            "rotor-blade-real" => GroundTruthPreset::RotorBladeReal,
            other => {
                return Err(anyhow!(
                    "Mesh name '{}' is invalid (expected one of: {})",
                    other,
                    GROUND_TRUTH_NAMES.join(", ")
                ))
            }
        })
    }
}

fn real_rotor_blade() -> (GridProperties, Translation, ShapeSpec) {
    (
        GridProperties::new(201, 501, 101, 0.0005),
        Translation::new(-0.05, -0.125, -0.025),
        ShapeSpec::scaled_mesh("rotor_blade.stl", 0.02),
    )
}

/// `MakeGroundTruth`: path, grid, rotation, translation, shapes, then confirm
/// generating both the occupancy and TSDF data.
pub fn encode_make_ground_truth(out_path: &Path, setup: &SceneSetup) -> String {
    let mut lines = vec![out_path.display().to_string()];
    setup.push_grid_lines(&mut lines);
    lines.push(setup.shape.engine_args());
    lines.push(String::new());
    lines.push("y".to_string());
    lines.push("y".to_string());
    let mut stdin = lines.join(STDIN_NEWLINE);
    stdin.push_str(STDIN_NEWLINE);
    stdin
}

const PRECOMPUTE_NAMES: &[&str] = &["box", "hull", "bunny", "rotor-blade-real"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecomputePreset {
    Box,
    Hull,
    Bunny,
    RotorBladeReal,
}

impl PrecomputePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecomputePreset::Box => "box",
            PrecomputePreset::Hull => "hull",
            PrecomputePreset::Bunny => "bunny",
            PrecomputePreset::RotorBladeReal => "rotor-blade-real",
        }
    }

    pub fn setup(&self) -> SceneSetup {
        let offset = Translation::new(-0.2, 0.0, -0.4);
        let (grid, translation, shape) = match self {
            PrecomputePreset::Box => (
                GridProperties::default(),
                Translation::new(-1.0, -1.0, -1.0),
                ShapeSpec::mesh("box.stl").with_translation(offset),
            ),
            PrecomputePreset::Hull => (
                GridProperties::default(),
                Translation::new(-1.0, -1.0, -1.0),
                ShapeSpec::mesh("bunny_hull.stl").with_translation(offset),
            ),
            PrecomputePreset::Bunny => (
                GridProperties::default(),
                Translation::new(-1.0, -1.0, -1.0),
                ShapeSpec::mesh("bunny.stl").with_translation(offset),
            ),
            PrecomputePreset::RotorBladeReal => real_rotor_blade(),
        };
        SceneSetup {
            grid,
            rotation: Rotation::default(),
            translation,
            shape,
        }
    }
}

impl FromStr for PrecomputePreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "box" => PrecomputePreset::Box,
            "hull" => PrecomputePreset::Hull,
            "bunny" => PrecomputePreset::Bunny,
            "rotor-blade-real" => PrecomputePreset::RotorBladeReal,
            other => {
                return Err(anyhow!(
                    "Mesh name '{}' is invalid (expected one of: {})",
                    other,
                    PRECOMPUTE_NAMES.join(", ")
                ))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewSampling {
    /// 0.9 suits the real rotor blade.
    pub radius: f64,
    pub min_similarity: f64,
    pub n_views: u32,
    pub n_store: u32,
    pub alpha: f64,
}

impl Default for ViewSampling {
    fn default() -> Self {
        Self {
            radius: 2.5,
            min_similarity: 0.3,
            n_views: 100,
            n_store: 10,
            alpha: 0.5,
        }
    }
}

pub fn encode_precompute_views(out_path: &Path, setup: &SceneSetup, sampling: &ViewSampling) -> String {
    let mut lines = vec![out_path.display().to_string()];
    setup.push_grid_lines(&mut lines);
    lines.push(fmt_float(sampling.radius));
    lines.push(fmt_float(sampling.min_similarity));
    lines.push(sampling.n_views.to_string());
    lines.push(sampling.n_store.to_string());
    lines.push(fmt_float(sampling.alpha));
    lines.push(setup.shape.engine_args());
    lines.push(String::new());
    lines.push(String::new());
    let mut stdin = lines.join(STDIN_NEWLINE);
    stdin.push_str(STDIN_NEWLINE);
    stdin
}

//! Configuration types for engine instances.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{SeedPattern, SimParams, WarmupConfig};
use crate::compute::BackendTier;

/// Smallest grid edge the engine will allocate, including after
/// allocation-failure retries at reduced dimensions.
pub const MIN_GRID_DIM: usize = 8;

/// Upper bound on CPU sub-steps per driver step.
pub const MAX_CPU_SUBSTEPS: u32 = 16;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Grid width in cells.
    pub width: usize,
    /// Grid height in cells.
    pub height: usize,
    /// Highest precision tier the engine may try.
    pub precision: PrecisionPreference,
    /// Stencil addressing at the grid edge.
    pub boundary: Boundary,
    /// Optional kernel extensions.
    pub extensions: ExtensionConfig,
    /// Pattern written by `reset` and at init/resize.
    pub seed_pattern: SeedPattern,
    /// Seed for every random source. `None` draws one at init.
    pub rng_seed: Option<u64>,
    /// Number of Euler sub-steps per step on the CPU tier.
    pub cpu_substeps: u32,
    /// Whether the CPU tier may be selected at all.
    pub allow_cpu: bool,
    /// Tiers forced to fail their completeness check.
    pub disabled_tiers: Vec<BackendTier>,
    /// Initial parameter set.
    pub params: SimParams,
    /// Optional startup burst applied after each (re)seed.
    pub warmup: Option<WarmupConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            precision: PrecisionPreference::Auto,
            boundary: Boundary::Wrap,
            extensions: ExtensionConfig::default(),
            seed_pattern: SeedPattern::default(),
            rng_seed: None,
            cpu_substeps: 1,
            allow_cpu: true,
            disabled_tiers: Vec::new(),
            params: SimParams::default(),
            warmup: None,
        }
    }
}

/// Requested precision ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionPreference {
    /// Best available tier.
    #[default]
    Auto,
    High,
    Half,
    Low,
    /// Skip the GPU entirely.
    Cpu,
}

impl PrecisionPreference {
    /// Highest tier this preference allows.
    pub fn ceiling(self) -> BackendTier {
        match self {
            Self::Auto | Self::High => BackendTier::HighPrecision,
            Self::Half => BackendTier::HalfPrecision,
            Self::Low => BackendTier::LowPrecision,
            Self::Cpu => BackendTier::CpuScalar,
        }
    }
}

/// Boundary policy for stencil access. Fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// Toroidal addressing.
    #[default]
    Wrap,
    /// Edge cells repeat outward.
    Clamp,
}

impl Boundary {
    /// Index of the neighbour before `i` on an axis of length `n`.
    #[inline]
    pub fn prev(self, i: usize, n: usize) -> usize {
        match self {
            Self::Wrap => (i + n - 1) % n,
            Self::Clamp => i.saturating_sub(1),
        }
    }

    /// Index of the neighbour after `i` on an axis of length `n`.
    #[inline]
    pub fn next(self, i: usize, n: usize) -> usize {
        match self {
            Self::Wrap => (i + 1) % n,
            Self::Clamp => (i + 1).min(n - 1),
        }
    }

    /// Resolve a signed coordinate to a cell index, or `None` when it falls
    /// outside a clamped grid.
    #[inline]
    pub fn resolve(self, i: isize, n: usize) -> Option<usize> {
        match self {
            Self::Wrap => Some(i.rem_euclid(n as isize) as usize),
            Self::Clamp => (i >= 0 && (i as usize) < n).then_some(i as usize),
        }
    }

    /// Shader constant for this policy.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Wrap => 0,
            Self::Clamp => 1,
        }
    }
}

/// Toggles for the drift/crowding layer on top of the base kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExtensionConfig {
    /// Generate the radius field and slow diffusion where it is large.
    pub radius_field: bool,
    /// Density-dependent reaction attenuation (uses the radius field).
    pub crowding: bool,
    /// Diffusiophoresis-like drift term.
    pub drift: bool,
}

impl ExtensionConfig {
    /// Every extension enabled.
    pub fn all() -> Self {
        Self {
            radius_field: true,
            crowding: true,
            drift: true,
        }
    }

    /// Bit flags consumed by the step shader.
    pub fn bits(self) -> u32 {
        (self.radius_field as u32) | ((self.crowding as u32) << 1) | ((self.drift as u32) << 2)
    }
}

impl EngineConfig {
    /// Ordered tiers to probe, from the preference ceiling downward.
    pub fn tier_ladder(&self) -> Vec<BackendTier> {
        BackendTier::ladder_from(self.precision.ceiling())
            .into_iter()
            .filter(|tier| self.allow_cpu || !tier.is_cpu())
            .collect()
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width < MIN_GRID_DIM || self.height < MIN_GRID_DIM {
            return Err(ConfigError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.cpu_substeps == 0 || self.cpu_substeps > MAX_CPU_SUBSTEPS {
            return Err(ConfigError::InvalidSubsteps(self.cpu_substeps));
        }
        if self.tier_ladder().is_empty() {
            return Err(ConfigError::NoTiers);
        }
        self.seed_pattern.validate(self.width, self.height)?;
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid dimensions {width}x{height} are below the 8-cell minimum")]
    InvalidDimensions { width: usize, height: usize },
    #[error("CPU sub-step count {0} must be between 1 and 16")]
    InvalidSubsteps(u32),
    #[error("Precision preference leaves no tier to try with the CPU tier disabled")]
    NoTiers,
    #[error("Seed pattern is invalid: {0}")]
    InvalidSeed(&'static str),
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

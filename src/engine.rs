//! Engine orchestrator.
//!
//! An [`Engine`] owns one simulation: its parameter store, the active step
//! kernel and the random sources that seed it. It walks the precision ladder
//! at init and on resize, and demotes to the next tier when the active
//! backend fails at runtime. Only exhaustion of the whole ladder reaches the
//! caller.
//!
//! ```text
//! Probing -> Running(tier) -> Running(lower tier) -> ... -> Fatal
//! ```

use std::sync::Arc;

use rand::prelude::*;
use serde_json::{Map, Value};

use crate::compute::gpu::{GpuDevice, GpuError, GpuKernel};
use crate::compute::{
    BackendTier, CpuKernel, FieldState, FieldStats, KernelError, NoGpu, ProbeOutcome, RadiusField,
    Restricted, StepKernel, TargetAllocator, probe,
};
use crate::schema::{ConfigError, EngineConfig, MIN_GRID_DIM, ParameterStore, SimParams, Seeder};

// Stream identifiers mixed into the base seed for each random source.
const SEEDER_STREAM: u64 = 0x5EED_5EED_5EED_5EED;
const NOISE_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;
const RADIUS_STREAM: u64 = 0xD1B5_4A32_D192_ED03;

/// Lifecycle of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Selecting a tier (init, resize, or after a demotion).
    Probing,
    /// Stepping on the given tier.
    Running(BackendTier),
    /// Every tier failed. The last field snapshot is still readable.
    Fatal,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Probing => f.write_str("probing"),
            Self::Running(tier) => write!(f, "running on {tier}"),
            Self::Fatal => f.write_str("fatal"),
        }
    }
}

/// Engine errors.
///
/// Only [`EngineError::BackendUnavailable`] and
/// [`EngineError::InvalidConfig`] are returned to callers; the other
/// variants describe failures the engine recovered from and are kept in
/// [`Engine::fallback_history`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No backend tier could be activated")]
    BackendUnavailable,

    #[error("Precision tier {tier} is unavailable")]
    PrecisionUnavailable { tier: BackendTier },

    #[error("Could not allocate a {width}x{height} field at {tier}")]
    AllocationFailure {
        tier: BackendTier,
        width: usize,
        height: usize,
    },

    #[error("Step dispatch failed on {tier}: {source}")]
    RuntimeDispatchFailure {
        tier: BackendTier,
        #[source]
        source: KernelError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Outcome of walking the ladder at one grid size.
enum Activation {
    Activated,
    /// At least one tier failed for lack of memory.
    OutOfMemory,
    Exhausted,
}

/// One reaction-diffusion simulation instance.
pub struct Engine {
    config: EngineConfig,
    params: ParameterStore,
    gpu: Option<GpuDevice>,
    kernel: Option<StepKernel>,
    state: EngineState,
    width: usize,
    height: usize,
    base_seed: u64,
    seeder: Seeder,
    noise_rng: StdRng,
    /// Steps taken since the field was last seeded; drives the warm-up burst.
    steps_since_seed: u64,
    /// Last field known to be valid, served once the engine is fatal.
    last_snapshot: Option<FieldState>,
    fallbacks: Vec<EngineError>,
}

impl Engine {
    /// Probe the tier ladder, allocate the field and seed it.
    pub fn init(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let base_seed = config.rng_seed.unwrap_or_else(rand::random);
        log::debug!("Engine seed: {base_seed}");

        let gpu = Self::acquire_gpu(&config);
        let (width, height) = (config.width, config.height);

        let mut engine = Self {
            params: ParameterStore::new(config.params),
            gpu,
            kernel: None,
            state: EngineState::Probing,
            width,
            height,
            base_seed,
            seeder: Seeder::new(base_seed ^ SEEDER_STREAM, config.boundary),
            noise_rng: StdRng::seed_from_u64(base_seed ^ NOISE_STREAM),
            steps_since_seed: 0,
            last_snapshot: None,
            fallbacks: Vec::new(),
            config,
        };

        let ladder = engine.config.tier_ladder();
        engine.activate(&ladder)?;
        Ok(engine)
    }

    /// Open a GPU device only when some GPU tier could be selected.
    fn acquire_gpu(config: &EngineConfig) -> Option<GpuDevice> {
        let wants_gpu = config
            .tier_ladder()
            .iter()
            .any(|tier| !tier.is_cpu() && !config.disabled_tiers.contains(tier));
        if !wants_gpu {
            return None;
        }

        match GpuDevice::acquire() {
            Ok(gpu) => Some(gpu),
            Err(e) => {
                log::warn!("GPU unavailable, GPU tiers will fail their probe: {e}");
                None
            }
        }
    }

    fn radius_field(&self, width: usize, height: usize) -> RadiusField {
        if self.config.extensions.radius_field {
            RadiusField::generate(width, height, self.base_seed ^ RADIUS_STREAM, self.config.boundary)
        } else {
            RadiusField::zeros(width, height)
        }
    }

    fn reset_random_sources(&mut self) {
        self.seeder = Seeder::new(self.base_seed ^ SEEDER_STREAM, self.config.boundary);
        self.noise_rng = StdRng::seed_from_u64(self.base_seed ^ NOISE_STREAM);
    }

    /// Select and install a kernel from `tiers`, halving the grid when every
    /// tier ran out of memory.
    fn activate(&mut self, tiers: &[BackendTier]) -> Result<(), EngineError> {
        self.state = EngineState::Probing;
        let (mut width, mut height) = (self.width, self.height);

        loop {
            match self.activate_at(tiers, width, height) {
                Activation::Activated => return Ok(()),
                Activation::OutOfMemory if width / 2 >= MIN_GRID_DIM && height / 2 >= MIN_GRID_DIM => {
                    width /= 2;
                    height /= 2;
                    log::warn!("Retrying at reduced size {width}x{height}");
                }
                Activation::OutOfMemory | Activation::Exhausted => {
                    self.enter_fatal();
                    return Err(EngineError::BackendUnavailable);
                }
            }
        }
    }

    fn activate_at(&mut self, tiers: &[BackendTier], width: usize, height: usize) -> Activation {
        let radius = Arc::new(self.radius_field(width, height));
        let mut remaining = tiers.to_vec();
        let mut out_of_memory = false;

        loop {
            let allocator: &dyn TargetAllocator = match &self.gpu {
                Some(gpu) => gpu,
                None => &NoGpu,
            };
            let restricted = Restricted {
                inner: allocator,
                disabled: &self.config.disabled_tiers,
            };
            let outcome = probe(&restricted, &remaining);

            // Every tier ahead of the selected one failed its check
            let skipped = remaining.iter().take_while(|&&t| match outcome {
                ProbeOutcome::Selected(selected) => t != selected,
                ProbeOutcome::Exhausted => true,
            });
            for &tier in skipped {
                self.fallbacks.push(EngineError::PrecisionUnavailable { tier });
            }

            let tier = match outcome {
                ProbeOutcome::Selected(tier) => tier,
                ProbeOutcome::Exhausted if out_of_memory => return Activation::OutOfMemory,
                ProbeOutcome::Exhausted => return Activation::Exhausted,
            };

            match self.install(tier, &radius) {
                Ok(()) => {
                    log::info!("Engine running on {tier} at {width}x{height}");
                    return Activation::Activated;
                }
                Err(e) => {
                    let failure = if e.is_allocation() {
                        out_of_memory = true;
                        EngineError::AllocationFailure {
                            tier,
                            width,
                            height,
                        }
                    } else {
                        EngineError::PrecisionUnavailable { tier }
                    };
                    log::warn!("{failure}: {e}");
                    self.fallbacks.push(failure);
                    remaining.retain(|t| *t > tier);
                }
            }
        }
    }

    /// Build a kernel at `tier`, seed it and make it active.
    fn install(&mut self, tier: BackendTier, radius: &Arc<RadiusField>) -> Result<(), KernelError> {
        let mut kernel = match (tier, &self.gpu) {
            (BackendTier::CpuScalar, _) => match self.kernel.take() {
                // Resizing on the CPU tier reallocates the existing buffers
                Some(StepKernel::Cpu(mut cpu)) => {
                    cpu.resize(radius.clone())?;
                    StepKernel::Cpu(cpu)
                }
                previous => {
                    if let Some(old) = previous {
                        old.release();
                    }
                    StepKernel::Cpu(CpuKernel::new(
                        radius.clone(),
                        self.config.boundary,
                        self.config.extensions,
                        self.config.cpu_substeps,
                    )?)
                }
            },
            (_, Some(gpu)) => StepKernel::Gpu(GpuKernel::new(
                gpu,
                tier,
                radius,
                self.config.boundary,
                self.config.extensions,
            )?),
            (_, None) => return Err(GpuError::NoAdapter.into()),
        };

        let field = self
            .seeder
            .seed(&self.config.seed_pattern, radius.width, radius.height);
        if let Err(e) = kernel.upload(&field) {
            kernel.release();
            return Err(e);
        }

        if let Some(old) = self.kernel.replace(kernel) {
            old.release();
        }
        self.width = radius.width;
        self.height = radius.height;
        self.steps_since_seed = 0;
        self.last_snapshot = Some(field);
        self.state = EngineState::Running(tier);
        Ok(())
    }

    fn enter_fatal(&mut self) {
        if let Some(kernel) = self.kernel.take() {
            kernel.release();
        }
        self.state = EngineState::Fatal;
        log::error!("Engine is fatal: every backend tier failed");
    }

    /// Drop the failing tier and continue on the next lower one, reseeded.
    fn demote(&mut self, source: KernelError) -> Result<(), EngineError> {
        let Some(kernel) = self.kernel.take() else {
            return Err(EngineError::BackendUnavailable);
        };
        let tier = kernel.tier();
        kernel.release();

        let failure = EngineError::RuntimeDispatchFailure { tier, source };
        log::warn!("{failure}; demoting");
        self.fallbacks.push(failure);

        let lower: Vec<BackendTier> = self
            .config
            .tier_ladder()
            .into_iter()
            .filter(|t| *t > tier)
            .collect();
        self.activate(&lower)
    }

    /// Parameters for the next step, including any warm-up burst.
    fn step_params(&self) -> SimParams {
        let params = self.params.snapshot();
        match &self.config.warmup {
            Some(warmup) if self.steps_since_seed < warmup.steps => params.with_warmup(warmup),
            _ => params,
        }
    }

    /// Advance exactly `count` steps.
    ///
    /// Parameters are re-read before every step. GPU work is complete when
    /// this returns. A backend failure is absorbed by demoting; the error is
    /// returned only once no tier is left.
    pub fn step(&mut self, count: u64) -> Result<(), EngineError> {
        for _ in 0..count {
            let params = self.step_params();
            let noise_seed = self.noise_rng.next_u32();
            let kernel = self.kernel.as_mut().ok_or(EngineError::BackendUnavailable)?;
            match kernel.step(&params, noise_seed) {
                Ok(()) => self.steps_since_seed += 1,
                Err(e) => self.demote(e)?,
            }
        }

        let kernel = self.kernel.as_ref().ok_or(EngineError::BackendUnavailable)?;
        if let Err(e) = kernel.sync() {
            self.demote(e)?;
        }
        Ok(())
    }

    /// Snapshot of the current field.
    ///
    /// Once fatal, returns the last valid snapshot.
    pub fn read_current(&mut self) -> Result<FieldState, EngineError> {
        loop {
            let Some(kernel) = self.kernel.as_ref() else {
                return self
                    .last_snapshot
                    .clone()
                    .ok_or(EngineError::BackendUnavailable);
            };
            match kernel.read_current() {
                Ok(field) => {
                    self.last_snapshot = Some(field.clone());
                    return Ok(field);
                }
                Err(e) => self.demote(e)?,
            }
        }
    }

    /// Write a small randomized patch around grid coordinate `(x, y)`.
    ///
    /// Coordinates outside the grid are clamped so the patch stays inside.
    pub fn inject_at(&mut self, x: f32, y: f32) -> Result<(), EngineError> {
        let patch = self.seeder.inject_patch(x, y, self.width, self.height);
        let kernel = self.kernel.as_mut().ok_or(EngineError::BackendUnavailable)?;
        if let Err(e) = kernel.write_patch(&patch) {
            self.demote(e)?;
        }
        Ok(())
    }

    /// [`Self::inject_at`] with coordinates normalised to [0, 1].
    pub fn inject_normalized(&mut self, nx: f32, ny: f32) -> Result<(), EngineError> {
        self.inject_at(nx * self.width as f32, ny * self.height as f32)
    }

    /// Reallocate at new dimensions, re-probe and reseed.
    pub fn resize(&mut self, width: usize, height: usize) -> Result<(), EngineError> {
        if width < MIN_GRID_DIM || height < MIN_GRID_DIM {
            return Err(ConfigError::InvalidDimensions { width, height }.into());
        }
        // A CPU kernel is kept so its buffers can be resized in place
        if matches!(self.kernel, Some(StepKernel::Gpu(_))) {
            if let Some(kernel) = self.kernel.take() {
                kernel.release();
            }
        }
        self.config.width = width;
        self.config.height = height;
        self.width = width;
        self.height = height;
        self.reset_random_sources();

        let ladder = self.config.tier_ladder();
        self.activate(&ladder)
    }

    /// Reseed the existing buffers, restarting every random source.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.reset_random_sources();
        let field = self
            .seeder
            .seed(&self.config.seed_pattern, self.width, self.height);
        let kernel = self.kernel.as_mut().ok_or(EngineError::BackendUnavailable)?;
        match kernel.upload(&field) {
            Ok(()) => {
                self.steps_since_seed = 0;
                self.last_snapshot = Some(field);
                Ok(())
            }
            Err(e) => self.demote(e),
        }
    }

    /// Free backend resources now.
    pub fn release(mut self) {
        if let Some(kernel) = self.kernel.take() {
            kernel.release();
        }
        log::debug!("Engine released");
    }

    /// Apply a partial parameter map. Returns the number of keys applied.
    pub fn set_parameters(&self, partial: &Map<String, Value>) -> usize {
        self.params.set_parameters(partial)
    }

    /// Handle onto the shared parameter store, for writers on other threads.
    pub fn parameters(&self) -> ParameterStore {
        self.params.clone()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn active_tier(&self) -> Option<BackendTier> {
        match self.state {
            EngineState::Running(tier) => Some(tier),
            _ => None,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Failures the engine recovered from, oldest first.
    pub fn fallback_history(&self) -> &[EngineError] {
        &self.fallbacks
    }

    /// Statistics of the current field.
    pub fn stats(&mut self) -> Result<FieldStats, EngineError> {
        Ok(FieldStats::from_state(&self.read_current()?))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(kernel) = self.kernel.take() {
            kernel.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExtensionConfig, PrecisionPreference, SeedPattern, WarmupConfig};

    fn cpu_config(width: usize, height: usize) -> EngineConfig {
        EngineConfig {
            width,
            height,
            precision: PrecisionPreference::Cpu,
            rng_seed: Some(42),
            ..Default::default()
        }
    }

    fn injected_fault() -> KernelError {
        KernelError::Gpu(GpuError::Panicked("injected fault".to_string()))
    }

    fn cpu_kernel(engine: &Engine) -> &CpuKernel {
        match &engine.kernel {
            Some(StepKernel::Cpu(kernel)) => kernel,
            _ => panic!("expected the CPU tier"),
        }
    }

    fn assert_fatal_after_cpu_failure(engine: &mut Engine, snapshot: &FieldState) {
        assert_eq!(engine.state(), EngineState::Fatal);
        assert_eq!(engine.active_tier(), None);
        assert_eq!(&engine.read_current().unwrap(), snapshot);
        assert!(matches!(
            engine.fallback_history(),
            [EngineError::RuntimeDispatchFailure {
                tier: BackendTier::CpuScalar,
                ..
            }]
        ));
    }

    #[test]
    fn test_init_selects_cpu_when_requested() {
        let engine = Engine::init(cpu_config(32, 32)).unwrap();
        assert_eq!(engine.state(), EngineState::Running(BackendTier::CpuScalar));
        assert_eq!(engine.active_tier(), Some(BackendTier::CpuScalar));
    }

    #[test]
    fn test_all_gpu_tiers_disabled_falls_back_to_cpu() {
        let config = EngineConfig {
            precision: PrecisionPreference::Auto,
            disabled_tiers: vec![
                BackendTier::HighPrecision,
                BackendTier::HalfPrecision,
                BackendTier::LowPrecision,
            ],
            ..cpu_config(32, 32)
        };
        let mut engine = Engine::init(config).unwrap();
        assert_eq!(engine.active_tier(), Some(BackendTier::CpuScalar));
        let skipped: Vec<BackendTier> = engine
            .fallback_history()
            .iter()
            .filter_map(|e| match e {
                EngineError::PrecisionUnavailable { tier } => Some(*tier),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, &BackendTier::LADDER[..3]);
        engine.step(5).unwrap();
        let field = engine.read_current().unwrap();
        assert!(field.v.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_no_tier_is_backend_unavailable() {
        let config = EngineConfig {
            precision: PrecisionPreference::Low,
            allow_cpu: false,
            disabled_tiers: vec![BackendTier::LowPrecision],
            ..cpu_config(32, 32)
        };
        assert!(matches!(
            Engine::init(config),
            Err(EngineError::BackendUnavailable)
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(matches!(
            Engine::init(cpu_config(4, 32)),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_reset_matches_fresh_init() {
        let config = EngineConfig {
            params: SimParams {
                noise_amt: 0.005,
                ..SimParams::crowded()
            },
            extensions: ExtensionConfig::all(),
            ..cpu_config(48, 48)
        };

        let mut fresh = Engine::init(config.clone()).unwrap();
        fresh.step(30).unwrap();
        let expected = fresh.read_current().unwrap();

        let mut reused = Engine::init(config).unwrap();
        reused.step(17).unwrap();
        reused.inject_at(5.0, 5.0).unwrap();
        reused.reset().unwrap();
        reused.step(30).unwrap();
        assert_eq!(reused.read_current().unwrap(), expected);
    }

    #[test]
    fn test_resize_yields_new_dimensions_default_seeded() {
        let mut engine = Engine::init(cpu_config(32, 32)).unwrap();
        engine.step(10).unwrap();
        engine.resize(64, 48).unwrap();

        let field = engine.read_current().unwrap();
        assert_eq!((field.width, field.height), (64, 48));
        assert_eq!(field.u.len(), 64 * 48);
        assert_eq!(field.get(0, 0), (1.0, 0.0));
        let (_, v) = field.get(32, 24);
        assert!((0.25..0.35).contains(&v));

        let fresh = Engine::init(cpu_config(64, 48)).unwrap().read_current().unwrap();
        assert_eq!(field, fresh);
    }

    #[test]
    fn test_repeated_resize_on_cpu() {
        let mut engine = Engine::init(cpu_config(32, 32)).unwrap();
        engine.resize(16, 16).unwrap();
        engine.step(5).unwrap();
        engine.resize(64, 40).unwrap();

        assert_eq!(engine.state(), EngineState::Running(BackendTier::CpuScalar));
        assert_eq!((engine.width(), engine.height()), (64, 40));
        let fresh = Engine::init(cpu_config(64, 40)).unwrap().read_current().unwrap();
        assert_eq!(engine.read_current().unwrap(), fresh);

        engine.step(5).unwrap();
        assert_eq!(engine.read_current().unwrap().u.len(), 64 * 40);
    }

    #[test]
    fn test_resize_rejects_tiny_grid() {
        let mut engine = Engine::init(cpu_config(32, 32)).unwrap();
        assert!(matches!(
            engine.resize(2, 32),
            Err(EngineError::InvalidConfig(_))
        ));
        assert_eq!(engine.width(), 32);
    }

    #[test]
    fn test_set_parameters_applies_to_next_step() {
        let config = EngineConfig {
            seed_pattern: SeedPattern::Uniform,
            ..cpu_config(16, 16)
        };
        let mut engine = Engine::init(config).unwrap();

        let mut update = Map::new();
        update.insert("F".into(), Value::from(0.0));
        update.insert("k".into(), Value::from(0.0));
        update.insert("Du".into(), Value::from(0.0));
        update.insert("Dv".into(), Value::from(0.0));
        update.insert("unknown".into(), Value::from(1.0));
        assert_eq!(engine.set_parameters(&update), 4);

        engine.inject_at(8.0, 8.0).unwrap();
        let before = engine.read_current().unwrap();
        engine.step(3).unwrap();
        let after = engine.read_current().unwrap();
        // Without diffusion the patch cannot spread
        for y in 0..16 {
            for x in 0..16 {
                if before.get(x, y) == (1.0, 0.0) {
                    assert_eq!(after.get(x, y), (1.0, 0.0));
                }
            }
        }
        assert_ne!(before, after);
    }

    #[test]
    fn test_zero_parameters_on_uniform_field() {
        let config = EngineConfig {
            seed_pattern: SeedPattern::Uniform,
            params: SimParams {
                feed: 0.0,
                kill: 0.0,
                du: 0.0,
                dv: 0.0,
                noise_amt: 0.0,
                ..Default::default()
            },
            ..cpu_config(16, 16)
        };
        let mut engine = Engine::init(config).unwrap();
        let before = engine.read_current().unwrap();
        engine.step(50).unwrap();
        assert_eq!(engine.read_current().unwrap(), before);
    }

    #[test]
    fn test_injection_stays_in_clamped_patch() {
        let config = EngineConfig {
            seed_pattern: SeedPattern::Uniform,
            ..cpu_config(64, 64)
        };
        let mut engine = Engine::init(config).unwrap();
        engine.inject_at(1.0, 1.0).unwrap();
        let field = engine.read_current().unwrap();

        for y in 0..64 {
            for x in 0..64 {
                let (u, v) = field.get(x, y);
                if x < 2 && y < 2 {
                    assert!((0.5..0.6).contains(&u));
                    assert!((0.5..0.7).contains(&v));
                } else {
                    assert_eq!((u, v), (1.0, 0.0), "({x}, {y}) was written");
                }
            }
        }
    }

    #[test]
    fn test_inject_beyond_edges() {
        let config = EngineConfig {
            seed_pattern: SeedPattern::Uniform,
            ..cpu_config(32, 32)
        };
        let written = |x: f32, y: f32| {
            let mut engine = Engine::init(config.clone()).unwrap();
            engine.inject_at(x, y).unwrap();
            let field = engine.read_current().unwrap();
            let mut cells = Vec::new();
            for cy in 0..32 {
                for cx in 0..32 {
                    if field.get(cx, cy) != (1.0, 0.0) {
                        cells.push((cx, cy));
                    }
                }
            }
            cells
        };

        let bottom_left = vec![(0, 30), (1, 30), (0, 31), (1, 31)];
        assert_eq!(written(-100.0, 1e9), bottom_left);
        assert_eq!(written(f32::NEG_INFINITY, f32::INFINITY), bottom_left);
        assert_eq!(written(f32::NAN, f32::INFINITY), bottom_left);
        assert_eq!(written(10.0, f32::INFINITY), written(10.0, 1e30));

        let mut engine = Engine::init(config).unwrap();
        engine.inject_normalized(1.0, 1.0).unwrap();
        let field = engine.read_current().unwrap();
        assert!(field.get(31, 31).1 >= 0.5);
        assert!(field.get(30, 30).1 >= 0.5);
        assert_eq!(field.get(29, 31), (1.0, 0.0));
    }

    #[test]
    fn test_warmup_burst_changes_early_steps() {
        let base = EngineConfig {
            params: SimParams::crowded(),
            ..cpu_config(32, 32)
        };
        let warm = EngineConfig {
            warmup: Some(WarmupConfig::default()),
            ..base.clone()
        };

        let mut plain = Engine::init(base).unwrap();
        let mut burst = Engine::init(warm).unwrap();
        plain.step(3).unwrap();
        burst.step(3).unwrap();
        assert_ne!(plain.read_current().unwrap(), burst.read_current().unwrap());
    }

    #[test]
    fn test_warmup_expires() {
        let config = EngineConfig {
            warmup: Some(WarmupConfig {
                steps: 2,
                ..Default::default()
            }),
            ..cpu_config(16, 16)
        };
        let mut engine = Engine::init(config).unwrap();
        assert_ne!(engine.step_params(), engine.params.snapshot());
        engine.step(2).unwrap();
        assert_eq!(engine.step_params(), engine.params.snapshot());
        engine.reset().unwrap();
        assert_ne!(engine.step_params(), engine.params.snapshot());
    }

    #[test]
    fn test_cpu_failure_is_fatal_and_keeps_snapshot() {
        let mut engine = Engine::init(cpu_config(32, 32)).unwrap();
        engine.step(4).unwrap();
        let snapshot = engine.read_current().unwrap();

        assert!(matches!(
            engine.demote(injected_fault()),
            Err(EngineError::BackendUnavailable)
        ));
        assert_eq!(engine.state(), EngineState::Fatal);
        assert_eq!(engine.active_tier(), None);
        assert_eq!(engine.read_current().unwrap(), snapshot);
        assert!(matches!(engine.step(1), Err(EngineError::BackendUnavailable)));
        assert!(matches!(
            engine.fallback_history(),
            [EngineError::RuntimeDispatchFailure {
                tier: BackendTier::CpuScalar,
                ..
            }]
        ));
    }

    #[test]
    fn test_step_failure_inside_step_is_absorbed() {
        let mut engine = Engine::init(cpu_config(32, 32)).unwrap();
        engine.step(4).unwrap();
        let snapshot = engine.read_current().unwrap();

        cpu_kernel(&engine).faults.step.set(Some(injected_fault()));
        assert!(matches!(engine.step(3), Err(EngineError::BackendUnavailable)));
        assert_fatal_after_cpu_failure(&mut engine, &snapshot);
    }

    #[test]
    fn test_sync_failure_inside_step_is_absorbed() {
        let mut engine = Engine::init(cpu_config(32, 32)).unwrap();
        engine.step(4).unwrap();
        let snapshot = engine.read_current().unwrap();

        cpu_kernel(&engine).faults.sync.set(Some(injected_fault()));
        assert!(matches!(engine.step(3), Err(EngineError::BackendUnavailable)));
        assert_fatal_after_cpu_failure(&mut engine, &snapshot);
    }

    #[test]
    fn test_gpu_failure_demotes_one_tier() {
        let config = EngineConfig {
            precision: PrecisionPreference::Auto,
            ..cpu_config(32, 32)
        };
        let mut engine = Engine::init(config).unwrap();
        let Some(tier) = engine.active_tier().filter(|t| !t.is_cpu()) else {
            eprintln!("Skipping GPU test: engine is on the CPU tier");
            return;
        };

        engine.step(3).unwrap();
        engine.demote(injected_fault()).unwrap();

        let demoted = engine.active_tier().unwrap();
        assert!(demoted > tier);
        engine.step(3).unwrap();
        let field = engine.read_current().unwrap();
        assert!(field.u.iter().chain(field.v.iter()).all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn test_instances_are_independent() {
        let mut a = Engine::init(cpu_config(24, 24)).unwrap();
        let mut b = Engine::init(cpu_config(24, 24)).unwrap();

        let mut update = Map::new();
        update.insert("F".into(), Value::from(0.0));
        a.set_parameters(&update);
        a.step(10).unwrap();
        b.step(10).unwrap();

        assert_eq!(b.parameters().snapshot().feed, SimParams::default().feed);
        assert_ne!(a.read_current().unwrap(), b.read_current().unwrap());
        a.release();
        b.release();
    }

    #[test]
    fn test_parameter_handle_shared_across_threads() {
        let mut engine = Engine::init(cpu_config(16, 16)).unwrap();
        let handle = engine.parameters();
        std::thread::spawn(move || handle.set_named("dt", 5.0))
            .join()
            .unwrap();
        // Clamped on write
        assert_eq!(engine.parameters().snapshot().dt, 1.2);
        engine.step(1).unwrap();
    }

    #[test]
    fn test_stats_reports_seed() {
        let mut engine = Engine::init(cpu_config(64, 64)).unwrap();
        let stats = engine.stats().unwrap();
        assert!(stats.active_cells > 0);
        assert!(stats.max_v < 0.35);
        assert_eq!(stats.max_u, 1.0);
    }
}

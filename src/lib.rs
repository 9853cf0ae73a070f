//! Gray-Scott - Tiered reaction-diffusion engine.
//!
//! This crate runs the two-species Gray-Scott reaction-diffusion model on a
//! toroidal (or clamped) grid, on the most capable backend the host offers.
//! GPU precision tiers are probed at startup; runtime failures demote the
//! engine down the ladder until only the CPU floor is left.
//!
//! # Architecture
//!
//! The crate is split into three modules:
//!
//! - `schema`: Configuration, live parameters and seed patterns
//! - `compute`: Field storage, the stencil, tier probing and the CPU/GPU kernels
//! - `engine`: The driver that owns a kernel and handles fallback
//!
//! # Example
//!
//! ```rust,no_run
//! use grayscott::{Engine, EngineConfig, SeedPattern};
//!
//! let config = EngineConfig {
//!     width: 256,
//!     height: 256,
//!     seed_pattern: SeedPattern::Center { radius: None },
//!     rng_seed: Some(7),
//!     ..Default::default()
//! };
//!
//! let mut engine = Engine::init(config)?;
//! println!("Running on {:?}", engine.active_tier());
//!
//! engine.step(500)?;
//! engine.inject_normalized(0.25, 0.75)?;
//! engine.step(100)?;
//!
//! let stats = engine.stats()?;
//! println!("Mean V after 600 steps: {}", stats.mean_v);
//! # Ok::<(), grayscott::EngineError>(())
//! ```

pub mod compute;
pub mod engine;
pub mod schema;

// Re-export commonly used types
pub use compute::{BackendTier, FieldState, FieldStats};
pub use engine::{Engine, EngineError, EngineState};
pub use schema::{EngineConfig, ParameterStore, SeedPattern, SimParams};

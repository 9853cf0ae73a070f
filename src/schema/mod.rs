//! Schema module - Configuration, parameter and seeding types for the engine.

mod config;
mod params;
mod seed;

pub use config::*;
pub use params::*;
pub use seed::*;

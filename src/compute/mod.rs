//! Compute module - numerical kernels and backends for the Gray-Scott engine.

mod backend;
mod cpu;
mod field;
mod probe;
mod radius;
mod reaction;
mod stencil;
mod tier;

pub mod gpu;

pub use backend::*;
pub use cpu::*;
pub use field::*;
pub use probe::*;
pub use radius::*;
pub use reaction::*;
pub use stencil::*;
pub use tier::*;

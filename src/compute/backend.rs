//! Tier-erased step kernel.

use super::gpu::{GpuError, GpuKernel};
use super::{BackendTier, CpuKernel, FieldState, Patch};
use crate::schema::SimParams;

/// Errors raised by a step kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("Could not allocate a {width}x{height} field")]
    Allocation { width: usize, height: usize },

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

impl KernelError {
    /// Whether the failure happened while creating resources, as opposed to
    /// while running on resources that already existed.
    pub fn is_allocation(&self) -> bool {
        matches!(
            self,
            Self::Allocation { .. } | Self::Gpu(GpuError::TooLarge { .. })
        )
    }
}

/// The active kernel: CPU floor or a GPU tier.
pub enum StepKernel {
    Cpu(CpuKernel),
    Gpu(GpuKernel),
}

impl StepKernel {
    pub fn tier(&self) -> BackendTier {
        match self {
            Self::Cpu(_) => BackendTier::CpuScalar,
            Self::Gpu(k) => k.tier(),
        }
    }

    /// Run one step. On the GPU this only submits; see [`Self::sync`].
    pub fn step(&mut self, params: &SimParams, noise_seed: u32) -> Result<(), KernelError> {
        match self {
            Self::Cpu(k) => {
                #[cfg(test)]
                if let Some(e) = k.faults.step.take() {
                    return Err(e);
                }
                k.step(params, noise_seed);
                Ok(())
            }
            Self::Gpu(k) => Ok(k.dispatch(params, noise_seed)?),
        }
    }

    /// Wait for submitted work to complete.
    pub fn sync(&self) -> Result<(), KernelError> {
        match self {
            Self::Cpu(k) => k.sync(),
            Self::Gpu(k) => Ok(k.sync()?),
        }
    }

    pub fn upload(&mut self, state: &FieldState) -> Result<(), KernelError> {
        match self {
            Self::Cpu(k) => {
                k.upload(state);
                Ok(())
            }
            Self::Gpu(k) => Ok(k.upload(state)?),
        }
    }

    pub fn write_patch(&mut self, patch: &Patch) -> Result<(), KernelError> {
        match self {
            Self::Cpu(k) => {
                k.write_patch(patch);
                Ok(())
            }
            Self::Gpu(k) => Ok(k.write_patch(patch)?),
        }
    }

    pub fn read_current(&self) -> Result<FieldState, KernelError> {
        match self {
            Self::Cpu(k) => Ok(k.read_current()),
            Self::Gpu(k) => Ok(k.read_current()?),
        }
    }

    pub fn release(self) {
        match self {
            Self::Cpu(k) => k.release(),
            Self::Gpu(k) => k.release(),
        }
    }
}

//! CPU scalar kernel - the floor of the tier ladder.
//!
//! Computes each step in f32 into the back buffer, row-parallel via rayon,
//! then swaps. Always available; the only failure is running out of memory
//! when allocating.

#[cfg(test)]
use std::cell::Cell;
use std::sync::Arc;

use rayon::prelude::*;

use super::{
    FieldBuffer, FieldState, KernelError, Patch, RadiusField, RowNeighbours, cell_noise, pcg_hash,
    react, sample,
};
use crate::schema::{Boundary, ExtensionConfig, SimParams};

/// CPU implementation of the step kernel.
pub struct CpuKernel {
    buffer: FieldBuffer,
    radius: Arc<RadiusField>,
    boundary: Boundary,
    extensions: ExtensionConfig,
    /// Euler sub-steps per step, each advancing `dt / substeps`.
    substeps: u32,
    #[cfg(test)]
    pub(crate) faults: InjectedFaults,
}

/// Failures a test queues for the kernel's next step or sync.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct InjectedFaults {
    pub(crate) step: Cell<Option<KernelError>>,
    pub(crate) sync: Cell<Option<KernelError>>,
}

impl CpuKernel {
    pub fn new(
        radius: Arc<RadiusField>,
        boundary: Boundary,
        extensions: ExtensionConfig,
        substeps: u32,
    ) -> Result<Self, KernelError> {
        let buffer = FieldBuffer::allocate(radius.width, radius.height)?;
        Ok(Self {
            buffer,
            radius,
            boundary,
            extensions,
            substeps: substeps.max(1),
            #[cfg(test)]
            faults: InjectedFaults::default(),
        })
    }

    /// Reallocate for the dimensions of `radius`. The field must be
    /// uploaded again before stepping.
    pub fn resize(&mut self, radius: Arc<RadiusField>) -> Result<(), KernelError> {
        self.buffer.resize(radius.width, radius.height)?;
        self.radius = radius;
        Ok(())
    }

    /// Advance the field by one step of `params.dt`.
    pub fn step(&mut self, params: &SimParams, noise_seed: u32) {
        let dt = params.dt / self.substeps as f32;
        for sub in 0..self.substeps {
            let seed = if self.substeps == 1 {
                noise_seed
            } else {
                pcg_hash(noise_seed ^ sub)
            };
            self.substep(params, seed, dt);
        }
    }

    fn substep(&mut self, params: &SimParams, noise_seed: u32, dt: f32) {
        let boundary = self.boundary;
        let extensions = self.extensions;
        let radius = &self.radius;
        let noisy = params.noise_amt > 0.0;

        let (current, next) = self.buffer.split();
        let width = current.width;
        let height = current.height;

        next.u
            .par_chunks_mut(width)
            .zip(next.v.par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (row_u, row_v))| {
                let rows = RowNeighbours::new(y, width, height, boundary);
                for x in 0..width {
                    let idx = rows.row + x;
                    let s = sample(current, rows, x, boundary);
                    let noise = if noisy {
                        cell_noise(noise_seed, idx as u32)
                    } else {
                        0.0
                    };
                    let (u, v) = react(&s, radius.get(idx), noise, params, extensions, dt);
                    row_u[x] = u;
                    row_v[x] = v;
                }
            });

        self.buffer.swap();
    }

    /// Replace the current field. Dimensions must match the kernel's.
    pub fn upload(&mut self, state: &FieldState) {
        let current = self.buffer.current_mut();
        debug_assert_eq!((current.width, current.height), (state.width, state.height));
        current.u.copy_from_slice(&state.u);
        current.v.copy_from_slice(&state.v);
    }

    /// Write a patch into the current buffer only.
    pub fn write_patch(&mut self, patch: &Patch) {
        self.buffer.current_mut().apply_patch(patch);
    }

    pub fn read_current(&self) -> FieldState {
        self.buffer.current().clone()
    }

    /// Steps complete before [`Self::step`] returns, so there is nothing to wait for.
    pub fn sync(&self) -> Result<(), KernelError> {
        #[cfg(test)]
        if let Some(e) = self.faults.sync.take() {
            return Err(e);
        }
        Ok(())
    }

    pub fn release(self) {
        self.buffer.release();
    }
}

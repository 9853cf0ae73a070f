//! Field state and double-buffered storage.

use super::KernelError;

/// Two-species field on a `width x height` grid.
///
/// Data is stored as flat row-major arrays indexed `y * width + x`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldState {
    /// Substrate concentration U.
    pub u: Vec<f32>,
    /// Activator concentration V.
    pub v: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

impl FieldState {
    /// The stable fixed point U=1, V=0 everywhere.
    pub fn uniform(width: usize, height: usize) -> Self {
        Self {
            u: vec![1.0; width * height],
            v: vec![0.0; width * height],
            width,
            height,
        }
    }

    /// Allocate without aborting on failure.
    pub fn try_uniform(width: usize, height: usize) -> Result<Self, KernelError> {
        let size = width
            .checked_mul(height)
            .ok_or(KernelError::Allocation { width, height })?;

        let mut u = Vec::new();
        let mut v = Vec::new();
        u.try_reserve_exact(size)
            .and_then(|()| v.try_reserve_exact(size))
            .map_err(|_| KernelError::Allocation { width, height })?;
        u.resize(size, 1.0);
        v.resize(size, 0.0);

        Ok(Self {
            u,
            v,
            width,
            height,
        })
    }

    #[inline]
    pub fn grid_size(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    /// `(U, V)` at a cell.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> (f32, f32) {
        let i = self.idx(x, y);
        (self.u[i], self.v[i])
    }

    /// Write a patch. Cells outside the grid are skipped.
    pub fn apply_patch(&mut self, patch: &Patch) {
        for py in 0..patch.height {
            let y = patch.y0 + py;
            if y >= self.height {
                break;
            }
            for px in 0..patch.width {
                let x = patch.x0 + px;
                if x >= self.width {
                    break;
                }
                let (u, v) = patch.cells[py * patch.width + px];
                let i = self.idx(x, y);
                self.u[i] = u;
                self.v[i] = v;
            }
        }
    }

    /// Interleaved `[u0, v0, u1, v1, ...]`, the GPU upload layout.
    pub fn interleaved(&self) -> Vec<f32> {
        self.u
            .iter()
            .zip(self.v.iter())
            .flat_map(|(&u, &v)| [u, v])
            .collect()
    }

    /// Inverse of [`Self::interleaved`].
    pub fn from_interleaved(data: &[f32], width: usize, height: usize) -> Self {
        let (u, v) = data.chunks_exact(2).map(|uv| (uv[0], uv[1])).unzip();
        Self {
            u,
            v,
            width,
            height,
        }
    }
}

/// Rectangular block of `(U, V)` values written into the current buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    /// Row-major, `width * height` entries.
    pub cells: Vec<(f32, f32)>,
}

impl Patch {
    pub fn contains(&self, x: usize, y: usize) -> bool {
        (self.x0..self.x0 + self.width).contains(&x) && (self.y0..self.y0 + self.height).contains(&y)
    }

    /// Interleaved upload layout, as [`FieldState::interleaved`].
    pub fn interleaved(&self) -> Vec<f32> {
        self.cells.iter().flat_map(|&(u, v)| [u, v]).collect()
    }
}

/// Front/back pair with an index flip for a swap.
///
/// Shared by the CPU field buffer and the GPU textures so both follow the
/// same discipline: read `current`, write `next`, then `swap` once.
#[derive(Debug)]
pub struct PingPong<T> {
    slots: [T; 2],
    front: usize,
}

impl<T> PingPong<T> {
    pub fn new(front: T, back: T) -> Self {
        Self {
            slots: [front, back],
            front: 0,
        }
    }

    #[inline]
    pub fn current(&self) -> &T {
        &self.slots[self.front]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.front]
    }

    #[inline]
    pub fn next(&self) -> &T {
        &self.slots[1 - self.front]
    }

    /// Borrow `(current, next)` at once for a step.
    pub fn split(&mut self) -> (&T, &mut T) {
        let (a, b) = self.slots.split_at_mut(1);
        if self.front == 0 {
            (&a[0], &mut b[0])
        } else {
            (&b[0], &mut a[0])
        }
    }

    /// Exchange roles. A single index flip, so no half-swapped state exists.
    #[inline]
    pub fn swap(&mut self) {
        self.front = 1 - self.front;
    }

    /// Which slot is current (0 or 1).
    #[inline]
    pub fn front_index(&self) -> usize {
        self.front
    }

    pub fn into_inner(self) -> [T; 2] {
        self.slots
    }
}

/// CPU field storage: two [`FieldState`]s in ping-pong.
#[derive(Debug)]
pub struct FieldBuffer {
    states: PingPong<FieldState>,
}

impl FieldBuffer {
    /// Allocate both instances at the fixed point.
    pub fn allocate(width: usize, height: usize) -> Result<Self, KernelError> {
        let front = FieldState::try_uniform(width, height)?;
        let back = FieldState::try_uniform(width, height)?;
        Ok(Self {
            states: PingPong::new(front, back),
        })
    }

    pub fn current(&self) -> &FieldState {
        self.states.current()
    }

    pub fn current_mut(&mut self) -> &mut FieldState {
        self.states.current_mut()
    }

    pub fn next(&self) -> &FieldState {
        self.states.next()
    }

    pub fn split(&mut self) -> (&FieldState, &mut FieldState) {
        self.states.split()
    }

    pub fn swap(&mut self) {
        self.states.swap();
    }

    /// Release and reallocate at new dimensions. Contents must be reseeded.
    ///
    /// The old storage is freed first; on failure the buffer is left empty.
    pub fn resize(&mut self, width: usize, height: usize) -> Result<(), KernelError> {
        self.states = PingPong::new(FieldState::uniform(0, 0), FieldState::uniform(0, 0));
        *self = Self::allocate(width, height)?;
        Ok(())
    }

    /// Free both instances.
    pub fn release(self) {
        drop(self.states.into_inner());
    }
}

/// Field statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FieldStats {
    pub mean_u: f32,
    pub mean_v: f32,
    pub min_u: f32,
    pub max_u: f32,
    pub min_v: f32,
    pub max_v: f32,
    /// Cells with V above 1e-3.
    pub active_cells: usize,
}

impl FieldStats {
    /// Compute statistics from a field.
    pub fn from_state(state: &FieldState) -> Self {
        let mut sum_u = 0.0f64;
        let mut sum_v = 0.0f64;
        let mut min_u = f32::INFINITY;
        let mut max_u = f32::NEG_INFINITY;
        let mut min_v = f32::INFINITY;
        let mut max_v = f32::NEG_INFINITY;
        let mut active_cells = 0usize;

        for (&u, &v) in state.u.iter().zip(state.v.iter()) {
            sum_u += u as f64;
            sum_v += v as f64;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
            if v > 1e-3 {
                active_cells += 1;
            }
        }

        let count = state.grid_size().max(1) as f64;
        Self {
            mean_u: (sum_u / count) as f32,
            mean_v: (sum_v / count) as f32,
            min_u,
            max_u,
            min_v,
            max_v,
            active_cells,
        }
    }
}

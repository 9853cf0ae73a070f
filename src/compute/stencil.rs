//! Four-neighbour stencil access.
//!
//! Computes the discrete Laplacian and central-difference gradients the
//! kernel needs at one cell, under the configured boundary policy.

use super::FieldState;
use crate::schema::Boundary;

/// Everything the update rule reads at one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSample {
    pub u: f32,
    pub v: f32,
    pub lap_u: f32,
    pub lap_v: f32,
    pub grad_u: (f32, f32),
    pub grad_v: (f32, f32),
}

/// Precomputed neighbour rows for one `y`.
#[derive(Debug, Clone, Copy)]
pub struct RowNeighbours {
    pub up: usize,
    pub row: usize,
    pub down: usize,
}

impl RowNeighbours {
    #[inline]
    pub fn new(y: usize, width: usize, height: usize, boundary: Boundary) -> Self {
        Self {
            up: boundary.prev(y, height) * width,
            row: y * width,
            down: boundary.next(y, height) * width,
        }
    }
}

/// Sample the stencil at `(x, y)`.
#[inline]
pub fn sample(field: &FieldState, rows: RowNeighbours, x: usize, boundary: Boundary) -> CellSample {
    let width = field.width;
    let left = rows.row + boundary.prev(x, width);
    let right = rows.row + boundary.next(x, width);
    let c = rows.row + x;
    let up = rows.up + x;
    let down = rows.down + x;

    let (u, v) = (&field.u, &field.v);

    CellSample {
        u: u[c],
        v: v[c],
        lap_u: u[up] + u[down] + u[left] + u[right] - 4.0 * u[c],
        lap_v: v[up] + v[down] + v[left] + v[right] - 4.0 * v[c],
        grad_u: (0.5 * (u[right] - u[left]), 0.5 * (u[down] - u[up])),
        grad_v: (0.5 * (v[right] - v[left]), 0.5 * (v[down] - v[up])),
    }
}

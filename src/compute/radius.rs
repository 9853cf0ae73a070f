//! Static per-cell radius field.
//!
//! Drawn once from a clamped Gaussian and smoothed with a 3x3 box blur. It
//! slows diffusion and feeds the crowding term; it does not evolve.

use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::schema::Boundary;

const RADIUS_MEAN: f32 = 0.5;
const RADIUS_STD: f32 = 0.22;

/// Scalar field in [0, 1] with the same layout as the simulation grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RadiusField {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl RadiusField {
    /// All-zero field, used when the radius extension is off.
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Deterministic for a given seed and size.
    pub fn generate(width: usize, height: usize, seed: u64, boundary: Boundary) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let raw: Vec<f32> = (0..width * height)
            .map(|_| {
                let z: f32 = rng.sample(StandardNormal);
                (RADIUS_MEAN + RADIUS_STD * z).clamp(0.0, 1.0)
            })
            .collect();

        let mut data = vec![0.0f32; width * height];
        for y in 0..height {
            let ys = [boundary.prev(y, height), y, boundary.next(y, height)];
            for x in 0..width {
                let xs = [boundary.prev(x, width), x, boundary.next(x, width)];
                let mut sum = 0.0;
                for &yy in &ys {
                    for &xx in &xs {
                        sum += raw[yy * width + xx];
                    }
                }
                data[y * width + x] = sum / 9.0;
            }
        }

        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> f32 {
        self.data[idx]
    }
}

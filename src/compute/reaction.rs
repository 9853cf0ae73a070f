//! Per-cell update rule.
//!
//! Gray-Scott reaction with optional heterogeneous diffusivity, crowding
//! attenuation and drift, integrated with one explicit Euler step and
//! clamped to [0, 1]. The WGSL step shader mirrors this function.

use super::CellSample;
use crate::schema::{ExtensionConfig, REACTION_CAP, SimParams};

/// Weight of the shared noise sample on V relative to U.
pub const NOISE_V_WEIGHT: f32 = 0.5;

/// Advance one cell by `dt`.
///
/// `r` is the radius-field value at the cell (ignored unless the radius
/// field is enabled) and `noise` a zero-mean sample in [-0.5, 0.5).
#[inline]
pub fn react(
    s: &CellSample,
    r: f32,
    noise: f32,
    p: &SimParams,
    ext: ExtensionConfig,
    dt: f32,
) -> (f32, f32) {
    let r = if ext.radius_field { r } else { 0.0 };

    let slow = 1.0 / (1.0 + p.lambda_r * r);
    let (diff_u, diff_v) = if ext.radius_field {
        (p.du * slow, p.dv * slow)
    } else {
        (p.du, p.dv)
    };

    let att = if ext.crowding {
        let rho = (s.u + s.v).clamp(0.0, 2.0);
        let phi = ((rho * r - p.t0_hs) / (p.t1_hs - p.t0_hs)).clamp(0.0, 1.0);
        1.0 - p.beta_hs * phi
    } else {
        1.0
    };

    let uvv = (s.u * s.v * s.v).min(REACTION_CAP);

    let mut du = diff_u * s.lap_u - uvv * att + p.feed * (1.0 - s.u) * att;
    let mut dv = diff_v * s.lap_v + uvv * att - (p.feed + p.kill) * s.v * att;

    if ext.drift {
        let drift = s.grad_u.0 * s.grad_v.0 + s.grad_u.1 * s.grad_v.1 + s.u * s.lap_v;
        du -= p.alpha_dp * drift;
    }

    du += noise * p.noise_amt;
    dv += noise * p.noise_amt * NOISE_V_WEIGHT;

    let u = (s.u + dt * du).clamp(0.0, 1.0);
    let v = ((s.v + dt * dv) * p.v_decay.powf(dt)).clamp(0.0, 1.0);
    (u, v)
}

/// 32-bit PCG hash.
#[inline]
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Zero-mean noise sample in [-0.5, 0.5) for one cell of one step.
///
/// Counter-based so that parallel row order cannot change results and the
/// GPU shader can reproduce it.
#[inline]
pub fn cell_noise(step_seed: u32, index: u32) -> f32 {
    let bits = pcg_hash(index ^ pcg_hash(step_seed));
    (bits >> 8) as f32 / (1u32 << 24) as f32 - 0.5
}

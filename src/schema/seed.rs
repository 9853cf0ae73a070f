//! Seed patterns and the seeder that writes them.
//!
//! Without a perturbation the uniform state (U=1, V=0) is a fixed point of
//! the kernel and no pattern ever forms, so every pattern except `Uniform`
//! breaks the symmetry somewhere.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Boundary, ConfigError};
use crate::compute::{FieldState, Patch};

/// Predefined initial conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SeedPattern {
    /// One disc at the grid centre.
    Center {
        /// Radius in cells. Defaults to `max(6, min(W, H) / 32)`.
        radius: Option<usize>,
    },
    /// Several discs at random centres in the middle of the grid.
    Scatter {
        /// Number of discs.
        count: usize,
        /// Smallest radius as a fraction of the short side.
        min_radius: f32,
        /// Largest radius as a fraction of the short side.
        max_radius: f32,
    },
    /// Sparse random speckles plus a ring, for a fast fill.
    Speckle {
        /// Fraction of cells that receive a strong V speckle.
        density: f32,
        /// Ring radius as a fraction of the short side.
        ring_radius: f32,
        /// Ring half-width as a fraction of the short side.
        ring_width: f32,
    },
    /// The fixed point with no perturbation.
    Uniform,
}

impl Default for SeedPattern {
    fn default() -> Self {
        SeedPattern::Center { radius: None }
    }
}

impl SeedPattern {
    /// Check the pattern against a `width x height` grid.
    pub fn validate(&self, width: usize, height: usize) -> Result<(), ConfigError> {
        match *self {
            SeedPattern::Scatter {
                count,
                min_radius,
                max_radius,
            } => {
                if count == 0 {
                    return Err(ConfigError::InvalidSeed("scatter count must be non-zero"));
                }
                if !(min_radius > 0.0 && min_radius <= max_radius && max_radius <= 0.5) {
                    return Err(ConfigError::InvalidSeed(
                        "scatter radii must satisfy 0 < min <= max <= 0.5",
                    ));
                }
            }
            SeedPattern::Speckle {
                density,
                ring_radius,
                ring_width,
            } => {
                if !(0.0..=1.0).contains(&density) {
                    return Err(ConfigError::InvalidSeed("speckle density must be in [0, 1]"));
                }
                if ring_radius < 0.0 || ring_width < 0.0 {
                    return Err(ConfigError::InvalidSeed("ring sizes must be non-negative"));
                }
            }
            SeedPattern::Center { radius: Some(0) } => {
                return Err(ConfigError::InvalidSeed("center radius must be non-zero"));
            }
            SeedPattern::Center { radius: Some(r) } if r > width.min(height) => {
                return Err(ConfigError::InvalidSeed(
                    "center radius must not exceed the short side of the grid",
                ));
            }
            SeedPattern::Center { .. } | SeedPattern::Uniform => {}
        }
        Ok(())
    }
}

/// Default radius of the centred disc.
pub fn default_center_radius(width: usize, height: usize) -> usize {
    (width.min(height) / 32).max(6)
}

/// Edge length of an injected patch.
pub fn inject_patch_size(width: usize, height: usize) -> usize {
    let short = width.min(height);
    (short / 64).max(2).min(short)
}

/// Writes seed patterns and injection patches from an explicit random source.
pub struct Seeder {
    rng: StdRng,
    boundary: Boundary,
}

impl Seeder {
    pub fn new(seed: u64, boundary: Boundary) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            boundary,
        }
    }

    /// Generate a fresh field: the fixed point plus the pattern.
    pub fn seed(&mut self, pattern: &SeedPattern, width: usize, height: usize) -> FieldState {
        let mut field = FieldState::uniform(width, height);
        let short = width.min(height) as f32;

        match *pattern {
            SeedPattern::Center { radius } => {
                // Bounded by the short side so a shrinking resize stays cheap
                let r = radius
                    .unwrap_or_else(|| default_center_radius(width, height))
                    .min(width.min(height));
                self.disc(&mut field, (width / 2) as isize, (height / 2) as isize, r);
            }
            SeedPattern::Scatter {
                count,
                min_radius,
                max_radius,
            } => {
                for _ in 0..count {
                    let cx = (width as f32 * self.rng.gen_range(0.3..0.7)) as isize;
                    let cy = (height as f32 * self.rng.gen_range(0.3..0.7)) as isize;
                    let r = (short * self.rng.gen_range(min_radius..=max_radius)).round();
                    self.disc(&mut field, cx, cy, (r as usize).max(1));
                }
            }
            SeedPattern::Speckle {
                density,
                ring_radius,
                ring_width,
            } => self.speckle(&mut field, density, ring_radius * short, ring_width * short),
            SeedPattern::Uniform => {}
        }

        field
    }

    /// Filled disc with U in [0.5, 0.6) and V in [0.25, 0.35).
    fn disc(&mut self, field: &mut FieldState, cx: isize, cy: isize, radius: usize) {
        let r = radius as isize;
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                let x = self.boundary.resolve(cx + dx, field.width);
                let y = self.boundary.resolve(cy + dy, field.height);
                if let (Some(x), Some(y)) = (x, y) {
                    let idx = field.idx(x, y);
                    field.u[idx] = 0.5 + self.rng.gen_range(0.0..0.1);
                    field.v[idx] = 0.25 + self.rng.gen_range(0.0..0.1);
                }
            }
        }
    }

    fn speckle(&mut self, field: &mut FieldState, density: f32, ring_r: f32, ring_w: f32) {
        let weak = (density * 2.5).min(1.0);
        for v in field.v.iter_mut() {
            let roll: f32 = self.rng.gen_range(0.0..1.0);
            if roll < density {
                *v = 0.35 + self.rng.gen_range(0.0..0.25);
            } else if roll < density + weak {
                *v = self.rng.gen_range(0.0..0.05);
            }
        }

        let cx = field.width as f32 / 2.0;
        let cy = field.height as f32 / 2.0;
        for y in 0..field.height {
            for x in 0..field.width {
                let dist = (x as f32 - cx).hypot(y as f32 - cy);
                if (dist - ring_r).abs() < ring_w {
                    let idx = field.idx(x, y);
                    field.v[idx] = (field.v[idx] + 0.25).min(1.0);
                }
            }
        }

        for u in field.u.iter_mut().step_by(2) {
            *u = (*u - self.rng.gen_range(0.0..0.06)).clamp(0.0, 1.0);
        }
    }

    /// Build an injection patch around grid coordinate `(x, y)`.
    ///
    /// The patch is clamped to lie fully inside the grid, whatever the
    /// coordinates (negative, beyond the edge, or non-finite).
    pub fn inject_patch(&mut self, x: f32, y: f32, width: usize, height: usize) -> Patch {
        let size = inject_patch_size(width, height);
        let x0 = patch_origin(x, size, width);
        let y0 = patch_origin(y, size, height);

        let cells = (0..size * size)
            .map(|_| {
                (
                    0.5 + self.rng.gen_range(0.0..0.1),
                    0.5 + self.rng.gen_range(0.0..0.2),
                )
            })
            .collect();

        Patch {
            x0,
            y0,
            width: size,
            height: size,
            cells,
        }
    }
}

fn patch_origin(coord: f32, size: usize, extent: usize) -> usize {
    // Infinities fall through to the clamp; only NaN has no side to go to
    let centre = if coord.is_nan() { 0.0 } else { coord.floor() };
    let start = centre - (size / 2) as f32;
    start.clamp(0.0, (extent - size) as f32) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_disc_values() {
        let mut seeder = Seeder::new(1, Boundary::Wrap);
        let field = seeder.seed(&SeedPattern::default(), 64, 64);

        let (u, v) = field.get(32, 32);
        assert!((0.5..0.6).contains(&u));
        assert!((0.25..0.35).contains(&v));

        // Outside radius 6
        assert_eq!(field.get(32, 39), (1.0, 0.0));
        assert_eq!(field.get(0, 0), (1.0, 0.0));
    }

    #[test]
    fn test_seed_is_reproducible() {
        let pattern = SeedPattern::Scatter {
            count: 5,
            min_radius: 0.05,
            max_radius: 0.15,
        };
        let a = Seeder::new(42, Boundary::Wrap).seed(&pattern, 96, 64);
        let b = Seeder::new(42, Boundary::Wrap).seed(&pattern, 96, 64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_uniform_is_fixed_point() {
        let field = Seeder::new(3, Boundary::Clamp).seed(&SeedPattern::Uniform, 16, 16);
        assert!(field.u.iter().all(|&u| u == 1.0));
        assert!(field.v.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_speckle_stays_in_bounds() {
        let pattern = SeedPattern::Speckle {
            density: 0.08,
            ring_radius: 0.28,
            ring_width: 0.03,
        };
        let field = Seeder::new(5, Boundary::Wrap).seed(&pattern, 64, 64);
        assert!(field.u.iter().chain(field.v.iter()).all(|&x| (0.0..=1.0).contains(&x)));
        assert!(field.v.iter().any(|&v| v > 0.3));
    }

    #[test]
    fn test_clamp_boundary_does_not_wrap_discs() {
        let pattern = SeedPattern::Center { radius: Some(4) };
        let mut seeder = Seeder::new(1, Boundary::Clamp);
        let mut field = FieldState::uniform(16, 16);
        seeder.disc(&mut field, 0, 0, 4);
        assert_eq!(field.get(15, 15), (1.0, 0.0));
        assert_ne!(field.get(0, 0), (1.0, 0.0));
        assert!(pattern.validate(16, 16).is_ok());
    }

    #[test]
    fn test_inject_patch_near_edges() {
        let mut seeder = Seeder::new(1, Boundary::Wrap);

        let patch = seeder.inject_patch(1.0, 1.0, 64, 64);
        assert_eq!((patch.x0, patch.y0, patch.width, patch.height), (0, 0, 2, 2));

        let patch = seeder.inject_patch(500.0, -20.0, 64, 64);
        assert_eq!((patch.x0, patch.y0), (62, 0));

        let patch = seeder.inject_patch(f32::NAN, f32::INFINITY, 64, 64);
        assert_eq!((patch.x0, patch.y0), (0, 62));

        let patch = seeder.inject_patch(f32::NEG_INFINITY, 1e30, 64, 64);
        assert_eq!((patch.x0, patch.y0), (0, 62));

        let far = seeder.inject_patch(10.0, f32::INFINITY, 64, 64);
        let huge = seeder.inject_patch(10.0, 1e30, 64, 64);
        assert_eq!((far.x0, far.y0), (huge.x0, huge.y0));
        assert_eq!((far.x0, far.y0), (9, 62));

        let patch = seeder.inject_patch(256.0, 256.0, 512, 512);
        assert_eq!(patch.width, 8);
        assert_eq!((patch.x0, patch.y0), (252, 252));
    }

    #[test]
    fn test_inject_patch_values() {
        let patch = Seeder::new(8, Boundary::Wrap).inject_patch(10.0, 10.0, 64, 64);
        assert_eq!(patch.cells.len(), 4);
        for &(u, v) in &patch.cells {
            assert!((0.5..0.6).contains(&u));
            assert!((0.5..0.7).contains(&v));
        }
    }

    #[test]
    fn test_validate_scatter() {
        let bad = SeedPattern::Scatter {
            count: 3,
            min_radius: 0.2,
            max_radius: 0.1,
        };
        assert!(bad.validate(64, 64).is_err());
    }

    #[test]
    fn test_validate_center_radius_against_grid() {
        let fits = SeedPattern::Center { radius: Some(32) };
        assert!(fits.validate(32, 64).is_ok());

        let oversized = SeedPattern::Center {
            radius: Some(1_000_000_000),
        };
        assert!(matches!(
            oversized.validate(64, 64),
            Err(ConfigError::InvalidSeed(_))
        ));
    }

    #[test]
    fn test_center_radius_capped_by_grid() {
        // A radius that fit before a shrinking resize must not scan a huge square
        let pattern = SeedPattern::Center {
            radius: Some(1_000_000),
        };
        let field = Seeder::new(2, Boundary::Clamp).seed(&pattern, 16, 16);
        assert!(field.v.iter().all(|&v| (0.25..0.35).contains(&v)));
    }

    #[test]
    fn test_pattern_json_is_tagged() {
        let json = serde_json::to_string(&SeedPattern::Uniform).unwrap();
        assert_eq!(json, r#"{"type":"Uniform"}"#);
        let parsed: SeedPattern = serde_json::from_str(r#"{"type":"Center","radius":3}"#).unwrap();
        assert_eq!(parsed, SeedPattern::Center { radius: Some(3) });
    }
}

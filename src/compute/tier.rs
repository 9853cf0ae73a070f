//! Backend precision tiers.

use serde::{Deserialize, Serialize};

/// Numeric fidelity a backend computes and stores the field at.
///
/// Ordered from highest to lowest; `CpuScalar` is the floor of the ladder
/// and has no external completeness precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTier {
    HighPrecision,
    HalfPrecision,
    LowPrecision,
    CpuScalar,
}

impl BackendTier {
    /// Every tier, best first.
    pub const LADDER: [BackendTier; 4] = [
        BackendTier::HighPrecision,
        BackendTier::HalfPrecision,
        BackendTier::LowPrecision,
        BackendTier::CpuScalar,
    ];

    /// Tiers from `top` down to the CPU floor.
    pub fn ladder_from(top: BackendTier) -> Vec<BackendTier> {
        Self::LADDER.into_iter().filter(|t| *t >= top).collect()
    }

    #[inline]
    pub fn is_cpu(self) -> bool {
        self == Self::CpuScalar
    }

    /// Storage texture format for GPU-class tiers.
    pub fn texture_format(self) -> Option<wgpu::TextureFormat> {
        match self {
            Self::HighPrecision => Some(wgpu::TextureFormat::Rgba32Float),
            Self::HalfPrecision => Some(wgpu::TextureFormat::Rgba16Float),
            Self::LowPrecision => Some(wgpu::TextureFormat::Rgba8Unorm),
            Self::CpuScalar => None,
        }
    }

    /// WGSL spelling of [`Self::texture_format`].
    pub fn wgsl_format(self) -> Option<&'static str> {
        match self {
            Self::HighPrecision => Some("rgba32float"),
            Self::HalfPrecision => Some("rgba16float"),
            Self::LowPrecision => Some("rgba8unorm"),
            Self::CpuScalar => None,
        }
    }
}

impl std::fmt::Display for BackendTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::HighPrecision => "high-precision (rgba32f)",
            Self::HalfPrecision => "half-precision (rgba16f)",
            Self::LowPrecision => "low-precision (rgba8)",
            Self::CpuScalar => "cpu-scalar",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_order() {
        assert_eq!(BackendTier::ladder_from(BackendTier::HighPrecision).len(), 4);
        assert_eq!(
            BackendTier::ladder_from(BackendTier::LowPrecision),
            vec![BackendTier::LowPrecision, BackendTier::CpuScalar]
        );
        assert_eq!(
            BackendTier::ladder_from(BackendTier::CpuScalar),
            vec![BackendTier::CpuScalar]
        );
    }

    #[test]
    fn test_only_gpu_tiers_have_formats() {
        for tier in BackendTier::LADDER {
            assert_eq!(tier.texture_format().is_some(), !tier.is_cpu());
            assert_eq!(tier.wgsl_format().is_some(), !tier.is_cpu());
        }
    }
}

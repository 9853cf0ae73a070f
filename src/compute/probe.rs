//! Capability probing across precision tiers.

use super::BackendTier;

/// Why a tier failed its completeness check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("No GPU device is available")]
    NoDevice,
    #[error("Tier disabled by configuration")]
    Disabled,
    #[error("Format {0:?} cannot be used as a writable storage target")]
    Incomplete(wgpu::TextureFormat),
}

/// Something that can try to allocate a minimal writable target at a tier.
///
/// Implementations must release every trial allocation before returning,
/// on success and on failure.
pub trait TargetAllocator {
    fn try_allocate_target(&self, tier: BackendTier) -> Result<(), ProbeError>;
}

/// Result of walking the tier ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Selected(BackendTier),
    /// No tier in the list succeeded and the CPU tier was not offered.
    Exhausted,
}

/// Return the first tier in `tiers` whose target can be allocated.
///
/// `CpuScalar` always succeeds without consulting the allocator.
pub fn probe<A: TargetAllocator + ?Sized>(allocator: &A, tiers: &[BackendTier]) -> ProbeOutcome {
    for &tier in tiers {
        if tier.is_cpu() {
            return ProbeOutcome::Selected(tier);
        }
        match allocator.try_allocate_target(tier) {
            Ok(()) => {
                log::debug!("Probe: {tier} is complete");
                return ProbeOutcome::Selected(tier);
            }
            Err(e) => log::debug!("Probe: {tier} unavailable: {e}"),
        }
    }
    ProbeOutcome::Exhausted
}

/// Allocator with no GPU behind it; every GPU-class tier fails.
pub struct NoGpu;

impl TargetAllocator for NoGpu {
    fn try_allocate_target(&self, _tier: BackendTier) -> Result<(), ProbeError> {
        Err(ProbeError::NoDevice)
    }
}

/// Wraps another allocator and fails a configured set of tiers.
pub struct Restricted<'a, A: ?Sized> {
    pub inner: &'a A,
    pub disabled: &'a [BackendTier],
}

impl<A: TargetAllocator + ?Sized> TargetAllocator for Restricted<'_, A> {
    fn try_allocate_target(&self, tier: BackendTier) -> Result<(), ProbeError> {
        if self.disabled.contains(&tier) {
            return Err(ProbeError::Disabled);
        }
        self.inner.try_allocate_target(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Supports a fixed set of tiers and counts live trial targets.
    struct FakeDevice {
        supported: Vec<BackendTier>,
        live: Cell<i32>,
        attempts: Cell<usize>,
    }

    impl FakeDevice {
        fn new(supported: &[BackendTier]) -> Self {
            Self {
                supported: supported.to_vec(),
                live: Cell::new(0),
                attempts: Cell::new(0),
            }
        }
    }

    impl TargetAllocator for FakeDevice {
        fn try_allocate_target(&self, tier: BackendTier) -> Result<(), ProbeError> {
            self.attempts.set(self.attempts.get() + 1);
            self.live.set(self.live.get() + 1);
            let result = if self.supported.contains(&tier) {
                Ok(())
            } else {
                Err(ProbeError::Incomplete(wgpu::TextureFormat::Rgba32Float))
            };
            self.live.set(self.live.get() - 1);
            result
        }
    }

    #[test]
    fn test_selects_first_complete_tier() {
        let device = FakeDevice::new(&[BackendTier::HalfPrecision, BackendTier::LowPrecision]);
        let outcome = probe(&device, &BackendTier::LADDER);
        assert_eq!(outcome, ProbeOutcome::Selected(BackendTier::HalfPrecision));
        assert_eq!(device.attempts.get(), 2);
        assert_eq!(device.live.get(), 0);
    }

    #[test]
    fn test_probe_is_deterministic() {
        let device = FakeDevice::new(&[BackendTier::LowPrecision]);
        let first = probe(&device, &BackendTier::LADDER);
        for _ in 0..10 {
            assert_eq!(probe(&device, &BackendTier::LADDER), first);
        }
    }

    #[test]
    fn test_all_gpu_tiers_failing_selects_cpu() {
        let outcome = probe(&NoGpu, &BackendTier::LADDER);
        assert_eq!(outcome, ProbeOutcome::Selected(BackendTier::CpuScalar));
    }

    #[test]
    fn test_exhausted_without_cpu() {
        let tiers = [BackendTier::HighPrecision, BackendTier::LowPrecision];
        assert_eq!(probe(&NoGpu, &tiers), ProbeOutcome::Exhausted);
        assert_eq!(probe(&NoGpu, &[]), ProbeOutcome::Exhausted);
    }

    #[test]
    fn test_restricted_skips_disabled() {
        let device = FakeDevice::new(&BackendTier::LADDER);
        let disabled = [BackendTier::HighPrecision, BackendTier::HalfPrecision];
        let restricted = Restricted {
            inner: &device,
            disabled: &disabled,
        };
        let outcome = probe(&restricted, &BackendTier::LADDER);
        assert_eq!(outcome, ProbeOutcome::Selected(BackendTier::LowPrecision));
        assert_eq!(device.attempts.get(), 1);
    }
}

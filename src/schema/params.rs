//! Simulation parameters and the shared parameter store.
//!
//! Every parameter is an independent `f32` scalar held in its own atomic
//! slot. Writers (a UI thread, a controller) never block the engine, and the
//! engine takes one [`SimParams`] snapshot per step, so a change is visible
//! from the next step onward and never part-way through one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound on U·V² in the reaction term.
pub const REACTION_CAP: f32 = 0.85;

/// Named simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Feed,
    Kill,
    DiffusionU,
    DiffusionV,
    AlphaDp,
    LambdaR,
    BetaHs,
    T0Hs,
    T1Hs,
    NoiseAmt,
    Dt,
    VDecay,
}

impl ParamKey {
    pub const COUNT: usize = 12;

    pub const ALL: [ParamKey; Self::COUNT] = [
        ParamKey::Feed,
        ParamKey::Kill,
        ParamKey::DiffusionU,
        ParamKey::DiffusionV,
        ParamKey::AlphaDp,
        ParamKey::LambdaR,
        ParamKey::BetaHs,
        ParamKey::T0Hs,
        ParamKey::T1Hs,
        ParamKey::NoiseAmt,
        ParamKey::Dt,
        ParamKey::VDecay,
    ];

    /// Canonical external name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Feed => "F",
            Self::Kill => "k",
            Self::DiffusionU => "Du",
            Self::DiffusionV => "Dv",
            Self::AlphaDp => "alphaDP",
            Self::LambdaR => "lambdaR",
            Self::BetaHs => "betaHS",
            Self::T0Hs => "t0HS",
            Self::T1Hs => "t1HS",
            Self::NoiseAmt => "noiseAmt",
            Self::Dt => "dt",
            Self::VDecay => "vDecay",
        }
    }

    /// Look up a key by canonical name or common alias.
    pub fn from_name(name: &str) -> Option<Self> {
        let key = match name {
            "F" | "feed" => Self::Feed,
            "k" | "kill" => Self::Kill,
            "Du" | "du" => Self::DiffusionU,
            "Dv" | "dv" => Self::DiffusionV,
            "alphaDP" => Self::AlphaDp,
            "lambdaR" => Self::LambdaR,
            "betaHS" => Self::BetaHs,
            "t0HS" => Self::T0Hs,
            "t1HS" => Self::T1Hs,
            "noiseAmt" | "noise" => Self::NoiseAmt,
            "dt" => Self::Dt,
            "vDecay" => Self::VDecay,
            _ => return None,
        };
        Some(key)
    }

    /// Valid range; values are clamped into it on write.
    ///
    /// Diffusivities stop at 0.2 so that `D * dt` stays under the explicit
    /// Euler bound of 1/4 at the maximum `dt` of 1.2.
    pub fn range(self) -> (f32, f32) {
        match self {
            Self::Feed | Self::Kill => (0.0, 0.1),
            Self::DiffusionU | Self::DiffusionV => (0.0, 0.2),
            Self::AlphaDp => (0.0, 0.5),
            Self::LambdaR => (0.0, 2.0),
            Self::BetaHs => (0.0, 1.0),
            Self::T0Hs | Self::T1Hs => (0.0, 2.0),
            Self::NoiseAmt => (0.0, 0.01),
            Self::Dt => (0.0, 1.2),
            Self::VDecay => (0.9, 1.0),
        }
    }

    /// Clamp a value into this key's range. NaN is rejected.
    pub fn clamp(self, value: f32) -> Option<f32> {
        if value.is_nan() {
            return None;
        }
        let (lo, hi) = self.range();
        Some(value.clamp(lo, hi))
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Snapshot of every parameter, as read once per step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    #[serde(rename = "F")]
    pub feed: f32,
    #[serde(rename = "k")]
    pub kill: f32,
    #[serde(rename = "Du")]
    pub du: f32,
    #[serde(rename = "Dv")]
    pub dv: f32,
    #[serde(rename = "alphaDP")]
    pub alpha_dp: f32,
    #[serde(rename = "lambdaR")]
    pub lambda_r: f32,
    #[serde(rename = "betaHS")]
    pub beta_hs: f32,
    #[serde(rename = "t0HS")]
    pub t0_hs: f32,
    #[serde(rename = "t1HS")]
    pub t1_hs: f32,
    #[serde(rename = "noiseAmt")]
    pub noise_amt: f32,
    pub dt: f32,
    #[serde(rename = "vDecay")]
    pub v_decay: f32,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            feed: 0.037,
            kill: 0.06,
            du: 0.16,
            dv: 0.08,
            alpha_dp: 0.12,
            lambda_r: 0.60,
            beta_hs: 0.12,
            t0_hs: 0.35,
            t1_hs: 0.85,
            noise_amt: 0.0,
            dt: 1.0,
            v_decay: 1.0,
        }
    }
}

impl SimParams {
    /// Drift and crowding variant with a slow V decay and a little noise.
    pub fn crowded() -> Self {
        Self {
            feed: 0.0185,
            kill: 0.0505,
            du: 0.196,
            dv: 0.098,
            alpha_dp: 0.12,
            lambda_r: 0.60,
            beta_hs: 0.12,
            t0_hs: 0.35,
            t1_hs: 0.85,
            noise_amt: 0.0002,
            dt: 1.0,
            v_decay: 0.992,
        }
    }

    pub fn get(&self, key: ParamKey) -> f32 {
        match key {
            ParamKey::Feed => self.feed,
            ParamKey::Kill => self.kill,
            ParamKey::DiffusionU => self.du,
            ParamKey::DiffusionV => self.dv,
            ParamKey::AlphaDp => self.alpha_dp,
            ParamKey::LambdaR => self.lambda_r,
            ParamKey::BetaHs => self.beta_hs,
            ParamKey::T0Hs => self.t0_hs,
            ParamKey::T1Hs => self.t1_hs,
            ParamKey::NoiseAmt => self.noise_amt,
            ParamKey::Dt => self.dt,
            ParamKey::VDecay => self.v_decay,
        }
    }

    fn field_mut(&mut self, key: ParamKey) -> &mut f32 {
        match key {
            ParamKey::Feed => &mut self.feed,
            ParamKey::Kill => &mut self.kill,
            ParamKey::DiffusionU => &mut self.du,
            ParamKey::DiffusionV => &mut self.dv,
            ParamKey::AlphaDp => &mut self.alpha_dp,
            ParamKey::LambdaR => &mut self.lambda_r,
            ParamKey::BetaHs => &mut self.beta_hs,
            ParamKey::T0Hs => &mut self.t0_hs,
            ParamKey::T1Hs => &mut self.t1_hs,
            ParamKey::NoiseAmt => &mut self.noise_amt,
            ParamKey::Dt => &mut self.dt,
            ParamKey::VDecay => &mut self.v_decay,
        }
    }

    /// Clamp every field into its documented range.
    ///
    /// The crowding ramp needs `t1HS > t0HS`; when a caller inverts or
    /// collapses the thresholds, `t1HS` is pushed just above `t0HS`.
    pub fn clamped(mut self) -> Self {
        for key in ParamKey::ALL {
            let (lo, _) = key.range();
            let field = self.field_mut(key);
            *field = key.clamp(*field).unwrap_or(lo);
        }
        if self.t1_hs <= self.t0_hs + 1e-3 {
            self.t1_hs = self.t0_hs + 1e-3;
        }
        self
    }

    /// Apply the warm-up burst adjustments.
    pub fn with_warmup(self, warmup: &WarmupConfig) -> Self {
        Self {
            feed: self.feed + warmup.feed_boost,
            kill: self.kill - warmup.kill_drop,
            du: self.du.max(warmup.min_du),
            dv: self.dv.max(warmup.min_dv),
            alpha_dp: self.alpha_dp.max(warmup.min_alpha_dp),
            ..self
        }
        .clamped()
    }
}

/// Startup burst: stronger reaction and diffusion for the first steps after
/// a seed so the pattern fills the grid quickly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// Number of steps after each (re)seed the burst lasts.
    pub steps: u64,
    pub feed_boost: f32,
    pub kill_drop: f32,
    pub min_du: f32,
    pub min_dv: f32,
    pub min_alpha_dp: f32,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            steps: 150,
            feed_boost: 0.006,
            kill_drop: 0.003,
            min_du: 0.18,
            min_dv: 0.09,
            min_alpha_dp: 0.16,
        }
    }
}

/// Shared, lock-free parameter store.
///
/// Cloning yields another handle onto the same slots.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    slots: Arc<[AtomicU32; ParamKey::COUNT]>,
}

impl ParameterStore {
    pub fn new(initial: SimParams) -> Self {
        let initial = initial.clamped();
        let slots = ParamKey::ALL.map(|key| AtomicU32::new(initial.get(key).to_bits()));
        Self {
            slots: Arc::new(slots),
        }
    }

    /// Read one parameter.
    pub fn get(&self, key: ParamKey) -> f32 {
        f32::from_bits(self.slots[key.slot()].load(Ordering::Relaxed))
    }

    /// Write one parameter, clamped into range. NaN writes are ignored.
    pub fn set(&self, key: ParamKey, value: f32) {
        match key.clamp(value) {
            Some(v) => self.slots[key.slot()].store(v.to_bits(), Ordering::Relaxed),
            None => log::debug!("Ignoring NaN for parameter {}", key.name()),
        }
    }

    /// Write by name. Returns `false` for unknown names.
    pub fn set_named(&self, name: &str, value: f32) -> bool {
        match ParamKey::from_name(name) {
            Some(key) => {
                self.set(key, value);
                true
            }
            None => {
                log::debug!("Ignoring unknown parameter '{name}'");
                false
            }
        }
    }

    /// Apply a partial map of parameters. Unknown keys and non-numeric
    /// values are skipped. Returns the number of parameters written.
    pub fn set_parameters(&self, partial: &Map<String, Value>) -> usize {
        partial
            .iter()
            .filter(|(name, value)| match value.as_f64() {
                Some(v) => self.set_named(name, v as f32),
                None => {
                    log::debug!("Ignoring non-numeric value for parameter '{name}'");
                    false
                }
            })
            .count()
    }

    /// Consistent-enough snapshot: each scalar is read exactly once.
    pub fn snapshot(&self) -> SimParams {
        let mut params = SimParams::default();
        for key in ParamKey::ALL {
            *params.field_mut(key) = self.get(key);
        }
        params.clamped()
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(SimParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_matches_slots() {
        for (i, key) in ParamKey::ALL.iter().enumerate() {
            assert_eq!(key.slot(), i);
            assert_eq!(ParamKey::from_name(key.name()), Some(*key));
        }
    }

    #[test]
    fn test_dt_is_clamped() {
        let store = ParameterStore::default();
        store.set(ParamKey::Dt, 5.0);
        assert_eq!(store.get(ParamKey::Dt), 1.2);
        store.set(ParamKey::Dt, -1.0);
        assert_eq!(store.get(ParamKey::Dt), 0.0);
    }

    #[test]
    fn test_nan_is_ignored() {
        let store = ParameterStore::default();
        store.set(ParamKey::Feed, f32::NAN);
        assert_eq!(store.get(ParamKey::Feed), SimParams::default().feed);
    }

    #[test]
    fn test_partial_map() {
        let store = ParameterStore::default();
        let partial = json!({
            "F": 0.05,
            "kill": 0.2,
            "dt": 3.0,
            "bogus": 1.0,
            "Du": "fast",
        });
        let written = store.set_parameters(partial.as_object().unwrap());

        assert_eq!(written, 3);
        assert_eq!(store.get(ParamKey::Feed), 0.05);
        assert_eq!(store.get(ParamKey::Kill), 0.1);
        assert_eq!(store.get(ParamKey::Dt), 1.2);
        assert_eq!(store.get(ParamKey::DiffusionU), SimParams::default().du);
    }

    #[test]
    fn test_clones_share_slots() {
        let store = ParameterStore::default();
        let ui = store.clone();
        ui.set(ParamKey::NoiseAmt, 0.005);
        assert_eq!(store.snapshot().noise_amt, 0.005);
    }

    #[test]
    fn test_writes_from_another_thread() {
        let store = ParameterStore::default();
        let ui = store.clone();
        std::thread::spawn(move || ui.set(ParamKey::Kill, 0.055))
            .join()
            .unwrap();
        assert_eq!(store.get(ParamKey::Kill), 0.055);
    }

    #[test]
    fn test_inverted_thresholds_are_repaired() {
        let params = SimParams {
            t0_hs: 0.9,
            t1_hs: 0.4,
            ..Default::default()
        }
        .clamped();
        assert!(params.t1_hs > params.t0_hs);
    }

    #[test]
    fn test_warmup_raises_floors() {
        let params = SimParams::default().with_warmup(&WarmupConfig::default());
        assert!((params.feed - 0.043).abs() < 1e-6);
        assert!((params.kill - 0.057).abs() < 1e-6);
        assert_eq!(params.du, 0.18);
        assert_eq!(params.dv, 0.09);
        assert_eq!(params.alpha_dp, 0.16);
    }

    #[test]
    fn test_serde_uses_external_names() {
        let value = serde_json::to_value(SimParams::default()).unwrap();
        assert!(value.get("F").is_some());
        assert!(value.get("alphaDP").is_some());

        let parsed: SimParams = serde_json::from_str(r#"{"F": 0.02, "dt": 0.5}"#).unwrap();
        assert_eq!(parsed.feed, 0.02);
        assert_eq!(parsed.dt, 0.5);
        assert_eq!(parsed.kill, SimParams::default().kill);
    }
}

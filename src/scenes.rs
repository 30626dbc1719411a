//! Scene presets: pure functions of elapsed time producing the six fixture
//! role values. Keeping the presets stateless makes them testable without
//! simulating ticks; [`ScenePlayback`] only tracks which preset is active
//! and when it was activated.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dmx_types::{DmxError, FixtureRole, ROLE_COUNT};

/// Preset ids match the browser controller's 1-6 keys.
#[derive(Clone, Copy, PartialEq, Eq, Debug, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum ScenePreset {
    Blackout = 1,
    FullPower = 2,
    SlowRotate = 3,
    FastStrobe = 4,
    RainbowCycle = 5,
    Chaos = 6,
}

impl ScenePreset {
    pub fn from_id(id: u8) -> Result<Self, DmxError> {
        Self::from_repr(id).ok_or(DmxError::UnknownScene(id))
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

const SLOW_ROTATE_PERIOD: Duration = Duration::from_secs(8);
const COLOR_STEP: Duration = Duration::from_secs(2);
const FAST_STROBE_PERIOD: Duration = Duration::from_millis(250);
const RAINBOW_PERIOD: Duration = Duration::from_secs(5);
const CHAOS_STEP: Duration = Duration::from_millis(100);

/// Role values for a preset at a given elapsed time since activation.
/// Deterministic: the same (preset, elapsed, seed) always yields the same
/// six bytes. `seed` only matters for [`ScenePreset::Chaos`].
pub fn levels(preset: ScenePreset, elapsed: Duration, seed: u64) -> [u8; ROLE_COUNT] {
    let mut out = [0u8; ROLE_COUNT];
    match preset {
        ScenePreset::Blackout => {}
        ScenePreset::FullPower => out = [255; ROLE_COUNT],
        ScenePreset::SlowRotate => {
            out[FixtureRole::Dimmer.offset()] = 255;
            out[FixtureRole::Rotation.offset()] = triangle(elapsed, SLOW_ROTATE_PERIOD);
            // Step through the fixture's color bands, one every two seconds.
            let band = (elapsed.as_secs() / COLOR_STEP.as_secs()) % 8;
            out[FixtureRole::Color.offset()] = (band * 32) as u8;
        }
        ScenePreset::FastStrobe => {
            out[FixtureRole::Dimmer.offset()] = 255;
            out[FixtureRole::Strobe.offset()] = square(elapsed, FAST_STROBE_PERIOD);
        }
        ScenePreset::RainbowCycle => {
            out[FixtureRole::Dimmer.offset()] = 255;
            out[FixtureRole::Color.offset()] = ramp(elapsed, RAINBOW_PERIOD);
        }
        ScenePreset::Chaos => {
            // Resample every CHAOS_STEP, reseeding from the step index so a
            // fixed seed reproduces the whole sequence.
            let step = (elapsed.as_millis() / CHAOS_STEP.as_millis()) as u64;
            let mut rng = StdRng::seed_from_u64(seed ^ step.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            out[FixtureRole::Dimmer.offset()] = 255;
            for role in [
                FixtureRole::Color,
                FixtureRole::Pattern,
                FixtureRole::Strobe,
                FixtureRole::Rotation,
                FixtureRole::Mode,
            ] {
                out[role.offset()] = rng.gen_range(0..=255);
            }
        }
    }
    out
}

/// Fraction of the current period, in [0, 1).
fn phase(elapsed: Duration, period: Duration) -> f64 {
    (elapsed.as_secs_f64() / period.as_secs_f64()).fract()
}

/// Linear 0..=255 sweep that wraps exactly at the period boundary.
fn ramp(elapsed: Duration, period: Duration) -> u8 {
    (phase(elapsed, period) * 256.0) as u8
}

/// Symmetric up-then-down sweep.
fn triangle(elapsed: Duration, period: Duration) -> u8 {
    let p = phase(elapsed, period);
    let t = if p < 0.5 { p * 2.0 } else { 2.0 - p * 2.0 };
    (t * 255.0).round() as u8
}

/// 50% duty square wave between 0 and 255.
fn square(elapsed: Duration, period: Duration) -> u8 {
    if phase(elapsed, period) < 0.5 { 255 } else { 0 }
}

/// Tracks the active preset and its time origin.
pub struct ScenePlayback {
    active: Option<ScenePreset>,
    origin: Instant,
    seed: u64,
}

impl ScenePlayback {
    pub fn new(seed: u64) -> Self {
        Self {
            active: None,
            origin: Instant::now(),
            seed,
        }
    }

    /// Activate a preset and reset its time origin to `now`. Switching is
    /// instantaneous; there is no cross-fade.
    pub fn activate(&mut self, preset: ScenePreset, now: Instant) {
        self.active = Some(preset);
        self.origin = now;
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<ScenePreset> {
        self.active
    }

    /// Role values for the current tick, or None when no preset is active.
    pub fn tick(&self, now: Instant) -> Option<[u8; ROLE_COUNT]> {
        let preset = self.active?;
        Some(levels(preset, now.duration_since(self.origin), self.seed))
    }
}

//! Audio-reactive mapping. The spectrum analysis itself happens outside the
//! bridge (the browser visualizer posts bass-energy samples); this module
//! only tracks the incoming energy and turns it into Dimmer/Strobe levels.

use crate::dmx_types::FixtureRole;

/// Default per-sample decay factor for falling energy.
const RELEASE: f32 = 0.35;

/// Levels the mapper wants on the fixture for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioLevels {
    pub dimmer: u8,
    pub strobe: u8,
}

impl AudioLevels {
    pub fn role_values(&self) -> [(FixtureRole, u8); 2] {
        [
            (FixtureRole::Dimmer, self.dimmer),
            (FixtureRole::Strobe, self.strobe),
        ]
    }
}

/// Envelope follower over the external bass-energy feed.
///
/// Rising samples take effect immediately so a beat is never late; falling
/// energy decays exponentially, which keeps single-frame dropouts in the
/// analyzer feed from flickering the fixture.
pub struct AudioReactor {
    energy: f32,
    sensitivity: f32,
    enabled: bool,
    release: f32,
}

impl AudioReactor {
    pub fn new() -> Self {
        Self {
            energy: 0.0,
            sensitivity: 1.0,
            enabled: false,
            release: RELEASE,
        }
    }

    /// Feed one bass-energy sample in [0, 1]. Samples arriving while audio
    /// mode is off are dropped so no stale energy lingers for re-enable.
    pub fn on_sample(&mut self, sample: f32) {
        if !self.enabled {
            return;
        }
        let sample = if sample.is_finite() {
            sample.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if sample >= self.energy {
            self.energy = sample;
        } else {
            self.energy += (sample - self.energy) * self.release;
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.energy = 0.0;
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Sensitivity is unclamped; only the output is.
    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity;
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    /// Levels for this tick, or None while disabled (manual and scene
    /// control resume with no residual audio influence).
    pub fn tick(&self) -> Option<AudioLevels> {
        if !self.enabled {
            return None;
        }
        let drive = self.energy * self.sensitivity;
        let dimmer = (drive * 255.0).clamp(0.0, 255.0) as u8;
        // Overdriven signal bleeds into the strobe channel.
        let strobe = ((drive - 1.0) * 255.0).clamp(0.0, 255.0) as u8;
        Some(AudioLevels { dimmer, strobe })
    }
}

impl Default for AudioReactor {
    fn default() -> Self {
        Self::new()
    }
}

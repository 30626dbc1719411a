//! The control surface of the bridge. Every writer (HTTP handlers, the
//! scene engine, the audio mapper) goes through [`Console`], which owns the
//! universe buffer behind a single mutex and arbitrates between the three
//! sources: manual settings, scene presets, and the audio envelope, with the
//! blackout override on top.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::audio::AudioReactor;
use crate::dmx_types::{ConnectionState, DmxError, FixtureMap, FixtureRole, Universe};
use crate::scenes::{ScenePlayback, ScenePreset};
use strum::IntoEnumIterator;

/// Snapshot of the bridge for the `/status` endpoint.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub connection: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub active_scene: Option<u8>,
    pub audio_enabled: bool,
    pub blackout: bool,
}

pub struct Console {
    universe: Mutex<Universe>,
    fixture: FixtureMap,
    scene: Mutex<ScenePlayback>,
    audio: Mutex<AudioReactor>,
    blackout: AtomicBool,
    link: Mutex<LinkView>,
}

/// Mirror of the transport's connection state, updated by the transmit
/// loop so status reads never touch the serial handle.
struct LinkView {
    state: ConnectionState,
    last_error: Option<String>,
}

impl Console {
    pub fn new(fixture: FixtureMap, scene_seed: u64) -> Arc<Self> {
        Arc::new(Self {
            universe: Mutex::new(Universe::new()),
            fixture,
            scene: Mutex::new(ScenePlayback::new(scene_seed)),
            audio: Mutex::new(AudioReactor::new()),
            blackout: AtomicBool::new(false),
            link: Mutex::new(LinkView {
                state: ConnectionState::Disconnected,
                last_error: None,
            }),
        })
    }

    /// Manual write to one logical channel. Any manual edit suspends the
    /// active preset; the sliders win until a scene is selected again.
    pub fn set_manual_channel(&self, role: FixtureRole, value: u8) -> Result<(), DmxError> {
        self.scene.lock().clear();
        self.universe.lock().set(self.fixture.slot(role), value)
    }

    /// Manual bulk write of consecutive channels (1-based start address),
    /// the shape the browser controller posts. Suspends the active preset.
    pub fn set_range(&self, start_channel: usize, values: &[u8]) -> Result<(), DmxError> {
        self.scene.lock().clear();
        self.universe.lock().set_range(start_channel, values)
    }

    pub fn select_scene(&self, id: u8, now: Instant) -> Result<ScenePreset, DmxError> {
        let preset = ScenePreset::from_id(id)?;
        self.scene.lock().activate(preset, now);
        Ok(preset)
    }

    pub fn clear_scene(&self) {
        self.scene.lock().clear();
    }

    /// Emergency blackout. Zeroes the fixture immediately rather than
    /// waiting for the next tick, and stays in force over any ticking
    /// preset until released.
    pub fn trigger_blackout(&self) {
        self.blackout.store(true, Ordering::SeqCst);
        let mut universe = self.universe.lock();
        for role in FixtureRole::iter() {
            let _ = universe.set(self.fixture.slot(role), 0);
        }
    }

    pub fn release_blackout(&self) {
        self.blackout.store(false, Ordering::SeqCst);
    }

    pub fn blackout_active(&self) -> bool {
        self.blackout.load(Ordering::SeqCst)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio.lock().set_enabled(enabled);
    }

    pub fn set_audio_sensitivity(&self, sensitivity: f32) {
        self.audio.lock().set_sensitivity(sensitivity);
    }

    /// Entry point for the external analyzer's bass-energy feed.
    pub fn feed_energy(&self, energy: f32) {
        self.audio.lock().on_sample(energy);
    }

    /// One producer tick, driven by the transmit loop. Scene writes happen
    /// before audio writes, and the blackout override is applied last, all
    /// under one buffer lock so the combined update is atomic with respect
    /// to snapshots.
    pub fn tick(&self, now: Instant) {
        let scene_levels = self.scene.lock().tick(now);
        let audio_levels = self.audio.lock().tick();

        let mut universe = self.universe.lock();
        if let Some(levels) = scene_levels {
            for role in FixtureRole::iter() {
                let _ = universe.set(self.fixture.slot(role), levels[role.offset()]);
            }
        }
        if let Some(levels) = audio_levels {
            for (role, value) in levels.role_values() {
                let _ = universe.set(self.fixture.slot(role), value);
            }
        }
        if self.blackout.load(Ordering::SeqCst) {
            for role in FixtureRole::iter() {
                let _ = universe.set(self.fixture.slot(role), 0);
            }
        }
    }

    pub fn snapshot(&self) -> [u8; crate::dmx_types::DMX_CHANNELS] {
        self.universe.lock().snapshot()
    }

    /// Value currently held for a role, mostly for tests and diagnostics.
    pub fn role_value(&self, role: FixtureRole) -> u8 {
        self.universe
            .lock()
            .get(self.fixture.slot(role))
            .unwrap_or(0)
    }

    pub fn set_link_state(&self, state: ConnectionState) {
        let mut link = self.link.lock();
        if let ConnectionState::Failed { reason } = &state {
            link.last_error = Some(reason.clone());
        }
        link.state = state;
    }

    pub fn note_link_error(&self, message: impl Into<String>) {
        self.link.lock().last_error = Some(message.into());
    }

    pub fn status(&self) -> BridgeStatus {
        let link = self.link.lock();
        BridgeStatus {
            connection: link.state.label(),
            port: link.state.port().map(str::to_owned),
            last_error: link.last_error.clone(),
            active_scene: self.scene.lock().active().map(ScenePreset::id),
            audio_enabled: self.audio.lock().enabled(),
            blackout: self.blackout.load(Ordering::SeqCst),
        }
    }
}

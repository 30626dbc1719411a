//! DMX Types and Data Structures
//!
//! This module defines the core types shared by every subsystem of the
//! bridge:
//!
//! ## Universe
//! - [`Universe`] - The 512-slot channel buffer, the single source of truth
//!   for what goes on the wire
//! - [`DMX_CHANNELS`] - Universe size (512 slots)
//!
//! ## Fixture
//! - [`FixtureRole`] - The six logical channels of the fixture
//! - [`FixtureMap`] - Maps roles onto universe slots at a start address
//!
//! ## Link
//! - [`ConnectionState`] - Lifecycle of the USB-DMX adapter connection
//!
//! ## Errors
//! - [`DmxError`] - Caller-side errors (bad index, bad address, bad preset)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of slots in one DMX universe.
pub const DMX_CHANNELS: usize = 512;

/// Number of logical channels the fixture occupies.
pub const ROLE_COUNT: usize = 6;

#[derive(Error, Debug, PartialEq)]
pub enum DmxError {
    #[error("channel index {0} out of range for the 512-slot universe")]
    ChannelOutOfRange(usize),
    #[error("channel range starting at {start} with {count} values does not fit the universe")]
    BadChannelRange { start: usize, count: usize },
    #[error("start address {0} does not leave room for all 6 fixture channels")]
    BadStartAddress(usize),
    #[error("unknown scene preset: {0}")]
    UnknownScene(u8),
}

/// The six logical channels of the fixture, in DMX footprint order.
/// `Color` sits on the fixture's first channel, `Mode` on its sixth.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum FixtureRole {
    /// Color selection (0-255 maps to the fixture's discrete color bands)
    Color,
    /// Pattern selection
    Pattern,
    /// Strobe speed (0 = open)
    Strobe,
    /// Rotation speed/direction
    Rotation,
    /// Master dimmer (0 = off, 255 = full)
    Dimmer,
    /// Mode select (sound/auto/dmx)
    Mode,
}

impl FixtureRole {
    /// Offset of this role from the fixture's start address (0-based).
    pub fn offset(self) -> usize {
        self as usize
    }
}

/// Maps the logical fixture channels onto universe slots.
/// The start address is the fixture's configured DMX address (1-based),
/// so with the default address of 1, `Color` lands on slot index 0.
#[derive(Clone, Copy, Debug)]
pub struct FixtureMap {
    start_address: usize,
}

impl FixtureMap {
    pub fn new(start_address: usize) -> Result<Self, DmxError> {
        if start_address == 0 || start_address + ROLE_COUNT - 1 > DMX_CHANNELS {
            return Err(DmxError::BadStartAddress(start_address));
        }
        Ok(Self { start_address })
    }

    pub fn start_address(&self) -> usize {
        self.start_address
    }

    /// Universe slot index (0-based) for a role.
    pub fn slot(&self, role: FixtureRole) -> usize {
        self.start_address - 1 + role.offset()
    }
}

impl Default for FixtureMap {
    fn default() -> Self {
        Self { start_address: 1 }
    }
}

/// The DMX universe buffer. Index 0 carries channel 1.
/// Values are bytes by construction, so every slot is always valid;
/// the only thing that can go wrong is addressing.
#[derive(Clone)]
pub struct Universe {
    levels: [u8; DMX_CHANNELS],
}

impl Universe {
    pub fn new() -> Self {
        Self {
            levels: [0; DMX_CHANNELS],
        }
    }

    /// Set a single slot by 0-based index.
    pub fn set(&mut self, index: usize, value: u8) -> Result<(), DmxError> {
        let slot = self
            .levels
            .get_mut(index)
            .ok_or(DmxError::ChannelOutOfRange(index))?;
        *slot = value;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<u8, DmxError> {
        self.levels
            .get(index)
            .copied()
            .ok_or(DmxError::ChannelOutOfRange(index))
    }

    /// Set consecutive channels starting at a 1-based channel number.
    /// The whole range is validated up front so a bad request leaves the
    /// buffer untouched.
    pub fn set_range(&mut self, start_channel: usize, values: &[u8]) -> Result<(), DmxError> {
        if values.is_empty() {
            return Ok(());
        }
        if start_channel == 0 || start_channel + values.len() - 1 > DMX_CHANNELS {
            return Err(DmxError::BadChannelRange {
                start: start_channel,
                count: values.len(),
            });
        }
        self.levels[start_channel - 1..start_channel - 1 + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Copy of the full universe for the transmit loop. Copy-on-read keeps
    /// the loop from holding the buffer lock during serial I/O.
    pub fn snapshot(&self) -> [u8; DMX_CHANNELS] {
        self.levels
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of the adapter connection, owned by the serial link.
/// `Disconnected` means never connected since startup; `Failed` means a
/// connection existed and was lost, so the operator knows whether to check
/// cabling or wait for the automatic reconnect.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { port: String },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Failed { .. } => "failed",
        }
    }

    pub fn port(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { port } => Some(port),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_set_then_snapshot_round_trip() {
        let mut universe = Universe::new();
        universe.set(0, 17).unwrap();
        universe.set(511, 255).unwrap();
        let snap = universe.snapshot();
        assert_eq!(snap[0], 17);
        assert_eq!(snap[511], 255);
    }

    #[test]
    fn test_set_out_of_range_leaves_buffer_unchanged() {
        let mut universe = Universe::new();
        universe.set(3, 9).unwrap();
        let before = universe.snapshot();
        assert_eq!(universe.set(512, 1), Err(DmxError::ChannelOutOfRange(512)));
        assert_eq!(universe.snapshot(), before);
    }

    #[test]
    fn test_set_range_writes_consecutive_channels() {
        let mut universe = Universe::new();
        universe.set_range(10, &[1, 2, 3]).unwrap();
        let snap = universe.snapshot();
        assert_eq!(&snap[9..12], &[1, 2, 3]);
    }

    #[test]
    fn test_set_range_rejects_overrun_without_partial_write() {
        let mut universe = Universe::new();
        let err = universe.set_range(511, &[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            DmxError::BadChannelRange {
                start: 511,
                count: 3
            }
        );
        assert_eq!(universe.snapshot(), [0; DMX_CHANNELS]);
    }

    #[test]
    fn test_fixture_map_respects_start_address() {
        let map = FixtureMap::new(10).unwrap();
        assert_eq!(map.slot(FixtureRole::Color), 9);
        assert_eq!(map.slot(FixtureRole::Mode), 14);
    }

    #[test]
    fn test_fixture_map_rejects_addresses_past_the_universe() {
        assert!(FixtureMap::new(0).is_err());
        assert!(FixtureMap::new(508).is_err());
        assert!(FixtureMap::new(507).is_ok());
    }

    #[test]
    fn test_role_names_parse_case_insensitively() {
        assert_eq!(FixtureRole::from_str("dimmer").unwrap(), FixtureRole::Dimmer);
        assert_eq!(FixtureRole::from_str("Color").unwrap(), FixtureRole::Color);
    }
}

//! Serial output: the USB-DMX adapter link and the fixed-rate transmit
//! loop that feeds it.
//!
//! The loop owns the cadence. Producers write into the universe whenever
//! they like; every period the loop runs one producer tick, snapshots the
//! buffer, and pushes a frame. Write failures never stop the loop — the
//! frame is dropped (DMX has no catch-up semantics, only the latest state
//! matters) and reconnection is attempted on a bounded backoff.

use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use serialport::{DataBits, Parity, SerialPort, SerialPortType, StopBits};
use thiserror::Error;

use crate::console::Console;
use crate::dmx_types::{ConnectionState, DMX_CHANNELS};

/// Standard DMX512 baud rate.
pub const DMX_BAUD: u32 = 250_000;

/// Break and mark-after-break for the open (FTDI-style) framing. The
/// protocol minimums are 88us/8us; these run a little long for slow
/// adapters.
const BREAK: Duration = Duration::from_micros(120);
const MARK_AFTER_BREAK: Duration = Duration::from_micros(12);

/// Bounded timeout on serial writes so a hung adapter cannot freeze a
/// transmission period indefinitely.
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

const FTDI_VID: u16 = 0x0403;

/// Adapter description keywords the discovery heuristics match on.
const ADAPTER_KEYWORDS: [&str; 5] = ["dmx", "enttec", "ftdi", "dmxking", "usb serial"];

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("no usb-dmx adapter found")]
    NoDeviceFound,
    #[error("failed to open {port}: {reason}")]
    Connect { port: String, reason: String },
    #[error("frame write failed: {0}")]
    Write(String),
    #[error("not connected")]
    NotConnected,
}

/// How frames are put on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Debug, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum AdapterFraming {
    /// Raw DMX framing: serial break, mark, start code, 512 slots.
    Open,
    /// ENTTEC USB Pro packet: 0x7E, label 0x06, length, payload, 0xE7.
    EnttecPro,
}

/// The seam between the transmit loop and the hardware. Production uses
/// [`SerialLink`]; tests drive the loop with a fake.
pub trait FrameLink: Send {
    /// Enumerate candidate ports. Finite, restartable on each call.
    fn discover(&self) -> Vec<String>;
    fn connect(&mut self, port: &str) -> Result<(), LinkError>;
    fn disconnect(&mut self);
    /// Send one universe. No retries here; retry policy belongs to the
    /// loop so frame cadence stays predictable.
    fn write_frame(&mut self, frame: &[u8; DMX_CHANNELS]) -> Result<(), LinkError>;
    fn state(&self) -> ConnectionState;
}

/// Owns the one serial connection to the adapter.
pub struct SerialLink {
    framing: AdapterFraming,
    baud: u32,
    port: Option<Box<dyn SerialPort>>,
    state: ConnectionState,
    ever_connected: bool,
}

impl SerialLink {
    pub fn new(framing: AdapterFraming, baud: u32) -> Self {
        Self {
            framing,
            baud,
            port: None,
            state: ConnectionState::Disconnected,
            ever_connected: false,
        }
    }

    fn write_open(port: &mut Box<dyn SerialPort>, frame: &[u8; DMX_CHANNELS]) -> serialport::Result<()> {
        port.set_break()?;
        thread::sleep(BREAK);
        port.clear_break()?;
        thread::sleep(MARK_AFTER_BREAK);
        port.write_all(&[0x00])?;
        port.write_all(frame)?;
        port.flush()?;
        Ok(())
    }

    fn write_enttec(port: &mut Box<dyn SerialPort>, frame: &[u8; DMX_CHANNELS]) -> serialport::Result<()> {
        port.write_all(&enttec_packet(frame))?;
        port.flush()?;
        Ok(())
    }
}

/// ENTTEC USB Pro "send DMX" packet: 0x7E, label 0x06, little-endian
/// length of (start code + slots), payload, 0xE7.
fn enttec_packet(frame: &[u8; DMX_CHANNELS]) -> Vec<u8> {
    let len = (DMX_CHANNELS + 1) as u16;
    let mut packet = Vec::with_capacity(DMX_CHANNELS + 6);
    packet.push(0x7E);
    packet.push(0x06);
    packet.push((len & 0xFF) as u8);
    packet.push((len >> 8) as u8);
    packet.push(0x00);
    packet.extend_from_slice(frame);
    packet.push(0xE7);
    packet
}

impl FrameLink for SerialLink {
    fn discover(&self) -> Vec<String> {
        let Ok(ports) = serialport::available_ports() else {
            return Vec::new();
        };
        ports
            .into_iter()
            .filter(|info| match &info.port_type {
                SerialPortType::UsbPort(usb) => {
                    usb.vid == FTDI_VID
                        || [usb.product.as_deref(), usb.manufacturer.as_deref()]
                            .into_iter()
                            .flatten()
                            .any(|desc| {
                                let desc = desc.to_lowercase();
                                ADAPTER_KEYWORDS.iter().any(|k| desc.contains(k))
                            })
                }
                // Fall back on the platform tty name for adapters that
                // enumerate without USB metadata.
                _ => {
                    let name = info.port_name.to_lowercase();
                    name.contains("usbserial") || name.contains("ttyusb")
                }
            })
            .map(|info| info.port_name)
            .collect()
    }

    fn connect(&mut self, port: &str) -> Result<(), LinkError> {
        self.state = ConnectionState::Connecting;
        match serialport::new(port, self.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .timeout(WRITE_TIMEOUT)
            .open()
        {
            Ok(handle) => {
                self.port = Some(handle);
                self.state = ConnectionState::Connected {
                    port: port.to_string(),
                };
                self.ever_connected = true;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                // A failed reconnect keeps the "was connected, now lost"
                // signal; a failed first connect stays Disconnected.
                self.state = if self.ever_connected {
                    ConnectionState::Failed {
                        reason: reason.clone(),
                    }
                } else {
                    ConnectionState::Disconnected
                };
                Err(LinkError::Connect {
                    port: port.to_string(),
                    reason,
                })
            }
        }
    }

    fn disconnect(&mut self) {
        self.port = None;
        if self.state.is_connected() {
            self.state = ConnectionState::Disconnected;
        }
    }

    fn write_frame(&mut self, frame: &[u8; DMX_CHANNELS]) -> Result<(), LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::NotConnected)?;
        let result = match self.framing {
            AdapterFraming::Open => Self::write_open(port, frame),
            AdapterFraming::EnttecPro => Self::write_enttec(port, frame),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = e.to_string();
                self.port = None;
                self.state = ConnectionState::Failed {
                    reason: reason.clone(),
                };
                Err(LinkError::Write(reason))
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.clone()
    }
}

#[derive(Clone, Debug)]
pub struct LoopOptions {
    /// Transmission period, 1/44s by convention.
    pub period: Duration,
    /// Ticks between reconnect (or re-discovery) attempts while down.
    pub retry_ticks: u32,
    /// Pin the adapter to a specific port instead of discovering.
    pub port_override: Option<String>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            period: Duration::from_secs_f64(1.0 / 44.0),
            retry_ticks: 44,
            port_override: None,
        }
    }
}

/// Handle to the running transmit thread.
pub struct TransmitLoop {
    stopper: Sender<()>,
    handle: JoinHandle<()>,
}

impl TransmitLoop {
    pub fn spawn(console: Arc<Console>, link: Box<dyn FrameLink>, opts: LoopOptions) -> Self {
        let (stopper, stop_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("dmx-transmit".into())
            .spawn(move || run_loop(console, link, opts, stop_rx))
            .expect("failed to spawn transmit thread");
        Self { stopper, handle }
    }

    /// Signal shutdown and wait for the thread to release the serial
    /// handle.
    pub fn stop(self) {
        let _ = self.stopper.send(());
        let _ = self.handle.join();
    }
}

fn run_loop(
    console: Arc<Console>,
    mut link: Box<dyn FrameLink>,
    opts: LoopOptions,
    stop: Receiver<()>,
) {
    let mut next = Instant::now();
    let mut ticks_until_retry = 0u32;
    let mut mirrored = ConnectionState::Disconnected;
    console.set_link_state(mirrored.clone());

    loop {
        let wait = next.saturating_duration_since(Instant::now());
        match stop.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        console.tick(now);
        let frame = console.snapshot();

        if link.state().is_connected() {
            if let Err(e) = link.write_frame(&frame) {
                tracing::warn!(error = %e, "frame write failed, dropping frames until reconnect");
                ticks_until_retry = opts.retry_ticks;
            }
        } else if ticks_until_retry == 0 {
            ticks_until_retry = opts.retry_ticks;
            if try_connect(link.as_mut(), &opts, &console) {
                ticks_until_retry = 0;
            }
        } else {
            ticks_until_retry -= 1;
        }

        let state = link.state();
        if state != mirrored {
            console.set_link_state(state.clone());
            mirrored = state;
        }

        // Deadline-based cadence; if a slow write blew past one or more
        // periods, those frames are skipped rather than replayed in a
        // burst.
        next += opts.period;
        let after = Instant::now();
        if next < after {
            next = after + opts.period;
        }
    }

    link.disconnect();
    console.set_link_state(link.state());
    tracing::info!("transmit loop stopped");
}

fn try_connect(link: &mut dyn FrameLink, opts: &LoopOptions, console: &Console) -> bool {
    let candidates = match &opts.port_override {
        Some(port) => vec![port.clone()],
        None => link.discover(),
    };
    if candidates.is_empty() {
        console.note_link_error(LinkError::NoDeviceFound.to_string());
        tracing::debug!("discovery found no adapter, will retry");
        return false;
    }
    for candidate in candidates {
        match link.connect(&candidate) {
            Ok(()) => {
                tracing::info!(port = %candidate, "connected to usb-dmx adapter");
                return true;
            }
            Err(e) => {
                tracing::warn!(port = %candidate, error = %e, "adapter connect failed");
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx_types::{FixtureMap, FixtureRole};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeShared {
        frames: Mutex<Vec<[u8; DMX_CHANNELS]>>,
        unplugged: AtomicBool,
        discoverable: AtomicBool,
    }

    struct FakeLink {
        shared: Arc<FakeShared>,
        state: ConnectionState,
    }

    impl FakeLink {
        fn new() -> (Self, Arc<FakeShared>) {
            let shared = Arc::new(FakeShared {
                frames: Mutex::new(Vec::new()),
                unplugged: AtomicBool::new(false),
                discoverable: AtomicBool::new(true),
            });
            (
                Self {
                    shared: shared.clone(),
                    state: ConnectionState::Disconnected,
                },
                shared,
            )
        }
    }

    impl FrameLink for FakeLink {
        fn discover(&self) -> Vec<String> {
            if self.shared.discoverable.load(Ordering::SeqCst) {
                vec!["fake0".to_string()]
            } else {
                Vec::new()
            }
        }

        fn connect(&mut self, port: &str) -> Result<(), LinkError> {
            if self.shared.unplugged.load(Ordering::SeqCst) {
                return Err(LinkError::Connect {
                    port: port.to_string(),
                    reason: "fake unplug".to_string(),
                });
            }
            self.state = ConnectionState::Connected {
                port: port.to_string(),
            };
            Ok(())
        }

        fn disconnect(&mut self) {
            self.state = ConnectionState::Disconnected;
        }

        fn write_frame(&mut self, frame: &[u8; DMX_CHANNELS]) -> Result<(), LinkError> {
            if self.shared.unplugged.load(Ordering::SeqCst) {
                self.state = ConnectionState::Failed {
                    reason: "fake unplug".to_string(),
                };
                return Err(LinkError::Write("fake unplug".to_string()));
            }
            self.shared.frames.lock().push(*frame);
            Ok(())
        }

        fn state(&self) -> ConnectionState {
            self.state.clone()
        }
    }

    fn fast_opts() -> LoopOptions {
        LoopOptions {
            period: Duration::from_millis(2),
            retry_ticks: 2,
            port_override: None,
        }
    }

    fn settle() {
        thread::sleep(Duration::from_millis(50));
    }

    #[test]
    fn test_loop_frames_carry_the_latest_universe() {
        let console = Console::new(FixtureMap::default(), 1);
        let (link, shared) = FakeLink::new();
        let tx = TransmitLoop::spawn(console.clone(), Box::new(link), fast_opts());

        console.set_manual_channel(FixtureRole::Dimmer, 200).unwrap();
        settle();
        tx.stop();

        let frames = shared.frames.lock();
        assert!(!frames.is_empty());
        let last = frames.last().unwrap();
        assert_eq!(last[FixtureRole::Dimmer.offset()], 200);
    }

    #[test]
    fn test_write_failures_mark_failed_and_drop_frames() {
        let console = Console::new(FixtureMap::default(), 1);
        let (link, shared) = FakeLink::new();
        let tx = TransmitLoop::spawn(console.clone(), Box::new(link), fast_opts());

        settle();
        assert_eq!(console.status().connection, "connected");

        shared.unplugged.store(true, Ordering::SeqCst);
        settle();
        let status = console.status();
        assert_eq!(status.connection, "failed");
        assert_eq!(status.last_error.as_deref(), Some("fake unplug"));

        // Frames are dropped while down, never queued.
        let frozen = shared.frames.lock().len();
        settle();
        let later = shared.frames.lock().len();
        assert_eq!(frozen, later, "frames were queued while the link was down");

        shared.unplugged.store(false, Ordering::SeqCst);
        settle();
        assert_eq!(console.status().connection, "connected");
        assert!(shared.frames.lock().len() > later, "framing did not resume");
        tx.stop();
    }

    #[test]
    fn test_empty_discovery_reports_no_device_and_keeps_retrying() {
        let console = Console::new(FixtureMap::default(), 1);
        let (link, shared) = FakeLink::new();
        shared.discoverable.store(false, Ordering::SeqCst);
        let tx = TransmitLoop::spawn(console.clone(), Box::new(link), fast_opts());

        settle();
        let status = console.status();
        assert_eq!(status.connection, "disconnected");
        assert_eq!(status.last_error.as_deref(), Some("no usb-dmx adapter found"));
        assert!(shared.frames.lock().is_empty());

        // Adapter appears later; discovery retry picks it up.
        shared.discoverable.store(true, Ordering::SeqCst);
        settle();
        assert_eq!(console.status().connection, "connected");
        assert!(!shared.frames.lock().is_empty());
        tx.stop();
    }

    #[test]
    fn test_stop_joins_and_releases_the_link() {
        let console = Console::new(FixtureMap::default(), 1);
        let (link, _shared) = FakeLink::new();
        let tx = TransmitLoop::spawn(console.clone(), Box::new(link), fast_opts());
        settle();
        tx.stop();
        assert_eq!(console.status().connection, "disconnected");
    }

    #[test]
    fn test_enttec_packet_shape() {
        let frame = [7u8; DMX_CHANNELS];
        let packet = enttec_packet(&frame);
        assert_eq!(packet.len(), DMX_CHANNELS + 6);
        assert_eq!(&packet[..4], &[0x7E, 0x06, 0x01, 0x02]);
        assert_eq!(packet[4], 0x00, "missing DMX start code");
        assert_eq!(&packet[5..5 + DMX_CHANNELS], &frame);
        assert_eq!(*packet.last().unwrap(), 0xE7);
    }
}

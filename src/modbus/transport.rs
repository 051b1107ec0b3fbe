//! Half-duplex transport plumbing.
//!
//! The engine talks to the outside world through three small traits so the
//! same code drives a host serial port, an embedded UART or a test double:
//! a duplex byte stream, an optional RS-485 direction output, and a
//! monotonic millisecond clock.

use log::trace;
use std::io;
use std::time::{Duration, Instant};

/// Settling time on either side of a transmission for transceiver turnaround.
pub const TURNAROUND_DELAY_MS: u64 = 1;

pub trait ByteStream {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    fn bytes_available(&mut self) -> io::Result<usize>;
    fn read_byte(&mut self) -> io::Result<u8>;
}

/// Level of the driver-enable line. `High` enables the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    High,
    Low,
}

pub trait DirectionControl {
    fn set_level(&mut self, level: Level) -> io::Result<()>;
}

pub trait Clock {
    fn now_ms(&self) -> u64;
    fn delay_ms(&mut self, ms: u64);

    /// Called by the receive loop when no byte is pending.
    fn idle(&mut self) {}
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    fn idle(&mut self) {
        std::thread::sleep(Duration::from_micros(200));
    }
}

pub struct HalfDuplexTransport<S> {
    stream: S,
    direction: Option<Box<dyn DirectionControl + Send>>,
}

impl<S: ByteStream> HalfDuplexTransport<S> {
    /// Transport for links that need no transceiver switching.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            direction: None,
        }
    }

    pub fn with_direction(stream: S, direction: Box<dyn DirectionControl + Send>) -> Self {
        Self {
            stream,
            direction: Some(direction),
        }
    }

    pub fn has_direction_control(&self) -> bool {
        self.direction.is_some()
    }

    pub fn transmit<C: Clock>(&mut self, frame: &[u8], clock: &mut C) -> io::Result<()> {
        match self.direction.as_mut() {
            Some(direction) => {
                direction.set_level(Level::High)?;
                clock.delay_ms(TURNAROUND_DELAY_MS);

                let written = self
                    .stream
                    .write_bytes(frame)
                    .and_then(|_| self.stream.flush());

                clock.delay_ms(TURNAROUND_DELAY_MS);
                // Always hand the bus back, even if the write failed.
                direction.set_level(Level::Low)?;
                written?;
            }
            None => {
                self.stream.write_bytes(frame)?;
                self.stream.flush()?;
            }
        }
        trace!("transmitted {} bytes", frame.len());
        Ok(())
    }

    /// Next inbound byte if one is already waiting.
    pub fn poll_byte(&mut self) -> io::Result<Option<u8>> {
        if self.stream.bytes_available()? == 0 {
            return Ok(None);
        }
        self.stream.read_byte().map(Some)
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }
}

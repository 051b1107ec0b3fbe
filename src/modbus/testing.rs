//! Scripted stream, pin and clock doubles shared by the modbus unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::crc;
use super::transport::{ByteStream, Clock, DirectionControl, Level};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Level(Level),
    Delay(u64),
    Write(Vec<u8>),
    Flush,
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedTime(Arc<AtomicU64>);

impl SharedTime {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

/// Clock that only moves when the code under test delays or idles.
pub struct MockClock {
    time: SharedTime,
    log: Option<EventLog>,
    idle_step_ms: u64,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            time: SharedTime::default(),
            log: None,
            idle_step_ms: 1,
        }
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn time(&self) -> SharedTime {
        self.time.clone()
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.time.get()
    }

    fn delay_ms(&mut self, ms: u64) {
        if let Some(log) = &self.log {
            log.push(Event::Delay(ms));
        }
        self.time.advance(ms);
    }

    fn idle(&mut self) {
        self.time.advance(self.idle_step_ms);
    }
}

pub struct MockPin {
    log: EventLog,
}

impl MockPin {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl DirectionControl for MockPin {
    fn set_level(&mut self, level: Level) -> io::Result<()> {
        self.log.push(Event::Level(level));
        Ok(())
    }
}

/// In-memory bus. Inbound bytes carry an arrival time checked against the shared clock.
pub struct MockStream {
    inbound: VecDeque<(u64, u8)>,
    replies: VecDeque<Vec<(u64, u8)>>,
    echo: bool,
    written: Vec<u8>,
    log: Option<EventLog>,
    fail_writes: bool,
    reads_left: Option<usize>,
    time: SharedTime,
}

impl MockStream {
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            replies: VecDeque::new(),
            echo: false,
            written: Vec::new(),
            log: None,
            fail_writes: false,
            reads_left: None,
            time: SharedTime::default(),
        }
    }

    pub fn with_clock(mut self, clock: &MockClock) -> Self {
        self.time = clock.time();
        self
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Bytes already sitting in the receive buffer.
    pub fn with_inbound(mut self, bytes: &[u8]) -> Self {
        self.inbound.extend(bytes.iter().map(|&b| (0, b)));
        self
    }

    /// Loops every transmitted byte back onto the receive line.
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Lets `n` bytes through, then fails every availability check like an unplugged adapter.
    pub fn failing_reads_after(mut self, n: usize) -> Self {
        self.reads_left = Some(n);
        self
    }

    /// Queues a reply released by the next write, all bytes at once.
    pub fn reply(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(bytes.iter().map(|&b| (0, b)).collect());
        self
    }

    /// Queues a reply whose bytes arrive `gap_ms` apart, relative to the write.
    pub fn reply_spaced(mut self, bytes: &[u8], gap_ms: u64) -> Self {
        self.replies.push_back(
            bytes
                .iter()
                .enumerate()
                .map(|(i, &b)| (i as u64 * gap_ms, b))
                .collect(),
        );
        self
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    fn arrived(&self) -> usize {
        let now = self.time.get();
        self.inbound.iter().take_while(|(at, _)| *at <= now).count()
    }
}

impl ByteStream for MockStream {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "bus unplugged"));
        }
        if let Some(log) = &self.log {
            log.push(Event::Write(buf.to_vec()));
        }
        self.written.extend_from_slice(buf);

        let now = self.time.get();
        if self.echo {
            self.inbound.extend(buf.iter().map(|&b| (now, b)));
        }
        if let Some(reply) = self.replies.pop_front() {
            self.inbound.extend(reply.into_iter().map(|(offset, b)| (now + offset, b)));
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(log) = &self.log {
            log.push(Event::Flush);
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        if self.reads_left == Some(0) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
        }
        Ok(self.arrived())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        if self.arrived() == 0 {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no byte pending"));
        }
        if let Some(left) = self.reads_left.as_mut() {
            *left = left.saturating_sub(1);
        }
        self.inbound
            .pop_front()
            .map(|(_, b)| b)
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no byte pending"))
    }
}

/// Builds a sealed response frame `[slave, function, len, data.., crc_lo, crc_hi]`.
pub fn response_frame(slave: u8, function: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![slave, function, data.len() as u8];
    frame.extend_from_slice(data);
    frame.extend_from_slice(&[0, 0]);
    crc::seal(&mut frame);
    frame
}

/// Register payload for a register read response.
pub fn words(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

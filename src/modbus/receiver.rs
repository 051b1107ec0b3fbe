//! Response synchronizer.
//!
//! RS-485 adapters frequently loop the master's own transmission back onto
//! the receive line, so the first bytes seen after a request are not
//! necessarily the slave's answer. The receiver scans for the
//! `[slave, function]` pair that was just sent, takes the following byte as
//! the response byte count and collects `byte_count + 5` bytes in total.
//! A captured frame that is byte-for-byte the request itself is treated as
//! echo and thrown away, and scanning starts over.
//!
//! The receiver never looks at a clock: it is fed one byte at a time and the
//! caller decides when the inter-byte gap has run out (see [`ResponseReceiver::expire`]).

use super::crc;
use super::protocol::{REQUEST_LEN, RESPONSE_OVERHEAD};

/// Receive buffer size used by the engine.
pub const RX_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Idle,
    AwaitingSync { matched: u8 },
    HeaderCaptured,
    Accumulating { expected: usize },
    Complete,
    TimedOut,
    CrcError { calculated: u16, received: u16 },
    Overflow { declared: usize },
}

impl ReceiveState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReceiveState::Complete
                | ReceiveState::TimedOut
                | ReceiveState::CrcError { .. }
                | ReceiveState::Overflow { .. }
        )
    }
}

pub struct ResponseReceiver<const N: usize = RX_CAPACITY> {
    buffer: [u8; N],
    len: usize,
    request: [u8; REQUEST_LEN],
    state: ReceiveState,
    bytes_seen: usize,
    echoes_discarded: usize,
}

impl<const N: usize> ResponseReceiver<N> {
    pub fn new() -> Self {
        Self {
            buffer: [0u8; N],
            len: 0,
            request: [0u8; REQUEST_LEN],
            state: ReceiveState::Idle,
            bytes_seen: 0,
            echoes_discarded: 0,
        }
    }

    /// Starts a new transaction for the request that was just put on the bus.
    pub fn arm(&mut self, request: &[u8; REQUEST_LEN]) {
        self.request = *request;
        self.len = 0;
        self.bytes_seen = 0;
        self.echoes_discarded = 0;
        self.state = ReceiveState::AwaitingSync { matched: 0 };
    }

    /// Drops the current transaction. Buffered bytes stay until overwritten.
    pub fn reset(&mut self) {
        self.len = 0;
        self.bytes_seen = 0;
        self.echoes_discarded = 0;
        self.state = ReceiveState::Idle;
    }

    pub fn feed(&mut self, byte: u8) -> ReceiveState {
        if self.state.is_terminal() || self.state == ReceiveState::Idle {
            return self.state;
        }
        self.bytes_seen += 1;

        self.state = match self.state {
            ReceiveState::AwaitingSync { matched } => self.scan(matched as usize, byte),
            ReceiveState::HeaderCaptured => self.capture_length(byte),
            ReceiveState::Accumulating { expected } => self.accumulate(expected, byte),
            state => state,
        };
        self.state
    }

    /// Ends a transaction whose inter-byte timeout ran out.
    pub fn expire(&mut self) -> ReceiveState {
        if !self.state.is_terminal() {
            self.state = ReceiveState::TimedOut;
        }
        self.state
    }

    fn scan(&mut self, matched: usize, byte: u8) -> ReceiveState {
        let prefix = [self.request[0], self.request[1]];
        let matched = if byte == prefix[matched] {
            matched + 1
        } else if byte == prefix[0] {
            1
        } else {
            0
        };

        if matched == prefix.len() {
            self.buffer[..2].copy_from_slice(&prefix);
            self.len = 2;
            ReceiveState::HeaderCaptured
        } else {
            ReceiveState::AwaitingSync { matched: matched as u8 }
        }
    }

    fn capture_length(&mut self, byte: u8) -> ReceiveState {
        let expected = byte as usize + RESPONSE_OVERHEAD;
        if expected > N {
            return ReceiveState::Overflow { declared: expected };
        }
        self.buffer[2] = byte;
        self.len = 3;
        ReceiveState::Accumulating { expected }
    }

    fn accumulate(&mut self, expected: usize, byte: u8) -> ReceiveState {
        self.buffer[self.len] = byte;
        self.len += 1;

        if self.is_echo() && (self.len == REQUEST_LEN || self.len == expected) {
            self.echoes_discarded += 1;
            self.len = 0;
            return ReceiveState::AwaitingSync { matched: 0 };
        }
        if self.len < expected {
            return ReceiveState::Accumulating { expected };
        }

        match crc::verify(self.frame()) {
            Ok(()) => ReceiveState::Complete,
            Err((calculated, received)) => ReceiveState::CrcError {
                calculated,
                received,
            },
        }
    }

    /// True while everything captured so far is a copy of the request.
    fn is_echo(&self) -> bool {
        self.len <= REQUEST_LEN && self.buffer[..self.len] == self.request[..self.len]
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Bytes captured for the current frame, partial or not.
    pub fn frame(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Data segment of a frame that passed its CRC check.
    pub fn payload(&self) -> Option<&[u8]> {
        match self.state {
            ReceiveState::Complete => Some(&self.buffer[3..self.len - 2]),
            _ => None,
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Every byte fed since [`arm`](Self::arm), echo and noise included.
    pub fn bytes_seen(&self) -> usize {
        self.bytes_seen
    }

    pub fn echoes_discarded(&self) -> usize {
        self.echoes_discarded
    }
}

impl<const N: usize> Default for ResponseReceiver<N> {
    fn default() -> Self {
        Self::new()
    }
}

use log::{debug, warn};

use super::decoder::{Payload, WordOrder};
use super::protocol::{build_request, FunctionCode, REQUEST_LEN};
use super::receiver::{ReceiveState, ResponseReceiver};
use super::transport::{ByteStream, Clock, HalfDuplexTransport, SystemClock};
use crate::utils::error::ModbusError;
use crate::utils::hex_dump;

pub const DEFAULT_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_SLAVE_ID: u8 = 0x01;

/// Register convenience reads never ask for more than this many 16-bit blocks.
pub const MAX_BLOCKS: u16 = 2;

/// What device drivers need from a master: one synchronous read at a time
/// and access to the payload it produced.
pub trait ModbusMasterTrait {
    fn request_from(
        &mut self,
        slave_id: u8,
        function: FunctionCode,
        start_address: u16,
        quantity: u16,
    ) -> Result<usize, ModbusError>;

    fn payload(&self) -> Result<Payload<'_>, ModbusError>;

    fn set_timeout(&mut self, timeout_ms: u64);

    fn timeout_ms(&self) -> u64;
}

/// Modbus RTU master over a half-duplex link.
///
/// Every transaction takes `&mut self` and runs to completion before
/// returning, so a master can only ever have one request on the bus.
pub struct ModbusMaster<S, C = SystemClock> {
    transport: HalfDuplexTransport<S>,
    clock: C,
    receiver: ResponseReceiver,
    tx: [u8; REQUEST_LEN],
    current_slave: u8,
    timeout_ms: u64,
}

impl<S: ByteStream, C: Clock> ModbusMaster<S, C> {
    pub fn new(transport: HalfDuplexTransport<S>, clock: C) -> Self {
        Self {
            transport,
            clock,
            receiver: ResponseReceiver::new(),
            tx: [0u8; REQUEST_LEN],
            current_slave: DEFAULT_SLAVE_ID,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sends one read request and blocks until the response is complete,
    /// the line stays silent for the timeout, or the CRC check fails.
    ///
    /// Returns the response byte count. On error the payload is unavailable
    /// and [`last_state`](Self::last_state) tells which way the transaction ended.
    pub fn request_from(
        &mut self,
        slave_id: u8,
        function: FunctionCode,
        start_address: u16,
        quantity: u16,
    ) -> Result<usize, ModbusError> {
        self.current_slave = slave_id;
        self.receiver.reset();

        let frame = build_request(slave_id, function, start_address, quantity)?;
        self.tx = frame;
        debug!("TX: {}", hex_dump(&frame));

        self.transport.transmit(&frame, &mut self.clock).map_err(|e| {
            warn!("Transmit to slave {} failed: {}", slave_id, e);
            ModbusError::CommunicationError(format!("Write failed: {}", e))
        })?;

        self.receiver.arm(&frame);
        let state = self.receive()?;
        debug!(
            "RX: {} ({:?}, {} bytes seen)",
            hex_dump(self.receiver.frame()),
            state,
            self.receiver.bytes_seen()
        );

        match state {
            ReceiveState::Complete => Ok(self.receiver.frame()[2] as usize),
            ReceiveState::CrcError { calculated, received } => {
                Err(ModbusError::CrcError { calculated, received })
            }
            ReceiveState::Overflow { declared } => Err(ModbusError::FrameOverflow {
                declared,
                capacity: self.receiver.capacity(),
            }),
            _ => Err(ModbusError::Timeout {
                timeout_ms: self.timeout_ms,
            }),
        }
    }

    fn receive(&mut self) -> Result<ReceiveState, ModbusError> {
        let mut last_byte_at = self.clock.now_ms();

        loop {
            let polled = match self.transport.poll_byte() {
                Ok(polled) => polled,
                Err(e) => {
                    // Leave the receiver terminal so last_state() reflects a finished call
                    self.receiver.expire();
                    warn!("Receive from slave {} aborted: {}", self.current_slave, e);
                    return Err(e.into());
                }
            };

            match polled {
                Some(byte) => {
                    last_byte_at = self.clock.now_ms();
                    let state = self.receiver.feed(byte);
                    if state.is_terminal() {
                        return Ok(state);
                    }
                }
                None => {
                    if self.clock.now_ms().saturating_sub(last_byte_at) >= self.timeout_ms {
                        return Ok(self.receiver.expire());
                    }
                    self.clock.idle();
                }
            }
        }
    }

    /// Decoder over the last response. Fails unless the last request succeeded.
    pub fn payload(&self) -> Result<Payload<'_>, ModbusError> {
        self.receiver
            .payload()
            .map(Payload::new)
            .ok_or(ModbusError::NoResponse)
    }

    pub fn coil_read(&mut self, slave_id: u8, address: u16) -> Result<bool, ModbusError> {
        self.request_from(slave_id, FunctionCode::ReadCoils, address, 1)?;
        self.payload()?.bit(0, 0)
    }

    pub fn discrete_input_read(&mut self, slave_id: u8, address: u16) -> Result<bool, ModbusError> {
        self.request_from(slave_id, FunctionCode::ReadDiscreteInputs, address, 1)?;
        self.payload()?.bit(0, 0)
    }

    pub fn read_coils(&mut self, slave_id: u8, address: u16, count: u16) -> Result<Vec<bool>, ModbusError> {
        self.read_bits(slave_id, FunctionCode::ReadCoils, address, count)
    }

    pub fn read_discrete_inputs(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        self.read_bits(slave_id, FunctionCode::ReadDiscreteInputs, address, count)
    }

    fn read_bits(
        &mut self,
        slave_id: u8,
        function: FunctionCode,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        self.request_from(slave_id, function, address, count)?;
        let payload = self.payload()?;
        (0..count as usize).map(|n| payload.coil(n)).collect()
    }

    /// One or two holding registers; two are joined high word first.
    pub fn holding_register_read(&mut self, slave_id: u8, address: u16, blocks: u16) -> Result<u32, ModbusError> {
        self.read_blocks(slave_id, FunctionCode::ReadHoldingRegisters, address, blocks)
    }

    pub fn input_register_read(&mut self, slave_id: u8, address: u16, blocks: u16) -> Result<u32, ModbusError> {
        self.read_blocks(slave_id, FunctionCode::ReadInputRegisters, address, blocks)
    }

    fn read_blocks(
        &mut self,
        slave_id: u8,
        function: FunctionCode,
        address: u16,
        blocks: u16,
    ) -> Result<u32, ModbusError> {
        let blocks = blocks.clamp(1, MAX_BLOCKS);
        self.request_from(slave_id, function, address, blocks)?;
        let payload = self.payload()?;
        if blocks == MAX_BLOCKS {
            payload.u32(0, WordOrder::HighFirst)
        } else {
            payload.u16(0).map(u32::from)
        }
    }

    pub fn coil_read_current(&mut self, address: u16) -> Result<bool, ModbusError> {
        self.coil_read(self.current_slave, address)
    }

    pub fn discrete_input_read_current(&mut self, address: u16) -> Result<bool, ModbusError> {
        self.discrete_input_read(self.current_slave, address)
    }

    pub fn holding_register_read_current(&mut self, address: u16) -> Result<u32, ModbusError> {
        self.holding_register_read(self.current_slave, address, 1)
    }

    pub fn input_register_read_current(&mut self, address: u16) -> Result<u32, ModbusError> {
        self.input_register_read(self.current_slave, address, 1)
    }

    pub fn coil_write(&mut self, slave_id: u8, address: u16, value: bool) -> Result<(), ModbusError> {
        warn!(
            "Refusing coil write to slave {} address {} (value {}): writes are not supported",
            slave_id, address, value
        );
        Err(ModbusError::UnsupportedFunction(FunctionCode::WriteSingleCoil.code()))
    }

    pub fn holding_register_write(&mut self, slave_id: u8, address: u16, value: u16) -> Result<(), ModbusError> {
        warn!(
            "Refusing register write to slave {} address {} (value {}): writes are not supported",
            slave_id, address, value
        );
        Err(ModbusError::UnsupportedFunction(FunctionCode::WriteSingleRegister.code()))
    }

    pub fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn current_slave(&self) -> u8 {
        self.current_slave
    }

    pub fn set_current_slave(&mut self, slave_id: u8) {
        self.current_slave = slave_id;
    }

    /// Last request frame put on the bus.
    pub fn tx_raw(&self) -> &[u8] {
        &self.tx
    }

    /// Bytes captured for the last response, including a partial or rejected frame.
    pub fn rx_raw(&self) -> &[u8] {
        self.receiver.frame()
    }

    pub fn last_state(&self) -> ReceiveState {
        self.receiver.state()
    }

    pub fn echoes_discarded(&self) -> usize {
        self.receiver.echoes_discarded()
    }

    pub fn transport(&self) -> &HalfDuplexTransport<S> {
        &self.transport
    }
}

impl<S: ByteStream, C: Clock> ModbusMasterTrait for ModbusMaster<S, C> {
    fn request_from(
        &mut self,
        slave_id: u8,
        function: FunctionCode,
        start_address: u16,
        quantity: u16,
    ) -> Result<usize, ModbusError> {
        ModbusMaster::request_from(self, slave_id, function, start_address, quantity)
    }

    fn payload(&self) -> Result<Payload<'_>, ModbusError> {
        ModbusMaster::payload(self)
    }

    fn set_timeout(&mut self, timeout_ms: u64) {
        ModbusMaster::set_timeout(self, timeout_ms)
    }

    fn timeout_ms(&self) -> u64 {
        ModbusMaster::timeout_ms(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::testing::{response_frame, words, EventLog, MockClock, MockPin, MockStream};
    use std::time::{Duration, Instant};

    fn build_master(stream: MockStream, clock: MockClock) -> ModbusMaster<MockStream, MockClock> {
        ModbusMaster::new(HalfDuplexTransport::new(stream), clock)
    }

    #[test]
    fn test_request_from_returns_byte_count() {
        let clock = MockClock::new();
        let response = response_frame(0x11, 0x03, &words(&[0xAE41, 0x5652, 0x4340]));
        let stream = MockStream::new().with_clock(&clock).reply(&response);
        let mut master = build_master(stream, clock);

        let count = master
            .request_from(0x11, FunctionCode::ReadHoldingRegisters, 0x006B, 3)
            .unwrap();

        assert_eq!(count, 6);
        assert_eq!(master.tx_raw(), &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]);
        assert_eq!(master.rx_raw(), response.as_slice());
        assert_eq!(master.transport().stream().written(), master.tx_raw());
        assert_eq!(master.payload().unwrap().u16(2).unwrap(), 0x4340);
        assert_eq!(master.current_slave(), 0x11);
    }

    #[test]
    fn test_echo_does_not_change_decoding() {
        let response = response_frame(0x01, 0x04, &words(&[0x0001, 0x0002]));

        let clock = MockClock::new();
        let stream = MockStream::new().with_clock(&clock).reply(&response);
        let mut plain = build_master(stream, clock);
        let plain_count = plain.request_from(0x01, FunctionCode::ReadInputRegisters, 0, 2).unwrap();

        let clock = MockClock::new();
        let stream = MockStream::new().with_clock(&clock).with_echo().reply(&response);
        let mut echoed = build_master(stream, clock);
        let echoed_count = echoed.request_from(0x01, FunctionCode::ReadInputRegisters, 0, 2).unwrap();

        assert_eq!(plain_count, echoed_count);
        assert_eq!(plain.payload().unwrap().as_bytes(), echoed.payload().unwrap().as_bytes());
        assert_eq!(echoed.echoes_discarded(), 1);
        assert_eq!(
            echoed.payload().unwrap().u32(0, WordOrder::HighFirst).unwrap(),
            0x0001_0002
        );
    }

    #[test]
    fn test_silent_bus_times_out_after_configured_gap() {
        let clock = MockClock::new();
        let time = clock.time();
        let stream = MockStream::new().with_clock(&clock);
        let mut master = build_master(stream, clock).with_timeout(300);

        let err = master
            .request_from(0x01, FunctionCode::ReadInputRegisters, 0, 60)
            .unwrap_err();

        assert!(matches!(err, ModbusError::Timeout { timeout_ms: 300 }));
        assert_eq!(time.get(), 300);
        assert_eq!(master.last_state(), ReceiveState::TimedOut);
        assert!(matches!(master.payload(), Err(ModbusError::NoResponse)));
    }

    #[test]
    fn test_timeout_is_measured_between_bytes() {
        let response = response_frame(0x01, 0x03, &words(&[1, 2, 3, 4]));

        // 13 bytes, 80 ms apart: far beyond 100 ms in total, never 100 ms silent.
        let clock = MockClock::new();
        let stream = MockStream::new().with_clock(&clock).reply_spaced(&response, 80);
        let mut master = build_master(stream, clock);
        assert_eq!(master.request_from(0x01, FunctionCode::ReadHoldingRegisters, 0, 4).unwrap(), 8);

        let clock = MockClock::new();
        let stream = MockStream::new().with_clock(&clock).reply_spaced(&response, 120);
        let mut master = build_master(stream, clock);
        assert!(matches!(
            master.request_from(0x01, FunctionCode::ReadHoldingRegisters, 0, 4),
            Err(ModbusError::Timeout { .. })
        ));
        // Only the first byte arrived, which never completes the sync prefix.
        assert!(master.rx_raw().is_empty());
        assert_eq!(master.last_state(), ReceiveState::TimedOut);
    }

    #[test]
    fn test_wall_clock_timeout_bound() {
        let stream = MockStream::new();
        let mut master = ModbusMaster::new(HalfDuplexTransport::new(stream), SystemClock::new()).with_timeout(50);

        let started = Instant::now();
        let result = master.request_from(0x01, FunctionCode::ReadHoldingRegisters, 0, 1);
        let elapsed = started.elapsed();

        assert!(result.is_err());
        assert!(elapsed >= Duration::from_millis(49), "returned early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(250), "returned late: {:?}", elapsed);
    }

    #[test]
    fn test_corrupted_crc_fails_and_hides_payload() {
        let mut response = response_frame(0x01, 0x03, &words(&[0x1234]));
        let last = response.len() - 1;
        response[last] = response[last].wrapping_add(1);

        let clock = MockClock::new();
        let stream = MockStream::new().with_clock(&clock).reply(&response);
        let mut master = build_master(stream, clock);

        let err = master
            .request_from(0x01, FunctionCode::ReadHoldingRegisters, 0, 1)
            .unwrap_err();

        assert!(matches!(err, ModbusError::CrcError { .. }));
        assert!(matches!(master.last_state(), ReceiveState::CrcError { .. }));
        assert!(master.payload().is_err());
        assert_eq!(master.rx_raw(), response.as_slice());
    }

    #[test]
    fn test_failed_request_clears_previous_payload() {
        let clock = MockClock::new();
        let stream = MockStream::new()
            .with_clock(&clock)
            .reply(&response_frame(0x01, 0x03, &words(&[42])));
        let mut master = build_master(stream, clock);

        assert_eq!(master.holding_register_read(0x01, 0, 1).unwrap(), 42);
        assert!(master.holding_register_read(0x01, 0, 1).is_err());
        assert!(master.payload().is_err());
    }

    #[test]
    fn test_register_wrappers_clamp_blocks() {
        let clock = MockClock::new();
        let stream = MockStream::new()
            .with_clock(&clock)
            .reply(&response_frame(0x02, 0x04, &words(&[0x0001, 0x86A0])));
        let mut master = build_master(stream, clock);

        assert_eq!(master.input_register_read(0x02, 0x0010, 5).unwrap(), 100_000);
        // qty field of the request carries the clamped block count
        assert_eq!(&master.tx_raw()[4..6], &[0x00, 0x02]);
    }

    #[test]
    fn test_current_slave_defaults() {
        let clock = MockClock::new();
        let stream = MockStream::new()
            .with_clock(&clock)
            .reply(&response_frame(0x07, 0x02, &[0x01]))
            .reply(&response_frame(0x07, 0x01, &[0x00]));
        let mut master = build_master(stream, clock);
        assert_eq!(master.current_slave(), DEFAULT_SLAVE_ID);

        master.set_current_slave(0x07);
        assert!(master.discrete_input_read_current(3).unwrap());
        assert!(!master.coil_read_current(4).unwrap());
        assert_eq!(master.tx_raw()[0], 0x07);
    }

    #[test]
    fn test_read_coils_unpacks_bits() {
        let clock = MockClock::new();
        let stream = MockStream::new()
            .with_clock(&clock)
            .reply(&response_frame(0x01, 0x01, &[0b0000_0101, 0b0000_0001]));
        let mut master = build_master(stream, clock);

        let coils = master.read_coils(0x01, 0, 9).unwrap();
        assert_eq!(coils, vec![true, false, true, false, false, false, false, false, true]);
    }

    #[test]
    fn test_writes_are_unsupported() {
        let clock = MockClock::new();
        let stream = MockStream::new().with_clock(&clock);
        let mut master = build_master(stream, clock);

        assert!(matches!(master.coil_write(1, 0, true), Err(ModbusError::UnsupportedFunction(0x05))));
        assert!(matches!(
            master.holding_register_write(1, 0, 7),
            Err(ModbusError::UnsupportedFunction(0x06))
        ));
        assert!(matches!(
            master.request_from(1, FunctionCode::WriteMultipleRegisters, 0, 1),
            Err(ModbusError::UnsupportedFunction(0x10))
        ));
        assert!(master.transport().stream().written().is_empty());
    }

    #[test]
    fn test_read_error_leaves_receiver_terminal() {
        let clock = MockClock::new();
        let stream = MockStream::new()
            .with_clock(&clock)
            .reply(&response_frame(0x01, 0x04, &words(&[7])))
            .failing_reads_after(1);
        let mut master = build_master(stream, clock);

        let err = master
            .request_from(0x01, FunctionCode::ReadInputRegisters, 0, 1)
            .unwrap_err();

        assert!(matches!(err, ModbusError::CommunicationError(_)));
        assert!(master.last_state().is_terminal());
        assert_eq!(master.last_state(), ReceiveState::TimedOut);
        assert!(matches!(master.payload(), Err(ModbusError::NoResponse)));
    }

    #[test]
    fn test_partial_response_then_silence_times_out() {
        let response = response_frame(0x01, 0x03, &words(&[0x0102, 0x0304]));
        let clock = MockClock::new();
        let stream = MockStream::new().with_clock(&clock).reply(&response[..5]);
        let mut master = build_master(stream, clock).with_timeout(100);

        let err = master
            .request_from(0x01, FunctionCode::ReadHoldingRegisters, 0, 2)
            .unwrap_err();

        assert!(matches!(err, ModbusError::Timeout { timeout_ms: 100 }));
        assert_eq!(master.last_state(), ReceiveState::TimedOut);
        assert_eq!(master.rx_raw(), &response[..5]);
        assert!(matches!(master.payload(), Err(ModbusError::NoResponse)));
    }

    #[test]
    fn test_holding_register_pair_joined_high_first() {
        let clock = MockClock::new();
        let stream = MockStream::new()
            .with_clock(&clock)
            .reply(&response_frame(0x03, 0x03, &words(&[0x0001, 0x0002])));
        let mut master = build_master(stream, clock);

        assert_eq!(master.holding_register_read(0x03, 0x0100, 2).unwrap(), 0x0001_0002);
        assert_eq!(master.tx_raw()[..6], [0x03, 0x03, 0x01, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_register_reads_on_current_slave() {
        let clock = MockClock::new();
        let stream = MockStream::new()
            .with_clock(&clock)
            .reply(&response_frame(0x09, 0x03, &words(&[0xBEEF])))
            .reply(&response_frame(0x09, 0x04, &words(&[0x0042])));
        let mut master = build_master(stream, clock);
        master.set_current_slave(0x09);

        assert_eq!(master.holding_register_read_current(0x0010).unwrap(), 0xBEEF);
        assert_eq!(master.tx_raw()[..2], [0x09, 0x03]);
        assert_eq!(master.input_register_read_current(0x0020).unwrap(), 0x42);
        assert_eq!(master.tx_raw()[..4], [0x09, 0x04, 0x00, 0x20]);
    }

    #[test]
    fn test_read_discrete_inputs_unpacks_bits() {
        let clock = MockClock::new();
        let stream = MockStream::new()
            .with_clock(&clock)
            .reply(&response_frame(0x04, 0x02, &[0b1000_0010]));
        let mut master = build_master(stream, clock);

        let inputs = master.read_discrete_inputs(0x04, 0x00C4, 8).unwrap();
        assert_eq!(inputs, vec![false, true, false, false, false, false, false, true]);
        assert_eq!(master.tx_raw()[1], 0x02);
    }

    #[test]
    fn test_transmit_failure_is_reported() {
        let clock = MockClock::new();
        let stream = MockStream::new().with_clock(&clock).failing_writes();
        let log = EventLog::default();
        let transport = HalfDuplexTransport::with_direction(stream, Box::new(MockPin::new(log)));
        let mut master = ModbusMaster::new(transport, clock);

        assert!(matches!(
            master.request_from(1, FunctionCode::ReadCoils, 0, 1),
            Err(ModbusError::CommunicationError(_))
        ));
        assert_eq!(master.last_state(), ReceiveState::Idle);
    }
}

use chrono::Utc;
use log::debug;
use rand::Rng;
use std::time::Duration;

use super::power_meter::PowerReading;
use crate::config::MeterConfig;
use crate::modbus::client::ModbusMasterTrait;
use crate::modbus::decoder::{Payload, WordOrder};
use crate::modbus::protocol::FunctionCode;
use crate::utils::error::ModbusError;

/// Counter value the simulated meter starts from, in kWh.
pub const SIMULATED_ENERGY_START: f64 = 300.0;

/// `base` moved by a random amount of at most `percent` percent either way.
pub fn fluctuate(base: f64, percent: f64) -> f64 {
    let range = base * (percent / 100.0);
    base + rand::rng().random_range(-1.0..=1.0) * range
}

/// Stands in for the bus when no meter is wired up.
///
/// Answers input register reads addressed to its slave id with the same
/// register block a real meter would send: a small 5 V load that drifts a
/// few percent between polls and accumulates energy over `step` per poll.
/// Anything else stays silent and times out like an absent slave.
pub struct SimulatedMeter {
    slave_id: u8,
    word_order: WordOrder,
    step: Duration,
    powered: bool,
    energy_kwh: f64,
    response: Option<Vec<u8>>,
    timeout_ms: u64,
}

impl SimulatedMeter {
    pub fn new(slave_id: u8, word_order: WordOrder, step: Duration) -> Self {
        Self {
            slave_id,
            word_order,
            step,
            powered: true,
            energy_kwh: SIMULATED_ENERGY_START,
            response: None,
            timeout_ms: crate::modbus::client::DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn from_config(config: &MeterConfig, step: Duration) -> Self {
        Self::new(config.slave_id, config.word_order, step)
    }

    /// Switches the simulated load. A switched off meter reports all zeros.
    pub fn set_powered(&mut self, powered: bool) {
        self.powered = powered;
    }

    pub fn energy_kwh(&self) -> f64 {
        self.energy_kwh
    }

    fn telemetry(&mut self) -> PowerReading {
        let mut reading = PowerReading::empty(self.slave_id);
        reading.timestamp = Utc::now();

        if self.powered {
            reading.voltage = fluctuate(5.0, 3.0);
            reading.current = fluctuate(0.6, 5.0);
            reading.power = reading.voltage * reading.current;
            reading.power_factor = fluctuate(0.95, 2.0);
            reading.frequency = fluctuate(50.0, 0.5);
            self.energy_kwh += reading.power / 1000.0 * self.step.as_secs_f64() / 3600.0;
        }

        reading.total_energy = self.energy_kwh;
        reading.total_energy_forward = self.energy_kwh;
        reading
    }
}

impl ModbusMasterTrait for SimulatedMeter {
    fn request_from(
        &mut self,
        slave_id: u8,
        function: FunctionCode,
        start_address: u16,
        quantity: u16,
    ) -> Result<usize, ModbusError> {
        self.response = None;
        if slave_id != self.slave_id || function != FunctionCode::ReadInputRegisters {
            return Err(ModbusError::Timeout {
                timeout_ms: self.timeout_ms,
            });
        }

        let registers = self.telemetry().to_registers(self.word_order);
        let data: Vec<u8> = (0..quantity as usize)
            .map(|i| registers.get(start_address as usize + i).copied().unwrap_or(0))
            .flat_map(u16::to_be_bytes)
            .collect();

        debug!("Simulated meter {} answered {} registers", self.slave_id, quantity);
        let len = data.len();
        self.response = Some(data);
        Ok(len)
    }

    fn payload(&self) -> Result<Payload<'_>, ModbusError> {
        self.response
            .as_deref()
            .map(Payload::new)
            .ok_or(ModbusError::NoResponse)
    }

    fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}

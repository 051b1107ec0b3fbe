use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::traits::{Device, DeviceData};
use crate::config::MeterConfig;
use crate::modbus::client::ModbusMasterTrait;
use crate::modbus::decoder::{Payload, WordOrder};
use crate::modbus::protocol::FunctionCode;
use crate::utils::error::ModbusError;

// Input register map of the single-phase meter
const REG_VOLTAGE: usize = 0;
const REG_CURRENT: usize = 3;
const REG_POWER: usize = 8;
const REG_POWER_FACTOR: usize = 20;
const REG_FREQUENCY: usize = 26;
const REG_TOTAL_ENERGY: usize = 29;
const REG_ENERGY_REVERSE: usize = 39;
const REG_ENERGY_FORWARD: usize = 49;

/// The register map is absolute, so the block has to start at 0 and reach the last counter.
pub const METER_BLOCK_START: u16 = 0;
pub const METER_BLOCK_MIN_LEN: u16 = REG_ENERGY_FORWARD as u16 + 2;

#[derive(Debug, Clone)]
pub struct PowerMeter {
    pub uuid: String,
    pub name: String,
    pub slave_id: u8,
    pub start_register: u16,
    pub register_count: u16,
    pub timeout_ms: u64,
    pub max_failures: u32,
    pub word_order: WordOrder,
    failures: u32,
    latest: PowerReading,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerReading {
    pub device_address: u8,
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub power_factor: f64,
    pub frequency: f64,
    pub total_energy: f64,
    pub total_energy_reverse: f64,
    pub total_energy_forward: f64,
}

impl PowerReading {
    pub(crate) fn empty(device_address: u8) -> Self {
        Self {
            device_address,
            timestamp: Utc::now(),
            voltage: 0.0,
            current: 0.0,
            power: 0.0,
            power_factor: 0.0,
            frequency: 0.0,
            total_energy: 0.0,
            total_energy_reverse: 0.0,
            total_energy_forward: 0.0,
        }
    }

    /// Decodes a block that starts at input register 0.
    pub fn from_payload(device_address: u8, payload: &Payload<'_>, order: WordOrder) -> Result<Self, ModbusError> {
        Ok(Self {
            device_address,
            timestamp: Utc::now(),
            voltage: payload.u16(REG_VOLTAGE)? as f64 / 10.0,
            current: payload.i16(REG_CURRENT)? as f64 / 100.0,
            power: payload.i16(REG_POWER)? as f64,
            power_factor: payload.i16(REG_POWER_FACTOR)? as f64 / 1000.0,
            frequency: payload.i16(REG_FREQUENCY)? as f64 / 100.0,
            total_energy: payload.u32(REG_TOTAL_ENERGY, order)? as f64 / 100.0,
            total_energy_reverse: payload.u32(REG_ENERGY_REVERSE, order)? as f64 / 100.0,
            total_energy_forward: payload.u32(REG_ENERGY_FORWARD, order)? as f64 / 100.0,
        })
    }

    /// Encodes the reading into the meter's input register block, the inverse of
    /// [`from_payload`](Self::from_payload).
    pub fn to_registers(&self, order: WordOrder) -> Vec<u16> {
        let mut regs = vec![0u16; METER_BLOCK_MIN_LEN as usize];
        regs[REG_VOLTAGE] = (self.voltage * 10.0).round() as u16;
        regs[REG_CURRENT] = (self.current * 100.0).round() as i16 as u16;
        regs[REG_POWER] = self.power.round() as i16 as u16;
        regs[REG_POWER_FACTOR] = (self.power_factor * 1000.0).round() as i16 as u16;
        regs[REG_FREQUENCY] = (self.frequency * 100.0).round() as i16 as u16;

        let counters = [
            (REG_TOTAL_ENERGY, self.total_energy),
            (REG_ENERGY_REVERSE, self.total_energy_reverse),
            (REG_ENERGY_FORWARD, self.total_energy_forward),
        ];
        for (reg, kwh) in counters {
            let raw = (kwh * 100.0).round() as u32;
            let (high, low) = ((raw >> 16) as u16, raw as u16);
            let (first, second) = match order {
                WordOrder::HighFirst => (high, low),
                WordOrder::LowFirst => (low, high),
            };
            regs[reg] = first;
            regs[reg + 1] = second;
        }
        regs
    }

    /// Clears the instantaneous values, keeping the energy counters.
    fn zero_live_values(&mut self) {
        self.timestamp = Utc::now();
        self.voltage = 0.0;
        self.current = 0.0;
        self.power = 0.0;
        self.power_factor = 0.0;
        self.frequency = 0.0;
    }
}

impl PowerMeter {
    pub fn from_config(config: &MeterConfig) -> Self {
        Self {
            uuid: config.uuid.clone(),
            name: config.name.clone(),
            slave_id: config.slave_id,
            start_register: config.start_register,
            register_count: config.register_count,
            timeout_ms: config.timeout_ms,
            max_failures: config.max_failures,
            word_order: config.word_order,
            failures: 0,
            latest: PowerReading::empty(config.slave_id),
        }
    }

    /// Last accepted values, zeroed once the meter has been unreachable for too long.
    pub fn latest(&self) -> &PowerReading {
        &self.latest
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn poll(&mut self, master: &mut dyn ModbusMasterTrait) -> Result<PowerReading, ModbusError> {
        master.set_timeout(self.timeout_ms);

        let result = master
            .request_from(
                self.slave_id,
                FunctionCode::ReadInputRegisters,
                self.start_register,
                self.register_count,
            )
            .and_then(|_| {
                let payload = master.payload()?;
                PowerReading::from_payload(self.slave_id, &payload, self.word_order)
            });

        match result {
            Ok(reading) => {
                self.failures = 0;
                if reading.voltage > 0.0 {
                    debug!(
                        "Meter {}: {:.1} V {:.2} A {:.0} W",
                        self.slave_id, reading.voltage, reading.current, reading.power
                    );
                    self.latest = reading.clone();
                    Ok(reading)
                } else {
                    warn!("Meter {} answered with zero voltage, reading ignored", self.slave_id);
                    Err(ModbusError::InvalidData("meter reports zero voltage".to_string()))
                }
            }
            Err(e) => {
                if self.failures > self.max_failures {
                    error!(
                        "Meter {} unreachable for {} polls: {}",
                        self.slave_id, self.failures, e
                    );
                    self.latest.zero_live_values();
                } else {
                    self.failures += 1;
                    debug!("Meter {} poll failed ({}): {}", self.slave_id, self.failures, e);
                }
                Err(e)
            }
        }
    }
}

impl Device for PowerMeter {
    fn device_type(&self) -> &str {
        "PowerMeter"
    }

    fn address(&self) -> u8 {
        self.slave_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_data(&mut self, master: &mut dyn ModbusMasterTrait) -> Result<Box<dyn DeviceData>, ModbusError> {
        let reading = self.poll(master)?;
        info!("📊 {} updated", self.name);
        Ok(Box::new(reading))
    }
}

impl DeviceData for PowerReading {
    fn device_address(&self) -> u8 {
        self.device_address
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn get_parameter(&self, name: &str) -> Option<String> {
        match name {
            "Voltage" => Some(format!("{:.1} V", self.voltage)),
            "Current" => Some(format!("{:.2} A", self.current)),
            "Power" => Some(format!("{:.0} W", self.power)),
            "PowerFactor" => Some(format!("{:.3}", self.power_factor)),
            "Frequency" => Some(format!("{:.2} Hz", self.frequency)),
            "TotalEnergy" => Some(format!("{:.2} kWh", self.total_energy)),
            "TotalEnergyReverse" => Some(format!("{:.2} kWh", self.total_energy_reverse)),
            "TotalEnergyForward" => Some(format!("{:.2} kWh", self.total_energy_forward)),
            _ => None,
        }
    }

    fn get_all_parameters(&self) -> Vec<(String, String)> {
        self.parameters()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    fn device_type(&self) -> String {
        "power_meter".to_string()
    }

    fn device_name(&self) -> String {
        format!("Meter {}", self.device_address)
    }
}

impl PowerReading {
    fn parameters(&self) -> [(&'static str, f64); 8] {
        [
            ("Voltage", self.voltage),
            ("Current", self.current),
            ("Power", self.power),
            ("PowerFactor", self.power_factor),
            ("Frequency", self.frequency),
            ("TotalEnergy", self.total_energy),
            ("TotalEnergyReverse", self.total_energy_reverse),
            ("TotalEnergyForward", self.total_energy_forward),
        ]
    }
}

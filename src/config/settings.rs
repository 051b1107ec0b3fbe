use clap::ArgMatches;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::devices::power_meter::{METER_BLOCK_MIN_LEN, METER_BLOCK_START};
use crate::modbus::client::DEFAULT_TIMEOUT_MS;
use crate::modbus::decoder::WordOrder;
use crate::modbus::protocol::MAX_READ_REGISTERS;
use crate::modbus::serial::SerialSettings;
use crate::utils::error::ModbusError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Identification
    pub device_uuid: String,
    pub device_name: String,

    // Connection settings
    pub serial_port: String,
    pub baud_rate: u32,
    pub parity: ParityConfig,
    pub direction: DirectionConfig,
    pub timeout_ms: u64,

    // Monitoring settings
    pub poll_interval_seconds: u64,

    pub meter: MeterConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParityConfig {
    None,
    Even,
    Odd,
}

/// How the RS-485 driver-enable line is switched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectionConfig {
    /// Auto-direction transceiver or a full-duplex link.
    None,
    Rts { active_high: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    pub uuid: String,
    pub name: String,
    pub slave_id: u8,
    pub start_register: u16,
    pub register_count: u16,
    pub timeout_ms: u64,
    pub max_failures: u32,
    pub word_order: WordOrder,
    /// Serve generated telemetry instead of talking to the serial port.
    #[serde(default)]
    pub simulate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: "Main Energy Meter".to_string(),
            slave_id: 0x01,
            start_register: 0x0000,
            register_count: 60,
            timeout_ms: 300,
            max_failures: 100,
            word_order: WordOrder::HighFirst,
            simulate: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "console".to_string(),
            file_path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let serial_port = if cfg!(target_os = "windows") {
            "COM1"
        } else {
            "/dev/ttyUSB0"
        };

        Self {
            device_uuid: Uuid::new_v4().to_string(),
            device_name: "RTU Meter Gateway".to_string(),
            serial_port: serial_port.to_string(),
            baud_rate: 9600,
            parity: ParityConfig::None,
            direction: DirectionConfig::None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_seconds: 10,
            meter: MeterConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Applies command line overrides on top of `self`.
    pub fn apply_matches(mut self, matches: &ArgMatches) -> anyhow::Result<Self> {
        if let Some(port) = matches.get_one::<String>("port") {
            self.serial_port = port.clone();
        }
        if let Some(baud) = matches.get_one::<String>("baud") {
            self.baud_rate = baud.parse()?;
        }
        if let Some(timeout) = matches.get_one::<String>("timeout") {
            self.timeout_ms = timeout.parse()?;
        }
        if let Some(parity) = matches.get_one::<String>("parity") {
            self.parity = match parity.to_lowercase().as_str() {
                "none" => ParityConfig::None,
                "even" => ParityConfig::Even,
                "odd" => ParityConfig::Odd,
                other => anyhow::bail!("unknown parity '{}'", other),
            };
        }
        if matches.get_flag("simulate") {
            self.meter.simulate = true;
        }
        if matches.get_flag("rts") {
            self.direction = DirectionConfig::Rts { active_high: true };
        }
        debug!("Effective configuration: {:?}", self);
        Ok(self)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModbusError> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ModbusError::ConfigError(format!("{}: {}", path.as_ref().display(), e)))?;
        let mut config: Config = toml::from_str(&content)?;

        // Older files may carry empty identifiers
        if config.device_uuid.is_empty() {
            config.device_uuid = Uuid::new_v4().to_string();
        }
        if config.meter.uuid.is_empty() {
            config.meter.uuid = Uuid::new_v4().to_string();
        }

        config.validate()?;
        info!("📄 Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ModbusError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ModbusError> {
        if self.baud_rate == 0 {
            return Err(ModbusError::ConfigError("baud_rate must be non-zero".to_string()));
        }
        if !(1..=247).contains(&self.meter.slave_id) {
            return Err(ModbusError::ConfigError(format!(
                "meter slave_id {} outside 1-247",
                self.meter.slave_id
            )));
        }
        if !(1..=MAX_READ_REGISTERS).contains(&self.meter.register_count) {
            return Err(ModbusError::ConfigError(format!(
                "meter register_count {} outside 1-{}",
                self.meter.register_count, MAX_READ_REGISTERS
            )));
        }
        if self.meter.start_register != METER_BLOCK_START {
            return Err(ModbusError::ConfigError(format!(
                "meter start_register must be {}, got {}",
                METER_BLOCK_START, self.meter.start_register
            )));
        }
        if self.meter.register_count < METER_BLOCK_MIN_LEN {
            return Err(ModbusError::ConfigError(format!(
                "meter register_count {} too small, the register map needs {}",
                self.meter.register_count, METER_BLOCK_MIN_LEN
            )));
        }
        if self.timeout_ms == 0 || self.meter.timeout_ms == 0 {
            return Err(ModbusError::ConfigError("timeouts must be non-zero".to_string()));
        }
        if self.poll_interval_seconds == 0 {
            return Err(ModbusError::ConfigError("poll_interval_seconds must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            port_name: self.serial_port.clone(),
            baud_rate: self.baud_rate,
            parity: self.parity,
            direction: self.direction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout_ms, 100);
        assert_eq!(config.meter.register_count, 60);
        assert_eq!(config.meter.timeout_ms, 300);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("rtu_meter.toml");

        let mut config = Config::default();
        config.direction = DirectionConfig::Rts { active_high: false };
        config.meter.word_order = WordOrder::LowFirst;
        config.output.file_path = Some("readings.jsonl".to_string());
        config.meter.simulate = true;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.device_uuid, config.device_uuid);
        assert_eq!(loaded.direction, DirectionConfig::Rts { active_high: false });
        assert_eq!(loaded.meter.word_order, WordOrder::LowFirst);
        assert_eq!(loaded.output.file_path.as_deref(), Some("readings.jsonl"));
        assert!(loaded.meter.simulate);
    }

    #[test]
    fn test_invalid_slave_rejected() {
        let mut config = Config::default();
        config.meter.slave_id = 0;
        assert!(matches!(config.validate(), Err(ModbusError::ConfigError(_))));
        config.meter.slave_id = 248;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_register_block_rejected() {
        let mut config = Config::default();
        config.meter.register_count = 126;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_block_must_cover_register_map() {
        let mut config = Config::default();
        config.meter.register_count = 10;
        assert!(matches!(config.validate(), Err(ModbusError::ConfigError(_))));

        config.meter.register_count = 50;
        assert!(config.validate().is_err());
        config.meter.register_count = 51;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shifted_block_rejected() {
        let mut config = Config::default();
        config.meter.start_register = 5;
        assert!(matches!(config.validate(), Err(ModbusError::ConfigError(_))));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "baud_rate = \"fast\"").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ModbusError::ConfigError(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        assert!(matches!(
            Config::from_file("/nonexistent/rtu_meter.toml"),
            Err(ModbusError::ConfigError(_))
        ));
    }
}

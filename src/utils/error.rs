use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("No complete response within {timeout_ms} ms of the last byte")]
    Timeout { timeout_ms: u64 },

    #[error("CRC checksum mismatch (calculated 0x{calculated:04X}, received 0x{received:04X})")]
    CrcError { calculated: u16, received: u16 },

    #[error("Response declares {declared} bytes, receive buffer holds {capacity}")]
    FrameOverflow { declared: usize, capacity: usize },

    #[error("Function code 0x{0:02X} is not supported")]
    UnsupportedFunction(u8),

    #[error("Offset {index} out of range for a {len}-byte payload")]
    OutOfRange { index: usize, len: usize },

    #[error("No valid response available")]
    NoResponse,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ModbusError {
    /// Failures that come from the bus itself rather than from the host.
    pub fn is_bus_failure(&self) -> bool {
        matches!(
            self,
            ModbusError::Timeout { .. } | ModbusError::CrcError { .. } | ModbusError::FrameOverflow { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::CommunicationError(format!("IO error: {}", err))
    }
}

impl From<serialport::Error> for ModbusError {
    fn from(err: serialport::Error) -> Self {
        ModbusError::ConnectionError(format!("Serial port error: {}", err))
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        ModbusError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for ModbusError {
    fn from(err: toml::de::Error) -> Self {
        ModbusError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for ModbusError {
    fn from(err: toml::ser::Error) -> Self {
        ModbusError::SerializationError(format!("TOML error: {}", err))
    }
}

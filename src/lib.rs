//! Modbus RTU master for half-duplex RS-485 links
//!
//! The engine frames read requests, drives the bus direction line around each
//! transmission and resynchronises on responses even when the transceiver
//! echoes the request back. On top of it sit a power meter driver, a polling
//! service and the output layer used by the `rtu-meter` binary.

pub mod cli;
pub mod config;
pub mod devices;
pub mod modbus;
pub mod output;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use devices::{Device, DeviceData, PowerMeter, PowerReading};
pub use modbus::{FunctionCode, ModbusMaster, ModbusMasterTrait, Payload, WordOrder};
pub use output::{ConsoleFormatter, CsvFormatter, DataFormatter, DataSender, JsonFormatter};
pub use services::{PollEvent, PollingService};
pub use utils::error::ModbusError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::modbus::client::ModbusMasterTrait;
use crate::utils::error::ModbusError;

pub trait Device: Send {
    fn device_type(&self) -> &str;
    fn address(&self) -> u8;
    fn name(&self) -> &str;

    /// One polling cycle against the bus.
    fn read_data(&mut self, master: &mut dyn ModbusMasterTrait) -> Result<Box<dyn DeviceData>, ModbusError>;
}

pub trait DeviceData: Send + Sync {
    fn device_address(&self) -> u8;
    fn timestamp(&self) -> DateTime<Utc>;

    fn to_json(&self) -> Value;
    fn get_parameter(&self, name: &str) -> Option<String>;
    fn get_all_parameters(&self) -> Vec<(String, String)>;

    fn device_type(&self) -> String;
    fn device_name(&self) -> String;
}

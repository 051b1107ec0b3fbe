use chrono::Utc;
use serde_json::Value;

use crate::devices::DeviceData;

pub trait DataFormatter: Send + Sync {
    fn format_single_device(&self, data: &dyn DeviceData) -> String;
    fn format_multiple_devices(&self, devices_data: &[&dyn DeviceData]) -> String;
    fn format_header(&self) -> String;
    fn format_name(&self) -> &str;
}

pub fn formatter_for(name: &str) -> Option<Box<dyn DataFormatter>> {
    match name.to_lowercase().as_str() {
        "console" => Some(Box::new(ConsoleFormatter)),
        "json" => Some(Box::new(JsonFormatter)),
        "csv" => Some(Box::new(CsvFormatter)),
        _ => None,
    }
}

pub struct ConsoleFormatter;

impl DataFormatter for ConsoleFormatter {
    fn format_single_device(&self, data: &dyn DeviceData) -> String {
        let mut output = format!(
            "🔹 {} @ {}\n",
            data.device_name(),
            data.timestamp().format("%Y-%m-%d %H:%M:%S")
        );
        for (name, _) in data.get_all_parameters() {
            if let Some(value) = data.get_parameter(&name) {
                output.push_str(&format!("  {:<20} {}\n", name, value));
            }
        }
        output
    }

    fn format_multiple_devices(&self, devices_data: &[&dyn DeviceData]) -> String {
        let mut output = String::from("📊 Meter Data:\n");
        output.push_str(&"═".repeat(40));
        output.push('\n');

        for data in devices_data {
            output.push_str(&self.format_single_device(*data));
            output.push_str(&"─".repeat(40));
            output.push('\n');
        }
        output
    }

    fn format_header(&self) -> String {
        format!("🚀 RTU Meter Data - {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"))
    }

    fn format_name(&self) -> &str {
        "console"
    }
}

/// One JSON object per line.
pub struct JsonFormatter;

impl DataFormatter for JsonFormatter {
    fn format_single_device(&self, data: &dyn DeviceData) -> String {
        let json_data = serde_json::json!({
            "device_address": data.device_address(),
            "device_type": data.device_type(),
            "timestamp": data.timestamp().to_rfc3339(),
            "data": data.to_json()
        });
        json_data.to_string()
    }

    fn format_multiple_devices(&self, devices_data: &[&dyn DeviceData]) -> String {
        let devices: Vec<Value> = devices_data
            .iter()
            .map(|data| {
                serde_json::json!({
                    "device_address": data.device_address(),
                    "data": data.to_json()
                })
            })
            .collect();

        serde_json::json!({
            "timestamp": Utc::now().timestamp(),
            "devices": devices
        })
        .to_string()
    }

    fn format_header(&self) -> String {
        String::new()
    }

    fn format_name(&self) -> &str {
        "json"
    }
}

pub struct CsvFormatter;

impl DataFormatter for CsvFormatter {
    fn format_single_device(&self, data: &dyn DeviceData) -> String {
        let timestamp = data.timestamp().to_rfc3339();
        data.get_all_parameters()
            .into_iter()
            .map(|(name, value)| format!("{},{},{},{}\n", data.device_address(), name, value, timestamp))
            .collect()
    }

    fn format_multiple_devices(&self, devices_data: &[&dyn DeviceData]) -> String {
        devices_data
            .iter()
            .map(|data| self.format_single_device(*data))
            .collect()
    }

    fn format_header(&self) -> String {
        "Device,Parameter,Value,Timestamp\n".to_string()
    }

    fn format_name(&self) -> &str {
        "csv"
    }
}

use log::{error, info};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::client::ModbusMaster;
use super::transport::{ByteStream, DirectionControl, HalfDuplexTransport, Level, SystemClock};
use crate::config::settings::{DirectionConfig, ParityConfig};
use crate::utils::error::ModbusError;

/// Host serial port as an engine byte stream.
pub struct SerialStream {
    port: Box<dyn SerialPort>,
}

impl SerialStream {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl ByteStream for SerialStream {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.port.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}

/// Drives the transceiver's driver-enable input from the port's RTS line.
pub struct RtsDirection {
    port: Box<dyn SerialPort>,
    active_high: bool,
}

impl RtsDirection {
    pub fn new(port: Box<dyn SerialPort>, active_high: bool) -> Self {
        Self { port, active_high }
    }
}

impl DirectionControl for RtsDirection {
    fn set_level(&mut self, level: Level) -> io::Result<()> {
        let asserted = (level == Level::High) == self.active_high;
        self.port.write_request_to_send(asserted)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub parity: ParityConfig,
    pub direction: DirectionConfig,
}

pub fn open_port(settings: &SerialSettings) -> Result<Box<dyn SerialPort>, ModbusError> {
    info!("🔌 Connecting to Modbus RTU port: {}", settings.port_name);
    info!(
        "⚙️  Configuration: {} baud, 8 data bits, {:?} parity, 1 stop bit",
        settings.baud_rate, settings.parity
    );

    let serial_parity = match settings.parity {
        ParityConfig::None => serialport::Parity::None,
        ParityConfig::Even => serialport::Parity::Even,
        ParityConfig::Odd => serialport::Parity::Odd,
    };

    serialport::new(&settings.port_name, settings.baud_rate)
        .timeout(Duration::from_millis(10))
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serial_parity)
        .open()
        .map_err(|e| {
            error!("❌ Failed to open serial port {}: {}", settings.port_name, e);
            ModbusError::ConnectionError(format!("Failed to open port: {}", e))
        })
}

pub fn open_master(settings: &SerialSettings, timeout_ms: u64) -> Result<ModbusMaster<SerialStream>, ModbusError> {
    let port = open_port(settings)?;

    let transport = match settings.direction {
        DirectionConfig::None => HalfDuplexTransport::new(SerialStream::new(port)),
        DirectionConfig::Rts { active_high } => {
            let mut control = RtsDirection::new(port.try_clone()?, active_high);
            control.set_level(Level::Low)?;
            info!("↔️  RS-485 direction on RTS (active {})", if active_high { "high" } else { "low" });
            HalfDuplexTransport::with_direction(SerialStream::new(port), Box::new(control))
        }
    };

    info!(" Modbus RTU connection established successfully");
    Ok(ModbusMaster::new(transport, SystemClock::new()).with_timeout(timeout_ms))
}

pub fn list_ports() -> Result<Vec<String>, ModbusError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => match usb.product {
                Some(product) => format!("{} ({})", port.port_name, product),
                None => port.port_name,
            },
            _ => port.port_name,
        })
        .collect())
}

use serde::{Deserialize, Serialize};
use std::fmt;

use super::crc;
use crate::utils::error::ModbusError;

/// Length of every read request frame on the wire.
pub const REQUEST_LEN: usize = 8;

/// Address, function, byte count and the two CRC bytes around a response payload.
pub const RESPONSE_OVERHEAD: usize = 5;

/// Most registers a single read may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Most coils or discrete inputs a single read may ask for.
pub const MAX_READ_BITS: u16 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    // Declared for completeness, rejected by the frame builder.
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadCoils => 0x01,
            FunctionCode::ReadDiscreteInputs => 0x02,
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
            FunctionCode::WriteSingleCoil => 0x05,
            FunctionCode::WriteSingleRegister => 0x06,
            FunctionCode::WriteMultipleCoils => 0x0F,
            FunctionCode::WriteMultipleRegisters => 0x10,
        }
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }

    /// Coil and discrete input reads return packed bits instead of words.
    pub fn is_bit_access(self) -> bool {
        matches!(self, FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs)
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = ModbusError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(FunctionCode::ReadCoils),
            0x02 => Ok(FunctionCode::ReadDiscreteInputs),
            0x03 => Ok(FunctionCode::ReadHoldingRegisters),
            0x04 => Ok(FunctionCode::ReadInputRegisters),
            0x05 => Ok(FunctionCode::WriteSingleCoil),
            0x06 => Ok(FunctionCode::WriteSingleRegister),
            0x0F => Ok(FunctionCode::WriteMultipleCoils),
            0x10 => Ok(FunctionCode::WriteMultipleRegisters),
            other => Err(ModbusError::UnsupportedFunction(other)),
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub slave_id: u8,
    pub function: FunctionCode,
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    pub fn new(slave_id: u8, function: FunctionCode, start_address: u16, quantity: u16) -> Self {
        Self {
            slave_id,
            function,
            start_address,
            quantity,
        }
    }

    /// Encodes the request as `[addr, func, start_hi, start_lo, qty_hi, qty_lo, crc_lo, crc_hi]`.
    pub fn to_frame(&self) -> Result<[u8; REQUEST_LEN], ModbusError> {
        build_request(self.slave_id, self.function, self.start_address, self.quantity)
    }

    /// Byte count a well-behaved slave answers this request with.
    pub fn expected_byte_count(&self) -> usize {
        let quantity = self.quantity as usize;
        if self.function.is_bit_access() {
            (quantity + 7) / 8
        } else {
            quantity * 2
        }
    }
}

pub fn build_request(
    slave_id: u8,
    function: FunctionCode,
    start_address: u16,
    quantity: u16,
) -> Result<[u8; REQUEST_LEN], ModbusError> {
    if !function.is_read() {
        return Err(ModbusError::UnsupportedFunction(function.code()));
    }

    let mut frame = [0u8; REQUEST_LEN];
    frame[0] = slave_id;
    frame[1] = function.code();
    frame[2..4].copy_from_slice(&start_address.to_be_bytes());
    frame[4..6].copy_from_slice(&quantity.to_be_bytes());
    crc::seal(&mut frame);

    Ok(frame)
}

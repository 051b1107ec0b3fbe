use serde::{Deserialize, Serialize};

use crate::utils::error::ModbusError;

/// Which register of a 32-bit pair carries the most significant word.
///
/// Slaves disagree on this, so it is part of every device's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WordOrder {
    #[default]
    HighFirst,
    LowFirst,
}

/// Read-only view over the data segment of a validated response.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    data: &'a [u8],
}

impl<'a> Payload<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn byte(&self, index: usize) -> Result<u8, ModbusError> {
        self.data.get(index).copied().ok_or(ModbusError::OutOfRange {
            index,
            len: self.data.len(),
        })
    }

    /// Bit `bit_index` (0 = LSB) of payload byte `byte_index`.
    pub fn bit(&self, byte_index: usize, bit_index: u8) -> Result<bool, ModbusError> {
        if bit_index > 7 {
            return Err(ModbusError::InvalidData(format!("bit index {} exceeds 7", bit_index)));
        }
        Ok(self.byte(byte_index)? >> bit_index & 0x01 == 1)
    }

    /// Status of the `n`th coil or discrete input in the response, LSB first.
    pub fn coil(&self, n: usize) -> Result<bool, ModbusError> {
        self.bit(n / 8, (n % 8) as u8)
    }

    pub fn u16(&self, register: usize) -> Result<u16, ModbusError> {
        let offset = register * 2;
        match self.data.get(offset..offset + 2) {
            Some(pair) => Ok(u16::from_be_bytes([pair[0], pair[1]])),
            None => Err(ModbusError::OutOfRange {
                index: offset + 1,
                len: self.data.len(),
            }),
        }
    }

    pub fn i16(&self, register: usize) -> Result<i16, ModbusError> {
        self.u16(register).map(|v| v as i16)
    }

    /// Joins registers `register` and `register + 1` into one 32-bit value.
    pub fn u32(&self, register: usize, order: WordOrder) -> Result<u32, ModbusError> {
        let first = self.u16(register)? as u32;
        let second = self.u16(register + 1)? as u32;
        Ok(match order {
            WordOrder::HighFirst => first << 16 | second,
            WordOrder::LowFirst => second << 16 | first,
        })
    }

    pub fn i32(&self, register: usize, order: WordOrder) -> Result<i32, ModbusError> {
        self.u32(register, order).map(|v| v as i32)
    }

    /// IEEE-754 value spread over two registers.
    pub fn f32(&self, register: usize, order: WordOrder) -> Result<f32, ModbusError> {
        self.u32(register, order).map(f32::from_bits)
    }

    pub fn registers(&self) -> Vec<u16> {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }
}

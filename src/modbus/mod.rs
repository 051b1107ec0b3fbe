pub mod client;
pub mod crc;
pub mod decoder;
pub mod protocol;
pub mod receiver;
pub mod serial;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ModbusMaster, ModbusMasterTrait};
pub use crc::crc16_modbus;
pub use decoder::{Payload, WordOrder};
pub use protocol::{build_request, FunctionCode, ReadRequest};
pub use receiver::{ReceiveState, ResponseReceiver};
pub use transport::{ByteStream, Clock, DirectionControl, HalfDuplexTransport, Level, SystemClock};

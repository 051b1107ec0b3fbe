pub mod error;

pub use error::ModbusError;

/// Space separated upper-case hex, one pair per byte, so frame boundaries line up in logs.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

pub mod crc;
pub mod frame;
pub mod registers;

pub use frame::{FrameAssembler, Rejected, Response, WireFrame};

/// Render bytes as space-separated uppercase hex, e.g. `01 06 00 00`.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

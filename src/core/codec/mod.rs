//! Byte/text helpers shared by the router and the wire logging

mod text;

pub use text::{escape_control, Utf8StreamDecoder};

/// Hex preview of wire bytes for trace logs, truncated to `limit` bytes
pub fn hex_preview(data: &[u8], limit: usize) -> String {
    if data.len() <= limit {
        hex::encode(data)
    } else {
        format!("{}..(+{})", hex::encode(&data[..limit]), data.len() - limit)
    }
}

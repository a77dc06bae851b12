//! Text decoding for routed device output

/// Incremental UTF-8 decoder for a chunked byte stream.
///
/// A multi-byte character split across two reads is held back until the
/// rest of it arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    /// Create a decoder with nothing pending
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, returning every complete character
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(chunk);

        let mut output = String::with_capacity(data.len());
        let mut rest = &data[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    output.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    output.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            output.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Truncated sequence at the end of the chunk
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        output
    }

    /// Bytes held back waiting for the rest of a character
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop any held-back partial character
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Render control bytes visibly (`\r`, `\n`, `\x04`, ...) for log output
pub fn escape_control(text: &str) -> String {
    let mut output = String::with_capacity(text.len() * 2);

    for c in text.chars() {
        match c {
            '\r' => output.push_str("\\r"),
            '\n' => output.push_str("\\n"),
            '\t' => output.push_str("\\t"),
            '\0' => output.push_str("\\0"),
            '\x1b' => output.push_str("\\e"),
            c if c.is_control() => output.push_str(&format!("\\x{:02x}", c as u32)),
            c => output.push(c),
        }
    }

    output
}

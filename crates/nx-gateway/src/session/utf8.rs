//! UTF-8 decoding across read boundaries

/// Decodes a byte stream into text, holding back an incomplete trailing
/// character until the rest of it arrives.
///
/// Invalid sequences become U+FFFD; a multi-byte character split across two
/// reads is reassembled rather than replaced.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated character at the end: keep it for the next chunk
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    /// Emit whatever is still held back
    pub fn flush(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_multibyte_character() {
        let text = "héllo ✓";
        let bytes = text.as_bytes();
        // Split inside the three-byte check mark
        let cut = bytes.len() - 1;

        let mut carry = Utf8Carry::new();
        let first = carry.decode(&bytes[..cut]);
        let second = carry.decode(&bytes[cut..]);

        assert_eq!(first, "héllo ");
        assert_eq!(format!("{}{}", first, second), text);
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.decode(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn test_flush_emits_incomplete_tail() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.decode(&[b'x', 0xe2, 0x9c]), "x");
        assert_eq!(carry.flush(), "\u{fffd}");
        assert_eq!(carry.flush(), "");
    }
}

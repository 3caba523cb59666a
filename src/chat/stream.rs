use futures::stream::BoxStream;

use crate::error::TransportError;

/// Raw body chunks of a streamed answer, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Incremental UTF-8 decoder for chunked bodies.
///
/// A multi-byte character split across two chunks is held back until the
/// rest of it arrives. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Feed one chunk, returning whatever text it completes (possibly empty).
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated character at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush anything still held back once the stream is over.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(b"The "), "The ");
        assert_eq!(decoder.push(b"contract"), "contract");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_split_multibyte_character() {
        // "₹" is E2 82 B9
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(&[b'F', b'e', b'e', b' ', 0xE2]), "Fee ");
        assert_eq!(decoder.push(&[0x82]), "");
        assert_eq!(decoder.push(&[0xB9, b'5']), "₹5");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_tail_flushed_lossy() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(&[b'x', 0xE2, 0x82]), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_empty_chunk() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(&[]), "");
    }
}

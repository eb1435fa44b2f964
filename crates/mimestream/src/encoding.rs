//! MIME content-transfer encoders.
//!
//! Supports Quoted-Printable and line-wrapped Base64, plus the check for
//! header text that needs RFC 2047 encoding. Everything here is encode-only.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Maximum number of characters on one line of a Base64 body.
pub const BASE64_LINE_LENGTH: usize = 400;

/// Maximum line length for Quoted-Printable encoding.
const MAX_LINE_LENGTH: usize = 76;

/// Encodes data as Base64 without line breaks.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64, breaking lines after [`BASE64_LINE_LENGTH`]
/// characters.
#[must_use]
pub fn encode_base64_wrapped(data: &[u8]) -> String {
    let mut out = Vec::with_capacity(data.len() / 3 * 4 + 8);
    let mut encoder = Base64Wrap::new();
    encoder.encode(data, &mut out);
    encoder.finish(&mut out);
    // Base64 output is always ASCII.
    String::from_utf8(out).unwrap_or_default()
}

/// Resumable Base64 encoder with line wrapping.
///
/// Input may be fed in arbitrary chunks. Up to two trailing bytes of an
/// incomplete 3-byte group are carried to the next call, and the output
/// column is tracked across calls, so the cumulative output never depends on
/// how the input was split.
#[derive(Debug, Clone, Default)]
pub struct Base64Wrap {
    carry: [u8; 3],
    carry_len: usize,
    column: usize,
}

impl Base64Wrap {
    /// Creates an encoder positioned at the start of a line.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            carry: [0; 3],
            carry_len: 0,
            column: 0,
        }
    }

    /// Encodes `input`, appending complete output to `out`.
    pub fn encode(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        if self.carry_len > 0 {
            let take = (3 - self.carry_len).min(input.len());
            self.carry[self.carry_len..self.carry_len + take].copy_from_slice(&input[..take]);
            self.carry_len += take;
            input = &input[take..];
            if self.carry_len < 3 {
                return;
            }
            let group = self.carry;
            self.carry_len = 0;
            self.emit(&group, out);
        }

        let whole = input.len() - input.len() % 3;
        let (groups, rest) = input.split_at(whole);
        if !groups.is_empty() {
            self.emit(groups, out);
        }
        self.carry[..rest.len()].copy_from_slice(rest);
        self.carry_len = rest.len();
    }

    /// Flushes the carried bytes with padding and resets the encoder so it
    /// can start a fresh body.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if self.carry_len > 0 {
            let group = self.carry;
            let len = self.carry_len;
            self.carry_len = 0;
            self.emit(&group[..len], out);
        }
        self.column = 0;
    }

    /// Returns true if nothing is carried and the encoder is at column 0.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.carry_len == 0 && self.column == 0
    }

    fn emit(&mut self, raw: &[u8], out: &mut Vec<u8>) {
        let encoded = STANDARD.encode(raw);
        self.wrap(encoded.as_bytes(), out);
    }

    fn wrap(&mut self, mut encoded: &[u8], out: &mut Vec<u8>) {
        while encoded.len() + self.column > BASE64_LINE_LENGTH {
            let fits = BASE64_LINE_LENGTH - self.column;
            out.extend_from_slice(&encoded[..fits]);
            out.extend_from_slice(b"\r\n");
            self.column = 0;
            encoded = &encoded[fits..];
        }
        out.extend_from_slice(encoded);
        self.column += encoded.len();
    }
}

/// Encodes data using Quoted-Printable encoding (RFC 2045).
///
/// Line breaks in the input (CRLF or bare LF) become hard CRLF breaks.
/// Whitespace directly before a line break is escaped, and soft line breaks
/// keep every encoded line within 76 characters.
#[must_use]
pub fn encode_quoted_printable(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() + data.len() / 8);
    let mut line_length = 0;
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];

        let line_break = match byte {
            b'\r' if data.get(i + 1) == Some(&b'\n') => Some(2),
            b'\n' => Some(1),
            _ => None,
        };
        if let Some(len) = line_break {
            result.push_str("\r\n");
            line_length = 0;
            i += len;
            continue;
        }

        let ends_line = match data.get(i + 1) {
            None | Some(b'\n') => true,
            Some(b'\r') => data.get(i + 2) == Some(&b'\n'),
            Some(_) => false,
        };

        let literal = match byte {
            b'!'..=b'<' | b'>'..=b'~' => true,
            b' ' | b'\t' => !ends_line,
            _ => false,
        };
        let width = if literal { 1 } else { 3 };

        // Keep room for the trailing '=' of a soft break
        if line_length + width > MAX_LINE_LENGTH - 1 {
            result.push_str("=\r\n");
            line_length = 0;
        }

        if literal {
            result.push(byte as char);
        } else {
            let _ = write!(result, "={byte:02X}");
        }
        line_length += width;
        i += 1;
    }

    result
}

/// Returns true if `text` can't appear verbatim in a header.
#[must_use]
pub fn needs_encoding(text: &str) -> bool {
    text.chars()
        .any(|c| !(c.is_ascii_graphic() || c == ' ' || c == '\t'))
        || text.contains("=?")
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode(encoded: &str) -> Vec<u8> {
        let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD.decode(cleaned).unwrap()
    }

    #[test]
    fn test_base64_encode() {
        assert_eq!(encode_base64(b"Hello, World!"), "SGVsbG8sIFdvcmxkIQ==");
    }

    #[test]
    fn test_base64_wrapped_short_input() {
        assert_eq!(encode_base64_wrapped(b"Hello, World!"), "SGVsbG8sIFdvcmxkIQ==");
        assert_eq!(encode_base64_wrapped(b""), "");
    }

    #[test]
    fn test_base64_wrapped_line_length() {
        let data = vec![0xA5u8; 1000];
        let encoded = encode_base64_wrapped(&data);
        let lines: Vec<&str> = encoded.split("\r\n").collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[..3].iter().all(|l| l.len() == BASE64_LINE_LENGTH));
        assert_eq!(decode(&encoded), data);
    }

    #[test]
    fn test_base64_wrapped_exact_line_has_no_trailing_break() {
        // 300 bytes -> exactly 400 characters
        let encoded = encode_base64_wrapped(&[7u8; 300]);
        assert_eq!(encoded.len(), BASE64_LINE_LENGTH);
        assert!(!encoded.contains("\r\n"));

        let encoded = encode_base64_wrapped(&[7u8; 301]);
        assert!(encoded.contains("\r\n"));
        assert_eq!(encoded.find("\r\n"), Some(BASE64_LINE_LENGTH));
    }

    #[test]
    fn test_base64_wrap_carry_between_calls() {
        let mut encoder = Base64Wrap::new();
        let mut out = Vec::new();
        encoder.encode(b"He", &mut out);
        assert!(out.is_empty());
        assert!(!encoder.is_idle());
        encoder.encode(b"llo, World!", &mut out);
        encoder.finish(&mut out);
        assert_eq!(out, b"SGVsbG8sIFdvcmxkIQ==");
        assert!(encoder.is_idle());
    }

    #[test]
    fn test_base64_wrap_reuse_after_finish() {
        let mut encoder = Base64Wrap::new();
        let mut first = Vec::new();
        encoder.encode(&[1u8; 500], &mut first);
        encoder.finish(&mut first);

        let mut second = Vec::new();
        encoder.encode(b"abc", &mut second);
        encoder.finish(&mut second);
        assert_eq!(second, b"YWJj");
    }

    proptest! {
        #[test]
        fn prop_base64_wrap_chunking_invariant(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            cuts in proptest::collection::vec(0usize..2048, 0..16),
        ) {
            let expected = encode_base64_wrapped(&data);

            let mut points: Vec<usize> = cuts.into_iter().map(|c| c % (data.len() + 1)).collect();
            points.sort_unstable();

            let mut encoder = Base64Wrap::new();
            let mut out = Vec::new();
            let mut start = 0;
            for point in points {
                encoder.encode(&data[start..point], &mut out);
                start = point;
            }
            encoder.encode(&data[start..], &mut out);
            encoder.finish(&mut out);

            prop_assert_eq!(String::from_utf8(out).unwrap(), expected);
        }
    }

    #[test]
    fn test_quoted_printable_plain() {
        assert_eq!(encode_quoted_printable(b"Hello, World!"), "Hello, World!");
    }

    #[test]
    fn test_quoted_printable_non_ascii() {
        let encoded = encode_quoted_printable("Héllo".as_bytes());
        assert_eq!(encoded, "H=C3=A9llo");
        assert_eq!(encode_quoted_printable(b"a=b"), "a=3Db");
    }

    #[test]
    fn test_quoted_printable_line_breaks() {
        assert_eq!(encode_quoted_printable(b"one\r\ntwo\nthree"), "one\r\ntwo\r\nthree");
        assert_eq!(encode_quoted_printable(b"lone\rcr"), "lone=0Dcr");
    }

    #[test]
    fn test_quoted_printable_trailing_whitespace() {
        assert_eq!(encode_quoted_printable(b"end \r\nnext"), "end=20\r\nnext");
        assert_eq!(encode_quoted_printable(b"tab\t"), "tab=09");
        assert_eq!(encode_quoted_printable(b"a b"), "a b");
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        let text = "x".repeat(200);
        let encoded = encode_quoted_printable(text.as_bytes());
        for line in encoded.split("\r\n") {
            assert!(line.len() <= MAX_LINE_LENGTH);
        }
        assert_eq!(encoded.replace("=\r\n", ""), text);
    }

    #[test]
    fn test_quoted_printable_escape_not_split() {
        let text = "é".repeat(60);
        let encoded = encode_quoted_printable(text.as_bytes());
        for line in encoded.split("=\r\n") {
            assert_eq!(line.len() % 3, 0);
            assert!(line.len() < MAX_LINE_LENGTH);
        }
    }

    #[test]
    fn test_needs_encoding() {
        assert!(!needs_encoding("plain text"));
        assert!(needs_encoding("Grüße"));
        assert!(needs_encoding("looks =?like?= a word"));
        assert!(needs_encoding("bell\u{7}"));
    }
}

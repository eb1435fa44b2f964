//! MIME header handling.
//!
//! [`Headers`] is an ordered multimap that keeps the first spelling and the
//! first-insertion position of every header name. [`HeaderCodec`] turns a
//! header value into folded, charset-aware ASCII.

use crate::encoding::{encode_base64, needs_encoding};
use std::fmt;
use std::fmt::Write as _;

/// Default folding limit for header lines.
pub const HEADER_LINE_LENGTH: usize = 76;

/// Encodes header values into 7-bit ASCII.
///
/// `used` is the number of columns already taken on the first line (the
/// header name and `": "`). When `limit` is false the value must not be
/// folded onto continuation lines.
pub trait HeaderCodec: fmt::Debug + Send + Sync {
    /// Encodes `text` for a header written in `charset`.
    fn encode(&self, text: &str, charset: &str, used: usize, limit: bool) -> String;
}

/// Default [`HeaderCodec`]: RFC 2047 B-encoding of non-ASCII word runs and
/// folding at whitespace.
#[derive(Debug, Clone, Copy)]
pub struct WordEncoder {
    line_length: usize,
}

impl WordEncoder {
    /// Creates an encoder folding at `line_length` columns.
    #[must_use]
    pub const fn new(line_length: usize) -> Self {
        Self { line_length }
    }

    fn push_encoded(&self, run: &str, charset: &str, limit: bool, atoms: &mut Vec<String>) {
        if !limit {
            atoms.push(encoded_word(run, charset));
            return;
        }

        // "=?" charset "?B?" text "?=" plus the leading space of a continuation
        let overhead = charset.len() + 8;
        let max_bytes = (self.line_length.saturating_sub(overhead) / 4 * 3).max(3);

        let mut chunk = String::new();
        for ch in run.chars() {
            if !chunk.is_empty() && chunk.len() + ch.len_utf8() > max_bytes {
                atoms.push(encoded_word(&chunk, charset));
                chunk.clear();
            }
            chunk.push(ch);
        }
        if !chunk.is_empty() {
            atoms.push(encoded_word(&chunk, charset));
        }
    }
}

/// Wraps `text` in a single B-encoded word: `=?charset?B?encoded-text?=`.
fn encoded_word(text: &str, charset: &str) -> String {
    format!("=?{charset}?B?{}?=", encode_base64(text.as_bytes()))
}

impl Default for WordEncoder {
    fn default() -> Self {
        Self::new(HEADER_LINE_LENGTH)
    }
}

impl HeaderCodec for WordEncoder {
    fn encode(&self, text: &str, charset: &str, used: usize, limit: bool) -> String {
        let mut atoms = Vec::new();
        let mut run: Vec<&str> = Vec::new();

        for word in text.split(' ') {
            if needs_encoding(word) {
                run.push(word);
                continue;
            }
            if !run.is_empty() {
                self.push_encoded(&run.join(" "), charset, limit, &mut atoms);
                run.clear();
            }
            atoms.push(word.to_string());
        }
        if !run.is_empty() {
            self.push_encoded(&run.join(" "), charset, limit, &mut atoms);
        }

        let mut out = String::with_capacity(text.len());
        let mut column = used;
        for (i, atom) in atoms.iter().enumerate() {
            if i > 0 {
                if limit && column + 1 + atom.len() > self.line_length {
                    out.push_str("\r\n ");
                    column = 1;
                } else {
                    out.push(' ');
                    column += 1;
                }
            }
            out.push_str(atom);
            column += atom.len();
        }
        out
    }
}

/// Ordered collection of email headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Sets a header value, replacing any existing values.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = vec![value.into()],
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|i| self.entries[i].1.first().map(String::as_str))
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.position(name)
            .map(|i| self.entries[i].1.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns true if the header is present with a non-empty value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_empty())
    }

    /// Removes all values for a header.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Returns the number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over header names and their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Serializes the headers, passing each value through `codec`.
    ///
    /// Multiple values of one header are joined with `", "` on one line.
    #[must_use]
    pub fn to_folded(&self, codec: &dyn HeaderCodec, charset: &str, limit: bool) -> String {
        let mut out = String::new();
        for (name, values) in self.iter() {
            let value = codec.encode(&values.join(", "), charset, name.len() + 2, limit);
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out
    }
}

impl fmt::Display for Headers {
    /// Writes the values verbatim, one line per header.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, values) in self.iter() {
            write!(f, "{name}: {}\r\n", values.join(", "))?;
        }
        Ok(())
    }
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

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain")); // Case insensitive
    }

    #[test]
    fn test_headers_set() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("to", "bob@example.com");
        assert_eq!(headers.get_all("To").len(), 2);
        assert_eq!(headers.len(), 1);

        headers.set("TO", "charlie@example.com");
        assert_eq!(headers.get_all("To"), vec!["charlie@example.com"]);
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.add("Subject", "Test");
        assert!(headers.contains("Subject"));

        headers.remove("subject");
        assert!(headers.get("Subject").is_none());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_keep_insertion_order() {
        let mut headers = Headers::new();
        headers.add("From", "a@example.com");
        headers.add("To", "b@example.com");
        headers.add("Subject", "Hi");
        headers.add("To", "c@example.com");

        assert_eq!(
            headers.to_string(),
            "From: a@example.com\r\nTo: b@example.com, c@example.com\r\nSubject: Hi\r\n"
        );
    }

    #[test]
    fn test_to_folded_ascii() {
        let mut headers = Headers::new();
        headers.add("Subject", "Hello");
        let out = headers.to_folded(&WordEncoder::default(), "utf-8", true);
        assert_eq!(out, "Subject: Hello\r\n");
    }

    #[test]
    fn test_word_encoder_folds_long_values() {
        let text = "word ".repeat(40);
        let text = text.trim_end();
        let encoded = WordEncoder::default().encode(text, "utf-8", 9, true);

        let mut lines = encoded.split("\r\n");
        let first = lines.next().unwrap();
        assert!(first.len() + 9 <= HEADER_LINE_LENGTH);
        for line in lines {
            assert!(line.starts_with(' '));
            assert!(line.len() <= HEADER_LINE_LENGTH);
        }
        assert_eq!(encoded.replace("\r\n", ""), text);
    }

    #[test]
    fn test_word_encoder_no_limit_keeps_one_line() {
        let text = "word ".repeat(40);
        let encoded = WordEncoder::default().encode(text.trim_end(), "utf-8", 9, false);
        assert!(!encoded.contains("\r\n"));
    }

    #[test]
    fn test_word_encoder_encodes_only_non_ascii_words() {
        let encoded = WordEncoder::default().encode("Hi Jürgen <j@example.com>", "utf-8", 6, true);
        assert_eq!(encoded, "Hi =?utf-8?B?SsO8cmdlbg==?= <j@example.com>");
    }

    #[test]
    fn test_word_encoder_splits_long_runs() {
        let text = "ü".repeat(100);
        let encoded = WordEncoder::default().encode(&text, "utf-8", 9, true);
        let words: Vec<&str> = encoded.split("\r\n ").collect();
        assert!(words.len() > 1);
        for word in &words {
            assert!(word.starts_with("=?utf-8?B?"));
            assert!(word.ends_with("?="));
            assert!(word.len() < HEADER_LINE_LENGTH);
        }
    }
}

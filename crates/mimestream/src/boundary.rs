//! Multipart boundary management.
//!
//! A [`BoundaryStack`] tracks the open multipart contexts of one message.
//! Every context owns a random boundary token; contexts are closed in
//! reverse order of opening.

use crate::content_type::ContentType;
use crate::header::Headers;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::fmt;

/// Default length of generated boundary tokens.
pub const DEFAULT_BOUNDARY_LENGTH: usize = 40;

/// Multipart subtype of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartKind {
    /// `multipart/mixed`: body plus attachments.
    Mixed,
    /// `multipart/related`: body plus inline resources.
    Related,
    /// `multipart/alternative`: variants of the same body.
    Alternative,
}

impl fmt::Display for MultipartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mixed => write!(f, "mixed"),
            Self::Related => write!(f, "related"),
            Self::Alternative => write!(f, "alternative"),
        }
    }
}

/// Creates a random alphanumeric boundary token.
#[must_use]
pub fn make_boundary(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone)]
struct Context {
    kind: MultipartKind,
    boundary: String,
    has_parts: bool,
}

/// Stack of open multipart contexts.
#[derive(Debug, Clone)]
pub struct BoundaryStack {
    open: Vec<Context>,
    boundary_length: usize,
    first_boundary: Option<String>,
    opened: usize,
    closed: usize,
}

impl BoundaryStack {
    /// Creates an empty stack generating tokens of `boundary_length` characters.
    #[must_use]
    pub const fn new(boundary_length: usize) -> Self {
        Self {
            open: Vec::new(),
            boundary_length,
            first_boundary: None,
            opened: 0,
            closed: 0,
        }
    }

    /// Opens a new multipart context.
    ///
    /// The outermost context's `Content-Type` header is added to
    /// `top_headers`; the caller writes those headers before anything else.
    /// A nested context is announced as a new part of the enclosing one,
    /// written to `out`.
    pub fn open(&mut self, kind: MultipartKind, top_headers: &mut Headers, out: &mut Vec<u8>) {
        let boundary = make_boundary(self.boundary_length);
        let content_type = ContentType::multipart(kind.to_string(), boundary.as_str());

        if self.open.is_empty() {
            top_headers.set("Content-Type", content_type.to_string());
        } else {
            let mut headers = Headers::new();
            headers.set("Content-Type", content_type.to_string());
            self.create_part(&headers, out);
        }

        if self.first_boundary.is_none() {
            self.first_boundary = Some(boundary.clone());
        }
        tracing::trace!(%kind, depth = self.open.len() + 1, "open multipart");
        self.open.push(Context {
            kind,
            boundary,
            has_parts: false,
        });
        self.opened += 1;
    }

    /// Starts a new part in the innermost context: delimiter, `headers`, and
    /// the blank line. Does nothing when no context is open.
    pub fn create_part(&mut self, headers: &Headers, out: &mut Vec<u8>) {
        let Some(context) = self.open.last_mut() else {
            return;
        };
        if context.has_parts {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"--");
        out.extend_from_slice(context.boundary.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(headers.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        context.has_parts = true;
    }

    /// Closes the innermost context, writing its closing delimiter.
    ///
    /// Returns the kind of the closed context, or `None` if the stack was
    /// empty.
    pub fn close(&mut self, out: &mut Vec<u8>) -> Option<MultipartKind> {
        let context = self.open.pop()?;
        if context.has_parts {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"--");
        out.extend_from_slice(context.boundary.as_bytes());
        out.extend_from_slice(b"--\r\n");
        self.closed += 1;
        tracing::trace!(kind = %context.kind, depth = self.open.len(), "close multipart");
        Some(context.kind)
    }

    /// Returns the kind of the innermost open context.
    #[must_use]
    pub fn current(&self) -> Option<MultipartKind> {
        self.open.last().map(|c| c.kind)
    }

    /// Returns true if a context of `kind` is open.
    #[must_use]
    pub fn is_open(&self, kind: MultipartKind) -> bool {
        self.open.iter().any(|c| c.kind == kind)
    }

    /// Returns the number of open contexts.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Returns the number of contexts opened so far.
    #[must_use]
    pub const fn opened(&self) -> usize {
        self.opened
    }

    /// Returns the number of contexts closed so far.
    #[must_use]
    pub const fn closed(&self) -> usize {
        self.closed
    }

    /// Returns the boundary of the outermost context ever opened.
    #[must_use]
    pub fn first_boundary(&self) -> Option<&str> {
        self.first_boundary.as_deref()
    }
}

impl Default for BoundaryStack {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNDARY_LENGTH)
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
    fn test_make_boundary() {
        let a = make_boundary(40);
        let b = make_boundary(40);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_first_context_goes_to_top_headers() {
        let mut stack = BoundaryStack::default();
        let mut top = Headers::new();
        let mut out = Vec::new();
        stack.open(MultipartKind::Mixed, &mut top, &mut out);

        assert!(out.is_empty());
        let boundary = stack.first_boundary().unwrap().to_string();
        assert_eq!(
            top.get("Content-Type").unwrap(),
            format!("multipart/mixed; boundary=\"{boundary}\"")
        );
        assert_eq!(stack.current(), Some(MultipartKind::Mixed));
    }

    #[test]
    fn test_nested_context_is_a_part() {
        let mut stack = BoundaryStack::default();
        let mut top = Headers::new();
        let mut out = Vec::new();
        stack.open(MultipartKind::Mixed, &mut top, &mut out);
        let outer = stack.first_boundary().unwrap().to_string();
        stack.open(MultipartKind::Alternative, &mut top, &mut out);

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(&format!("--{outer}\r\nContent-Type: multipart/alternative; boundary=\"")));
        assert!(text.ends_with("\"\r\n\r\n"));
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn test_parts_and_close() {
        let mut stack = BoundaryStack::new(8);
        let mut top = Headers::new();
        let mut out = Vec::new();
        stack.open(MultipartKind::Alternative, &mut top, &mut out);
        let b = stack.first_boundary().unwrap().to_string();

        let mut headers = Headers::new();
        headers.set("Content-Type", "text/plain");
        stack.create_part(&headers, &mut out);
        out.extend_from_slice(b"one");
        stack.create_part(&headers, &mut out);
        out.extend_from_slice(b"two");
        assert_eq!(stack.close(&mut out), Some(MultipartKind::Alternative));

        let expected = format!(
            "--{b}\r\nContent-Type: text/plain\r\n\r\none\r\n--{b}\r\nContent-Type: text/plain\r\n\r\ntwo\r\n--{b}--\r\n"
        );
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn test_close_empty_context() {
        let mut stack = BoundaryStack::new(8);
        let mut top = Headers::new();
        let mut out = Vec::new();
        stack.open(MultipartKind::Related, &mut top, &mut out);
        let b = stack.first_boundary().unwrap().to_string();
        stack.close(&mut out);
        assert_eq!(String::from_utf8(out).unwrap(), format!("--{b}--\r\n"));
    }

    #[test]
    fn test_close_on_empty_stack_is_noop() {
        let mut stack = BoundaryStack::default();
        let mut out = Vec::new();
        assert_eq!(stack.close(&mut out), None);
        assert!(out.is_empty());
        assert_eq!(stack.closed(), 0);
    }

    #[test]
    fn test_close_reverse_order() {
        let mut stack = BoundaryStack::default();
        let mut top = Headers::new();
        let mut out = Vec::new();
        stack.open(MultipartKind::Mixed, &mut top, &mut out);
        stack.open(MultipartKind::Related, &mut top, &mut out);
        stack.open(MultipartKind::Alternative, &mut top, &mut out);
        assert!(stack.is_open(MultipartKind::Related));

        assert_eq!(stack.close(&mut out), Some(MultipartKind::Alternative));
        assert_eq!(stack.close(&mut out), Some(MultipartKind::Related));
        assert_eq!(stack.close(&mut out), Some(MultipartKind::Mixed));
        assert_eq!(stack.opened(), 3);
        assert_eq!(stack.closed(), 3);
        assert_eq!(stack.depth(), 0);
    }
}

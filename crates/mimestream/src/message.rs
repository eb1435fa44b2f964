//! Message assembly.
//!
//! [`Message::assemble`] does all the eager work: it serializes the
//! top-level headers, opens the multipart layers the email needs and encodes
//! every textual body part into an in-memory prefix. File content is left
//! untouched until the message is read (see the `reader` module).

use crate::boundary::{BoundaryStack, MultipartKind};
use crate::cid::CidTable;
use crate::config::Config;
use crate::content_type::ContentType;
use crate::email::{Email, FileRef, Section, TransferEncoding};
use crate::encoding::{Base64Wrap, encode_base64_wrapped, encode_quoted_printable};
use crate::error::Result;
use crate::header::Headers;
use crate::reader::Stage;
use chrono::{DateTime, FixedOffset, Local};

/// Format of the generated `Date` header (RFC 5322).
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Fixed per-attachment header overhead used by [`Message::estimated_size`].
const ATTACHMENT_HEADER_OVERHEAD: u64 = 116;

/// Fixed per-inline header overhead used by [`Message::estimated_size`].
const INLINE_HEADER_OVERHEAD: u64 = 148;

/// An assembled message, ready to be streamed.
#[derive(Debug)]
pub struct Message {
    /// Encoded bytes not yet handed to the reader.
    pub(crate) buffer: Vec<u8>,
    /// Read position in `buffer`.
    pub(crate) position: usize,
    prefix_len: usize,
    pub(crate) boundaries: BoundaryStack,
    pub(crate) cids: CidTable,
    charset: String,
    pub(crate) encoding: TransferEncoding,
    pub(crate) attachments: Vec<FileRef>,
    pub(crate) inlines: Vec<FileRef>,
    pub(crate) attachment_index: usize,
    pub(crate) inline_index: usize,
    pub(crate) stage: Stage,
    pub(crate) encoder: Base64Wrap,
    pub(crate) scratch: Vec<u8>,
    pub(crate) config: Config,
}

impl Message {
    /// Assembles `email` with the default configuration and the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if a body part has an invalid content type.
    pub fn new(email: Email) -> Result<Self> {
        Self::assemble(email, Config::default(), Local::now().fixed_offset())
    }

    /// Assembles `email`.
    ///
    /// `now` is used for a missing `Date` header and for generated
    /// Content-IDs, which makes the output reproducible for a fixed time.
    ///
    /// # Errors
    ///
    /// Returns an error if a body part has an invalid content type.
    pub fn assemble(email: Email, config: Config, now: DateTime<FixedOffset>) -> Result<Self> {
        let mixed = email.has_mixed_part();
        let related = email.has_related_part();
        let alternative = email.has_alternative_part();

        let Email {
            mut headers,
            charset,
            encoding,
            parts,
            attachments,
            inlines,
        } = email;

        if !headers.contains("Date") {
            headers.set("Date", now.format(DATE_FORMAT).to_string());
        }
        if !headers.contains("MIME-Version") {
            headers.set("MIME-Version", "1.0");
        }

        let mut boundaries = BoundaryStack::new(config.boundary_length);
        let mut cids = CidTable::new(now);
        let mut body = Vec::new();

        if mixed {
            boundaries.open(MultipartKind::Mixed, &mut headers, &mut body);
        }
        if related {
            boundaries.open(MultipartKind::Related, &mut headers, &mut body);
        }
        if alternative {
            boundaries.open(MultipartKind::Alternative, &mut headers, &mut body);
        }

        for part in &parts {
            let (content, _) = cids.rewrite(&part.body);
            let content_type = ContentType::parse(&part.content_type)?
                .with_parameter("charset", charset.as_str())
                .to_string();

            if boundaries.depth() > 0 {
                let mut part_headers = Headers::new();
                part_headers.set("Content-Type", content_type);
                part_headers.set("Content-Transfer-Encoding", encoding.to_string());
                boundaries.create_part(&part_headers, &mut body);
            } else {
                headers.set("Content-Type", content_type);
                headers.set("Content-Transfer-Encoding", encoding.to_string());
            }
            encode_body(&content, encoding, &mut body);
        }

        if alternative {
            boundaries.close(&mut body);
        }

        let header_block =
            headers.to_folded(config.header_codec.as_ref(), &charset, encoding.folds_headers());
        let mut buffer = Vec::with_capacity(header_block.len() + 2 + body.len());
        buffer.extend_from_slice(header_block.as_bytes());
        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&body);

        tracing::debug!(
            prefix_len = buffer.len(),
            parts = parts.len(),
            attachments = attachments.len(),
            inlines = inlines.len(),
            layers = boundaries.opened(),
            "assembled message"
        );

        Ok(Self {
            prefix_len: buffer.len(),
            buffer,
            position: 0,
            boundaries,
            cids,
            charset,
            encoding,
            attachments,
            inlines,
            attachment_index: 0,
            inline_index: 0,
            stage: Stage::Prefix,
            encoder: Base64Wrap::new(),
            scratch: Vec::new(),
            config,
        })
    }

    /// Returns a close estimate of the total encoded size in bytes.
    ///
    /// The figure is advisory (based on declared file sizes and typical
    /// header lengths) and must not be used for framing.
    #[must_use]
    pub fn estimated_size(&self) -> u64 {
        let mut length = self.prefix_len as u64;
        let mut file_size: u64 = 0;

        for file in &self.attachments {
            file_size = file_size.saturating_add(file.size);
            length = length.saturating_add(file_overhead(file, ATTACHMENT_HEADER_OVERHEAD));
        }
        for file in &self.inlines {
            file_size = file_size.saturating_add(file.size);
            length = length.saturating_add(file_overhead(file, INLINE_HEADER_OVERHEAD));
        }

        let opened = self.boundaries.opened() as u64;
        if let Some(boundary) = self.boundaries.first_boundary() {
            length = length.saturating_add((boundary.len() as u64 + 4) * (opened + 1) * 2);
        }

        if self.encoding != TransferEncoding::None {
            let encoded = u128::from(file_size) * 136 / 100;
            file_size = u64::try_from(encoded).unwrap_or(u64::MAX);
        }
        length.saturating_add(file_size)
    }

    /// Returns the length of the eagerly built prefix.
    #[must_use]
    pub const fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Returns the outermost boundary token, if the message is multipart.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.boundaries.first_boundary()
    }

    /// Returns the message's Content-ID table.
    #[must_use]
    pub const fn content_ids(&self) -> &CidTable {
        &self.cids
    }

    /// Returns the charset of headers and bodies.
    #[must_use]
    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// Returns the body transfer encoding.
    #[must_use]
    pub const fn encoding(&self) -> TransferEncoding {
        self.encoding
    }

    /// Returns how many files of `section` have been fully streamed.
    #[must_use]
    pub const fn cursor(&self, section: Section) -> usize {
        match section {
            Section::Inline => self.inline_index,
            Section::Attachment => self.attachment_index,
        }
    }

    /// Returns the number of multipart contexts opened and closed so far.
    #[must_use]
    pub const fn boundary_balance(&self) -> (usize, usize) {
        (self.boundaries.opened(), self.boundaries.closed())
    }
}

fn file_overhead(file: &FileRef, fixed: u64) -> u64 {
    (file.filename.len() as u64) * 2 + file.mime_type.len() as u64 + fixed
}

/// Appends `content` encoded with `encoding` to `out`.
fn encode_body(content: &[u8], encoding: TransferEncoding, out: &mut Vec<u8>) {
    match encoding {
        TransferEncoding::None => out.extend_from_slice(content),
        TransferEncoding::QuotedPrintable => {
            out.extend_from_slice(encode_quoted_printable(content).as_bytes());
        }
        TransferEncoding::Base64 => out.extend_from_slice(encode_base64_wrapped(content).as_bytes()),
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
    use crate::email::BodyPart;
    use chrono::TimeZone;

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 5, 9, 8, 7)
            .unwrap()
    }

    fn email() -> Email {
        let mut email = Email::new();
        email.headers.add("From", "sender@example.com");
        email.headers.add("To", "recipient@example.com");
        email.headers.add("Subject", "Test");
        email
    }

    fn prefix(message: &Message) -> String {
        String::from_utf8(message.buffer.clone()).unwrap()
    }

    #[test]
    fn test_date_and_mime_version_added() {
        let message = Message::assemble(email(), Config::default(), now()).unwrap();
        let text = prefix(&message);
        assert!(text.contains("Date: Tue, 05 Mar 2024 09:08:07 +0100\r\n"));
        assert!(text.contains("MIME-Version: 1.0\r\n"));
    }

    #[test]
    fn test_existing_date_kept() {
        let mut email = email();
        email.headers.add("Date", "Mon, 01 Jan 2024 00:00:00 +0000");
        let message = Message::assemble(email, Config::default(), now()).unwrap();
        let text = prefix(&message);
        assert_eq!(text.matches("Date: ").count(), 1);
        assert!(text.contains("Date: Mon, 01 Jan 2024 00:00:00 +0000\r\n"));
    }

    #[test]
    fn test_single_part_headers_are_top_level() {
        let mut email = email();
        email.encoding = TransferEncoding::None;
        email.parts.push(BodyPart::text("just test\r\n"));
        let message = Message::assemble(email, Config::default(), now()).unwrap();

        let text = prefix(&message);
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.contains("Content-Type: text/plain; charset=utf-8"));
        assert!(head.contains("Content-Transfer-Encoding: binary"));
        assert_eq!(body, "just test\r\n");
        assert_eq!(message.boundary(), None);
    }

    #[test]
    fn test_alternative_closed_at_assembly() {
        let mut email = email();
        email.parts.push(BodyPart::text("plain"));
        email.parts.push(BodyPart::html("<b>html</b>"));
        let message = Message::assemble(email, Config::default(), now()).unwrap();

        let boundary = message.boundary().unwrap().to_string();
        let text = prefix(&message);
        // Folded: the boundary parameter moves to a continuation line
        assert!(text.contains(&format!(
            "Content-Type: multipart/alternative;\r\n boundary=\"{boundary}\"\r\n"
        )));
        assert!(text.ends_with(&format!("\r\n--{boundary}--\r\n")));
        assert_eq!(message.boundary_balance(), (1, 1));
    }

    #[test]
    fn test_mixed_and_related_stay_open() {
        let mut email = email();
        email.parts.push(BodyPart::html(r#"<img src="cid:logo.png">"#));
        email
            .inlines
            .push(FileRef::from_bytes("logo.png", "image/png", vec![1, 2, 3]));
        email
            .attachments
            .push(FileRef::from_bytes("a.txt", "text/plain", b"abc".to_vec()));
        let message = Message::assemble(email, Config::default(), now()).unwrap();

        assert_eq!(message.boundary_balance(), (2, 0));
        let text = prefix(&message);
        assert!(text.contains("multipart/mixed"));
        assert!(text.contains("multipart/related"));
        assert!(!text.contains("multipart/alternative"));
        assert!(text.contains("cid:20240305.090807.1@mail.0"));
    }

    #[test]
    fn test_body_encodings() {
        let mut email = email();
        email.encoding = TransferEncoding::Base64;
        email.parts.push(BodyPart::text("Hello, World!"));
        let message = Message::assemble(email, Config::default(), now()).unwrap();
        assert!(prefix(&message).ends_with("\r\n\r\nSGVsbG8sIFdvcmxkIQ=="));

        let mut email = self::email();
        email.parts.push(BodyPart::text("Héllo"));
        let message = Message::assemble(email, Config::default(), now()).unwrap();
        let text = prefix(&message);
        assert!(text.contains("Content-Transfer-Encoding: quoted-printable"));
        assert!(text.ends_with("\r\n\r\nH=C3=A9llo"));
    }

    #[test]
    fn test_invalid_body_content_type() {
        let mut email = email();
        email.parts.push(BodyPart::new("nonsense", "x"));
        let err = Message::assemble(email, Config::default(), now()).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_non_ascii_subject_encoded() {
        let mut email = Email::new();
        email.headers.add("Subject", "Grüße");
        let message = Message::assemble(email, Config::default(), now()).unwrap();
        assert!(prefix(&message).contains("Subject: =?utf-8?B?R3LDvMOfZQ==?=\r\n"));
    }

    #[test]
    fn test_estimated_size() {
        let mut email = email();
        email.parts.push(BodyPart::text("body"));
        email.attachments.push(FileRef::from_reader(
            "data.bin",
            "application/octet-stream",
            1000,
            std::io::empty(),
        ));
        let message = Message::assemble(email, Config::default(), now()).unwrap();

        let boundary_cost = (40 + 4) * 2 * 2;
        let overhead = 8 * 2 + "application/octet-stream".len() as u64 + 116;
        let expected = message.prefix_len() as u64 + 1360 + overhead + boundary_cost;
        assert_eq!(message.estimated_size(), expected);
    }

    #[test]
    fn test_estimated_size_inline_overhead() {
        let mut email = email();
        email.parts.push(BodyPart::html(r#"<img src="cid:logo.png">"#));
        email
            .inlines
            .push(FileRef::from_bytes("logo.png", "image/png", vec![0; 300]));
        let message = Message::assemble(email, Config::default(), now()).unwrap();

        let boundary_cost = (40 + 4) * 2 * 2;
        let overhead = 8 * 2 + "image/png".len() as u64 + 148;
        let expected = message.prefix_len() as u64 + 408 + overhead + boundary_cost;
        assert_eq!(message.estimated_size(), expected);
    }

    #[test]
    fn test_estimated_size_raw_files() {
        let mut email = email();
        email.encoding = TransferEncoding::None;
        email.parts.push(BodyPart::text("body"));
        email
            .attachments
            .push(FileRef::from_bytes("a.bin", "application/octet-stream", vec![0; 1000]));
        email
            .inlines
            .push(FileRef::from_bytes("i.gif", "image/gif", vec![0; 50]));
        let message = Message::assemble(email, Config::default(), now()).unwrap();

        // Two layers opened: mixed and related
        let boundary_cost = (40 + 4) * 3 * 2;
        let overhead = (5 * 2 + "application/octet-stream".len() as u64 + 116)
            + (5 * 2 + "image/gif".len() as u64 + 148);
        let expected = message.prefix_len() as u64 + 1050 + overhead + boundary_cost;
        assert_eq!(message.estimated_size(), expected);
    }

    #[test]
    fn test_estimated_size_saturates() {
        let mut email = email();
        email.parts.push(BodyPart::text("body"));
        for name in ["a", "b"] {
            email.attachments.push(FileRef::from_reader(
                name,
                "application/octet-stream",
                u64::MAX / 100,
                std::io::empty(),
            ));
        }
        email.inlines.push(FileRef::from_reader(
            "c",
            "image/png",
            u64::MAX,
            std::io::empty(),
        ));
        let message = Message::assemble(email, Config::default(), now()).unwrap();
        assert_eq!(message.estimated_size(), u64::MAX);
    }

    #[test]
    fn test_estimated_size_without_encoding() {
        let mut email = email();
        email.encoding = TransferEncoding::None;
        email.parts.push(BodyPart::text("body"));
        let message = Message::assemble(email, Config::default(), now()).unwrap();
        assert_eq!(message.estimated_size(), message.prefix_len() as u64);
    }
}

//! Logical description of an email handed to the assembler.

use crate::header::Headers;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

/// Content transfer encoding applied to body parts.
///
/// File bodies are Base64 encoded unless the mode is [`TransferEncoding::None`],
/// in which case every body is written verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferEncoding {
    /// No encoding (`binary`).
    None,
    /// Quoted-Printable encoding.
    #[default]
    QuotedPrintable,
    /// Base64 encoding.
    Base64,
}

impl TransferEncoding {
    /// Returns true if header values may be folded under this mode.
    #[must_use]
    pub const fn folds_headers(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns the encoding used for file bodies under this mode.
    #[must_use]
    pub const fn for_files(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::QuotedPrintable | Self::Base64 => Self::Base64,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "binary"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Base64 => write!(f, "base64"),
        }
    }
}

/// Which file list a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Inline resources referenced from the body (`multipart/related`).
    Inline,
    /// Attachments (`multipart/mixed`).
    Attachment,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Attachment => write!(f, "attachment"),
        }
    }
}

/// A textual body part (e.g. `text/plain` or `text/html`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    /// Content type without charset, e.g. `text/html`.
    pub content_type: String,
    /// Raw body bytes in the email's charset.
    pub body: Vec<u8>,
}

impl BodyPart {
    /// Creates a body part.
    #[must_use]
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// Creates a `text/plain` body part.
    #[must_use]
    pub fn text(body: impl Into<Vec<u8>>) -> Self {
        Self::new("text/plain", body)
    }

    /// Creates a `text/html` body part.
    #[must_use]
    pub fn html(body: impl Into<Vec<u8>>) -> Self {
        Self::new("text/html", body)
    }
}

/// Where the bytes of a file come from.
pub enum FileSource {
    /// Content already held in memory.
    Memory(Cursor<Vec<u8>>),
    /// An open readable stream, read forward exactly once.
    Reader(Box<dyn Read + Send>),
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(cursor) => f
                .debug_tuple("Memory")
                .field(&cursor.get_ref().len())
                .finish(),
            Self::Reader(_) => f.debug_tuple("Reader").finish_non_exhaustive(),
        }
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Memory(cursor) => cursor.read(buf),
            Self::Reader(reader) => reader.read(buf),
        }
    }
}

/// A file to attach or embed.
#[derive(Debug)]
pub struct FileRef {
    /// File name shown to the recipient (and matched against `cid:` references).
    pub filename: String,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Declared size in bytes; 0 when unknown.
    pub size: u64,
    /// Content source.
    pub source: FileSource,
}

impl FileRef {
    /// Creates a file backed by an in-memory buffer.
    #[must_use]
    pub fn from_bytes(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        let data = data.into();
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            size: data.len() as u64,
            source: FileSource::Memory(Cursor::new(data)),
        }
    }

    /// Creates a file backed by a reader. `size` may be 0 if unknown.
    #[must_use]
    pub fn from_reader(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
        reader: impl Read + Send + 'static,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            size,
            source: FileSource::Reader(Box::new(reader)),
        }
    }

    /// Opens a file from disk. The size comes from the file metadata and the
    /// MIME type from the extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be opened or stat'ed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_reader(filename, guess_mime_type(path), size, file))
    }
}

/// Guesses a MIME type from a file extension.
#[must_use]
pub fn guess_mime_type(path: &Path) -> &'static str {
    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
        return "application/octet-stream";
    };
    match extension.to_lowercase().as_str() {
        "txt" | "text" => "text/plain",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "xml" => "text/xml",
        "ics" => "text/calendar",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "png" => "image/png",
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "eml" => "message/rfc822",
        _ => "application/octet-stream",
    }
}

/// Everything the assembler needs to produce one message.
#[derive(Debug)]
pub struct Email {
    /// Top-level headers in output order.
    pub headers: Headers,
    /// Charset of header values and textual bodies.
    pub charset: String,
    /// Transfer encoding for body parts.
    pub encoding: TransferEncoding,
    /// Textual body variants, in order of increasing preference.
    pub parts: Vec<BodyPart>,
    /// Attachments.
    pub attachments: Vec<FileRef>,
    /// Inline resources.
    pub inlines: Vec<FileRef>,
}

impl Email {
    /// Creates an empty UTF-8, Quoted-Printable email.
    #[must_use]
    pub fn new() -> Self {
        Self {
            headers: Headers::new(),
            charset: "utf-8".to_string(),
            encoding: TransferEncoding::default(),
            parts: Vec::new(),
            attachments: Vec::new(),
            inlines: Vec::new(),
        }
    }

    /// Returns true if the message needs a `multipart/mixed` layer.
    #[must_use]
    pub fn has_mixed_part(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Returns true if the message needs a `multipart/related` layer.
    #[must_use]
    pub fn has_related_part(&self) -> bool {
        !self.inlines.is_empty()
    }

    /// Returns true if the message needs a `multipart/alternative` layer.
    #[must_use]
    pub fn has_alternative_part(&self) -> bool {
        self.parts.len() > 1
    }
}

impl Default for Email {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_encoding_display() {
        assert_eq!(TransferEncoding::None.to_string(), "binary");
        assert_eq!(TransferEncoding::Base64.to_string(), "base64");
        assert_eq!(
            TransferEncoding::QuotedPrintable.to_string(),
            "quoted-printable"
        );
    }

    #[test]
    fn test_file_encoding() {
        assert_eq!(TransferEncoding::None.for_files(), TransferEncoding::None);
        assert_eq!(
            TransferEncoding::QuotedPrintable.for_files(),
            TransferEncoding::Base64
        );
    }

    #[test]
    fn test_file_ref_from_bytes() {
        let mut file = FileRef::from_bytes("a.txt", "text/plain", b"hello".to_vec());
        assert_eq!(file.size, 5);
        let mut content = String::new();
        file.source.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("logo.PNG")), "image/png");
        assert_eq!(guess_mime_type(Path::new("report.pdf")), "application/pdf");
        assert_eq!(guess_mime_type(Path::new("Makefile")), "application/octet-stream");
    }

    #[test]
    fn test_layers() {
        let mut email = Email::new();
        assert!(!email.has_mixed_part());
        email.parts.push(BodyPart::text("a"));
        assert!(!email.has_alternative_part());
        email.parts.push(BodyPart::html("<p>a</p>"));
        assert!(email.has_alternative_part());
        email
            .inlines
            .push(FileRef::from_bytes("logo.png", "image/png", vec![1, 2, 3]));
        assert!(email.has_related_part());
        assert!(!email.has_mixed_part());
    }
}

//! Pull-based streaming of an assembled [`Message`].
//!
//! Reading drains the buffered prefix first, then streams every inline file
//! inside the `multipart/related` context, closes it, streams every
//! attachment inside `multipart/mixed` and closes that. File content is read
//! from its source only as the caller asks for more output, so at most one
//! read chunk (plus its encoding) is held in memory at a time.
//!
//! ```text
//! Prefix ─┬─→ FileHeader(Inline) ⇄ FileBody(Inline) ─→ CloseSection(Inline) ─┬─→ FileHeader(Attachment) ⇄ FileBody(Attachment) ─→ CloseSection(Attachment) ─→ Done
//!         └──────────────────────────────────────────────────────────────────┴──────────────────────────────────────────────────────────────────────────────→ Done
//! ```

use crate::content_type::{ContentType, quote};
use crate::email::{FileRef, Section, TransferEncoding};
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::message::Message;
use std::io::{self, Read, Write};

/// Position of the reader in the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Draining the eagerly built prefix.
    Prefix,
    /// The next file of the section needs its part header.
    FileHeader(Section),
    /// Streaming the body of the current file.
    FileBody(Section),
    /// All files of the section are written; its context must be closed.
    CloseSection(Section),
    /// Nothing left but already buffered bytes.
    Done,
}

/// Result of one [`Message::read_into`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes written to the output region.
    pub written: usize,
    /// True if no bytes remain after this call.
    pub eof: bool,
}

impl Message {
    /// Fills `out` with the next bytes of the encoded message.
    ///
    /// Returns once `out` is full or the message is exhausted. After the
    /// call that reports `eof`, every further call writes nothing and
    /// reports `eof` again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyBuffer`] for a zero-length `out` (without
    /// touching any state), or the I/O error of a failing file source. Bytes
    /// already written to `out` by a failing call are lost to the caller.
    pub fn read_into(&mut self, out: &mut [u8]) -> Result<ReadOutcome> {
        if out.is_empty() {
            return Err(Error::EmptyBuffer);
        }

        let mut offset = 0;
        loop {
            offset += self.drain(&mut out[offset..]);
            if offset == out.len() {
                break;
            }

            match self.stage {
                Stage::Prefix => {
                    self.stage = self.section_after(None);
                }
                Stage::FileHeader(section) => {
                    self.write_file_header(section)?;
                    self.stage = Stage::FileBody(section);
                }
                Stage::FileBody(section) => {
                    let (written, finished) = self.stream_file(section, &mut out[offset..])?;
                    offset += written;
                    if finished {
                        self.next_file(section);
                    }
                }
                Stage::CloseSection(section) => {
                    let kind = self.boundaries.close(&mut self.buffer);
                    tracing::debug!(%section, ?kind, "section complete");
                    self.stage = self.section_after(Some(section));
                }
                Stage::Done => {
                    // Contexts left open would mean an unterminated multipart
                    if self.boundaries.close(&mut self.buffer).is_none() {
                        break;
                    }
                }
            }
        }

        Ok(ReadOutcome {
            written: offset,
            eof: self.is_finished(),
        })
    }

    /// Returns true once every byte of the message has been read.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Done
            && self.position == self.buffer.len()
            && self.boundaries.depth() == 0
    }

    /// Returns the current reader stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Streams the whole remaining message into `writer`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if a file source or the writer fails.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> Result<u64> {
        let mut chunk = vec![0; self.config.write_chunk_size];
        let mut total = 0;
        loop {
            let ReadOutcome { written, eof } = self.read_into(&mut chunk)?;
            writer.write_all(&chunk[..written])?;
            total += written as u64;
            if eof {
                break;
            }
        }
        writer.flush()?;
        Ok(total)
    }

    /// Copies pending buffered bytes into `out`.
    fn drain(&mut self, out: &mut [u8]) -> usize {
        let pending = &self.buffer[self.position..];
        let n = pending.len().min(out.len());
        out[..n].copy_from_slice(&pending[..n]);
        self.position += n;
        if self.position == self.buffer.len() {
            self.buffer.clear();
            self.position = 0;
        }
        n
    }

    /// Picks the stage following `finished` (or the prefix, for `None`).
    fn section_after(&self, finished: Option<Section>) -> Stage {
        let inlines_left = finished.is_none() && !self.inlines.is_empty();
        let attachments_left =
            finished != Some(Section::Attachment) && !self.attachments.is_empty();

        if inlines_left {
            Stage::FileHeader(Section::Inline)
        } else if attachments_left {
            Stage::FileHeader(Section::Attachment)
        } else {
            Stage::Done
        }
    }

    fn next_file(&mut self, section: Section) {
        let (cursor, len) = match section {
            Section::Inline => (&mut self.inline_index, self.inlines.len()),
            Section::Attachment => (&mut self.attachment_index, self.attachments.len()),
        };
        *cursor += 1;
        tracing::trace!(%section, index = *cursor - 1, "file streamed");
        self.stage = if *cursor < len {
            Stage::FileHeader(section)
        } else {
            Stage::CloseSection(section)
        };
    }

    /// Buffers the part header of the current file of `section`.
    fn write_file_header(&mut self, section: Section) -> Result<()> {
        let (files, index) = match section {
            Section::Inline => (&self.inlines, self.inline_index),
            Section::Attachment => (&self.attachments, self.attachment_index),
        };
        let file = file_at(files, section, index)?;

        let codec = self.config.header_codec.as_ref();
        // Columns taken by `name="` and `filename="`
        let name = codec.encode(&file.filename, self.charset(), 6, false);
        let disposition_name = codec.encode(&file.filename, self.charset(), 10, false);

        let content_type = ContentType::parse(&file.mime_type)
            .unwrap_or_else(|_| {
                tracing::warn!(mime_type = %file.mime_type, "invalid file MIME type, using octet-stream");
                ContentType::new("application", "octet-stream")
            })
            .with_quoted_parameter("name", name.as_str());

        let mut headers = Headers::new();
        headers.set("Content-Type", content_type.to_string());
        headers.set(
            "Content-Transfer-Encoding",
            self.encoding.for_files().to_string(),
        );
        if file.size > 0 {
            headers.set("Content-Length", file.size.to_string());
        }
        headers.set(
            "Content-Disposition",
            format!("{section}; filename={}", quote(&disposition_name)),
        );
        if section == Section::Inline {
            let cid = self.cids.cid_for(&file.filename);
            headers.set("Content-ID", format!("<{cid}>"));
        }

        tracing::trace!(%section, index, filename = %file.filename, "file header");
        self.boundaries.create_part(&headers, &mut self.buffer);
        Ok(())
    }

    /// Moves the next piece of the current file towards `out`.
    ///
    /// Unencoded bytes are read straight into `out`; Base64 output goes to
    /// the pending buffer and is drained by the caller. Returns the bytes
    /// written to `out` and whether the file hit end-of-data.
    fn stream_file(&mut self, section: Section, out: &mut [u8]) -> Result<(usize, bool)> {
        let (files, index) = match section {
            Section::Inline => (&mut self.inlines, self.inline_index),
            Section::Attachment => (&mut self.attachments, self.attachment_index),
        };
        let len = files.len();
        let file = files.get_mut(index).ok_or(Error::FileIndexOutOfRange {
            section,
            index,
            len,
        })?;

        if self.encoding.for_files() == TransferEncoding::None {
            let n = read_retrying(&mut file.source, out)?;
            return Ok((n, n == 0));
        }

        // Base64 turns 3 bytes into 4 characters
        let want = (out.len() / 4 * 3).min(self.config.read_chunk_size).max(3);
        self.scratch.resize(want, 0);
        let n = read_retrying(&mut file.source, &mut self.scratch[..want])?;
        if n == 0 {
            self.encoder.finish(&mut self.buffer);
            return Ok((0, true));
        }
        self.encoder.encode(&self.scratch[..n], &mut self.buffer);
        Ok((0, false))
    }
}

fn file_at(files: &[FileRef], section: Section, index: usize) -> Result<&FileRef> {
    files.get(index).ok_or(Error::FileIndexOutOfRange {
        section,
        index,
        len: files.len(),
    })
}

fn read_retrying(source: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}

impl Read for Message {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(self.read_into(buf)?.written)
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
    use crate::config::Config;
    use crate::email::{BodyPart, Email};
    use chrono::{FixedOffset, TimeZone};
    use proptest::prelude::*;

    fn assemble(email: Email) -> Message {
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .unwrap();
        Message::assemble(email, Config::default(), now).unwrap()
    }

    fn read_all(message: &mut Message, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0; chunk];
        loop {
            let outcome = message.read_into(&mut buf).unwrap();
            out.extend_from_slice(&buf[..outcome.written]);
            if outcome.eof {
                return out;
            }
            assert_eq!(outcome.written, chunk, "short read before eof");
        }
    }

    fn full_email() -> Email {
        let mut email = Email::new();
        email.headers.add("From", "sender@example.com");
        email.headers.add("Subject", "Files");
        email.parts.push(BodyPart::text("see attached"));
        email.parts.push(BodyPart::html(r#"<img src="cid:logo.png">"#));
        email.inlines.push(FileRef::from_bytes(
            "logo.png",
            "image/png",
            (0..=255u8).collect::<Vec<_>>(),
        ));
        email.attachments.push(FileRef::from_bytes(
            "notes.txt",
            "text/plain",
            b"attachment body".to_vec(),
        ));
        email.attachments.push(FileRef::from_reader(
            "big.bin",
            "application/octet-stream",
            0,
            io::repeat(0x5A).take(5000),
        ));
        email
    }

    #[test]
    fn test_empty_buffer_is_usage_error() {
        let mut message = assemble(full_email());
        let before = (message.stage(), message.position, message.cursor(Section::Inline));
        let err = message.read_into(&mut []).unwrap_err();
        assert!(matches!(err, Error::EmptyBuffer));
        assert_eq!(
            (message.stage(), message.position, message.cursor(Section::Inline)),
            before
        );
    }

    #[test]
    fn test_io_read_empty_buffer_returns_zero() {
        let mut message = assemble(full_email());
        assert_eq!(message.read(&mut []).unwrap(), 0);
        assert_eq!(message.stage(), Stage::Prefix);
    }

    #[test]
    fn test_prefix_only_matches_buffer() {
        let mut email = Email::new();
        email.parts.push(BodyPart::text("hello"));
        email.parts.push(BodyPart::html("<p>hello</p>"));
        let mut message = assemble(email);
        let prefix = message.buffer.clone();

        let out = read_all(&mut message, 7);
        assert_eq!(out, prefix);
        assert_eq!(out.len(), message.prefix_len());
    }

    #[test]
    fn test_exhaustion_is_idempotent() {
        let mut message = assemble(full_email());
        let _ = read_all(&mut message, 4096);
        assert!(message.is_finished());
        for _ in 0..3 {
            let outcome = message.read_into(&mut [0; 16]).unwrap();
            assert_eq!(outcome, ReadOutcome { written: 0, eof: true });
        }
    }

    #[test]
    fn test_cursors_and_balance() {
        let mut message = assemble(full_email());
        let _ = read_all(&mut message, 100);
        assert_eq!(message.cursor(Section::Inline), 1);
        assert_eq!(message.cursor(Section::Attachment), 2);
        assert_eq!(message.boundary_balance(), (3, 3));
    }

    #[test]
    fn test_inlines_before_attachments() {
        let mut message = assemble(full_email());
        let text = String::from_utf8(read_all(&mut message, 512)).unwrap();
        let inline = text.find("Content-Disposition: inline").unwrap();
        let attachment = text.find("Content-Disposition: attachment").unwrap();
        assert!(inline < attachment);
    }

    #[test]
    fn test_file_header_fields() {
        let mut message = assemble(full_email());
        let text = String::from_utf8(read_all(&mut message, 512)).unwrap();
        assert!(text.contains("Content-Type: image/png; name=\"logo.png\"\r\n"));
        assert!(text.contains("Content-Length: 256\r\n"));
        assert!(text.contains("Content-Disposition: inline; filename=\"logo.png\"\r\n"));
        assert!(text.contains("Content-ID: <20240601.120000.1@mail.0>\r\n"));
        assert!(text.contains("Content-Disposition: attachment; filename=\"big.bin\"\r\n"));
        // Unknown size: no Content-Length for big.bin
        assert_eq!(text.matches("Content-Length:").count(), 2);
    }

    #[test]
    fn test_filename_encoded_per_header() {
        use crate::header::{HeaderCodec, WordEncoder};
        use std::sync::{Arc, Mutex};

        #[derive(Debug)]
        struct Recording(Arc<Mutex<Vec<(String, usize)>>>);
        impl HeaderCodec for Recording {
            fn encode(&self, text: &str, charset: &str, used: usize, limit: bool) -> String {
                self.0.lock().unwrap().push((text.to_string(), used));
                WordEncoder::default().encode(text, charset, used, limit)
            }
        }

        let calls = Arc::new(Mutex::new(Vec::new()));
        let config = Config::builder()
            .header_codec(Recording(Arc::clone(&calls)))
            .build();
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .unwrap();
        let mut message = Message::assemble(full_email(), config, now).unwrap();
        let _ = read_all(&mut message, 4096);

        let calls = calls.lock().unwrap();
        let used: Vec<usize> = calls
            .iter()
            .filter(|(text, _)| text == "notes.txt")
            .map(|(_, used)| *used)
            .collect();
        assert_eq!(used, vec![6, 10]);
    }

    #[test]
    fn test_unencoded_files_are_raw() {
        let mut email = Email::new();
        email.encoding = TransferEncoding::None;
        email.parts.push(BodyPart::text("body"));
        email
            .attachments
            .push(FileRef::from_bytes("raw.txt", "text/plain", b"raw bytes".to_vec()));
        let mut message = assemble(email);
        let text = String::from_utf8(read_all(&mut message, 3)).unwrap();
        assert!(text.contains("Content-Transfer-Encoding: binary\r\n"));
        assert!(text.contains("filename=\"raw.txt\"\r\n\r\nraw bytes\r\n--"));
    }

    #[test]
    fn test_source_error_propagates() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }
        }

        let mut email = Email::new();
        email.parts.push(BodyPart::text("body"));
        email
            .attachments
            .push(FileRef::from_reader("x.bin", "application/octet-stream", 0, Failing));
        let mut message = assemble(email);
        let mut buf = vec![0; 1 << 16];
        let err = message.read_into(&mut buf).unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_interrupted_reads_are_retried() {
        struct Flaky {
            interrupted: bool,
            data: io::Cursor<Vec<u8>>,
        }
        impl Read for Flaky {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(io::ErrorKind::Interrupted.into());
                }
                self.data.read(buf)
            }
        }

        let mut email = Email::new();
        email.parts.push(BodyPart::text("body"));
        email.attachments.push(FileRef::from_reader(
            "f.txt",
            "text/plain",
            3,
            Flaky {
                interrupted: false,
                data: io::Cursor::new(b"abc".to_vec()),
            },
        ));
        let mut message = assemble(email);
        let text = String::from_utf8(read_all(&mut message, 64)).unwrap();
        assert!(text.contains("\r\n\r\nYWJj\r\n--"));
    }

    #[test]
    fn test_write_to_matches_read_into() {
        let mut sink = Vec::new();
        let written = assemble(full_email()).write_to(&mut sink).unwrap();
        assert_eq!(written, sink.len() as u64);

        let mut via_io = Vec::new();
        io::copy(&mut assemble(full_email()), &mut via_io).unwrap();
        // Boundaries differ per message, so compare lengths
        assert_eq!(via_io.len(), sink.len());
    }

    #[test]
    fn test_write_to_with_smallest_chunk() {
        let config = Config::builder().write_chunk_size(0).build();
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .unwrap();
        let mut message = Message::assemble(full_email(), config, now).unwrap();

        let mut sink = Vec::new();
        let written = message.write_to(&mut sink).unwrap();
        assert_eq!(written, sink.len() as u64);
        assert!(message.is_finished());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn prop_output_length_independent_of_chunk(chunk in 1usize..2000) {
            let reference = read_all(&mut assemble(full_email()), 1 << 20).len();
            let len = read_all(&mut assemble(full_email()), chunk).len();
            prop_assert_eq!(len, reference);
        }
    }
}

//! Round-trip tests: messages produced by the streaming reader are decoded
//! with an independent MIME parser.

#![allow(clippy::unwrap_used, clippy::cast_possible_truncation)]

use std::io::{self, Read};

use chrono::{DateTime, FixedOffset, TimeZone};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail, parse_mail};
use mimestream::{BodyPart, Config, Email, Error, FileRef, Message, Section, TransferEncoding};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn now() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2024, 2, 29, 18, 30, 0)
        .unwrap()
}

fn assemble(email: Email) -> Message {
    Message::assemble(email, Config::default(), now()).unwrap()
}

/// Reads the message to exhaustion with a fixed output region size.
fn read_all(message: &mut Message, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0; chunk];
    loop {
        let outcome = message.read_into(&mut buf).unwrap();
        out.extend_from_slice(&buf[..outcome.written]);
        if outcome.eof {
            return out;
        }
    }
}

fn base_email() -> Email {
    let mut email = Email::new();
    email.headers.add("From", "sender@example.com");
    email.headers.add("To", "recipient@example.com");
    email.headers.add("Subject", "test");
    email
}

fn content_id(part: &ParsedMail<'_>) -> Option<String> {
    part.get_headers()
        .get_first_value("Content-ID")
        .map(|v| v.trim_matches(|c| c == '<' || c == '>').to_string())
}

#[test]
fn single_plain_part_without_encoding() {
    init_tracing();
    let mut email = base_email();
    email.encoding = TransferEncoding::None;
    email.parts.push(BodyPart::text("just test\r\n"));

    let mut message = assemble(email);
    let raw = String::from_utf8(read_all(&mut message, 64)).unwrap();

    let expected = concat!(
        "From: sender@example.com\r\n",
        "To: recipient@example.com\r\n",
        "Subject: test\r\n",
        "Date: Thu, 29 Feb 2024 18:30:00 +0000\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "Content-Transfer-Encoding: binary\r\n",
        "\r\n",
        "just test\r\n",
    );
    assert_eq!(raw, expected);
    assert!(message.boundary().is_none());
}

#[test]
fn one_attachment_base64() {
    init_tracing();
    let data = b"twelve bytes".to_vec();
    assert_eq!(data.len(), 12);

    let mut email = base_email();
    email.encoding = TransferEncoding::Base64;
    email.parts.push(BodyPart::text("see attachment"));
    email
        .attachments
        .push(FileRef::from_bytes("data.txt", "text/plain", data.clone()));

    let mut message = assemble(email);
    let boundary = message.boundary().unwrap().to_string();
    let raw = read_all(&mut message, 5);
    let text = String::from_utf8(raw.clone()).unwrap();

    assert_eq!(text.matches("multipart/mixed").count(), 1);
    assert_eq!(text.matches(&format!("--{boundary}\r\n")).count(), 2);
    assert_eq!(text.matches(&format!("--{boundary}--\r\n")).count(), 1);

    let parsed = parse_mail(&raw).unwrap();
    assert_eq!(parsed.ctype.mimetype, "multipart/mixed");
    assert_eq!(parsed.subparts.len(), 2);

    let body = &parsed.subparts[0];
    assert_eq!(
        body.get_headers().get_first_value("Content-Transfer-Encoding"),
        Some("base64".to_string())
    );
    assert_eq!(body.get_body_raw().unwrap(), b"see attachment");

    let attachment = &parsed.subparts[1];
    assert_eq!(
        attachment.get_content_disposition().disposition,
        DispositionType::Attachment
    );
    assert_eq!(attachment.get_body_raw().unwrap(), data);
}

#[test]
fn inline_content_id_matches_html_reference() {
    init_tracing();
    let logo: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();

    for chunk in [1, 3, 77, 1 << 20] {
        let mut email = base_email();
        email
            .parts
            .push(BodyPart::html(r#"<p><img src="cid:logo.png"></p>"#));
        email
            .inlines
            .push(FileRef::from_bytes("logo.png", "image/png", logo.clone()));

        let mut message = assemble(email);
        let raw = read_all(&mut message, chunk);
        let parsed = parse_mail(&raw).unwrap();
        assert_eq!(parsed.ctype.mimetype, "multipart/related");

        let html = String::from_utf8(parsed.subparts[0].get_body_raw().unwrap()).unwrap();
        let image = &parsed.subparts[1];
        let cid = content_id(image).unwrap();

        assert_eq!(cid, "20240229.183000.1@mail.0");
        assert!(html.contains(&format!(r#"src="cid:{cid}""#)), "chunk {chunk}: {html}");
        assert_eq!(image.get_body_raw().unwrap(), logo);
        assert_eq!(
            image.get_content_disposition().disposition,
            DispositionType::Inline
        );
    }
}

#[test]
fn full_nesting_decodes() {
    init_tracing();
    let mut email = base_email();
    email.parts.push(BodyPart::text("plain version"));
    email
        .parts
        .push(BodyPart::html(r#"<img src="cid:a.png"><img src="cid:b.png">"#));
    email
        .inlines
        .push(FileRef::from_bytes("a.png", "image/png", vec![1; 10]));
    email
        .inlines
        .push(FileRef::from_bytes("b.png", "image/png", vec![2; 20]));
    email
        .attachments
        .push(FileRef::from_bytes("x.pdf", "application/pdf", vec![3; 3000]));
    email.attachments.push(FileRef::from_reader(
        "y.bin",
        "application/octet-stream",
        0,
        io::repeat(4).take(70_000),
    ));

    let mut message = assemble(email);
    let raw = read_all(&mut message, 333);
    assert_eq!(message.boundary_balance(), (3, 3));

    let parsed = parse_mail(&raw).unwrap();
    assert_eq!(parsed.ctype.mimetype, "multipart/mixed");
    assert_eq!(parsed.subparts.len(), 3);

    let related = &parsed.subparts[0];
    assert_eq!(related.ctype.mimetype, "multipart/related");
    assert_eq!(related.subparts.len(), 3);

    let alternative = &related.subparts[0];
    assert_eq!(alternative.ctype.mimetype, "multipart/alternative");
    assert_eq!(alternative.subparts[0].ctype.mimetype, "text/plain");
    assert_eq!(alternative.subparts[1].ctype.mimetype, "text/html");
    assert_eq!(
        alternative.subparts[0].get_body().unwrap().trim_end(),
        "plain version"
    );

    let html = alternative.subparts[1].get_body().unwrap();
    for (inline, expected) in related.subparts[1..].iter().zip([vec![1; 10], vec![2; 20]]) {
        let cid = content_id(inline).unwrap();
        assert!(html.contains(&format!("cid:{cid}")));
        assert_eq!(inline.get_body_raw().unwrap(), expected);
    }

    assert_eq!(parsed.subparts[1].get_body_raw().unwrap(), vec![3; 3000]);
    assert_eq!(parsed.subparts[2].get_body_raw().unwrap(), vec![4; 70_000]);
    assert_eq!(
        parsed.subparts[2]
            .get_content_disposition()
            .params
            .get("filename")
            .map(String::as_str),
        Some("y.bin")
    );
}

#[test]
fn boundaries_balance_for_every_shape() {
    init_tracing();
    for attachments in [false, true] {
        for inlines in [false, true] {
            for parts in [1, 2] {
                let mut email = base_email();
                email.parts.push(BodyPart::text("text"));
                if parts == 2 {
                    email.parts.push(BodyPart::html("<p>text</p>"));
                }
                if inlines {
                    email
                        .inlines
                        .push(FileRef::from_bytes("i.gif", "image/gif", vec![9; 40]));
                }
                if attachments {
                    email
                        .attachments
                        .push(FileRef::from_bytes("a.bin", "application/octet-stream", vec![8; 40]));
                }

                let expected_layers =
                    usize::from(attachments) + usize::from(inlines) + usize::from(parts == 2);

                let mut message = assemble(email);
                let raw = read_all(&mut message, 50);
                assert!(message.is_finished());
                assert_eq!(
                    message.boundary_balance(),
                    (expected_layers, expected_layers),
                    "attachments={attachments} inlines={inlines} parts={parts}"
                );
                assert_eq!(message.cursor(Section::Inline), usize::from(inlines));
                assert_eq!(message.cursor(Section::Attachment), usize::from(attachments));

                let parsed = parse_mail(&raw).unwrap();
                let top = match (attachments, inlines, parts) {
                    (true, _, _) => "multipart/mixed",
                    (false, true, _) => "multipart/related",
                    (false, false, 2) => "multipart/alternative",
                    _ => "text/plain",
                };
                assert_eq!(parsed.ctype.mimetype, top);
            }
        }
    }
}

#[test]
fn prefix_only_round_trip_size() {
    let mut email = base_email();
    email.parts.push(BodyPart::text("a".repeat(5000)));
    email.parts.push(BodyPart::html("<p>é</p>"));

    let mut message = assemble(email);
    let prefix_len = message.prefix_len();
    assert_eq!(message.estimated_size(), prefix_len as u64 + (40 + 4) * 2 * 2);
    let raw = read_all(&mut message, 100);
    assert_eq!(raw.len(), prefix_len);
}

#[test]
fn empty_buffer_leaves_state_untouched() {
    let mut email = base_email();
    email.parts.push(BodyPart::text("text"));
    email
        .attachments
        .push(FileRef::from_bytes("a.bin", "application/octet-stream", vec![1; 10]));
    let mut message = assemble(email);

    let mut buf = vec![0; 10];
    let _ = message.read_into(&mut buf).unwrap();
    let stage = message.stage();

    let err = message.read_into(&mut []).unwrap_err();
    assert!(matches!(err, Error::EmptyBuffer));
    assert!(err.is_usage());
    assert_eq!(message.stage(), stage);
    assert_eq!(message.cursor(Section::Attachment), 0);

    let rest = read_all(&mut message, 64);
    assert!(!rest.is_empty());
}

#[test]
fn read_after_eof_returns_nothing() {
    let mut email = base_email();
    email.parts.push(BodyPart::text("text"));
    let mut message = assemble(email);
    let _ = read_all(&mut message, 8);

    let mut buf = [0u8; 8];
    for _ in 0..2 {
        let outcome = message.read_into(&mut buf).unwrap();
        assert_eq!(outcome.written, 0);
        assert!(outcome.eof);
    }
    assert_eq!(message.read(&mut buf).unwrap(), 0);
}

#[test]
fn file_from_disk() {
    let dir = std::env::temp_dir().join(format!("mimestream-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("notes.txt");
    std::fs::write(&path, b"from disk\n").unwrap();

    let file = FileRef::open(&path).unwrap();
    assert_eq!(file.filename, "notes.txt");
    assert_eq!(file.mime_type, "text/plain");
    assert_eq!(file.size, 10);

    let mut email = base_email();
    email.parts.push(BodyPart::text("see file"));
    email.attachments.push(file);

    let mut sink = Vec::new();
    let written = Message::new(email).unwrap().write_to(&mut sink).unwrap();
    assert_eq!(written, sink.len() as u64);

    let parsed = parse_mail(&sink).unwrap();
    assert_eq!(parsed.subparts[1].get_body_raw().unwrap(), b"from disk\n");

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn non_ascii_filename_is_encoded() {
    let mut email = base_email();
    email.parts.push(BodyPart::text("text"));
    email
        .attachments
        .push(FileRef::from_bytes("résumé.pdf", "application/pdf", vec![0; 4]));

    let mut message = assemble(email);
    let raw = read_all(&mut message, 4096);
    let text = String::from_utf8(raw.clone()).unwrap();
    assert!(text.contains("name=\"=?utf-8?B?"));

    let parsed = parse_mail(&raw).unwrap();
    assert_eq!(parsed.subparts[1].get_body_raw().unwrap(), vec![0; 4]);
}

#[test]
fn css_url_reference_shares_inline_id() {
    let mut email = base_email();
    email.parts.push(BodyPart::html(
        r#"<img src="cid:logo.png"><div style="background:url(cid:logo.png)">"#,
    ));
    email
        .inlines
        .push(FileRef::from_bytes("logo.png", "image/png", vec![5; 64]));

    let mut message = assemble(email);
    let raw = read_all(&mut message, 16);
    let parsed = parse_mail(&raw).unwrap();

    let html = parsed.subparts[0].get_body().unwrap();
    let cid = content_id(&parsed.subparts[1]).unwrap();
    assert_eq!(html.matches("cid:logo.png").count(), 0);
    assert_eq!(html.matches(&format!("cid:{cid}")).count(), 2);
}

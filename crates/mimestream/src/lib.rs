//! # mimestream
//!
//! Streaming MIME message assembler for email.
//!
//! ## Features
//!
//! - **Lazy attachments**: file content is encoded while the message is
//!   read, never held in memory as a whole
//! - **Multipart layout**: mixed, related and alternative contexts chosen from
//!   the shape of the email
//! - **Encoders**: Quoted-Printable, line-wrapped Base64, RFC 2047 header words
//! - **Inline resources**: `cid:` references rewritten to generated
//!   Content-IDs that match the inline file headers
//!
//! ## Quick Start
//!
//! ```no_run
//! use mimestream::{BodyPart, Email, FileRef, Message};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut email = Email::new();
//! email.headers.add("From", "sender@example.com");
//! email.headers.add("To", "recipient@example.com");
//! email.headers.add("Subject", "Report");
//! email.parts.push(BodyPart::text("Numbers attached."));
//! email.parts.push(BodyPart::html(r#"<img src="cid:chart.png"> Numbers attached."#));
//! email.inlines.push(FileRef::open("chart.png")?);
//! email.attachments.push(FileRef::open("report.pdf")?);
//!
//! let mut message = Message::new(email)?;
//! println!("about {} bytes", message.estimated_size());
//!
//! let mut out = std::fs::File::create("report.eml")?;
//! message.write_to(&mut out)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Pulling chunks
//!
//! ```
//! use mimestream::{BodyPart, Email, Message};
//!
//! let mut email = Email::new();
//! email.parts.push(BodyPart::text("Hello, World!"));
//! let mut message = Message::new(email).unwrap();
//!
//! let mut buf = [0u8; 64];
//! let mut raw = Vec::new();
//! loop {
//!     let chunk = message.read_into(&mut buf).unwrap();
//!     raw.extend_from_slice(&buf[..chunk.written]);
//!     if chunk.eof {
//!         break;
//!     }
//! }
//! assert!(raw.ends_with(b"\r\n\r\nHello, World!"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod boundary;
mod cid;
mod config;
mod content_type;
mod email;
mod error;
mod header;
mod message;
mod reader;

pub mod encoding;

pub use boundary::{BoundaryStack, MultipartKind, make_boundary};
pub use cid::CidTable;
pub use config::{Config, ConfigBuilder};
pub use content_type::ContentType;
pub use email::{BodyPart, Email, FileRef, FileSource, Section, TransferEncoding, guess_mime_type};
pub use error::{Error, Result};
pub use header::{HeaderCodec, Headers, WordEncoder};
pub use message::Message;
pub use reader::{ReadOutcome, Stage};

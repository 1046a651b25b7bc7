//! Plain-text RFC 5322 message rendering.

use std::fmt::Write;

use base64::Engine;
use chrono::{DateTime, Utc};

use crate::address::Mailbox;

/// Longest encoded-word payload we emit before splitting (RFC 2047 limits a
/// whole encoded-word to 75 characters).
const ENCODED_CHUNK_BYTES: usize = 45;

/// A single-part plain-text message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Sender mailbox.
    pub from: Mailbox,
    /// Recipient mailbox.
    pub to: Mailbox,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// Value of the `Date` header.
    pub date: DateTime<Utc>,
    /// Value of the `Message-ID` header, without angle brackets.
    pub message_id: String,
}

impl Message {
    /// Creates a message dated now with a generated `Message-ID`.
    #[must_use]
    pub fn new(
        from: Mailbox,
        to: Mailbox,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let date = Utc::now();
        let message_id = format!(
            "{}.{}@{}",
            date.timestamp_nanos_opt().unwrap_or_default(),
            std::process::id(),
            from.address.domain()
        );
        Self {
            from,
            to,
            subject: subject.into(),
            body: body.into(),
            date,
            message_id,
        }
    }

    /// Renders headers and body with CRLF line endings.
    #[must_use]
    pub fn to_rfc5322(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "From: {}\r\n", format_mailbox(&self.from));
        let _ = write!(out, "To: {}\r\n", format_mailbox(&self.to));
        let _ = write!(out, "Subject: {}\r\n", encode_header_text(&self.subject));
        let _ = write!(out, "Date: {}\r\n", self.date.to_rfc2822());
        let _ = write!(out, "Message-ID: <{}>\r\n", self.message_id);
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        out.push_str("Content-Transfer-Encoding: 8bit\r\n");
        out.push_str("\r\n");
        for line in self.body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }
}

fn format_mailbox(mailbox: &Mailbox) -> String {
    match &mailbox.name {
        Some(name) if name.bytes().all(|b| (0x20..0x7f).contains(&b)) => {
            let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\" <{}>", mailbox.address)
        }
        Some(name) => format!("{} <{}>", encode_header_text(name), mailbox.address),
        None => format!("<{}>", mailbox.address),
    }
}

/// Encodes header text as RFC 2047 `B` encoded-words when it is not plain
/// printable ASCII. Chunks never split a UTF-8 character.
#[must_use]
pub fn encode_header_text(text: &str) -> String {
    let printable = text.bytes().all(|b| (0x20..0x7f).contains(&b));
    if printable {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_CHUNK_BYTES {
            words.push(encoded_word(&chunk));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(encoded_word(&chunk));
    }
    words.join("\r\n ")
}

fn encoded_word(chunk: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(chunk.as_bytes());
    format!("=?utf-8?B?{encoded}?=")
}

/// Normalises line endings to CRLF and applies dot-stuffing for `DATA`.
///
/// The returned bytes end with CRLF but do not include the terminating
/// `.` line.
#[must_use]
pub fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 16);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    let body = body.strip_suffix(b"\r").unwrap_or(body);
    if body.is_empty() {
        return out;
    }
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out
}

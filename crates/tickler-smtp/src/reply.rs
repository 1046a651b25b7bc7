//! Server replies and their parser.
//!
//! SMTP replies are single-line (`250 OK`) or multi-line, where every line but
//! the last uses `-` after the code (`250-first`, `250-second`, `250 last`).

use crate::error::{Error, Result};

/// Three-digit SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_OK: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);

    /// Creates a reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true for 2xx codes.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true for 3xx codes.
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A complete (possibly multi-line) server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code.
    pub code: ReplyCode,
    /// Text of each reply line, without the code prefix.
    pub lines: Vec<String>,
}

impl Reply {
    /// Returns true for 2xx replies.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns the reply text joined with spaces.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// Converts a reply into `Ok` if its code is `expected`, or into a rejection.
    pub(crate) fn expect(self, command: &'static str, expected: ReplyCode) -> Result<Self> {
        if self.code == expected {
            Ok(self)
        } else {
            Err(Error::rejected(command, self.code.as_u16(), self.text()))
        }
    }

    /// Converts a reply into `Ok` if it is any 2xx, or into a rejection.
    pub(crate) fn expect_success(self, command: &'static str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::rejected(command, self.code.as_u16(), self.text()))
        }
    }
}

/// Returns true if `line` terminates a reply (`NNN ` or a bare `NNN`).
#[must_use]
pub fn is_final_line(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() == 3 || (bytes.len() >= 4 && bytes[3] == b' ')
}

/// Parses the collected lines of one reply.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if a line is too short, the code is not numeric,
/// or the lines disagree on the code.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let first = lines
        .first()
        .ok_or_else(|| Error::Protocol("empty reply".into()))?;
    let code = parse_code(first)?;

    let mut text = Vec::with_capacity(lines.len());
    for line in lines {
        if parse_code(line)? != code {
            return Err(Error::Protocol(format!(
                "reply code changed mid-reply: {line}"
            )));
        }
        text.push(line.get(4..).unwrap_or_default().to_string());
    }

    Ok(Reply {
        code: ReplyCode::new(code),
        lines: text,
    })
}

fn parse_code(line: &str) -> Result<u16> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::Protocol(format!("malformed reply line: {line}")))?;
    if line.len() > 3 && !matches!(line.as_bytes()[3], b' ' | b'-') {
        return Err(Error::Protocol(format!("malformed reply line: {line}")));
    }
    digits
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid reply code: {digits}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_single_line() {
        let reply = parse_reply(&lines(&["250 OK"])).unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.lines, vec!["OK"]);
        assert!(reply.is_success());
    }

    #[test]
    fn parses_multi_line_ehlo() {
        let reply = parse_reply(&lines(&[
            "250-smtp.example.com greets you",
            "250-STARTTLS",
            "250 AUTH PLAIN LOGIN",
        ]))
        .unwrap();
        assert_eq!(reply.lines.len(), 3);
        assert_eq!(reply.lines[2], "AUTH PLAIN LOGIN");
    }

    #[test]
    fn bare_code_is_a_final_line() {
        assert!(is_final_line("250"));
        assert!(is_final_line("250 OK"));
        assert!(!is_final_line("250-more"));
        assert!(!is_final_line("25"));
        let reply = parse_reply(&lines(&["354"])).unwrap();
        assert_eq!(reply.code, ReplyCode::START_DATA);
        assert_eq!(reply.lines, vec![""]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_reply(&[]).is_err());
        assert!(parse_reply(&lines(&["ABC OK"])).is_err());
        assert!(parse_reply(&lines(&["25"])).is_err());
        assert!(parse_reply(&lines(&["250xOK"])).is_err());
    }

    #[test]
    fn rejects_code_change_mid_reply() {
        assert!(parse_reply(&lines(&["250-first", "550 last"])).is_err());
    }

    #[test]
    fn expect_maps_to_rejection() {
        let reply = parse_reply(&lines(&["550 5.1.1 no such user"])).unwrap();
        let err = reply.expect_success("RCPT").unwrap_err();
        assert_eq!(err.reply_code(), Some(550));
        assert!(err.is_permanent());
    }
}

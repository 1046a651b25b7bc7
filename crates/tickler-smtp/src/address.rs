//! Envelope addresses and display mailboxes.

use crate::error::{Error, Result};

/// Email address used in the SMTP envelope (`MAIL FROM` / `RCPT TO`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates an address after basic syntactic validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the address is empty, lacks a
    /// single `@` with non-empty parts, or contains whitespace or angle brackets.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let trimmed = addr.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidAddress("address cannot be empty".into()));
        }
        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(format!(
                "{trimmed}: contains whitespace or angle brackets"
            )));
        }
        match trimmed.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
            {
                Ok(Self(trimmed.to_string()))
            }
            _ => Err(Error::InvalidAddress(format!(
                "{trimmed}: expected local@domain"
            ))),
        }
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the domain part.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    /// Returns true if the address needs the SMTPUTF8 extension.
    #[must_use]
    pub fn is_ascii(&self) -> bool {
        self.0.is_ascii()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Address with an optional display name, as used in message headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name (optional).
    pub name: Option<String>,
    /// Email address.
    pub address: Address,
}

impl Mailbox {
    /// Creates a mailbox without a display name.
    #[must_use]
    pub const fn new(address: Address) -> Self {
        Self {
            name: None,
            address,
        }
    }

    /// Creates a mailbox with a display name. Blank names are dropped.
    #[must_use]
    pub fn with_name(name: impl Into<String>, address: Address) -> Self {
        let name = name.into();
        let name = name.trim();
        Self {
            name: (!name.is_empty()).then(|| name.to_string()),
            address,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_address() {
        let addr = Address::new("cliente@example.com").unwrap();
        assert_eq!(addr.as_str(), "cliente@example.com");
        assert_eq!(addr.domain(), "example.com");
        assert!(addr.is_ascii());
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let addr = Address::new("  user@example.com \n").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in [
            "",
            "userexample.com",
            "@example.com",
            "user@",
            "a@b@c",
            "user name@example.com",
            "<user@example.com>",
        ] {
            assert!(Address::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn parses_from_str() {
        let addr: Address = "x@y.org".parse().unwrap();
        assert_eq!(addr.to_string(), "x@y.org");
    }

    #[test]
    fn blank_display_name_is_dropped() {
        let addr = Address::new("x@y.org").unwrap();
        assert_eq!(Mailbox::with_name("   ", addr.clone()).name, None);
        assert_eq!(
            Mailbox::with_name(" Ana ", addr).name.as_deref(),
            Some("Ana")
        );
    }
}

//! Server capabilities advertised in the EHLO reply.

/// SASL mechanisms the client knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN (RFC 4616), sent as an initial response.
    Plain,
    /// LOGIN, the legacy two-step username/password exchange.
    Login,
}

impl AuthMechanism {
    /// Parses a mechanism name; unknown mechanisms yield `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if name.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    /// Returns the mechanism name as sent in `AUTH`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

/// What the server said it supports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Server name from the first EHLO line.
    pub server_name: String,
    /// STARTTLS is offered.
    pub starttls: bool,
    /// Supported authentication mechanisms, in advertised order.
    pub auth: Vec<AuthMechanism>,
    /// Maximum message size (`SIZE n`, zero meaning no limit).
    pub max_size: Option<usize>,
    /// 8BITMIME is offered.
    pub eight_bit_mime: bool,
    /// SMTPUTF8 is offered.
    pub smtp_utf8: bool,
}

impl Capabilities {
    /// Builds capabilities from the lines of an EHLO reply.
    #[must_use]
    pub fn from_ehlo(lines: &[String]) -> Self {
        let mut caps = Self {
            server_name: lines
                .first()
                .and_then(|line| line.split_whitespace().next())
                .unwrap_or_default()
                .to_string(),
            ..Self::default()
        };

        for line in lines.iter().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };
            match keyword.to_ascii_uppercase().as_str() {
                "STARTTLS" => caps.starttls = true,
                "AUTH" => {
                    for mechanism in words.filter_map(AuthMechanism::parse) {
                        if !caps.auth.contains(&mechanism) {
                            caps.auth.push(mechanism);
                        }
                    }
                }
                "SIZE" => {
                    caps.max_size = words
                        .next()
                        .and_then(|n| n.parse().ok())
                        .filter(|n: &usize| *n > 0);
                }
                "8BITMIME" => caps.eight_bit_mime = true,
                "SMTPUTF8" => caps.smtp_utf8 = true,
                _ => {}
            }
        }

        caps
    }

    /// Picks the mechanism to authenticate with, preferring PLAIN.
    #[must_use]
    pub fn preferred_auth(&self) -> Option<AuthMechanism> {
        if self.auth.contains(&AuthMechanism::Plain) {
            Some(AuthMechanism::Plain)
        } else {
            self.auth.first().copied()
        }
    }
}

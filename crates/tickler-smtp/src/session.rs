//! One SMTP conversation: greeting, EHLO, optional STARTTLS and AUTH, then
//! any number of mail transactions until QUIT.

use base64::Engine;
use tracing::{debug, trace};

use crate::address::Address;
use crate::capability::{AuthMechanism, Capabilities};
use crate::error::{Error, Result};
use crate::message::dot_stuff;
use crate::reply::{Reply, ReplyCode, is_final_line, parse_reply};
use crate::stream::{self, SmtpStream};

/// How the connection to the relay is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plain TCP. Only sensible for a local relay.
    None,
    /// Implicit TLS from the first byte (port 465).
    #[default]
    Tls,
    /// Plain TCP upgraded with STARTTLS (port 587).
    StartTls,
}

impl Security {
    /// Conventional port for the mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::Tls => 465,
            Self::StartTls => 587,
        }
    }
}

/// Username and password for `AUTH`.
#[derive(Clone)]
pub struct Credentials {
    /// Login name, usually the mailbox address.
    pub username: String,
    /// Password or app password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An open SMTP session.
#[derive(Debug)]
pub struct Session {
    stream: SmtpStream,
    capabilities: Capabilities,
}

impl Session {
    /// Connects to `host:port`, reads the greeting, sends EHLO and, for
    /// [`Security::StartTls`], upgrades the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, handshake, or upgrade fails.
    pub async fn connect(
        host: &str,
        port: u16,
        security: Security,
        hello_name: &str,
    ) -> Result<Self> {
        let stream = match security {
            Security::Tls => stream::connect_tls(host, port).await?,
            Security::None | Security::StartTls => stream::connect(host, port).await?,
        };
        let session = Self::handshake(stream, hello_name).await?;
        if security == Security::StartTls {
            session.starttls(host, hello_name).await
        } else {
            Ok(session)
        }
    }

    /// Reads the server greeting and introduces the client with EHLO,
    /// falling back to HELO for servers that do not speak ESMTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting or both introductions are rejected.
    pub async fn handshake(stream: SmtpStream, hello_name: &str) -> Result<Self> {
        let mut session = Self {
            stream,
            capabilities: Capabilities::default(),
        };
        session
            .read_reply()
            .await?
            .expect("greeting", ReplyCode::SERVICE_READY)?;
        session.ehlo(hello_name).await?;
        Ok(session)
    }

    /// What the server advertised in its latest EHLO reply.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Returns true once the session runs over TLS.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.stream.is_encrypted()
    }

    async fn ehlo(&mut self, hello_name: &str) -> Result<()> {
        let reply = self.command(&format!("EHLO {hello_name}")).await?;
        if reply.is_success() {
            self.capabilities = Capabilities::from_ehlo(&reply.lines);
            return Ok(());
        }

        debug!("EHLO refused with {}, retrying with HELO", reply.code);
        let reply = self
            .command(&format!("HELO {hello_name}"))
            .await?
            .expect_success("HELO")?;
        self.capabilities = Capabilities {
            server_name: reply.lines.first().cloned().unwrap_or_default(),
            ..Capabilities::default()
        };
        Ok(())
    }

    /// Upgrades the session with STARTTLS and repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the server does not offer STARTTLS,
    /// or an error if the command or TLS handshake fails.
    pub async fn starttls(mut self, host: &str, hello_name: &str) -> Result<Self> {
        if !self.capabilities.starttls {
            return Err(Error::NotSupported("STARTTLS".into()));
        }
        self.command("STARTTLS").await?.expect_success("STARTTLS")?;

        let mut upgraded = Self {
            stream: self.stream.upgrade_to_tls(host).await?,
            capabilities: Capabilities::default(),
        };
        upgraded.ehlo(hello_name).await?;
        Ok(upgraded)
    }

    /// Authenticates with the best mechanism the server offers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthenticationFailed`] if the credentials are refused,
    /// [`Error::NotSupported`] if no known mechanism is offered.
    pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        let mechanism = self
            .capabilities
            .preferred_auth()
            .ok_or_else(|| Error::NotSupported("AUTH PLAIN or AUTH LOGIN".into()))?;
        debug!(
            "Authenticating as {} with {}",
            credentials.username,
            mechanism.as_str()
        );

        let reply = match mechanism {
            AuthMechanism::Plain => {
                let token = b64(&format!(
                    "\0{}\0{}",
                    credentials.username, credentials.password
                ));
                self.secret_command(&format!("AUTH PLAIN {token}")).await?
            }
            AuthMechanism::Login => {
                self.command("AUTH LOGIN")
                    .await?
                    .expect("AUTH", ReplyCode::AUTH_CONTINUE)?;
                self.secret_command(&b64(&credentials.username))
                    .await?
                    .expect("AUTH", ReplyCode::AUTH_CONTINUE)?;
                self.secret_command(&b64(&credentials.password)).await?
            }
        };

        match reply.code {
            ReplyCode::AUTH_OK => Ok(()),
            ReplyCode::AUTH_FAILED => Err(Error::AuthenticationFailed(reply.text())),
            code => Err(Error::rejected("AUTH", code.as_u16(), reply.text())),
        }
    }

    /// Runs one mail transaction: MAIL FROM, RCPT TO for every recipient,
    /// then DATA with the rendered message.
    ///
    /// # Errors
    ///
    /// Returns an error if any step is rejected, the message exceeds the
    /// advertised size, or an address needs SMTPUTF8 the server lacks.
    pub async fn send_mail(&mut self, from: &Address, to: &[Address], message: &[u8]) -> Result<()> {
        if to.is_empty() {
            return Err(Error::InvalidAddress("no recipients specified".into()));
        }
        if let Some(limit) = self.capabilities.max_size
            && message.len() > limit
        {
            return Err(Error::MessageTooLarge {
                size: message.len(),
                limit,
            });
        }

        let needs_utf8 = !from.is_ascii() || to.iter().any(|addr| !addr.is_ascii());
        if needs_utf8 && !self.capabilities.smtp_utf8 {
            return Err(Error::NotSupported("SMTPUTF8".into()));
        }

        let mut mail_from = format!("MAIL FROM:<{from}>");
        if self.capabilities.eight_bit_mime && !message.is_ascii() {
            mail_from.push_str(" BODY=8BITMIME");
        }
        if self.capabilities.max_size.is_some() {
            mail_from.push_str(&format!(" SIZE={}", message.len()));
        }
        if needs_utf8 {
            mail_from.push_str(" SMTPUTF8");
        }
        self.command(&mail_from).await?.expect_success("MAIL")?;

        for recipient in to {
            self.command(&format!("RCPT TO:<{recipient}>"))
                .await?
                .expect_success("RCPT")?;
        }

        self.command("DATA")
            .await?
            .expect("DATA", ReplyCode::START_DATA)?;
        let mut data = dot_stuff(message);
        data.extend_from_slice(b".\r\n");
        self.stream.write_all(&data).await?;
        self.read_reply().await?.expect_success("DATA")?;
        Ok(())
    }

    /// Aborts the current transaction with RSET.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects RSET.
    pub async fn reset(&mut self) -> Result<()> {
        self.command("RSET").await?.expect_success("RSET")?;
        Ok(())
    }

    /// Sends QUIT and closes the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the server answers QUIT with an error.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.command("QUIT").await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(Error::rejected("QUIT", reply.code.as_u16(), reply.text()))
        }
    }

    async fn command(&mut self, line: &str) -> Result<Reply> {
        trace!("C: {line}");
        self.send_line(line).await
    }

    async fn secret_command(&mut self, line: &str) -> Result<Reply> {
        trace!("C: <credentials>");
        self.send_line(line).await
    }

    async fn send_line(&mut self, line: &str) -> Result<Reply> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.stream.write_all(&data).await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = self.stream.read_line().await?;
            if line.is_empty() {
                continue;
            }
            let last = is_final_line(&line);
            lines.push(line);
            if last {
                break;
            }
        }
        let reply = parse_reply(&lines)?;
        trace!("S: {} {}", reply.code, reply.text());
        Ok(reply)
    }
}

fn b64(text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(text.as_bytes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_follow_security_mode() {
        assert_eq!(Security::None.default_port(), 25);
        assert_eq!(Security::Tls.default_port(), 465);
        assert_eq!(Security::StartTls.default_port(), 587);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            username: "avisos@example.com".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("avisos@example.com"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn plain_token_layout() {
        assert_eq!(b64("\0user\0pass"), "AHVzZXIAcGFzcw==");
    }
}

//! SMTP-backed delivery transport.

use async_trait::async_trait;
use tickler_smtp::{Address, Credentials, Mailbox, Message, Security, Session};
use tracing::debug;

use super::{DeliveryTransport, TransportError};
use crate::config::SmtpSettings;
use crate::{Error, Result};

/// Delivers each reminder over its own SMTP session.
///
/// A session is opened, authenticated, used for one message and closed with
/// QUIT. The whole exchange is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    host: String,
    port: u16,
    security: Security,
    hello_name: String,
    credentials: Option<Credentials>,
    sender: Mailbox,
    timeout: std::time::Duration,
}

impl SmtpTransport {
    /// Builds a transport from relay settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no valid sender address is configured.
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        if settings.host.trim().is_empty() {
            return Err(Error::Config("smtp.host cannot be empty".into()));
        }
        Ok(Self {
            host: settings.host.clone(),
            port: settings.effective_port(),
            security: settings.security.into(),
            hello_name: settings.hello_name.clone(),
            credentials: settings.credentials(),
            sender: settings.sender()?,
            timeout: settings.timeout(),
        })
    }

    async fn deliver(&self, to: Address, subject: &str, body: &str) -> tickler_smtp::Result<()> {
        let mut session =
            Session::connect(&self.host, self.port, self.security, &self.hello_name).await?;
        if let Some(credentials) = &self.credentials {
            session.authenticate(credentials).await?;
        }

        let message = Message::new(self.sender.clone(), Mailbox::new(to.clone()), subject, body);
        session
            .send_mail(
                &self.sender.address,
                std::slice::from_ref(&to),
                message.to_rfc5322().as_bytes(),
            )
            .await?;

        // The message is accepted once DATA succeeds
        if let Err(e) = session.quit().await {
            debug!("QUIT after delivery to {to} failed: {e}");
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryTransport for SmtpTransport {
    async fn send(
        &self,
        address: &str,
        subject: &str,
        body: &str,
    ) -> std::result::Result<(), TransportError> {
        let to = Address::new(address).map_err(|e| TransportError::InvalidAddress(e.to_string()))?;
        debug!("Sending {subject:?} to {to} via {}:{}", self.host, self.port);

        match tokio::time::timeout(self.timeout, self.deliver(to, subject, body)).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}

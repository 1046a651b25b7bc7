//! Outbound delivery of a single reminder to a single address.

mod smtp;

use std::time::Duration;

use async_trait::async_trait;

pub use smtp::SmtpTransport;

/// Why a delivery attempt failed.
///
/// The dispatch engine does not interpret these; the display text is stored
/// as the record's failure reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The relay could not be reached or the connection broke.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The relay refused the credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The relay refused the sender, recipient or message.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The recipient address is not usable.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The attempt did not finish in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The relay spoke something unexpected.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<tickler_smtp::Error> for TransportError {
    fn from(err: tickler_smtp::Error) -> Self {
        use tickler_smtp::Error as Smtp;

        match err {
            Smtp::Io(_) | Smtp::Tls(_) => Self::Connection(err.to_string()),
            Smtp::AuthenticationFailed(message) => Self::Authentication(message),
            Smtp::InvalidAddress(message) => Self::InvalidAddress(message),
            Smtp::Rejected { .. } | Smtp::MessageTooLarge { .. } => Self::Rejected(err.to_string()),
            Smtp::Protocol(_) | Smtp::NotSupported(_) => Self::Protocol(err.to_string()),
        }
    }
}

/// Sends one message to one address.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Delivers `subject` and `body` to `address`.
    ///
    /// Implementations bound the whole attempt by their own timeout.
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError>;
}

//! Error types for SMTP operations.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The server answered a command with a non-success reply.
    #[error("server rejected {command}: {code} {message}")]
    Rejected {
        /// Command verb the reply belongs to (e.g. `RCPT`).
        command: &'static str,
        /// Reply code (e.g. 550).
        code: u16,
        /// Reply text from the server.
        message: String,
    },

    /// The server refused the supplied credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Protocol error (malformed or unexpected response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    /// Message exceeds the size the server advertised.
    #[error("message of {size} bytes exceeds server limit of {limit} bytes")]
    MessageTooLarge {
        /// Size of the rendered message.
        size: usize,
        /// Limit from the `SIZE` extension.
        limit: usize,
    },

    /// Feature not supported by the server.
    #[error("server does not support {0}")]
    NotSupported(String),
}

impl Error {
    pub(crate) fn rejected(command: &'static str, code: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            command,
            code,
            message: message.into(),
        }
    }

    /// Returns the reply code if the server rejected a command.
    #[must_use]
    pub const fn reply_code(&self) -> Option<u16> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if *code >= 400 && *code < 500)
    }
}

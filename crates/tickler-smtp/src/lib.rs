//! # tickler-smtp
//!
//! A small async SMTP client (RFC 5321 subset) for handing reminder messages
//! to a relay.
//!
//! ## Features
//!
//! - Implicit TLS (port 465) and STARTTLS through `tokio-rustls`
//! - AUTH PLAIN and AUTH LOGIN
//! - Capability discovery from EHLO (SIZE, 8BITMIME, SMTPUTF8)
//! - Plain-text RFC 5322 rendering with RFC 2047 encoded headers
//!
//! ## Quick Start
//!
//! ```ignore
//! use tickler_smtp::{Address, Credentials, Mailbox, Message, Security, Session};
//!
//! #[tokio::main]
//! async fn main() -> tickler_smtp::Result<()> {
//!     let mut session = Session::connect("smtp.example.com", 465, Security::Tls, "localhost").await?;
//!     session
//!         .authenticate(&Credentials {
//!             username: "avisos@example.com".into(),
//!             password: "app-password".into(),
//!         })
//!         .await?;
//!
//!     let from = Address::new("avisos@example.com")?;
//!     let to = Address::new("cliente@example.org")?;
//!     let message = Message::new(
//!         Mailbox::new(from.clone()),
//!         Mailbox::new(to.clone()),
//!         "Invoice due",
//!         "Your invoice is due today.",
//!     );
//!
//!     session.send_mail(&from, &[to], message.to_rfc5322().as_bytes()).await?;
//!     session.quit().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`session`]: connection handshake, authentication and mail transactions
//! - [`message`]: message rendering and DATA encoding
//! - [`reply`]: reply codes and the reply parser
//! - [`stream`]: TCP/TLS line transport

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod capability;
mod error;
pub mod message;
pub mod reply;
pub mod session;
pub mod stream;

pub use address::{Address, Mailbox};
pub use capability::{AuthMechanism, Capabilities};
pub use error::{Error, Result};
pub use message::Message;
pub use reply::{Reply, ReplyCode};
pub use session::{Credentials, Security, Session};
pub use stream::SmtpStream;

//! Line-oriented transport underneath a session (TCP, TLS, or anything else).

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};

use crate::error::{Error, Result};

/// Any bidirectional byte stream a session can run over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Buffered SMTP stream.
pub struct SmtpStream {
    inner: BufReader<Box<dyn Io>>,
    encrypted: bool,
}

impl std::fmt::Debug for SmtpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpStream")
            .field("encrypted", &self.encrypted)
            .finish_non_exhaustive()
    }
}

impl SmtpStream {
    /// Wraps an arbitrary stream. `encrypted` records whether it is already TLS.
    pub fn new(io: impl Io + 'static, encrypted: bool) -> Self {
        Self {
            inner: BufReader::new(Box::new(io)),
            encrypted,
        }
    }

    /// Returns true once the stream is protected by TLS.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Reads one line with the trailing CRLF removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the peer closed the connection.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self.inner.read_line(&mut line).await?;
        if read == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Writes and flushes `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let io = self.inner.get_mut();
        io.write_all(data).await?;
        io.flush().await?;
        Ok(())
    }

    /// Runs the TLS handshake over the current stream (STARTTLS).
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already encrypted, the hostname is not
    /// a valid server name, or the handshake fails.
    pub async fn upgrade_to_tls(self, hostname: &str) -> Result<Self> {
        if self.encrypted {
            return Err(Error::Protocol("stream is already using TLS".into()));
        }
        let server_name = server_name(hostname)?;
        let tls = tls_connector()
            .connect(server_name, self.inner.into_inner())
            .await?;
        Ok(Self::new(tls, true))
    }
}

/// Connects over plain TCP.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(hostname: &str, port: u16) -> Result<SmtpStream> {
    let tcp = TcpStream::connect((hostname, port)).await?;
    Ok(SmtpStream::new(tcp, false))
}

/// Connects with implicit TLS (usually port 465).
///
/// # Errors
///
/// Returns an error if the connection or TLS handshake fails.
pub async fn connect_tls(hostname: &str, port: u16) -> Result<SmtpStream> {
    let server_name = server_name(hostname)?;
    let tcp = TcpStream::connect((hostname, port)).await?;
    let tls = tls_connector().connect(server_name, tcp).await?;
    Ok(SmtpStream::new(tls, true))
}

fn server_name(hostname: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Protocol(format!("invalid hostname: {hostname}")))
}

/// Creates a TLS connector trusting the webpki root set.
fn tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

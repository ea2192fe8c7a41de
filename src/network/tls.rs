//! TLS transport and certificate configuration.
//!
//! TLS switches on when any certificate option is supplied. The CA
//! certificate installs the trust store used to verify brokers; a client
//! certificate and key together enable mutual TLS. Supplying exactly one
//! of the client pair is a configuration error, as is enabling TLS
//! without a CA certificate (there is no fallback trust store).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::{Error, Result};
use crate::network::tcp::TcpConnection;

/// Certificate material locations for TLS connections.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    ca_cert: Option<PathBuf>,
    client_cert: Option<PathBuf>,
    client_cert_key: Option<PathBuf>,
}

impl TlsSettings {
    /// Validate a certificate option combination.
    pub fn new(
        ca_cert: Option<PathBuf>,
        client_cert: Option<PathBuf>,
        client_cert_key: Option<PathBuf>,
    ) -> Result<Self> {
        match (&client_cert, &client_cert_key) {
            (Some(_), None) => {
                return Err(Error::Config(
                    "client_cert supplied without client_cert_key".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(Error::Config(
                    "client_cert_key supplied without client_cert".to_string(),
                ));
            }
            _ => {}
        }

        let settings = Self {
            ca_cert,
            client_cert,
            client_cert_key,
        };
        if settings.enabled() && settings.ca_cert.is_none() {
            return Err(Error::Config(
                "ca_cert is required when TLS is enabled".to_string(),
            ));
        }
        Ok(settings)
    }

    /// TLS is in effect when any certificate option was supplied.
    pub fn enabled(&self) -> bool {
        self.ca_cert.is_some() || self.client_cert.is_some() || self.client_cert_key.is_some()
    }

    fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
        let pem = std::fs::read(path)?;
        rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
        let pem = std::fs::read(path)?;
        rustls_pemfile::private_key(&mut pem.as_slice())?
            .ok_or_else(|| Error::Config(format!("no private key found in {}", path.display())))
    }

    /// Build the connector from the configured certificate material.
    pub fn connector(&self) -> Result<TlsConnector> {
        let ca_path = self
            .ca_cert
            .as_deref()
            .ok_or_else(|| Error::Config("ca_cert is required when TLS is enabled".to_string()))?;

        let mut roots = rustls::RootCertStore::empty();
        for cert in Self::load_certs(ca_path)? {
            roots
                .add(cert)
                .map_err(|e| Error::Config(format!("invalid CA certificate: {e}")))?;
        }

        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
        let config = match (&self.client_cert, &self.client_cert_key) {
            (Some(cert_path), Some(key_path)) => builder
                .with_client_auth_cert(Self::load_certs(cert_path)?, Self::load_key(key_path)?)
                .map_err(|e| Error::Config(format!("invalid client certificate: {e}")))?,
            _ => builder.with_no_client_auth(),
        };

        Ok(TlsConnector::from(Arc::new(config)))
    }
}

/// An established TLS stream to one broker.
pub struct TlsConnection {
    pub(crate) stream: TlsStream<tokio::net::TcpStream>,
}

impl std::fmt::Debug for TlsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnection").finish_non_exhaustive()
    }
}

impl TlsConnection {
    /// Open a TCP connection and run the TLS handshake over it.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        settings: &TlsSettings,
    ) -> Result<Self> {
        let connector = settings.connector()?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::Config(format!("invalid TLS server name {host:?}")))?;

        let tcp = TcpConnection::connect(host, port, connect_timeout).await?;
        tracing::debug!(host, port, "Starting TLS handshake");

        let stream = tokio::time::timeout(connect_timeout, connector.connect(server_name, tcp.stream))
            .await
            .map_err(|_| Error::IoError(std::io::ErrorKind::TimedOut))??;

        Ok(Self { stream })
    }
}

//! Plain TCP transport to a broker.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// An established TCP stream to one broker.
#[derive(Debug)]
pub struct TcpConnection {
    pub(crate) stream: TcpStream,
}

impl TcpConnection {
    /// Open a TCP connection, bounded by the socket timeout.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        tracing::debug!(%addr, "Opening TCP connection");

        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::IoError(std::io::ErrorKind::TimedOut))??;

        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

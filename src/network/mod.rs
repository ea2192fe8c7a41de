//! Connection & communication with a broker.
//!
//! The protocol runs request/response pairs over a single TCP (or TLS)
//! stream. All messages are size delimited. On one connection, requests
//! are processed in send order and responses return in that order; this
//! client keeps exactly one request in flight per connection, so the
//! response read after a write is always the answer to that write. The
//! correlation id in each response is still checked against the request's
//! — a mismatch means the connection state is unusable and the connection
//! is discarded.
//!
//! Socket I/O is bounded by the configured timeout. A timeout or any
//! other I/O failure poisons the connection: the caller (the broker
//! pool) evicts it and the next use re-establishes.

pub mod tcp;
pub mod tls;

use std::time::Duration;

use bytes::{Buf, Bytes};
use nombytes::NomBytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::constants::MAX_RESPONSE_SIZE;
use crate::encode::ToByte;
use crate::error::{Error, Result};
use crate::protocol::parse_header_response;
use crate::types::CorrelationId;

pub use tcp::TcpConnection;
pub use tls::{TlsConnection, TlsSettings};

/// A connection shared through the broker pool, locked per request.
pub type SharedConnection = std::sync::Arc<tokio::sync::Mutex<BrokerConnection>>;

/// Run one request/response exchange on a shared connection.
///
/// The builder receives the correlation id and client id to bake into
/// the request header; the lock spans the whole exchange, preserving the
/// one-request-in-flight invariant.
pub async fn exchange<R, F>(connection: &SharedConnection, build: F) -> Result<NomBytes>
where
    R: ToByte,
    F: FnOnce(i32, &str) -> Result<R>,
{
    let mut conn = connection.lock().await;
    let correlation_id = conn.next_correlation_id();
    let client_id = conn.client_id().to_string();
    let request = build(correlation_id, &client_id)?;
    conn.request(&request, correlation_id).await
}

/// Write a request without reading a response (`required_acks = 0`).
pub async fn send_only<R, F>(connection: &SharedConnection, build: F) -> Result<()>
where
    R: ToByte,
    F: FnOnce(i32, &str) -> Result<R>,
{
    let mut conn = connection.lock().await;
    let correlation_id = conn.next_correlation_id();
    let client_id = conn.client_id().to_string();
    let request = build(correlation_id, &client_id)?;
    conn.send(&request).await
}

/// Transport-level stream to one broker, plain or encrypted.
#[derive(Debug)]
pub enum BrokerStream {
    Tcp(TcpConnection),
    Tls(Box<TlsConnection>),
}

/// A connection to a single broker.
///
/// Owns the stream, the monotonically increasing correlation id counter,
/// and the socket timeout. One request may be in flight at a time;
/// callers serialize access through the broker pool's per-connection
/// lock.
#[derive(Debug)]
pub struct BrokerConnection {
    stream: BrokerStream,
    client_id: String,
    correlation_id: CorrelationId,
    socket_timeout: Duration,
}

impl BrokerConnection {
    /// Open a connection, TLS when the settings ask for it.
    pub async fn connect(
        host: &str,
        port: u16,
        client_id: &str,
        socket_timeout: Duration,
        tls: &TlsSettings,
    ) -> Result<Self> {
        let stream = if tls.enabled() {
            BrokerStream::Tls(Box::new(
                TlsConnection::connect(host, port, socket_timeout, tls).await?,
            ))
        } else {
            BrokerStream::Tcp(TcpConnection::connect(host, port, socket_timeout).await?)
        };

        Ok(Self {
            stream,
            client_id: client_id.to_string(),
            correlation_id: CorrelationId::default(),
            socket_timeout,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Hand out the id the next request must carry.
    pub fn next_correlation_id(&mut self) -> i32 {
        self.correlation_id = self.correlation_id.next();
        self.correlation_id.value()
    }

    /// Send a request and read its response.
    ///
    /// `correlation_id` must be the value obtained from
    /// [`next_correlation_id`](Self::next_correlation_id) and baked into
    /// the request's header. Returns the response body positioned after
    /// the response header.
    pub async fn request<R: ToByte>(
        &mut self,
        request: &R,
        correlation_id: i32,
    ) -> Result<NomBytes> {
        self.send(request).await?;
        let response = self.receive().await?;

        let input = NomBytes::new(response.clone());
        let (body, header) =
            parse_header_response(input).map_err(|_| Error::ParsingError(response))?;

        if header.correlation_id != correlation_id {
            return Err(Error::CorrelationMismatch {
                expected: correlation_id,
                actual: header.correlation_id,
            });
        }

        Ok(body)
    }

    /// Write a framed request without waiting for a response.
    /// The produce path with `required_acks = 0` is the only caller.
    pub async fn send<R: ToByte>(&mut self, request: &R) -> Result<()> {
        let mut payload = Vec::new();
        request.encode(&mut payload)?;

        let mut frame = Vec::with_capacity(4 + payload.len());
        (payload.len() as i32).encode(&mut frame)?;
        frame.extend_from_slice(&payload);

        let io_timeout = self.socket_timeout;
        match &mut self.stream {
            BrokerStream::Tcp(conn) => write_frame(&mut conn.stream, &frame, io_timeout).await,
            BrokerStream::Tls(conn) => write_frame(&mut conn.stream, &frame, io_timeout).await,
        }
    }

    /// Read one size-delimited response off the stream.
    pub async fn receive(&mut self) -> Result<Bytes> {
        let io_timeout = self.socket_timeout;
        match &mut self.stream {
            BrokerStream::Tcp(conn) => read_frame(&mut conn.stream, io_timeout).await,
            BrokerStream::Tls(conn) => read_frame(&mut conn.stream, io_timeout).await,
        }
    }
}

async fn write_frame<W>(stream: &mut W, frame: &[u8], io_timeout: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    timeout(io_timeout, async {
        stream.write_all(frame).await?;
        stream.flush().await?;
        Ok::<_, std::io::Error>(())
    })
    .await
    .map_err(|_| Error::IoError(std::io::ErrorKind::TimedOut))??;

    tracing::trace!(frame_len = frame.len(), "Wrote request frame");
    Ok(())
}

async fn read_frame<R>(stream: &mut R, io_timeout: Duration) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut size_buf = [0u8; 4];
    timeout(io_timeout, stream.read_exact(&mut size_buf))
        .await
        .map_err(|_| Error::IoError(std::io::ErrorKind::TimedOut))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::MissingData("connection closed".to_string())
            }
            kind => Error::IoError(kind),
        })?;

    let size = (&size_buf[..]).get_i32();
    if size < 0 {
        return Err(Error::MissingData(format!(
            "invalid negative response size: {size}"
        )));
    }
    let size = size as usize;
    if size > MAX_RESPONSE_SIZE {
        return Err(Error::MissingData(format!(
            "response size {size} exceeds maximum allowed size {MAX_RESPONSE_SIZE}"
        )));
    }

    tracing::trace!(size, "Reading response frame");

    let mut data = vec![0u8; size];
    timeout(io_timeout, stream.read_exact(&mut data))
        .await
        .map_err(|_| Error::IoError(std::io::ErrorKind::TimedOut))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::MissingData("connection closed mid-response".to_string())
            }
            kind => Error::IoError(kind),
        })?;

    Ok(Bytes::from(data))
}

//! Cache of live broker connections.
//!
//! Connections are keyed by `(host, port)`, opened lazily on first use,
//! and reused until an I/O error evicts them. Each connection sits
//! behind its own async mutex so exactly one request is in flight per
//! connection; the map itself is a `DashMap` so unrelated brokers don't
//! contend.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::network::{BrokerConnection, TlsSettings};

/// A pooled connection, locked per request.
pub type PooledConnection = Arc<Mutex<BrokerConnection>>;

#[derive(Debug)]
pub struct BrokerPool {
    connections: DashMap<(String, u16), PooledConnection>,
    client_id: String,
    socket_timeout: Duration,
    tls: TlsSettings,
}

impl BrokerPool {
    pub fn new(client_id: String, socket_timeout: Duration, tls: TlsSettings) -> Self {
        Self {
            connections: DashMap::new(),
            client_id,
            socket_timeout,
            tls,
        }
    }

    /// Get the connection for a broker, opening it if absent.
    ///
    /// The connect happens outside the map lock; if two tasks race, the
    /// first insert wins and the loser's connection is dropped.
    pub async fn get(&self, host: &str, port: u16) -> Result<PooledConnection> {
        let key = (host.to_string(), port);
        if let Some(existing) = self.connections.get(&key) {
            return Ok(existing.clone());
        }

        let connection = BrokerConnection::connect(
            host,
            port,
            &self.client_id,
            self.socket_timeout,
            &self.tls,
        )
        .await?;
        tracing::debug!(host, port, "Opened broker connection");

        let connection = Arc::new(Mutex::new(connection));
        Ok(self
            .connections
            .entry(key)
            .or_insert(connection)
            .value()
            .clone())
    }

    /// Drop a connection after an I/O error; the next `get` re-opens.
    pub fn evict(&self, host: &str, port: u16) {
        if self
            .connections
            .remove(&(host.to_string(), port))
            .is_some()
        {
            tracing::debug!(host, port, "Evicted broker connection");
        }
    }

    /// Close every pooled connection. In-flight requests observe a
    /// connection error once their socket drops.
    pub fn close_all(&self) {
        let count = self.connections.len();
        self.connections.clear();
        if count > 0 {
            tracing::debug!(count, "Closed all broker connections");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn pool() -> BrokerPool {
        BrokerPool::new(
            "test".to_string(),
            Duration::from_secs(5),
            TlsSettings::default(),
        )
    }

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_get_reuses_connection() {
        let (listener, port) = listener().await;
        let pool = pool();

        let accept = tokio::spawn(async move {
            let _first = listener.accept().await.unwrap();
            // hold the socket open so the pooled connection stays alive
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let first = pool.get("127.0.0.1", port).await.unwrap();
        let second = pool.get("127.0.0.1", port).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_evict_forces_reconnect() {
        let (listener, port) = listener().await;
        let pool = pool();

        let accept = tokio::spawn(async move {
            let _first = listener.accept().await.unwrap();
            let _second = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let first = pool.get("127.0.0.1", port).await.unwrap();
        pool.evict("127.0.0.1", port);
        assert!(pool.is_empty());

        let second = pool.get("127.0.0.1", port).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_unreachable_broker_fails() {
        let pool = BrokerPool::new(
            "test".to_string(),
            Duration::from_millis(200),
            TlsSettings::default(),
        );
        // port 1 is essentially never listening
        assert!(pool.get("127.0.0.1", 1).await.is_err());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_empties_pool() {
        let (listener, port) = listener().await;
        let pool = pool();

        let accept = tokio::spawn(async move {
            let _conn = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        pool.get("127.0.0.1", port).await.unwrap();
        pool.close_all();
        assert!(pool.is_empty());
        accept.await.unwrap();
    }
}

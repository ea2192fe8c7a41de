//! # Milena
//! Rust-native client for Kafka-compatible commit log clusters.
//!
//! This crate lets applications publish records to the topics of a
//! Kafka-compatible broker cluster and consume them, individually or as
//! members of a coordinated consumer group. This is pure Rust all the
//! way down; meaning memory safety, safe concurrency, low resource
//! usage, and speed.
//!
//! # Goals
//! - Easy to understand code
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/), [Nom](https://docs.rs/nom/latest/nom/)
//! - Speak the Kafka wire protocol natively, no librdkafka FFI
//! - Survive the failures a real cluster throws at a client: leader
//!   migrations, coordinator moves, rebalances, dropped connections
//!
//! ## Getting started
//! Install `milena` to your rust project with `cargo add milena` or include the following snippet in your `Cargo.toml` dependencies:
//! ```toml
//! milena = "0.1"
//! ```
//!
//! ### Producing
//! ```rust,no_run
//! use milena::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let cluster = Arc::new(Cluster::new(ClientConfig::new(vec![
//!         "broker-1:9092".to_string(),
//!     ]))?);
//!
//!     let mut producer = Producer::new(cluster.clone(), ProducerConfig::default())?;
//!     producer.produce(
//!         Some(bytes::Bytes::from("hello")),
//!         Some(bytes::Bytes::from("greetings")),
//!         "events",
//!         None,
//!         None,
//!     )?;
//!     producer.deliver_messages().await?;
//!     producer.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ### Consuming in a group
//! ```rust,no_run
//! use milena::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let cluster = Arc::new(Cluster::new(ClientConfig::new(vec![
//!         "broker-1:9092".to_string(),
//!     ]))?);
//!
//!     let mut consumer = Consumer::new(
//!         cluster,
//!         ConsumerConfig::new("my-group"),
//!         FetchConfig::default(),
//!     )?;
//!     consumer.subscribe("events");
//!
//!     loop {
//!         for batch in consumer.poll().await? {
//!             for message in &batch.messages {
//!                 println!("{:?} @ {}", message.value, message.offset);
//!                 consumer.mark_message_as_processed(message);
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! ## Resources
//! - [Kafka Protocol Spec](https://kafka.apache.org/protocol.html)
//! - [Confluence Docs](https://cwiki.apache.org/confluence/display/KAFKA/A+Guide+To+The+Kafka+Protocol)

#![forbid(unsafe_code)]

pub mod cluster;
pub mod compression;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod encode;
pub mod error;
pub mod instrumentation;
pub mod network;
pub mod parser;
pub mod producer;
pub mod protocol;
pub mod telemetry;
pub mod types;

pub mod prelude {
    //! Main exports for producing and consuming.

    pub use crate::cluster::{Broker, Cluster};
    pub use crate::compression::CompressionCodec;
    pub use crate::config::{
        AsyncProducerConfig, ClientConfig, ConsumerConfig, FetchConfig, ProducerConfig,
        RequiredAcks,
    };
    pub use crate::consumer::{Consumer, FetchedBatch, FetchedMessage};
    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::instrumentation::Instrumentation;
    pub use crate::producer::{AsyncProducer, Producer, deliver_message};
    pub use crate::types::{Offset, TopicPartition};

    pub use bytes;
}

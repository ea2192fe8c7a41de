//! Background-worker producer.
//!
//! A bounded queue of `{produce, deliver, shutdown}` events feeds a
//! single worker task that owns a [`Producer`]. Deliveries run when a
//! deliver event arrives, when the buffered count reaches
//! `delivery_threshold`, or every `delivery_interval`. Back-pressure is
//! the queue bound itself: `produce` on a full queue fails with
//! [`Error::BufferOverflow`] instead of blocking the caller.
//!
//! Delivery failures inside the worker are logged and the affected
//! messages follow the producer core's rules (retriable errors keep
//! records buffered for the next cycle; fatal errors drop them).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cluster::Cluster;
use crate::config::AsyncProducerConfig;
use crate::constants::NO_TIMESTAMP;
use crate::error::{Error, Result};
use crate::instrumentation::Instrumentation;
use crate::producer::Producer;
use crate::producer::buffer::PendingMessage;

/// Stand-in period when the delivery timer is disabled.
const TIMER_DISABLED: Duration = Duration::from_secs(365 * 24 * 3600);

#[derive(Debug)]
enum Event {
    Produce(PendingMessage),
    Deliver,
    Shutdown,
}

/// Handle to the background worker; cheap to use from the owner's task.
#[derive(Debug)]
pub struct AsyncProducer {
    sender: mpsc::Sender<Event>,
    worker: JoinHandle<()>,
}

impl AsyncProducer {
    /// Validate the configuration and spawn the worker.
    pub fn spawn(cluster: Arc<Cluster>, config: AsyncProducerConfig) -> Result<Self> {
        Self::spawn_with_instrumentation(cluster, config, Instrumentation::default())
    }

    pub fn spawn_with_instrumentation(
        cluster: Arc<Cluster>,
        config: AsyncProducerConfig,
        instrumentation: Instrumentation,
    ) -> Result<Self> {
        config.validate()?;

        let producer =
            Producer::new(cluster, config.producer.clone())?.with_instrumentation(instrumentation);
        let (sender, receiver) = mpsc::channel(config.max_queue_size);
        let worker = tokio::spawn(run_worker(
            producer,
            receiver,
            config.delivery_threshold,
            config.delivery_interval,
        ));

        Ok(Self { sender, worker })
    }

    /// Queue a message for the worker. Fails with
    /// [`Error::BufferOverflow`] when the queue is full.
    pub fn produce(
        &self,
        value: Option<Bytes>,
        key: Option<Bytes>,
        topic: &str,
        partition: Option<i32>,
        partition_key: Option<Bytes>,
    ) -> Result<()> {
        let message = PendingMessage::new(
            value,
            key,
            topic.to_string(),
            partition,
            partition_key,
            now_ms(),
        );

        self.sender
            .try_send(Event::Produce(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::BufferOverflow,
                mpsc::error::TrySendError::Closed(_) => Error::ProducerShutDown,
            })
    }

    /// Ask the worker to run a delivery cycle.
    pub async fn deliver_messages(&self) -> Result<()> {
        self.sender
            .send(Event::Deliver)
            .await
            .map_err(|_| Error::ProducerShutDown)
    }

    /// Drain the queue, run a final delivery, and stop the worker.
    pub async fn shutdown(self) {
        let _ = self.sender.send(Event::Shutdown).await;
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Async producer worker panicked");
        }
    }
}

async fn run_worker(
    mut producer: Producer,
    mut events: mpsc::Receiver<Event>,
    delivery_threshold: usize,
    delivery_interval: Duration,
) {
    let period = if delivery_interval.is_zero() {
        TIMER_DISABLED
    } else {
        delivery_interval
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; swallow it
    ticker.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::Produce(message)) => {
                    if let Err(e) = producer.enqueue(message) {
                        tracing::warn!(error = %e, "Dropping message: producer buffer full");
                    }
                    if delivery_threshold > 0
                        && producer.buffered_message_count() >= delivery_threshold
                    {
                        deliver(&mut producer).await;
                    }
                }
                Some(Event::Deliver) => deliver(&mut producer).await,
                Some(Event::Shutdown) | None => break,
            },
            _ = ticker.tick() => deliver(&mut producer).await,
        }
    }

    // accept no new events, then drain what already queued up
    events.close();
    while let Ok(event) = events.try_recv() {
        if let Event::Produce(message) = event {
            if let Err(e) = producer.enqueue(message) {
                tracing::warn!(error = %e, "Dropping message during shutdown drain");
            }
        }
    }

    producer.shutdown().await;
    tracing::debug!("Async producer worker stopped");
}

async fn deliver(producer: &mut Producer) {
    if producer.buffered_message_count() == 0 {
        return;
    }
    if let Err(e) = producer.deliver_messages().await {
        tracing::warn!(error = %e, "Async delivery cycle failed");
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(NO_TIMESTAMP)
}

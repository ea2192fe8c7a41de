//! Instrumentation event surface.
//!
//! Operational moments publish `(event_name, payload)` pairs to an
//! optional application-supplied sink, and always to `tracing` at debug
//! level. The documented events:
//!
//! | Event | Published when |
//! |-------|----------------|
//! | `produce_message` | a message enters the producer buffer |
//! | `deliver_messages` | a delivery attempt cycle completes |
//! | `fetch_batch` | a batch is decoded from a fetch response |
//! | `process_batch` | a batch is handed to the application |
//! | `heartbeat` | a heartbeat request is answered |
//! | `join_group` | the member (re)joins its group |
//! | `sync_group` | the member receives its assignment |
//! | `leave_group` | the member leaves on close |
//! | `commit_offsets` | offsets are committed |

use std::fmt;
use std::sync::Arc;

pub const EVENT_PRODUCE_MESSAGE: &str = "produce_message";
pub const EVENT_DELIVER_MESSAGES: &str = "deliver_messages";
pub const EVENT_FETCH_BATCH: &str = "fetch_batch";
pub const EVENT_PROCESS_BATCH: &str = "process_batch";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_JOIN_GROUP: &str = "join_group";
pub const EVENT_SYNC_GROUP: &str = "sync_group";
pub const EVENT_LEAVE_GROUP: &str = "leave_group";
pub const EVENT_COMMIT_OFFSETS: &str = "commit_offsets";

/// Ordered key/value pairs attached to an event.
pub type Payload = Vec<(&'static str, String)>;

type Sink = dyn Fn(&'static str, &Payload) + Send + Sync;

/// Publish surface handed to producers and consumers.
///
/// Cloning is cheap; every clone publishes to the same sink.
#[derive(Clone, Default)]
pub struct Instrumentation {
    sink: Option<Arc<Sink>>,
}

impl Instrumentation {
    /// Route events to the given sink in addition to `tracing`.
    pub fn with_sink(sink: impl Fn(&'static str, &Payload) + Send + Sync + 'static) -> Self {
        Self {
            sink: Some(Arc::new(sink)),
        }
    }

    /// Publish one event.
    pub fn publish(&self, event: &'static str, payload: Payload) {
        tracing::debug!(event, ?payload, "instrumentation event");
        if let Some(sink) = &self.sink {
            sink(event, &payload);
        }
    }
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

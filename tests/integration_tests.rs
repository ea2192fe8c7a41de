//! End-to-end scenarios against a scripted in-process broker.
//!
//! The broker speaks just enough of the wire protocol to exercise the
//! client's pipelines: metadata discovery, produce with scripted error
//! codes, offset resolution, the consumer group handshake, fetch, and
//! offset commit/fetch round trips. A single node answers as leader and
//! coordinator, which matches the single-connection paths these tests
//! drive.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use milena::cluster::Cluster;
use milena::compression::CompressionCodec;
use milena::config::{ClientConfig, ConsumerConfig, FetchConfig, ProducerConfig};
use milena::consumer::Consumer;
use milena::consumer::group::GroupMembership;
use milena::consumer::offset_manager::OffsetManager;
use milena::instrumentation::Instrumentation;
use milena::producer::{Producer, deliver_message};
use milena::protocol::messages::{Record, encode_message_set};
use milena::types::Offset;

// ----------------------------------------------------------------------------
// Little-endian-free helpers for reading and writing request bodies
// ----------------------------------------------------------------------------

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn i16(&mut self) -> i16 {
        let v = i16::from_be_bytes(self.data[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }

    fn i32(&mut self) -> i32 {
        let v = i32::from_be_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn i64(&mut self) -> i64 {
        let v = i64::from_be_bytes(self.data[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn string(&mut self) -> String {
        let len = self.i16();
        assert!(len >= 0, "unexpected null string");
        let s = String::from_utf8(self.data[self.pos..self.pos + len as usize].to_vec()).unwrap();
        self.pos += len as usize;
        s
    }

    fn nullable_string(&mut self) -> Option<String> {
        let len = self.i16();
        if len == -1 {
            return None;
        }
        let s = String::from_utf8(self.data[self.pos..self.pos + len as usize].to_vec()).unwrap();
        self.pos += len as usize;
        Some(s)
    }

    fn bytes(&mut self) -> Vec<u8> {
        let len = self.i32();
        if len <= 0 {
            return Vec::new();
        }
        let b = self.data[self.pos..self.pos + len as usize].to_vec();
        self.pos += len as usize;
        b
    }
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn i8(&mut self, v: i8) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }
    fn i16(&mut self, v: i16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }
    fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }
    fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }
    fn string(&mut self, s: &str) -> &mut Self {
        self.i16(s.len() as i16);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }
    fn null_string(&mut self) -> &mut Self {
        self.i16(-1)
    }
    fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.i32(b.len() as i32);
        self.buf.extend_from_slice(b);
        self
    }
}

// ----------------------------------------------------------------------------
// Scripted broker
// ----------------------------------------------------------------------------

struct ScriptedBroker {
    port: AtomicU16,
    partitions_per_topic: i32,
    latest_offset: i64,
    produce_error_script: Mutex<VecDeque<i16>>,
    produce_requests: AtomicUsize,
    metadata_requests: AtomicUsize,
    committed: Mutex<HashMap<(String, i32), i64>>,
    record_sets: Mutex<HashMap<(String, i32), Vec<u8>>>,
}

impl ScriptedBroker {
    async fn start(partitions_per_topic: i32) -> Arc<Self> {
        let broker = Arc::new(Self {
            port: AtomicU16::new(0),
            partitions_per_topic,
            latest_offset: 123,
            produce_error_script: Mutex::new(VecDeque::new()),
            produce_requests: AtomicUsize::new(0),
            metadata_requests: AtomicUsize::new(0),
            committed: Mutex::new(HashMap::new()),
            record_sets: Mutex::new(HashMap::new()),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        broker.port.store(port, Ordering::SeqCst);

        let accept_broker = broker.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let broker = accept_broker.clone();
                tokio::spawn(broker.serve_connection(socket));
            }
        });

        broker
    }

    fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    fn script_produce_errors(&self, codes: &[i16]) {
        self.produce_error_script
            .lock()
            .unwrap()
            .extend(codes.iter().copied());
    }

    fn set_record_set(&self, topic: &str, partition: i32, set: &[u8]) {
        self.record_sets
            .lock()
            .unwrap()
            .insert((topic.to_string(), partition), set.to_vec());
    }

    fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.committed
            .lock()
            .unwrap()
            .get(&(topic.to_string(), partition))
            .copied()
    }

    async fn serve_connection(self: Arc<Self>, mut socket: tokio::net::TcpStream) {
        loop {
            let mut size_buf = [0u8; 4];
            if socket.read_exact(&mut size_buf).await.is_err() {
                return;
            }
            let size = i32::from_be_bytes(size_buf) as usize;
            let mut frame = vec![0u8; size];
            if socket.read_exact(&mut frame).await.is_err() {
                return;
            }

            let mut header = Cursor::new(&frame);
            let api_key = header.i16();
            let _api_version = header.i16();
            let correlation_id = header.i32();
            let _client_id = header.nullable_string();
            let body = &frame[header.pos..];

            if let Some(response_body) = self.respond(api_key, body) {
                let mut response = Vec::with_capacity(8 + response_body.len());
                response.extend_from_slice(&((4 + response_body.len()) as i32).to_be_bytes());
                response.extend_from_slice(&correlation_id.to_be_bytes());
                response.extend_from_slice(&response_body);
                if socket.write_all(&response).await.is_err() {
                    return;
                }
            }
        }
    }

    fn respond(&self, api_key: i16, body: &[u8]) -> Option<Vec<u8>> {
        match api_key {
            0 => self.handle_produce(body),
            1 => Some(self.handle_fetch(body)),
            2 => Some(self.handle_list_offsets(body)),
            3 => Some(self.handle_metadata(body)),
            8 => Some(self.handle_offset_commit(body)),
            9 => Some(self.handle_offset_fetch(body)),
            10 => Some(self.handle_find_coordinator()),
            11 => Some(self.handle_join_group(body)),
            12 => Some(self.handle_heartbeat()),
            13 => Some(self.handle_leave_group()),
            14 => Some(self.handle_sync_group(body)),
            other => panic!("scripted broker got unexpected api_key {other}"),
        }
    }

    fn handle_metadata(&self, body: &[u8]) -> Vec<u8> {
        self.metadata_requests.fetch_add(1, Ordering::SeqCst);

        let mut cursor = Cursor::new(body);
        let topic_count = cursor.i32();
        let topics: Vec<String> = (0..topic_count).map(|_| cursor.string()).collect();

        let mut w = Writer::default();
        // one broker: node 1 = this listener
        w.i32(1);
        w.i32(1).string("127.0.0.1").i32(self.port() as i32).null_string();
        w.i32(1); // controller id
        w.i32(topics.len() as i32);
        for topic in &topics {
            w.i16(0).string(topic).i8(0);
            w.i32(self.partitions_per_topic);
            for partition in 0..self.partitions_per_topic {
                w.i16(0).i32(partition).i32(1);
                w.i32(1).i32(1); // replicas [1]
                w.i32(1).i32(1); // isr [1]
            }
        }
        w.buf
    }

    fn handle_produce(&self, body: &[u8]) -> Option<Vec<u8>> {
        self.produce_requests.fetch_add(1, Ordering::SeqCst);

        let mut cursor = Cursor::new(body);
        let acks = cursor.i16();
        let _timeout = cursor.i32();
        let topic_count = cursor.i32();

        let error_code = self
            .produce_error_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(0);

        let mut w = Writer::default();
        w.i32(topic_count);
        for _ in 0..topic_count {
            let name = cursor.string();
            let partition_count = cursor.i32();
            w.string(&name);
            w.i32(partition_count);
            for _ in 0..partition_count {
                let index = cursor.i32();
                let _set = cursor.bytes();
                w.i32(index).i16(error_code).i64(0).i64(-1);
            }
        }
        w.i32(0); // throttle_time_ms

        if acks == 0 {
            return None;
        }
        Some(w.buf)
    }

    fn handle_list_offsets(&self, body: &[u8]) -> Vec<u8> {
        let mut cursor = Cursor::new(body);
        let _replica_id = cursor.i32();
        let _topic_count = cursor.i32();
        let name = cursor.string();
        let _partition_count = cursor.i32();
        let index = cursor.i32();
        let target = cursor.i64();

        let offset = match target {
            -2 => 0,
            -1 => self.latest_offset,
            numeric => numeric,
        };

        let mut w = Writer::default();
        w.i32(1);
        w.string(&name);
        w.i32(1);
        w.i32(index).i16(0).i64(-1).i64(offset);
        w.buf
    }

    fn handle_find_coordinator(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.i16(0).i32(1).string("127.0.0.1").i32(self.port() as i32);
        w.buf
    }

    fn handle_join_group(&self, body: &[u8]) -> Vec<u8> {
        let mut cursor = Cursor::new(body);
        let _group = cursor.string();
        let _session_timeout = cursor.i32();
        let _member = cursor.string();
        let _protocol_type = cursor.string();
        let protocol_count = cursor.i32();
        assert!(protocol_count >= 1);
        let protocol_name = cursor.string();
        let metadata = cursor.bytes();

        let mut w = Writer::default();
        w.i16(0).i32(1).string(&protocol_name);
        w.string("member-1").string("member-1");
        w.i32(1);
        w.string("member-1").bytes(&metadata);
        w.buf
    }

    fn handle_sync_group(&self, body: &[u8]) -> Vec<u8> {
        let mut cursor = Cursor::new(body);
        let _group = cursor.string();
        let _generation = cursor.i32();
        let _member = cursor.string();
        let assignment_count = cursor.i32();
        let assignment = if assignment_count > 0 {
            let _member = cursor.string();
            cursor.bytes()
        } else {
            Vec::new()
        };

        let mut w = Writer::default();
        w.i16(0).bytes(&assignment);
        w.buf
    }

    fn handle_heartbeat(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.i16(0);
        w.buf
    }

    fn handle_leave_group(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.i16(0);
        w.buf
    }

    fn handle_offset_commit(&self, body: &[u8]) -> Vec<u8> {
        let mut cursor = Cursor::new(body);
        let _group = cursor.string();
        let _generation = cursor.i32();
        let _member = cursor.string();
        let _retention = cursor.i64();
        let topic_count = cursor.i32();

        let mut w = Writer::default();
        w.i32(topic_count);
        for _ in 0..topic_count {
            let name = cursor.string();
            let partition_count = cursor.i32();
            w.string(&name);
            w.i32(partition_count);
            for _ in 0..partition_count {
                let index = cursor.i32();
                let offset = cursor.i64();
                let _metadata = cursor.nullable_string();
                self.committed
                    .lock()
                    .unwrap()
                    .insert((name.clone(), index), offset);
                w.i32(index).i16(0);
            }
        }
        w.buf
    }

    fn handle_offset_fetch(&self, body: &[u8]) -> Vec<u8> {
        let mut cursor = Cursor::new(body);
        let _group = cursor.string();
        let topic_count = cursor.i32();

        let mut w = Writer::default();
        w.i32(topic_count);
        for _ in 0..topic_count {
            let name = cursor.string();
            let partition_count = cursor.i32();
            w.string(&name);
            w.i32(partition_count);
            for _ in 0..partition_count {
                let index = cursor.i32();
                let offset = self.committed_offset(&name, index).unwrap_or(-1);
                w.i32(index).i64(offset).null_string().i16(0);
            }
        }
        w.buf
    }

    fn handle_fetch(&self, body: &[u8]) -> Vec<u8> {
        let mut cursor = Cursor::new(body);
        let _replica_id = cursor.i32();
        let _max_wait = cursor.i32();
        let _min_bytes = cursor.i32();
        let topic_count = cursor.i32();

        let mut w = Writer::default();
        w.i32(0); // throttle_time_ms
        w.i32(topic_count);
        for _ in 0..topic_count {
            let name = cursor.string();
            let partition_count = cursor.i32();
            w.string(&name);
            w.i32(partition_count);
            for _ in 0..partition_count {
                let index = cursor.i32();
                let _fetch_offset = cursor.i64();
                let _max_bytes = cursor.i32();

                let sets = self.record_sets.lock().unwrap();
                let set = sets
                    .get(&(name.clone(), index))
                    .cloned()
                    .unwrap_or_default();
                w.i32(index).i16(0).i64(set.len() as i64);
                w.bytes(&set);
            }
        }
        w.buf
    }
}

fn client_config(port: u16) -> ClientConfig {
    let mut config = ClientConfig::new(vec![format!("127.0.0.1:{port}")]);
    config.socket_timeout = Duration::from_secs(5);
    config
}

fn record_set(values: &[&str]) -> Vec<u8> {
    let records: Vec<Record> = values
        .iter()
        .map(|v| Record::new(None, Some(Bytes::copy_from_slice(v.as_bytes())), -1))
        .collect();
    encode_message_set(&records, CompressionCodec::None, 1)
        .unwrap()
        .to_vec()
}

// ----------------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------------

#[tokio::test]
async fn single_delivery_sends_one_produce_request() {
    let broker = ScriptedBroker::start(1).await;
    let cluster = Arc::new(Cluster::new(client_config(broker.port())).unwrap());

    deliver_message(
        &cluster,
        Some(Bytes::from("Hello")),
        None,
        "greetings",
        Some(0),
    )
    .await
    .unwrap();

    assert_eq!(broker.produce_requests.load(Ordering::SeqCst), 1);
    cluster.disconnect().await;
}

#[tokio::test]
async fn leader_migration_retries_once_and_succeeds() {
    let broker = ScriptedBroker::start(1).await;
    // first attempt: NotLeaderForPartition, then clean
    broker.script_produce_errors(&[6]);

    let cluster = Arc::new(Cluster::new(client_config(broker.port())).unwrap());
    let mut producer = Producer::new(
        cluster.clone(),
        ProducerConfig {
            max_retries: 1,
            retry_backoff: Duration::from_millis(10),
            ..Default::default()
        },
    )
    .unwrap();

    producer
        .produce(Some(Bytes::from("payload")), None, "t", Some(0), None)
        .unwrap();
    producer.deliver_messages().await.unwrap();

    assert_eq!(producer.buffered_message_count(), 0);
    assert_eq!(broker.produce_requests.load(Ordering::SeqCst), 2);
    // the retry envelope refreshed metadata between the attempts
    assert!(broker.metadata_requests.load(Ordering::SeqCst) >= 2);
    cluster.disconnect().await;
}

#[tokio::test]
async fn fatal_produce_error_drops_and_surfaces() {
    let broker = ScriptedBroker::start(1).await;
    // MessageSizeTooLarge on every attempt would retry forever if it
    // were treated as retriable; it must fail on the first pass
    broker.script_produce_errors(&[10]);

    let cluster = Arc::new(Cluster::new(client_config(broker.port())).unwrap());
    let mut producer = Producer::new(
        cluster.clone(),
        ProducerConfig {
            max_retries: 2,
            retry_backoff: Duration::from_millis(10),
            ..Default::default()
        },
    )
    .unwrap();

    producer
        .produce(Some(Bytes::from("too big")), None, "t", Some(0), None)
        .unwrap();
    let err = producer.deliver_messages().await.unwrap_err();

    assert_eq!(
        err,
        milena::error::Error::Kafka(milena::error::KafkaCode::MessageSizeTooLarge)
    );
    assert_eq!(producer.buffered_message_count(), 0);
    assert_eq!(broker.produce_requests.load(Ordering::SeqCst), 1);
    cluster.disconnect().await;
}

#[tokio::test]
async fn resolve_offset_translates_symbolic_targets() {
    let broker = ScriptedBroker::start(2).await;
    let cluster = Arc::new(Cluster::new(client_config(broker.port())).unwrap());

    assert_eq!(
        cluster.resolve_offset("t", 0, Offset::EARLIEST).await.unwrap(),
        0
    );
    assert_eq!(
        cluster.resolve_offset("t", 0, Offset::LATEST).await.unwrap(),
        123
    );
    assert_eq!(
        cluster.resolve_offset("t", 1, Offset::new(55)).await.unwrap(),
        55
    );
    cluster.disconnect().await;
}

#[tokio::test]
async fn offset_commit_fetch_round_trip_survives_restart() {
    let broker = ScriptedBroker::start(3).await;
    let cluster = Arc::new(Cluster::new(client_config(broker.port())).unwrap());

    let membership = GroupMembership {
        group_id: "g".to_string(),
        member_id: "member-1".to_string(),
        generation_id: 1,
    };

    let mut manager = OffsetManager::new(
        cluster.clone(),
        Duration::from_secs(3600),
        0,
        Instrumentation::default(),
    );
    manager.mark_as_processed("t", 0, 99);
    manager.mark_as_processed("t", 1, 49);
    manager.commit_offsets(&membership).await.unwrap();
    assert_eq!(manager.uncommitted_count(), 0);

    // a "restarted" consumer sees the committed positions
    let mut restarted = OffsetManager::new(
        cluster.clone(),
        Duration::from_secs(3600),
        0,
        Instrumentation::default(),
    );
    assert_eq!(
        restarted.next_offset_for("t", 0, &membership).await.unwrap(),
        100
    );
    assert_eq!(
        restarted.next_offset_for("t", 1, &membership).await.unwrap(),
        50
    );
    assert_eq!(
        restarted.next_offset_for("t", 2, &membership).await.unwrap(),
        -1
    );
    cluster.disconnect().await;
}

#[tokio::test]
async fn consumer_joins_fetches_and_commits() {
    let broker = ScriptedBroker::start(2).await;
    broker.set_record_set("t", 0, &record_set(&["a0", "a1"]));
    broker.set_record_set("t", 1, &record_set(&["b0"]));

    let cluster = Arc::new(Cluster::new(client_config(broker.port())).unwrap());
    let mut consumer = Consumer::new(
        cluster,
        ConsumerConfig::new("g"),
        FetchConfig::default(),
    )
    .unwrap();
    consumer.subscribe("t");

    let batches = consumer.poll().await.unwrap();

    // sole member: both partitions assigned
    assert_eq!(consumer.assignment().len(), 2);
    assert_eq!(batches.len(), 2);

    let mut seen = Vec::new();
    for batch in &batches {
        assert_eq!(batch.error_code, None);
        for message in &batch.messages {
            seen.push((
                batch.partition,
                message.offset,
                message.value.clone().unwrap(),
            ));
            consumer.mark_message_as_processed(message);
        }
    }
    seen.sort();
    assert_eq!(
        seen,
        vec![
            (0, 0, Bytes::from("a0")),
            (0, 1, Bytes::from("a1")),
            (1, 0, Bytes::from("b0")),
        ]
    );

    consumer.commit_offsets().await.unwrap();
    assert_eq!(broker.committed_offset("t", 0), Some(2));
    assert_eq!(broker.committed_offset("t", 1), Some(1));

    consumer.close().await;
}

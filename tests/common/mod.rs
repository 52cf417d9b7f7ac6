//! Shared test infrastructure for relay integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::Instant;

use myhero_ernst::{
    BrokerEvent, ConnectionConfig, DiscoveryError, EventSource, RelayError, ResolvedEndpoint,
    ServiceLookup, SrvTarget, Subscriber, VoteForwarder, VoteMessage, VoteResult, VOTE_TOPIC,
};

// --- Output capture ---

/// `Write` sink whose contents can be read back after the relay wrote to it.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.buf.lock().unwrap().clone()).expect("output is not UTF-8")
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(String::from).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// --- Broker doubles ---

/// Replays a fixed list of events, then reports the source closed.
pub struct ScriptedEvents {
    events: VecDeque<BrokerEvent>,
}

impl ScriptedEvents {
    pub fn new(events: impl IntoIterator<Item = BrokerEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }
}

#[async_trait]
impl EventSource for ScriptedEvents {
    async fn next_event(&mut self) -> Option<BrokerEvent> {
        self.events.pop_front()
    }
}

/// Source that never produces an event.
pub struct SilentEvents;

#[async_trait]
impl EventSource for SilentEvents {
    async fn next_event(&mut self) -> Option<BrokerEvent> {
        std::future::pending().await
    }
}

pub fn connected() -> BrokerEvent {
    BrokerEvent::Connected {
        code: "Success".to_string(),
    }
}

pub fn disconnected() -> BrokerEvent {
    BrokerEvent::Disconnected {
        reason: "connection reset by peer".to_string(),
    }
}

pub fn vote(hero: &str) -> BrokerEvent {
    BrokerEvent::Message(VoteMessage::new(VOTE_TOPIC, hero))
}

/// Records every subscribe request.
#[derive(Clone, Default)]
pub struct RecordingSubscriber {
    topics: Arc<Mutex<Vec<String>>>,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().clone()
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    async fn subscribe(&self, topic: &str) -> Result<(), RelayError> {
        self.topics.lock().unwrap().push(topic.to_string());
        Ok(())
    }
}

/// Subscriber whose client is gone.
pub struct ClosedSubscriber;

#[async_trait]
impl Subscriber for ClosedSubscriber {
    async fn subscribe(&self, _topic: &str) -> Result<(), RelayError> {
        Err(RelayError::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "request channel closed",
        )))
    }
}

// --- Forwarder doubles ---

/// One observed forwarder call.
#[derive(Debug, Clone)]
pub struct Call {
    pub hero: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Forwarder that takes `delay` per vote and records call timing.
#[derive(Clone)]
pub struct SlowForwarder {
    delay: Duration,
    result: VoteResult,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl SlowForwarder {
    pub fn new(delay: Duration, result: VoteResult) -> Self {
        Self {
            delay,
            result,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoteForwarder for SlowForwarder {
    async fn record_vote(&self, hero: &str) -> VoteResult {
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;
        self.calls.lock().unwrap().push(Call {
            hero: hero.to_string(),
            started,
            finished: Instant::now(),
        });
        self.result
    }
}

// --- Mock data service ---

/// One request seen by the mock data service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub hero: String,
    pub key: Option<String>,
}

#[derive(Clone)]
struct DataServiceState {
    status: StatusCode,
    body: String,
    requests: Arc<Mutex<Vec<DataRequest>>>,
}

async fn record_vote_handler(
    State(state): State<DataServiceState>,
    Path(hero): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    let key = headers
        .get("key")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    state
        .requests
        .lock()
        .unwrap()
        .push(DataRequest { hero, key });
    (state.status, state.body.clone())
}

/// Data service on a random local port answering every vote the same way.
pub struct MockDataService {
    pub url: reqwest::Url,
    requests: Arc<Mutex<Vec<DataRequest>>>,
}

impl MockDataService {
    pub async fn start(status: StatusCode, body: &str) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = DataServiceState {
            status,
            body: body.to_string(),
            requests: requests.clone(),
        };
        let app = Router::new()
            .route("/vote/:hero", post(record_vote_handler))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock data service");
        let addr = listener.local_addr().expect("failed to get local addr");
        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock data service failed");
        });

        Self {
            url: format!("http://{addr}").parse().unwrap(),
            requests,
        }
    }

    /// Answers `{"result": "<result>"}` with 200.
    pub async fn answering(result: &str) -> Self {
        Self::start(StatusCode::OK, &format!(r#"{{"result": "{result}"}}"#)).await
    }

    pub fn requests(&self) -> Vec<DataRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Address on which nothing is listening.
pub async fn closed_port_url() -> reqwest::Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}").parse().unwrap()
}

// --- Fake MQTT broker ---

/// Minimal MQTT 3.1.1 broker on a random local port.
///
/// Serves one session per entry in `votes`: CONNACK, wait for SUBSCRIBE and
/// SUBACK it, publish the vote on [`VOTE_TOPIC`], then hold the connection
/// until [`FakeBroker::hang_up`] and accept the next one.
pub struct FakeBroker {
    pub endpoint: ResolvedEndpoint,
    subscribes: Arc<Mutex<Vec<String>>>,
    hangup: Arc<Notify>,
}

impl FakeBroker {
    pub async fn start(votes: &[&str]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake broker");
        let addr = listener.local_addr().expect("failed to get local addr");
        let subscribes = Arc::new(Mutex::new(Vec::new()));
        let hangup = Arc::new(Notify::new());

        let votes: Vec<String> = votes.iter().map(|v| v.to_string()).collect();
        let task_subscribes = subscribes.clone();
        let task_hangup = hangup.clone();
        tokio::spawn(async move {
            for hero in votes {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                if serve_session(&mut stream, &hero, &task_subscribes)
                    .await
                    .is_err()
                {
                    return;
                }
                task_hangup.notified().await;
            }
        });

        Self {
            endpoint: ResolvedEndpoint::new(addr.ip().to_string(), addr.port()).unwrap(),
            subscribes,
            hangup,
        }
    }

    /// Topics subscribed to, across all sessions.
    pub fn subscribes(&self) -> Vec<String> {
        self.subscribes.lock().unwrap().clone()
    }

    /// Drop the current session.
    pub fn hang_up(&self) {
        self.hangup.notify_one();
    }
}

async fn serve_session(
    stream: &mut TcpStream,
    hero: &str,
    subscribes: &Mutex<Vec<String>>,
) -> io::Result<()> {
    let (header, _) = read_packet(stream).await?;
    assert_eq!(header >> 4, 1, "expected CONNECT");
    stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await?;

    loop {
        let (header, body) = read_packet(stream).await?;
        if header >> 4 != 8 {
            continue;
        }
        let topic_len = u16::from_be_bytes([body[2], body[3]]) as usize;
        let topic = String::from_utf8_lossy(&body[4..4 + topic_len]).into_owned();
        subscribes.lock().unwrap().push(topic);
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
            .await?;
        break;
    }

    let mut publish = vec![0x30];
    encode_remaining_length(2 + VOTE_TOPIC.len() + hero.len(), &mut publish);
    publish.extend_from_slice(&(VOTE_TOPIC.len() as u16).to_be_bytes());
    publish.extend_from_slice(VOTE_TOPIC.as_bytes());
    publish.extend_from_slice(hero.as_bytes());
    stream.write_all(&publish).await
}

async fn read_packet(stream: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Poll `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// --- Config builders ---

pub const DATA_KEY: &str = "s3cr3t-key";

pub fn test_connection(data_server_url: reqwest::Url) -> ConnectionConfig {
    ConnectionConfig {
        data_server_url,
        data_server_key: DATA_KEY.to_string(),
        broker: ResolvedEndpoint::new("127.0.0.1", 1883).unwrap(),
    }
}

// --- DNS doubles ---

/// Answers from fixed SRV and A tables.
#[derive(Default)]
pub struct StaticLookup {
    srv: HashMap<String, Vec<SrvTarget>>,
    a: HashMap<String, Vec<Ipv4Addr>>,
    queries: Mutex<Vec<String>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_srv(mut self, name: &str, targets: &[(&str, u16)]) -> Self {
        self.srv.insert(
            name.to_string(),
            targets
                .iter()
                .map(|(host, port)| SrvTarget {
                    host: host.to_string(),
                    port: *port,
                })
                .collect(),
        );
        self
    }

    pub fn with_a(mut self, host: &str, addrs: &[Ipv4Addr]) -> Self {
        self.a.insert(host.to_string(), addrs.to_vec());
        self
    }

    /// Every query made, as `"<TYPE> <name>"`.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceLookup for StaticLookup {
    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, DiscoveryError> {
        self.queries.lock().unwrap().push(format!("SRV {name}"));
        Ok(self.srv.get(name).cloned().unwrap_or_default())
    }

    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, DiscoveryError> {
        self.queries.lock().unwrap().push(format!("A {host}"));
        Ok(self.a.get(host).cloned().unwrap_or_default())
    }
}

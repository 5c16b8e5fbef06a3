//! Mock implementations for testing
//!
//! [`MockTransport`] and [`ManualClock`] let the hub client run without a
//! network or a real clock. Both are cheap handles over shared state: keep a
//! clone in the test to script behaviour and inspect what the client did.

use crate::hub::Clock;
use crate::protocol::Credentials;
use crate::transport::{InboundMessage, MqttState, TlsMode, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// One publish accepted by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug)]
struct MockState {
    state: MqttState,
    probe_mode: TlsMode,
    probe_fails: bool,
    connect_script: VecDeque<MqttState>,
    always_refuse: Option<MqttState>,
    connects: Vec<(String, Credentials)>,
    subscriptions: Vec<String>,
    reject_subscribes: bool,
    published: Vec<PublishedMessage>,
    reject_publishes: bool,
    inbound: VecDeque<InboundMessage>,
    pumps: u32,
    disconnects: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            state: MqttState::Disconnected,
            probe_mode: TlsMode::Verified,
            probe_fails: false,
            connect_script: VecDeque::new(),
            always_refuse: None,
            connects: Vec::new(),
            subscriptions: Vec::new(),
            reject_subscribes: false,
            published: Vec::new(),
            reject_publishes: false,
            inbound: VecDeque::new(),
            pumps: 0,
            disconnects: 0,
        }
    }
}

/// Scriptable in-memory transport
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // a panicking test must not cascade into unrelated assertions
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark the transport connected without a CONNECT
    pub fn force_connected(&self) {
        self.lock().state = MqttState::Connected;
    }

    /// Simulate the server dropping the session
    pub fn drop_connection(&self) {
        self.lock().state = MqttState::ConnectionLost;
    }

    /// The next `count` connects are refused with `state`
    pub fn fail_connects(&self, count: usize, state: MqttState) {
        let mut inner = self.lock();
        inner.connect_script.extend(std::iter::repeat(state).take(count));
    }

    /// Every connect is refused with `state`
    pub fn refuse_all_connects(&self, state: MqttState) {
        self.lock().always_refuse = Some(state);
    }

    pub fn fail_probe(&self, fails: bool) {
        self.lock().probe_fails = fails;
    }

    /// TLS mode reported by a successful probe
    pub fn set_probe_mode(&self, mode: TlsMode) {
        self.lock().probe_mode = mode;
    }

    pub fn reject_publishes(&self, reject: bool) {
        self.lock().reject_publishes = reject;
    }

    pub fn reject_subscribes(&self, reject: bool) {
        self.lock().reject_subscribes = reject;
    }

    /// Queue an inbound publish for the next pump
    pub fn inject<T: Into<String>, P: Into<Bytes>>(&self, topic: T, payload: P) {
        self.lock()
            .inbound
            .push_back(InboundMessage::new(topic, payload));
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .map(|p| p.topic.clone())
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    /// Number of connect attempts, successful or not
    pub fn connect_attempts(&self) -> usize {
        self.lock().connects.len()
    }

    /// Credentials presented on the most recent connect attempt
    pub fn last_credentials(&self) -> Option<Credentials> {
        self.lock().connects.last().map(|(_, c)| c.clone())
    }

    pub fn last_host(&self) -> Option<String> {
        self.lock().connects.last().map(|(h, _)| h.clone())
    }

    pub fn pump_count(&self) -> u32 {
        self.lock().pumps
    }

    pub fn disconnect_count(&self) -> u32 {
        self.lock().disconnects
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn probe(&mut self, host: &str) -> Result<TlsMode, TransportError> {
        let inner = self.lock();
        if inner.probe_fails {
            return Err(TransportError::Tls(format!("mock handshake with {host} failed")));
        }
        Ok(inner.probe_mode)
    }

    async fn connect(
        &mut self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.connects.push((host.to_string(), credentials.clone()));

        let refusal = inner
            .connect_script
            .pop_front()
            .or(inner.always_refuse);
        match refusal {
            Some(state) => {
                inner.state = state;
                Err(TransportError::Connect(state))
            }
            None => {
                inner.state = MqttState::Connected;
                Ok(())
            }
        }
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.state != MqttState::Connected {
            return Err(TransportError::NotConnected);
        }
        if inner.reject_subscribes {
            return Err(TransportError::Request("mock subscribe rejected".to_string()));
        }
        inner.subscriptions.push(filter.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.state != MqttState::Connected {
            return Err(TransportError::NotConnected);
        }
        if inner.reject_publishes {
            return Err(TransportError::Request("mock request queue full".to_string()));
        }
        inner.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
        });
        Ok(())
    }

    async fn pump(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
        let mut inner = self.lock();
        inner.pumps += 1;
        if inner.state != MqttState::Connected {
            return Ok(Vec::new());
        }
        Ok(inner.inbound.drain(..).collect())
    }

    fn is_connected(&self) -> bool {
        self.lock().state == MqttState::Connected
    }

    fn state(&self) -> MqttState {
        self.lock().state
    }

    async fn disconnect(&mut self) {
        let mut inner = self.lock();
        inner.disconnects += 1;
        inner.state = MqttState::Disconnected;
    }
}

/// Hand-driven clock. `None` means unsynchronized.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Option<u64>>>,
}

impl ManualClock {
    pub fn at(epoch: u64) -> Self {
        Self {
            now: Arc::new(Mutex::new(Some(epoch))),
        }
    }

    /// A clock that never synchronized
    pub fn unsynchronized() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<u64>> {
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, epoch: u64) {
        *self.lock() = Some(epoch);
    }

    pub fn advance(&self, seconds: u64) {
        let mut now = self.lock();
        *now = now.map(|t| t + seconds);
    }
}

impl Clock for ManualClock {
    fn now_epoch(&self) -> Option<u64> {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConnectionDescriptor;

    fn credentials() -> Credentials {
        let descriptor =
            ConnectionDescriptor::parse("HostName=h;DeviceId=d;SharedAccessKey=AAAA").unwrap();
        Credentials::derive(&descriptor, 100).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let mock = MockTransport::new();
        mock.fail_connects(2, MqttState::Unavailable);
        let mut transport = mock.clone();

        for _ in 0..2 {
            let result = transport.connect("h", &credentials()).await;
            assert!(matches!(
                result,
                Err(TransportError::Connect(MqttState::Unavailable))
            ));
        }
        assert!(transport.connect("h", &credentials()).await.is_ok());
        assert!(mock.is_connected());
        assert_eq!(mock.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_pump_drains_in_order_only_when_connected() {
        let mock = MockTransport::new();
        mock.inject("a", "1");
        mock.inject("b", "2");
        let mut transport = mock.clone();

        assert!(transport.pump().await.unwrap().is_empty());

        mock.force_connected();
        let inbound = transport.pump().await.unwrap();
        let topics: Vec<&str> = inbound.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, vec!["a", "b"]);
        assert_eq!(mock.pump_count(), 2);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::at(1_000);
        clock.advance(5);
        assert_eq!(clock.now_epoch(), Some(1_005));
        assert_eq!(ManualClock::unsynchronized().now_epoch(), None);
        let unsynced = ManualClock::unsynchronized();
        unsynced.advance(5);
        assert_eq!(unsynced.now_epoch(), None);
    }
}

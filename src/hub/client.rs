//! IoT hub device client facade
//!
//! Lifecycle: [`IotHubClient::init`] resolves identity and credentials and
//! probes TLS, [`IotHubClient::connect`] opens the MQTT session and
//! subscribes, and the application then calls [`IotHubClient::poll`]
//! frequently from a single task. All observer callbacks run inside `poll`.

use super::clock::{compute_expiry, Clock, SystemClock};
use super::dispatcher::{C2dMessage, DesiredPatch, Dispatch, Dispatcher, Observers};
use super::session::HubSession;
use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::hub_span;
use crate::protocol::{ConnectionDescriptor, Credentials, TopicBuilder};
use crate::transport::mqtt::RetryPolicy;
use crate::transport::{MqttSession, MqttState, TlsMode, Transport, TransportError};
use tracing::{debug, info, warn, Instrument};

/// Client lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// Credentials derived and TLS probed
    Initialized,
    /// Connecting, or waiting for `poll` to reconnect after the session was
    /// lost or `connect` gave up
    Connecting,
    Connected,
}

/// Device client for one IoT hub identity
pub struct IotHubClient {
    config: HubConfig,
    clock: Box<dyn Clock>,
    session: HubSession,
    observers: Observers,
    descriptor: Option<ConnectionDescriptor>,
    credentials: Option<Credentials>,
    tls_mode: Option<TlsMode>,
    state: SessionState,
}

impl IotHubClient {
    pub fn new<T, C>(config: HubConfig, transport: T, clock: C) -> Self
    where
        T: Transport + 'static,
        C: Clock + 'static,
    {
        let max_packet_bytes = config.mqtt.buffer_bytes;
        Self {
            config,
            clock: Box::new(clock),
            session: HubSession::new(Box::new(transport), max_packet_bytes),
            observers: Observers::default(),
            descriptor: None,
            credentials: None,
            tls_mode: None,
            state: SessionState::Uninitialized,
        }
    }

    /// Client over the real MQTT transport and the system clock
    pub fn from_config(config: HubConfig) -> Self {
        let transport = MqttSession::new(config.mqtt.clone(), config.tls.clone());
        Self::new(config, transport, SystemClock)
    }

    /// Resolve and parse the connection string, derive credentials and probe
    /// the TLS chain. On error the client stays uninitialized.
    pub async fn init(&mut self) -> HubResult<()> {
        if matches!(
            self.state,
            SessionState::Connecting | SessionState::Connected
        ) {
            warn!("init called on a connected client, ignoring");
            return Ok(());
        }

        let connection_string = self.config.connection_string()?;
        let descriptor = ConnectionDescriptor::parse(&connection_string)?;
        let expiry = compute_expiry(self.clock.as_ref(), &self.config.time)?;
        let credentials = Credentials::derive(&descriptor, expiry)?;

        let host = descriptor.host().to_string();
        let tls_mode = self
            .session
            .transport_mut()
            .probe(&host)
            .instrument(hub_span!(operation = "probe", host = %host))
            .await
            .map_err(|e| HubError::tls_probe(&host, e.to_string()))?;

        info!(
            host = %host,
            device_id = %descriptor.device_id(),
            expiry = expiry,
            tls = ?tls_mode,
            "IoT hub client initialized"
        );

        self.session.set_device_id(descriptor.device_id());
        self.descriptor = Some(descriptor);
        self.credentials = Some(credentials);
        self.tls_mode = Some(tls_mode);
        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Open the MQTT session, retrying per the configured policy, then
    /// subscribe to C2D, twin responses and desired patches
    ///
    /// If every attempt fails the client stays in `Connecting` and each later
    /// `poll` makes one more attempt, until `disconnect` is called.
    pub async fn connect(&mut self) -> HubResult<()> {
        let host = self.host().ok_or(HubError::NotInitialized)?.to_string();
        let span = hub_span!(operation = "connect", host = %host);
        self.connect_with_retry(&host).instrument(span).await
    }

    async fn connect_with_retry(&mut self, host: &str) -> HubResult<()> {
        let policy = RetryPolicy::from_config(&self.config.mqtt);
        self.state = SessionState::Connecting;
        self.session.set_active(false);

        let mut last_state = MqttState::Disconnected;
        for attempt in 1..=policy.max_attempts {
            info!(attempt = attempt, max_attempts = policy.max_attempts, "Connecting to IoT hub");
            match self.attempt_connect(host).await {
                Ok(()) => return Ok(()),
                Err(state) => {
                    last_state = state;
                    warn!(attempt = attempt, state = %state, "Connect attempt failed");
                }
            }
            if let Some(delay) = policy.delay_after(attempt) {
                tokio::time::sleep(delay).await;
            }
        }

        Err(HubError::ConnectFailed {
            attempts: policy.max_attempts,
            state: last_state,
        })
    }

    /// One CONNECT plus the subscribes. Returns the failure state on error.
    async fn attempt_connect(&mut self, host: &str) -> Result<(), MqttState> {
        if let Err(e) = self.refresh_if_expired() {
            warn!(error = %e, "Credential refresh failed, reusing current token");
        }
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(MqttState::Disconnected);
        };

        let transport = self.session.transport_mut();
        if let Err(e) = transport.connect(host, credentials).await {
            return Err(match e {
                TransportError::Connect(state) => state,
                _ => transport.state(),
            });
        }

        if self.tls_mode == Some(TlsMode::Insecure) {
            warn!("Connected WITHOUT TLS certificate verification");
        }
        self.subscribe_all();
        self.session.set_active(true);
        self.state = SessionState::Connected;
        info!("Connected to IoT hub");
        Ok(())
    }

    /// Subscribe failures are logged, never fatal
    fn subscribe_all(&mut self) {
        let Some(device_id) = self.device_id().map(str::to_string) else {
            return;
        };
        let transport = self.session.transport_mut();
        for filter in TopicBuilder::subscription_filters(&device_id) {
            match transport.subscribe(&filter) {
                Ok(()) => debug!(filter = %filter, "Subscribed"),
                Err(e) => warn!(filter = %filter, error = %e, "Subscribe failed"),
            }
        }
    }

    /// Drive the session once: reconnect (one attempt) if it was lost, run the
    /// network, and dispatch what arrived. Returns how many messages reached
    /// an observer.
    pub async fn poll(&mut self) -> usize {
        let span = hub_span!(operation = "poll");
        self.poll_once().instrument(span).await
    }

    async fn poll_once(&mut self) -> usize {
        self.detect_loss();

        if self.state == SessionState::Connecting {
            let Some(host) = self.host().map(str::to_string) else {
                return 0;
            };
            if let Err(state) = self.attempt_connect(&host).await {
                warn!(state = %state, "Reconnect attempt failed");
                return 0;
            }
        }
        if self.state != SessionState::Connected {
            return 0;
        }

        let inbound = match self.session.transport_mut().pump().await {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Transport pump failed");
                Vec::new()
            }
        };
        self.detect_loss();

        let mut delivered = 0;
        for message in &inbound {
            if Dispatcher::dispatch(message, &mut self.session, &mut self.observers)
                == Dispatch::Delivered
            {
                delivered += 1;
            }
        }
        delivered
    }

    fn detect_loss(&mut self) {
        if self.state == SessionState::Connected && !self.session.transport().is_connected() {
            warn!(state = %self.session.transport().state(), "IoT hub session lost");
            self.session.set_active(false);
            self.state = SessionState::Connecting;
        }
    }

    fn refresh_if_expired(&mut self) -> HubResult<()> {
        let expired = match (self.credentials.as_ref(), self.clock.now_epoch()) {
            (Some(credentials), Some(now)) => credentials.is_expired(now),
            _ => false,
        };
        if expired {
            info!("SAS token expired, deriving a new one");
            self.refresh_credentials()?;
        }
        Ok(())
    }

    /// Derive a fresh token from the clock. Used by the next CONNECT.
    pub fn refresh_credentials(&mut self) -> HubResult<()> {
        let descriptor = self.descriptor.as_ref().ok_or(HubError::NotInitialized)?;
        let expiry = compute_expiry(self.clock.as_ref(), &self.config.time)?;
        self.credentials = Some(Credentials::derive(descriptor, expiry)?);
        debug!(expiry = expiry, "Credentials refreshed");
        Ok(())
    }

    /// Send DISCONNECT and drop the session; the client stays initialized
    pub async fn disconnect(&mut self) {
        if self.session.is_active() || self.session.transport().is_connected() {
            self.session.transport_mut().disconnect().await;
        }
        self.session.set_active(false);
        if self.state != SessionState::Uninitialized {
            self.state = SessionState::Initialized;
        }
        info!("Disconnected from IoT hub");
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn send_telemetry(&mut self, payload: &[u8], properties: Option<&str>) -> HubResult<()> {
        self.session.send_telemetry(payload, properties)
    }

    /// Request the full twin; the document arrives at the twin observer
    pub fn request_twin(&mut self) -> HubResult<u32> {
        self.session.request_twin()
    }

    pub fn update_reported(&mut self, payload: &[u8]) -> HubResult<u32> {
        self.session.update_reported(payload)
    }

    pub fn set_c2d_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&mut HubSession, C2dMessage<'_>) + Send + 'static,
    {
        self.observers.set_c2d(Box::new(observer));
    }

    pub fn set_desired_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&mut HubSession, DesiredPatch<'_>) + Send + 'static,
    {
        self.observers.set_desired(Box::new(observer));
    }

    pub fn set_twin_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&mut HubSession, &[u8]) + Send + 'static,
    {
        self.observers.set_twin(Box::new(observer));
    }

    pub fn clear_c2d_observer(&mut self) {
        self.observers.clear_c2d();
    }

    pub fn clear_desired_observer(&mut self) {
        self.observers.clear_desired();
    }

    pub fn clear_twin_observer(&mut self) {
        self.observers.clear_twin();
    }

    pub fn device_id(&self) -> Option<&str> {
        self.descriptor.as_ref().map(ConnectionDescriptor::device_id)
    }

    pub fn host(&self) -> Option<&str> {
        self.descriptor.as_ref().map(ConnectionDescriptor::host)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// TLS mode chosen during init
    pub fn tls_mode(&self) -> Option<TlsMode> {
        self.tls_mode
    }

    /// The publishing half, as observers see it
    pub fn session(&mut self) -> &mut HubSession {
        &mut self.session
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }
}

//! MQTT 3.1.1 over TLS session to the IoT hub
//!
//! Owns the rumqttc client handle and event loop. There is no background
//! task: the event loop only advances inside `connect`, `pump` and
//! `disconnect`, all driven by the hub client's caller.

use super::connection::{configure_mqtt_options, MqttState};
use super::message_handler::{EventRoute, MessageHandler};
use super::tls::{build_insecure_config, build_verified_config, probe_tls};
use crate::config::{MqttSection, TlsSection};
use crate::error::redact_secrets;
use crate::protocol::Credentials;
use crate::transport::{InboundMessage, TlsMode, Transport, TransportError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, EventLoop, NetworkOptions, QoS};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on event loop events handled by one `pump`
const MAX_EVENTS_PER_PUMP: usize = 64;
/// Wait for follow-up events once the first one arrived. Non-zero, so a
/// queued request gets a chance to finish its write.
const DRAIN_WAIT: Duration = Duration::from_millis(5);

/// Production [`Transport`] backed by rumqttc
pub struct MqttSession {
    settings: MqttSection,
    tls: TlsSection,
    tls_config: Option<Arc<ClientConfig>>,
    tls_mode: TlsMode,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    state: MqttState,
}

impl MqttSession {
    pub fn new(settings: MqttSection, tls: TlsSection) -> Self {
        Self {
            settings,
            tls,
            tls_config: None,
            tls_mode: TlsMode::Verified,
            client: None,
            event_loop: None,
            state: MqttState::Disconnected,
        }
    }

    /// TLS mode chosen by the last probe
    pub fn tls_mode(&self) -> TlsMode {
        self.tls_mode
    }

    fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.socket_timeout_secs)
    }

    fn tls_config(&mut self) -> Result<Arc<ClientConfig>, TransportError> {
        if let Some(config) = &self.tls_config {
            return Ok(config.clone());
        }
        let config = Arc::new(build_verified_config(self.tls.ca_cert_path.as_deref())?);
        self.tls_config = Some(config.clone());
        Ok(config)
    }

    /// Drop the client and event loop, recording why
    fn teardown(&mut self, state: MqttState) {
        self.client = None;
        self.event_loop = None;
        self.state = state;
    }

    /// Poll until CONNACK. Outgoing notifications before it are skipped.
    async fn await_connack(event_loop: &mut EventLoop) -> MqttState {
        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    if let EventRoute::ConnectionAcknowledged(code) =
                        MessageHandler::route_mqtt_event(&event)
                    {
                        return MqttState::from_return_code(code);
                    }
                }
                Err(e) => {
                    warn!(error = %redact_secrets(&e.to_string()), "MQTT connect attempt failed");
                    return MqttState::from_connect_error(&e);
                }
            }
        }
    }

    /// Apply one routed event; returns false once the session is gone
    fn handle_route(&mut self, route: EventRoute, inbound: &mut Vec<InboundMessage>) -> bool {
        match route {
            EventRoute::MessageReceived(message) => {
                debug!(topic = %message.topic, bytes = message.payload.len(), "MQTT publish received");
                inbound.push(message);
                true
            }
            EventRoute::Disconnected => {
                warn!("IoT hub closed the MQTT session");
                self.teardown(MqttState::ConnectionLost);
                false
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
            } => {
                if let Err(e) = MessageHandler::validate_subscription_success(&return_codes) {
                    warn!(packet_id = packet_id, "{}", e);
                } else {
                    debug!(packet_id = packet_id, "Subscription confirmed");
                }
                true
            }
            EventRoute::ConnectionAcknowledged(code) => {
                self.state = MqttState::from_return_code(code);
                code == ConnectReturnCode::Success
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    fn connected_client(&self) -> Result<&AsyncClient, TransportError> {
        match (&self.client, self.state) {
            (Some(client), MqttState::Connected) => Ok(client),
            _ => Err(TransportError::NotConnected),
        }
    }
}

#[async_trait]
impl Transport for MqttSession {
    async fn probe(&mut self, host: &str) -> Result<TlsMode, TransportError> {
        let verified = Arc::new(build_verified_config(self.tls.ca_cert_path.as_deref())?);
        let timeout = self.socket_timeout();

        match probe_tls(host, self.settings.port, verified.clone(), timeout).await {
            Ok(()) => {
                info!(host = %host, "TLS chain verified against trusted root");
                self.tls_config = Some(verified);
                self.tls_mode = TlsMode::Verified;
                Ok(TlsMode::Verified)
            }
            Err(e) if self.tls.insecure_fallback => {
                warn!(host = %host, error = %e, "TLS verification failed, continuing WITHOUT certificate verification");
                let insecure = Arc::new(build_insecure_config());
                probe_tls(host, self.settings.port, insecure.clone(), timeout).await?;
                self.tls_config = Some(insecure);
                self.tls_mode = TlsMode::Insecure;
                Ok(TlsMode::Insecure)
            }
            Err(e) => Err(e),
        }
    }

    async fn connect(
        &mut self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<(), TransportError> {
        // a fresh session per attempt; the previous one is dropped
        self.teardown(MqttState::Disconnected);

        let tls_config = self.tls_config()?;
        let options = configure_mqtt_options(host, credentials, &self.settings, tls_config);
        let (client, mut event_loop) =
            AsyncClient::new(options, self.settings.request_queue_capacity);

        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(self.settings.socket_timeout_secs);
        event_loop.set_network_options(network_options);

        let state = match tokio::time::timeout(
            self.socket_timeout(),
            Self::await_connack(&mut event_loop),
        )
        .await
        {
            Ok(state) => state,
            Err(_) => MqttState::ConnectionTimeout,
        };

        if state != MqttState::Connected {
            self.teardown(state);
            return Err(TransportError::Connect(state));
        }

        info!(host = %host, client_id = %credentials.client_id(), "MQTT session established");
        self.client = Some(client);
        self.event_loop = Some(event_loop);
        self.state = MqttState::Connected;
        Ok(())
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        self.connected_client()?
            .try_subscribe(filter, QoS::AtMostOnce)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.connected_client()?
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn pump(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
        let mut inbound = Vec::new();
        let mut wait = Duration::from_millis(self.settings.poll_timeout_ms);

        // wait for the first event, then keep going while the network stays busy
        for _ in 0..MAX_EVENTS_PER_PUMP {
            let Some(event_loop) = self.event_loop.as_mut() else {
                break;
            };
            // decoded but not yet returned; popping them needs no I/O
            let event = match event_loop.state.events.pop_front() {
                Some(event) => event,
                None => match tokio::time::timeout(wait, event_loop.poll()).await {
                    Ok(Ok(event)) => event,
                    Ok(Err(e)) => {
                        warn!(error = %redact_secrets(&e.to_string()), "MQTT connection lost");
                        self.teardown(MqttState::ConnectionLost);
                        break;
                    }
                    Err(_) => break,
                },
            };

            let route = MessageHandler::route_mqtt_event(&event);
            if !self.handle_route(route, &mut inbound) {
                break;
            }
            wait = DRAIN_WAIT;
        }

        Ok(inbound)
    }

    fn is_connected(&self) -> bool {
        self.state == MqttState::Connected && self.client.is_some()
    }

    fn state(&self) -> MqttState {
        self.state
    }

    async fn disconnect(&mut self) {
        if let (Some(client), Some(event_loop)) = (self.client.as_ref(), self.event_loop.as_mut())
        {
            if client.try_disconnect().is_ok() {
                // flush queued publishes and the DISCONNECT itself
                let flush = async {
                    while let Ok(event) = event_loop.poll().await {
                        if matches!(event, rumqttc::Event::Outgoing(rumqttc::Outgoing::Disconnect))
                        {
                            break;
                        }
                    }
                };
                let _ = tokio::time::timeout(Duration::from_secs(1), flush).await;
            }
        }
        self.teardown(MqttState::Disconnected);
        info!("MQTT session closed");
    }
}

//! The publishing half of the client, handed to observers
//!
//! [`HubSession`] can publish telemetry and twin requests but cannot connect.
//! Observers receive `&mut HubSession`, so they can react to a message by
//! publishing without ever reaching the connection lifecycle.

use super::twin::TwinCoordinator;
use crate::error::{HubError, HubResult};
use crate::protocol::TopicBuilder;
use crate::transport::mqtt::publish_packet_size;
use crate::transport::Transport;
use tracing::{debug, info, warn};

pub struct HubSession {
    transport: Box<dyn Transport>,
    device_id: Option<String>,
    twin: TwinCoordinator,
    active: bool,
    max_packet_bytes: usize,
}

impl HubSession {
    pub(crate) fn new(transport: Box<dyn Transport>, max_packet_bytes: usize) -> Self {
        Self {
            transport,
            device_id: None,
            twin: TwinCoordinator::new(),
            active: false,
            max_packet_bytes,
        }
    }

    /// Session established and the transport still reports it up
    pub fn is_connected(&self) -> bool {
        self.active && self.transport.is_connected()
    }

    /// Device id, once the client is initialized
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Last twin request id handed out (0 before the first request)
    pub fn last_request_id(&self) -> u32 {
        self.twin.last_request_id()
    }

    pub fn is_twin_get_pending(&self) -> bool {
        self.twin.is_get_in_flight()
    }

    /// Publish device-to-cloud telemetry
    ///
    /// `properties` is an already-encoded `k=v&k=v` string appended to the
    /// topic verbatim.
    pub fn send_telemetry(&mut self, payload: &[u8], properties: Option<&str>) -> HubResult<()> {
        let device_id = self.publishing_device()?;
        let topic = TopicBuilder::telemetry_topic(&device_id, properties);
        self.publish(&topic, payload)?;
        debug!(topic = %topic, bytes = payload.len(), "Telemetry sent");
        Ok(())
    }

    /// Ask for the full twin document. The reply goes to the twin observer.
    pub fn request_twin(&mut self) -> HubResult<u32> {
        self.publishing_device()?;
        if self.twin.is_get_in_flight() {
            warn!("Twin GET requested while another is outstanding");
        }

        let rid = self.twin.next_request_id();
        let topic = TopicBuilder::twin_get_topic(rid);
        self.twin.begin_get();
        if let Err(e) = self.publish(&topic, &[]) {
            self.twin.abort_get();
            return Err(e);
        }

        info!(rid = rid, "Twin GET requested");
        Ok(rid)
    }

    /// Patch reported properties with a JSON document, sent verbatim
    pub fn update_reported(&mut self, payload: &[u8]) -> HubResult<u32> {
        self.publishing_device()?;

        let rid = self.twin.next_request_id();
        let topic = TopicBuilder::reported_patch_topic(rid);
        self.publish(&topic, payload)?;

        info!(rid = rid, bytes = payload.len(), "Reported properties sent");
        Ok(rid)
    }

    fn publishing_device(&self) -> HubResult<String> {
        if !self.is_connected() {
            return Err(HubError::NotConnected);
        }
        self.device_id.clone().ok_or(HubError::NotInitialized)
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> HubResult<()> {
        // the event loop would drop the whole session over an oversized packet
        let packet_size = publish_packet_size(topic, payload.len());
        if packet_size > self.max_packet_bytes {
            let error = HubError::publish_failed(
                topic,
                format!(
                    "packet of {packet_size} bytes exceeds the {}-byte limit",
                    self.max_packet_bytes
                ),
            );
            warn!(error = %error, "Publish rejected");
            return Err(error);
        }

        self.transport.publish(topic, payload).map_err(|e| {
            let error = HubError::publish_failed(topic, e.to_string());
            warn!(error = %error, "Publish rejected");
            error
        })
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub(crate) fn twin_mut(&mut self) -> &mut TwinCoordinator {
        &mut self.twin
    }

    pub(crate) fn set_device_id(&mut self, device_id: &str) {
        self.device_id = Some(device_id.to_string());
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }
}

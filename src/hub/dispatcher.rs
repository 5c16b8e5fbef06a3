//! Routes inbound publishes to the registered observers

use super::session::HubSession;
use crate::config::PAYLOAD_BUFFER_BYTES;
use crate::protocol::topics::{STATUS_NO_CONTENT, STATUS_OK};
use crate::protocol::{classify_topic, InboundTopic};
use crate::transport::InboundMessage;
use std::borrow::Cow;
use tracing::{debug, info, warn};

/// Longest payload handed to an observer; the rest is dropped
pub const MAX_DELIVERED_PAYLOAD: usize = PAYLOAD_BUFFER_BYTES - 1;

/// A cloud-to-device message
#[derive(Debug, Clone, Copy)]
pub struct C2dMessage<'a> {
    /// Full topic, including the encoded message properties
    pub topic: &'a str,
    /// Payload, truncated to [`MAX_DELIVERED_PAYLOAD`] bytes
    pub payload: &'a [u8],
    /// Payload length as received
    pub length: usize,
}

impl C2dMessage<'_> {
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.payload)
    }
}

/// A desired-properties patch
#[derive(Debug, Clone, Copy)]
pub struct DesiredPatch<'a> {
    pub payload: &'a [u8],
    /// `$version` from the topic, 0 when absent
    pub version: u32,
}

impl DesiredPatch<'_> {
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.payload)
    }
}

pub type C2dObserver = Box<dyn FnMut(&mut HubSession, C2dMessage<'_>) + Send>;
pub type DesiredObserver = Box<dyn FnMut(&mut HubSession, DesiredPatch<'_>) + Send>;
pub type TwinObserver = Box<dyn FnMut(&mut HubSession, &[u8]) + Send>;

/// The three observer slots. An empty slot drops its messages.
#[derive(Default)]
pub struct Observers {
    c2d: Option<C2dObserver>,
    desired: Option<DesiredObserver>,
    twin: Option<TwinObserver>,
}

impl Observers {
    pub fn set_c2d(&mut self, observer: C2dObserver) {
        self.c2d = Some(observer);
    }

    pub fn set_desired(&mut self, observer: DesiredObserver) {
        self.desired = Some(observer);
    }

    pub fn set_twin(&mut self, observer: TwinObserver) {
        self.twin = Some(observer);
    }

    pub fn clear_c2d(&mut self) {
        self.c2d = None;
    }

    pub fn clear_desired(&mut self) {
        self.desired = None;
    }

    pub fn clear_twin(&mut self) {
        self.twin = None;
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to an observer
    Delivered,
    /// Handled without an observer (e.g. PATCH acknowledgement)
    Acknowledged,
    Dropped,
}

/// Stateless router from inbound messages to observers
pub struct Dispatcher;

impl Dispatcher {
    pub fn dispatch(
        message: &InboundMessage,
        session: &mut HubSession,
        observers: &mut Observers,
    ) -> Dispatch {
        let length = message.payload.len();
        let payload = &message.payload[..length.min(MAX_DELIVERED_PAYLOAD)];
        if payload.len() < length {
            debug!(topic = %message.topic, length = length, "Inbound payload truncated");
        }

        match classify_topic(&message.topic) {
            InboundTopic::C2d => {
                info!(topic = %message.topic, length = length, "C2D message received");
                let Some(observer) = observers.c2d.as_mut() else {
                    return Dispatch::Dropped;
                };
                observer(
                    session,
                    C2dMessage {
                        topic: &message.topic,
                        payload,
                        length,
                    },
                );
                Dispatch::Delivered
            }
            InboundTopic::TwinResponse { status, rid } => {
                Self::dispatch_twin_response(status, rid, payload, session, observers)
            }
            InboundTopic::DesiredPatch { version } => {
                info!(version = version, "Desired properties update");
                let Some(observer) = observers.desired.as_mut() else {
                    return Dispatch::Dropped;
                };
                observer(session, DesiredPatch { payload, version });
                Dispatch::Delivered
            }
            InboundTopic::Unknown => {
                debug!(topic = %message.topic, "Unhandled topic");
                Dispatch::Dropped
            }
        }
    }

    fn dispatch_twin_response(
        status: u16,
        rid: Option<u32>,
        payload: &[u8],
        session: &mut HubSession,
        observers: &mut Observers,
    ) -> Dispatch {
        match status {
            STATUS_OK if session.twin_mut().take_get_reply() => {
                info!(rid = ?rid, "Twin document received");
                let Some(observer) = observers.twin.as_mut() else {
                    return Dispatch::Dropped;
                };
                observer(session, payload);
                Dispatch::Delivered
            }
            STATUS_OK => {
                debug!(rid = ?rid, "Twin 200 response with no GET outstanding");
                Dispatch::Dropped
            }
            STATUS_NO_CONTENT => {
                info!(rid = ?rid, "Reported properties accepted");
                Dispatch::Acknowledged
            }
            other => {
                warn!(rid = ?rid, status = other, "Twin request failed");
                Dispatch::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MQTT_BUFFER_BYTES;
    use crate::testing::MockTransport;
    use std::sync::{Arc, Mutex};

    fn session() -> (HubSession, MockTransport) {
        let mock = MockTransport::new();
        mock.force_connected();
        let mut session = HubSession::new(Box::new(mock.clone()), MQTT_BUFFER_BYTES);
        session.set_device_id("d1");
        session.set_active(true);
        (session, mock)
    }

    #[test]
    fn test_c2d_delivery_with_length() {
        let (mut session, _mock) = session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut observers = Observers::default();
        observers.set_c2d(Box::new(move |_session, message| {
            sink.lock().unwrap().push((
                message.topic.to_string(),
                message.payload_str().into_owned(),
                message.length,
            ));
        }));

        let message = InboundMessage::new("devices/d1/messages/devicebound/k=v", "hello");
        let outcome = Dispatcher::dispatch(&message, &mut session, &mut observers);

        assert_eq!(outcome, Dispatch::Delivered);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(
                "devices/d1/messages/devicebound/k=v".to_string(),
                "hello".to_string(),
                5
            )]
        );
    }

    #[test]
    fn test_long_payload_truncated() {
        let (mut session, _mock) = session();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let mut observers = Observers::default();
        observers.set_c2d(Box::new(move |_session, message| {
            *sink.lock().unwrap() = Some((message.payload.len(), message.length));
        }));

        let message = InboundMessage::new("devices/d1/messages/devicebound/", vec![b'x'; 2000]);
        Dispatcher::dispatch(&message, &mut session, &mut observers);

        assert_eq!(*seen.lock().unwrap(), Some((1023, 2000)));
    }

    #[test]
    fn test_twin_200_requires_get_flag() {
        let (mut session, _mock) = session();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let mut observers = Observers::default();
        observers.set_twin(Box::new(move |_session, _payload| {
            *counter.lock().unwrap() += 1;
        }));

        let reply = InboundMessage::new("$iothub/twin/res/200/?$rid=7", "{}");
        assert_eq!(
            Dispatcher::dispatch(&reply, &mut session, &mut observers),
            Dispatch::Dropped
        );

        session.request_twin().unwrap();
        assert_eq!(
            Dispatcher::dispatch(&reply, &mut session, &mut observers),
            Dispatch::Delivered
        );
        assert_eq!(
            Dispatcher::dispatch(&reply, &mut session, &mut observers),
            Dispatch::Dropped
        );
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_twin_204_and_errors() {
        let (mut session, _mock) = session();
        let mut observers = Observers::default();

        let accepted = InboundMessage::new("$iothub/twin/res/204/?$rid=2&$version=5", "");
        assert_eq!(
            Dispatcher::dispatch(&accepted, &mut session, &mut observers),
            Dispatch::Acknowledged
        );

        session.request_twin().unwrap();
        let throttled = InboundMessage::new("$iothub/twin/res/429/?$rid=1", "");
        assert_eq!(
            Dispatcher::dispatch(&throttled, &mut session, &mut observers),
            Dispatch::Dropped
        );
        // a failure status does not consume the outstanding GET
        assert!(session.is_twin_get_pending());
    }

    #[test]
    fn test_desired_patch_version() {
        let (mut session, _mock) = session();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let mut observers = Observers::default();
        observers.set_desired(Box::new(move |_session, patch| {
            *sink.lock().unwrap() = Some((patch.payload_str().into_owned(), patch.version));
        }));

        let message = InboundMessage::new(
            "$iothub/twin/PATCH/properties/desired/?$version=12",
            r#"{"telemetryInterval":5}"#,
        );
        Dispatcher::dispatch(&message, &mut session, &mut observers);

        assert_eq!(
            *seen.lock().unwrap(),
            Some((r#"{"telemetryInterval":5}"#.to_string(), 12))
        );
    }

    #[test]
    fn test_observer_can_publish_through_session() {
        let (mut session, mock) = session();
        let mut observers = Observers::default();
        observers.set_desired(Box::new(|session, patch| {
            session.update_reported(patch.payload).unwrap();
        }));

        let message =
            InboundMessage::new("$iothub/twin/PATCH/properties/desired/?$version=1", "{}");
        Dispatcher::dispatch(&message, &mut session, &mut observers);

        let published = mock.published();
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].topic,
            "$iothub/twin/PATCH/properties/reported/?$rid=1"
        );
    }

    #[test]
    fn test_unset_slots_and_unknown_topics_drop() {
        let (mut session, _mock) = session();
        let mut observers = Observers::default();
        observers.set_c2d(Box::new(|_session, _message| {}));
        observers.clear_c2d();

        for topic in [
            "devices/d1/messages/devicebound/",
            "$iothub/twin/PATCH/properties/desired/?$version=1",
            "$iothub/methods/POST/reboot/?$rid=1",
        ] {
            let message = InboundMessage::new(topic, "{}");
            assert_eq!(
                Dispatcher::dispatch(&message, &mut session, &mut observers),
                Dispatch::Dropped,
                "{topic}"
            );
        }
    }
}

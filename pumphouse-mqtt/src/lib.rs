//! MQTT transport adapter for the pumphouse telemetry core
//!
//! Bridges the core's [`Transport`] seam and event queue to a real broker
//! via `rumqttc`. Two pieces cooperate:
//!
//! - [`MqttTransport`]: handed to the scheduler; publishes records with
//!   QoS 1 and returns an adapter-assigned [`MessageId`] per send.
//! - the link loop (spawned by [`MqttLink::start`]): iterates broker
//!   notifications on its own thread and translates them into core events
//!   (connected, disconnected, published). It never touches scheduler
//!   state directly; everything goes through the event queue.
//!
//! Ack correlation relies on QoS 1 acknowledgments arriving in publish
//! order on a single connection: accepted sends queue their id in a FIFO
//! and each PubAck completes the oldest. The pipeline keeps at most one
//! record in flight, so the FIFO stays shallow; on a disconnect it is
//! cleared and any late acks are ignored upstream as stale.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use rumqttc::{Client, Connection, Event as MqttEvent, MqttOptions, Packet, QoS};

use pumphouse_core::{Event, EventSender, MessageId, Transport, TransportError};

/// Pause between reconnect attempts after a connection error
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttLinkConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Retained liveness topic, published on every (re)connect
    pub status_topic: String,
    /// Outgoing request queue depth of the MQTT client
    pub queue_depth: usize,
}

impl Default for MqttLinkConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".into(),
            broker_port: 1883,
            client_id: "pumphouse".into(),
            keep_alive_secs: 30,
            status_topic: "telemetry/status".into(),
            queue_depth: 10,
        }
    }
}

/// Link state shared between the transport and the link loop
struct LinkShared {
    connected: AtomicBool,
    /// Adapter ids of accepted publishes, oldest first
    pending: Mutex<VecDeque<MessageId>>,
    next_id: AtomicU32,
}

impl LinkShared {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
            next_id: AtomicU32::new(0),
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<MessageId>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Reserve the id for the next accepted publish
    fn reserve(&self) -> MessageId {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1));
        self.pending().push_back(id);
        id
    }

    /// Undo a reservation whose publish was rejected by the client
    fn cancel(&self, id: MessageId) {
        let mut pending = self.pending();
        if pending.back() == Some(&id) {
            pending.pop_back();
        }
    }

    /// Complete the oldest accepted publish
    fn complete(&self) -> Option<MessageId> {
        self.pending().pop_front()
    }

    /// Forget in-flight correlation after a connection loss
    fn reset(&self) {
        self.connected.store(false, Ordering::Release);
        self.pending().clear();
    }
}

/// [`Transport`] implementation over a shared `rumqttc` client
#[derive(Clone)]
pub struct MqttTransport {
    client: Client,
    shared: Arc<LinkShared>,
}

impl Transport for MqttTransport {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<MessageId, TransportError> {
        if !self.shared.connected.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        // Reserve before enqueueing so the ack cannot race the bookkeeping
        let id = self.shared.reserve();
        match self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
        {
            Ok(()) => Ok(id),
            Err(e) => {
                warn!("mqtt publish to {topic} rejected: {e}");
                self.shared.cancel(id);
                Err(TransportError::Rejected("mqtt client refused publish"))
            }
        }
    }
}

/// A running broker link: the transport plus its notification thread
pub struct MqttLink {
    pub transport: MqttTransport,
    pub worker: JoinHandle<()>,
}

impl MqttLink {
    /// Connect to the broker and start the notification loop
    ///
    /// Core events derived from broker notifications are posted to
    /// `events`. The loop runs until the process exits; `rumqttc`
    /// reconnects on its own and every reconnect is reported as a fresh
    /// `Connected` event.
    pub fn start(config: MqttLinkConfig, events: EventSender) -> std::io::Result<Self> {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (client, connection) = Client::new(options, config.queue_depth);
        let shared = Arc::new(LinkShared::new());
        let transport = MqttTransport {
            client: client.clone(),
            shared: shared.clone(),
        };

        let status_topic = config.status_topic;
        let worker = std::thread::Builder::new()
            .name("mqtt-link".into())
            .spawn(move || link_loop(connection, client, shared, events, status_topic))?;

        Ok(Self { transport, worker })
    }
}

fn link_loop(
    mut connection: Connection,
    client: Client,
    shared: Arc<LinkShared>,
    events: EventSender,
    status_topic: String,
) {
    for notification in connection.iter() {
        match notification {
            Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt link up");
                shared.connected.store(true, Ordering::Release);
                // Retained liveness marker; QoS 0 so it never enters the
                // ack correlation FIFO.
                if let Err(e) = client.try_publish(&status_topic, QoS::AtMostOnce, true, "connected")
                {
                    debug!("status publish failed: {e}");
                }
                events.send(Event::Connected);
            }
            Ok(MqttEvent::Incoming(Packet::PubAck(ack))) => match shared.complete() {
                Some(id) => {
                    debug!("puback pkid {} completes {id}", ack.pkid);
                    events.send(Event::Published(id));
                }
                None => debug!("puback pkid {} with nothing pending", ack.pkid),
            },
            Ok(MqttEvent::Incoming(Packet::Disconnect)) => {
                info!("mqtt link closed by broker");
                shared.reset();
                events.send(Event::Disconnected);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt connection error: {e}");
                shared.reset();
                events.send(Event::Disconnected);
                std::thread::sleep(RETRY_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The Connection must stay alive: dropping it closes the client's
    // request channel and every publish would fail.
    fn transport() -> (MqttTransport, Connection) {
        let options = MqttOptions::new("test", "localhost", 1883);
        let (client, connection) = Client::new(options, 10);
        let transport = MqttTransport {
            client,
            shared: Arc::new(LinkShared::new()),
        };
        (transport, connection)
    }

    #[test]
    fn publish_while_disconnected_is_refused() {
        let (mut transport, _connection) = transport();
        assert_eq!(
            transport.publish("t", b"x"),
            Err(TransportError::NotConnected)
        );
        assert!(transport.shared.pending().is_empty());
    }

    #[test]
    fn accepted_publishes_get_sequential_ids() {
        let (mut transport, _connection) = transport();
        transport.shared.connected.store(true, Ordering::Release);

        let first = transport.publish("t", b"a").unwrap();
        let second = transport.publish("t", b"b").unwrap();
        assert_eq!(first, MessageId(1));
        assert_eq!(second, MessageId(2));

        // Acks complete oldest-first
        assert_eq!(transport.shared.complete(), Some(first));
        assert_eq!(transport.shared.complete(), Some(second));
        assert_eq!(transport.shared.complete(), None);
    }

    #[test]
    fn reset_clears_correlation_and_connectivity() {
        let (mut transport, _connection) = transport();
        transport.shared.connected.store(true, Ordering::Release);
        transport.publish("t", b"a").unwrap();

        transport.shared.reset();
        assert!(transport.shared.pending().is_empty());
        assert_eq!(
            transport.publish("t", b"b"),
            Err(TransportError::NotConnected)
        );
    }

    #[test]
    fn cancel_only_removes_matching_tail() {
        let shared = LinkShared::new();
        let first = shared.reserve();
        let second = shared.reserve();

        // Stale cancel of an older id must not drop the newer reservation
        shared.cancel(first);
        assert_eq!(shared.pending().len(), 2);

        shared.cancel(second);
        assert_eq!(shared.complete(), Some(first));
        assert_eq!(shared.complete(), None);
    }
}

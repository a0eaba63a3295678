//! Delivery scheduler
//!
//! ## Overview
//!
//! The scheduler arbitrates between the category stores and enforces the
//! one system-wide delivery constraint: **at most one message in flight**.
//! On every advance it checks the stores in fixed priority order, pops the
//! first available record, serializes it, and hands it to the transport.
//! Nothing else is popped until that message is acknowledged, discarded, or
//! written off by the watchdog.
//!
//! Priority is strict, not fair: a saturated pump-event store will starve
//! the memory-stat store indefinitely. Pump events are operationally more
//! important, so that is the intended behavior.
//!
//! ## Threading contract
//!
//! `outstanding` is unsynchronized on purpose. Every mutating method must
//! be called from the event task's thread only; producers and transport
//! callbacks communicate with it exclusively through the event queue.

use std::sync::Arc;

use chrono::FixedOffset;
use log::{debug, info};

use crate::record::Category;
use crate::store::RecordStore;
use crate::transport::{MessageId, Transport};

struct StoreSlot {
    store: Arc<RecordStore>,
    topic: String,
}

/// Chooses which store to drain next and tracks the in-flight message
pub struct Scheduler {
    /// Stores in strict priority order, highest first
    slots: Vec<StoreSlot>,
    transport: Box<dyn Transport>,
    /// The one sent-but-unacknowledged record, if any
    outstanding: Option<(Category, MessageId)>,
    device_id: u32,
    tz: FixedOffset,
}

impl Scheduler {
    /// Scheduler with no stores yet; see [`Scheduler::add_store`]
    pub fn new(transport: Box<dyn Transport>, device_id: u32, tz: FixedOffset) -> Self {
        Self {
            slots: Vec::new(),
            transport,
            outstanding: None,
            device_id,
            tz,
        }
    }

    /// Register a store; call order defines priority, highest first
    pub fn add_store(&mut self, store: Arc<RecordStore>, topic: impl Into<String>) {
        self.slots.push(StoreSlot {
            store,
            topic: topic.into(),
        });
    }

    /// Whether a message is in flight
    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Try to put the next record on the wire
    ///
    /// Returns `true` when a send was issued. A failed publish restores the
    /// popped record and aborts the whole pass; lower-priority stores are
    /// not tried with a transport that just refused a send.
    pub fn advance(&mut self) -> bool {
        if self.outstanding.is_some() {
            return false;
        }
        for slot in &self.slots {
            let Some(record) = slot.store.pop_and_stash() else {
                continue;
            };
            let payload = record.to_wire(self.device_id, self.tz);
            match self.transport.publish(&slot.topic, payload.as_bytes()) {
                Ok(id) => {
                    debug!("sent {} record as {id}", slot.store.category().dir_name());
                    self.outstanding = Some((slot.store.category(), id));
                    return true;
                }
                Err(e) => {
                    info!(
                        "publish to {} failed, record held for retry: {e}",
                        slot.topic
                    );
                    slot.store.restore();
                    return false;
                }
            }
        }
        false
    }

    /// Handle a broker acknowledgment
    ///
    /// Ids that do not match the in-flight message are stale or duplicate
    /// acks and are ignored. A matching ack confirms delivery, frees the
    /// stash, and immediately tries to send the next record.
    pub fn on_ack(&mut self, id: MessageId) {
        match self.outstanding {
            Some((category, expected)) if expected == id => {
                if let Some(store) = self.store_for(category) {
                    store.discard();
                }
                self.outstanding = None;
                self.advance();
            }
            _ => debug!("ignoring ack {id} with no matching in-flight message"),
        }
    }

    /// Handle a transport disconnect: the in-flight record, if any, will be
    /// redelivered after reconnection
    pub fn on_disconnected(&mut self) {
        if let Some((category, id)) = self.outstanding.take() {
            info!(
                "link lost with {} record {id} in flight, will redeliver",
                category.dir_name()
            );
            if let Some(store) = self.store_for(category) {
                store.restore();
            }
        }
    }

    fn store_for(&self, category: Category) -> Option<Arc<RecordStore>> {
        self.slots
            .iter()
            .find(|slot| slot.store.category() == category)
            .map(|slot| slot.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::StdFlash;
    use crate::record::{MemoryReading, Record};
    use crate::transport::TransportError;
    use chrono::Offset;
    use std::sync::Mutex;

    /// Transport double: scripted connectivity, records every accepted
    /// publish, assigns sequential ids.
    #[derive(Default)]
    struct LinkState {
        connected: bool,
        published: Vec<(String, String)>,
        next_id: u32,
    }

    #[derive(Clone)]
    struct TestLink(Arc<Mutex<LinkState>>);

    impl TestLink {
        fn new(connected: bool) -> Self {
            Self(Arc::new(Mutex::new(LinkState {
                connected,
                ..Default::default()
            })))
        }

        fn set_connected(&self, connected: bool) {
            self.0.lock().unwrap().connected = connected;
        }

        fn published(&self) -> Vec<(String, String)> {
            self.0.lock().unwrap().published.clone()
        }

        fn last_id(&self) -> MessageId {
            MessageId(self.0.lock().unwrap().next_id)
        }
    }

    impl Transport for TestLink {
        fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<MessageId, TransportError> {
            let mut state = self.0.lock().unwrap();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            state.next_id += 1;
            state
                .published
                .push((topic.into(), String::from_utf8(payload.to_vec()).unwrap()));
            Ok(MessageId(state.next_id))
        }
    }

    fn rig(dir: &std::path::Path, connected: bool) -> (Scheduler, TestLink, Arc<RecordStore>, Arc<RecordStore>) {
        let flash = Arc::new(StdFlash::new(dir));
        let pump = Arc::new(RecordStore::new(
            Category::PumpEvent,
            4,
            "store",
            flash.clone(),
        ));
        let memory = Arc::new(RecordStore::new(Category::MemoryStat, 4, "store", flash));
        let link = TestLink::new(connected);
        let mut scheduler = Scheduler::new(Box::new(link.clone()), 7, chrono::Utc.fix());
        scheduler.add_store(pump.clone(), "telemetry/pump");
        scheduler.add_store(memory.clone(), "telemetry/memory");
        (scheduler, link, pump, memory)
    }

    #[test]
    fn at_most_one_outstanding() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, link, pump, _) = rig(dir.path(), true);

        pump.push(Record::pump(1, true));
        pump.push(Record::pump(2, true));

        assert!(scheduler.advance());
        // Further advances issue nothing while unacknowledged
        assert!(!scheduler.advance());
        assert!(!scheduler.advance());
        assert_eq!(link.published().len(), 1);

        scheduler.on_ack(link.last_id());
        // Ack freed the slot; the second record went out automatically
        assert_eq!(link.published().len(), 2);
    }

    #[test]
    fn pump_events_drain_before_memory_stats() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, link, pump, memory) = rig(dir.path(), true);

        memory.push(Record::memory(1, MemoryReading::default()));
        pump.push(Record::pump(2, true));

        scheduler.advance();
        scheduler.on_ack(link.last_id());
        scheduler.on_ack(link.last_id());

        let topics: Vec<_> = link.published().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(topics, vec!["telemetry/pump", "telemetry/memory"]);
    }

    #[test]
    fn failed_send_aborts_pass_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, link, pump, memory) = rig(dir.path(), false);

        pump.push(Record::pump(1, true));
        memory.push(Record::memory(2, MemoryReading::default()));

        // Disconnected: nothing sent, and the memory store is not tried
        assert!(!scheduler.advance());
        assert!(link.published().is_empty());
        assert!(!scheduler.is_outstanding());

        // Reconnect: the same pump record goes out first
        link.set_connected(true);
        assert!(scheduler.advance());
        let (topic, payload) = &link.published()[0];
        assert_eq!(topic, "telemetry/pump");
        assert!(payload.contains("\"status\":\"start\""));
    }

    #[test]
    fn stale_ack_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, link, pump, _) = rig(dir.path(), true);

        pump.push(Record::pump(1, true));
        scheduler.advance();
        let sent = link.last_id();

        scheduler.on_ack(MessageId(sent.0 + 100));
        assert!(scheduler.is_outstanding());

        scheduler.on_ack(sent);
        assert!(!scheduler.is_outstanding());
    }

    #[test]
    fn disconnect_preserves_in_flight_record() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, link, pump, _) = rig(dir.path(), true);

        pump.push(Record::pump(1, true));
        scheduler.advance();
        let first = link.published()[0].1.clone();

        scheduler.on_disconnected();
        assert!(!scheduler.is_outstanding());

        // The same record is redelivered after reconnection
        scheduler.advance();
        assert_eq!(link.published()[1].1, first);
    }

    #[test]
    fn serialized_payload_carries_device_id() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, link, pump, _) = rig(dir.path(), true);

        pump.push(Record::pump(1, false));
        scheduler.advance();

        let value: serde_json::Value = serde_json::from_str(&link.published()[0].1).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["status"], "stop");
    }
}

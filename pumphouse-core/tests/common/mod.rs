//! Shared test doubles for the integration suites

use std::sync::{Arc, Mutex};

use pumphouse_core::{MessageId, Transport, TransportError};

#[derive(Default)]
pub struct LinkState {
    pub connected: bool,
    /// Accepted publishes as (topic, payload, id)
    pub published: Vec<(String, String, MessageId)>,
    pub next_id: u32,
}

/// Transport double with scripted connectivity and sequential ids
#[derive(Clone, Default)]
pub struct ScriptedLink(pub Arc<Mutex<LinkState>>);

impl ScriptedLink {
    pub fn connected() -> Self {
        let link = Self::default();
        link.set_connected(true);
        link
    }

    pub fn set_connected(&self, connected: bool) {
        self.0.lock().unwrap().connected = connected;
    }

    pub fn published(&self) -> Vec<(String, String, MessageId)> {
        self.0.lock().unwrap().published.clone()
    }

    pub fn last_id(&self) -> MessageId {
        MessageId(self.0.lock().unwrap().next_id)
    }
}

impl Transport for ScriptedLink {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<MessageId, TransportError> {
        let mut state = self.0.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.next_id += 1;
        let id = MessageId(state.next_id);
        state
            .published
            .push((topic.into(), String::from_utf8_lossy(payload).into_owned(), id));
        Ok(id)
    }
}

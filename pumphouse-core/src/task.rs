//! Event task: the single consumer driving delivery
//!
//! ## Overview
//!
//! One loop blocks on the event queue and feeds the scheduler. There is no
//! state machine beyond the scheduler's in-flight slot and the current
//! queue timeout, which takes one of two values:
//!
//! - **active** (minutes): while connected or with a send in flight. Bounds
//!   how long an unacknowledged send can linger before the watchdog treats
//!   it as lost.
//! - **idle** (hours): while disconnected or drained, so the task does not
//!   busy-wait against a down link.
//!
//! The timeout path is the only self-healing mechanism for a stuck
//! in-flight record (a lost ack, a transport edge case): write the send off
//! as lost, then advance again. The stash guarantees the retry carries the
//! identical record, so the failure mode is a rare duplicate, never a gap.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};

use crate::config::TelemetryConfig;
use crate::events::{channel, Event, EventSender, TelemetryHandle};
use crate::flash::Flash;
use crate::record::Category;
use crate::scheduler::Scheduler;
use crate::store::RecordStore;
use crate::time::Clock;
use crate::transport::Transport;

/// Single consumer of the event queue
pub struct EventTask {
    rx: Receiver<Event>,
    scheduler: Scheduler,
    active_timeout: Duration,
    idle_timeout: Duration,
}

impl EventTask {
    /// Task over an already wired scheduler and queue receiver
    pub fn new(
        rx: Receiver<Event>,
        scheduler: Scheduler,
        active_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            rx,
            scheduler,
            active_timeout,
            idle_timeout,
        }
    }

    /// Run until [`Event::Shutdown`] or until every sender is gone
    pub fn run(mut self) {
        let mut timeout = self.idle_timeout;
        loop {
            match self.rx.recv_timeout(timeout) {
                Ok(Event::Shutdown) => {
                    debug!("event task stopping");
                    break;
                }
                Ok(Event::NewData) | Ok(Event::Connected) => {
                    self.scheduler.advance();
                    timeout = self.active_timeout;
                }
                Ok(Event::Disconnected) => {
                    self.scheduler.on_disconnected();
                    timeout = self.idle_timeout;
                }
                Ok(Event::Published(id)) => {
                    self.scheduler.on_ack(id);
                    timeout = self.active_timeout;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.scheduler.is_outstanding() {
                        warn!("no ack within {timeout:?}, treating send as lost");
                        self.scheduler.on_disconnected();
                    }
                    let sent = self.scheduler.advance();
                    timeout = if sent {
                        self.active_timeout
                    } else {
                        self.idle_timeout
                    };
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("all event senders dropped, stopping");
                    break;
                }
            }
        }
    }

    /// Run on a dedicated thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("telemetry-events".into())
            .spawn(move || self.run())
    }
}

/// A fully wired telemetry subsystem, ready to start
pub struct Telemetry {
    /// Producer-side API for the pump controller and samplers
    pub handle: TelemetryHandle,
    /// The delivery task; call [`EventTask::spawn`] (or `run`) to start it
    pub task: EventTask,
    /// Event injection point for the transport's I/O thread
    pub events: EventSender,
}

/// Wire stores, scheduler, queue, and task together
///
/// All state is owned by the returned pieces; there are no globals. The
/// transport's connectivity callbacks must be bridged to `events` by the
/// caller (see `pumphouse-mqtt`).
pub fn build(
    config: &TelemetryConfig,
    flash: Arc<dyn Flash>,
    clock: Arc<dyn Clock>,
    transport: Box<dyn Transport>,
) -> Telemetry {
    let pump = Arc::new(RecordStore::new(
        Category::PumpEvent,
        config.pump_capacity,
        &config.data_dir,
        flash.clone(),
    ));
    let memory = Arc::new(RecordStore::new(
        Category::MemoryStat,
        config.memory_capacity,
        &config.data_dir,
        flash,
    ));

    let mut scheduler = Scheduler::new(transport, config.device_id, config.tz_offset());
    scheduler.add_store(pump.clone(), config.pump_topic.clone());
    scheduler.add_store(memory.clone(), config.memory_topic.clone());

    let (events, rx) = channel(config.event_queue_depth);
    let task = EventTask::new(rx, scheduler, config.ack_timeout(), config.idle_timeout());
    let handle = TelemetryHandle {
        pump,
        memory,
        clock,
        events: events.clone(),
    };

    Telemetry {
        handle,
        task,
        events,
    }
}

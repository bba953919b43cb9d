// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Pub/sub event plane, plus a bounded replay log for `Last-Event-ID` style
//! reconnects (used by the SSE front end).

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tokio::sync::broadcast;
use tracing::warn;

use crate::protocol::{ControlEvent, EventId};

/// Events kept per session for replay after a reconnect.
pub const EVENT_LOG_CAPACITY: usize = 200;

/// Capacity of the broadcast channel backing live subscribers.
const BROADCAST_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct LoggedEvent {
    pub id: EventId,
    pub event: ControlEvent,
}

/// Bounded ring buffer of the last [`EVENT_LOG_CAPACITY`] events, paired with
/// a live broadcast channel for subscribers that are already connected.
pub struct EventBus {
    tx: broadcast::Sender<LoggedEvent>,
    log: Mutex<VecDeque<LoggedEvent>>,
    next_id: Mutex<EventId>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Arc::new(Self {
            tx,
            log: Mutex::new(VecDeque::with_capacity(EVENT_LOG_CAPACITY)),
            next_id: Mutex::new(0),
        })
    }

    /// Publish an event: append to the replay log, then fan out to live
    /// subscribers. A subscriber that panics handling an event does not
    /// affect publication — `broadcast::Sender::send` only fails when there
    /// are no receivers, which is not an error here.
    pub fn publish(&self, event: ControlEvent) -> EventId {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        let logged = LoggedEvent { id, event };

        {
            let mut log = self.log.lock().unwrap();
            if log.len() == EVENT_LOG_CAPACITY {
                log.pop_front();
            }
            log.push_back(logged.clone());
        }

        if self.tx.send(logged).is_err() {
            // No subscribers right now; the event is still in the replay log.
        }
        id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoggedEvent> {
        self.tx.subscribe()
    }

    /// Events strictly after `last_id`, oldest first. Used to replay the
    /// backlog on SSE reconnect via `Last-Event-ID`.
    pub fn replay_after(&self, last_id: EventId) -> Vec<LoggedEvent> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.id > last_id)
            .cloned()
            .collect()
    }
}

/// Spawn a panic-guarded task that forwards every event on `rx` to `handler`.
/// A panicking handler only kills its own subscriber task, never the bus.
pub fn spawn_guarded_subscriber<F>(
    mut rx: broadcast::Receiver<LoggedEvent>,
    mut handler: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(LoggedEvent) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(logged) => {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        handler(logged)
                    }));
                    if result.is_err() {
                        warn!("event subscriber handler panicked; continuing to next event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event subscriber lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

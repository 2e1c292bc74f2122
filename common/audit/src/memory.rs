use crate::{BrokerClient, DeliveryReport, DeliveryTicket, PublishError, PublishResult, PublishedMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// In-process broker used for local development and tests.
///
/// Messages are delivered in enqueue order on a single partition per topic.
/// Delivery can be paused to hold messages in flight, a key can be made to fail
/// a number of attempts before succeeding, and the whole broker can be made to
/// reject everything.
pub struct MemoryBroker {
    retries: u32,
    state: Mutex<BrokerState>,
    drained: Condvar,
}

#[derive(Default)]
struct BrokerState {
    paused: bool,
    torn_down: bool,
    reject_reason: Option<String>,
    transient_failures: HashMap<String, u32>,
    pending: VecDeque<(PublishedMessage, DeliveryTicket)>,
    delivered: Vec<PublishedMessage>,
    attempts: Vec<Attempt>,
    next_offset: HashMap<String, i64>,
}

/// One transmission attempt as seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub partition_key: String,
    pub payload: Vec<u8>,
    pub succeeded: bool,
}

impl MemoryBroker {
    /// `retries` mirrors the producer's transport-level retry count.
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            state: Mutex::new(BrokerState::default()),
            drained: Condvar::new(),
        }
    }

    pub fn pause(&self) {
        self.lock().paused = true;
    }

    /// Delivers everything held while paused, in order.
    pub fn resume(&self) {
        let completed = {
            let mut state = self.lock();
            state.paused = false;
            let pending: Vec<_> = state.pending.drain(..).collect();
            pending
                .into_iter()
                .map(|(message, ticket)| {
                    let result = self.transmit(&mut state, message);
                    (ticket, result)
                })
                .collect::<Vec<_>>()
        };
        self.drained.notify_all();
        for (ticket, result) in completed {
            ticket.complete(result);
        }
    }

    /// The next `attempts` transmissions for `key` fail before one can succeed.
    pub fn fail_transiently(&self, key: &str, attempts: u32) {
        self.lock().transient_failures.insert(key.to_string(), attempts);
    }

    pub fn reject_all(&self, reason: &str) {
        self.lock().reject_reason = Some(reason.to_string());
    }

    pub fn delivered(&self) -> Vec<PublishedMessage> {
        self.lock().delivered.clone()
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.lock().attempts.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.lock().torn_down
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transmit(&self, state: &mut BrokerState, message: PublishedMessage) -> PublishResult<DeliveryReport> {
        if let Some(reason) = &state.reject_reason {
            state.attempts.push(Attempt {
                partition_key: message.partition_key.clone(),
                payload: message.payload.clone(),
                succeeded: false,
            });
            return Err(PublishError::Transport(reason.clone()));
        }
        for attempt in 0..=self.retries {
            let remaining = state
                .transient_failures
                .get_mut(&message.partition_key)
                .filter(|left| **left > 0);
            if let Some(left) = remaining {
                *left -= 1;
                state.attempts.push(Attempt {
                    partition_key: message.partition_key.clone(),
                    payload: message.payload.clone(),
                    succeeded: false,
                });
                debug!(key = %message.partition_key, attempt, "Memory broker transient failure");
                continue;
            }
            state.attempts.push(Attempt {
                partition_key: message.partition_key.clone(),
                payload: message.payload.clone(),
                succeeded: true,
            });
            let offset = state.next_offset.entry(message.topic.clone()).or_insert(0);
            let report = DeliveryReport {
                topic: message.topic.clone(),
                partition: 0,
                offset: *offset,
            };
            *offset += 1;
            state.delivered.push(message);
            return Ok(report);
        }
        Err(PublishError::Transport(format!(
            "retries exhausted after {} attempts",
            self.retries + 1
        )))
    }
}

impl BrokerClient for MemoryBroker {
    fn enqueue(&self, message: PublishedMessage, ticket: DeliveryTicket) {
        let result = {
            let mut state = self.lock();
            if state.torn_down {
                drop(state);
                ticket.complete(Err(PublishError::Transport("memory broker shut down".into())));
                return;
            }
            if state.paused {
                state.pending.push_back((message, ticket));
                return;
            }
            self.transmit(&mut state, message)
        };
        ticket.complete(result);
    }

    fn flush(&self, timeout: Duration) -> PublishResult<()> {
        let state = self.lock();
        let (state, _) = self
            .drained
            .wait_timeout_while(state, timeout, |s| !s.pending.is_empty() && !s.torn_down)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.pending.is_empty() {
            Ok(())
        } else {
            Err(PublishError::FlushTimeout(timeout))
        }
    }

    fn in_flight(&self) -> usize {
        self.lock().pending.len()
    }

    fn shutdown(&self) {
        let abandoned: Vec<_> = {
            let mut state = self.lock();
            state.torn_down = true;
            state.pending.drain(..).collect()
        };
        self.drained.notify_all();
        // Dropping the tickets marks each held message as abandoned.
        drop(abandoned);
    }
}

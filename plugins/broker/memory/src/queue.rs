use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use pulsarbeat_api::{Delivery, SubscriptionType};

/// A message waiting in, or handed out from, a subscription.
#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub sequence: u64,
    pub delivery: Delivery,
}

struct ConsumerSlot {
    id: u64,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Pending>,
    /// sequence → (owning consumer, message)
    unacked: HashMap<u64, (u64, Pending)>,
    consumers: Vec<ConsumerSlot>,
}

/// Cursor of one named subscription on one topic.
pub(crate) struct SubscriptionQueue {
    pub name: String,
    pub partition: i32,
    pub kind: SubscriptionType,
    state: Mutex<QueueState>,
}

impl SubscriptionQueue {
    pub fn new(name: String, partition: i32, kind: SubscriptionType, backlog: Vec<Pending>) -> Self {
        Self {
            name,
            partition,
            kind,
            state: Mutex::new(QueueState {
                pending: backlog.into(),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(subscription = %self.name, "subscription lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.lock().consumers.len()
    }

    pub fn backlog(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn unacked(&self) -> usize {
        self.lock().unacked.len()
    }

    /// Register a consumer. Fails for a second consumer on an exclusive subscription.
    pub fn attach(&self, id: u64, notify: Arc<Notify>) -> Result<(), String> {
        let mut state = self.lock();
        if self.kind == SubscriptionType::Exclusive && !state.consumers.is_empty() {
            return Err(format!("exclusive subscription '{}' already has a consumer", self.name));
        }
        state.consumers.push(ConsumerSlot { id, notify });
        // Key slots depend on the consumer count, so every consumer may own something new.
        if !state.pending.is_empty() {
            wake_all(&state);
        }
        Ok(())
    }

    /// Unregister a consumer; everything it still holds goes back to the queue.
    pub fn detach(&self, id: u64) {
        let mut state = self.lock();
        let before = state.consumers.len();
        state.consumers.retain(|c| c.id != id);
        let removed = state.consumers.len() != before;

        let mut returned: Vec<Pending> = Vec::new();
        state.unacked.retain(|_, (owner, pending)| {
            if *owner == id {
                returned.push(pending.clone());
                false
            } else {
                true
            }
        });
        returned.sort_by_key(|p| p.sequence);
        for mut pending in returned.into_iter().rev() {
            pending.delivery.redelivery_count += 1;
            state.pending.push_front(pending);
        }

        // Failover and key-shared ownership moves to the remaining consumers.
        if removed && !state.pending.is_empty() {
            wake_all(&state);
        }
    }

    /// Append a freshly published message.
    pub fn push(&self, pending: Pending) {
        let mut state = self.lock();
        state.pending.push_back(pending);
        wake_all(&state);
    }

    /// Put a negatively acknowledged message back at the head of the queue.
    pub fn redeliver(&self, mut pending: Pending) {
        let mut state = self.lock();
        pending.delivery.redelivery_count += 1;
        let at = state
            .pending
            .iter()
            .position(|p| p.sequence > pending.sequence)
            .unwrap_or(state.pending.len());
        state.pending.insert(at, pending);
        wake_all(&state);
    }

    /// Hand the next message eligible for `consumer` over, marking it unacked.
    pub fn take(&self, consumer: u64) -> Option<Pending> {
        let mut state = self.lock();
        let position = state.consumers.iter().position(|c| c.id == consumer)?;
        let consumers = state.consumers.len();

        let index = match self.kind {
            SubscriptionType::Exclusive | SubscriptionType::Shared => {
                if state.pending.is_empty() { None } else { Some(0) }
            }
            SubscriptionType::Failover => {
                if position == 0 && !state.pending.is_empty() { Some(0) } else { None }
            }
            SubscriptionType::KeyShared => state
                .pending
                .iter()
                .position(|p| key_slot(p.delivery.key.as_deref(), consumers) == position),
        }?;

        let pending = state.pending.remove(index)?;
        state.unacked.insert(pending.sequence, (consumer, pending.clone()));
        Some(pending)
    }

    /// Remove an unacked message owned by `consumer`.
    pub fn resolve(&self, consumer: u64, sequence: u64) -> Option<Pending> {
        let mut state = self.lock();
        match state.unacked.get(&sequence) {
            Some((owner, _)) if *owner == consumer => state.unacked.remove(&sequence).map(|(_, p)| p),
            _ => None,
        }
    }

    pub fn wake(&self) {
        wake_all(&self.lock());
    }
}

fn wake_all(state: &QueueState) {
    for consumer in &state.consumers {
        consumer.notify.notify_one();
    }
}

/// Stable consumer slot for a key. Messages without a key go to slot 0.
pub(crate) fn key_slot(key: Option<&str>, consumers: usize) -> usize {
    match key {
        Some(key) if consumers > 0 => {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            (hasher.finish() % consumers as u64) as usize
        }
        _ => 0,
    }
}

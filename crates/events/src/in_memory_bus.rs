//! In-process movement bus with a bounded replay window.
//!
//! Commits on different bins publish from different threads, so envelopes can
//! reach the bus slightly out of ledger order. Live subscribers see them in
//! arrival order; a subscriber that attaches late asks for everything after a
//! ledger position and receives the retained window sorted by sequence.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, mpsc};

use crate::bus::{EventBus, Subscription};
use crate::envelope::Sequenced;

#[derive(Debug)]
pub enum InMemoryBusError {
    /// The bus lock was poisoned by a panicking publisher.
    Poisoned,
}

#[derive(Debug)]
struct Channels<M> {
    subscribers: Vec<mpsc::Sender<M>>,
    recent: VecDeque<M>,
}

#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    channels: Mutex<Channels<M>>,
    replay: usize,
}

impl<M> InMemoryEventBus<M> {
    /// Live fan-out only; nothing is retained for late subscribers.
    pub fn new() -> Self {
        Self::with_replay(0)
    }

    /// Retain the last `replay` published messages for [`Self::subscribe_from`].
    pub fn with_replay(replay: usize) -> Self {
        Self {
            channels: Mutex::new(Channels {
                subscribers: Vec::new(),
                recent: VecDeque::with_capacity(replay),
            }),
            replay,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().map(|c| c.subscribers.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Channels<M>>, InMemoryBusError> {
        self.channels.lock().map_err(|_| InMemoryBusError::Poisoned)
    }
}

impl<M> InMemoryEventBus<M>
where
    M: Sequenced + Clone + Send + 'static,
{
    /// Subscribe and first receive every retained message with a ledger
    /// sequence greater than `after`, oldest first.
    pub fn subscribe_from(&self, after: u64) -> Result<Subscription<M>, InMemoryBusError> {
        let (tx, rx) = mpsc::channel();
        let mut channels = self.lock()?;

        let mut backlog: Vec<&M> = channels
            .recent
            .iter()
            .filter(|m| m.sequence() > after)
            .collect();
        backlog.sort_by_key(|m| m.sequence());
        for message in backlog {
            // The receiver is still in hand, so the send cannot fail.
            let _ = tx.send(message.clone());
        }

        channels.subscribers.push(tx);
        Ok(Subscription::new(rx))
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut channels = self.lock()?;

        channels
            .subscribers
            .retain(|tx| tx.send(message.clone()).is_ok());

        if self.replay > 0 {
            if channels.recent.len() == self.replay {
                channels.recent.pop_front();
            }
            channels.recent.push_back(message);
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        // Poisoned: the subscription is still valid but never receives.
        if let Ok(mut channels) = self.lock() {
            channels.subscribers.push(tx);
        }
        Subscription::new(rx)
    }
}

//! Chain-changed notifications
//!
//! The chain publishes one [`ChainEvent::Block`] per append attempt, accepted or not,
//! and one [`ChainEvent::Replaced`] whenever a peer's chain is adopted. Publishing
//! never blocks and never requires a subscriber.

use crate::block::Block;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Block { block: Block, status: BlockStatus },
    Replaced { length: usize },
}

impl ChainEvent {
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            ChainEvent::Block {
                status: BlockStatus::Accepted,
                ..
            }
        )
    }
}

/// Fan-out of chain events to any number of receivers.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<ChainEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Send to every live subscriber, dropping the ones whose receiver is gone.
    pub fn publish(&self, event: ChainEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

//! The public event surface: `tick`, `request`, `response`, `data`, carried
//! over a `tokio::sync::broadcast` channel — any number of subscribers,
//! single-writer discipline maintained by the executor/scheduler being the
//! only producers.

use tokio::sync::broadcast;

use crate::transaction::{TransactionData, TransactionSnapshot};

#[derive(Debug, Clone)]
pub enum Event {
    /// Fires at the start of each scheduler tick.
    Tick { round: u32, tick: u32 },
    /// Emitted strictly before the matching `Response`.
    Request(TransactionSnapshot),
    Response(TransactionSnapshot),
    /// Emitted after `Response`, only when the transaction produced data.
    Data(TransactionData),
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Broadcast send drops silently when there are no subscribers, matching
    /// an emitter with no listeners attached.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

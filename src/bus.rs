//! In-process publish/subscribe event bus.
//!
//! Publishers enqueue messages and return immediately; the dispatch loop
//! dequeues FIFO and spawns every matching handler invocation as its own
//! task, so a slow handler never blocks dispatch or other handlers. The bus
//! delivers, nothing more: no persistence, no handler retry. A failed
//! handler task is logged rather than silently vanishing; recovery is the
//! handler's own responsibility.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

use crate::adapters::Observer;
use crate::domain::{Message, Topic};

/// An asynchronous message handler subscribed to one or more topics.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, msg: Message) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum BusError {
    /// The dispatch queue receiver is gone
    #[error("event bus queue is closed")]
    Closed,

    /// `run` was called more than once
    #[error("dispatch loop already running")]
    AlreadyRunning,
}

/// Topic-keyed router decoupling producers from consumers.
pub struct EventBus {
    tx: UnboundedSender<Message>,
    rx: Mutex<Option<UnboundedReceiver<Message>>>,
    subscribers: RwLock<HashMap<Topic, Vec<Arc<dyn Handler>>>>,
    observer: Arc<dyn Observer>,
}

impl EventBus {
    pub fn new(observer: Arc<dyn Observer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            subscribers: RwLock::new(HashMap::new()),
            observer,
        }
    }

    /// Register a handler for a topic. Multiple handlers per topic are
    /// allowed; each gets exactly one invocation per matching message.
    /// Intended for setup time, before the dispatch loop starts.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn Handler>) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.entry(topic).or_default().push(handler);
    }

    /// Enqueue a message. Returns once enqueued, not once delivered.
    pub fn publish(&self, msg: Message) -> Result<(), BusError> {
        self.tx.send(msg).map_err(|_| BusError::Closed)
    }

    /// The dispatch loop. Dequeues one message at a time and launches every
    /// matching handler as an independent task; never awaits handler
    /// completion. Runs until the owning task is dropped or aborted.
    pub async fn run(&self) -> Result<(), BusError> {
        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(BusError::AlreadyRunning)?;

        while let Some(msg) = rx.recv().await {
            self.observer.notify(&msg.topic.to_string(), &msg.summary());

            let handlers: Vec<Arc<dyn Handler>> = {
                let subscribers = self
                    .subscribers
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                subscribers.get(&msg.topic).cloned().unwrap_or_default()
            };

            if handlers.is_empty() {
                debug!(topic = %msg.topic, trace_id = %msg.trace_id, "no subscribers, dropping");
                continue;
            }

            for handler in handlers {
                let msg = msg.clone();
                tokio::spawn(async move {
                    let topic = msg.topic;
                    let trace_id = msg.trace_id;
                    if let Err(e) = handler.handle(msg).await {
                        error!(%topic, %trace_id, error = %e, "handler task failed");
                    }
                });
            }
        }

        Ok(())
    }
}

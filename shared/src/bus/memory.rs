//! In-process message bus
//!
//! Mirrors the broker semantics the dispatch logic depends on: a publish is
//! delivered once per matching (subscriber, pattern) pair and the recipient
//! count counts each delivery, so duplicate delivery through overlapping
//! patterns behaves as it does on the real broker. Used by tests and for
//! single-process local runs.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{pattern_matches, BusClient, BusEvent, BusMessage, MessageBus, Subscription};

#[derive(Default)]
struct Inner {
    subs: Vec<SubEntry>,
    clients: Vec<BusClient>,
    next_client_id: u64,
}

struct SubEntry {
    patterns: Vec<String>,
    tx: mpsc::UnboundedSender<BusEvent>,
}

/// In-process [`MessageBus`].
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named client so it shows up in [`MessageBus::client_list`].
    pub async fn register_client(&self, name: &str, addr: &str) {
        let mut inner = self.inner.lock().await;
        inner.next_client_id += 1;
        let id = inner.next_client_id.to_string();
        inner.clients.push(BusClient {
            id,
            name: name.to_string(),
            addr: addr.to_string(),
            age_s: 0,
        });
    }

    /// Drop a named client from the client list.
    pub async fn unregister_client(&self, name: &str) {
        let mut inner = self.inner.lock().await;
        inner.clients.retain(|c| c.name != name);
    }

    /// Number of open subscriptions. Lets tests wait for a spawned task to
    /// subscribe before publishing at it.
    pub async fn subscription_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.subs.retain(|s| !s.tx.is_closed());
        inner.subs.len()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        inner.subs.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for sub in &inner.subs {
            for pattern in &sub.patterns {
                if pattern_matches(pattern, channel) {
                    let event = BusEvent::Message(BusMessage {
                        pattern: Some(pattern.clone()),
                        channel: channel.to_string(),
                        payload: payload.to_vec(),
                    });
                    if sub.tx.send(event).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        Ok(delivered)
    }

    async fn pattern_subscribe(&self, patterns: &[String]) -> Result<Box<dyn Subscription>> {
        let (tx, rx) = mpsc::unbounded_channel();

        // subscribe confirmations, one per pattern
        for _ in patterns {
            let _ = tx.send(BusEvent::Housekeeping);
        }

        let mut inner = self.inner.lock().await;
        inner.subs.push(SubEntry {
            patterns: patterns.to_vec(),
            tx,
        });

        Ok(Box::new(MemorySubscription { rx }))
    }

    async fn client_list(&self) -> Result<Vec<BusClient>> {
        Ok(self.inner.lock().await.clients.clone())
    }
}

struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_event(&mut self) -> Result<Option<BusEvent>> {
        Ok(self.rx.recv().await)
    }
}

//! Message bus abstraction
//!
//! The queen and the drones talk over a publish/subscribe broker that
//! supports pattern subscriptions, a transport-level recipient count on
//! publish and client-list introspection. [`MessageBus`] abstracts that
//! broker so the dispatch and monitor logic can run against the real
//! Redis-backed bus or the in-process [`memory::MemoryBus`].

pub mod memory;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;

/// One event delivered to a pattern subscription.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A published message that matched one of our patterns.
    Message(BusMessage),
    /// Subscription housekeeping (subscribe/unsubscribe confirmations);
    /// never carries a command.
    Housekeeping,
}

/// A published message as delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subscription pattern that matched, when the broker reports it.
    pub pattern: Option<String>,
    pub channel: String,
    pub payload: Vec<u8>,
}

/// One connected broker client, from client-list introspection.
#[derive(Debug, Clone)]
pub struct BusClient {
    pub id: String,
    pub name: String,
    pub addr: String,
    pub age_s: u64,
}

/// Abstract publish/subscribe broker.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload, returning the transport-level recipient count.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize>;

    /// Open a subscription over the given patterns.
    async fn pattern_subscribe(&self, patterns: &[String]) -> Result<Box<dyn Subscription>>;

    /// List connected clients.
    async fn client_list(&self) -> Result<Vec<BusClient>>;
}

/// An open pattern subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next event; `None` when the subscription is closed.
    async fn next_event(&mut self) -> Result<Option<BusEvent>>;
}

/// Glob match with `*` as the only wildcard, as broker patterns use.
pub fn pattern_matches(pattern: &str, channel: &str) -> bool {
    fn matches(p: &[u8], c: &[u8]) -> bool {
        match p.first() {
            None => c.is_empty(),
            Some(b'*') => matches(&p[1..], c) || (!c.is_empty() && matches(p, &c[1..])),
            Some(byte) => c.first() == Some(byte) && matches(&p[1..], &c[1..]),
        }
    }
    matches(pattern.as_bytes(), channel.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("board_1_*", "board_1_abc"));
        assert!(pattern_matches("board_all_*", "board_all_x"));
        assert!(pattern_matches("board_1.1_*", "board_1.1_cid"));
        assert!(!pattern_matches("board_1_*", "board_1.1_cid"));
        assert!(!pattern_matches("board_1_*", "board_10_cid"));
        assert!(!pattern_matches("board_1_*", "board_1"));
        assert!(pattern_matches("exact", "exact"));
        assert!(!pattern_matches("exact", "exactly"));
        assert!(pattern_matches("*", "anything"));
    }
}

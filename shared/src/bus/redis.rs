//! Redis-backed message bus
//!
//! Maps the [`MessageBus`] interface onto Redis pub/sub: `PUBLISH` reports
//! the recipient count, `PSUBSCRIBE` provides the wildcard subscriptions and
//! `CLIENT LIST` provides liveness introspection. Each subscription owns its
//! own pub/sub connection, so concurrent dispatch calls never share one.

use std::pin::Pin;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::debug;

use super::{BusClient, BusEvent, BusMessage, MessageBus, Subscription};

/// [`MessageBus`] over a Redis server.
pub struct RedisBus {
    client: redis::Client,
    conn: Mutex<MultiplexedConnection>,
}

impl RedisBus {
    /// Connect and identify ourselves with the given client name.
    ///
    /// The client name is what the fleet monitor sees in `CLIENT LIST`, so
    /// agents must use the `drone_{bid}.{drid}` convention.
    pub async fn connect(url: &str, client_name: &str) -> Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("bad bus url: {url}"))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("bus connection failed: {url}"))?;

        let _: () = redis::cmd("CLIENT")
            .arg("SETNAME")
            .arg(client_name)
            .query_async(&mut conn)
            .await
            .context("CLIENT SETNAME failed")?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("bus ping failed")?;

        debug!(url, client_name, "bus connection established");
        Ok(Self {
            client,
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        let n: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("publish on {channel} failed"))?;
        Ok(n.max(0) as usize)
    }

    async fn pattern_subscribe(&self, patterns: &[String]) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("pub/sub connection failed")?;
        for pattern in patterns {
            pubsub
                .psubscribe(pattern)
                .await
                .with_context(|| format!("psubscribe {pattern} failed"))?;
        }
        Ok(Box::new(RedisSubscription {
            stream: Box::pin(pubsub.into_on_message()),
        }))
    }

    async fn client_list(&self) -> Result<Vec<BusClient>> {
        let mut conn = self.conn.lock().await;
        let raw: String = redis::cmd("CLIENT")
            .arg("LIST")
            .query_async(&mut *conn)
            .await
            .context("CLIENT LIST failed")?;
        Ok(parse_client_list(&raw))
    }
}

struct RedisSubscription {
    stream: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_event(&mut self) -> Result<Option<BusEvent>> {
        Ok(self.stream.next().await.map(|msg| {
            BusEvent::Message(BusMessage {
                pattern: msg.get_pattern().ok(),
                channel: msg.get_channel_name().to_string(),
                payload: msg.get_payload_bytes().to_vec(),
            })
        }))
    }
}

/// Parse `CLIENT LIST` output: one client per line, space-separated
/// `key=value` fields.
fn parse_client_list(raw: &str) -> Vec<BusClient> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut client = BusClient {
                id: String::new(),
                name: String::new(),
                addr: String::new(),
                age_s: 0,
            };
            for field in line.split(' ') {
                if let Some((key, value)) = field.split_once('=') {
                    match key {
                        "id" => client.id = value.to_string(),
                        "name" => client.name = value.to_string(),
                        "addr" => client.addr = value.to_string(),
                        "age" => client.age_s = value.parse().unwrap_or(0),
                        _ => {}
                    }
                }
            }
            client
        })
        .collect()
}

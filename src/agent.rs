//! Drone agent dispatch loop
//!
//! Subscribes the command patterns for this drone's identifier, decodes each
//! inbound line, executes the named command and publishes the response on the
//! call's correlation-scoped return channel. Failures while handling one
//! command are reported back to the caller and never take the loop down.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use apiary_shared::bus::{BusEvent, BusMessage, MessageBus, Subscription as _};
use apiary_shared::channels::{self, ComChannel, DroneId};
use apiary_shared::payload::{self, WireReturn};
use apiary_shared::registry::{CommandRegistry, RegistryError};
use tracing::{debug, info, warn};

use crate::commands::{self, AgentCommand};

/// How many correlation ids the duplicate filter remembers.
const SEEN_CIDS: usize = 64;

pub struct Agent {
    id: DroneId,
    bus: Arc<dyn MessageBus>,
    registry: CommandRegistry<AgentCommand>,
}

impl Agent {
    pub fn new(
        id: DroneId,
        bus: Arc<dyn MessageBus>,
        registry: CommandRegistry<AgentCommand>,
    ) -> Self {
        Self { id, bus, registry }
    }

    /// Receive and execute commands until the subscription closes.
    pub async fn run(&self) -> Result<()> {
        let patterns = channels::subscription_set(self.id);
        let mut sub = self
            .bus
            .pattern_subscribe(&patterns)
            .await
            .context("opening command subscription")?;
        info!(id = %self.id, ?patterns, "agent listening");

        let mut seen = SeenCids::new(SEEN_CIDS);

        loop {
            let event = match sub.next_event().await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    info!(id = %self.id, "command subscription closed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(id = %self.id, error = %e, "subscription error");
                    continue;
                }
            };

            let msg = match event {
                BusEvent::Message(msg) => msg,
                BusEvent::Housekeeping => continue,
            };

            // the same call can reach us again through broker redelivery;
            // answer it once
            if !seen.insert(&msg) {
                debug!(channel = %msg.channel, "duplicate command, ignoring");
                continue;
            }

            let ret = self.handle(&msg).await;
            self.publish_return(&msg, &ret).await;
        }
    }

    /// Execute one inbound command, producing the response to publish.
    async fn handle(&self, msg: &BusMessage) -> WireReturn {
        let id = self.id.to_string();
        let line = String::from_utf8_lossy(&msg.payload);

        let call = match payload::decode(&line) {
            Ok(call) => call,
            Err(e) => {
                warn!(channel = %msg.channel, error = %e, "undecodable command");
                return WireReturn::error(id, None, e.to_string());
            }
        };

        let entry = match self.registry.by_number(call.com_num) {
            Ok(entry) => entry,
            Err(e @ RegistryError::UnknownNumber(_)) => {
                warn!(channel = %msg.channel, com_num = call.com_num, "unknown command");
                return WireReturn::error(id, Some(call.com_num), e.to_string());
            }
            Err(e) => {
                return WireReturn::error(id, Some(call.com_num), e.to_string());
            }
        };

        info!(com_num = call.com_num, name = entry.name, channel = %msg.channel, "executing command");

        // every decoded call gets a response; the flag only picks the
        // return value over the acknowledgement
        match commands::execute(entry.command, self.id, &call).await {
            Err(e) => WireReturn::error(id, Some(call.com_num), format!("{e:#}")),
            Ok(Some(value)) if call.want_return => WireReturn::value(id, call.com_num, value),
            Ok(_) => WireReturn::ack(
                id,
                call.com_num,
                format!("Command {} ({}) executed.", call.com_num, entry.name),
            ),
        }
    }

    /// Publish a response on the inbound call's return channel. Publish
    /// failures are logged; the loop keeps serving.
    async fn publish_return(&self, inbound: &BusMessage, ret: &WireReturn) {
        let chan = ComChannel::from_channel(&inbound.channel).publish_ret;
        let bytes = match serde_json::to_vec(ret) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(channel = %chan, error = %e, "unserializable response");
                return;
            }
        };
        match self.bus.publish(&chan, &bytes).await {
            Ok(0) => debug!(channel = %chan, "response published but nobody listening"),
            Ok(_) => debug!(channel = %chan, "response published"),
            Err(e) => warn!(channel = %chan, error = %e, "failed to publish response"),
        }
    }
}

/// Bounded record of recently answered calls, keyed by correlation id
/// (falling back to the raw channel name for cid-less channels).
struct SeenCids {
    cap: usize,
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl SeenCids {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            order: VecDeque::with_capacity(cap),
            set: HashSet::with_capacity(cap),
        }
    }

    /// Record the call; false when it was already seen.
    fn insert(&mut self, msg: &BusMessage) -> bool {
        let key = channels::parse_channel(&msg.channel)
            .cid
            .unwrap_or_else(|| msg.channel.clone());

        if !self.set.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

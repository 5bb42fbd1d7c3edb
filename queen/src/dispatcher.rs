//! Command dispatcher for sending commands to drones
//!
//! Each dispatch mints a fresh correlation id, subscribes the
//! correlation-scoped return channel before publishing (so a fast responder
//! cannot reply before we listen), and then collects responses until the
//! transport-reported recipient count is reached or the timeout elapses.
//! Fewer responses than recipients is a partial result, not an error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use apiary_shared::bus::{BusEvent, BusMessage, MessageBus, Subscription as _};
use apiary_shared::channels::{ComChannel, DroneId};
use apiary_shared::payload::{self, CommandCall};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::returns::ReturnSink;

/// Where a command is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every board and drone in the fleet.
    All,
    /// One board, or one drone on a board.
    Id(DroneId),
}

impl Target {
    fn id(self) -> Option<DroneId> {
        match self {
            Target::All => None,
            Target::Id(id) => Some(id),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => write!(f, "all boards"),
            Target::Id(id) if id.drid.is_some() => write!(f, "drone {id}"),
            Target::Id(id) => write!(f, "board {id}"),
        }
    }
}

/// Result of one dispatch: how many recipients the transport reported and
/// the responses collected before the deadline.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub recipients: usize,
    pub responses: Vec<BusMessage>,
}

/// Dispatches commands to drones and collects correlated responses.
pub struct Dispatcher {
    bus: Arc<dyn MessageBus>,
    sink: Arc<dyn ReturnSink>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn MessageBus>, sink: Arc<dyn ReturnSink>) -> Self {
        Self { bus, sink }
    }

    /// Send a command and wait (bounded by `timeout`) for its responses.
    ///
    /// Returns immediately with zero responses when no recipient received
    /// the publish. A timeout truncates the wait and returns whatever was
    /// collected; publish-time transport errors propagate.
    pub async fn dispatch(
        &self,
        com_num: u8,
        target: Target,
        want_return: bool,
        raw_args: Option<&str>,
        timeout: Duration,
    ) -> Result<DispatchOutcome> {
        let (args, kwargs) = payload::split_args(raw_args.unwrap_or(""))?;
        let call = CommandCall {
            com_num,
            want_return,
            args,
            kwargs,
        };
        let line = payload::encode(&call);

        let chan = ComChannel::new(target.id());

        // Subscribe before publishing. The subscription is scoped to this
        // call's correlation id, so concurrent dispatches cannot
        // cross-deliver responses.
        let mut sub = self
            .bus
            .pattern_subscribe(std::slice::from_ref(&chan.publish_ret))
            .await?;

        let recipients = self.bus.publish(&chan.publish, line.as_bytes()).await?;
        if recipients == 0 {
            info!(%target, com_num, "no client received this command");
            return Ok(DispatchOutcome {
                recipients: 0,
                responses: Vec::new(),
            });
        }
        info!(%target, com_num, recipients, channel = %chan.publish, "command sent");

        if !want_return {
            // the caller declined the return values; skip the collection window
            return Ok(DispatchOutcome {
                recipients,
                responses: Vec::new(),
            });
        }

        let deadline = Instant::now() + timeout;
        let mut responses = Vec::new();

        while responses.len() < recipients {
            let event = match tokio::time::timeout_at(deadline, sub.next_event()).await {
                Err(_) => {
                    debug!(
                        collected = responses.len(),
                        expected = recipients,
                        "response collection timed out"
                    );
                    break;
                }
                Ok(Ok(Some(event))) => event,
                Ok(Ok(None)) => {
                    warn!("return subscription closed while collecting");
                    break;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "return subscription error");
                    break;
                }
            };

            let msg = match event {
                BusEvent::Message(msg) => msg,
                BusEvent::Housekeeping => continue,
            };

            self.sink.record(&msg);
            responses.push(msg);
        }

        Ok(DispatchOutcome {
            recipients,
            responses,
        })
    }
}

//! Persistence of collected command responses
//!
//! Every response the dispatcher collects is recorded as a side effect,
//! independent of whether the caller inspects it. Recording failures are
//! logged and never interrupt response collection.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use apiary_shared::bus::BusMessage;
use apiary_shared::payload::WireReturn;
use tracing::{info, warn};

/// Sink for responses collected by the dispatcher.
pub trait ReturnSink: Send + Sync {
    fn record(&self, msg: &BusMessage);
}

/// Writes each response to a timestamped file under a tmp directory.
///
/// Responses that decode as [`WireReturn`] are written as pretty JSON;
/// anything else is written raw.
pub struct FileReturnSink {
    dir: PathBuf,
}

impl FileReturnSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write(&self, msg: &BusMessage) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f");
        let chan = msg.channel.replace(['*', '/'], "_");

        match serde_json::from_slice::<WireReturn>(&msg.payload) {
            Ok(ret) => {
                info!(channel = %msg.channel, id = %ret.id, "response collected");
                let path = self.dir.join(format!("ret_{stamp}_{chan}.json"));
                fs::write(path, serde_json::to_vec_pretty(&ret)?)?;
            }
            Err(_) => {
                info!(channel = %msg.channel, bytes = msg.payload.len(), "undecodable response collected");
                let path = self.dir.join(format!("ret_{stamp}_{chan}.raw"));
                fs::write(path, &msg.payload)?;
            }
        }

        Ok(())
    }
}

impl ReturnSink for FileReturnSink {
    fn record(&self, msg: &BusMessage) {
        if let Err(e) = self.write(msg) {
            warn!(channel = %msg.channel, error = %e, "failed to persist response");
        }
    }
}

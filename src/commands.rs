//! Commands a drone agent can execute
//!
//! The numbering is part of the wire contract with the queen. Each command
//! returns an optional JSON value; `None` means there is nothing beyond the
//! acknowledgement.

use anyhow::{anyhow, Context, Result};
use apiary_shared::channels::DroneId;
use apiary_shared::payload::CommandCall;
use apiary_shared::registry::{CommandRegistry, RegistryError};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    /// Liveness probe.
    Ping,
    /// Reflect the call arguments back to the caller.
    Echo,
    /// Host telemetry snapshot.
    SysInfo,
    /// Sleep for a requested number of milliseconds.
    Wait,
}

pub fn registry() -> Result<CommandRegistry<AgentCommand>, RegistryError> {
    CommandRegistry::new([
        (10, "ping", AgentCommand::Ping),
        (11, "echo", AgentCommand::Echo),
        (12, "sys_info", AgentCommand::SysInfo),
        (13, "wait", AgentCommand::Wait),
    ])
}

pub async fn execute(
    command: AgentCommand,
    id: DroneId,
    call: &CommandCall,
) -> Result<Option<Value>> {
    match command {
        AgentCommand::Ping => Ok(Some(json!("pong"))),
        AgentCommand::Echo => Ok(Some(json!({
            "id": id.to_string(),
            "args": call.args,
            "kwargs": call.kwargs,
        }))),
        AgentCommand::SysInfo => sys_info().map(Some),
        AgentCommand::Wait => {
            let ms = wait_millis(call)?;
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            Ok(None)
        }
    }
}

fn wait_millis(call: &CommandCall) -> Result<u64> {
    let raw = call
        .kwargs
        .get("ms")
        .or_else(|| call.args.first())
        .ok_or_else(|| anyhow!("wait needs a duration in ms"))?;
    raw.parse().with_context(|| format!("bad wait duration: {raw}"))
}

/// Snapshot of hostname, uptime and load, read from procfs.
fn sys_info() -> Result<Value> {
    let hostname = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .context("reading hostname")?
        .trim()
        .to_string();

    let uptime = std::fs::read_to_string("/proc/uptime").context("reading uptime")?;
    let uptime_s: f64 = uptime
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("unparseable uptime: {uptime}"))?;

    let loadavg = std::fs::read_to_string("/proc/loadavg").context("reading loadavg")?;
    let load_1m = loadavg
        .split_whitespace()
        .next()
        .unwrap_or("0")
        .to_string();

    let now_s = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .context("system clock before epoch")?
        .as_secs();

    Ok(json!({
        "hostname": hostname,
        "uptime_s": uptime_s,
        "load_1m": load_1m,
        "time_s": now_s,
    }))
}

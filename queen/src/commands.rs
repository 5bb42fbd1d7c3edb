//! Queen-side command registry
//!
//! These commands run on the queen itself rather than being published to
//! the fleet: bus introspection, manual drone service control and the
//! fleet monitor. They share the numbering space and call shape with the
//! agent commands so the operator drives both through one interface.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use apiary_shared::channels::DroneId;
use apiary_shared::payload::CommandCall;
use apiary_shared::registry::{CommandRegistry, RegistryError};
use serde_json::json;
use tracing::info;

use crate::control::{DroneAction, DroneControl};
use crate::monitor::FleetMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueenCommand {
    /// Full listing of connected bus clients.
    ClientList,
    /// Compact JSON map of connected clients.
    ClientListLight,
    /// Manual start/stop/restart/status of drone service units.
    DroneAction,
    /// Run the fleet monitor in the foreground.
    MonitorMode,
}

pub fn registry() -> Result<CommandRegistry<QueenCommand>, RegistryError> {
    CommandRegistry::new([
        (5, "client_list", QueenCommand::ClientList),
        (6, "client_list_light", QueenCommand::ClientListLight),
        (7, "drone_action", QueenCommand::DroneAction),
        (8, "monitor_mode", QueenCommand::MonitorMode),
    ])
}

/// Executes queen-side commands.
pub struct QueenRunner {
    registry: CommandRegistry<QueenCommand>,
    bus: Arc<dyn apiary_shared::bus::MessageBus>,
    control: Arc<DroneControl>,
    monitor: Arc<FleetMonitor>,
}

impl QueenRunner {
    pub fn new(
        registry: CommandRegistry<QueenCommand>,
        bus: Arc<dyn apiary_shared::bus::MessageBus>,
        control: Arc<DroneControl>,
        monitor: Arc<FleetMonitor>,
    ) -> Self {
        Self {
            registry,
            bus,
            control,
            monitor,
        }
    }

    /// Run one command, returning the report to print.
    ///
    /// An unknown number is reported, not raised, so a typo at the prompt
    /// reads the same as it would coming back from a drone.
    pub async fn call(&self, call: &CommandCall, id: Option<DroneId>) -> Result<String> {
        let entry = match self.registry.by_number(call.com_num) {
            Ok(entry) => entry,
            Err(RegistryError::UnknownNumber(num)) => {
                return Ok(format!("Invalid command: {num}"));
            }
            Err(e) => return Err(e.into()),
        };
        info!(com_num = call.com_num, name = entry.name, "running queen command");

        match entry.command {
            QueenCommand::ClientList => self.client_list().await,
            QueenCommand::ClientListLight => self.client_list_light().await,
            QueenCommand::DroneAction => self.drone_action(call, id).await,
            QueenCommand::MonitorMode => {
                self.monitor.run().await;
                Ok(String::new())
            }
        }
    }

    async fn client_list(&self) -> Result<String> {
        let clients = self.bus.client_list().await?;
        let mut out = format!("{} clients connected\n", clients.len());
        for c in &clients {
            out.push_str(&format!(
                "  {:<20} id={} addr={} age={}s\n",
                c.name, c.id, c.addr, c.age_s
            ));
        }
        Ok(out)
    }

    async fn client_list_light(&self) -> Result<String> {
        let clients = self.bus.client_list().await?;
        let map: serde_json::Map<String, serde_json::Value> = clients
            .into_iter()
            .map(|c| {
                (
                    c.id,
                    json!({ "name": c.name, "addr": c.addr, "age_s": c.age_s }),
                )
            })
            .collect();
        Ok(serde_json::to_string(&map)?)
    }

    async fn drone_action(&self, call: &CommandCall, id: Option<DroneId>) -> Result<String> {
        let action = call
            .kwargs
            .get("action")
            .map(String::as_str)
            .or_else(|| call.args.first().map(String::as_str))
            .ok_or_else(|| anyhow!("drone_action needs an action (e.g. -a action=stop)"))?;
        let action = DroneAction::from_str(action)?;

        let target = match call.kwargs.get("to") {
            Some(to) => Some(
                DroneId::parse(to).ok_or_else(|| anyhow!("bad drone identifier: {to}"))?,
            ),
            None => id,
        };

        self.control.apply(action, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::{RemoteShell, ShellOutput};
    use crate::stores::{Manifest, ManifestEntry, MemoryManifestStore, MemoryOverrideStore};
    use apiary_shared::bus::memory::MemoryBus;
    use apiary_shared::payload;
    use async_trait::async_trait;
    use std::time::Duration;

    struct OkShell;

    #[async_trait]
    impl RemoteShell for OkShell {
        async fn execute(&self, _addr: &str, _command: &str) -> Result<ShellOutput> {
            Ok(ShellOutput {
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn runner(bus: &MemoryBus) -> QueenRunner {
        let mut manifest = Manifest::new();
        manifest.insert(
            "1.1".to_string(),
            ManifestEntry {
                ip: "10.0.0.11".to_string(),
                to_run: true,
            },
        );
        let control = Arc::new(DroneControl::new(
            Arc::new(MemoryManifestStore::new(manifest)),
            Arc::new(MemoryOverrideStore::default()),
            Arc::new(OkShell),
            Arc::new(bus.clone()),
            12,
        ));
        let monitor = Arc::new(FleetMonitor::new(
            control.clone(),
            Arc::new(bus.clone()),
            Duration::from_secs(10),
        ));
        QueenRunner::new(registry().expect("registry failed"), Arc::new(bus.clone()), control, monitor)
    }

    fn call(line: &str) -> CommandCall {
        payload::decode(line).expect("decode failed")
    }

    #[tokio::test]
    async fn test_registry_numbers() {
        let reg = registry().expect("registry failed");
        assert_eq!(
            reg.names(),
            vec![
                (5, "client_list"),
                (6, "client_list_light"),
                (7, "drone_action"),
                (8, "monitor_mode"),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_number_is_reported() {
        let bus = MemoryBus::new();
        let report = runner(&bus)
            .call(&call("99 0"), None)
            .await
            .expect("call failed");
        assert_eq!(report, "Invalid command: 99");
    }

    #[tokio::test]
    async fn test_client_list() {
        let bus = MemoryBus::new();
        bus.register_client("drone_1.1", "10.0.0.11:40001").await;

        let report = runner(&bus)
            .call(&call("5 0"), None)
            .await
            .expect("call failed");
        assert!(report.starts_with("1 clients connected"), "{report}");
        assert!(report.contains("drone_1.1"), "{report}");
    }

    #[tokio::test]
    async fn test_client_list_light_is_json() {
        let bus = MemoryBus::new();
        bus.register_client("drone_1.1", "10.0.0.11:40001").await;

        let report = runner(&bus)
            .call(&call("6 0"), None)
            .await
            .expect("call failed");
        let parsed: serde_json::Value = serde_json::from_str(&report).expect("not json");
        let entry = &parsed["1"];
        assert_eq!(entry["name"], "drone_1.1");
    }

    #[tokio::test]
    async fn test_drone_action_from_kwargs() {
        let bus = MemoryBus::new();
        let report = runner(&bus)
            .call(&call("7 0 action=stop to=1.1"), None)
            .await
            .expect("call failed");
        assert!(report.starts_with("stopped 1.1"), "{report}");
    }

    #[tokio::test]
    async fn test_drone_action_target_falls_back_to_positional_id() {
        let bus = MemoryBus::new();
        let report = runner(&bus)
            .call(&call("7 0 start"), Some(DroneId::drone(1, 1)))
            .await
            .expect("call failed");
        assert_eq!(report, "started 1.1");
    }

    #[tokio::test]
    async fn test_drone_action_without_action_is_error() {
        let bus = MemoryBus::new();
        assert!(runner(&bus).call(&call("7 0"), None).await.is_err());
    }
}

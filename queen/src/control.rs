//! Manual drone service control
//!
//! Starts, stops and restarts drone service units over SSH, looking up each
//! drone's board address in the manifest. Manual stops install a monitor
//! override so the fleet monitor does not immediately restart the drone;
//! manual starts and restarts clear any standing override.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use apiary_shared::bus::MessageBus;
use apiary_shared::channels::DroneId;
use chrono::Utc;
use tracing::{info, warn};

use crate::shell::RemoteShell;
use crate::stores::{ManifestEntry, ManifestStore, OverrideStore};

/// Prefix of the bus client name each drone agent registers under.
pub const CLIENT_NAME_PREFIX: &str = "drone_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroneAction {
    Start,
    Stop,
    Restart,
    Status,
    StartAll,
    StopAll,
    RestartAll,
}

impl FromStr for DroneAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "status" => Ok(Self::Status),
            "start_all" => Ok(Self::StartAll),
            "stop_all" => Ok(Self::StopAll),
            "restart_all" => Ok(Self::RestartAll),
            other => Err(anyhow!("unknown drone action: {other}")),
        }
    }
}

impl fmt::Display for DroneAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Status => "status",
            Self::StartAll => "start_all",
            Self::StopAll => "stop_all",
            Self::RestartAll => "restart_all",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of one drone.
#[derive(Debug, Clone)]
pub struct DroneStatus {
    pub id: String,
    pub addr: String,
    pub should_run: bool,
    pub running: bool,
}

pub struct DroneControl {
    pub(crate) manifest: Arc<dyn ManifestStore>,
    pub(crate) overrides: Arc<dyn OverrideStore>,
    pub(crate) shell: Arc<dyn RemoteShell>,
    pub(crate) bus: Arc<dyn MessageBus>,
    /// How long a manual stop suppresses the monitor.
    pub(crate) stop_override: chrono::Duration,
}

impl DroneControl {
    pub fn new(
        manifest: Arc<dyn ManifestStore>,
        overrides: Arc<dyn OverrideStore>,
        shell: Arc<dyn RemoteShell>,
        bus: Arc<dyn MessageBus>,
        stop_override_hours: i64,
    ) -> Self {
        Self {
            manifest,
            overrides,
            shell,
            bus,
            stop_override: chrono::Duration::hours(stop_override_hours),
        }
    }

    /// Run one action, returning a human-readable report.
    pub async fn apply(&self, action: DroneAction, id: Option<DroneId>) -> Result<String> {
        match action {
            DroneAction::Start => self.start(self.require_drone(id)?).await,
            DroneAction::Stop => self.stop(self.require_drone(id)?).await,
            DroneAction::Restart => self.restart(self.require_drone(id)?).await,
            DroneAction::Status => {
                let status = self.status(self.require_drone(id)?).await?;
                Ok(format!(
                    "{}@{}: should_run={} running={}",
                    status.id, status.addr, status.should_run, status.running
                ))
            }
            DroneAction::StartAll => self.sweep(DroneAction::Start).await,
            DroneAction::StopAll => self.sweep(DroneAction::Stop).await,
            DroneAction::RestartAll => self.sweep(DroneAction::Restart).await,
        }
    }

    pub async fn start(&self, id: DroneId) -> Result<String> {
        let (key, entry) = self.lookup(id)?;
        self.clear_override(&key)?;
        self.start_unit(&entry.ip, &key).await?;
        Ok(format!("started {key}"))
    }

    pub async fn stop(&self, id: DroneId) -> Result<String> {
        let (key, entry) = self.lookup(id)?;
        let expiry = Utc::now() + self.stop_override;
        self.install_override(&key, expiry)?;
        self.stop_unit(&entry.ip, &key).await?;
        Ok(format!("stopped {key} (monitor override until {expiry})"))
    }

    pub async fn restart(&self, id: DroneId) -> Result<String> {
        let (key, entry) = self.lookup(id)?;
        self.clear_override(&key)?;
        self.restart_unit(&entry.ip, &key).await?;
        Ok(format!("restarted {key}"))
    }

    /// Reports state without side effects. Liveness is judged by the drone's
    /// registered bus client name, not by asking the board.
    pub async fn status(&self, id: DroneId) -> Result<DroneStatus> {
        let (key, entry) = self.lookup(id)?;
        let running = self.live_drones().await?.contains(&key);
        Ok(DroneStatus {
            id: key,
            addr: entry.ip,
            should_run: entry.to_run,
            running,
        })
    }

    /// Apply one action to every manifest drone, continuing past failures.
    async fn sweep(&self, action: DroneAction) -> Result<String> {
        let manifest = self.manifest.load()?;
        let mut done = 0usize;
        let mut failed = 0usize;
        for key in manifest.keys() {
            let id = match DroneId::parse(key) {
                Some(id) => id,
                None => {
                    warn!(key, "skipping malformed manifest entry");
                    failed += 1;
                    continue;
                }
            };
            let result = match action {
                DroneAction::Start => self.start(id).await,
                DroneAction::Stop => self.stop(id).await,
                DroneAction::Restart => self.restart(id).await,
                _ => bail!("not a sweep action: {action}"),
            };
            match result {
                Ok(_) => done += 1,
                Err(e) => {
                    warn!(key, error = %e, "fleet sweep action failed");
                    failed += 1;
                }
            }
        }
        Ok(format!("{action}: {done} ok, {failed} failed"))
    }

    /// Keys of drones currently registered on the bus.
    pub(crate) async fn live_drones(&self) -> Result<Vec<String>> {
        let clients = self.bus.client_list().await?;
        Ok(clients
            .into_iter()
            .filter_map(|c| c.name.strip_prefix(CLIENT_NAME_PREFIX).map(str::to_string))
            .collect())
    }

    pub(crate) async fn start_unit(&self, addr: &str, key: &str) -> Result<()> {
        self.unit_command("start", addr, key).await
    }

    pub(crate) async fn stop_unit(&self, addr: &str, key: &str) -> Result<()> {
        self.unit_command("stop", addr, key).await
    }

    async fn restart_unit(&self, addr: &str, key: &str) -> Result<()> {
        self.unit_command("restart", addr, key).await
    }

    async fn unit_command(&self, verb: &str, addr: &str, key: &str) -> Result<()> {
        let drid = key
            .split_once('.')
            .map(|(_, drid)| drid)
            .ok_or_else(|| anyhow!("drone key without drone number: {key}"))?;
        let command = format!("sudo systemctl {verb} drone@{drid}.service");
        self.shell
            .execute(addr, &command)
            .await
            .with_context(|| format!("{verb} of drone {key} on {addr}"))?;
        info!(key, addr, verb, "drone unit command completed");
        Ok(())
    }

    pub(crate) fn install_override(
        &self,
        key: &str,
        expiry: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let mut overrides = self.overrides.load()?;
        overrides.insert(key.to_string(), expiry);
        self.overrides.save(&overrides)?;
        info!(key, %expiry, "monitor override installed");
        Ok(())
    }

    pub(crate) fn clear_override(&self, key: &str) -> Result<()> {
        let mut overrides = self.overrides.load()?;
        if overrides.remove(key).is_some() {
            self.overrides.save(&overrides)?;
            info!(key, "monitor override cleared");
        }
        Ok(())
    }

    fn lookup(&self, id: DroneId) -> Result<(String, ManifestEntry)> {
        let key = id.to_string();
        let manifest = self.manifest.load()?;
        let entry = manifest
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("drone {key} not in manifest"))?;
        Ok((key, entry))
    }

    fn require_drone(&self, id: Option<DroneId>) -> Result<DroneId> {
        let id = id.ok_or_else(|| anyhow!("this action needs a drone target (bid.drid)"))?;
        if id.drid.is_none() {
            bail!("this action needs a drone target, got board {id}");
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ShellOutput;
    use crate::stores::{Manifest, MemoryManifestStore, MemoryOverrideStore};
    use apiary_shared::bus::memory::MemoryBus;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every (addr, command) pair; fails for one address if set.
    #[derive(Default)]
    struct RecordingShell {
        calls: Mutex<Vec<(String, String)>>,
        fail_addr: Option<String>,
    }

    impl RecordingShell {
        fn failing(addr: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_addr: Some(addr.to_string()),
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone()
        }
    }

    #[async_trait]
    impl RemoteShell for RecordingShell {
        async fn execute(&self, addr: &str, command: &str) -> Result<ShellOutput> {
            self.calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((addr.to_string(), command.to_string()));
            if self.fail_addr.as_deref() == Some(addr) {
                bail!("connection refused");
            }
            Ok(ShellOutput {
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn manifest() -> Manifest {
        let mut manifest = Manifest::new();
        manifest.insert(
            "1.1".to_string(),
            ManifestEntry {
                ip: "10.0.0.11".to_string(),
                to_run: true,
            },
        );
        manifest.insert(
            "2.1".to_string(),
            ManifestEntry {
                ip: "10.0.0.12".to_string(),
                to_run: true,
            },
        );
        manifest
    }

    fn control(shell: Arc<RecordingShell>) -> (DroneControl, Arc<MemoryOverrideStore>, MemoryBus) {
        let overrides = Arc::new(MemoryOverrideStore::default());
        let bus = MemoryBus::new();
        let control = DroneControl::new(
            Arc::new(MemoryManifestStore::new(manifest())),
            overrides.clone(),
            shell,
            Arc::new(bus.clone()),
            12,
        );
        (control, overrides, bus)
    }

    #[tokio::test]
    async fn test_stop_installs_override_and_stops_unit() {
        let shell = Arc::new(RecordingShell::default());
        let (control, overrides, _bus) = control(shell.clone());

        let before = Utc::now();
        control
            .apply(DroneAction::Stop, Some(DroneId::drone(1, 1)))
            .await
            .expect("stop failed");

        let calls = shell.calls();
        assert_eq!(
            calls,
            vec![(
                "10.0.0.11".to_string(),
                "sudo systemctl stop drone@1.service".to_string()
            )]
        );

        let expiry = overrides.load().expect("load failed")["1.1"];
        assert!(expiry >= before + chrono::Duration::hours(12));
    }

    #[tokio::test]
    async fn test_start_clears_override() {
        let shell = Arc::new(RecordingShell::default());
        let (control, overrides, _bus) = control(shell.clone());
        control
            .install_override("1.1", Utc::now() + chrono::Duration::hours(1))
            .expect("install failed");

        control
            .apply(DroneAction::Start, Some(DroneId::drone(1, 1)))
            .await
            .expect("start failed");

        assert!(overrides.load().expect("load failed").is_empty());
        assert_eq!(
            shell.calls()[0].1,
            "sudo systemctl start drone@1.service".to_string()
        );
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failures() {
        let shell = Arc::new(RecordingShell::failing("10.0.0.11"));
        let (control, _overrides, _bus) = control(shell.clone());

        let report = control
            .apply(DroneAction::RestartAll, None)
            .await
            .expect("sweep failed");

        assert_eq!(report, "restart: 1 ok, 1 failed");
        // both boards were attempted despite the first failing
        assert_eq!(shell.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_status_reads_bus_liveness() {
        let shell = Arc::new(RecordingShell::default());
        let (control, _overrides, bus) = control(shell.clone());
        bus.register_client("drone_1.1", "10.0.0.11:40001").await;

        let up = control.status(DroneId::drone(1, 1)).await.expect("status failed");
        assert!(up.running);
        assert!(up.should_run);

        let down = control.status(DroneId::drone(2, 1)).await.expect("status failed");
        assert!(!down.running);
        // status never touches the shell
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_action_requires_drone_target() {
        let shell = Arc::new(RecordingShell::default());
        let (control, _overrides, _bus) = control(shell);

        assert!(control.apply(DroneAction::Stop, None).await.is_err());
        assert!(control
            .apply(DroneAction::Stop, Some(DroneId::board(1)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_drone_is_error() {
        let shell = Arc::new(RecordingShell::default());
        let (control, _overrides, _bus) = control(shell);

        let err = control
            .apply(DroneAction::Start, Some(DroneId::drone(3, 1)))
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("not in manifest"), "{err}");
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("start".parse::<DroneAction>().ok(), Some(DroneAction::Start));
        assert_eq!(
            "restart_all".parse::<DroneAction>().ok(),
            Some(DroneAction::RestartAll)
        );
        assert!("reboot".parse::<DroneAction>().is_err());
    }
}

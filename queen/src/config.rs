//! Queen-side configuration

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QueenConfig {
    /// Message bus URL.
    pub bus_url: String,
    /// User for remote shell actions on the boards.
    pub ssh_user: String,
    /// Master drone manifest (desired-state list).
    pub manifest_file: PathBuf,
    /// Monitor override list.
    pub override_file: PathBuf,
    /// Directory where collected responses are persisted.
    pub returns_dir: PathBuf,
    /// Sleep between fleet monitor ticks.
    pub monitor_interval: Duration,
    /// How long a manual stop suppresses the monitor.
    pub stop_override_hours: i64,
    /// Default wait for command responses.
    pub dispatch_timeout: Duration,
}

impl Default for QueenConfig {
    fn default() -> Self {
        Self {
            bus_url: "redis://127.0.0.1:6379/".into(),
            ssh_user: "xilinx".into(),
            manifest_file: "master_drone_list.yaml".into(),
            override_file: "drone_overrides.yaml".into(),
            returns_dir: "tmp".into(),
            monitor_interval: Duration::from_secs(10),
            stop_override_hours: 12,
            dispatch_timeout: Duration::from_secs(120),
        }
    }
}

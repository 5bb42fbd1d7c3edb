use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use apiary_shared::bus::redis::RedisBus;
use apiary_shared::channels::DroneId;
use apiary_shared::payload::{self, CommandCall};
use clap::Parser;
use queen::commands::{self, QueenRunner};
use queen::config::QueenConfig;
use queen::control::DroneControl;
use queen::dispatcher::{Dispatcher, Target};
use queen::monitor::FleetMonitor;
use queen::returns::FileReturnSink;
use queen::shell::SshShell;
use queen::stores::{YamlManifestStore, YamlOverrideStore};

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Central controller for the drone fleet.
#[derive(Debug, Parser)]
#[command(name = "queen", version)]
struct Cli {
    /// Command number to run.
    com_num: u8,

    /// Target board or drone ("bid" or "bid.drid"); all boards when omitted.
    bid: Option<String>,

    /// Command arguments, positional and `key=value` mixed.
    #[arg(short = 'a', long = "arguments")]
    arguments: Option<String>,

    /// Run the command on the queen itself instead of publishing it.
    #[arg(short = 'q', long = "queen")]
    queen: bool,

    /// Publish without waiting for responses.
    #[arg(long = "no-return")]
    no_return: bool,

    /// Message bus URL.
    #[arg(long, default_value = "redis://127.0.0.1:6379/")]
    bus_url: String,

    /// Seconds to wait for responses.
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = QueenConfig {
        bus_url: cli.bus_url.clone(),
        dispatch_timeout: Duration::from_secs(cli.timeout),
        ..Default::default()
    };

    let target_id = match &cli.bid {
        Some(bid) => Some(
            DroneId::parse(bid).ok_or_else(|| anyhow!("bad board/drone identifier: {bid}"))?,
        ),
        None => None,
    };

    let bus = Arc::new(RedisBus::connect(&config.bus_url, "queen").await?);
    info!(url = %config.bus_url, "connected to message bus");

    if cli.queen {
        let manifest = Arc::new(YamlManifestStore::new(&config.manifest_file));
        let overrides = Arc::new(YamlOverrideStore::new(&config.override_file));
        let shell = Arc::new(SshShell::new(config.ssh_user.as_str()));
        let control = Arc::new(DroneControl::new(
            manifest,
            overrides,
            shell,
            bus.clone(),
            config.stop_override_hours,
        ));
        let monitor = Arc::new(FleetMonitor::new(
            control.clone(),
            bus.clone(),
            config.monitor_interval,
        ));
        let runner = QueenRunner::new(commands::registry()?, bus, control, monitor);

        let (args, kwargs) = payload::split_args(cli.arguments.as_deref().unwrap_or(""))?;
        let call = CommandCall {
            com_num: cli.com_num,
            want_return: false,
            args,
            kwargs,
        };
        let report = runner.call(&call, target_id).await?;
        println!("{report}");
        return Ok(());
    }

    let sink = Arc::new(FileReturnSink::new(&config.returns_dir));
    let dispatcher = Dispatcher::new(bus, sink);
    let target = match target_id {
        Some(id) => Target::Id(id),
        None => Target::All,
    };

    let outcome = dispatcher
        .dispatch(
            cli.com_num,
            target,
            !cli.no_return,
            cli.arguments.as_deref(),
            config.dispatch_timeout,
        )
        .await?;

    println!(
        "Done. {} drones received. {} responses.",
        outcome.recipients,
        outcome.responses.len()
    );
    Ok(())
}

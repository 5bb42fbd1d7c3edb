mod agent;
mod commands;

use std::sync::Arc;

use agent::Agent;
use anyhow::Result;
use apiary_shared::bus::redis::RedisBus;
use apiary_shared::channels::DroneId;
use clap::Parser;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Command agent for one drone on a readout board.
#[derive(Debug, Parser)]
#[command(name = "drone-agent", version)]
struct Cli {
    /// Drone number on this board.
    #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
    drid: u8,

    /// Board number.
    #[arg(long, default_value_t = 1)]
    bid: u32,

    /// Message bus URL.
    #[arg(long, default_value = "redis://127.0.0.1:6379/")]
    bus_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let id = DroneId::drone(cli.bid, cli.drid);

    // the client name is how the queen sees this drone as alive
    let client_name = format!("drone_{id}");
    let bus = Arc::new(RedisBus::connect(&cli.bus_url, &client_name).await?);
    info!(%id, url = %cli.bus_url, "drone agent starting");

    let agent = Agent::new(id, bus, commands::registry()?);
    agent.run().await
}

//! `sw16` command-line tool.
//!
//! Talks to one HLK-SW16 controller through the shared connection layer.
//!
//! ```text
//! sw16 probe                 is anything HLK-SW16-shaped listening?
//! sw16 pair [--save]         probe, then print the 16 device records as TOML
//! sw16 watch                 log channel and link events until Ctrl-C
//! sw16 set <channel> on|off  switch one relay and wait for confirmation
//! ```
//!
//! The controller address comes from the config file and can be overridden
//! with `--host`/`--port` (or `SW16_HOST`/`SW16_PORT`).  `pair --save` writes
//! the paired address and the generated instance id back to that file, so
//! later runs share one connection identity.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::time;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sw16_core::{Channel, ChannelState, DeviceDescriptor, CHANNEL_COUNT};
use sw16_link::application::pair_controller::PairingUseCase;
use sw16_link::infrastructure::network::probe::probe_controller;
use sw16_link::infrastructure::storage::config::{
    config_file_path, load_config_from, save_config_to, AppConfig,
};
use sw16_link::{BusEvent, ConnectionManager, ConnectionRegistry, Subscription, TcpProbe, Topic};

/// How long `set` waits for the first connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "sw16", version, about = "Control an HLK-SW16 relay board")]
struct Cli {
    /// Config file (default: platform config directory).
    #[arg(long, env = "SW16_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Controller IPv4 address.
    #[arg(long, env = "SW16_HOST", global = true)]
    host: Option<String>,

    /// Controller TCP port.
    #[arg(long, env = "SW16_PORT", global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that a controller answers at the configured address.
    Probe,
    /// Probe, then print the sixteen device records as TOML.
    Pair {
        /// Store the address and instance id in the config file.
        #[arg(long)]
        save: bool,
    },
    /// Log every channel and link event until Ctrl-C.
    Watch,
    /// Switch one relay.
    Set {
        /// Relay channel, 0-15.
        channel: Channel,
        state: Switch,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Serialize)]
struct Listing {
    devices: Vec<DeviceDescriptor>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    match cli.command {
        Command::Probe => probe(&config).await,
        Command::Pair { save } => {
            let save_to = if save { Some(config_path(&cli)?) } else { None };
            pair(&config, save_to.as_deref()).await
        }
        Command::Watch => watch(&config).await,
        Command::Set { channel, state } => set(&config, channel, state).await,
    }
}

fn config_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config_file_path().context("no config file location; pass --config"),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match config_path(cli) {
        Ok(path) => load_config_from(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        Err(_) => AppConfig::default(),
    };
    if let Some(host) = &cli.host {
        config.controller.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.controller.port = port;
    }
    Ok(config)
}

fn open_connection(
    config: &AppConfig,
) -> anyhow::Result<(ConnectionRegistry, Arc<ConnectionManager>)> {
    let registry = ConnectionRegistry::new(config.connection_config()?);
    let instance = config.controller.instance.unwrap_or_else(Uuid::new_v4);
    let manager = registry.get_or_create(instance, config.controller.host.clone(), config.controller.port);
    Ok((registry, manager))
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn probe(config: &AppConfig) -> anyhow::Result<()> {
    let address = config.controller_address();
    probe_controller(&address, config.probe_timeout())
        .await
        .with_context(|| format!("probing {address}"))?;
    println!("{address}: HLK-SW16 controller reachable");
    Ok(())
}

async fn pair(config: &AppConfig, save_to: Option<&Path>) -> anyhow::Result<()> {
    let pairing = PairingUseCase::new(TcpProbe, config.probe_timeout());
    let address = pairing
        .pair(&config.controller.host, Some(i64::from(config.controller.port)))
        .await?;
    let listing = Listing {
        devices: pairing.list_devices(&address),
    };

    if let Some(path) = save_to {
        let mut updated = config.clone();
        if let Some(device) = listing.devices.first() {
            updated.remember_controller(&address, device.store.master_device);
        }
        save_config_to(path, &updated).with_context(|| format!("saving {}", path.display()))?;
        info!(path = %path.display(), "controller saved to config");
    }

    print!("{}", toml::to_string_pretty(&listing).context("rendering device list")?);
    Ok(())
}

async fn watch(config: &AppConfig) -> anyhow::Result<()> {
    let (registry, manager) = open_connection(config)?;
    let mut events =
        manager.subscribe_all(Channel::all().map(Topic::Channel).chain(Topic::LIFECYCLE));
    info!(address = %manager.address(), "watching; press Ctrl-C to stop");

    let mut slots = [false; CHANNEL_COUNT];
    let mut seen = [false; CHANNEL_COUNT];
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(BusEvent::Channel { channel, on }) => {
                    let i = usize::from(channel.index());
                    if !seen[i] || slots[i] != on {
                        info!(%channel, on, "relay state");
                    } else {
                        debug!(%channel, on, "relay state unchanged");
                    }
                    slots[i] = on;
                    seen[i] = true;
                    if channel.index() == 15 {
                        let state = ChannelState::from_slots(slots);
                        debug!(on = state.count_on(), "status frame applied");
                    }
                }
                Some(BusEvent::Connected) => info!("link up"),
                Some(BusEvent::Disconnected) => warn!("link down; reconnecting"),
                None => break,
            },
        }
    }

    events.unsubscribe();
    registry.shutdown_all();
    Ok(())
}

async fn set(config: &AppConfig, channel: Channel, state: Switch) -> anyhow::Result<()> {
    let want = matches!(state, Switch::On);
    let (registry, manager) = open_connection(config)?;
    // Holding a subscription keeps the idle check from closing the link.
    let events = manager.subscribe(Topic::Channel(channel));
    // The resync poll may answer with the old state; allow for the next poll.
    let confirm_within = config.connection_config()?.poll_interval * 2 + Duration::from_secs(1);

    let result = switch(&manager, events, channel, want, confirm_within).await;
    registry.shutdown_all();
    result?;

    println!("channel {channel} is {}", if want { "on" } else { "off" });
    Ok(())
}

async fn switch(
    manager: &Arc<ConnectionManager>,
    mut events: Subscription,
    channel: Channel,
    want: bool,
    confirm_within: Duration,
) -> anyhow::Result<()> {
    time::timeout(CONNECT_TIMEOUT, manager.connect())
        .await
        .context("timed out connecting")?
        .context("connecting")?;

    let sent = if want {
        manager.turn_on(channel)
    } else {
        manager.turn_off(channel)
    };
    if !sent {
        bail!("connection dropped before the command could be sent");
    }

    let expected = BusEvent::Channel { channel, on: want };
    let confirmed = time::timeout(confirm_within, async {
        while let Some(event) = events.recv().await {
            if event == expected {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !confirmed {
        bail!("controller did not confirm channel {channel}");
    }
    Ok(())
}

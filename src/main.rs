//! crest-server: the server binary.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crest::core::config::{Config, Level, LogLevel};
use crest::machine::Machine;
use crest::net;
use crest::raft::node::LogNode;
use crest::raft::StateMachine;
use crest::script::engine::BatchEngine;
use crest::store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often the store is scanned for expired entries.
const EXPIRE_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// At most this many expired keys are deleted per scan.
const EXPIRE_SCAN_BATCH: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "crest-server", version = VERSION, about = "Replicated ordered key/value server")]
struct Args {
    /// TCP bind port.
    #[arg(short = 'p', long, default_value_t = 7481)]
    port: u16,

    /// Data directory for the replicated log and snapshots.
    #[arg(long, default_value = "data")]
    dir: PathBuf,

    /// Log durability [low, medium, high].
    #[arg(long, default_value = "high")]
    durability: Level,

    /// Read consistency [low, medium, high].
    #[arg(long, default_value = "high")]
    consistency: Level,

    /// Log level [quiet, warning, notice, verbose, debug].
    #[arg(long, default_value = "notice")]
    loglevel: LogLevel,

    /// Join a cluster by providing a member address.
    #[arg(long)]
    join: Option<String>,

    /// Set durability and consistency to high.
    #[arg(long, conflicts_with_all = ["medium", "low"])]
    high: bool,

    /// Set durability and consistency to medium.
    #[arg(long, conflicts_with = "low")]
    medium: bool,

    /// Set durability and consistency to low.
    #[arg(long)]
    low: bool,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config {
            port: self.port,
            dir: self.dir,
            durability: self.durability,
            consistency: self.consistency,
            loglevel: self.loglevel,
            join: self.join,
        };
        for (flag, level) in [
            (self.low, Level::Low),
            (self.medium, Level::Medium),
            (self.high, Level::High),
        ] {
            if flag {
                config.durability = level;
                config.consistency = level;
            }
        }
        config
    }
}

fn main() -> Result<()> {
    let config = Args::parse().into_config();
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.loglevel.directive())),
        )
        .init();

    info!(version = VERSION, "crest");

    if let Some(join) = &config.join {
        // the single-node log backend has no peer transport; clustering
        // plugs in behind the raft::Applier contract
        bail!("cannot join '{join}': this build ships the single-node log backend");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let store = Arc::new(Store::new());
    let machine = Machine::new(Arc::clone(&store), Arc::new(BatchEngine));
    let state_machine: Arc<dyn StateMachine> = Arc::clone(&machine) as Arc<dyn StateMachine>;
    let node = LogNode::open(&config.dir, config.durability, config.consistency, state_machine)
        .map_err(|e| anyhow::anyhow!("opening log node: {e}"))?;

    // leader-driven expiration: expired keys turn into ordinary DELs
    // submitted through the log
    {
        let machine = Arc::clone(&machine);
        let node = Arc::clone(&node);
        store.spawn_expiration_monitor(EXPIRE_SCAN_INTERVAL, EXPIRE_SCAN_BATCH, move |keys| {
            machine.delete_expired(node.as_ref(), keys);
        });
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;

    tokio::select! {
        res = net::serve(listener, machine, node) => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("shutting down");
            Ok(())
        }
    }
}

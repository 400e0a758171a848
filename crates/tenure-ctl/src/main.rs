//! Operator command line for Tenure locks.
//!
//! Talks to the configured redis store directly, so it can inspect locks held
//! by other processes and clear records left behind by crashed holders.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tenure_common::{LockConfig, LoggingConfig, init_logging};
use tenure_lock::{CancellationToken, LockError, LockRegistry, describe_metrics};
use tenure_store::RedisCoordinator;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tenure-ctl", about = "Inspect and recover Tenure distributed locks")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store URL, overrides the configuration file
    #[arg(long, env = "TENURE_STORE_URL")]
    store_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the store record of a lock as JSON
    Inspect { name: String },
    /// Delete a lock record regardless of its holder
    ForceUnlock { name: String },
    /// Acquire a lock and keep it until Ctrl+C
    Hold {
        name: String,
        /// Lease in milliseconds, defaults to the configured lease
        #[arg(long)]
        lease_ms: Option<u64>,
        /// Give up after this many milliseconds instead of waiting forever
        #[arg(long)]
        wait_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _logging_guard = init_logging(&LoggingConfig::from_env())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    describe_metrics();

    let cli = Cli::parse();

    let mut config = LockConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(url) = cli.store_url {
        config.store_url = url;
    }

    let coordinator = RedisCoordinator::connect(&config.store_url)
        .await
        .with_context(|| format!("connecting to {}", config.store_url))?;
    let registry = LockRegistry::new(Arc::new(coordinator), config)?;

    let result = run(&registry, cli.command).await;
    registry.destroy();
    result
}

async fn run(registry: &LockRegistry, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Inspect { name } => {
            let snapshot = registry.get_lock(&name)?.inspect().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::ForceUnlock { name } => {
            if registry.get_lock(&name)?.force_unlock().await {
                println!("Lock '{}' released", name);
            } else {
                println!("Lock '{}' was not held", name);
            }
        }
        Commands::Hold {
            name,
            lease_ms,
            wait_ms,
        } => hold(registry, &name, lease_ms, wait_ms).await?,
    }
    Ok(())
}

async fn hold(
    registry: &LockRegistry,
    name: &str,
    lease_ms: Option<u64>,
    wait_ms: Option<u64>,
) -> anyhow::Result<()> {
    let lock = registry.get_lock(name)?;
    let lease = lease_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| lock.default_lease());

    let interrupt = CancellationToken::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });
    }

    let acquired = match wait_ms {
        Some(wait_ms) => {
            lock.try_lock_for_cancellable(Duration::from_millis(wait_ms), lease, &interrupt)
                .await
        }
        None => lock.lock_cancellable(lease, &interrupt).await.map(|_| true),
    };

    match acquired {
        Ok(true) => {}
        Ok(false) => {
            println!("Lock '{}' is held by someone else", name);
            return Ok(());
        }
        Err(LockError::Interrupted) => {
            println!("Interrupted while waiting for '{}'", name);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    info!(lock = %name, owner = %lock.current_owner(), "Holding lock, press Ctrl+C to release");
    println!("Holding '{}' as {}", name, lock.current_owner());
    interrupt.cancelled().await;

    if !lock.unlock().await {
        warn!(lock = %name, "Lock was no longer held at shutdown");
    }
    println!("Lock '{}' released", name);
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quest_server::config::ServerConfig;
use quest_server::console::{ConsoleControl, ConsoleHost, ConsoleSink};
use quest_server::quest::{HotReloadEvent, PersistenceScheduler, QuestEngine};

#[derive(Parser)]
#[command(name = "quest-server")]
#[command(about = "Repeatable block quests driven from the console")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the data directory from the config file
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The log filter lives in the config, so read it before logging starts
    let loaded = ServerConfig::read(&args.config).await?;
    let missing = loaded.is_none();
    let mut config = loaded.unwrap_or_default();
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if missing {
        warn!("Config file {:?} not found, using defaults", args.config);
    }

    info!("Using data directory {:?}", config.data_dir);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let sink = Arc::new(ConsoleSink::new(&config.rewards.items, out_tx));

    let engine = QuestEngine::open(&config, sink.clone(), sink.clone())
        .await
        .context("Failed to load quest data")?;
    let engine = Arc::new(engine);
    info!("{} quest(s) available", engine.catalog().count().await);

    // Print player messages
    let printer = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            println!("{}", line);
        }
    });

    if config.catalog.watch {
        let mut reloads = engine.catalog().start_file_watcher();
        tokio::spawn(async move {
            while let Some(event) = reloads.recv().await {
                if let HotReloadEvent::Error(e) = event {
                    warn!("Keeping the previous quest catalog: {}", e);
                }
            }
        });
    }

    let scheduler =
        PersistenceScheduler::new(engine.clone(), config.persistence.clone()).spawn();

    let host = ConsoleHost::from_config(&config, engine.clone(), sink.clone());
    sink.print("Quest server ready. Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if host.execute(&line).await == ConsoleControl::Stop {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Console input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read console input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!("Shutting down");
    if let Err(e) = scheduler.shutdown().await {
        error!("Final save failed: {}", e);
    }

    drop(host);
    drop(sink);
    drop(engine);
    let _ = printer.await;

    Ok(())
}

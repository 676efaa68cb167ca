use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    DrosseIo, DrosseRegistry, HttpCommandGateway, HttpConfigFetcher, NotificationBus,
    WsEventSource,
};
use shared::{
    domain::{DrosseId, DrosseMap},
    protocol::BusMessage,
};
use tokio::sync::broadcast;
use tracing::info;

mod config;

use config::{load_settings, DEFAULT_SETTINGS_FILE};

#[derive(Parser, Debug)]
#[command(about = "Drosse front end")]
struct Args {
    /// Settings file, see `desktop.toml`.
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[arg(long)]
    host_url: Option<String>,
    #[arg(long)]
    fetch_timeout_ms: Option<u64>,
    #[arg(long)]
    persist_on_down: Option<bool>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow drosse lifecycle and traffic until interrupted.
    Watch,
    List,
    Open { uuid: String },
    Close { uuid: String },
    Home,
    Browse { dir: String },
    File { uuid: String, file: String },
    Edit { uuid: String, file: String },
    Start { uuid: String },
    Stop { uuid: String },
    Import { path: String },
    /// Set a front-end field on a route; `value` is parsed as JSON when it can be.
    Annotate {
        uuid: String,
        route: String,
        field: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config);
    if let Some(host_url) = args.host_url {
        settings.host_url = host_url;
    }
    if let Some(ms) = args.fetch_timeout_ms {
        settings.fetch_timeout_ms = ms;
    }
    if let Some(persist) = args.persist_on_down {
        settings.persist_on_down = persist;
    }

    let gateway = Arc::new(HttpCommandGateway::new(settings.host_url.clone()));
    let fetcher = Arc::new(HttpConfigFetcher::new(Duration::from_millis(
        settings.fetch_timeout_ms,
    )));
    let registry = DrosseRegistry::new(
        gateway.clone(),
        fetcher,
        NotificationBus::default(),
        settings.registry_options(),
    );
    let io = DrosseIo::new(gateway);

    match args.command {
        Command::Watch => watch(&registry, &settings.host_url).await?,
        Command::List => print_drosses(&registry.load().await?),
        Command::Open { uuid } => {
            registry.load().await?;
            registry.open(&DrosseId::new(uuid)).await?;
            print_drosses(&registry.snapshot().await);
        }
        Command::Close { uuid } => {
            registry.load().await?;
            registry.close(&DrosseId::new(uuid)).await?;
            print_drosses(&registry.snapshot().await);
        }
        Command::Home => {
            registry.load().await?;
            registry.open_home().await?;
            print_drosses(&registry.snapshot().await);
        }
        Command::Browse { dir } => {
            for entry in io.browse(&dir).await? {
                let marker = if entry.selectable { "*" } else { " " };
                println!("{marker} {}", entry.path);
            }
        }
        Command::File { uuid, file } => {
            let view = io.load_file(&DrosseId::new(uuid), &file).await;
            println!("// {}", view.language.as_str());
            println!("{}", view.content);
        }
        Command::Edit { uuid, file } => {
            let opened = io.open_file(&DrosseId::new(uuid), &file).await?;
            println!("{}", opened.path);
        }
        Command::Start { uuid } => io.start(&DrosseId::new(uuid)).await?,
        Command::Stop { uuid } => io.stop(&DrosseId::new(uuid)).await?,
        Command::Import { path } => {
            let imported = io.import_folder(&path).await?;
            if imported.accepted {
                println!("imported {}", imported.path);
            } else {
                println!("{} is not a drosse folder", imported.path);
            }
        }
        Command::Annotate {
            uuid,
            route,
            field,
            value,
        } => {
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            registry.load().await?;
            registry
                .annotate_route(&DrosseId::new(uuid), &route, &field, value)
                .await?;
        }
    }
    Ok(())
}

async fn watch(registry: &Arc<DrosseRegistry>, host_url: &str) -> Result<()> {
    print_drosses(&registry.load().await?);

    let source = WsEventSource::new(host_url)?;
    let subscription = registry
        .start(&source)
        .await
        .context("failed to follow host events")?;
    info!(url = source.url(), "watching drosse events");

    let mut bus = registry.bus().subscribe();
    let mut changes = registry.subscribe_changes();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = subscription.finished() => {
                info!("host event stream closed");
                break;
            }
            message = bus.recv() => match message {
                Ok(BusMessage::Request { uuid, method, url }) => println!("[{uuid}] {method} {url}"),
                Ok(BusMessage::Log { uuid, msg }) => println!("[{uuid}] {msg}"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "traffic output lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                print_drosses(&registry.snapshot().await);
            }
        }
    }

    subscription.stop();
    Ok(())
}

fn print_drosses(drosses: &DrosseMap) {
    if drosses.is_empty() {
        println!("no drosses");
        return;
    }
    for drosse in drosses.values() {
        let state = if drosse.up { "up" } else { "down" };
        let focus = if drosse.selected { ">" } else { " " };
        let routes = drosse.routes.as_ref().map_or(0, |routes| routes.len());
        println!(
            "{focus} {uuid} {name} [{state}] {routes} routes",
            uuid = drosse.uuid,
            name = drosse.name.as_deref().unwrap_or("-"),
        );
    }
}

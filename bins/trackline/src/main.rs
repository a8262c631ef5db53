// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Trackline CLI
//!
//! Logs in to a tracking server, prints the fleet snapshot, and follows live
//! point updates until Ctrl+C or the server goes away.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trackline_app_core::FleetView;
use trackline_avatar::AvatarCache;
use trackline_client::{
    Reconciler, SharedConfigStore, SnapshotFetcher, SyncEvent, SyncOptions, Transport,
};
use trackline_config_fs::{default_cache_dir, FsConfigStore};
use trackline_model::Point;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the persisted session (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Directory for cached marker images (defaults to the platform cache dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Log in and remember the server and identity
    Login {
        /// Server base URL (e.g. https://demo.traccar.org)
        #[arg(long)]
        server: String,
        /// Account e-mail
        #[arg(long)]
        user: String,
        /// Account password (never stored)
        #[arg(long, env = "TRACKLINE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Print every device's current point
    Snapshot {
        /// Account password for this run's session
        #[arg(long, env = "TRACKLINE_PASSWORD", hide_env_values = true)]
        password: String,
        /// Position lookups kept in flight
        #[arg(long, default_value_t = trackline_client::DEFAULT_SNAPSHOT_CONCURRENCY)]
        concurrency: usize,
    },
    /// Print the snapshot, then stream updates until Ctrl+C
    Follow {
        /// Account password for this run's session
        #[arg(long, env = "TRACKLINE_PASSWORD", hide_env_values = true)]
        password: String,
        /// Milliseconds a device-only change waits for its position
        #[arg(long, default_value_t = 5000)]
        fallback_ms: u64,
    },
    /// Forget the persisted server and identity
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let fs_store = match &args.config_dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    };
    let store: SharedConfigStore = Arc::new(fs_store.context("open config store")?);
    let cache_dir = match args.cache_dir {
        Some(dir) => dir,
        None => default_cache_dir().context("resolve cache dir")?,
    };
    let mut transport = Transport::new(store).context("build http client")?;

    match args.cmd {
        Command::Login {
            server,
            user,
            password,
        } => {
            let session = transport
                .authenticate(&server, &user, &password)
                .await
                .context("login")?;
            info!(server = %session.server_url, identity = %session.identity, "session saved");
        }
        Command::Logout => {
            transport.forget().context("forget session")?;
        }
        Command::Snapshot {
            password,
            concurrency,
        } => {
            relogin(&mut transport, &password).await?;
            let transport = Arc::new(transport);
            let avatars = AvatarCache::new(cache_dir.join("avatars"), transport.clone());
            let points = SnapshotFetcher::new(transport, avatars)
                .with_concurrency(concurrency)
                .fetch_all_points()
                .await
                .context("fetch snapshot")?;
            let mut out = std::io::stdout().lock();
            for point in &points {
                write_point(&mut out, point)?;
            }
        }
        Command::Follow {
            password,
            fallback_ms,
        } => {
            relogin(&mut transport, &password).await?;
            let options = SyncOptions {
                fallback_delay: Duration::from_millis(fallback_ms),
                ..SyncOptions::default()
            };
            follow(Arc::new(transport), cache_dir, options).await?;
        }
    }

    Ok(())
}

/// The session cookie only lives in memory, so each run logs in again with the
/// persisted server and identity.
async fn relogin(transport: &mut Transport, password: &str) -> Result<()> {
    let server = transport
        .persisted_server_url()
        .context("no saved server; run `trackline login` first")?;
    let identity = transport
        .persisted_identity()
        .context("no saved identity; run `trackline login` first")?;
    transport
        .authenticate(&server, &identity, password)
        .await
        .context("login")?;
    Ok(())
}

async fn follow(transport: Arc<Transport>, cache_dir: PathBuf, options: SyncOptions) -> Result<()> {
    let avatars = AvatarCache::new(cache_dir.join("avatars"), transport.clone());
    let mut view = FleetView::new();

    let snapshot = SnapshotFetcher::new(transport.clone(), avatars.clone())
        .with_concurrency(options.snapshot_concurrency)
        .fetch_all_points()
        .await
        .context("fetch snapshot")?;
    view.replace_all(snapshot);
    {
        let mut out = std::io::stdout().lock();
        for point in view.iter() {
            write_point(&mut out, point)?;
        }
    }
    info!(devices = view.len(), "snapshot loaded; following updates");

    let (mut reconciler, mut events) = Reconciler::new(transport, avatars, options);
    reconciler.subscribe().context("subscribe")?;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Some(SyncEvent::Point(point)) => {
                    write_point(&mut std::io::stdout().lock(), &point)?;
                    view.apply(point);
                }
                Some(SyncEvent::Connection(true)) => info!("live"),
                Some(SyncEvent::Connection(false)) | None => {
                    warn!("connection ended");
                    break;
                }
                Some(SyncEvent::FrameRejected(err)) => warn!(%err, "frame skipped"),
            },
        }
    }

    reconciler.unsubscribe().await;
    if let Some(latest) = view.latest() {
        info!(device = latest.device_id, time = %latest.time, "most recent fix");
    }
    view.clear();
    Ok(())
}

fn write_point(out: &mut impl Write, point: &Point) -> Result<()> {
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{:.6}\t{:.6}\t{}\t{}",
        point.device_id,
        point.name,
        point.category,
        point.status,
        point.latitude,
        point.longitude,
        point.time.to_rfc3339(),
        point.marker,
    )?;
    Ok(())
}

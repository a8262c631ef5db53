// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Delta reconciler: owns the WebSocket and turns fact frames into points.
//!
//! ```text
//! Disconnected --subscribe--> Connecting --open--> Connected
//!      ^                          |                    |
//!      +------ failure / close / unsubscribe ----------+
//! ```
//!
//! One spawned connection task reads the socket, holds the fact caches and
//! receives fallback-timer reports. Nothing else touches that state.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use trackline_avatar::AvatarCache;

use crate::error::SyncError;
use crate::events::SyncEvent;
use crate::facts::{FactEngine, Fired};
use crate::snapshot::DEFAULT_SNAPSHOT_CONCURRENCY;
use crate::transport::Transport;

/// Default delay before a device-only change is emitted on its own.
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_secs(5);

/// Externally observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; `subscribe` is allowed.
    Disconnected,
    /// Socket handshake in progress.
    Connecting,
    /// Socket open; frames are being applied.
    Connected,
}

/// Tunables for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How long a device fact waits for its position before emitting alone.
    pub fallback_delay: Duration,
    /// Position lookups kept in flight by the snapshot fetcher.
    pub snapshot_concurrency: usize,
    /// Upper bound on sending the close frame during `unsubscribe`.
    pub close_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            fallback_delay: DEFAULT_FALLBACK_DELAY,
            snapshot_concurrency: DEFAULT_SNAPSHOT_CONCURRENCY,
            close_timeout: Duration::from_secs(1),
        }
    }
}

struct Connection {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Everything the connection task needs, cloned out of the [`Reconciler`].
struct ConnectionCtx {
    transport: Arc<Transport>,
    avatars: AvatarCache,
    events: mpsc::UnboundedSender<SyncEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    options: SyncOptions,
}

impl ConnectionCtx {
    fn publish(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("event consumer gone; dropping event");
        }
    }

    fn finish(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
        self.publish(SyncEvent::Connection(false));
    }
}

/// Streams point updates from the server's socket to one event consumer.
pub struct Reconciler {
    transport: Arc<Transport>,
    avatars: AvatarCache,
    options: SyncOptions,
    events: mpsc::UnboundedSender<SyncEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    active: Option<Connection>,
}

impl Reconciler {
    /// Create a disconnected engine and the receiver its events go to.
    pub fn new(
        transport: Arc<Transport>,
        avatars: AvatarCache,
        options: SyncOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let engine = Self {
            transport,
            avatars,
            options,
            events,
            state: Arc::new(state),
            active: None,
        };
        (engine, rx)
    }

    /// Current engine state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Open the socket in the background. Must be called inside a Tokio runtime.
    ///
    /// Returns immediately; `Connection(true)` arrives on the event channel once
    /// the handshake succeeds, `Connection(false)` if it fails.
    pub fn subscribe(&mut self) -> Result<(), SyncError> {
        if self.state() != ConnectionState::Disconnected {
            return Err(SyncError::AlreadySubscribed);
        }
        // a previous connection that ended on its own
        self.active = None;

        self.state.send_replace(ConnectionState::Connecting);
        let ctx = ConnectionCtx {
            transport: self.transport.clone(),
            avatars: self.avatars.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            options: self.options.clone(),
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_connection(ctx, shutdown_rx));
        self.active = Some(Connection { shutdown, task });
        Ok(())
    }

    /// Close the socket, cancel every fallback timer and wait for the task to end.
    ///
    /// No point is emitted after this returns. Calling it while disconnected is a
    /// no-op.
    pub async fn unsubscribe(&mut self) {
        let Some(conn) = self.active.take() else {
            return;
        };
        let _ = conn.shutdown.send(());
        match conn.task.await {
            Ok(()) => {}
            Err(err) if err.is_panic() => error!(?err, "connection task panicked"),
            Err(err) => warn!(?err, "connection task failed"),
        }
        self.state.send_replace(ConnectionState::Disconnected);
        info!("unsubscribed");
    }
}

enum Step {
    Shutdown,
    Fired(Fired),
    Socket(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

#[derive(Debug)]
enum EndReason {
    Requested,
    ServerClosed,
    Failed(String),
}

async fn run_connection(ctx: ConnectionCtx, mut shutdown: oneshot::Receiver<()>) {
    let opened = tokio::select! {
        res = ctx.transport.open_socket() => res,
        _ = &mut shutdown => {
            debug!("unsubscribed while connecting");
            ctx.finish();
            return;
        }
    };
    let mut socket = match opened {
        Ok(socket) => socket,
        Err(err) => {
            warn!(%err, "websocket connect failed");
            ctx.finish();
            return;
        }
    };

    info!("websocket connected");
    ctx.state.send_replace(ConnectionState::Connected);
    ctx.publish(SyncEvent::Connection(true));

    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let mut engine = FactEngine::new(
        ctx.avatars.clone(),
        ctx.events.clone(),
        fired_tx,
        ctx.options.fallback_delay,
    );

    let reason = loop {
        let step = tokio::select! {
            _ = &mut shutdown => Step::Shutdown,
            Some(fired) = fired_rx.recv() => Step::Fired(fired),
            msg = socket.next() => Step::Socket(msg),
        };
        match step {
            Step::Shutdown => break EndReason::Requested,
            Step::Fired(fired) => {
                engine.on_fallback(fired);
            }
            Step::Socket(None) => break EndReason::ServerClosed,
            Step::Socket(Some(Err(err))) => break EndReason::Failed(err.to_string()),
            Step::Socket(Some(Ok(msg))) => match msg {
                Message::Text(text) => engine.handle_text(&text),
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => engine.handle_text(text),
                    Err(err) => warn!(%err, "skipping non-UTF-8 binary frame"),
                },
                Message::Close(frame) => {
                    debug!(?frame, "server sent close");
                    break EndReason::ServerClosed;
                }
                _ => {}
            },
        }
    };

    debug!(armed = engine.armed(), "cancelling fallback timers");
    engine.cancel_all();
    drop(engine);

    match &reason {
        EndReason::Requested => {
            let close = socket.close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client unsubscribed".into(),
            }));
            match tokio::time::timeout(ctx.options.close_timeout, close).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(%err, "close frame not delivered"),
                Err(_) => debug!("close frame timed out"),
            }
            info!("websocket closed by client");
        }
        EndReason::ServerClosed => info!("websocket closed by server"),
        EndReason::Failed(err) => warn!(err, "websocket failed"),
    }
    ctx.finish();
}

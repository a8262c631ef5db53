// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process fake tracking server (REST + WebSocket) for integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use trackline_app_core::MemoryConfigStore;
use trackline_avatar::AvatarCache;
use trackline_client::{SyncEvent, Transport};

pub const PASSWORD: &str = "secret";
const SESSION_COOKIE: &str = "JSESSIONID=fake-session-1";

/// What the fake server will serve.
#[derive(Default)]
pub struct Fixture {
    pub devices: Vec<Value>,
    /// Keyed by position id.
    pub positions: HashMap<i64, Value>,
    /// Position ids that answer HTTP 500.
    pub failing_positions: HashSet<i64>,
}

/// Scripted server-side socket traffic.
pub enum Feed {
    Text(String),
    Close,
}

struct ServerState {
    fixture: Fixture,
    feed: Mutex<Option<mpsc::UnboundedReceiver<Feed>>>,
    position_hits: AtomicUsize,
    image_hits: AtomicUsize,
    socket_had_cookie: AtomicBool,
    client_close: Mutex<Option<u16>>,
}

pub struct FakeServer {
    pub url: String,
    state: Arc<ServerState>,
    feed: mpsc::UnboundedSender<Feed>,
}

impl FakeServer {
    pub async fn start(fixture: Fixture) -> Self {
        let (feed, feed_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ServerState {
            fixture,
            feed: Mutex::new(Some(feed_rx)),
            position_hits: AtomicUsize::new(0),
            image_hits: AtomicUsize::new(0),
            socket_had_cookie: AtomicBool::new(false),
            client_close: Mutex::new(None),
        });
        let app = Router::new()
            .route("/api/session", post(login))
            .route("/api/devices", get(devices))
            .route("/api/positions", get(positions))
            .route("/api/socket", get(socket))
            .route("/images/{name}", get(image))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{addr}"),
            state,
            feed,
        }
    }

    /// Push a text frame to the connected client.
    pub fn push(&self, frame: impl Into<String>) {
        self.feed.send(Feed::Text(frame.into())).unwrap();
    }

    /// Close the socket from the server side.
    pub fn close(&self) {
        self.feed.send(Feed::Close).unwrap();
    }

    pub fn position_hits(&self) -> usize {
        self.state.position_hits.load(Ordering::SeqCst)
    }

    pub fn image_hits(&self) -> usize {
        self.state.image_hits.load(Ordering::SeqCst)
    }

    pub fn socket_had_cookie(&self) -> bool {
        self.state.socket_had_cookie.load(Ordering::SeqCst)
    }

    /// Close code sent by the client, waiting briefly for it to arrive.
    pub async fn client_close_code(&self) -> Option<u16> {
        for _ in 0..50 {
            if let Some(code) = *self.state.client_close.lock().unwrap() {
                return Some(code);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }
}

#[derive(Deserialize)]
struct Login {
    email: String,
    password: String,
}

async fn login(Form(login): Form<Login>) -> Response {
    if login.password != PASSWORD {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    (
        [(header::SET_COOKIE, format!("{SESSION_COOKIE}; Path=/"))],
        Json(json!({ "id": 1, "email": login.email })),
    )
        .into_response()
}

fn has_session(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(';').any(|c| c.trim() == SESSION_COOKIE))
}

async fn devices(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if !has_session(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(Value::Array(state.fixture.devices.clone())).into_response()
}

#[derive(Deserialize)]
struct PositionQuery {
    id: i64,
}

async fn positions(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(query): Query<PositionQuery>,
) -> Response {
    if !has_session(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.position_hits.fetch_add(1, Ordering::SeqCst);
    if state.fixture.failing_positions.contains(&query.id) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let body: Vec<Value> = state
        .fixture
        .positions
        .get(&query.id)
        .cloned()
        .into_iter()
        .collect();
    Json(body).into_response()
}

async fn image(State(state): State<Arc<ServerState>>) -> Response {
    state.image_hits.fetch_add(1, Ordering::SeqCst);
    ([(header::CONTENT_TYPE, "image/png")], png_bytes()).into_response()
}

async fn socket(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !has_session(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.socket_had_cookie.store(true, Ordering::SeqCst);
    let feed = state.feed.lock().unwrap().take();
    ws.on_upgrade(move |socket| serve_socket(socket, feed, state))
}

async fn serve_socket(
    mut socket: WebSocket,
    feed: Option<mpsc::UnboundedReceiver<Feed>>,
    state: Arc<ServerState>,
) {
    let Some(mut feed) = feed else {
        return;
    };
    loop {
        tokio::select! {
            item = feed.recv() => match item {
                Some(Feed::Text(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Some(Feed::Close) | None => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "server going away".into(),
                        })))
                        .await;
                    return;
                }
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(frame))) => {
                    *state.client_close.lock().unwrap() = frame.map(|f| f.code);
                    return;
                }
                Some(Ok(_)) => {}
                _ => return,
            },
        }
    }
}

pub fn png_bytes() -> Vec<u8> {
    let mut img = RgbaImage::new(2, 2);
    for px in img.pixels_mut() {
        *px = Rgba([200, 40, 40, 255]);
    }
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

pub fn device_json(id: i64, category: &str, status: &str, position_id: i64) -> Value {
    json!({
        "id": id,
        "name": format!("unit {id}"),
        "category": category,
        "status": status,
        "positionId": position_id,
        "attributes": {}
    })
}

pub fn position_json(id: i64, device_id: i64, latitude: f64, longitude: f64) -> Value {
    json!({
        "id": id,
        "deviceId": device_id,
        "latitude": latitude,
        "longitude": longitude,
        "deviceTime": "2024-05-01T12:00:00.000+00:00"
    })
}

/// Log in against `server` with a fresh in-memory config store.
pub async fn logged_in(server: &FakeServer) -> (Arc<Transport>, MemoryConfigStore) {
    let store = MemoryConfigStore::new();
    let mut transport = Transport::new(Arc::new(store.clone())).unwrap();
    transport
        .authenticate(&server.url, "ops@example.org", PASSWORD)
        .await
        .unwrap();
    (Arc::new(transport), store)
}

pub fn avatars_in(dir: &tempfile::TempDir, transport: &Arc<Transport>) -> AvatarCache {
    AvatarCache::new(dir.path().join("avatars"), transport.clone())
}

/// Next event, failing the test if none arrives within two seconds.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Events that arrive within `wait`.
pub async fn events_within(
    rx: &mut mpsc::UnboundedReceiver<SyncEvent>,
    wait: Duration,
) -> Vec<SyncEvent> {
    let deadline = tokio::time::Instant::now() + wait;
    let mut out = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        out.push(event);
    }
    out
}

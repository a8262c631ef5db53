// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session and transport: login, authenticated REST calls, and the socket.
//!
//! The tracking server authenticates with a session cookie set by
//! `POST /api/session`. The cookie lives in the client's jar and is forwarded on
//! every later call, including the WebSocket handshake. Only the server URL and
//! identity are persisted (through [`SessionStore`]); the secret never is.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{StatusCode, Url};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use trackline_app_core::config::ConfigStore;
use trackline_app_core::{PersistedSession, SessionStore};
use trackline_avatar::{AvatarError, ImageSource};

use crate::error::SyncError;

/// Client side of the server's WebSocket.
pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Shared handle to whatever store keeps the session record.
pub type SharedConfigStore = Arc<dyn ConfigStore + Send + Sync>;

/// Authenticated HTTP + WebSocket access to one tracking server.
pub struct Transport {
    http: reqwest::Client,
    jar: Arc<Jar>,
    sessions: SessionStore<SharedConfigStore>,
    base: Option<Url>,
}

impl Transport {
    /// Build a transport, picking up a previously persisted server URL if any.
    pub fn new(store: SharedConfigStore) -> Result<Self, SyncError> {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(concat!("trackline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::transport("<client>", e))?;
        let sessions = SessionStore::new(store);
        let base = match sessions.server_url() {
            Some(url) => match parse_base(&url) {
                Ok(base) => Some(base),
                Err(err) => {
                    warn!(%err, "ignoring persisted server URL");
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            http,
            jar,
            sessions,
            base,
        })
    }

    /// Log in and remember `server_url` + `identity` for later runs.
    ///
    /// HTTP 401/403 map to [`SyncError::Auth`]; anything else non-2xx to
    /// [`SyncError::Transport`]. Not retried.
    pub async fn authenticate(
        &mut self,
        server_url: &str,
        identity: &str,
        secret: &str,
    ) -> Result<PersistedSession, SyncError> {
        let base = parse_base(server_url)?;
        let url = join(&base, "api/session")?;
        let resp = self
            .http
            .post(url.clone())
            .form(&[("email", identity), ("password", secret)])
            .send()
            .await
            .map_err(|e| SyncError::transport(url.as_str(), e))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::transport(url.as_str(), format!("HTTP {status}")));
        }

        let session = PersistedSession {
            server_url: server_url.trim_end_matches('/').to_string(),
            identity: identity.to_string(),
        };
        self.sessions.save(&session)?;
        self.base = Some(base);
        info!(server = %session.server_url, identity, "authenticated");
        Ok(session)
    }

    /// Drop the persisted session record and stop using the current server.
    pub fn forget(&mut self) -> Result<(), SyncError> {
        self.sessions.clear()?;
        self.base = None;
        info!("session forgotten");
        Ok(())
    }

    /// One authenticated GET of `{server}/{path}` with query parameters.
    pub async fn call(&self, path: &str, query: &[(&str, String)]) -> Result<Bytes, SyncError> {
        let mut url = join(self.base()?, path)?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        self.get(url).await
    }

    /// GET an absolute URL (or one relative to the server) with the session cookie.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Bytes, SyncError> {
        let target = self.absolute(url)?;
        self.get(target).await
    }

    /// `url` as-is when absolute, otherwise joined onto the current server.
    fn absolute(&self, url: &str) -> Result<Url, SyncError> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(_) => join(self.base()?, url.trim_start_matches('/')),
        }
    }

    /// Open the server's WebSocket, forwarding the session cookie.
    pub async fn open_socket(&self) -> Result<Socket, SyncError> {
        let url = self.socket_url()?;
        info!(%url, "connecting to websocket");
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        if let Some(cookie) = self.jar.cookies(self.base()?) {
            match HeaderValue::from_bytes(cookie.as_bytes()) {
                Ok(value) => {
                    request.headers_mut().insert(COOKIE, value);
                }
                Err(err) => warn!(?err, "session cookie not forwardable"),
            }
        }
        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SyncError::transport(url.as_str(), e))?;
        Ok(socket)
    }

    /// `{server}/api/socket` with the scheme switched to `ws`/`wss`.
    pub fn socket_url(&self) -> Result<Url, SyncError> {
        let mut url = join(self.base()?, "api/socket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| SyncError::InvalidUrl(format!("cannot use {scheme} for {url}")))?;
        Ok(url)
    }

    /// Server URL currently in use.
    pub fn server_url(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    /// Server URL persisted by a previous login, if any.
    pub fn persisted_server_url(&self) -> Option<String> {
        self.sessions.server_url()
    }

    /// Identity persisted by a previous login, if any.
    pub fn persisted_identity(&self) -> Option<String> {
        self.sessions.identity()
    }

    fn base(&self) -> Result<&Url, SyncError> {
        self.base.as_ref().ok_or(SyncError::NotConfigured)
    }

    async fn get(&self, url: Url) -> Result<Bytes, SyncError> {
        debug!(%url, "calling api");
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SyncError::transport(url.as_str(), e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::transport(url.as_str(), format!("HTTP {status}")));
        }
        resp.bytes()
            .await
            .map_err(|e| SyncError::transport(url.as_str(), e))
    }
}

#[async_trait]
impl ImageSource for Transport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AvatarError> {
        self.fetch_bytes(url)
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| AvatarError::Fetch {
                url: url.to_string(),
                reason: err.to_string(),
            })
    }

    fn canonical_url(&self, url: &str) -> String {
        self.absolute(url)
            .map_or_else(|_| url.to_string(), String::from)
    }
}

/// Parse a server URL and make it usable as a join base.
fn parse_base(server_url: &str) -> Result<Url, SyncError> {
    let mut url =
        Url::parse(server_url).map_err(|e| SyncError::InvalidUrl(format!("{server_url}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SyncError::InvalidUrl(format!(
            "{server_url}: expected http or https"
        )));
    }
    // keep a sub-path like `/traccar` when joining `api/...`
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn join(base: &Url, path: &str) -> Result<Url, SyncError> {
    base.join(path)
        .map_err(|e| SyncError::InvalidUrl(format!("{base} + {path}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use trackline_app_core::MemoryConfigStore;

    fn transport_for(server: &str) -> Transport {
        let store = MemoryConfigStore::new();
        SessionStore::new(store.clone())
            .save(&PersistedSession {
                server_url: server.into(),
                identity: "ops".into(),
            })
            .unwrap();
        Transport::new(Arc::new(store)).unwrap()
    }

    #[test]
    fn socket_url_follows_scheme_and_sub_path() {
        let plain = transport_for("http://tracker.local:8082");
        assert_eq!(
            plain.socket_url().unwrap().as_str(),
            "ws://tracker.local:8082/api/socket"
        );
        let tls = transport_for("https://example.org/traccar");
        assert_eq!(
            tls.socket_url().unwrap().as_str(),
            "wss://example.org/traccar/api/socket"
        );
    }

    #[test]
    fn restores_persisted_identity() {
        let t = transport_for("https://example.org");
        assert_eq!(t.persisted_identity().as_deref(), Some("ops"));
        assert_eq!(
            t.persisted_server_url().as_deref(),
            Some("https://example.org")
        );
        assert!(t.server_url().is_some());
    }

    #[tokio::test]
    async fn calls_without_server_are_not_configured() {
        let t = Transport::new(Arc::new(MemoryConfigStore::new())).unwrap();
        assert!(t.persisted_server_url().is_none());
        assert!(matches!(
            t.call("api/devices", &[]).await,
            Err(SyncError::NotConfigured)
        ));
        assert!(matches!(t.socket_url(), Err(SyncError::NotConfigured)));
    }

    #[test]
    fn relative_image_urls_are_keyed_per_server() {
        let north = transport_for("https://north.example/traccar");
        let south = transport_for("https://south.example");
        assert_eq!(
            north.canonical_url("/images/car.png"),
            "https://north.example/traccar/images/car.png"
        );
        assert_eq!(
            south.canonical_url("/images/car.png"),
            "https://south.example/images/car.png"
        );
        assert_eq!(
            south.canonical_url("https://cdn.example/a.png"),
            "https://cdn.example/a.png"
        );
    }

    #[test]
    fn rejects_non_http_server_urls() {
        assert!(matches!(
            parse_base("ftp://example.org"),
            Err(SyncError::InvalidUrl(_))
        ));
        assert!(matches!(parse_base("not a url"), Err(SyncError::InvalidUrl(_))));
    }
}

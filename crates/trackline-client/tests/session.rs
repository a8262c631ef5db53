// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Login, persistence and authenticated calls against the fake server.
#![allow(clippy::unwrap_used)]

mod support;

use std::sync::Arc;

use support::{logged_in, FakeServer, Fixture};
use trackline_app_core::config::ConfigStore;
use trackline_app_core::session::SESSION_KEY;
use trackline_app_core::MemoryConfigStore;
use trackline_client::{SyncError, Transport};

#[tokio::test]
async fn bad_credentials_are_an_auth_error_and_persist_nothing() {
    let server = FakeServer::start(Fixture::default()).await;
    let store = MemoryConfigStore::new();
    let mut transport = Transport::new(Arc::new(store.clone())).unwrap();

    let err = transport
        .authenticate(&server.url, "ops@example.org", "wrong")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Auth { status: 401 }));
    assert!(store.raw(SESSION_KEY).is_none());
    assert!(transport.server_url().is_none());
}

#[tokio::test]
async fn login_persists_url_and_identity_but_not_the_secret() {
    let server = FakeServer::start(Fixture::default()).await;
    let (transport, store) = logged_in(&server).await;

    assert_eq!(
        transport.persisted_server_url().as_deref(),
        Some(server.url.as_str())
    );
    assert_eq!(
        transport.persisted_identity().as_deref(),
        Some("ops@example.org")
    );
    let raw = String::from_utf8(store.load_raw(SESSION_KEY).unwrap()).unwrap();
    assert!(!raw.contains(support::PASSWORD));

    // a second process picks the server back up without logging in
    let restored = Transport::new(Arc::new(store)).unwrap();
    assert_eq!(
        restored.server_url().map(|u| u.as_str().trim_end_matches('/').to_string()),
        Some(server.url.clone())
    );
}

#[tokio::test]
async fn calls_carry_the_session_cookie() {
    let server = FakeServer::start(Fixture {
        devices: vec![support::device_json(1, "car", "online", 10)],
        ..Fixture::default()
    })
    .await;
    let (transport, _store) = logged_in(&server).await;

    let body = transport.call("api/devices", &[]).await.unwrap();
    let listed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(listed[0]["id"], 1);
}

#[tokio::test]
async fn calls_without_login_fail_as_transport_errors() {
    let server = FakeServer::start(Fixture::default()).await;
    let store = MemoryConfigStore::new();
    trackline_app_core::SessionStore::new(store.clone())
        .save(&trackline_app_core::PersistedSession {
            server_url: server.url.clone(),
            identity: "ops@example.org".into(),
        })
        .unwrap();
    // persisted URL but no cookie in this process
    let transport = Transport::new(Arc::new(store)).unwrap();

    let err = transport.call("api/devices", &[]).await.unwrap_err();
    assert!(matches!(err, SyncError::Transport { .. }), "{err}");
}

#[tokio::test]
async fn forget_clears_the_record() {
    let server = FakeServer::start(Fixture::default()).await;
    let store = MemoryConfigStore::new();
    let mut transport = Transport::new(Arc::new(store.clone())).unwrap();
    transport
        .authenticate(&server.url, "ops@example.org", support::PASSWORD)
        .await
        .unwrap();

    transport.forget().unwrap();
    assert!(transport.persisted_server_url().is_none());
    assert!(matches!(
        transport.call("api/devices", &[]).await,
        Err(SyncError::NotConfigured)
    ));
}

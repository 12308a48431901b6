//! Tests for the file-backed credential store.

use serde_json::json;

use zapdesk::whatsapp::auth::{AuthState, AuthStore, FileAuthStore};
use zapdesk::whatsapp::WhatsAppError;

fn registered_state() -> AuthState {
    let mut state = AuthState {
        creds: Some(json!({ "noiseKey": "secret", "me": { "id": "5511900000000:3@s.whatsapp.net" } })),
        ..AuthState::default()
    };
    state.keys.insert("pre-key-1".to_owned(), json!({ "public": "abc" }));
    state
}

#[tokio::test]
async fn missing_file_loads_empty_state() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let store = FileAuthStore::new(tmp.path().join("auth/creds.json"));

    let state = store.load().await.expect("load");
    assert_eq!(state, AuthState::default());
    assert!(!state.is_registered());
}

#[tokio::test]
async fn save_then_load_returns_same_state() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("auth/creds.json");
    let store = FileAuthStore::new(path.clone());

    let state = registered_state();
    store.save(&state).await.expect("save");
    assert!(path.exists());
    assert!(!tmp.path().join("auth/creds.json.tmp").exists());

    let loaded = store.load().await.expect("load");
    assert_eq!(loaded, state);
    assert!(loaded.is_registered());
}

#[tokio::test]
async fn saving_the_same_state_twice_is_idempotent() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("creds.json");
    let store = FileAuthStore::new(path.clone());

    let state = registered_state();
    store.save(&state).await.expect("first save");
    let first = std::fs::read(&path).expect("read");
    store.save(&state).await.expect("second save");
    let second = std::fs::read(&path).expect("read");
    assert_eq!(first, second);
}

#[tokio::test]
async fn corrupt_file_is_an_auth_store_error() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("creds.json");
    std::fs::write(&path, "{ not json").expect("write");

    let result = FileAuthStore::new(path).load().await;
    assert!(matches!(result, Err(WhatsAppError::AuthStore(_))));
}

#[test]
fn debug_output_redacts_credentials() {
    let rendered = format!("{:?}", registered_state());
    assert!(!rendered.contains("secret"));
    assert!(rendered.contains("REDACTED"));
}

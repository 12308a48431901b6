//! Tests for phone-to-account linking.

use zapdesk::store::{AccountDirectory, AccountId, Database, SqliteAccountDirectory, StoreError};

async fn directory() -> SqliteAccountDirectory {
    let db = Database::open_in_memory().await.expect("open db");
    SqliteAccountDirectory::new(db.pool().clone())
}

fn account(id: &str) -> AccountId {
    AccountId(id.to_owned())
}

#[tokio::test]
async fn linked_phone_resolves_sender() {
    let dir = directory().await;
    let canonical = dir
        .link_phone("(11) 98765-4321", &account("acct-1"))
        .await
        .expect("link");
    assert_eq!(canonical, "5511987654321");

    let resolved = dir
        .resolve_account("5511987654321@s.whatsapp.net")
        .await
        .expect("resolve");
    assert_eq!(resolved, Some(account("acct-1")));
}

#[tokio::test]
async fn unlinked_sender_resolves_to_none() {
    let dir = directory().await;
    let resolved = dir
        .resolve_account("5521900000000@s.whatsapp.net")
        .await
        .expect("resolve");
    assert_eq!(resolved, None);
}

#[tokio::test]
async fn sender_without_ninth_digit_matches_linked_mobile() {
    let dir = directory().await;
    dir.link_phone("11 98765-4321", &account("acct-1"))
        .await
        .expect("link");

    let resolved = dir
        .resolve_account("551187654321@s.whatsapp.net")
        .await
        .expect("resolve");
    assert_eq!(resolved, Some(account("acct-1")));
}

#[tokio::test]
async fn device_qualified_sender_resolves() {
    let dir = directory().await;
    dir.link_phone("+55 11 98765-4321", &account("acct-1"))
        .await
        .expect("link");
    let resolved = dir
        .resolve_account("5511987654321:12@s.whatsapp.net")
        .await
        .expect("resolve");
    assert_eq!(resolved, Some(account("acct-1")));
}

#[tokio::test]
async fn relinking_moves_phone_to_new_account() {
    let dir = directory().await;
    dir.link_phone("11987654321", &account("acct-1")).await.expect("link");
    dir.link_phone("11987654321", &account("acct-2")).await.expect("relink");

    let resolved = dir
        .resolve_account("5511987654321@s.whatsapp.net")
        .await
        .expect("resolve");
    assert_eq!(resolved, Some(account("acct-2")));
}

#[tokio::test]
async fn unlink_removes_access() {
    let dir = directory().await;
    dir.link_phone("11987654321", &account("acct-1")).await.expect("link");

    assert!(dir.unlink_phone("(11) 98765-4321").await.expect("unlink"));
    assert!(!dir.unlink_phone("(11) 98765-4321").await.expect("unlink again"));
    let resolved = dir
        .resolve_account("5511987654321@s.whatsapp.net")
        .await
        .expect("resolve");
    assert_eq!(resolved, None);
}

#[tokio::test]
async fn short_phone_is_rejected() {
    let dir = directory().await;
    let result = dir.link_phone("123", &account("acct-1")).await;
    assert!(matches!(result, Err(StoreError::InvalidPhone(_))));
}

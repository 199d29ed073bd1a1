mod common;

use std::sync::Arc;

use common::{record, FakePlaylistApi};
use match_core::{HttpPlaylistApi, PlaylistApi, PlaylistMembershipCache, StaticToken, SyncError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn load_replaces_membership_with_server_list() {
    let api = FakePlaylistApi::with_server_list(vec![record(3, "a", false), record(9, "b", true)]);
    let cache = PlaylistMembershipCache::new(api);

    assert_eq!(cache.load().await.unwrap(), 2);
    assert_eq!(cache.members(), vec![3, 9]);
    assert!(cache.contains(9));
}

#[tokio::test]
async fn add_and_remove_after_confirmation() {
    let api = FakePlaylistApi::default();
    let cache = PlaylistMembershipCache::new(api.clone());

    cache.add(5).await.unwrap();
    assert!(cache.contains(5));
    assert!(!cache.is_pending(5));

    cache.remove(5).await.unwrap();
    assert!(!cache.contains(5));
    assert_eq!(api.calls(), 2);
}

#[tokio::test]
async fn toggle_flips_membership() {
    let cache = PlaylistMembershipCache::new(FakePlaylistApi::default());
    assert!(cache.toggle(4).await.unwrap());
    assert!(!cache.toggle(4).await.unwrap());
    assert!(!cache.contains(4));
}

#[tokio::test]
async fn rejected_change_leaves_set_unchanged() {
    let api = FakePlaylistApi::default();
    let cache = PlaylistMembershipCache::new(api.clone());
    api.set_conflict(true);

    let err = cache.add(5).await.unwrap_err();
    assert!(matches!(err, SyncError::Conflict { match_id: 5, .. }));
    assert!(!cache.contains(5));
    assert!(!cache.is_pending(5));
}

#[tokio::test]
async fn concurrent_change_for_same_id_is_busy() {
    let api = FakePlaylistApi::default();
    let cache = Arc::new(PlaylistMembershipCache::new(api.clone()));
    api.hold();

    let first = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.add(5).await })
    };
    while !cache.is_pending(5) {
        tokio::task::yield_now().await;
    }

    assert!(matches!(cache.remove(5).await, Err(SyncError::Busy(5))));
    // A different id is not blocked.
    api.release();
    cache.add(6).await.unwrap();

    first.await.unwrap().unwrap();
    assert_eq!(cache.members(), vec![5, 6]);
    assert_eq!(api.calls(), 2);
}

#[tokio::test]
async fn cancelled_change_clears_pending() {
    let api = FakePlaylistApi::default();
    let cache = Arc::new(PlaylistMembershipCache::new(api.clone()));
    api.hold();

    let task = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.add(5).await })
    };
    while !cache.is_pending(5) {
        tokio::task::yield_now().await;
    }
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert!(!cache.is_pending(5));
    assert!(!cache.contains(5));
}

fn http_api(server: &MockServer, token: &str) -> HttpPlaylistApi {
    HttpPlaylistApi::new(
        reqwest::Client::new(),
        format!("{}/api", server.uri()),
        Arc::new(StaticToken(token.to_string())),
    )
}

#[tokio::test]
async fn http_add_sends_bearer_and_maps_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/playlists/5"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/playlists/6"))
        .respond_with(ResponseTemplate::new(409).set_body_string("already in playlist"))
        .mount(&server)
        .await;

    let api = http_api(&server, "secret");
    api.add(5).await.unwrap();

    match api.add(6).await {
        Err(SyncError::Conflict { match_id, message }) => {
            assert_eq!(match_id, 6);
            assert_eq!(message, "already in playlist");
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn http_list_remove_and_contains() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/playlists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "id": 1, "title": "Final", "competition": "Cup", "status": 1, "isLive": false }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/playlists/1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/playlists/contains/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/playlists/contains/2"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let api = http_api(&server, "secret");
    let list = api.list().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].title, "Final");

    api.remove(1).await.unwrap();
    assert!(api.contains(1).await.unwrap());
    assert!(matches!(
        api.contains(2).await,
        Err(SyncError::Status { status: 401, .. })
    ));
}

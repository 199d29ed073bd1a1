mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    invocation, notification_record, record, FakeFetcher, FakePlaylistApi, Script,
    ScriptedTransport,
};
use match_core::{
    patch_held, spawn_event_pump, ChannelState, ClientConfig, FilterCategory, MatchStatus,
    MatchStatusChange, MatchSync, NoToken, NotificationStore, PushEvent, SharedTokenProvider,
    StaticToken, SyncError, ToastPresenter,
};
use serde_json::json;
use tokio::sync::broadcast;

type TestSync = MatchSync<FakeFetcher, ScriptedTransport, FakePlaylistApi>;

fn build(transport: ScriptedTransport, token: Option<&str>) -> (TestSync, FakeFetcher) {
    let fetcher = FakeFetcher::default();
    let tokens: SharedTokenProvider = match token {
        Some(t) => Arc::new(StaticToken(t.to_string())),
        None => Arc::new(NoToken),
    };
    let api = FakePlaylistApi::with_server_list(vec![record(10, "saved", false)]);
    let sync = MatchSync::new(
        fetcher.clone(),
        transport,
        api,
        &ClientConfig::default(),
        tokens,
    )
    .unwrap();
    (sync, fetcher)
}

#[tokio::test(start_paused = true)]
async fn pushed_events_become_notifications_and_toasts() {
    let transport = ScriptedTransport::new(vec![Script::Hold(vec![
        notification_record("Goal", "1-0"),
        invocation("ReceiveNotification", json!([{ "matchId": 4, "isLive": false }])),
    ])]);
    let (sync, _) = build(transport, Some("tok"));

    sync.connect_push().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let list = sync.notifications();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].message, "Match #4 is now replay");
    assert_eq!(list[1].title, "Goal");
    assert_eq!(sync.unread_count(), 2);

    let toast = sync.toast().unwrap();
    assert!(toast.visible);
    assert_eq!(toast.notification.id, list[0].id);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!sync.toast_presenter().is_visible());
    assert_eq!(sync.push().state(), ChannelState::Connected);
}

#[tokio::test(start_paused = true)]
async fn local_notification_is_stored_and_toasted() {
    let (sync, _) = build(ScriptedTransport::default(), None);

    let n = sync.notify_local("Test Toast", "This is a test notification", Some("Live"));
    assert_eq!(sync.notifications()[0].id, n.id);
    assert_eq!(sync.toast().unwrap().notification.id, n.id);
    assert_eq!(sync.notification_store().by_status("live").len(), 1);
}

#[tokio::test]
async fn push_needs_a_token() {
    let (sync, _) = build(ScriptedTransport::default(), None);
    assert!(matches!(sync.connect_push(), Err(SyncError::MissingToken)));
    assert_eq!(sync.push().state(), ChannelState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_background_task() {
    let transport = ScriptedTransport::new(vec![Script::Hold(vec![])]);
    let (sync, fetcher) = build(transport, Some("tok"));

    sync.scheduler().start(FilterCategory::Live).await.unwrap();
    sync.connect_push().unwrap();
    assert_eq!(sync.playlist().load().await.unwrap(), 1);
    sync.notify_local("A", "a", None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sync.push().state(), ChannelState::Connected);

    sync.shutdown();
    assert!(!sync.scheduler().is_running());
    assert_eq!(sync.push().state(), ChannelState::Disconnected);
    assert!(!sync.toast_presenter().is_visible());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(sync.cache().latest(FilterCategory::Live).len(), 1);
    assert!(sync.playlist().contains(10));
}

#[tokio::test]
async fn event_pump_routes_every_event() {
    let (tx, rx) = broadcast::channel(8);
    let store = NotificationStore::new();
    let toast = ToastPresenter::new();
    let pump = spawn_event_pump(rx, store.clone(), toast.clone());

    tx.send(PushEvent::MatchStatusChanged(MatchStatusChange {
        match_id: 1,
        is_live: true,
    }))
    .unwrap();
    drop(tx);
    pump.await.unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(toast.current().unwrap().notification.title, "Match Status Updated");
}

#[tokio::test(start_paused = true)]
async fn pushed_status_change_patches_held_records() {
    let transport = ScriptedTransport::new(vec![Script::Hold(vec![
        notification_record("Goal", "1-0"),
        invocation("MatchStatusUpdated", json!([4, true])),
    ])]);
    let (sync, _) = build(transport, Some("tok"));
    let mut held = vec![record(3, "other", false), record(4, "final", false)];
    let mut events = sync.push().subscribe();

    sync.connect_push().unwrap();

    let notification = events.recv().await.unwrap();
    assert!(!patch_held(&mut held, &notification));

    let change = events.recv().await.unwrap();
    assert!(patch_held(&mut held, &change));
    assert!(held[1].is_live);
    assert_eq!(held[1].status, MatchStatus::Live);
    assert!(!held[0].is_live);
}

use std::sync::{Mutex, MutexGuard, PoisonError};

use reqwest::Client;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::SharedTokenProvider;
use crate::cache::FilterCache;
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::event::PushEvent;
use crate::fetcher::{HttpSnapshotFetcher, SnapshotFetcher};
use crate::model::{apply_status_change, MatchRecord};
use crate::notifications::{Notification, NotificationList, NotificationStore};
use crate::playlist::{HttpPlaylistApi, PlaylistApi, PlaylistMembershipCache};
use crate::hub::HubTransport;
use crate::push::{PushChannel, PushTransport, ReconnectPolicy};
use crate::scheduler::RefreshScheduler;
use crate::toast::{ToastPresenter, ToastState};

/// Feed push events into the notification store and toast each stored
/// notification. Ends when the channel is dropped.
pub fn spawn_event_pump(
    mut events: broadcast::Receiver<PushEvent>,
    store: NotificationStore,
    toast: ToastPresenter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let notification = store.append(event);
                    toast.show(notification);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event pump fell behind, push events dropped");
                }
                Err(RecvError::Closed) => {
                    debug!("push channel closed, event pump exiting");
                    break;
                }
            }
        }
    })
}

/// Apply a pushed event to the records a view is holding. Only status
/// changes touch records; returns `true` when one was patched.
pub fn patch_held(records: &mut [MatchRecord], event: &PushEvent) -> bool {
    match event {
        PushEvent::MatchStatusChanged(change) => apply_status_change(records, change),
        PushEvent::GenericNotification(_) => false,
    }
}

/// One instance of every client-side component, wired together.
pub struct MatchSync<F = HttpSnapshotFetcher, T = HubTransport, P = HttpPlaylistApi>
where
    F: SnapshotFetcher,
    T: PushTransport,
    P: PlaylistApi,
{
    scheduler: RefreshScheduler<F>,
    push: PushChannel<T>,
    playlist: PlaylistMembershipCache<P>,
    notifications: NotificationStore,
    toast: ToastPresenter,
    tokens: SharedTokenProvider,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MatchSync {
    /// HTTP-backed instance talking to `config.api_url`.
    pub fn from_config(
        config: &ClientConfig,
        client: Client,
        tokens: SharedTokenProvider,
    ) -> Result<Self, SyncError> {
        let fetcher = HttpSnapshotFetcher::from_config(client.clone(), config, tokens.clone());
        let transport = HubTransport::from_config(client.clone(), &config.push);
        let playlist = HttpPlaylistApi::new(client, config.api_url.clone(), tokens.clone());
        Self::new(fetcher, transport, playlist, config, tokens)
    }
}

impl<F, T, P> MatchSync<F, T, P>
where
    F: SnapshotFetcher,
    T: PushTransport,
    P: PlaylistApi,
{
    pub fn new(
        fetcher: F,
        transport: T,
        playlist_api: P,
        config: &ClientConfig,
        tokens: SharedTokenProvider,
    ) -> Result<Self, SyncError> {
        let scheduler =
            RefreshScheduler::with_interval(fetcher, FilterCache::new(), config.refresh.interval());
        let push = PushChannel::new(
            transport,
            config.hub_url()?,
            ReconnectPolicy::from_config(&config.push),
        );
        Ok(Self {
            scheduler,
            push,
            playlist: PlaylistMembershipCache::new(playlist_api),
            notifications: NotificationStore::with_capacity(config.notifications.max_entries),
            toast: ToastPresenter::with_duration(config.notifications.toast_duration()),
            tokens,
            pump: Mutex::new(None),
        })
    }

    fn pump(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect the push channel and start routing its events into
    /// notifications and toasts.
    pub fn connect_push(&self) -> Result<(), SyncError> {
        {
            let mut pump = self.pump();
            if pump.as_ref().map_or(true, |task| task.is_finished()) {
                // Subscribe before connecting so the first event isn't missed.
                *pump = Some(spawn_event_pump(
                    self.push.subscribe(),
                    self.notifications.clone(),
                    self.toast.clone(),
                ));
            }
        }
        self.push.connect(self.tokens.clone())
    }

    pub fn disconnect_push(&self) {
        self.push.disconnect();
        if let Some(task) = self.pump().take() {
            task.abort();
        }
    }

    /// Raise a notification from the client itself, toasted like a pushed one.
    pub fn notify_local(&self, title: &str, message: &str, status: Option<&str>) -> Notification {
        let notification = self.notifications.push_local(title, message, status);
        self.toast.show(notification.clone());
        notification
    }

    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.disconnect_push();
        self.toast.hide();
        info!("match sync shut down");
    }

    pub fn scheduler(&self) -> &RefreshScheduler<F> {
        &self.scheduler
    }

    pub fn cache(&self) -> &FilterCache {
        self.scheduler.cache()
    }

    pub fn push(&self) -> &PushChannel<T> {
        &self.push
    }

    pub fn playlist(&self) -> &PlaylistMembershipCache<P> {
        &self.playlist
    }

    pub fn notification_store(&self) -> &NotificationStore {
        &self.notifications
    }

    pub fn toast_presenter(&self) -> &ToastPresenter {
        &self.toast
    }

    pub fn notifications(&self) -> NotificationList {
        self.notifications.snapshot()
    }

    pub fn toast(&self) -> Option<ToastState> {
        self.toast.current()
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.unread_count()
    }
}

impl<F, T, P> Drop for MatchSync<F, T, P>
where
    F: SnapshotFetcher,
    T: PushTransport,
    P: PlaylistApi,
{
    fn drop(&mut self) {
        if let Some(task) = self.pump().take() {
            task.abort();
        }
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::event::{NotificationPayload, PushEvent};
use crate::model::MatchStatus;

pub const DEFAULT_MAX_NOTIFICATIONS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub details: Option<String>,
    pub status: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl Notification {
    fn from_payload(payload: NotificationPayload) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            title: payload.title,
            message: payload.message,
            details: payload.details,
            status: payload.status,
            timestamp: payload.timestamp.unwrap_or_else(Utc::now),
            read: false,
        }
    }

    /// Turn a push event into a fresh, unread notification with its own id.
    /// Status changes are phrased for display.
    pub fn from_event(event: PushEvent) -> Self {
        match event {
            PushEvent::GenericNotification(payload) => Self::from_payload(payload),
            PushEvent::MatchStatusChanged(change) => {
                let status = MatchStatus::from_live(change.is_live);
                Self::from_payload(NotificationPayload {
                    id: None,
                    title: "Match Status Updated".to_string(),
                    message: format!(
                        "Match #{} is now {}",
                        change.match_id,
                        status.label().to_lowercase()
                    ),
                    details: None,
                    status: Some(status.label().to_string()),
                    timestamp: None,
                })
            }
        }
    }

    pub fn has_status(&self, status: &str) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(status))
    }
}

/// The filters offered by the notification panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationCategory {
    #[default]
    All,
    Live,
    Playlist,
}

impl NotificationCategory {
    pub fn matches(self, notification: &Notification) -> bool {
        match self {
            Self::All => true,
            Self::Live => notification.has_status("live"),
            Self::Playlist => notification.title.contains("Playlist"),
        }
    }
}

pub type NotificationList = Arc<Vec<Notification>>;

/// Bounded, newest-first list of delivered notifications.
///
/// Every mutation builds a new list and swaps it in, so observers always see
/// a whole collection. Unread counts are derived from the list on demand.
#[derive(Clone)]
pub struct NotificationStore {
    list: Arc<watch::Sender<NotificationList>>,
    max_entries: usize,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_NOTIFICATIONS)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            list: Arc::new(watch::channel(NotificationList::default()).0),
            max_entries: max_entries.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    fn replace(&self, f: impl FnOnce(&[Notification]) -> Vec<Notification>) {
        self.list.send_modify(|current| {
            let next = f(current.as_slice());
            *current = Arc::new(next);
        });
    }

    /// Store an event as a new unread notification at the front, dropping
    /// the oldest entries past capacity. Returns what was stored.
    pub fn append(&self, event: PushEvent) -> Notification {
        self.insert(Notification::from_event(event))
    }

    /// Record a locally raised notification alongside pushed ones.
    pub fn push_local(&self, title: &str, message: &str, status: Option<&str>) -> Notification {
        self.insert(Notification {
            id: Uuid::new_v4().simple().to_string(),
            title: title.to_string(),
            message: message.to_string(),
            details: None,
            status: status.map(str::to_string),
            timestamp: Utc::now(),
            read: false,
        })
    }

    fn insert(&self, notification: Notification) -> Notification {
        let stored = notification.clone();
        let max = self.max_entries;
        self.replace(move |current| {
            let mut next = Vec::with_capacity((current.len() + 1).min(max));
            next.push(notification);
            next.extend(current.iter().take(max - 1).cloned());
            next
        });
        debug!(id = %stored.id, title = %stored.title, "notification stored");
        stored
    }

    pub fn mark_read(&self, id: &str) {
        self.replace(|current| {
            current
                .iter()
                .map(|n| Notification {
                    read: n.read || n.id == id,
                    ..n.clone()
                })
                .collect()
        });
    }

    pub fn mark_all_read(&self) {
        self.replace(|current| {
            current
                .iter()
                .map(|n| Notification { read: true, ..n.clone() })
                .collect()
        });
    }

    pub fn remove(&self, id: &str) {
        self.replace(|current| current.iter().filter(|n| n.id != id).cloned().collect());
    }

    pub fn clear(&self) {
        self.replace(|_| Vec::new());
    }

    /// The whole collection, newest first.
    pub fn snapshot(&self) -> NotificationList {
        self.list.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationList> {
        self.list.subscribe()
    }

    pub fn len(&self) -> usize {
        self.list.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread_count(&self) -> usize {
        self.list.borrow().iter().filter(|n| !n.read).count()
    }

    /// Case-insensitive status match.
    pub fn by_status(&self, status: &str) -> Vec<Notification> {
        self.filtered(|n| n.has_status(status))
    }

    pub fn by_title(&self, title: &str) -> Vec<Notification> {
        self.filtered(|n| n.title == title)
    }

    pub fn by_title_contains(&self, needle: &str) -> Vec<Notification> {
        self.filtered(|n| n.title.contains(needle))
    }

    pub fn by_category(&self, category: NotificationCategory) -> Vec<Notification> {
        self.filtered(|n| category.matches(n))
    }

    fn filtered(&self, keep: impl Fn(&Notification) -> bool) -> Vec<Notification> {
        self.list.borrow().iter().filter(|n| keep(n)).cloned().collect()
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

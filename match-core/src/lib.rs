pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod hub;
pub mod model;
pub mod notifications;
pub mod playlist;
pub mod push;
pub mod scheduler;
pub mod service;
pub mod toast;

pub use auth::{NoToken, SharedTokenProvider, StaticToken, TokenProvider, TokenSlot};
pub use cache::{FilterCache, Subscription};
pub use config::{ClientConfig, NotificationConfig, PushConfig, RefreshConfig};
pub use error::SyncError;
pub use event::{parse_frame, Frame, NotificationPayload, PushEvent};
pub use fetcher::{HttpSnapshotFetcher, SnapshotFetcher};
pub use model::{apply_status_change, FilterCategory, MatchId, MatchRecord, MatchSnapshot};
pub use model::{MatchStatus, MatchStatusChange};
pub use notifications::{Notification, NotificationCategory, NotificationList, NotificationStore};
pub use playlist::{HttpPlaylistApi, PlaylistApi, PlaylistMembershipCache};
pub use hub::{HubConnection, HubTransport, Negotiated};
pub use push::{ChannelState, PushChannel, PushConnection, PushTransport};
pub use push::ReconnectPolicy;
pub use scheduler::{RefreshScheduler, DEFAULT_REFRESH_INTERVAL};
pub use service::{patch_held, spawn_event_pump, MatchSync};
pub use toast::{ToastPresenter, ToastState};

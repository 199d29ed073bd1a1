use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::notifications::Notification;

pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct ToastState {
    pub notification: Notification,
    pub visible: bool,
}

#[derive(Default)]
struct Expiry {
    // Identifies the toast the pending timer belongs to.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    state: watch::Sender<Option<ToastState>>,
    expiry: Mutex<Expiry>,
    duration: Duration,
}

impl Inner {
    fn expiry(&self) -> MutexGuard<'_, Expiry> {
        self.expiry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hide_visible(&self) {
        self.state.send_if_modified(|state| match state {
            Some(toast) if toast.visible => {
                toast.visible = false;
                true
            }
            _ => false,
        });
    }
}

/// Single-slot toast that hides itself after a fixed duration.
///
/// A new toast replaces the current one; the previous expiry timer is
/// cancelled so it can never hide its successor. Hiding keeps the last
/// notification around for fade-out.
#[derive(Clone)]
pub struct ToastPresenter {
    inner: Arc<Inner>,
}

impl ToastPresenter {
    pub fn new() -> Self {
        Self::with_duration(DEFAULT_TOAST_DURATION)
    }

    pub fn with_duration(duration: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: watch::channel(None).0,
                expiry: Mutex::new(Expiry::default()),
                duration,
            }),
        }
    }

    /// Show `notification`, replacing the current toast.
    ///
    /// The auto-hide timer runs on the current tokio runtime. Called outside
    /// one, the toast is shown without a timer and stays until [`hide`].
    ///
    /// [`hide`]: ToastPresenter::hide
    pub fn show(&self, notification: Notification) {
        let mut expiry = self.inner.expiry();
        if let Some(timer) = expiry.timer.take() {
            timer.abort();
        }
        expiry.generation += 1;
        let generation = expiry.generation;

        debug!(id = %notification.id, "showing toast");
        self.inner.state.send_replace(Some(ToastState {
            notification,
            visible: true,
        }));

        let Ok(runtime) = Handle::try_current() else {
            debug!("no tokio runtime, toast stays until hidden");
            return;
        };
        let inner = Arc::clone(&self.inner);
        expiry.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(inner.duration).await;
            let mut expiry = inner.expiry();
            if expiry.generation != generation {
                return;
            }
            expiry.timer = None;
            inner.hide_visible();
        }));
    }

    /// Dismiss now and cancel the pending auto-hide.
    pub fn hide(&self) {
        let mut expiry = self.inner.expiry();
        if let Some(timer) = expiry.timer.take() {
            timer.abort();
        }
        expiry.generation += 1;
        self.inner.hide_visible();
    }

    pub fn current(&self) -> Option<ToastState> {
        self.inner.state.borrow().clone()
    }

    pub fn is_visible(&self) -> bool {
        self.inner
            .state
            .borrow()
            .as_ref()
            .is_some_and(|toast| toast.visible)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ToastState>> {
        self.inner.state.subscribe()
    }

    pub fn has_pending_expiry(&self) -> bool {
        self.inner.expiry().timer.is_some()
    }
}

impl Default for ToastPresenter {
    fn default() -> Self {
        Self::new()
    }
}

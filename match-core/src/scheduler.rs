use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::{FilterCache, Subscription};
use crate::error::SyncError;
use crate::fetcher::SnapshotFetcher;
use crate::model::{FilterCategory, MatchSnapshot};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(45);

#[derive(Default)]
struct Lifecycle {
    active: Option<FilterCategory>,
    // Bumped by every start/stop; a fetch only publishes if it still matches.
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

struct Shared<F> {
    fetcher: F,
    cache: FilterCache,
    interval: Duration,
    lifecycle: Mutex<Lifecycle>,
    last_updated: watch::Sender<Option<DateTime<Utc>>>,
}

impl<F: SnapshotFetcher> Shared<F> {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticket(&self) -> Option<(FilterCategory, u64)> {
        let state = self.lifecycle();
        state.active.map(|filter| (filter, state.epoch))
    }

    /// Publishes only when no start/stop happened since the fetch was issued
    /// and the fetch's filter is still the active one.
    fn publish_if_current(&self, filter: FilterCategory, epoch: u64, snapshot: MatchSnapshot) -> bool {
        let state = self.lifecycle();
        let current = state.epoch == epoch && state.active.map_or(true, |active| active == filter);
        if !current {
            debug!(filter = %filter, active = ?state.active, "discarding stale fetch result");
            return false;
        }
        self.cache.publish(filter, snapshot);
        self.last_updated.send_replace(Some(Utc::now()));
        true
    }
}

/// Polls the backend for the active filter category and republishes each
/// result into the [`FilterCache`].
///
/// At most one timer task exists per scheduler. Scheduled failures are logged
/// and ride it out; failures of `start` and `refresh_now` go to the caller.
pub struct RefreshScheduler<F> {
    shared: Arc<Shared<F>>,
}

impl<F: SnapshotFetcher> RefreshScheduler<F> {
    pub fn new(fetcher: F, cache: FilterCache) -> Self {
        Self::with_interval(fetcher, cache, DEFAULT_REFRESH_INTERVAL)
    }

    pub fn with_interval(fetcher: F, cache: FilterCache, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                fetcher,
                cache,
                interval,
                lifecycle: Mutex::new(Lifecycle::default()),
                last_updated: watch::channel(None).0,
            }),
        }
    }

    /// Make `filter` active, fetch it once right away, then keep polling.
    ///
    /// Calling this while already running only redirects later ticks; no
    /// second timer is armed. The initial fetch error, if any, is returned
    /// after the timer is armed.
    pub async fn start(&self, filter: FilterCategory) -> Result<(), SyncError> {
        let epoch = {
            let mut state = self.shared.lifecycle();
            state.active = Some(filter);
            state.epoch += 1;
            state.epoch
        };
        info!(filter = %filter, "refresh scheduler started");

        let outcome = match self.shared.fetcher.fetch(filter).await {
            Ok(records) => {
                self.shared.publish_if_current(filter, epoch, Arc::new(records));
                Ok(())
            }
            Err(err) => {
                warn!(filter = %filter, error = %err, "initial fetch failed");
                Err(err)
            }
        };

        self.arm(epoch);
        outcome
    }

    fn arm(&self, epoch: u64) {
        let mut state = self.shared.lifecycle();
        // A stop or restart during the initial fetch owns the lifecycle now.
        if state.epoch != epoch || state.timer.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        state.timer = Some(tokio::spawn(run_ticks(shared)));
    }

    /// Cancel the timer and forget the active filter. Any fetch still in
    /// flight will be discarded when it lands. Safe to call repeatedly.
    pub fn stop(&self) {
        let timer = {
            let mut state = self.shared.lifecycle();
            state.active = None;
            state.epoch += 1;
            state.timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
            info!("refresh scheduler stopped");
        }
    }

    pub async fn switch_filter(&self, filter: FilterCategory) -> Result<(), SyncError> {
        self.stop();
        self.start(filter).await
    }

    /// Out-of-band fetch; the timer cadence is left alone. The result is
    /// always returned, but only lands in the cache if `filter` is the
    /// active one (or the scheduler is idle).
    pub async fn refresh_now(&self, filter: FilterCategory) -> Result<MatchSnapshot, SyncError> {
        let epoch = self.shared.lifecycle().epoch;
        let records = self.shared.fetcher.fetch(filter).await.map_err(|err| {
            warn!(filter = %filter, error = %err, "manual refresh failed");
            err
        })?;
        let snapshot = Arc::new(records);
        self.shared.publish_if_current(filter, epoch, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    pub fn active_filter(&self) -> Option<FilterCategory> {
        self.shared.lifecycle().active
    }

    pub fn is_running(&self) -> bool {
        self.shared.lifecycle().timer.is_some()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_updated.borrow()
    }

    pub fn watch_last_updated(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.shared.last_updated.subscribe()
    }

    pub fn cache(&self) -> &FilterCache {
        &self.shared.cache
    }

    pub fn subscribe(&self, filter: FilterCategory) -> Subscription {
        self.shared.cache.subscribe(filter)
    }
}

impl<F> Drop for RefreshScheduler<F> {
    fn drop(&mut self) {
        let mut state = self.shared.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        state.active = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

async fn run_ticks<F: SnapshotFetcher>(shared: Arc<Shared<F>>) {
    let period = shared.interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        // Read the filter at tick time so a switch redirects the next poll.
        let Some((filter, epoch)) = shared.ticket() else {
            break;
        };
        match shared.fetcher.fetch(filter).await {
            Ok(records) => {
                shared.publish_if_current(filter, epoch, Arc::new(records));
            }
            Err(err) => {
                warn!(filter = %filter, error = %err, "scheduled refresh failed, keeping previous snapshot");
            }
        }
    }
}

//! Latest-value slots for each filter category.
//!
//! Every slot is a `watch` channel: subscribers get the current snapshot
//! immediately and afterwards only ever the newest one. Nothing queues, so an
//! observer that falls behind skips straight to the latest publish.

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{FilterCategory, MatchSnapshot};

/// Latest snapshot per filter category, shared by the scheduler and its
/// observers.
///
/// Observers are pull-based: a [`Subscription`] is a `watch` receiver that
/// awaits the newest value, not a callback run synchronously on publish.
/// Observers that fall behind see only the latest snapshot, never the ones
/// published in between.
#[derive(Clone)]
pub struct FilterCache {
    slots: Arc<[watch::Sender<MatchSnapshot>; 3]>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(std::array::from_fn(|_| {
                watch::channel(MatchSnapshot::default()).0
            })),
        }
    }

    fn slot(&self, category: FilterCategory) -> &watch::Sender<MatchSnapshot> {
        &self.slots[category.slot()]
    }

    /// Replace the slot's snapshot and wake every observer of it.
    pub fn publish(&self, category: FilterCategory, snapshot: MatchSnapshot) {
        self.slot(category).send_replace(snapshot);
    }

    pub fn latest(&self, category: FilterCategory) -> MatchSnapshot {
        self.slot(category).borrow().clone()
    }

    pub fn subscribe(&self, category: FilterCategory) -> Subscription {
        Subscription {
            category,
            rx: Some(self.slot(category).subscribe()),
        }
    }

    pub fn observer_count(&self, category: FilterCategory) -> usize {
        self.slot(category).receiver_count()
    }
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer handle for one cache slot.
pub struct Subscription {
    category: FilterCategory,
    rx: Option<watch::Receiver<MatchSnapshot>>,
}

impl Subscription {
    pub fn category(&self) -> FilterCategory {
        self.category
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }

    /// Current value of the slot, marking it as seen. Empty once unsubscribed.
    pub fn current(&mut self) -> MatchSnapshot {
        match self.rx.as_mut() {
            Some(rx) => rx.borrow_and_update().clone(),
            None => MatchSnapshot::default(),
        }
    }

    /// Waits for the next publish and returns the newest snapshot, or `None`
    /// after `unsubscribe`.
    pub async fn changed(&mut self) -> Option<MatchSnapshot> {
        let rx = self.rx.as_mut()?;
        rx.changed().await.ok()?;
        Some(rx.borrow_and_update().clone())
    }

    /// Whether a publish happened since the value was last read.
    pub fn has_changed(&self) -> bool {
        self.rx
            .as_ref()
            .and_then(|rx| rx.has_changed().ok())
            .unwrap_or(false)
    }

    /// Stop delivery. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        self.rx = None;
    }
}

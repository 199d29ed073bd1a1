use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{info, warn};

use crate::auth::{bearer, SharedTokenProvider};
use crate::config::endpoint;
use crate::error::SyncError;
use crate::fetcher::check_response;
use crate::model::{MatchId, MatchRecord};

/// Server side of the user's playlist.
pub trait PlaylistApi: Send + Sync + 'static {
    fn add(&self, id: MatchId) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn remove(&self, id: MatchId) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn list(&self) -> impl Future<Output = Result<Vec<MatchRecord>, SyncError>> + Send;
}

#[derive(Clone)]
pub struct HttpPlaylistApi {
    client: Client,
    api_url: String,
    tokens: SharedTokenProvider,
}

impl HttpPlaylistApi {
    pub fn new(client: Client, api_url: impl Into<String>, tokens: SharedTokenProvider) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            tokens,
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match bearer(self.tokens.as_ref()) {
            Some(auth) => builder.header(reqwest::header::AUTHORIZATION, auth),
            None => builder,
        }
    }

    /// Asks the server directly instead of trusting the local set.
    pub async fn contains(&self, id: MatchId) -> Result<bool, SyncError> {
        let url = endpoint(&self.api_url, &format!("playlists/contains/{id}"))?;
        let response = self.authorize(self.client.get(url)).send().await?;
        Ok(check_response(response).await?.json().await?)
    }

    async fn mutation(&self, id: MatchId, response: Response) -> Result<(), SyncError> {
        if response.status() == StatusCode::CONFLICT {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::Conflict { match_id: id, message });
        }
        check_response(response).await?;
        Ok(())
    }
}

impl PlaylistApi for HttpPlaylistApi {
    async fn add(&self, id: MatchId) -> Result<(), SyncError> {
        let url = endpoint(&self.api_url, &format!("playlists/{id}"))?;
        let response = self.authorize(self.client.post(url)).send().await?;
        self.mutation(id, response).await
    }

    async fn remove(&self, id: MatchId) -> Result<(), SyncError> {
        let url = endpoint(&self.api_url, &format!("playlists/{id}"))?;
        let response = self.authorize(self.client.delete(url)).send().await?;
        self.mutation(id, response).await
    }

    async fn list(&self) -> Result<Vec<MatchRecord>, SyncError> {
        let url = endpoint(&self.api_url, "playlists")?;
        let response = self.authorize(self.client.get(url)).send().await?;
        Ok(check_response(response).await?.json().await?)
    }
}

#[derive(Default)]
struct Membership {
    members: BTreeSet<MatchId>,
    pending: HashSet<MatchId>,
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Add,
    Remove,
}

// Clears the pending marker however the mutation ends, cancellation included.
struct PendingGuard<'a> {
    state: &'a Mutex<Membership>,
    id: MatchId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending.remove(&self.id);
    }
}

/// Local mirror of which matches are in the user's playlist.
///
/// Membership only changes after the server confirms. While a change for an
/// id is in flight, further changes for that id fail with `Busy`.
pub struct PlaylistMembershipCache<A> {
    api: A,
    state: Mutex<Membership>,
}

impl<A: PlaylistApi> PlaylistMembershipCache<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            state: Mutex::new(Membership::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, Membership> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, id: MatchId) -> bool {
        self.state().members.contains(&id)
    }

    pub fn is_pending(&self, id: MatchId) -> bool {
        self.state().pending.contains(&id)
    }

    pub fn members(&self) -> Vec<MatchId> {
        self.state().members.iter().copied().collect()
    }

    /// Replace the local set with the server's playlist.
    pub async fn load(&self) -> Result<usize, SyncError> {
        let matches = self.api.list().await?;
        let mut state = self.state();
        state.members = matches.iter().map(|m| m.id).collect();
        info!(count = state.members.len(), "playlist membership loaded");
        Ok(state.members.len())
    }

    pub async fn add(&self, id: MatchId) -> Result<(), SyncError> {
        self.apply(id, Change::Add).await
    }

    pub async fn remove(&self, id: MatchId) -> Result<(), SyncError> {
        self.apply(id, Change::Remove).await
    }

    /// Add when absent, remove when present. Returns the new membership.
    pub async fn toggle(&self, id: MatchId) -> Result<bool, SyncError> {
        if self.contains(id) {
            self.remove(id).await?;
            Ok(false)
        } else {
            self.add(id).await?;
            Ok(true)
        }
    }

    fn begin(&self, id: MatchId) -> Result<PendingGuard<'_>, SyncError> {
        let mut state = self.state();
        if !state.pending.insert(id) {
            return Err(SyncError::Busy(id));
        }
        Ok(PendingGuard {
            state: &self.state,
            id,
        })
    }

    async fn apply(&self, id: MatchId, change: Change) -> Result<(), SyncError> {
        let _pending = self.begin(id)?;
        let result = match change {
            Change::Add => self.api.add(id).await,
            Change::Remove => self.api.remove(id).await,
        };

        match result {
            Ok(()) => {
                let mut state = self.state();
                match change {
                    Change::Add => state.members.insert(id),
                    Change::Remove => state.members.remove(&id),
                };
                info!(match_id = id, ?change, "playlist updated");
                Ok(())
            }
            Err(err) => {
                warn!(match_id = id, ?change, error = %err, "playlist change failed");
                Err(err)
            }
        }
    }
}

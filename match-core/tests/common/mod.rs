#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use match_core::{
    FilterCategory, MatchId, MatchRecord, MatchStatus, PlaylistApi, PushConnection,
    PushTransport, SnapshotFetcher, SyncError,
};
use serde_json::{json, Value};
use tokio::sync::Notify;
use url::Url;

pub fn record(id: MatchId, title: &str, is_live: bool) -> MatchRecord {
    MatchRecord {
        id,
        title: title.to_string(),
        competition: "League".to_string(),
        description: None,
        teams: None,
        date: None,
        start_time: None,
        end_time: None,
        status: MatchStatus::from_live(is_live),
        is_live,
        thumbnail_url: None,
        stream_url: None,
        video_url: None,
    }
}

pub fn hub_url() -> Url {
    Url::parse("http://hub.test/hubs/notifications").unwrap()
}

pub fn invocation(target: &str, arguments: Value) -> String {
    json!({ "type": 1, "target": target, "arguments": arguments }).to_string()
}

pub fn notification_record(title: &str, message: &str) -> String {
    invocation(
        "ReceiveNotification",
        json!([{ "title": title, "message": message, "status": "Live" }]),
    )
}

/// Scripted fetcher: records every call, can fail on demand and can hold a
/// filter's fetch until released.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    inner: Arc<FetcherState>,
}

#[derive(Default)]
struct FetcherState {
    calls: Mutex<Vec<FilterCategory>>,
    failing: AtomicBool,
    gates: Mutex<HashMap<FilterCategory, Arc<Notify>>>,
}

impl FakeFetcher {
    pub fn calls(&self) -> Vec<FilterCategory> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn hold(&self, filter: FilterCategory) {
        self.inner
            .gates
            .lock()
            .unwrap()
            .insert(filter, Arc::new(Notify::new()));
    }

    pub fn release(&self, filter: FilterCategory) {
        if let Some(gate) = self.inner.gates.lock().unwrap().remove(&filter) {
            gate.notify_one();
        }
    }
}

impl SnapshotFetcher for FakeFetcher {
    async fn fetch(&self, filter: FilterCategory) -> Result<Vec<MatchRecord>, SyncError> {
        let call = {
            let mut calls = self.inner.calls.lock().unwrap();
            calls.push(filter);
            calls.len() as MatchId
        };
        let gate = self.inner.gates.lock().unwrap().get(&filter).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Status {
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(vec![record(call, filter.as_str(), filter == FilterCategory::Live)])
    }
}

pub enum Script {
    /// Connection attempt is refused.
    Fail,
    /// Connects, yields the records, then the server drops the stream.
    Close(Vec<String>),
    /// Connects, yields the records, then stays open.
    Hold(Vec<String>),
}

#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<TransportState>,
}

#[derive(Default)]
struct TransportState {
    scripts: Mutex<VecDeque<Script>>,
    attempts: AtomicUsize,
    tokens: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        let transport = Self::default();
        transport.inner.scripts.lock().unwrap().extend(scripts);
        transport
    }

    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.inner.tokens.lock().unwrap().clone()
    }
}

impl PushTransport for ScriptedTransport {
    type Connection = ScriptedConnection;

    async fn connect(&self, _url: &Url, token: &str) -> Result<ScriptedConnection, SyncError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.tokens.lock().unwrap().push(token.to_string());
        let next = self.inner.scripts.lock().unwrap().pop_front();
        match next {
            Some(Script::Fail) => Err(SyncError::Channel("connection refused".into())),
            Some(Script::Close(records)) => Ok(ScriptedConnection {
                records: records.into(),
                hold: false,
            }),
            Some(Script::Hold(records)) => Ok(ScriptedConnection {
                records: records.into(),
                hold: true,
            }),
            // Out of script: the server never answers.
            None => std::future::pending().await,
        }
    }
}

pub struct ScriptedConnection {
    records: VecDeque<String>,
    hold: bool,
}

impl PushConnection for ScriptedConnection {
    async fn next_record(&mut self) -> Option<Result<String, SyncError>> {
        if let Some(record) = self.records.pop_front() {
            return Some(Ok(record));
        }
        if self.hold {
            std::future::pending::<()>().await;
        }
        None
    }
}

#[derive(Clone, Default)]
pub struct FakePlaylistApi {
    inner: Arc<PlaylistState>,
}

#[derive(Default)]
struct PlaylistState {
    gate: Mutex<Option<Arc<Notify>>>,
    conflict: AtomicBool,
    calls: AtomicUsize,
    server: Mutex<Vec<MatchRecord>>,
}

impl FakePlaylistApi {
    pub fn with_server_list(records: Vec<MatchRecord>) -> Self {
        let api = Self::default();
        *api.inner.server.lock().unwrap() = records;
        api
    }

    pub fn hold(&self) {
        *self.inner.gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release(&self) {
        if let Some(gate) = self.inner.gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    pub fn set_conflict(&self, conflict: bool) {
        self.inner.conflict.store(conflict, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    async fn mutate(&self, id: MatchId) -> Result<(), SyncError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.inner.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.inner.conflict.load(Ordering::SeqCst) {
            return Err(SyncError::Conflict {
                match_id: id,
                message: "rejected".into(),
            });
        }
        Ok(())
    }
}

impl PlaylistApi for FakePlaylistApi {
    async fn add(&self, id: MatchId) -> Result<(), SyncError> {
        self.mutate(id).await
    }

    async fn remove(&self, id: MatchId) -> Result<(), SyncError> {
        self.mutate(id).await
    }

    async fn list(&self) -> Result<Vec<MatchRecord>, SyncError> {
        Ok(self.inner.server.lock().unwrap().clone())
    }
}

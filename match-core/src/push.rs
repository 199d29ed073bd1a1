use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::SharedTokenProvider;
use crate::config::PushConfig;
use crate::error::SyncError;
use crate::event::{parse_frame, Frame, PushEvent};

const EVENT_BUFFER: usize = 256;

/// Opens duplex connections to the push hub. Any transport that can hand
/// back a stream of text records will do.
pub trait PushTransport: Send + Sync + 'static {
    type Connection: PushConnection;

    fn connect(
        &self,
        url: &Url,
        token: &str,
    ) -> impl Future<Output = Result<Self::Connection, SyncError>> + Send;
}

pub trait PushConnection: Send + 'static {
    /// Next record from the server, or `None` once the connection is gone.
    fn next_record(&mut self) -> impl Future<Output = Option<Result<String, SyncError>>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Exponential backoff between reconnection attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&PushConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &PushConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before the `attempt`-th retry (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

#[derive(Default)]
struct Session {
    // Bumped on every connect/disconnect; tasks from an older session go quiet.
    generation: u64,
    connections: u64,
    last_error: Option<String>,
}

struct ChannelShared {
    events: broadcast::Sender<PushEvent>,
    state: watch::Sender<ChannelState>,
    session: Mutex<Session>,
}

impl ChannelShared {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, generation: u64, state: ChannelState) -> bool {
        let session = self.session();
        if session.generation != generation {
            return false;
        }
        self.state.send_replace(state);
        true
    }

    fn emit(&self, generation: u64, event: PushEvent) {
        let session = self.session();
        if session.generation != generation {
            return;
        }
        // No subscribers is fine; the event simply has no audience.
        let _ = self.events.send(event);
    }

    fn connected(&self, generation: u64) -> bool {
        let mut session = self.session();
        if session.generation != generation {
            return false;
        }
        session.connections += 1;
        session.last_error = None;
        self.state.send_replace(ChannelState::Connected);
        true
    }

    fn record_error(&self, generation: u64, err: &SyncError) {
        let mut session = self.session();
        if session.generation == generation {
            session.last_error = Some(err.to_string());
        }
    }
}

/// Long-lived connection to the push hub with automatic reconnection.
///
/// Each successful connection gets exactly one reader, which parses records
/// into [`PushEvent`]s and broadcasts them in arrival order. Events are not
/// de-duplicated; a replay across a reconnect reaches subscribers twice.
pub struct PushChannel<T: PushTransport> {
    transport: Arc<T>,
    hub_url: Url,
    policy: ReconnectPolicy,
    shared: Arc<ChannelShared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl<T: PushTransport> PushChannel<T> {
    pub fn new(transport: T, hub_url: Url, policy: ReconnectPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            transport: Arc::new(transport),
            hub_url,
            policy,
            shared: Arc::new(ChannelShared {
                events,
                state: watch::channel(ChannelState::Disconnected).0,
                session: Mutex::new(Session::default()),
            }),
            supervisor: Mutex::new(None),
        }
    }

    fn supervisor(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.supervisor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start connecting in the background. The caller never needs to call
    /// this again after a drop; reconnection is automatic. A no-op while a
    /// connection is already being maintained.
    pub fn connect(&self, tokens: SharedTokenProvider) -> Result<(), SyncError> {
        let mut supervisor = self.supervisor();
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("push channel already running");
            return Ok(());
        }
        if tokens.token().is_none() {
            return Err(SyncError::MissingToken);
        }

        let generation = {
            let mut session = self.shared.session();
            session.generation += 1;
            session.last_error = None;
            self.shared.state.send_replace(ChannelState::Connecting);
            session.generation
        };
        info!(url = %self.hub_url, "connecting push channel");

        *supervisor = Some(tokio::spawn(supervise(
            Arc::clone(&self.transport),
            self.hub_url.clone(),
            tokens,
            self.policy.clone(),
            Arc::clone(&self.shared),
            generation,
        )));
        Ok(())
    }

    /// Tear down the connection and any pending retry. Idempotent.
    pub fn disconnect(&self) {
        let task = self.supervisor().take();
        {
            let mut session = self.shared.session();
            session.generation += 1;
            self.shared.state.send_replace(ChannelState::Disconnected);
        }
        if let Some(task) = task {
            task.abort();
            info!("push channel disconnected");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Number of successful connections so far; each got one reader.
    pub fn connection_count(&self) -> u64 {
        self.shared.session().connections
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.session().last_error.clone()
    }

    pub fn hub_url(&self) -> &Url {
        &self.hub_url
    }
}

impl<T: PushTransport> Drop for PushChannel<T> {
    fn drop(&mut self) {
        if let Some(task) = self.supervisor().take() {
            task.abort();
        }
    }
}

async fn supervise<T: PushTransport>(
    transport: Arc<T>,
    url: Url,
    tokens: SharedTokenProvider,
    policy: ReconnectPolicy,
    shared: Arc<ChannelShared>,
    generation: u64,
) {
    let mut attempt: u32 = 0;

    loop {
        let opened = match tokens.token() {
            Some(token) => transport.connect(&url, &token).await,
            None => Err(SyncError::MissingToken),
        };

        match opened {
            Ok(mut connection) => {
                attempt = 0;
                if !shared.connected(generation) {
                    return;
                }
                info!(url = %url, "push channel connected");
                let reason = read_until_lost(&mut connection, &shared, generation).await;
                warn!(reason = %reason, "push channel lost");
                shared.record_error(generation, &SyncError::Channel(reason));
            }
            Err(err) => {
                warn!(error = %err, attempt, "push channel connection failed");
                shared.record_error(generation, &err);
            }
        }

        attempt += 1;
        if policy.exhausted(attempt) {
            let err = SyncError::RetriesExhausted { attempts: attempt - 1 };
            error!(error = %err, "giving up on push channel");
            shared.record_error(generation, &err);
            shared.set_state(generation, ChannelState::Disconnected);
            return;
        }
        if !shared.set_state(generation, ChannelState::Reconnecting) {
            return;
        }
        tokio::time::sleep(policy.delay_for(attempt)).await;
    }
}

/// The single reader for one connection. Returns why the connection ended.
async fn read_until_lost<C: PushConnection>(
    connection: &mut C,
    shared: &ChannelShared,
    generation: u64,
) -> String {
    loop {
        let record = match connection.next_record().await {
            Some(Ok(record)) => record,
            Some(Err(err)) => return err.to_string(),
            None => return "stream closed by server".to_string(),
        };
        match parse_frame(&record) {
            Ok(Frame::Event(event)) => shared.emit(generation, event),
            Ok(Frame::Ignored) => {}
            Ok(Frame::Close(reason)) => {
                return reason.unwrap_or_else(|| "server sent close".to_string());
            }
            Err(err) => warn!(error = %err, "dropping malformed push frame"),
        }
    }
}

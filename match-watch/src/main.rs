use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use match_core::{
    patch_held, ChannelState, ClientConfig, FilterCategory, MatchRecord, MatchSync, NoToken,
    PushEvent, SharedTokenProvider, StaticToken, TokenProvider,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "match-watch", about = "Follow matches and live notifications from the terminal")]
struct Cli {
    /// Match subset to poll: all, live or replay.
    #[arg(long, default_value = "all")]
    filter: FilterCategory,

    /// Override the API root from the config file.
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token for the push hub and playlist calls.
    #[arg(long, env = "MATCHWATCH_TOKEN")]
    token: Option<String>,

    /// Poll only; don't open the push channel.
    #[arg(long)]
    no_push: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let mut config = ClientConfig::load();
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }

    let tokens: SharedTokenProvider = match cli.token {
        Some(token) => Arc::new(StaticToken(token)),
        None => Arc::new(NoToken),
    };

    let client = match reqwest_client() {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to build HTTP client");
            return;
        }
    };

    let sync = match MatchSync::from_config(&config, client, tokens.clone()) {
        Ok(sync) => sync,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return;
        }
    };

    if let Err(e) = sync.scheduler().start(cli.filter).await {
        warn!(error = %e, "initial load failed, will keep polling");
    }

    if !cli.no_push {
        if tokens.token().is_none() {
            warn!("no token given, push notifications disabled");
        } else if let Err(e) = sync.connect_push() {
            warn!(error = %e, "push channel unavailable");
        }
    }

    if let Err(e) = sync.playlist().load().await {
        warn!(error = %e, "could not load playlist");
    }

    run(&sync, cli.filter).await;
    sync.shutdown();
}

async fn run(sync: &MatchSync, filter: FilterCategory) {
    let mut snapshots = sync.scheduler().subscribe(filter);
    let mut toasts = sync.toast_presenter().subscribe();
    let mut channel = sync.push().watch_state();
    let mut events = sync.push().subscribe();
    let mut events_open = true;

    // The view's own copy, patched by pushed status changes between polls.
    let mut held: Vec<MatchRecord> = snapshots.current().to_vec();
    info!(filter = %filter, matches = held.len(), "watching");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            Some(snapshot) = snapshots.changed() => {
                held = snapshot.to_vec();
                info!(
                    filter = %filter,
                    matches = held.len(),
                    live = live_count(&held),
                    updated = ?sync.scheduler().last_updated(),
                    "snapshot refreshed"
                );
            }
            event = events.recv(), if events_open => match event {
                Ok(event @ PushEvent::MatchStatusChanged(_)) => {
                    if patch_held(&mut held, &event) {
                        info!(live = live_count(&held), "match status changed");
                    }
                }
                Ok(PushEvent::GenericNotification(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "status updates dropped, next poll catches up");
                }
                Err(RecvError::Closed) => events_open = false,
            },
            Ok(()) = toasts.changed() => {
                let toast = toasts.borrow_and_update().clone();
                if let Some(toast) = toast.filter(|t| t.visible) {
                    info!(
                        title = %toast.notification.title,
                        message = %toast.notification.message,
                        unread = sync.unread_count(),
                        "notification"
                    );
                }
            }
            Ok(()) = channel.changed() => {
                let state = *channel.borrow_and_update();
                match state {
                    ChannelState::Connected => info!("push channel connected"),
                    ChannelState::Reconnecting => warn!("push channel reconnecting"),
                    ChannelState::Disconnected => {
                        if let Some(reason) = sync.push().last_error() {
                            warn!(reason = %reason, "push channel disconnected");
                        }
                    }
                    ChannelState::Connecting => {}
                }
            }
        }
    }
}

fn live_count(records: &[MatchRecord]) -> usize {
    records.iter().filter(|m| m.is_live).count()
}

fn reqwest_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .user_agent("match-watch/0.1")
        .connect_timeout(Duration::from_secs(10))
        .build()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

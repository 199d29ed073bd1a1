//! Client side of the hub connection sequence: negotiate over HTTP, open a
//! websocket with the negotiated connection token, then exchange the JSON
//! protocol handshake. Records after that go to the push channel's reader.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::config::PushConfig;
use crate::error::SyncError;
use crate::event::{handshake_record, parse_handshake_reply, ping_record, FrameDecoder};
use crate::fetcher::check_response;
use crate::push::{PushConnection, PushTransport};

const WEBSOCKETS: &str = "WebSockets";
const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateReply {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    connection_token: Option<String>,
    #[serde(default)]
    available_transports: Vec<AvailableTransport>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvailableTransport {
    transport: String,
}

/// Outcome of negotiation: where to connect and with what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub hub: Url,
    pub connection_token: String,
    pub access_token: String,
}

/// `{hub}/negotiate?negotiateVersion=1`
pub fn negotiate_url(hub: &Url) -> Result<Url, SyncError> {
    let mut url = hub.clone();
    url.path_segments_mut()
        .map_err(|_| SyncError::Channel(format!("hub url {hub} cannot carry a path")))?
        .pop_if_empty()
        .push("negotiate");
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    Ok(url)
}

/// Websocket address for a negotiated connection. The token also travels as
/// `access_token` for servers that only read it from the query.
pub fn websocket_url(negotiated: &Negotiated) -> Result<Url, SyncError> {
    let hub = &negotiated.hub;
    let scheme = match hub.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    };
    let mut url = hub.clone();
    url.set_scheme(scheme)
        .map_err(|_| SyncError::Channel(format!("unsupported hub scheme {}", hub.scheme())))?;
    url.query_pairs_mut()
        .append_pair("id", &negotiated.connection_token)
        .append_pair("access_token", &negotiated.access_token);
    Ok(url)
}

/// Connects to the hub over websockets.
#[derive(Clone)]
pub struct HubTransport {
    client: Client,
    keep_alive: Duration,
    handshake_timeout: Duration,
}

impl HubTransport {
    pub fn new(client: Client) -> Self {
        Self::from_config(client, &PushConfig::default())
    }

    pub fn from_config(client: Client, config: &PushConfig) -> Self {
        Self {
            client,
            keep_alive: config.keep_alive(),
            handshake_timeout: config.handshake_timeout(),
        }
    }

    /// Ask the hub for a connection token, following redirects to another
    /// hub (which may hand out its own access token).
    pub async fn negotiate(&self, hub: &Url, token: &str) -> Result<Negotiated, SyncError> {
        let mut hub = hub.clone();
        let mut access_token = token.to_string();

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .post(negotiate_url(&hub)?)
                .bearer_auth(&access_token)
                .send()
                .await?;
            let reply: NegotiateReply = check_response(response).await?.json().await?;

            if let Some(error) = reply.error {
                return Err(SyncError::Channel(format!("hub negotiation failed: {error}")));
            }
            if let Some(redirect) = reply.url {
                debug!(url = %redirect, "hub negotiation redirected");
                hub = Url::parse(&redirect)?;
                if let Some(redirect_token) = reply.access_token {
                    access_token = redirect_token;
                }
                continue;
            }

            let offers_websockets = reply.available_transports.is_empty()
                || reply
                    .available_transports
                    .iter()
                    .any(|t| t.transport == WEBSOCKETS);
            if !offers_websockets {
                return Err(SyncError::Channel("hub does not offer websockets".into()));
            }
            let connection_token = reply
                .connection_token
                .or(reply.connection_id)
                .ok_or_else(|| SyncError::Channel("negotiation returned no connection id".into()))?;

            return Ok(Negotiated {
                hub,
                connection_token,
                access_token,
            });
        }

        Err(SyncError::Channel(format!(
            "hub negotiation redirected more than {MAX_REDIRECTS} times"
        )))
    }
}

impl PushTransport for HubTransport {
    type Connection = HubConnection;

    async fn connect(&self, url: &Url, token: &str) -> Result<HubConnection, SyncError> {
        let negotiated = self.negotiate(url, token).await?;

        let mut request = websocket_url(&negotiated)?.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", negotiated.access_token))
            .map_err(|_| SyncError::Channel("access token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _) = tokio_tungstenite::connect_async(request).await?;
        let mut connection = HubConnection {
            socket,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            keep_alive: keep_alive_timer(self.keep_alive),
        };

        tokio::time::timeout(self.handshake_timeout, connection.handshake())
            .await
            .map_err(|_| SyncError::Channel("hub handshake timed out".into()))??;
        info!(url = %negotiated.hub, "hub handshake complete");
        Ok(connection)
    }
}

fn keep_alive_timer(period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct HubConnection {
    socket: Socket,
    decoder: FrameDecoder,
    pending: VecDeque<String>,
    keep_alive: Interval,
}

impl HubConnection {
    async fn handshake(&mut self) -> Result<(), SyncError> {
        self.socket.send(Message::Text(handshake_record())).await?;
        let reply = loop {
            if let Some(record) = self.pending.pop_front() {
                break record;
            }
            match self.socket.next().await {
                Some(message) => self.absorb(message?)?,
                None => {
                    return Err(SyncError::Channel("hub closed the socket during handshake".into()))
                }
            }
        };
        parse_handshake_reply(&reply)
    }

    fn absorb(&mut self, message: Message) -> Result<(), SyncError> {
        let records = match message {
            Message::Text(text) => self.decoder.push(text.as_bytes())?,
            Message::Binary(bytes) => self.decoder.push(&bytes)?,
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "no reason given".to_string());
                return Err(SyncError::Channel(format!("hub closed the socket: {reason}")));
            }
            // tungstenite answers pings on its own.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return Ok(()),
        };
        self.pending.extend(records);
        Ok(())
    }
}

impl PushConnection for HubConnection {
    async fn next_record(&mut self) -> Option<Result<String, SyncError>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            tokio::select! {
                message = self.socket.next() => {
                    let message = match message? {
                        Ok(message) => message,
                        Err(err) => return Some(Err(err.into())),
                    };
                    if let Err(err) = self.absorb(message) {
                        return Some(Err(err));
                    }
                }
                _ = self.keep_alive.tick() => {
                    debug!("sending hub keep-alive");
                    if let Err(err) = self.socket.send(Message::Text(ping_record())).await {
                        return Some(Err(err.into()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiated(hub: &str) -> Negotiated {
        Negotiated {
            hub: Url::parse(hub).unwrap(),
            connection_token: "conn-1".into(),
            access_token: "tok".into(),
        }
    }

    #[test]
    fn negotiate_url_appends_segment_and_version() {
        let hub = Url::parse("https://example.com/hubs/notifications").unwrap();
        assert_eq!(
            negotiate_url(&hub).unwrap().as_str(),
            "https://example.com/hubs/notifications/negotiate?negotiateVersion=1"
        );
    }

    #[test]
    fn websocket_url_switches_scheme_and_carries_ids() {
        assert_eq!(
            websocket_url(&negotiated("https://example.com/hubs/notifications")).unwrap().as_str(),
            "wss://example.com/hubs/notifications?id=conn-1&access_token=tok"
        );
        assert_eq!(
            websocket_url(&negotiated("http://localhost:5000/hubs/notifications"))
                .unwrap()
                .as_str(),
            "ws://localhost:5000/hubs/notifications?id=conn-1&access_token=tok"
        );
    }
}

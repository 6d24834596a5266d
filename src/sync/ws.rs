use std::fmt::{self, Display};
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use hassdash_api::entity::EntityState;

use crate::error::{ApiError, ApiResult};

#[derive(Clone, Copy, Debug, Default, Serialize, Eq, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closed,
    Errored,
    ReconnectScheduled {
        attempt: u32,
    },
    /// Gave up. Only an explicit connect starts over.
    ReconnectExhausted,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
            Self::Errored => f.write_str("errored"),
            Self::ReconnectScheduled { attempt } => write!(f, "reconnect scheduled ({attempt})"),
            Self::ReconnectExhausted => f.write_str("reconnect exhausted"),
        }
    }
}

/// Fixed-delay reconnects, bounded by a maximum attempt count. The count is
/// reset by every successful open. A handshake that takes longer than the
/// connect timeout counts as a failed attempt.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    delay: Duration,
    max_attempts: u32,
    attempts: u32,
    connect_timeout: Duration,
}

impl ReconnectPolicy {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    #[must_use]
    pub const fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            attempts: 0,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub const fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Delay before the next attempt, or `None` once attempts are used up.
    pub const fn on_close(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELAY, Self::DEFAULT_MAX_ATTEMPTS)
    }
}

/// Decode one push message. Anything that is not a JSON object with a
/// non-empty string `entity_id` is noise and yields `None`.
#[must_use]
pub fn parse_live_message(text: &str) -> Option<EntityState> {
    if text.trim().is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let entity_id = value.get("entity_id")?.as_str()?;
    if entity_id.trim().is_empty() {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// One connected live-entities socket. The stream is inbound only.
pub struct LiveSocket {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl LiveSocket {
    /// Open the socket. The tcp connect and the upgrade handshake together
    /// must finish within `timeout`.
    pub async fn connect(url: &Url, timeout: Duration) -> ApiResult<Self> {
        let (socket, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ApiError::Timeout(timeout))??;
        Ok(Self { socket })
    }

    /// Next accepted entity update. `Ok(None)` means the peer closed.
    pub async fn next_update(&mut self) -> ApiResult<Option<EntityState>> {
        while let Some(msg) = self.socket.next().await {
            match msg? {
                Message::Text(text) => {
                    if let Some(state) = parse_live_message(text.as_str()) {
                        return Ok(Some(state));
                    }
                    log::trace!("[ws] Ignoring message: {}", text.as_str());
                }
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }
}

async fn session(
    url: &Url,
    state: &watch::Sender<ConnectionState>,
    policy: &mut ReconnectPolicy,
    on_update: &mut (impl FnMut(EntityState) + Send),
) -> ApiResult<()> {
    let mut socket = LiveSocket::connect(url, policy.connect_timeout()).await?;
    policy.on_open();
    state.send_replace(ConnectionState::Open);
    log::info!("[ws] Connected to {url}");

    while let Some(update) = socket.next_update().await? {
        on_update(update);
    }
    Ok(())
}

/// Keep a live socket to `url` open until `cancel` fires or reconnects are
/// exhausted. Every accepted update goes to `on_update`.
///
/// Returns the number of connection attempts made.
pub async fn run(
    url: Url,
    mut policy: ReconnectPolicy,
    state: &watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    mut on_update: impl FnMut(EntityState) + Send,
) -> u32 {
    let mut connects = 0;

    loop {
        connects += 1;
        state.send_replace(ConnectionState::Connecting);

        let res = tokio::select! {
            () = cancel.cancelled() => break,
            res = session(&url, state, &mut policy, &mut on_update) => res,
        };

        match res {
            Ok(()) => {
                log::info!("[ws] Connection to {url} closed");
                state.send_replace(ConnectionState::Closed);
            }
            Err(err) => {
                log::warn!("[ws] Connection to {url} failed: {err}");
                state.send_replace(ConnectionState::Errored);
            }
        }

        let Some(delay) = policy.on_close() else {
            log::error!(
                "[ws] Giving up on {url} after {} reconnect attempts",
                policy.attempts()
            );
            state.send_replace(ConnectionState::ReconnectExhausted);
            return connects;
        };

        state.send_replace(ConnectionState::ReconnectScheduled {
            attempt: policy.attempts(),
        });
        log::debug!(
            "[ws] Reconnect attempt {} in {}s",
            policy.attempts(),
            delay.as_secs_f32()
        );

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    state.send_replace(ConnectionState::Disconnected);
    connects
}

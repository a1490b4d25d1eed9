//! Lifecycle of the event channel: connect, identity announcement, bounded
//! reconnection and teardown.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::{
    domain::UserId,
    protocol::{ClientRequest, ServerEvent},
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// Who the channel is opened for. Supplied by the session provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: UserId,
    pub token: String,
}

/// One live connection. The connection is over once `inbound` closes.
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<ClientRequest>,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn connect(&self, identity: &SessionIdentity) -> anyhow::Result<Connection>;
}

/// Channel state changes and inbound events, as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Connected,
    Disconnected,
    Event(ServerEvent),
    /// The reconnect budget is spent; the channel stays closed.
    GaveUp,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

pub struct ChannelManager {
    outbound: mpsc::UnboundedSender<ClientRequest>,
    task: JoinHandle<()>,
}

impl ChannelManager {
    /// Starts the supervisor task. Without a user id no channel is opened.
    pub fn connect(
        transport: Arc<dyn ChannelTransport>,
        identity: SessionIdentity,
        policy: ReconnectPolicy,
        signals: mpsc::Sender<ChannelSignal>,
    ) -> SyncResult<Self> {
        if identity.user_id.as_str().is_empty() {
            return Err(SyncError::MissingIdentity);
        }
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(supervise(transport, identity, policy, outbound_rx, signals));
        Ok(Self { outbound, task })
    }

    /// Hands a request to the supervisor. Requests issued while the
    /// connection is down are dropped there, not queued.
    pub fn send(&self, request: ClientRequest) -> SyncResult<()> {
        self.outbound
            .send(request)
            .map_err(|_| SyncError::NotConnected)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn disconnect(self) {
        self.task.abort();
        info!("channel disconnected");
    }
}

async fn supervise(
    transport: Arc<dyn ChannelTransport>,
    identity: SessionIdentity,
    policy: ReconnectPolicy,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientRequest>,
    signals: mpsc::Sender<ChannelSignal>,
) {
    let mut failures = 0u32;
    loop {
        match transport.connect(&identity).await {
            Ok(connection) => {
                failures = 0;
                info!(user_id = %identity.user_id, "channel connected");
                match pump(&identity, connection, &mut outbound_rx, &signals).await {
                    PumpExit::Dropped => {
                        warn!(user_id = %identity.user_id, "channel dropped");
                        if signals.send(ChannelSignal::Disconnected).await.is_err() {
                            return;
                        }
                    }
                    PumpExit::Shutdown => return,
                }
            }
            Err(err) => {
                failures += 1;
                warn!(attempt = failures, error = %err, "channel connect failed");
                if failures >= policy.max_attempts {
                    info!(attempts = failures, "giving up on channel");
                    let _ = signals.send(ChannelSignal::GaveUp).await;
                    return;
                }
            }
        }

        if !wait_dropping(policy.delay, &mut outbound_rx).await {
            return;
        }
        debug!(attempt = failures + 1, "reconnecting");
    }
}

enum PumpExit {
    Dropped,
    Shutdown,
}

async fn pump(
    identity: &SessionIdentity,
    mut connection: Connection,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientRequest>,
    signals: &mpsc::Sender<ChannelSignal>,
) -> PumpExit {
    // server-side room membership does not survive a reconnect
    if connection
        .outbound
        .send(ClientRequest::JoinRoom(identity.user_id.clone()))
        .is_err()
    {
        return PumpExit::Dropped;
    }
    info!(user_id = %identity.user_id, "identity announced");
    if signals.send(ChannelSignal::Connected).await.is_err() {
        return PumpExit::Shutdown;
    }

    loop {
        tokio::select! {
            request = outbound_rx.recv() => {
                let Some(request) = request else {
                    return PumpExit::Shutdown;
                };
                debug!(event = request.name(), "outbound");
                if connection.outbound.send(request).is_err() {
                    return PumpExit::Dropped;
                }
            }
            event = connection.inbound.recv() => {
                let Some(event) = event else {
                    return PumpExit::Dropped;
                };
                if signals.send(ChannelSignal::Event(event)).await.is_err() {
                    return PumpExit::Shutdown;
                }
            }
        }
    }
}

/// Sleeps out the reconnect delay, discarding anything sent meanwhile.
/// Returns `false` once the manager is gone.
async fn wait_dropping(
    delay: Duration,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientRequest>,
) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => return true,
            request = outbound_rx.recv() => match request {
                Some(request) => warn!(event = request.name(), "dropping request while disconnected"),
                None => return false,
            },
        }
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;

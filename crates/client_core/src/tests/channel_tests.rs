use super::*;

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::anyhow;
use shared::protocol::Recipient;
use tokio::time::timeout;

struct ServerSide {
    from_client: mpsc::UnboundedReceiver<ClientRequest>,
    to_client: mpsc::UnboundedSender<ServerEvent>,
}

struct ScriptedTransport {
    attempts: AtomicU32,
    refuse_first: u32,
    servers: mpsc::UnboundedSender<ServerSide>,
}

#[async_trait]
impl ChannelTransport for ScriptedTransport {
    async fn connect(&self, _identity: &SessionIdentity) -> anyhow::Result<Connection> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.refuse_first {
            return Err(anyhow!("connection refused"));
        }
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        self.servers
            .send(ServerSide {
                from_client,
                to_client,
            })
            .map_err(|_| anyhow!("test harness gone"))?;
        Ok(Connection { outbound, inbound })
    }
}

fn identity(user: &str) -> SessionIdentity {
    SessionIdentity {
        user_id: UserId::from(user),
        token: "token".into(),
    }
}

fn policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        delay: Duration::from_millis(10),
    }
}

fn transport(refuse_first: u32) -> (Arc<ScriptedTransport>, mpsc::UnboundedReceiver<ServerSide>) {
    let (servers, servers_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(ScriptedTransport {
        attempts: AtomicU32::new(0),
        refuse_first,
        servers,
    });
    (transport, servers_rx)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

async fn next_signal(rx: &mut mpsc::Receiver<ChannelSignal>) -> ChannelSignal {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("signals closed")
}

#[tokio::test]
async fn empty_identity_never_opens_a_channel() {
    let (transport, _servers) = transport(0);
    let (signals, _signals_rx) = mpsc::channel(8);
    let result = ChannelManager::connect(transport.clone(), identity(""), policy(5), signals);
    assert!(matches!(result, Err(SyncError::MissingIdentity)));
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn identity_is_announced_on_every_connect() {
    let (transport, mut servers) = transport(0);
    let (signals, mut signals_rx) = mpsc::channel(8);
    let manager = ChannelManager::connect(transport, identity("alice"), policy(5), signals).unwrap();

    let mut first = next(&mut servers).await;
    assert_eq!(
        next(&mut first.from_client).await,
        ClientRequest::JoinRoom(UserId::from("alice"))
    );
    assert_eq!(next_signal(&mut signals_rx).await, ChannelSignal::Connected);

    drop(first);
    assert_eq!(next_signal(&mut signals_rx).await, ChannelSignal::Disconnected);

    let mut second = next(&mut servers).await;
    assert_eq!(
        next(&mut second.from_client).await,
        ClientRequest::JoinRoom(UserId::from("alice"))
    );
    assert_eq!(next_signal(&mut signals_rx).await, ChannelSignal::Connected);

    manager.disconnect();
}

#[tokio::test]
async fn requests_and_events_flow_through_live_connection() {
    let (transport, mut servers) = transport(0);
    let (signals, mut signals_rx) = mpsc::channel(8);
    let manager = ChannelManager::connect(transport, identity("alice"), policy(5), signals).unwrap();

    let mut server = next(&mut servers).await;
    let _join = next(&mut server.from_client).await;
    assert_eq!(next_signal(&mut signals_rx).await, ChannelSignal::Connected);

    let request = ClientRequest::StopTyping {
        recipient: Recipient::user(UserId::from("bob")),
    };
    manager.send(request.clone()).unwrap();
    assert_eq!(next(&mut server.from_client).await, request);

    let event = ServerEvent::UserTyping {
        from: UserId::from("bob"),
        is_typing: true,
    };
    server.to_client.send(event.clone()).unwrap();
    assert_eq!(next_signal(&mut signals_rx).await, ChannelSignal::Event(event));

    manager.disconnect();
}

#[tokio::test]
async fn retries_are_bounded() {
    let (transport, _servers) = transport(u32::MAX);
    let (signals, mut signals_rx) = mpsc::channel(8);
    let mut manager =
        ChannelManager::connect(transport.clone(), identity("alice"), policy(3), signals).unwrap();

    assert_eq!(next_signal(&mut signals_rx).await, ChannelSignal::GaveUp);
    (&mut manager.task).await.unwrap();

    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    assert!(!manager.is_running());
    assert!(matches!(
        manager.send(ClientRequest::JoinRoom(UserId::from("alice"))),
        Err(SyncError::NotConnected)
    ));
}

#[tokio::test]
async fn failed_attempts_reset_after_a_successful_connect() {
    let (transport, mut servers) = transport(2);
    let (signals, mut signals_rx) = mpsc::channel(8);
    let manager =
        ChannelManager::connect(transport.clone(), identity("alice"), policy(3), signals).unwrap();

    let mut server = next(&mut servers).await;
    let _join = next(&mut server.from_client).await;
    assert_eq!(next_signal(&mut signals_rx).await, ChannelSignal::Connected);
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);

    manager.disconnect();
}

use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{ConversationId, MessageId, MessageKind, UserId};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::info;

pub mod annotations;
pub mod api;
pub mod channel;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod membership;
pub mod messages;
pub mod presence;
pub mod session;
pub mod transport;

pub use api::{ConversationApi, HttpConversationApi};
pub use channel::{ChannelTransport, Connection, SessionIdentity};
pub use config::{load_settings, ClientSettings};
pub use error::{Notice, NoticeKind, SyncError, SyncResult};
pub use session::SessionState;
pub use transport::WebSocketTransport;

use channel::{ChannelManager, ReconnectPolicy};
use dispatcher::{Engine, EngineCommand, LocalAction};
use presence::TypingDebouncer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    /// Reconnection stopped after the configured number of attempts.
    GaveUp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Session state changed; take a new snapshot.
    StateChanged,
    Connection(ConnectionState),
    Notice(Notice),
    Error(String),
}

#[async_trait]
pub trait ClientHandle: Send + Sync {
    async fn load_directory(&self) -> SyncResult<usize>;
    async fn select_conversation(&self, conversation_id: ConversationId) -> SyncResult<()>;
    async fn send_message(
        &self,
        content: &str,
        kind: MessageKind,
        reply_to: Option<MessageId>,
    ) -> SyncResult<MessageId>;
    async fn notify_typing(&self) -> SyncResult<()>;
    async fn react(&self, message_id: MessageId, reaction: &str) -> SyncResult<()>;
    async fn remove_reaction(&self, message_id: MessageId) -> SyncResult<()>;
    async fn create_group(&self, name: &str, participants: Vec<UserId>) -> SyncResult<()>;
    async fn join_group(&self, conversation_id: ConversationId) -> SyncResult<()>;
    async fn leave_group(&self, conversation_id: ConversationId) -> SyncResult<()>;
    async fn add_users(
        &self,
        conversation_id: ConversationId,
        participants: Vec<UserId>,
    ) -> SyncResult<()>;
    async fn remove_users(
        &self,
        conversation_id: ConversationId,
        participants: Vec<UserId>,
    ) -> SyncResult<()>;
    async fn delete_group(&self, conversation_id: ConversationId) -> SyncResult<()>;
    async fn edit_message(&self, message_id: MessageId, content: &str) -> SyncResult<()>;
    async fn set_pinned(&self, message_id: MessageId, pinned: bool) -> SyncResult<()>;
    async fn delete_message(&self, message_id: MessageId) -> SyncResult<()>;
    async fn snapshot(&self) -> SyncResult<SessionState>;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

/// Handle to a running sync engine bound to one session identity.
pub struct RealtimeClient {
    commands: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<ClientEvent>,
    api: Arc<dyn ConversationApi>,
    engine: JoinHandle<()>,
}

impl RealtimeClient {
    /// Opens the channel for `identity` and starts the engine task.
    pub fn connect(
        settings: &ClientSettings,
        identity: SessionIdentity,
        transport: Arc<dyn ChannelTransport>,
        api: Arc<dyn ConversationApi>,
    ) -> SyncResult<Self> {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        let (signals_tx, signals_rx) = mpsc::channel(settings.event_buffer.max(1));
        let (commands, commands_rx) = mpsc::channel(64);

        let state = SessionState::new(identity.user_id.clone());
        let channel = ChannelManager::connect(
            transport,
            identity,
            ReconnectPolicy {
                max_attempts: settings.reconnect_attempts,
                delay: settings.reconnect_delay,
            },
            signals_tx,
        )?;
        let engine = Engine::new(
            state,
            channel,
            Arc::clone(&api),
            events.clone(),
            TypingDebouncer::new(settings.typing_debounce),
        );
        let engine = tokio::spawn(engine.run(commands_rx, signals_rx));
        info!("sync engine started");

        Ok(Self {
            commands,
            events,
            api,
            engine,
        })
    }

    async fn act(&self, action: LocalAction) -> SyncResult<Option<MessageId>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Act { action, reply })
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    async fn act_unit(&self, action: LocalAction) -> SyncResult<()> {
        self.act(action).await.map(|_| ())
    }

    /// Stops the engine and tears the channel down.
    pub async fn shutdown(self) {
        let _ = self.commands.send(EngineCommand::Shutdown).await;
        let _ = self.engine.await;
    }
}

#[async_trait]
impl ClientHandle for RealtimeClient {
    async fn load_directory(&self) -> SyncResult<usize> {
        let list = self.api.fetch_directory().await?;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::UpsertDirectory { list, reply })
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    async fn select_conversation(&self, conversation_id: ConversationId) -> SyncResult<()> {
        self.act_unit(LocalAction::Select(conversation_id)).await
    }

    async fn send_message(
        &self,
        content: &str,
        kind: MessageKind,
        reply_to: Option<MessageId>,
    ) -> SyncResult<MessageId> {
        self.act(LocalAction::Send {
            content: content.to_string(),
            kind,
            reply_to,
        })
        .await?
        .ok_or(SyncError::EngineStopped)
    }

    async fn notify_typing(&self) -> SyncResult<()> {
        self.act_unit(LocalAction::Keystroke).await
    }

    async fn react(&self, message_id: MessageId, reaction: &str) -> SyncResult<()> {
        self.act_unit(LocalAction::React {
            message_id,
            reaction: reaction.to_string(),
        })
        .await
    }

    async fn remove_reaction(&self, message_id: MessageId) -> SyncResult<()> {
        self.act_unit(LocalAction::RemoveReaction(message_id)).await
    }

    async fn create_group(&self, name: &str, participants: Vec<UserId>) -> SyncResult<()> {
        self.act_unit(LocalAction::CreateGroup {
            name: name.to_string(),
            participants,
        })
        .await
    }

    async fn join_group(&self, conversation_id: ConversationId) -> SyncResult<()> {
        self.act_unit(LocalAction::JoinGroup(conversation_id)).await
    }

    async fn leave_group(&self, conversation_id: ConversationId) -> SyncResult<()> {
        self.act_unit(LocalAction::LeaveGroup(conversation_id)).await
    }

    async fn add_users(
        &self,
        conversation_id: ConversationId,
        participants: Vec<UserId>,
    ) -> SyncResult<()> {
        self.act_unit(LocalAction::AddUsers {
            conversation_id,
            participants,
        })
        .await
    }

    async fn remove_users(
        &self,
        conversation_id: ConversationId,
        participants: Vec<UserId>,
    ) -> SyncResult<()> {
        self.act_unit(LocalAction::RemoveUsers {
            conversation_id,
            participants,
        })
        .await
    }

    async fn delete_group(&self, conversation_id: ConversationId) -> SyncResult<()> {
        self.act_unit(LocalAction::DeleteGroup(conversation_id)).await
    }

    async fn edit_message(&self, message_id: MessageId, content: &str) -> SyncResult<()> {
        self.act_unit(LocalAction::Edit {
            message_id,
            content: content.to_string(),
        })
        .await
    }

    async fn set_pinned(&self, message_id: MessageId, pinned: bool) -> SyncResult<()> {
        self.act_unit(LocalAction::Pin { message_id, pinned }).await
    }

    async fn delete_message(&self, message_id: MessageId) -> SyncResult<()> {
        self.act_unit(LocalAction::Delete(message_id)).await
    }

    async fn snapshot(&self) -> SyncResult<SessionState> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Snapshot { reply })
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

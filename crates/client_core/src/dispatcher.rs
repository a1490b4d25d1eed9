//! The engine task: the only place session state is mutated.

use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{ConversationId, MessageId, MessageKind, UserId},
    protocol::{ClientRequest, ConversationPayload, MessagePayload},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    api::ConversationApi,
    channel::{ChannelManager, ChannelSignal},
    error::{SyncError, SyncResult},
    presence::TypingDebouncer,
    session::{Effects, SessionState},
    ClientEvent, ConnectionState,
};

/// A user action, applied optimistically where the model allows it.
#[derive(Debug, Clone)]
pub enum LocalAction {
    Select(ConversationId),
    Send {
        content: String,
        kind: MessageKind,
        reply_to: Option<MessageId>,
    },
    Keystroke,
    React {
        message_id: MessageId,
        reaction: String,
    },
    RemoveReaction(MessageId),
    CreateGroup {
        name: String,
        participants: Vec<UserId>,
    },
    JoinGroup(ConversationId),
    LeaveGroup(ConversationId),
    AddUsers {
        conversation_id: ConversationId,
        participants: Vec<UserId>,
    },
    RemoveUsers {
        conversation_id: ConversationId,
        participants: Vec<UserId>,
    },
    DeleteGroup(ConversationId),
    Edit {
        message_id: MessageId,
        content: String,
    },
    Pin {
        message_id: MessageId,
        pinned: bool,
    },
    Delete(MessageId),
}

pub enum EngineCommand {
    Act {
        action: LocalAction,
        /// Carries the client id for sends.
        reply: oneshot::Sender<SyncResult<Option<MessageId>>>,
    },
    UpsertDirectory {
        list: Vec<ConversationPayload>,
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionState>,
    },
    Shutdown,
}

type HistoryResult = (ConversationId, SyncResult<Vec<MessagePayload>>);

pub struct Engine {
    state: SessionState,
    channel: ChannelManager,
    api: Arc<dyn ConversationApi>,
    events: broadcast::Sender<ClientEvent>,
    typing: TypingDebouncer,
    history_tx: mpsc::UnboundedSender<HistoryResult>,
    history_rx: Option<mpsc::UnboundedReceiver<HistoryResult>>,
}

impl Engine {
    pub fn new(
        state: SessionState,
        channel: ChannelManager,
        api: Arc<dyn ConversationApi>,
        events: broadcast::Sender<ClientEvent>,
        typing: TypingDebouncer,
    ) -> Self {
        let (history_tx, history_rx) = mpsc::unbounded_channel();
        Self {
            state,
            channel,
            api,
            events,
            typing,
            history_tx,
            history_rx: Some(history_rx),
        }
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut signals: mpsc::Receiver<ChannelSignal>,
    ) {
        let Some(mut history_rx) = self.history_rx.take() else {
            return;
        };
        let mut signals_open = true;
        loop {
            let typing_deadline = self.typing.deadline();
            let typing_wake = Instant::from_std(typing_deadline.unwrap_or_else(std::time::Instant::now));

            tokio::select! {
                command = commands.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                signal = signals.recv(), if signals_open => match signal {
                    Some(signal) => self.handle_signal(signal),
                    None => signals_open = false,
                },
                Some((conversation_id, result)) = history_rx.recv() => {
                    self.handle_history(conversation_id, result);
                }
                _ = sleep_until(typing_wake), if typing_deadline.is_some() => {
                    if let Some(stop) = self.typing.poll(std::time::Instant::now()) {
                        self.send(stop);
                    }
                }
            }
        }

        if let Some(stop) = self.typing.flush() {
            self.send(stop);
        }
        self.channel.disconnect();
        info!("sync engine stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Act { action, reply } => {
                let result = self.act(action);
                if let Err(err) = &result {
                    debug!(error = %err, "action rejected");
                }
                let _ = reply.send(result);
            }
            EngineCommand::UpsertDirectory { list, reply } => {
                let count = self.state.upsert_directory(list);
                info!(count, "directory loaded");
                self.emit(ClientEvent::StateChanged);
                let _ = reply.send(count);
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(self.state.clone());
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn act(&mut self, action: LocalAction) -> SyncResult<Option<MessageId>> {
        if !matches!(action, LocalAction::Select(_)) && !self.channel.is_running() {
            return Err(SyncError::NotConnected);
        }

        match action {
            LocalAction::Select(conversation_id) => {
                if let Some(stop) = self.typing.flush() {
                    self.send(stop);
                }
                let effects = self.state.select_conversation(&conversation_id)?;
                self.perform(effects);
                self.fetch_history(&conversation_id);
                Ok(None)
            }
            LocalAction::Send {
                content,
                kind,
                reply_to,
            } => {
                let client_id = MessageId::new(Uuid::new_v4().to_string());
                let (id, request) =
                    self.state
                        .send_message(&content, kind, reply_to, client_id, Utc::now())?;
                if let Some(stop) = self.typing.flush() {
                    self.send(stop);
                }
                self.send(request);
                self.emit(ClientEvent::StateChanged);
                Ok(Some(id))
            }
            LocalAction::Keystroke => {
                let target = self.state.typing_target()?;
                for request in self.typing.keystroke(target, std::time::Instant::now()) {
                    self.send(request);
                }
                Ok(None)
            }
            LocalAction::React {
                message_id,
                reaction,
            } => {
                let request = self.state.react(&message_id, &reaction)?;
                self.send_changed(request)
            }
            LocalAction::RemoveReaction(message_id) => {
                let request = self.state.remove_reaction(&message_id)?;
                self.send_changed(request)
            }
            LocalAction::CreateGroup { name, participants } => {
                let request = self.state.create_group(&name, participants)?;
                self.send_only(request)
            }
            LocalAction::JoinGroup(conversation_id) => {
                let request = self.state.join_group(&conversation_id)?;
                self.send_only(request)
            }
            LocalAction::LeaveGroup(conversation_id) => {
                let request = self.state.leave_group(&conversation_id)?;
                self.send_only(request)
            }
            LocalAction::AddUsers {
                conversation_id,
                participants,
            } => {
                let request = self.state.add_users(&conversation_id, participants)?;
                self.send_only(request)
            }
            LocalAction::RemoveUsers {
                conversation_id,
                participants,
            } => {
                let request = self.state.remove_users(&conversation_id, participants)?;
                self.send_only(request)
            }
            LocalAction::DeleteGroup(conversation_id) => {
                let request = self.state.delete_group(&conversation_id)?;
                self.send_only(request)
            }
            LocalAction::Edit {
                message_id,
                content,
            } => {
                let request = self.state.edit_message(&message_id, &content)?;
                self.send_only(request)
            }
            LocalAction::Pin { message_id, pinned } => {
                let request = self.state.pin_message(&message_id, pinned)?;
                self.send_only(request)
            }
            LocalAction::Delete(message_id) => {
                let request = self.state.delete_message(&message_id)?;
                self.send_changed(request)
            }
        }
    }

    fn handle_signal(&mut self, signal: ChannelSignal) {
        match signal {
            ChannelSignal::Connected => self.emit(ClientEvent::Connection(ConnectionState::Connected)),
            ChannelSignal::Disconnected => {
                self.emit(ClientEvent::Connection(ConnectionState::Disconnected))
            }
            ChannelSignal::GaveUp => self.emit(ClientEvent::Connection(ConnectionState::GaveUp)),
            ChannelSignal::Event(event) => {
                debug!(event = event.name(), "dispatching");
                let effects = self.state.apply(event);
                self.perform(effects);
            }
        }
    }

    fn handle_history(
        &mut self,
        conversation_id: ConversationId,
        result: SyncResult<Vec<MessagePayload>>,
    ) {
        match result {
            Ok(history) => {
                debug!(conversation_id = %conversation_id, count = history.len(), "history fetched");
                let effects = self.state.apply_history(&conversation_id, history);
                self.perform(effects);
            }
            Err(err) => {
                warn!(conversation_id = %conversation_id, error = %err, "history fetch failed");
                self.emit(ClientEvent::Error(format!(
                    "failed to load history for {conversation_id}: {err}"
                )));
            }
        }
    }

    fn fetch_history(&self, conversation_id: &ConversationId) {
        let Some(conversation) = self.state.directory().get(conversation_id).cloned() else {
            return;
        };
        let api = Arc::clone(&self.api);
        let history_tx = self.history_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_history(&conversation).await;
            let _ = history_tx.send((conversation.id, result));
        });
    }

    fn perform(&mut self, effects: Effects) {
        for request in effects.outbound {
            self.send(request);
        }
        for notice in effects.notices {
            info!(kind = ?notice.kind, reason = %notice.message, "server rejected action");
            self.emit(ClientEvent::Notice(notice));
        }
        if effects.changed {
            self.emit(ClientEvent::StateChanged);
        }
    }

    fn send_only(&mut self, request: ClientRequest) -> SyncResult<Option<MessageId>> {
        self.send(request);
        Ok(None)
    }

    fn send_changed(&mut self, request: ClientRequest) -> SyncResult<Option<MessageId>> {
        self.send(request);
        self.emit(ClientEvent::StateChanged);
        Ok(None)
    }

    fn send(&mut self, request: ClientRequest) {
        let event = request.name();
        if let Err(err) = self.channel.send(request) {
            warn!(event, error = %err, "request dropped");
        }
    }

    fn emit(&self, event: ClientEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

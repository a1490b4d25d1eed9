//! Request/response collaborators: the conversation directory and message history.

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use shared::{
    error::{ApiError, ApiException, ErrorCode},
    protocol::{ConversationPayload, MessagePayload},
};
use tracing::debug;

use crate::{directory::Conversation, error::SyncResult};

#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Direct counterparts and groups visible to the current user.
    async fn fetch_directory(&self) -> SyncResult<Vec<ConversationPayload>>;
    async fn fetch_history(&self, conversation: &Conversation) -> SyncResult<Vec<MessagePayload>>;
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    #[serde(default)]
    messages: Vec<MessagePayload>,
}

pub struct HttpConversationApi {
    http: Client,
    server_url: String,
    token: String,
}

impl HttpConversationApi {
    pub fn new(server_url: &str, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let url = format!("{}{path}", self.server_url);
        debug!(%url, "api request");
        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiError>()
                .await
                .map(|body| body.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(ApiException::new(ErrorCode::from_status(status.as_u16()), message).into());
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn fetch_directory(&self) -> SyncResult<Vec<ConversationPayload>> {
        let users: DataEnvelope<ConversationPayload> = self.get_json("/api/v1/users").await?;
        let everyone: DataEnvelope<ConversationPayload> =
            self.get_json("/api/v1/group/users").await?;

        let mut directory = users.data;
        // the group listing repeats plain users; keep only the groups
        directory.extend(everyone.data.into_iter().filter(|entry| entry.is_group));
        Ok(directory)
    }

    async fn fetch_history(&self, conversation: &Conversation) -> SyncResult<Vec<MessagePayload>> {
        let path = match (conversation.is_group(), conversation.counterpart()) {
            (false, Some(user)) => format!("/api/v1/chats/users/{user}/messages"),
            _ => format!("/api/v1/group/{}/messages", conversation.id),
        };
        let history: HistoryEnvelope = self.get_json(&path).await?;
        Ok(history.messages)
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;

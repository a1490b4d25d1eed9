use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{ClientRequest, FrameHeader, ServerEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::channel::{ChannelTransport, Connection, SessionIdentity};

/// JSON-over-websocket transport, one text frame per event.
pub struct WebSocketTransport {
    endpoint: Url,
}

impl WebSocketTransport {
    pub fn new(websocket_url: &str) -> Result<Self> {
        let endpoint = Url::parse(websocket_url)
            .with_context(|| format!("invalid websocket url: {websocket_url}"))?;
        Ok(Self { endpoint })
    }

    fn url_for(&self, identity: &SessionIdentity) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("token", &identity.token)
            .append_pair("userId", identity.user_id.as_str());
        url
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn connect(&self, identity: &SessionIdentity) -> Result<Connection> {
        let url = self.url_for(identity);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {}", self.endpoint))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientRequest>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(request) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&request) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(event = request.name(), error = %err, "failed to encode request");
                        continue;
                    }
                };
                if let Err(err) = ws_writer.send(Message::Text(text)).await {
                    warn!(error = %err, "websocket send failed");
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = decode_frame(&text) {
                            if inbound_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "websocket receive failed");
                        break;
                    }
                }
            }
        });

        Ok(Connection { outbound, inbound })
    }
}

/// Decodes one inbound frame. Unknown events and malformed frames are logged
/// and dropped.
pub fn decode_frame(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => {
            debug!(event = event.name(), "inbound");
            Some(event)
        }
        Err(err) => {
            match serde_json::from_str::<FrameHeader>(text) {
                Ok(header) if !ServerEvent::is_known(&header.event) => {
                    debug!(event = %header.event, "ignoring unknown event");
                }
                Ok(header) => {
                    warn!(event = %header.event, error = %err, "malformed event payload");
                }
                Err(_) => warn!(error = %err, "malformed frame"),
            }
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;

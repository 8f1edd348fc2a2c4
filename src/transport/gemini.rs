//! Gemini Live over WebSocket

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{Connector, RemoteEventSink, RemoteSession, SessionSetup, protocol};
use crate::tools::ToolCallResult;
use crate::voice::Pcm16Payload;
use crate::{Error, Result};

/// Connects to the Gemini Live `BidiGenerateContent` endpoint
pub struct GeminiConnector {
    endpoint: String,
    api_key: SecretString,
}

impl GeminiConnector {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }

    fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {e}", self.endpoint)))?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }
}

impl std::fmt::Debug for GeminiConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConnector")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for GeminiConnector {
    async fn connect(
        &self,
        setup: &SessionSetup,
        events: RemoteEventSink,
    ) -> Result<Arc<dyn RemoteSession>> {
        let url = self.url()?;
        tracing::info!(endpoint = %self.endpoint, model = %setup.model, "connecting to live session");

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Remote(format!("connection failed: {e}")))?;
        let (mut write, mut read) = stream.split();

        write.send(Message::Text(protocol::encode_setup(setup)?)).await?;

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    tracing::debug!(error = %e, "live session write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => dispatch_frame(text.as_bytes(), &events),
                    Ok(Message::Binary(bytes)) => dispatch_frame(&bytes, &events),
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map_or_else(
                            || "closed by server".to_string(),
                            |f| format!("{} {}", f.code, f.reason),
                        );
                        events.closed(reason);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        events.error(e.to_string());
                        return;
                    }
                }
            }
            events.closed("stream ended");
        });

        Ok(Arc::new(GeminiSession {
            outgoing,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(vec![reader, writer]),
        }))
    }
}

fn dispatch_frame(bytes: &[u8], events: &RemoteEventSink) {
    let decoded = match protocol::decode_server_frame(bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed server frame");
            return;
        }
    };

    if decoded.setup_complete {
        tracing::info!("live session ready");
        events.open();
    }
    for message in decoded.messages {
        events.message(message);
    }
}

/// An open Gemini Live connection
struct GeminiSession {
    outgoing: mpsc::UnboundedSender<Message>,
    closed: AtomicBool,
    /// Reader first; aborted on close so no events follow it
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GeminiSession {
    fn send_text(&self, text: String) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::RemoteClosed("session closed".to_string()));
        }
        self.outgoing
            .send(Message::Text(text))
            .map_err(|_| Error::RemoteClosed("connection writer stopped".to_string()))
    }
}

impl RemoteSession for GeminiSession {
    fn send_audio(&self, payload: &Pcm16Payload) -> Result<()> {
        self.send_text(protocol::encode_audio(payload)?)
    }

    fn send_video_frame(&self, jpeg_base64: &str) -> Result<()> {
        self.send_text(protocol::encode_video_frame(jpeg_base64)?)
    }

    fn send_tool_result(&self, result: &ToolCallResult) -> Result<()> {
        tracing::debug!(id = %result.id, tool = %result.name, "sending tool response");
        self.send_text(protocol::encode_tool_result(result)?)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Ok(mut tasks) = self.tasks.lock()
            && let Some(reader) = tasks.first()
        {
            reader.abort();
            tasks.clear();
        }

        self.outgoing
            .send(Message::Close(None))
            .map_err(|_| Error::RemoteClosed("connection writer stopped".to_string()))
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

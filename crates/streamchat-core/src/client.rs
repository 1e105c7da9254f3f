use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::conversation::TransportEvent;
use crate::error::ChatError;
use crate::state::ChatMessage;

/// Raw response body frames, in arrival order
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

/// Body of one chat request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    /// Instruction placed ahead of the conversation
    pub prefix: String,
    pub message: String,
    /// Transcript before this message
    pub history: Vec<ChatMessage>,
}

#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    endpoint: String,
    idle_timeout: Option<Duration>,
}

impl ChatClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            idle_timeout: None,
        }
    }

    /// Fail a stream that goes quiet for longer than `limit` between frames.
    pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.idle_timeout = limit;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send the request and hand back the body once the response is accepted.
    pub async fn send(&self, request: &ChatRequest) -> Result<FrameStream, ChatError> {
        debug!(
            endpoint = %self.endpoint,
            history = request.history.len(),
            "sending chat request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(ChatError::Connect)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Status(status));
        }
        if status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT {
            return Err(ChatError::MissingBody);
        }
        info!(%status, "chat response accepted, streaming");

        let frames = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::Transport))
            .boxed();

        Ok(match self.idle_timeout {
            Some(limit) => with_idle_timeout(frames, limit),
            None => frames,
        })
    }

    /// Run the transport for one turn on a background task.
    ///
    /// Progress is reported as `TransportEvent`s; the last one sent is always
    /// `End` or `Failed` unless the receiver goes away first.
    pub fn spawn_turn(
        &self,
        request: ChatRequest,
        tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.pump(request, tx).await })
    }

    async fn pump(&self, request: ChatRequest, tx: mpsc::UnboundedSender<TransportEvent>) {
        let mut frames = match self.send(&request).await {
            Ok(frames) => frames,
            Err(err) => {
                let _ = tx.send(TransportEvent::Failed(err));
                return;
            }
        };
        if tx.send(TransportEvent::Connected).is_err() {
            return;
        }

        while let Some(item) = frames.next().await {
            let event = match item {
                Ok(frame) => TransportEvent::Frame(frame),
                Err(err) => {
                    let _ = tx.send(TransportEvent::Failed(err));
                    return;
                }
            };
            if tx.send(event).is_err() {
                debug!("turn receiver dropped, abandoning stream");
                return;
            }
        }
        let _ = tx.send(TransportEvent::End);
    }
}

fn with_idle_timeout<S>(mut frames: S, limit: Duration) -> FrameStream
where
    S: Stream<Item = Result<Bytes, ChatError>> + Send + Unpin + 'static,
{
    Box::pin(async_stream::stream! {
        loop {
            match tokio::time::timeout(limit, frames.next()).await {
                Ok(Some(item)) => {
                    yield item;
                }
                Ok(None) => break,
                Err(_) => {
                    yield Err(ChatError::Timeout(limit));
                    break;
                }
            }
        }
    })
}

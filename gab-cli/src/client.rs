use async_trait::async_trait;
use futures_util::StreamExt;
use gab_shared::{
    ApiErrorBody, Chat, CreateChatRequest, Message, ReplyUpdate, SendMessageRequest,
    SendMessageResponse, UpdateChatRequest,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("reply stream failed: {0}")]
    WebSocket(String),
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
}

/// Backend operations the chat view depends on.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn chats(&self) -> Result<Vec<Chat>, ApiError>;

    async fn create_chat(&self, system: Option<String>) -> Result<Chat, ApiError>;

    async fn update_chat(&self, id: &str, system: Option<String>) -> Result<Chat, ApiError>;

    async fn messages(&self, chat_id: &str) -> Result<Vec<Message>, ApiError>;

    async fn send_message(
        &self,
        chat_id: &str,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse, ApiError>;

    /// Follows the reply being generated for `chat_id`.
    async fn subscribe_reply(
        &self,
        chat_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ReplyUpdate>, ApiError>;
}

pub struct HttpApi {
    client: Client,
    base: Url,
    ws_base: Url,
}

impl HttpApi {
    pub fn new(server_url: &Url) -> Result<Self, ApiError> {
        let mut base = server_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut ws_base = base.clone();
        let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
        ws_base.set_scheme(scheme).map_err(|_| {
            ApiError::WebSocket(format!("cannot derive websocket url from {}", base))
        })?;

        Ok(Self {
            client: Client::new(),
            base,
            ws_base,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            error!("API error {}: {}", status, message);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn chats(&self) -> Result<Vec<Chat>, ApiError> {
        let url = self.url("chats")?;
        self.fetch(self.client.get(url)).await
    }

    async fn create_chat(&self, system: Option<String>) -> Result<Chat, ApiError> {
        let url = self.url("chats")?;
        self.fetch(self.client.post(url).json(&CreateChatRequest { system }))
            .await
    }

    async fn update_chat(&self, id: &str, system: Option<String>) -> Result<Chat, ApiError> {
        let url = self.url(&format!("chats/{}", id))?;
        self.fetch(self.client.patch(url).json(&UpdateChatRequest { system }))
            .await
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<Message>, ApiError> {
        let url = self.url(&format!("chats/{}/messages", chat_id))?;
        self.fetch(self.client.get(url)).await
    }

    async fn send_message(
        &self,
        chat_id: &str,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse, ApiError> {
        info!(
            "Sending message to chat {} (ref {}, {} chars)",
            chat_id,
            request.reference,
            request.content.len()
        );
        let url = self.url(&format!("chats/{}/messages", chat_id))?;
        self.fetch(self.client.post(url).json(&request)).await
    }

    async fn subscribe_reply(
        &self,
        chat_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ReplyUpdate>, ApiError> {
        let url = self.ws_base.join(&format!("ws/reply/{}", chat_id))?;
        debug!("Connecting to {}", url);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ApiError::WebSocket(e.to_string()))?;
        let (write, mut read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            // Keep the sink half alive for as long as we read.
            let _write = write;
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                match serde_json::from_str::<ReplyUpdate>(&text) {
                                    Ok(update) => {
                                        if tx.send(update).is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => error!("Failed to parse reply update: {}", e),
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                debug!("Reply stream closed");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("Reply stream error: {}", e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
        });

        Ok(rx)
    }
}

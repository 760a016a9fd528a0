use crate::llm::{build_conversation, CompletionEvent, CompletionProvider};
use crate::reply::ReplyHub;
use crate::store::{new_id, ChatStore, StoreError};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use gab_shared::{
    ApiErrorBody, Chat, CreateChatRequest, Message, MessageRole, ReplyUpdate, SendMessageRequest,
    SendMessageResponse, UpdateChatRequest,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

pub struct AppState {
    pub store: ChatStore,
    pub replies: ReplyHub,
    pub llm: Arc<dyn CompletionProvider>,
    pub default_system_prompt: Option<String>,
}

impl AppState {
    pub fn new(llm: Arc<dyn CompletionProvider>, default_system_prompt: Option<String>) -> Self {
        Self {
            store: ChatStore::new(),
            replies: ReplyHub::new(),
            llm,
            default_system_prompt,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("chat '{0}' not found")]
    ChatNotFound(String),
    #[error("message content is empty")]
    EmptyMessage,
    #[error("chat '{0}' is already waiting for a reply")]
    ReplyInProgress(String),
    #[error("completion failed: {0}")]
    Completion(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ChatNotFound(id) => ApiError::ChatNotFound(id),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::ChatNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::EmptyMessage => StatusCode::BAD_REQUEST,
            ApiError::ReplyInProgress(_) => StatusCode::CONFLICT,
            ApiError::Completion(_) => StatusCode::BAD_GATEWAY,
        };
        let body = ApiErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chats", get(list_chats).post(create_chat))
        .route("/chats/:id", patch(update_chat))
        .route("/chats/:id/messages", get(list_messages).post(send_message))
        .route("/ws/reply/:id", get(reply_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn list_chats(State(state): State<Arc<AppState>>) -> Json<Vec<Chat>> {
    Json(state.store.chats().await)
}

async fn create_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateChatRequest>,
) -> Json<Chat> {
    let chat = state.store.create_chat(request.system).await;
    info!("Created chat {} (system prompt: {})", chat.id, chat.is_system());
    Json(chat)
}

async fn update_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateChatRequest>,
) -> Result<Json<Chat>, ApiError> {
    let chat = state.store.update_chat(&id, request.system).await?;
    info!("Updated chat {} (system prompt: {})", chat.id, chat.is_system());
    Ok(Json(chat))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Vec<Message>> {
    Json(state.store.messages(&id).await)
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    if request.content.trim().is_empty() {
        return Err(ApiError::EmptyMessage);
    }
    let chat = state
        .store
        .chat(&chat_id)
        .await
        .ok_or_else(|| ApiError::ChatNotFound(chat_id.clone()))?;

    info!(
        "Message for chat {} (ref {}): {} chars",
        chat.id,
        request.reference,
        request.content.len()
    );

    let history = state.store.messages(&chat.id).await;
    let question = Message {
        id: new_id(),
        role: MessageRole::User,
        content: request.content,
        chat_id: chat.id.clone(),
        usage: None,
    };
    let system = chat
        .system
        .as_deref()
        .or(state.default_system_prompt.as_deref());
    let conversation = build_conversation(system, &history, &question);

    let reply = state.replies.begin(&chat.id).ok_or_else(|| {
        warn!("Chat {} already has a reply in progress", chat.id);
        ApiError::ReplyInProgress(chat.id.clone())
    })?;
    let mut rx = state
        .llm
        .stream_completion(conversation)
        .await
        .map_err(|e| {
            error!("Failed to stream completion: {}", e);
            ApiError::Completion(e.to_string())
        })?;

    let mut content = String::new();
    let mut usage = None;
    let mut finished = false;
    while let Some(event) = rx.recv().await {
        match event {
            CompletionEvent::Delta(delta) => {
                content.push_str(&delta);
                reply.push(&delta);
            }
            CompletionEvent::Done { usage: reported } => {
                usage = reported;
                finished = true;
                break;
            }
            CompletionEvent::Failed(message) => {
                error!("Completion failed for chat {}: {}", chat.id, message);
                return Err(ApiError::Completion(message));
            }
        }
    }
    reply.finish();

    if !finished {
        return Err(ApiError::Completion("stream ended unexpectedly".to_string()));
    }

    let reply = Message {
        id: new_id(),
        role: MessageRole::Assistant,
        content,
        chat_id: chat.id.clone(),
        usage,
    };
    state
        .store
        .append(&chat.id, vec![question.clone(), reply.clone()])
        .await?;

    info!(
        "Reply for chat {}: {} chars, usage {:?}",
        chat.id,
        reply.content.len(),
        reply.usage
    );

    Ok(Json(SendMessageResponse {
        chat_id: chat.id,
        question,
        reply,
    }))
}

async fn reply_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_replies(socket, state, id))
}

async fn stream_replies(mut socket: WebSocket, state: Arc<AppState>, chat_id: String) {
    debug!("Reply subscriber connected for chat {}", chat_id);
    let (snapshot, mut rx) = state.replies.subscribe(&chat_id);

    let mut open = match snapshot {
        Some(content) => {
            let update = ReplyUpdate {
                chat_id: chat_id.clone(),
                content,
                done: false,
            };
            send_json(&mut socket, &update).await
        }
        None => true,
    };

    while open {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Ok(update) => open = send_json(&mut socket, &update).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Reply subscriber for chat {} lagged by {}", chat_id, skipped);
                    }
                    Err(RecvError::Closed) => open = false,
                }
            }
            incoming = socket.recv() => {
                if matches!(incoming, Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None) {
                    open = false;
                }
            }
        }
    }

    drop(rx);
    state.replies.release(&chat_id);
    debug!("Reply subscriber left chat {}", chat_id);
}

async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => {
            if let Err(e) = socket.send(WsMessage::Text(json)).await {
                debug!("Failed to send reply update: {}", e);
                return false;
            }
            true
        }
        Err(e) => {
            error!("Failed to serialize reply update: {}", e);
            true
        }
    }
}

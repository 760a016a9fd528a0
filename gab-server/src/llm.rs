use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionStreamOptions, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use gab_shared::{Message, MessageRole, Usage};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// One step of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    Delta(String),
    Done { usage: Option<Usage> },
    Failed(String),
}

/// Something that turns a conversation into a streamed assistant reply.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model(&self) -> &str;

    /// The receiver yields deltas and then exactly one `Done` or `Failed`.
    async fn stream_completion(
        &self,
        messages: Vec<Message>,
    ) -> Result<mpsc::UnboundedReceiver<CompletionEvent>, OpenAIError>;
}

pub struct LlmService {
    client: Client<OpenAIConfig>,
    model: String,
}

impl LlmService {
    pub fn new(api_key: String, model: String, api_base: Option<String>) -> Self {
        info!("Initializing LLM service with model: {}", model);
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = api_base {
            info!("Using completion endpoint at {}", base);
            config = config.with_api_base(base);
        }
        let client = Client::with_config(config);
        Self { client, model }
    }
}

#[async_trait]
impl CompletionProvider for LlmService {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_completion(
        &self,
        messages: Vec<Message>,
    ) -> Result<mpsc::UnboundedReceiver<CompletionEvent>, OpenAIError> {
        let messages = messages
            .into_iter()
            .map(convert_to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .stream(true)
            .stream_options(ChatCompletionStreamOptions { include_usage: true })
            .build()?;

        debug!(
            "Completion request: {}",
            serde_json::to_string(&request).unwrap_or_default()
        );

        let mut stream = self.client.chat().create_stream(request).await.map_err(|e| {
            error!("Failed to create OpenAI stream: {:?}", e);
            e
        })?;

        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut usage = None;

            while let Some(result) = stream.next().await {
                match result {
                    Ok(response) => {
                        if let Some(delta) = response
                            .choices
                            .first()
                            .and_then(|choice| choice.delta.content.clone())
                        {
                            if tx.send(CompletionEvent::Delta(delta)).is_err() {
                                error!("Completion receiver dropped");
                                return;
                            }
                        }
                        // Only the final chunk carries usage when include_usage is set.
                        if let Some(reported) = response.usage {
                            usage = Some(Usage {
                                prompt_tokens: reported.prompt_tokens,
                                completion_tokens: reported.completion_tokens,
                                total_tokens: reported.total_tokens,
                            });
                        }
                    }
                    Err(e) => {
                        error!("OpenAI stream error: {:?}", e);
                        let _ = tx.send(CompletionEvent::Failed(describe_error(&e)));
                        return;
                    }
                }
            }

            if tx.send(CompletionEvent::Done { usage }).is_err() {
                error!("Failed to send done event");
            }
        });

        Ok(rx)
    }
}

fn describe_error(e: &OpenAIError) -> String {
    match e {
        OpenAIError::ApiError(api_err) => format!(
            "OpenAI API Error: {} (Code: {:?}, Type: {:?})",
            api_err.message, api_err.code, api_err.r#type
        ),
        _ => format!("OpenAI Error: {}", e),
    }
}

fn convert_to_openai_message(msg: Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let message = match msg.role {
        MessageRole::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content)
                .build()?,
        ),
        MessageRole::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content)
                .build()?,
        ),
        MessageRole::Assistant => ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(msg.content)
                .build()?,
        ),
    };
    Ok(message)
}

/// Builds the message list sent to the provider: the system prompt (if any),
/// the chat history, then the new question.
pub fn build_conversation(
    system: Option<&str>,
    history: &[Message],
    question: &Message,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(prompt) = system.filter(|p| !p.trim().is_empty()) {
        messages.push(Message {
            id: String::new(),
            role: MessageRole::System,
            content: prompt.to_string(),
            chat_id: question.chat_id.clone(),
            usage: None,
        });
    }
    messages.extend(history.iter().cloned());
    messages.push(question.clone());
    messages
}

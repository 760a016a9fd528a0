pub mod prompts;

use serde::{Deserialize, Serialize};

pub use prompts::{builtin_prompts, is_prompt_command};

/// Chat id used before the first message has created a real chat.
pub const UNKNOWN_CHAT_ID: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Token accounting reported by the completion provider for a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub chat_id: String,
    pub usage: Option<Usage>,
}

impl Message {
    /// A user message as inserted locally before the server confirms it.
    /// `reference` stands in for the id until the server assigns one.
    pub fn user(
        reference: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: reference.into(),
            role: MessageRole::User,
            content: content.into(),
            chat_id: chat_id.into(),
            usage: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    /// System prompt for the chat, if one was set with a prompt command.
    pub system: Option<String>,
}

impl Chat {
    pub fn is_system(&self) -> bool {
        self.system.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Body of `POST /chats`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub system: Option<String>,
}

/// Body of `PATCH /chats/:id`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateChatRequest {
    pub system: Option<String>,
}

/// Body of `POST /chats/:id/messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    /// Client-generated id of the optimistic message this request confirms.
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub chat_id: String,
    pub question: Message,
    pub reply: Message,
}

/// Pushed over `/ws/reply/:id` while a reply is being generated.
/// `content` is the whole reply so far, not a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyUpdate {
    pub chat_id: String,
    pub content: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: MessageRole = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, MessageRole::System);
    }

    #[test]
    fn send_request_uses_ref_field() {
        let req = SendMessageRequest {
            content: "hi".into(),
            reference: "abc".into(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["ref"], "abc");
        assert!(value.get("reference").is_none());
    }

    #[test]
    fn optimistic_user_message_has_no_usage() {
        let msg = Message::user("ref-1", UNKNOWN_CHAT_ID, "hello");
        assert_eq!(msg.id, "ref-1");
        assert_eq!(msg.chat_id, "unknown");
        assert!(msg.is_user());
        assert!(msg.usage.is_none());
    }

    #[test]
    fn empty_system_prompt_is_not_a_system_chat() {
        let chat = Chat { id: "c".into(), system: Some(String::new()) };
        assert!(!chat.is_system());
        let chat = Chat { id: "c".into(), system: Some("be brief".into()) };
        assert!(chat.is_system());
    }
}

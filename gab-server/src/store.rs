use gab_shared::{Chat, Message};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("chat '{0}' not found")]
    ChatNotFound(String),
}

#[derive(Default)]
struct Inner {
    /// Creation order
    chats: Vec<Chat>,
    messages: HashMap<String, Vec<Message>>,
}

/// In-memory chats and messages.
#[derive(Default)]
pub struct ChatStore {
    inner: RwLock<Inner>,
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_chat(&self, system: Option<String>) -> Chat {
        let chat = Chat {
            id: new_id(),
            system: system.filter(|s| !s.is_empty()),
        };
        let mut inner = self.inner.write().await;
        inner.messages.insert(chat.id.clone(), Vec::new());
        inner.chats.push(chat.clone());
        chat
    }

    pub async fn update_chat(&self, id: &str, system: Option<String>) -> Result<Chat, StoreError> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::ChatNotFound(id.to_string()))?;
        chat.system = system.filter(|s| !s.is_empty());
        Ok(chat.clone())
    }

    pub async fn chat(&self, id: &str) -> Option<Chat> {
        self.inner.read().await.chats.iter().find(|c| c.id == id).cloned()
    }

    pub async fn chats(&self) -> Vec<Chat> {
        self.inner.read().await.chats.clone()
    }

    /// Messages of a chat in insertion order; empty for chats that don't exist.
    pub async fn messages(&self, chat_id: &str) -> Vec<Message> {
        self.inner
            .read()
            .await
            .messages
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Appends all messages or none.
    pub async fn append(&self, chat_id: &str, messages: Vec<Message>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let list = inner
            .messages
            .get_mut(chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))?;
        list.extend(messages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gab_shared::{MessageRole, UNKNOWN_CHAT_ID};

    #[tokio::test]
    async fn chats_are_listed_in_creation_order() {
        let store = ChatStore::new();
        let a = store.create_chat(None).await;
        let b = store.create_chat(Some("be brief".into())).await;

        let chats = store.chats().await;
        assert_eq!(chats, vec![a.clone(), b.clone()]);
        assert_ne!(a.id, b.id);
        assert_eq!(b.system.as_deref(), Some("be brief"));
    }

    #[tokio::test]
    async fn update_sets_and_clears_system_prompt() {
        let store = ChatStore::new();
        let chat = store.create_chat(None).await;

        let updated = store.update_chat(&chat.id, Some("terse".into())).await.unwrap();
        assert!(updated.is_system());
        let cleared = store.update_chat(&chat.id, Some(String::new())).await.unwrap();
        assert_eq!(cleared.system, None);
        assert_eq!(store.chat(&chat.id).await, Some(cleared));
    }

    #[tokio::test]
    async fn update_of_missing_chat_fails() {
        let store = ChatStore::new();
        let err = store.update_chat("nope", None).await.unwrap_err();
        assert_eq!(err, StoreError::ChatNotFound("nope".into()));
    }

    #[tokio::test]
    async fn unknown_chat_has_no_messages() {
        let store = ChatStore::new();
        assert!(store.messages(UNKNOWN_CHAT_ID).await.is_empty());
        assert!(store.append(UNKNOWN_CHAT_ID, vec![]).await.is_err());
    }

    #[tokio::test]
    async fn append_keeps_order() {
        let store = ChatStore::new();
        let chat = store.create_chat(None).await;
        let first = Message::user("1", &chat.id, "one");
        let mut second = Message::user("2", &chat.id, "two");
        second.role = MessageRole::Assistant;

        store.append(&chat.id, vec![first.clone(), second.clone()]).await.unwrap();
        assert_eq!(store.messages(&chat.id).await, vec![first, second]);
    }
}

use gab_shared::{Chat, Message};
use std::collections::HashMap;

/// Local copy of what the server returned for each query.
///
/// `set_*` replaces an entry outright. `update_*` only touches data that is
/// already loaded, so an updater never conjures a list out of nothing.
#[derive(Debug, Default)]
pub struct QueryCache {
    messages: HashMap<String, Vec<Message>>,
    chats: Option<Vec<Chat>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, chat_id: &str) -> Option<&[Message]> {
        self.messages.get(chat_id).map(Vec::as_slice)
    }

    pub fn has_messages(&self, chat_id: &str) -> bool {
        self.messages.contains_key(chat_id)
    }

    pub fn set_messages(&mut self, chat_id: &str, messages: Vec<Message>) {
        self.messages.insert(chat_id.to_string(), messages);
    }

    pub fn update_messages(&mut self, chat_id: &str, f: impl FnOnce(&mut Vec<Message>)) {
        if let Some(messages) = self.messages.get_mut(chat_id) {
            f(messages);
        }
    }

    pub fn chats(&self) -> Option<&[Chat]> {
        self.chats.as_deref()
    }

    pub fn set_chats(&mut self, chats: Vec<Chat>) {
        self.chats = Some(chats);
    }

    pub fn update_chats(&mut self, f: impl FnOnce(&mut Vec<Chat>)) {
        if let Some(chats) = self.chats.as_mut() {
            f(chats);
        }
    }
}

use gab_shared::ReplyUpdate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

struct Channel {
    tx: broadcast::Sender<ReplyUpdate>,
    /// Text of the reply in progress, `None` when idle.
    current: Option<String>,
}

impl Channel {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, current: None }
    }
}

/// Fans out replies being generated to everyone watching a chat.
///
/// Updates carry the whole text so far, so a lagging subscriber only needs
/// the latest one.
#[derive(Clone, Default)]
pub struct ReplyHub {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
}

impl ReplyHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks a reply as started for `chat_id`. Returns `None` while another
    /// reply for the same chat is still running.
    pub fn begin(&self, chat_id: &str) -> Option<ReplyHandle> {
        let mut channels = self.lock();
        let channel = channels.entry(chat_id.to_string()).or_insert_with(Channel::new);
        if channel.current.is_some() {
            return None;
        }
        channel.current = Some(String::new());
        let _ = channel.tx.send(ReplyUpdate {
            chat_id: chat_id.to_string(),
            content: String::new(),
            done: false,
        });
        debug!("Reply started for chat {}", chat_id);
        Some(ReplyHandle {
            hub: self.clone(),
            chat_id: chat_id.to_string(),
        })
    }

    /// Returns the reply in progress (if any) and a receiver for what follows.
    pub fn subscribe(&self, chat_id: &str) -> (Option<String>, broadcast::Receiver<ReplyUpdate>) {
        let mut channels = self.lock();
        let channel = channels.entry(chat_id.to_string()).or_insert_with(Channel::new);
        (channel.current.clone(), channel.tx.subscribe())
    }

    /// Drops idle channels nobody listens to anymore.
    pub fn release(&self, chat_id: &str) {
        let mut channels = self.lock();
        if let Some(channel) = channels.get(chat_id) {
            if channel.current.is_none() && channel.tx.receiver_count() == 0 {
                channels.remove(chat_id);
            }
        }
    }

    #[cfg(test)]
    pub fn in_progress(&self, chat_id: &str) -> Option<String> {
        self.lock().get(chat_id).and_then(|c| c.current.clone())
    }

    fn push(&self, chat_id: &str, delta: &str) {
        let mut channels = self.lock();
        if let Some(channel) = channels.get_mut(chat_id) {
            let content = channel.current.get_or_insert_with(String::new);
            content.push_str(delta);
            let update = ReplyUpdate {
                chat_id: chat_id.to_string(),
                content: content.clone(),
                done: false,
            };
            let _ = channel.tx.send(update);
        }
    }

    fn end(&self, chat_id: &str) {
        let mut channels = self.lock();
        let Some(channel) = channels.get_mut(chat_id) else {
            return;
        };
        let content = channel.current.take().unwrap_or_default();
        let _ = channel.tx.send(ReplyUpdate {
            chat_id: chat_id.to_string(),
            content,
            done: true,
        });
        if channel.tx.receiver_count() == 0 {
            channels.remove(chat_id);
        }
        debug!("Reply finished for chat {}", chat_id);
    }
}

/// Live reply for one chat. Dropping it ends the reply.
pub struct ReplyHandle {
    hub: ReplyHub,
    chat_id: String,
}

impl ReplyHandle {
    pub fn push(&self, delta: &str) {
        self.hub.push(&self.chat_id, delta);
    }

    pub fn finish(self) {}
}

impl Drop for ReplyHandle {
    fn drop(&mut self) {
        self.hub.end(&self.chat_id);
    }
}

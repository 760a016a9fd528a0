//! Chat view state and the optimistic send protocol.
//!
//! A message typed by the user is shown immediately under a client-generated
//! reference id. When the server answers, the message carrying that reference
//! is swapped for the stored question and the reply is appended after it.

use crate::cache::QueryCache;
use crate::client::{ApiError, ChatApi};
use gab_shared::{
    is_prompt_command, Chat, Message, MessageRole, ReplyUpdate, SendMessageRequest,
    SendMessageResponse, UNKNOWN_CHAT_ID,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const EMPTY_CHAT_HINT: &str = "No messages exist. Let's start by asking your first question";

/// Reply text received so far for the message being sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyDraft {
    pub chat_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Create,
    Update,
    Send,
}

#[derive(Debug)]
pub struct ChatState {
    pub chat_id: String,
    pub cache: QueryCache,
    creating: usize,
    updating: usize,
    sending: usize,
    reply: Option<ReplyDraft>,
    pub error: Option<String>,
    /// Lines scrolled up from the bottom, 0 keeps following new output.
    pub scroll_offset: usize,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatState {
    pub fn new() -> Self {
        Self {
            chat_id: UNKNOWN_CHAT_ID.to_string(),
            cache: QueryCache::new(),
            creating: 0,
            updating: 0,
            sending: 0,
            reply: None,
            error: None,
            scroll_offset: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.cache.messages(&self.chat_id).unwrap_or(&[])
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.has_messages(&self.chat_id)
    }

    pub fn is_loading(&self) -> bool {
        self.creating > 0 || self.updating > 0 || self.sending > 0
    }

    pub fn wait_for_reply(&self) -> bool {
        self.creating > 0 || self.sending > 0
    }

    pub fn reply(&self) -> Option<&ReplyDraft> {
        self.reply.as_ref()
    }

    /// The assistant bubble shown while a reply is pending. Its content is
    /// empty until the first piece of the reply arrives.
    pub fn typing_message(&self) -> Option<Message> {
        if !self.wait_for_reply() {
            return None;
        }
        Some(Message {
            id: String::new(),
            role: MessageRole::Assistant,
            content: self
                .reply
                .as_ref()
                .map(|draft| draft.content.clone())
                .unwrap_or_default(),
            chat_id: self.chat_id.clone(),
            usage: None,
        })
    }

    pub fn insert_user_message(&mut self, chat_id: &str, reference: &str, content: &str) {
        let message = Message::user(reference, chat_id, content);
        self.cache.update_messages(chat_id, |messages| messages.push(message));
    }

    /// Swaps the optimistic message for the confirmed question and appends
    /// the reply, in the list of the chat the server answered for.
    pub fn reconcile(&mut self, reference: &str, response: &SendMessageResponse) {
        let SendMessageResponse {
            chat_id,
            question,
            reply,
        } = response;
        self.cache.update_messages(chat_id, |messages| {
            for message in messages.iter_mut().filter(|m| m.id == reference) {
                *message = question.clone();
            }
            messages.push(reply.clone());
        });
    }

    pub fn add_chat(&mut self, chat: Chat) {
        self.cache.update_chats(|chats| {
            if !chats.iter().any(|c| c.id == chat.id) {
                chats.push(chat);
            }
        });
    }

    pub fn replace_chat(&mut self, chat: &Chat) {
        self.cache.update_chats(|chats| {
            for existing in chats.iter_mut().filter(|c| c.id == chat.id) {
                *existing = chat.clone();
            }
        });
    }

    pub fn current_chat(&self) -> Option<&Chat> {
        self.cache.chats()?.iter().find(|c| c.id == self.chat_id)
    }

    pub fn goto_chat(&mut self, chat_id: &str) {
        if self.chat_id != chat_id {
            debug!("Switching to chat {}", chat_id);
        }
        self.chat_id = chat_id.to_string();
        self.error = None;
        self.scroll_to_bottom();
    }

    /// Id of the chat `step` places away in the sidebar order, where the
    /// not-yet-created chat comes first.
    pub fn adjacent_chat(&self, step: isize) -> Option<String> {
        let mut ids = vec![UNKNOWN_CHAT_ID.to_string()];
        ids.extend(self.cache.chats().unwrap_or(&[]).iter().map(|c| c.id.clone()));
        let current = ids.iter().position(|id| *id == self.chat_id)?;
        let target = current
            .checked_add_signed(step)?
            .min(ids.len().saturating_sub(1));
        (target != current).then(|| ids[target].clone())
    }

    pub fn apply_reply_update(&mut self, update: ReplyUpdate) {
        if let Some(draft) = self.reply.as_mut() {
            if draft.chat_id == update.chat_id {
                draft.content = update.content;
            }
        }
    }

    pub fn scroll_up(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_add(amount);
    }

    pub fn scroll_down(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(amount);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    fn begin(&mut self, mutation: Mutation) {
        *self.counter(mutation) += 1;
    }

    fn end(&mut self, mutation: Mutation) {
        let counter = self.counter(mutation);
        *counter = counter.saturating_sub(1);
        if self.sending == 0 {
            self.reply = None;
        }
    }

    fn counter(&mut self, mutation: Mutation) -> &mut usize {
        match mutation {
            Mutation::Create => &mut self.creating,
            Mutation::Update => &mut self.updating,
            Mutation::Send => &mut self.sending,
        }
    }
}

/// Runs chat operations against the backend and keeps [`ChatState`] in step.
/// Every state change is followed by a redraw notification.
pub struct ChatController<A> {
    api: Arc<A>,
    state: Arc<Mutex<ChatState>>,
    redraw: mpsc::UnboundedSender<()>,
}

impl<A> Clone for ChatController<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            state: self.state.clone(),
            redraw: self.redraw.clone(),
        }
    }
}

impl<A: ChatApi> ChatController<A> {
    pub fn new(api: Arc<A>, redraw: mpsc::UnboundedSender<()>) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(ChatState::new())),
            redraw,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        let _ = self.redraw.send(());
    }

    fn report(&self, e: ApiError) {
        error!("{}", e);
        self.state().error = Some(e.to_string());
    }

    pub async fn load_chats(&self) {
        match self.api.chats().await {
            Ok(chats) => {
                info!("Loaded {} chats", chats.len());
                self.state().cache.set_chats(chats);
            }
            Err(e) => self.report(e),
        }
        self.notify();
    }

    /// Shows a chat, fetching its messages unless they are already cached.
    /// The not-yet-created chat always starts out empty.
    pub async fn open_chat(&self, chat_id: &str) {
        let cached = {
            let mut state = self.state();
            state.goto_chat(chat_id);
            if chat_id == UNKNOWN_CHAT_ID {
                state.cache.set_messages(UNKNOWN_CHAT_ID, Vec::new());
            }
            state.cache.has_messages(chat_id)
        };
        self.notify();
        if cached {
            return;
        }

        match self.api.messages(chat_id).await {
            Ok(messages) => {
                let mut state = self.state();
                state.cache.set_messages(chat_id, messages);
                if state.chat_id == chat_id {
                    state.scroll_to_bottom();
                }
            }
            Err(e) => self.report(e),
        }
        self.notify();
    }

    /// Handles a line submitted from the input box.
    pub async fn handle_send_message(&self, content: String) {
        let system = is_prompt_command(&content);
        let reference = Uuid::new_v4().to_string();
        let chat_id = {
            let mut state = self.state();
            state.error = None;
            state.chat_id.clone()
        };

        let result = if chat_id == UNKNOWN_CHAT_ID {
            self.start_chat(content, system, reference).await
        } else if let Some(system) = system {
            self.update_chat(&chat_id, system).await
        } else {
            self.send_message(&chat_id, content, reference)
                .await
                .map(|_| ())
        };

        if let Err(e) = result {
            self.report(e);
        }
        self.notify();
    }

    /// First message of a chat that doesn't exist yet: create it, send the
    /// message unless it was a prompt command, then switch over to it.
    async fn start_chat(
        &self,
        content: String,
        system: Option<String>,
        reference: String,
    ) -> Result<(), ApiError> {
        let is_command = system.is_some();
        if !is_command {
            self.state()
                .insert_user_message(UNKNOWN_CHAT_ID, &reference, &content);
            self.notify();
        }

        let chat = self.create_chat(system).await?;

        if !is_command {
            let response = self.send_message(&chat.id, content, reference).await?;
            let messages = vec![response.question, response.reply];
            let mut state = self.state();
            state.cache.set_messages(UNKNOWN_CHAT_ID, messages.clone());
            state.cache.set_messages(&chat.id, messages);
        }

        self.open_chat(&chat.id).await;
        Ok(())
    }

    async fn create_chat(&self, system: Option<String>) -> Result<Chat, ApiError> {
        self.state().begin(Mutation::Create);
        self.notify();
        let result = self.api.create_chat(system).await;
        self.state().end(Mutation::Create);

        let chat = result?;
        info!("Created chat {}", chat.id);
        self.state().add_chat(chat.clone());
        Ok(chat)
    }

    async fn update_chat(&self, chat_id: &str, system: String) -> Result<(), ApiError> {
        self.state().begin(Mutation::Update);
        self.notify();
        let result = self.api.update_chat(chat_id, Some(system)).await;
        self.state().end(Mutation::Update);

        let chat = result?;
        info!("Updated system prompt of chat {}", chat.id);
        self.state().replace_chat(&chat);
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: &str,
        content: String,
        reference: String,
    ) -> Result<SendMessageResponse, ApiError> {
        {
            let mut state = self.state();
            state.insert_user_message(chat_id, &reference, &content);
            state.begin(Mutation::Send);
            state.reply = Some(ReplyDraft {
                chat_id: chat_id.to_string(),
                content: String::new(),
            });
        }
        self.notify();

        let follower = self.follow_reply(chat_id).await;
        let request = SendMessageRequest {
            content,
            reference: reference.clone(),
        };
        let result = self.api.send_message(chat_id, request).await;
        if let Some(follower) = follower {
            follower.abort();
        }

        let mut state = self.state();
        state.end(Mutation::Send);
        let response = result?;
        state.reconcile(&reference, &response);
        Ok(response)
    }

    async fn follow_reply(&self, chat_id: &str) -> Option<JoinHandle<()>> {
        match self.api.subscribe_reply(chat_id).await {
            Ok(mut rx) => {
                let this = self.clone();
                Some(tokio::spawn(async move {
                    while let Some(update) = rx.recv().await {
                        this.state().apply_reply_update(update);
                        this.notify();
                    }
                }))
            }
            Err(e) => {
                warn!("Not following reply for chat {}: {}", chat_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gab_shared::Usage;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeApi {
        calls: Mutex<Vec<&'static str>>,
        next_id: AtomicUsize,
        fail_send: bool,
        create_gate: Option<Arc<Notify>>,
        send_gate: Option<Arc<Notify>>,
        messages_gate: Option<Arc<Notify>>,
        reply_tx: Mutex<Option<mpsc::UnboundedSender<ReplyUpdate>>>,
        stored: Mutex<HashMap<String, Vec<Message>>>,
    }

    impl FakeApi {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn id(&self, prefix: &str) -> String {
            format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn chats(&self) -> Result<Vec<Chat>, ApiError> {
            self.record("chats");
            Ok(Vec::new())
        }

        async fn create_chat(&self, system: Option<String>) -> Result<Chat, ApiError> {
            self.record("create");
            if let Some(gate) = &self.create_gate {
                gate.notified().await;
            }
            Ok(Chat {
                id: self.id("chat"),
                system,
            })
        }

        async fn update_chat(&self, id: &str, system: Option<String>) -> Result<Chat, ApiError> {
            self.record("update");
            Ok(Chat {
                id: id.to_string(),
                system,
            })
        }

        async fn messages(&self, chat_id: &str) -> Result<Vec<Message>, ApiError> {
            self.record("messages");
            if let Some(gate) = &self.messages_gate {
                gate.notified().await;
            }
            Ok(self
                .stored
                .lock()
                .unwrap()
                .get(chat_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn send_message(
            &self,
            chat_id: &str,
            request: SendMessageRequest,
        ) -> Result<SendMessageResponse, ApiError> {
            self.record("send");
            if let Some(gate) = &self.send_gate {
                gate.notified().await;
            }
            if self.fail_send {
                return Err(ApiError::Status {
                    status: 502,
                    message: "completion failed".into(),
                });
            }
            let question = Message {
                id: self.id("q"),
                role: MessageRole::User,
                content: request.content.clone(),
                chat_id: chat_id.to_string(),
                usage: None,
            };
            let reply = Message {
                id: self.id("a"),
                role: MessageRole::Assistant,
                content: format!("echo: {}", request.content),
                chat_id: chat_id.to_string(),
                usage: Some(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 2,
                    total_tokens: 3,
                }),
            };
            Ok(SendMessageResponse {
                chat_id: chat_id.to_string(),
                question,
                reply,
            })
        }

        async fn subscribe_reply(
            &self,
            _chat_id: &str,
        ) -> Result<mpsc::UnboundedReceiver<ReplyUpdate>, ApiError> {
            self.record("subscribe");
            let (tx, rx) = mpsc::unbounded_channel();
            *self.reply_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }

    fn controller(api: FakeApi) -> (ChatController<FakeApi>, Arc<FakeApi>) {
        let api = Arc::new(api);
        let (tx, _rx) = mpsc::unbounded_channel();
        (ChatController::new(api.clone(), tx), api)
    }

    fn with_chat(controller: &ChatController<FakeApi>, chat_id: &str, messages: Vec<Message>) {
        let mut state = controller.state();
        state.cache.set_chats(vec![Chat {
            id: chat_id.to_string(),
            system: None,
        }]);
        state.cache.set_messages(chat_id, messages);
        state.goto_chat(chat_id);
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition was never met");
    }

    #[tokio::test]
    async fn confirmed_message_replaces_the_optimistic_one() {
        let (controller, api) = controller(FakeApi::default());
        let earlier = Message::user("old", "c1", "earlier");
        with_chat(&controller, "c1", vec![earlier.clone()]);

        controller.handle_send_message("hello".into()).await;

        let state = controller.state();
        let messages = state.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], earlier);
        assert_eq!(messages[1].id, "q-1");
        assert_eq!(messages[1].content, "hello");
        assert_eq!(messages[2].role, MessageRole::Assistant);
        assert_eq!(messages[2].content, "echo: hello");
        assert!(!state.is_loading());
        assert!(state.typing_message().is_none());
        assert_eq!(api.calls(), vec!["subscribe", "send"]);
    }

    #[tokio::test]
    async fn optimistic_message_and_reply_show_while_sending() {
        let gate = Arc::new(Notify::new());
        let (controller, api) = controller(FakeApi {
            send_gate: Some(gate.clone()),
            ..Default::default()
        });
        with_chat(&controller, "c1", Vec::new());

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.handle_send_message("hello".into()).await }
        });
        eventually(|| api.calls().contains(&"send")).await;

        {
            let state = controller.state();
            let pending = &state.messages()[0];
            assert_eq!(pending.content, "hello");
            assert!(pending.is_user());
            assert!(!pending.id.starts_with("q-"));
            assert!(state.is_loading());
            assert!(state.wait_for_reply());
            assert_eq!(state.typing_message().unwrap().content, "");
        }

        let reply_tx = api.reply_tx.lock().unwrap().clone().unwrap();
        reply_tx
            .send(ReplyUpdate {
                chat_id: "c1".into(),
                content: "Hel".into(),
                done: false,
            })
            .unwrap();
        eventually(|| {
            controller
                .state()
                .typing_message()
                .is_some_and(|m| m.content == "Hel")
        })
        .await;

        gate.notify_one();
        task.await.unwrap();

        let state = controller.state();
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[0].id, "q-1");
        assert!(state.reply().is_none());
    }

    #[tokio::test]
    async fn first_message_creates_the_chat_and_moves_to_it() {
        let gate = Arc::new(Notify::new());
        let (controller, api) = controller(FakeApi {
            create_gate: Some(gate.clone()),
            ..Default::default()
        });
        controller.state().cache.set_chats(Vec::new());
        controller.open_chat(UNKNOWN_CHAT_ID).await;

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.handle_send_message("hi".into()).await }
        });
        eventually(|| api.calls().contains(&"create")).await;

        {
            let state = controller.state();
            assert_eq!(state.chat_id, UNKNOWN_CHAT_ID);
            assert_eq!(state.messages().len(), 1);
            assert_eq!(state.messages()[0].chat_id, UNKNOWN_CHAT_ID);
            assert!(state.wait_for_reply());
        }

        gate.notify_one();
        task.await.unwrap();

        let state = controller.state();
        assert_eq!(state.chat_id, "chat-1");
        let contents: Vec<_> = state.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "echo: hi"]);
        assert_eq!(
            state.cache.messages(UNKNOWN_CHAT_ID),
            state.cache.messages("chat-1")
        );
        assert_eq!(state.cache.chats().unwrap().len(), 1);
        assert!(!state.is_loading());
        assert_eq!(api.calls(), vec!["create", "subscribe", "send"]);
    }

    #[tokio::test]
    async fn prompt_command_in_new_chat_only_creates_it() {
        let (controller, api) = controller(FakeApi::default());
        controller.state().cache.set_chats(Vec::new());
        controller.open_chat(UNKNOWN_CHAT_ID).await;

        controller.handle_send_message("/system be brief".into()).await;

        let state = controller.state();
        assert_eq!(state.chat_id, "chat-1");
        assert!(state.messages().is_empty());
        assert!(state.cache.messages(UNKNOWN_CHAT_ID).unwrap().is_empty());
        assert_eq!(
            state.current_chat().and_then(|c| c.system.clone()).as_deref(),
            Some("be brief")
        );
        assert_eq!(api.calls(), vec!["create", "messages"]);
    }

    #[tokio::test]
    async fn prompt_command_in_existing_chat_updates_it() {
        let (controller, api) = controller(FakeApi::default());
        with_chat(&controller, "c1", Vec::new());

        controller.handle_send_message("/reviewer".into()).await;

        let state = controller.state();
        assert!(state.messages().is_empty());
        assert!(state.current_chat().unwrap().is_system());
        assert_eq!(api.calls(), vec!["update"]);
    }

    #[tokio::test]
    async fn failed_send_keeps_the_message_and_reports() {
        let (controller, _) = controller(FakeApi {
            fail_send: true,
            ..Default::default()
        });
        with_chat(&controller, "c1", Vec::new());

        controller.handle_send_message("hello".into()).await;

        let state = controller.state();
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].content, "hello");
        assert!(state.error.as_deref().unwrap().contains("completion failed"));
        assert!(!state.is_loading());
        assert!(state.typing_message().is_none());
    }

    #[tokio::test]
    async fn opening_a_chat_fetches_once() {
        let api = FakeApi::default();
        api.stored
            .lock()
            .unwrap()
            .insert("c9".into(), vec![Message::user("m1", "c9", "stored")]);
        let (controller, api) = controller(api);

        controller.open_chat("c9").await;
        controller.open_chat("c9").await;

        assert_eq!(controller.state().messages().len(), 1);
        assert_eq!(api.calls(), vec!["messages"]);
    }

    #[tokio::test]
    async fn finished_load_jumps_to_the_bottom() {
        let gate = Arc::new(Notify::new());
        let api = FakeApi {
            messages_gate: Some(gate.clone()),
            ..Default::default()
        };
        api.stored
            .lock()
            .unwrap()
            .insert("c9".into(), vec![Message::user("m1", "c9", "stored")]);
        let (controller, api) = controller(api);

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.open_chat("c9").await }
        });
        eventually(|| api.calls().contains(&"messages")).await;
        controller.state().scroll_up(5);

        gate.notify_one();
        task.await.unwrap();

        let state = controller.state();
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.scroll_offset, 0);
    }

    #[test]
    fn reconcile_targets_the_answered_chat() {
        let mut state = ChatState::new();
        state.cache.set_messages("a", vec![Message::user("r1", "a", "x")]);
        state.cache.set_messages("b", vec![Message::user("r1", "b", "x")]);

        let mut question = Message::user("q", "b", "x");
        question.id = "q".into();
        let mut reply = Message::user("a", "b", "y");
        reply.role = MessageRole::Assistant;
        state.reconcile(
            "r1",
            &SendMessageResponse {
                chat_id: "b".into(),
                question: question.clone(),
                reply: reply.clone(),
            },
        );

        assert_eq!(state.cache.messages("a").unwrap()[0].id, "r1");
        assert_eq!(state.cache.messages("b").unwrap(), &[question, reply][..]);
    }

    #[test]
    fn reply_updates_for_other_chats_are_ignored() {
        let mut state = ChatState::new();
        state.reply = Some(ReplyDraft {
            chat_id: "a".into(),
            content: String::new(),
        });
        state.apply_reply_update(ReplyUpdate {
            chat_id: "b".into(),
            content: "nope".into(),
            done: false,
        });
        assert_eq!(state.reply().unwrap().content, "");
    }

    #[test]
    fn adjacent_chat_walks_the_sidebar() {
        let mut state = ChatState::new();
        state.cache.set_chats(vec![
            Chat {
                id: "a".into(),
                system: None,
            },
            Chat {
                id: "b".into(),
                system: None,
            },
        ]);
        assert_eq!(state.adjacent_chat(1).as_deref(), Some("a"));
        assert_eq!(state.adjacent_chat(-1), None);

        state.goto_chat("b");
        assert_eq!(state.adjacent_chat(1), None);
        assert_eq!(state.adjacent_chat(-2).as_deref(), Some(UNKNOWN_CHAT_ID));
    }
}

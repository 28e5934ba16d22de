//! In-memory view of the selected conversation, kept consistent with storage
//! while replies stream in.
//!
//! Every stream is bound to the conversation it was started for. Its updates
//! are matched by that conversation id and by
//! [`MessageId::Streaming`](crate::models::MessageId::Streaming), never
//! by "whatever is selected now", so switching conversations mid-stream cannot
//! leak text into the wrong list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chat_relay_wire::ChatRequest;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::collaborators::{PersistenceCoordinator, StreamTransport, TitleSuggester};
use crate::error::{ClientError, ValidationError};
use crate::models::{Conversation, Message, Role};
use crate::stream::ClientStreamConsumer;

/// One-shot guard for [`ConversationController::initialize`].
#[derive(Debug, Default)]
pub struct InitToken(AtomicBool);

impl InitToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for exactly one caller.
    pub fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    /// Nothing selected; the next send creates a conversation.
    Empty,
    /// Selected but holds no messages yet.
    AwaitingFirstTurn,
    Ready,
    Streaming,
}

struct InFlight {
    text: String,
    cancel: CancellationToken,
}

struct ControllerState {
    selected: Option<i64>,
    messages: Vec<Message>,
    conversations: Vec<Conversation>,
    in_flight: HashMap<i64, InFlight>,
    role: Option<String>,
    /// False while the selected conversation's messages are being fetched.
    loaded: bool,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            selected: None,
            messages: Vec::new(),
            conversations: Vec::new(),
            in_flight: HashMap::new(),
            role: None,
            loaded: true,
        }
    }
}

impl ControllerState {
    fn is_selected(&self, conversation_id: i64) -> bool {
        self.selected == Some(conversation_id)
    }

    fn placeholder_mut(&mut self, conversation_id: i64) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.id.is_streaming() && m.conversation_id == conversation_id)
    }

    /// Adds the placeholder unless one is already there.
    fn attach_placeholder(&mut self, conversation_id: i64, text: &str) {
        if self.placeholder_mut(conversation_id).is_none() {
            let mut placeholder = Message::placeholder(conversation_id);
            placeholder.content.push_str(text);
            self.messages.push(placeholder);
        }
    }

    fn remove_placeholder(&mut self, conversation_id: i64) {
        self.messages
            .retain(|m| !(m.id.is_streaming() && m.conversation_id == conversation_id));
    }

    fn upsert_conversation(&mut self, conversation: Conversation) {
        match self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.conversations.insert(0, conversation),
        }
    }
}

struct Inner {
    persistence: Arc<dyn PersistenceCoordinator>,
    titles: Arc<dyn TitleSuggester>,
    consumer: ClientStreamConsumer,
    state: Mutex<ControllerState>,
    init: InitToken,
    changes: watch::Sender<()>,
}

/// Source of truth for the client's conversation list and the messages of
/// the selected conversation.
///
/// Cheap to clone; clones share state, so a UI can hold one while another
/// drives [`send_message`](Self::send_message) on a spawned task.
#[derive(Clone)]
pub struct ConversationController {
    inner: Arc<Inner>,
}

impl ConversationController {
    pub fn new(
        persistence: Arc<dyn PersistenceCoordinator>,
        titles: Arc<dyn TitleSuggester>,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        let (changes, _) = watch::channel(());
        Self {
            inner: Arc::new(Inner {
                persistence,
                titles,
                consumer: ClientStreamConsumer::new(transport),
                state: Mutex::new(ControllerState::default()),
                init: InitToken::new(),
                changes,
            }),
        }
    }

    pub fn from_api(api: ApiClient) -> Self {
        let api = Arc::new(api);
        Self::new(api.clone(), api.clone(), api)
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.inner.changes.send_replace(());
    }

    /// Fires after every visible change.
    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.inner.changes.subscribe()
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn messages(&self) -> Vec<Message> {
        self.state().messages.clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state().conversations.clone()
    }

    pub fn selected_conversation(&self) -> Option<i64> {
        self.state().selected
    }

    pub fn role(&self) -> Option<String> {
        self.state().role.clone()
    }

    pub fn is_streaming(&self, conversation_id: i64) -> bool {
        self.state().in_flight.contains_key(&conversation_id)
    }

    pub fn phase(&self) -> ConversationPhase {
        let state = self.state();
        match state.selected {
            None if state.messages.is_empty() => ConversationPhase::Empty,
            Some(id) if state.in_flight.contains_key(&id) => ConversationPhase::Streaming,
            _ if state.messages.is_empty() => ConversationPhase::AwaitingFirstTurn,
            _ => ConversationPhase::Ready,
        }
    }

    // ── Setup ─────────────────────────────────────────────────────────────────

    /// Loads the conversation list. Only the first call does anything;
    /// returns whether this call was it.
    pub async fn initialize(&self) -> Result<bool, ClientError> {
        if !self.inner.init.claim() {
            debug!("controller already initialized");
            return Ok(false);
        }
        let conversations = self.inner.persistence.list_conversations().await?;
        info!(count = conversations.len(), "conversations loaded");
        self.state().conversations = conversations;
        self.notify();
        Ok(true)
    }

    pub fn set_role(&self, key: impl Into<String>) {
        self.state().role = Some(key.into());
    }

    // ── Navigation ────────────────────────────────────────────────────────────

    /// Shows a conversation. A stream still running for it is re-attached
    /// with the text received so far; streams for other conversations keep
    /// running in the background.
    pub async fn select_conversation(&self, id: i64) -> Result<(), ClientError> {
        {
            let mut state = self.state();
            state.selected = Some(id);
            state.messages.clear();
            state.loaded = false;
        }
        self.notify();

        let loaded = match self.inner.persistence.list_messages(id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                let mut state = self.state();
                if state.is_selected(id) {
                    state.loaded = true;
                }
                return Err(e);
            }
        };

        {
            let mut state = self.state();
            if !state.is_selected(id) {
                debug!(conversation_id = id, "selection changed while loading");
                return Ok(());
            }
            // A reply stored while the fetch was running may be missing from it.
            let arrived: Vec<Message> = state
                .messages
                .drain(..)
                .filter(|m| !m.id.is_streaming() && !loaded.iter().any(|l| l.id == m.id))
                .collect();
            state.messages = loaded;
            state.messages.extend(arrived);
            state.loaded = true;
            if let Some(text) = state.in_flight.get(&id).map(|f| f.text.clone()) {
                state.attach_placeholder(id, &text);
            }
        }
        self.notify();
        Ok(())
    }

    /// Clears the view; the next send creates the conversation.
    pub fn new_conversation(&self) {
        {
            let mut state = self.state();
            state.selected = None;
            state.messages.clear();
            state.loaded = true;
        }
        self.notify();
    }

    pub async fn rename_conversation(&self, id: i64, title: &str) -> Result<(), ClientError> {
        let renamed = self.inner.persistence.rename_conversation(id, title).await?;
        self.state().upsert_conversation(renamed);
        self.notify();
        Ok(())
    }

    /// Deletes the conversation, stopping its stream if one is running.
    pub async fn delete_conversation(&self, id: i64) -> Result<(), ClientError> {
        self.stop_generating(id);
        self.inner.persistence.delete_conversation(id).await?;
        {
            let mut state = self.state();
            state.conversations.retain(|c| c.id != id);
            if state.is_selected(id) {
                state.selected = None;
                state.messages.clear();
                state.loaded = true;
            }
        }
        self.notify();
        Ok(())
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Stops the stream running for `conversation_id`. Returns false if none
    /// was running.
    pub fn stop_generating(&self, conversation_id: i64) -> bool {
        match self.state().in_flight.get(&conversation_id) {
            Some(flight) => {
                info!(conversation_id, "stopping generation");
                flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Runs one exchange: stores the user turn, streams the reply into a
    /// placeholder and replaces it with the stored assistant message.
    ///
    /// On failure the placeholder is removed and the error returned; the user
    /// turn stays stored. Validation errors leave everything untouched.
    pub async fn send_message(&self, text: &str) -> Result<Message, ClientError> {
        let (selected, role, first_turn) = {
            let state = self.state();
            let role = state.role.clone().ok_or(ValidationError::NoRoleSelected)?;
            if text.trim().is_empty() {
                return Err(ValidationError::EmptyMessage.into());
            }
            if !state.loaded {
                return Err(ValidationError::ConversationLoading.into());
            }
            if let Some(id) = state.selected {
                if state.in_flight.contains_key(&id) {
                    return Err(ValidationError::StreamInFlight.into());
                }
            }
            (state.selected, role, state.messages.is_empty())
        };

        let conversation_id = match selected {
            Some(id) => id,
            None => self.start_conversation().await?,
        };

        let cancel = CancellationToken::new();
        {
            let mut state = self.state();
            if state.in_flight.contains_key(&conversation_id) {
                return Err(ValidationError::StreamInFlight.into());
            }
            state
                .in_flight
                .insert(conversation_id, InFlight { text: String::new(), cancel: cancel.clone() });
        }

        let user_message = match self
            .inner
            .persistence
            .create_message(conversation_id, Role::User, text)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                self.state().in_flight.remove(&conversation_id);
                self.notify();
                return Err(e);
            }
        };

        {
            let mut state = self.state();
            if state.is_selected(conversation_id) {
                state.messages.push(user_message);
                state.attach_placeholder(conversation_id, "");
            }
        }
        self.notify();

        let request = ChatRequest {
            conversation_id: Some(conversation_id),
            message: text.to_string(),
            role: Some(role),
        };
        match self.stream_reply(conversation_id, &request, &cancel).await {
            Ok(assistant) => {
                if first_turn {
                    self.apply_suggested_title(conversation_id, text).await;
                }
                self.refresh_conversations().await;
                Ok(assistant)
            }
            Err(e) => {
                warn!(conversation_id, "exchange failed: {e}");
                {
                    let mut state = self.state();
                    state.in_flight.remove(&conversation_id);
                    state.remove_placeholder(conversation_id);
                }
                self.notify();
                Err(e)
            }
        }
    }

    async fn start_conversation(&self) -> Result<i64, ClientError> {
        let conversation = self.inner.persistence.create_conversation(None).await?;
        let id = conversation.id;
        info!(conversation_id = id, "conversation started");
        {
            let mut state = self.state();
            state.upsert_conversation(conversation);
            if state.selected.is_none() {
                state.selected = Some(id);
                state.messages.clear();
                state.loaded = true;
            }
        }
        self.notify();
        Ok(id)
    }

    /// Streams the reply and stores it. The placeholder is swapped for the
    /// stored message in the same critical section that ends the flight.
    async fn stream_reply(
        &self,
        conversation_id: i64,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Message, ClientError> {
        let final_text = self
            .inner
            .consumer
            .consume(request, cancel, |text| {
                {
                    let mut state = self.state();
                    if let Some(flight) = state.in_flight.get_mut(&conversation_id) {
                        flight.text.clear();
                        flight.text.push_str(text);
                    }
                    if state.is_selected(conversation_id) {
                        if let Some(placeholder) = state.placeholder_mut(conversation_id) {
                            placeholder.content.clear();
                            placeholder.content.push_str(text);
                        }
                    }
                }
                self.notify();
            })
            .await?;

        let assistant = self
            .inner
            .persistence
            .create_message(conversation_id, Role::Assistant, &final_text)
            .await?;

        {
            let mut state = self.state();
            state.in_flight.remove(&conversation_id);
            if state.is_selected(conversation_id) {
                let shown = state.messages.iter().any(|m| m.id == assistant.id);
                match state.placeholder_mut(conversation_id) {
                    Some(placeholder) => *placeholder = assistant.clone(),
                    None if !shown => state.messages.push(assistant.clone()),
                    None => {}
                }
            }
        }
        self.notify();
        Ok(assistant)
    }

    async fn apply_suggested_title(&self, conversation_id: i64, first_message: &str) {
        let title = match self.inner.titles.suggest_title(first_message).await {
            Ok(title) if !title.trim().is_empty() => title,
            Ok(_) => return,
            Err(e) => {
                warn!(conversation_id, "title suggestion failed: {e}");
                return;
            }
        };
        match self.inner.persistence.rename_conversation(conversation_id, &title).await {
            Ok(renamed) => {
                self.state().upsert_conversation(renamed);
                self.notify();
            }
            Err(e) => warn!(conversation_id, "could not apply title: {e}"),
        }
    }

    /// Reloads the list so the conversation just used sorts first.
    async fn refresh_conversations(&self) {
        match self.inner.persistence.list_conversations().await {
            Ok(conversations) => {
                self.state().conversations = conversations;
                self.notify();
            }
            Err(e) => warn!("could not refresh conversations: {e}"),
        }
    }
}

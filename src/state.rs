use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{Message, MessageUpdate, NewMessage};

/// Fixed name of the persisted chat record.
pub const STORAGE_KEY: &str = "cag-chat-storage";

/// Location of the persisted record inside `dir`.
pub fn storage_path(dir: &Path) -> PathBuf {
    dir.join(format!("{STORAGE_KEY}.json"))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Ordered chat history plus the current session id and the busy flag.
///
/// Only `messages` and `session_id` are persisted; `is_loading` always starts false
/// because no in-flight job survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStore {
    messages: Vec<Message>,
    session_id: String,
    #[serde(skip)]
    is_loading: bool,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self { messages: Vec::new(), session_id: new_id(), is_loading: false }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Appends a message under a fresh id and returns that id.
    pub fn add_message(&mut self, message: NewMessage) -> String {
        let id = new_id();
        self.messages.push(message.into_message(id.clone()));
        id
    }

    /// Appends a message under an id chosen by the caller, so the caller can target it later.
    pub fn add_message_with_id(
        &mut self,
        id: impl Into<String>,
        message: NewMessage,
    ) -> Result<(), StoreError> {
        let id = id.into();
        if self.message(&id).is_some() {
            return Err(StoreError::DuplicateMessage { id });
        }
        self.messages.push(message.into_message(id));
        Ok(())
    }

    /// Appends a user turn and the reply slot that will answer it, or neither.
    ///
    /// Fails without touching the history if `reply_id` is already taken.
    pub fn add_exchange(
        &mut self,
        user: NewMessage,
        reply_id: impl Into<String>,
        reply: NewMessage,
    ) -> Result<(), StoreError> {
        let reply_id = reply_id.into();
        if self.message(&reply_id).is_some() {
            return Err(StoreError::DuplicateMessage { id: reply_id });
        }
        self.add_message(user);
        self.messages.push(reply.into_message(reply_id));
        Ok(())
    }

    /// Merges `update` into the message with `id`. Returns false if there is no such message.
    pub fn update_message(&mut self, id: &str, update: MessageUpdate) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                update.apply(message);
                true
            }
            None => false,
        }
    }

    /// Drops the history and starts a new session.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.session_id = new_id();
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Loads the record at `path`; a missing file yields a fresh store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No chat storage at {}; starting a new session", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let store: Self = serde_json::from_slice(&raw)?;
        debug!(
            "Loaded {} messages for session {} from {}",
            store.messages.len(),
            store.session_id,
            path.display()
        );
        Ok(store)
    }

    /// Writes the record to `path` via a temporary sibling so a crash never leaves half a file.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        debug!("Saved {} messages to {}", self.messages.len(), path.display());
        Ok(())
    }
}

/// Shared handle to the [`ChatStore`] owned by the application shell.
///
/// Every operation takes the lock once, so each mutation is atomic with respect to
/// readers and to the submission flow.
#[derive(Clone, Default)]
pub struct AppState {
    store: Arc<Mutex<ChatStore>>,
}

impl AppState {
    pub fn new(store: ChatStore) -> Self {
        Self { store: Arc::new(Mutex::new(store)) }
    }

    fn lock(&self) -> MutexGuard<'_, ChatStore> {
        // The store holds plain data; a panic mid-update cannot leave it unusable.
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` against the store under a single lock.
    pub fn read<R>(&self, f: impl FnOnce(&ChatStore) -> R) -> R {
        f(&*self.lock())
    }

    /// Runs `f` against the store under a single lock, allowing several changes to land together.
    pub fn update<R>(&self, f: impl FnOnce(&mut ChatStore) -> R) -> R {
        f(&mut *self.lock())
    }

    pub fn snapshot(&self) -> ChatStore {
        self.lock().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.read(|s| s.messages().to_vec())
    }

    pub fn session_id(&self) -> String {
        self.read(|s| s.session_id().to_string())
    }

    pub fn is_loading(&self) -> bool {
        self.read(ChatStore::is_loading)
    }

    pub fn update_message(&self, id: &str, update: MessageUpdate) -> bool {
        self.update(|s| s.update_message(id, update))
    }

    pub fn clear_messages(&self) {
        self.update(ChatStore::clear_messages)
    }

    pub fn set_loading(&self, loading: bool) {
        self.update(|s| s.set_loading(loading))
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        self.snapshot().save(path)
    }
}

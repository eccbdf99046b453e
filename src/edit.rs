//! Two-step "edit draft" sessions.
//!
//! Per (chat, moderator) the session is either idle or awaiting the
//! replacement text for one draft:
//!
//! ```text
//! Idle --begin--> AwaitingText --text from same moderator--> Idle
//!                      |--/cancel, or older than the timeout--> Idle
//! ```
//!
//! Starting a new edit while one is pending replaces the pending one.

use crate::models::PostId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EditKey {
    pub chat_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub post_id: PostId,
    /// The draft being edited.
    pub message_id: i64,
    /// The "send me the new text" prompt, deleted once the edit lands.
    pub prompt_message_id: Option<i64>,
    pub started_at: Instant,
}

/// What arrived text means for a moderator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditState {
    Idle,
    AwaitingText(PendingEdit),
    /// A session existed but ran past the timeout; it has been discarded.
    Expired(PendingEdit),
}

#[derive(Debug)]
pub struct EditSessions {
    timeout: Duration,
    pending: Mutex<HashMap<EditKey, PendingEdit>>,
}

impl EditSessions {
    pub fn new(timeout: Duration) -> Self {
        EditSessions {
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<EditKey, PendingEdit>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Enter `AwaitingText`. Returns the session it replaced, if any.
    pub fn begin(&self, key: EditKey, edit: PendingEdit) -> Option<PendingEdit> {
        self.pending().insert(key, edit)
    }

    /// Leave `AwaitingText` on incoming text, reporting the state it left.
    pub fn take(&self, key: EditKey, now: Instant) -> EditState {
        match self.pending().remove(&key) {
            None => EditState::Idle,
            Some(edit) if now.saturating_duration_since(edit.started_at) > self.timeout => {
                EditState::Expired(edit)
            }
            Some(edit) => EditState::AwaitingText(edit),
        }
    }

    pub fn cancel(&self, key: EditKey) -> Option<PendingEdit> {
        self.pending().remove(&key)
    }

    /// Drop every session older than the timeout; returns how many went.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut pending = self.pending();
        let before = pending.len();
        pending.retain(|_, e| now.saturating_duration_since(e.started_at) <= self.timeout);
        before - pending.len()
    }
}

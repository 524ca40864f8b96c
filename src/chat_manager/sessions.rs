use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::storage_manager::{load_namespace, save_namespace, KeyValueStore};

use super::types::{Citation, Message, Session};

pub const SESSIONS_KEY: &str = "sessions";
const SESSIONS_VERSION: u32 = 1;

/// Persisted shape of the session store. Runtime flags (generation state)
/// live outside it and never hit disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionState {
    #[serde(default)]
    sessions: Vec<Session>,
    #[serde(default)]
    active_session_id: Option<String>,
}

#[derive(Debug, Clone)]
struct ActiveTurn {
    request_id: String,
    session_id: String,
}

struct Inner {
    state: SessionState,
    is_generating: bool,
    active_turn: Option<ActiveTurn>,
}

/// Owns all chat sessions and the single-flight generation flags. Message
/// mutations target an explicit (session id, message id) pair so a stale
/// turn that outlived its welcome can never write into a newer turn's
/// placeholder.
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    inner: Mutex<Inner>,
}

impl SessionStore {
    /// Loads persisted sessions, dropping stale runtime residue: loading
    /// flags and per-session errors never survive a restart, and a dangling
    /// active pointer is cleared.
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Result<Self, String> {
        let mut state: SessionState =
            load_namespace(storage.as_ref(), SESSIONS_KEY, SESSIONS_VERSION)?.unwrap_or_default();
        for session in &mut state.sessions {
            session.is_loading = false;
            session.last_error = None;
        }
        if let Some(active) = &state.active_session_id {
            if !state.sessions.iter().any(|s| &s.id == active) {
                tracing::warn!(id = %active, "clearing dangling active session pointer");
                state.active_session_id = None;
            }
        }
        Ok(Self {
            storage,
            inner: Mutex::new(Inner {
                state,
                is_generating: false,
                active_turn: None,
            }),
        })
    }

    fn guard(&self) -> Result<MutexGuard<'_, Inner>, String> {
        self.inner
            .lock()
            .map_err(|_| "session state lock poisoned".to_string())
    }

    fn persist(&self, inner: &Inner) -> Result<(), String> {
        save_namespace(
            self.storage.as_ref(),
            SESSIONS_KEY,
            SESSIONS_VERSION,
            &inner.state,
        )
    }

    /// Creates a session, makes it active, returns a copy.
    pub fn create_session(&self, profile_id: &str, title: &str) -> Result<Session, String> {
        let session = Session::new(profile_id, title);
        let mut inner = self.guard()?;
        inner.state.sessions.insert(0, session.clone());
        inner.state.active_session_id = Some(session.id.clone());
        self.persist(&inner)?;
        Ok(session)
    }

    pub fn set_active_session(&self, session_id: &str) -> Result<(), String> {
        let mut inner = self.guard()?;
        if !inner.state.sessions.iter().any(|s| s.id == session_id) {
            return Err(format!("unknown session: {session_id}"));
        }
        inner.state.active_session_id = Some(session_id.to_string());
        self.persist(&inner)
    }

    pub fn active_session_id(&self) -> Result<Option<String>, String> {
        Ok(self.guard()?.state.active_session_id.clone())
    }

    pub fn active_session(&self) -> Result<Option<Session>, String> {
        let inner = self.guard()?;
        let Some(active) = &inner.state.active_session_id else {
            return Ok(None);
        };
        Ok(inner.state.sessions.iter().find(|s| &s.id == active).cloned())
    }

    pub fn get(&self, session_id: &str) -> Result<Option<Session>, String> {
        Ok(self
            .guard()?
            .state
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned())
    }

    /// All sessions, newest first.
    pub fn list(&self) -> Result<Vec<Session>, String> {
        Ok(self.guard()?.state.sessions.clone())
    }

    pub fn rename_session(&self, session_id: &str, title: &str) -> Result<(), String> {
        let title = title.trim();
        if title.is_empty() {
            return Err("session title must not be empty".to_string());
        }
        let mut inner = self.guard()?;
        let session = find_session(&mut inner, session_id)?;
        session.title = title.to_string();
        self.persist(&inner)
    }

    /// Removes a session. If it was active, activation falls back to the
    /// most recent session of the same profile, then the most recent session
    /// overall, then none.
    pub fn delete_session(&self, session_id: &str) -> Result<bool, String> {
        let mut inner = self.guard()?;
        let Some(pos) = inner.state.sessions.iter().position(|s| s.id == session_id) else {
            return Ok(false);
        };
        let removed = inner.state.sessions.remove(pos);
        if inner.state.active_session_id.as_deref() == Some(session_id) {
            inner.state.active_session_id = pick_replacement(&inner.state.sessions, &removed.profile_id);
        }
        self.persist(&inner)?;
        Ok(true)
    }

    /// Removes every session belonging to a profile, fixing the active
    /// pointer if it pointed into the removed set.
    pub fn delete_sessions_for_profile(&self, profile_id: &str) -> Result<usize, String> {
        let mut inner = self.guard()?;
        let before = inner.state.sessions.len();
        inner.state.sessions.retain(|s| s.profile_id != profile_id);
        let removed = before - inner.state.sessions.len();
        if let Some(active) = &inner.state.active_session_id {
            if !inner.state.sessions.iter().any(|s| &s.id == active) {
                inner.state.active_session_id = newest(&inner.state.sessions).map(|s| s.id.clone());
            }
        }
        if removed > 0 {
            self.persist(&inner)?;
        }
        Ok(removed)
    }

    /// Atomically records the start of a generation turn: appends the user
    /// message and an empty assistant placeholder, raises the loading flag,
    /// clears any previous error, and notes which request now owns the
    /// global generation slot. Returns the placeholder.
    pub fn begin_turn(
        &self,
        session_id: &str,
        request_id: &str,
        user_text: &str,
    ) -> Result<Message, String> {
        let mut inner = self.guard()?;
        // A superseded turn drops its loading flag immediately; the aborted
        // task will clean up its own message later.
        if let Some(prev) = inner.active_turn.take() {
            if prev.session_id != session_id {
                if let Some(prev_session) =
                    inner.state.sessions.iter_mut().find(|s| s.id == prev.session_id)
                {
                    prev_session.is_loading = false;
                }
            }
        }
        let session = find_session(&mut inner, session_id)?;
        let placeholder = Message::assistant_placeholder();
        session.messages.push(Message::user(user_text));
        session.messages.push(placeholder.clone());
        session.is_loading = true;
        session.last_error = None;
        inner.is_generating = true;
        inner.active_turn = Some(ActiveTurn {
            request_id: request_id.to_string(),
            session_id: session_id.to_string(),
        });
        self.persist(&inner)?;
        Ok(placeholder)
    }

    /// Clears the session's loading flag and, when the finishing request
    /// still owns the generation slot, releases it. A superseded turn ending
    /// late touches neither the slot nor the loading flag of a session its
    /// successor is still streaming into.
    pub fn end_generation(&self, session_id: &str, request_id: &str) -> Result<(), String> {
        let mut inner = self.guard()?;
        let owns_slot = inner
            .active_turn
            .as_ref()
            .map_or(false, |t| t.request_id == request_id);
        let successor_here = !owns_slot
            && inner
                .active_turn
                .as_ref()
                .map_or(false, |t| t.session_id == session_id);
        if !successor_here {
            if let Some(session) = inner.state.sessions.iter_mut().find(|s| s.id == session_id) {
                session.is_loading = false;
            }
        }
        if owns_slot {
            inner.active_turn = None;
            inner.is_generating = false;
        }
        self.persist(&inner)
    }

    pub fn is_generating(&self) -> Result<bool, String> {
        Ok(self.guard()?.is_generating)
    }

    /// The (session id, request id) of the in-flight turn, if any.
    pub fn active_turn(&self) -> Result<Option<(String, String)>, String> {
        Ok(self
            .guard()?
            .active_turn
            .as_ref()
            .map(|t| (t.session_id.clone(), t.request_id.clone())))
    }

    pub fn append_to_message(
        &self,
        session_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), String> {
        if text.is_empty() {
            return Ok(());
        }
        let mut inner = self.guard()?;
        find_message(&mut inner, session_id, message_id)?.content.push_str(text);
        // Deltas arrive per chunk; the turn is persisted once when generation
        // ends, not on every append.
        Ok(())
    }

    pub fn attach_citations(
        &self,
        session_id: &str,
        message_id: &str,
        citations: Vec<Citation>,
    ) -> Result<(), String> {
        let mut inner = self.guard()?;
        find_message(&mut inner, session_id, message_id)?.citations = Some(citations);
        self.persist(&inner)
    }

    pub fn attach_follow_up_prompts(
        &self,
        session_id: &str,
        message_id: &str,
        prompts: Vec<String>,
    ) -> Result<(), String> {
        let mut inner = self.guard()?;
        find_message(&mut inner, session_id, message_id)?.follow_up_prompts = Some(prompts);
        self.persist(&inner)
    }

    /// Replaces a message's content, discarding citations and prompts that
    /// described the old text.
    pub fn update_message(
        &self,
        session_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), String> {
        let mut inner = self.guard()?;
        let message = find_message(&mut inner, session_id, message_id)?;
        message.content = content.to_string();
        message.citations = None;
        message.follow_up_prompts = None;
        self.persist(&inner)
    }

    pub fn delete_message(&self, session_id: &str, message_id: &str) -> Result<(), String> {
        let mut inner = self.guard()?;
        let session = find_session(&mut inner, session_id)?;
        if session.messages.len() <= 1 {
            return Err("cannot delete the last message of a session".to_string());
        }
        let Some(pos) = session.messages.iter().position(|m| m.id == message_id) else {
            return Err(format!("unknown message: {message_id}"));
        };
        session.messages.remove(pos);
        self.persist(&inner)
    }

    pub fn set_error(&self, session_id: &str, error: Option<String>) -> Result<(), String> {
        let mut inner = self.guard()?;
        find_session(&mut inner, session_id)?.last_error = error;
        self.persist(&inner)
    }
}

fn find_session<'a>(inner: &'a mut Inner, session_id: &str) -> Result<&'a mut Session, String> {
    inner
        .state
        .sessions
        .iter_mut()
        .find(|s| s.id == session_id)
        .ok_or_else(|| format!("unknown session: {session_id}"))
}

fn find_message<'a>(
    inner: &'a mut Inner,
    session_id: &str,
    message_id: &str,
) -> Result<&'a mut Message, String> {
    find_session(inner, session_id)?
        .messages
        .iter_mut()
        .find(|m| m.id == message_id)
        .ok_or_else(|| format!("unknown message: {message_id}"))
}

fn newest(sessions: &[Session]) -> Option<&Session> {
    sessions.iter().max_by_key(|s| s.created_at)
}

fn pick_replacement(sessions: &[Session], profile_id: &str) -> Option<String> {
    sessions
        .iter()
        .filter(|s| s.profile_id == profile_id)
        .max_by_key(|s| s.created_at)
        .or_else(|| newest(sessions))
        .map(|s| s.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_manager::MemoryStore;

    fn make_store() -> (Arc<MemoryStore>, SessionStore) {
        let storage = Arc::new(MemoryStore::new());
        let store = SessionStore::new(storage.clone()).unwrap();
        (storage, store)
    }

    #[test]
    fn test_create_session_becomes_active() {
        let (_, store) = make_store();
        let session = store.create_session("gpt-default", "New chat").unwrap();
        assert_eq!(store.active_session_id().unwrap(), Some(session.id.clone()));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_begin_turn_appends_pair_and_raises_flags() {
        let (_, store) = make_store();
        let session = store.create_session("gpt-default", "New chat").unwrap();
        let placeholder = store.begin_turn(&session.id, "req-1", "hello").unwrap();

        let session = store.get(&session.id).unwrap().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].content, "hello");
        assert_eq!(session.messages[1].id, placeholder.id);
        assert!(session.messages[1].content.is_empty());
        assert!(session.is_loading);
        assert!(store.is_generating().unwrap());
    }

    #[test]
    fn test_end_generation_ignores_stale_request() {
        let (_, store) = make_store();
        let session = store.create_session("gpt-default", "New chat").unwrap();
        store.begin_turn(&session.id, "req-old", "first").unwrap();
        store.begin_turn(&session.id, "req-new", "second").unwrap();

        // The superseded turn finishing late must release neither the slot
        // the new turn owns nor the session's loading flag.
        store.end_generation(&session.id, "req-old").unwrap();
        assert!(store.is_generating().unwrap());
        assert!(store.get(&session.id).unwrap().unwrap().is_loading);

        store.end_generation(&session.id, "req-new").unwrap();
        assert!(!store.is_generating().unwrap());
        assert!(!store.get(&session.id).unwrap().unwrap().is_loading);
    }

    #[test]
    fn test_streamed_content_persists_when_generation_ends() {
        let (storage, store) = make_store();
        let session = store.create_session("gpt-default", "New chat").unwrap();
        let placeholder = store.begin_turn(&session.id, "req-1", "hi").unwrap();
        store
            .append_to_message(&session.id, &placeholder.id, "Hello")
            .unwrap();

        // Deltas are buffered in memory until the turn ends.
        let mid = SessionStore::new(storage.clone()).unwrap();
        assert_eq!(mid.get(&session.id).unwrap().unwrap().messages[1].content, "");

        store.end_generation(&session.id, "req-1").unwrap();
        let reloaded = SessionStore::new(storage).unwrap();
        assert_eq!(
            reloaded.get(&session.id).unwrap().unwrap().messages[1].content,
            "Hello"
        );
    }

    #[test]
    fn test_appends_target_explicit_message() {
        let (_, store) = make_store();
        let session = store.create_session("gpt-default", "New chat").unwrap();
        let first = store.begin_turn(&session.id, "req-1", "one").unwrap();
        let second = store.begin_turn(&session.id, "req-2", "two").unwrap();

        store.append_to_message(&session.id, &first.id, "old").unwrap();
        store.append_to_message(&session.id, &second.id, "new").unwrap();

        let session = store.get(&session.id).unwrap().unwrap();
        let find = |id: &str| {
            session
                .messages
                .iter()
                .find(|m| m.id == id)
                .unwrap()
                .content
                .clone()
        };
        assert_eq!(find(&first.id), "old");
        assert_eq!(find(&second.id), "new");
    }

    #[test]
    fn test_delete_active_session_reactivates_same_profile() {
        let (_, store) = make_store();
        let other = store.create_session("gpt-other", "other").unwrap();
        let sibling = store.create_session("gpt-a", "sibling").unwrap();
        let active = store.create_session("gpt-a", "active").unwrap();

        assert!(store.delete_session(&active.id).unwrap());
        assert_eq!(store.active_session_id().unwrap(), Some(sibling.id.clone()));

        assert!(store.delete_session(&sibling.id).unwrap());
        assert_eq!(store.active_session_id().unwrap(), Some(other.id.clone()));

        assert!(store.delete_session(&other.id).unwrap());
        assert_eq!(store.active_session_id().unwrap(), None);
    }

    #[test]
    fn test_delete_sessions_for_profile_fixes_active_pointer() {
        let (_, store) = make_store();
        let keep = store.create_session("gpt-keep", "keep").unwrap();
        store.create_session("gpt-gone", "a").unwrap();
        store.create_session("gpt-gone", "b").unwrap();

        assert_eq!(store.delete_sessions_for_profile("gpt-gone").unwrap(), 2);
        assert_eq!(store.active_session_id().unwrap(), Some(keep.id));
    }

    #[test]
    fn test_loading_and_error_cleared_on_reload() {
        let (storage, store) = make_store();
        let session = store.create_session("gpt-default", "New chat").unwrap();
        store.begin_turn(&session.id, "req-1", "hi").unwrap();
        store.set_error(&session.id, Some("boom".to_string())).unwrap();

        let reloaded = SessionStore::new(storage).unwrap();
        let session = reloaded.get(&session.id).unwrap().unwrap();
        assert!(!session.is_loading);
        assert!(session.last_error.is_none());
        assert!(!reloaded.is_generating().unwrap());
    }

    #[test]
    fn test_delete_last_message_is_rejected() {
        let (_, store) = make_store();
        let session = store.create_session("gpt-default", "New chat").unwrap();
        store.begin_turn(&session.id, "req-1", "hi").unwrap();
        let messages = store.get(&session.id).unwrap().unwrap().messages;

        store.delete_message(&session.id, &messages[0].id).unwrap();
        let err = store
            .delete_message(&session.id, &messages[1].id)
            .unwrap_err();
        assert!(err.contains("last message"));
    }

    #[test]
    fn test_update_message_drops_stale_attachments() {
        let (_, store) = make_store();
        let session = store.create_session("gpt-default", "New chat").unwrap();
        let placeholder = store.begin_turn(&session.id, "req-1", "hi").unwrap();
        store
            .attach_follow_up_prompts(&session.id, &placeholder.id, vec!["Q".to_string()])
            .unwrap();
        store
            .update_message(&session.id, &placeholder.id, "edited")
            .unwrap();

        let session = store.get(&session.id).unwrap().unwrap();
        let message = session.messages.iter().find(|m| m.id == placeholder.id).unwrap();
        assert_eq!(message.content, "edited");
        assert!(message.follow_up_prompts.is_none());
    }
}

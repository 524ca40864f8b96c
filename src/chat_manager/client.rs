use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use crate::abort_manager::AbortRegistry;
use crate::api::ChatTransport;
use crate::branding;
use crate::error::AppError;
use crate::preference_manager::UiPreferenceStore;
use crate::profile_manager::{Profile, ProfileStore, ProfileUpdate};
use crate::storage_manager::KeyValueStore;

use super::request::build_chat_request;
use super::sessions::SessionStore;
use super::stream::{StreamEvent, StreamIngestor};
use super::types::{ChatTurn, Message, Session, TurnStatus};

/// User-facing fallback shown when the upstream call fails outright.
pub const FAILURE_MESSAGE: &str = "Failed to get a response from the assistant.";
/// Suffix marking a response the user cut short.
pub const STOPPED_MARKER: &str = "[stopped]";
const IDLE_TIMEOUT_ERROR: &str = "request timed out";
const DEFAULT_SESSION_TITLE: &str = "New Chat";

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

enum StreamOutcome {
    Completed,
    Aborted,
    TimedOut,
    TransportFailed(AppError),
    /// The session store refused a stream update, e.g. the session was
    /// deleted while the response was still arriving.
    StoreRejected(String),
}

/// Facade over the profile, session and preference stores plus the streaming
/// transport. One instance per app; all handles are cheap clones.
pub struct ChatClient {
    profiles: Arc<ProfileStore>,
    sessions: Arc<SessionStore>,
    preferences: Arc<UiPreferenceStore>,
    transport: Arc<dyn ChatTransport>,
    aborts: AbortRegistry,
    idle_timeout: Duration,
}

impl ChatClient {
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        transport: Arc<dyn ChatTransport>,
    ) -> Result<Self, String> {
        Ok(Self {
            profiles: Arc::new(ProfileStore::new(storage.clone())),
            sessions: Arc::new(SessionStore::new(storage.clone())?),
            preferences: Arc::new(UiPreferenceStore::new(storage)),
            transport,
            aborts: AbortRegistry::new(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    /// Maximum silence between chunks before the turn is failed as timed out.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn preferences(&self) -> &UiPreferenceStore {
        &self.preferences
    }

    /// Sends a user message on the active session and drives the response
    /// stream to its end. Returns `Ok(None)` when there is nothing to do:
    /// blank input or no resolvable profile.
    ///
    /// Issuing a new send while one is in flight supersedes the old one: its
    /// request is aborted and its partial content kept, exactly as a manual
    /// stop would.
    pub async fn send_message(&self, text: &str) -> Result<Option<ChatTurn>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let Some(profile) = self.profiles.active_profile() else {
            tracing::warn!("send with no active profile");
            return Ok(None);
        };

        let session = self.resolve_session(&profile)?;

        let prefs = self.preferences.snapshot();
        let mut history = session.messages.clone();
        history.push(Message::user(text));
        let built = build_chat_request(
            &profile,
            &history,
            prefs.web_search_enabled,
            prefs.api_key.as_deref(),
        );
        let request_id = built.request_id.clone();

        // Registering aborts any in-flight request (global single-flight).
        let mut abort_rx = self.aborts.begin(request_id.clone());
        let placeholder = self.sessions.begin_turn(&session.id, &request_id, text)?;

        tracing::debug!(
            session = %session.id,
            request = %request_id,
            model = %built.body.model,
            text = %crate::utils::truncate_for_log(text, 80),
            "sending message"
        );

        let mut ingestor = StreamIngestor::new();
        let outcome = match self.transport.open_stream(&built).await {
            Ok(mut stream) => loop {
                tokio::select! {
                    _ = &mut abort_rx => {
                        break StreamOutcome::Aborted;
                    }
                    next = tokio::time::timeout(self.idle_timeout, stream.next()) => {
                        match next {
                            Err(_) => break StreamOutcome::TimedOut,
                            Ok(None) => break StreamOutcome::Completed,
                            Ok(Some(Ok(chunk))) => {
                                if let Err(e) = self.apply_events(
                                    &session.id,
                                    &placeholder.id,
                                    ingestor.feed(&chunk),
                                ) {
                                    break StreamOutcome::StoreRejected(e);
                                }
                            }
                            Ok(Some(Err(e))) => break StreamOutcome::TransportFailed(e),
                        }
                    }
                }
            },
            Err(e) => StreamOutcome::TransportFailed(e),
        };

        let settled = match outcome {
            StreamOutcome::Completed => self
                .apply_events(&session.id, &placeholder.id, ingestor.finish())
                .map(|()| TurnStatus::Completed),
            StreamOutcome::Aborted => {
                // Keep whatever streamed; pending structured segments are
                // dropped with the ingestor.
                let marker = if ingestor.content().is_empty() {
                    STOPPED_MARKER.to_string()
                } else {
                    format!("\n\n{STOPPED_MARKER}")
                };
                tracing::debug!(request = %request_id, "generation stopped");
                self.sessions
                    .append_to_message(&session.id, &placeholder.id, &marker)
                    .map(|()| TurnStatus::Stopped)
            }
            StreamOutcome::TimedOut => {
                tracing::warn!(request = %request_id, "stream idle timeout");
                self.sessions
                    .set_error(&session.id, Some(IDLE_TIMEOUT_ERROR.to_string()))
                    .map(|()| TurnStatus::Failed)
            }
            StreamOutcome::TransportFailed(e) => {
                tracing::warn!(request = %request_id, error = %e, "completion request failed");
                self.sessions
                    .update_message(&session.id, &placeholder.id, FAILURE_MESSAGE)
                    .and_then(|()| self.sessions.set_error(&session.id, Some(e.to_string())))
                    .map(|()| TurnStatus::Failed)
            }
            StreamOutcome::StoreRejected(e) => Err(e),
        };

        // Flags drop on every path, even when the session vanished mid-stream
        // and `settled` carries the store's error.
        self.aborts.unregister(&request_id);
        self.sessions.end_generation(&session.id, &request_id)?;
        let status = settled?;

        Ok(Some(ChatTurn {
            session_id: session.id.clone(),
            request_id,
            status,
            assistant_message: self.final_message(&session.id, &placeholder.id)?,
        }))
    }

    /// Stops the in-flight generation, if any. Partial content is kept.
    pub fn stop_generating(&self) -> Result<bool, String> {
        match self.sessions.active_turn()? {
            // The turn may finish between the lookup and the abort; losing
            // that race is not an error.
            Some((_, request_id)) => Ok(self.aborts.abort(&request_id).is_ok()),
            None => Ok(false),
        }
    }

    /// Validates and inserts a profile, activates it, and opens its first
    /// session.
    pub fn create_profile(&self, profile: Profile) -> Result<Session, String> {
        if profile.name.trim().is_empty() {
            return Err("profile name must not be empty".to_string());
        }
        if profile.system_prompt.trim().is_empty() {
            return Err("profile system prompt must not be empty".to_string());
        }
        self.profiles.insert(profile.clone())?;
        self.sessions.create_session(&profile.id, DEFAULT_SESSION_TITLE)
    }

    pub fn update_profile(&self, id: &str, update: ProfileUpdate) -> Result<(), String> {
        self.profiles.update(id, update)
    }

    /// Removes a profile and every session it owned. The protected default
    /// profile is never removed.
    pub fn delete_profile(&self, id: &str) -> Result<bool, String> {
        if !self.profiles.remove(id) {
            return Ok(false);
        }
        self.sessions.delete_sessions_for_profile(id)?;
        Ok(true)
    }

    /// Resets profiles to exactly the protected default and removes every
    /// session not owned by it.
    pub fn delete_all_profiles(&self) -> Result<(), String> {
        self.profiles.reset();
        let mut owners: Vec<String> = self
            .sessions
            .list()?
            .into_iter()
            .map(|s| s.profile_id)
            .filter(|id| id != branding::DEFAULT_PROFILE_ID)
            .collect();
        owners.sort();
        owners.dedup();
        for owner in owners {
            self.sessions.delete_sessions_for_profile(&owner)?;
        }
        Ok(())
    }

    /// Pointer update only; which session the profile talks in is resolved
    /// on the next send.
    pub fn set_active_profile(&self, id: &str) -> Result<(), String> {
        self.profiles.set_active(id)
    }

    pub fn new_session_for_active_profile(&self) -> Result<Session, String> {
        let profile = self
            .profiles
            .active_profile()
            .ok_or_else(|| "no active profile".to_string())?;
        self.sessions
            .create_session(&profile.id, DEFAULT_SESSION_TITLE)
    }

    /// The session a send targets: the active one when it belongs to the
    /// active profile, otherwise a fresh session for that profile.
    fn resolve_session(&self, profile: &Profile) -> Result<Session, String> {
        if let Some(session) = self.sessions.active_session()? {
            if session.profile_id == profile.id {
                return Ok(session);
            }
        }
        self.sessions.create_session(&profile.id, DEFAULT_SESSION_TITLE)
    }

    fn apply_events(
        &self,
        session_id: &str,
        message_id: &str,
        events: Vec<StreamEvent>,
    ) -> Result<(), String> {
        for event in events {
            self.apply_event(session_id, message_id, event)?;
        }
        Ok(())
    }

    fn apply_event(
        &self,
        session_id: &str,
        message_id: &str,
        event: StreamEvent,
    ) -> Result<(), String> {
        match event {
            StreamEvent::Delta { text } => {
                self.sessions.append_to_message(session_id, message_id, &text)
            }
            StreamEvent::Citations { citations } => {
                self.sessions.attach_citations(session_id, message_id, citations)
            }
            StreamEvent::FollowUpPrompts { prompts } => {
                self.sessions
                    .attach_follow_up_prompts(session_id, message_id, prompts)
            }
        }
    }

    fn final_message(&self, session_id: &str, message_id: &str) -> Result<Message, String> {
        self.sessions
            .get(session_id)?
            .and_then(|s| s.messages.into_iter().find(|m| m.id == message_id))
            .ok_or_else(|| format!("unknown message: {message_id}"))
    }
}

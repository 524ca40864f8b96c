//! Core engine for a streaming chat client: assistant profiles, persisted
//! chat sessions, UI preferences, and the ingestion state machine that turns
//! a raw completion byte stream into message content, citations, and
//! follow-up prompts.
//!
//! [`ChatClient`] ties the pieces together; the stores underneath are usable
//! on their own.

pub mod abort_manager;
pub mod api;
pub mod branding;
pub mod chat_manager;
pub mod error;
pub mod preference_manager;
pub mod profile_manager;
pub mod storage_manager;
pub mod utils;

pub use abort_manager::{AbortReason, AbortRegistry};
pub use api::{build_client, ByteStream, ChatTransport, HttpChatTransport};
pub use chat_manager::{
    ChatClient, ChatTurn, Citation, Message, Role, Session, SessionStore, StreamEvent,
    StreamIngestor, TurnStatus,
};
pub use error::AppError;
pub use preference_manager::{Theme, UiPreferenceStore, UiPreferences};
pub use profile_manager::{Profile, ProfileStore, ProfileUpdate};
pub use storage_manager::{FileStore, KeyValueStore, MemoryStore};
pub use utils::init_tracing;

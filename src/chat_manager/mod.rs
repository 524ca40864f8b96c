mod client;
mod request;
mod sessions;
mod stream;
mod types;

pub use client::{ChatClient, FAILURE_MESSAGE, STOPPED_MARKER};
pub use request::{build_chat_request, ApiMessage, BuiltRequest, ChatRequestBody, Tool};
pub use sessions::{SessionStore, SESSIONS_KEY};
pub use stream::{
    StreamEvent, StreamIngestor, ANNOTATIONS_SENTINEL, SMART_PROMPTS_SENTINEL,
};
pub use types::{ChatTurn, Citation, Message, Role, Session, TurnStatus};

//! Central place to customize product naming without touching stored-state
//! versions.

/// Id of the built-in assistant profile. Protected: it cannot be deleted and
/// is recreated whenever the profiles namespace resets.
pub const DEFAULT_PROFILE_ID: &str = "gpt-default";

pub const DEFAULT_PROFILE_NAME: &str = "Basil";

pub const DEFAULT_PROFILE_AVATAR: &str = "🌿";

pub const DEFAULT_MODEL: &str = "gpt-4o";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Basil, a thoughtful and \
precise AI assistant. Answer directly and keep a warm, plain-spoken tone. \
When you are unsure, say so instead of guessing. Prefer short paragraphs and \
concrete examples over lists of caveats.";

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::branding;
use crate::storage_manager::{load_namespace, save_namespace, KeyValueStore};

pub const PROFILES_KEY: &str = "profiles";
pub const PROFILES_VERSION: u32 = 1;

/// An assistant configuration: system prompt, sampling parameters, model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub max_tokens: u32,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub web_search_enabled: bool,
}

fn default_model() -> String {
    branding::DEFAULT_MODEL.to_string()
}

impl Profile {
    /// The built-in profile. Recreated whenever the namespace resets.
    pub fn default_profile() -> Self {
        Self {
            id: branding::DEFAULT_PROFILE_ID.into(),
            name: branding::DEFAULT_PROFILE_NAME.into(),
            avatar: branding::DEFAULT_PROFILE_AVATAR.into(),
            description: "The default AI assistant.".into(),
            system_prompt: branding::DEFAULT_SYSTEM_PROMPT.into(),
            temperature: 0.8,
            top_p: 1.0,
            frequency_penalty: 0.0,
            max_tokens: 1024,
            model: branding::DEFAULT_MODEL.into(),
            web_search_enabled: false,
        }
    }

    pub fn is_default(&self) -> bool {
        self.id == branding::DEFAULT_PROFILE_ID
    }

    fn clamp_sampling(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);
        self.frequency_penalty = self.frequency_penalty.clamp(-2.0, 2.0);
        self.max_tokens = self.max_tokens.max(1);
    }
}

/// Partial update for `ProfileStore::update`. The id is never part of it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
    pub web_search_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileState {
    profiles: Vec<Profile>,
    active_profile_id: Option<String>,
}

impl Default for ProfileState {
    fn default() -> Self {
        Self {
            profiles: vec![Profile::default_profile()],
            active_profile_id: Some(branding::DEFAULT_PROFILE_ID.into()),
        }
    }
}

/// Owns the set of assistant profiles and the active-profile pointer.
/// Cross-store cascades (session creation/deletion) are orchestrated by the
/// chat client, not here.
pub struct ProfileStore {
    storage: Arc<dyn KeyValueStore>,
    state: Mutex<ProfileState>,
}

impl ProfileStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        let mut state = load_namespace::<ProfileState>(&*storage, PROFILES_KEY, PROFILES_VERSION)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to read profiles");
                None
            })
            .unwrap_or_default();

        // The protected default must always exist and the active pointer must
        // resolve; repair anything a stale payload left behind.
        if !state
            .profiles
            .iter()
            .any(|p| p.id == branding::DEFAULT_PROFILE_ID)
        {
            state.profiles.insert(0, Profile::default_profile());
        }
        let active_ok = state
            .active_profile_id
            .as_deref()
            .map(|id| state.profiles.iter().any(|p| p.id == id))
            .unwrap_or(false);
        if !active_ok {
            state.active_profile_id = Some(branding::DEFAULT_PROFILE_ID.into());
        }

        Self {
            storage,
            state: Mutex::new(state),
        }
    }

    pub fn list(&self) -> Vec<Profile> {
        self.state
            .lock()
            .map(|s| s.profiles.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<Profile> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.profiles.iter().find(|p| p.id == id).cloned())
    }

    pub fn active_profile_id(&self) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.active_profile_id.clone())
    }

    pub fn active_profile(&self) -> Option<Profile> {
        self.state.lock().ok().and_then(|s| {
            let id = s.active_profile_id.as_deref()?;
            s.profiles.iter().find(|p| p.id == id).cloned()
        })
    }

    /// Inserts a new profile and makes it active.
    pub fn insert(&self, mut profile: Profile) -> Result<(), String> {
        let mut state = self.lock()?;
        if state.profiles.iter().any(|p| p.id == profile.id) {
            return Err(format!("Profile {} already exists", profile.id));
        }
        profile.clamp_sampling();
        state.active_profile_id = Some(profile.id.clone());
        state.profiles.push(profile);
        self.persist(&state);
        Ok(())
    }

    /// Merges the given fields into an existing profile. The id never changes.
    pub fn update(&self, id: &str, update: ProfileUpdate) -> Result<(), String> {
        let mut state = self.lock()?;
        let profile = state
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| "Profile not found".to_string())?;

        if let Some(name) = update.name {
            profile.name = name;
        }
        if let Some(avatar) = update.avatar {
            profile.avatar = avatar;
        }
        if let Some(description) = update.description {
            profile.description = description;
        }
        if let Some(system_prompt) = update.system_prompt {
            profile.system_prompt = system_prompt;
        }
        if let Some(temperature) = update.temperature {
            profile.temperature = temperature;
        }
        if let Some(top_p) = update.top_p {
            profile.top_p = top_p;
        }
        if let Some(frequency_penalty) = update.frequency_penalty {
            profile.frequency_penalty = frequency_penalty;
        }
        if let Some(max_tokens) = update.max_tokens {
            profile.max_tokens = max_tokens;
        }
        if let Some(model) = update.model {
            profile.model = model;
        }
        if let Some(web_search_enabled) = update.web_search_enabled {
            profile.web_search_enabled = web_search_enabled;
        }
        profile.clamp_sampling();
        self.persist(&state);
        Ok(())
    }

    /// Removes a profile. The protected default is a no-op. When the removed
    /// profile was active, the default becomes active. Returns whether
    /// anything was removed.
    pub fn remove(&self, id: &str) -> bool {
        if id == branding::DEFAULT_PROFILE_ID {
            tracing::debug!("refusing to delete the default profile");
            return false;
        }
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let before = state.profiles.len();
        state.profiles.retain(|p| p.id != id);
        if state.profiles.len() == before {
            return false;
        }
        if state.active_profile_id.as_deref() == Some(id) {
            state.active_profile_id = Some(branding::DEFAULT_PROFILE_ID.into());
        }
        self.persist(&state);
        true
    }

    pub fn set_active(&self, id: &str) -> Result<(), String> {
        let mut state = self.lock()?;
        if !state.profiles.iter().any(|p| p.id == id) {
            return Err("Profile not found".to_string());
        }
        state.active_profile_id = Some(id.to_string());
        self.persist(&state);
        Ok(())
    }

    /// Resets to exactly the protected default profile.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = ProfileState::default();
            self.persist(&state);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ProfileState>, String> {
        self.state
            .lock()
            .map_err(|_| "Failed to acquire profile store lock".to_string())
    }

    fn persist(&self, state: &ProfileState) {
        if let Err(e) = save_namespace(&*self.storage, PROFILES_KEY, PROFILES_VERSION, state) {
            tracing::warn!(error = %e, "failed to persist profiles");
        }
    }
}

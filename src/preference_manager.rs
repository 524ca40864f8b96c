use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::storage_manager::{load_namespace, save_namespace, KeyValueStore};

pub const UI_PREFERENCES_KEY: &str = "ui-preferences";
pub const UI_PREFERENCES_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPreferences {
    pub theme: Theme,
    pub sidebar_open: bool,
    pub font: String,
    /// When set, the outbound request enables the web-search tool.
    pub web_search_enabled: bool,
    /// User-supplied credential forwarded as `X-User-API-Key`, overriding the
    /// server default.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            sidebar_open: true,
            font: "font-sans".into(),
            web_search_enabled: false,
            api_key: None,
            avatar: None,
        }
    }
}

/// Theme/layout/feature toggles. Read by the chat client when building an
/// outbound request; owns the `ui-preferences` namespace.
pub struct UiPreferenceStore {
    storage: Arc<dyn KeyValueStore>,
    state: Mutex<UiPreferences>,
}

impl UiPreferenceStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        let loaded =
            load_namespace::<UiPreferences>(&*storage, UI_PREFERENCES_KEY, UI_PREFERENCES_VERSION)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "failed to read ui preferences");
                    None
                })
                .unwrap_or_default();
        Self {
            storage,
            state: Mutex::new(loaded),
        }
    }

    pub fn snapshot(&self) -> UiPreferences {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn set_theme(&self, theme: Theme) {
        self.mutate(|prefs| prefs.theme = theme);
    }

    pub fn toggle_sidebar(&self) {
        self.mutate(|prefs| prefs.sidebar_open = !prefs.sidebar_open);
    }

    pub fn set_font(&self, font: &str) {
        self.mutate(|prefs| prefs.font = font.to_string());
    }

    pub fn set_web_search_enabled(&self, enabled: bool) {
        self.mutate(|prefs| prefs.web_search_enabled = enabled);
    }

    pub fn set_api_key(&self, api_key: Option<String>) {
        self.mutate(|prefs| prefs.api_key = api_key);
    }

    pub fn set_avatar(&self, avatar: Option<String>) {
        self.mutate(|prefs| prefs.avatar = avatar);
    }

    fn mutate(&self, apply: impl FnOnce(&mut UiPreferences)) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        apply(&mut state);
        if let Err(e) = save_namespace(
            &*self.storage,
            UI_PREFERENCES_KEY,
            UI_PREFERENCES_VERSION,
            &*state,
        ) {
            tracing::warn!(error = %e, "failed to persist ui preferences");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_manager::MemoryStore;

    #[test]
    fn test_defaults_applied_on_first_load() {
        let store = UiPreferenceStore::new(Arc::new(MemoryStore::new()));
        let prefs = store.snapshot();
        assert_eq!(prefs.theme, Theme::Dark);
        assert!(prefs.sidebar_open);
        assert!(!prefs.web_search_enabled);
    }

    #[test]
    fn test_mutations_survive_reload() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        {
            let store = UiPreferenceStore::new(storage.clone());
            store.set_theme(Theme::Light);
            store.set_web_search_enabled(true);
            store.set_api_key(Some("sk-test".into()));
        }
        let reloaded = UiPreferenceStore::new(storage);
        let prefs = reloaded.snapshot();
        assert_eq!(prefs.theme, Theme::Light);
        assert!(prefs.web_search_enabled);
        assert_eq!(prefs.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_version_bump_resets_preferences_only() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        // Write an old-version envelope by hand.
        storage
            .write(UI_PREFERENCES_KEY, r#"{"$version":1,"data":{"theme":"light"}}"#)
            .unwrap();
        let store = UiPreferenceStore::new(storage);
        assert_eq!(store.snapshot().theme, Theme::Dark);
    }
}

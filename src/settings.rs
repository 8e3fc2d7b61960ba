// User-facing settings. They live in the snapshot store under the same keys
// the browser front end used for local storage.

use serde::{Deserialize, Serialize};

use crate::exec::GENERAL_MODEL;
use crate::storage::{load_or_log, persist_or_log, remove_or_log, SnapshotKey, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Theme {
    Light,
    Dark,
}

impl Theme {
    fn parse(raw: &str) -> Option<Theme> {
        match raw {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub(crate) fn toggled(&self) -> Theme {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub(crate) theme: Theme,
    pub(crate) api_key: String,
    pub(crate) use_ollama: bool,
    pub(crate) selected_model: String,
    pub(crate) ollama_base_url: String,
}

/// Settings as clients see them. The API key is write-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SettingsView {
    pub(crate) theme: Theme,
    pub(crate) has_api_key: bool,
    pub(crate) use_ollama: bool,
    pub(crate) selected_model: String,
    pub(crate) ollama_base_url: String,
}

/// Partial update sent by the client; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SettingsUpdate {
    pub(crate) theme: Option<Theme>,
    pub(crate) api_key: Option<String>,
    pub(crate) use_ollama: Option<bool>,
    pub(crate) selected_model: Option<String>,
    pub(crate) ollama_base_url: Option<String>,
}

impl Settings {
    pub(crate) fn defaults(ollama_base_url: &str) -> Settings {
        Settings {
            theme: Theme::Dark,
            api_key: String::new(),
            use_ollama: false,
            selected_model: GENERAL_MODEL.to_string(),
            ollama_base_url: ollama_base_url.to_string(),
        }
    }

    pub(crate) fn view(&self) -> SettingsView {
        SettingsView {
            theme: self.theme,
            has_api_key: !self.api_key.is_empty(),
            use_ollama: self.use_ollama,
            selected_model: self.selected_model.clone(),
            ollama_base_url: self.ollama_base_url.clone(),
        }
    }

    /// Stored values win over defaults; unreadable values are ignored.
    pub(crate) fn load(store: &dyn SnapshotStore, default_base_url: &str) -> Settings {
        let mut settings = Settings::defaults(default_base_url);
        if let Some(raw) = load_or_log(store, SnapshotKey::Theme) {
            match Theme::parse(&raw) {
                Some(theme) => settings.theme = theme,
                None => tracing::warn!("Ignoring unknown theme {}", raw),
            }
        }
        if let Some(key) = load_or_log(store, SnapshotKey::ApiKey) {
            settings.api_key = key;
        }
        if let Some(raw) = load_or_log(store, SnapshotKey::UseOllama) {
            match raw.parse::<bool>() {
                Ok(flag) => settings.use_ollama = flag,
                Err(_) => tracing::warn!("Ignoring unreadable useOllama value {}", raw),
            }
        }
        if let Some(model) = load_or_log(store, SnapshotKey::SelectedModel) {
            settings.selected_model = model;
        }
        if let Some(url) = load_or_log(store, SnapshotKey::OllamaBaseUrl) {
            settings.ollama_base_url = url;
        }
        settings
    }

    pub(crate) fn persist(&self, store: &dyn SnapshotStore) {
        persist_or_log(store, SnapshotKey::Theme, self.theme.as_str());
        if self.api_key.is_empty() {
            remove_or_log(store, SnapshotKey::ApiKey);
        } else {
            persist_or_log(store, SnapshotKey::ApiKey, &self.api_key);
        }
        persist_or_log(store, SnapshotKey::UseOllama, &self.use_ollama.to_string());
        persist_or_log(store, SnapshotKey::SelectedModel, &self.selected_model);
        persist_or_log(store, SnapshotKey::OllamaBaseUrl, &self.ollama_base_url);
    }

    /// Returns true when the Ollama endpoint changed.
    pub(crate) fn apply(&mut self, update: SettingsUpdate) -> bool {
        if let Some(theme) = update.theme {
            self.theme = theme;
        }
        if let Some(key) = update.api_key {
            self.api_key = key;
        }
        if let Some(flag) = update.use_ollama {
            self.use_ollama = flag;
        }
        if let Some(model) = update.selected_model {
            self.selected_model = model;
        }
        match update.ollama_base_url {
            Some(url) if url != self.ollama_base_url => {
                self.ollama_base_url = url;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ollama::DEFAULT_OLLAMA_URL;
    use crate::storage::MemoryStore;

    #[test]
    fn defaults_when_store_is_empty() {
        let store = MemoryStore::new();
        let settings = Settings::load(&store, DEFAULT_OLLAMA_URL);
        assert_eq!(settings, Settings::defaults(DEFAULT_OLLAMA_URL));
        assert_eq!(settings.theme, Theme::Dark);
        assert!(!settings.use_ollama);
    }

    #[test]
    fn persisted_values_are_restored() {
        let store = MemoryStore::new();
        let mut settings = Settings::defaults(DEFAULT_OLLAMA_URL);
        let changed = settings.apply(SettingsUpdate {
            theme: Some(Theme::Light),
            use_ollama: Some(true),
            selected_model: Some("mistral".to_string()),
            ollama_base_url: Some("http://gpu-box:11434/api".to_string()),
            ..SettingsUpdate::default()
        });
        assert!(changed);
        settings.persist(&store);
        assert_eq!(store.get(SnapshotKey::UseOllama).unwrap().as_deref(), Some("true"));
        assert_eq!(Settings::load(&store, DEFAULT_OLLAMA_URL), settings);
    }

    #[test]
    fn garbage_values_fall_back() {
        let store = MemoryStore::new();
        store.put(SnapshotKey::Theme, "sepia").unwrap();
        store.put(SnapshotKey::UseOllama, "maybe").unwrap();
        let settings = Settings::load(&store, DEFAULT_OLLAMA_URL);
        assert_eq!(settings.theme, Theme::Dark);
        assert!(!settings.use_ollama);
    }

    #[test]
    fn same_url_is_not_a_change() {
        let mut settings = Settings::defaults(DEFAULT_OLLAMA_URL);
        let update = SettingsUpdate {
            ollama_base_url: Some(DEFAULT_OLLAMA_URL.to_string()),
            ..SettingsUpdate::default()
        };
        assert!(!settings.apply(update));
        assert_eq!(Theme::Dark.toggled(), Theme::Light);
    }

    #[test]
    fn clearing_the_key_removes_it_from_storage() {
        let store = MemoryStore::new();
        let mut settings = Settings::defaults(DEFAULT_OLLAMA_URL);
        settings.apply(SettingsUpdate {
            api_key: Some("sk-secret".to_string()),
            ..SettingsUpdate::default()
        });
        settings.persist(&store);
        assert_eq!(store.get(SnapshotKey::ApiKey).unwrap().as_deref(), Some("sk-secret"));

        settings.apply(SettingsUpdate {
            api_key: Some(String::new()),
            ..SettingsUpdate::default()
        });
        settings.persist(&store);
        assert_eq!(store.get(SnapshotKey::ApiKey).unwrap(), None);
        assert_eq!(Settings::load(&store, DEFAULT_OLLAMA_URL).api_key, "");
    }

    #[test]
    fn view_never_contains_the_key() {
        let mut settings = Settings::defaults(DEFAULT_OLLAMA_URL);
        assert!(!settings.view().has_api_key);
        settings.apply(SettingsUpdate {
            api_key: Some("sk-secret".to_string()),
            ..SettingsUpdate::default()
        });
        let json = serde_json::to_value(settings.view()).unwrap();
        assert_eq!(json["hasApiKey"], true);
        assert!(json.get("apiKey").is_none());
        assert!(!json.to_string().contains("sk-secret"));
    }

    #[test]
    fn updates_use_front_end_field_names() {
        let update: SettingsUpdate =
            serde_json::from_str(r#"{"useOllama": true, "theme": "light"}"#).unwrap();
        assert_eq!(update.use_ollama, Some(true));
        assert_eq!(update.theme, Some(Theme::Light));
        assert!(update.api_key.is_none());
    }
}

use serde::{Deserialize, Serialize};

use crate::sink::{DocumentSink, StoreError};

const PREFERENCES_KEY: &str = "preferences";

/// UI color theme.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
    System,
}

/// Message list density.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    Compact,
    #[default]
    Cozy,
}

/// Composer behavior flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Composer {
    pub send_on_enter: bool,
    pub markdown_preview: bool,
}

impl Default for Composer {
    fn default() -> Self {
        Self {
            send_on_enter: true,
            markdown_preview: false,
        }
    }
}

/// Accessibility flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Accessibility {
    pub reduce_motion: bool,
    pub high_contrast: bool,
}

/// Local profile shown to the user; avatar is embedded image data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Profile {
    pub display_name: String,
    pub about: String,
    /// Base64-encoded image bytes, when set.
    pub avatar_data: Option<String>,
}

/// Process-wide preferences document.
///
/// Every field carries a serde default so documents written by older or
/// newer builds always load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Preferences {
    pub theme: Theme,
    pub density: Density,
    pub notifications_enabled: bool,
    pub keybinds: std::collections::BTreeMap<String, String>,
    pub composer: Composer,
    pub accessibility: Accessibility,
    pub onboarding_complete: bool,
    pub profile: Profile,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            density: Density::default(),
            notifications_enabled: true,
            keybinds: std::collections::BTreeMap::new(),
            composer: Composer::default(),
            accessibility: Accessibility::default(),
            onboarding_complete: false,
            profile: Profile::default(),
        }
    }
}

/// Load/save wrapper for the preferences document.
#[derive(Clone)]
pub struct PreferencesStore<S: DocumentSink> {
    sink: S,
}

impl<S: DocumentSink> PreferencesStore<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Load the document; a missing file yields the defaults.
    pub fn load(&self) -> Result<Preferences, StoreError> {
        let raw = match self.sink.read(PREFERENCES_KEY) {
            Ok(raw) => raw,
            Err(StoreError::NotFound) => return Ok(Preferences::default()),
            Err(err) => return Err(err),
        };
        serde_json::from_str(&raw).map_err(|err| StoreError::Serialization(err.to_string()))
    }

    pub fn save(&self, preferences: &Preferences) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(preferences)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        self.sink.write(PREFERENCES_KEY, &encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;

    #[test]
    fn missing_document_loads_defaults() {
        let store = PreferencesStore::new(InMemorySink::default());
        let prefs = store.load().expect("load should work");
        assert_eq!(prefs, Preferences::default());
        assert!(prefs.notifications_enabled);
        assert!(prefs.composer.send_on_enter);
    }

    #[test]
    fn round_trip_preserves_fields() {
        let store = PreferencesStore::new(InMemorySink::default());
        let mut prefs = Preferences::default();
        prefs.theme = Theme::Light;
        prefs.onboarding_complete = true;
        prefs.profile.display_name = "Alice".to_owned();
        prefs
            .keybinds
            .insert("toggle_sidebar".to_owned(), "ctrl+b".to_owned());

        store.save(&prefs).expect("save should work");
        let loaded = store.load().expect("load should work");
        assert_eq!(loaded, prefs);
    }

    #[test]
    fn load_tolerates_unknown_and_missing_fields() {
        let sink = InMemorySink::default();
        sink.write(
            "preferences",
            "{\"theme\":\"system\",\"future_field\":{\"x\":1}}",
        )
        .expect("seed should work");

        let store = PreferencesStore::new(sink);
        let prefs = store.load().expect("load should tolerate unknown fields");
        assert_eq!(prefs.theme, Theme::System);
        assert_eq!(prefs.density, Density::Cozy);
    }
}

//! Indexer settings. All fields live in the shared [`Settings`] object; the
//! wrapper exists so agent-specific knobs can be added without touching the
//! base crate.

use std::ops::Deref;

use serde::Deserialize;

use polywatch_base::settings::Settings;

/// Settings for the indexer agent.
#[derive(Debug, Deserialize)]
pub struct IndexerSettings {
    #[serde(flatten)]
    base: Settings,
}

impl Deref for IndexerSettings {
    type Target = Settings;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl AsRef<Settings> for IndexerSettings {
    fn as_ref(&self) -> &Settings {
        &self.base
    }
}

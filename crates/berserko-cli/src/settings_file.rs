use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use berserko_core::SettingsStore;
use tracing::debug;

/// Settings kept as a flat JSON object on disk.
///
/// Writes stay in memory until [`JsonFileSettings::flush`] is called.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonFileSettings {
    /// Opens `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a settings file", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        debug!(path = %path.display(), keys = values.len(), "settings loaded");
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        debug!(path = %self.path.display(), "settings written");
        Ok(())
    }
}

impl SettingsStore for JsonFileSettings {
    fn load_setting(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn save_setting(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => self.values.insert(key.to_owned(), value.to_owned()),
            None => self.values.remove(key),
        };
    }
}

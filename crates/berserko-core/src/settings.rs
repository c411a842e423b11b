//! Persisting the configuration through the host's key/value settings store.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::{Config, Level};

pub const SETTINGS_PREFIX: &str = "Berserko";

const MARKER: &str = "saved_config_marker";
const DOMAIN: &str = "domain_dns_name";
const KDC: &str = "kdc_host";
const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const PLAINHOST_EXPAND: &str = "plainhost_expand";
const IGNORE_NTLM: &str = "ignore_ntlm_servers";
const ALERT_LEVEL: &str = "alert_level";
const LOG_LEVEL: &str = "log_level";
const STRATEGY: &str = "auth_strategy";

/// Key/value persistence offered by the host. `None` deletes a key.
pub trait SettingsStore {
    fn load_setting(&self, key: &str) -> Option<String>;
    fn save_setting(&mut self, key: &str, value: Option<&str>);
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("saved setting {key} has invalid value {value:?}")]
    Invalid { key: String, value: String },
}

/// In-process store, for tests and hosts without persistence.
#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    values: HashMap<String, String>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
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

fn key(name: &str) -> String {
    format!("{SETTINGS_PREFIX}_{name}")
}

pub fn saved_config_available(store: &impl SettingsStore) -> bool {
    store.load_setting(&key(MARKER)).is_some()
}

/// Writes every persisted option. The password is stored only when `save_password` is
/// set; the master switch is never stored.
pub fn save_config(store: &mut impl SettingsStore, config: &Config) {
    let password = config.save_password.then_some(config.password.as_str());

    let entries = [
        (MARKER, Some("x".to_owned())),
        (DOMAIN, Some(config.domain.clone())),
        (KDC, Some(config.kdc.clone())),
        (USERNAME, Some(config.username.clone())),
        (PASSWORD, password.map(str::to_owned)),
        (PLAINHOST_EXPAND, Some(config.plainhost_expand.to_string())),
        (IGNORE_NTLM, Some(config.ignore_ntlm_servers.to_string())),
        (ALERT_LEVEL, Some(config.alert_level.as_u8().to_string())),
        (LOG_LEVEL, Some(config.log_level.as_u8().to_string())),
        (STRATEGY, Some(config.strategy.to_string())),
    ];

    for (name, value) in &entries {
        store.save_setting(&key(name), value.as_deref());
    }

    info!(domain = %config.domain, "configuration saved");
}

/// Restores a saved configuration, or `None` when nothing was ever saved.
///
/// The result is always disabled. Missing keys fall back to the defaults.
pub fn load_config(store: &impl SettingsStore) -> Result<Option<Config>, SettingsError> {
    if !saved_config_available(store) {
        debug!("no saved configuration");
        return Ok(None);
    }

    let defaults = Config::default();
    let text = |name: &str| store.load_setting(&key(name));

    let password = text(PASSWORD);
    let config = Config {
        enabled: false,
        domain: text(DOMAIN).unwrap_or_default(),
        kdc: text(KDC).unwrap_or_default(),
        username: text(USERNAME).unwrap_or_default(),
        save_password: password.is_some(),
        password: password.unwrap_or_default(),
        strategy: parsed(store, STRATEGY, |v| v.parse().ok())?.unwrap_or(defaults.strategy),
        plainhost_expand: parsed(store, PLAINHOST_EXPAND, |v| Some(v == "true"))?
            .unwrap_or(defaults.plainhost_expand),
        ignore_ntlm_servers: parsed(store, IGNORE_NTLM, |v| Some(v == "true"))?
            .unwrap_or(defaults.ignore_ntlm_servers),
        alert_level: parsed(store, ALERT_LEVEL, parse_level)?.unwrap_or(defaults.alert_level),
        log_level: parsed(store, LOG_LEVEL, parse_level)?.unwrap_or(defaults.log_level),
    };

    info!(domain = %config.domain, "configuration loaded");
    Ok(Some(config))
}

fn parsed<T>(
    store: &impl SettingsStore,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, SettingsError> {
    let full_key = key(name);
    store
        .load_setting(&full_key)
        .map(|value| {
            parse(&value).ok_or_else(|| SettingsError::Invalid {
                key: full_key.clone(),
                value,
            })
        })
        .transpose()
}

fn parse_level(value: &str) -> Option<Level> {
    value.trim().parse::<u8>().ok().and_then(Level::from_u8)
}

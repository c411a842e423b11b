use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// When the engine attaches Negotiate tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Strategy {
    /// Add a token to every outgoing request for an in-scope host.
    #[serde(rename = "PROACTIVE", alias = "proactive")]
    Proactive,
    /// React to the first 401 from a host, then behave proactively for it.
    #[serde(rename = "PROACTIVE_AFTER_401", alias = "proactive_after_401")]
    ProactiveAfter401,
    /// Only answer 401 challenges, by replaying the request with a token.
    #[default]
    #[serde(rename = "REACTIVE_401", alias = "reactive_401")]
    Reactive401,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proactive => "PROACTIVE",
            Self::ProactiveAfter401 => "PROACTIVE_AFTER_401",
            Self::Reactive401 => "REACTIVE_401",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proactive" => Ok(Self::Proactive),
            "proactive_after_401" => Ok(Self::ProactiveAfter401),
            "reactive_401" => Ok(Self::Reactive401),
            _ => Err(UnknownOption(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised option value {0:?}")]
pub struct UnknownOption(pub String);

/// Verbosity shared by the alert and log channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Level {
    None = 0,
    #[default]
    Normal = 1,
    Verbose = 2,
}

impl Level {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Normal),
            2 => Some(Self::Verbose),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Level {
    type Error = UnknownOption;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or_else(|| UnknownOption(value.to_string()))
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        level.as_u8()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch. Never persisted; always starts off.
    #[serde(skip_serializing)]
    pub enabled: bool,
    /// DNS name of the domain (not the NetBIOS name).
    pub domain: String,
    pub kdc: String,
    /// Plain account name, without any domain qualifier.
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    pub save_password: bool,
    pub strategy: Strategy,
    /// Treat dot-less host names as members of the domain.
    pub plainhost_expand: bool,
    /// Leave hosts that also offer NTLM alone.
    pub ignore_ntlm_servers: bool,
    pub alert_level: Level,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            domain: String::new(),
            kdc: String::new(),
            username: String::new(),
            password: String::new(),
            save_password: false,
            strategy: Strategy::Reactive401,
            plainhost_expand: true,
            ignore_ntlm_servers: false,
            alert_level: Level::Normal,
            log_level: Level::Normal,
        }
    }
}

impl Config {
    /// Kerberos realm: the domain name upper-cased.
    pub fn realm(&self) -> String {
        self.domain.to_uppercase()
    }

    pub fn changes_to(&self, next: &Self) -> ConfigChange {
        ConfigChange {
            realm_changed: self.domain != next.domain || self.kdc != next.kdc,
            credentials_changed: self.username != next.username || self.password != next.password,
        }
    }

    fn masked_password(&self) -> &'static str {
        if self.password.is_empty() { "" } else { "****" }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("enabled", &self.enabled)
            .field("domain", &self.domain)
            .field("kdc", &self.kdc)
            .field("username", &self.username)
            .field("password", &self.masked_password())
            .field("save_password", &self.save_password)
            .field("strategy", &self.strategy)
            .field("plainhost_expand", &self.plainhost_expand)
            .field("ignore_ntlm_servers", &self.ignore_ntlm_servers)
            .field("alert_level", &self.alert_level)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Domain DNS Name     : {}", self.domain)?;
        writeln!(f, "KDC Host            : {}", self.kdc)?;
        writeln!(f, "Username            : {}", self.username)?;
        writeln!(f, "Password            : {}", self.masked_password())?;
        writeln!(f, "Save password       : {}", self.save_password)?;
        writeln!(f, "Include plainhosts  : {}", self.plainhost_expand)?;
        writeln!(f, "Ignore NTLM servers : {}", self.ignore_ntlm_servers)?;
        writeln!(f, "Alert level         : {}", self.alert_level.as_u8())?;
        writeln!(f, "Logging level       : {}", self.log_level.as_u8())?;
        write!(f, "Auth strategy       : {}", self.strategy)
    }
}

/// Which parts of the configuration moved between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigChange {
    /// Domain or KDC changed: session and working set are both stale.
    pub realm_changed: bool,
    /// Username or password changed: the session is stale.
    pub credentials_changed: bool,
}

impl ConfigChange {
    pub fn invalidates_session(self) -> bool {
        self.realm_changed || self.credentials_changed
    }
}

/// An immutable view of the configuration, tagged with the epoch it belongs to.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    config: Arc<Config>,
    epoch: u64,
}

impl ConfigSnapshot {
    /// Bumped every time the domain, KDC or credentials change.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Deref for ConfigSnapshot {
    type Target = Config;

    fn deref(&self) -> &Config {
        &self.config
    }
}

/// Holds the current configuration; readers always get a whole snapshot.
#[derive(Debug)]
pub struct ConfigHolder {
    current: RwLock<ConfigSnapshot>,
}

impl ConfigHolder {
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(ConfigSnapshot {
                config: Arc::new(config),
                epoch: 0,
            }),
        }
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps in `next` and reports what changed relative to the previous snapshot.
    pub fn replace(&self, next: Config) -> (ConfigSnapshot, ConfigChange) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let change = current.config.changes_to(&next);
        let epoch = if change.invalidates_session() {
            current.epoch + 1
        } else {
            current.epoch
        };

        *current = ConfigSnapshot {
            config: Arc::new(next),
            epoch,
        };

        if change.invalidates_session() {
            info!(epoch, ?change, "configuration epoch advanced");
        } else {
            debug!(epoch, "configuration replaced");
        }

        (current.clone(), change)
    }

    /// Applies `edit` to a copy of the current configuration and swaps it in.
    pub fn update(&self, edit: impl FnOnce(&mut Config)) -> (ConfigSnapshot, ConfigChange) {
        let mut next = (*self.snapshot().config).clone();
        edit(&mut next);
        self.replace(next)
    }
}

impl Default for ConfigHolder {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

//! Host name normalisation and domain membership.

use crate::config::Config;

/// Pure view over a configuration snapshot answering "is this host ours" questions.
#[derive(Debug, Clone, Copy)]
pub struct ScopeResolver<'a> {
    config: &'a Config,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Qualifies a plain (dot-less) host name with the configured domain.
    pub fn expand(&self, hostname: &str) -> String {
        if is_plain_hostname(hostname) {
            format!("{hostname}.{}", self.config.domain.to_lowercase())
        } else {
            hostname.to_owned()
        }
    }

    /// Expanded, lower-cased form used as the working-set key.
    pub fn canonical(&self, hostname: &str) -> String {
        self.expand(hostname).to_lowercase()
    }

    pub fn is_in_scope(&self, hostname: &str) -> bool {
        if self.config.plainhost_expand && is_plain_hostname(hostname) {
            return true;
        }

        self.canonical(hostname)
            .ends_with(&self.config.domain.to_lowercase())
    }

    /// `http/<fqdn>@<REALM>`
    pub fn to_service_principal(&self, hostname: &str) -> String {
        format!("http/{}@{}", self.canonical(hostname), self.config.realm())
    }

    /// `<user>@<REALM>`
    pub fn to_user_principal(&self, username: &str) -> String {
        format!("{}@{}", username.to_lowercase(), self.config.realm())
    }
}

pub fn is_plain_hostname(hostname: &str) -> bool {
    !hostname.contains('.')
}

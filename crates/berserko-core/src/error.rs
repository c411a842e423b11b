use std::fmt;

/// Why the KDC refused the configured principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialProblem {
    UnknownUser,
    BadPassword,
    BlankPassword,
}

impl fmt::Display for CredentialProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownUser => write!(f, "username appears to be invalid"),
            Self::BadPassword => write!(f, "password appears to be invalid"),
            Self::BlankPassword => write!(f, "password appears to be invalid (it is blank)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("configuration incomplete: {0}")]
    ConfigIncomplete(&'static str),

    #[error("credentials rejected for {principal}: {problem}")]
    CredentialInvalid {
        principal: String,
        problem: CredentialProblem,
    },

    #[error("couldn't find KDC {kdc}")]
    HostUnresolvable { kdc: String },

    #[error("ticket-granting ticket not found, it may have expired")]
    SessionExpired,

    #[error("service name {spn} not recognised by KDC")]
    ServiceUnknown { spn: String },

    #[error("configuration changed while the exchange was in flight")]
    StaleConfiguration,

    #[error("challenge decode failure: {0}")]
    ChallengeDecodeFailure(String),

    #[error("{0}")]
    Other(String),
}

impl AuthError {
    /// Errors after which no further acquisition is attempted in this configuration epoch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConfigIncomplete(_)
                | Self::CredentialInvalid { .. }
                | Self::HostUnresolvable { .. }
                | Self::Other(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The KDC name did not resolve.
    UnknownHost,
    /// Talking to the KDC failed after it resolved.
    Transport,
    /// The security package itself reported the failure.
    Package,
}

/// Failure reported by a [`crate::provider::SecurityContextProvider`].
///
/// The message is kept verbatim: classification into [`AuthError`] matches well-known
/// substrings emitted by Kerberos implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_host(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::UnknownHost, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transport, message)
    }

    pub fn package(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Package, message)
    }

    pub fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn mentions(&self, markers: &[&str]) -> bool {
        markers.iter().any(|marker| self.message.contains(marker))
    }
}

impl From<sspi::Error> for ProviderError {
    fn from(error: sspi::Error) -> Self {
        Self::package(error.to_string())
    }
}

/// Substrings used to recognise KDC error conditions.
///
/// Each list carries the MIT/JGSS wording first and the RFC 4120 error-code name second.
pub(crate) mod markers {
    pub const CLIENT_UNKNOWN: &[&str] = &[
        "Client not found in Kerberos database",
        "KDC_ERR_C_PRINCIPAL_UNKNOWN",
    ];
    pub const PREAUTH_FAILED: &[&str] = &[
        "Pre-authentication information was invalid",
        "KDC_ERR_PREAUTH_FAILED",
    ];
    pub const SERVICE_UNKNOWN: &[&str] = &[
        "Server not found in Kerberos database",
        "KDC_ERR_S_PRINCIPAL_UNKNOWN",
    ];
    pub const NO_TGT: &[&str] = &[
        "Failed to find any Kerberos tgt",
        "KRB_AP_ERR_TKT_EXPIRED",
        "KDC_ERR_TGT_REVOKED",
    ];
    pub const WRONG_REALM: &[&str] = &["(68)", "KDC_ERR_WRONG_REALM"];
    pub const AP_REP_MISMATCH: &str = "AP_REP token id does not match";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_matches_either_wording() {
        let mit = ProviderError::package("Client not found in Kerberos database (6)");
        let rfc = ProviderError::package("KDC error: KDC_ERR_C_PRINCIPAL_UNKNOWN");
        assert!(mit.mentions(markers::CLIENT_UNKNOWN));
        assert!(rfc.mentions(markers::CLIENT_UNKNOWN));
        assert!(!rfc.mentions(markers::PREAUTH_FAILED));
    }

    #[test]
    fn session_expired_is_the_only_recoverable_session_error() {
        assert!(!AuthError::SessionExpired.is_terminal());
        assert!(
            AuthError::CredentialInvalid {
                principal: "bob@EXAMPLE.COM".into(),
                problem: CredentialProblem::BadPassword,
            }
            .is_terminal()
        );
        assert!(AuthError::ConfigIncomplete("Domain DNS name is blank").is_terminal());
    }
}

//! Operator-triggered checks of the domain settings and credentials.
//!
//! These run outside the shared session: a failure here never makes the session sticky.

use std::fmt;
use std::time::Duration;

use tracing::{info, instrument};

use crate::config::Config;
use crate::error::{ProviderErrorKind, markers};
use crate::kdc::{self, ProbeError};
use crate::provider::{LoginRequest, SecurityContextProvider};
use crate::scope::ScopeResolver;
use crate::validate::Field;

/// Principal used to provoke a "client not found" answer from the KDC.
pub const PROBE_PRINCIPAL: &str = "berserkotest";

pub const KDC_PROBE_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainCheck {
    Reachable,
    NotSet(Field),
    Unresolvable(String),
    PortUnreachable(String),
    WrongRealm,
    KerberosFailure(String),
}

impl DomainCheck {
    pub fn is_success(&self) -> bool {
        *self == Self::Reachable
    }
}

impl fmt::Display for DomainCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable => f.write_str("Successfully contacted Kerberos service"),
            Self::NotSet(field) => write!(f, "{field} not set yet"),
            Self::Unresolvable(kdc) => write!(f, "Couldn't resolve KDC hostname: {kdc}"),
            Self::PortUnreachable(detail) => {
                write!(f, "Couldn't connect to port 88 (Kerberos) on KDC: {detail}")
            }
            Self::WrongRealm => f.write_str(
                "Failed to contact Kerberos service - error code 68 suggests that KDC is valid but domain DNS name is wrong",
            ),
            Self::KerberosFailure(message) => write!(
                f,
                "Connected to port 88, but failed to contact Kerberos service: {message}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialCheck {
    Acquired,
    NotSet(Field),
    InvalidUsername,
    InvalidPassword,
    Failed(String),
}

impl CredentialCheck {
    pub fn is_success(&self) -> bool {
        *self == Self::Acquired
    }
}

impl fmt::Display for CredentialCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquired => f.write_str("TGT successfully acquired"),
            Self::NotSet(field) => write!(f, "{field} not set yet"),
            Self::InvalidUsername => {
                f.write_str("Failed to acquire TGT - username appears to be invalid.")
            }
            Self::InvalidPassword => f.write_str(
                "Failed to acquire TGT - password appears to be invalid. Be careful not to lock out the account with more tests.",
            ),
            Self::Failed(message) => write!(f, "Failed to acquire TGT: {message}"),
        }
    }
}

/// Probes port 88 on the KDC, then asks it to log in a principal that should not exist.
pub fn test_domain<P: SecurityContextProvider>(provider: &P, config: &Config) -> DomainCheck {
    test_domain_with(provider, config, |kdc| kdc::probe_kdc(kdc, KDC_PROBE_TIMEOUT))
}

#[instrument(name = "diagnostics.domain", level = "info", skip_all, fields(domain = %config.domain, kdc = %config.kdc))]
pub fn test_domain_with<P: SecurityContextProvider>(
    provider: &P,
    config: &Config,
    probe: impl FnOnce(&str) -> Result<(), ProbeError>,
) -> DomainCheck {
    if config.domain.is_empty() {
        return DomainCheck::NotSet(Field::Domain);
    }
    if config.kdc.is_empty() {
        return DomainCheck::NotSet(Field::Kdc);
    }

    match probe(&config.kdc) {
        Ok(()) => {}
        Err(ProbeError::Unresolvable(kdc)) => return DomainCheck::Unresolvable(kdc),
        Err(other) => return DomainCheck::PortUnreachable(other.to_string()),
    }

    let request = LoginRequest {
        realm: config.realm(),
        kdc: config.kdc.clone(),
        principal: ScopeResolver::new(config).to_user_principal(PROBE_PRINCIPAL),
        password: PROBE_PRINCIPAL.to_owned(),
    };

    let check = match provider.login(&request) {
        Ok(_) => DomainCheck::Reachable,
        Err(e) if e.mentions(markers::CLIENT_UNKNOWN) => DomainCheck::Reachable,
        Err(e) if e.kind() == ProviderErrorKind::UnknownHost => {
            DomainCheck::Unresolvable(config.kdc.clone())
        }
        Err(e) if e.mentions(markers::WRONG_REALM) => DomainCheck::WrongRealm,
        Err(e) => DomainCheck::KerberosFailure(e.message().to_owned()),
    };

    info!(%check, "domain check finished");
    check
}

/// Logs the configured principal in with a throwaway session.
#[instrument(name = "diagnostics.credentials", level = "info", skip_all, fields(user = %config.username))]
pub fn test_credentials<P: SecurityContextProvider>(provider: &P, config: &Config) -> CredentialCheck {
    let blank = [
        (config.username.is_empty(), Field::Username),
        (config.domain.is_empty(), Field::Domain),
        (config.kdc.is_empty(), Field::Kdc),
    ];
    if let Some(&(_, field)) = blank.iter().find(|(is_blank, _)| *is_blank) {
        return CredentialCheck::NotSet(field);
    }

    let request = LoginRequest {
        realm: config.realm(),
        kdc: config.kdc.clone(),
        principal: ScopeResolver::new(config).to_user_principal(&config.username),
        password: config.password.clone(),
    };

    let check = match provider.login(&request) {
        Ok(_) => CredentialCheck::Acquired,
        Err(e) if e.mentions(markers::CLIENT_UNKNOWN) => CredentialCheck::InvalidUsername,
        Err(e) if e.mentions(markers::PREAUTH_FAILED) => CredentialCheck::InvalidPassword,
        Err(e) => CredentialCheck::Failed(e.message().to_owned()),
    };

    info!(%check, "credential check finished");
    check
}

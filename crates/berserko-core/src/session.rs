use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, instrument};

use crate::config::{Config, ConfigSnapshot, Level};
use crate::error::{AuthError, CredentialProblem, ProviderError, ProviderErrorKind, markers};
use crate::notify::Notifier;
use crate::provider::{LoginRequest, SecurityContextProvider};
use crate::scope::ScopeResolver;

/// Observable state of the session, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Acquired,
    FailedTerminal(AuthError),
}

enum SessionState<S> {
    Uninitialized,
    Acquired { session: S, epoch: u64 },
    FailedTerminal { error: AuthError, epoch: u64 },
}

impl<S> SessionState<S> {
    fn epoch(&self) -> Option<u64> {
        match self {
            Self::Uninitialized => None,
            Self::Acquired { epoch, .. } | Self::FailedTerminal { epoch, .. } => Some(*epoch),
        }
    }
}

struct Slot<S> {
    state: SessionState<S>,
    /// Newest configuration epoch seen; older snapshots never log in.
    newest_epoch: u64,
}

/// Owns the Kerberos login for the configured principal.
///
/// One lock guards both the state and every call into the provider, so acquisition,
/// token generation and error-token processing never interleave.
pub struct KerberosSessionManager<P: SecurityContextProvider> {
    provider: P,
    notifier: Notifier,
    state: Mutex<Slot<P::Session>>,
}

impl<P: SecurityContextProvider> KerberosSessionManager<P> {
    pub fn new(provider: P, notifier: Notifier) -> Self {
        Self {
            provider,
            notifier,
            state: Mutex::new(Slot {
                state: SessionState::Uninitialized,
                newest_epoch: 0,
            }),
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn status(&self) -> SessionStatus {
        match &self.lock().state {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Acquired { .. } => SessionStatus::Acquired,
            SessionState::FailedTerminal { error, .. } => {
                SessionStatus::FailedTerminal(error.clone())
            }
        }
    }

    /// Makes sure a session exists for `config`, logging in if needed.
    ///
    /// After a terminal failure this returns the recorded error without contacting the
    /// KDC until the configuration epoch changes or [`Self::invalidate`] is called.
    pub fn ensure_session(&self, config: &ConfigSnapshot) -> Result<(), AuthError> {
        let mut slot = self.lock();
        self.ensure_locked(&mut slot, config).map(|_| ())
    }

    /// Runs `f` against a live session while holding the provider lock.
    pub fn with_session<T>(
        &self,
        config: &ConfigSnapshot,
        f: impl FnOnce(&P, &mut P::Session) -> T,
    ) -> Result<T, AuthError> {
        let mut slot = self.lock();
        let session = self.ensure_locked(&mut slot, config)?;
        Ok(f(&self.provider, session))
    }

    /// Runs `f` under the provider lock, without requiring a session.
    pub fn serialized<T>(&self, f: impl FnOnce(&P) -> T) -> T {
        let _slot = self.lock();
        f(&self.provider)
    }

    /// Drops the session and any recorded terminal failure.
    pub fn invalidate(&self) {
        let mut slot = self.lock();
        if !matches!(slot.state, SessionState::Uninitialized) {
            debug!("clearing login context");
        }
        slot.state = SessionState::Uninitialized;
    }

    /// Drops the session because the configuration moved to `config`'s epoch.
    ///
    /// Snapshots older than `config` can no longer trigger a login.
    pub fn invalidate_for(&self, config: &ConfigSnapshot) {
        let mut slot = self.lock();
        slot.newest_epoch = slot.newest_epoch.max(config.epoch());
        if !matches!(slot.state, SessionState::Uninitialized) {
            debug!(epoch = config.epoch(), "clearing login context");
        }
        slot.state = SessionState::Uninitialized;
    }

    /// Records a terminal failure met while using the session acquired for `config`.
    ///
    /// Returns `false` when the session already failed or belongs to another epoch, in
    /// which case the caller should stay quiet.
    pub fn record_failure(&self, config: &ConfigSnapshot, error: AuthError) -> bool {
        let mut slot = self.lock();
        match slot.state {
            SessionState::Acquired { epoch, .. } if epoch == config.epoch() => {
                debug!(%error, "session marked as failed");
                slot.state = SessionState::FailedTerminal { error, epoch };
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<P::Session>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_locked<'s>(
        &self,
        slot: &'s mut Slot<P::Session>,
        config: &ConfigSnapshot,
    ) -> Result<&'s mut P::Session, AuthError> {
        let stale = config.epoch() < slot.newest_epoch;
        slot.newest_epoch = slot.newest_epoch.max(config.epoch());
        let state = &mut slot.state;

        if state.epoch().is_some_and(|epoch| epoch < config.epoch()) {
            debug!(epoch = config.epoch(), "configuration changed, discarding session");
            *state = SessionState::Uninitialized;
        }

        if let SessionState::FailedTerminal { error, .. } = state {
            return Err(error.clone());
        }

        if matches!(state, SessionState::Uninitialized) {
            if stale {
                debug!(epoch = config.epoch(), "snapshot predates the configuration, not logging in");
                return Err(AuthError::StaleConfiguration);
            }
            match self.acquire(config) {
                Ok(session) => {
                    *state = SessionState::Acquired {
                        session,
                        epoch: config.epoch(),
                    };
                }
                Err(error) => {
                    *state = SessionState::FailedTerminal {
                        error: error.clone(),
                        epoch: config.epoch(),
                    };
                    return Err(error);
                }
            }
        }

        match state {
            SessionState::Acquired { session, .. } => Ok(session),
            _ => Err(AuthError::Other("login context unavailable".to_owned())),
        }
    }

    #[instrument(name = "kerberos.login", level = "info", skip_all, fields(realm = %config.realm(), kdc = %config.kdc))]
    fn acquire(&self, config: &ConfigSnapshot) -> Result<P::Session, AuthError> {
        let blank = [
            (config.domain.is_empty(), "Domain DNS name"),
            (config.kdc.is_empty(), "KDC host"),
            (config.username.is_empty(), "Username"),
        ];
        if let Some(&(_, field)) = blank.iter().find(|(is_blank, _)| *is_blank) {
            let message = format!("{field} is blank - not trying to acquire TGT");
            self.notifier.alert_and_log(config, Level::Normal, &message);
            return Err(AuthError::ConfigIncomplete(field));
        }

        let realm = config.realm();
        let principal = ScopeResolver::new(config).to_user_principal(&config.username);
        self.notifier.log(
            config,
            Level::Verbose,
            &format!(
                "Attempting to acquire TGT for realm {realm} at KDC {} with user {}",
                config.kdc, config.username
            ),
        );

        let request = LoginRequest {
            realm,
            kdc: config.kdc.clone(),
            principal,
            password: config.password.clone(),
        };

        match self.provider.login(&request) {
            Ok(session) => {
                self.notifier
                    .log(config, Level::Normal, "TGT successfully acquired");
                Ok(session)
            }
            Err(error) => {
                let (auth_error, message) = classify_login_failure(config, &request, &error);
                self.notifier.alert_and_log(config, Level::Normal, &message);
                self.notifier.log(
                    config,
                    Level::Verbose,
                    &format!("Login failure detail: {error}"),
                );
                Err(auth_error)
            }
        }
    }
}

/// Whether the KDC refused the principal itself rather than the request.
pub(crate) fn credential_problem(config: &Config, error: &ProviderError) -> Option<CredentialProblem> {
    if error.mentions(markers::CLIENT_UNKNOWN) {
        Some(CredentialProblem::UnknownUser)
    } else if error.mentions(markers::PREAUTH_FAILED) {
        Some(if config.password.is_empty() {
            CredentialProblem::BlankPassword
        } else {
            CredentialProblem::BadPassword
        })
    } else {
        None
    }
}

fn classify_login_failure(
    config: &ConfigSnapshot,
    request: &LoginRequest,
    error: &ProviderError,
) -> (AuthError, String) {
    let prefix = format!(
        "Failed to acquire TGT on domain {} with user {}",
        config.domain, config.username
    );

    if error.kind() == ProviderErrorKind::UnknownHost {
        let message = format!(
            "{prefix} - couldn't find DC {}. Not making further attempts until domain settings are changed.",
            config.kdc
        );
        return (
            AuthError::HostUnresolvable {
                kdc: config.kdc.clone(),
            },
            message,
        );
    }

    match credential_problem(config, error) {
        Some(problem) => (
            AuthError::CredentialInvalid {
                principal: request.principal.clone(),
                problem,
            },
            format!(
                "{prefix} - {problem}. Not making further attempts until credentials are changed."
            ),
        ),
        None => (
            AuthError::Other(error.message().to_owned()),
            format!(
                "{prefix}: {error}. Not making further attempts until domain settings are changed."
            ),
        ),
    }
}

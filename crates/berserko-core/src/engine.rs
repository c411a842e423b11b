use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::{Config, ConfigChange, ConfigHolder, ConfigSnapshot, Level, Strategy};
use crate::diagnostics::{self, CredentialCheck, DomainCheck};
use crate::error::{AuthError, markers};
use crate::http::{
    self, AUTHORIZATION, HttpMessage, HttpParseError, NEGOTIATE, NTLM, WWW_AUTHENTICATE,
    auth_scheme,
};
use crate::negotiator::{NegotiatedContext, TokenNegotiator};
use crate::notify::{AlertSink, Notifier};
use crate::provider::SecurityContextProvider;
use crate::proxy::{HttpExchange, HttpService, ProxyHost, ToolOrigin};
use crate::scope::ScopeResolver;
use crate::session::KerberosSessionManager;
use crate::working_set::WorkingSetCache;

/// How a failed replay is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayReport {
    AlertAndLog,
    AlertOnly,
}

/// The intercept-time decision engine.
///
/// Called for every request before it is sent and every response after it arrives;
/// attaches Negotiate tokens according to the configured [`Strategy`].
pub struct AuthDecisionEngine<P: SecurityContextProvider, H: ProxyHost> {
    config: ConfigHolder,
    sessions: KerberosSessionManager<P>,
    working_set: WorkingSetCache,
    host: H,
    notifier: Notifier,
}

impl<P: SecurityContextProvider, H: ProxyHost> AuthDecisionEngine<P, H> {
    pub fn new(config: Config, provider: P, host: H, alerts: Arc<dyn AlertSink>) -> Self {
        let notifier = Notifier::new(alerts);
        Self {
            config: ConfigHolder::new(config),
            sessions: KerberosSessionManager::new(provider, notifier.clone()),
            working_set: WorkingSetCache::new(),
            host,
            notifier,
        }
    }

    pub fn config(&self) -> ConfigSnapshot {
        self.config.snapshot()
    }

    pub fn sessions(&self) -> &KerberosSessionManager<P> {
        &self.sessions
    }

    pub fn working_set(&self) -> &WorkingSetCache {
        &self.working_set
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn replace_config(&self, next: Config) -> ConfigChange {
        let (snapshot, change) = self.config.replace(next);
        self.apply_change(&snapshot, change);
        change
    }

    pub fn update_config(&self, edit: impl FnOnce(&mut Config)) -> ConfigChange {
        let (snapshot, change) = self.config.update(edit);
        self.apply_change(&snapshot, change);
        change
    }

    fn apply_change(&self, snapshot: &ConfigSnapshot, change: ConfigChange) {
        if change.invalidates_session() {
            self.notifier
                .log(snapshot, Level::Verbose, "Clearing login context");
            self.sessions.invalidate_for(snapshot);
        }
        if change.realm_changed {
            self.notifier
                .log(snapshot, Level::Verbose, "Clearing working set");
            self.working_set.reset();
        }
    }

    /// Entry point for the proxy's intercept hook.
    ///
    /// Never fails: malformed messages are logged and passed through untouched.
    pub fn process_http_message(&self, tool: ToolOrigin, is_request: bool, exchange: &mut HttpExchange) {
        let config = self.config.snapshot();
        if !config.enabled {
            return;
        }

        let outcome = if is_request {
            self.process_request(&config, exchange)
        } else {
            self.process_response(&config, tool, exchange)
        };

        if let Err(error) = outcome {
            warn!(host = %exchange.service.host, %error, "leaving message untouched");
            self.notifier.log(
                &config,
                Level::Normal,
                &format!("Exception in processHttpMessage: {error}"),
            );
        }
    }

    #[instrument(name = "request", level = "debug", skip_all, fields(host = %exchange.service.host))]
    fn process_request(
        &self,
        config: &ConfigSnapshot,
        exchange: &mut HttpExchange,
    ) -> Result<(), HttpParseError> {
        let host = exchange.service.host.clone();
        let scope = ScopeResolver::new(config);

        let active = match config.strategy {
            Strategy::Proactive => scope.is_in_scope(&host),
            Strategy::ProactiveAfter401 => self.working_set.contains(&scope, &host),
            Strategy::Reactive401 => false,
        };
        if !active {
            return Ok(());
        }

        let request = HttpMessage::parse(&exchange.request)?;

        if let Some(existing) = request.first_header(AUTHORIZATION) {
            self.notifier.alert_and_log(
                config,
                Level::Normal,
                &format!(
                    "Authorization header ({}) already applied for in-scope host {host}; ignoring this host. Perhaps Burp \"Platform Authentication\" is configured against this host?",
                    auth_scheme(existing)
                ),
            );
            return Ok(());
        }

        let spn = scope.to_service_principal(&host);
        self.notifier
            .log(config, Level::Verbose, &format!("Getting token for {spn}"));
        let Some(negotiated) = self.acquire_token(config, &spn) else {
            return Ok(());
        };

        self.notifier.log(
            config,
            Level::Verbose,
            &format!("Setting token in request to {host}"),
        );
        exchange.request = http::append_header(
            &exchange.request,
            AUTHORIZATION,
            &negotiated.authorization_value(),
        )?;

        if config.strategy == Strategy::Proactive {
            self.working_set.add(&scope, &host);
        }

        Ok(())
    }

    #[instrument(name = "response", level = "debug", skip_all, fields(host = %exchange.service.host, ?tool))]
    fn process_response(
        &self,
        config: &ConfigSnapshot,
        tool: ToolOrigin,
        exchange: &mut HttpExchange,
    ) -> Result<(), HttpParseError> {
        let Some(raw_response) = exchange.response.as_deref() else {
            return Ok(());
        };

        let request = HttpMessage::parse(&exchange.request)?;
        if is_self_issued_replay(tool, &request) {
            debug!("skipping response to our own replay");
            return Ok(());
        }

        let response = HttpMessage::parse(raw_response)?;
        let host = exchange.service.host.clone();
        if !self.is_negotiate_challenge(config, &response, &host) {
            return Ok(());
        }

        let scope = ScopeResolver::new(config);

        if let Some(existing) = request.first_header(AUTHORIZATION) {
            if self.working_set.contains(&scope, &host) {
                self.notifier.alert_and_log(
                    config,
                    Level::Normal,
                    &format!("Failed Kerberos authentication to host {host}: unknown error"),
                );
                if let Some(challenge) = response.first_header(WWW_AUTHENTICATE) {
                    self.notifier.log(
                        config,
                        Level::Verbose,
                        &format!("Response from server: {WWW_AUTHENTICATE}: {challenge}"),
                    );
                }
            } else if scope.is_in_scope(&host) {
                self.notifier.alert_and_log(
                    config,
                    Level::Normal,
                    &format!(
                        "Authorization header ({}) already applied for in-scope host {host} (and was not successful); ignoring this host. Perhaps Burp \"Platform Authentication\" is configured against this host?",
                        auth_scheme(existing)
                    ),
                );
            }
            return Ok(());
        }

        if !scope.is_in_scope(&host) || self.working_set.contains(&scope, &host) {
            return Ok(());
        }

        let report = match config.strategy {
            Strategy::Reactive401 => ReplayReport::AlertAndLog,
            Strategy::ProactiveAfter401 => ReplayReport::AlertOnly,
            Strategy::Proactive => return Ok(()),
        };

        if let Some(replayed) = self.replay_with_token(config, &exchange.service, &exchange.request, report)? {
            if config.strategy == Strategy::ProactiveAfter401 {
                self.working_set.add(&scope, &host);
            }
            exchange.response = Some(replayed);
        }

        Ok(())
    }

    fn is_negotiate_challenge(&self, config: &Config, response: &HttpMessage, host: &str) -> bool {
        if response.status_code() != Some(401) || response.challenge(NEGOTIATE).is_none() {
            return false;
        }

        if config.ignore_ntlm_servers && response.challenge(NTLM).is_some() {
            self.notifier.alert_and_log(
                config,
                Level::Normal,
                &format!("Not authenticating to server {host} as it supports NTLM"),
            );
            return false;
        }

        true
    }

    /// Re-sends `request` with a fresh token. Returns the replayed response when it was
    /// not another 401.
    fn replay_with_token(
        &self,
        config: &ConfigSnapshot,
        service: &HttpService,
        request: &[u8],
        report: ReplayReport,
    ) -> Result<Option<Vec<u8>>, HttpParseError> {
        let host = &service.host;
        let spn = ScopeResolver::new(config).to_service_principal(host);

        self.notifier
            .log(config, Level::Verbose, &format!("Getting token for {spn}"));
        let Some(mut negotiated) = self.acquire_token(config, &spn) else {
            return Ok(None);
        };

        self.notifier.log(
            config,
            Level::Verbose,
            &format!("Creating new authenticated request to {host}"),
        );
        let request = http::append_header(request, AUTHORIZATION, &negotiated.authorization_value())?;

        let raw = match self.host.make_http_request(service, &request) {
            Ok(raw) => raw,
            Err(error) => {
                self.notifier.log(
                    config,
                    Level::Normal,
                    &format!("Authenticated request to {host} failed: {error}"),
                );
                return Ok(None);
            }
        };

        let replayed = HttpMessage::parse(&raw)?;
        if replayed.status_code() != Some(401) {
            return Ok(Some(raw));
        }

        let message = match replayed.challenge(NEGOTIATE) {
            Some(server_token) => {
                let reason = TokenNegotiator::new(&self.sessions)
                    .decode_server_error(&mut negotiated, server_token);
                if reason.is_empty() {
                    format!("Failed Kerberos authentication to host {host}: unknown error")
                } else if reason.contains(markers::AP_REP_MISMATCH) {
                    format!(
                        "Failed Kerberos authentication to host {host} - possibly service ticket for wrong service being used, error message was {reason}"
                    )
                } else {
                    format!("Failed Kerberos authentication to host {host}: error {reason}")
                }
            }
            None => format!(
                "Failed Kerberos authentication to host {host}: unknown error, server did not supply WWW-Authenticate response header"
            ),
        };

        match report {
            ReplayReport::AlertAndLog => {
                self.notifier.alert_and_log(config, Level::Normal, &message);
            }
            ReplayReport::AlertOnly => self.notifier.alert(config, Level::Normal, &message),
        }

        Ok(None)
    }

    /// Gets a token for `spn`, refreshing the session once if the TGT has gone.
    fn acquire_token(&self, config: &ConfigSnapshot, spn: &str) -> Option<NegotiatedContext<P::Context>> {
        let negotiator = TokenNegotiator::new(&self.sessions);

        let error = match negotiator.negotiate(config, spn) {
            Ok(negotiated) => return Some(negotiated),
            Err(AuthError::SessionExpired) => {
                self.sessions.invalidate();
                match negotiator.negotiate(config, spn) {
                    Ok(negotiated) => return Some(negotiated),
                    Err(error) => {
                        self.notifier.alert_and_log(
                            config,
                            Level::Normal,
                            &format!("Exception thrown when trying to get token with new TGT: {error}"),
                        );
                        error
                    }
                }
            }
            Err(error) => error,
        };

        debug!(%spn, %error, "no token available");
        None
    }

    /// Checks the domain settings under the provider lock, leaving the session alone.
    pub fn test_domain(&self) -> DomainCheck {
        let config = self.config.snapshot();
        self.sessions
            .serialized(|provider| diagnostics::test_domain(provider, &config))
    }

    /// Logs the configured principal in with a throwaway session.
    pub fn test_credentials(&self) -> CredentialCheck {
        let config = self.config.snapshot();
        self.sessions
            .serialized(|provider| diagnostics::test_credentials(provider, &config))
    }
}

/// Whether `request` is one of this engine's own authenticated replays.
///
/// The proxy reports replays as extension traffic; an extension-originated request that
/// already carries a Negotiate `Authorization` header is taken to be ours.
pub fn is_self_issued_replay(tool: ToolOrigin, request: &HttpMessage) -> bool {
    tool == ToolOrigin::Extender && request.has_authorization(NEGOTIATE)
}

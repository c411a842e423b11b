use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, instrument};

use crate::config::{ConfigSnapshot, Level};
use crate::error::{AuthError, ProviderError, markers};
use crate::http::NEGOTIATE;
use crate::provider::SecurityContextProvider;
use crate::scope::ScopeResolver;
use crate::session::{self, KerberosSessionManager};

pub const CHALLENGE_DECODE_FAILURE: &str = "Failed to base64-decode Negotiate token from server";

/// A security context with the initial token it produced.
pub struct NegotiatedContext<C> {
    context: C,
    spn: String,
    token: String,
}

impl<C> NegotiatedContext<C> {
    pub fn spn(&self) -> &str {
        &self.spn
    }

    /// Base64 SPNEGO token, no line breaks.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Value for an `Authorization` header.
    pub fn authorization_value(&self) -> String {
        format!("{NEGOTIATE} {}", self.token)
    }
}

/// Turns a service principal into a Negotiate token and interprets rejection tokens.
pub struct TokenNegotiator<'a, P: SecurityContextProvider> {
    sessions: &'a KerberosSessionManager<P>,
}

impl<'a, P: SecurityContextProvider> TokenNegotiator<'a, P> {
    pub fn new(sessions: &'a KerberosSessionManager<P>) -> Self {
        Self { sessions }
    }

    #[instrument(name = "negotiate", level = "debug", skip(self, config), err)]
    pub fn negotiate(
        &self,
        config: &ConfigSnapshot,
        spn: &str,
    ) -> Result<NegotiatedContext<P::Context>, AuthError> {
        let outcome = self
            .sessions
            .with_session(config, |provider, session| provider.initiate(session, spn))?;

        match outcome {
            Ok((context, raw)) => {
                debug!(token_len = raw.len(), "initial token generated");
                Ok(NegotiatedContext {
                    context,
                    spn: spn.to_owned(),
                    token: STANDARD.encode(raw),
                })
            }
            Err(error) => Err(self.classify(config, spn, &error)),
        }
    }

    /// Runs the server's rejection token through the context and reports why it failed.
    ///
    /// Returns `Ok(None)` when the provider raised nothing.
    pub fn server_error_reason(
        &self,
        negotiated: &mut NegotiatedContext<P::Context>,
        server_token: &str,
    ) -> Result<Option<String>, AuthError> {
        let bytes = STANDARD
            .decode(server_token.trim())
            .map_err(|_| AuthError::ChallengeDecodeFailure(CHALLENGE_DECODE_FAILURE.to_owned()))?;

        let outcome = self.sessions.serialized(|provider| {
            provider.process_server_token(&mut negotiated.context, &bytes)
        });

        Ok(outcome.err().map(|error| error.message().to_owned()))
    }

    /// String form of [`Self::server_error_reason`]; empty when nothing was raised.
    pub fn decode_server_error(
        &self,
        negotiated: &mut NegotiatedContext<P::Context>,
        server_token: &str,
    ) -> String {
        match self.server_error_reason(negotiated, server_token) {
            Ok(reason) => reason.unwrap_or_default(),
            Err(AuthError::ChallengeDecodeFailure(message)) => message,
            Err(other) => other.to_string(),
        }
    }

    fn classify(&self, config: &ConfigSnapshot, spn: &str, error: &ProviderError) -> AuthError {
        let notifier = self.sessions.notifier();

        if error.mentions(markers::SERVICE_UNKNOWN) {
            notifier.alert_and_log(
                config,
                Level::Normal,
                &format!(
                    "Failed to acquire service ticket for {spn} - service name not recognised by KDC"
                ),
            );
            return AuthError::ServiceUnknown {
                spn: spn.to_owned(),
            };
        }

        if let Some(problem) = session::credential_problem(config, error) {
            let failure = AuthError::CredentialInvalid {
                principal: ScopeResolver::new(config).to_user_principal(&config.username),
                problem,
            };
            if self.sessions.record_failure(config, failure.clone()) {
                notifier.alert_and_log(
                    config,
                    Level::Normal,
                    &format!(
                        "Failed to acquire token for service {spn} - {problem}. Not making further attempts until credentials are changed."
                    ),
                );
            }
            return failure;
        }

        if error.mentions(markers::NO_TGT) {
            notifier.alert_and_log(
                config,
                Level::Normal,
                &format!(
                    "Failed to acquire token for service {spn}, TGT has expired? Trying to get a new one..."
                ),
            );
            return AuthError::SessionExpired;
        }

        notifier.alert_and_log(
            config,
            Level::Normal,
            &format!("Failed to acquire token for service {spn}, error message was {error}"),
        );
        AuthError::Other(error.message().to_owned())
    }
}

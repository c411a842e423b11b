use std::fmt;
use std::sync::Arc;

use sspi::generator::GeneratorState;
use sspi::{
    AuthIdentity, BufferType, ClientRequestFlags, CredentialUse, Credentials, DataRepresentation,
    Kerberos, KerberosConfig, SecurityBuffer, SecurityStatus, Sspi, SspiImpl,
};
use tracing::{debug, instrument};
use url::Url;

use crate::error::ProviderError;
use crate::kdc::{self, KERBEROS_PORT, KdcTransport, TcpKdcTransport};
use crate::provider::{LoginRequest, SecurityContextProvider};

type CredentialsHandle = <Kerberos as SspiImpl>::CredentialsHandle;

/// Login material kept between negotiations.
///
/// sspi-rs keeps tickets inside each security context, so every negotiation repeats the
/// AS exchange with these credentials.
#[derive(Clone)]
pub struct SspiSession {
    identity: AuthIdentity,
    kdc_url: Url,
}

impl fmt::Debug for SspiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SspiSession")
            .field("kdc_url", &self.kdc_url.as_str())
            .finish_non_exhaustive()
    }
}

pub struct SspiContext {
    kerberos: Kerberos,
    credentials: CredentialsHandle,
    target: String,
}

/// [`SecurityContextProvider`] backed by the `sspi` Kerberos client.
pub struct SspiProvider {
    transport: Arc<dyn KdcTransport>,
    client_computer_name: String,
}

impl SspiProvider {
    pub fn new(transport: Arc<dyn KdcTransport>) -> Self {
        Self {
            transport,
            client_computer_name: whoami::fallible::hostname()
                .unwrap_or_else(|_| "localhost".to_owned()),
        }
    }

    pub fn with_client_computer_name(mut self, name: impl Into<String>) -> Self {
        self.client_computer_name = name.into();
        self
    }

    fn new_context(&self, session: &SspiSession, target: &str) -> Result<SspiContext, ProviderError> {
        let mut kerberos = Kerberos::new_client_from_config(KerberosConfig {
            kdc_url: Some(session.kdc_url.clone()),
            client_computer_name: self.client_computer_name.clone(),
        })?;

        let credentials = Credentials::AuthIdentity(session.identity.clone());
        let handle = kerberos
            .acquire_credentials_handle()
            .with_credential_use(CredentialUse::Outbound)
            .with_auth_data(&credentials)
            .execute(&mut kerberos)?
            .credentials_handle;

        Ok(SspiContext {
            kerberos,
            credentials: handle,
            target: target.to_owned(),
        })
    }

    /// One `InitializeSecurityContext` round, driving KDC traffic through the transport.
    fn step(&self, context: &mut SspiContext, input: Option<Vec<u8>>) -> Result<(SecurityStatus, Vec<u8>), ProviderError> {
        let mut output = [SecurityBuffer::new(Vec::new(), BufferType::Token)];
        let mut input = input.map(|token| [SecurityBuffer::new(token, BufferType::Token)]);

        let status = {
            let mut builder = context
                .kerberos
                .initialize_security_context()
                .with_credentials_handle(&mut context.credentials)
                .with_context_requirements(
                    ClientRequestFlags::MUTUAL_AUTH | ClientRequestFlags::ALLOCATE_MEMORY,
                )
                .with_target_data_representation(DataRepresentation::Native)
                .with_target_name(&context.target)
                .with_output(&mut output);

            if let Some(input) = input.as_mut() {
                builder = builder.with_input(input);
            }

            let mut generator = context
                .kerberos
                .initialize_security_context_impl(&mut builder)?;

            let mut state = generator.start();
            loop {
                match state {
                    GeneratorState::Suspended(request) => {
                        let reply = self.transport.send(request)?;
                        state = generator.resume(Ok(reply));
                    }
                    GeneratorState::Completed(result) => break result?.status,
                }
            }
        };

        // The builder held `output` until here.
        let token = std::mem::take(&mut output[0].buffer);
        Ok((status, token))
    }
}

impl Default for SspiProvider {
    fn default() -> Self {
        Self::new(Arc::new(TcpKdcTransport::default()))
    }
}

impl SecurityContextProvider for SspiProvider {
    type Session = SspiSession;
    type Context = SspiContext;

    #[instrument(name = "sspi.login", level = "info", skip(self), err)]
    fn login(&self, request: &LoginRequest) -> Result<SspiSession, ProviderError> {
        kdc::resolve(&request.kdc, KERBEROS_PORT)?;

        let kdc_url = Url::parse(&format!("tcp://{}:{KERBEROS_PORT}", request.kdc))
            .map_err(|e| ProviderError::unknown_host(format!("invalid KDC host {}: {e}", request.kdc)))?;
        let username = sspi::Username::parse(&request.principal)
            .map_err(|e| ProviderError::package(format!("invalid principal {}: {e}", request.principal)))?;

        let mut session = SspiSession {
            identity: AuthIdentity {
                username,
                password: request.password.clone().into(),
            },
            kdc_url,
        };

        // A ticket for the realm's own TGS forces the AS exchange, so bad credentials
        // surface here instead of on the first proxied request.
        let probe = format!("krbtgt/{}@{}", request.realm, request.realm);
        self.initiate(&mut session, &probe)?;
        debug!(principal = %request.principal, "credentials accepted by KDC");

        Ok(session)
    }

    #[instrument(name = "sspi.initiate", level = "debug", skip(self, session), err)]
    fn initiate(&self, session: &mut SspiSession, spn: &str) -> Result<(SspiContext, Vec<u8>), ProviderError> {
        let target = spn.split_once('@').map_or(spn, |(service, _)| service);
        let mut context = self.new_context(session, target)?;

        let (status, token) = self.step(&mut context, None)?;
        debug!(?status, token_len = token.len(), "initial context step");

        if token.is_empty() {
            return Err(ProviderError::package(format!(
                "no token produced for {target} (status {status:?})"
            )));
        }

        Ok((context, token))
    }

    fn process_server_token(&self, context: &mut SspiContext, token: &[u8]) -> Result<(), ProviderError> {
        let (status, _) = self.step(context, Some(token.to_vec()))?;
        debug!(?status, "server token processed");
        Ok(())
    }
}

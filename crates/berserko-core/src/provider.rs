use std::fmt;

use crate::error::ProviderError;

/// What a provider needs to log a principal into the realm.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Upper-cased realm name.
    pub realm: String,
    pub kdc: String,
    /// `<user>@<REALM>`
    pub principal: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("realm", &self.realm)
            .field("kdc", &self.kdc)
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

/// The SPNEGO/Kerberos capability the engine drives.
///
/// Implementations are not assumed safe for concurrent use under one principal; the
/// session manager serialises every call.
pub trait SecurityContextProvider: Send + Sync {
    /// Ticket-granting material for one principal.
    type Session: Send;

    /// One in-flight negotiation against a single service.
    type Context;

    /// Authenticates the principal against the KDC.
    fn login(&self, request: &LoginRequest) -> Result<Self::Session, ProviderError>;

    /// Creates a context for `spn` and returns it with the raw initial SPNEGO token.
    fn initiate(
        &self,
        session: &mut Self::Session,
        spn: &str,
    ) -> Result<(Self::Context, Vec<u8>), ProviderError>;

    /// Feeds a token returned by the server back into `context`.
    ///
    /// Used with rejection tokens, where the interesting outcome is the error.
    fn process_server_token(
        &self,
        context: &mut Self::Context,
        token: &[u8],
    ) -> Result<(), ProviderError>;
}

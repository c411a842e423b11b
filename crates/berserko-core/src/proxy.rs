use std::fmt;

/// Proxy tool that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolOrigin {
    Proxy,
    Repeater,
    Scanner,
    Intruder,
    Spider,
    /// Requests issued by extensions, including this engine's own replays.
    Extender,
    Other,
}

/// Where a request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpService {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl HttpService {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }
}

impl fmt::Display for HttpService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

/// A request/response pair as seen by the intercept hook. The engine rewrites
/// `request` before it is sent and `response` after it arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpExchange {
    pub service: HttpService,
    pub request: Vec<u8>,
    pub response: Option<Vec<u8>>,
}

impl HttpExchange {
    pub fn new(service: HttpService, request: impl Into<Vec<u8>>) -> Self {
        Self {
            service,
            request: request.into(),
            response: None,
        }
    }

    pub fn with_response(mut self, response: impl Into<Vec<u8>>) -> Self {
        self.response = Some(response.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("could not reach {service}: {reason}")]
    Unreachable { service: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Services the engine needs from the hosting proxy.
pub trait ProxyHost: Send + Sync {
    /// Sends `request` to `service` through the proxy and returns the raw response.
    fn make_http_request(&self, service: &HttpService, request: &[u8]) -> Result<Vec<u8>, HostError>;
}

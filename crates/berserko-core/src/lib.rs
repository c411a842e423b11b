pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod http;
pub mod kdc;
pub mod negotiator;
pub mod notify;
pub mod provider;
pub mod proxy;
pub mod scope;
pub mod session;
pub mod settings;
pub mod sspi_provider;
pub mod validate;
pub mod working_set;

pub use config::{Config, ConfigChange, ConfigHolder, ConfigSnapshot, Level, Strategy};
pub use engine::{AuthDecisionEngine, is_self_issued_replay};
pub use error::{AuthError, CredentialProblem, ProviderError, ProviderErrorKind};
pub use http::HttpMessage;
pub use negotiator::{NegotiatedContext, TokenNegotiator};
pub use notify::{AlertSink, Notifier, TracingAlerts};
pub use provider::{LoginRequest, SecurityContextProvider};
pub use proxy::{HostError, HttpExchange, HttpService, ProxyHost, ToolOrigin};
pub use scope::ScopeResolver;
pub use session::{KerberosSessionManager, SessionStatus};
pub use settings::{MemorySettings, SettingsStore};
pub use sspi_provider::SspiProvider;
pub use working_set::WorkingSetCache;

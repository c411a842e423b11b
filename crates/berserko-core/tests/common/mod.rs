#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use berserko_core::{
    AlertSink, AuthDecisionEngine, Config, HostError, HttpExchange, HttpService, LoginRequest,
    ProviderError, ProxyHost, SecurityContextProvider, Strategy, ToolOrigin,
};

/// Raw token every scripted negotiation returns; base64 `WFla`.
pub const TOKEN: &[u8] = b"XYZ";
pub const TOKEN_HEADER: &str = "Authorization: Negotiate WFla";

pub const GET: &[u8] = b"GET /app HTTP/1.1\r\nHost: web.example.com\r\n\r\n";
pub const OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

// ===== Provider =====

#[derive(Default)]
pub struct ProviderScript {
    pub logins: AtomicUsize,
    pub initiations: AtomicUsize,
    pub server_tokens: Mutex<Vec<Vec<u8>>>,
    pub spns: Mutex<Vec<String>>,
    pub login_error: Mutex<Option<ProviderError>>,
    pub initiate_errors: Mutex<VecDeque<ProviderError>>,
    pub server_token_error: Mutex<Option<ProviderError>>,
}

impl ProviderScript {
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn initiations(&self) -> usize {
        self.initiations.load(Ordering::SeqCst)
    }

    pub fn fail_login(&self, error: ProviderError) {
        *self.login_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_initiate(&self, error: ProviderError) {
        self.initiate_errors.lock().unwrap().push_back(error);
    }

    pub fn reject_server_token(&self, error: ProviderError) {
        *self.server_token_error.lock().unwrap() = Some(error);
    }
}

#[derive(Clone, Default)]
pub struct ScriptedProvider(pub Arc<ProviderScript>);

impl SecurityContextProvider for ScriptedProvider {
    type Session = usize;
    type Context = String;

    fn login(&self, _request: &LoginRequest) -> Result<usize, ProviderError> {
        let attempt = self.0.logins.fetch_add(1, Ordering::SeqCst);
        match self.0.login_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(attempt),
        }
    }

    fn initiate(&self, _session: &mut usize, spn: &str) -> Result<(String, Vec<u8>), ProviderError> {
        self.0.initiations.fetch_add(1, Ordering::SeqCst);
        self.0.spns.lock().unwrap().push(spn.to_owned());
        if let Some(error) = self.0.initiate_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok((spn.to_owned(), TOKEN.to_vec()))
    }

    fn process_server_token(&self, _context: &mut String, token: &[u8]) -> Result<(), ProviderError> {
        self.0.server_tokens.lock().unwrap().push(token.to_vec());
        match self.0.server_token_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ===== Proxy host =====

#[derive(Default)]
pub struct HostScript {
    pub replies: Mutex<VecDeque<Vec<u8>>>,
    pub sent: Mutex<Vec<(HttpService, Vec<u8>)>>,
}

impl HostScript {
    pub fn reply_with(&self, response: impl Into<Vec<u8>>) {
        self.replies.lock().unwrap().push_back(response.into());
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, raw)| String::from_utf8_lossy(raw).into_owned())
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct ScriptedHost(pub Arc<HostScript>);

impl ProxyHost for ScriptedHost {
    fn make_http_request(&self, service: &HttpService, request: &[u8]) -> Result<Vec<u8>, HostError> {
        self.0
            .sent
            .lock()
            .unwrap()
            .push((service.clone(), request.to_vec()));
        self.0
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| HostError::Transport("no scripted reply".into()))
    }
}

// ===== Alerts =====

#[derive(Default)]
pub struct RecordingAlerts(Mutex<Vec<String>>);

impl RecordingAlerts {
    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingAlerts {
    fn issue_alert(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_owned());
    }
}

// ===== Fixture =====

pub struct Harness {
    pub engine: AuthDecisionEngine<ScriptedProvider, ScriptedHost>,
    pub provider: Arc<ProviderScript>,
    pub host: Arc<HostScript>,
    pub alerts: Arc<RecordingAlerts>,
}

pub fn config(strategy: Strategy) -> Config {
    Config {
        enabled: true,
        domain: "example.com".into(),
        kdc: "dc1.example.com".into(),
        username: "alice".into(),
        password: "pw".into(),
        strategy,
        ..Config::default()
    }
}

pub fn harness(strategy: Strategy) -> Harness {
    harness_with(config(strategy))
}

pub fn harness_with(config: Config) -> Harness {
    let provider = ScriptedProvider::default();
    let host = ScriptedHost::default();
    let alerts = Arc::new(RecordingAlerts::default());

    Harness {
        provider: Arc::clone(&provider.0),
        host: Arc::clone(&host.0),
        engine: AuthDecisionEngine::new(config, provider, host, alerts.clone()),
        alerts,
    }
}

impl Harness {
    pub fn send(&self, host: &str, request: &[u8]) -> HttpExchange {
        let mut exchange = HttpExchange::new(service(host), request);
        self.engine
            .process_http_message(ToolOrigin::Proxy, true, &mut exchange);
        exchange
    }

    pub fn receive(&self, tool: ToolOrigin, host: &str, request: &[u8], response: &[u8]) -> HttpExchange {
        let mut exchange = HttpExchange::new(service(host), request).with_response(response);
        self.engine.process_http_message(tool, false, &mut exchange);
        exchange
    }

    pub fn in_working_set(&self, host: &str) -> bool {
        let config = self.engine.config();
        let scope = berserko_core::ScopeResolver::new(&config);
        self.engine.working_set().contains(&scope, host)
    }
}

pub fn service(host: &str) -> HttpService {
    HttpService::new(host, 443, true)
}

/// A 401 carrying one `WWW-Authenticate` header per entry.
pub fn unauthorized(challenges: &[&str]) -> Vec<u8> {
    let mut raw = String::from("HTTP/1.1 401 Unauthorized\r\n");
    for challenge in challenges {
        raw.push_str("WWW-Authenticate: ");
        raw.push_str(challenge);
        raw.push_str("\r\n");
    }
    raw.push_str("Content-Length: 0\r\n\r\n");
    raw.into_bytes()
}

pub fn text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

mod common;

use std::sync::{Arc, Mutex, OnceLock, Weak, mpsc};
use std::thread;
use std::time::Duration;

use berserko_core::{
    AuthDecisionEngine, AuthError, CredentialProblem, HostError, HttpExchange, HttpService,
    ProviderError, ProxyHost, SessionStatus, Strategy, TokenNegotiator, ToolOrigin,
};
use common::*;

#[test]
fn bad_password_is_sticky_until_credentials_change() {
    let h = harness(Strategy::Proactive);
    h.provider.fail_login(ProviderError::package(
        "Pre-authentication information was invalid (24)",
    ));

    for _ in 0..5 {
        let exchange = h.send("web.example.com", GET);
        assert_eq!(exchange.request, GET);
    }

    assert_eq!(h.provider.logins(), 1);
    assert_eq!(h.provider.initiations(), 0);
    let alerts = h.alerts.messages();
    assert_eq!(alerts.len(), 1);
    assert_eq!(
        alerts[0],
        "Failed to acquire TGT on domain example.com with user alice - password appears to be invalid. Not making further attempts until credentials are changed."
    );
    assert!(matches!(
        h.engine.sessions().status(),
        SessionStatus::FailedTerminal(AuthError::CredentialInvalid {
            problem: CredentialProblem::BadPassword,
            ..
        })
    ));

    *h.provider.login_error.lock().unwrap() = None;
    let change = h.engine.update_config(|c| c.password = "correct horse".into());
    assert!(change.credentials_changed);

    let exchange = h.send("web.example.com", GET);
    assert_eq!(h.provider.logins(), 2);
    assert!(text(&exchange.request).contains(TOKEN_HEADER));
}

#[test]
fn unrelated_config_changes_keep_the_failure() {
    let h = harness(Strategy::Proactive);
    h.provider
        .fail_login(ProviderError::unknown_host("couldn't resolve dc1.example.com"));

    h.send("web.example.com", GET);
    h.engine
        .update_config(|c| c.strategy = Strategy::ProactiveAfter401);
    h.engine.update_config(|c| c.strategy = Strategy::Proactive);
    h.send("web.example.com", GET);

    assert_eq!(h.provider.logins(), 1);
    assert_eq!(
        h.alerts.messages(),
        ["Failed to acquire TGT on domain example.com with user alice - couldn't find DC dc1.example.com. Not making further attempts until domain settings are changed."]
    );
}

#[test]
fn blank_username_never_contacts_the_kdc() {
    let mut config = config(Strategy::Proactive);
    config.username.clear();
    let h = harness_with(config);

    h.send("web.example.com", GET);
    h.send("app.example.com", GET);

    assert_eq!(h.provider.logins(), 0);
    assert_eq!(
        h.alerts.messages(),
        ["Username is blank - not trying to acquire TGT"]
    );
}

#[test]
fn expired_tgt_is_refreshed_once() {
    let h = harness(Strategy::Proactive);
    h.send("warmup.example.com", GET);
    assert_eq!(h.provider.logins(), 1);

    h.provider.fail_next_initiate(ProviderError::package(
        "Failed to find any Kerberos tgt",
    ));
    let exchange = h.send("web.example.com", GET);

    assert_eq!(occurrences(&text(&exchange.request), TOKEN_HEADER), 1);
    assert_eq!(h.provider.logins(), 2);
    assert_eq!(h.provider.initiations(), 3);
    assert_eq!(
        h.alerts.messages(),
        ["Failed to acquire token for service http/web.example.com@EXAMPLE.COM, TGT has expired? Trying to get a new one..."]
    );
}

#[test]
fn expired_tgt_is_not_retried_twice() {
    let h = harness(Strategy::Proactive);
    for _ in 0..2 {
        h.provider.fail_next_initiate(ProviderError::package(
            "KRB_AP_ERR_TKT_EXPIRED",
        ));
    }

    let exchange = h.send("web.example.com", GET);

    assert_eq!(exchange.request, GET);
    assert_eq!(h.provider.logins(), 2);
    assert_eq!(h.provider.initiations(), 2);
    assert!(!h.in_working_set("web.example.com"));

    let alerts = h.alerts.messages();
    assert_eq!(alerts.len(), 3);
    assert_eq!(
        alerts[2],
        "Exception thrown when trying to get token with new TGT: ticket-granting ticket not found, it may have expired"
    );
}

#[test]
fn password_rejected_during_negotiation_is_sticky() {
    let h = harness(Strategy::Proactive);
    h.send("warmup.example.com", GET);

    for _ in 0..5 {
        h.provider.fail_next_initiate(ProviderError::package(
            "Pre-authentication information was invalid (24)",
        ));
    }
    for _ in 0..5 {
        let exchange = h.send("web.example.com", GET);
        assert_eq!(exchange.request, GET);
    }

    assert_eq!(h.provider.initiations(), 2);
    assert_eq!(
        h.alerts.messages(),
        ["Failed to acquire token for service http/web.example.com@EXAMPLE.COM - password appears to be invalid. Not making further attempts until credentials are changed."]
    );
    assert!(matches!(
        h.engine.sessions().status(),
        SessionStatus::FailedTerminal(AuthError::CredentialInvalid {
            problem: CredentialProblem::BadPassword,
            ..
        })
    ));

    h.provider.initiate_errors.lock().unwrap().clear();
    h.engine.update_config(|c| c.password = "rotated".into());
    let exchange = h.send("web.example.com", GET);
    assert!(text(&exchange.request).contains(TOKEN_HEADER));
    assert_eq!(h.provider.logins(), 2);
}

#[test]
fn in_flight_exchange_with_old_credentials_keeps_new_session() {
    let h = harness(Strategy::Proactive);
    let old = h.engine.config();

    h.engine.update_config(|c| c.password = "rotated".into());
    h.send("web.example.com", GET);
    assert_eq!(h.provider.logins(), 1);

    let negotiated = TokenNegotiator::new(h.engine.sessions())
        .negotiate(&old, "http/app.example.com@EXAMPLE.COM");
    assert!(negotiated.is_ok());
    h.send("web.example.com", GET);

    assert_eq!(h.provider.logins(), 1);
}

/// Host whose replay checks, from another thread, that the session lock is free.
struct LockCheckingHost {
    engine: Arc<OnceLock<Weak<AuthDecisionEngine<ScriptedProvider, LockCheckingHost>>>>,
    lock_free_during_send: Arc<Mutex<Vec<bool>>>,
}

impl ProxyHost for LockCheckingHost {
    fn make_http_request(&self, _service: &HttpService, _request: &[u8]) -> Result<Vec<u8>, HostError> {
        let engine = self
            .engine
            .get()
            .and_then(Weak::upgrade)
            .expect("engine registered");

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(engine.sessions().status());
        });
        let free = rx.recv_timeout(Duration::from_secs(5)).is_ok();
        self.lock_free_during_send.lock().unwrap().push(free);

        Ok(OK.to_vec())
    }
}

#[test]
fn session_lock_is_released_during_replay() {
    let slot = Arc::new(OnceLock::new());
    let observed = Arc::new(Mutex::new(Vec::new()));
    let host = LockCheckingHost {
        engine: Arc::clone(&slot),
        lock_free_during_send: Arc::clone(&observed),
    };
    let engine = Arc::new(AuthDecisionEngine::new(
        config(Strategy::Reactive401),
        ScriptedProvider::default(),
        host,
        Arc::new(RecordingAlerts::default()),
    ));
    assert!(slot.set(Arc::downgrade(&engine)).is_ok());

    let mut exchange = HttpExchange::new(service("web.example.com"), GET)
        .with_response(unauthorized(&["Negotiate"]));
    engine.process_http_message(ToolOrigin::Proxy, false, &mut exchange);

    assert_eq!(observed.lock().unwrap().as_slice(), [true]);
    assert_eq!(exchange.response.as_deref(), Some(OK));
}

#[test]
fn unknown_service_is_reported_and_session_kept() {
    let h = harness(Strategy::Reactive401);
    h.provider.fail_next_initiate(ProviderError::package(
        "Server not found in Kerberos database (7)",
    ));

    h.receive(ToolOrigin::Proxy, "web.example.com", GET, &unauthorized(&["Negotiate"]));

    assert!(h.host.sent().is_empty());
    assert_eq!(
        h.alerts.messages(),
        ["Failed to acquire service ticket for http/web.example.com@EXAMPLE.COM - service name not recognised by KDC"]
    );
    assert_eq!(h.engine.sessions().status(), SessionStatus::Acquired);
}

#[test]
fn realm_change_clears_working_set_and_session() {
    let h = harness(Strategy::Proactive);
    h.send("web.example.com", GET);
    assert!(h.in_working_set("web.example.com"));

    let change = h.engine.update_config(|c| c.kdc = "dc2.example.com".into());
    assert!(change.realm_changed);
    assert!(h.engine.working_set().is_empty());
    assert_eq!(h.engine.sessions().status(), SessionStatus::Uninitialized);

    h.send("web.example.com", GET);
    assert_eq!(h.provider.logins(), 2);
}

#[test]
fn credential_change_keeps_working_set() {
    let h = harness(Strategy::Proactive);
    h.send("web.example.com", GET);

    h.engine.update_config(|c| c.username = "bob".into());

    assert!(h.in_working_set("web.example.com"));
    assert_eq!(h.engine.sessions().status(), SessionStatus::Uninitialized);
}

#[test]
fn concurrent_exchanges_share_one_login() {
    let h = Arc::new(harness(Strategy::Proactive));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let h = Arc::clone(&h);
            thread::spawn(move || {
                let host = format!("app{i}.example.com");
                let exchange = h.send(&host, GET);
                assert_eq!(occurrences(&text(&exchange.request), TOKEN_HEADER), 1);
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked");
    }

    assert_eq!(h.provider.logins(), 1);
    assert_eq!(h.provider.initiations(), 8);
    assert_eq!(h.engine.working_set().len(), 8);
}

fn occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use berserko_core::{HostError, HttpMessage, HttpService, ProxyHost};
use tracing::{debug, error, info, info_span, instrument};

/// Headers ureq computes itself, or which no longer describe the body once ureq has decoded it.
const MANAGED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "content-encoding",
    "connection",
];

/// Sends raw HTTP/1.1 requests on behalf of the engine.
#[derive(Clone)]
pub struct UreqProxyHost {
    agent: ureq::Agent,
}

impl UreqProxyHost {
    pub fn new() -> anyhow::Result<Self> {
        let connector = native_tls::TlsConnector::new()?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(60))
            .tls_connector(Arc::new(connector))
            .redirects(0)
            .build();
        Ok(Self { agent })
    }

    fn send(&self, service: &HttpService, request: &HttpMessage) -> Result<Vec<u8>, HostError> {
        let (method, target) = request_line(request)?;
        let url = if target.starts_with('/') {
            format!("{service}{target}")
        } else {
            target.to_owned()
        };

        let span = info_span!("http.request", method = %method, url = %url);
        let _enter = span.enter();

        info!("sending request");

        let mut call = self.agent.request(method, &url);
        for (name, value) in &request.headers {
            if !is_managed(name) {
                call = call.set(name, value);
            }
        }

        debug!(
            headers_count = request.headers.len(),
            body_length = request.body.len(),
            "request configured"
        );

        let response = match call.send_bytes(&request.body) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                debug!(status = %status, "received status response");
                response
            }
            Err(ureq::Error::Transport(transport)) => {
                error!(error = %transport, "request failed");
                return Err(HostError::Unreachable {
                    service: service.to_string(),
                    reason: transport.to_string(),
                });
            }
        };

        render(response)
    }
}

impl ProxyHost for UreqProxyHost {
    #[instrument(name = "proxy_host.make_http_request", level = "info", skip(self, request), fields(service = %service), err)]
    fn make_http_request(&self, service: &HttpService, request: &[u8]) -> Result<Vec<u8>, HostError> {
        let parsed =
            HttpMessage::parse(request).map_err(|e| HostError::Transport(e.to_string()))?;
        self.send(service, &parsed)
    }
}

fn request_line(request: &HttpMessage) -> Result<(&str, &str), HostError> {
    let mut parts = request.start_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => Ok((method, target)),
        _ => Err(HostError::Transport(format!(
            "malformed request line {:?}",
            request.start_line
        ))),
    }
}

fn is_managed(name: &str) -> bool {
    MANAGED_HEADERS
        .iter()
        .any(|managed| managed.eq_ignore_ascii_case(name))
}

/// Rebuilds the wire form of a response so the engine can treat it like proxied traffic.
fn render(response: ureq::Response) -> Result<Vec<u8>, HostError> {
    let status = response.status();
    let start_line = format!(
        "{} {} {}",
        response.http_version(),
        status,
        response.status_text()
    );
    let mut headers: Vec<(String, String)> = response
        .headers_names()
        .iter()
        .filter(|name| !is_managed(name))
        .flat_map(|name| {
            response
                .all(name)
                .into_iter()
                .map(|value| (name.clone(), value.to_owned()))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| {
            error!(error = %e, "failed to read response body");
            HostError::Transport(e.to_string())
        })?;

    headers.push(("Content-Length".to_owned(), body.len().to_string()));
    info!(status_code = %status, response_body_length = body.len(), "response received");

    Ok(HttpMessage {
        start_line,
        headers,
        body,
    }
    .to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_headers_match_case_insensitively() {
        assert!(is_managed("Host"));
        assert!(is_managed("CONTENT-LENGTH"));
        assert!(!is_managed("Authorization"));
    }

    #[test]
    fn request_line_splits_method_and_target() {
        let request = HttpMessage::parse(b"GET /index.html HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        assert_eq!(request_line(&request).unwrap(), ("GET", "/index.html"));

        let broken = HttpMessage {
            start_line: "GET".into(),
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert!(matches!(request_line(&broken), Err(HostError::Transport(_))));
    }
}

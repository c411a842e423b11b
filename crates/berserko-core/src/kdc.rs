//! Talking to the KDC: framed Kerberos-over-TCP and a plain reachability probe.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use sspi::generator::NetworkRequest;
use sspi::network_client::NetworkProtocol;
use tracing::{debug, info, instrument};

use crate::error::ProviderError;

pub const KERBEROS_PORT: u16 = 88;

/// Upper bound on a KDC reply; anything larger is treated as a framing error.
const MAX_REPLY_LEN: u32 = 1 << 20;

/// Carries the provider's KDC requests to the network.
pub trait KdcTransport: Send + Sync {
    fn send(&self, request: NetworkRequest) -> Result<Vec<u8>, ProviderError>;
}

/// Kerberos over TCP (RFC 4120 section 7.2.2).
#[derive(Debug, Clone)]
pub struct TcpKdcTransport {
    timeout: Option<Duration>,
}

impl TcpKdcTransport {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl Default for TcpKdcTransport {
    fn default() -> Self {
        Self::new(Some(Duration::from_secs(10)))
    }
}

impl KdcTransport for TcpKdcTransport {
    #[instrument(
        name = "kerberos.send_packet",
        level = "info",
        skip(self, request),
        fields(protocol = ?request.protocol, url = %request.url, data_len = request.data.len()),
        err
    )]
    fn send(&self, request: NetworkRequest) -> Result<Vec<u8>, ProviderError> {
        match &request.protocol {
            NetworkProtocol::Tcp => self.send_tcp(&request),
            other => Err(ProviderError::transport(format!(
                "KDC transport {other:?} is not supported, use tcp://"
            ))),
        }
    }
}

impl TcpKdcTransport {
    fn send_tcp(&self, request: &NetworkRequest) -> Result<Vec<u8>, ProviderError> {
        let host = request
            .url
            .host_str()
            .ok_or_else(|| ProviderError::transport("missing host in KDC URL"))?;
        let port = request.url.port().unwrap_or(KERBEROS_PORT);

        let address = resolve(host, port)?;
        info!(%address, "establishing TCP connection to KDC");

        let mut stream = match self.timeout {
            Some(timeout) => TcpStream::connect_timeout(&address, timeout),
            None => TcpStream::connect(address),
        }
        .map_err(|e| ProviderError::transport(format!("failed to connect to KDC {host}: {e}")))?;

        stream
            .set_read_timeout(self.timeout)
            .and_then(|()| stream.set_write_timeout(self.timeout))
            .map_err(io_error("failed to configure KDC socket"))?;

        // sspi hands over the request already length-prefixed.
        stream
            .write_all(&request.data)
            .and_then(|()| stream.flush())
            .map_err(io_error("failed to write packet data to KDC"))?;

        debug!("packet sent, waiting for KDC response");
        read_framed(&mut stream)
    }
}

/// Reads one length-prefixed reply, keeping the prefix as sspi expects.
pub(crate) fn read_framed(stream: &mut impl Read) -> Result<Vec<u8>, ProviderError> {
    let reply_len = stream
        .read_u32::<BigEndian>()
        .map_err(io_error("failed to read response length from KDC"))?;

    if reply_len > MAX_REPLY_LEN {
        return Err(ProviderError::transport(format!(
            "KDC reply length {reply_len} exceeds limit"
        )));
    }

    let mut reply = vec![0u8; reply_len as usize + 4];
    reply[..4].copy_from_slice(&reply_len.to_be_bytes());
    stream
        .read_exact(&mut reply[4..])
        .map_err(io_error("failed to read response data from KDC"))?;

    info!(reply_len, "received KDC response");
    Ok(reply)
}

fn io_error(what: &'static str) -> impl Fn(io::Error) -> ProviderError {
    move |e| ProviderError::transport(format!("{what}: {e}"))
}

/// Resolves `host`, mapping lookup failures to [`ProviderError::unknown_host`].
pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr, ProviderError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| ProviderError::unknown_host(format!("couldn't resolve {host}: {e}")))?
        .next()
        .ok_or_else(|| ProviderError::unknown_host(format!("{host} has no addresses")))
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("couldn't resolve {0}")]
    Unresolvable(String),

    #[error("timed out connecting to {0} on port 88")]
    Timeout(String),

    #[error("failed to connect to {kdc} on port 88: {source}")]
    Connect {
        kdc: String,
        #[source]
        source: io::Error,
    },
}

/// Checks that something accepts TCP connections on the Kerberos port of `kdc`.
#[instrument(name = "kerberos.probe", level = "info", err)]
pub fn probe_kdc(kdc: &str, timeout: Duration) -> Result<(), ProbeError> {
    let address = resolve(kdc, KERBEROS_PORT).map_err(|_| ProbeError::Unresolvable(kdc.to_owned()))?;

    match TcpStream::connect_timeout(&address, timeout) {
        Ok(_) => {
            info!(%address, "KDC port reachable");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(ProbeError::Timeout(kdc.to_owned())),
        Err(source) => Err(ProbeError::Connect {
            kdc: kdc.to_owned(),
            source,
        }),
    }
}

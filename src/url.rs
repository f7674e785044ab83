//! # Url
//!
//! Endpoint addressing. Only `tcp://host:port` is defined; a listen URL with
//! `host == "0.0.0.0"` means "all interfaces" and must be expanded to the set
//! of concrete joinable addresses once a socket is actually bound.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};

pub const SCHEME: &str = "tcp";

/// A parsed `tcp://host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Url {
    pub host: String,
    pub port: u16,
}

impl Url {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw
            .strip_prefix("tcp://")
            .ok_or_else(|| Error::InvalidUrl(raw.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidUrl(raw.to_string()))?;
        if host.is_empty() {
            return Err(Error::InvalidUrl(raw.to_string()));
        }
        let port: u16 = port.parse().map_err(|_| Error::InvalidUrl(raw.to_string()))?;
        Ok(Self::new(host, port))
    }

    pub fn is_wildcard_host(&self) -> bool {
        self.host == "0.0.0.0" || self.host == "::"
    }

    /// Resolve to a `SocketAddr` suitable for `connect`/`bind`. DNS names are
    /// resolved synchronously here; callers on the reactor thread should treat
    /// resolution failure as `Error::DnsResolution`.
    pub fn to_socket_addr(&self) -> Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        use std::net::ToSocketAddrs;
        format!("{}:{}", self.host, self.port)
            .to_socket_addrs()
            .map_err(|_| Error::DnsResolution(self.host.clone()))?
            .next()
            .ok_or_else(|| Error::DnsResolution(self.host.clone()))
    }

    /// Given the address a listener actually bound to, produce the set of
    /// URLs reachable by peers. A wildcard host expands to every non-loopback
    /// interface address plus loopback; a concrete host round-trips as-is,
    /// with the OS-chosen port substituted in if the original port was 0.
    pub fn expand_bound(&self, bound: SocketAddr) -> Result<Vec<Url>> {
        if !self.is_wildcard_host() {
            return Ok(vec![Url::new(self.host.clone(), bound.port())]);
        }
        let mut urls: Vec<Url> = local_interface_addrs()?
            .into_iter()
            .filter(|ip| ip.is_ipv4() == bound.is_ipv4())
            .map(|ip| Url::new(ip.to_string(), bound.port()))
            .collect();
        if urls.is_empty() {
            let loopback = if bound.is_ipv4() { "127.0.0.1" } else { "::1" };
            urls.push(Url::new(loopback, bound.port()));
        }
        Ok(urls)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", SCHEME, self.host, self.port)
    }
}

/// Enumerate non-loopback addresses of local interfaces, falling back to
/// loopback alone when none can be discovered (e.g. in a sandboxed network
/// namespace). There is no portable stdlib API for this, so we shell out to
/// the socket layer: open a UDP socket "connected" to a public address and
/// read back the local address the kernel picked to reach it. This avoids
/// any dependency on platform-specific interface-enumeration APIs.
fn local_interface_addrs() -> Result<Vec<IpAddr>> {
    use std::net::UdpSocket;
    let mut addrs = Vec::new();
    if let Ok(sock) = UdpSocket::bind("0.0.0.0:0") {
        if sock.connect("8.8.8.8:80").is_ok() {
            if let Ok(local) = sock.local_addr() {
                addrs.push(local.ip());
            }
        }
    }
    addrs.push(IpAddr::from([127, 0, 0, 1]));
    Ok(addrs)
}

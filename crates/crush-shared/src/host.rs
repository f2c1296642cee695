use std::fmt;

use serde::{Deserialize, Serialize};

/// Transport scheme of the local RPC endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Unix,
    Npipe,
    Tcp,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unix => "unix",
            Self::Npipe => "npipe",
            Self::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `scheme://address` host string. The client and server must agree
/// on the exact same host string to find each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUrl {
    pub scheme: Scheme,
    pub address: String,
}

impl fmt::Display for HostUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.address)
    }
}

/// Parses `unix:///tmp/x.sock`, `npipe:////./pipe/x`, or `tcp://host:port`.
pub fn parse_host_url(host: &str) -> Result<HostUrl, String> {
    let (proto, addr) = host
        .split_once("://")
        .ok_or_else(|| format!("invalid host format: {host}"))?;

    let scheme = match proto {
        "unix" => Scheme::Unix,
        "npipe" => Scheme::Npipe,
        "tcp" => Scheme::Tcp,
        other => return Err(format!("unsupported scheme: {other}")),
    };

    if addr.is_empty() {
        return Err(format!("empty address in host: {host}"));
    }

    if scheme == Scheme::Tcp && !addr.contains(':') {
        return Err(format!("tcp address must be host:port, got: {addr}"));
    }

    Ok(HostUrl {
        scheme,
        address: addr.to_string(),
    })
}

/// The default per-user endpoint. Derived from the current user identity so
/// two users on the same machine never collide.
pub fn default_host() -> String {
    let sock = format!("crush-{}.sock", current_uid());
    if cfg!(windows) {
        format!("npipe:////./pipe/{sock}")
    } else {
        format!("unix:///tmp/{sock}")
    }
}

#[cfg(unix)]
fn current_uid() -> String {
    // Safety: getuid has no failure modes.
    unsafe { libc::getuid() }.to_string()
}

#[cfg(not(unix))]
fn current_uid() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_host() {
        let h = parse_host_url("unix:///tmp/crush-1000.sock").unwrap();
        assert_eq!(h.scheme, Scheme::Unix);
        assert_eq!(h.address, "/tmp/crush-1000.sock");
        assert_eq!(h.to_string(), "unix:///tmp/crush-1000.sock");
    }

    #[test]
    fn parses_tcp_host() {
        let h = parse_host_url("tcp://127.0.0.1:8901").unwrap();
        assert_eq!(h.scheme, Scheme::Tcp);
        assert_eq!(h.address, "127.0.0.1:8901");
    }

    #[test]
    fn parses_npipe_host() {
        let h = parse_host_url("npipe:////./pipe/crush-1.sock").unwrap();
        assert_eq!(h.scheme, Scheme::Npipe);
        assert_eq!(h.address, "//./pipe/crush-1.sock");
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(parse_host_url("/tmp/crush.sock").is_err());
        assert!(parse_host_url("tcp://nohostport").is_err());
        assert!(parse_host_url("ftp://x").is_err());
    }

    #[test]
    fn default_host_is_per_user() {
        let host = default_host();
        assert!(host.contains("crush-"));
        parse_host_url(&host).unwrap();
    }
}

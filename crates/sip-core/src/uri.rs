use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default SIP port used when a URI carries none.
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// sip:
    Sip,
    /// sips:
    Sips,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Sip => f.write_str("sip"),
            Scheme::Sips => f.write_str("sips"),
        }
    }
}

/// A SIP URI: `sip:user@host:port;param=value`.
///
/// Only the pieces the transaction layer and the registrar look at are
/// modelled. Two URIs are equal when every component, params included, is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<(String, Option<String>)>,
}

impl Uri {
    /// `sip:` URI for `host`
    pub fn sip(host: impl Into<String>) -> Self {
        Uri {
            scheme: Scheme::Sip,
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    /// `sip:user@host:port` from a socket address
    pub fn from_addr(user: Option<&str>, addr: SocketAddr) -> Self {
        Uri {
            scheme: Scheme::Sip,
            user: user.map(str::to_string),
            host: addr.ip().to_string(),
            port: Some(addr.port()),
            params: Vec::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.params.push((name.into(), value.map(str::to_string)));
        self
    }

    /// Address-of-record form used as the registrar key: scheme, user and host
    /// only, no port and no parameters.
    pub fn aor(&self) -> String {
        match &self.user {
            Some(user) => format!("{}:{}@{}", self.scheme, user, self.host),
            None => format!("{}:{}", self.scheme, self.host),
        }
    }

    /// `host:port` suitable for a Via sent-by.
    pub fn host_port(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Resolves the URI to a socket address.
    ///
    /// Only IP literals are accepted; DNS lookups belong to an external
    /// resolver, so any other host is reported as [`Error::Unresolvable`].
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let ip = host
            .parse::<IpAddr>()
            .map_err(|_| Error::Unresolvable(self.host.clone()))?;
        Ok(SocketAddr::new(ip, self.port.unwrap_or(DEFAULT_SIP_PORT)))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (name, value) in &self.params {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidUri(s.to_string());

        let (scheme, rest) = if let Some(rest) = s.strip_prefix("sips:") {
            (Scheme::Sips, rest)
        } else if let Some(rest) = s.strip_prefix("sip:") {
            (Scheme::Sip, rest)
        } else {
            return Err(invalid());
        };

        let mut parts = rest.split(';');
        let addr_part = parts.next().ok_or_else(invalid)?;
        let params = parts
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((name, value)) => (name.to_string(), Some(value.to_string())),
                None => (p.to_string(), None),
            })
            .collect();

        let (user, host_port) = match addr_part.rsplit_once('@') {
            Some((user, host_port)) if !user.is_empty() => (Some(user.to_string()), host_port),
            Some(_) => return Err(invalid()),
            None => (None, addr_part),
        };

        let (host, port) = if host_port.starts_with('[') {
            let end = host_port.find(']').ok_or_else(invalid)?;
            let host = &host_port[..=end];
            let port = match &host_port[end + 1..] {
                "" => None,
                p => Some(p.strip_prefix(':').ok_or_else(invalid)?.parse::<u16>().map_err(|_| invalid())?),
            };
            (host.to_string(), port)
        } else {
            match host_port.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), Some(port.parse::<u16>().map_err(|_| invalid())?)),
                None => (host_port.to_string(), None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Uri { scheme, user, host, port, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_roundtrip_shape() {
        let uri: Uri = "sip:jason@127.0.0.1:5070;transport=udp".parse().unwrap();
        assert_eq!(uri.user.as_deref(), Some("jason"));
        assert_eq!(uri.host, "127.0.0.1");
        assert_eq!(uri.port, Some(5070));
        assert_eq!(uri.params, vec![("transport".to_string(), Some("udp".to_string()))]);
        assert_eq!(uri.to_string(), "sip:jason@127.0.0.1:5070;transport=udp");
    }

    #[test]
    fn aor_drops_port_and_params() {
        let uri: Uri = "sip:derek@10.0.0.1:5062;ob".parse().unwrap();
        assert_eq!(uri.aor(), "sip:derek@10.0.0.1");
    }

    #[test]
    fn socket_addr_requires_ip_literal() {
        let uri: Uri = "sip:jason@127.0.0.1".parse().unwrap();
        assert_eq!(uri.socket_addr().unwrap(), "127.0.0.1:5060".parse().unwrap());

        let uri: Uri = "sip:foobar@dfkaslkfdas.com".parse().unwrap();
        assert!(matches!(uri.socket_addr(), Err(Error::Unresolvable(_))));
    }

    #[test]
    fn rejects_garbage() {
        assert!("http://example.com".parse::<Uri>().is_err());
        assert!("sip:@host".parse::<Uri>().is_err());
        assert!("sip:user@host:notaport".parse::<Uri>().is_err());
    }
}

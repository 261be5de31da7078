//! Network endpoint value object.
//!
//! Parses the `host:port` strings the storage control plane uses for
//! internal and external NFS endpoints. IPv6 hosts must be bracketed
//! (`[fd00::1]:2049`).

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A parsed `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse an endpoint string, see [`FromStr`].
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_endpoint(s, "missing port"))?;

        let host = match host.strip_prefix('[') {
            Some(inner) => inner
                .strip_suffix(']')
                .ok_or_else(|| Error::invalid_endpoint(s, "unterminated IPv6 bracket"))?,
            None if host.contains(':') => {
                return Err(Error::invalid_endpoint(s, "IPv6 host must be bracketed"))
            }
            None => host,
        };

        if host.is_empty() {
            return Err(Error::invalid_endpoint(s, "empty host"));
        }

        let port: u16 = port
            .parse()
            .map_err(|e| Error::invalid_endpoint(s, format!("bad port: {}", e)))?;
        if port == 0 {
            return Err(Error::invalid_endpoint(s, "port must be non-zero"));
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_PORT: u16 = 27017;

/// The address of a single server, used both as the key into a topology's server map and as
/// the target of a monitor's probes.
///
/// Hosts are canonicalized to lowercase at construction time so that case differences between
/// a seed list and a server's self-reported `hosts`/`me` field never produce spurious churn.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into().to_lowercase(),
            port: port.unwrap_or(DEFAULT_PORT),
        }
    }

    /// Parses a `host` or `host:port` string, defaulting the port to 27017 when absent.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref().trim();
        if address.is_empty() {
            return Err(Error::invalid_argument("server address must not be empty"));
        }

        match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::invalid_argument(format!("invalid port in address {:?}", address))
                })?;
                Ok(Self::new(host, Some(port)))
            }
            None => Ok(Self::new(address, None)),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod test {
    use super::ServerAddress;

    #[test]
    fn parses_host_and_port() {
        let addr = ServerAddress::parse("Example.com:27018").unwrap();
        assert_eq!(addr.host(), "example.com");
        assert_eq!(addr.port(), 27018);
    }

    #[test]
    fn defaults_port() {
        let addr = ServerAddress::parse("localhost").unwrap();
        assert_eq!(addr.port(), 27017);
    }

    #[test]
    fn rejects_empty() {
        assert!(ServerAddress::parse("").is_err());
    }

    #[test]
    fn rejects_bad_port() {
        assert!(ServerAddress::parse("host:notaport").is_err());
    }
}

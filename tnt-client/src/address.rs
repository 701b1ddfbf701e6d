//! Server address parsing.
//!
//! Accepted forms are `host:port` and `host:port/space`, where the optional
//! trailing segment is a default space for requests that name none.
//! IPv6 hosts are written in brackets: `[::1]:33013/1`.

use crate::error::ClientError;
use std::fmt;
use std::str::FromStr;

/// A parsed server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
    /// Default space embedded in the address string.
    pub default_space: Option<u32>,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            default_space: None,
        }
    }

    pub fn with_default_space(mut self, space: u32) -> Self {
        self.default_space = Some(space);
        self
    }

    /// The `host:port` part, suitable for dialing.
    pub fn host_port(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::InvalidAddress(s.to_string());

        let (host_port, default_space) = match s.rsplit_once('/') {
            Some((host_port, space)) => {
                let space = space.parse::<u32>().map_err(|_| invalid())?;
                (host_port, Some(space))
            }
            None => (s, None),
        };

        let (host, port) = host_port.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        let host = match host.strip_prefix('[') {
            Some(bracketed) => bracketed.strip_suffix(']').ok_or_else(invalid)?,
            // An unbracketed IPv6 literal would have been split on the wrong colon.
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            default_space,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host_port())?;
        if let Some(space) = self.default_space {
            write!(f, "/{space}")?;
        }
        Ok(())
    }
}

use crate::RemoteError;

use std::{fmt, str::FromStr};

/// A remote server's name and port
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostPort {
    host: String,
    port: u16,
}

impl HostPort {
    /// Port used when none is given
    pub const DEFAULT_PORT: u16 = 8448;

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for HostPort {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RemoteError::InvalidHost(s.to_string());

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => return Err(invalid()),
            }
        } else {
            match s.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                Some(_) => return Err(invalid()),
                None => (s, None),
            }
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None => Self::DEFAULT_PORT,
        };

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_forms() {
        let hp: HostPort = "matrix.example.org:443".parse().unwrap();
        assert_eq!((hp.host(), hp.port()), ("matrix.example.org", 443));

        let hp: HostPort = "example.org".parse().unwrap();
        assert_eq!(hp.port(), HostPort::DEFAULT_PORT);

        let hp: HostPort = "[::1]:8008".parse().unwrap();
        assert_eq!(hp.host(), "::1");
        assert_eq!(hp.to_string(), "[::1]:8008");

        assert!("example.org:notaport".parse::<HostPort>().is_err());
        assert!(":80".parse::<HostPort>().is_err());
        assert!("::1".parse::<HostPort>().is_err());
    }
}

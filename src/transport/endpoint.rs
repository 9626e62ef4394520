//! Endpoint strings.
//!
//! ```text
//! ["@"] proto "+" host "+" port [" " key=value ...]
//! ```
//!
//! Lists join endpoints with `@`. The only recognised option is
//! `timeout=message[,close[,connect]]` in milliseconds.
//!
//! # Example
//!
//! ```
//! use xic::transport::Endpoint;
//!
//! let ep = Endpoint::parse("@tcp+127.0.0.1+19999 timeout=5000,,100").unwrap();
//! assert_eq!(ep.host(), "127.0.0.1");
//! assert_eq!(ep.port(), 19999);
//! assert_eq!(ep.timeouts().message, 5000);
//! assert_eq!(ep.timeouts().close, 0);
//! assert_eq!(ep.timeouts().connect, 100);
//! ```

use std::fmt;
use std::net::SocketAddr;

use crate::error::{Result, XicError};

/// Per-endpoint timeout overrides in milliseconds. 0 means unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EndpointTimeouts {
    pub message: u64,
    pub close: u64,
    pub connect: u64,
}

impl EndpointTimeouts {
    fn parse(value: &str) -> Self {
        let mut parts = value.split(',').map(|p| p.trim().parse::<u64>().unwrap_or(0));
        Self {
            message: parts.next().unwrap_or(0),
            close: parts.next().unwrap_or(0),
            connect: parts.next().unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A parsed tcp endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
    timeouts: EndpointTimeouts,
}

impl Endpoint {
    /// Parse one endpoint. A leading `@` is allowed.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let body = s.strip_prefix('@').unwrap_or(s);
        let mut words = body.split_whitespace();
        let address = words
            .next()
            .ok_or_else(|| XicError::EndpointParse(s.to_string()))?;

        let parts: Vec<&str> = address.split('+').collect();
        let [proto, host, port] = parts[..] else {
            return Err(XicError::EndpointParse(s.to_string()));
        };
        if !proto.is_empty() && proto != "tcp" {
            return Err(XicError::EndpointParse(format!(
                "unsupported transport {:?} in {}",
                proto, s
            )));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| XicError::EndpointParse(s.to_string()))?;

        let mut timeouts = EndpointTimeouts::default();
        for word in words {
            if let Some(value) = word.strip_prefix("timeout=") {
                timeouts = EndpointTimeouts::parse(value);
            }
        }

        Ok(Self {
            host: host.to_string(),
            port,
            timeouts,
        })
    }

    /// Parse an `@`-separated list, skipping empty entries.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        s.split('@')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Endpoint for a bound socket address.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            timeouts: EndpointTimeouts::default(),
        }
    }

    /// Host as written, possibly empty.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeouts(&self) -> &EndpointTimeouts {
        &self.timeouts
    }

    /// Same endpoint on another port, used once a port-0 bind is resolved.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeouts(mut self, timeouts: EndpointTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// IPv6 literal host.
    pub fn is_ipv6(&self) -> bool {
        self.host.contains(':')
    }

    /// Host to connect to. Empty means localhost.
    pub fn connect_host(&self) -> &str {
        if self.host.is_empty() {
            "localhost"
        } else {
            &self.host
        }
    }

    /// Host to bind. Empty means every interface.
    pub fn bind_host(&self) -> &str {
        if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp+{}+{}", self.host, self.port)?;
        if !self.timeouts.is_empty() {
            let t = &self.timeouts;
            write!(f, " timeout={},{},{}", t.message, t.close, t.connect)?;
        }
        Ok(())
    }
}

/// Join endpoints into an `@`-prefixed list.
pub fn format_list(endpoints: &[Endpoint]) -> String {
    endpoints.iter().map(|e| format!("@{}", e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let ep = Endpoint::parse("tcp+127.0.0.1+19999").unwrap();
        assert_eq!(ep.host(), "127.0.0.1");
        assert_eq!(ep.port(), 19999);
        assert!(ep.timeouts().is_empty());
        assert_eq!(ep.to_string(), "tcp+127.0.0.1+19999");
    }

    #[test]
    fn test_empty_proto_and_host() {
        let ep = Endpoint::parse("@++4000").unwrap();
        assert_eq!(ep.connect_host(), "localhost");
        assert_eq!(ep.bind_host(), "0.0.0.0");
        assert_eq!(ep.port(), 4000);
    }

    #[test]
    fn test_ipv6_host() {
        let ep = Endpoint::parse("tcp+::1+4000").unwrap();
        assert!(ep.is_ipv6());
        assert_eq!(ep.connect_host(), "::1");
    }

    #[test]
    fn test_bad_endpoints() {
        for s in ["", "tcp+host", "tcp+h+p+x", "tcp+h+notaport", "udp+h+1", "tcp+h+70000"] {
            assert!(
                matches!(Endpoint::parse(s), Err(XicError::EndpointParse(_))),
                "{:?} should not parse",
                s
            );
        }
    }

    #[test]
    fn test_timeout_option() {
        let ep = Endpoint::parse("tcp+h+1 foo=bar timeout=10,x,30").unwrap();
        assert_eq!(
            *ep.timeouts(),
            EndpointTimeouts {
                message: 10,
                close: 0,
                connect: 30,
            }
        );
        assert_eq!(ep.to_string(), "tcp+h+1 timeout=10,0,30");
    }

    #[test]
    fn test_parse_list() {
        let eps = Endpoint::parse_list("@tcp+a+1 @ @tcp+b+2").unwrap();
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[1].host(), "b");
        assert_eq!(format_list(&eps), "@tcp+a+1@tcp+b+2");
        assert!(Endpoint::parse_list("").unwrap().is_empty());
    }
}

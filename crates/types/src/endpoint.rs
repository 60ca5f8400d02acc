//! Network address of a cluster member.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{InvalidEndpointSnafu, Result, TypesError};

/// Port assumed when an endpoint string omits one.
pub const DEFAULT_PORT: u16 = 27017;

/// Host and port identifying one cluster member.
///
/// Endpoints compare by value and order by host, then port. Host names are
/// stored lowercased so `DB1:27017` and `db1:27017` name the same member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host and port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into().to_ascii_lowercase(), port }
    }

    /// Returns the host name or IP literal.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
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

impl FromStr for Endpoint {
    type Err = TypesError;

    /// Parses `host`, `host:port`, `[v6]` or `[v6]:port`.
    fn from_str(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        ensure!(
            !trimmed.is_empty(),
            InvalidEndpointSnafu { input, reason: "host must not be empty" }
        );

        let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(|| {
                InvalidEndpointSnafu { input, reason: "unterminated IPv6 literal" }.build()
            })?;
            let port = match after {
                "" => None,
                _ => Some(after.strip_prefix(':').ok_or_else(|| {
                    InvalidEndpointSnafu { input, reason: "expected ':' after IPv6 literal" }
                        .build()
                })?),
            };
            (host, port)
        } else {
            match trimmed.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (trimmed, None),
            }
        };

        ensure!(!host.is_empty(), InvalidEndpointSnafu { input, reason: "host must not be empty" });
        ensure!(
            trimmed.starts_with('[') || !host.contains(':'),
            InvalidEndpointSnafu { input, reason: "IPv6 literals must be enclosed in brackets" }
        );
        ensure!(
            !host.contains(char::is_whitespace),
            InvalidEndpointSnafu { input, reason: "host cannot contain whitespace" }
        );

        let port = match port {
            None => DEFAULT_PORT,
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                InvalidEndpointSnafu { input, reason: format!("port '{raw}' is not a valid u16") }
                    .build()
            })?,
        };
        ensure!(port != 0, InvalidEndpointSnafu { input, reason: "port cannot be zero" });

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

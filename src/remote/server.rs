use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static SERVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:([^@\s]+)@)?([^:@\s]+)(?::(\d+))?$").unwrap());

/// A remote host, written `[user@]host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Server {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl Server {
    /// Destination argument for ssh: `user@host` or `host`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

impl FromStr for Server {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let caps = SERVER_RE
            .captures(trimmed)
            .ok_or_else(|| Error::InvalidServer(s.to_string()))?;

        let port = match caps.get(3) {
            Some(m) => Some(
                m.as_str()
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidServer(s.to_string()))?,
            ),
            None => None,
        };

        Ok(Server {
            user: caps.get(1).map(|m| m.as_str().to_string()),
            host: caps[2].to_string(),
            port,
        })
    }
}

impl TryFrom<String> for Server {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Server> for String {
    fn from(server: Server) -> Self {
        server.to_string()
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination())?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

/// Parse every entry of a server list, failing on the first malformed one.
pub fn parse_servers(entries: &[String]) -> Result<Vec<Server>> {
    entries.iter().map(|entry| entry.parse()).collect()
}

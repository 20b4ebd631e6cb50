//! Configuration loading.
//!
//! A small YAML document maps receiver keys to TCP ports and sets the
//! log level:
//!
//! ```yaml
//! environment:
//!   ports:
//!     sia-dcs: 4556
//!     masxml: 4557
//!   command_port: 6688
//! logging:
//!   level: INFO
//! ```
//!
//! Port keys are lowercase and hyphenated; the `cms-` prefixed aliases
//! are accepted too. A receiver without a configured port is a startup
//! error, reported before any socket is bound.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::receiver::ReceiverKind;

/// Default command socket port.
pub const DEFAULT_COMMAND_PORT: u16 = 6688;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Port assignments and socket options.
    #[serde(default)]
    pub environment: Environment,
    /// Logging options.
    #[serde(default)]
    pub logging: Logging,
}

/// The `environment` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    /// Receiver key → TCP port.
    #[serde(default)]
    pub ports: HashMap<String, u16>,
    /// Loopback command socket port; defaults to 6688.
    #[serde(default)]
    pub command_port: Option<u16>,
}

/// The `logging` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Logging {
    /// Level name (DEBUG, INFO, WARNING, ERROR, CRITICAL, TRACE).
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "INFO".to_string()
}

impl Config {
    /// Load and parse a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Parse a YAML configuration document.
    pub fn parse(text: &str) -> Result<Config> {
        serde_yaml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }

    /// The configured port for a receiver, accepting `cms-` aliases.
    pub fn port_for(&self, kind: ReceiverKind) -> Result<u16> {
        for key in kind.config_aliases() {
            if let Some(&port) = self.environment.ports.get(&key) {
                return Ok(port);
            }
        }
        Err(Error::PortNotConfigured {
            key: kind.config_key().to_string(),
        })
    }

    /// Receivers that have a configured port, in startup order.
    pub fn configured_receivers(&self) -> Vec<ReceiverKind> {
        ReceiverKind::ALL
            .into_iter()
            .filter(|kind| self.port_for(*kind).is_ok())
            .collect()
    }

    /// The loopback command socket address.
    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            self.environment.command_port.unwrap_or(DEFAULT_COMMAND_PORT),
        )
    }
}

//! Configuration model for the flowstate daemon and CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{FlowstateError, Result};

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowstateConfig {
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// dnsmasq lease file backing the lease store.
    pub leases_path: PathBuf,
    /// How the connection-tracking table is obtained.
    pub conntrack: ConntrackConfig,
}

impl Default for FlowstateConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(constants::DEFAULT_SOCKET_PATH),
            leases_path: PathBuf::from(constants::DEFAULT_LEASES_PATH),
            conntrack: ConntrackConfig::default(),
        }
    }
}

/// Settings for the external connection-tracking tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConntrackConfig {
    /// Program to invoke.
    pub program: String,
    /// Arguments producing a one-shot table listing.
    pub dump_args: Vec<String>,
    /// Arguments producing the continuous event stream.
    pub event_args: Vec<String>,
    /// Only index flows whose addresses were translated.
    pub nat_only: bool,
    /// Kill a dump that runs longer than this many seconds.
    pub dump_timeout_secs: Option<u64>,
}

impl Default for ConntrackConfig {
    fn default() -> Self {
        Self {
            program: constants::DEFAULT_CONNTRACK_PROGRAM.to_string(),
            dump_args: to_owned(constants::DEFAULT_DUMP_ARGS),
            event_args: to_owned(constants::DEFAULT_EVENT_ARGS),
            nat_only: true,
            dump_timeout_secs: None,
        }
    }
}

impl ConntrackConfig {
    /// Returns the dump timeout as a [`Duration`].
    #[must_use]
    pub fn dump_timeout(&self) -> Option<Duration> {
        self.dump_timeout_secs.map(Duration::from_secs)
    }
}

fn to_owned(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

impl FlowstateConfig {
    /// Loads a configuration file, falling back to defaults for absent keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading configuration");
        let raw = std::fs::read_to_string(path).map_err(|e| FlowstateError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    ///
    /// # Errors
    ///
    /// See [`FlowstateConfig::load`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Checks values that would only fail later, at dump time.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty program name or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.conntrack.program.trim().is_empty() {
            return Err(FlowstateError::Config {
                message: "conntrack.program must not be empty".into(),
            });
        }
        if self.conntrack.dump_timeout_secs == Some(0) {
            return Err(FlowstateError::Config {
                message: "conntrack.dump_timeout_secs must be at least 1".into(),
            });
        }
        Ok(())
    }
}

//! Configuration for the gate service.
//!
//! Server settings come from CLI flags or environment variables. Admission
//! policies come from an optional TOML file:
//!
//! ```toml
//! [default]
//! window_secs = 300
//! backoff_secs = 600
//! min_count = 3
//!
//! [sources.github-actions]
//! min_count = 1
//! backoff_secs = 1800
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::admission::DEFAULT_ADMIT_DEADLINE;
use crate::error::{GateError, Result};
use crate::types::Policy;

/// Policy as written in config files and request bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySpec {
    /// Counting window in seconds (0 = unbounded)
    pub window_secs: u64,
    /// Cooldown after admission in seconds (0 = none)
    pub backoff_secs: u64,
    /// Occurrences required before admitting (values below 1 mean 1)
    pub min_count: u64,
}

impl From<PolicySpec> for Policy {
    fn from(spec: PolicySpec) -> Self {
        Self::from_secs(spec.window_secs, spec.backoff_secs, spec.min_count)
    }
}

/// Default policy plus per-source overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyTable {
    /// Applied to sources without an override
    pub default: PolicySpec,
    /// Keyed by source name
    pub sources: HashMap<String, PolicySpec>,
}

impl PolicyTable {
    /// Parse a policy table from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GateError::Config(format!("invalid policy file: {e}")))
    }

    /// Load a policy table from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Policy for `source`, falling back to the default.
    #[must_use]
    pub fn policy_for(&self, source: &str) -> Policy {
        self.sources
            .get(source.trim())
            .copied()
            .unwrap_or(self.default)
            .into()
    }
}

/// Which state store backs the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreBackend {
    /// In-process, lost on restart
    #[default]
    Memory,
    /// JSON documents under the data directory
    File,
}

impl std::str::FromStr for StoreBackend {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(GateError::Config(format!("unknown store backend: {other}"))),
        }
    }
}

/// Gate service configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// HTTP listen address
    pub listen: String,
    /// State store backend
    pub store: StoreBackend,
    /// Data directory for the file store
    pub data_dir: PathBuf,
    /// Deadline for each admission call
    pub admit_timeout: Duration,
    /// Admission policies
    pub policies: PolicyTable,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            store: StoreBackend::default(),
            data_dir: PathBuf::from("/data/alert-gate"),
            admit_timeout: DEFAULT_ADMIT_DEADLINE,
            policies: PolicyTable::default(),
        }
    }
}

impl GateConfig {
    /// Build configuration from `ALERT_GATE_*` environment variables.
    ///
    /// Unset variables keep their defaults; a set but unparseable value is
    /// an error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(listen) = env::var("ALERT_GATE_LISTEN") {
            config.listen = listen;
        }
        if let Ok(store) = env::var("ALERT_GATE_STORE") {
            config.store = store.parse()?;
        }
        if let Ok(dir) = env::var("ALERT_GATE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(ms) = env::var("ALERT_GATE_ADMIT_TIMEOUT_MS") {
            let ms: u64 = ms.trim().parse().map_err(|e| {
                GateError::Config(format!("ALERT_GATE_ADMIT_TIMEOUT_MS={ms:?}: {e}"))
            })?;
            config.admit_timeout = Duration::from_millis(ms);
        }
        if let Ok(path) = env::var("ALERT_GATE_POLICY_FILE") {
            config.policies = PolicyTable::load(Path::new(&path))?;
        }

        Ok(config)
    }
}

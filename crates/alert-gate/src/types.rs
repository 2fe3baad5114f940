//! Core types for the admission gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GateError, Result};

/// Identity of one alerting condition from one producer.
///
/// Both fields are stored trimmed and are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GateKey {
    source: String,
    fingerprint: String,
}

impl GateKey {
    /// Build a key, rejecting blank components.
    pub fn new(source: &str, fingerprint: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(GateError::InvalidKey { field: "source" });
        }
        let fingerprint = fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(GateError::InvalidKey {
                field: "fingerprint",
            });
        }
        Ok(Self {
            source: source.to_string(),
            fingerprint: fingerprint.to_string(),
        })
    }

    /// Producer integration name.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Producer-assigned condition identity.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Display for GateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.fingerprint)
    }
}

/// Per-key counters and cooldown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateState {
    /// Start of the current counting window
    pub first_seen: DateTime<Utc>,
    /// Most recent occurrence
    pub last_seen: DateTime<Utc>,
    /// Occurrences since `first_seen`, including suppressed ones
    pub count: u64,
    /// End of the active cooldown, if any
    #[serde(default)]
    pub suppressed_until: Option<DateTime<Utc>>,
}

impl GateState {
    /// State for the first occurrence of a key.
    #[must_use]
    pub const fn first(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            count: 1,
            suppressed_until: None,
        }
    }

    /// Whether a cooldown is active at `now`.
    #[must_use]
    pub fn is_suppressed_at(&self, now: DateTime<Utc>) -> bool {
        self.suppressed_until.is_some_and(|until| now < until)
    }
}

/// Admission policy, supplied per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Counting window; zero means unbounded
    pub window: Duration,
    /// Cooldown after an admission; zero disables suppression
    pub backoff: Duration,
    /// Occurrences required within the window before admitting
    pub min_count: u64,
}

impl Policy {
    /// Build a policy. `min_count` is clamped to at least 1.
    #[must_use]
    pub fn new(window: Duration, backoff: Duration, min_count: u64) -> Self {
        Self {
            window,
            backoff,
            min_count: min_count.max(1),
        }
    }

    /// Build a policy from whole seconds.
    #[must_use]
    pub fn from_secs(window_secs: u64, backoff_secs: u64, min_count: u64) -> Self {
        Self::new(
            Duration::from_secs(window_secs),
            Duration::from_secs(backoff_secs),
            min_count,
        )
    }

    /// Every occurrence passes.
    #[must_use]
    pub const fn pass_through() -> Self {
        Self {
            window: Duration::ZERO,
            backoff: Duration::ZERO,
            min_count: 1,
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::pass_through()
    }
}

/// Lifecycle status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Condition is active
    #[default]
    Firing,
    /// Condition has cleared
    Resolved,
}

impl AlertStatus {
    /// Wire name of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = GateError;

    /// An empty status means firing.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "firing" => Ok(Self::Firing),
            "resolved" => Ok(Self::Resolved),
            other => Err(GateError::InvalidStatus(other.to_string())),
        }
    }
}

/// Canonical record of an alert, one per fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Always equal to `fingerprint`
    pub alert_id: String,
    /// Producer-assigned condition identity
    pub fingerprint: String,
    /// Last delivered status
    pub status: AlertStatus,
    /// Fixed at first insertion
    pub started_at: DateTime<Utc>,
    /// Last write time, never moves backwards
    pub updated_at: DateTime<Utc>,
    /// Last delivered payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// One lifecycle write, merged into an [`AlertRecord`] by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertUpdate {
    pub fingerprint: String,
    pub status: AlertStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl AlertRecord {
    /// Record created by the first write for a fingerprint.
    #[must_use]
    pub fn from_update(update: AlertUpdate) -> Self {
        Self {
            alert_id: update.fingerprint.clone(),
            fingerprint: update.fingerprint,
            status: update.status,
            started_at: update.started_at,
            updated_at: update.updated_at,
            payload: update.payload,
        }
    }

    /// Overwrite status and payload. `started_at` is kept.
    pub fn apply(&mut self, update: AlertUpdate) {
        self.status = update.status;
        self.payload = update.payload;
        self.updated_at = self.updated_at.max(update.updated_at);
    }
}

/// `at + by`, saturating at the maximum representable time.
#[must_use]
pub fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whether more than `limit` has passed between `since` and `now`.
///
/// Limits too large for a chrono delta never elapse.
#[must_use]
pub fn elapsed_beyond(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    match chrono::Duration::from_std(limit) {
        Ok(limit) => now.signed_duration_since(since) > limit,
        Err(_) => false,
    }
}

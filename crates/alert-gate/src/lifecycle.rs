//! Alert lifecycle tracking.
//!
//! Maintains one canonical [`AlertRecord`] per fingerprint. Writes are plain
//! upserts that never branch on prior state, so the tracker is safe to run
//! alongside gate evaluation for the same fingerprint.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{GateError, Result};
use crate::store::StateStore;
use crate::types::{AlertRecord, AlertStatus, AlertUpdate};

/// Upserts alert records into a [`StateStore`].
#[derive(Clone)]
pub struct AlertLifecycleTracker {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl AlertLifecycleTracker {
    /// Create a tracker writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record a delivery for `fingerprint` and return its alert ID.
    ///
    /// `status` defaults to firing and `started_at` to now; `started_at` only
    /// takes effect on the first write for a fingerprint and is never later
    /// than the record's `updated_at`.
    pub async fn upsert(
        &self,
        fingerprint: &str,
        status: Option<AlertStatus>,
        started_at: Option<DateTime<Utc>>,
        payload: serde_json::Value,
    ) -> Result<String> {
        self.upsert_record(fingerprint, status, started_at, payload)
            .await
            .map(|record| record.alert_id)
    }

    /// Like [`Self::upsert`], returning the full committed record.
    pub async fn upsert_record(
        &self,
        fingerprint: &str,
        status: Option<AlertStatus>,
        started_at: Option<DateTime<Utc>>,
        payload: serde_json::Value,
    ) -> Result<AlertRecord> {
        let fingerprint = fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(GateError::InvalidFingerprint);
        }

        let now = self.clock.now();
        let record = self
            .store
            .upsert_alert(AlertUpdate {
                fingerprint: fingerprint.to_string(),
                status: status.unwrap_or_default(),
                started_at: started_at.map_or(now, |at| at.min(now)),
                updated_at: now,
                payload,
            })
            .await?;

        debug!(
            alert_id = %record.alert_id,
            status = %record.status,
            "Alert record upserted"
        );

        Ok(record)
    }

    /// Mark `fingerprint` resolved.
    pub async fn resolve(&self, fingerprint: &str, payload: serde_json::Value) -> Result<AlertRecord> {
        self.upsert_record(fingerprint, Some(AlertStatus::Resolved), None, payload)
            .await
    }

    /// Current record for `fingerprint`.
    pub async fn get(&self, fingerprint: &str) -> Result<Option<AlertRecord>> {
        let fingerprint = fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(GateError::InvalidFingerprint);
        }
        self.store.alert(fingerprint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStateStore;
    use chrono::TimeZone;
    use std::time::Duration;

    fn setup() -> (AlertLifecycleTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));
        let tracker = AlertLifecycleTracker::new(Arc::new(MemoryStateStore::new()), clock.clone());
        (tracker, clock)
    }

    #[tokio::test]
    async fn test_rejects_blank_fingerprint() {
        let (tracker, _) = setup();
        let err = tracker
            .upsert("  ", None, None, serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidFingerprint));
    }

    #[tokio::test]
    async fn test_defaults_status_and_started_at() {
        let (tracker, clock) = setup();
        let id = tracker
            .upsert(" fp1 ", None, None, serde_json::json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(id, "fp1");

        let record = tracker.get("fp1").await.unwrap().unwrap();
        assert_eq!(record.status, AlertStatus::Firing);
        assert_eq!(record.started_at, clock.now());
        assert_eq!(record.updated_at, clock.now());
    }

    #[tokio::test]
    async fn test_started_at_fixed_and_updated_at_advances() {
        let (tracker, clock) = setup();
        let started = clock.now() - chrono::Duration::minutes(3);
        tracker
            .upsert("fp1", None, Some(started), serde_json::json!({"n": 1}))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(60));
        let record = tracker.resolve("fp1", serde_json::json!({"n": 2})).await.unwrap();

        assert_eq!(record.started_at, started);
        assert_eq!(record.updated_at, clock.now());
        assert_eq!(record.status, AlertStatus::Resolved);
        assert_eq!(record.payload, serde_json::json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_started_at_ahead_of_clock_is_clamped() {
        let (tracker, clock) = setup();
        let ahead = clock.now() + chrono::Duration::minutes(5);
        let record = tracker
            .upsert_record("fp1", None, Some(ahead), serde_json::Value::Null)
            .await
            .unwrap();

        assert_eq!(record.started_at, clock.now());
        assert_eq!(record.updated_at, clock.now());
    }

    #[tokio::test]
    async fn test_repeat_upsert_is_idempotent() {
        let (tracker, _) = setup();
        let payload = serde_json::json!({"n": 1});
        let first = tracker
            .upsert_record("fp1", Some(AlertStatus::Firing), None, payload.clone())
            .await
            .unwrap();
        let second = tracker
            .upsert_record("fp1", Some(AlertStatus::Firing), None, payload)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_updated_at_never_moves_backwards() {
        let (tracker, clock) = setup();
        let late = clock.now();
        tracker
            .upsert("fp1", None, None, serde_json::Value::Null)
            .await
            .unwrap();

        clock.set(late - chrono::Duration::minutes(10));
        let record = tracker
            .upsert_record("fp1", None, None, serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(record.updated_at, late);
    }
}

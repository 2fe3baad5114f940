//! In-process state store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;
use tracing::debug;

use super::{check_deadline, GateUpdate, KeyedSlots, StateStore};
use crate::error::Result;
use crate::types::{AlertRecord, AlertUpdate, GateKey, GateState};

/// State store that keeps everything in memory.
///
/// Each gate key owns an async mutex holding its state, so same-key updates
/// queue behind each other while different keys proceed in parallel. State
/// is lost on restart; use [`super::FileStateStore`] when it must survive.
#[derive(Debug)]
pub struct MemoryStateStore {
    gates: KeyedSlots<GateKey, Option<GateState>>,
    alerts: Mutex<HashMap<String, AlertRecord>>,
}

impl MemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            gates: KeyedSlots::new(),
            alerts: Mutex::new(HashMap::new()),
        }
    }

    /// Number of gate keys ever seen.
    #[must_use]
    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn update_gate(
        &self,
        key: &GateKey,
        deadline: Instant,
        update: &mut GateUpdate<'_>,
    ) -> Result<GateState> {
        let mut state = self.gates.lock_until(key, deadline).await?;
        check_deadline(key, deadline)?;

        // No await between evaluation and commit
        let next = update(state.as_ref());
        *state = Some(next.clone());
        debug!(key = %key, count = next.count, "Gate state committed");
        Ok(next)
    }

    async fn gate_state(&self, key: &GateKey) -> Result<Option<GateState>> {
        match self.gates.existing(key) {
            Some(slot) => Ok(slot.lock().await.clone()),
            None => Ok(None),
        }
    }

    async fn upsert_alert(&self, update: AlertUpdate) -> Result<AlertRecord> {
        let mut alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        let record = match alerts.get_mut(&update.fingerprint) {
            Some(existing) => {
                existing.apply(update);
                existing.clone()
            }
            None => {
                let record = AlertRecord::from_update(update);
                alerts.insert(record.fingerprint.clone(), record.clone());
                record
            }
        };
        Ok(record)
    }

    async fn alert(&self, fingerprint: &str) -> Result<Option<AlertRecord>> {
        Ok(self
            .alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStoreExt;
    use crate::types::AlertStatus;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_get_and_update_persists_and_returns_output() {
        let store = MemoryStateStore::new();
        let key = GateKey::new("am", "fp1").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        assert!(store.gate_state(&key).await.unwrap().is_none());
        assert_eq!(store.gate_count(), 0);

        let (seen_prior, state) = store
            .get_and_update(&key, soon(), |prior| (prior.is_some(), GateState::first(now)))
            .await
            .unwrap();
        assert!(!seen_prior);
        assert_eq!(state.count, 1);

        let (seen_prior, state) = store
            .get_and_update(&key, soon(), |prior| {
                let mut next = prior.cloned().unwrap_or_else(|| GateState::first(now));
                next.count += 1;
                (prior.is_some(), next)
            })
            .await
            .unwrap();
        assert!(seen_prior);
        assert_eq!(state.count, 2);
        assert_eq!(store.gate_state(&key).await.unwrap(), Some(state));
        assert_eq!(store.gate_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_deadline_writes_nothing() {
        let store = MemoryStateStore::new();
        let key = GateKey::new("am", "fp1").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut called = false;

        let err = store
            .get_and_update(&key, Instant::now(), |_| {
                called = true;
                ((), GateState::first(now))
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(!called);
        assert!(store.gate_state(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contended_key_times_out_without_writing() {
        let store = MemoryStateStore::new();
        let key = GateKey::new("am", "fp1").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let held = store.gates.slot(&key).lock_owned().await;

        let err = store
            .get_and_update(&key, Instant::now() + Duration::from_millis(20), |_| {
                ((), GateState::first(now))
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        drop(held);
        assert!(store.gate_state(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_alert_merges() {
        let store = MemoryStateStore::new();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(1);

        store
            .upsert_alert(AlertUpdate {
                fingerprint: "fp1".to_string(),
                status: AlertStatus::Firing,
                started_at: t0,
                updated_at: t0,
                payload: serde_json::json!({"n": 1}),
            })
            .await
            .unwrap();
        let record = store
            .upsert_alert(AlertUpdate {
                fingerprint: "fp1".to_string(),
                status: AlertStatus::Resolved,
                started_at: t1,
                updated_at: t1,
                payload: serde_json::json!({"n": 2}),
            })
            .await
            .unwrap();

        assert_eq!(record.started_at, t0);
        assert_eq!(record.updated_at, t1);
        assert_eq!(record.status, AlertStatus::Resolved);
        assert_eq!(store.alert("fp1").await.unwrap(), Some(record));
        assert!(store.alert("fp2").await.unwrap().is_none());
    }
}

//! Admission facade: the entry point called once per inbound occurrence.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{GateError, Result};
use crate::evaluator::{evaluate, Verdict};
use crate::lifecycle::AlertLifecycleTracker;
use crate::store::{StateStore, StateStoreExt};
use crate::types::{AlertStatus, GateKey, GateState, Policy};

/// Deadline applied by [`AdmissionGate::admit`] unless configured otherwise.
pub const DEFAULT_ADMIT_DEADLINE: Duration = Duration::from_secs(5);

/// One inbound occurrence of an alerting condition.
#[derive(Debug, Clone)]
pub struct Occurrence {
    /// Producer integration name
    pub source: String,
    /// Producer-assigned condition identity
    pub fingerprint: String,
    /// When the occurrence happened; the gate's clock is used when absent
    pub occurred_at: Option<DateTime<Utc>>,
    /// Opaque producer payload, stored on the alert record
    pub payload: serde_json::Value,
}

impl Occurrence {
    #[must_use]
    pub fn new(source: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            fingerprint: fingerprint.into(),
            occurred_at: None,
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Outcome of a successful admission call.
///
/// `allowed == false` is a definite denial; failures are reported as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// Whether downstream remediation may proceed
    pub allowed: bool,
    /// Alert record ID (equal to the fingerprint)
    pub alert_id: String,
    /// Why the gate decided as it did
    pub verdict: Verdict,
    /// Committed gate state for diagnostics
    pub gate: GateState,
}

/// Composes the lifecycle tracker and the gate evaluator over one store.
#[derive(Clone)]
pub struct AdmissionGate {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    tracker: AlertLifecycleTracker,
    deadline: Duration,
}

impl AdmissionGate {
    /// Start building a gate.
    #[must_use]
    pub fn builder() -> AdmissionGateBuilder {
        AdmissionGateBuilder::default()
    }

    /// Admit `occurrence` under `policy` within the configured deadline.
    pub async fn admit(&self, occurrence: Occurrence, policy: &Policy) -> Result<Admission> {
        self.admit_within(occurrence, policy, self.deadline).await
    }

    /// Admit `occurrence` under `policy`, failing with `StoreUnavailable` if
    /// the store cannot commit within `deadline`.
    ///
    /// An error means the gate state was not changed, so the occurrence is
    /// safe to retry. The lifecycle upsert may already have landed; it is
    /// idempotent and a retry rewrites the same record.
    pub async fn admit_within(
        &self,
        occurrence: Occurrence,
        policy: &Policy,
        deadline: Duration,
    ) -> Result<Admission> {
        let key = GateKey::new(&occurrence.source, &occurrence.fingerprint)?;
        let now = occurrence.occurred_at.unwrap_or_else(|| self.clock.now());
        let until = deadline_after(deadline);

        let admission = match self
            .admit_until(&key, now, occurrence.payload, policy, until)
            .await
        {
            Ok(admission) => admission,
            Err(e) => {
                warn!(
                    key = %key,
                    store = self.store.name(),
                    deadline_ms = deadline.as_millis() as u64,
                    error = %e,
                    "Admission failed"
                );
                return Err(e);
            }
        };

        if admission.allowed {
            info!(
                key = %key,
                count = admission.gate.count,
                suppressed_until = ?admission.gate.suppressed_until,
                "Occurrence admitted"
            );
        } else {
            debug!(
                key = %key,
                count = admission.gate.count,
                verdict = ?admission.verdict,
                "Occurrence denied"
            );
        }

        Ok(admission)
    }

    async fn admit_until(
        &self,
        key: &GateKey,
        now: DateTime<Utc>,
        payload: serde_json::Value,
        policy: &Policy,
        until: Instant,
    ) -> Result<Admission> {
        let upsert = self.tracker.upsert(
            key.fingerprint(),
            Some(AlertStatus::Firing),
            Some(now),
            payload,
        );
        let alert_id = tokio::time::timeout_at(until, upsert).await.map_err(|_| {
            GateError::unavailable(format!(
                "{} store did not record alert {} in time",
                self.store.name(),
                key.fingerprint()
            ))
        })??;

        // The store owns the deadline from here: it either gives up before
        // writing or reports the state it committed.
        let ((allowed, verdict), gate) = self
            .store
            .get_and_update(key, until, |prior| {
                let decision = evaluate(key, now, policy, prior);
                ((decision.allowed, decision.verdict), decision.next)
            })
            .await?;

        Ok(Admission {
            allowed,
            alert_id,
            verdict,
            gate,
        })
    }

    /// Lifecycle tracker sharing this gate's store and clock.
    #[must_use]
    pub fn tracker(&self) -> &AlertLifecycleTracker {
        &self.tracker
    }

    /// Committed gate state for (source, fingerprint).
    pub async fn gate_state(&self, source: &str, fingerprint: &str) -> Result<Option<GateState>> {
        let key = GateKey::new(source, fingerprint)?;
        self.store.gate_state(&key).await
    }

    /// Name of the backing store.
    #[must_use]
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }
}

/// Instant `deadline` from now, saturating far in the future.
fn deadline_after(deadline: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(deadline)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

/// Builder for [`AdmissionGate`].
#[derive(Default)]
pub struct AdmissionGateBuilder {
    store: Option<Arc<dyn StateStore>>,
    clock: Option<Arc<dyn Clock>>,
    deadline: Option<Duration>,
}

impl AdmissionGateBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to [`DEFAULT_ADMIT_DEADLINE`].
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fails with `NotInitialized` when no store was provided.
    pub fn build(self) -> Result<AdmissionGate> {
        let store = self.store.ok_or(GateError::NotInitialized)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let tracker = AlertLifecycleTracker::new(Arc::clone(&store), Arc::clone(&clock));

        Ok(AdmissionGate {
            store,
            clock,
            tracker,
            deadline: self.deadline.unwrap_or(DEFAULT_ADMIT_DEADLINE),
        })
    }
}

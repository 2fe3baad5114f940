//! Alert admission gate for the CTO platform.
//!
//! Decides whether an inbound operational occurrence (metric alert, cluster
//! event, CI webhook) may trigger downstream remediation, and keeps one
//! canonical lifecycle record per alert fingerprint.
//!
//! # Usage
//!
//! ```no_run
//! use alert_gate::{AdmissionGate, MemoryStateStore, Occurrence, Policy};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), alert_gate::GateError> {
//! let gate = AdmissionGate::builder()
//!     .store(Arc::new(MemoryStateStore::new()))
//!     .build()?;
//!
//! // Admit after 3 occurrences within 5 minutes, then mute for 10 minutes
//! let policy = Policy::from_secs(300, 600, 3);
//! let admission = gate.admit(Occurrence::new("alertmanager", "a1b2c3"), &policy).await?;
//! if admission.allowed {
//!     // build a remediation plan
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`Clock`] supplies time so decisions are deterministic under test
//! - [`StateStore`] owns per-key state behind an atomic get-and-update
//! - [`evaluate`] is the pure threshold/cooldown decision
//! - [`AlertLifecycleTracker`] upserts alert records
//! - [`AdmissionGate`] composes the tracker and evaluator per occurrence

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod lifecycle;
pub mod server;
pub mod store;
pub mod types;

pub use admission::{Admission, AdmissionGate, AdmissionGateBuilder, Occurrence};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GateConfig, PolicySpec, PolicyTable, StoreBackend};
pub use error::GateError;
pub use evaluator::{evaluate, Decision, Verdict};
pub use lifecycle::AlertLifecycleTracker;
pub use store::{FileStateStore, MemoryStateStore, StateStore, StateStoreExt};
pub use types::{AlertRecord, AlertStatus, GateKey, GateState, Policy};

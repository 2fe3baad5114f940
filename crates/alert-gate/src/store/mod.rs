//! Keyed state storage with an atomic per-key read-modify-write.
//!
//! Every implementation linearizes writes for the same key: the closure
//! passed to [`StateStore::update_gate`] sees the fully committed result of
//! the previous update for that key, and its return value is persisted
//! before the lock is released. Writes for different keys never wait on each
//! other.
//!
//! Gate updates carry a deadline. A store gives up with `StoreUnavailable`
//! only before it starts writing; once the closure has run, the write is
//! carried to completion even if the caller goes away, and the committed
//! state is reported as success.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use crate::error::{GateError, Result};
use crate::types::{AlertRecord, AlertUpdate, GateKey, GateState};

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

/// Closure run inside a key's critical section.
pub type GateUpdate<'a> = dyn FnMut(Option<&GateState>) -> GateState + Send + 'a;

/// Durable keyed storage for gate state and alert records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Atomically read the state for `key`, pass it to `update`, persist and
    /// return the result.
    ///
    /// If `deadline` passes before `update` runs, fail with
    /// `StoreUnavailable` and write nothing. After `update` has run, never
    /// report a deadline failure for a write that commits.
    async fn update_gate(
        &self,
        key: &GateKey,
        deadline: Instant,
        update: &mut GateUpdate<'_>,
    ) -> Result<GateState>;

    /// Read the committed state for `key`.
    async fn gate_state(&self, key: &GateKey) -> Result<Option<GateState>>;

    /// Insert or merge an alert record under the fingerprint's lock.
    async fn upsert_alert(&self, update: AlertUpdate) -> Result<AlertRecord>;

    /// Read the alert record for `fingerprint`.
    async fn alert(&self, fingerprint: &str) -> Result<Option<AlertRecord>>;
}

/// Generic helpers over any [`StateStore`].
#[async_trait]
pub trait StateStoreExt: StateStore {
    /// Run `f` inside the key's atomic section and return its output along
    /// with the committed state.
    async fn get_and_update<T, F>(
        &self,
        key: &GateKey,
        deadline: Instant,
        mut f: F,
    ) -> Result<(T, GateState)>
    where
        T: Send,
        F: FnMut(Option<&GateState>) -> (T, GateState) + Send,
    {
        let mut output = None;
        let committed = self
            .update_gate(key, deadline, &mut |prior: Option<&GateState>| {
                let (out, next) = f(prior);
                output = Some(out);
                next
            })
            .await?;

        output.map(|out| (out, committed)).ok_or_else(|| {
            GateError::unavailable(format!("{} committed without evaluating", self.name()))
        })
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

/// Error for an update abandoned at its deadline.
pub(crate) fn deadline_passed(key: impl Display) -> GateError {
    GateError::unavailable(format!("deadline passed before committing {key}"))
}

/// Fails once `deadline` has been reached.
pub(crate) fn check_deadline(key: impl Display, deadline: Instant) -> Result<()> {
    if Instant::now() >= deadline {
        return Err(deadline_passed(key));
    }
    Ok(())
}

/// Lazily created per-key async locks, each guarding a value of type `V`.
///
/// Slots are never removed; gate keys are never deleted either.
#[derive(Debug)]
pub(crate) struct KeyedSlots<K, V> {
    slots: Mutex<HashMap<K, Arc<tokio::sync::Mutex<V>>>>,
}

impl<K, V> KeyedSlots<K, V>
where
    K: Eq + Hash + Clone,
    V: Default,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Slot for `key`, created on first use.
    pub(crate) fn slot(&self, key: &K) -> Arc<tokio::sync::Mutex<V>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }
        let slot = Arc::new(tokio::sync::Mutex::new(V::default()));
        slots.insert(key.clone(), Arc::clone(&slot));
        slot
    }

    /// Slot for `key` if it was ever created.
    pub(crate) fn existing(&self, key: &K) -> Option<Arc<tokio::sync::Mutex<V>>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(Arc::clone)
    }

    /// Lock the slot for `key`, giving up at `deadline`.
    ///
    /// The guard is owned so it can move into a task that finishes a write.
    pub(crate) async fn lock_until(&self, key: &K, deadline: Instant) -> Result<OwnedMutexGuard<V>>
    where
        K: Display,
    {
        let slot = self.slot(key);
        tokio::time::timeout_at(deadline, slot.lock_owned())
            .await
            .map_err(|_| deadline_passed(key))
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

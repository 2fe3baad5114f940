//! File-backed state store.
//!
//! Layout under the data directory:
//!
//! ```text
//! <root>/gates/<sha1(source \0 fingerprint)>.json
//! <root>/alerts/<sha1(fingerprint)>.json
//! ```
//!
//! Each document is written to a uniquely named temporary sibling and
//! renamed into place, so readers only ever see a complete previous or next
//! version. The write runs in its own task holding the key's lock, so a
//! caller that stops waiting cannot leave a half-finished commit behind or
//! let the next writer in early.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{check_deadline, deadline_passed, GateUpdate, KeyedSlots, StateStore};
use crate::error::{GateError, Result};
use crate::types::{AlertRecord, AlertUpdate, GateKey, GateState};

const GATES_DIR: &str = "gates";
const ALERTS_DIR: &str = "alerts";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// On-disk gate document. Carries the key so files are self-describing.
#[derive(Debug, Serialize, Deserialize)]
struct GateDocument {
    source: String,
    fingerprint: String,
    #[serde(flatten)]
    state: GateState,
}

/// Durable state store with one JSON document per key.
///
/// Same-key updates are serialized by an in-process lock, so a data
/// directory must be owned by a single running instance.
#[derive(Debug)]
pub struct FileStateStore {
    root: PathBuf,
    gate_locks: KeyedSlots<GateKey, ()>,
    alert_locks: KeyedSlots<String, ()>,
}

impl FileStateStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [GATES_DIR, ALERTS_DIR] {
            let path = root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| GateError::unavailable(format!("create {}: {e}", path.display())))?;
        }
        info!(root = %root.display(), "Opened file state store");

        Ok(Self::at(root))
    }

    /// Open an existing data directory without creating anything.
    ///
    /// Missing `gates/` or `alerts/` directories read as empty.
    pub async fn open_existing(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta = tokio::fs::metadata(&root)
            .await
            .map_err(|e| GateError::Config(format!("data directory {}: {e}", root.display())))?;
        if !meta.is_dir() {
            return Err(GateError::Config(format!(
                "data directory {} is not a directory",
                root.display()
            )));
        }
        Ok(Self::at(root))
    }

    fn at(root: PathBuf) -> Self {
        Self {
            root,
            gate_locks: KeyedSlots::new(),
            alert_locks: KeyedSlots::new(),
        }
    }

    /// Data directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn gate_path(&self, key: &GateKey) -> PathBuf {
        let name = digest_name(&[key.source(), key.fingerprint()]);
        self.root.join(GATES_DIR).join(name)
    }

    fn alert_path(&self, fingerprint: &str) -> PathBuf {
        self.root.join(ALERTS_DIR).join(digest_name(&[fingerprint]))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn update_gate(
        &self,
        key: &GateKey,
        deadline: Instant,
        update: &mut GateUpdate<'_>,
    ) -> Result<GateState> {
        let guard = self.gate_locks.lock_until(key, deadline).await?;

        let path = self.gate_path(key);
        let prior: Option<GateDocument> = tokio::time::timeout_at(deadline, read_json(&path))
            .await
            .map_err(|_| deadline_passed(key))??;
        check_deadline(key, deadline)?;

        let next = update(prior.as_ref().map(|doc| &doc.state));
        let doc = GateDocument {
            source: key.source().to_string(),
            fingerprint: key.fingerprint().to_string(),
            state: next,
        };
        commit(path.clone(), encode(&path, &doc)?, guard).await?;
        debug!(key = %key, count = doc.state.count, path = %path.display(), "Gate state committed");

        Ok(doc.state)
    }

    async fn gate_state(&self, key: &GateKey) -> Result<Option<GateState>> {
        let doc: Option<GateDocument> = read_json(&self.gate_path(key)).await?;
        Ok(doc.map(|doc| doc.state))
    }

    async fn upsert_alert(&self, update: AlertUpdate) -> Result<AlertRecord> {
        let guard = self
            .alert_locks
            .slot(&update.fingerprint)
            .lock_owned()
            .await;

        let path = self.alert_path(&update.fingerprint);
        let record = match read_json::<AlertRecord>(&path).await? {
            Some(mut existing) => {
                existing.apply(update);
                existing
            }
            None => AlertRecord::from_update(update),
        };
        commit(path.clone(), encode(&path, &record)?, guard).await?;

        Ok(record)
    }

    async fn alert(&self, fingerprint: &str) -> Result<Option<AlertRecord>> {
        read_json(&self.alert_path(fingerprint)).await
    }
}

/// `<sha1 hex of the NUL-joined parts>.json`
fn digest_name(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    format!("{}.json", hex::encode(hasher.finalize()))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GateError::unavailable(format!("read {}: {e}", path.display()))),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| GateError::unavailable(format!("decode {}: {e}", path.display())))
}

fn encode<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| GateError::unavailable(format!("encode {}: {e}", path.display())))
}

/// Write `bytes` to `path` in a task that outlives the caller and releases
/// `guard` when done.
async fn commit<G: Send + 'static>(path: PathBuf, bytes: Vec<u8>, guard: G) -> Result<()> {
    tokio::spawn(async move {
        let result = write_atomic(&path, &bytes).await;
        drop(guard);
        result
    })
    .await
    .map_err(|e| GateError::unavailable(format!("commit task failed: {e}")))?
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("json.{}.{seq}.tmp", std::process::id()));

    let result = write_then_rename(&tmp, path, bytes).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "Failed to remove temporary file");
            }
        }
    }
    result.map_err(|e| GateError::unavailable(format!("write {}: {e}", path.display())))
}

async fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp, path).await
}

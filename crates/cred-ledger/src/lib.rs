/*!
# cred-ledger

`LedgerStore`: an append-only, idempotent, atomically-persisted map of
`commitment -> record`.

## Architectural Tenets
- A single exclusive write lock covers "assign blockNumber -> mutate state ->
  persist atomically"; reads take a shared lock.
- Durability: write a full snapshot to a sibling `.tmp` file, fsync, then
  atomically rename over the canonical path. A present-but-unparseable file
  is a startup failure, never a silent reset.
- `CreateAnchor`/`CreateDid` are idempotent: a duplicate commitment/did
  returns the original record unchanged.
*/

use async_trait::async_trait;
use chrono::Utc;
use cred_models::{DocType, LedgerRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("commitment already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence failure: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt ledger file at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub anchors: u64,
    pub dids: u64,
    pub next_block: u64,
    pub mode: cred_common::config::LedgerMode,
}

/// On-disk shape: `{records: map<commitment, Record>, nextBlock: uint64}`.
/// Indentation is not significant to consumers.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerSnapshot {
    records: BTreeMap<String, LedgerRecord>,
    next_block: u64,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_anchor(
        &self,
        commitment: &str,
        metadata: Option<serde_json::Value>,
    ) -> LedgerResult<(String, u64)>;

    async fn get_anchor(&self, commitment: &str) -> LedgerResult<Option<LedgerRecord>>;

    async fn verify_anchor(&self, commitment: &str) -> LedgerResult<bool> {
        Ok(self.get_anchor(commitment).await?.is_some())
    }

    async fn create_did(
        &self,
        did: &str,
        did_document: serde_json::Value,
    ) -> LedgerResult<(String, u64)>;

    async fn get_did(&self, did: &str) -> LedgerResult<Option<LedgerRecord>>;

    async fn stats(&self) -> LedgerResult<LedgerStats>;
}

/// File-backed implementation. A `tokio::sync::RwLock` serializes writers
/// in-process; there is no cross-process file lock because this component
/// owns its backing file exclusively (per the shared-resource policy: a
/// database is written only by its owning service).
pub struct FileLedgerStore {
    path: PathBuf,
    state: RwLock<LedgerSnapshot>,
    tx_counter: AtomicU64,
}

impl FileLedgerStore {
    /// Opens (or initializes) the ledger at `path`. Missing/empty file starts
    /// from an empty state; a present-but-unparseable file fails fast.
    pub async fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => LedgerSnapshot::default(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| LedgerError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => LedgerSnapshot::default(),
            Err(e) => return Err(LedgerError::Io(e)),
        };
        let next_tx = snapshot.records.len() as u64;
        Ok(Self {
            path,
            state: RwLock::new(snapshot),
            tx_counter: AtomicU64::new(next_tx),
        })
    }

    /// Writes the full snapshot to a sibling `.tmp` file, fsyncs it, then
    /// atomically renames it over the canonical path.
    async fn persist(&self, snapshot: &LedgerSnapshot) -> LedgerResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec(snapshot)
            .map_err(|e| LedgerError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            use tokio::io::AsyncWriteExt;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    fn next_tx_id(&self) -> String {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        format!("tx-{n:016x}")
    }

    async fn create_record(
        &self,
        key: &str,
        doc_type: DocType,
        metadata: Option<serde_json::Value>,
        did_document: Option<serde_json::Value>,
    ) -> LedgerResult<(String, u64)> {
        let mut guard = self.state.write().await;
        if let Some(existing) = guard.records.get(key) {
            return Ok((existing.tx_id.clone(), existing.block_number));
        }
        let tx_id = self.next_tx_id();
        let block_number = guard.next_block;
        guard.next_block += 1;
        let record = LedgerRecord {
            commitment: key.to_string(),
            doc_type,
            tx_id: tx_id.clone(),
            block_number,
            timestamp: Utc::now(),
            metadata,
            did_document,
        };
        guard.records.insert(key.to_string(), record);
        self.persist(&guard).await?;
        Ok((tx_id, block_number))
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn create_anchor(
        &self,
        commitment: &str,
        metadata: Option<serde_json::Value>,
    ) -> LedgerResult<(String, u64)> {
        self.create_record(commitment, DocType::Anchor, metadata, None)
            .await
    }

    async fn get_anchor(&self, commitment: &str) -> LedgerResult<Option<LedgerRecord>> {
        let guard = self.state.read().await;
        Ok(guard
            .records
            .get(commitment)
            .filter(|r| matches!(r.doc_type, DocType::Anchor))
            .cloned())
    }

    async fn create_did(
        &self,
        did: &str,
        did_document: serde_json::Value,
    ) -> LedgerResult<(String, u64)> {
        {
            let guard = self.state.read().await;
            if guard.records.contains_key(did) {
                return Err(LedgerError::AlreadyExists(did.to_string()));
            }
        }
        self.create_record(did, DocType::Did, None, Some(did_document))
            .await
    }

    async fn get_did(&self, did: &str) -> LedgerResult<Option<LedgerRecord>> {
        let guard = self.state.read().await;
        Ok(guard
            .records
            .get(did)
            .filter(|r| matches!(r.doc_type, DocType::Did))
            .cloned())
    }

    async fn stats(&self) -> LedgerResult<LedgerStats> {
        let guard = self.state.read().await;
        let (anchors, dids) = guard.records.values().fold((0u64, 0u64), |(a, d), r| {
            match r.doc_type {
                DocType::Anchor => (a + 1, d),
                DocType::Did => (a, d + 1),
            }
        });
        Ok(LedgerStats {
            anchors,
            dids,
            next_block: guard.next_block,
            mode: cred_common::config::LedgerMode::File,
        })
    }
}

// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persisted snapshots. The store writes one every `checkpoint_interval`
//! blocks and the walk-back stops at the first one it finds.
use super::epoch::{AuthorizationEpoch, EpochError, QuorumRule};
use super::{SnapKey, Snapshot};
use crate::chain::BlockHash;
use crate::key::toml::{
    get, height_from_value, height_to_value, insert, map, records_from_value, records_to_value,
    FromToml, IntoToml,
};
use crate::key::{Hash, Scheme, SignerRecord};

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;
use toml::Value;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint io: {0}")]
    Io(String),
    #[error("checkpoint format: {0}")]
    Format(String),
    #[error("checkpoint {0} does not match its epoch hash")]
    EpochHashMismatch(SnapKey),
    #[error("checkpoint {key}: {source}")]
    Epoch { key: SnapKey, source: EpochError },
}

/// Snapshot in persisted form, independent of the signature scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub number: u64,
    pub hash: BlockHash,
    /// First height of the epoch active at `number`.
    pub start: u64,
    pub quorum: QuorumRule,
    pub signers: Vec<SignerRecord>,
    /// Blake2b-256 digest of the epoch, see [`Hash`].
    pub epoch_hash: [u8; 32],
}

impl Checkpoint {
    pub fn from_snapshot<S: Scheme>(snapshot: &Snapshot<S>) -> Self {
        let epoch = snapshot.epoch();
        Self {
            number: snapshot.number(),
            hash: *snapshot.hash(),
            start: epoch.start(),
            quorum: epoch.quorum(),
            signers: epoch.records(),
            epoch_hash: epoch.hash(),
        }
    }

    pub fn key(&self) -> SnapKey {
        SnapKey::new(self.number, self.hash)
    }

    /// Rebuilds the snapshot, rejecting checkpoints whose content was altered.
    pub fn into_snapshot<S: Scheme>(self) -> Result<Snapshot<S>, CheckpointError> {
        let key = self.key();
        let epoch = AuthorizationEpoch::new(self.start, self.quorum, self.signers)
            .map_err(|source| CheckpointError::Epoch { key, source })?;
        if epoch.hash() != self.epoch_hash {
            return Err(CheckpointError::EpochHashMismatch(key));
        }

        Ok(Snapshot::new(self.number, self.hash, Arc::new(epoch)))
    }
}

/// Persistence backend for checkpoints.
pub trait CheckpointStore: Send + Sync + 'static {
    fn load(&self, key: &SnapKey) -> Result<Option<Checkpoint>, CheckpointError>;

    fn store(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

#[derive(Default)]
pub struct MemCheckpoints {
    inner: Mutex<HashMap<SnapKey, Checkpoint>>,
}

impl MemCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for MemCheckpoints {
    fn load(&self, key: &SnapKey) -> Result<Option<Checkpoint>, CheckpointError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.get(key).cloned())
    }

    fn store(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.insert(checkpoint.key(), checkpoint.clone());
        Ok(())
    }
}

/// Checkpoints as TOML files named `<number>-<hash>.toml` in one folder.
#[derive(Debug, Clone)]
pub struct FileCheckpoints {
    folder: PathBuf,
}

impl FileCheckpoints {
    pub fn init(folder: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let folder = folder.as_ref().to_path_buf();
        std::fs::create_dir_all(&folder)
            .map_err(|e| CheckpointError::Io(format!("{}: {e}", folder.display())))?;

        Ok(Self { folder })
    }

    pub fn path(&self, key: &SnapKey) -> PathBuf {
        let hash = hex::encode(key.hash.as_bytes());
        self.folder.join(format!("{}-{hash}.toml", key.number))
    }
}

impl CheckpointStore for FileCheckpoints {
    fn load(&self, key: &SnapKey) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path(key);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::Io(format!("{}: {e}", path.display()))),
        };
        let checkpoint = Checkpoint::from_toml(&data)
            .map_err(|e| CheckpointError::Format(format!("{}: {e}", path.display())))?;
        if checkpoint.key() != *key {
            return Err(CheckpointError::Format(format!(
                "{}: holds checkpoint {}",
                path.display(),
                checkpoint.key()
            )));
        }

        Ok(Some(checkpoint))
    }

    fn store(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path(&checkpoint.key());
        let data = checkpoint
            .to_toml()
            .map_err(|e| CheckpointError::Format(e.to_string()))?;
        let io_err = |e: std::io::Error| CheckpointError::Io(format!("{}: {e}", path.display()));

        // Readers never observe a partially written file, concurrent writers never share one.
        let mut tmp = NamedTempFile::new_in(&self.folder).map_err(io_err)?;
        tmp.write_all(data.as_bytes()).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        Ok(())
    }
}

impl IntoToml for Checkpoint {
    fn to_value(&self) -> anyhow::Result<Value> {
        let mut value = Value::Table(map! {
            "Hash":      self.hash.to_string(),
            "Quorum":    self.quorum.to_string(),
            "EpochHash": hex::encode(self.epoch_hash),
        });
        insert(&mut value, "Number", height_to_value(self.number)?)?;
        insert(&mut value, "Start", height_to_value(self.start)?)?;
        insert(&mut value, "Signers", records_to_value(&self.signers)?)?;

        Ok(value)
    }
}

impl FromToml for Checkpoint {
    fn from_value(value: &Value) -> anyhow::Result<Self> {
        let Some(signers) = value.get("Signers") else {
            anyhow::bail!("Expected Signers")
        };
        let epoch_hash = hex::decode(get!(value, "EpochHash", as_str)?)?;
        let Ok(epoch_hash) = epoch_hash.try_into() else {
            anyhow::bail!("toml: EpochHash must be 32 bytes")
        };

        Ok(Self {
            number: height_from_value(value, "Number")?,
            hash: get!(value, "Hash", as_str)?.parse()?,
            start: height_from_value(value, "Start")?,
            quorum: get!(value, "Quorum", as_str)?.parse()?,
            signers: records_from_value(signers)?,
            epoch_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestSigner;
    use energon::drand::schemes::DefaultScheme;

    fn snapshot() -> Snapshot<DefaultScheme> {
        let records = TestSigner::<DefaultScheme>::records(4);
        let epoch = AuthorizationEpoch::new(3, QuorumRule::Majority, records).unwrap();
        Snapshot::new(1024, BlockHash::new([4; 32]), Arc::new(epoch))
    }

    #[test]
    fn checkpoint_restores_snapshot() {
        let snapshot = snapshot();
        let checkpoint = Checkpoint::from_snapshot(&snapshot);
        assert_eq!(checkpoint.into_snapshot::<DefaultScheme>().unwrap(), snapshot);
    }

    #[test]
    fn tampered_checkpoint_is_rejected() {
        let mut checkpoint = Checkpoint::from_snapshot(&snapshot());
        checkpoint.start = 4;
        let key = checkpoint.key();
        assert_eq!(
            checkpoint.into_snapshot::<DefaultScheme>().unwrap_err(),
            CheckpointError::EpochHashMismatch(key)
        );
    }

    #[test]
    fn memory_store() {
        let store = MemCheckpoints::new();
        let checkpoint = Checkpoint::from_snapshot(&snapshot());
        assert_eq!(store.load(&checkpoint.key()), Ok(None));

        store.store(&checkpoint).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load(&checkpoint.key()), Ok(Some(checkpoint)));
    }

    #[test]
    fn file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpoints::init(dir.path().join("checkpoints")).unwrap();
        let checkpoint = Checkpoint::from_snapshot(&snapshot());
        let key = checkpoint.key();

        assert_eq!(store.load(&key), Ok(None));
        store.store(&checkpoint).unwrap();
        assert_eq!(store.load(&key), Ok(Some(checkpoint.clone())));

        // Content under a foreign name is not trusted.
        let other = SnapKey::new(key.number, BlockHash::new([5; 32]));
        std::fs::copy(store.path(&key), store.path(&other)).unwrap();
        assert!(matches!(store.load(&other), Err(CheckpointError::Format(_))));

        std::fs::write(store.path(&key), "Number = 1").unwrap();
        assert!(matches!(store.load(&key), Err(CheckpointError::Format(_))));
    }

    #[test]
    fn concurrent_writers_publish_whole_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpoints::init(dir.path()).unwrap();
        let checkpoint = Checkpoint::from_snapshot(&snapshot());
        let key = checkpoint.key();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..16 {
                        store.store(&checkpoint).unwrap();
                        assert_eq!(store.load(&key), Ok(Some(checkpoint.clone())));
                    }
                });
            }
        });

        // Only the published checkpoint is left behind.
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files, vec![store.path(&key)]);
    }
}

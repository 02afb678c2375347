// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

mod cache;
mod checkpoint;
mod epoch;
mod rotation;
mod store;

pub use cache::SnapshotCache;
pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore, FileCheckpoints, MemCheckpoints};
pub use epoch::{AuthorizationEpoch, EpochError, ParseQuorumError, QuorumRule};
pub use rotation::{RotationError, RotationRule};
pub use store::{SnapshotError, SnapshotStore, StoreConfig};

use crate::chain::{BlockHash, Header};
use crate::key::{Address, Scheme, SignerIdentity};

use std::fmt::{Debug, Display};
use std::sync::Arc;

/// Snapshot identity: a height is ambiguous across forks, the pair is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapKey {
    pub number: u64,
    pub hash: BlockHash,
}

impl SnapKey {
    pub fn new(number: u64, hash: BlockHash) -> Self {
        Self { number, hash }
    }
}

impl Display for SnapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.number, self.hash.short())
    }
}

/// Authorization state after applying block `(number, hash)`.
///
/// Snapshots are immutable. Consecutive snapshots of one epoch share the
/// epoch allocation, so the address to index mapping is built once per rotation.
pub struct Snapshot<S: Scheme> {
    number: u64,
    hash: BlockHash,
    epoch: Arc<AuthorizationEpoch<S>>,
}

impl<S: Scheme> Snapshot<S> {
    pub fn new(number: u64, hash: BlockHash, epoch: Arc<AuthorizationEpoch<S>>) -> Self {
        Self {
            number,
            hash,
            epoch,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }

    pub fn key(&self) -> SnapKey {
        SnapKey::new(self.number, self.hash)
    }

    pub fn epoch(&self) -> &Arc<AuthorizationEpoch<S>> {
        &self.epoch
    }

    /// Authorized signer addresses ordered by index.
    pub fn signers(&self) -> Vec<Address> {
        self.epoch.addresses()
    }

    pub fn index_of(&self, address: &Address) -> Option<u32> {
        self.epoch
            .resolve_by_address(address)
            .map(SignerIdentity::index)
    }

    pub fn threshold(&self) -> usize {
        self.epoch.threshold()
    }

    /// Snapshot of the child block `header`. Without a rotation the epoch is shared.
    pub fn apply(&self, rule: &RotationRule, header: &Header) -> Result<Self, RotationError> {
        let epoch = match rule.apply(&self.epoch, header)? {
            Some(rotated) => Arc::new(rotated),
            None => Arc::clone(&self.epoch),
        };

        Ok(Self::new(header.number(), *header.hash(), epoch))
    }
}

impl<S: Scheme> Clone for Snapshot<S> {
    fn clone(&self) -> Self {
        Self {
            number: self.number,
            hash: self.hash,
            epoch: Arc::clone(&self.epoch),
        }
    }
}

impl<S: Scheme> PartialEq for Snapshot<S> {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number && self.hash == other.hash && self.epoch == other.epoch
    }
}

impl<S: Scheme> Debug for Snapshot<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("number", &self.number)
            .field("hash", &self.hash)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl<S: Scheme> Display for Snapshot<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "number:    {}", self.number)?;
        writeln!(f, "hash:      {}", self.hash)?;
        writeln!(f, "epoch:     {}", self.epoch.start())?;
        writeln!(
            f,
            "quorum:    {} ({} of {})",
            self.epoch.quorum(),
            self.threshold(),
            self.epoch.len()
        )?;
        for signer in self.epoch.signers() {
            writeln!(f, "  [{}] {}", signer.index(), signer.address())?;
        }
        Ok(())
    }
}

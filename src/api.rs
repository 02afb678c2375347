// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-process query facade over the snapshot store and group signature verifier.
use crate::chain::{BlockHash, ChainReader, Header};
use crate::groupsig::{self, CodecError, GroupSignature, GroupSignatureProof};
use crate::groupsig::{Verification, VerifyError};
use crate::key::{Address, KeyPoint, Scheme};
use crate::log::Logger;
use crate::snapshot::{Snapshot, SnapshotError, SnapshotStore};
use crate::{debug, info};

use arc_swap::ArcSwapOption;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

/// Block reference by height, `Latest` is the head of the canonical chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockNumber {
    #[default]
    Latest,
    Number(u64),
}

impl Display for BlockNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("expected 'latest', decimal or 0x-prefixed hex block number, received {0}")]
pub struct InvalidBlockNumber(String);

impl FromStr for BlockNumber {
    type Err = InvalidBlockNumber;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "latest" {
            return Ok(Self::Latest);
        }
        let number = match value.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => value.parse(),
        };
        number
            .map(Self::Number)
            .map_err(|_| InvalidBlockNumber(value.into()))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("chain is empty")]
    EmptyChain,
    #[error("block {0} is not on the canonical chain")]
    UnknownNumber(u64),
    #[error("block {0} not found")]
    UnknownHash(BlockHash),
    #[error("block {0} has no group signature proof")]
    MissingProof(BlockHash),
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("{0}")]
    Codec(#[from] CodecError),
    #[error("verify: {0}")]
    Verify(#[from] VerifyError),
    #[error("verification task failed: {0}")]
    Interrupted(String),
}

/// Presentation form of one proof entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSigFormatter {
    /// 0x-prefixed hex of the partial signature.
    pub sig: String,
    pub index: u64,
}

impl From<&GroupSignature> for GroupSigFormatter {
    fn from(entry: &GroupSignature) -> Self {
        Self {
            sig: format!("0x{}", hex::encode(entry.signature())),
            index: entry.index(),
        }
    }
}

impl GroupSigFormatter {
    pub fn from_proof(proof: &GroupSignatureProof) -> Vec<Self> {
        proof.iter().map(Self::from).collect()
    }
}

impl Display for GroupSigFormatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.index, self.sig)
    }
}

pub struct Api<S: Scheme, C: ChainReader> {
    store: SnapshotStore<S, C>,
    /// Snapshot of the latest head seen by a `Latest` query, used as walk-back hint.
    head: ArcSwapOption<Snapshot<S>>,
    log: Logger,
}

impl<S, C> Api<S, C>
where
    S: Scheme + Send + Sync + 'static,
    KeyPoint<S>: Send + Sync,
    C: ChainReader,
{
    pub fn new(store: SnapshotStore<S, C>, log: Logger) -> Self {
        Self {
            store,
            head: ArcSwapOption::empty(),
            log,
        }
    }

    pub fn store(&self) -> &SnapshotStore<S, C> {
        &self.store
    }

    pub async fn header(&self, number: BlockNumber) -> Result<Header, ApiError> {
        let chain = self.store.chain();
        match number {
            BlockNumber::Latest => chain.current_header().await.ok_or(ApiError::EmptyChain),
            BlockNumber::Number(n) => chain
                .header_by_number(n)
                .await
                .ok_or(ApiError::UnknownNumber(n)),
        }
    }

    pub async fn header_at_hash(&self, hash: &BlockHash) -> Result<Header, ApiError> {
        self.store
            .chain()
            .header_by_hash(hash)
            .await
            .ok_or(ApiError::UnknownHash(*hash))
    }

    async fn snapshot_of(&self, number: u64, hash: BlockHash) -> Result<Arc<Snapshot<S>>, ApiError> {
        let hint = self.head.load_full();
        Ok(self.store.snapshot(number, hash, hint).await?)
    }

    /// Snapshot at a canonical height. A reorged-out block is never returned for its height.
    pub async fn snapshot(&self, number: BlockNumber) -> Result<Arc<Snapshot<S>>, ApiError> {
        let header = self.header(number).await?;
        let snapshot = self.snapshot_of(header.number(), *header.hash()).await?;
        if number == BlockNumber::Latest {
            self.head.store(Some(Arc::clone(&snapshot)));
        }

        Ok(snapshot)
    }

    pub async fn snapshot_at_hash(&self, hash: &BlockHash) -> Result<Arc<Snapshot<S>>, ApiError> {
        let header = self.header_at_hash(hash).await?;
        self.snapshot_of(header.number(), *hash).await
    }

    /// Authorized signers at a canonical height, ordered by index.
    pub async fn signers(&self, number: BlockNumber) -> Result<Vec<Address>, ApiError> {
        Ok(self.snapshot(number).await?.signers())
    }

    pub async fn signers_at_hash(&self, hash: &BlockHash) -> Result<Vec<Address>, ApiError> {
        Ok(self.snapshot_at_hash(hash).await?.signers())
    }

    pub async fn group_sigs(&self, number: BlockNumber) -> Result<GroupSignatureProof, ApiError> {
        let header = self.header(number).await?;
        self.proof_of(header.hash()).await
    }

    pub async fn group_sigs_at_hash(
        &self,
        hash: &BlockHash,
    ) -> Result<GroupSignatureProof, ApiError> {
        let header = self.header_at_hash(hash).await?;
        self.proof_of(header.hash()).await
    }

    async fn proof_of(&self, hash: &BlockHash) -> Result<GroupSignatureProof, ApiError> {
        let Some(bytes) = self.store.chain().group_sig_bytes(hash).await else {
            return Err(ApiError::MissingProof(*hash));
        };

        Ok(groupsig::decode(&bytes)?)
    }

    /// Verifies the proof of block `hash` against the signer set that was authorized to
    /// endorse it: the snapshot of its parent, or the genesis snapshot for the genesis block.
    pub async fn verify_block(&self, hash: &BlockHash) -> Result<Verification, ApiError> {
        let header = self.header_at_hash(hash).await?;
        let proof = self.proof_of(hash).await?;
        let snapshot = match header.number() {
            0 => self.snapshot_of(0, *hash).await?,
            n => self.snapshot_of(n - 1, *header.parent_hash()).await?,
        };
        let signing_hash = *header.signing_hash();

        debug!(
            &self.log,
            "verify_block: {} entries for block {} against snapshot {}",
            proof.len(),
            header.number(),
            snapshot.key()
        );

        // Pairing checks run on the blocking pool.
        let verification = tokio::task::spawn_blocking(move || {
            groupsig::verify::<S>(&snapshot, &signing_hash, &proof)
        })
        .await
        .map_err(|err| ApiError::Interrupted(err.to_string()))??;

        info!(
            &self.log,
            "verify_block: block {} {}, {} of {} required signers",
            header.number(),
            if verification.ok { "finalized" } else { "not finalized" },
            verification.valid.len(),
            verification.threshold
        );

        Ok(verification)
    }
}

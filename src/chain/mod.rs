// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

mod memchain;
mod reader;

pub use memchain::MemChain;
pub use reader::ChainReader;

use crate::key::{Address, SignerRecord};
use crate::snapshot::QuorumRule;

use sha2::Digest;
use std::fmt::{Debug, Display};
use std::str::FromStr;

/// Domain separators for the two digests of a header.
const SIGNING_DOMAIN: &[u8] = b"dbft-signing";
const HASH_DOMAIN: &[u8] = b"dbft-block";

#[derive(Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Leading bytes for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("expected 32 bytes hex hash, received {0}")]
pub struct InvalidHash(String);

impl FromStr for BlockHash {
    type Err = InvalidHash;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let raw = data.strip_prefix("0x").unwrap_or(data);
        let bytes = hex::decode(raw).map_err(|_| InvalidHash(data.into()))?;
        let bytes = bytes.try_into().map_err(|_| InvalidHash(data.into()))?;

        Ok(Self(bytes))
    }
}

/// Signer set change carried by a header. Whether a header is allowed to
/// carry one is decided by the rotation rule (see [`crate::snapshot::RotationRule`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerUpdate {
    /// Full replacement of the signer set, optionally with a new quorum rule.
    Replace {
        signers: Vec<SignerRecord>,
        quorum: Option<QuorumRule>,
    },
    /// Membership change decided on-chain: removals are applied before additions.
    Change {
        added: Vec<SignerRecord>,
        removed: Vec<Address>,
    },
}

impl SignerUpdate {
    fn digest_into(&self, h: &mut sha2::Sha256) {
        let records = |h: &mut sha2::Sha256, records: &[SignerRecord]| {
            h.update((records.len() as u64).to_be_bytes());
            for r in records {
                h.update(r.address.as_bytes());
                h.update((r.key.len() as u64).to_be_bytes());
                h.update(&r.key);
            }
        };

        match self {
            Self::Replace { signers, quorum } => {
                h.update([1u8]);
                records(h, signers);
                match quorum {
                    Some(q) => h.update(q.to_bytes()),
                    None => h.update([0xffu8]),
                }
            }
            Self::Change { added, removed } => {
                h.update([2u8]);
                records(h, added);
                h.update((removed.len() as u64).to_be_bytes());
                for address in removed {
                    h.update(address.as_bytes());
                }
            }
        }
    }
}

/// Block header as consumed by the snapshot store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    number: u64,
    hash: BlockHash,
    parent_hash: BlockHash,
    /// Digest the group signature of this block is produced over.
    signing_hash: BlockHash,
    extra: Vec<u8>,
    update: Option<SignerUpdate>,
}

impl Header {
    /// Builds a header and seals both digests over its content.
    pub fn new(
        number: u64,
        parent_hash: BlockHash,
        extra: Vec<u8>,
        update: Option<SignerUpdate>,
    ) -> Self {
        let mut header = Self {
            number,
            hash: BlockHash::default(),
            parent_hash,
            signing_hash: BlockHash::default(),
            extra,
            update,
        };
        header.signing_hash = header.digest(SIGNING_DOMAIN);
        header.hash = header.digest(HASH_DOMAIN);

        header
    }

    /// Header with digests computed elsewhere, as received from external storage.
    pub fn from_parts(
        number: u64,
        hash: BlockHash,
        parent_hash: BlockHash,
        signing_hash: BlockHash,
        update: Option<SignerUpdate>,
    ) -> Self {
        Self {
            number,
            hash,
            parent_hash,
            signing_hash,
            extra: vec![],
            update,
        }
    }

    fn digest(&self, domain: &[u8]) -> BlockHash {
        let mut h = sha2::Sha256::new();
        h.update(domain);
        h.update(self.number.to_be_bytes());
        h.update(self.parent_hash.as_bytes());
        h.update((self.extra.len() as u64).to_be_bytes());
        h.update(&self.extra);
        match &self.update {
            Some(update) => update.digest_into(&mut h),
            None => h.update([0u8]),
        }

        BlockHash(h.finalize().into())
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }

    pub fn parent_hash(&self) -> &BlockHash {
        &self.parent_hash
    }

    pub fn signing_hash(&self) -> &BlockHash {
        &self.signing_hash
    }

    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    pub fn update(&self) -> Option<&SignerUpdate> {
        self.update.as_ref()
    }

    /// Child header on top of `self`, `None` if `self` is at the last representable height.
    pub fn child(&self, extra: Vec<u8>, update: Option<SignerUpdate>) -> Option<Self> {
        let number = self.number.checked_add(1)?;
        Some(Self::new(number, self.hash, extra, update))
    }
}

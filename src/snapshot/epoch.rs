// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::key::{
    Address, Hash, RegistryError, Scheme, SignerIdentity, SignerRecord, SignerRegistry,
};

use sha2::Digest;
use std::fmt::{Debug, Display};
use std::str::FromStr;

/// Quorum rule is a parameter of an epoch: it maps the signer count to the
/// minimum number of distinct valid endorsements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuorumRule {
    /// Classic BFT bound `floor(2N/3) + 1`, tolerates `f` faulty of `3f+1`.
    #[default]
    Bft,
    /// Simple majority `floor(N/2) + 1`.
    Majority,
    /// Fixed threshold regardless of the signer count.
    Fixed(u32),
}

impl QuorumRule {
    pub fn threshold(&self, signers: usize) -> usize {
        match self {
            Self::Bft => signers * 2 / 3 + 1,
            Self::Majority => (signers >> 1) + 1,
            Self::Fixed(t) => usize::try_from(*t).unwrap_or(usize::MAX),
        }
    }

    /// Stable binary form: tag followed by big endian parameter.
    pub fn to_bytes(&self) -> [u8; 5] {
        let (tag, param) = match self {
            Self::Bft => (0u8, 0u32),
            Self::Majority => (1, 0),
            Self::Fixed(t) => (2, *t),
        };
        let mut bytes = [0; 5];
        bytes[0] = tag;
        bytes[1..].copy_from_slice(&param.to_be_bytes());
        bytes
    }
}

impl Display for QuorumRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bft => f.write_str("bft"),
            Self::Majority => f.write_str("majority"),
            Self::Fixed(t) => write!(f, "fixed:{t}"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("expected quorum rule 'bft', 'majority' or 'fixed:<threshold>', received {0}")]
pub struct ParseQuorumError(String);

impl FromStr for QuorumRule {
    type Err = ParseQuorumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "bft" => Ok(Self::Bft),
            "majority" => Ok(Self::Majority),
            other => other
                .strip_prefix("fixed:")
                .and_then(|t| t.parse().ok())
                .map(Self::Fixed)
                .ok_or_else(|| ParseQuorumError(value.into())),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EpochError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("epoch has no signers")]
    EmptySet,
    #[error("quorum of {threshold} is unreachable with {signers} signers")]
    QuorumUnreachable { signers: usize, threshold: usize },
}

/// Authorization epoch is the immutable signer set active from `start` until
/// the next rotation, together with the quorum rule used to judge its proofs.
pub struct AuthorizationEpoch<S: Scheme> {
    /// First block height endorsed by this signer set.
    start: u64,
    quorum: QuorumRule,
    registry: SignerRegistry<S>,
}

impl<S: Scheme> AuthorizationEpoch<S> {
    pub fn new(
        start: u64,
        quorum: QuorumRule,
        records: Vec<SignerRecord>,
    ) -> Result<Self, EpochError> {
        let registry = SignerRegistry::new(records)?;
        if registry.is_empty() {
            return Err(EpochError::EmptySet);
        }
        let threshold = quorum.threshold(registry.len());
        if threshold == 0 || threshold > registry.len() {
            return Err(EpochError::QuorumUnreachable {
                signers: registry.len(),
                threshold,
            });
        }

        Ok(Self {
            start,
            quorum,
            registry,
        })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn quorum(&self) -> QuorumRule {
        self.quorum
    }

    pub fn threshold(&self) -> usize {
        self.quorum.threshold(self.registry.len())
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn resolve(&self, index: u32) -> Option<&SignerIdentity<S>> {
        self.registry.resolve(index)
    }

    pub fn resolve_by_address(&self, address: &Address) -> Option<&SignerIdentity<S>> {
        self.registry.resolve_by_address(address)
    }

    pub fn signers(&self) -> impl Iterator<Item = &SignerIdentity<S>> {
        self.registry.iter()
    }

    /// Signer addresses ordered by index.
    pub fn addresses(&self) -> Vec<Address> {
        self.registry.iter().map(|s| *s.address()).collect()
    }

    pub fn records(&self) -> Vec<SignerRecord> {
        self.registry.iter().map(SignerIdentity::to_record).collect()
    }
}

impl<S: Scheme> Hash for AuthorizationEpoch<S> {
    type Hasher = crev_common::Blake2b256;

    fn hash(&self) -> [u8; 32] {
        let mut h = Self::Hasher::new();

        for signer in self.registry.iter() {
            let mut hh = Self::Hasher::new();
            hh.update(signer.index().to_le_bytes());
            hh.update(signer.address().as_bytes());
            hh.update(signer.raw_key());
            h.update(hh.finalize());
        }

        h.update(self.start.to_le_bytes());
        h.update(self.quorum.to_bytes());

        h.finalize().into()
    }
}

impl<S: Scheme> PartialEq for AuthorizationEpoch<S> {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.quorum == other.quorum && self.registry == other.registry
    }
}

impl<S: Scheme> Debug for AuthorizationEpoch<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationEpoch")
            .field("start", &self.start)
            .field("quorum", &self.quorum)
            .field("signers", &self.addresses())
            .finish()
    }
}

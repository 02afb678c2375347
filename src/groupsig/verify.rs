// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use super::GroupSignatureProof;
use crate::chain::BlockHash;
use crate::key::{KeyPoint, Scheme};
use crate::snapshot::Snapshot;

use energon::traits::Affine;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Display;

/// Reason an entry does not count toward the quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Index is not part of the epoch.
    UnknownSigner,
    /// Index was already seen earlier in the proof.
    Duplicate,
    MalformedSignature,
    InvalidSignature,
}

impl Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::UnknownSigner => "unknown signer",
            Self::Duplicate => "duplicate index",
            Self::MalformedSignature => "malformed signature",
            Self::InvalidSignature => "invalid signature",
        };
        f.write_str(reason)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("snapshot {number} has no signer registry")]
    EmptyRegistry { number: u64 },
    #[error("registry resolved index {requested} to signer {resolved}")]
    RegistryMismatch { requested: u32, resolved: u32 },
}

/// Result of checking a proof against a snapshot. Insufficient quorum is `ok = false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub ok: bool,
    pub threshold: usize,
    /// Distinct indices with a valid partial signature.
    pub valid: BTreeSet<u32>,
    /// Entries that do not count, in proof order.
    pub rejected: Vec<(u64, Rejection)>,
}

/// Checks every entry of `proof` against the signer set of `snapshot`.
///
/// Only the first entry of an index is a candidate, later ones are ignored.
/// A bad entry never aborts verification of the rest.
pub fn verify<S: Scheme>(
    snapshot: &Snapshot<S>,
    signing_hash: &BlockHash,
    proof: &GroupSignatureProof,
) -> Result<Verification, VerifyError> {
    let epoch = snapshot.epoch();
    if epoch.is_empty() {
        return Err(VerifyError::EmptyRegistry {
            number: snapshot.number(),
        });
    }

    let mut seen = HashSet::with_capacity(proof.len());
    let mut valid = BTreeSet::new();
    let mut rejected = vec![];

    for entry in proof {
        if !seen.insert(entry.index()) {
            rejected.push((entry.index(), Rejection::Duplicate));
            continue;
        }
        let index = entry.signer_index();
        let Some(signer) = epoch.resolve(index) else {
            rejected.push((entry.index(), Rejection::UnknownSigner));
            continue;
        };
        if signer.index() != index {
            return Err(VerifyError::RegistryMismatch {
                requested: index,
                resolved: signer.index(),
            });
        }

        match check_partial::<S>(signer.key(), entry.signature(), signing_hash.as_bytes()) {
            Ok(()) => {
                valid.insert(index);
            }
            Err(rejection) => rejected.push((entry.index(), rejection)),
        }
    }

    let threshold = epoch.threshold();
    Ok(Verification {
        ok: valid.len() >= threshold,
        threshold,
        valid,
        rejected,
    })
}

fn check_partial<S: Scheme>(key: &KeyPoint<S>, sig: &[u8], msg: &[u8]) -> Result<(), Rejection> {
    let Ok(sig) = Affine::deserialize(sig) else {
        return Err(Rejection::MalformedSignature);
    };
    if S::bls_verify(key, &sig, msg).is_err() {
        return Err(Rejection::InvalidSignature);
    }

    Ok(())
}

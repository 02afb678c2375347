// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod codec;
mod verify;

pub use codec::{decode, encode, CodecError};
pub use verify::{verify, Rejection, Verification, VerifyError};

/// Partial signature of one signer over a block signing hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSignature {
    signature: Vec<u8>,
    /// Signer index within the epoch, persisted as `u64` but bounded by `u32::MAX`.
    index: u64,
}

impl GroupSignature {
    pub fn new(signature: Vec<u8>, index: u64) -> Result<Self, CodecError> {
        if index > u64::from(u32::MAX) {
            return Err(CodecError::IndexOutOfRange(index));
        }
        if signature.len() > codec::MAX_SIGNATURE_LEN {
            return Err(CodecError::SignatureTooLong(signature.len()));
        }

        Ok(Self { signature, index })
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn signer_index(&self) -> u32 {
        // Bounded in constructor.
        self.index as u32
    }
}

/// Finality proof of one block: partial signatures in the order they were collected.
///
/// Uniqueness and membership of indices are properties of verification, a decoded
/// proof may contain duplicates and indices unknown to any epoch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupSignatureProof {
    entries: Vec<GroupSignature>,
}

impl GroupSignatureProof {
    pub fn new(entries: Vec<GroupSignature>) -> Result<Self, CodecError> {
        if entries.len() > codec::MAX_ENTRIES {
            return Err(CodecError::TooManyEntries(entries.len()));
        }

        Ok(Self { entries })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GroupSignature> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GroupSignature] {
        &self.entries
    }
}

impl<'a> IntoIterator for &'a GroupSignatureProof {
    type Item = &'a GroupSignature;
    type IntoIter = std::slice::Iter<'a, GroupSignature>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persisted form of a group signature proof.
//!
//! Layout, all integers big endian:
//!
//! ```text
//! count: u32 | count * ( sig_len: u32 | sig: [u8; sig_len] | index: u64 )
//! ```
//!
//! The layout is the storage contract of already persisted blocks and must not change.
use super::{GroupSignature, GroupSignatureProof};

/// Upper bound for a single partial signature.
pub const MAX_SIGNATURE_LEN: usize = 1024;
/// Upper bound for entries of one proof.
pub const MAX_ENTRIES: usize = u16::MAX as usize;

const COUNT_LEN: usize = 4;
const SIG_LEN_LEN: usize = 4;
const INDEX_LEN: usize = 8;
/// Smallest encoded entry: empty signature.
const MIN_ENTRY_LEN: usize = SIG_LEN_LEN + INDEX_LEN;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed proof: truncated at byte {0}")]
    Truncated(usize),
    #[error("malformed proof: {count} entries do not fit into {len} bytes")]
    ImpossibleCount { count: u32, len: usize },
    #[error("malformed proof: {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("malformed proof: signer index {0} is out of range")]
    IndexOutOfRange(u64),
    #[error("malformed proof: signature of {0} bytes exceeds limit")]
    SignatureTooLong(usize),
    #[error("malformed proof: {0} entries exceed limit")]
    TooManyEntries(usize),
}

/// Cursor over the encoded proof, tracks the offset for error reports.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::Truncated(self.data.len()))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;

        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(bytes))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(bytes))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

pub fn decode(data: &[u8]) -> Result<GroupSignatureProof, CodecError> {
    let mut r = Reader::new(data);
    let count = r.u32()?;

    // Reject counts the input cannot hold before allocating for them.
    let possible = r.remaining() / MIN_ENTRY_LEN;
    if usize::try_from(count).map_or(true, |c| c > possible) {
        return Err(CodecError::ImpossibleCount {
            count,
            len: data.len(),
        });
    }
    let count = count as usize;
    if count > MAX_ENTRIES {
        return Err(CodecError::TooManyEntries(count));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let sig_len = r.u32()? as usize;
        if sig_len > MAX_SIGNATURE_LEN {
            return Err(CodecError::SignatureTooLong(sig_len));
        }
        let signature = r.take(sig_len)?.to_vec();
        let index = r.u64()?;
        entries.push(GroupSignature::new(signature, index)?);
    }

    if r.remaining() != 0 {
        return Err(CodecError::TrailingBytes(r.remaining()));
    }

    GroupSignatureProof::new(entries)
}

/// Inverse of [`decode`]. Proofs hold the codec limits by construction.
pub fn encode(proof: &GroupSignatureProof) -> Vec<u8> {
    let len = COUNT_LEN
        + proof
            .iter()
            .map(|e| MIN_ENTRY_LEN + e.signature().len())
            .sum::<usize>();
    let mut out = Vec::with_capacity(len);

    out.extend_from_slice(&(proof.len() as u32).to_be_bytes());
    for entry in proof.iter() {
        out.extend_from_slice(&(entry.signature().len() as u32).to_be_bytes());
        out.extend_from_slice(entry.signature());
        out.extend_from_slice(&entry.index().to_be_bytes());
    }

    out
}

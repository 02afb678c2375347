// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{BlockHash, Header};
use std::future::Future;

/// Read access to chain storage. Lookups may suspend on storage I/O.
///
/// Absent data is `None`: the snapshot store decides whether that is an
/// unknown block or a broken history.
pub trait ChainReader: Send + Sync + 'static {
    /// Head of the canonical chain, `None` for an empty chain.
    fn current_header(&self) -> impl Future<Output = Option<Header>> + Send;

    /// Canonical header at `number`.
    fn header_by_number(&self, number: u64) -> impl Future<Output = Option<Header>> + Send;

    /// Header with `hash`, canonical or not.
    fn header_by_hash(&self, hash: &BlockHash) -> impl Future<Output = Option<Header>> + Send;

    /// Persisted, encoded group signature proof of the block with `hash`.
    fn group_sig_bytes(&self, hash: &BlockHash) -> impl Future<Output = Option<Vec<u8>>> + Send;
}

// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by unit and scenario tests.

use crate::chain::{BlockHash, ChainReader, Header, MemChain};
use crate::key::{Scheme, SignerRecord};

use energon::traits::{Affine, ScalarField};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Signer with a fresh BLS key pair.
pub struct TestSigner<S: Scheme> {
    secret: S::Scalar,
    key: Vec<u8>,
}

impl<S: Scheme> TestSigner<S> {
    pub fn generate() -> Self {
        let secret = S::Scalar::random();
        let key = S::sk_to_pk(&secret)
            .serialize()
            .expect("public key should be serializable")
            .into();

        Self { secret, key }
    }

    pub fn generate_n(n: usize) -> Vec<Self> {
        (0..n).map(|_| Self::generate()).collect()
    }

    /// Records of `n` fresh signers, addresses derived from keys.
    pub fn records(n: usize) -> Vec<SignerRecord> {
        Self::generate_n(n).iter().map(Self::record).collect()
    }

    pub fn record(&self) -> SignerRecord {
        SignerRecord::from_key(self.key.clone())
    }

    /// Serialized partial signature over `msg`.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        S::bls_sign(msg, &self.secret)
            .expect("signing should not fail")
            .serialize()
            .expect("signature should be serializable")
            .into()
    }
}

pub fn genesis_header() -> Header {
    Header::new(0, BlockHash::default(), b"genesis".to_vec(), None)
}

/// `n` descendants of `parent` without signer updates. `tag` separates competing branches.
pub fn extend(parent: &Header, n: usize, tag: u8) -> Vec<Header> {
    let mut headers: Vec<Header> = Vec::with_capacity(n);
    for _ in 0..n {
        let last = headers.last().unwrap_or(parent);
        let child = last.child(vec![tag], None).unwrap();
        headers.push(child);
    }
    headers
}

/// Chain reader counting header reads, optionally slowing each of them down.
pub struct CountingChain {
    pub chain: MemChain,
    delay: Duration,
    reads: AtomicUsize,
}

impl CountingChain {
    pub fn new(chain: MemChain, delay: Duration) -> Self {
        Self {
            chain,
            delay,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn tick(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

impl ChainReader for CountingChain {
    async fn current_header(&self) -> Option<Header> {
        self.chain.current_header().await
    }

    async fn header_by_number(&self, number: u64) -> Option<Header> {
        self.chain.header_by_number(number).await
    }

    async fn header_by_hash(&self, hash: &BlockHash) -> Option<Header> {
        self.tick().await;
        self.chain.header_by_hash(hash).await
    }

    async fn group_sig_bytes(&self, hash: &BlockHash) -> Option<Vec<u8>> {
        self.chain.group_sig_bytes(hash).await
    }
}

// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory chain storage with fork and reorg support, also loadable from a TOML fixture.
use super::{BlockHash, ChainReader, Header, SignerUpdate};
use crate::key::toml::{
    get, insert, map, records_from_value, records_to_value, table, FromToml, IntoToml,
};
use crate::key::Address;

use anyhow::{bail, Result};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use toml::Value;

#[derive(Default)]
struct Inner {
    /// All known headers in insertion order.
    headers: IndexMap<BlockHash, Header>,
    /// Canonical hash per height.
    canonical: BTreeMap<u64, BlockHash>,
    group_sigs: HashMap<BlockHash, Vec<u8>>,
}

impl Inner {
    /// Makes `hash` the canonical head, rewriting canonical ancestors until
    /// the new branch meets the old one.
    fn set_head(&mut self, hash: BlockHash) -> bool {
        let Some(head) = self.headers.get(&hash) else {
            return false;
        };
        let _ = self.canonical.split_off(&(head.number() + 1));

        let mut cursor = Some(head);
        while let Some(header) = cursor {
            if self.canonical.get(&header.number()) == Some(header.hash()) {
                break;
            }
            self.canonical.insert(header.number(), *header.hash());
            if header.number() == 0 {
                break;
            }
            cursor = self.headers.get(header.parent_hash());
        }

        true
    }

    fn is_canonical(&self, header: &Header) -> bool {
        self.canonical.get(&header.number()) == Some(header.hash())
    }
}

/// Chain storage kept in memory.
#[derive(Default)]
pub struct MemChain {
    inner: RwLock<Inner>,
}

impl MemChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a header without touching the canonical chain.
    pub async fn insert(&self, header: Header) {
        let mut inner = self.inner.write().await;
        inner.headers.insert(*header.hash(), header);
    }

    /// Stores a header and makes it the canonical head.
    pub async fn push(&self, header: Header) {
        let hash = *header.hash();
        let mut inner = self.inner.write().await;
        inner.headers.insert(hash, header);
        inner.set_head(hash);
    }

    /// Switches the canonical chain to end at `hash`. Returns `false` if the header is unknown.
    pub async fn set_head(&self, hash: &BlockHash) -> bool {
        self.inner.write().await.set_head(*hash)
    }

    pub async fn put_group_sigs(&self, hash: &BlockHash, bytes: Vec<u8>) {
        self.inner.write().await.group_sigs.insert(*hash, bytes);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.headers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.headers.is_empty()
    }

    /// Encodes the chain as a fixture, see [`FromToml`] for the layout.
    pub async fn to_toml(&self) -> Result<String> {
        self.inner.read().await.to_toml()
    }
}

impl ChainReader for MemChain {
    async fn current_header(&self) -> Option<Header> {
        let inner = self.inner.read().await;
        let (_, hash) = inner.canonical.last_key_value()?;
        inner.headers.get(hash).cloned()
    }

    async fn header_by_number(&self, number: u64) -> Option<Header> {
        let inner = self.inner.read().await;
        let hash = inner.canonical.get(&number)?;
        inner.headers.get(hash).cloned()
    }

    async fn header_by_hash(&self, hash: &BlockHash) -> Option<Header> {
        self.inner.read().await.headers.get(hash).cloned()
    }

    async fn group_sig_bytes(&self, hash: &BlockHash) -> Option<Vec<u8>> {
        self.inner.read().await.group_sigs.get(hash).cloned()
    }
}

// Fixture layout:
//
// [[Blocks]]
// Parent = 0            # position of the parent in Blocks, absent for genesis
// Extra = "<hex>"       # optional
// Canonical = true      # optional, defaults to true
// GroupSigs = "<hex>"   # optional encoded group signature proof
// [Blocks.Update]       # optional signer update
// Kind = "replace"      # or "change"
// Quorum = "bft"        # optional, replace only
// Signers = [...]       # replace: array of { Address, Key }
// Added = [...]         # change: array of { Address, Key }
// Removed = ["0x.."]    # change: addresses

impl IntoToml for SignerUpdate {
    fn to_value(&self) -> Result<Value> {
        let mut value = table();
        match self {
            Self::Replace { signers, quorum } => {
                insert(&mut value, "Kind", "replace".into())?;
                if let Some(q) = quorum {
                    insert(&mut value, "Quorum", q.to_string().into())?;
                }
                insert(&mut value, "Signers", records_to_value(signers)?)?;
            }
            Self::Change { added, removed } => {
                insert(&mut value, "Kind", "change".into())?;
                insert(&mut value, "Added", records_to_value(added)?)?;
                let removed = removed.iter().map(|a| Value::from(a.to_string()));
                insert(&mut value, "Removed", Value::Array(removed.collect()))?;
            }
        }

        Ok(value)
    }
}

impl FromToml for SignerUpdate {
    fn from_value(value: &Value) -> Result<Self> {
        let update = match get!(value, "Kind", as_str)? {
            "replace" => {
                let Some(signers) = value.get("Signers") else {
                    bail!("toml: replace update without signers")
                };
                Self::Replace {
                    signers: records_from_value(signers)?,
                    quorum: match value.get("Quorum").and_then(Value::as_str) {
                        Some(q) => Some(q.parse()?),
                        None => None,
                    },
                }
            }
            "change" => {
                let added = match value.get("Added") {
                    Some(added) => records_from_value(added)?,
                    None => vec![],
                };
                let removed = match value.get("Removed").and_then(Value::as_array) {
                    Some(removed) => removed
                        .iter()
                        .map(|a| match a.as_str() {
                            Some(a) => Ok(a.parse::<Address>()?),
                            None => bail!("toml: removed signer must be an address string"),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    None => vec![],
                };
                Self::Change { added, removed }
            }
            other => bail!("toml: unknown signer update kind '{other}'"),
        };

        Ok(update)
    }
}

impl Inner {
    fn to_toml(&self) -> Result<String> {
        let mut blocks = Vec::with_capacity(self.headers.len());
        for header in self.headers.values() {
            let mut block = Value::Table(map! {
                "Extra":     hex::encode(header.extra()),
                "Canonical": self.is_canonical(header),
            });
            if header.number() > 0 {
                let Some(parent) = self.headers.get_index_of(header.parent_hash()) else {
                    bail!("fixture: parent of block {} is unknown", header.hash())
                };
                let parent = i64::try_from(parent)?;
                insert(&mut block, "Parent", parent.into())?;
            }
            if let Some(sigs) = self.group_sigs.get(header.hash()) {
                insert(&mut block, "GroupSigs", hex::encode(sigs).into())?;
            }
            if let Some(update) = header.update() {
                insert(&mut block, "Update", update.to_value()?)?;
            }
            blocks.push(block);
        }

        let mut doc = table();
        insert(&mut doc, "Blocks", Value::Array(blocks))?;
        Ok(toml::to_string(&doc)?)
    }
}

impl FromToml for MemChain {
    fn from_value(value: &Value) -> Result<Self> {
        let mut inner = Inner::default();

        for (position, block) in get!(value, "Blocks", as_array)?.iter().enumerate() {
            let extra = match block.get("Extra").and_then(Value::as_str) {
                Some(extra) => hex::decode(extra)?,
                None => vec![],
            };
            let update = match block.get("Update") {
                Some(update) => Some(SignerUpdate::from_value(update)?),
                None => None,
            };
            let header = match block.get("Parent").and_then(Value::as_integer) {
                Some(parent) => {
                    let Some((_, parent)) = usize::try_from(parent)
                        .ok()
                        .filter(|p| *p < position)
                        .and_then(|p| inner.headers.get_index(p))
                    else {
                        bail!("fixture: block {position} refers to unknown parent {parent}")
                    };
                    let Some(header) = parent.child(extra, update) else {
                        bail!("fixture: block {position} is above the last representable height")
                    };
                    header
                }
                None => Header::new(0, BlockHash::default(), extra, update),
            };
            let hash = *header.hash();
            if inner.headers.insert(hash, header).is_some() {
                bail!("fixture: block {position} duplicates an earlier block");
            }

            if let Some(sigs) = block.get("GroupSigs").and_then(Value::as_str) {
                inner.group_sigs.insert(hash, hex::decode(sigs)?);
            }
            if block
                .get("Canonical")
                .and_then(Value::as_bool)
                .unwrap_or(true)
            {
                inner.set_head(hash);
            }
        }

        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}

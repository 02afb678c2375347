// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use super::cache::SnapshotCache;
use super::checkpoint::{Checkpoint, CheckpointStore};
use super::epoch::AuthorizationEpoch;
use super::rotation::{RotationError, RotationRule};
use super::{SnapKey, Snapshot};
use crate::chain::{BlockHash, ChainReader, Header};
use crate::key::{KeyPoint, Scheme};
use crate::log::Logger;
use crate::{debug, error, warn};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Default amount of snapshots kept in memory.
pub const DEFAULT_CACHE_SIZE: usize = 128;
/// Default bound of headers visited by a single walk-back.
pub const DEFAULT_MAX_WALK: u64 = 10_000;
/// Default distance between persisted snapshots.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub cache_size: usize,
    pub max_walk: u64,
    /// Zero disables checkpoints.
    pub checkpoint_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            max_walk: DEFAULT_MAX_WALK,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("unknown block {0}")]
    UnknownBlock(SnapKey),
    #[error("inconsistent chain below {key}: {reason}")]
    InconsistentChain { key: SnapKey, reason: String },
    #[error("rotation: {0}")]
    Rotation(#[from] RotationError),
    #[error("snapshot computation for {0} was interrupted")]
    Interrupted(SnapKey),
}

type Outcome<S> = Result<Arc<Snapshot<S>>, SnapshotError>;

/// Completion signal of one in-flight computation: `None` until the result is published.
type Flight<S> = watch::Receiver<Option<Outcome<S>>>;

/// Authorization snapshot store.
///
/// Snapshots are derived lazily from chain history and cached by `(number, hash)`.
/// Concurrent requests for one key share a single computation which runs on its
/// own task, so a caller dropping its future never cancels the work for others.
pub struct SnapshotStore<S: Scheme, C: ChainReader> {
    inner: Arc<Inner<S, C>>,
}

struct Inner<S: Scheme, C: ChainReader> {
    chain: Arc<C>,
    genesis: Arc<AuthorizationEpoch<S>>,
    rule: RotationRule,
    config: StoreConfig,
    cache: Mutex<SnapshotCache<S>>,
    flights: Mutex<HashMap<SnapKey, Flight<S>>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    log: Logger,
}

impl<S: Scheme, C: ChainReader> Clone for SnapshotStore<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Scheme, C: ChainReader> SnapshotStore<S, C> {
    pub fn new(
        chain: Arc<C>,
        genesis: AuthorizationEpoch<S>,
        rule: RotationRule,
        config: StoreConfig,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
        log: Logger,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                chain,
                genesis: Arc::new(genesis),
                rule,
                cache: Mutex::new(SnapshotCache::new(config.cache_size)),
                config,
                flights: Mutex::new(HashMap::new()),
                checkpoints,
                log,
            }),
        }
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.inner.chain
    }

    pub fn rule(&self) -> RotationRule {
        self.inner.rule
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn genesis(&self) -> &Arc<AuthorizationEpoch<S>> {
        &self.inner.genesis
    }

    /// Cached snapshot without computing it.
    pub async fn cached(&self, number: u64, hash: &BlockHash) -> Option<Arc<Snapshot<S>>> {
        let key = SnapKey::new(number, *hash);
        self.inner.cache.lock().await.peek(&key).cloned()
    }

    pub async fn cache_len(&self) -> usize {
        self.inner.cache.lock().await.len()
    }
}

impl<S, C> SnapshotStore<S, C>
where
    S: Scheme + Send + Sync + 'static,
    KeyPoint<S>: Send + Sync,
    C: ChainReader,
{
    /// Returns snapshot of block `(number, hash)`.
    ///
    /// `hint` is a snapshot known to be an ancestor (typically the parent); the walk-back
    /// stops there instead of reading further history. A hint that is not on the path
    /// of the requested block is never reached and has no effect.
    pub async fn snapshot(
        &self,
        number: u64,
        hash: BlockHash,
        hint: Option<Arc<Snapshot<S>>>,
    ) -> Outcome<S> {
        let key = SnapKey::new(number, hash);
        if let Some(snapshot) = self.inner.cache.lock().await.get(&key) {
            return Ok(snapshot);
        }

        let mut flight = {
            let mut flights = self.inner.flights.lock().await;
            // Sender is alive: join the running computation.
            let running = flights
                .get(&key)
                .filter(|rx| rx.has_changed().is_ok())
                .cloned();
            match running {
                Some(rx) => rx,
                None => {
                    let (tx, rx) = watch::channel(None);
                    flights.insert(key, rx.clone());

                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        let outcome = inner.compute(key, hint).await;
                        if let Ok(snapshot) = &outcome {
                            inner.cache.lock().await.insert(Arc::clone(snapshot));
                        }
                        inner.flights.lock().await.remove(&key);
                        tx.send_replace(Some(outcome));
                    });
                    rx
                }
            }
        };

        let Ok(outcome) = flight.wait_for(Option::is_some).await else {
            return Err(SnapshotError::Interrupted(key));
        };
        outcome
            .clone()
            .unwrap_or(Err(SnapshotError::Interrupted(key)))
    }
}

impl<S, C> Inner<S, C>
where
    S: Scheme + Send + Sync + 'static,
    KeyPoint<S>: Send + Sync,
    C: ChainReader,
{
    async fn compute(&self, key: SnapKey, hint: Option<Arc<Snapshot<S>>>) -> Outcome<S> {
        let log = self.log.new_child(format!(".snapshot.{}", key.number));
        let (base, headers) = self.walk_back(key, hint.as_ref(), &log).await?;

        debug!(
            &log,
            "walk-back reached {} from {key}, replaying {} headers",
            base.key(),
            headers.len()
        );

        let mut snapshot = base;
        for header in headers.iter().rev() {
            let next = snapshot.apply(&self.rule, header).map_err(|err| {
                error!(&log, "block {} {}: {err}", header.number(), header.hash());
                err
            })?;
            snapshot = Arc::new(next);
            self.persist(&snapshot, &log).await;
        }

        Ok(snapshot)
    }

    /// Collects headers from `key` down to the closest known snapshot, newest first.
    async fn walk_back(
        &self,
        key: SnapKey,
        hint: Option<&Arc<Snapshot<S>>>,
        log: &Logger,
    ) -> Result<(Arc<Snapshot<S>>, Vec<Header>), SnapshotError> {
        let mut headers: Vec<Header> = Vec::new();
        let mut cursor = key;

        // Requested pair must resolve to a header before any shortcut is taken.
        let mut resolved = match self.chain.header_by_hash(&key.hash).await {
            Some(header) if header.number() == key.number => Some(header),
            _ => return Err(SnapshotError::UnknownBlock(key)),
        };

        let base = loop {
            if let Some(hint) = hint.filter(|h| h.key() == cursor) {
                break Arc::clone(hint);
            }
            if let Some(cached) = self.cache.lock().await.peek(&cursor).cloned() {
                break cached;
            }
            if let Some(restored) = self.restore(cursor, log).await {
                break restored;
            }

            let inconsistent = |reason: String| {
                error!(log, "inconsistent chain below {key}: {reason}");
                SnapshotError::InconsistentChain { key, reason }
            };

            let header = match resolved.take() {
                Some(header) => header,
                None => match self.chain.header_by_hash(&cursor.hash).await {
                    Some(header) if header.number() == cursor.number => header,
                    Some(header) => {
                        return Err(inconsistent(format!(
                            "ancestor {} is at height {}, expected {}",
                            cursor.hash,
                            header.number(),
                            cursor.number
                        )))
                    }
                    None => return Err(inconsistent(format!("missing ancestor {cursor}"))),
                },
            };

            if cursor.number == 0 {
                break Arc::new(Snapshot::new(0, cursor.hash, Arc::clone(&self.genesis)));
            }
            if headers.len() as u64 >= self.config.max_walk {
                return Err(inconsistent(format!(
                    "no known snapshot within {} headers",
                    self.config.max_walk
                )));
            }

            cursor = SnapKey::new(cursor.number - 1, *header.parent_hash());
            headers.push(header);
        };

        Ok((base, headers))
    }

    fn is_checkpoint(&self, number: u64) -> bool {
        number > 0 && number.checked_rem(self.config.checkpoint_interval) == Some(0)
    }

    /// Loads a persisted snapshot. Unreadable checkpoints are skipped, the walk continues.
    async fn restore(&self, key: SnapKey, log: &Logger) -> Option<Arc<Snapshot<S>>> {
        let checkpoints = self.checkpoints.as_ref().filter(|_| self.is_checkpoint(key.number))?;
        let checkpoints = Arc::clone(checkpoints);

        let loaded = tokio::task::spawn_blocking(move || checkpoints.load(&key)).await;
        let checkpoint = match loaded {
            Ok(Ok(checkpoint)) => checkpoint?,
            Ok(Err(err)) => {
                warn!(log, "ignoring checkpoint {key}: {err}");
                return None;
            }
            Err(err) => {
                warn!(log, "checkpoint {key} load interrupted: {err}");
                return None;
            }
        };

        match checkpoint.into_snapshot() {
            Ok(snapshot) => {
                debug!(log, "restored checkpoint {key}");
                Some(Arc::new(snapshot))
            }
            Err(err) => {
                warn!(log, "ignoring checkpoint {key}: {err}");
                None
            }
        }
    }

    async fn persist(&self, snapshot: &Snapshot<S>, log: &Logger) {
        let Some(checkpoints) = self.checkpoints.as_ref() else {
            return;
        };
        if !self.is_checkpoint(snapshot.number()) {
            return;
        }

        let key = snapshot.key();
        let checkpoint = Checkpoint::from_snapshot(snapshot);
        let checkpoints = Arc::clone(checkpoints);
        match tokio::task::spawn_blocking(move || checkpoints.store(&checkpoint)).await {
            Ok(Ok(())) => debug!(log, "stored checkpoint {key}"),
            Ok(Err(err)) => warn!(log, "failed to store checkpoint {key}: {err}"),
            Err(err) => warn!(log, "checkpoint {key} store interrupted: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MemChain, SignerUpdate};
    use crate::snapshot::{EpochError, MemCheckpoints, QuorumRule};
    use crate::test::{extend, genesis_header, TestSigner};
    use energon::drand::schemes::DefaultScheme;

    type Store = SnapshotStore<DefaultScheme, MemChain>;

    fn store(
        chain: Arc<MemChain>,
        records: &[crate::key::SignerRecord],
        rule: RotationRule,
        config: StoreConfig,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
    ) -> Store {
        let genesis = AuthorizationEpoch::new(0, QuorumRule::Bft, records.to_vec()).unwrap();
        let log = Logger::register_chain("store-test");
        SnapshotStore::new(chain, genesis, rule, config, checkpoints, log)
    }

    async fn push_all(chain: &MemChain, headers: &[Header]) {
        for header in headers {
            chain.push(header.clone()).await;
        }
    }

    #[tokio::test]
    async fn genesis_and_descendants() {
        let records = TestSigner::<DefaultScheme>::records(4);
        let chain = Arc::new(MemChain::new());
        let genesis = genesis_header();
        let headers = extend(&genesis, 5, 0);
        push_all(&chain, &[genesis.clone()]).await;
        push_all(&chain, &headers).await;

        let store = store(
            Arc::clone(&chain),
            &records,
            RotationRule::Membership,
            StoreConfig::default(),
            None,
        );

        let s0 = store.snapshot(0, *genesis.hash(), None).await.unwrap();
        assert_eq!(s0.number(), 0);
        assert_eq!(s0.signers().len(), 4);

        let s5 = store.snapshot(5, *headers[4].hash(), None).await.unwrap();
        assert_eq!(s5.hash(), headers[4].hash());
        assert!(Arc::ptr_eq(s5.epoch(), store.genesis()));
        assert_eq!(store.cache_len().await, 2);
        assert!(store.cached(5, headers[4].hash()).await.is_some());
    }

    #[tokio::test]
    async fn cold_and_warm_agree() {
        let records = TestSigner::<DefaultScheme>::records(6);
        let chain = Arc::new(MemChain::new());
        let genesis = genesis_header();
        let mut headers = extend(&genesis, 3, 0);
        let rotation = headers[2]
            .child(
                vec![],
                Some(SignerUpdate::Change {
                    added: records[4..].to_vec(),
                    removed: vec![records[0].address],
                }),
            )
            .unwrap();
        headers.push(rotation.clone());
        headers.extend(extend(&rotation, 4, 0));
        push_all(&chain, &[genesis]).await;
        push_all(&chain, &headers).await;

        let config = StoreConfig::default();
        let rule = RotationRule::Membership;
        let tip = headers.last().unwrap();

        let cold = store(Arc::clone(&chain), &records[..4], rule, config, None);
        let cold_tip = cold.snapshot(tip.number(), *tip.hash(), None).await.unwrap();

        let warm = store(Arc::clone(&chain), &records[..4], rule, config, None);
        for header in &headers {
            warm.snapshot(header.number(), *header.hash(), None)
                .await
                .unwrap();
        }
        let warm_tip = warm.snapshot(tip.number(), *tip.hash(), None).await.unwrap();

        let hinted = store(Arc::clone(&chain), &records[..4], rule, config, None);
        let parent = &headers[headers.len() - 2];
        let parent_snapshot = cold.snapshot(parent.number(), *parent.hash(), None).await.unwrap();
        let hinted_tip = hinted
            .snapshot(tip.number(), *tip.hash(), Some(parent_snapshot))
            .await
            .unwrap();

        assert_eq!(cold_tip, warm_tip);
        assert_eq!(cold_tip, hinted_tip);
        assert_eq!(cold_tip.signers().len(), 5);
        assert_eq!(cold_tip.epoch().start(), 5);
        // Hinted computation cached only its result.
        assert_eq!(hinted.cache_len().await, 1);
    }

    #[tokio::test]
    async fn unknown_block_is_not_cached() {
        let records = TestSigner::<DefaultScheme>::records(1);
        let chain = Arc::new(MemChain::new());
        let genesis = genesis_header();
        let headers = extend(&genesis, 2, 0);
        push_all(&chain, &[genesis]).await;
        push_all(&chain, &headers).await;
        let store = store(chain, &records, RotationRule::default(), StoreConfig::default(), None);

        let bogus = BlockHash::new([0xee; 32]);
        assert_eq!(
            store.snapshot(2, bogus, None).await,
            Err(SnapshotError::UnknownBlock(SnapKey::new(2, bogus)))
        );
        // Right hash, wrong height.
        assert_eq!(
            store.snapshot(1, *headers[1].hash(), None).await,
            Err(SnapshotError::UnknownBlock(SnapKey::new(1, *headers[1].hash())))
        );
        assert_eq!(store.cache_len().await, 0);
    }

    #[tokio::test]
    async fn broken_history_is_inconsistent() {
        let records = TestSigner::<DefaultScheme>::records(1);
        let chain = Arc::new(MemChain::new());
        let genesis = genesis_header();
        push_all(&chain, &[genesis.clone()]).await;

        // Parent is absent from storage.
        let orphan = Header::from_parts(
            3,
            BlockHash::new([3; 32]),
            BlockHash::new([2; 32]),
            BlockHash::new([0x33; 32]),
            None,
        );
        chain.insert(orphan.clone()).await;
        // Parent is stored at a different height than the child claims.
        let skewed = Header::from_parts(
            2,
            BlockHash::new([4; 32]),
            *genesis.hash(),
            BlockHash::new([0x44; 32]),
            None,
        );
        chain.insert(skewed).await;

        let store = store(chain, &records, RotationRule::default(), StoreConfig::default(), None);
        assert!(matches!(
            store.snapshot(3, *orphan.hash(), None).await,
            Err(SnapshotError::InconsistentChain { .. })
        ));
        assert!(matches!(
            store.snapshot(2, BlockHash::new([4; 32]), None).await,
            Err(SnapshotError::InconsistentChain { .. })
        ));
        assert_eq!(store.cache_len().await, 0);
    }

    #[tokio::test]
    async fn walk_is_bounded() {
        let records = TestSigner::<DefaultScheme>::records(1);
        let chain = Arc::new(MemChain::new());
        let genesis = genesis_header();
        let headers = extend(&genesis, 10, 0);
        push_all(&chain, &[genesis]).await;
        push_all(&chain, &headers).await;

        let config = StoreConfig {
            max_walk: 4,
            ..StoreConfig::default()
        };
        let store = store(chain, &records, RotationRule::default(), config, None);

        assert!(store.snapshot(4, *headers[3].hash(), None).await.is_ok());
        assert!(matches!(
            store.snapshot(10, *headers[9].hash(), None).await,
            Err(SnapshotError::InconsistentChain { .. })
        ));
        // Walk from 8 reaches the cached snapshot at 4.
        assert!(store.snapshot(8, *headers[7].hash(), None).await.is_ok());
        assert!(store.snapshot(10, *headers[9].hash(), None).await.is_ok());
    }

    #[tokio::test]
    async fn rotation_failure_surfaces() {
        let records = TestSigner::<DefaultScheme>::records(2);
        let chain = Arc::new(MemChain::new());
        let genesis = genesis_header();
        let headers = extend(&genesis, 4, 0);
        push_all(&chain, &[genesis]).await;
        push_all(&chain, &headers).await;

        let rule = RotationRule::Interval { interval: 3 };
        let store = store(chain, &records, rule, StoreConfig::default(), None);

        assert!(store.snapshot(2, *headers[1].hash(), None).await.is_ok());
        assert_eq!(
            store.snapshot(4, *headers[3].hash(), None).await,
            Err(SnapshotError::Rotation(RotationError::MissingSignerSet(3)))
        );
    }

    #[tokio::test]
    async fn invalid_replacement_surfaces() {
        let records = TestSigner::<DefaultScheme>::records(2);
        let chain = Arc::new(MemChain::new());
        let genesis = genesis_header();
        let empty = genesis
            .child(
                vec![],
                Some(SignerUpdate::Replace {
                    signers: vec![],
                    quorum: None,
                }),
            )
            .unwrap();
        push_all(&chain, &[genesis, empty.clone()]).await;

        let store = store(chain, &records, RotationRule::Membership, StoreConfig::default(), None);
        assert_eq!(
            store.snapshot(1, *empty.hash(), None).await,
            Err(SnapshotError::Rotation(RotationError::Epoch {
                number: 1,
                source: EpochError::EmptySet
            }))
        );
    }

    #[tokio::test]
    async fn checkpoints_shorten_walk() {
        let records = TestSigner::<DefaultScheme>::records(3);
        let genesis = genesis_header();
        let headers = extend(&genesis, 10, 0);
        let full = Arc::new(MemChain::new());
        push_all(&full, &[genesis]).await;
        push_all(&full, &headers).await;

        let checkpoints = Arc::new(MemCheckpoints::new());
        let config = StoreConfig {
            checkpoint_interval: 4,
            ..StoreConfig::default()
        };
        let rule = RotationRule::default();
        let cps: Arc<dyn CheckpointStore> = checkpoints.clone();

        let first = store(full, &records, rule, config, Some(Arc::clone(&cps)));
        let expected = first.snapshot(10, *headers[9].hash(), None).await.unwrap();
        // Heights 4 and 8.
        assert_eq!(checkpoints.len(), 2);

        // History below the last checkpoint is gone.
        let pruned = Arc::new(MemChain::new());
        for header in &headers[8..] {
            pruned.insert(header.clone()).await;
        }
        let second = store(pruned, &records, rule, config, Some(cps));
        let restored = second.snapshot(10, *headers[9].hash(), None).await.unwrap();
        assert_eq!(restored, expected);
    }

    #[tokio::test]
    async fn shortcuts_need_a_resolvable_block() {
        let records = TestSigner::<DefaultScheme>::records(3);
        let genesis = genesis_header();
        let headers = extend(&genesis, 4, 0);
        let full = Arc::new(MemChain::new());
        push_all(&full, &[genesis.clone()]).await;
        push_all(&full, &headers).await;

        let checkpoints = Arc::new(MemCheckpoints::new());
        let config = StoreConfig {
            checkpoint_interval: 4,
            ..StoreConfig::default()
        };
        let rule = RotationRule::default();
        let cps: Arc<dyn CheckpointStore> = checkpoints.clone();

        let first = store(full, &records, rule, config, Some(Arc::clone(&cps)));
        let persisted = first.snapshot(4, *headers[3].hash(), None).await.unwrap();
        assert_eq!(checkpoints.len(), 1);

        // Only genesis is stored: neither the checkpoint nor a hint at the
        // requested pair stand in for the missing header.
        let bare = Arc::new(MemChain::new());
        bare.push(genesis).await;
        let second = store(bare, &records, rule, config, Some(cps));
        let key = SnapKey::new(4, *headers[3].hash());

        assert_eq!(
            second.snapshot(4, key.hash, None).await,
            Err(SnapshotError::UnknownBlock(key))
        );
        assert_eq!(
            second.snapshot(4, key.hash, Some(persisted)).await,
            Err(SnapshotError::UnknownBlock(key))
        );
        assert_eq!(second.cache_len().await, 0);
    }

    #[tokio::test]
    async fn missing_ancestor_is_retried() {
        let records = TestSigner::<DefaultScheme>::records(2);
        let genesis = genesis_header();
        let headers = extend(&genesis, 3, 0);
        let chain = Arc::new(MemChain::new());
        push_all(&chain, &[genesis]).await;
        push_all(&chain, &headers[1..]).await;

        let store = store(
            Arc::clone(&chain),
            &records,
            RotationRule::default(),
            StoreConfig::default(),
            None,
        );
        let tip = &headers[2];
        assert!(matches!(
            store.snapshot(3, *tip.hash(), None).await,
            Err(SnapshotError::InconsistentChain { .. })
        ));
        assert_eq!(store.cache_len().await, 0);

        chain.insert(headers[0].clone()).await;
        let snapshot = store.snapshot(3, *tip.hash(), None).await.unwrap();
        assert_eq!(snapshot.hash(), tip.hash());
        assert_eq!(store.cache_len().await, 1);
    }
}

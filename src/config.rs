// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

//! Node configuration file.
//!
//! ```toml
//! ChainId = "devnet"
//! Scheme = "pedersen-bls-chained"
//!
//! [Genesis]
//! Quorum = "bft"
//! [[Genesis.Signers]]
//! Address = "0x.."   # optional, derived from the key
//! Key = "<hex>"
//!
//! [Rotation]
//! Kind = "interval"  # or "membership"
//! Interval = 100
//!
//! [Store]
//! CacheSize = 128
//! MaxWalk = 10000
//! CheckpointInterval = 1024
//! CheckpointDir = "/var/lib/dbft/checkpoints"
//! ```
use crate::key::toml::{
    get, height_from_value, height_to_value, insert, map, records_from_value, records_to_value,
    table, FromToml, IntoToml,
};
use crate::key::{Scheme, SignerRecord};
use crate::snapshot::{
    AuthorizationEpoch, CheckpointStore, EpochError, FileCheckpoints, QuorumRule, RotationRule,
    StoreConfig,
};

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toml::Value;

pub const DEFAULT_CHAIN_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub chain_id: String,
    /// Signature scheme ID, `None` accepts the build default.
    pub scheme: Option<String>,
    pub quorum: QuorumRule,
    pub signers: Vec<SignerRecord>,
    pub rotation: RotationRule,
    pub store: StoreConfig,
    pub checkpoint_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Error reading: {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("Error parsing: {}", path.display()))
    }

    /// Epoch active from the genesis block.
    pub fn genesis_epoch<S: Scheme>(&self) -> Result<AuthorizationEpoch<S>, EpochError> {
        AuthorizationEpoch::new(0, self.quorum, self.signers.clone())
    }

    pub fn checkpoints(&self) -> Result<Option<Arc<dyn CheckpointStore>>> {
        let Some(dir) = &self.checkpoint_dir else {
            return Ok(None);
        };
        let store = FileCheckpoints::init(dir)?;
        Ok(Some(Arc::new(store)))
    }

    /// Fails if the file names a scheme other than `S`.
    pub fn check_scheme<S: Scheme>(&self) -> Result<()> {
        match &self.scheme {
            Some(id) if id != S::ID => bail!("scheme {id} is not supported, expected {}", S::ID),
            _ => Ok(()),
        }
    }
}

fn count_from_value(value: &Value, key: &str) -> Result<usize> {
    Ok(usize::try_from(height_from_value(value, key)?)?)
}

impl IntoToml for RotationRule {
    fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::Membership => Value::Table(map! { "Kind": "membership" }),
            Self::Interval { interval } => {
                let mut value = Value::Table(map! { "Kind": "interval" });
                insert(&mut value, "Interval", height_to_value(*interval)?)?;
                value
            }
        };

        Ok(value)
    }
}

impl FromToml for RotationRule {
    fn from_value(value: &Value) -> Result<Self> {
        let rule = match get!(value, "Kind", as_str)? {
            "membership" => Self::Membership,
            "interval" => Self::Interval {
                interval: height_from_value(value, "Interval")?,
            },
            other => bail!("toml: unknown rotation kind '{other}'"),
        };

        Ok(rule)
    }
}

impl IntoToml for StoreConfig {
    fn to_value(&self) -> Result<Value> {
        let mut value = table();
        insert(&mut value, "CacheSize", height_to_value(self.cache_size as u64)?)?;
        insert(&mut value, "MaxWalk", height_to_value(self.max_walk)?)?;
        insert(
            &mut value,
            "CheckpointInterval",
            height_to_value(self.checkpoint_interval)?,
        )?;

        Ok(value)
    }
}

impl FromToml for StoreConfig {
    /// Missing fields take their defaults.
    fn from_value(value: &Value) -> Result<Self> {
        let mut config = Self::default();
        if value.get("CacheSize").is_some() {
            config.cache_size = count_from_value(value, "CacheSize")?;
        }
        if value.get("MaxWalk").is_some() {
            config.max_walk = height_from_value(value, "MaxWalk")?;
        }
        if value.get("CheckpointInterval").is_some() {
            config.checkpoint_interval = height_from_value(value, "CheckpointInterval")?;
        }
        if config.max_walk == 0 {
            bail!("toml: MaxWalk must be positive");
        }

        Ok(config)
    }
}

impl IntoToml for Config {
    fn to_value(&self) -> Result<Value> {
        let mut doc = Value::Table(map! { "ChainId": self.chain_id.as_str() });
        if let Some(scheme) = &self.scheme {
            insert(&mut doc, "Scheme", scheme.as_str().into())?;
        }

        let mut genesis = Value::Table(map! { "Quorum": self.quorum.to_string() });
        insert(&mut genesis, "Signers", records_to_value(&self.signers)?)?;
        insert(&mut doc, "Genesis", genesis)?;
        insert(&mut doc, "Rotation", self.rotation.to_value()?)?;

        let mut store = self.store.to_value()?;
        if let Some(dir) = &self.checkpoint_dir {
            let Some(dir) = dir.to_str() else {
                bail!("toml: checkpoint folder {} is not valid UTF-8", dir.display())
            };
            insert(&mut store, "CheckpointDir", dir.into())?;
        }
        insert(&mut doc, "Store", store)?;

        Ok(doc)
    }
}

impl FromToml for Config {
    fn from_value(value: &Value) -> Result<Self> {
        let Some(genesis) = value.get("Genesis") else {
            bail!("Expected Genesis")
        };
        let Some(signers) = genesis.get("Signers") else {
            bail!("Expected Genesis.Signers")
        };
        let quorum = match genesis.get("Quorum").and_then(Value::as_str) {
            Some(quorum) => quorum.parse()?,
            None => QuorumRule::default(),
        };
        let rotation = match value.get("Rotation") {
            Some(rotation) => RotationRule::from_value(rotation)?,
            None => RotationRule::default(),
        };
        let (store, checkpoint_dir) = match value.get("Store") {
            Some(store) => (
                StoreConfig::from_value(store)?,
                store
                    .get("CheckpointDir")
                    .and_then(Value::as_str)
                    .map(PathBuf::from),
            ),
            None => (StoreConfig::default(), None),
        };

        Ok(Self {
            chain_id: value
                .get("ChainId")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_CHAIN_ID)
                .to_string(),
            scheme: value.get("Scheme").and_then(Value::as_str).map(String::from),
            quorum,
            signers: records_from_value(signers)?,
            rotation,
            store,
            checkpoint_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestSigner;
    use energon::drand::schemes::DefaultScheme;

    #[test]
    fn minimal_config_takes_defaults() {
        let signer = TestSigner::<DefaultScheme>::generate();
        let data = format!(
            "[Genesis]\n[[Genesis.Signers]]\nKey = \"{}\"\n",
            hex::encode(signer.record().key)
        );
        let config = Config::from_toml(&data).unwrap();

        assert_eq!(config.chain_id, DEFAULT_CHAIN_ID);
        assert_eq!(config.quorum, QuorumRule::Bft);
        assert_eq!(config.rotation, RotationRule::Membership);
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.signers, vec![signer.record()]);
        assert!(config.checkpoints().unwrap().is_none());

        let epoch = config.genesis_epoch::<DefaultScheme>().unwrap();
        assert_eq!(epoch.start(), 0);
        assert_eq!(epoch.threshold(), 1);
        assert!(config.check_scheme::<DefaultScheme>().is_ok());
    }

    #[test]
    fn full_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            chain_id: "devnet".into(),
            scheme: Some(DefaultScheme::ID.into()),
            quorum: QuorumRule::Fixed(2),
            signers: TestSigner::<DefaultScheme>::records(3),
            rotation: RotationRule::Interval { interval: 100 },
            store: StoreConfig {
                cache_size: 16,
                max_walk: 500,
                checkpoint_interval: 0,
            },
            checkpoint_dir: Some(dir.path().join("checkpoints")),
        };

        let decoded = Config::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(decoded, config);
        assert!(decoded.checkpoints().unwrap().is_some());
        assert!(dir.path().join("checkpoints").is_dir());
    }

    #[test]
    fn invalid_configs() {
        assert!(Config::from_toml("ChainId = \"x\"").is_err());

        let signer = TestSigner::<DefaultScheme>::generate();
        let key = hex::encode(signer.record().key);
        let with = |extra: &str| {
            format!("{extra}\n[Genesis]\n[[Genesis.Signers]]\nKey = \"{key}\"\n")
        };

        assert!(Config::from_toml(&with("[Rotation]\nKind = \"vote\"")).is_err());
        assert!(Config::from_toml(&with("[Rotation]\nKind = \"interval\"")).is_err());
        assert!(Config::from_toml(&with("[Store]\nMaxWalk = 0")).is_err());
        assert!(Config::from_toml(&with("[Store]\nCacheSize = -5")).is_err());

        let config = Config::from_toml(&with("Scheme = \"no-such-scheme\"")).unwrap();
        assert!(config.check_scheme::<DefaultScheme>().is_err());
    }
}

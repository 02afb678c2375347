// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::api::{Api, BlockNumber, GroupSigFormatter};
use crate::chain::{BlockHash, MemChain};
use crate::config::Config;
use crate::key::toml::FromToml;
use crate::log::{init_log, Logger};
use crate::snapshot::SnapshotStore;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use energon::drand::schemes::DefaultScheme;
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "dbft-snap")]
#[command(about = "Inspect dBFT signer snapshots and group signatures of a chain", long_about = None)]
pub struct Cli {
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the authorization snapshot of a block.
    Snapshot(Query),
    /// List the addresses authorized to sign a block, ordered by signer index.
    Signers(Query),
    /// Show the group signature proof persisted for a block.
    GroupSigs(Query),
    /// Verify the group signature proof of a block against its authorized signer set.
    Verify(Query),
}

#[derive(Debug, Args)]
pub struct Query {
    /// Node configuration with genesis signers and rotation rule.
    #[arg(long)]
    config: PathBuf,
    /// Chain fixture to read headers and proofs from.
    #[arg(long)]
    chain: PathBuf,
    /// Canonical block height or 'latest'. Ignored if hash is given.
    #[arg(long, default_value = "latest")]
    number: BlockNumber,
    /// Block hash, selects blocks outside of the canonical chain as well.
    #[arg(long)]
    hash: Option<BlockHash>,
}

impl Query {
    fn api(&self) -> Result<Api<DefaultScheme, MemChain>> {
        let config = Config::load(&self.config)?;
        config.check_scheme::<DefaultScheme>()?;

        let data = std::fs::read_to_string(&self.chain)
            .with_context(|| format!("Error reading: {}", self.chain.display()))?;
        let chain = MemChain::from_toml(&data)
            .with_context(|| format!("Error parsing: {}", self.chain.display()))?;

        let log = Logger::register_chain(&config.chain_id);
        let store = SnapshotStore::new(
            Arc::new(chain),
            config.genesis_epoch()?,
            config.rotation,
            config.store,
            config.checkpoints()?,
            log.new_child(".snapshot".into()),
        );

        Ok(Api::new(store, log))
    }

    async fn target(&self, api: &Api<DefaultScheme, MemChain>) -> Result<BlockHash> {
        match self.hash {
            Some(hash) => Ok(hash),
            None => Ok(*api.header(self.number).await?.hash()),
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        init_log(self.verbose)?;
        let output = self.execute().await?;
        print!("{output}");

        Ok(())
    }

    /// Runs the command and returns its printable output.
    pub async fn execute(self) -> Result<String> {
        let mut out = String::new();
        match self.commands {
            Commands::Snapshot(query) => {
                let api = query.api()?;
                let hash = query.target(&api).await?;
                write!(out, "{}", api.snapshot_at_hash(&hash).await?)?;
            }
            Commands::Signers(query) => {
                let api = query.api()?;
                let hash = query.target(&api).await?;
                for address in api.signers_at_hash(&hash).await? {
                    writeln!(out, "{address}")?;
                }
            }
            Commands::GroupSigs(query) => {
                let api = query.api()?;
                let hash = query.target(&api).await?;
                let proof = api.group_sigs_at_hash(&hash).await?;
                for entry in GroupSigFormatter::from_proof(&proof) {
                    writeln!(out, "{entry}")?;
                }
            }
            Commands::Verify(query) => {
                let api = query.api()?;
                let hash = query.target(&api).await?;
                let result = api.verify_block(&hash).await?;
                let status = if result.ok { "finalized" } else { "not finalized" };
                writeln!(
                    out,
                    "{hash}: {status}, {} of {} required signers",
                    result.valid.len(),
                    result.threshold
                )?;
                let valid: Vec<String> = result.valid.iter().map(u32::to_string).collect();
                writeln!(out, "valid: [{}]", valid.join(", "))?;
                for (index, reason) in &result.rejected {
                    writeln!(out, "rejected [{index}]: {reason}")?;
                }
            }
        }

        Ok(out)
    }
}

// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tracing::Span;
use tracing_subscriber::fmt::time;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init_log(verbose: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::builder().parse_lossy(match verbose {
        true => "dbft_snap=trace",
        false => "dbft_snap=info",
    });

    let layer = tracing_subscriber::fmt::layer()
        .with_timer(time::time())
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

/// Span holder passed down to components so every record carries the chain it belongs to.
#[derive(Clone)]
pub struct Logger {
    chain: Arc<str>,
    pub span: Span,
}

impl Logger {
    pub fn register_chain(chain_id: &str) -> Self {
        let span = tracing::info_span!("", chain = chain_id);
        Self {
            chain: chain_id.into(),
            span,
        }
    }

    pub fn new_child(&self, mut args: String) -> Self {
        args.insert_str(0, self.chain.as_ref());
        let span = tracing::info_span!("", id = args);
        Self {
            chain: Arc::clone(&self.chain),
            span,
        }
    }
}

#[macro_export]
macro_rules! debug {
    ($log:expr, $($arg:tt)+) => {
        tracing::debug!(parent: &$log.span, $($arg)+)
    };
}

#[macro_export]
macro_rules! info {
    ($log:expr, $($arg:tt)+) => {
        tracing::info!(parent: &$log.span, $($arg)+)
    };
}

#[macro_export]
macro_rules! warn {
    ($log:expr, $($arg:tt)+) => {
        tracing::warn!(parent: &$log.span, $($arg)+)
    };
}

#[macro_export]
macro_rules! error {
    ($log:expr, $($arg:tt)+) => {
        tracing::error!(parent: &$log.span, $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_log() {
        // Other tests may have installed the subscriber already.
        let _ = init_log(true);
        let chain_id = "devnet";
        let height = 8;

        let chain_log = Logger::register_chain(chain_id);
        crate::info!(&chain_log, "chain");

        let store_log = chain_log.new_child(".snapshot".into());
        crate::info!(&store_log, "chain.snapshot");

        let height_log = store_log.new_child(format!(".snapshot.{height}"));
        crate::debug!(&height_log, "chain.snapshot.height");
    }
}

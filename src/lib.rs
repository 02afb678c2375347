// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

// Backends.
#[cfg(all(feature = "blstrs", feature = "arkworks"))]
compile_error!("Features 'blstrs' and 'arkworks' are mutually exclusive");
#[cfg(not(any(feature = "blstrs", feature = "arkworks")))]
compile_error!("One of features 'blstrs' or 'arkworks' must be enabled");

pub mod api;
pub mod chain;
pub mod cli;
pub mod config;
pub mod groupsig;
pub mod key;
pub mod log;
pub mod snapshot;
#[cfg(test)]
mod test;

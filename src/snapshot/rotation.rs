// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use super::epoch::{AuthorizationEpoch, EpochError};
use crate::chain::{Header, SignerUpdate};
use crate::key::{Address, Scheme, SignerRecord};

use std::fmt::Display;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RotationError {
    #[error("block {0} is an election height but carries no signer set")]
    MissingSignerSet(u64),
    #[error("block {0} carries a signer update outside of an election height")]
    UnexpectedUpdate(u64),
    #[error("block {0} carries a membership change where a full signer set is required")]
    UnsupportedUpdate(u64),
    #[error("block {number} removes {address} which is not an authorized signer")]
    UnknownSigner { number: u64, address: Address },
    #[error("block {number} adds {address} which is already an authorized signer")]
    DuplicateSigner { number: u64, address: Address },
    #[error("block {number}: {source}")]
    Epoch { number: u64, source: EpochError },
    #[error("block {0} is the last representable height, no epoch can follow it")]
    HeightOverflow(u64),
}

/// Rule deciding how signer updates carried by headers change the active epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationRule {
    /// Re-election every `interval` blocks: each positive multiple of the
    /// interval carries the full signer set of the next epoch.
    Interval { interval: u64 },
    /// Signer set changes as voted on-chain, at any height.
    #[default]
    Membership,
}

impl RotationRule {
    fn is_election(&self, number: u64) -> bool {
        match self {
            Self::Interval { interval } => number > 0 && number.checked_rem(*interval) == Some(0),
            Self::Membership => false,
        }
    }

    /// Epoch that follows `header`, or `None` when the header leaves `epoch` active.
    pub fn apply<S: Scheme>(
        &self,
        epoch: &AuthorizationEpoch<S>,
        header: &Header,
    ) -> Result<Option<AuthorizationEpoch<S>>, RotationError> {
        let number = header.number();
        let update = header.update();
        let next_start = || {
            number
                .checked_add(1)
                .ok_or(RotationError::HeightOverflow(number))
        };

        let records = match (self, update) {
            (Self::Interval { .. }, None) if self.is_election(number) => {
                return Err(RotationError::MissingSignerSet(number))
            }
            (_, None) => return Ok(None),
            (Self::Interval { .. }, Some(_)) if !self.is_election(number) => {
                return Err(RotationError::UnexpectedUpdate(number))
            }
            (Self::Interval { .. }, Some(SignerUpdate::Change { .. })) => {
                return Err(RotationError::UnsupportedUpdate(number))
            }
            (_, Some(SignerUpdate::Replace { signers, quorum })) => {
                let quorum = quorum.unwrap_or(epoch.quorum());
                return AuthorizationEpoch::new(next_start()?, quorum, signers.clone())
                    .map(Some)
                    .map_err(|source| RotationError::Epoch { number, source });
            }
            (Self::Membership, Some(SignerUpdate::Change { added, removed })) => {
                membership_change(epoch, number, added, removed)?
            }
        };

        AuthorizationEpoch::new(next_start()?, epoch.quorum(), records)
            .map(Some)
            .map_err(|source| RotationError::Epoch { number, source })
    }
}

/// Removals first, then additions appended in order. Survivors keep their relative order.
fn membership_change<S: Scheme>(
    epoch: &AuthorizationEpoch<S>,
    number: u64,
    added: &[SignerRecord],
    removed: &[Address],
) -> Result<Vec<SignerRecord>, RotationError> {
    let mut records = epoch.records();

    for address in removed {
        let Some(position) = records.iter().position(|r| r.address == *address) else {
            return Err(RotationError::UnknownSigner {
                number,
                address: *address,
            });
        };
        records.remove(position);
    }

    for record in added {
        if records.iter().any(|r| r.address == record.address) {
            return Err(RotationError::DuplicateSigner {
                number,
                address: record.address,
            });
        }
        records.push(record.clone());
    }

    Ok(records)
}

impl Display for RotationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval { interval } => write!(f, "interval:{interval}"),
            Self::Membership => f.write_str("membership"),
        }
    }
}

// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use super::identity::{Address, IdentityError, SignerIdentity, SignerRecord};
use super::Scheme;

use std::collections::HashMap;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("signer {0} is listed more than once")]
    DuplicateAddress(Address),
    #[error("{0}")]
    Identity(#[from] IdentityError),
    #[error("signer set of {0} entries exceeds index range")]
    TooManySigners(usize),
}

/// Registry maps dense signer indices and addresses to identities of one epoch.
///
/// Index of a signer is its position in the list the registry was built from.
/// The registry is populated once and only read afterwards.
pub struct SignerRegistry<S: Scheme> {
    signers: Vec<SignerIdentity<S>>,
    by_address: HashMap<Address, u32>,
}

impl<S: Scheme> SignerRegistry<S> {
    pub fn new(records: Vec<SignerRecord>) -> Result<Self, RegistryError> {
        if u32::try_from(records.len()).is_err() {
            return Err(RegistryError::TooManySigners(records.len()));
        }
        let mut signers = Vec::with_capacity(records.len());
        let mut by_address = HashMap::with_capacity(records.len());

        for (index, record) in (0u32..).zip(records) {
            if by_address.insert(record.address, index).is_some() {
                return Err(RegistryError::DuplicateAddress(record.address));
            }
            signers.push(SignerIdentity::from_record(index, record)?);
        }

        Ok(Self {
            signers,
            by_address,
        })
    }

    pub fn resolve(&self, index: u32) -> Option<&SignerIdentity<S>> {
        self.signers.get(usize::try_from(index).ok()?)
    }

    pub fn resolve_by_address(&self, address: &Address) -> Option<&SignerIdentity<S>> {
        self.by_address
            .get(address)
            .and_then(|index| self.resolve(*index))
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    /// Identities ordered by index.
    pub fn iter(&self) -> impl Iterator<Item = &SignerIdentity<S>> {
        self.signers.iter()
    }
}

impl<S: Scheme> PartialEq for SignerRegistry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.signers == other.signers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestSigner;
    use energon::drand::schemes::DefaultScheme;

    #[test]
    fn indices_follow_record_order() {
        let signers = TestSigner::<DefaultScheme>::generate_n(3);
        let records: Vec<_> = signers.iter().map(TestSigner::record).collect();
        let registry = SignerRegistry::<DefaultScheme>::new(records.clone()).unwrap();

        assert_eq!(registry.len(), 3);
        for (i, record) in (0u32..).zip(&records) {
            let by_index = registry.resolve(i).unwrap();
            assert_eq!(by_index.index(), i);
            assert_eq!(by_index.address(), &record.address);

            let by_address = registry.resolve_by_address(&record.address).unwrap();
            assert_eq!(by_address.index(), i);
        }
        assert!(registry.resolve(3).is_none());
        assert!(registry
            .resolve_by_address(&Address::new([7; Address::LEN]))
            .is_none());
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let signer = TestSigner::<DefaultScheme>::generate();
        let records = vec![signer.record(), signer.record()];

        assert!(matches!(
            SignerRegistry::<DefaultScheme>::new(records),
            Err(RegistryError::DuplicateAddress(address)) if address == signer.record().address
        ));
    }
}

// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{KeyPoint, Scheme};

use energon::traits::Affine;
use sha2::Digest;
use std::fmt::{Debug, Display};
use std::str::FromStr;

/// 20-byte account identifier of a signer.
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; Address::LEN]);

impl Address {
    pub const LEN: usize = 20;

    pub fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Derives the address of a public key: trailing 20 bytes of its SHA-256 digest.
    pub fn from_key(key: &[u8]) -> Self {
        let digest = sha2::Sha256::digest(key);
        let mut bytes = [0; Self::LEN];
        bytes.copy_from_slice(&digest[digest.len() - Self::LEN..]);

        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("expected 20 bytes hex address, received {0}")]
pub struct InvalidAddress(String);

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let raw = data.strip_prefix("0x").unwrap_or(data);
        let bytes = hex::decode(raw).map_err(|_| InvalidAddress(data.into()))?;
        let bytes = bytes.try_into().map_err(|_| InvalidAddress(data.into()))?;

        Ok(Self(bytes))
    }
}

/// Persisted form of a signer: address and serialized public key.
///
/// Records are what block headers and configuration files carry; they become
/// [`SignerIdentity`] once an epoch assigns them an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerRecord {
    pub address: Address,
    pub key: Vec<u8>,
}

impl SignerRecord {
    pub fn new(address: Address, key: Vec<u8>) -> Self {
        Self { address, key }
    }

    /// Record whose address is derived from the key (see [`Address::from_key`]).
    pub fn from_key(key: Vec<u8>) -> Self {
        Self {
            address: Address::from_key(&key),
            key,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("signer {0} has an invalid public key")]
    InvalidKey(Address),
}

/// Signer identity is a record bound to its index within one authorization epoch.
/// Identities are created once when the epoch is built and never mutated.
pub struct SignerIdentity<S: Scheme> {
    index: u32,
    address: Address,
    key: KeyPoint<S>,
    /// Serialized key as it was received, kept for hashing and persistence.
    raw_key: Vec<u8>,
}

impl<S: Scheme> SignerIdentity<S> {
    pub fn from_record(index: u32, record: SignerRecord) -> Result<Self, IdentityError> {
        let SignerRecord { address, key } = record;
        let Ok(point) = Affine::deserialize(&key) else {
            return Err(IdentityError::InvalidKey(address));
        };

        Ok(Self {
            index,
            address,
            key: point,
            raw_key: key,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn key(&self) -> &KeyPoint<S> {
        &self.key
    }

    pub fn raw_key(&self) -> &[u8] {
        &self.raw_key
    }

    pub fn to_record(&self) -> SignerRecord {
        SignerRecord::new(self.address, self.raw_key.clone())
    }
}

impl<S: Scheme> PartialEq for SignerIdentity<S> {
    fn eq(&self, other: &Self) -> bool {
        // Point is derived from `raw_key`.
        self.index == other.index && self.address == other.address && self.raw_key == other.raw_key
    }
}

impl<S: Scheme> Debug for SignerIdentity<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerIdentity")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("key", &hex::encode(self.raw_key.get(..4).unwrap_or_default()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energon::drand::schemes::DefaultScheme;

    #[test]
    fn address_text_forms() {
        let address = Address::new([0xab; Address::LEN]);
        let text = address.to_string();
        assert_eq!(text, format!("0x{}", "ab".repeat(20)));
        assert_eq!(text.parse::<Address>().unwrap(), address);
        assert_eq!(text[2..].parse::<Address>().unwrap(), address);

        assert!("0x1234".parse::<Address>().is_err());
        assert!("zz".repeat(20).parse::<Address>().is_err());
    }

    #[test]
    fn address_from_key_is_stable() {
        let a = Address::from_key(b"key material");
        let b = Address::from_key(b"key material");
        let c = Address::from_key(b"other material");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn invalid_key_is_rejected() {
        let record = SignerRecord::from_key(vec![1, 2, 3]);
        let address = record.address;
        assert_eq!(
            SignerIdentity::<DefaultScheme>::from_record(0, record).unwrap_err(),
            IdentityError::InvalidKey(address)
        );
    }

    #[test]
    fn identity_keeps_record() {
        let signer = crate::test::TestSigner::<DefaultScheme>::generate();
        let identity = SignerIdentity::<DefaultScheme>::from_record(3, signer.record()).unwrap();
        assert_eq!(identity.index(), 3);
        assert_eq!(identity.to_record(), signer.record());
    }
}

// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

mod identity;
mod registry;
pub mod toml;

pub use energon::drand::traits::DrandScheme as Scheme;
pub use energon::points::KeyPoint;
pub use identity::{Address, IdentityError, InvalidAddress, SignerIdentity, SignerRecord};
pub use registry::{RegistryError, SignerRegistry};

pub trait Hash {
    type Hasher;

    fn hash(&self) -> [u8; 32];
}

//! Primitive types shared by the LogSig crates: the hash algorithm registry
//! and the self-describing `Imprint` digest container.

pub use crate::{
    hash_algorithm::HashAlgorithm,
    imprint::{Imprint, InvalidImprint},
};

mod hash_algorithm;
mod imprint;

use thiserror::Error;

use crate::HashAlgorithm;

/// A self-describing hash value: one algorithm-id byte followed by the
/// digest. The digest length is implied by the id.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Imprint(Vec<u8>);

#[derive(Debug, Error, PartialEq)]
pub enum InvalidImprint {
    #[error("imprint is empty")]
    Empty,

    #[error("unknown hash algorithm id {0:#04x}")]
    UnknownAlgorithm(u8),

    #[error("digest length {got} does not match algorithm (expected {expected})")]
    LengthMismatch { got: usize, expected: usize },
}

impl Imprint {
    /// Builds an imprint from an algorithm and its raw digest.
    pub fn new(algorithm: HashAlgorithm, digest: &[u8]) -> Result<Self, InvalidImprint> {
        if digest.len() != algorithm.len() {
            return Err(InvalidImprint::LengthMismatch {
                got: digest.len(),
                expected: algorithm.len(),
            });
        }
        let mut bytes = Vec::with_capacity(1 + digest.len());
        bytes.push(algorithm.id());
        bytes.extend_from_slice(digest);
        Ok(Self(bytes))
    }

    /// The all-zeroes digest of `algorithm`; the seed of a new hash chain.
    pub fn zero(algorithm: HashAlgorithm) -> Self {
        let mut bytes = vec![0u8; 1 + algorithm.len()];
        bytes[0] = algorithm.id();
        Self(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, InvalidImprint> {
        let (&id, digest) = bytes.split_first().ok_or(InvalidImprint::Empty)?;
        let algorithm =
            HashAlgorithm::from_id(id).ok_or(InvalidImprint::UnknownAlgorithm(id))?;
        if digest.len() != algorithm.len() {
            return Err(InvalidImprint::LengthMismatch {
                got: digest.len(),
                expected: algorithm.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        // The constructor validated the id.
        HashAlgorithm::from_id(self.0[0]).unwrap_or(HashAlgorithm::DEFAULT)
    }

    pub fn digest(&self) -> &[u8] {
        &self.0[1..]
    }

    /// The full id-prefixed byte representation, as written into TLV values
    /// and mixed into parent node hashes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Byte length of the full representation (1 + digest length).
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Display for Imprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}:{}", self.0[0], hex::encode(&self.0[1..]))
    }
}

impl std::fmt::Debug for Imprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Imprint({self})")
    }
}

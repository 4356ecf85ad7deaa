use logsig_basic_types::{HashAlgorithm, Imprint};
use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use sha3::{Sha3_256, Sha3_384, Sha3_512};

/// Resolves a configured algorithm name, falling back to the default for
/// unsupported or untrusted selections.
pub(crate) fn select_algorithm(name: Option<&str>, role: &str) -> HashAlgorithm {
    let Some(name) = name else {
        return HashAlgorithm::DEFAULT;
    };
    match HashAlgorithm::by_name(name) {
        None => {
            tracing::warn!("{role} algorithm '{name}' is not supported - using default");
            HashAlgorithm::DEFAULT
        }
        Some(algorithm) if !algorithm.is_trusted() => {
            tracing::warn!("{role} algorithm '{name}' is not trusted - using default");
            HashAlgorithm::DEFAULT
        }
        Some(algorithm) => algorithm,
    }
}

enum InnerHasher {
    Sha1(Sha1),
    Sha2_256(Sha256),
    Ripemd160(Ripemd160),
    Sha2_384(Sha384),
    Sha2_512(Sha512),
    Sha3_256(Sha3_256),
    Sha3_384(Sha3_384),
    Sha3_512(Sha3_512),
}

/// Incremental hasher producing algorithm-id-prefixed imprints.
pub(crate) struct DataHasher {
    algorithm: HashAlgorithm,
    inner: InnerHasher,
}

impl DataHasher {
    pub(crate) fn open(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::Sha1 => InnerHasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha2_256 => InnerHasher::Sha2_256(Sha256::new()),
            HashAlgorithm::Ripemd160 => InnerHasher::Ripemd160(Ripemd160::new()),
            HashAlgorithm::Sha2_384 => InnerHasher::Sha2_384(Sha384::new()),
            HashAlgorithm::Sha2_512 => InnerHasher::Sha2_512(Sha512::new()),
            HashAlgorithm::Sha3_256 => InnerHasher::Sha3_256(Sha3_256::new()),
            HashAlgorithm::Sha3_384 => InnerHasher::Sha3_384(Sha3_384::new()),
            HashAlgorithm::Sha3_512 => InnerHasher::Sha3_512(Sha3_512::new()),
        };
        Self { algorithm, inner }
    }

    pub(crate) fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub(crate) fn reset(&mut self) {
        match &mut self.inner {
            InnerHasher::Sha1(h) => Digest::reset(h),
            InnerHasher::Sha2_256(h) => Digest::reset(h),
            InnerHasher::Ripemd160(h) => Digest::reset(h),
            InnerHasher::Sha2_384(h) => Digest::reset(h),
            InnerHasher::Sha2_512(h) => Digest::reset(h),
            InnerHasher::Sha3_256(h) => Digest::reset(h),
            InnerHasher::Sha3_384(h) => Digest::reset(h),
            InnerHasher::Sha3_512(h) => Digest::reset(h),
        }
    }

    pub(crate) fn add(&mut self, data: &[u8]) {
        match &mut self.inner {
            InnerHasher::Sha1(h) => h.update(data),
            InnerHasher::Sha2_256(h) => h.update(data),
            InnerHasher::Ripemd160(h) => h.update(data),
            InnerHasher::Sha2_384(h) => h.update(data),
            InnerHasher::Sha2_512(h) => h.update(data),
            InnerHasher::Sha3_256(h) => h.update(data),
            InnerHasher::Sha3_384(h) => h.update(data),
            InnerHasher::Sha3_512(h) => h.update(data),
        }
    }

    pub(crate) fn add_imprint(&mut self, imprint: &Imprint) {
        self.add(imprint.as_bytes());
    }

    pub(crate) fn close(&mut self) -> Imprint {
        let digest: Vec<u8> = match &mut self.inner {
            InnerHasher::Sha1(h) => h.finalize_reset().to_vec(),
            InnerHasher::Sha2_256(h) => h.finalize_reset().to_vec(),
            InnerHasher::Ripemd160(h) => h.finalize_reset().to_vec(),
            InnerHasher::Sha2_384(h) => h.finalize_reset().to_vec(),
            InnerHasher::Sha2_512(h) => h.finalize_reset().to_vec(),
            InnerHasher::Sha3_256(h) => h.finalize_reset().to_vec(),
            InnerHasher::Sha3_384(h) => h.finalize_reset().to_vec(),
            InnerHasher::Sha3_512(h) => h.finalize_reset().to_vec(),
        };
        Imprint::new(self.algorithm, &digest).expect("digest length matches the registry")
    }
}

impl std::fmt::Debug for DataHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataHasher")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha2_256_known_vector() {
        let mut hasher = DataHasher::open(HashAlgorithm::Sha2_256);
        hasher.add(b"abc");
        let imprint = hasher.close();
        assert_eq!(imprint.as_bytes()[0], 0x01);
        assert_eq!(
            hex::encode(imprint.digest()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn close_resets_for_reuse() {
        let mut hasher = DataHasher::open(HashAlgorithm::Sha2_256);
        hasher.add(b"first");
        let first = hasher.close();
        hasher.add(b"first");
        assert_eq!(hasher.close(), first);
    }

    #[test]
    fn reset_discards_pending_input() {
        let mut hasher = DataHasher::open(HashAlgorithm::Sha2_512);
        hasher.add(b"garbage");
        hasher.reset();
        hasher.add(b"value");
        let imprint = hasher.close();

        let mut fresh = DataHasher::open(HashAlgorithm::Sha2_512);
        fresh.add(b"value");
        assert_eq!(fresh.close(), imprint);
    }

    #[test]
    fn digest_lengths_match_registry() {
        for algorithm in [
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha2_256,
            HashAlgorithm::Ripemd160,
            HashAlgorithm::Sha2_384,
            HashAlgorithm::Sha2_512,
            HashAlgorithm::Sha3_256,
            HashAlgorithm::Sha3_384,
            HashAlgorithm::Sha3_512,
        ] {
            let mut hasher = DataHasher::open(algorithm);
            hasher.add(b"x");
            assert_eq!(hasher.close().digest().len(), algorithm.len());
        }
    }

    #[test]
    fn fallback_for_unsupported_and_untrusted() {
        assert_eq!(select_algorithm(None, "hash"), HashAlgorithm::DEFAULT);
        assert_eq!(
            select_algorithm(Some("md5"), "hash"),
            HashAlgorithm::DEFAULT
        );
        assert_eq!(
            select_algorithm(Some("sha1"), "hash"),
            HashAlgorithm::DEFAULT
        );
        assert_eq!(
            select_algorithm(Some("SHA2-512"), "hash"),
            HashAlgorithm::Sha2_512
        );
    }
}

use serde::{Deserialize, Serialize};

/// Hash algorithms usable for log signing, with their KSI algorithm ids.
///
/// The one-byte id doubles as the imprint prefix, so the set here must stay
/// in sync with what verifiers understand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    Sha1,
    Sha2_256,
    Ripemd160,
    Sha2_384,
    Sha2_512,
    Sha3_256,
    Sha3_384,
    Sha3_512,
}

impl HashAlgorithm {
    pub const DEFAULT: HashAlgorithm = HashAlgorithm::Sha2_256;

    pub const fn id(self) -> u8 {
        match self {
            HashAlgorithm::Sha1 => 0x00,
            HashAlgorithm::Sha2_256 => 0x01,
            HashAlgorithm::Ripemd160 => 0x02,
            HashAlgorithm::Sha2_384 => 0x04,
            HashAlgorithm::Sha2_512 => 0x05,
            HashAlgorithm::Sha3_256 => 0x08,
            HashAlgorithm::Sha3_384 => 0x09,
            HashAlgorithm::Sha3_512 => 0x0a,
        }
    }

    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(HashAlgorithm::Sha1),
            0x01 => Some(HashAlgorithm::Sha2_256),
            0x02 => Some(HashAlgorithm::Ripemd160),
            0x04 => Some(HashAlgorithm::Sha2_384),
            0x05 => Some(HashAlgorithm::Sha2_512),
            0x08 => Some(HashAlgorithm::Sha3_256),
            0x09 => Some(HashAlgorithm::Sha3_384),
            0x0a => Some(HashAlgorithm::Sha3_512),
            _ => None,
        }
    }

    /// Looks an algorithm up by its common name, case-insensitively.
    pub fn by_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sha1" => Some(HashAlgorithm::Sha1),
            "sha2256" | "sha256" | "default" => Some(HashAlgorithm::Sha2_256),
            "ripemd160" => Some(HashAlgorithm::Ripemd160),
            "sha2384" | "sha384" => Some(HashAlgorithm::Sha2_384),
            "sha2512" | "sha512" => Some(HashAlgorithm::Sha2_512),
            "sha3256" => Some(HashAlgorithm::Sha3_256),
            "sha3384" => Some(HashAlgorithm::Sha3_384),
            "sha3512" => Some(HashAlgorithm::Sha3_512),
            _ => None,
        }
    }

    /// Digest length in bytes.
    pub const fn len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha2_256 => 32,
            HashAlgorithm::Ripemd160 => 20,
            HashAlgorithm::Sha2_384 => 48,
            HashAlgorithm::Sha2_512 => 64,
            HashAlgorithm::Sha3_256 => 32,
            HashAlgorithm::Sha3_384 => 48,
            HashAlgorithm::Sha3_512 => 64,
        }
    }

    /// Whether the algorithm is still considered collision resistant.
    pub const fn is_trusted(self) -> bool {
        !matches!(self, HashAlgorithm::Sha1)
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha2_256 => "SHA2-256",
            HashAlgorithm::Ripemd160 => "RIPEMD-160",
            HashAlgorithm::Sha2_384 => "SHA2-384",
            HashAlgorithm::Sha2_512 => "SHA2-512",
            HashAlgorithm::Sha3_256 => "SHA3-256",
            HashAlgorithm::Sha3_384 => "SHA3-384",
            HashAlgorithm::Sha3_512 => "SHA3-512",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trip() {
        for alg in [
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha2_256,
            HashAlgorithm::Ripemd160,
            HashAlgorithm::Sha2_384,
            HashAlgorithm::Sha2_512,
            HashAlgorithm::Sha3_256,
            HashAlgorithm::Sha3_384,
            HashAlgorithm::Sha3_512,
        ] {
            assert_eq!(HashAlgorithm::from_id(alg.id()), Some(alg));
        }
        assert_eq!(HashAlgorithm::from_id(0x03), None);
        assert_eq!(HashAlgorithm::from_id(0xff), None);
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            HashAlgorithm::by_name("SHA2-256"),
            Some(HashAlgorithm::Sha2_256)
        );
        assert_eq!(
            HashAlgorithm::by_name("sha-256"),
            Some(HashAlgorithm::Sha2_256)
        );
        assert_eq!(
            HashAlgorithm::by_name("RIPEMD-160"),
            Some(HashAlgorithm::Ripemd160)
        );
        assert_eq!(HashAlgorithm::by_name("md5"), None);
    }

    #[test]
    fn sha1_is_untrusted() {
        assert!(!HashAlgorithm::Sha1.is_trusted());
        assert!(HashAlgorithm::Sha2_256.is_trusted());
    }
}

pub use self::signer::LogSignerConfig;

pub mod signer;

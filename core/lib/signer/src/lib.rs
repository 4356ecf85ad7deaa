//! Online log signing engine.
//!
//! Records appended to a log are folded one at a time into a per-block
//! Merkle tree; each block's root is signed by a remote aggregation service
//! and the resulting signatures, together with the block headers and
//! optional record/tree hashes, are serialized into tamper-evident
//! signature files next to the log. Consecutive blocks are chained through
//! the last leaf hash, which also survives process restarts via a small
//! state file.
//!
//! The expected calling sequence is:
//!
//! ```text
//! let signer = LogSigner::new(config, backend)?;
//! signer.open_log(path).await?;
//! for each record: signer.append_record(rec).await?;
//! signer.close_log().await?;
//! signer.shutdown().await;
//! ```

mod block;
mod context;
mod files;
mod hasher;
mod merkle;
mod metrics;
mod queue;
mod state;
mod tlv;
mod types;
mod worker;

#[cfg(test)]
mod tests;

pub use context::{LogSigner, SigningBackend};
pub use types::{SignerError, SignerResult};

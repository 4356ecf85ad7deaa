use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration of the log signing engine.
///
/// Loading this from the environment or a config file is the host's concern;
/// the engine only consumes the resolved struct.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LogSignerConfig {
    /// Aggregator endpoint URI, or several URIs separated by `|` for a
    /// high-availability setup.
    pub aggregator_uri: String,
    /// Login id for the aggregation service.
    pub aggregator_id: Option<String>,
    /// HMAC key for the aggregation service.
    pub aggregator_key: Option<String>,

    /// Hash algorithm name for record and tree hashes.
    pub hash_algorithm: Option<String>,
    /// HMAC algorithm name for aggregator requests.
    pub hmac_algorithm: Option<String>,

    /// Configured block level limit; a block holds at most
    /// `2^(level_limit - 1)` leaves. The aggregator may push a lower limit.
    pub block_level_limit: u64,
    /// Wall-clock limit for one block, in seconds. `None` disables the timer.
    pub block_time_limit_secs: Option<u64>,
    /// Max outstanding aggregation requests; the aggregator may push its own.
    pub max_requests: Option<u64>,

    /// Write a record-hash TLV for each leaf.
    pub keep_record_hashes: bool,
    /// Write tree-hash TLVs for interim nodes.
    pub keep_tree_hashes: bool,

    /// Path of the random device used for block IVs.
    pub random_source: Option<String>,

    /// Creation mode for signature/state files.
    pub file_create_mode: Option<u32>,
    /// Creation mode for parent directories.
    pub dir_create_mode: Option<u32>,
    pub file_uid: Option<u32>,
    pub file_gid: Option<u32>,
    pub dir_uid: Option<u32>,
    pub dir_gid: Option<u32>,
}

impl LogSignerConfig {
    pub fn block_time_limit(&self) -> Option<Duration> {
        match self.block_time_limit_secs {
            None | Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        }
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests.unwrap_or(1 << 8)
    }

    pub fn file_create_mode(&self) -> u32 {
        self.file_create_mode.unwrap_or(0o644)
    }

    pub fn dir_create_mode(&self) -> u32 {
        self.dir_create_mode.unwrap_or(0o700)
    }
}

impl LogSignerConfig {
    // Creates a config object suitable for use in unit tests.
    pub fn for_tests() -> Self {
        Self {
            aggregator_uri: "ksi+tcp://localhost:3332".to_string(),
            aggregator_id: Some("test-user".to_string()),
            aggregator_key: Some("test-key".to_string()),
            hash_algorithm: None,
            hmac_algorithm: None,
            block_level_limit: 12,
            block_time_limit_secs: None,
            max_requests: None,
            keep_record_hashes: true,
            keep_tree_hashes: false,
            random_source: None,
            file_create_mode: None,
            dir_create_mode: None,
            file_uid: None,
            file_gid: None,
            dir_uid: None,
            dir_gid: None,
        }
    }
}

//! Per-log file handle: the block-data file and the state of the block
//! currently being accumulated.

use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use logsig_basic_types::{HashAlgorithm, Imprint};
use rand::RngCore;
use tokio::time::Instant;

use crate::{
    files::FileOptions,
    hasher::DataHasher,
    merkle::{calc_level, hash_node_pair, TreeAccumulator},
    metrics::METRICS,
    state,
    tlv,
    types::{SignerError, SignerResult},
};

pub(crate) const BLOCK_CLOSE_REASON_KEY: &str = "com.guardtime.blockCloseReason";
pub(crate) const DEFAULT_RANDOM_SOURCE: &str = "/dev/urandom";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SigningMode {
    Synchronous,
    Asynchronous,
}

/// A closed block, ready for signing dispatch.
#[derive(Debug)]
pub(crate) struct FinishedBlock {
    pub root: Imprint,
    pub record_count: u64,
    pub level: u8,
}

/// State of one open log: the block-data file plus the current block.
pub(crate) struct LogFile {
    block_file: BufWriter<File>,
    state_path: PathBuf,
    hasher: DataHasher,
    tree: TreeAccumulator,
    last_leaf: Imprint,
    iv: Option<Vec<u8>>,
    in_block: bool,
    block_started: Instant,
    block_size_limit: u64,
    keep_record_hashes: bool,
    keep_tree_hashes: bool,
}

impl LogFile {
    pub(crate) fn new(
        block_file: BufWriter<File>,
        state_path: PathBuf,
        algorithm: HashAlgorithm,
        last_leaf: Imprint,
        keep_record_hashes: bool,
        keep_tree_hashes: bool,
    ) -> Self {
        Self {
            block_file,
            state_path,
            hasher: DataHasher::open(algorithm),
            tree: TreeAccumulator::new(),
            last_leaf,
            iv: None,
            in_block: false,
            block_started: Instant::now(),
            block_size_limit: 0,
            keep_record_hashes,
            keep_tree_hashes,
        }
    }

    pub(crate) fn init_block(&mut self, effective_level_limit: u64, random_source: Option<&Path>) {
        self.iv = Some(seed_iv(self.hasher.algorithm(), random_source));
        self.tree = TreeAccumulator::new();
        self.in_block = true;
        self.block_started = Instant::now();
        self.block_size_limit = 1 << (effective_level_limit - 1);
    }

    pub(crate) fn in_block(&self) -> bool {
        self.in_block
    }

    pub(crate) fn record_count(&self) -> u64 {
        self.tree.record_count()
    }

    pub(crate) fn block_elapsed(&self) -> Duration {
        self.block_started.elapsed()
    }

    /// The block is full and must be finished before the next record.
    pub(crate) fn needs_rotation(&self) -> bool {
        self.in_block && self.tree.record_count() >= self.block_size_limit
    }

    /// Folds one record (or metadata record) into the block.
    pub(crate) fn add_leaf(&mut self, data: &[u8], metadata: bool) -> SignerResult<()> {
        let iv = self
            .iv
            .as_deref()
            .ok_or_else(|| SignerError::Internal("no active block".to_string()))?;

        let mask = {
            self.hasher.reset();
            self.hasher.add_imprint(&self.last_leaf);
            self.hasher.add(iv);
            self.hasher.close()
        };
        let leaf_hash = {
            self.hasher.reset();
            self.hasher.add(data);
            self.hasher.close()
        };

        if self.tree.is_empty() {
            tlv::write_block_header(
                &mut self.block_file,
                self.hasher.algorithm().id(),
                iv,
                &self.last_leaf,
            )?;
        }

        // A metadata record is stored verbatim so verifiers can rebuild the
        // exact leaf input.
        if metadata {
            self.block_file.write_all(data)?;
        }
        if self.keep_record_hashes {
            tlv::write_imprint_tlv(&mut self.block_file, tlv::TAG_RECORD_HASH, &leaf_hash)?;
        }

        // Normal and metadata leaves blind in opposite operand order.
        let node = if metadata {
            hash_node_pair(&mut self.hasher, &leaf_hash, &mask, 1)
        } else {
            hash_node_pair(&mut self.hasher, &mask, &leaf_hash, 1)
        };
        if self.keep_tree_hashes {
            tlv::write_imprint_tlv(&mut self.block_file, tlv::TAG_TREE_HASH, &node)?;
        }
        self.last_leaf = node.clone();

        let interims = self.tree.push_node(&mut self.hasher, node);
        if self.keep_tree_hashes {
            for interim in &interims {
                tlv::write_imprint_tlv(&mut self.block_file, tlv::TAG_TREE_HASH, interim)?;
            }
        }

        METRICS.records_hashed.inc();
        Ok(())
    }

    pub(crate) fn add_metadata(&mut self, key: &str, value: &str) -> SignerResult<()> {
        let encoded = tlv::encode_metadata(self.tree.record_count(), key, value)?;
        self.add_leaf(&encoded, true)
    }

    /// Folds the remaining roots into the block root and closes the block.
    /// Returns `None` for an empty block, which closes silently.
    pub(crate) fn finish_block(&mut self) -> SignerResult<Option<FinishedBlock>> {
        let finished = match self.tree.finish(&mut self.hasher) {
            None => None,
            Some((root, interims)) => {
                if self.keep_tree_hashes {
                    for interim in &interims {
                        tlv::write_imprint_tlv(&mut self.block_file, tlv::TAG_TREE_HASH, interim)?;
                    }
                }
                let record_count = self.tree.record_count();
                // Doubling the leaf count accounts for the blinding masks.
                let level = calc_level(2 * record_count);
                METRICS.blocks_finished.inc();
                Some(FinishedBlock {
                    root,
                    record_count,
                    level,
                })
            }
        };
        self.iv = None;
        self.in_block = false;
        Ok(finished)
    }

    pub(crate) fn write_signature(&mut self, record_count: u64, der: &[u8]) -> SignerResult<()> {
        tlv::write_signature(&mut self.block_file, record_count, der)?;
        Ok(())
    }

    pub(crate) fn write_no_signature(
        &mut self,
        record_count: u64,
        root: &Imprint,
        error_text: Option<&str>,
    ) -> SignerResult<()> {
        tlv::write_no_signature(&mut self.block_file, record_count, root, error_text)?;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> SignerResult<()> {
        self.block_file.flush()?;
        Ok(())
    }

    pub(crate) fn persist_state(&self, options: &FileOptions) -> std::io::Result<()> {
        state::write_state_file(&self.state_path, &self.last_leaf, options)
    }
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("state_path", &self.state_path)
            .field("in_block", &self.in_block)
            .field("records", &self.tree.record_count())
            .finish()
    }
}

/// Seeds a block IV of digest length from the random source. An unreadable
/// source degrades to the process RNG with a warning.
fn seed_iv(algorithm: HashAlgorithm, random_source: Option<&Path>) -> Vec<u8> {
    let path = random_source.unwrap_or_else(|| Path::new(DEFAULT_RANDOM_SOURCE));
    let mut iv = vec![0u8; algorithm.len()];

    let read = File::open(path).and_then(|mut file| file.read_exact(&mut iv));
    if let Err(err) = read {
        tracing::warn!(
            "cannot seed block IV from '{}': {err} - falling back to the process RNG",
            path.display()
        );
        rand::rngs::OsRng.fill_bytes(&mut iv);
    }
    iv
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::files::{open_output_file, FileOptions, LOGSIG_FILE_HEADER};
    use crate::tlv::decode;

    fn open_log_file(dir: &tempfile::TempDir) -> (LogFile, PathBuf) {
        let path = dir.path().join("app.log.logsig");
        let writer = open_output_file(&path, &FileOptions::default(), LOGSIG_FILE_HEADER).unwrap();
        let file = LogFile::new(
            writer,
            dir.path().join("app.log.ksistate"),
            HashAlgorithm::Sha2_256,
            Imprint::zero(HashAlgorithm::Sha2_256),
            true,
            false,
        );
        (file, path)
    }

    #[test]
    fn first_leaf_emits_the_block_header() {
        let dir = tempfile::tempdir().unwrap();
        let (mut file, path) = open_log_file(&dir);

        file.init_block(2, None);
        file.add_leaf(b"A\n", false).unwrap();
        file.flush().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], LOGSIG_FILE_HEADER);
        let records = decode::read_all(&bytes[8..]);
        assert_eq!(records[0].0, tlv::TAG_BLOCK_HEADER);
        assert_eq!(records[1].0, tlv::TAG_RECORD_HASH);

        let header_fields = decode::read_all(&records[0].1);
        assert_eq!(header_fields[0], (0x01, vec![0x01]));
        assert_eq!(header_fields[1].1.len(), 32);
        assert_eq!(
            header_fields[2].1,
            Imprint::zero(HashAlgorithm::Sha2_256).as_bytes()
        );
    }

    #[test]
    fn rotation_triggers_at_the_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut file, _path) = open_log_file(&dir);

        // Level limit 2 means two leaves per block.
        file.init_block(2, None);
        assert!(!file.needs_rotation());
        file.add_leaf(b"a", false).unwrap();
        assert!(!file.needs_rotation());
        file.add_leaf(b"b", false).unwrap();
        assert!(file.needs_rotation());
    }

    #[test]
    fn empty_block_finish_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut file, path) = open_log_file(&dir);

        file.init_block(4, None);
        assert!(file.finish_block().unwrap().is_none());
        assert!(!file.in_block());
        file.flush().unwrap();

        assert_eq!(fs::read(&path).unwrap(), LOGSIG_FILE_HEADER);
    }

    #[test]
    fn signing_level_doubles_the_leaf_count() {
        let dir = tempfile::tempdir().unwrap();
        let (mut file, _path) = open_log_file(&dir);

        file.init_block(8, None);
        for i in 0..3u8 {
            file.add_leaf(&[i], false).unwrap();
        }
        let finished = file.finish_block().unwrap().unwrap();
        assert_eq!(finished.record_count, 3);
        assert_eq!(finished.level, calc_level(6));
        assert_eq!(finished.level, 3);
    }

    #[test]
    fn identical_records_produce_distinct_tree_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log.logsig");
        let writer = open_output_file(&path, &FileOptions::default(), LOGSIG_FILE_HEADER).unwrap();
        let mut file = LogFile::new(
            writer,
            dir.path().join("app.log.ksistate"),
            HashAlgorithm::Sha2_256,
            Imprint::zero(HashAlgorithm::Sha2_256),
            true,
            true,
        );

        file.init_block(4, None);
        file.add_leaf(b"same", false).unwrap();
        file.add_leaf(b"same", false).unwrap();
        file.flush().unwrap();

        let bytes = fs::read(&path).unwrap();
        let records = decode::read_all(&bytes[8..]);
        let record_hashes: Vec<&Vec<u8>> = records
            .iter()
            .filter(|(tag, _)| *tag == tlv::TAG_RECORD_HASH)
            .map(|(_, value)| value)
            .collect();
        let tree_hashes: Vec<&Vec<u8>> = records
            .iter()
            .filter(|(tag, _)| *tag == tlv::TAG_TREE_HASH)
            .map(|(_, value)| value)
            .collect();

        // Same input, same record hash; the mask still unlinks the leaves.
        assert_eq!(record_hashes[0], record_hashes[1]);
        assert_ne!(tree_hashes[0], tree_hashes[1]);
    }

    #[test]
    fn iv_seeding_survives_a_bad_random_source() {
        let iv = seed_iv(
            HashAlgorithm::Sha2_256,
            Some(Path::new("/nonexistent/random")),
        );
        assert_eq!(iv.len(), 32);
    }
}

use std::{path::Path, sync::Arc};

use logsig_basic_types::{HashAlgorithm, Imprint};
use logsig_config::LogSignerConfig;
use logsig_ksi_client::{
    test_utils::{MockAggregator, MockServiceHandle},
    AggregatorOps,
};

use crate::{
    context::{LogSigner, SigningBackend},
    hasher::DataHasher,
    merkle::hash_node_pair,
    tlv::decode,
};

pub(crate) fn test_config() -> LogSignerConfig {
    LogSignerConfig::for_tests()
}

/// Signer over a controllable asynchronous mock service.
pub(crate) fn async_signer(config: LogSignerConfig) -> (LogSigner, MockServiceHandle) {
    let handle = MockServiceHandle::new();
    let signer = LogSigner::new(
        config,
        SigningBackend::Asynchronous(Box::new(handle.service())),
    )
    .expect("signer construction");
    (signer, handle)
}

/// Signer over a synchronous mock aggregator.
pub(crate) fn sync_signer(
    config: LogSignerConfig,
    aggregator: MockAggregator,
) -> (LogSigner, Arc<MockAggregator>) {
    let aggregator = Arc::new(aggregator);
    let concrete: Arc<MockAggregator> = Arc::clone(&aggregator);
    let backend: Arc<dyn AggregatorOps> = concrete;
    let signer = LogSigner::new(config, SigningBackend::Synchronous(backend))
        .expect("signer construction");
    (signer, aggregator)
}

/// Reads a signature output file, checks its magic and returns the TLV
/// stream behind it.
pub(crate) fn read_tlv_file(path: &Path, magic: &[u8]) -> Vec<(u16, Vec<u8>)> {
    let bytes = std::fs::read(path)
        .unwrap_or_else(|err| panic!("cannot read '{}': {err}", path.display()));
    assert_eq!(&bytes[..magic.len()], magic, "file magic");
    decode::read_all(&bytes[magic.len()..])
}

pub(crate) fn sub_tlvs(value: &[u8]) -> Vec<(u16, Vec<u8>)> {
    decode::read_all(value)
}

/// Reference re-computation of the leaf construction, for verifying what
/// the engine wrote.
pub(crate) struct ReferenceHasher {
    hasher: DataHasher,
}

impl ReferenceHasher {
    pub(crate) fn new() -> Self {
        Self {
            hasher: DataHasher::open(HashAlgorithm::Sha2_256),
        }
    }

    pub(crate) fn imprint(&mut self, data: &[u8]) -> Imprint {
        self.hasher.reset();
        self.hasher.add(data);
        self.hasher.close()
    }

    pub(crate) fn mask(&mut self, last_leaf: &Imprint, iv: &[u8]) -> Imprint {
        self.hasher.reset();
        self.hasher.add_imprint(last_leaf);
        self.hasher.add(iv);
        self.hasher.close()
    }

    pub(crate) fn node(&mut self, left: &Imprint, right: &Imprint, level: u8) -> Imprint {
        hash_node_pair(&mut self.hasher, left, right, level)
    }

    /// The level-1 node of a normal record leaf.
    pub(crate) fn record_leaf(&mut self, mask: &Imprint, record: &[u8]) -> Imprint {
        let record_hash = self.imprint(record);
        self.node(mask, &record_hash, 1)
    }

    /// The level-1 node of a metadata leaf (operands reversed).
    pub(crate) fn metadata_leaf(&mut self, mask: &Imprint, encoded: &[u8]) -> Imprint {
        let metadata_hash = self.imprint(encoded);
        self.node(&metadata_hash, mask, 1)
    }
}

/// Parsed fields of a block header TLV value.
pub(crate) struct BlockHeader {
    pub algorithm_id: u8,
    pub iv: Vec<u8>,
    pub last_leaf: Imprint,
}

pub(crate) fn parse_block_header(value: &[u8]) -> BlockHeader {
    let fields = sub_tlvs(value);
    assert_eq!(fields.len(), 3, "block header sub-TLVs");
    assert_eq!(fields[0].0, 0x01);
    assert_eq!(fields[1].0, 0x02);
    assert_eq!(fields[2].0, 0x03);
    BlockHeader {
        algorithm_id: fields[0].1[0],
        iv: fields[1].1.clone(),
        last_leaf: Imprint::from_bytes(fields[2].1.clone()).expect("last leaf imprint"),
    }
}

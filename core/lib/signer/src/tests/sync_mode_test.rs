//! Synchronous-mode end-to-end tests over the single `.logsig` file.

use logsig_basic_types::{HashAlgorithm, Imprint};
use logsig_ksi_client::{test_utils::MockAggregator, AggregatorConfig};

use crate::{
    block::BLOCK_CLOSE_REASON_KEY,
    files::LOGSIG_FILE_HEADER,
    merkle::calc_level,
    tests::utils::{
        parse_block_header, read_tlv_file, sub_tlvs, sync_signer, test_config, ReferenceHasher,
    },
    tlv,
};

const FILE_CLOSURE_REASON: &str = "Block closed due to file closure.";

#[tokio::test]
async fn single_record_produces_a_signed_block() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let (signer, aggregator) = sync_signer(test_config(), MockAggregator::new());

    signer.open_log(&log).await.unwrap();
    signer.append_record(b"A\n").await.unwrap();
    signer.close_log().await.unwrap();
    signer.shutdown().await;

    let records = read_tlv_file(&dir.path().join("app.log.logsig"), LOGSIG_FILE_HEADER);
    let tags: Vec<u16> = records.iter().map(|(tag, _)| *tag).collect();
    assert_eq!(
        tags,
        [
            tlv::TAG_BLOCK_HEADER,
            tlv::TAG_RECORD_HASH,
            tlv::TAG_METADATA,
            tlv::TAG_RECORD_HASH,
            tlv::TAG_BLOCK_SIGNATURE,
        ]
    );

    let header = parse_block_header(&records[0].1);
    assert_eq!(header.algorithm_id, HashAlgorithm::Sha2_256.id());
    assert_eq!(header.iv.len(), 32);
    assert_eq!(header.last_leaf, Imprint::zero(HashAlgorithm::Sha2_256));

    // Record hash of the log record itself.
    let mut reference = ReferenceHasher::new();
    assert_eq!(records[1].1, reference.imprint(b"A\n").as_bytes());

    // The close-reason metadata is stored verbatim and hashed like a record.
    let encoded_metadata =
        tlv::encode_metadata(1, BLOCK_CLOSE_REASON_KEY, FILE_CLOSURE_REASON).unwrap();
    let metadata_with_header = {
        let mut bytes = Vec::new();
        tlv::write_header(&mut bytes, 0x00, tlv::TAG_METADATA, records[2].1.len()).unwrap();
        bytes.extend_from_slice(&records[2].1);
        bytes
    };
    assert_eq!(metadata_with_header, encoded_metadata);
    assert_eq!(records[3].1, reference.imprint(&encoded_metadata).as_bytes());

    // Signature payload: record count and the aggregator's DER.
    let fields = sub_tlvs(&records[4].1);
    assert_eq!(fields[0], (0x01, vec![2]));
    assert_eq!(fields[1].0, tlv::TAG_KSI_SIGNATURE);
    assert_eq!(fields[1].1, logsig_ksi_client::test_utils::mock_der(1));

    // The root handed to the aggregator is reproducible from the file.
    let mask1 = reference.mask(&header.last_leaf, &header.iv);
    let leaf1 = reference.record_leaf(&mask1, b"A\n");
    let mask2 = reference.mask(&leaf1, &header.iv);
    let leaf2 = reference.metadata_leaf(&mask2, &encoded_metadata);
    let root = reference.node(&leaf1, &leaf2, 2);

    let calls = aggregator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, root);
    assert_eq!(calls[0].1, calc_level(4));
}

#[tokio::test]
async fn blocks_chain_through_the_last_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let mut config = test_config();
    config.block_level_limit = 2; // two records per block

    let (signer, _aggregator) = sync_signer(config, MockAggregator::new());
    signer.open_log(&log).await.unwrap();
    for record in [b"A" as &[u8], b"B", b"C"] {
        signer.append_record(record).await.unwrap();
    }
    signer.close_log().await.unwrap();
    signer.shutdown().await;

    let records = read_tlv_file(&dir.path().join("app.log.logsig"), LOGSIG_FILE_HEADER);
    let headers: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, (tag, _))| *tag == tlv::TAG_BLOCK_HEADER)
        .map(|(index, _)| index)
        .collect();
    assert_eq!(headers.len(), 2, "expected two blocks");

    let block1 = parse_block_header(&records[headers[0]].1);
    let block2 = parse_block_header(&records[headers[1]].1);
    assert_eq!(block1.last_leaf, Imprint::zero(HashAlgorithm::Sha2_256));

    // Recompute block 1's leaves; the chained value is the level-1 node of
    // the last record, untouched by carries.
    let mut reference = ReferenceHasher::new();
    let mask1 = reference.mask(&block1.last_leaf, &block1.iv);
    let leaf_a = reference.record_leaf(&mask1, b"A");
    let mask2 = reference.mask(&leaf_a, &block1.iv);
    let leaf_b = reference.record_leaf(&mask2, b"B");
    assert_eq!(block2.last_leaf, leaf_b);
}

#[tokio::test]
async fn metadata_bytes_precede_their_record_hash() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let mut config = test_config();
    config.block_level_limit = 3; // four records per block
    config.keep_tree_hashes = true;

    let (signer, _aggregator) = sync_signer(config, MockAggregator::new());
    signer.open_log(&log).await.unwrap();
    signer.append_record(b"R1").await.unwrap();
    signer.append_record(b"R2").await.unwrap();
    signer.append_metadata("foo", "bar").await.unwrap();
    signer.append_record(b"R3").await.unwrap();
    signer.close_log().await.unwrap();
    signer.shutdown().await;

    let records = read_tlv_file(&dir.path().join("app.log.logsig"), LOGSIG_FILE_HEADER);

    // The metadata TLV is written verbatim, immediately followed by its own
    // record hash.
    let metadata_index = records
        .iter()
        .position(|(tag, _)| *tag == tlv::TAG_METADATA)
        .expect("metadata record present");
    let encoded = {
        let mut bytes = Vec::new();
        tlv::write_header(
            &mut bytes,
            0x00,
            tlv::TAG_METADATA,
            records[metadata_index].1.len(),
        )
        .unwrap();
        bytes.extend_from_slice(&records[metadata_index].1);
        bytes
    };
    assert_eq!(encoded, tlv::encode_metadata(2, "foo", "bar").unwrap());

    let mut reference = ReferenceHasher::new();
    assert_eq!(records[metadata_index + 1].0, tlv::TAG_RECORD_HASH);
    assert_eq!(
        records[metadata_index + 1].1,
        reference.imprint(&encoded).as_bytes()
    );

    // The metadata leaf hashes with reversed operands: the tree hash right
    // after its record hash must match the reversed-order computation.
    let header = parse_block_header(&records[0].1);
    let mask1 = reference.mask(&header.last_leaf, &header.iv);
    let leaf1 = reference.record_leaf(&mask1, b"R1");
    let mask2 = reference.mask(&leaf1, &header.iv);
    let leaf2 = reference.record_leaf(&mask2, b"R2");
    let mask3 = reference.mask(&leaf2, &header.iv);
    let metadata_leaf = reference.metadata_leaf(&mask3, &encoded);

    assert_eq!(records[metadata_index + 2].0, tlv::TAG_TREE_HASH);
    assert_eq!(records[metadata_index + 2].1, metadata_leaf.as_bytes());
}

#[tokio::test]
async fn aggregator_failure_degrades_to_a_no_signature_record() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let (signer, _aggregator) =
        sync_signer(test_config(), MockAggregator::failing("gateway unavailable"));

    signer.open_log(&log).await.unwrap();
    signer.append_record(b"A").await.unwrap();
    signer.close_log().await.unwrap();
    signer.shutdown().await;

    let records = read_tlv_file(&dir.path().join("app.log.logsig"), LOGSIG_FILE_HEADER);
    let signature = records
        .iter()
        .find(|(tag, _)| *tag == tlv::TAG_BLOCK_SIGNATURE)
        .expect("block signature record");

    let fields = sub_tlvs(&signature.1);
    assert_eq!(fields[0], (0x01, vec![2]));
    assert_eq!(fields[1].0, 0x02, "no-signature container");

    let no_sig = sub_tlvs(&fields[1].1);
    assert_eq!(no_sig[0].0, 0x01);
    assert_eq!(no_sig[0].1.len(), 33, "root imprint");
    assert_eq!(no_sig[1].0, 0x02);
    let error_text = &no_sig[1].1;
    assert_eq!(*error_text.last().unwrap(), 0, "trailing NUL");
    assert!(String::from_utf8_lossy(error_text).contains("gateway unavailable"));
}

#[tokio::test]
async fn gateway_config_lowers_the_block_size_at_open() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let aggregator = MockAggregator::with_config(AggregatorConfig {
        max_requests: Some(4),
        max_level: Some(2),
    });

    let (signer, aggregator) = sync_signer(test_config(), aggregator);
    signer.open_log(&log).await.unwrap();
    // The pushed level limit (2) caps blocks at two records, far below the
    // configured limit of 2^11.
    signer.append_record(b"A").await.unwrap();
    signer.append_record(b"B").await.unwrap();
    let calls = aggregator.calls();
    assert_eq!(calls.len(), 1, "block rotated at the pushed limit");
    assert_eq!(calls[0].1, calc_level(4));

    signer.close_log().await.unwrap();
    signer.shutdown().await;
}

#[tokio::test]
async fn chain_continues_across_signer_instances() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");

    let (signer, _aggregator) = sync_signer(test_config(), MockAggregator::new());
    signer.open_log(&log).await.unwrap();
    signer.append_record(b"A").await.unwrap();
    signer.close_log().await.unwrap();
    signer.shutdown().await;

    let (signer, _aggregator) = sync_signer(test_config(), MockAggregator::new());
    signer.open_log(&log).await.unwrap();
    signer.append_record(b"B").await.unwrap();
    signer.close_log().await.unwrap();
    signer.shutdown().await;

    let records = read_tlv_file(&dir.path().join("app.log.logsig"), LOGSIG_FILE_HEADER);
    let headers: Vec<&(u16, Vec<u8>)> = records
        .iter()
        .filter(|(tag, _)| *tag == tlv::TAG_BLOCK_HEADER)
        .collect();
    assert_eq!(headers.len(), 2);

    let block1 = parse_block_header(&headers[0].1);
    let block2 = parse_block_header(&headers[1].1);

    // Block 2 (second process) continues from block 1's last leaf, restored
    // from the state file.
    let mut reference = ReferenceHasher::new();
    let mask1 = reference.mask(&block1.last_leaf, &block1.iv);
    let leaf_a = reference.record_leaf(&mask1, b"A");
    let close_metadata =
        tlv::encode_metadata(1, BLOCK_CLOSE_REASON_KEY, FILE_CLOSURE_REASON).unwrap();
    let mask2 = reference.mask(&leaf_a, &block1.iv);
    let metadata_leaf = reference.metadata_leaf(&mask2, &close_metadata);

    assert_eq!(block2.last_leaf, metadata_leaf);
}

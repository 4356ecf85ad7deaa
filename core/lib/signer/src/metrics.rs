use std::time::Duration;

use vise::{Buckets, Counter, Gauge, Histogram, Metrics, Unit};

#[derive(Debug, Metrics)]
#[metrics(prefix = "logsig_signer")]
pub(crate) struct SignerMetrics {
    /// Leaves folded into blocks, metadata records included.
    pub records_hashed: Counter,

    /// Blocks closed, whether signed inline or queued for the worker.
    pub blocks_finished: Counter,

    /// Signatures written to the output file.
    pub signatures_written: Counter,

    /// Blocks that ended up with a no-signature placeholder.
    pub signing_errors: Counter,

    /// Items currently held in the signer queue.
    pub queue_length: Gauge<usize>,

    /// Effective block level limit after gateway push-downs.
    pub effective_level_limit: Gauge<u64>,

    /// Time from enqueueing a block root to its signature reaching the file.
    #[metrics(buckets = Buckets::LATENCIES, unit = Unit::Seconds)]
    pub signing_latency: Histogram<Duration>,
}

#[vise::register]
pub(crate) static METRICS: vise::Global<SignerMetrics> = vise::Global::new();

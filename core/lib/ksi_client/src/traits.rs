use async_trait::async_trait;
use logsig_basic_types::Imprint;

use crate::types::{
    AggregationRequest, AggregatorConfig, Endpoint, KsiClientResult, ServiceEvent, ServiceOption,
};

/// Synchronous aggregation: one blocking round trip per block root.
#[async_trait]
pub trait AggregatorOps: Send + Sync {
    /// Signs an aggregated root hash at the declared tree level and returns
    /// the DER-serialized signature.
    async fn sign_aggregated(&self, root: &Imprint, level: u8) -> KsiClientResult<Vec<u8>>;

    /// Fetches the gateway configuration.
    async fn receive_config(&self) -> KsiClientResult<AggregatorConfig>;
}

impl std::fmt::Debug for dyn AggregatorOps + 'static {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorOps").finish()
    }
}

/// Asynchronous aggregation service, polled by the signer worker.
///
/// Requests are submitted with [`add_request`] and complete later as
/// [`ServiceEvent`]s pulled out of [`run`]. `add_request` may refuse a
/// request outright (throttling, saturated request cache); the caller is
/// expected to retry on a later tick.
///
/// [`add_request`]: AsyncSigningService::add_request
/// [`run`]: AsyncSigningService::run
#[async_trait]
pub trait AsyncSigningService: Send + Sync {
    fn add_endpoint(&mut self, endpoint: Endpoint) -> KsiClientResult<()>;

    fn set_option(&mut self, option: ServiceOption) -> KsiClientResult<()>;

    fn add_request(&mut self, request: AggregationRequest) -> KsiClientResult<()>;

    /// Asks the gateway to push a fresh [`AggregatorConfig`].
    fn request_config(&mut self) -> KsiClientResult<()>;

    /// Drives network I/O and returns one completed event, if any.
    async fn run(&mut self) -> KsiClientResult<Option<ServiceEvent>>;

    /// Number of submitted requests without a drained event.
    fn pending_count(&self) -> usize;
}

impl std::fmt::Debug for dyn AsyncSigningService + 'static {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSigningService").finish()
    }
}

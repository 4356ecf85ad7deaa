use logsig_basic_types::{HashAlgorithm, Imprint};
use thiserror::Error;

/// A high-availability front-end registers at most this many sub-services.
pub const MAX_HA_SUBSERVICES: usize = 3;

pub type KsiClientResult<T> = Result<T, KsiClientError>;

#[derive(Debug, Error)]
pub enum KsiClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("service is throttling requests")]
    Throttled,

    #[error("request cache is full")]
    CacheFull,

    #[error("no usable endpoints configured")]
    NoEndpoints,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("aggregation failed: {0}")]
    Aggregation(String),
}

/// One aggregator endpoint with its credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub uri: String,
    pub id: Option<String>,
    pub key: Option<String>,
}

/// Splits a `|`-separated endpoint URI list, dropping empty entries.
pub fn split_endpoint_list(uri_list: &str) -> Vec<String> {
    uri_list
        .split('|')
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(str::to_string)
        .collect()
}

/// Limits pushed down by the aggregation gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregatorConfig {
    /// Max outstanding requests the gateway accepts from this client.
    pub max_requests: Option<u64>,
    /// Max aggregation tree level the gateway will sign.
    pub max_level: Option<u64>,
}

/// An aggregation request for a block root at a declared tree level.
///
/// `request_id` correlates the eventual [`ServiceEvent`] back to the request;
/// it is opaque to the service.
#[derive(Debug, Clone)]
pub struct AggregationRequest {
    pub request_id: u64,
    pub root: Imprint,
    pub level: u8,
}

/// A completed unit of work surfaced by [`AsyncSigningService::run`].
#[derive(Debug)]
pub enum ServiceEvent {
    /// The gateway pushed a configuration.
    ConfigReceived(AggregatorConfig),
    /// An aggregation request succeeded; `signature` is the DER encoding.
    ResponseReceived { request_id: u64, signature: Vec<u8> },
    /// An aggregation request failed remotely.
    RequestFailed {
        request_id: u64,
        error: KsiClientError,
    },
}

/// Options pushed into the asynchronous service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServiceOption {
    RequestCacheSize(u64),
    MaxRequestCount(u64),
    HmacAlgorithm(HashAlgorithm),
}

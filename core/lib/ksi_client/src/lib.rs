//! Contract of the remote keyless-signature aggregation service.
//!
//! The signing engine talks to the aggregator exclusively through the traits
//! defined here; the wire protocol implementation is provided by the host.
//! `test_utils` contains controllable in-memory implementations.

mod traits;
mod types;

pub mod test_utils;

pub use traits::{AggregatorOps, AsyncSigningService};
pub use types::{
    AggregationRequest, AggregatorConfig, Endpoint, KsiClientError, KsiClientResult,
    ServiceEvent, ServiceOption, split_endpoint_list, MAX_HA_SUBSERVICES,
};

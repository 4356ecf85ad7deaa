//! Controllable in-memory aggregation services for tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use logsig_basic_types::Imprint;

use crate::{
    traits::{AggregatorOps, AsyncSigningService},
    types::{
        AggregationRequest, AggregatorConfig, Endpoint, KsiClientError, KsiClientResult,
        ServiceEvent, ServiceOption,
    },
};

/// Fabricates a recognizable DER blob for a request id.
pub fn mock_der(request_id: u64) -> Vec<u8> {
    format!("DER-{request_id}").into_bytes()
}

#[derive(Debug, Default)]
struct MockServiceState {
    endpoints: Vec<Endpoint>,
    options: Vec<ServiceOption>,
    submitted: Vec<AggregationRequest>,
    events: VecDeque<ServiceEvent>,
    pending: usize,
    auto_complete: bool,
    fail_all: Option<String>,
    refuse_requests: bool,
    reject_endpoints: bool,
    fatal: Option<String>,
    config: Option<AggregatorConfig>,
}

/// Shared control handle for a [`MockSigningService`].
///
/// The service itself is moved into the signer worker; tests keep the handle
/// to script responses and inspect submissions.
#[derive(Debug, Clone, Default)]
pub struct MockServiceHandle(Arc<Mutex<MockServiceState>>);

impl MockServiceHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockServiceState> {
        self.0.lock().expect("mock service state poisoned")
    }

    /// Completes requests as soon as they are submitted.
    pub fn set_auto_complete(&self, enabled: bool) {
        self.state().auto_complete = enabled;
    }

    /// Fails every submitted request with the given message.
    pub fn set_fail_all(&self, message: &str) {
        self.state().fail_all = Some(message.to_string());
    }

    /// Makes `add_request` refuse submissions, as a throttling gateway would.
    pub fn set_refuse_requests(&self, refuse: bool) {
        self.state().refuse_requests = refuse;
    }

    /// Makes `add_endpoint` reject every endpoint.
    pub fn set_reject_endpoints(&self, reject: bool) {
        self.state().reject_endpoints = reject;
    }

    /// Makes the next `run` call fail hard.
    pub fn set_fatal(&self, message: &str) {
        self.state().fatal = Some(message.to_string());
    }

    /// Config answered to `request_config` calls.
    pub fn set_config(&self, config: AggregatorConfig) {
        self.state().config = Some(config);
    }

    /// Pushes an unsolicited gateway configuration.
    pub fn push_config(&self, config: AggregatorConfig) {
        self.state().events.push_back(ServiceEvent::ConfigReceived(config));
    }

    /// Completes a submitted request with a fabricated signature.
    pub fn complete(&self, request_id: u64) {
        self.complete_with(request_id, mock_der(request_id));
    }

    pub fn complete_with(&self, request_id: u64, signature: Vec<u8>) {
        let mut state = self.state();
        state.pending = state.pending.saturating_sub(1);
        state.events.push_back(ServiceEvent::ResponseReceived {
            request_id,
            signature,
        });
    }

    /// Fails a submitted request.
    pub fn fail(&self, request_id: u64, message: &str) {
        let mut state = self.state();
        state.pending = state.pending.saturating_sub(1);
        state.events.push_back(ServiceEvent::RequestFailed {
            request_id,
            error: KsiClientError::Aggregation(message.to_string()),
        });
    }

    pub fn submitted(&self) -> Vec<AggregationRequest> {
        self.state().submitted.clone()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.state().endpoints.clone()
    }

    pub fn options(&self) -> Vec<ServiceOption> {
        self.state().options.clone()
    }

    pub fn service(&self) -> MockSigningService {
        MockSigningService {
            handle: self.clone(),
        }
    }
}

/// [`AsyncSigningService`] test double driven by a [`MockServiceHandle`].
#[derive(Debug)]
pub struct MockSigningService {
    handle: MockServiceHandle,
}

#[async_trait]
impl AsyncSigningService for MockSigningService {
    fn add_endpoint(&mut self, endpoint: Endpoint) -> KsiClientResult<()> {
        let mut state = self.handle.state();
        if state.reject_endpoints {
            return Err(KsiClientError::InvalidConfig(format!(
                "unsupported endpoint scheme: {}",
                endpoint.uri
            )));
        }
        state.endpoints.push(endpoint);
        Ok(())
    }

    fn set_option(&mut self, option: ServiceOption) -> KsiClientResult<()> {
        self.handle.state().options.push(option);
        Ok(())
    }

    fn add_request(&mut self, request: AggregationRequest) -> KsiClientResult<()> {
        let mut state = self.handle.state();
        if state.refuse_requests {
            return Err(KsiClientError::Throttled);
        }
        let request_id = request.request_id;
        state.submitted.push(request);
        state.pending += 1;
        if let Some(message) = state.fail_all.clone() {
            state.pending -= 1;
            state.events.push_back(ServiceEvent::RequestFailed {
                request_id,
                error: KsiClientError::Aggregation(message),
            });
        } else if state.auto_complete {
            state.pending -= 1;
            state.events.push_back(ServiceEvent::ResponseReceived {
                request_id,
                signature: mock_der(request_id),
            });
        }
        Ok(())
    }

    fn request_config(&mut self) -> KsiClientResult<()> {
        let mut state = self.handle.state();
        if let Some(config) = state.config {
            state.events.push_back(ServiceEvent::ConfigReceived(config));
        }
        Ok(())
    }

    async fn run(&mut self) -> KsiClientResult<Option<ServiceEvent>> {
        let mut state = self.handle.state();
        if let Some(message) = state.fatal.take() {
            return Err(KsiClientError::Network(message));
        }
        Ok(state.events.pop_front())
    }

    fn pending_count(&self) -> usize {
        self.handle.state().pending
    }
}

/// [`AggregatorOps`] test double for the synchronous signing path.
#[derive(Debug, Default)]
pub struct MockAggregator {
    state: Mutex<MockAggregatorState>,
}

#[derive(Debug, Default)]
struct MockAggregatorState {
    calls: Vec<(Imprint, u8)>,
    fail_with: Option<String>,
    config: AggregatorConfig,
}

impl MockAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        let aggregator = Self::default();
        aggregator.state.lock().unwrap().fail_with = Some(message.to_string());
        aggregator
    }

    pub fn with_config(config: AggregatorConfig) -> Self {
        let aggregator = Self::default();
        aggregator.state.lock().unwrap().config = config;
        aggregator
    }

    /// Roots and levels signed so far, in call order.
    pub fn calls(&self) -> Vec<(Imprint, u8)> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl AggregatorOps for MockAggregator {
    async fn sign_aggregated(&self, root: &Imprint, level: u8) -> KsiClientResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((root.clone(), level));
        match &state.fail_with {
            Some(message) => Err(KsiClientError::Aggregation(message.clone())),
            None => Ok(mock_der(state.calls.len() as u64)),
        }
    }

    async fn receive_config(&self) -> KsiClientResult<AggregatorConfig> {
        Ok(self.state.lock().unwrap().config)
    }
}

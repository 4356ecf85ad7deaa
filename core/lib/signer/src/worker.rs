//! The signer worker: a single long-lived task that owns the asynchronous
//! aggregation service and the signature file, and writes signatures in
//! block-completion order.

use std::{io::Write, sync::Arc, time::Duration};

use anyhow::Context as _;
use logsig_ksi_client::{AggregationRequest, AsyncSigningService, ServiceEvent, ServiceOption};
use tokio::task::JoinHandle;

use crate::{
    context::SignerInner,
    files::SignatureFile,
    metrics::METRICS,
    queue::{QueueItem, RequestStatus, SignRequest},
    tlv,
};

const QUEUE_WAIT: Duration = Duration::from_secs(1);
/// Poll delay while the queue head waits for an aggregator response.
const RETRY_DELAY: Duration = Duration::from_millis(50);

pub(crate) struct SignerWorker {
    inner: Arc<SignerInner>,
    /// `None` in synchronous mode: the worker then only drives block
    /// timeouts and file lifecycle markers.
    service: Option<Box<dyn AsyncSigningService>>,
    sig_file: Option<SignatureFile>,
}

impl SignerWorker {
    pub(crate) fn spawn(
        inner: Arc<SignerInner>,
        service: Option<Box<dyn AsyncSigningService>>,
    ) -> JoinHandle<()> {
        let worker = Self {
            inner,
            service,
            sig_file: None,
        };
        tokio::spawn(worker.run())
    }

    async fn run(mut self) {
        if !self.register_endpoints() {
            return;
        }

        loop {
            self.inner.queue.wait_for_item(QUEUE_WAIT).await;
            self.inner.check_timeout().await;

            if self.inner.queue.is_empty() {
                if let Err(err) = self.process_requests().await {
                    tracing::warn!("async signing service reported an error: {err:#}");
                }
                continue;
            }

            if self.sig_file.is_some() {
                if let Err(err) = self.process_requests().await {
                    tracing::error!("signer worker failed: {err:#}");
                    self.inner.disable("async signing service failed");
                    break;
                }
            }

            // Signatures at the front must reach the file before any
            // file-lifecycle marker behind them is acted on.
            let front_is_sign = self
                .inner
                .queue
                .with_front(|item| matches!(item, QueueItem::Sign(_)))
                .unwrap_or(false);
            if front_is_sign {
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }

            match self.inner.queue.pop_front() {
                Some(QueueItem::CloseFile) => self.close_sig_file(),
                Some(QueueItem::NewFile(file)) => {
                    tracing::debug!("signature file '{}' adopted", file.path.display());
                    self.sig_file = Some(file);
                    // Renew the gateway config when opening a new file.
                    if let Some(service) = self.service.as_mut() {
                        if let Err(err) = service.request_config() {
                            tracing::warn!("could not request aggregator config: {err}");
                        }
                    }
                }
                Some(QueueItem::Quit) => {
                    self.close_sig_file();
                    break;
                }
                Some(QueueItem::Sign(_)) => {
                    unreachable!("the queue front was checked above and only this task pops")
                }
                None => {}
            }
        }
    }

    /// Registers the configured endpoints with the async service. Returns
    /// false when signing cannot proceed at all.
    fn register_endpoints(&mut self) -> bool {
        let Some(service) = self.service.as_mut() else {
            return true;
        };

        let mut endpoints = 0;
        for endpoint in &self.inner.settings.endpoints {
            match service.add_endpoint(endpoint.clone()) {
                Ok(()) => endpoints += 1,
                Err(err) => {
                    tracing::warn!("could not register endpoint '{}': {err}", endpoint.uri);
                }
            }
        }
        if endpoints == 0 {
            self.inner.disable("no aggregator endpoints added");
            return false;
        }

        let max_requests = self.inner.max_requests();
        if let Err(err) = service.set_option(ServiceOption::RequestCacheSize(max_requests)) {
            tracing::warn!("could not set the request cache size: {err}");
        }
        let hmac = self.inner.settings.hmac_algorithm;
        if let Err(err) = service.set_option(ServiceOption::HmacAlgorithm(hmac)) {
            tracing::warn!("could not set the HMAC algorithm: {err}");
        }
        true
    }

    fn close_sig_file(&mut self) {
        if let Some(mut file) = self.sig_file.take() {
            if let Err(err) = file.writer.flush() {
                tracing::error!(
                    "could not flush signature file '{}': {err}",
                    file.path.display()
                );
            }
        }
    }

    /// One tick of the signing pipeline: drain completed responses, submit
    /// waiting requests in queue order, then flush finished signatures from
    /// the queue head.
    async fn process_requests(&mut self) -> anyhow::Result<()> {
        if self.service.is_none() {
            return Ok(());
        }
        self.drain_events().await?;
        self.dispatch_pending();
        self.flush_completed()?;
        Ok(())
    }

    async fn drain_events(&mut self) -> anyhow::Result<()> {
        while let Some(service) = self.service.as_mut() {
            let Some(event) = service
                .run()
                .await
                .context("async aggregation service failed")?
            else {
                break;
            };
            match event {
                ServiceEvent::ConfigReceived(config) => {
                    self.inner
                        .apply_aggregator_config(&config, Some(service.as_mut()));
                }
                ServiceEvent::ResponseReceived {
                    request_id,
                    signature,
                } => {
                    if !self.inner.queue.complete_request(request_id, Ok(signature)) {
                        tracing::warn!("response for unknown aggregation request {request_id}");
                    }
                }
                ServiceEvent::RequestFailed { request_id, error } => {
                    tracing::warn!(
                        "Asynchronous request {request_id} returned error: {error}"
                    );
                    if !self.inner.queue.complete_request(request_id, Err(error)) {
                        tracing::warn!("failure for unknown aggregation request {request_id}");
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch_pending(&mut self) {
        let Some(service) = self.service.as_mut() else {
            return;
        };
        let queue = &self.inner.queue;

        for index in 0..queue.count() {
            let waiting = queue
                .with_item_at(index, |item| match item {
                    QueueItem::Sign(request) if request.status == RequestStatus::Waiting => {
                        Some(AggregationRequest {
                            request_id: request.request_id,
                            root: request.root.clone(),
                            level: request.level,
                        })
                    }
                    _ => None,
                })
                .flatten();
            let Some(request) = waiting else {
                continue;
            };

            match service.add_request(request) {
                Ok(()) => {
                    queue.with_item_at(index, |item| {
                        if let QueueItem::Sign(request) = item {
                            request.status = RequestStatus::Sent;
                        }
                    });
                }
                Err(err) => {
                    // Refusal means throttling or a saturated cache; later
                    // items must not overtake this one, so stop the scan.
                    tracing::warn!("could not submit aggregation request: {err}");
                    queue.with_item_at(index, |item| {
                        if let QueueItem::Sign(request) = item {
                            request.status = RequestStatus::Done;
                            request.outcome = Some(Err(err));
                        }
                    });
                    break;
                }
            }
        }
    }

    fn flush_completed(&mut self) -> anyhow::Result<()> {
        loop {
            let front_done = self
                .inner
                .queue
                .with_front(|item| {
                    matches!(
                        item,
                        QueueItem::Sign(request) if request.status == RequestStatus::Done
                    )
                })
                .unwrap_or(false);
            if !front_done {
                return Ok(());
            }

            let Some(QueueItem::Sign(request)) = self.inner.queue.pop_front() else {
                return Ok(());
            };
            self.save_response(request)?;
        }
    }

    fn save_response(&mut self, request: SignRequest) -> anyhow::Result<()> {
        let file = self
            .sig_file
            .as_mut()
            .context("a finished signature has no open signature file")?;

        match &request.outcome {
            Some(Ok(der)) => {
                tlv::write_signature(&mut file.writer, request.record_count, der)
                    .context("could not write a signature")?;
                METRICS.signatures_written.inc();
            }
            Some(Err(error)) => {
                tlv::write_no_signature(
                    &mut file.writer,
                    request.record_count,
                    &request.root,
                    Some(&error.to_string()),
                )
                .context("could not write a no-signature record")?;
                METRICS.signing_errors.inc();
            }
            None => {
                tlv::write_no_signature(
                    &mut file.writer,
                    request.record_count,
                    &request.root,
                    Some("unknown error"),
                )
                .context("could not write a no-signature record")?;
                METRICS.signing_errors.inc();
            }
        }
        METRICS.signing_latency.observe(request.requested_at.elapsed());
        Ok(())
    }
}

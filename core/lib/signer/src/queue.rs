//! Bounded FIFO between the record-ingesting callers and the signer worker.

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use logsig_basic_types::Imprint;
use logsig_ksi_client::KsiClientError;
use tokio::{sync::Notify, time::Instant};

use crate::{
    files::SignatureFile,
    metrics::METRICS,
    types::{SignerError, SignerResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestStatus {
    Waiting,
    Sent,
    Done,
}

/// A block root waiting for its signature.
#[derive(Debug)]
pub(crate) struct SignRequest {
    pub request_id: u64,
    pub root: Imprint,
    pub record_count: u64,
    pub level: u8,
    pub status: RequestStatus,
    pub outcome: Option<Result<Vec<u8>, KsiClientError>>,
    pub requested_at: Instant,
}

impl SignRequest {
    pub(crate) fn new(request_id: u64, root: Imprint, record_count: u64, level: u8) -> Self {
        Self {
            request_id,
            root,
            record_count,
            level,
            status: RequestStatus::Waiting,
            outcome: None,
            requested_at: Instant::now(),
        }
    }
}

/// Work items of the signer worker. `CloseFile` and `NewFile` are ordering
/// markers: signatures ahead of them in the queue belong to the previous
/// signature file.
#[derive(Debug)]
pub(crate) enum QueueItem {
    Sign(SignRequest),
    CloseFile,
    NewFile(SignatureFile),
    Quit,
}

#[derive(Debug)]
pub(crate) struct SignerQueue {
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    capacity: usize,
}

impl SignerQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueueItem>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn push(&self, item: QueueItem) -> SignerResult<()> {
        {
            let mut items = self.lock();
            if items.len() >= self.capacity {
                return Err(SignerError::Queue(format!(
                    "queue is full ({} items)",
                    self.capacity
                )));
            }
            items.push_back(item);
            METRICS.queue_length.set(items.len());
        }
        self.notify.notify_one();
        Ok(())
    }

    pub(crate) fn pop_front(&self) -> Option<QueueItem> {
        let mut items = self.lock();
        let item = items.pop_front();
        METRICS.queue_length.set(items.len());
        item
    }

    pub(crate) fn count(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Blocks until an item is (or becomes) available, or the timeout runs
    /// out, whichever happens first.
    pub(crate) async fn wait_for_item(&self, timeout: Duration) {
        if !self.is_empty() {
            return;
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    pub(crate) fn with_front<R>(&self, f: impl FnOnce(&QueueItem) -> R) -> Option<R> {
        self.lock().front().map(f)
    }

    pub(crate) fn with_item_at<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut QueueItem) -> R,
    ) -> Option<R> {
        self.lock().get_mut(index).map(f)
    }

    /// Attaches the outcome of an aggregation request to its queue item and
    /// marks it done. Returns false when no matching item exists (e.g. the
    /// request was abandoned at shutdown).
    pub(crate) fn complete_request(
        &self,
        request_id: u64,
        outcome: Result<Vec<u8>, KsiClientError>,
    ) -> bool {
        let mut items = self.lock();
        for item in items.iter_mut() {
            if let QueueItem::Sign(request) = item {
                if request.request_id == request_id {
                    request.status = RequestStatus::Done;
                    request.outcome = Some(outcome);
                    return true;
                }
            }
        }
        false
    }
}

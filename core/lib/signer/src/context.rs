//! Process-wide signing context and its public entry points.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use logsig_basic_types::HashAlgorithm;
use logsig_config::LogSignerConfig;
use logsig_ksi_client::{
    split_endpoint_list, AggregatorConfig, AggregatorOps, AsyncSigningService, Endpoint,
    ServiceOption, MAX_HA_SUBSERVICES,
};
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    block::{LogFile, SigningMode, BLOCK_CLOSE_REASON_KEY},
    files::{
        self, FileOptions, SignatureFile, BLOCK_FILE_HEADER, BLOCK_FILE_SUFFIX,
        LOGSIG_FILE_HEADER, LOGSIG_FILE_SUFFIX, SIG_FILE_HEADER, SIG_FILE_SUFFIX,
        STATE_FILE_SUFFIX,
    },
    hasher::select_algorithm,
    metrics::METRICS,
    queue::{QueueItem, SignRequest, SignerQueue},
    types::{SignerError, SignerResult},
    worker::SignerWorker,
};

const QUEUE_CAPACITY: usize = 1024;

/// The signing backend also decides the output layout: a synchronous
/// aggregator writes signatures inline into one `.logsig` file, an
/// asynchronous service gets a separate signature file fed by the worker.
pub enum SigningBackend {
    Synchronous(Arc<dyn AggregatorOps>),
    Asynchronous(Box<dyn AsyncSigningService>),
}

impl std::fmt::Debug for SigningBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningBackend::Synchronous(_) => f.write_str("SigningBackend::Synchronous"),
            SigningBackend::Asynchronous(_) => f.write_str("SigningBackend::Asynchronous"),
        }
    }
}

/// Settings frozen at construction time.
pub(crate) struct SignerSettings {
    pub hash_algorithm: HashAlgorithm,
    pub hmac_algorithm: HashAlgorithm,
    pub endpoints: Vec<Endpoint>,
    pub mode: SigningMode,
    pub aggregator: Option<Arc<dyn AggregatorOps>>,
    pub configured_level_limit: u64,
    pub block_time_limit: Option<Duration>,
    pub keep_record_hashes: bool,
    pub keep_tree_hashes: bool,
    pub random_source: Option<PathBuf>,
    pub file_options: FileOptions,
}

#[derive(Debug, Default)]
pub(crate) struct SignerState {
    pub file: Option<LogFile>,
}

pub(crate) struct SignerInner {
    pub settings: SignerSettings,
    /// The module lock: serializes all public entry points against each
    /// other and against the worker's timeout checks.
    pub state: Mutex<SignerState>,
    pub queue: Arc<SignerQueue>,
    disabled: AtomicBool,
    effective_level_limit: AtomicU64,
    max_requests: AtomicU64,
    next_request_id: AtomicU64,
}

impl SignerInner {
    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// Permanently stops all signing activity; ingestion degrades to a
    /// no-op.
    pub(crate) fn disable(&self, reason: &str) {
        if !self.disabled.swap(true, Ordering::Relaxed) {
            tracing::error!("signing disabled: {reason}");
        }
    }

    pub(crate) fn effective_level_limit(&self) -> u64 {
        self.effective_level_limit.load(Ordering::Relaxed)
    }

    pub(crate) fn max_requests(&self) -> u64 {
        self.max_requests.load(Ordering::Relaxed)
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Applies a gateway configuration, pushed asynchronously or fetched at
    /// file open. The effective block level limit never grows back.
    pub(crate) fn apply_aggregator_config(
        &self,
        config: &AggregatorConfig,
        service: Option<&mut dyn AsyncSigningService>,
    ) {
        if let Some(max_requests) = config.max_requests {
            tracing::info!("KSI gateway has reported a max requests value of {max_requests}");
            self.max_requests.store(max_requests, Ordering::Relaxed);
            if let Some(service) = service {
                if let Err(err) = service.set_option(ServiceOption::MaxRequestCount(max_requests))
                {
                    tracing::warn!("could not apply max request count: {err}");
                }
                if let Err(err) =
                    service.set_option(ServiceOption::RequestCacheSize(5 * max_requests))
                {
                    tracing::warn!("could not apply request cache size: {err}");
                }
            }
        }

        if let Some(max_level) = config.max_level {
            tracing::info!("KSI gateway has reported a max level value of {max_level}");
            if max_level < 2 {
                self.disable(&format!(
                    "KSI gateway has reported an invalid level limit value ({max_level})"
                ));
                return;
            }
            let current = self.effective_level_limit();
            let new_level = max_level
                .min(self.settings.configured_level_limit)
                .min(current);
            if new_level != current {
                tracing::info!(
                    "Changing the configured block level limit from {current} to {new_level}"
                );
                self.effective_level_limit.store(new_level, Ordering::Relaxed);
                METRICS.effective_level_limit.set(new_level);
            }
        }
    }

    /// Closes the current block and dispatches its root for signing.
    /// Must be called with the state lock held, on the locked `file`.
    pub(crate) async fn finish_block_locked(&self, file: &mut LogFile) -> SignerResult<()> {
        let Some(finished) = file.finish_block()? else {
            return Ok(());
        };

        match self.settings.mode {
            SigningMode::Synchronous => {
                let aggregator = self.settings.aggregator.as_ref().ok_or_else(|| {
                    SignerError::Internal("synchronous mode without an aggregator".to_string())
                })?;
                match aggregator
                    .sign_aggregated(&finished.root, finished.level)
                    .await
                {
                    Ok(der) => {
                        file.write_signature(finished.record_count, &der)?;
                        METRICS.signatures_written.inc();
                    }
                    Err(err) => {
                        tracing::error!("aggregation failed: {err}");
                        METRICS.signing_errors.inc();
                        file.write_no_signature(
                            finished.record_count,
                            &finished.root,
                            Some(&err.to_string()),
                        )?;
                    }
                }
            }
            SigningMode::Asynchronous => {
                // The block file stays self-describing: it carries the root
                // as a placeholder even before the worker writes the real
                // signature into the signature file.
                file.write_no_signature(finished.record_count, &finished.root, None)?;
                let request = SignRequest::new(
                    self.next_request_id(),
                    finished.root,
                    finished.record_count,
                    finished.level,
                );
                if let Err(err) = self.queue.push(QueueItem::Sign(request)) {
                    self.disable("signer queue rejected a block root");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Worker-driven block rotation on the wall-clock limit.
    pub(crate) async fn check_timeout(&self) {
        let Some(limit) = self.settings.block_time_limit else {
            return;
        };
        if self.is_disabled() {
            return;
        }

        let mut state = self.state.lock().await;
        let Some(file) = state.file.as_mut() else {
            return;
        };
        if !file.in_block() || file.block_elapsed() < limit {
            return;
        }

        let reason = format!(
            "Block closed due to reaching time limit {}",
            limit.as_secs()
        );
        if let Err(err) = file.add_metadata(BLOCK_CLOSE_REASON_KEY, &reason) {
            tracing::error!("could not append the block close reason: {err}");
        }
        let finished = self.finish_block_locked(file).await;
        file.init_block(
            self.effective_level_limit(),
            self.settings.random_source.as_deref(),
        );
        if let Err(err) = finished {
            tracing::error!("failed to rotate block on time limit: {err}");
        }
    }
}

enum WorkerSlot {
    /// The worker starts lazily at the first file open so it lands in the
    /// daemonized process, not a parent that forks it away.
    Idle(Option<Box<dyn AsyncSigningService>>),
    Running(JoinHandle<()>),
    Stopped,
}

/// Handle to the signing engine. Clones of the inner state are shared with
/// the signer worker; public entry points serialize on the module lock.
pub struct LogSigner {
    inner: Arc<SignerInner>,
    worker: std::sync::Mutex<WorkerSlot>,
}

impl std::fmt::Debug for LogSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSigner")
            .field("disabled", &self.inner.is_disabled())
            .finish()
    }
}

impl LogSigner {
    pub fn new(config: LogSignerConfig, backend: SigningBackend) -> SignerResult<Self> {
        if !(2..=32).contains(&config.block_level_limit) {
            return Err(SignerError::Config(format!(
                "block level limit {} out of range [2, 32]",
                config.block_level_limit
            )));
        }

        let uris = split_endpoint_list(&config.aggregator_uri);
        if uris.is_empty() {
            return Err(SignerError::Config(
                "no aggregator endpoints configured".to_string(),
            ));
        }
        let mut endpoints = Vec::new();
        for uri in uris {
            if endpoints.len() >= MAX_HA_SUBSERVICES {
                tracing::warn!(
                    "Maximum number ({MAX_HA_SUBSERVICES}) of service endpoints reached, \
                     ignoring endpoint: {uri}"
                );
                continue;
            }
            endpoints.push(Endpoint {
                uri,
                id: config.aggregator_id.clone(),
                key: config.aggregator_key.clone(),
            });
        }

        let (mode, aggregator, service) = match backend {
            SigningBackend::Synchronous(aggregator) => {
                (SigningMode::Synchronous, Some(aggregator), None)
            }
            SigningBackend::Asynchronous(service) => {
                (SigningMode::Asynchronous, None, Some(service))
            }
        };

        let settings = SignerSettings {
            hash_algorithm: select_algorithm(config.hash_algorithm.as_deref(), "hash"),
            hmac_algorithm: select_algorithm(config.hmac_algorithm.as_deref(), "HMAC"),
            endpoints,
            mode,
            aggregator,
            configured_level_limit: config.block_level_limit,
            block_time_limit: config.block_time_limit(),
            keep_record_hashes: config.keep_record_hashes,
            keep_tree_hashes: config.keep_tree_hashes,
            random_source: config.random_source.as_ref().map(PathBuf::from),
            file_options: FileOptions::from_config(&config),
        };

        let inner = Arc::new(SignerInner {
            settings,
            state: Mutex::new(SignerState::default()),
            queue: Arc::new(SignerQueue::new(QUEUE_CAPACITY)),
            disabled: AtomicBool::new(false),
            effective_level_limit: AtomicU64::new(config.block_level_limit),
            max_requests: AtomicU64::new(config.max_requests()),
            next_request_id: AtomicU64::new(0),
        });
        METRICS.effective_level_limit.set(config.block_level_limit);

        Ok(Self {
            inner,
            worker: std::sync::Mutex::new(WorkerSlot::Idle(service)),
        })
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.is_disabled()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<SignerInner> {
        &self.inner
    }

    fn ensure_worker(&self) {
        let mut slot = self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let WorkerSlot::Idle(service) = &mut *slot {
            let handle = SignerWorker::spawn(Arc::clone(&self.inner), service.take());
            *slot = WorkerSlot::Running(handle);
        }
    }

    /// Opens the signature files for a log and starts the first block.
    #[tracing::instrument(skip(self), target = "logsig_signer")]
    pub async fn open_log(&self, log_path: &Path) -> SignerResult<()> {
        if self.inner.is_disabled() {
            return Err(SignerError::Disabled);
        }
        self.ensure_worker();

        let mut state = self.inner.state.lock().await;
        if state.file.is_some() {
            return Err(SignerError::Internal(
                "a log is already open on this context".to_string(),
            ));
        }

        let settings = &self.inner.settings;
        let options = &settings.file_options;
        let state_path = files::path_with_suffix(log_path, STATE_FILE_SUFFIX);

        let block_file = match settings.mode {
            SigningMode::Synchronous => files::open_output_file(
                &files::path_with_suffix(log_path, LOGSIG_FILE_SUFFIX),
                options,
                LOGSIG_FILE_HEADER,
            )?,
            SigningMode::Asynchronous => files::open_output_file(
                &files::path_with_suffix(log_path, BLOCK_FILE_SUFFIX),
                options,
                BLOCK_FILE_HEADER,
            )?,
        };

        if settings.mode == SigningMode::Asynchronous {
            let sig_path = files::path_with_suffix(log_path, SIG_FILE_SUFFIX);
            let writer = files::open_output_file(&sig_path, options, SIG_FILE_HEADER)?;
            let item = QueueItem::NewFile(SignatureFile {
                writer,
                path: sig_path,
            });
            if let Err(err) = self.inner.queue.push(item) {
                self.inner.disable("signer queue rejected the signature file");
                return Err(err);
            }
        }

        let last_leaf =
            crate::state::read_state_file(&state_path, settings.hash_algorithm);
        let mut file = LogFile::new(
            block_file,
            state_path,
            settings.hash_algorithm,
            last_leaf,
            settings.keep_record_hashes,
            settings.keep_tree_hashes,
        );

        // The synchronous path has no worker-driven config push; fetch the
        // gateway limits once per file open instead.
        if let Some(aggregator) = &settings.aggregator {
            match aggregator.receive_config().await {
                Ok(config) => self.inner.apply_aggregator_config(&config, None),
                Err(err) => tracing::warn!("could not fetch aggregator config: {err}"),
            }
            if self.inner.is_disabled() {
                return Err(SignerError::Disabled);
            }
        }

        file.init_block(
            self.inner.effective_level_limit(),
            settings.random_source.as_deref(),
        );
        state.file = Some(file);
        Ok(())
    }

    /// Folds one log record into the current block. A disabled context
    /// ignores records.
    pub async fn append_record(&self, record: &[u8]) -> SignerResult<()> {
        if self.inner.is_disabled() {
            return Ok(());
        }
        let mut state = self.inner.state.lock().await;
        let file = state
            .file
            .as_mut()
            .ok_or_else(|| SignerError::Internal("no open log".to_string()))?;

        file.add_leaf(record, false)?;
        if file.needs_rotation() {
            let finished = self.inner.finish_block_locked(file).await;
            // Start the next block even if dispatch failed, so ingestion can
            // keep going.
            file.init_block(
                self.inner.effective_level_limit(),
                self.inner.settings.random_source.as_deref(),
            );
            finished?;
        }
        Ok(())
    }

    /// Folds a key/value metadata record into the current block.
    pub async fn append_metadata(&self, key: &str, value: &str) -> SignerResult<()> {
        if self.inner.is_disabled() {
            return Ok(());
        }
        let mut state = self.inner.state.lock().await;
        let file = state
            .file
            .as_mut()
            .ok_or_else(|| SignerError::Internal("no open log".to_string()))?;
        file.add_metadata(key, value)
    }

    /// Finishes the open block, closes the signature files and persists the
    /// chaining state.
    #[tracing::instrument(skip(self), target = "logsig_signer")]
    pub async fn close_log(&self) -> SignerResult<()> {
        let mut state = self.inner.state.lock().await;
        let Some(mut file) = state.file.take() else {
            return Ok(());
        };

        let mut result = Ok(());
        if !self.inner.is_disabled() && file.in_block() {
            result = async {
                file.add_metadata(BLOCK_CLOSE_REASON_KEY, "Block closed due to file closure.")?;
                self.inner.finish_block_locked(&mut file).await
            }
            .await;
        }

        if let Err(err) = file.flush() {
            tracing::error!("could not flush the block file: {err}");
            if result.is_ok() {
                result = Err(err);
            }
        }
        if self.inner.settings.mode == SigningMode::Asynchronous
            && self.inner.queue.push(QueueItem::CloseFile).is_err()
        {
            self.inner.disable("signer queue rejected the file close marker");
        }
        if let Err(err) = file.persist_state(&self.inner.settings.file_options) {
            tracing::warn!("could not persist the signing state: {err}");
        }
        result
    }

    /// Closes any open log, stops the worker and waits for it to drain.
    pub async fn shutdown(&self) {
        if let Err(err) = self.close_log().await {
            tracing::error!("error while closing the log on shutdown: {err}");
        }

        let slot = {
            let mut slot = self
                .worker
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *slot, WorkerSlot::Stopped)
        };
        match slot {
            WorkerSlot::Running(handle) => {
                if self.inner.queue.push(QueueItem::Quit).is_err() {
                    handle.abort();
                    return;
                }
                if let Err(err) = handle.await {
                    tracing::error!("signer worker exited abnormally: {err}");
                }
            }
            WorkerSlot::Idle(_) | WorkerSlot::Stopped => {}
        }
    }
}

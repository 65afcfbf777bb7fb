//! The trigger listener: one ingestion thread polling the broker, one dispatch
//! worker task running the callback, and a bounded queue between them.
//!
//! Shutdown is two-staged. `request_stop` asks the ingestion loop to finish its
//! current poll, flush, and close the queue; the worker then drains what is
//! queued. If that does not happen within the timeout given to
//! `await_stopped`, the abort token is cancelled and in-flight work is dropped.

pub(crate) mod ingestion;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commit::{CommitMode, CommitTracker};
use crate::dispatch::accumulator::BatchAccumulator;
use crate::dispatch::executor::FunctionExecutor;
use crate::dispatch::queue::dispatch_queue;
use crate::dispatch::worker::DispatchWorker;
use crate::dispatch::{DispatchMode, Dispatcher};
use crate::kafka::client::BrokerClient;
use ingestion::IngestionLoop;

/// How long a single poll may block, bounding how late a stop request is seen
pub const DEFAULT_POLL_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub topic: String,
    /// Flush as soon as this many records are pending
    pub max_batch_size: usize,
    /// Flush at least this often
    pub subscriber_interval: Duration,
    pub channel_capacity: usize,
    pub channel_full_retry_interval: Duration,
    pub dispatch_mode: DispatchMode,
    pub commit_mode: CommitMode,
    pub poll_slice: Duration,
}

impl ListenerConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            max_batch_size: 64,
            subscriber_interval: Duration::from_secs(1),
            channel_capacity: 10,
            channel_full_retry_interval: Duration::from_millis(50),
            dispatch_mode: DispatchMode::default(),
            commit_mode: CommitMode::default(),
            poll_slice: DEFAULT_POLL_SLICE,
        }
    }
}

struct RunningListener {
    ingestion_done: oneshot::Receiver<()>,
    ingestion_thread: std::thread::JoinHandle<()>,
    worker: JoinHandle<()>,
}

pub struct KafkaListener {
    config: ListenerConfig,
    client: Arc<dyn BrokerClient>,
    executor: Arc<dyn FunctionExecutor>,
    commit_tracker: Arc<CommitTracker>,
    shutdown: CancellationToken,
    abort: CancellationToken,
    running: Option<RunningListener>,
}

impl KafkaListener {
    pub fn new(
        config: ListenerConfig,
        client: Arc<dyn BrokerClient>,
        executor: Arc<dyn FunctionExecutor>,
    ) -> Self {
        Self {
            config,
            client,
            executor,
            commit_tracker: Arc::new(CommitTracker::new()),
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            running: None,
        }
    }

    /// Share a commit tracker, e.g. with something that reports committed offsets
    pub fn with_commit_tracker(mut self, tracker: Arc<CommitTracker>) -> Self {
        self.commit_tracker = tracker;
        self
    }

    pub fn commit_tracker(&self) -> Arc<CommitTracker> {
        self.commit_tracker.clone()
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Spawn the ingestion thread and the dispatch worker. Must be called from
    /// within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("listener for topic {} is already running", self.config.topic);
        }
        if self.shutdown.is_cancelled() {
            bail!("listener for topic {} was stopped", self.config.topic);
        }

        let (sender, receiver) = dispatch_queue(self.config.channel_capacity);
        let commit = self
            .config
            .commit_mode
            .strategy(self.client.clone(), self.commit_tracker.clone());
        let dispatcher = Dispatcher::new(self.config.dispatch_mode, self.executor.clone(), commit);

        let worker = tokio::spawn(
            DispatchWorker::new(receiver, dispatcher, self.abort.clone()).run(),
        );

        let ingestion = IngestionLoop {
            client: self.client.clone(),
            accumulator: BatchAccumulator::new(
                sender,
                self.config.channel_full_retry_interval,
                self.config.max_batch_size,
            ),
            max_batch_size: self.config.max_batch_size,
            subscriber_interval: self.config.subscriber_interval,
            poll_slice: self.config.poll_slice,
            shutdown: self.shutdown.clone(),
            abort: self.abort.clone(),
        };
        let (done_tx, done_rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name(format!("ingest-{}", self.config.topic))
            .spawn(move || ingestion.run(done_tx))
            .context("Failed to spawn ingestion thread");

        let ingestion_thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                // nothing will ever feed the worker
                self.abort.cancel();
                return Err(e);
            }
        };

        self.running = Some(RunningListener {
            ingestion_done: done_rx,
            ingestion_thread,
            worker,
        });

        info!(
            topic = %self.config.topic,
            dispatch_mode = %self.config.dispatch_mode,
            commit_mode = %self.config.commit_mode,
            "Listener started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some() && !self.shutdown.is_cancelled()
    }

    /// Ask the ingestion loop to stop. Returns immediately.
    pub fn request_stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!(topic = %self.config.topic, "Listener stop requested");
        }
        self.shutdown.cancel();
    }

    /// Wait for the ingestion loop to finish and the worker to drain the queue.
    ///
    /// Returns false when that took longer than `timeout`; the abort token is
    /// cancelled in that case and whatever was still queued is dropped.
    pub async fn await_stopped(&mut self, timeout: Duration) -> bool {
        let Some(running) = self.running.take() else {
            return true;
        };
        let RunningListener {
            mut ingestion_done,
            ingestion_thread,
            mut worker,
        } = running;

        let drained = tokio::time::timeout(timeout, async {
            if (&mut ingestion_done).await.is_err() {
                warn!("Ingestion thread exited without signalling completion");
            }
            (&mut worker).await
        })
        .await;

        match drained {
            Ok(worker_result) => {
                if let Err(e) = worker_result {
                    error!("Dispatch worker task failed: {e}");
                }
                match tokio::task::spawn_blocking(move || ingestion_thread.join()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => error!("Ingestion thread panicked"),
                    Err(e) => error!("Failed to join ingestion thread: {e}"),
                }
                info!(topic = %self.config.topic, "Listener stopped");
                true
            }
            Err(_) => {
                warn!(
                    topic = %self.config.topic,
                    timeout_ms = timeout.as_millis() as u64,
                    "Listener did not stop in time, aborting in-flight work"
                );
                self.abort.cancel();
                if tokio::time::timeout(Duration::from_secs(1), worker)
                    .await
                    .is_err()
                {
                    warn!("Dispatch worker did not observe abort");
                }
                // the ingestion thread exits on its own once its flush sees the abort
                false
            }
        }
    }

    /// `request_stop` + `await_stopped`, then flush stored offsets and leave the group
    pub async fn stop(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        let stopped = self.await_stopped(timeout).await;

        let client = self.client.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || client.close()).await {
            error!("Failed to close broker client: {e}");
        }
        stopped
    }
}

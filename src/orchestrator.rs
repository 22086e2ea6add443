//! Relay orchestrator
//!
//! Owns the scan cursor and the producer half of the submission queue, runs
//! the poll loop, supervises the mint workers and sequences shutdown:
//!
//! ```text
//! Init ──► Running ──(shutdown)──► Draining ──► Stopped
//! ```
//!
//! Within one iteration a range's events are fully enqueued before the
//! cursor for that range is persisted, so the stored cursor may lag the
//! enqueued work but never leads it.

use alloy::primitives::Address;
use eyre::{Result, WrapErr};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::ChainReader;
use crate::cursor::{ScanCursor, StateStore};
use crate::decoder::decode_lock_event;
use crate::metrics::Metrics;
use crate::poller::{PollOutcome, Poller};
use crate::queue::{submission_queue, EnqueueOutcome, SubmissionQueue, SubmissionReceiver};
use crate::submitter::{classify_error, DeadLetterSink, MintClient, MintSubmitter, RetryConfig};
use crate::types::{BlockRange, RawLog, ScanState};

/// Lifecycle of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    Init,
    Running,
    Draining,
    Stopped,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Init => "init",
            RelayState::Running => "running",
            RelayState::Draining => "draining",
            RelayState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Circuit breaker for the poll loop
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before pausing
    pub threshold: u32,
    /// How long to pause when circuit breaker trips
    pub pause_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            pause_duration: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Settings the orchestrator needs, extracted from [`crate::config::Config`]
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub source_chain_name: String,
    pub destination_chain_name: String,
    pub bridge_address: Address,
    pub confirmations: u64,
    pub start_block: u64,
    pub poll_interval: Duration,
    /// Upper bound for the poll loop's failure backoff
    pub max_poll_backoff: Duration,
    pub drain_timeout: Duration,
    pub submitter_workers: usize,
    pub submit_retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            source_chain_name: "source".to_string(),
            destination_chain_name: "destination".to_string(),
            bridge_address: Address::ZERO,
            confirmations: 6,
            start_block: 0,
            poll_interval: Duration::from_secs(5),
            max_poll_backoff: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(30),
            submitter_workers: 1,
            submit_retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// External collaborators handed to the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    pub chain_reader: Arc<dyn ChainReader>,
    pub state_store: Arc<dyn StateStore>,
    pub mint_client: Arc<dyn MintClient>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
}

/// Snapshot exposed on the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub state: RelayState,
    pub last_processed_block: u64,
    pub chain_head: Option<u64>,
    pub queue_depth: usize,
    pub registered_nonces: usize,
    pub successful_polls: u64,
    pub consecutive_failures: u32,
}

pub type SharedStatus = Arc<RwLock<RelayStatus>>;

/// Per-range decode/enqueue tally
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub logs: usize,
    pub malformed: usize,
    pub accepted: usize,
    pub duplicates: usize,
}

/// Result of one successful poll iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Idle { chain_head: u64 },
    Scanned { range: BlockRange, summary: BatchSummary },
}

pub struct RelayOrchestrator {
    config: OrchestratorConfig,
    poller: Poller,
    cursor: ScanCursor,
    queue: SubmissionQueue,
    receiver: SubmissionReceiver,
    mint_client: Arc<dyn MintClient>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<Metrics>,
    status: SharedStatus,
    state_tx: watch::Sender<RelayState>,
    poll_retry: RetryConfig,
    consecutive_failures: u32,
    last_chain_head: Option<u64>,
    resume_checked: bool,
    next_worker_id: usize,
}

impl RelayOrchestrator {
    /// Build the orchestrator (the `Init` state).
    ///
    /// Fails only if the state store cannot be reached.
    pub async fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let (state_tx, _) = watch::channel(RelayState::Init);

        let cursor = ScanCursor::load(collaborators.state_store, config.start_block)
            .await
            .wrap_err("Relay initialization failed")?;
        metrics.last_processed_block.set(cursor.position() as i64);

        let poller = Poller::new(
            collaborators.chain_reader,
            config.bridge_address,
            config.confirmations,
        );
        let (queue, receiver) = submission_queue(&config.destination_chain_name);

        let poll_retry = RetryConfig {
            max_retries: u32::MAX,
            initial_backoff: config.poll_interval,
            max_backoff: config.max_poll_backoff.max(config.poll_interval),
            backoff_multiplier: 2.0,
        };

        let status = Arc::new(RwLock::new(RelayStatus {
            state: RelayState::Init,
            last_processed_block: cursor.position(),
            chain_head: None,
            queue_depth: 0,
            registered_nonces: 0,
            successful_polls: 0,
            consecutive_failures: 0,
        }));

        info!(
            source = %config.source_chain_name,
            destination = %config.destination_chain_name,
            bridge = %config.bridge_address,
            confirmations = config.confirmations,
            last_processed_block = cursor.position(),
            "Relay orchestrator initialized"
        );

        Ok(Self {
            config,
            poller,
            cursor,
            queue,
            receiver,
            mint_client: collaborators.mint_client,
            dead_letters: collaborators.dead_letters,
            metrics,
            status,
            state_tx,
            poll_retry,
            consecutive_failures: 0,
            last_chain_head: None,
            resume_checked: false,
            next_worker_id: 0,
        })
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state_tx.subscribe()
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Run until `shutdown` is cancelled, then drain and persist.
    ///
    /// Returns the scan state written by the final persist.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<ScanState> {
        info!("Relay starting");
        self.set_state(RelayState::Running).await;

        let submit_cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        for _ in 0..self.config.submitter_workers.max(1) {
            self.spawn_worker(&mut workers, &submit_cancel);
        }

        'relay: loop {
            self.supervise_workers(&mut workers, &submit_cancel);

            let delay = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'relay,
                result = self.iterate() => self.after_iteration(result).await,
            };

            // Keep replacing dead workers while waiting, including circuit breaker pauses
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break 'relay,
                    Some(exited) = workers.join_next() => {
                        self.replace_worker(&mut workers, exited, &submit_cancel);
                    }
                    _ = &mut sleep => break,
                }
            }
        }

        self.drain(workers, submit_cancel).await;

        let persisted = self.cursor.persist().await;
        self.set_state(RelayState::Stopped).await;

        match persisted {
            Ok(()) => {
                info!(
                    last_processed_block = self.cursor.position(),
                    "Relay has been shut down gracefully"
                );
                Ok(self.cursor.state())
            }
            Err(e) => {
                error!(
                    last_processed_block = self.cursor.position(),
                    error = %e,
                    "Final scan state save failed"
                );
                Err(eyre::Report::new(e).wrap_err("Failed to persist scan state on shutdown"))
            }
        }
    }

    /// One poll → decode → enqueue → advance → persist pass
    pub async fn iterate(&mut self) -> Result<Iteration> {
        let cursor = self.cursor.position();

        match self.poller.poll(cursor).await? {
            PollOutcome::NoWorkYet { chain_head } => {
                self.observe_head(chain_head);
                info!(
                    chain_head,
                    last_processed_block = cursor,
                    confirmations = self.poller.confirmations(),
                    "Waiting for new blocks to be confirmed"
                );
                Ok(Iteration::Idle { chain_head })
            }
            PollOutcome::Fetched {
                range,
                chain_head,
                logs,
            } => {
                self.observe_head(chain_head);

                let summary = self.relay_logs(logs);
                self.cursor.advance(range.to);
                self.metrics.blocks_scanned_total.inc_by(range.len());
                self.metrics
                    .last_processed_block
                    .set(self.cursor.position() as i64);

                self.cursor
                    .persist()
                    .await
                    .wrap_err("Failed to persist scan state")?;

                info!(
                    from_block = range.from,
                    to_block = range.to,
                    logs = summary.logs,
                    accepted = summary.accepted,
                    duplicates = summary.duplicates,
                    malformed = summary.malformed,
                    "Block range processed"
                );
                Ok(Iteration::Scanned { range, summary })
            }
        }
    }

    /// Decode and enqueue one range's logs. Synchronous, so the batch is
    /// never split by a shutdown.
    fn relay_logs(&mut self, logs: Vec<RawLog>) -> BatchSummary {
        let mut summary = BatchSummary {
            logs: logs.len(),
            ..Default::default()
        };
        self.metrics.logs_fetched_total.inc_by(logs.len() as u64);

        if logs.is_empty() {
            debug!("No relevant logs found in this range");
        }

        for log in logs {
            let event = match decode_lock_event(&log) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        block_number = e.block_number(),
                        error = %e,
                        "Dropping malformed lock log"
                    );
                    self.metrics.decode_failures_total.inc();
                    summary.malformed += 1;
                    continue;
                }
            };

            self.metrics.events_decoded_total.inc();
            info!(
                block_number = event.block_number,
                nonce = event.nonce,
                "Parsed lock event"
            );

            match self.queue.enqueue(event) {
                EnqueueOutcome::Accepted => {
                    self.metrics.events_enqueued_total.inc();
                    summary.accepted += 1;
                }
                EnqueueOutcome::Duplicate => {
                    self.metrics.duplicate_nonces_total.inc();
                    summary.duplicates += 1;
                }
                EnqueueOutcome::Closed => {
                    // Receiver is held by the orchestrator, so this means a bug
                    error!("Submission queue closed while relay is running");
                }
            }
        }

        self.metrics.queue_depth.set(self.queue.len() as i64);
        summary
    }

    fn observe_head(&mut self, chain_head: u64) {
        self.metrics.chain_head.set(chain_head as i64);
        self.last_chain_head = Some(chain_head);

        if self.resume_checked {
            return;
        }
        self.resume_checked = true;

        let confirmed_head = chain_head.saturating_sub(self.poller.confirmations());
        if self.cursor.position() > confirmed_head {
            warn!(
                last_processed_block = self.cursor.position(),
                confirmed_head,
                chain_head,
                "Stored cursor is ahead of the confirmed chain head (reorg or wrong network?); \
                 holding position until the chain catches up"
            );
        }
    }

    /// Book-keeping after an iteration; returns how long to wait before the next one
    async fn after_iteration(&mut self, result: Result<Iteration>) -> Duration {
        let succeeded = result.is_ok();
        let delay = match result {
            Ok(_) => {
                if self.consecutive_failures > 0 {
                    info!(
                        failures = self.consecutive_failures,
                        "Poll loop recovered"
                    );
                }
                self.consecutive_failures = 0;
                self.config.poll_interval
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.metrics.poll_errors_total.inc();

                let error_class = classify_error(&format!("{:#}", e));
                let backoff = self
                    .poll_retry
                    .backoff_for_attempt(self.consecutive_failures - 1);
                error!(
                    error = ?e,
                    ?error_class,
                    consecutive_failures = self.consecutive_failures,
                    next_backoff_ms = backoff.as_millis() as u64,
                    "Error in relay poll loop, will retry"
                );

                if self.consecutive_failures >= self.config.circuit_breaker.threshold {
                    warn!(
                        failures = self.consecutive_failures,
                        pause_secs = self.config.circuit_breaker.pause_duration.as_secs(),
                        "Poll circuit breaker tripped, pausing"
                    );
                    self.metrics.circuit_breaker_trips_total.inc();
                    self.consecutive_failures = 0;
                    self.config.circuit_breaker.pause_duration
                } else {
                    backoff
                }
            }
        };

        self.metrics
            .consecutive_poll_failures
            .set(self.consecutive_failures as i64);

        let mut status = self.status.write().await;
        status.last_processed_block = self.cursor.position();
        status.chain_head = self.last_chain_head;
        status.queue_depth = self.queue.len();
        status.registered_nonces = self.queue.registered_nonces();
        status.consecutive_failures = self.consecutive_failures;
        if succeeded {
            status.successful_polls += 1;
        }

        delay
    }

    fn spawn_worker(&mut self, workers: &mut JoinSet<usize>, cancel: &CancellationToken) -> usize {
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;

        let submitter = MintSubmitter::new(
            worker_id,
            &self.config.destination_chain_name,
            self.receiver.clone(),
            self.mint_client.clone(),
            self.dead_letters.clone(),
            self.config.submit_retry.clone(),
            self.metrics.clone(),
        );
        let cancel = cancel.clone();
        workers.spawn(async move {
            submitter.run(cancel).await;
            worker_id
        });
        worker_id
    }

    /// Replace workers that died (panicked) while the poll loop was busy
    fn supervise_workers(&mut self, workers: &mut JoinSet<usize>, cancel: &CancellationToken) {
        while let Some(exited) = workers.try_join_next() {
            self.replace_worker(workers, exited, cancel);
        }
    }

    fn replace_worker(
        &mut self,
        workers: &mut JoinSet<usize>,
        exited: std::result::Result<usize, JoinError>,
        cancel: &CancellationToken,
    ) {
        match exited {
            Ok(worker_id) => {
                warn!(worker = worker_id, "Mint submitter exited unexpectedly");
            }
            Err(e) => {
                error!(error = %e, "Mint submitter task panicked");
            }
        }

        let worker_id = self.spawn_worker(workers, cancel);
        self.metrics.submitter_restarts_total.inc();
        info!(worker = worker_id, "Restarted mint submitter");
    }

    /// Stop the workers and wait for them, up to the drain timeout
    async fn drain(&mut self, mut workers: JoinSet<usize>, submit_cancel: CancellationToken) {
        self.set_state(RelayState::Draining).await;
        info!(
            queued = self.queue.len(),
            workers = workers.len(),
            "Shutting down relay and mint submitters"
        );

        submit_cancel.cancel();

        let joined = tokio::time::timeout(self.config.drain_timeout, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Mint submitter task failed during drain");
                }
            }
        })
        .await;

        if joined.is_err() {
            let in_flight = workers.len();
            warn!(
                in_flight,
                timeout_ms = self.config.drain_timeout.as_millis() as u64,
                "Drain timeout reached, abandoning in-flight mints"
            );
            self.metrics.mints_abandoned_total.inc_by(in_flight as u64);
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        let unsent = self.queue.len();
        if unsent > 0 {
            warn!(unsent, "Queued mints were not submitted before shutdown");
        }
    }

    async fn set_state(&self, state: RelayState) {
        self.state_tx.send_replace(state);
        self.status.write().await.state = state;
        debug!(%state, "Relay state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::simulated::SimulationConfig;
    use crate::chain::SimulatedChainReader;
    use crate::cursor::MemoryStateStore;
    use crate::submitter::{MemoryDeadLetterSink, SimulatedMintClient};
    use eyre::eyre;

    async fn orchestrator(config: OrchestratorConfig) -> RelayOrchestrator {
        let collaborators = Collaborators {
            chain_reader: Arc::new(SimulatedChainReader::new(
                "sim",
                config.bridge_address,
                SimulationConfig {
                    seed: Some(7),
                    ..SimulationConfig::default()
                },
            )),
            state_store: Arc::new(MemoryStateStore::new()),
            mint_client: Arc::new(SimulatedMintClient::new(
                "sim",
                Duration::ZERO,
                Duration::ZERO,
                0.0,
            )),
            dead_letters: Arc::new(MemoryDeadLetterSink::new()),
        };
        RelayOrchestrator::new(config, collaborators, Arc::new(Metrics::new()))
            .await
            .unwrap()
    }

    #[test]
    fn test_relay_state_names() {
        assert_eq!(RelayState::Draining.to_string(), "draining");
        assert_eq!(
            serde_json::to_string(&RelayState::Stopped).unwrap(),
            "\"stopped\""
        );
    }

    #[tokio::test]
    async fn test_poll_backoff_starts_at_interval_and_caps() {
        let mut relay = orchestrator(OrchestratorConfig {
            poll_interval: Duration::from_secs(5),
            max_poll_backoff: Duration::from_secs(30),
            ..OrchestratorConfig::default()
        })
        .await;

        let mut delays = Vec::new();
        for _ in 0..5 {
            delays.push(relay.after_iteration(Err(eyre!("connection reset"))).await);
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(30),
                Duration::from_secs(30),
            ]
        );

        let ok = relay
            .after_iteration(Ok(Iteration::Idle { chain_head: 1 }))
            .await;
        assert_eq!(ok, Duration::from_secs(5));
        assert_eq!(relay.consecutive_failures, 0);
        assert_eq!(relay.status.read().await.successful_polls, 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_pauses_and_resets() {
        let mut relay = orchestrator(OrchestratorConfig {
            circuit_breaker: CircuitBreakerConfig {
                threshold: 2,
                pause_duration: Duration::from_secs(120),
            },
            ..OrchestratorConfig::default()
        })
        .await;

        relay.after_iteration(Err(eyre!("timeout"))).await;
        let paused = relay.after_iteration(Err(eyre!("timeout"))).await;
        assert_eq!(paused, Duration::from_secs(120));
        assert_eq!(relay.consecutive_failures, 0);
        assert_eq!(relay.metrics.circuit_breaker_trips_total.get(), 1);
        assert_eq!(relay.status.read().await.successful_polls, 0);
    }
}

//! Mint submission workers with retry, dead letters and cancellation

use alloy::primitives::B256;
use eyre::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::Metrics;
use crate::queue::SubmissionReceiver;
use crate::types::ParsedLockEvent;

pub mod client;
pub mod dead_letter;
pub mod retry;

pub use client::{MintClient, SimulatedMintClient};
pub use dead_letter::{DeadLetter, DeadLetterSink, JsonlDeadLetterSink, MemoryDeadLetterSink};
pub use retry::{classify_error, RetryAction, RetryConfig, RetryContext};

/// What happened to one dequeued event
#[derive(Debug, Clone, PartialEq)]
pub enum MintOutcome {
    Confirmed(B256),
    /// Destination reported the nonce as already minted
    Skipped,
    DeadLettered,
    /// Shutdown arrived while the item was waiting to retry
    Abandoned,
}

/// Consumer that drains the submission queue and drives each mint through
/// submit → confirm.
pub struct MintSubmitter {
    worker_id: usize,
    chain_name: String,
    receiver: SubmissionReceiver,
    client: Arc<dyn MintClient>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl MintSubmitter {
    pub fn new(
        worker_id: usize,
        chain_name: &str,
        receiver: SubmissionReceiver,
        client: Arc<dyn MintClient>,
        dead_letters: Arc<dyn DeadLetterSink>,
        retry: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            worker_id,
            chain_name: chain_name.to_string(),
            receiver,
            client,
            dead_letters,
            retry,
            metrics,
        }
    }

    /// Run until cancelled or the queue closes.
    ///
    /// Cancellation is observed between items: an item already taken from
    /// the queue is carried to completion unless it is waiting out a retry
    /// backoff, in which case it is abandoned.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            chain = %self.chain_name,
            worker = self.worker_id,
            "Mint submitter started"
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.receiver.dequeue() => match next {
                    Some(event) => event,
                    None => {
                        info!(worker = self.worker_id, "Submission queue closed");
                        break;
                    }
                },
            };
            self.metrics.queue_depth.set(self.receiver.len() as i64);

            self.process(event, &cancel).await;
        }

        info!(
            chain = %self.chain_name,
            worker = self.worker_id,
            remaining = self.receiver.len(),
            "Mint submitter is shutting down"
        );
    }

    /// Process one event with retries. Never returns an error: failures end
    /// in a dead letter, a skip, or abandonment.
    pub async fn process(&self, event: ParsedLockEvent, cancel: &CancellationToken) -> MintOutcome {
        let mut ctx = RetryContext::new(self.retry.clone());

        loop {
            let error = match self.attempt(&event).await {
                Ok(tx_hash) => {
                    self.metrics.mints_confirmed_total.inc();
                    return MintOutcome::Confirmed(tx_hash);
                }
                Err(e) => format!("{:#}", e),
            };

            self.metrics.mint_failures_total.inc();
            ctx.record_failure(error.clone());

            match ctx.next_action() {
                RetryAction::RetryAfter(backoff) => {
                    warn!(
                        chain = %self.chain_name,
                        nonce = event.nonce,
                        attempt = ctx.attempt,
                        max = self.retry.max_retries,
                        ?backoff,
                        error = %error,
                        "Mint failed, retrying after backoff"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            warn!(
                                chain = %self.chain_name,
                                nonce = event.nonce,
                                "Shutdown during retry backoff, abandoning mint"
                            );
                            self.metrics.mints_abandoned_total.inc();
                            return MintOutcome::Abandoned;
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                RetryAction::Skip => {
                    info!(
                        chain = %self.chain_name,
                        nonce = event.nonce,
                        "Mint already processed on destination, skipping"
                    );
                    self.metrics.mints_skipped_total.inc();
                    return MintOutcome::Skipped;
                }
                RetryAction::DeadLetter => {
                    self.dead_letter(event, error, ctx.attempt).await;
                    return MintOutcome::DeadLettered;
                }
            }
        }
    }

    async fn attempt(&self, event: &ParsedLockEvent) -> Result<B256> {
        info!(
            chain = %self.chain_name,
            nonce = event.nonce,
            recipient = %event.recipient_address,
            "Processing mint, signing and sending"
        );

        let tx_hash = self.client.submit_mint(event).await?;
        self.metrics.mints_submitted_total.inc();
        info!(chain = %self.chain_name, nonce = event.nonce, %tx_hash, "Mint transaction sent");

        self.client.wait_for_confirmation(tx_hash, event).await?;
        info!(
            chain = %self.chain_name,
            nonce = event.nonce,
            %tx_hash,
            "Mint transaction confirmed"
        );
        Ok(tx_hash)
    }

    async fn dead_letter(&self, event: ParsedLockEvent, error: String, attempts: u32) {
        let nonce = event.nonce;
        let block_number = event.block_number;
        error!(
            chain = %self.chain_name,
            nonce,
            block_number,
            attempts,
            error = %error,
            "Mint failed permanently, moving to dead letter sink"
        );
        self.metrics.dead_letters_total.inc();

        let entry = DeadLetter {
            event,
            error,
            attempts,
            failed_at: chrono::Utc::now(),
        };
        if let Err(e) = self.dead_letters.record(entry).await {
            error!(nonce, error = %e, "Failed to record dead letter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{submission_queue, EnqueueOutcome};
    use alloy::primitives::{Address, U256};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    fn event(nonce: u64) -> ParsedLockEvent {
        ParsedLockEvent {
            source_token: Address::ZERO,
            destination_chain_id: 80001,
            recipient_address: Address::repeat_byte(0x22),
            amount: U256::from(100u64),
            nonce,
            block_number: nonce,
        }
    }

    /// Scripted client: per-nonce list of errors to return before succeeding
    #[derive(Default)]
    struct ScriptedClient {
        failures: Mutex<HashMap<u64, Vec<&'static str>>>,
        minted: Mutex<Vec<u64>>,
    }

    impl ScriptedClient {
        fn failing(nonce: u64, errors: Vec<&'static str>) -> Self {
            let client = Self::default();
            client.failures.lock().unwrap().insert(nonce, errors);
            client
        }
    }

    #[async_trait]
    impl MintClient for ScriptedClient {
        async fn submit_mint(&self, event: &ParsedLockEvent) -> Result<B256> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let next = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&event.nonce)
                .and_then(|errs| if errs.is_empty() { None } else { Some(errs.remove(0)) });
            if let Some(err) = next {
                return Err(eyre::eyre!(err));
            }
            Ok(B256::with_last_byte(event.nonce as u8))
        }

        async fn wait_for_confirmation(&self, _tx: B256, event: &ParsedLockEvent) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.minted.lock().unwrap().push(event.nonce);
            Ok(())
        }
    }

    fn submitter(
        client: Arc<ScriptedClient>,
        sink: Arc<MemoryDeadLetterSink>,
        max_retries: u32,
    ) -> (crate::queue::SubmissionQueue, MintSubmitter) {
        let (queue, rx) = submission_queue("dest");
        let submitter = MintSubmitter::new(
            0,
            "dest",
            rx,
            client,
            sink,
            RetryConfig {
                max_retries,
                initial_backoff: Duration::from_secs(1),
                ..Default::default()
            },
            Arc::new(Metrics::new()),
        );
        (queue, submitter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_processes_in_order_until_queue_closes() {
        let client = Arc::new(ScriptedClient::default());
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let (mut queue, submitter) = submitter(client.clone(), sink, 3);

        for n in [5, 6, 7] {
            assert_eq!(queue.enqueue(event(n)), EnqueueOutcome::Accepted);
        }
        drop(queue);

        submitter.run(CancellationToken::new()).await;
        assert_eq!(*client.minted.lock().unwrap(), vec![5, 6, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let client = Arc::new(ScriptedClient::failing(1, vec!["connection reset", "timeout"]));
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let (_queue, submitter) = submitter(client.clone(), sink.clone(), 3);

        let outcome = submitter.process(event(1), &CancellationToken::new()).await;
        assert_eq!(outcome, MintOutcome::Confirmed(B256::with_last_byte(1)));
        assert_eq!(submitter.metrics.mint_failures_total.get(), 2);
        assert!(sink.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_goes_to_dead_letters() {
        let client = Arc::new(ScriptedClient::failing(2, vec!["timeout"; 5]));
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let (_queue, submitter) = submitter(client.clone(), sink.clone(), 2);

        let outcome = submitter.process(event(2), &CancellationToken::new()).await;
        assert_eq!(outcome, MintOutcome::DeadLettered);

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.nonce, 2);
        assert_eq!(entries[0].attempts, 3);
        assert!(client.minted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let client = Arc::new(ScriptedClient::failing(3, vec!["execution reverted"]));
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let (_queue, submitter) = submitter(client, sink.clone(), 5);

        let outcome = submitter.process(event(3), &CancellationToken::new()).await;
        assert_eq!(outcome, MintOutcome::DeadLettered);
        assert_eq!(sink.entries()[0].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_minted_is_skipped() {
        let client = Arc::new(ScriptedClient::failing(4, vec!["nonce already minted"]));
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let (_queue, submitter) = submitter(client, sink.clone(), 5);

        let outcome = submitter.process(event(4), &CancellationToken::new()).await;
        assert_eq!(outcome, MintOutcome::Skipped);
        assert!(sink.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_minted_nonce_with_status_like_digits_is_skipped() {
        let cases: [(u64, &'static str); 3] = [
            (1400, "mint for nonce 1400 already minted"),
            (1502, "mint for nonce 1502 already minted"),
            (75030, "mint for nonce 75030 already minted"),
        ];
        for (nonce, error) in cases {
            let client = Arc::new(ScriptedClient::failing(nonce, vec![error]));
            let sink = Arc::new(MemoryDeadLetterSink::new());
            let (_queue, submitter) = submitter(client, sink.clone(), 3);

            let outcome = submitter.process(event(nonce), &CancellationToken::new()).await;
            assert_eq!(outcome, MintOutcome::Skipped, "nonce {}", nonce);
            assert!(sink.entries().is_empty());
            assert_eq!(submitter.metrics.mint_failures_total.get(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_for_status_like_nonce_is_not_retried() {
        let client = Arc::new(ScriptedClient::failing(
            5030,
            vec!["execution reverted for nonce 5030"; 4],
        ));
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let (_queue, submitter) = submitter(client, sink.clone(), 3);

        let outcome = submitter.process(event(5030), &CancellationToken::new()).await;
        assert_eq!(outcome, MintOutcome::DeadLettered);
        assert_eq!(sink.entries()[0].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_abandons() {
        let client = Arc::new(ScriptedClient::failing(8, vec!["timeout"; 5]));
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let (_queue, submitter) = submitter(client, sink.clone(), 5);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = submitter.process(event(8), &cancel).await;
        assert_eq!(outcome, MintOutcome::Abandoned);
        assert!(sink.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel_and_leaves_queue() {
        let client = Arc::new(ScriptedClient::default());
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let (mut queue, submitter) = submitter(client.clone(), sink, 3);

        let cancel = CancellationToken::new();
        cancel.cancel();
        queue.enqueue(event(1));
        submitter.run(cancel).await;

        assert!(client.minted.lock().unwrap().is_empty());
        assert_eq!(queue.len(), 1);
    }
}

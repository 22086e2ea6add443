//! Nonce-deduplicating submission queue
//!
//! The producer half ([`SubmissionQueue`]) owns the nonce registry and is
//! held by the poll loop only, so the registry needs no lock. The consumer
//! half ([`SubmissionReceiver`]) is cloneable; workers sharing it take items
//! in insertion order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::types::ParsedLockEvent;

/// Result of [`SubmissionQueue::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended to the FIFO and the nonce registered
    Accepted,
    /// Nonce already seen by this process; event discarded
    Duplicate,
    /// Every consumer handle is gone; event discarded, nonce not registered
    Closed,
}

/// Create a connected producer/consumer pair
pub fn submission_queue(chain_name: &str) -> (SubmissionQueue, SubmissionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let queue = SubmissionQueue {
        chain_name: chain_name.to_string(),
        tx,
        registry: HashSet::new(),
        pending: pending.clone(),
    };
    let receiver = SubmissionReceiver {
        rx: Arc::new(Mutex::new(rx)),
        pending,
    };
    (queue, receiver)
}

/// Producer half: FIFO writer plus the in-memory nonce registry.
///
/// The registry lives as long as this handle and is never persisted, so a
/// restarted process may enqueue a nonce again.
pub struct SubmissionQueue {
    chain_name: String,
    tx: mpsc::UnboundedSender<ParsedLockEvent>,
    registry: HashSet<u64>,
    pending: Arc<AtomicUsize>,
}

impl SubmissionQueue {
    pub fn enqueue(&mut self, event: ParsedLockEvent) -> EnqueueOutcome {
        if self.registry.contains(&event.nonce) {
            warn!(
                chain = %self.chain_name,
                nonce = event.nonce,
                block_number = event.block_number,
                "Duplicate nonce detected, skipping mint"
            );
            return EnqueueOutcome::Duplicate;
        }

        let nonce = event.nonce;
        let recipient = event.recipient_address;
        let amount = event.display_amount();

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(
                chain = %self.chain_name,
                nonce,
                "Submission queue has no consumers, dropping event"
            );
            return EnqueueOutcome::Closed;
        }
        self.registry.insert(nonce);

        info!(
            chain = %self.chain_name,
            nonce,
            %recipient,
            %amount,
            "Queued mint transaction"
        );
        EnqueueOutcome::Accepted
    }

    /// Whether this nonce has been accepted during the process lifetime
    pub fn has_seen(&self, nonce: u64) -> bool {
        self.registry.contains(&nonce)
    }

    /// Number of distinct nonces accepted so far
    pub fn registered_nonces(&self) -> usize {
        self.registry.len()
    }

    /// Items accepted but not yet dequeued
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer half of the submission queue
#[derive(Clone)]
pub struct SubmissionReceiver {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<ParsedLockEvent>>>,
    pending: Arc<AtomicUsize>,
}

impl SubmissionReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` once the producer is dropped and the FIFO is drained.
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn dequeue(&self) -> Option<ParsedLockEvent> {
        let mut rx = self.rx.lock().await;
        let event = rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(event)
    }

    /// Items accepted but not yet dequeued
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

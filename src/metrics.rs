//! Prometheus metrics for the relay
//!
//! Held in a struct with its own registry so every orchestrator (and every
//! test) gets an isolated set.

use prometheus::{IntCounter, IntGauge, Registry};

pub struct Metrics {
    // Source side
    pub blocks_scanned_total: IntCounter,
    pub logs_fetched_total: IntCounter,
    pub events_decoded_total: IntCounter,
    pub decode_failures_total: IntCounter,
    pub duplicate_nonces_total: IntCounter,
    pub events_enqueued_total: IntCounter,
    pub poll_errors_total: IntCounter,
    pub circuit_breaker_trips_total: IntCounter,
    pub last_processed_block: IntGauge,
    pub chain_head: IntGauge,
    pub consecutive_poll_failures: IntGauge,

    // Destination side
    pub mints_submitted_total: IntCounter,
    pub mints_confirmed_total: IntCounter,
    pub mint_failures_total: IntCounter,
    pub mints_skipped_total: IntCounter,
    pub mints_abandoned_total: IntCounter,
    pub dead_letters_total: IntCounter,
    pub submitter_restarts_total: IntCounter,
    pub queue_depth: IntGauge,

    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let metric = IntCounter::new(name, help).expect("constant metric name is valid");
    registry
        .register(Box::new(metric.clone()))
        .expect("metric names are unique within the registry");
    metric
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let metric = IntGauge::new(name, help).expect("constant metric name is valid");
    registry
        .register(Box::new(metric.clone()))
        .expect("metric names are unique within the registry");
    metric
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        Self {
            blocks_scanned_total: counter(
                &registry,
                "relay_blocks_scanned_total",
                "Total number of confirmed source blocks scanned",
            ),
            logs_fetched_total: counter(
                &registry,
                "relay_logs_fetched_total",
                "Total number of bridge logs fetched",
            ),
            events_decoded_total: counter(
                &registry,
                "relay_events_decoded_total",
                "Total number of lock events decoded",
            ),
            decode_failures_total: counter(
                &registry,
                "relay_decode_failures_total",
                "Total number of malformed logs dropped",
            ),
            duplicate_nonces_total: counter(
                &registry,
                "relay_duplicate_nonces_total",
                "Total number of events discarded for a repeated nonce",
            ),
            events_enqueued_total: counter(
                &registry,
                "relay_events_enqueued_total",
                "Total number of events accepted into the submission queue",
            ),
            poll_errors_total: counter(
                &registry,
                "relay_poll_errors_total",
                "Total number of failed poll iterations",
            ),
            circuit_breaker_trips_total: counter(
                &registry,
                "relay_circuit_breaker_trips_total",
                "Times the poll circuit breaker tripped",
            ),
            last_processed_block: gauge(
                &registry,
                "relay_last_processed_block",
                "Last fully processed source block",
            ),
            chain_head: gauge(
                &registry,
                "relay_chain_head",
                "Most recently observed source chain head",
            ),
            consecutive_poll_failures: gauge(
                &registry,
                "relay_consecutive_poll_failures",
                "Number of consecutive failed poll iterations",
            ),
            mints_submitted_total: counter(
                &registry,
                "relay_mints_submitted_total",
                "Total number of mint transactions broadcast",
            ),
            mints_confirmed_total: counter(
                &registry,
                "relay_mints_confirmed_total",
                "Total number of mint transactions confirmed",
            ),
            mint_failures_total: counter(
                &registry,
                "relay_mint_failures_total",
                "Total number of failed mint attempts",
            ),
            mints_skipped_total: counter(
                &registry,
                "relay_mints_skipped_total",
                "Mints skipped because the destination already processed them",
            ),
            mints_abandoned_total: counter(
                &registry,
                "relay_mints_abandoned_total",
                "Mints abandoned during shutdown",
            ),
            dead_letters_total: counter(
                &registry,
                "relay_dead_letters_total",
                "Mints moved to the dead letter sink",
            ),
            submitter_restarts_total: counter(
                &registry,
                "relay_submitter_restarts_total",
                "Mint submitter workers replaced after exiting",
            ),
            queue_depth: gauge(
                &registry,
                "relay_queue_depth",
                "Events waiting in the submission queue",
            ),
            registry,
        }
    }
}

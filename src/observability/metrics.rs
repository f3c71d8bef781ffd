//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lifecycle_requests_started_total` (counter): requests entering the engine
//! - `lifecycle_responses_total` (counter): responses finalized, by outcome
//! - `lifecycle_request_duration_seconds` (histogram): request open → close
//! - `lifecycle_in_flight` (gauge): requests started but not yet closed
//! - `lifecycle_interrupts_total` (counter): deadline-forced replies
//! - `lifecycle_forced_terminations_total` (counter): admin kills, by outcome
//! - `lifecycle_step_failures_total` (counter): failed pipeline steps, by step
//!
//! Recording is a no-op until a recorder is installed, so library code can
//! call these unconditionally.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

use crate::events::{EventBus, EventKind, EventPayload, Signal, SubscriptionId};
use crate::request::TerminateOutcome;

const REQUESTS_STARTED: &str = "lifecycle_requests_started_total";
const RESPONSES: &str = "lifecycle_responses_total";
const REQUEST_DURATION: &str = "lifecycle_request_duration_seconds";
const IN_FLIGHT: &str = "lifecycle_in_flight";
const INTERRUPTS: &str = "lifecycle_interrupts_total";
const FORCED_TERMINATIONS: &str = "lifecycle_forced_terminations_total";
const STEP_FAILURES: &str = "lifecycle_step_failures_total";

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )?
        .install()?;

    describe();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn describe() {
    describe_counter!(REQUESTS_STARTED, "Requests that entered the engine");
    describe_counter!(RESPONSES, "Responses finalized, by outcome");
    describe_histogram!(REQUEST_DURATION, "Time from request start to request close");
    describe_gauge!(IN_FLIGHT, "Requests started and not yet closed");
    describe_counter!(INTERRUPTS, "Requests finalized by the deadline supervisor");
    describe_counter!(FORCED_TERMINATIONS, "Administrative terminations, by outcome");
    describe_counter!(STEP_FAILURES, "Pipeline steps that failed or panicked");
}

/// Derive the request counters from lifecycle events.
pub fn install(bus: &Arc<EventBus>) -> Vec<SubscriptionId> {
    let mut subscriptions = Vec::new();

    subscriptions.extend(
        bus.subscribe(&EventKind::request(Signal::Start).name(), |_| {
            counter!(REQUESTS_STARTED).increment(1);
            gauge!(IN_FLIGHT).increment(1.0);
            Ok(())
        })
        .ok(),
    );

    subscriptions.extend(
        bus.subscribe(&EventKind::request(Signal::Close).name(), |event| {
            gauge!(IN_FLIGHT).decrement(1.0);
            if let EventPayload::Elapsed { elapsed } = event.payload {
                histogram!(REQUEST_DURATION).record(elapsed.as_secs_f64());
            }
            Ok(())
        })
        .ok(),
    );

    subscriptions.extend(
        bus.subscribe(&EventKind::response(Signal::End).name(), |_| {
            counter!(RESPONSES, "outcome" => "dispatched").increment(1);
            Ok(())
        })
        .ok(),
    );

    subscriptions.extend(
        bus.subscribe(&EventKind::response(Signal::Error).name(), |_| {
            counter!(RESPONSES, "outcome" => "failed").increment(1);
            Ok(())
        })
        .ok(),
    );

    subscriptions
}

pub fn record_interrupt() {
    counter!(INTERRUPTS).increment(1);
}

pub fn record_forced_termination(outcome: TerminateOutcome) {
    counter!(FORCED_TERMINATIONS, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_step_failure(step: &str) {
    counter!(STEP_FAILURES, "step" => step.to_string()).increment(1);
}

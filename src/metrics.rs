use ::metrics::{counter, histogram};
use tracing::trace;

// Recorded through the `metrics` facade; the Prometheus recorder installed in
// `main` renders them at `/metrics`. Trace events mirror each sample.

pub fn inc_requests(route: &'static str) {
    counter!("propfeed_http_requests_total", "route" => route).increment(1);
    trace!(
        target = "propfeed.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    histogram!("propfeed_stage_duration_seconds", "stage" => stage)
        .record(elapsed_ms as f64 / 1000.0);
    trace!(
        target = "propfeed.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn entry_outcome(reference: &str, succeeded: bool) {
    let outcome = if succeeded { "succeeded" } else { "failed" };
    counter!("propfeed_entries_total", "outcome" => outcome).increment(1);
    trace!(
        target = "propfeed.metrics",
        reference = reference,
        succeeded = succeeded,
        "entry_outcome"
    );
}

pub fn run_finished(seen: usize, succeeded: usize, swept: bool) {
    let swept_label = if swept { "true" } else { "false" };
    counter!("propfeed_runs_total", "swept" => swept_label).increment(1);
    trace!(
        target = "propfeed.metrics",
        entries_seen = seen as u64,
        entries_succeeded = succeeded as u64,
        swept = swept,
        "run_finished"
    );
}

use tracing::trace;

// Lightweight metrics helpers; the Prometheus exporter is wired in main.

pub fn inc_requests(route: &'static str) {
    trace!(target = "c2c.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "c2c.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn analysis_completed(category: &'static str) {
    trace!(
        target = "c2c.metrics",
        category = category,
        "analysis_completed"
    );
}

// ABOUTME: Metric names and recording helpers for dispatch and LLM activity.
// ABOUTME: Uses the `metrics` facade; the binary decides whether to export them.

pub const COMMANDS_TOTAL: &str = "noko_commands_total";
pub const THROTTLED_TOTAL: &str = "noko_throttled_total";
pub const EVENTS_TOTAL: &str = "noko_events_total";
pub const LLM_REQUESTS_TOTAL: &str = "noko_llm_requests_total";
pub const LLM_LATENCY_SECONDS: &str = "noko_llm_latency_seconds";
pub const HANDLER_ERRORS_TOTAL: &str = "noko_handler_errors_total";
pub const MESSAGES_SENT_TOTAL: &str = "noko_messages_sent_total";
pub const ROOMS_JOINED: &str = "noko_rooms_joined";

pub fn record_command(command: &str) {
    metrics::counter!(COMMANDS_TOTAL, "command" => command.to_string()).increment(1);
}

pub fn record_throttled(command: &str) {
    metrics::counter!(THROTTLED_TOTAL, "command" => command.to_string()).increment(1);
}

pub fn record_outcome(outcome: &'static str) {
    metrics::counter!(EVENTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_llm_request(backend: &str, result: &'static str, elapsed_secs: f64) {
    metrics::counter!(LLM_REQUESTS_TOTAL, "backend" => backend.to_string(), "result" => result)
        .increment(1);
    metrics::histogram!(LLM_LATENCY_SECONDS, "backend" => backend.to_string())
        .record(elapsed_secs);
}

pub fn record_handler_error(plugin: &str) {
    metrics::counter!(HANDLER_ERRORS_TOTAL, "plugin" => plugin.to_string()).increment(1);
}

pub fn record_message_sent() {
    metrics::counter!(MESSAGES_SENT_TOTAL).increment(1);
}

pub fn set_rooms_joined(count: usize) {
    metrics::gauge!(ROOMS_JOINED).set(count as f64);
}

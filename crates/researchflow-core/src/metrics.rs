use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct WorkflowMetrics {
    runs: Counter<u64>,
    duration_ms: Histogram<f64>,
    node_invocations: Histogram<u64>,
    tool_calls: Counter<u64>,
}

static METRICS: OnceCell<WorkflowMetrics> = OnceCell::new();

fn handles() -> &'static WorkflowMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("researchflow.workflow");
        WorkflowMetrics {
            runs: meter
                .u64_counter("research_runs_total")
                .with_description("Total research runs by final status")
                .init(),
            duration_ms: meter
                .f64_histogram("research_run_duration_ms")
                .with_description("Research run wall-clock time in milliseconds")
                .init(),
            node_invocations: meter
                .u64_histogram("research_run_node_invocations")
                .with_description("Graph nodes executed per research run")
                .init(),
            tool_calls: meter
                .u64_counter("research_tool_calls_total")
                .with_description("Tool invocations by tool name and outcome")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("RESEARCHFLOW_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "RESEARCHFLOW_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export workflow metrics."
        );
    }
}

/// Record a finished run (no-op if no provider installed).
pub fn record_run_metrics(status: &str, duration_ms: u64, node_invocations: u64) {
    let metrics = handles();
    let attrs = [KeyValue::new("status", status.to_string())];

    metrics.runs.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
    metrics.node_invocations.record(node_invocations, &attrs);
}

/// Record a single tool invocation.
pub fn record_tool_metrics(tool: &str, ok: bool) {
    let attrs = [
        KeyValue::new("tool", tool.to_string()),
        KeyValue::new("outcome", if ok { "ok" } else { "error" }),
    ];
    handles().tool_calls.add(1, &attrs);
}

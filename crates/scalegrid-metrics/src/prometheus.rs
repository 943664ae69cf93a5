//! Prometheus text exposition format.
//!
//! Renders per-tenant controller status and the latest snapshot into the
//! Prometheus text exposition format.

use std::fmt::Write;

use scalegrid_core::{ControllerStatus, MetricsSnapshot};

/// Status plus latest snapshot (if any) for one tenant.
pub type TenantReport = (ControllerStatus, Option<MetricsSnapshot>);

/// Render tenant reports into Prometheus text format.
///
/// Produces GAUGE metrics with `tenant` labels. Snapshot-derived gauges
/// are omitted for tenants that have not completed a cycle yet.
pub fn render_prometheus(reports: &[TenantReport]) -> String {
    let mut out = String::new();

    gauge(
        &mut out,
        "scalegrid_running",
        "Whether the controller loop is running.",
        reports,
        |(st, _)| Some(u8::from(st.is_running).to_string()),
    );
    gauge(
        &mut out,
        "scalegrid_units",
        "Currently allocated compute units.",
        reports,
        |(st, _)| Some(st.current_unit_count.to_string()),
    );
    gauge(
        &mut out,
        "scalegrid_units_min",
        "Configured minimum units.",
        reports,
        |(st, _)| Some(st.config.min_units.to_string()),
    );
    gauge(
        &mut out,
        "scalegrid_units_max",
        "Configured maximum units.",
        reports,
        |(st, _)| Some(st.config.max_units.to_string()),
    );
    gauge(
        &mut out,
        "scalegrid_utilization",
        "Aggregate utilization (0.0-1.0).",
        reports,
        |(_, snap)| snap.as_ref().map(|s| format!("{:.4}", s.utilization)),
    );
    gauge(
        &mut out,
        "scalegrid_latency_ms",
        "Average request latency in milliseconds.",
        reports,
        |(_, snap)| snap.as_ref().map(|s| format!("{:.2}", s.average_latency_ms)),
    );
    gauge(
        &mut out,
        "scalegrid_queue_length",
        "Requests waiting for a unit.",
        reports,
        |(_, snap)| snap.as_ref().map(|s| s.queue_length.to_string()),
    );

    out
}

fn gauge(
    out: &mut String,
    name: &str,
    help: &str,
    reports: &[TenantReport],
    value: impl Fn(&TenantReport) -> Option<String>,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    for report in reports {
        if let Some(v) = value(report) {
            let _ = writeln!(out, "{name}{{tenant=\"{}\"}} {v}", report.0.tenant_id);
        }
    }
}

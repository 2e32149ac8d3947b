//! Boxed plain-text run report

use crate::export::RunSnapshot;
use std::fmt::Write;

const RULE: &str = "══════════════════════════════════════════════════════════════";

impl RunSnapshot {
    /// Render a fixed-width summary of the run for terminals
    pub fn render_report(&self) -> String {
        let run = &self.run;
        let metrics = &run.aggregate;
        let latency = &self.latency;
        let mut out = String::new();

        // Writing to a String cannot fail
        let _ = writeln!(out, "╔{}╗", RULE);
        let _ = writeln!(out, "║ {:<60} ║", format!("RUN REPORT: {}", run.config.name));
        let _ = writeln!(out, "╠{}╣", RULE);
        row(&mut out, "Run id", run.id.to_string());
        row(&mut out, "Kind", run.config.kind.to_string());
        row(&mut out, "State", run.state.to_string());
        row(&mut out, "Progress", format!("{:.1}%", run.progress_fraction * 100.0));
        if let Some(reason) = &run.failure_reason {
            row(&mut out, "Failure", reason.clone());
        }
        let _ = writeln!(out, "╠{}╣", RULE);
        row(&mut out, "Total events", metrics.total_events.to_string());
        row(&mut out, "Successful", metrics.success_count.to_string());
        row(&mut out, "Failed", metrics.failure_count.to_string());
        row(&mut out, "In progress", metrics.in_progress_count.to_string());
        row(&mut out, "Success rate", format!("{:.2}%", metrics.success_rate_percent));
        row(
            &mut out,
            "Throughput",
            format!("{:.2}/s", metrics.observed_throughput_per_sec),
        );

        if latency.samples > 0 {
            let _ = writeln!(out, "╠{}╣", RULE);
            let _ = writeln!(out, "║ {:<60} ║", "LATENCY (milliseconds)");
            row(&mut out, "  p50", latency.p50_millis.to_string());
            row(&mut out, "  p90", latency.p90_millis.to_string());
            row(&mut out, "  p99", latency.p99_millis.to_string());
            row(&mut out, "  p99.9", latency.p999_millis.to_string());
            row(
                &mut out,
                "  min / max",
                format!(
                    "{} / {}",
                    metrics.min_latency_millis.unwrap_or_default(),
                    metrics.max_latency_millis.unwrap_or_default()
                ),
            );
            row(&mut out, "  mean", format!("{:.2}", metrics.mean_latency_millis));
        }

        let _ = writeln!(out, "╚{}╝", RULE);
        out
    }
}

fn row(out: &mut String, label: &str, value: String) {
    let _ = writeln!(out, "║ {:<18} {:<41} ║", format!("{}:", label), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::LatencyProfile;
    use crate::types::{Run, RunConfig};
    use chrono::Utc;

    #[test]
    fn test_report_lists_counts() {
        let mut run = Run::draft(
            RunConfig {
                name: "nightly-api".to_string(),
                ..Default::default()
            },
            Utc::now(),
        );
        run.aggregate.total_events = 42;
        run.failure_reason = Some("connection refused".to_string());

        let snapshot = RunSnapshot {
            run,
            latency: LatencyProfile::new().unwrap().percentiles(),
        };
        let report = snapshot.render_report();

        assert!(report.contains("RUN REPORT: nightly-api"));
        assert!(report.contains("Total events:"));
        assert!(report.contains("42"));
        assert!(report.contains("connection refused"));
        // No samples, no latency section
        assert!(!report.contains("LATENCY"));
    }
}

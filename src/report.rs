use std::fmt::Write;

use crate::models::{Alert, ClassOverviewSnapshot, Trend};

fn trend_label(trend: Trend) -> &'static str {
    match trend {
        Trend::Improving => "improving",
        Trend::Stable => "stable",
        Trend::Declining => "declining",
        Trend::Critical => "critical",
        Trend::InsufficientData => "insufficient data",
    }
}

/// Render a class overview and its active alerts as a markdown report.
pub fn build_report(overview: &ClassOverviewSnapshot, alerts: &[Alert]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Class Performance Report");
    let _ = writeln!(
        output,
        "Class {}: {} students, {} submissions (generated {})",
        overview.class_id,
        overview.student_count,
        overview.total_submissions,
        overview.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    if overview.incomplete {
        let _ = writeln!(output, "_Partial snapshot: the scan hit its deadline._");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Struggling Topics");
    if overview.struggling_topics.is_empty() {
        let _ = writeln!(output, "No topic data recorded for this class.");
    } else {
        for topic in &overview.struggling_topics {
            let _ = writeln!(
                output,
                "- {} / {}: {:.0}% struggle rate across {} attempts",
                topic.subject,
                topic.topic,
                topic.struggle_rate * 100.0,
                topic.total_attempts
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Declining Outcomes");
    if overview.declining_outcomes.is_empty() {
        let _ = writeln!(output, "No outcomes are declining in this window.");
    } else {
        for outcome in &overview.declining_outcomes {
            let _ = writeln!(
                output,
                "- {} / {}: {} ({:+.0} points)",
                outcome.subject,
                outcome.learning_outcome,
                trend_label(outcome.trend),
                outcome.delta * 100.0
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Common Mistake Patterns");
    if overview.mistake_patterns.is_empty() {
        let _ = writeln!(output, "No repeated wrong options recorded.");
    } else {
        for pattern in &overview.mistake_patterns {
            let _ = writeln!(
                output,
                "- {}: option '{}' picked incorrectly {} times",
                pattern.topic, pattern.selected_answer, pattern.frequency
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## 7-Day Trend");
    let _ = writeln!(
        output,
        "Class trend is {} (mean delta {:+.0} points, {} students with data).",
        trend_label(overview.seven_day_trend.trend),
        overview.seven_day_trend.mean_delta * 100.0,
        overview.seven_day_trend.students_with_data
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Active Alerts");
    if alerts.is_empty() {
        let _ = writeln!(output, "No active alerts.");
    } else {
        let mut sorted: Vec<&Alert> = alerts.iter().collect();
        sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
        for alert in sorted.iter().take(10) {
            let _ = writeln!(
                output,
                "- [{:?}] {}: {}",
                alert.severity, alert.student_id, alert.message
            );
            for action in alert.recommended_actions.iter().take(2) {
                let _ = writeln!(output, "  - {action}");
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClassTrend;
    use chrono::Utc;

    fn empty_overview() -> ClassOverviewSnapshot {
        ClassOverviewSnapshot {
            class_id: "class_8A".to_string(),
            student_count: 0,
            total_submissions: 0,
            struggling_topics: Vec::new(),
            declining_outcomes: Vec::new(),
            mistake_patterns: Vec::new(),
            seven_day_trend: ClassTrend {
                trend: Trend::InsufficientData,
                mean_delta: 0.0,
                students_with_data: 0,
            },
            active_alert_count: 0,
            incomplete: false,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_windows_fall_back_to_placeholder_lines() {
        let report = build_report(&empty_overview(), &[]);
        assert!(report.contains("# Class Performance Report"));
        assert!(report.contains("No topic data recorded for this class."));
        assert!(report.contains("No outcomes are declining in this window."));
        assert!(report.contains("No active alerts."));
        assert!(report.contains("insufficient data"));
    }

    #[test]
    fn incomplete_snapshots_are_labeled() {
        let mut overview = empty_overview();
        overview.incomplete = true;
        let report = build_report(&overview, &[]);
        assert!(report.contains("Partial snapshot"));
    }
}

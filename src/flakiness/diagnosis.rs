use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::{error, warn};

use super::metrics::{FlakinessPattern, RunMetrics, Trend};
use crate::ai::{parse_json_reply, TextModel};
use crate::config::FLAKINESS_RECENT_FAILURES;
use crate::model::Run;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub diagnosis: String,
    pub fix: String,
}

pub fn build_prompt(
    title: &str,
    metrics: &RunMetrics,
    pattern: &FlakinessPattern,
    runs: &[Run],
) -> String {
    let mut prompt = String::from("Analyze this flaky test and provide diagnosis:\n\n");
    let _ = writeln!(prompt, "**Test**: {}", title);
    let _ = writeln!(prompt, "**Flakiness Score**: {}%", metrics.score);
    let _ = writeln!(
        prompt,
        "**Pass/Fail Ratio**: {}/{} (out of {} runs)",
        metrics.pass, metrics.fail, metrics.total
    );
    let _ = writeln!(prompt, "**Transitions**: {}", metrics.transitions);
    let _ = writeln!(prompt, "**Recent Pattern**: {}\n", pattern.sequence);

    if let Some(time) = &pattern.time_based {
        let _ = writeln!(prompt, "**Time Pattern**: {}", time.description);
    }
    if let Some(day) = &pattern.day_based {
        let _ = writeln!(prompt, "**Day Pattern**: {}", day.description);
    }
    let _ = writeln!(prompt, "**Trend**: {}\n", pattern.failure_rate_trend.as_str());

    prompt.push_str("**Recent Failures**:\n");
    for run in runs
        .iter()
        .filter(|r| !r.passed())
        .take(FLAKINESS_RECENT_FAILURES)
    {
        let analysis = run
            .result
            .as_ref()
            .and_then(|r| r.ai_analysis.as_deref())
            .unwrap_or("");
        let _ = writeln!(
            prompt,
            "- {}: {}",
            run.created_at.format("%Y-%m-%d %H:%M"),
            analysis
        );
    }

    prompt.push_str("\n**Task**: Based on this data, provide:\n");
    prompt.push_str("1. Root cause diagnosis (what's causing the flakiness?)\n");
    prompt.push_str("2. Suggested fix (how to make it more reliable?)\n\n");
    prompt.push_str("Return ONLY valid JSON:\n");
    prompt.push_str(r#"{"diagnosis": "brief diagnosis", "fix": "actionable fix suggestion"}"#);
    prompt
}

/// Deterministic diagnosis assembled from the detected patterns.
pub fn fallback_diagnosis(metrics: &RunMetrics, pattern: &FlakinessPattern) -> Diagnosis {
    let mut diagnosis = format!(
        "Test shows flaky behavior with {} transitions between pass/fail states. ",
        metrics.transitions
    );
    let mut fix = String::new();

    if let Some(time) = &pattern.time_based {
        let _ = write!(
            diagnosis,
            "{}. This suggests a time-dependent issue. ",
            time.description
        );
        let _ = write!(
            fix,
            "Investigate scheduled tasks, cron jobs, or server maintenance that might occur at {}:00. ",
            time.peak_hour
        );
    }

    if let Some(day) = &pattern.day_based {
        let _ = write!(
            diagnosis,
            "{}. This suggests a weekly pattern. ",
            day.description
        );
        let _ = write!(
            fix,
            "Check for weekly deployments, backups, or increased load on {}. ",
            day.peak_day
        );
    }

    if pattern.failure_rate_trend == Trend::Worsening {
        diagnosis.push_str("Failure rate is worsening over time. ");
        fix.push_str("Recent code changes may have introduced race conditions or timing issues. ");
    }

    if fix.is_empty() {
        fix.push_str(
            "Add explicit waits, use more stable selectors, or check for race conditions in the test steps.",
        );
    }

    Diagnosis {
        diagnosis: diagnosis.trim().to_string(),
        fix: fix.trim().to_string(),
    }
}

/// Ask the model for a diagnosis; any failure falls back to the
/// deterministic one.
pub async fn diagnose(
    model: Option<&dyn TextModel>,
    title: &str,
    metrics: &RunMetrics,
    pattern: &FlakinessPattern,
    runs: &[Run],
) -> Diagnosis {
    let Some(model) = model else {
        return fallback_diagnosis(metrics, pattern);
    };

    let prompt = build_prompt(title, metrics, pattern, runs);
    match model.complete(&prompt, None).await {
        Ok(reply) => match parse_json_reply::<Diagnosis>(&reply) {
            Ok(diagnosis) => diagnosis,
            Err(e) => {
                warn!("Unusable diagnosis reply, using fallback: {}", e);
                fallback_diagnosis(metrics, pattern)
            }
        },
        Err(e) => {
            error!("AI diagnosis failed: {}", e);
            fallback_diagnosis(metrics, pattern)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flakiness::metrics::{DayPattern, TimePattern};

    fn metrics() -> RunMetrics {
        RunMetrics {
            total: 10,
            pass: 6,
            fail: 4,
            transitions: 5,
            score: 59,
        }
    }

    fn plain_pattern() -> FlakinessPattern {
        FlakinessPattern {
            time_based: None,
            day_based: None,
            sequence: "✓✗✓✗✓".to_string(),
            failure_rate_trend: Trend::Stable,
        }
    }

    #[test]
    fn test_fallback_without_patterns() {
        let d = fallback_diagnosis(&metrics(), &plain_pattern());
        assert_eq!(
            d.diagnosis,
            "Test shows flaky behavior with 5 transitions between pass/fail states."
        );
        assert_eq!(
            d.fix,
            "Add explicit waits, use more stable selectors, or check for race conditions in the test steps."
        );
    }

    #[test]
    fn test_fallback_with_time_day_and_worsening() {
        let mut pattern = plain_pattern();
        pattern.time_based = Some(TimePattern {
            peak_hour: "14".to_string(),
            peak_rate: 75.0,
            description: "Failures peak at 14:00 (75.0% failure rate)".to_string(),
        });
        pattern.day_based = Some(DayPattern {
            peak_day: "Friday".to_string(),
            peak_rate: 80.0,
            description: "Failures peak on Friday (80.0% failure rate)".to_string(),
        });
        pattern.failure_rate_trend = Trend::Worsening;

        let d = fallback_diagnosis(&metrics(), &pattern);
        assert!(d.diagnosis.contains("Failures peak at 14:00 (75.0% failure rate). This suggests a time-dependent issue."));
        assert!(d.diagnosis.contains("This suggests a weekly pattern."));
        assert!(d.diagnosis.ends_with("Failure rate is worsening over time."));
        assert!(d.fix.starts_with("Investigate scheduled tasks, cron jobs, or server maintenance that might occur at 14:00."));
        assert!(d.fix.contains("increased load on Friday."));
        assert!(d.fix.ends_with("race conditions or timing issues."));
    }

    #[test]
    fn test_prompt_contents() {
        let prompt = build_prompt("Checkout flow", &metrics(), &plain_pattern(), &[]);
        assert!(prompt.starts_with("Analyze this flaky test and provide diagnosis:"));
        assert!(prompt.contains("**Test**: Checkout flow"));
        assert!(prompt.contains("**Pass/Fail Ratio**: 6/4 (out of 10 runs)"));
        assert!(prompt.contains("**Trend**: stable"));
        assert!(!prompt.contains("**Time Pattern**"));
        assert!(prompt.ends_with(r#"{"diagnosis": "brief diagnosis", "fix": "actionable fix suggestion"}"#));
    }
}

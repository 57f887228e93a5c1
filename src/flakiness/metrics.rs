//! Stability metrics and temporal failure patterns over a run history.
//!
//! Every function here takes the history newest first, the order the store
//! returns it in.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::FLAKINESS_SEQUENCE_LEN;
use crate::model::Run;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
}

impl Outcome {
    pub fn glyph(&self) -> char {
        match self {
            Outcome::Pass => '✓',
            Outcome::Fail => '✗',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSample {
    pub created_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl From<&Run> for RunSample {
    fn from(run: &Run) -> Self {
        Self {
            created_at: run.created_at,
            outcome: if run.passed() {
                Outcome::Pass
            } else {
                Outcome::Fail
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunMetrics {
    pub total: u32,
    pub pass: u32,
    pub fail: u32,
    pub transitions: u32,
    pub score: u8,
}

pub fn compute_metrics(samples: &[RunSample]) -> RunMetrics {
    let total = samples.len() as u32;
    let pass = samples
        .iter()
        .filter(|s| s.outcome == Outcome::Pass)
        .count() as u32;
    let fail = total - pass;
    let transitions = samples
        .windows(2)
        .filter(|w| w[0].outcome != w[1].outcome)
        .count() as u32;

    RunMetrics {
        total,
        pass,
        fail,
        transitions,
        score: flakiness_score(total, pass, fail, transitions),
    }
}

/// Weighted blend of how often the outcome flips (70%) and how balanced
/// passes and failures are (30%), in `[0, 100]`.
pub fn flakiness_score(total: u32, pass: u32, fail: u32, transitions: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let total = total as f64;
    let transition_score = (transitions as f64 / total * 100.0).min(100.0);
    let ratio_score = (pass.min(fail) as f64 / total * 200.0).min(100.0);
    (transition_score * 0.7 + ratio_score * 0.3)
        .round()
        .clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Worsening,
    Improving,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Worsening => "worsening",
            Trend::Improving => "improving",
            Trend::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "time_based")]
pub struct TimePattern {
    /// Two-digit UTC hour.
    pub peak_hour: String,
    pub peak_rate: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "day_based")]
pub struct DayPattern {
    pub peak_day: String,
    pub peak_rate: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakinessPattern {
    pub time_based: Option<TimePattern>,
    pub day_based: Option<DayPattern>,
    pub sequence: String,
    pub failure_rate_trend: Trend,
}

pub fn detect_pattern(samples: &[RunSample]) -> FlakinessPattern {
    FlakinessPattern {
        time_based: time_of_day_pattern(samples),
        day_based: day_of_week_pattern(samples),
        sequence: outcome_sequence(samples),
        failure_rate_trend: failure_trend(samples),
    }
}

/// Most recent outcomes as glyphs, newest first.
pub fn outcome_sequence(samples: &[RunSample]) -> String {
    samples
        .iter()
        .take(FLAKINESS_SEQUENCE_LEN)
        .map(|s| s.outcome.glyph())
        .collect()
}

pub fn time_of_day_pattern(samples: &[RunSample]) -> Option<TimePattern> {
    let (hour, rate) = peak_failure_rate(samples, |s| s.created_at.hour())?;
    let peak_hour = format!("{:02}", hour);
    Some(TimePattern {
        description: format!(
            "Failures peak at {}:00 ({:.1}% failure rate)",
            peak_hour, rate
        ),
        peak_hour,
        peak_rate: round1(rate),
    })
}

pub fn day_of_week_pattern(samples: &[RunSample]) -> Option<DayPattern> {
    const DAYS: [&str; 7] = [
        "Monday",
        "Tuesday",
        "Wednesday",
        "Thursday",
        "Friday",
        "Saturday",
        "Sunday",
    ];
    let (day, rate) =
        peak_failure_rate(samples, |s| s.created_at.weekday().num_days_from_monday())?;
    let peak_day = DAYS[day as usize].to_string();
    Some(DayPattern {
        description: format!("Failures peak on {} ({:.1}% failure rate)", peak_day, rate),
        peak_day,
        peak_rate: round1(rate),
    })
}

/// Group runs by `key`, compute the failure rate of every group that saw a
/// failure and return the peak group when it stands out at more than 1.5x
/// the mean of those rates. Ties go to the lowest key.
fn peak_failure_rate<K, F>(samples: &[RunSample], key: F) -> Option<(K, f64)>
where
    K: Ord + Copy,
    F: Fn(&RunSample) -> K,
{
    let mut groups: BTreeMap<K, (u32, u32)> = BTreeMap::new();
    for sample in samples {
        let entry = groups.entry(key(sample)).or_default();
        entry.0 += 1;
        if sample.outcome == Outcome::Fail {
            entry.1 += 1;
        }
    }

    let rates: Vec<(K, f64)> = groups
        .into_iter()
        .filter(|(_, (_, fails))| *fails > 0)
        .map(|(k, (runs, fails))| (k, fails as f64 / runs as f64 * 100.0))
        .collect();
    if rates.is_empty() {
        return None;
    }
    let mean = rates.iter().map(|(_, r)| r).sum::<f64>() / rates.len() as f64;

    let mut peak = rates[0];
    for &(k, rate) in &rates[1..] {
        if rate > peak.1 {
            peak = (k, rate);
        }
    }

    (peak.1 > mean * 1.5).then_some(peak)
}

/// Compare the failure rate of the newer half of the history with the
/// older half. With an odd count the newer half gets the extra run.
pub fn failure_trend(samples: &[RunSample]) -> Trend {
    if samples.len() < 2 {
        return Trend::Stable;
    }
    let chronological: Vec<&RunSample> = samples.iter().rev().collect();
    let mid = chronological.len() / 2;
    let (older, newer) = chronological.split_at(mid);

    let rate = |half: &[&RunSample]| {
        let fails = half.iter().filter(|s| s.outcome == Outcome::Fail).count();
        fails as f64 / half.len() as f64 * 100.0
    };
    let first = rate(older);
    let second = rate(newer);

    if (second - first).abs() < f64::EPSILON {
        Trend::Stable
    } else if second >= first * 1.3 {
        Trend::Worsening
    } else if second <= first * 0.7 {
        Trend::Improving
    } else {
        Trend::Stable
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

//! Priority scoring for work items.
//!
//! The score is a pure function of (impact, urgency, due date, now,
//! weights). It is recomputed on every sync tick and whenever weights
//! change; a stored score is never trusted.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Level;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreWeights {
    pub impact: f64,
    pub urgency: f64,
    pub deadline: f64,
}

impl Default for ScoreWeights {
    /// Deadline pressure dominates by default.
    fn default() -> Self {
        Self {
            impact: 3.0,
            urgency: 2.0,
            deadline: 5.0,
        }
    }
}

/// Compute the ranking score for one work item.
///
/// Due dates parse as `YYYY-MM-DD` first, RFC 3339 second. A malformed or
/// missing due date fails closed: it contributes the minimum deadline
/// pressure instead of propagating a parse error.
pub fn priority_score(
    impact: Level,
    urgency: Level,
    due_date: &str,
    now: DateTime<Utc>,
    weights: &ScoreWeights,
) -> f64 {
    let deadline_urgency = match parse_due_date(due_date) {
        Some(due) => {
            let days = days_remaining(due, now);
            (10.0 / days as f64).max(1.0)
        }
        None => 1.0,
    };
    impact.ordinal() * weights.impact
        + urgency.ordinal() * weights.urgency
        + deadline_urgency * weights.deadline
}

/// Parse a stored due date (`YYYY-MM-DD` or RFC 3339). None on malformed
/// input; callers decide the fallback.
pub fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whole days until the deadline, clamped to at least 1 so overdue and
/// same-day items never divide by zero or flip the sign.
fn days_remaining(due: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let secs = (due - now).num_seconds();
    let days = (secs as f64 / 86_400.0).ceil() as i64;
    days.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        "2026-08-07T09:00:00Z".parse().expect("fixed test clock")
    }

    #[test]
    fn due_now_high_high_hits_maximum() {
        // 3*3 + 3*2 + 10*5
        let score = priority_score(
            Level::High,
            Level::High,
            &now().to_rfc3339(),
            now(),
            &ScoreWeights::default(),
        );
        assert_eq!(score, 65.0);
    }

    #[test]
    fn ten_days_out_low_low_is_floor_plus_terms() {
        let due = (now() + Duration::days(10)).date_naive().to_string();
        let score = priority_score(Level::Low, Level::Low, &due, now(), &ScoreWeights::default());
        // days_remaining = 10, deadline_urgency = max(1, 10/10) = 1
        assert_eq!(score, 10.0);
    }

    #[test]
    fn overdue_items_score_like_due_today() {
        let overdue = (now() - Duration::days(14)).date_naive().to_string();
        let today = now().to_rfc3339();
        let w = ScoreWeights::default();
        assert_eq!(
            priority_score(Level::Med, Level::Med, &overdue, now(), &w),
            priority_score(Level::Med, Level::Med, &today, now(), &w),
        );
    }

    #[test]
    fn monotone_in_impact_and_urgency() {
        let due = (now() + Duration::days(3)).date_naive().to_string();
        let w = ScoreWeights::default();
        let mut prev = f64::MIN;
        for level in [Level::Low, Level::Med, Level::High] {
            let s = priority_score(level, Level::Low, &due, now(), &w);
            assert!(s > prev);
            prev = s;
        }
        prev = f64::MIN;
        for level in [Level::Low, Level::Med, Level::High] {
            let s = priority_score(Level::Low, level, &due, now(), &w);
            assert!(s > prev);
            prev = s;
        }
    }

    #[test]
    fn malformed_due_date_fails_closed_to_minimum_contribution() {
        let w = ScoreWeights::default();
        let bad = priority_score(Level::Low, Level::Low, "not-a-date", now(), &w);
        let far = priority_score(Level::Low, Level::Low, "2099-01-01", now(), &w);
        assert_eq!(bad, far);
        assert!(bad >= 0.0);
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let due = "2026-08-12";
        let w = ScoreWeights::default();
        let a = priority_score(Level::High, Level::Med, due, now(), &w);
        let b = priority_score(Level::High, Level::Med, due, now(), &w);
        assert_eq!(a, b);
    }
}

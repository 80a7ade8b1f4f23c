use chrono::{Duration, NaiveDate};

use crate::models::{StudentPerformanceProfile, Tally, Trend};

/// Day-bucketed accuracy over the trailing window, computed from the exact
/// per-day counters. Days with no submissions are omitted, not zero-filled,
/// so classification compares the days that actually have evidence.
pub fn daily_series(
    profile: &StudentPerformanceProfile,
    window_days: i64,
    today: NaiveDate,
) -> Vec<(NaiveDate, f64)> {
    let cutoff = today - Duration::days(window_days.max(1) - 1);
    profile
        .daily
        .range(cutoff..=today)
        .filter(|(_, tally)| tally.total > 0)
        .map(|(date, tally)| (*date, tally.accuracy()))
        .collect()
}

/// Same shape, restricted to one outcome. Built from the bounded recent
/// window, the only per-outcome time-ordered data the store retains.
pub fn outcome_series(
    profile: &StudentPerformanceProfile,
    outcome_key: &str,
    window_days: i64,
    today: NaiveDate,
) -> Vec<(NaiveDate, f64)> {
    let cutoff = today - Duration::days(window_days.max(1) - 1);
    let mut buckets: std::collections::BTreeMap<NaiveDate, Tally> = std::collections::BTreeMap::new();

    for sub in &profile.recent {
        if sub.outcome_key() != outcome_key {
            continue;
        }
        let date = sub.timestamp.date_naive();
        if date < cutoff || date > today {
            continue;
        }
        buckets.entry(date).or_default().record(sub.is_correct);
    }

    buckets
        .into_iter()
        .map(|(date, tally)| (date, tally.accuracy()))
        .collect()
}

/// Mean accuracy of the later half of the series minus the earlier half.
/// None with fewer than 2 distinct days.
pub fn half_delta(series: &[(NaiveDate, f64)]) -> Option<f64> {
    if series.len() < 2 {
        return None;
    }
    let mid = series.len() / 2;
    let early = mean(&series[..mid]);
    let recent = mean(&series[mid..]);
    Some(recent - early)
}

fn mean(points: &[(NaiveDate, f64)]) -> f64 {
    points.iter().map(|(_, acc)| acc).sum::<f64>() / points.len() as f64
}

pub fn classify(series: &[(NaiveDate, f64)]) -> Trend {
    match half_delta(series) {
        None => Trend::InsufficientData,
        Some(delta) => classify_delta(delta),
    }
}

pub fn classify_delta(delta: f64) -> Trend {
    if delta >= 0.05 {
        Trend::Improving
    } else if delta <= -0.20 {
        Trend::Critical
    } else if delta <= -0.05 {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn day(offset: i64) -> NaiveDate {
        Utc::now().date_naive() - Duration::days(offset)
    }

    fn series(points: &[(i64, f64)]) -> Vec<(NaiveDate, f64)> {
        let mut out: Vec<(NaiveDate, f64)> = points.iter().map(|(d, acc)| (day(*d), *acc)).collect();
        out.sort_by_key(|(date, _)| *date);
        out
    }

    #[test]
    fn classification_follows_delta_tiers() {
        assert_eq!(classify(&series(&[(6, 0.50), (1, 0.60)])), Trend::Improving);
        assert_eq!(classify(&series(&[(6, 0.50), (1, 0.52)])), Trend::Stable);
        assert_eq!(classify(&series(&[(6, 0.60), (1, 0.50)])), Trend::Declining);
        assert_eq!(classify(&series(&[(6, 0.80), (1, 0.40)])), Trend::Critical);
    }

    #[test]
    fn boundary_deltas_land_on_the_worse_tier() {
        assert_eq!(classify_delta(0.05), Trend::Improving);
        assert_eq!(classify_delta(-0.05), Trend::Declining);
        assert_eq!(classify_delta(-0.20), Trend::Critical);
        assert_eq!(classify_delta(0.049), Trend::Stable);
    }

    #[test]
    fn single_day_is_insufficient_data() {
        assert_eq!(classify(&series(&[(0, 0.9)])), Trend::InsufficientData);
        assert_eq!(classify(&[]), Trend::InsufficientData);
    }

    #[test]
    fn empty_days_are_omitted_from_the_series() {
        let mut profile = StudentPerformanceProfile::new("s1");
        profile.daily.insert(day(6), Tally { correct: 3, total: 4 });
        profile.daily.insert(day(2), Tally { correct: 1, total: 4 });
        // Outside the window; must not appear.
        profile.daily.insert(day(10), Tally { correct: 4, total: 4 });

        let series = daily_series(&profile, 7, Utc::now().date_naive());
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].0, day(6));
        assert_eq!(series[1].0, day(2));
        assert_eq!(classify(&series), Trend::Critical);
    }

    #[test]
    fn odd_length_series_gives_the_middle_day_to_the_recent_half() {
        let s = series(&[(4, 0.0), (2, 1.0), (1, 1.0)]);
        // early = [0.0], recent = [1.0, 1.0]
        assert_eq!(half_delta(&s).unwrap(), 1.0);
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};

use crate::access::AccessRegistry;
use crate::alerts::AlertEngine;
use crate::config::EngineConfig;
use crate::error::{InsightError, Result};
use crate::models::{
    split_key, ClassOverviewSnapshot, ClassTrend, DecliningOutcome, DifficultyBreakdown,
    Difficulty, FailedOutcome, MistakePattern, StudentPerformanceProfile, StudentProfileView,
    Tally, TopicAccuracy, TopicStruggle, Trend,
};
use crate::store::PerformanceStore;
use crate::trend;

const TOP_N: usize = 10;

/// Read-only aggregation over live profiles. Every query snapshots the
/// students it needs one at a time; no lock spans the scan.
pub struct ClassInsightBuilder {
    config: EngineConfig,
    registry: Arc<AccessRegistry>,
    store: Arc<PerformanceStore>,
    alerts: Arc<AlertEngine>,
}

impl ClassInsightBuilder {
    pub fn new(
        config: EngineConfig,
        registry: Arc<AccessRegistry>,
        store: Arc<PerformanceStore>,
        alerts: Arc<AlertEngine>,
    ) -> Self {
        Self { config, registry, store, alerts }
    }

    /// Class dashboard aggregate. Authorization happens before any data is
    /// touched; a denial returns nothing but the error. A subject scope
    /// narrows both the access check and the aggregated slice.
    pub fn overview(
        &self,
        teacher_id: &str,
        class_id: &str,
        subject: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ClassOverviewSnapshot> {
        if !self.registry.authorize(teacher_id, class_id, subject) {
            return Err(InsightError::Forbidden(format!(
                "teacher {teacher_id} is not authorized for class {class_id}"
            )));
        }

        let students = self.store.students_in_class(class_id);
        let deadline = timeout.map(|t| Instant::now() + t);
        let (profiles, incomplete) = self.store.snapshot_many(&students, deadline);
        let today = Utc::now().date_naive();

        Ok(ClassOverviewSnapshot {
            class_id: class_id.to_string(),
            student_count: students.len(),
            total_submissions: profiles.iter().map(|p| u64::from(p.overall.total)).sum(),
            struggling_topics: struggle_ranking(&profiles, subject),
            declining_outcomes: declining_outcomes(
                &profiles,
                subject,
                self.config.trend_window_days,
                today,
            ),
            mistake_patterns: mistake_patterns(&profiles, subject),
            seven_day_trend: class_trend(&profiles, self.config.trend_window_days, today),
            active_alert_count: self.alerts.active_count_for_class(class_id),
            incomplete,
            generated_at: Utc::now(),
        })
    }

    /// Teacher-facing view of one student.
    pub fn student_profile(&self, teacher_id: &str, student_id: &str) -> Result<StudentProfileView> {
        match self.store.class_of(student_id) {
            Some(class_id) => {
                if !self.registry.authorize(teacher_id, &class_id, None) {
                    return Err(InsightError::Forbidden(format!(
                        "teacher {teacher_id} is not authorized for student {student_id}"
                    )));
                }
            }
            None => {
                if !self.registry.is_registered(teacher_id) {
                    return Err(InsightError::Forbidden(format!(
                        "teacher {teacher_id} is not registered"
                    )));
                }
                return Err(InsightError::NotFound(format!("student {student_id}")));
            }
        }

        let profile = self
            .store
            .snapshot(student_id)
            .ok_or_else(|| InsightError::NotFound(format!("student {student_id}")))?;

        let (strongest, weakest) = topic_strengths(&profile);
        Ok(StudentProfileView {
            student_id: student_id.to_string(),
            total_submissions: profile.overall.total,
            overall_accuracy: profile.overall.accuracy(),
            avg_time_seconds: if profile.overall.total == 0 {
                0.0
            } else {
                profile.time_spent_seconds as f64 / f64::from(profile.overall.total)
            },
            strongest_topics: strongest,
            weakest_topics: weakest,
            repeatedly_failed_outcomes: repeatedly_failed_outcomes(&profile),
            difficulty_accuracy: difficulty_accuracy(&profile),
            recent: profile.recent.iter().cloned().collect(),
            active_alerts: self.alerts.active(None, None, Some(student_id)),
            last_updated: profile.last_updated,
        })
    }
}

fn subject_matches(key: &str, subject: Option<&str>) -> bool {
    subject.map_or(true, |s| split_key(key).0 == s)
}

/// Topics ranked by struggle rate, ties broken by more evidence.
fn struggle_ranking(
    profiles: &[StudentPerformanceProfile],
    subject: Option<&str>,
) -> Vec<TopicStruggle> {
    let mut totals: HashMap<&str, Tally> = HashMap::new();
    for profile in profiles {
        for (key, stat) in &profile.per_topic {
            if !subject_matches(key, subject) {
                continue;
            }
            let entry = totals.entry(key.as_str()).or_default();
            entry.correct += stat.tally.correct;
            entry.total += stat.tally.total;
        }
    }

    let mut ranking: Vec<TopicStruggle> = totals
        .into_iter()
        .filter(|(_, tally)| tally.total > 0)
        .map(|(key, tally)| {
            let (subject, topic) = split_key(key);
            TopicStruggle {
                subject: subject.to_string(),
                topic: topic.to_string(),
                struggle_rate: 1.0 - tally.accuracy(),
                accuracy: tally.accuracy(),
                total_attempts: tally.total,
            }
        })
        .collect();

    ranking.sort_by(|a, b| {
        b.struggle_rate
            .partial_cmp(&a.struggle_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.total_attempts.cmp(&a.total_attempts))
    });
    ranking.truncate(TOP_N);
    ranking
}

/// Most frequently selected wrong option per topic, across the class.
fn mistake_patterns(
    profiles: &[StudentPerformanceProfile],
    subject: Option<&str>,
) -> Vec<MistakePattern> {
    let mut per_topic: HashMap<&str, HashMap<&str, u32>> = HashMap::new();
    for profile in profiles {
        for (key, stat) in &profile.per_topic {
            if !subject_matches(key, subject) {
                continue;
            }
            let options = per_topic.entry(key.as_str()).or_default();
            for (option, count) in &stat.wrong_answers {
                *options.entry(option.as_str()).or_insert(0) += count;
            }
        }
    }

    let mut patterns: Vec<MistakePattern> = per_topic
        .into_iter()
        .filter_map(|(key, options)| {
            let (option, count) = options.into_iter().max_by_key(|(option, count)| {
                // Deterministic winner when counts tie.
                (*count, std::cmp::Reverse(option.to_string()))
            })?;
            let (subject, topic) = split_key(key);
            Some(MistakePattern {
                subject: subject.to_string(),
                topic: topic.to_string(),
                selected_answer: option.to_string(),
                frequency: count,
            })
        })
        .collect();

    patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency).then(a.topic.cmp(&b.topic)));
    patterns.truncate(TOP_N);
    patterns
}

/// Class-level outcome trends built from the recent windows of every
/// student, day-bucketed then classified like any other series.
fn declining_outcomes(
    profiles: &[StudentPerformanceProfile],
    subject: Option<&str>,
    window_days: i64,
    today: NaiveDate,
) -> Vec<DecliningOutcome> {
    let cutoff = today - chrono::Duration::days(window_days.max(1) - 1);
    let mut buckets: HashMap<String, BTreeMap<NaiveDate, Tally>> = HashMap::new();

    for profile in profiles {
        for sub in &profile.recent {
            let key = sub.outcome_key();
            if !subject_matches(&key, subject) {
                continue;
            }
            let date = sub.timestamp.date_naive();
            if date < cutoff || date > today {
                continue;
            }
            buckets
                .entry(key)
                .or_default()
                .entry(date)
                .or_default()
                .record(sub.is_correct);
        }
    }

    let mut declining: Vec<DecliningOutcome> = buckets
        .into_iter()
        .filter_map(|(key, days)| {
            let series: Vec<(NaiveDate, f64)> = days
                .into_iter()
                .map(|(date, tally)| (date, tally.accuracy()))
                .collect();
            let classification = trend::classify(&series);
            if !matches!(classification, Trend::Declining | Trend::Critical) {
                return None;
            }
            let (subject, learning_outcome) = split_key(&key);
            Some(DecliningOutcome {
                subject: subject.to_string(),
                learning_outcome: learning_outcome.to_string(),
                trend: classification,
                delta: trend::half_delta(&series).unwrap_or(0.0),
            })
        })
        .collect();

    declining.sort_by(|a, b| {
        a.delta
            .partial_cmp(&b.delta)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    declining.truncate(TOP_N);
    declining
}

/// Mean of per-student deltas over the window, classified on the shared
/// thresholds. Students without two days of data do not vote.
fn class_trend(
    profiles: &[StudentPerformanceProfile],
    window_days: i64,
    today: NaiveDate,
) -> ClassTrend {
    let deltas: Vec<f64> = profiles
        .iter()
        .filter_map(|profile| {
            let series = trend::daily_series(profile, window_days, today);
            trend::half_delta(&series)
        })
        .collect();

    if deltas.is_empty() {
        return ClassTrend {
            trend: Trend::InsufficientData,
            mean_delta: 0.0,
            students_with_data: 0,
        };
    }

    let mean_delta = deltas.iter().sum::<f64>() / deltas.len() as f64;
    ClassTrend {
        trend: trend::classify_delta(mean_delta),
        mean_delta,
        students_with_data: deltas.len(),
    }
}

fn topic_strengths(profile: &StudentPerformanceProfile) -> (Vec<TopicAccuracy>, Vec<TopicAccuracy>) {
    let mut topics: Vec<TopicAccuracy> = profile
        .per_topic
        .iter()
        .filter(|(_, stat)| stat.tally.total >= 3)
        .map(|(key, stat)| {
            let (subject, topic) = split_key(key);
            TopicAccuracy {
                subject: subject.to_string(),
                topic: topic.to_string(),
                accuracy: stat.tally.accuracy(),
                total_attempts: stat.tally.total,
            }
        })
        .collect();

    topics.sort_by(|a, b| {
        a.accuracy
            .partial_cmp(&b.accuracy)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.topic.cmp(&b.topic))
    });

    let weakest = topics.iter().take(3).cloned().collect();
    let strongest = topics.iter().rev().take(3).cloned().collect();
    (strongest, weakest)
}

fn repeatedly_failed_outcomes(profile: &StudentPerformanceProfile) -> Vec<FailedOutcome> {
    let mut failed: Vec<FailedOutcome> = profile
        .per_outcome
        .iter()
        .filter(|(_, stat)| stat.tally.total >= 3)
        .filter(|(_, stat)| stat.tally.accuracy() < 0.4 || stat.consecutive_errors >= 2)
        .map(|(key, stat)| {
            let (subject, learning_outcome) = split_key(key);
            FailedOutcome {
                subject: subject.to_string(),
                learning_outcome: learning_outcome.to_string(),
                accuracy: stat.tally.accuracy(),
                consecutive_errors: stat.consecutive_errors,
                total_attempts: stat.tally.total,
            }
        })
        .collect();

    failed.sort_by(|a, b| {
        b.consecutive_errors
            .cmp(&a.consecutive_errors)
            .then(a.accuracy.partial_cmp(&b.accuracy).unwrap_or(std::cmp::Ordering::Equal))
    });
    failed
}

fn difficulty_accuracy(profile: &StudentPerformanceProfile) -> Vec<DifficultyBreakdown> {
    let mut tiers = [Tally::default(); 3];
    for stat in profile.per_outcome.values() {
        for difficulty in Difficulty::ALL {
            let tier = stat.per_difficulty[difficulty.index()];
            tiers[difficulty.index()].correct += tier.correct;
            tiers[difficulty.index()].total += tier.total;
        }
    }

    Difficulty::ALL
        .iter()
        .map(|&difficulty| {
            let tally = tiers[difficulty.index()];
            DifficultyBreakdown {
                difficulty,
                correct: tally.correct,
                total: tally.total,
                accuracy: tally.accuracy(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::TeacherAccess;
    use crate::models::QuestionSubmission;
    use chrono::{DateTime, Duration as ChronoDuration};
    use uuid::Uuid;

    struct Fixture {
        store: Arc<PerformanceStore>,
        builder: ClassInsightBuilder,
    }

    fn fixture() -> Fixture {
        let config = EngineConfig::default();
        let registry = Arc::new(AccessRegistry::new());
        registry.register(TeacherAccess {
            teacher_id: "t-matematik".to_string(),
            class_ids: ["class_8A".to_string()].into_iter().collect(),
            subjects: ["Matematik".to_string()].into_iter().collect(),
            is_homeroom: false,
        });
        let store = Arc::new(PerformanceStore::new(config.recent_window));
        let alerts = Arc::new(AlertEngine::new(config.clone()));
        let builder = ClassInsightBuilder::new(config, registry, store.clone(), alerts);
        Fixture { store, builder }
    }

    fn submission(
        student: &str,
        topic: &str,
        outcome: &str,
        selected: &str,
        is_correct: bool,
        at: DateTime<Utc>,
    ) -> QuestionSubmission {
        QuestionSubmission {
            submission_id: Uuid::new_v4().to_string(),
            student_id: student.to_string(),
            question_id: Uuid::new_v4().to_string(),
            class_id: "class_8A".to_string(),
            subject: "Matematik".to_string(),
            topic: topic.to_string(),
            learning_outcome: outcome.to_string(),
            difficulty: Difficulty::Medium,
            selected_answer: selected.to_string(),
            correct_answer: "A".to_string(),
            is_correct,
            time_spent_seconds: 60,
            timestamp: at,
            session_id: "sess".to_string(),
            teacher_id: "t-matematik".to_string(),
        }
    }

    #[test]
    fn overview_fails_closed_outside_the_teachers_scope() {
        let fx = fixture();

        let err = fx
            .builder
            .overview("t-matematik", "class_8B", None, None)
            .unwrap_err();
        assert!(matches!(err, InsightError::Forbidden(_)));

        let err = fx
            .builder
            .overview("t-matematik", "class_8A", Some("Fen Bilimleri"), None)
            .unwrap_err();
        assert!(matches!(err, InsightError::Forbidden(_)));

        assert!(fx
            .builder
            .overview("t-matematik", "class_8A", Some("Matematik"), None)
            .is_ok());
    }

    #[test]
    fn struggle_ranking_orders_by_rate_then_evidence() {
        let fx = fixture();
        let now = Utc::now();

        // Üslü İfadeler: 1/4 correct. Kareköklü İfadeler: 2/4 correct.
        // Cebirsel İfadeler: 1/2 correct (same rate as Kareköklü, less evidence).
        for (topic, results) in [
            ("Üslü İfadeler", vec![true, false, false, false]),
            ("Kareköklü İfadeler", vec![true, true, false, false]),
            ("Cebirsel İfadeler", vec![true, false]),
        ] {
            for (i, ok) in results.into_iter().enumerate() {
                fx.store.record(&submission(
                    "s1",
                    topic,
                    "M.8.1.1",
                    if ok { "A" } else { "B" },
                    ok,
                    now + ChronoDuration::seconds(i as i64),
                ));
            }
        }

        let overview = fx
            .builder
            .overview("t-matematik", "class_8A", None, None)
            .unwrap();
        let topics: Vec<&str> = overview
            .struggling_topics
            .iter()
            .map(|t| t.topic.as_str())
            .collect();
        assert_eq!(
            topics,
            vec!["Üslü İfadeler", "Kareköklü İfadeler", "Cebirsel İfadeler"]
        );
        assert!(overview.struggling_topics[0].struggle_rate > 0.74);
        assert!(!overview.incomplete);
    }

    #[test]
    fn mistake_patterns_surface_the_most_picked_wrong_option() {
        let fx = fixture();
        let now = Utc::now();

        for (i, student) in ["s1", "s2", "s3"].iter().enumerate() {
            fx.store.record(&submission(
                student,
                "Olasılık",
                "M.8.5.1",
                "C",
                false,
                now + ChronoDuration::seconds(i as i64),
            ));
        }
        fx.store.record(&submission(
            "s1",
            "Olasılık",
            "M.8.5.1",
            "D",
            false,
            now + ChronoDuration::seconds(10),
        ));

        let overview = fx
            .builder
            .overview("t-matematik", "class_8A", None, None)
            .unwrap();
        assert_eq!(overview.mistake_patterns.len(), 1);
        assert_eq!(overview.mistake_patterns[0].selected_answer, "C");
        assert_eq!(overview.mistake_patterns[0].frequency, 3);
    }

    #[test]
    fn expired_timeout_marks_the_snapshot_incomplete() {
        let fx = fixture();
        fx.store
            .record(&submission("s1", "Olasılık", "M.8.5.1", "A", true, Utc::now()));

        let overview = fx
            .builder
            .overview("t-matematik", "class_8A", None, Some(Duration::ZERO))
            .unwrap();
        assert!(overview.incomplete);
    }

    #[test]
    fn class_trend_averages_per_student_deltas() {
        let fx = fixture();
        let now = Utc::now();

        // s1 collapses (1.0 -> 0.0), s2 holds steady: mean delta -0.5.
        for i in 0..2 {
            fx.store.record(&submission(
                "s1", "Olasılık", "M.8.5.1", "A", true,
                now - ChronoDuration::days(3) + ChronoDuration::seconds(i),
            ));
            fx.store.record(&submission(
                "s1", "Olasılık", "M.8.5.1", "B", false,
                now + ChronoDuration::seconds(i),
            ));
            fx.store.record(&submission(
                "s2", "Olasılık", "M.8.5.1", "A", true,
                now - ChronoDuration::days(3) + ChronoDuration::seconds(i),
            ));
            fx.store.record(&submission(
                "s2", "Olasılık", "M.8.5.1", "A", true,
                now + ChronoDuration::seconds(i),
            ));
        }

        let overview = fx
            .builder
            .overview("t-matematik", "class_8A", None, None)
            .unwrap();
        assert_eq!(overview.seven_day_trend.students_with_data, 2);
        assert!((overview.seven_day_trend.mean_delta + 0.5).abs() < 1e-9);
        assert_eq!(overview.seven_day_trend.trend, Trend::Critical);
        assert!(!overview.declining_outcomes.is_empty());
    }

    #[test]
    fn student_profile_requires_access_and_existence() {
        let fx = fixture();
        let now = Utc::now();

        let err = fx.builder.student_profile("t-matematik", "ghost").unwrap_err();
        assert!(matches!(err, InsightError::NotFound(_)));

        let err = fx.builder.student_profile("t-unknown", "ghost").unwrap_err();
        assert!(matches!(err, InsightError::Forbidden(_)));

        for i in 0..4 {
            fx.store.record(&submission(
                "s1",
                "Olasılık",
                "M.8.5.1",
                if i == 0 { "A" } else { "B" },
                i == 0,
                now + ChronoDuration::seconds(i),
            ));
        }

        let view = fx.builder.student_profile("t-matematik", "s1").unwrap();
        assert_eq!(view.total_submissions, 4);
        assert!((view.overall_accuracy - 0.25).abs() < 1e-9);
        assert_eq!(view.weakest_topics[0].topic, "Olasılık");
        assert_eq!(view.repeatedly_failed_outcomes.len(), 1);
        assert_eq!(view.repeatedly_failed_outcomes[0].consecutive_errors, 3);
        assert_eq!(view.avg_time_seconds, 60.0);
    }
}

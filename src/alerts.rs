use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::access::AccessRegistry;
use crate::config::EngineConfig;
use crate::error::{InsightError, Result};
use crate::models::{
    Alert, AlertType, QuestionSubmission, Severity, StudentPerformanceProfile, Trend,
};
use crate::store::PerformanceStore;
use crate::trend;

/// Dedup key: an active alert per (student, scope, type) is refreshed in
/// place, never duplicated. Sweep-level alerts use an empty scope.
type AlertKey = (String, String, AlertType);

struct AlertDraft {
    alert_type: AlertType,
    student_id: String,
    class_id: String,
    subject: String,
    topic: String,
    learning_outcome: String,
    severity: Severity,
    message: String,
    recommended_actions: Vec<String>,
}

#[derive(Default)]
struct AlertLog {
    alerts: Vec<Alert>,
    by_id: HashMap<String, usize>,
    active: HashMap<AlertKey, usize>,
}

/// Evaluates the rule set and owns the alert lifecycle. The log keeps every
/// alert ever raised; resolution only flips `is_active`.
pub struct AlertEngine {
    config: EngineConfig,
    log: Mutex<AlertLog>,
}

impl AlertEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            log: Mutex::new(AlertLog::default()),
        }
    }

    /// Incremental evaluation after one accepted submission. Reads only the
    /// submitting student's snapshot; never scans the class.
    pub fn evaluate_submission(
        &self,
        profile: &StudentPerformanceProfile,
        submission: &QuestionSubmission,
        today: NaiveDate,
    ) -> Vec<String> {
        let outcome_key = submission.outcome_key();
        let Some(stat) = profile.per_outcome.get(&outcome_key) else {
            return Vec::new();
        };

        let mut raised = Vec::new();

        let accuracy = stat.tally.accuracy();
        if stat.tally.total >= self.config.low_accuracy_min_attempts
            && accuracy < self.config.low_accuracy_threshold
        {
            raised.push(self.raise(
                (submission.student_id.clone(), outcome_key.clone(), AlertType::LowAccuracy),
                AlertDraft {
                    alert_type: AlertType::LowAccuracy,
                    student_id: submission.student_id.clone(),
                    class_id: submission.class_id.clone(),
                    subject: submission.subject.clone(),
                    topic: submission.topic.clone(),
                    learning_outcome: submission.learning_outcome.clone(),
                    severity: Severity::Critical,
                    message: format!(
                        "Accuracy on {} is {:.0}% over {} attempts (below {:.0}%)",
                        submission.learning_outcome,
                        accuracy * 100.0,
                        stat.tally.total,
                        self.config.low_accuracy_threshold * 100.0
                    ),
                    recommended_actions: low_accuracy_actions(&submission.learning_outcome),
                },
            ));
        }

        if stat.consecutive_errors >= self.config.consecutive_error_threshold {
            raised.push(self.raise(
                (
                    submission.student_id.clone(),
                    outcome_key.clone(),
                    AlertType::ConsecutiveErrors,
                ),
                AlertDraft {
                    alert_type: AlertType::ConsecutiveErrors,
                    student_id: submission.student_id.clone(),
                    class_id: submission.class_id.clone(),
                    subject: submission.subject.clone(),
                    topic: submission.topic.clone(),
                    learning_outcome: submission.learning_outcome.clone(),
                    severity: Severity::High,
                    message: format!(
                        "{} consecutive errors on {}",
                        stat.consecutive_errors, submission.learning_outcome
                    ),
                    recommended_actions: consecutive_error_actions(&submission.topic),
                },
            ));
        }

        let series =
            trend::outcome_series(profile, &outcome_key, self.config.trend_window_days, today);
        if let Some(severity) = trend_severity(trend::classify(&series)) {
            let delta = trend::half_delta(&series).unwrap_or(0.0);
            raised.push(self.raise(
                (submission.student_id.clone(), outcome_key.clone(), AlertType::TrendDecline),
                AlertDraft {
                    alert_type: AlertType::TrendDecline,
                    student_id: submission.student_id.clone(),
                    class_id: submission.class_id.clone(),
                    subject: submission.subject.clone(),
                    topic: submission.topic.clone(),
                    learning_outcome: submission.learning_outcome.clone(),
                    severity,
                    message: format!(
                        "Accuracy on {} dropped {:.0} points over the last {} days",
                        submission.learning_outcome,
                        -delta * 100.0,
                        self.config.trend_window_days
                    ),
                    recommended_actions: trend_decline_actions(),
                },
            ));
        }

        raised
    }

    /// Batch sweep across every student: activity drop plus overall trend
    /// decline. Driven by a periodic task in the server; also usable after a
    /// bulk import.
    pub fn sweep(&self, store: &PerformanceStore, today: NaiveDate) -> Vec<String> {
        let mut raised = Vec::new();

        for (class_id, student_ids) in store.class_of_students() {
            let (profiles, _) = store.snapshot_many(&student_ids, None);
            for profile in &profiles {
                if let Some(id) = self.check_activity_drop(profile, &class_id, today) {
                    raised.push(id);
                }

                let series = trend::daily_series(profile, self.config.trend_window_days, today);
                if let Some(severity) = trend_severity(trend::classify(&series)) {
                    let delta = trend::half_delta(&series).unwrap_or(0.0);
                    raised.push(self.raise(
                        (profile.student_id.clone(), String::new(), AlertType::TrendDecline),
                        AlertDraft {
                            alert_type: AlertType::TrendDecline,
                            student_id: profile.student_id.clone(),
                            class_id: class_id.clone(),
                            subject: String::new(),
                            topic: String::new(),
                            learning_outcome: String::new(),
                            severity,
                            message: format!(
                                "Overall accuracy dropped {:.0} points over the last {} days",
                                -delta * 100.0,
                                self.config.trend_window_days
                            ),
                            recommended_actions: trend_decline_actions(),
                        },
                    ));
                }
            }
        }

        debug!(alerts = raised.len(), "alert sweep finished");
        raised
    }

    fn check_activity_drop(
        &self,
        profile: &StudentPerformanceProfile,
        class_id: &str,
        today: NaiveDate,
    ) -> Option<String> {
        let window = self.config.trend_window_days.max(1);
        let prior: Vec<u32> = (1..=window)
            .filter_map(|offset| {
                let date = today - chrono::Duration::days(offset);
                profile.daily.get(&date).map(|t| t.total)
            })
            .collect();

        if prior.len() < self.config.activity_min_active_days {
            return None;
        }

        let trailing_mean = f64::from(prior.iter().sum::<u32>()) / prior.len() as f64;
        let today_count = profile.daily.get(&today).map(|t| t.total).unwrap_or(0);
        if f64::from(today_count) >= trailing_mean * (1.0 - self.config.activity_drop_ratio) {
            return None;
        }

        Some(self.raise(
            (profile.student_id.clone(), String::new(), AlertType::ActivityDrop),
            AlertDraft {
                alert_type: AlertType::ActivityDrop,
                student_id: profile.student_id.clone(),
                class_id: class_id.to_string(),
                subject: String::new(),
                topic: String::new(),
                learning_outcome: String::new(),
                severity: Severity::Medium,
                message: format!(
                    "{} submissions today against a trailing average of {:.1} per day",
                    today_count, trailing_mean
                ),
                recommended_actions: activity_drop_actions(),
            },
        ))
    }

    /// Creates the alert, or refreshes the still-active one for the same
    /// (student, scope, type). Returns the alert id either way.
    fn raise(&self, key: AlertKey, draft: AlertDraft) -> String {
        let mut log = self.log.lock();
        let now = Utc::now();

        if let Some(&idx) = log.active.get(&key) {
            let alert = &mut log.alerts[idx];
            alert.severity = draft.severity;
            alert.message = draft.message;
            alert.recommended_actions = draft.recommended_actions;
            alert.last_triggered = now;
            return alert.alert_id.clone();
        }

        let alert = Alert {
            alert_id: Uuid::new_v4().to_string(),
            alert_type: draft.alert_type,
            student_id: draft.student_id,
            class_id: draft.class_id,
            subject: draft.subject,
            topic: draft.topic,
            learning_outcome: draft.learning_outcome,
            severity: draft.severity,
            message: draft.message,
            recommended_actions: draft.recommended_actions,
            created_at: now,
            last_triggered: now,
            is_active: true,
            resolved_at: None,
            resolution_note: None,
        };
        warn!(
            student = %alert.student_id,
            class = %alert.class_id,
            severity = ?alert.severity,
            "alert raised: {}",
            alert.message
        );

        let id = alert.alert_id.clone();
        let idx = log.alerts.len();
        log.by_id.insert(id.clone(), idx);
        log.active.insert(key, idx);
        log.alerts.push(alert);
        id
    }

    /// Resolution keeps the record for audit; only the active flag flips.
    /// The resolving teacher must be authorized for the alert's class.
    pub fn resolve(
        &self,
        alert_id: &str,
        teacher_id: &str,
        note: &str,
        registry: &AccessRegistry,
    ) -> Result<Alert> {
        let mut log = self.log.lock();
        let Some(&idx) = log.by_id.get(alert_id) else {
            return Err(InsightError::NotFound(format!("alert {alert_id}")));
        };

        let class_id = log.alerts[idx].class_id.clone();
        if !registry.authorize(teacher_id, &class_id, None) {
            return Err(InsightError::Forbidden(format!(
                "teacher {teacher_id} cannot resolve alerts for class {class_id}"
            )));
        }

        let alert = &mut log.alerts[idx];
        if alert.is_active {
            alert.is_active = false;
            alert.resolved_at = Some(Utc::now());
            alert.resolution_note = Some(note.to_string());
        }
        let resolved = alert.clone();
        let key = (
            resolved.student_id.clone(),
            alert_scope(&resolved),
            resolved.alert_type,
        );
        if log.active.get(&key) == Some(&idx) {
            log.active.remove(&key);
        }
        Ok(resolved)
    }

    pub fn active(
        &self,
        class_id: Option<&str>,
        severity: Option<Severity>,
        student_id: Option<&str>,
    ) -> Vec<Alert> {
        let log = self.log.lock();
        log.alerts
            .iter()
            .filter(|a| a.is_active)
            .filter(|a| class_id.map_or(true, |c| a.class_id == c))
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .filter(|a| student_id.map_or(true, |s| a.student_id == s))
            .cloned()
            .collect()
    }

    pub fn active_count_for_class(&self, class_id: &str) -> usize {
        let log = self.log.lock();
        log.alerts
            .iter()
            .filter(|a| a.is_active && a.class_id == class_id)
            .count()
    }

    pub fn get(&self, alert_id: &str) -> Option<Alert> {
        let log = self.log.lock();
        log.by_id.get(alert_id).map(|&idx| log.alerts[idx].clone())
    }

    #[cfg(test)]
    fn all(&self) -> Vec<Alert> {
        self.log.lock().alerts.clone()
    }
}

fn alert_scope(alert: &Alert) -> String {
    if alert.learning_outcome.is_empty() {
        String::new()
    } else {
        crate::models::scoped_key(&alert.subject, &alert.learning_outcome)
    }
}

fn trend_severity(trend: Trend) -> Option<Severity> {
    match trend {
        Trend::Declining => Some(Severity::Medium),
        Trend::Critical => Some(Severity::Critical),
        _ => None,
    }
}

fn low_accuracy_actions(learning_outcome: &str) -> Vec<String> {
    vec![
        format!("Assign remedial videos for {learning_outcome}"),
        "Create a mini-test focusing on fundamental concepts".to_string(),
        "Schedule a one-on-one review session".to_string(),
        "Check prerequisite knowledge gaps".to_string(),
    ]
}

fn consecutive_error_actions(topic: &str) -> Vec<String> {
    vec![
        "Immediate intervention required".to_string(),
        format!("Review {topic} concepts with the student"),
        "Assign easier questions to rebuild confidence".to_string(),
        "Consider peer tutoring".to_string(),
    ]
}

fn activity_drop_actions() -> Vec<String> {
    vec![
        "Check in with the student about engagement".to_string(),
        "Review workload across subjects".to_string(),
        "Contact the homeroom teacher if the drop persists".to_string(),
    ]
}

fn trend_decline_actions() -> Vec<String> {
    vec![
        "Monitor engagement levels".to_string(),
        "Check for external factors affecting performance".to_string(),
        "Lower difficulty temporarily and increase feedback frequency".to_string(),
    ]
}

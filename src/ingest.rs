use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::alerts::AlertEngine;
use crate::error::{InsightError, Result};
use crate::models::{Difficulty, QuestionSubmission};
use crate::store::PerformanceStore;

/// Longest answer time accepted as real; anything above is a parked session,
/// not a measurement.
const MAX_TIME_SPENT_SECONDS: i64 = 24 * 60 * 60;

/// Wire-shape submission, validated before anything touches the store.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionRequest {
    #[serde(default)]
    pub submission_id: Option<String>,
    pub student_id: String,
    pub question_id: String,
    pub class_id: String,
    pub subject: String,
    pub topic: String,
    pub learning_outcome: String,
    pub difficulty: String,
    pub selected_answer: String,
    pub correct_answer: String,
    pub time_spent_seconds: i64,
    /// Server time is stamped when the client omits this.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub teacher_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub submission_id: String,
    pub is_correct: bool,
    pub alerts_raised: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ImportSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub alerts_raised: usize,
}

/// Validates and normalizes inbound submissions, then drives the store and
/// the alert rules in order. A rejected submission mutates nothing.
pub struct SubmissionIngestor {
    store: Arc<PerformanceStore>,
    alerts: Arc<AlertEngine>,
}

impl SubmissionIngestor {
    pub fn new(store: Arc<PerformanceStore>, alerts: Arc<AlertEngine>) -> Self {
        Self { store, alerts }
    }

    pub fn ingest(&self, request: SubmissionRequest) -> Result<IngestReceipt> {
        let submission = self.validate(request)?;

        self.store.record(&submission);

        // Rule evaluation reads only the just-updated student's snapshot.
        let alerts_raised = match self.store.snapshot(&submission.student_id) {
            Some(profile) => self.alerts.evaluate_submission(
                &profile,
                &submission,
                submission.timestamp.date_naive(),
            ),
            None => Vec::new(),
        };

        debug!(
            student = %submission.student_id,
            outcome = %submission.learning_outcome,
            correct = submission.is_correct,
            alerts = alerts_raised.len(),
            "submission recorded"
        );

        Ok(IngestReceipt {
            submission_id: submission.submission_id,
            is_correct: submission.is_correct,
            alerts_raised,
        })
    }

    fn validate(&self, request: SubmissionRequest) -> Result<QuestionSubmission> {
        let mut errors = Vec::new();

        let required = [
            ("student_id", &request.student_id),
            ("question_id", &request.question_id),
            ("class_id", &request.class_id),
            ("subject", &request.subject),
            ("topic", &request.topic),
            ("learning_outcome", &request.learning_outcome),
            ("selected_answer", &request.selected_answer),
            ("correct_answer", &request.correct_answer),
            ("teacher_id", &request.teacher_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.push(format!("{field} must not be empty"));
            }
        }

        if request.time_spent_seconds < 0 {
            errors.push("time_spent_seconds must not be negative".to_string());
        } else if request.time_spent_seconds > MAX_TIME_SPENT_SECONDS {
            errors.push("time_spent_seconds exceeds the accepted maximum".to_string());
        }

        let difficulty = match Difficulty::parse(&request.difficulty) {
            Some(difficulty) => difficulty,
            None => {
                errors.push(format!("unknown difficulty '{}'", request.difficulty));
                Difficulty::Medium
            }
        };

        if !errors.is_empty() {
            return Err(InsightError::Validation(errors));
        }

        let is_correct = request.selected_answer.trim() == request.correct_answer.trim();
        Ok(QuestionSubmission {
            submission_id: request
                .submission_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            student_id: request.student_id,
            question_id: request.question_id,
            class_id: request.class_id,
            subject: request.subject,
            topic: request.topic,
            learning_outcome: request.learning_outcome,
            difficulty,
            selected_answer: request.selected_answer,
            correct_answer: request.correct_answer,
            is_correct,
            time_spent_seconds: request.time_spent_seconds as u32,
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
            session_id: request
                .session_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            teacher_id: request.teacher_id,
        })
    }

    /// Bulk import: every row goes through the same validation and rule
    /// evaluation as a live submission. Bad rows are counted and skipped,
    /// never retried.
    pub fn import_csv(&self, path: &Path) -> anyhow::Result<ImportSummary> {
        let file = std::fs::File::open(path)?;
        let summary = self.import_reader(file)?;
        info!(
            accepted = summary.accepted,
            rejected = summary.rejected,
            "CSV import finished"
        );
        Ok(summary)
    }

    pub fn import_reader<R: Read>(&self, reader: R) -> anyhow::Result<ImportSummary> {
        #[derive(Deserialize)]
        struct CsvRow {
            student_id: String,
            question_id: String,
            class_id: String,
            subject: String,
            topic: String,
            learning_outcome: String,
            difficulty: String,
            selected_answer: String,
            correct_answer: String,
            time_spent_seconds: i64,
            timestamp: DateTime<Utc>,
            session_id: Option<String>,
            teacher_id: String,
        }

        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut summary = ImportSummary::default();

        for result in csv_reader.deserialize::<CsvRow>() {
            let row = match result {
                Ok(row) => row,
                Err(err) => {
                    debug!("skipping malformed CSV row: {err}");
                    summary.rejected += 1;
                    continue;
                }
            };

            let request = SubmissionRequest {
                submission_id: None,
                student_id: row.student_id,
                question_id: row.question_id,
                class_id: row.class_id,
                subject: row.subject,
                topic: row.topic,
                learning_outcome: row.learning_outcome,
                difficulty: row.difficulty,
                selected_answer: row.selected_answer,
                correct_answer: row.correct_answer,
                time_spent_seconds: row.time_spent_seconds,
                timestamp: Some(row.timestamp),
                session_id: row.session_id,
                teacher_id: row.teacher_id,
            };

            match self.ingest(request) {
                Ok(receipt) => {
                    summary.accepted += 1;
                    summary.alerts_raised += receipt.alerts_raised.len();
                }
                Err(err) => {
                    debug!("rejecting CSV row: {err}");
                    summary.rejected += 1;
                }
            }
        }

        Ok(summary)
    }
}

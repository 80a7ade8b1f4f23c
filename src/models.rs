use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Difficulty tier a question is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn index(self) -> usize {
        match self {
            Difficulty::Easy => 0,
            Difficulty::Medium => 1,
            Difficulty::Hard => 2,
        }
    }

    /// Accepts the wire labels plus the legacy Turkish exam-bundle labels
    /// (KOLAY/ORTA/ZOR) still present in older CSV exports.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" | "kolay" => Some(Difficulty::Easy),
            "medium" | "orta" => Some(Difficulty::Medium),
            "hard" | "zor" => Some(Difficulty::Hard),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// One answered question, immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSubmission {
    pub submission_id: String,
    pub student_id: String,
    pub question_id: String,
    pub class_id: String,
    pub subject: String,
    pub topic: String,
    pub learning_outcome: String,
    pub difficulty: Difficulty,
    pub selected_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub time_spent_seconds: u32,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub teacher_id: String,
}

impl QuestionSubmission {
    pub fn topic_key(&self) -> String {
        scoped_key(&self.subject, &self.topic)
    }

    pub fn outcome_key(&self) -> String {
        scoped_key(&self.subject, &self.learning_outcome)
    }
}

/// Keys for per-topic and per-outcome maps are scoped by subject so that
/// identically named units in different subjects never collide.
pub fn scoped_key(subject: &str, name: &str) -> String {
    format!("{subject}:{name}")
}

pub fn split_key(key: &str) -> (&str, &str) {
    key.split_once(':').unwrap_or(("", key))
}

/// Compact submission record kept in the bounded recent window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentSubmission {
    pub question_id: String,
    pub subject: String,
    pub topic: String,
    pub learning_outcome: String,
    pub difficulty: Difficulty,
    pub selected_answer: String,
    pub is_correct: bool,
    pub time_spent_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

impl RecentSubmission {
    pub fn outcome_key(&self) -> String {
        scoped_key(&self.subject, &self.learning_outcome)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Tally {
    pub correct: u32,
    pub total: u32,
}

impl Tally {
    pub fn record(&mut self, is_correct: bool) {
        self.total += 1;
        if is_correct {
            self.correct += 1;
        }
    }

    /// Accuracy in `[0, 1]`; an empty tally is defined as 0.0, not an error.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.correct) / f64::from(self.total)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicStat {
    pub tally: Tally,
    pub time_spent_seconds: u64,
    /// Selected option label -> times it was picked incorrectly.
    pub wrong_answers: HashMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeStat {
    pub tally: Tally,
    /// Trailing run of wrong answers since the last correct one.
    pub consecutive_errors: u32,
    pub per_difficulty: [Tally; 3],
    pub wrong_answers: HashMap<String, u32>,
}

/// Rolling per-student state owned by the performance store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentPerformanceProfile {
    pub student_id: String,
    pub per_topic: HashMap<String, TopicStat>,
    pub per_outcome: HashMap<String, OutcomeStat>,
    pub recent: VecDeque<RecentSubmission>,
    pub daily: BTreeMap<NaiveDate, Tally>,
    pub overall: Tally,
    pub time_spent_seconds: u64,
    pub last_updated: DateTime<Utc>,
}

impl StudentPerformanceProfile {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            per_topic: HashMap::new(),
            per_outcome: HashMap::new(),
            recent: VecDeque::new(),
            daily: BTreeMap::new(),
            overall: Tally::default(),
            time_spent_seconds: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn outcome_accuracy(&self, outcome_key: &str) -> f64 {
        self.per_outcome
            .get(outcome_key)
            .map(|s| s.tally.accuracy())
            .unwrap_or(0.0)
    }

    pub fn seen_question_ids(&self) -> impl Iterator<Item = &str> {
        self.recent.iter().map(|r| r.question_id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowAccuracy,
    ConsecutiveErrors,
    ActivityDrop,
    TrendDecline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// Teacher-facing alert. Never hard-deleted; resolution flips `is_active`
/// and stamps the audit fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub student_id: String,
    pub class_id: String,
    pub subject: String,
    pub topic: String,
    pub learning_outcome: String,
    pub severity: Severity,
    pub message: String,
    pub recommended_actions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_triggered: DateTime<Utc>,
    pub is_active: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
}

/// Trend classification over a day-bucketed accuracy series.
/// `InsufficientData` is an expected steady state for new students,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
    Critical,
    InsufficientData,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicStruggle {
    pub subject: String,
    pub topic: String,
    pub struggle_rate: f64,
    pub accuracy: f64,
    pub total_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MistakePattern {
    pub subject: String,
    pub topic: String,
    pub selected_answer: String,
    pub frequency: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecliningOutcome {
    pub subject: String,
    pub learning_outcome: String,
    pub trend: Trend,
    pub delta: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassTrend {
    pub trend: Trend,
    pub mean_delta: f64,
    pub students_with_data: usize,
}

/// On-demand class dashboard aggregate. Recomputed per query, never cached.
#[derive(Debug, Clone, Serialize)]
pub struct ClassOverviewSnapshot {
    pub class_id: String,
    pub student_count: usize,
    pub total_submissions: u64,
    pub struggling_topics: Vec<TopicStruggle>,
    pub declining_outcomes: Vec<DecliningOutcome>,
    pub mistake_patterns: Vec<MistakePattern>,
    pub seven_day_trend: ClassTrend,
    pub active_alert_count: usize,
    /// Set when a caller-supplied deadline expired before the scan finished.
    pub incomplete: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentOutcomeStanding {
    pub student_id: String,
    pub accuracy: f64,
    pub total_attempts: u32,
    pub struggling: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DifficultyBreakdown {
    pub difficulty: Difficulty,
    pub correct: u32,
    pub total: u32,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WrongOptionCount {
    pub selected_answer: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningOutcomeAnalysis {
    pub learning_outcome: String,
    pub subject: String,
    pub class_accuracy: f64,
    pub standings: Vec<StudentOutcomeStanding>,
    pub difficulty_breakdown: Vec<DifficultyBreakdown>,
    pub common_wrong_options: Vec<WrongOptionCount>,
    pub interventions: Vec<String>,
}

/// Catalog entry provided by the external video library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub video_id: String,
    pub title: String,
    pub subject: String,
    pub topic: String,
    pub learning_outcome: String,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSpecificity {
    Outcome,
    Topic,
    Subject,
}

impl MatchSpecificity {
    pub fn weight(self) -> f64 {
        match self {
            MatchSpecificity::Outcome => 1.0,
            MatchSpecificity::Topic => 0.7,
            MatchSpecificity::Subject => 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoRecommendation {
    pub video: Video,
    pub targeted_outcome: String,
    pub targeted_subject: String,
    pub student_accuracy: f64,
    pub specificity: MatchSpecificity,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MiniTestAssignment {
    pub student_id: String,
    pub difficulty: Difficulty,
    pub question_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedStudent {
    pub student_id: String,
    pub difficulty: Difficulty,
    pub requested: usize,
    pub available: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MiniTest {
    pub test_id: String,
    pub created_by: String,
    pub subject: String,
    pub learning_outcome: String,
    pub question_count: usize,
    pub time_limit_seconds: u32,
    pub assignments: Vec<MiniTestAssignment>,
    /// Students whose unseen-question pool could not satisfy the request;
    /// the caller decides whether to relax difficulty or reduce the count.
    pub skipped: Vec<SkippedStudent>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicAccuracy {
    pub subject: String,
    pub topic: String,
    pub accuracy: f64,
    pub total_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedOutcome {
    pub subject: String,
    pub learning_outcome: String,
    pub accuracy: f64,
    pub consecutive_errors: u32,
    pub total_attempts: u32,
}

/// Teacher-facing view of one student, assembled from the profile snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StudentProfileView {
    pub student_id: String,
    pub total_submissions: u32,
    pub overall_accuracy: f64,
    pub avg_time_seconds: f64,
    pub strongest_topics: Vec<TopicAccuracy>,
    pub weakest_topics: Vec<TopicAccuracy>,
    pub repeatedly_failed_outcomes: Vec<FailedOutcome>,
    pub difficulty_accuracy: Vec<DifficultyBreakdown>,
    pub recent: Vec<RecentSubmission>,
    pub active_alerts: Vec<Alert>,
    pub last_updated: DateTime<Utc>,
}

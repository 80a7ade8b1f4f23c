use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::access::AccessRegistry;
use crate::config::EngineConfig;
use crate::error::{InsightError, Result};
use crate::models::{
    scoped_key, Difficulty, MatchSpecificity, MiniTest, MiniTestAssignment, SkippedStudent,
    Video, VideoRecommendation,
};
use crate::store::PerformanceStore;

/// Read-only video library, keyed by curriculum tags.
pub trait VideoCatalog: Send + Sync {
    fn by_outcome(&self, subject: &str, learning_outcome: &str) -> Vec<Video>;
    fn by_topic(&self, subject: &str, topic: &str) -> Vec<Video>;
    fn by_subject(&self, subject: &str) -> Vec<Video>;
}

/// Read-only question bank filtered by outcome and difficulty; `exclude`
/// holds question ids the student has already seen.
pub trait QuestionPool: Send + Sync {
    fn unseen(
        &self,
        subject: &str,
        learning_outcome: &str,
        difficulty: Difficulty,
        exclude: &HashSet<String>,
    ) -> Vec<String>;
}

/// Question bank entry as served by the external pool collaborator.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PoolQuestion {
    pub question_id: String,
    pub subject: String,
    pub learning_outcome: String,
    pub difficulty: Difficulty,
}

/// Catalog backed by a plain list, loaded from reference data at startup.
#[derive(Default)]
pub struct InMemoryVideoCatalog {
    videos: Vec<Video>,
}

impl InMemoryVideoCatalog {
    pub fn new(videos: Vec<Video>) -> Self {
        Self { videos }
    }
}

impl VideoCatalog for InMemoryVideoCatalog {
    fn by_outcome(&self, subject: &str, learning_outcome: &str) -> Vec<Video> {
        self.videos
            .iter()
            .filter(|v| v.subject == subject && v.learning_outcome == learning_outcome)
            .cloned()
            .collect()
    }

    fn by_topic(&self, subject: &str, topic: &str) -> Vec<Video> {
        self.videos
            .iter()
            .filter(|v| v.subject == subject && v.topic == topic)
            .cloned()
            .collect()
    }

    fn by_subject(&self, subject: &str) -> Vec<Video> {
        self.videos
            .iter()
            .filter(|v| v.subject == subject)
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct InMemoryQuestionPool {
    questions: Vec<PoolQuestion>,
}

impl InMemoryQuestionPool {
    pub fn new(questions: Vec<PoolQuestion>) -> Self {
        Self { questions }
    }
}

impl QuestionPool for InMemoryQuestionPool {
    fn unseen(
        &self,
        subject: &str,
        learning_outcome: &str,
        difficulty: Difficulty,
        exclude: &HashSet<String>,
    ) -> Vec<String> {
        self.questions
            .iter()
            .filter(|q| {
                q.subject == subject
                    && q.learning_outcome == learning_outcome
                    && q.difficulty == difficulty
                    && !exclude.contains(&q.question_id)
            })
            .map(|q| q.question_id.clone())
            .collect()
    }
}

struct WeakOutcome {
    subject: String,
    learning_outcome: String,
    topic: Option<String>,
    accuracy: f64,
    severity: f64,
}

/// Both recommendation algorithms read the store; neither mutates it.
pub struct RecommendationEngine {
    config: EngineConfig,
    registry: Arc<AccessRegistry>,
    store: Arc<PerformanceStore>,
    catalog: Arc<dyn VideoCatalog>,
    pool: Arc<dyn QuestionPool>,
}

impl RecommendationEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<AccessRegistry>,
        store: Arc<PerformanceStore>,
        catalog: Arc<dyn VideoCatalog>,
        pool: Arc<dyn QuestionPool>,
    ) -> Self {
        Self { config, registry, store, catalog, pool }
    }

    /// Ranks remedial videos against the student's weakest outcomes.
    /// Catalog lookup falls back from exact outcome to topic to subject,
    /// and each weak outcome contributes at most one video.
    pub fn recommend_videos(&self, student_id: &str, limit: usize) -> Vec<VideoRecommendation> {
        let Some(profile) = self.store.snapshot(student_id) else {
            return Vec::new();
        };

        // The recent window is the only place an outcome's topic is visible.
        let mut outcome_topics: HashMap<String, String> = HashMap::new();
        for sub in &profile.recent {
            outcome_topics.insert(sub.outcome_key(), sub.topic.clone());
        }

        let mut weak: Vec<WeakOutcome> = profile
            .per_outcome
            .iter()
            .filter(|(_, stat)| stat.tally.total >= self.config.video_min_attempts)
            .filter(|(_, stat)| stat.tally.accuracy() < self.config.video_accuracy_ceiling)
            .map(|(key, stat)| {
                let (subject, learning_outcome) = crate::models::split_key(key);
                let accuracy = stat.tally.accuracy();
                let evidence = f64::from(stat.tally.total.min(10)) / 10.0;
                WeakOutcome {
                    subject: subject.to_string(),
                    learning_outcome: learning_outcome.to_string(),
                    topic: outcome_topics.get(key).cloned(),
                    accuracy,
                    severity: (self.config.video_accuracy_ceiling - accuracy) * evidence,
                }
            })
            .collect();

        weak.sort_by(|a, b| {
            b.severity
                .partial_cmp(&a.severity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.learning_outcome.cmp(&b.learning_outcome))
        });

        let mut seen_videos: HashSet<String> = HashSet::new();
        let mut recommendations = Vec::new();

        for outcome in &weak {
            if recommendations.len() >= limit {
                break;
            }
            let Some((video, specificity)) = self.find_video(outcome, &seen_videos) else {
                continue;
            };
            seen_videos.insert(video.video_id.clone());
            recommendations.push(VideoRecommendation {
                targeted_outcome: outcome.learning_outcome.clone(),
                targeted_subject: outcome.subject.clone(),
                student_accuracy: outcome.accuracy,
                specificity,
                relevance: specificity.weight() * (0.5 + outcome.severity),
                video,
            });
        }

        recommendations
    }

    fn find_video(
        &self,
        outcome: &WeakOutcome,
        seen: &HashSet<String>,
    ) -> Option<(Video, MatchSpecificity)> {
        let tiers = [
            (
                self.catalog
                    .by_outcome(&outcome.subject, &outcome.learning_outcome),
                MatchSpecificity::Outcome,
            ),
            (
                outcome
                    .topic
                    .as_ref()
                    .map(|topic| self.catalog.by_topic(&outcome.subject, topic))
                    .unwrap_or_default(),
                MatchSpecificity::Topic,
            ),
            (self.catalog.by_subject(&outcome.subject), MatchSpecificity::Subject),
        ];

        for (videos, specificity) in tiers {
            if let Some(video) = videos.into_iter().find(|v| !seen.contains(&v.video_id)) {
                return Some((video, specificity));
            }
        }
        None
    }

    /// Outcome-aligned mini-test with per-student difficulty targeting.
    /// A student whose unseen pool is short lands in `skipped`; the call
    /// fails outright only when nobody can be served.
    pub fn generate_mini_test(
        &self,
        teacher_id: &str,
        student_ids: &[String],
        learning_outcome: &str,
        subject: &str,
        question_count: usize,
    ) -> Result<MiniTest> {
        if student_ids.is_empty() || question_count == 0 {
            return Err(InsightError::Validation(vec![
                "mini-test needs at least one student and one question".to_string(),
            ]));
        }

        for student_id in student_ids {
            let class_id = self
                .store
                .class_of(student_id)
                .ok_or_else(|| InsightError::NotFound(format!("student {student_id}")))?;
            if !self.registry.authorize(teacher_id, &class_id, Some(subject)) {
                return Err(InsightError::Forbidden(format!(
                    "teacher {teacher_id} is not authorized for student {student_id}"
                )));
            }
        }

        let outcome_key = scoped_key(subject, learning_outcome);
        let mut assignments = Vec::new();
        let mut skipped = Vec::new();

        for student_id in student_ids {
            let Some(profile) = self.store.snapshot(student_id) else {
                continue;
            };
            let difficulty = target_difficulty(profile.outcome_accuracy(&outcome_key));
            let exclude: HashSet<String> =
                profile.seen_question_ids().map(str::to_string).collect();

            let available = self
                .pool
                .unseen(subject, learning_outcome, difficulty, &exclude);
            if available.len() < question_count {
                skipped.push(SkippedStudent {
                    student_id: student_id.clone(),
                    difficulty,
                    requested: question_count,
                    available: available.len(),
                });
                continue;
            }

            assignments.push(MiniTestAssignment {
                student_id: student_id.clone(),
                difficulty,
                question_ids: available.into_iter().take(question_count).collect(),
            });
        }

        if assignments.is_empty() {
            if let Some(first) = skipped.first() {
                return Err(InsightError::InsufficientPool {
                    student_id: first.student_id.clone(),
                    requested: first.requested,
                    available: first.available,
                });
            }
            return Err(InsightError::NotFound(
                "no profiles found for the requested students".to_string(),
            ));
        }

        let test = MiniTest {
            test_id: Uuid::new_v4().to_string(),
            created_by: teacher_id.to_string(),
            subject: subject.to_string(),
            learning_outcome: learning_outcome.to_string(),
            question_count,
            time_limit_seconds: (question_count as u32) * self.config.seconds_per_question,
            assignments,
            skipped,
            created_at: Utc::now(),
        };
        info!(
            test = %test.test_id,
            students = test.assignments.len(),
            skipped = test.skipped.len(),
            "mini-test generated"
        );
        Ok(test)
    }
}

/// Accuracy bands for per-student difficulty targeting.
fn target_difficulty(accuracy: f64) -> Difficulty {
    if accuracy < 0.40 {
        Difficulty::Easy
    } else if accuracy <= 0.70 {
        Difficulty::Medium
    } else {
        Difficulty::Hard
    }
}

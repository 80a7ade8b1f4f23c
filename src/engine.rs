use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::access::{AccessRegistry, TeacherAccess};
use crate::alerts::AlertEngine;
use crate::config::EngineConfig;
use crate::error::{InsightError, Result};
use crate::ingest::{ImportSummary, IngestReceipt, SubmissionIngestor, SubmissionRequest};
use crate::insights::ClassInsightBuilder;
use crate::models::{
    Alert, ClassOverviewSnapshot, LearningOutcomeAnalysis, MiniTest, Severity,
    StudentProfileView, VideoRecommendation,
};
use crate::outcomes::LearningOutcomeAnalyzer;
use crate::recommend::{QuestionPool, RecommendationEngine, VideoCatalog};
use crate::store::PerformanceStore;

/// The composed analytics service. Everything hangs off this explicitly
/// constructed object; tests build as many isolated instances as they need.
pub struct InsightEngine {
    registry: Arc<AccessRegistry>,
    store: Arc<PerformanceStore>,
    alerts: Arc<AlertEngine>,
    ingestor: SubmissionIngestor,
    insights: ClassInsightBuilder,
    outcomes: LearningOutcomeAnalyzer,
    recommender: RecommendationEngine,
}

impl InsightEngine {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn VideoCatalog>,
        pool: Arc<dyn QuestionPool>,
    ) -> Self {
        let registry = Arc::new(AccessRegistry::new());
        let store = Arc::new(PerformanceStore::new(config.recent_window));
        let alerts = Arc::new(AlertEngine::new(config.clone()));

        Self {
            ingestor: SubmissionIngestor::new(store.clone(), alerts.clone()),
            insights: ClassInsightBuilder::new(
                config.clone(),
                registry.clone(),
                store.clone(),
                alerts.clone(),
            ),
            outcomes: LearningOutcomeAnalyzer::new(config.clone(), registry.clone(), store.clone()),
            recommender: RecommendationEngine::new(
                config,
                registry.clone(),
                store.clone(),
                catalog,
                pool,
            ),
            registry,
            store,
            alerts,
        }
    }

    pub fn register_access(&self, access: TeacherAccess) {
        info!(teacher = %access.teacher_id, classes = access.class_ids.len(), "teacher access registered");
        self.registry.register(access);
    }

    pub fn submit(&self, request: SubmissionRequest) -> Result<IngestReceipt> {
        self.ingestor.ingest(request)
    }

    pub fn import_csv(&self, path: &Path) -> anyhow::Result<ImportSummary> {
        self.ingestor.import_csv(path)
    }

    pub fn class_overview(
        &self,
        teacher_id: &str,
        class_id: &str,
        subject: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ClassOverviewSnapshot> {
        self.insights.overview(teacher_id, class_id, subject, timeout)
    }

    pub fn student_profile(&self, teacher_id: &str, student_id: &str) -> Result<StudentProfileView> {
        self.insights.student_profile(teacher_id, student_id)
    }

    pub fn outcome_analysis(
        &self,
        teacher_id: &str,
        learning_outcome: &str,
        subject: &str,
    ) -> Result<LearningOutcomeAnalysis> {
        self.outcomes.analyze(teacher_id, learning_outcome, subject)
    }

    /// Active alerts visible to the teacher. With a class given, that class
    /// must be in scope; without one, the union of the teacher's classes.
    pub fn alerts(
        &self,
        teacher_id: &str,
        class_id: Option<&str>,
        severity: Option<Severity>,
    ) -> Result<Vec<Alert>> {
        match class_id {
            Some(class_id) => {
                if !self.registry.authorize(teacher_id, class_id, None) {
                    return Err(InsightError::Forbidden(format!(
                        "teacher {teacher_id} is not authorized for class {class_id}"
                    )));
                }
                Ok(self.alerts.active(Some(class_id), severity, None))
            }
            None => {
                let classes = self.registry.classes_of(teacher_id);
                if classes.is_empty() {
                    return Err(InsightError::Forbidden(format!(
                        "teacher {teacher_id} is not registered"
                    )));
                }
                let mut all: Vec<Alert> = classes
                    .iter()
                    .flat_map(|class_id| self.alerts.active(Some(class_id), severity, None))
                    .collect();
                all.sort_by(|a, b| b.last_triggered.cmp(&a.last_triggered));
                Ok(all)
            }
        }
    }

    pub fn resolve_alert(&self, alert_id: &str, teacher_id: &str, note: &str) -> Result<Alert> {
        self.alerts.resolve(alert_id, teacher_id, note, &self.registry)
    }

    pub fn video_recommendations(&self, student_id: &str, limit: usize) -> Vec<VideoRecommendation> {
        self.recommender.recommend_videos(student_id, limit)
    }

    pub fn generate_mini_test(
        &self,
        teacher_id: &str,
        student_ids: &[String],
        learning_outcome: &str,
        subject: &str,
        question_count: usize,
    ) -> Result<MiniTest> {
        self.recommender.generate_mini_test(
            teacher_id,
            student_ids,
            learning_outcome,
            subject,
            question_count,
        )
    }

    /// Periodic batch pass: activity-drop and overall trend rules.
    pub fn sweep(&self) -> Vec<String> {
        self.alerts.sweep(&self.store, Utc::now().date_naive())
    }

    pub fn store(&self) -> &Arc<PerformanceStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Trend;
    use crate::recommend::{InMemoryQuestionPool, InMemoryVideoCatalog};

    fn engine() -> InsightEngine {
        let engine = InsightEngine::new(
            EngineConfig::default(),
            Arc::new(InMemoryVideoCatalog::default()),
            Arc::new(InMemoryQuestionPool::default()),
        );
        engine.register_access(TeacherAccess {
            teacher_id: "t-1".to_string(),
            class_ids: ["class_8A".to_string()].into_iter().collect(),
            subjects: ["Matematik".to_string()].into_iter().collect(),
            is_homeroom: false,
        });
        engine
    }

    fn request(student: &str, selected: &str) -> SubmissionRequest {
        SubmissionRequest {
            submission_id: None,
            student_id: student.to_string(),
            question_id: uuid::Uuid::new_v4().to_string(),
            class_id: "class_8A".to_string(),
            subject: "Matematik".to_string(),
            topic: "Olasılık".to_string(),
            learning_outcome: "M.8.5.1".to_string(),
            difficulty: "medium".to_string(),
            selected_answer: selected.to_string(),
            correct_answer: "A".to_string(),
            time_spent_seconds: 30,
            timestamp: None,
            session_id: None,
            teacher_id: "t-1".to_string(),
        }
    }

    #[test]
    fn end_to_end_alert_lifecycle() {
        let engine = engine();

        // Five answers at 40% accuracy, trailing correct: the low-accuracy
        // rule fires critical.
        for selected in ["B", "B", "A", "B", "A"] {
            engine.submit(request("s1", selected)).unwrap();
        }

        let alerts = engine
            .alerts("t-1", Some("class_8A"), Some(Severity::Critical))
            .unwrap();
        assert_eq!(alerts.len(), 1);

        let resolved = engine
            .resolve_alert(&alerts[0].alert_id, "t-1", "remedial session scheduled")
            .unwrap();
        assert!(!resolved.is_active);
        assert!(engine
            .alerts("t-1", Some("class_8A"), Some(Severity::Critical))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn alerts_without_class_cover_all_registered_classes() {
        let engine = engine();
        for selected in ["B", "B", "B"] {
            engine.submit(request("s1", selected)).unwrap();
        }

        let alerts = engine.alerts("t-1", None, None).unwrap();
        assert!(!alerts.is_empty());

        let err = engine.alerts("t-ghost", None, None).unwrap_err();
        assert!(matches!(err, InsightError::Forbidden(_)));
        let err = engine.alerts("t-1", Some("class_8B"), None).unwrap_err();
        assert!(matches!(err, InsightError::Forbidden(_)));
    }

    #[test]
    fn overview_and_profile_flow_through_the_same_state() {
        let engine = engine();
        for selected in ["A", "B", "B", "B"] {
            engine.submit(request("s1", selected)).unwrap();
        }

        let overview = engine
            .class_overview("t-1", "class_8A", Some("Matematik"), None)
            .unwrap();
        assert_eq!(overview.student_count, 1);
        assert_eq!(overview.total_submissions, 4);
        assert_eq!(overview.seven_day_trend.trend, Trend::InsufficientData);

        let profile = engine.student_profile("t-1", "s1").unwrap();
        assert_eq!(profile.total_submissions, 4);
        assert!((profile.overall_accuracy - 0.25).abs() < 1e-9);
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use crate::access::AccessRegistry;
use crate::config::EngineConfig;
use crate::error::{InsightError, Result};
use crate::models::{
    scoped_key, Difficulty, DifficultyBreakdown, LearningOutcomeAnalysis, StudentOutcomeStanding,
    Tally, WrongOptionCount,
};
use crate::store::PerformanceStore;

/// Cross-student breakdown for a single learning outcome, scoped to the
/// teacher's classes. Requires subject-level authorization.
pub struct LearningOutcomeAnalyzer {
    config: EngineConfig,
    registry: Arc<AccessRegistry>,
    store: Arc<PerformanceStore>,
}

impl LearningOutcomeAnalyzer {
    pub fn new(
        config: EngineConfig,
        registry: Arc<AccessRegistry>,
        store: Arc<PerformanceStore>,
    ) -> Self {
        Self { config, registry, store }
    }

    pub fn analyze(
        &self,
        teacher_id: &str,
        learning_outcome: &str,
        subject: &str,
    ) -> Result<LearningOutcomeAnalysis> {
        if !self.registry.authorize_subject(teacher_id, subject) {
            return Err(InsightError::Forbidden(format!(
                "teacher {teacher_id} is not authorized for subject {subject}"
            )));
        }

        let mut student_ids: Vec<String> = Vec::new();
        for class_id in self.registry.classes_of(teacher_id) {
            student_ids.extend(self.store.students_in_class(&class_id));
        }
        student_ids.sort();
        student_ids.dedup();

        let (profiles, _) = self.store.snapshot_many(&student_ids, None);
        let outcome_key = scoped_key(subject, learning_outcome);

        let mut standings: Vec<StudentOutcomeStanding> = Vec::new();
        let mut tiers = [Tally::default(); 3];
        let mut wrong_options: HashMap<String, u32> = HashMap::new();

        for profile in &profiles {
            let Some(stat) = profile.per_outcome.get(&outcome_key) else {
                continue;
            };
            standings.push(StudentOutcomeStanding {
                student_id: profile.student_id.clone(),
                accuracy: stat.tally.accuracy(),
                total_attempts: stat.tally.total,
                struggling: false,
            });
            for difficulty in Difficulty::ALL {
                let tier = stat.per_difficulty[difficulty.index()];
                tiers[difficulty.index()].correct += tier.correct;
                tiers[difficulty.index()].total += tier.total;
            }
            for (option, count) in &stat.wrong_answers {
                *wrong_options.entry(option.clone()).or_insert(0) += count;
            }
        }

        standings.sort_by(|a, b| {
            b.accuracy
                .partial_cmp(&a.accuracy)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.student_id.cmp(&b.student_id))
        });

        // Bottom quartile is flagged struggling, as is anyone below the
        // low-accuracy alert floor.
        let quartile = standings.len().div_ceil(4);
        let cutoff_rank = standings.len().saturating_sub(quartile);
        let threshold = self.config.low_accuracy_threshold;
        for (rank, standing) in standings.iter_mut().enumerate() {
            standing.struggling = rank >= cutoff_rank || standing.accuracy < threshold;
        }

        let class_accuracy = if standings.is_empty() {
            0.0
        } else {
            standings.iter().map(|s| s.accuracy).sum::<f64>() / standings.len() as f64
        };

        let difficulty_breakdown: Vec<DifficultyBreakdown> = Difficulty::ALL
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
            .collect();

        let mut common_wrong_options: Vec<WrongOptionCount> = wrong_options
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .map(|(selected_answer, count)| WrongOptionCount { selected_answer, count })
            .collect();
        common_wrong_options.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(a.selected_answer.cmp(&b.selected_answer))
        });
        common_wrong_options.truncate(3);

        let interventions =
            interventions(class_accuracy, &standings, &difficulty_breakdown);

        Ok(LearningOutcomeAnalysis {
            learning_outcome: learning_outcome.to_string(),
            subject: subject.to_string(),
            class_accuracy,
            standings,
            difficulty_breakdown,
            common_wrong_options,
            interventions,
        })
    }
}

fn interventions(
    class_accuracy: f64,
    standings: &[StudentOutcomeStanding],
    tiers: &[DifficultyBreakdown],
) -> Vec<String> {
    let mut suggestions = Vec::new();
    if standings.is_empty() {
        return suggestions;
    }

    if class_accuracy < 0.5 {
        suggestions.push(
            "Overall accuracy on this outcome is low; plan a fundamental concept review"
                .to_string(),
        );
    }

    let struggling = standings.iter().filter(|s| s.struggling).count();
    if struggling as f64 > standings.len() as f64 * 0.3 {
        suggestions.push(format!(
            "{struggling} of {} students are struggling; consider a class-wide intervention",
            standings.len()
        ));
    }

    let easy = &tiers[Difficulty::Easy.index()];
    let hard = &tiers[Difficulty::Hard.index()];
    if easy.total == 0 && hard.total > 0 {
        suggestions.push("Add easier questions to rebuild confidence".to_string());
    }
    if hard.total >= 3 && hard.accuracy + 0.25 < class_accuracy {
        suggestions.push(
            "Hard-tier accuracy lags far behind the rest; revisit advanced applications"
                .to_string(),
        );
    }

    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::TeacherAccess;
    use crate::models::QuestionSubmission;
    use chrono::Utc;
    use uuid::Uuid;

    fn analyzer() -> (Arc<PerformanceStore>, LearningOutcomeAnalyzer) {
        let config = EngineConfig::default();
        let registry = Arc::new(AccessRegistry::new());
        registry.register(TeacherAccess {
            teacher_id: "t-fen".to_string(),
            class_ids: ["class_8A".to_string()].into_iter().collect(),
            subjects: ["Fen Bilimleri".to_string()].into_iter().collect(),
            is_homeroom: false,
        });
        let store = Arc::new(PerformanceStore::new(config.recent_window));
        let analyzer = LearningOutcomeAnalyzer::new(config, registry, store.clone());
        (store, analyzer)
    }

    fn submission(
        student: &str,
        difficulty: Difficulty,
        selected: &str,
        is_correct: bool,
    ) -> QuestionSubmission {
        QuestionSubmission {
            submission_id: Uuid::new_v4().to_string(),
            student_id: student.to_string(),
            question_id: Uuid::new_v4().to_string(),
            class_id: "class_8A".to_string(),
            subject: "Fen Bilimleri".to_string(),
            topic: "Basınç".to_string(),
            learning_outcome: "F.8.3.2".to_string(),
            difficulty,
            selected_answer: selected.to_string(),
            correct_answer: "A".to_string(),
            is_correct,
            time_spent_seconds: 50,
            timestamp: Utc::now(),
            session_id: "sess".to_string(),
            teacher_id: "t-fen".to_string(),
        }
    }

    #[test]
    fn requires_subject_authorization() {
        let (_, analyzer) = analyzer();
        let err = analyzer.analyze("t-fen", "M.8.1.1", "Matematik").unwrap_err();
        assert!(matches!(err, InsightError::Forbidden(_)));
        assert!(analyzer.analyze("t-fen", "F.8.3.2", "Fen Bilimleri").is_ok());
    }

    #[test]
    fn ranks_students_and_flags_the_bottom_quartile() {
        let (store, analyzer) = analyzer();

        // s1: 4/4, s2: 3/4, s3: 3/4, s4: 1/4.
        let outcomes = [("s1", 4), ("s2", 3), ("s3", 3), ("s4", 1)];
        for (student, correct) in outcomes {
            for i in 0..4 {
                let ok = i < correct;
                store.record(&submission(student, Difficulty::Medium, if ok { "A" } else { "B" }, ok));
            }
        }

        let analysis = analyzer.analyze("t-fen", "F.8.3.2", "Fen Bilimleri").unwrap();
        assert_eq!(analysis.standings.len(), 4);
        assert_eq!(analysis.standings[0].student_id, "s1");
        assert_eq!(analysis.standings[3].student_id, "s4");
        assert!(analysis.standings[3].struggling);
        assert!(!analysis.standings[0].struggling);
        assert!(!analysis.standings[1].struggling);
        let expected = (1.0 + 0.75 + 0.75 + 0.25) / 4.0;
        assert!((analysis.class_accuracy - expected).abs() < 1e-9);
    }

    #[test]
    fn breaks_accuracy_down_by_difficulty_tier() {
        let (store, analyzer) = analyzer();

        store.record(&submission("s1", Difficulty::Easy, "A", true));
        store.record(&submission("s1", Difficulty::Easy, "A", true));
        store.record(&submission("s1", Difficulty::Hard, "C", false));
        store.record(&submission("s1", Difficulty::Hard, "C", false));
        store.record(&submission("s1", Difficulty::Hard, "A", true));

        let analysis = analyzer.analyze("t-fen", "F.8.3.2", "Fen Bilimleri").unwrap();
        let easy = &analysis.difficulty_breakdown[Difficulty::Easy.index()];
        let hard = &analysis.difficulty_breakdown[Difficulty::Hard.index()];
        assert_eq!(easy.accuracy, 1.0);
        assert_eq!(hard.total, 3);
        assert!((hard.accuracy - 1.0 / 3.0).abs() < 1e-9);

        // "C" was picked twice; the single-wrong threshold hides nothing else.
        assert_eq!(analysis.common_wrong_options.len(), 1);
        assert_eq!(analysis.common_wrong_options[0].selected_answer, "C");
    }

    #[test]
    fn low_class_accuracy_triggers_interventions() {
        let (store, analyzer) = analyzer();

        for student in ["s1", "s2", "s3"] {
            for i in 0..4 {
                let ok = i == 0;
                store.record(&submission(student, Difficulty::Hard, if ok { "A" } else { "D" }, ok));
            }
        }

        let analysis = analyzer.analyze("t-fen", "F.8.3.2", "Fen Bilimleri").unwrap();
        assert!(analysis
            .interventions
            .iter()
            .any(|s| s.contains("fundamental concept review")));
        assert!(analysis
            .interventions
            .iter()
            .any(|s| s.contains("class-wide intervention")));
        assert!(analysis
            .interventions
            .iter()
            .any(|s| s.contains("easier questions")));
    }
}

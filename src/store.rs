use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::models::{QuestionSubmission, RecentSubmission, StudentPerformanceProfile};

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone, Copy)]
pub enum Dimension {
    Topic,
    Outcome,
}

/// Owner of all per-student rolling state.
///
/// The student map is sharded by student-id hash; a shard lock is held only
/// for map lookup or insert. Each profile sits behind its own mutex, so
/// writers for the same student serialize while different students proceed
/// in parallel. Reads clone the profile under that mutex and never hold a
/// lock across a class-wide scan.
pub struct PerformanceStore {
    shards: Vec<RwLock<HashMap<String, Arc<Mutex<StudentPerformanceProfile>>>>>,
    class_index: RwLock<HashMap<String, HashSet<String>>>,
    recent_window: usize,
}

impl PerformanceStore {
    pub fn new(recent_window: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            class_index: RwLock::new(HashMap::new()),
            recent_window,
        }
    }

    fn shard_for(&self, student_id: &str) -> &RwLock<HashMap<String, Arc<Mutex<StudentPerformanceProfile>>>> {
        let mut hasher = DefaultHasher::new();
        student_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn profile_handle(&self, student_id: &str) -> Option<Arc<Mutex<StudentPerformanceProfile>>> {
        self.shard_for(student_id).read().get(student_id).cloned()
    }

    fn profile_handle_or_insert(&self, student_id: &str) -> Arc<Mutex<StudentPerformanceProfile>> {
        let shard = self.shard_for(student_id);
        if let Some(handle) = shard.read().get(student_id) {
            return handle.clone();
        }
        shard
            .write()
            .entry(student_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(StudentPerformanceProfile::new(student_id))))
            .clone()
    }

    /// Applies one accepted submission. Atomic per submission: the profile
    /// mutex is held for the whole update, so no partial state is observable.
    pub fn record(&self, submission: &QuestionSubmission) {
        self.class_index
            .write()
            .entry(submission.class_id.clone())
            .or_default()
            .insert(submission.student_id.clone());

        let handle = self.profile_handle_or_insert(&submission.student_id);
        let mut profile = handle.lock();

        profile.overall.record(submission.is_correct);
        profile.time_spent_seconds += u64::from(submission.time_spent_seconds);

        let topic = profile.per_topic.entry(submission.topic_key()).or_default();
        topic.tally.record(submission.is_correct);
        topic.time_spent_seconds += u64::from(submission.time_spent_seconds);
        if !submission.is_correct {
            *topic
                .wrong_answers
                .entry(submission.selected_answer.clone())
                .or_insert(0) += 1;
        }

        let outcome = profile.per_outcome.entry(submission.outcome_key()).or_default();
        outcome.tally.record(submission.is_correct);
        outcome.per_difficulty[submission.difficulty.index()].record(submission.is_correct);
        if submission.is_correct {
            outcome.consecutive_errors = 0;
        } else {
            outcome.consecutive_errors += 1;
            *outcome
                .wrong_answers
                .entry(submission.selected_answer.clone())
                .or_insert(0) += 1;
        }

        profile
            .daily
            .entry(submission.timestamp.date_naive())
            .or_default()
            .record(submission.is_correct);

        profile.recent.push_back(RecentSubmission {
            question_id: submission.question_id.clone(),
            subject: submission.subject.clone(),
            topic: submission.topic.clone(),
            learning_outcome: submission.learning_outcome.clone(),
            difficulty: submission.difficulty,
            selected_answer: submission.selected_answer.clone(),
            is_correct: submission.is_correct,
            time_spent_seconds: submission.time_spent_seconds,
            timestamp: submission.timestamp,
        });
        while profile.recent.len() > self.recent_window {
            profile.recent.pop_front();
        }

        profile.last_updated = Utc::now();
    }

    /// Accuracy on one topic or outcome key; 0.0 when nothing is recorded.
    pub fn accuracy(&self, student_id: &str, dimension: Dimension, key: &str) -> f64 {
        let Some(handle) = self.profile_handle(student_id) else {
            return 0.0;
        };
        let profile = handle.lock();
        match dimension {
            Dimension::Topic => profile
                .per_topic
                .get(key)
                .map(|s| s.tally.accuracy())
                .unwrap_or(0.0),
            Dimension::Outcome => profile
                .per_outcome
                .get(key)
                .map(|s| s.tally.accuracy())
                .unwrap_or(0.0),
        }
    }

    /// Clone-on-read snapshot of one student.
    pub fn snapshot(&self, student_id: &str) -> Option<StudentPerformanceProfile> {
        self.profile_handle(student_id).map(|h| h.lock().clone())
    }

    /// Snapshots for a set of students without holding any lock across the
    /// scan. Returns the profiles gathered before `deadline` expired and a
    /// flag marking the result incomplete when it did.
    pub fn snapshot_many(
        &self,
        student_ids: &[String],
        deadline: Option<Instant>,
    ) -> (Vec<StudentPerformanceProfile>, bool) {
        let mut profiles = Vec::with_capacity(student_ids.len());
        for student_id in student_ids {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return (profiles, true);
                }
            }
            if let Some(profile) = self.snapshot(student_id) {
                profiles.push(profile);
            }
        }
        (profiles, false)
    }

    pub fn students_in_class(&self, class_id: &str) -> Vec<String> {
        let index = self.class_index.read();
        let mut students: Vec<String> = index
            .get(class_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        students.sort();
        students
    }

    pub fn class_of_students(&self) -> Vec<(String, Vec<String>)> {
        let index = self.class_index.read();
        index
            .iter()
            .map(|(class, students)| {
                let mut ids: Vec<String> = students.iter().cloned().collect();
                ids.sort();
                (class.clone(), ids)
            })
            .collect()
    }

    /// Class a student was last seen submitting under, for alert scoping
    /// during batch sweeps.
    pub fn class_of(&self, student_id: &str) -> Option<String> {
        let index = self.class_index.read();
        index
            .iter()
            .find(|(_, students)| students.contains(student_id))
            .map(|(class, _)| class.clone())
    }

    pub fn student_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;
    use chrono::{DateTime, Duration, Utc};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn submission(
        student: &str,
        outcome: &str,
        is_correct: bool,
        at: DateTime<Utc>,
    ) -> QuestionSubmission {
        let selected = if is_correct { "A" } else { "C" };
        QuestionSubmission {
            submission_id: format!("sub-{}", uuid::Uuid::new_v4()),
            student_id: student.to_string(),
            question_id: format!("q-{}", uuid::Uuid::new_v4()),
            class_id: "class_8A".to_string(),
            subject: "Matematik".to_string(),
            topic: "Çarpanlar ve Katlar".to_string(),
            learning_outcome: outcome.to_string(),
            difficulty: Difficulty::Medium,
            selected_answer: selected.to_string(),
            correct_answer: "A".to_string(),
            is_correct,
            time_spent_seconds: 45,
            timestamp: at,
            session_id: "sess-1".to_string(),
            teacher_id: "t-1".to_string(),
        }
    }

    #[test]
    fn accuracy_is_zero_with_no_data() {
        let store = PerformanceStore::new(50);
        assert_eq!(store.accuracy("nobody", Dimension::Outcome, "Matematik:M.8.1.1"), 0.0);

        store.record(&submission("s1", "M.8.1.1", true, Utc::now()));
        assert_eq!(store.accuracy("s1", Dimension::Outcome, "Matematik:other"), 0.0);
    }

    #[test]
    fn counters_never_exceed_totals_under_random_sequences() {
        let store = PerformanceStore::new(50);
        let mut rng = StdRng::seed_from_u64(17);
        let outcomes = ["M.8.1.1", "M.8.1.2", "M.8.2.1"];

        for _ in 0..400 {
            let outcome = outcomes[rng.gen_range(0..outcomes.len())];
            let correct = rng.gen_bool(0.6);
            store.record(&submission("s1", outcome, correct, Utc::now()));
        }

        let profile = store.snapshot("s1").unwrap();
        assert!(profile.overall.correct <= profile.overall.total);
        for stat in profile.per_outcome.values() {
            assert!(stat.tally.correct <= stat.tally.total);
            for tier in &stat.per_difficulty {
                assert!(tier.correct <= tier.total);
            }
        }
        for stat in profile.per_topic.values() {
            assert!(stat.tally.correct <= stat.tally.total);
        }
    }

    #[test]
    fn consecutive_errors_match_trailing_run() {
        let store = PerformanceStore::new(50);
        let mut rng = StdRng::seed_from_u64(99);
        let mut expected: u32 = 0;

        for _ in 0..200 {
            let correct = rng.gen_bool(0.5);
            store.record(&submission("s1", "M.8.1.1", correct, Utc::now()));
            expected = if correct { 0 } else { expected + 1 };

            let profile = store.snapshot("s1").unwrap();
            let stat = &profile.per_outcome["Matematik:M.8.1.1"];
            assert_eq!(stat.consecutive_errors, expected);
        }
    }

    #[test]
    fn recent_window_is_bounded_fifo_at_50() {
        let store = PerformanceStore::new(50);
        let start = Utc::now();
        for i in 0..60 {
            let mut sub = submission("s1", "M.8.1.1", true, start + Duration::seconds(i));
            sub.question_id = format!("q-{i}");
            store.record(&sub);
        }

        let profile = store.snapshot("s1").unwrap();
        assert_eq!(profile.recent.len(), 50);
        // The 10 oldest were evicted.
        assert_eq!(profile.recent.front().unwrap().question_id, "q-10");
        assert_eq!(profile.recent.back().unwrap().question_id, "q-59");
        // The counters still see all 60.
        assert_eq!(profile.overall.total, 60);
    }

    #[test]
    fn daily_buckets_split_by_calendar_date() {
        let store = PerformanceStore::new(50);
        let today = Utc::now();
        let yesterday = today - Duration::days(1);

        store.record(&submission("s1", "M.8.1.1", true, yesterday));
        store.record(&submission("s1", "M.8.1.1", false, yesterday));
        store.record(&submission("s1", "M.8.1.1", true, today));

        let profile = store.snapshot("s1").unwrap();
        assert_eq!(profile.daily.len(), 2);
        assert_eq!(profile.daily[&yesterday.date_naive()].total, 2);
        assert_eq!(profile.daily[&today.date_naive()].total, 1);
    }

    #[test]
    fn same_student_writers_serialize_across_threads() {
        let store = std::sync::Arc::new(PerformanceStore::new(50));
        let mut handles = Vec::new();
        for t in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let correct = (t + i) % 2 == 0;
                    store.record(&submission("shared", "M.8.1.1", correct, Utc::now()));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let profile = store.snapshot("shared").unwrap();
        assert_eq!(profile.overall.total, 400);
        assert_eq!(profile.per_outcome["Matematik:M.8.1.1"].tally.total, 400);
    }

    #[test]
    fn expired_deadline_yields_labeled_partial_snapshot() {
        let store = PerformanceStore::new(50);
        store.record(&submission("s1", "M.8.1.1", true, Utc::now()));
        store.record(&submission("s2", "M.8.1.1", true, Utc::now()));

        let ids = vec!["s1".to_string(), "s2".to_string()];
        let (profiles, incomplete) = store.snapshot_many(&ids, Some(Instant::now()));
        assert!(incomplete);
        assert!(profiles.is_empty());

        let (profiles, incomplete) = store.snapshot_many(&ids, None);
        assert!(!incomplete);
        assert_eq!(profiles.len(), 2);
    }
}

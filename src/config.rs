use serde::{Deserialize, Serialize};

/// Engine tuning knobs. Defaults carry the standard alert and
/// recommendation thresholds; deployments override the few they care about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded FIFO window of recent submissions kept per student.
    pub recent_window: usize,
    /// Low-accuracy alert: minimum attempts before the rule applies.
    pub low_accuracy_min_attempts: u32,
    /// Low-accuracy alert: accuracy floor.
    pub low_accuracy_threshold: f64,
    /// Consecutive-error alert threshold.
    pub consecutive_error_threshold: u32,
    /// Activity drop: today's count below `(1 - ratio) * trailing mean`.
    pub activity_drop_ratio: f64,
    /// Activity drop: minimum active prior days in the trailing window.
    pub activity_min_active_days: usize,
    /// Trend window in days.
    pub trend_window_days: i64,
    /// Video recommendations: accuracy ceiling for a weak outcome.
    pub video_accuracy_ceiling: f64,
    /// Video recommendations: minimum attempts for evidence.
    pub video_min_attempts: u32,
    /// Mini-test: seconds budgeted per question.
    pub seconds_per_question: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recent_window: 50,
            low_accuracy_min_attempts: 5,
            low_accuracy_threshold: 0.50,
            consecutive_error_threshold: 3,
            activity_drop_ratio: 0.5,
            activity_min_active_days: 3,
            trend_window_days: 7,
            video_accuracy_ceiling: 0.60,
            video_min_attempts: 3,
            seconds_per_question: 120,
        }
    }
}

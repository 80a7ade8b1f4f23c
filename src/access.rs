use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Scope a teacher operates under. Homeroom teachers see every subject in
/// their classes; subject teachers only their registered subjects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherAccess {
    pub teacher_id: String,
    pub class_ids: HashSet<String>,
    pub subjects: HashSet<String>,
    pub is_homeroom: bool,
}

/// Teacher -> scope lookup. Registration is an idempotent upsert; an unknown
/// teacher is denied everything.
#[derive(Default)]
pub struct AccessRegistry {
    entries: RwLock<HashMap<String, TeacherAccess>>,
}

impl AccessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any prior scope for the teacher.
    pub fn register(&self, access: TeacherAccess) {
        self.entries
            .write()
            .insert(access.teacher_id.clone(), access);
    }

    /// Class-level check. With a subject given, subject teachers must also
    /// hold that subject; homeroom teachers pass for any subject within
    /// their classes.
    pub fn authorize(&self, teacher_id: &str, class_id: &str, subject: Option<&str>) -> bool {
        let entries = self.entries.read();
        let Some(access) = entries.get(teacher_id) else {
            return false;
        };
        if !access.class_ids.contains(class_id) {
            return false;
        }
        match subject {
            Some(subject) if !access.is_homeroom => access.subjects.contains(subject),
            _ => true,
        }
    }

    /// Subject-level check used by cross-class outcome analysis.
    pub fn authorize_subject(&self, teacher_id: &str, subject: &str) -> bool {
        let entries = self.entries.read();
        let Some(access) = entries.get(teacher_id) else {
            return false;
        };
        access.is_homeroom || access.subjects.contains(subject)
    }

    pub fn classes_of(&self, teacher_id: &str) -> HashSet<String> {
        self.entries
            .read()
            .get(teacher_id)
            .map(|a| a.class_ids.clone())
            .unwrap_or_default()
    }

    pub fn is_registered(&self, teacher_id: &str) -> bool {
        self.entries.read().contains_key(teacher_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject_teacher() -> TeacherAccess {
        TeacherAccess {
            teacher_id: "t-matematik".to_string(),
            class_ids: ["class_8A".to_string()].into_iter().collect(),
            subjects: ["Matematik".to_string()].into_iter().collect(),
            is_homeroom: false,
        }
    }

    #[test]
    fn subject_teacher_scope_is_class_times_subject() {
        let registry = AccessRegistry::new();
        registry.register(subject_teacher());

        assert!(registry.authorize("t-matematik", "class_8A", Some("Matematik")));
        assert!(registry.authorize("t-matematik", "class_8A", None));
        assert!(!registry.authorize("t-matematik", "class_8A", Some("Fen Bilimleri")));
        assert!(!registry.authorize("t-matematik", "class_8B", Some("Matematik")));
    }

    #[test]
    fn homeroom_teacher_passes_any_subject_in_class() {
        let registry = AccessRegistry::new();
        registry.register(TeacherAccess {
            teacher_id: "t-homeroom".to_string(),
            class_ids: ["class_8A".to_string()].into_iter().collect(),
            subjects: HashSet::new(),
            is_homeroom: true,
        });

        assert!(registry.authorize("t-homeroom", "class_8A", Some("Fen Bilimleri")));
        assert!(registry.authorize_subject("t-homeroom", "Matematik"));
        assert!(!registry.authorize("t-homeroom", "class_8B", None));
    }

    #[test]
    fn unknown_teacher_is_denied() {
        let registry = AccessRegistry::new();
        assert!(!registry.authorize("ghost", "class_8A", None));
        assert!(!registry.authorize_subject("ghost", "Matematik"));
        assert!(registry.classes_of("ghost").is_empty());
    }

    #[test]
    fn register_is_idempotent_and_replaces_scope() {
        let registry = AccessRegistry::new();
        registry.register(subject_teacher());
        registry.register(subject_teacher());
        assert!(registry.authorize("t-matematik", "class_8A", Some("Matematik")));

        let mut narrowed = subject_teacher();
        narrowed.class_ids = ["class_8B".to_string()].into_iter().collect();
        registry.register(narrowed);
        assert!(!registry.authorize("t-matematik", "class_8A", Some("Matematik")));
        assert!(registry.authorize("t-matematik", "class_8B", Some("Matematik")));
    }
}

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Completed/total/percentage rollup for a topic or course.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicProgress {
    pub completed: u32,
    pub total: u32,
    pub percentage: u8,
}

/// Client-side progress for one identity, persisted as a single JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub completed_lessons: Vec<String>,
    #[serde(default)]
    pub topic_progress: BTreeMap<String, TopicProgress>,
    #[serde(default)]
    pub words_learned: u32,
    pub last_study_date: NaiveDate,
    pub study_streak: u32,
    #[serde(default)]
    pub quiz_scores: BTreeMap<String, u8>,
    #[serde(default)]
    pub time_spent: BTreeMap<String, u32>,
}

impl ProgressRecord {
    /// Zero state for a user who has never studied. The streak starts at one
    /// on the creation date so the first completion that day does not bump it.
    pub fn new(created_on: NaiveDate) -> Self {
        Self {
            completed_lessons: Vec::new(),
            topic_progress: BTreeMap::new(),
            words_learned: 0,
            last_study_date: created_on,
            study_streak: 1,
            quiz_scores: BTreeMap::new(),
            time_spent: BTreeMap::new(),
        }
    }

    pub fn is_lesson_completed(&self, lesson_id: &str) -> bool {
        self.completed_lessons.iter().any(|id| id == lesson_id)
    }

    /// Returns false when the lesson was already recorded.
    pub fn insert_completed(&mut self, lesson_id: &str) -> bool {
        if self.is_lesson_completed(lesson_id) {
            return false;
        }
        self.completed_lessons.push(lesson_id.to_string());
        true
    }

    pub fn add_time_spent(&mut self, lesson_id: &str, minutes: u32) {
        let entry = self.time_spent.entry(lesson_id.to_string()).or_insert(0);
        *entry = entry.saturating_add(minutes);
    }

    /// Latest score wins; anything above 100 is clamped.
    pub fn set_quiz_score(&mut self, lesson_id: &str, score: u8) {
        self.quiz_scores.insert(lesson_id.to_string(), score.min(100));
    }

    pub fn add_words_learned(&mut self, count: u32) {
        self.words_learned = self.words_learned.saturating_add(count);
    }

    pub fn topic_progress(&self, topic_id: &str) -> TopicProgress {
        self.topic_progress
            .get(topic_id)
            .copied()
            .unwrap_or_default()
    }
}

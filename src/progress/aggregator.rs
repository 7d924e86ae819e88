//! Completion rollups. Everything here is pure so it can be exercised without
//! a store behind it.

use std::collections::{BTreeMap, HashSet};

use super::record::TopicProgress;

/// A topic and the ids of the lessons it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLessons {
    pub topic_id: String,
    pub lesson_ids: Vec<String>,
}

impl TopicLessons {
    pub fn new<I, S>(topic_id: &str, lesson_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topic_id: topic_id.to_string(),
            lesson_ids: lesson_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// `round(100 * part / whole)` with halves rounded up, in integer arithmetic.
/// A zero `whole` yields 0.
pub fn percentage(part: u32, whole: u32) -> u8 {
    if whole == 0 {
        return 0;
    }
    let part = u64::from(part.min(whole));
    let whole = u64::from(whole);
    ((200 * part + whole) / (2 * whole)) as u8
}

pub fn calculate_topic_progress<S: AsRef<str>>(
    topic_lesson_ids: &[S],
    completed_lessons: &[String],
) -> TopicProgress {
    let completed_set: HashSet<&str> = completed_lessons.iter().map(String::as_str).collect();

    let total = topic_lesson_ids.len() as u32;
    let completed = topic_lesson_ids
        .iter()
        .filter(|id| completed_set.contains(id.as_ref()))
        .count() as u32;

    TopicProgress {
        completed,
        total,
        percentage: percentage(completed, total),
    }
}

/// Full resync: the returned mapping holds exactly the given topics.
pub fn calculate_all_topic_progress(
    topics: &[TopicLessons],
    completed_lessons: &[String],
) -> BTreeMap<String, TopicProgress> {
    topics
        .iter()
        .map(|topic| {
            (
                topic.topic_id.clone(),
                calculate_topic_progress(&topic.lesson_ids, completed_lessons),
            )
        })
        .collect()
}

/// Rollup across every lesson of a course, regardless of topic.
pub fn course_progress(topics: &[TopicLessons], completed_lessons: &[String]) -> TopicProgress {
    let lesson_ids: Vec<&str> = topics
        .iter()
        .flat_map(|topic| topic.lesson_ids.iter().map(String::as_str))
        .collect();

    calculate_topic_progress(&lesson_ids, completed_lessons)
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::aggregator::TopicLessons;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    pub lesson_ids: Vec<String>,
}

/// Reverse index over the course tree, built once so lookups do not rescan
/// nested lists.
#[derive(Debug, Clone, Default)]
pub struct CourseCatalog {
    courses: Vec<Course>,
    lesson_to_topic: HashMap<String, (usize, usize)>,
    topic_to_course: HashMap<String, usize>,
}

impl CourseCatalog {
    pub fn new(courses: Vec<Course>) -> Self {
        let mut lesson_to_topic = HashMap::new();
        let mut topic_to_course = HashMap::new();

        for (course_idx, course) in courses.iter().enumerate() {
            for (topic_idx, topic) in course.topics.iter().enumerate() {
                topic_to_course
                    .entry(topic.id.clone())
                    .or_insert(course_idx);
                for lesson_id in &topic.lesson_ids {
                    lesson_to_topic
                        .entry(lesson_id.clone())
                        .or_insert((course_idx, topic_idx));
                }
            }
        }

        Self {
            courses,
            lesson_to_topic,
            topic_to_course,
        }
    }

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn topic_of(&self, lesson_id: &str) -> Option<&Topic> {
        self.lesson_to_topic
            .get(lesson_id)
            .map(|&(c, t)| &self.courses[c].topics[t])
    }

    pub fn course_of(&self, lesson_id: &str) -> Option<&Course> {
        self.lesson_to_topic
            .get(lesson_id)
            .map(|&(c, _)| &self.courses[c])
    }

    pub fn course_of_topic(&self, topic_id: &str) -> Option<&Course> {
        self.topic_to_course.get(topic_id).map(|&c| &self.courses[c])
    }

    pub fn topic_lessons(&self, topic_id: &str) -> Option<&[String]> {
        let course = self.course_of_topic(topic_id)?;
        course
            .topics
            .iter()
            .find(|t| t.id == topic_id)
            .map(|t| t.lesson_ids.as_slice())
    }

    /// Topics of every course, in catalog order, for a full rollup resync.
    pub fn all_topics(&self) -> Vec<TopicLessons> {
        self.courses
            .iter()
            .flat_map(|course| course.topics.iter())
            .map(|topic| TopicLessons::new(&topic.id, topic.lesson_ids.iter().cloned()))
            .collect()
    }

    pub fn course_topics(&self, course_id: &str) -> Vec<TopicLessons> {
        self.courses
            .iter()
            .filter(|course| course.id == course_id)
            .flat_map(|course| course.topics.iter())
            .map(|topic| TopicLessons::new(&topic.id, topic.lesson_ids.iter().cloned()))
            .collect()
    }

    pub fn course_lessons(&self, course_id: &str) -> Vec<&str> {
        self.courses
            .iter()
            .filter(|course| course.id == course_id)
            .flat_map(|course| course.topics.iter())
            .flat_map(|topic| topic.lesson_ids.iter().map(String::as_str))
            .collect()
    }

    pub fn lesson_count(&self) -> usize {
        self.lesson_to_topic.len()
    }

    pub fn next_lesson(&self, lesson_id: &str) -> Option<&str> {
        let lessons = &self.topic_of(lesson_id)?.lesson_ids;
        let idx = lessons.iter().position(|id| id == lesson_id)?;
        lessons.get(idx + 1).map(String::as_str)
    }

    pub fn previous_lesson(&self, lesson_id: &str) -> Option<&str> {
        let lessons = &self.topic_of(lesson_id)?.lesson_ids;
        let idx = lessons.iter().position(|id| id == lesson_id)?;
        idx.checked_sub(1)
            .and_then(|prev| lessons.get(prev))
            .map(String::as_str)
    }
}

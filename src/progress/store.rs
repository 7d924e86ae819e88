use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::aggregator::{self, TopicLessons};
use super::backend::KeyValueBackend;
use super::error::StoreError;
use super::record::{ProgressRecord, TopicProgress};
use super::streak::StudyStreak;
use super::sync::{SyncClient, SyncOutcome};
use crate::models::{
    CompleteLessonRequest, ExerciseResult, LessonProgress, StartLessonRequest,
    SubmitExerciseRequest, SubmitQuizRequest,
};

pub const STORAGE_PREFIX: &str = "learning_progress";
pub const CURRENT_USER_KEY: &str = "learning_progress::current_user";

pub fn progress_key(username: &str) -> String {
    format!("{}::{}", STORAGE_PREFIX, username)
}

/// Source of "today" for streak bookkeeping.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// The client's local calendar date.
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Updated { username: String },
    Reset { username: String },
}

#[derive(Debug)]
pub enum CompletionOutcome {
    AlreadyCompleted,
    Completed {
        record: ProgressRecord,
        sync: Option<SyncOutcome<LessonProgress>>,
    },
}

/// A completion saved locally whose push is still running.
#[derive(Debug)]
pub struct DetachedCompletion {
    pub record: ProgressRecord,
    pub sync: Option<JoinHandle<SyncOutcome<LessonProgress>>>,
}

fn completion_request(
    lesson_id: &str,
    course_id: &str,
    topic_id: &str,
    time_spent_minutes: u32,
) -> CompleteLessonRequest {
    CompleteLessonRequest {
        lesson_id: lesson_id.to_string(),
        course_id: course_id.to_string(),
        topic_id: topic_id.to_string(),
        time_spent_minutes: i64::from(time_spent_minutes),
    }
}

/// Per-identity progress cache over a key-value backend.
///
/// Every call names the identity it works on; the "current user" pointer is
/// only a convenience for callers that need to remember who logged in.
pub struct ProgressStore {
    backend: Arc<dyn KeyValueBackend>,
    clock: Arc<dyn Clock>,
    sync: Option<SyncClient>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            backend,
            clock,
            sync: None,
            events,
        }
    }

    pub fn with_sync(mut self, sync: SyncClient) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Same-process change notifications; other processes sharing the
    /// backend are not notified.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn current_user(&self) -> Option<String> {
        match self.backend.get(CURRENT_USER_KEY) {
            Ok(user) => user.filter(|u| !u.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read current user pointer");
                None
            }
        }
    }

    pub fn set_current_user(&self, username: &str) -> Result<(), StoreError> {
        self.backend.set(CURRENT_USER_KEY, username)
    }

    /// Clears the pointer only; the user's record stays where it is.
    pub fn logout(&self) -> Result<(), StoreError> {
        self.backend.remove(CURRENT_USER_KEY)
    }

    #[instrument(skip(self))]
    pub fn get_user_progress(&self, username: &str) -> ProgressRecord {
        let stored = match self.backend.get(&progress_key(username)) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read stored progress, using defaults");
                None
            }
        };

        match stored {
            Some(raw) => match serde_json::from_str::<ProgressRecord>(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Stored progress is malformed, using defaults");
                    ProgressRecord::new(self.clock.today())
                }
            },
            None => {
                debug!("No stored progress, using defaults");
                ProgressRecord::new(self.clock.today())
            }
        }
    }

    #[instrument(skip(self, record))]
    pub fn save_user_progress(
        &self,
        username: &str,
        record: &ProgressRecord,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(record)?;
        self.backend.set(&progress_key(username), &raw)?;

        // No subscribers is fine.
        let _ = self.events.send(ProgressEvent::Updated {
            username: username.to_string(),
        });
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn reset_progress(&self, username: &str) -> Result<(), StoreError> {
        info!("Resetting progress");
        self.backend.remove(&progress_key(username))?;
        let _ = self.events.send(ProgressEvent::Reset {
            username: username.to_string(),
        });
        Ok(())
    }

    /// Records a completion locally, then pushes it to the server. Repeat
    /// calls for a lesson already in the record change nothing and make no
    /// remote call. A failed push is logged and reported in the outcome.
    ///
    /// The push, retries included, is awaited before returning, so with the
    /// default sync settings this can take `max_attempts` request timeouts
    /// plus backoff. Use [`ProgressStore::mark_lesson_complete_detached`] to
    /// return as soon as the local record is saved.
    #[instrument(skip(self, topic_lesson_ids))]
    pub async fn mark_lesson_complete(
        &self,
        username: &str,
        lesson_id: &str,
        topic_id: &str,
        topic_lesson_ids: &[String],
        course_id: &str,
        time_spent_minutes: u32,
    ) -> Result<CompletionOutcome, StoreError> {
        let Some(record) = self.complete_locally(
            username,
            lesson_id,
            topic_id,
            topic_lesson_ids,
            time_spent_minutes,
        )?
        else {
            return Ok(CompletionOutcome::AlreadyCompleted);
        };

        let sync = match &self.sync {
            Some(sync) => {
                let request =
                    completion_request(lesson_id, course_id, topic_id, time_spent_minutes);
                Some(sync.push_lesson_complete(&request).await)
            }
            None => None,
        };

        Ok(CompletionOutcome::Completed { record, sync })
    }

    /// Like [`ProgressStore::mark_lesson_complete`], but the push runs on a
    /// spawned task. Must be called from within a tokio runtime. Returns
    /// `None` when the lesson was already completed.
    #[instrument(skip(self, topic_lesson_ids))]
    pub fn mark_lesson_complete_detached(
        &self,
        username: &str,
        lesson_id: &str,
        topic_id: &str,
        topic_lesson_ids: &[String],
        course_id: &str,
        time_spent_minutes: u32,
    ) -> Result<Option<DetachedCompletion>, StoreError> {
        let Some(record) = self.complete_locally(
            username,
            lesson_id,
            topic_id,
            topic_lesson_ids,
            time_spent_minutes,
        )?
        else {
            return Ok(None);
        };

        let sync = self.sync.clone().map(|sync| {
            let request = completion_request(lesson_id, course_id, topic_id, time_spent_minutes);
            tokio::spawn(async move { sync.push_lesson_complete(&request).await })
        });

        Ok(Some(DetachedCompletion { record, sync }))
    }

    /// Applies a completion to the stored record. `None` when the lesson was
    /// already in it.
    fn complete_locally(
        &self,
        username: &str,
        lesson_id: &str,
        topic_id: &str,
        topic_lesson_ids: &[String],
        time_spent_minutes: u32,
    ) -> Result<Option<ProgressRecord>, StoreError> {
        let mut record = self.get_user_progress(username);

        if !record.insert_completed(lesson_id) {
            debug!("Lesson already completed");
            return Ok(None);
        }

        let streak = StudyStreak {
            streak: record.study_streak,
            last_study_date: record.last_study_date,
        }
        .advance(self.clock.today());
        record.study_streak = streak.streak;
        record.last_study_date = streak.last_study_date;

        record.topic_progress.insert(
            topic_id.to_string(),
            aggregator::calculate_topic_progress(topic_lesson_ids, &record.completed_lessons),
        );

        if time_spent_minutes > 0 {
            record.add_time_spent(lesson_id, time_spent_minutes);
        }

        self.save_user_progress(username, &record)?;
        info!(streak = record.study_streak, "Lesson marked complete");

        Ok(Some(record))
    }

    /// Starting a lesson has no local state; it only informs the server.
    pub async fn record_lesson_start(
        &self,
        request: &StartLessonRequest,
    ) -> Option<SyncOutcome<LessonProgress>> {
        match &self.sync {
            Some(sync) => Some(sync.push_lesson_start(request).await),
            None => None,
        }
    }

    pub async fn record_exercise(
        &self,
        request: &SubmitExerciseRequest,
    ) -> Option<SyncOutcome<ExerciseResult>> {
        match &self.sync {
            Some(sync) => Some(sync.push_exercise(request).await),
            None => None,
        }
    }

    /// Keeps the latest score locally and pushes the attempt upstream, where
    /// every attempt is kept.
    #[instrument(skip(self, request), fields(lesson_id = %request.lesson_id))]
    pub async fn record_quiz(
        &self,
        username: &str,
        request: &SubmitQuizRequest,
    ) -> Result<Option<SyncOutcome<()>>, StoreError> {
        let score = request.score.round().clamp(0.0, 100.0) as u8;
        self.add_quiz_score(username, &request.lesson_id, score)?;

        Ok(match &self.sync {
            Some(sync) => Some(sync.push_quiz(request).await),
            None => None,
        })
    }

    pub fn add_quiz_score(
        &self,
        username: &str,
        lesson_id: &str,
        score: u8,
    ) -> Result<(), StoreError> {
        let mut record = self.get_user_progress(username);
        record.set_quiz_score(lesson_id, score);
        self.save_user_progress(username, &record)
    }

    pub fn add_words_learned(&self, username: &str, count: u32) -> Result<(), StoreError> {
        let mut record = self.get_user_progress(username);
        record.add_words_learned(count);
        self.save_user_progress(username, &record)
    }

    pub fn add_time_spent(
        &self,
        username: &str,
        lesson_id: &str,
        minutes: u32,
    ) -> Result<(), StoreError> {
        let mut record = self.get_user_progress(username);
        record.add_time_spent(lesson_id, minutes);
        self.save_user_progress(username, &record)
    }

    /// Replaces every topic rollup with the given topics. Topics not listed
    /// are dropped.
    pub fn update_all_topic_progress(
        &self,
        username: &str,
        topics: &[TopicLessons],
    ) -> Result<ProgressRecord, StoreError> {
        let mut record = self.get_user_progress(username);
        record.topic_progress =
            aggregator::calculate_all_topic_progress(topics, &record.completed_lessons);
        self.save_user_progress(username, &record)?;
        Ok(record)
    }

    pub fn is_lesson_completed(&self, username: &str, lesson_id: &str) -> bool {
        self.get_user_progress(username).is_lesson_completed(lesson_id)
    }

    pub fn get_topic_progress(&self, username: &str, topic_id: &str) -> TopicProgress {
        self.get_user_progress(username).topic_progress(topic_id)
    }

    pub fn completion_percentage(&self, username: &str, total_lessons: u32) -> u8 {
        let completed = self.get_user_progress(username).completed_lessons.len() as u32;
        aggregator::percentage(completed, total_lessons)
    }
}

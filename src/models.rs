use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,49}$").expect("valid id pattern"));

/// `{success, data?, error?, message?}` wrapper every endpoint responds with.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            message: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn ack(message: &str) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            message: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::NotStarted => "not_started",
            LessonStatus::InProgress => "in_progress",
            LessonStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LessonStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(LessonStatus::NotStarted),
            "in_progress" => Ok(LessonStatus::InProgress),
            "completed" => Ok(LessonStatus::Completed),
            other => Err(format!("Unknown lesson status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonProgress {
    pub id: i64,
    pub user_id: i64,
    pub lesson_id: String,
    pub course_id: String,
    pub topic_id: String,
    pub status: LessonStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub time_spent_minutes: i64,
    pub attempts: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbLessonProgress {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub lesson_id: Option<String>,
    pub course_id: Option<String>,
    pub topic_id: Option<String>,
    pub status: Option<String>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub time_spent_minutes: Option<i64>,
    pub attempts: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)
}

impl From<DbLessonProgress> for LessonProgress {
    fn from(db: DbLessonProgress) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            lesson_id: db.lesson_id.unwrap_or_default(),
            course_id: db.course_id.unwrap_or_default(),
            topic_id: db.topic_id.unwrap_or_default(),
            status: db
                .status
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(LessonStatus::NotStarted),
            started_at: db.started_at.map(to_utc),
            completed_at: db.completed_at.map(to_utc),
            time_spent_minutes: db.time_spent_minutes.unwrap_or_default(),
            attempts: db.attempts.unwrap_or_default(),
            created_at: db.created_at.map(to_utc).unwrap_or_else(Utc::now),
            updated_at: db.updated_at.map(to_utc).unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserStreak {
    pub user_id: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_activity_date: Option<NaiveDate>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbUserStreak {
    pub user_id: Option<i64>,
    pub current_streak: Option<i64>,
    pub longest_streak: Option<i64>,
    pub last_activity_date: Option<NaiveDate>,
}

impl From<DbUserStreak> for UserStreak {
    fn from(db: DbUserStreak) -> Self {
        Self {
            user_id: db.user_id.unwrap_or_default(),
            current_streak: db.current_streak.unwrap_or_default(),
            longest_streak: db.longest_streak.unwrap_or_default(),
            last_activity_date: db.last_activity_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserStats {
    pub user_id: i64,
    pub lessons_completed: i64,
    pub lessons_in_progress: i64,
    pub total_time_minutes: i64,
    pub exercises_attempted: i64,
    pub correct_answers: i64,
    pub accuracy_percentage: f64,
    pub quizzes_taken: i64,
    pub average_quiz_score: Option<f64>,
    pub current_streak: i64,
    pub longest_streak: i64,
}

#[derive(sqlx::FromRow)]
pub struct DbUserStats {
    pub lessons_completed: i64,
    pub lessons_in_progress: i64,
    pub total_time_minutes: i64,
    pub exercises_attempted: i64,
    pub correct_answers: i64,
    pub quizzes_taken: i64,
    pub average_quiz_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct DailyAnalytics {
    pub date: NaiveDate,
    pub lessons_completed: i64,
    pub exercises_attempted: i64,
    pub correct_answers: i64,
    pub quizzes_completed: i64,
    pub time_spent_minutes: i64,
}

/// One row of the admin user listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub lessons_completed: i64,
    pub study_streak: i64,
    pub avg_score: f64,
}

/// Counters added to a day's analytics row by one operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticsDelta {
    pub lessons_completed: i64,
    pub exercises_attempted: i64,
    pub correct_answers: i64,
    pub quizzes_completed: i64,
    pub time_spent_minutes: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExerciseResult {
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StartLessonRequest {
    #[validate(regex(path = *ID_PATTERN, message = "lesson_id must be a short identifier"))]
    pub lesson_id: String,
    #[validate(regex(path = *ID_PATTERN, message = "course_id must be a short identifier"))]
    pub course_id: String,
    #[validate(regex(path = *ID_PATTERN, message = "topic_id must be a short identifier"))]
    pub topic_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CompleteLessonRequest {
    #[validate(regex(path = *ID_PATTERN, message = "lesson_id must be a short identifier"))]
    pub lesson_id: String,
    #[validate(regex(path = *ID_PATTERN, message = "course_id must be a short identifier"))]
    pub course_id: String,
    #[validate(regex(path = *ID_PATTERN, message = "topic_id must be a short identifier"))]
    pub topic_id: String,
    #[validate(range(min = 0, max = 1440, message = "time_spent_minutes must be between 0 and 1440"))]
    pub time_spent_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitExerciseRequest {
    #[validate(regex(path = *ID_PATTERN, message = "exercise_id must be a short identifier"))]
    pub exercise_id: String,
    #[validate(regex(path = *ID_PATTERN, message = "lesson_id must be a short identifier"))]
    pub lesson_id: String,
    pub selected_answer: i64,
    pub correct_answer: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 86400, message = "time_taken_seconds must be between 0 and 86400"))]
    pub time_taken_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_quiz_counts"))]
pub struct SubmitQuizRequest {
    #[validate(regex(path = *ID_PATTERN, message = "lesson_id must be a short identifier"))]
    pub lesson_id: String,
    #[validate(regex(path = *ID_PATTERN, message = "course_id must be a short identifier"))]
    pub course_id: String,
    #[validate(range(min = 0.0, max = 100.0, message = "score must be between 0 and 100"))]
    pub score: f64,
    #[validate(range(min = 1, max = 1000, message = "total_questions must be between 1 and 1000"))]
    pub total_questions: i64,
    #[validate(range(min = 0, message = "correct_answers must not be negative"))]
    pub correct_answers: i64,
}

fn validate_quiz_counts(quiz: &SubmitQuizRequest) -> Result<(), validator::ValidationError> {
    if quiz.correct_answers > quiz.total_questions {
        let mut error = validator::ValidationError::new("correct_answers");
        error.message = Some("correct_answers cannot exceed total_questions".into());
        return Err(error);
    }
    Ok(())
}

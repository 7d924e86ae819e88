use crate::{
    auth::{DbUser, DbUserSession, Role, User, UserSession},
    error::AppError,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{debug, info, instrument};

use crate::models::{
    AnalyticsDelta, CompleteLessonRequest, DailyAnalytics, DbLessonProgress, DbUserStats,
    DbUserStreak, ExerciseResult, LessonProgress, StartLessonRequest, SubmitExerciseRequest,
    SubmitQuizRequest, UserStats, UserStreak, UserSummary,
};
use crate::progress::ServerStreak;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const LESSON_PROGRESS_COLUMNS: &str = "id, user_id, lesson_id, course_id, topic_id, status, \
     started_at, completed_at, time_spent_minutes, attempts, created_at, updated_at";

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), AppError> {
    info!("Running database migrations");
    MIGRATOR.run(pool).await?;
    Ok(())
}

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, is_active FROM users WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, is_active FROM users WHERE username = ?1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip(pool, password))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: &str,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let existing_user = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE username = ?1")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if existing_user.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (username, password, role, display_name) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(username)
    .bind(hashed_password)
    .bind(role)
    .bind(display_name.unwrap_or(username))
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip_all, fields(username = %username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let stored = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, password FROM users WHERE username = ?1 AND is_active = 1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    match stored {
        Some((id, hash)) => match bcrypt::verify(password, &hash) {
            Ok(true) => Ok(Some(get_user(pool, id).await?)),
            _ => Ok(None),
        },
        None => Ok(None),
    }
}

/// Every account with its completed lessons, current streak and average quiz
/// score, newest accounts first.
#[instrument(skip(pool))]
pub async fn list_users_with_stats(pool: &Pool<Sqlite>) -> Result<Vec<UserSummary>, AppError> {
    info!("Listing users with progress summary");

    let users = sqlx::query_as::<_, UserSummary>(
        "SELECT
             u.id,
             u.username,
             COALESCE(u.display_name, u.username) AS display_name,
             u.role,
             u.is_active,
             u.created_at,
             COALESCE(lp.lessons_completed, 0) AS lessons_completed,
             COALESCE(us.current_streak, 0) AS study_streak,
             COALESCE(qs.avg_score, 0.0) AS avg_score
         FROM users u
         LEFT JOIN (
             SELECT user_id, COUNT(*) AS lessons_completed
             FROM user_lesson_progress
             WHERE status = 'completed'
             GROUP BY user_id
         ) lp ON lp.user_id = u.id
         LEFT JOIN user_streaks us ON us.user_id = u.id
         LEFT JOIN (
             SELECT user_id, AVG(score) AS avg_score
             FROM user_quiz_scores
             GROUP BY user_id
         ) qs ON qs.user_id = u.id
         ORDER BY u.created_at DESC, u.id DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(users)
}

#[instrument(skip(pool))]
pub async fn update_user_role(
    pool: &Pool<Sqlite>,
    user_id: i64,
    role: Role,
) -> Result<User, AppError> {
    info!("Updating user role");

    let res = sqlx::query("UPDATE users SET role = ?2 WHERE id = ?1")
        .bind(user_id)
        .bind(role.as_str())
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            user_id
        )));
    }

    get_user(pool, user_id).await
}

/// Deactivating an account also ends all of its sessions.
#[instrument(skip(pool))]
pub async fn update_user_status(
    pool: &Pool<Sqlite>,
    user_id: i64,
    is_active: bool,
) -> Result<User, AppError> {
    info!("Updating user status");
    let mut tx = pool.begin().await?;

    let res = sqlx::query("UPDATE users SET is_active = ?2 WHERE id = ?1")
        .bind(user_id)
        .bind(is_active)
        .execute(&mut *tx)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            user_id
        )));
    }

    if !is_active {
        let ended = sqlx::query("DELETE FROM user_sessions WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        debug!(sessions = ended.rows_affected(), "Ended sessions of deactivated user");
    }

    tx.commit().await?;

    get_user(pool, user_id).await
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query(
        "INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?1, ?2, ?3)",
    )
    .bind(user_id)
    .bind(token)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?1",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?1")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?1")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

async fn fetch_lesson_progress(
    conn: &mut SqliteConnection,
    user_id: i64,
    lesson_id: &str,
) -> Result<LessonProgress, AppError> {
    let query = format!(
        "SELECT {} FROM user_lesson_progress WHERE user_id = ?1 AND lesson_id = ?2",
        LESSON_PROGRESS_COLUMNS
    );

    let row = sqlx::query_as::<_, DbLessonProgress>(&query)
        .bind(user_id)
        .bind(lesson_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(LessonProgress::from(row)),
        _ => Err(AppError::Internal(format!(
            "Progress row for lesson {} vanished mid-transaction",
            lesson_id
        ))),
    }
}

/// Makes sure the user's streak row exists. Issued first in a transaction so
/// the write lock is held before anything is read.
async fn touch_streak(conn: &mut SqliteConnection, user_id: i64) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO user_streaks (user_id, current_streak, longest_streak)
         VALUES (?1, 0, 0)
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn advance_streak(
    conn: &mut SqliteConnection,
    user_id: i64,
    now: NaiveDateTime,
) -> Result<ServerStreak, AppError> {
    let row = sqlx::query_as::<_, DbUserStreak>(
        "SELECT user_id, current_streak, longest_streak, last_activity_date
         FROM user_streaks WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    let current = row
        .map(|r| ServerStreak {
            current_streak: r.current_streak.unwrap_or_default(),
            longest_streak: r.longest_streak.unwrap_or_default(),
            last_activity_date: r.last_activity_date,
        })
        .unwrap_or_default();

    let next = current.advance(now.date());
    debug!(
        current_streak = next.current_streak,
        longest_streak = next.longest_streak,
        "Advancing streak"
    );

    sqlx::query(
        "INSERT INTO user_streaks (user_id, current_streak, longest_streak, last_activity_date, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (user_id) DO UPDATE SET
             current_streak = excluded.current_streak,
             longest_streak = excluded.longest_streak,
             last_activity_date = excluded.last_activity_date,
             updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(next.current_streak)
    .bind(next.longest_streak)
    .bind(next.last_activity_date)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(next)
}

async fn record_analytics(
    conn: &mut SqliteConnection,
    user_id: i64,
    date: NaiveDate,
    delta: AnalyticsDelta,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO learning_analytics
             (user_id, date, lessons_completed, exercises_attempted, correct_answers,
              quizzes_completed, time_spent_minutes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (user_id, date) DO UPDATE SET
             lessons_completed = lessons_completed + excluded.lessons_completed,
             exercises_attempted = exercises_attempted + excluded.exercises_attempted,
             correct_answers = correct_answers + excluded.correct_answers,
             quizzes_completed = quizzes_completed + excluded.quizzes_completed,
             time_spent_minutes = time_spent_minutes + excluded.time_spent_minutes",
    )
    .bind(user_id)
    .bind(date)
    .bind(delta.lessons_completed)
    .bind(delta.exercises_attempted)
    .bind(delta.correct_answers)
    .bind(delta.quizzes_completed)
    .bind(delta.time_spent_minutes)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Creates the row on first start; later starts bump `attempts` and put the
/// lesson back in progress, even after completion.
#[instrument(skip(pool, request), fields(lesson_id = %request.lesson_id))]
pub async fn start_lesson(
    pool: &Pool<Sqlite>,
    user_id: i64,
    request: &StartLessonRequest,
    now: NaiveDateTime,
) -> Result<LessonProgress, AppError> {
    info!("Starting lesson");
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO user_lesson_progress
             (user_id, lesson_id, course_id, topic_id, status, started_at, attempts,
              created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'in_progress', ?5, 1, ?5, ?5)
         ON CONFLICT (user_id, lesson_id) DO UPDATE SET
             status = 'in_progress',
             attempts = attempts + 1,
             started_at = COALESCE(started_at, excluded.started_at),
             updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(&request.lesson_id)
    .bind(&request.course_id)
    .bind(&request.topic_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let progress = fetch_lesson_progress(&mut tx, user_id, &request.lesson_id).await?;
    tx.commit().await?;

    Ok(progress)
}

/// Marks the lesson completed. Minutes are only added on the transition into
/// `completed`; repeating the call on a completed row only refreshes
/// `updated_at` and the streak.
#[instrument(skip(pool, request), fields(lesson_id = %request.lesson_id))]
pub async fn complete_lesson(
    pool: &Pool<Sqlite>,
    user_id: i64,
    request: &CompleteLessonRequest,
    now: NaiveDateTime,
) -> Result<LessonProgress, AppError> {
    info!("Completing lesson");
    let mut tx = pool.begin().await?;
    touch_streak(&mut tx, user_id).await?;

    let status = sqlx::query_scalar::<_, String>(
        "SELECT status FROM user_lesson_progress WHERE user_id = ?1 AND lesson_id = ?2",
    )
    .bind(user_id)
    .bind(&request.lesson_id)
    .fetch_optional(&mut *tx)
    .await?;

    let already_completed = status.as_deref() == Some("completed");

    if already_completed {
        debug!("Lesson already completed, not adding time");
        sqlx::query(
            "UPDATE user_lesson_progress SET updated_at = ?3
             WHERE user_id = ?1 AND lesson_id = ?2",
        )
        .bind(user_id)
        .bind(&request.lesson_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query(
            "INSERT INTO user_lesson_progress
                 (user_id, lesson_id, course_id, topic_id, status, started_at, completed_at,
                  time_spent_minutes, attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'completed', ?5, ?5, ?6, 1, ?5, ?5)
             ON CONFLICT (user_id, lesson_id) DO UPDATE SET
                 status = 'completed',
                 completed_at = excluded.completed_at,
                 time_spent_minutes = time_spent_minutes + excluded.time_spent_minutes,
                 started_at = COALESCE(started_at, excluded.started_at),
                 attempts = MAX(attempts, 1),
                 updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(&request.lesson_id)
        .bind(&request.course_id)
        .bind(&request.topic_id)
        .bind(now)
        .bind(request.time_spent_minutes)
        .execute(&mut *tx)
        .await?;
    }

    let delta = if already_completed {
        AnalyticsDelta::default()
    } else {
        AnalyticsDelta {
            lessons_completed: 1,
            time_spent_minutes: request.time_spent_minutes,
            ..AnalyticsDelta::default()
        }
    };
    record_analytics(&mut tx, user_id, now.date(), delta).await?;
    advance_streak(&mut tx, user_id, now).await?;

    let progress = fetch_lesson_progress(&mut tx, user_id, &request.lesson_id).await?;
    tx.commit().await?;

    Ok(progress)
}

#[instrument(skip(pool, request), fields(exercise_id = %request.exercise_id))]
pub async fn submit_exercise(
    pool: &Pool<Sqlite>,
    user_id: i64,
    request: &SubmitExerciseRequest,
    now: NaiveDateTime,
) -> Result<ExerciseResult, AppError> {
    info!("Submitting exercise attempt");
    let is_correct = request.selected_answer == request.correct_answer;
    let time_minutes = request
        .time_taken_seconds
        .map(|secs| (secs + 59) / 60)
        .unwrap_or(0);

    let mut tx = pool.begin().await?;
    touch_streak(&mut tx, user_id).await?;

    sqlx::query(
        "INSERT INTO user_exercise_attempts
             (user_id, exercise_id, lesson_id, selected_answer, is_correct,
              time_taken_seconds, attempted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(user_id)
    .bind(&request.exercise_id)
    .bind(&request.lesson_id)
    .bind(request.selected_answer)
    .bind(is_correct)
    .bind(request.time_taken_seconds)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let delta = AnalyticsDelta {
        exercises_attempted: 1,
        correct_answers: i64::from(is_correct),
        time_spent_minutes: time_minutes,
        ..AnalyticsDelta::default()
    };
    record_analytics(&mut tx, user_id, now.date(), delta).await?;
    advance_streak(&mut tx, user_id, now).await?;

    tx.commit().await?;

    Ok(ExerciseResult { is_correct })
}

/// Every submission is kept; averages are taken over all of them.
#[instrument(skip(pool, request), fields(lesson_id = %request.lesson_id))]
pub async fn submit_quiz(
    pool: &Pool<Sqlite>,
    user_id: i64,
    request: &SubmitQuizRequest,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    info!("Submitting quiz score");
    let mut tx = pool.begin().await?;
    touch_streak(&mut tx, user_id).await?;

    sqlx::query(
        "INSERT INTO user_quiz_scores
             (user_id, lesson_id, course_id, score, total_questions, correct_answers, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(user_id)
    .bind(&request.lesson_id)
    .bind(&request.course_id)
    .bind(request.score)
    .bind(request.total_questions)
    .bind(request.correct_answers)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let delta = AnalyticsDelta {
        exercises_attempted: request.total_questions,
        correct_answers: request.correct_answers,
        quizzes_completed: 1,
        ..AnalyticsDelta::default()
    };
    record_analytics(&mut tx, user_id, now.date(), delta).await?;
    advance_streak(&mut tx, user_id, now).await?;

    tx.commit().await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_user_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: Option<&str>,
) -> Result<Vec<LessonProgress>, AppError> {
    info!("Getting user lesson progress");

    let query = match course_id {
        Some(_) => format!(
            "SELECT {} FROM user_lesson_progress
             WHERE user_id = ?1 AND course_id = ?2
             ORDER BY updated_at DESC, id DESC",
            LESSON_PROGRESS_COLUMNS
        ),
        None => format!(
            "SELECT {} FROM user_lesson_progress
             WHERE user_id = ?1
             ORDER BY updated_at DESC, id DESC",
            LESSON_PROGRESS_COLUMNS
        ),
    };

    let mut rows = sqlx::query_as::<_, DbLessonProgress>(&query).bind(user_id);
    if let Some(course_id) = course_id {
        rows = rows.bind(course_id);
    }

    let rows = rows.fetch_all(pool).await?;

    Ok(rows.into_iter().map(LessonProgress::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_user_streak(pool: &Pool<Sqlite>, user_id: i64) -> Result<UserStreak, AppError> {
    info!("Getting user streak");

    let row = sqlx::query_as::<_, DbUserStreak>(
        "SELECT user_id, current_streak, longest_streak, last_activity_date
         FROM user_streaks WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(row) => UserStreak::from(row),
        None => UserStreak {
            user_id,
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
        },
    })
}

#[instrument(skip(pool))]
pub async fn get_user_stats(pool: &Pool<Sqlite>, user_id: i64) -> Result<UserStats, AppError> {
    info!("Getting user statistics");

    let stats = sqlx::query_as::<_, DbUserStats>(
        "SELECT
             (SELECT COUNT(*) FROM user_lesson_progress
              WHERE user_id = ?1 AND status = 'completed') AS lessons_completed,
             (SELECT COUNT(*) FROM user_lesson_progress
              WHERE user_id = ?1 AND status = 'in_progress') AS lessons_in_progress,
             (SELECT COALESCE(SUM(time_spent_minutes), 0) FROM user_lesson_progress
              WHERE user_id = ?1) AS total_time_minutes,
             (SELECT COUNT(*) FROM user_exercise_attempts
              WHERE user_id = ?1) AS exercises_attempted,
             (SELECT COALESCE(SUM(is_correct), 0) FROM user_exercise_attempts
              WHERE user_id = ?1) AS correct_answers,
             (SELECT COUNT(*) FROM user_quiz_scores
              WHERE user_id = ?1) AS quizzes_taken,
             (SELECT AVG(score) FROM user_quiz_scores
              WHERE user_id = ?1) AS average_quiz_score",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let streak = get_user_streak(pool, user_id).await?;

    let accuracy_percentage = if stats.exercises_attempted > 0 {
        (stats.correct_answers as f64 / stats.exercises_attempted as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    };

    Ok(UserStats {
        user_id,
        lessons_completed: stats.lessons_completed,
        lessons_in_progress: stats.lessons_in_progress,
        total_time_minutes: stats.total_time_minutes,
        exercises_attempted: stats.exercises_attempted,
        correct_answers: stats.correct_answers,
        accuracy_percentage,
        quizzes_taken: stats.quizzes_taken,
        average_quiz_score: stats.average_quiz_score,
        current_streak: streak.current_streak,
        longest_streak: streak.longest_streak,
    })
}

#[instrument(skip(pool))]
pub async fn get_daily_analytics(
    pool: &Pool<Sqlite>,
    user_id: i64,
    since: NaiveDate,
) -> Result<Vec<DailyAnalytics>, AppError> {
    info!("Getting daily analytics");

    let rows = sqlx::query_as::<_, DailyAnalytics>(
        "SELECT date, lessons_completed, exercises_attempted, correct_answers,
                quizzes_completed, time_spent_minutes
         FROM learning_analytics
         WHERE user_id = ?1 AND date >= ?2
         ORDER BY date DESC",
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

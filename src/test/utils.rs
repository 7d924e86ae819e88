pub mod test_db {
    use crate::auth::Role;
    use crate::db::{complete_lesson, create_user, run_migrations, start_lesson};
    use crate::error::AppError;
    use crate::models::{CompleteLessonRequest, StartLessonRequest};
    use chrono::NaiveDateTime;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;
    use std::time::Duration;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    pub fn init_test_tracing() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
                .with_test_writer()
                .try_init();
        });
    }

    /// A single connection that never expires, so the in-memory database
    /// lives as long as the pool.
    pub async fn memory_pool() -> Result<Pool<Sqlite>, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        run_migrations(&pool).await?;
        Ok(pool)
    }

    /// A file-backed database in WAL mode, for tests that need several
    /// connections writing at once. The pool must not outlive `dir`.
    pub async fn file_pool(
        dir: &std::path::Path,
        max_connections: u32,
    ) -> Result<Pool<Sqlite>, AppError> {
        init_test_tracing();

        let options = SqliteConnectOptions::new()
            .filename(dir.join("progress.db"))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        Ok(pool)
    }

    pub fn at(timestamp: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S")
            .expect("test timestamp should parse")
    }

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
        pub password: String,
    }

    pub struct SeededLesson {
        pub username: String,
        pub lesson_id: String,
        pub course_id: String,
        pub topic_id: String,
        pub completed_minutes: Option<i64>,
        pub at: NaiveDateTime,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        lessons: Vec<SeededLesson>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn student(self, username: &str, display_name: Option<&str>) -> Self {
            self.user_with_password(username, display_name, Role::Student, STANDARD_PASSWORD)
        }

        pub fn admin(self, username: &str, display_name: Option<&str>) -> Self {
            self.user_with_password(username, display_name, Role::Admin, STANDARD_PASSWORD)
        }

        pub fn user_with_password(
            mut self,
            username: &str,
            display_name: Option<&str>,
            role: Role,
            password: &str,
        ) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role,
                password: password.to_string(),
            });
            self
        }

        /// Seeds a started lesson, completed as well when `completed_minutes`
        /// is given.
        pub fn lesson(
            mut self,
            username: &str,
            course_id: &str,
            topic_id: &str,
            lesson_id: &str,
            completed_minutes: Option<i64>,
            at: NaiveDateTime,
        ) -> Self {
            self.lessons.push(SeededLesson {
                username: username.to_string(),
                lesson_id: lesson_id.to_string(),
                course_id: course_id.to_string(),
                topic_id: topic_id.to_string(),
                completed_minutes,
                at,
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            init_test_tracing();

            let pool = memory_pool().await?;
            let mut user_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.username,
                    &user.password,
                    user.role.as_str(),
                    user.display_name.as_deref(),
                )
                .await?;

                user_id_map.insert(user.username.clone(), user_id);
            }

            for lesson in &self.lessons {
                let Some(&user_id) = user_id_map.get(&lesson.username) else {
                    return Err(AppError::NotFound(format!(
                        "Seeded lesson for unknown user {}",
                        lesson.username
                    )));
                };

                let start = StartLessonRequest {
                    lesson_id: lesson.lesson_id.clone(),
                    course_id: lesson.course_id.clone(),
                    topic_id: lesson.topic_id.clone(),
                };
                start_lesson(&pool, user_id, &start, lesson.at).await?;

                if let Some(minutes) = lesson.completed_minutes {
                    let complete = CompleteLessonRequest {
                        lesson_id: lesson.lesson_id.clone(),
                        course_id: lesson.course_id.clone(),
                        topic_id: lesson.topic_id.clone(),
                        time_spent_minutes: minutes,
                    };
                    complete_lesson(&pool, user_id, &complete, lesson.at).await?;
                }
            }

            Ok(TestDb { pool, user_id_map })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }
    }
}

pub mod test_client {
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};
    use crate::api::LoginResponse;
    use crate::config::ServerConfig;
    use crate::init_rocket;
    use crate::models::ApiResponse;

    pub fn test_config() -> ServerConfig {
        ServerConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout_secs: 5,
            session_ttl_hours: 24,
        }
    }

    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .student("alice", Some("Alice"))
            .student("bob", Some("Bob"))
            .admin("admin_user", Some("Admin"))
            .build()
            .await
            .expect("Failed to build test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), test_config());
        let client = Client::tracked(rocket)
            .await
            .expect("valid rocket instance");
        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, username: &str) -> String {
        let response = client
            .post("/api/users/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": STANDARD_PASSWORD,
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok, "login for {} failed", username);

        let body: ApiResponse<LoginResponse> = response
            .into_json()
            .await
            .expect("login response should be JSON");
        body.data.expect("login response should carry a token").token
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }
}

pub mod mock_remote {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;

    use crate::models::{
        CompleteLessonRequest, ExerciseResult, LessonProgress, LessonStatus, StartLessonRequest,
        SubmitExerciseRequest, SubmitQuizRequest,
    };
    use crate::progress::{ProgressRemote, SyncError};

    /// Fails with the queued errors in order, then succeeds.
    #[derive(Default)]
    pub struct ScriptedRemote {
        calls: AtomicU32,
        failures: Mutex<VecDeque<SyncError>>,
    }

    impl ScriptedRemote {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_with(errors: Vec<SyncError>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures: Mutex::new(errors.into()),
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn next(&self) -> Result<(), SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failures.lock().expect("mock lock").pop_front() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    pub fn server_error(status: u16) -> SyncError {
        SyncError::Server {
            status,
            message: "upstream unavailable".to_string(),
        }
    }

    pub fn rejected(status: u16) -> SyncError {
        SyncError::Rejected {
            status,
            message: "bad request".to_string(),
        }
    }

    fn progress_row(
        lesson_id: &str,
        course_id: &str,
        topic_id: &str,
        status: LessonStatus,
    ) -> LessonProgress {
        let now = Utc::now();
        LessonProgress {
            id: 1,
            user_id: 1,
            lesson_id: lesson_id.to_string(),
            course_id: course_id.to_string(),
            topic_id: topic_id.to_string(),
            status,
            started_at: Some(now),
            completed_at: (status == LessonStatus::Completed).then_some(now),
            time_spent_minutes: 0,
            attempts: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[rocket::async_trait]
    impl ProgressRemote for ScriptedRemote {
        async fn start_lesson(
            &self,
            request: &StartLessonRequest,
        ) -> Result<LessonProgress, SyncError> {
            self.next()?;
            Ok(progress_row(
                &request.lesson_id,
                &request.course_id,
                &request.topic_id,
                LessonStatus::InProgress,
            ))
        }

        async fn complete_lesson(
            &self,
            request: &CompleteLessonRequest,
        ) -> Result<LessonProgress, SyncError> {
            self.next()?;
            Ok(progress_row(
                &request.lesson_id,
                &request.course_id,
                &request.topic_id,
                LessonStatus::Completed,
            ))
        }

        async fn submit_exercise(
            &self,
            request: &SubmitExerciseRequest,
        ) -> Result<ExerciseResult, SyncError> {
            self.next()?;
            Ok(ExerciseResult {
                is_correct: request.selected_answer == request.correct_answer,
            })
        }

        async fn submit_quiz(&self, _request: &SubmitQuizRequest) -> Result<(), SyncError> {
            self.next()
        }
    }
}

pub mod fixed_clock {
    use std::sync::Mutex;

    use chrono::NaiveDate;

    use crate::progress::Clock;

    /// A calendar that only moves when a test says so.
    pub struct FixedClock {
        date: Mutex<NaiveDate>,
    }

    impl FixedClock {
        pub fn new(date: NaiveDate) -> Self {
            Self {
                date: Mutex::new(date),
            }
        }

        pub fn set(&self, date: NaiveDate) {
            *self.date.lock().expect("clock lock") = date;
        }
    }

    impl Clock for FixedClock {
        fn today(&self) -> NaiveDate {
            *self.date.lock().expect("clock lock")
        }
    }
}

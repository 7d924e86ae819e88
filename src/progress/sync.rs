use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, instrument, warn};

use super::error::SyncError;
use crate::config::SyncConfig;
use crate::models::{
    ApiResponse, CompleteLessonRequest, ExerciseResult, LessonProgress, StartLessonRequest,
    SubmitExerciseRequest, SubmitQuizRequest,
};

/// The authoritative side of progress, as seen from a client.
#[rocket::async_trait]
pub trait ProgressRemote: Send + Sync {
    async fn start_lesson(&self, request: &StartLessonRequest)
    -> Result<LessonProgress, SyncError>;

    async fn complete_lesson(
        &self,
        request: &CompleteLessonRequest,
    ) -> Result<LessonProgress, SyncError>;

    async fn submit_exercise(
        &self,
        request: &SubmitExerciseRequest,
    ) -> Result<ExerciseResult, SyncError>;

    async fn submit_quiz(&self, request: &SubmitQuizRequest) -> Result<(), SyncError>;
}

/// Talks to the REST API with a bearer session token.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRemote {
    pub fn new(config: &SyncConfig, token: &str) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<Option<T>, SyncError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
            if status.is_server_error() {
                SyncError::Server {
                    status: status.as_u16(),
                    message: e.to_string(),
                }
            } else {
                SyncError::InvalidResponse(e.to_string())
            }
        })?;

        if status.is_success() && envelope.success {
            return Ok(envelope.data);
        }

        let message = envelope
            .error
            .unwrap_or_else(|| "request failed".to_string());
        Err(rejection(status, message))
    }

    async fn post_expecting<B, T>(&self, path: &str, body: &B) -> Result<T, SyncError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        self.post(path, body)
            .await?
            .ok_or_else(|| SyncError::InvalidResponse(format!("{} returned no data", path)))
    }
}

fn rejection(status: StatusCode, message: String) -> SyncError {
    if status.is_server_error() {
        SyncError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        SyncError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[rocket::async_trait]
impl ProgressRemote for HttpRemote {
    async fn start_lesson(
        &self,
        request: &StartLessonRequest,
    ) -> Result<LessonProgress, SyncError> {
        self.post_expecting("/progress/lesson/start", request).await
    }

    async fn complete_lesson(
        &self,
        request: &CompleteLessonRequest,
    ) -> Result<LessonProgress, SyncError> {
        self.post_expecting("/progress/lesson/complete", request)
            .await
    }

    async fn submit_exercise(
        &self,
        request: &SubmitExerciseRequest,
    ) -> Result<ExerciseResult, SyncError> {
        self.post_expecting("/progress/exercise/submit", request)
            .await
    }

    async fn submit_quiz(&self, request: &SubmitQuizRequest) -> Result<(), SyncError> {
        self.post::<_, serde_json::Value>("/progress/quiz/submit", request)
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Result of pushing one local event. Local state is kept either way.
#[derive(Debug)]
pub enum SyncOutcome<T> {
    Synced(T),
    Diverged { attempts: u32, error: SyncError },
}

impl<T> SyncOutcome<T> {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced(_))
    }
}

/// Pushes local progress events to the remote record. Failures are logged
/// and reported as [`SyncOutcome::Diverged`], never raised.
#[derive(Clone)]
pub struct SyncClient {
    remote: Arc<dyn ProgressRemote>,
    policy: RetryPolicy,
}

impl SyncClient {
    pub fn new(remote: Arc<dyn ProgressRemote>, policy: RetryPolicy) -> Self {
        Self { remote, policy }
    }

    pub fn from_config(config: &SyncConfig, token: &str) -> Result<Self, SyncError> {
        let remote = HttpRemote::new(config, token)?;
        Ok(Self::new(Arc::new(remote), RetryPolicy::from(config)))
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> SyncOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    info!(operation, attempt, "Progress synced");
                    return SyncOutcome::Synced(value);
                }
                Err(error) if error.is_transient() && attempt < self.policy.max_attempts => {
                    attempt += 1;
                    let delay = self.policy.delay_before(attempt);
                    warn!(
                        operation,
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying progress sync"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %error,
                        sync_divergence = true,
                        "Progress sync failed; keeping local state"
                    );
                    return SyncOutcome::Diverged {
                        attempts: attempt,
                        error,
                    };
                }
            }
        }
    }

    #[instrument(skip_all, fields(lesson_id = %request.lesson_id))]
    pub async fn push_lesson_start(
        &self,
        request: &StartLessonRequest,
    ) -> SyncOutcome<LessonProgress> {
        let remote = self.remote.as_ref();
        self.with_retry("lesson_start", move || remote.start_lesson(request))
            .await
    }

    #[instrument(skip_all, fields(lesson_id = %request.lesson_id))]
    pub async fn push_lesson_complete(
        &self,
        request: &CompleteLessonRequest,
    ) -> SyncOutcome<LessonProgress> {
        let remote = self.remote.as_ref();
        self.with_retry("lesson_complete", move || remote.complete_lesson(request))
            .await
    }

    #[instrument(skip_all, fields(exercise_id = %request.exercise_id))]
    pub async fn push_exercise(
        &self,
        request: &SubmitExerciseRequest,
    ) -> SyncOutcome<ExerciseResult> {
        let remote = self.remote.as_ref();
        self.with_retry("exercise_submit", move || remote.submit_exercise(request))
            .await
    }

    #[instrument(skip_all, fields(lesson_id = %request.lesson_id))]
    pub async fn push_quiz(&self, request: &SubmitQuizRequest) -> SyncOutcome<()> {
        let remote = self.remote.as_ref();
        self.with_retry("quiz_submit", move || remote.submit_quiz(request))
            .await
    }
}

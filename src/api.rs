use chrono::{Duration, NaiveDateTime, Utc};
use rocket::FromForm;
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::{self, Json};
use rocket::serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use crate::auth::{BearerToken, Permission, Role, User, UserSession};
use crate::config::ServerConfig;
use crate::db::{
    authenticate_user, complete_lesson, create_user, create_user_session, get_daily_analytics,
    get_user, get_user_progress, get_user_stats, get_user_streak, invalidate_session,
    list_users_with_stats, start_lesson, submit_exercise, submit_quiz, update_user_role,
    update_user_status,
};
use crate::error::AppError;
use crate::models::{
    ApiResponse, CompleteLessonRequest, DailyAnalytics, ExerciseResult, ID_PATTERN,
    LessonProgress, StartLessonRequest, SubmitExerciseRequest, SubmitQuizRequest, UserStats,
    UserStreak, UserSummary,
};
use crate::validation::JsonValidateExt;

pub const DEFAULT_ANALYTICS_DAYS: u32 = 7;
pub const MAX_ANALYTICS_DAYS: u32 = 365;

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "username is required"))]
    username: String,
    #[validate(length(min = 1, message = "password is required"))]
    password: String,
}

#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(regex(path = *ID_PATTERN, message = "username must be a short identifier"))]
    username: String,
    #[validate(length(min = 8, max = 128, message = "password must be 8 to 128 characters"))]
    password: String,
    #[validate(length(min = 1, max = 100, message = "display_name must be 1 to 100 characters"))]
    display_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub is_active: bool,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            role: user.role.to_string(),
            username: user.username,
            display_name: user.display_name,
            is_active: user.is_active,
        }
    }
}

#[derive(Deserialize, Validate)]
pub struct UpdateRoleRequest {
    role: Role,
}

#[derive(Deserialize, Validate)]
pub struct UpdateStatusRequest {
    is_active: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: NaiveDateTime,
    pub user: UserData,
}

#[derive(FromForm, Debug, Default)]
pub struct ProgressQuery {
    #[field(name = "courseId")]
    pub course_id: Option<String>,
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// 403 before 404 so existence of other accounts is not disclosed.
async fn authorize_progress_read(
    db: &Pool<Sqlite>,
    user: &User,
    user_id: i64,
) -> Result<(), AppError> {
    user.require_progress_access(user_id)?;
    get_user(db, user_id).await?;
    Ok(())
}

#[post("/progress/lesson/start", data = "<request>")]
pub async fn api_start_lesson(
    user: User,
    request: Result<Json<StartLessonRequest>, json::Error<'_>>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<LessonProgress> {
    user.require_permission(Permission::RecordOwnProgress)?;
    let request = request.validate_custom()?;

    let progress = start_lesson(db, user.id, &request, now()).await?;
    Ok(Json(ApiResponse::ok(progress).with_message("Lesson started")))
}

#[post("/progress/lesson/complete", data = "<request>")]
pub async fn api_complete_lesson(
    user: User,
    request: Result<Json<CompleteLessonRequest>, json::Error<'_>>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<LessonProgress> {
    user.require_permission(Permission::RecordOwnProgress)?;
    let request = request.validate_custom()?;

    let progress = complete_lesson(db, user.id, &request, now()).await?;
    Ok(Json(ApiResponse::ok(progress).with_message("Lesson completed")))
}

#[post("/progress/exercise/submit", data = "<request>")]
pub async fn api_submit_exercise(
    user: User,
    request: Result<Json<SubmitExerciseRequest>, json::Error<'_>>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<ExerciseResult> {
    user.require_permission(Permission::RecordOwnProgress)?;
    let request = request.validate_custom()?;

    let result = submit_exercise(db, user.id, &request, now()).await?;
    Ok(Json(ApiResponse::ok(result)))
}

#[post("/progress/quiz/submit", data = "<request>")]
pub async fn api_submit_quiz(
    user: User,
    request: Result<Json<SubmitQuizRequest>, json::Error<'_>>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<()> {
    user.require_permission(Permission::RecordOwnProgress)?;
    let request = request.validate_custom()?;

    submit_quiz(db, user.id, &request, now()).await?;
    Ok(Json(ApiResponse::ack("Quiz submitted")))
}

#[get("/progress/<user_id>?<query..>")]
pub async fn api_get_user_progress(
    user_id: i64,
    query: ProgressQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<LessonProgress>> {
    authorize_progress_read(db, &user, user_id).await?;

    let rows = get_user_progress(db, user_id, query.course_id.as_deref()).await?;
    Ok(Json(ApiResponse::ok(rows)))
}

#[get("/progress/<user_id>/stats")]
pub async fn api_get_user_stats(
    user_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<UserStats> {
    authorize_progress_read(db, &user, user_id).await?;

    let stats = get_user_stats(db, user_id).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

#[get("/progress/<user_id>/streak")]
pub async fn api_get_user_streak(
    user_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<UserStreak> {
    authorize_progress_read(db, &user, user_id).await?;

    let streak = get_user_streak(db, user_id).await?;
    Ok(Json(ApiResponse::ok(streak)))
}

#[get("/progress/<user_id>/analytics?<days>")]
pub async fn api_get_user_analytics(
    user_id: i64,
    days: Option<u32>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<DailyAnalytics>> {
    let days = days.unwrap_or(DEFAULT_ANALYTICS_DAYS);
    if days == 0 || days > MAX_ANALYTICS_DAYS {
        return Err(AppError::Validation(format!(
            "days must be between 1 and {}",
            MAX_ANALYTICS_DAYS
        )));
    }

    authorize_progress_read(db, &user, user_id).await?;

    let since = Utc::now().date_naive() - Duration::days(i64::from(days) - 1);
    let rows = get_daily_analytics(db, user_id, since).await?;
    Ok(Json(ApiResponse::ok(rows)))
}

#[post("/users/register", data = "<registration>")]
pub async fn api_register_user(
    registration: Result<Json<RegisterRequest>, json::Error<'_>>,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<ApiResponse<UserData>>>, AppError> {
    let registration = registration.validate_custom()?;

    let user_id = create_user(
        db,
        &registration.username,
        &registration.password,
        Role::Student.as_str(),
        registration.display_name.as_deref(),
    )
    .await?;

    let user = get_user(db, user_id).await?;
    info!(user_id, "Registered new user");

    Ok(Custom(
        Status::Created,
        Json(ApiResponse::ok(UserData::from(user)).with_message("User registered")),
    ))
}

#[post("/users/login", data = "<login>")]
pub async fn api_login(
    login: Result<Json<LoginRequest>, json::Error<'_>>,
    db: &State<Pool<Sqlite>>,
    config: &State<ServerConfig>,
) -> ApiResult<LoginResponse> {
    let login = login.validate_custom()?;

    let Some(user) = authenticate_user(db, &login.username, &login.password).await? else {
        return Err(AppError::Authentication(
            "Invalid username or password".to_string(),
        ));
    };

    let token = UserSession::generate_token();
    let expires_at = now() + Duration::hours(config.session_ttl_hours);
    create_user_session(db, user.id, &token, expires_at).await?;

    Ok(Json(ApiResponse::ok(LoginResponse {
        token,
        expires_at,
        user: UserData::from(user),
    })))
}

#[post("/users/logout")]
pub async fn api_logout(
    _user: User,
    token: BearerToken,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<()> {
    invalidate_session(db, &token.0).await?;
    Ok(Json(ApiResponse::ack("Logged out")))
}

#[get("/users")]
pub async fn api_list_users(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<UserSummary>> {
    user.require_permission(Permission::ManageUsers)?;

    let users = list_users_with_stats(db).await?;
    Ok(Json(ApiResponse::ok(users)))
}

#[patch("/users/<user_id>/role", data = "<request>")]
pub async fn api_update_user_role(
    user_id: i64,
    user: User,
    request: Result<Json<UpdateRoleRequest>, json::Error<'_>>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<UserData> {
    user.require_manage_other(user_id)?;
    let request = request.validate_custom()?;

    let updated = update_user_role(db, user_id, request.role).await?;
    info!(user_id, role = %updated.role, "Changed user role");
    Ok(Json(
        ApiResponse::ok(UserData::from(updated)).with_message("User role updated"),
    ))
}

#[patch("/users/<user_id>/status", data = "<request>")]
pub async fn api_update_user_status(
    user_id: i64,
    user: User,
    request: Result<Json<UpdateStatusRequest>, json::Error<'_>>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<UserData> {
    user.require_manage_other(user_id)?;
    let request = request.validate_custom()?;

    let updated = update_user_status(db, user_id, request.is_active).await?;
    let message = if updated.is_active {
        "User activated"
    } else {
        "User deactivated"
    };
    Ok(Json(ApiResponse::ok(UserData::from(updated)).with_message(message)))
}

#[get("/users/me")]
pub async fn api_me(user: User) -> Json<ApiResponse<UserData>> {
    Json(ApiResponse::ok(UserData::from(user)))
}

#[get("/health")]
pub fn health() -> Json<ApiResponse<()>> {
    Json(ApiResponse::ack("OK"))
}

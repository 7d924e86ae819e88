use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use sqlx::SqlitePool;

use crate::db::{get_session_by_token, get_user};
use crate::models::ApiResponse;

use super::User;

/// Raw token from an `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

fn bearer_token(request: &Request<'_>) -> Option<String> {
    request
        .headers()
        .get_one("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match bearer_token(request) {
            Some(token) => Outcome::Success(BearerToken(token)),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("user_auth_guard");
        let _guard = auth_span.enter();

        let Some(token) = bearer_token(request) else {
            tracing::debug!("No bearer token on request");
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let db = match request.rocket().state::<SqlitePool>() {
            Some(pool) => pool,
            _ => {
                tracing::error!("Database pool not found in managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        let session = match get_session_by_token(db, &token).await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = ?err, "Invalid session token");
                return Outcome::Error((Status::Unauthorized, ()));
            }
        };

        if !session.is_valid() {
            tracing::warn!(user_id = session.user_id, "Session token expired");
            return Outcome::Error((Status::Unauthorized, ()));
        }

        match get_user(db, session.user_id).await {
            Ok(user) if !user.is_active => {
                tracing::warn!(username = %user.username, "Deactivated user presented a session");
                Outcome::Error((Status::Unauthorized, ()))
            }
            Ok(user) => {
                tracing::info!(
                    username = %user.username,
                    role = %user.role.as_str(),
                    "User authenticated via bearer token"
                );
                Outcome::Success(user)
            }
            Err(err) => {
                tracing::error!(
                    user_id = %session.user_id,
                    error = ?err,
                    "Failed to fetch user for valid session"
                );
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

fn envelope(status: Status, error: &str) -> Custom<Json<ApiResponse<()>>> {
    Custom(status, Json(ApiResponse::failure(error.to_string())))
}

#[catch(400)]
pub fn bad_request(_req: &Request) -> Custom<Json<ApiResponse<()>>> {
    envelope(Status::BadRequest, "Bad request")
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<ApiResponse<()>>> {
    tracing::warn!("Unauthorized access attempt");
    envelope(Status::Unauthorized, "Authentication required")
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Custom<Json<ApiResponse<()>>> {
    tracing::warn!("Forbidden access attempt");
    envelope(
        Status::Forbidden,
        "You don't have permission to perform this action",
    )
}

#[catch(404)]
pub fn not_found_api(_req: &Request) -> Custom<Json<ApiResponse<()>>> {
    envelope(Status::NotFound, "Resource not found")
}

/// Malformed bodies are reported as 400 like any other validation failure.
#[catch(422)]
pub fn unprocessable_api(_req: &Request) -> Custom<Json<ApiResponse<()>>> {
    envelope(Status::BadRequest, "Validation failed")
}

#[catch(500)]
pub fn internal_error_api(_req: &Request) -> Custom<Json<ApiResponse<()>>> {
    tracing::error!("Unhandled internal server error");
    envelope(Status::InternalServerError, "Internal server error")
}

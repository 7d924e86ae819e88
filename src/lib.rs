#[macro_use]
extern crate rocket;

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod progress;
pub mod telemetry;
pub mod validation;
#[cfg(test)]
mod test;

use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use tracing::info;

use api::{
    api_complete_lesson, api_get_user_analytics, api_get_user_progress, api_get_user_stats,
    api_get_user_streak, api_list_users, api_login, api_logout, api_me, api_register_user,
    api_start_lesson, api_submit_exercise, api_submit_quiz, api_update_user_role,
    api_update_user_status, health,
};
use auth::{
    bad_request, forbidden_api, internal_error_api, not_found_api, unauthorized_api,
    unprocessable_api,
};
use config::ServerConfig;
use telemetry::TelemetryFairing;

pub fn init_rocket(pool: SqlitePool, config: ServerConfig) -> Rocket<Build> {
    info!("Starting learning progress service");

    rocket::build()
        .manage(pool)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_start_lesson,
                api_complete_lesson,
                api_submit_exercise,
                api_submit_quiz,
                api_get_user_progress,
                api_get_user_stats,
                api_get_user_streak,
                api_get_user_analytics,
                api_register_user,
                api_login,
                api_logout,
                api_me,
                api_list_users,
                api_update_user_role,
                api_update_user_status,
            ],
        )
        .register(
            "/",
            catchers![
                bad_request,
                unauthorized_api,
                forbidden_api,
                not_found_api,
                unprocessable_api,
                internal_error_api,
            ],
        )
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}

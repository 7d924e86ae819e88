use rocket::serde::json::{self, Json};
use tracing::instrument;
use validator::{Validate, ValidationErrors};

use crate::error::AppError;

/// Flattens field errors into one sorted, human-readable line.
pub fn describe_validation_errors(errors: &ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, field_errors)| {
            field_errors.iter().map(move |error| {
                let message = error
                    .message
                    .clone()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("invalid value ({})", error.code));
                if field == "__all__" {
                    message
                } else {
                    format!("{}: {}", field, message)
                }
            })
        })
        .collect();

    parts.sort();
    parts.join("; ")
}

pub trait JsonValidateExt<T> {
    /// Unwraps a JSON body and runs its `Validate` rules. Unparseable bodies
    /// and rule violations both become `AppError::Validation`.
    fn validate_custom(self) -> Result<T, AppError>;
}

impl<'r, T: Validate> JsonValidateExt<T> for Result<Json<T>, json::Error<'r>> {
    #[instrument(skip_all)]
    fn validate_custom(self) -> Result<T, AppError> {
        let body = match self {
            Ok(Json(body)) => body,
            Err(json::Error::Io(e)) => {
                return Err(AppError::Validation(format!("Could not read body: {}", e)));
            }
            Err(json::Error::Parse(_, e)) => {
                return Err(AppError::Validation(format!("Invalid JSON body: {}", e)));
            }
        };

        body.validate()
            .map_err(|errors| AppError::Validation(describe_validation_errors(&errors)))?;

        Ok(body)
    }
}

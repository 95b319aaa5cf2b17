use axum::extract::{rejection::JsonRejection, FromRequest};

use crate::error::AppError;

/// `Json<T>` whose rejections come back as 400 with the usual `{"error": ..}` body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

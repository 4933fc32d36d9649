//! Request body extractor with the API's error envelope.

use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use taskforge_core::error::CoreError;

use crate::error::AppError;

/// JSON body extractor whose rejections are `VALIDATION_ERROR` responses
/// instead of axum's plain-text ones.
///
/// ```ignore
/// async fn submit(ApiJson(input): ApiJson<SubmitTask>) -> AppResult<...>
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError::Core(CoreError::Validation(
                rejection.body_text(),
            ))),
        }
    }
}

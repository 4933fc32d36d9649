//! Handlers for the `/auth` resource (register, login).

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use taskforge_core::error::CoreError;
use taskforge_db::models::user::{CreateUser, UserResponse};
use taskforge_db::repositories::UserRepo;
use validator::Validate;

use crate::auth::jwt::issue_access_token;
use crate::auth::password::{
    hash_password, validate_password_strength, verify_password, MIN_PASSWORD_LENGTH,
};
use crate::error::{AppError, AppResult};
use crate::extract::ApiJson;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /auth/register`.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 64, message = "username must be 3 to 64 characters"))]
    pub username: String,
    pub password: String,
}

/// Request body for `POST /auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Successful authentication response returned by register and login.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: UserResponse,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/auth/register
///
/// Create an account and sign it in. Returns 201, or 409 if the username
/// is taken.
pub async fn register(
    State(state): State<AppState>,
    ApiJson(mut input): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    input.username = input.username.trim().to_string();
    input
        .validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;
    validate_password_strength(&input.password, MIN_PASSWORD_LENGTH)
        .map_err(CoreError::Validation)?;

    let password_hash = hash_password(&input.password)
        .map_err(|e| AppError::InternalError(format!("Password hashing error: {e}")))?;

    let user = match UserRepo::create(
        &state.pool,
        &CreateUser {
            username: input.username,
            password_hash,
        },
    )
    .await
    {
        Ok(user) => user,
        Err(e) if taskforge_db::is_unique_violation(&e) => {
            return Err(CoreError::Conflict("Username is already taken".into()).into());
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(user_id = user.id, username = %user.username, "User registered");

    let response = auth_response(&state, user.into())?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/auth/login
///
/// Authenticate with username + password. Returns an access token.
pub async fn login(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let invalid = || CoreError::Unauthorized("Invalid username or password".into());

    let user = UserRepo::find_by_username(&state.pool, input.username.trim())
        .await?
        .ok_or_else(invalid)?;

    let password_valid = verify_password(&input.password, &user.password_hash)
        .map_err(|e| AppError::InternalError(format!("Password verification error: {e}")))?;
    if !password_valid {
        tracing::info!(user_id = user.id, "Login failed");
        return Err(invalid().into());
    }

    tracing::info!(user_id = user.id, "User logged in");
    Ok(Json(auth_response(&state, user.into())?))
}

fn auth_response(state: &AppState, user: UserResponse) -> AppResult<AuthResponse> {
    let issued = issue_access_token(user.id, &user.username, &state.config.jwt)
        .map_err(|e| AppError::InternalError(format!("Token generation error: {e}")))?;

    Ok(AuthResponse {
        access_token: issued.token,
        expires_in: issued.expires_in,
        user,
    })
}

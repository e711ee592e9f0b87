use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use super::{
    dto::{AuthResponse, LoginRequest, MessageResponse, RefreshRequest, RegisterRequest},
    jwt::JwtKeys,
    password::{hash_password, verify_password, MIN_PASSWORD_LEN},
    repo::{find_credentials_by_email, insert_credentials},
};
use crate::{
    credits,
    error::{ApiError, ApiResult},
    schemas::{is_valid_email, ValidationErrors},
    state::AppState,
    users::repo_types::{NewUser, User},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn sign_response(keys: &JwtKeys, user: User) -> ApiResult<AuthResponse> {
    let pair = keys.issue_pair(user.id, &user.email).map_err(|e| {
        error!(error = %e, "jwt sign failed");
        ApiError::Internal(e)
    })?;
    Ok(AuthResponse::bearer(pair.access_token, pair.refresh_token, user))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    payload.email = normalize_email(&payload.email);

    let mut errs = ValidationErrors::new();
    if !is_valid_email(&payload.email) {
        errs.add("email", "email", "Invalid email");
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        errs.add("password", "min_length", "Password too short");
    }
    if let Err(errs) = errs.finish(()) {
        warn!(email = %payload.email, "registration rejected");
        return Err(errs.into());
    }

    let hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        ApiError::Internal(e)
    })?;

    let mut tx = state.db.begin().await?;

    // Ensure email is not taken
    if User::find_by_email(&mut tx, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let new = NewUser {
        email: payload.email.clone(),
        name: payload.name.take(),
        avatar_url: None,
    };
    let user = match User::create(&mut tx, &new).await {
        Ok(u) => u,
        Err(e) if is_unique_violation(&e) => {
            warn!(email = %payload.email, "email registered concurrently");
            return Err(ApiError::Conflict("Email already registered".into()));
        }
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err(e.into());
        }
    };
    insert_credentials(&mut tx, user.id, &hash).await?;

    if state.config.signup_credits > 0 {
        credits::services::grant(
            &mut tx,
            user.id,
            state.config.signup_credits,
            Some("Sign-up bonus".into()),
        )
        .await?;
    }
    tx.commit().await?;

    let keys = JwtKeys::from_ref(&state);
    let response = sign_response(&keys, user)?;
    info!(user_id = %response.user.id, email = %response.user.email, "user registered");
    Ok((StatusCode::CREATED, Json(response)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    payload.email = normalize_email(&payload.email);

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    let mut tx = state.db.begin().await?;
    let (user_id, hash) = match find_credentials_by_email(&mut tx, &payload.email).await? {
        Some(found) => found,
        None => {
            warn!(email = %payload.email, "login unknown email");
            return Err(ApiError::Unauthorized("Invalid credentials".into()));
        }
    };

    let ok = verify_password(&payload.password, &hash).map_err(|e| {
        error!(error = %e, "verify_password failed");
        ApiError::Internal(e)
    })?;
    if !ok {
        warn!(email = %payload.email, %user_id, "login invalid password");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    let user = User::find_by_id(&mut tx, user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".into()))?;
    tx.commit().await?;

    let keys = JwtKeys::from_ref(&state);
    let response = sign_response(&keys, user)?;
    info!(user_id = %response.user.id, "user logged in");
    Ok(Json(response))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        ApiError::Unauthorized("Invalid or expired refresh token".into())
    })?;

    let mut tx = state.db.begin().await?;
    let user = User::find_by_id(&mut tx, claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;
    tx.commit().await?;

    Ok(Json(sign_response(&keys, user)?))
}

/// Tokens are stateless; clients drop them.
pub async fn logout() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Logged out successfully",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}

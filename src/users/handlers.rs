use axum::{extract::State, routing::get, Json, Router};
use tracing::{info, instrument};

use super::repo_types::{User, UserUpdate};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    schemas::Validate,
    state::AppState,
};

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).patch(update_me))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<User>> {
    let db = state.user_db(&user);
    let mut tx = db.begin().await?;
    let me = User::find_by_id(&mut tx, user.id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    tx.commit().await?;
    Ok(Json(me))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UserUpdate>,
) -> ApiResult<Json<User>> {
    payload.validate()?;

    let db = state.user_db(&user);
    let mut tx = db.begin().await?;
    let updated = User::update(&mut tx, user.id, &payload)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    tx.commit().await?;

    info!("profile updated");
    Ok(Json(updated))
}

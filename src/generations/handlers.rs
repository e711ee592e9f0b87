use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{repo_types::Generation, services::create_generation};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    schemas::{CreateGenerationInput, Pagination},
    state::AppState,
};

const GENERATIONS_PAGE: i64 = 10;

pub fn generation_routes() -> Router<AppState> {
    Router::new()
        .route("/generation", get(list_generations).post(create))
        .route("/generation/:id", get(get_generation))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<CreateGenerationInput>, JsonRejection>,
) -> ApiResult<(StatusCode, HeaderMap, Json<Generation>)> {
    let Json(input) = payload?;
    let valid = input.validate().map_err(|errs| {
        warn!(violations = errs.fields.len(), "generation input rejected");
        ApiError::Validation(errs)
    })?;

    let generation = create_generation(&state, user.id, &valid).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/generation/{}", generation.id)) {
        headers.insert(header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(generation)))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_generation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Generation>> {
    let db = state.user_db(&user);
    let mut tx = db.begin().await?;
    let generation = Generation::find_for_user(&mut tx, id, user.id)
        .await?
        .ok_or(ApiError::NotFound("generation"))?;
    tx.commit().await?;
    Ok(Json(generation))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn list_generations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(p): Query<Pagination>,
) -> ApiResult<Json<Vec<Generation>>> {
    let (limit, offset) = p.window(GENERATIONS_PAGE);
    let db = state.user_db(&user);
    let mut tx = db.begin().await?;
    let rows = Generation::list_by_user(&mut tx, user.id, limit, offset).await?;
    tx.commit().await?;
    Ok(Json(rows))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{CreateTemplateRequest, RenderRequest, RenderResponse},
    repo_types::{NewPromptTemplate, PromptTemplate},
    services::{extract_variables, render},
};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    schemas::Validate,
    state::AppState,
};

pub fn template_routes() -> Router<AppState> {
    Router::new()
        .route("/templates", post(create_template))
        .route("/templates/:id", get(get_template))
        .route("/templates/:id/render", post(render_template))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn create_template(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateTemplateRequest>,
) -> ApiResult<(StatusCode, Json<PromptTemplate>)> {
    let variables = payload
        .variables
        .unwrap_or_else(|| extract_variables(&payload.template));
    let new = NewPromptTemplate {
        title: payload.title,
        description: payload.description,
        category: payload.category,
        template: payload.template,
        variables,
        is_public: payload.is_public,
        user_id: Some(user.id),
    };
    new.validate()?;

    let db = state.user_db(&user);
    let mut tx = db.begin().await?;
    let template = PromptTemplate::insert(&mut tx, &new).await?;
    tx.commit().await?;

    info!(template_id = %template.id, "template created");
    Ok((StatusCode::CREATED, Json(template)))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_template(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PromptTemplate>> {
    let db = state.user_db(&user);
    let mut tx = db.begin().await?;
    let template = PromptTemplate::find_visible(&mut tx, id, user.id)
        .await?
        .ok_or(ApiError::NotFound("template"))?;
    tx.commit().await?;
    Ok(Json(template))
}

/// Renders the template and counts the use. The counter is a system write,
/// so it goes through the privileged client.
#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn render_template(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RenderRequest>,
) -> ApiResult<Json<RenderResponse>> {
    let template = {
        let db = state.user_db(&user);
        let mut tx = db.begin().await?;
        let t = PromptTemplate::find_visible(&mut tx, id, user.id)
            .await?
            .ok_or(ApiError::NotFound("template"))?;
        tx.commit().await?;
        t
    };

    let prompt = render(&template.template, &payload.values)?;

    let mut tx = state.db.begin().await?;
    PromptTemplate::increment_usage(&mut tx, template.id).await?;
    tx.commit().await?;

    Ok(Json(RenderResponse { prompt }))
}

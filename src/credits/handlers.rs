use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{dto::CreditBalance, repo_types::Credit};
use crate::{auth::AuthUser, error::ApiResult, schemas::Pagination, state::AppState};

const TRANSACTIONS_PAGE: i64 = 20;

pub fn credits_routes() -> Router<AppState> {
    Router::new()
        .route("/credits/balance", get(get_balance))
        .route("/credits/transactions", get(list_transactions))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_balance(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<CreditBalance>> {
    let db = state.user_db(&user);
    let mut tx = db.begin().await?;
    let balance = Credit::balance(&mut tx, user.id).await?;
    tx.commit().await?;
    Ok(Json(CreditBalance {
        user_id: user.id,
        balance,
    }))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn list_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(p): Query<Pagination>,
) -> ApiResult<Json<Vec<Credit>>> {
    let (limit, offset) = p.window(TRANSACTIONS_PAGE);
    let db = state.user_db(&user);
    let mut tx = db.begin().await?;
    let entries = Credit::list_by_user(&mut tx, user.id, limit, offset).await?;
    tx.commit().await?;
    Ok(Json(entries))
}

use anyhow::Context;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::repo_types::{Generation, GenerationKind, NewGeneration};
use crate::{
    credits,
    error::{ApiError, ApiResult},
    provider::ProviderJob,
    schemas::{ValidGeneration, VideoSettings},
    state::AppState,
};

pub const PROVIDER_ID_KEY: &str = "provider_id";

/// Insert shape for a validated request; settings and the source image are
/// kept in metadata.
pub fn new_generation(user_id: Uuid, input: &ValidGeneration, cost: i32) -> NewGeneration {
    let mut metadata = json!({ "settings": input.settings });
    if let Some(url) = &input.image_url {
        metadata["image_url"] = Value::String(url.clone());
    }
    NewGeneration {
        user_id,
        kind: input.kind,
        prompt: input.prompt.clone(),
        metadata,
        credits_used: cost,
    }
}

/// Rebuilds the provider request from a stored job. Missing settings fall
/// back to defaults.
pub fn provider_job(g: &Generation) -> anyhow::Result<ProviderJob> {
    let meta = g.metadata.as_ref();
    let settings = match meta.and_then(|m| m.get("settings")) {
        Some(raw) => serde_json::from_value::<VideoSettings>(raw.clone())
            .with_context(|| format!("generation {} has malformed settings", g.id))?,
        None => VideoSettings::default(),
    };
    let image_url = meta
        .and_then(|m| m.get("image_url"))
        .and_then(Value::as_str)
        .map(String::from);
    Ok(ProviderJob {
        kind: g.kind,
        prompt: g.prompt.clone(),
        image_url,
        settings,
    })
}

pub fn provider_id(g: &Generation) -> Option<&str> {
    g.metadata.as_ref()?.get(PROVIDER_ID_KEY)?.as_str()
}

/// Requests the schema accepts but the provider cannot render. Checked before
/// anything is charged.
pub fn check_renderable(input: &ValidGeneration) -> ApiResult<()> {
    if input.kind == GenerationKind::ImageToVideo && input.image_url.is_none() {
        return Err(ApiError::BadRequest(
            "Image URL required for image-to-video generation".into(),
        ));
    }
    Ok(())
}

/// Inserts a pending job and charges for it in one transaction on the
/// privileged client.
pub async fn create_generation(
    state: &AppState,
    user_id: Uuid,
    input: &ValidGeneration,
) -> ApiResult<Generation> {
    check_renderable(input)?;
    let cost = state.config.generation_cost;
    let mut tx = state.db.begin().await?;
    let generation = Generation::insert(&mut tx, &new_generation(user_id, input, cost)).await?;
    credits::services::charge(
        &mut tx,
        user_id,
        cost,
        Some(format!("Generation {}", generation.id)),
    )
    .await?;
    tx.commit().await?;

    info!(generation_id = %generation.id, %user_id, kind = %generation.kind, "generation queued");
    Ok(generation)
}

use serde_json::Value;
use sqlx::PgConnection;
use tracing::warn;
use uuid::Uuid;

use super::repo_types::{Generation, GenerationStatus, GenerationUpdate, NewGeneration};

impl Generation {
    pub async fn insert(conn: &mut PgConnection, new: &NewGeneration) -> Result<Generation, sqlx::Error> {
        sqlx::query_as::<_, Generation>(
            r#"
            INSERT INTO generations (user_id, type, prompt, status, metadata, credits_used)
            VALUES ($1, $2, $3, 'pending', $4, $5)
            RETURNING id, user_id, type, prompt, status, video_url, thumbnail_url,
                      metadata, credits_used, created_at, updated_at
            "#,
        )
        .bind(new.user_id)
        .bind(new.kind)
        .bind(&new.prompt)
        .bind(&new.metadata)
        .bind(new.credits_used)
        .fetch_one(&mut *conn)
        .await
    }

    pub async fn find_for_user(
        conn: &mut PgConnection,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Generation>, sqlx::Error> {
        sqlx::query_as::<_, Generation>(
            r#"
            SELECT id, user_id, type, prompt, status, video_url, thumbnail_url,
                   metadata, credits_used, created_at, updated_at
            FROM generations
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
    }

    pub async fn list_by_user(
        conn: &mut PgConnection,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Generation>, sqlx::Error> {
        sqlx::query_as::<_, Generation>(
            r#"
            SELECT id, user_id, type, prompt, status, video_url, thumbnail_url,
                   metadata, credits_used, created_at, updated_at
            FROM generations
            WHERE user_id = $1
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await
    }

    /// Oldest first, across all users.
    pub async fn list_by_status(
        conn: &mut PgConnection,
        status: GenerationStatus,
        limit: i64,
    ) -> Result<Vec<Generation>, sqlx::Error> {
        sqlx::query_as::<_, Generation>(
            r#"
            SELECT id, user_id, type, prompt, status, video_url, thumbnail_url,
                   metadata, credits_used, created_at, updated_at
            FROM generations
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
    }

    /// Stamps and returns the processing jobs polled least recently, so every
    /// job gets its turn however large the backlog.
    pub async fn claim_for_polling(
        conn: &mut PgConnection,
        limit: i64,
    ) -> Result<Vec<Generation>, sqlx::Error> {
        sqlx::query_as::<_, Generation>(
            r#"
            UPDATE generations
               SET polled_at = now()
             WHERE id IN (
                   SELECT id
                   FROM generations
                   WHERE status = 'processing'
                   ORDER BY polled_at ASC NULLS FIRST, created_at ASC
                   LIMIT $1
                   FOR UPDATE SKIP LOCKED
             )
            RETURNING id, user_id, type, prompt, status, video_url, thumbnail_url,
                      metadata, credits_used, created_at, updated_at
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
    }

    /// Compare-and-set status change. Returns `None` when the job is no longer
    /// in `from` (another writer got there first) or the edge is not allowed.
    pub async fn transition(
        conn: &mut PgConnection,
        id: Uuid,
        from: GenerationStatus,
        to: GenerationStatus,
        update: &GenerationUpdate,
    ) -> Result<Option<Generation>, sqlx::Error> {
        if !from.can_transition_to(to) {
            warn!(%id, %from, %to, "refusing status transition");
            return Ok(None);
        }
        sqlx::query_as::<_, Generation>(
            r#"
            UPDATE generations
               SET status        = $3,
                   video_url     = COALESCE($4, video_url),
                   thumbnail_url = COALESCE($5, thumbnail_url),
                   metadata      = COALESCE(metadata, '{}'::jsonb) || COALESCE($6, '{}'::jsonb),
                   updated_at    = now()
             WHERE id = $1 AND status = $2
            RETURNING id, user_id, type, prompt, status, video_url, thumbnail_url,
                      metadata, credits_used, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(&update.video_url)
        .bind(&update.thumbnail_url)
        .bind(&update.metadata)
        .fetch_optional(&mut *conn)
        .await
    }

    /// Merges `patch` into the metadata of a job still in `status`.
    pub async fn merge_metadata(
        conn: &mut PgConnection,
        id: Uuid,
        status: GenerationStatus,
        patch: &Value,
    ) -> Result<Option<Generation>, sqlx::Error> {
        sqlx::query_as::<_, Generation>(
            r#"
            UPDATE generations
               SET metadata   = COALESCE(metadata, '{}'::jsonb) || $3,
                   updated_at = now()
             WHERE id = $1 AND status = $2
            RETURNING id, user_id, type, prompt, status, video_url, thumbnail_url,
                      metadata, credits_used, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(patch)
        .fetch_optional(&mut *conn)
        .await
    }
}

use sqlx::PgConnection;
use uuid::Uuid;

use super::repo_types::{Credit, NewCredit};

impl Credit {
    /// Appends a ledger entry. Entries are never updated or deleted.
    pub async fn insert(conn: &mut PgConnection, new: &NewCredit) -> Result<Credit, sqlx::Error> {
        sqlx::query_as::<_, Credit>(
            r#"
            INSERT INTO credits (user_id, amount, transaction_type, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, amount, transaction_type, description, created_at
            "#,
        )
        .bind(new.user_id)
        .bind(new.amount)
        .bind(new.transaction_type)
        .bind(&new.description)
        .fetch_one(&mut *conn)
        .await
    }

    pub async fn balance(conn: &mut PgConnection, user_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM credits
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await
    }

    pub async fn list_by_user(
        conn: &mut PgConnection,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Credit>, sqlx::Error> {
        sqlx::query_as::<_, Credit>(
            r#"
            SELECT id, user_id, amount, transaction_type, description, created_at
            FROM credits
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
}

/// Row-locks the user for the rest of the transaction so concurrent charges
/// against one balance are serialized. False when the user does not exist.
pub async fn lock_user(conn: &mut PgConnection, user_id: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

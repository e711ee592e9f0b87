use sqlx::PgConnection;
use uuid::Uuid;

use super::repo_types::{NewUser, User, UserUpdate};

impl User {
    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, avatar_url, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
    }

    pub async fn find_by_email(
        conn: &mut PgConnection,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, avatar_url, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *conn)
        .await
    }

    pub async fn create(conn: &mut PgConnection, new: &NewUser) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, avatar_url)
            VALUES ($1, $2, $3)
            RETURNING id, email, name, avatar_url, created_at, updated_at
            "#,
        )
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.avatar_url)
        .fetch_one(&mut *conn)
        .await
    }

    /// Applies the present fields of `update` and bumps `updated_at`.
    pub async fn update(
        conn: &mut PgConnection,
        id: Uuid,
        update: &UserUpdate,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET name       = COALESCE($2, name),
                   avatar_url = COALESCE($3, avatar_url),
                   updated_at = now()
             WHERE id = $1
            RETURNING id, email, name, avatar_url, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.avatar_url)
        .fetch_optional(&mut *conn)
        .await
    }
}

use sqlx::PgConnection;
use uuid::Uuid;

use super::repo_types::{NewPromptTemplate, PromptTemplate};

impl PromptTemplate {
    pub async fn insert(
        conn: &mut PgConnection,
        new: &NewPromptTemplate,
    ) -> Result<PromptTemplate, sqlx::Error> {
        sqlx::query_as::<_, PromptTemplate>(
            r#"
            INSERT INTO prompt_templates
                (title, description, category, template, variables, is_public, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, title, description, category, template, variables,
                      is_public, user_id, usage_count, created_at
            "#,
        )
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.category)
        .bind(&new.template)
        .bind(&new.variables)
        .bind(new.is_public)
        .bind(new.user_id)
        .fetch_one(&mut *conn)
        .await
    }

    /// A template the user may see: public ones and their own.
    pub async fn find_visible(
        conn: &mut PgConnection,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PromptTemplate>, sqlx::Error> {
        sqlx::query_as::<_, PromptTemplate>(
            r#"
            SELECT id, title, description, category, template, variables,
                   is_public, user_id, usage_count, created_at
            FROM prompt_templates
            WHERE id = $1 AND (is_public OR user_id = $2)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
    }

    pub async fn increment_usage(conn: &mut PgConnection, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE prompt_templates SET usage_count = usage_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

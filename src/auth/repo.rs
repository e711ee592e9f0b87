use sqlx::PgConnection;
use uuid::Uuid;

/// Stores the password hash for a freshly created user.
pub async fn insert_credentials(
    conn: &mut PgConnection,
    user_id: Uuid,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO user_credentials (user_id, password_hash) VALUES ($1, $2)")
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// User id and password hash for an email, if registered.
pub async fn find_credentials_by_email(
    conn: &mut PgConnection,
    email: &str,
) -> Result<Option<(Uuid, String)>, sqlx::Error> {
    sqlx::query_as::<_, (Uuid, String)>(
        r#"
        SELECT u.id, c.password_hash
          FROM users u
          JOIN user_credentials c ON c.user_id = u.id
         WHERE u.email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(&mut *conn)
    .await
}

//! Data access to the hosted database.

mod client;

pub use client::{
    create_client, create_server_client, ClientOptions, DbClient, Session, TokenRefresher,
};

/// Applies pending migrations through the privileged handle.
pub async fn migrate(db: &DbClient) -> anyhow::Result<()> {
    use anyhow::Context;

    sqlx::migrate!("./migrations")
        .run(db.pool())
        .await
        .context("failed to run database migrations")
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("invalid database configuration: {0}")]
    Config(String),
    #[error("session expired")]
    SessionExpired,
    #[error("session refresh failed: {0}")]
    Refresh(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;

    #[tokio::test]
    async fn unreachable_database_fails_migration() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(2))
            .connect_lazy("postgres://wan@127.0.0.1:1/wan")
            .unwrap();
        let db = DbClient::from_pool(pool, ClientOptions::privileged());
        let err = migrate(&db).await.unwrap_err();
        assert!(err.to_string().contains("migrations"));
    }
}

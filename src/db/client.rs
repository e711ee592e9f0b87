use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool, Postgres, Transaction,
};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::DbError;

/// Seconds before expiry at which a refreshable session is renewed early.
const REFRESH_LEEWAY_SECS: i64 = 30;

/// Behaviour switches of a [`DbClient`].
///
/// The session-scoped and privileged handles differ only in these two flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Refresh an expired session through its refresh token before use.
    pub auto_refresh_token: bool,
    /// Keep a session attached to the handle once set.
    pub persist_session: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
        }
    }
}

impl ClientOptions {
    pub const fn privileged() -> Self {
        Self {
            auto_refresh_token: false,
            persist_session: false,
        }
    }

    /// Database role for transactions opened without a user session. A
    /// handle that cannot hold a session only ever acts for the system.
    pub const fn base_role(&self) -> &'static str {
        if self.persist_session {
            "anon"
        } else {
            "service_role"
        }
    }
}

/// The end-user identity a session-scoped handle acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: OffsetDateTime,
}

impl Session {
    /// A session that can be refreshed counts as expired slightly early so
    /// it is renewed before the token lapses. One bound to a bare access
    /// token expires exactly when the token does.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        let leeway = if self.refresh_token.is_some() {
            Duration::seconds(REFRESH_LEEWAY_SECS)
        } else {
            Duration::ZERO
        };
        self.expires_at <= now + leeway
    }
}

/// Role and `request.jwt.claim.sub` a transaction runs with.
fn transaction_identity(
    options: ClientOptions,
    session: Option<&Session>,
) -> (&'static str, Option<String>) {
    match session {
        Some(s) => ("authenticated", Some(s.user_id.to_string())),
        None => (options.base_role(), None),
    }
}

/// Exchanges a refresh token for a new session.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<Session>;
}

/// Handle to the hosted database.
///
/// Clones share the pool and the session slot. Transactions opened while a
/// session is attached run as the `authenticated` role with the session's
/// user id in `request.jwt.claim.sub`, so row-level security applies. Without
/// a session they run as `anon`, or as `service_role` on a privileged handle.
#[derive(Clone)]
pub struct DbClient {
    pool: PgPool,
    options: ClientOptions,
    session: Arc<RwLock<Option<Session>>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl std::fmt::Debug for DbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbClient")
            .field("options", &self.options)
            .field("refresher", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}

impl DbClient {
    /// Builds a handle without touching the network. `key` is the credential
    /// of the database role named in `url` and replaces any password there.
    pub fn connect(url: &str, key: &str, options: ClientOptions) -> Result<Self, DbError> {
        let connect = PgConnectOptions::from_str(url)
            .map_err(|e| DbError::Config(e.to_string()))?
            .password(key);
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_lazy_with(connect);
        Ok(Self::from_pool(pool, options))
    }

    pub fn from_pool(pool: PgPool, options: ClientOptions) -> Self {
        Self {
            pool,
            options,
            session: Arc::new(RwLock::new(None)),
            refresher: None,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn options(&self) -> ClientOptions {
        self.options
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A new handle on the same pool with its own session slot holding
    /// `session`. Handles that do not persist sessions come back without one.
    pub fn with_session(&self, session: Session) -> Self {
        let slot = if self.options.persist_session {
            Some(session)
        } else {
            debug!("session discarded by non-persisting client");
            None
        };
        Self {
            pool: self.pool.clone(),
            options: self.options,
            session: Arc::new(RwLock::new(slot)),
            refresher: self.refresher.clone(),
        }
    }

    /// Attaches `session` to this handle. Returns false when the handle does
    /// not persist sessions.
    pub async fn set_session(&self, session: Session) -> bool {
        if !self.options.persist_session {
            warn!(user_id = %session.user_id, "set_session ignored: client does not persist sessions");
            return false;
        }
        *self.session.write().await = Some(session);
        true
    }

    pub async fn clear_session(&self) {
        *self.session.write().await = None;
    }

    /// The attached session, refreshed first when it has expired and the
    /// handle is allowed to.
    pub async fn session(&self) -> Result<Option<Session>, DbError> {
        let current = self.session.read().await.clone();
        let Some(session) = current else {
            return Ok(None);
        };
        if !session.is_expired(OffsetDateTime::now_utc()) {
            return Ok(Some(session));
        }
        if !self.options.auto_refresh_token {
            return Err(DbError::SessionExpired);
        }
        let (Some(refresher), Some(token)) = (&self.refresher, session.refresh_token.as_deref())
        else {
            return Err(DbError::SessionExpired);
        };

        let fresh = refresher
            .refresh(token)
            .await
            .map_err(|e| DbError::Refresh(e.to_string()))?;
        debug!(user_id = %fresh.user_id, "session refreshed");
        *self.session.write().await = Some(fresh.clone());
        Ok(Some(fresh))
    }

    /// Opens a transaction under this handle's role: `authenticated` with
    /// the session's user id when a session is attached, otherwise the base
    /// role of its options. The login role must be a member of both.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, DbError> {
        let session = self.session().await?;
        let (role, sub) = transaction_identity(self.options, session.as_ref());
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "SELECT set_config('role', $1, true), \
                    set_config('request.jwt.claim.sub', $2, true)",
        )
        .bind(role)
        .bind(sub.unwrap_or_default())
        .execute(&mut *tx)
        .await?;
        Ok(tx)
    }
}

/// Session-scoped handle for acting on behalf of a signed-in user.
pub fn create_client(url: &str, anon_key: &str) -> Result<DbClient, DbError> {
    DbClient::connect(url, anon_key, ClientOptions::default())
}

/// Privileged handle for system writes; never holds or refreshes a session.
pub fn create_server_client(url: &str, service_key: &str) -> Result<DbClient, DbError> {
    DbClient::connect(url, service_key, ClientOptions::privileged())
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "postgres://authenticator@localhost:5432/postgres";

    struct FixedRefresher(Session);

    #[async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh(&self, refresh_token: &str) -> anyhow::Result<Session> {
            anyhow::ensure!(refresh_token == "r1", "unknown refresh token");
            Ok(self.0.clone())
        }
    }

    fn session(expires_in: i64, refresh: Option<&str>) -> Session {
        Session {
            user_id: Uuid::new_v4(),
            access_token: "a".into(),
            refresh_token: refresh.map(Into::into),
            expires_at: OffsetDateTime::now_utc() + Duration::seconds(expires_in),
        }
    }

    #[tokio::test]
    async fn factories_differ_only_in_options() {
        let user = create_client(URL, "anon").unwrap();
        let server = create_server_client(URL, "service").unwrap();
        assert_eq!(user.options(), ClientOptions::default());
        assert_eq!(
            server.options(),
            ClientOptions {
                auto_refresh_token: false,
                persist_session: false
            }
        );
    }

    #[test]
    fn rejects_malformed_url() {
        let err = DbClient::connect("not a url", "k", ClientOptions::default()).unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[tokio::test]
    async fn privileged_client_never_keeps_a_session() {
        let server = create_server_client(URL, "service").unwrap();
        assert!(!server.set_session(session(3600, None)).await);
        assert_eq!(server.session().await.unwrap(), None);
        let scoped = server.with_session(session(3600, None));
        assert_eq!(scoped.session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn with_session_does_not_leak_into_parent() {
        let base = create_client(URL, "anon").unwrap();
        let s = session(3600, None);
        let scoped = base.with_session(s.clone());
        assert_eq!(scoped.session().await.unwrap(), Some(s));
        assert_eq!(base.session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_session_is_refreshed_when_allowed() {
        let fresh = session(3600, Some("r2"));
        let client = create_client(URL, "anon")
            .unwrap()
            .with_refresher(Arc::new(FixedRefresher(fresh.clone())));
        assert!(client.set_session(session(-10, Some("r1"))).await);
        assert_eq!(client.session().await.unwrap(), Some(fresh.clone()));
        // stored for the next call
        assert_eq!(client.session().await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn expired_session_errors_without_auto_refresh() {
        let opts = ClientOptions {
            auto_refresh_token: false,
            persist_session: true,
        };
        let client = DbClient::connect(URL, "anon", opts)
            .unwrap()
            .with_refresher(Arc::new(FixedRefresher(session(3600, None))));
        client.set_session(session(-10, Some("r1"))).await;
        assert!(matches!(client.session().await, Err(DbError::SessionExpired)));
    }

    #[tokio::test]
    async fn expired_session_without_refresh_token_errors() {
        let client = create_client(URL, "anon")
            .unwrap()
            .with_refresher(Arc::new(FixedRefresher(session(3600, None))));
        client.set_session(session(-10, None)).await;
        assert!(matches!(client.session().await, Err(DbError::SessionExpired)));
    }

    #[tokio::test]
    async fn failed_refresh_is_reported() {
        let client = create_client(URL, "anon")
            .unwrap()
            .with_refresher(Arc::new(FixedRefresher(session(3600, None))));
        client.set_session(session(-10, Some("stale"))).await;
        assert!(matches!(client.session().await, Err(DbError::Refresh(_))));
    }

    #[test]
    fn refreshable_sessions_expire_early() {
        let now = OffsetDateTime::now_utc();
        assert!(session(5, Some("r1")).is_expired(now));
        assert!(!session(600, Some("r1")).is_expired(now));
    }

    #[test]
    fn bare_access_sessions_last_until_the_token_does() {
        let now = OffsetDateTime::now_utc();
        assert!(!session(20, None).is_expired(now));
        assert!(session(0, None).is_expired(now));
        assert!(session(-1, None).is_expired(now));
    }

    #[tokio::test]
    async fn near_expiry_request_session_is_still_usable() {
        let client = create_client(URL, "anon").unwrap();
        let s = session(20, None);
        let scoped = client.with_session(s.clone());
        assert_eq!(scoped.session().await.unwrap(), Some(s));
    }

    #[test]
    fn transactions_assume_the_right_role() {
        let s = session(600, None);
        assert_eq!(
            transaction_identity(ClientOptions::default(), Some(&s)),
            ("authenticated", Some(s.user_id.to_string()))
        );
        assert_eq!(
            transaction_identity(ClientOptions::default(), None),
            ("anon", None)
        );
        assert_eq!(
            transaction_identity(ClientOptions::privileged(), None),
            ("service_role", None)
        );
    }
}

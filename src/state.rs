use std::sync::Arc;

use crate::{
    auth::{AuthUser, JwtKeys},
    config::AppConfig,
    db::{create_client, create_server_client, DbClient},
    provider::{ReplicateClient, VideoProvider},
    rate_limit::IpRateLimiter,
};

#[derive(Clone)]
pub struct AppState {
    /// Privileged handle for system writes; bypasses row-level security.
    pub db: DbClient,
    /// Session-scoped template; bind it per request with [`AppState::user_db`].
    pub user_db: DbClient,
    pub config: Arc<AppConfig>,
    pub provider: Arc<dyn VideoProvider>,
    pub limiter: Arc<IpRateLimiter>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = create_server_client(
            &config.database.service_url,
            &config.database.service_key,
        )?;
        let user_db = create_client(&config.database.url, &config.database.anon_key)?
            .with_refresher(Arc::new(JwtKeys::new(&config.jwt)));

        let provider = Arc::new(ReplicateClient::new(&config.provider)?) as Arc<dyn VideoProvider>;
        let limiter = Arc::new(IpRateLimiter::new(&config.rate_limit));

        Ok(Self {
            db,
            user_db,
            config,
            provider,
            limiter,
        })
    }

    /// A handle acting as `user` for the rest of the request.
    pub fn user_db(&self, user: &AuthUser) -> DbClient {
        self.user_db.with_session(user.session.clone())
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::{
            config::{
                DatabaseConfig, JwtConfig, ProviderConfig, RateLimitConfig, WorkerConfig,
            },
            provider::{ProviderJob, ProviderStatus},
        };
        use async_trait::async_trait;

        struct FakeProvider;
        #[async_trait]
        impl VideoProvider for FakeProvider {
            async fn submit(&self, _job: &ProviderJob) -> anyhow::Result<String> {
                Ok("fake-prediction".into())
            }
            async fn poll(&self, _id: &str) -> anyhow::Result<ProviderStatus> {
                Ok(ProviderStatus::Running)
            }
        }

        let url = "postgres://postgres@localhost:5432/postgres";
        let config = Arc::new(AppConfig {
            database: DatabaseConfig {
                url: url.into(),
                service_url: url.into(),
                anon_key: "anon".into(),
                service_key: "service".into(),
            },
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            provider: ProviderConfig {
                api_key: "fake".into(),
                base_url: "http://fake.local".into(),
                model_version: "fake".into(),
            },
            rate_limit: RateLimitConfig {
                max_requests: 100,
                window_secs: 900,
            },
            worker: WorkerConfig {
                poll_secs: 5,
                batch_size: 10,
            },
            cors_origins: vec!["http://localhost:3000".into()],
            generation_cost: 10,
            signup_credits: 100,
        });

        let db = create_server_client(url, "service").expect("lazy pool ok");
        let user_db = create_client(url, "anon")
            .expect("lazy pool ok")
            .with_refresher(Arc::new(JwtKeys::new(&config.jwt)));
        let limiter = Arc::new(IpRateLimiter::new(&config.rate_limit));

        Self {
            db,
            user_db,
            config,
            provider: Arc::new(FakeProvider),
            limiter,
        }
    }
}

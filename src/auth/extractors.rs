use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::{db::Session, error::ApiError};

/// Extracts and validates the bearer access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    /// The request's identity, for binding a session-scoped client.
    pub session: Session,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);

        // Read Authorization header
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?;

        // Expect "Bearer <token>"
        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization header".into()))?;

        let claims = keys.verify_access(token).map_err(|e| {
            warn!(error = %e, "rejected bearer token");
            ApiError::Unauthorized("Invalid or expired token".into())
        })?;

        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp as i64)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;

        Ok(AuthUser {
            id: claims.sub,
            email: claims.email,
            session: Session {
                user_id: claims.sub,
                access_token: token.to_string(),
                refresh_token: None,
                expires_at,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::JwtConfig, db::create_client};
    use axum::http::{header::AUTHORIZATION, Request};
    use std::time::Duration;

    fn keys(access_ttl: Duration) -> JwtKeys {
        let mut keys = JwtKeys::new(&JwtConfig {
            secret: "dev-secret".into(),
            issuer: "iss".into(),
            audience: "aud".into(),
            ttl_minutes: 5,
            refresh_ttl_minutes: 60,
        });
        keys.access_ttl = access_ttl;
        keys
    }

    async fn extract(keys: &JwtKeys, header: &str) -> Result<AuthUser, ApiError> {
        let (mut parts, _) = Request::builder()
            .header(AUTHORIZATION, header)
            .body(())
            .unwrap()
            .into_parts();
        AuthUser::from_request_parts(&mut parts, keys).await
    }

    #[tokio::test]
    async fn accepted_token_near_expiry_gives_a_usable_session() {
        let keys = keys(Duration::from_secs(20));
        let user_id = Uuid::new_v4();
        let token = keys.sign_access(user_id, "a@b.co").unwrap();

        let user = extract(&keys, &format!("Bearer {token}")).await.unwrap();
        assert_eq!(user.id, user_id);

        let db = create_client("postgres://authenticator@localhost:5432/postgres", "anon")
            .unwrap()
            .with_session(user.session.clone());
        assert_eq!(db.session().await.unwrap(), Some(user.session));
    }

    #[tokio::test]
    async fn lowercase_scheme_is_accepted_and_others_are_not() {
        let keys = keys(Duration::from_secs(300));
        let token = keys.sign_access(Uuid::new_v4(), "a@b.co").unwrap();
        assert!(extract(&keys, &format!("bearer {token}")).await.is_ok());
        assert!(matches!(
            extract(&keys, &format!("Token {token}")).await,
            Err(ApiError::Unauthorized(_))
        ));
    }
}

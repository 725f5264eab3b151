//! Bearer-token identities.
//!
//! Users are provisioned with the `create-user` binary, which prints a
//! token once. Only the SHA-256 digest of the token is stored.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::server::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user and return it along with its freshly issued token
    pub async fn create(&self, username: &str, is_admin: bool) -> Result<(User, String)> {
        let token = uuid::Uuid::new_v4().simple().to_string();

        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (username, is_admin, token_hash, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(username)
        .bind(is_admin)
        .bind(hash_token(&token))
        .bind(chrono::Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await;

        let id = match result {
            Ok(id) => id,
            Err(e) => {
                if e.to_string().contains("UNIQUE constraint failed") {
                    anyhow::bail!("A user named '{}' already exists", username)
                }
                return Err(e).context("Failed to insert user");
            }
        };

        tracing::info!("Created user {} ({}), admin={}", username, id, is_admin);

        Ok((
            User {
                id,
                username: username.to_string(),
                is_admin,
            },
            token,
        ))
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, (i64, String, bool)>(
            "SELECT id, username, is_admin FROM users WHERE token_hash = ?",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up token")?;

        Ok(row.map(|(id, username, is_admin)| User {
            id,
            username,
            is_admin,
        }))
    }
}

fn extract_bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Any authenticated caller. Use `Option<CurrentUser>` for routes open to
/// anonymous callers.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// An authenticated caller with the admin flag set
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = extract_bearer_token(parts).ok_or(AppError::Unauthorized)?;
        let user = state
            .users
            .find_by_token(token)
            .await?
            .ok_or(AppError::Unauthorized)?;
        tracing::debug!("Authenticated {} ({})", user.username, user.id);
        Ok(CurrentUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            tracing::warn!("User {} attempted an admin operation", user.username);
            return Err(AppError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder();
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(
            extract_bearer_token(&parts_with(Some("Bearer abc123"))),
            Some("abc123")
        );
        assert_eq!(extract_bearer_token(&parts_with(None)), None);
        assert_eq!(extract_bearer_token(&parts_with(Some("Basic dXNlcg=="))), None);
        assert_eq!(extract_bearer_token(&parts_with(Some("Bearer "))), None);
    }

    #[test]
    fn test_hash_token_is_stable_hex() {
        let hash = hash_token("secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("secret"));
        assert_ne!(hash, hash_token("Secret"));
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect(&dir.path().join("catalog.db")).await.unwrap();
        let users = UserStore::new(pool);

        let (admin, token) = users.create("root", true).await.unwrap();
        assert!(admin.is_admin);
        assert_eq!(users.find_by_token(&token).await.unwrap(), Some(admin));
        assert_eq!(users.find_by_token("nope").await.unwrap(), None);

        let err = users.create("root", false).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}

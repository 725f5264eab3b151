//! Per-user reactions (favorites, dislikes) and reviews attached to tracks.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::catalog::{TRACK_COLUMNS, Track, TrackRow, tracks_from_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Favorite,
    Dislike,
}

impl Reaction {
    fn table(&self) -> &'static str {
        match self {
            Reaction::Favorite => "favorites",
            Reaction::Dislike => "dislikes",
        }
    }

    /// A track can't be both favorited and disliked by the same user
    pub fn opposite(&self) -> Reaction {
        match self {
            Reaction::Favorite => Reaction::Dislike,
            Reaction::Dislike => Reaction::Favorite,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackCounts {
    pub favorites: i64,
    pub dislikes: i64,
    pub reviews: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub track_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviewCreate {
    pub content: String,
}

#[derive(Clone)]
pub struct InteractionStore {
    pool: SqlitePool,
}

impl InteractionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn counts(&self, track_id: i64) -> Result<TrackCounts> {
        let (favorites, dislikes, reviews): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM favorites WHERE track_id = ?),
                (SELECT COUNT(*) FROM dislikes WHERE track_id = ?),
                (SELECT COUNT(*) FROM reviews WHERE track_id = ?)
            "#,
        )
        .bind(track_id)
        .bind(track_id)
        .bind(track_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count track interactions")?;

        Ok(TrackCounts {
            favorites,
            dislikes,
            reviews,
        })
    }

    /// `(is_favorited, is_disliked)` for one user and track
    pub async fn flags(&self, user_id: i64, track_id: i64) -> Result<(bool, bool)> {
        let favorited = self.has(Reaction::Favorite, user_id, track_id).await?;
        let disliked = self.has(Reaction::Dislike, user_id, track_id).await?;
        Ok((favorited, disliked))
    }

    pub async fn has(&self, reaction: Reaction, user_id: i64, track_id: i64) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE user_id = ? AND track_id = ?)",
            reaction.table()
        ))
        .bind(user_id)
        .bind(track_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to check {}", reaction.table()))?;

        Ok(exists != 0)
    }

    /// Add a reaction, dropping the opposite one. Adding twice is a no-op.
    pub async fn add(&self, reaction: Reaction, user_id: i64, track_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "DELETE FROM {} WHERE user_id = ? AND track_id = ?",
            reaction.opposite().table()
        ))
        .bind(user_id)
        .bind(track_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to clear {}", reaction.opposite().table()))?;

        sqlx::query(&format!(
            "INSERT OR IGNORE INTO {} (user_id, track_id, created_at) VALUES (?, ?, ?)",
            reaction.table()
        ))
        .bind(user_id)
        .bind(track_id)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert into {}", reaction.table()))?;

        tx.commit().await?;
        Ok(())
    }

    /// Returns false if there was nothing to remove
    pub async fn remove(&self, reaction: Reaction, user_id: i64, track_id: i64) -> Result<bool> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE user_id = ? AND track_id = ?",
            reaction.table()
        ))
        .bind(user_id)
        .bind(track_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to delete from {}", reaction.table()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Tracks the user reacted to, most recent first
    pub async fn tracks(&self, reaction: Reaction, user_id: i64) -> Result<Vec<Track>> {
        let table = reaction.table();
        let rows: Vec<TrackRow> = sqlx::query_as(&format!(
            r#"
            SELECT {columns}
            FROM {table} r
            JOIN tracks ON tracks.id = r.track_id
            WHERE r.user_id = ?
            ORDER BY r.created_at DESC, r.id DESC
            "#,
            columns = TRACK_COLUMNS,
            table = table,
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch {}", table))?;

        tracks_from_rows(rows)
    }

    pub async fn reviews(&self, track_id: i64) -> Result<Vec<Review>> {
        let rows = sqlx::query_as::<_, (i64, i64, i64, String, String, String)>(
            r#"
            SELECT r.id, r.track_id, r.user_id, u.username, r.content, r.created_at
            FROM reviews r
            JOIN users u ON u.id = r.user_id
            WHERE r.track_id = ?
            ORDER BY r.id
            "#,
        )
        .bind(track_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch reviews")?;

        Ok(rows
            .into_iter()
            .map(
                |(id, track_id, user_id, username, content, created_at)| Review {
                    id,
                    track_id,
                    user_id,
                    username,
                    content,
                    created_at,
                },
            )
            .collect())
    }

    pub async fn add_review(
        &self,
        user_id: i64,
        username: &str,
        track_id: i64,
        content: &str,
    ) -> Result<Review> {
        let now = chrono::Utc::now().to_rfc3339();
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO reviews (user_id, track_id, content, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(track_id)
        .bind(content)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert review")?;

        Ok(Review {
            id,
            track_id,
            user_id,
            username: username.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }
}

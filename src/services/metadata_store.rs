//! Relational persistence for users, images and the links between them.
//!
//! The SQLite implementation keeps one transaction per logical write: an
//! image row is never visible without its link row, and deleting a user
//! removes its links and the images nobody else references in the same unit.

use crate::models::{
    image::{Image, UserImage},
    user::{CreateUser, User},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("user `{0}` not found")]
    UserNotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    /// Insert a user. The identifier is assigned here.
    async fn create_user(&self, new_user: &CreateUser) -> MetadataResult<User>;

    async fn get_user(&self, user_id: &str) -> MetadataResult<User>;

    /// Delete a user together with its links and the images left without
    /// any owner. Returns the object keys of the removed images.
    async fn delete_user(&self, user_id: &str) -> MetadataResult<Vec<String>>;

    /// Insert the image row and its link to `user_id` atomically.
    async fn create_image_and_association(
        &self,
        user_id: &str,
        image: &Image,
        object_key: &str,
    ) -> MetadataResult<UserImage>;

    /// All images linked to `user_id`, in link insertion order.
    async fn list_images_for_user(&self, user_id: &str) -> MetadataResult<Vec<Image>>;

    async fn ping(&self) -> MetadataResult<()>;
}

#[derive(Clone)]
pub struct SqliteMetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create_user(&self, new_user: &CreateUser) -> MetadataResult<User> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, name, email, created_at) VALUES (?, ?, ?, ?)
             RETURNING id, name, email",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> MetadataResult<User> {
        sqlx::query_as::<_, User>("SELECT id, name, email FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| MetadataError::UserNotFound(user_id.to_string()))
    }

    async fn delete_user(&self, user_id: &str) -> MetadataResult<Vec<String>> {
        let mut tx = self.db.begin().await?;

        let orphaned: Vec<(String, String)> = sqlx::query_as(
            "SELECT i.id, i.object_key
             FROM images i
             JOIN users_images ui ON ui.image_id = i.id
             WHERE ui.user_id = ?
               AND NOT EXISTS (
                   SELECT 1 FROM users_images other
                   WHERE other.image_id = i.id AND other.user_id <> ?
               )",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM users_images WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for (image_id, _) in &orphaned {
            sqlx::query("DELETE FROM images WHERE id = ?")
                .bind(image_id)
                .execute(&mut *tx)
                .await?;
        }

        let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            // dropping the transaction rolls back the link/image deletes
            return Err(MetadataError::UserNotFound(user_id.to_string()));
        }

        tx.commit().await?;
        debug!(
            "deleted user {} and {} orphaned images",
            user_id,
            orphaned.len()
        );
        Ok(orphaned.into_iter().map(|(_, key)| key).collect())
    }

    async fn create_image_and_association(
        &self,
        user_id: &str,
        image: &Image,
        object_key: &str,
    ) -> MetadataResult<UserImage> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO images (id, url, description, object_key, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&image.id)
        .bind(&image.url)
        .bind(&image.desc)
        .bind(object_key)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let link = sqlx::query_as::<_, UserImage>(
            "INSERT INTO users_images (id, user_id, image_id, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING id, user_id, image_id, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(&image.id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                MetadataError::UserNotFound(user_id.to_string())
            }
            other => MetadataError::Sqlx(other),
        })?;

        tx.commit().await?;
        Ok(link)
    }

    async fn list_images_for_user(&self, user_id: &str) -> MetadataResult<Vec<Image>> {
        let images = sqlx::query_as::<_, Image>(
            "SELECT i.id, i.url, i.description
             FROM users_images ui
             JOIN images i ON i.id = ui.image_id
             WHERE ui.user_id = ?
             ORDER BY ui.rowid ASC",
        )
        .bind(user_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(images)
    }

    async fn ping(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

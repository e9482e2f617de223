//! Represents an uploaded image and its link to an owning user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An image whose bytes live in the object store.
///
/// This is also the element type of a cached image list, so the serde
/// representation must round-trip exactly.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Image {
    /// Opaque unique identifier, generated before the blob is stored.
    pub id: String,

    /// Retrieval URL returned by the object store.
    pub url: String,

    /// Generated description of the image content.
    #[sqlx(rename = "description")]
    pub desc: String,
}

/// One row of the many-to-many user/image link table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UserImage {
    pub id: String,
    pub user_id: String,
    pub image_id: String,
    pub created_at: DateTime<Utc>,
}

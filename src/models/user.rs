//! Represents a registered user.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user who owns zero or more images.
///
/// The identifier is assigned by the metadata store at creation and the
/// record is never updated afterwards, only deleted.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct User {
    /// Opaque unique identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Contact address. Not required to be unique.
    pub email: String,
}

/// Request body for `POST /user`.
#[derive(Deserialize, Clone, Debug)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
}

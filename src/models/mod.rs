//! Core data models for the user image catalog.
//!
//! These entities represent users, their images, and the link rows between
//! them. They map cleanly to database tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod image;
pub mod user;

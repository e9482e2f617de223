//! Defines routes for user, image and blob operations.
//!
//! ## Structure
//! - **User endpoints**
//!   - `POST   /user`           : register a user
//!   - `GET    /user/{user_id}` : fetch a user
//!   - `DELETE /user/{user_id}` : delete a user and the images it alone owns
//!
//! - **Image endpoints**
//!   - `POST   /images/upload/{user_id}`: multipart image upload
//!   - `GET    /images/{user_id}`       : cached list of the user's images
//!
//! - **Blob endpoint**
//!   - `GET    /objects/{*key}`: stream a stored image; the wildcard allows
//!     nested keys like `users/{user_id}/{image_id}.png`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{get_object, list_images, upload_image},
        user_handlers::{create_user, delete_user, get_user},
    },
    services::catalog_service::CatalogService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for every endpoint.
///
/// The router carries shared state (`CatalogService`) to all handlers.
/// Request bodies are capped at `max_upload_bytes`.
pub fn routes(max_upload_bytes: usize) -> Router<CatalogService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // User routes
        .route("/user", post(create_user))
        .route("/user/{user_id}", get(get_user).delete(delete_user))
        // Image routes
        .route("/images/upload/{user_id}", post(upload_image))
        .route("/images/{user_id}", get(list_images))
        // Blob retrieval
        .route("/objects/{*key}", get(get_object))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

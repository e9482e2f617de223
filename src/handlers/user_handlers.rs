//! HTTP handlers for user registration, lookup and removal.

use crate::{
    errors::AppError,
    models::user::{CreateUser, User},
    services::catalog_service::CatalogService,
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// `POST /user`
pub async fn create_user(
    State(service): State<CatalogService>,
    Json(payload): Json<CreateUser>,
) -> Result<Json<User>, AppError> {
    let user = service.create_user(payload).await?;
    Ok(Json(user))
}

/// `GET /user/{user_id}`
pub async fn get_user(
    State(service): State<CatalogService>,
    Path(user_id): Path<String>,
) -> Result<Json<User>, AppError> {
    let user = service.get_user(&user_id).await?;
    Ok(Json(user))
}

/// `DELETE /user/{user_id}`: removes the user, its links and the images it
/// alone owned.
pub async fn delete_user(
    State(service): State<CatalogService>,
    Path(user_id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    service.delete_user(&user_id).await?;
    Ok(Json(MessageResponse {
        message: format!("user {} deleted", user_id),
    }))
}

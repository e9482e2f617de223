//! HTTP handlers for image upload, cached listing and blob retrieval.

use crate::{
    errors::AppError,
    models::image::Image,
    services::catalog_service::{CatalogService, UploadedImage, content_type_for_key},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Serialize;

/// Multipart field carrying the image bytes.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub url: String,
}

/// `POST /images/upload/{user_id}`: multipart body with a `file` part.
pub async fn upload_image(
    State(service): State<CatalogService>,
    Path(user_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::new(err.status(), err.body_text()))?;
        upload = Some(UploadedImage {
            bytes,
            content_type,
        });
        break;
    }

    let upload = upload
        .ok_or_else(|| AppError::bad_request(format!("missing `{}` multipart field", FILE_FIELD)))?;

    let image = service.upload_image(&user_id, upload).await?;
    Ok(Json(UploadResponse {
        message: format!("image {} uploaded", image.id),
        url: image.url,
    }))
}

/// `GET /images/{user_id}`: served from the image list cache when possible.
pub async fn list_images(
    State(service): State<CatalogService>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Image>>, AppError> {
    let images = service.list_images(&user_id).await?;
    Ok(Json(images))
}

/// `GET /objects/{*key}`: stream a stored image back.
pub async fn get_object(
    State(service): State<CatalogService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let stream = service.open_object(&key).await?;

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_key(&key)),
    );
    Ok(response)
}

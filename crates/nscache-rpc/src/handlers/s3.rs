//! S3-style object routes.
//!
//! `GET` reads through the cache, `HEAD` reports cached metadata only and
//! `PUT` writes around the cache to the bucket's primary hub. Every object
//! response carries `x-nscache-status` saying how it was served.

use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use nscache_core::{GatewayError, ObjectMeta};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub const STATUS_HEADER: HeaderName = HeaderName::from_static("x-nscache-status");

/// Gateway error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

/// HTTP status for a gateway error.
pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::UnknownBucket { .. }
        | GatewayError::UnknownResource { .. }
        | GatewayError::ObjectNotFound { .. } => StatusCode::NOT_FOUND,
        GatewayError::UnhealthyResource { .. } | GatewayError::HubRejected { .. } => {
            StatusCode::BAD_GATEWAY
        }
        GatewayError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::InvalidTtl { .. }
        | GatewayError::InvalidBucketName { .. }
        | GatewayError::InvalidResourceName { .. }
        | GatewayError::InvalidObjectKey { .. }
        | GatewayError::InvalidParams { .. } => StatusCode::BAD_REQUEST,
        GatewayError::BucketAlreadyExists { .. }
        | GatewayError::ResourceAlreadyExists { .. }
        | GatewayError::ResourceInUse { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = Json(json!({
            "error": {
                "code": self.0.to_rpc_error_code(),
                "message": self.0.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Add ETag, Content-Type and Last-Modified from object metadata.
fn meta_headers(meta: &ObjectMeta, headers: &mut HeaderMap) {
    if let Some(value) = meta.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(header::ETAG, value);
    }
    let content_type = meta
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(modified) = meta.last_modified {
        let http_date = modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = HeaderValue::from_str(&http_date) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}

/// `GET /s3/:bucket` - cached keys of a namespace bucket.
pub async fn list_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let objects = state.gateway.list_cached_objects(&bucket)?;
    Ok(Json(json!({
        "bucket": bucket,
        "key_count": objects.len(),
        "objects": objects,
    })))
}

/// `GET /s3/:bucket/*key` - read through the cache.
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> ApiResult<Response> {
    let object = state.gateway.get_object(&bucket, &key).await?;
    debug!("GET {}/{} -> {}", bucket, key, object.source.as_str());

    let mut headers = HeaderMap::new();
    meta_headers(&object.meta, &mut headers);
    headers.insert(
        STATUS_HEADER,
        HeaderValue::from_static(object.source.as_str()),
    );
    Ok((StatusCode::OK, headers, object.body).into_response())
}

/// `HEAD /s3/:bucket/*key` - cached metadata only; uncached keys are 404.
pub async fn head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> ApiResult<Response> {
    let info = state.gateway.head_object(&bucket, &key)?;

    let mut headers = HeaderMap::new();
    meta_headers(
        &ObjectMeta {
            size: info.size,
            etag: info.etag.clone(),
            content_type: info.content_type.clone(),
            last_modified: info.last_modified,
        },
        &mut headers,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.size));
    let status = if info.fresh { "HIT" } else { "STALE" };
    headers.insert(STATUS_HEADER, HeaderValue::from_static(status));
    Ok((StatusCode::OK, headers).into_response())
}

/// `PUT /s3/:bucket/*key` - write around the cache to the primary hub.
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let meta = state.gateway.put_object(&bucket, &key, body).await?;
    Ok(put_response(&meta))
}

/// `PUT /hub/:resource/*key` - write directly to a hub resource.
pub async fn put_direct(
    State(state): State<Arc<AppState>>,
    Path((resource, key)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let meta = state.gateway.put_direct(&resource, &key, body).await?;
    Ok(put_response(&meta))
}

fn put_response(meta: &ObjectMeta) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(value) = meta.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(header::ETAG, value);
    }
    (StatusCode::OK, headers, Json(json!({ "size": meta.size, "etag": meta.etag }))).into_response()
}

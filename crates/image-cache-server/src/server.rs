//! HTTP server for image cache endpoints
//!
//! Provides /health, /image, /cache/* and /maintenance/* endpoints.

use crate::types::{CacheSizeResponse, CleanResponse, HealthResponse, ImageQuery};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use image_retrieval::{CacheOptions, ImageError, ImageManager, Resource};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub manager: ImageManager,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(manager: ImageManager) -> Self {
        Self {
            manager,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/image", get(get_image))
        .route("/cache/size", get(cache_size))
        .route("/cache/memory", delete(clear_memory))
        .route("/cache/disk", delete(clear_disk))
        .route("/maintenance/clean-expired", post(clean_expired))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn start_server(
    state: SharedState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        memory: state.manager.cache().memory_stats(),
        in_flight_downloads: state.manager.downloader().in_flight(),
    })
}

/// Retrieve an image through memory, disk and network
async fn get_image(State(state): State<SharedState>, Query(query): Query<ImageQuery>) -> Response {
    let resource = Resource::new(
        query.key.unwrap_or_else(|| query.url.clone()),
        query.url,
    );
    let mut options = CacheOptions::default();
    if query.refresh {
        options = options.force_refresh();
    }
    if query.memory_only {
        options = options.memory_only();
    }

    let retrieved = match state.manager.fetch(&resource, options).await {
        Ok(retrieved) => retrieved,
        Err(e) => {
            warn!(url = %resource.download_url, error = %e, "Failed to retrieve image");
            return error_response(status_for(&e), e.to_string());
        }
    };

    let Some(image) = retrieved.image else {
        return error_response(StatusCode::NOT_FOUND, "Not modified and not cached");
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, image.format().mime_type())
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .header("X-Cache", retrieved.source.as_str())
        .body(Body::from(image.data().to_vec()))
        .unwrap_or_else(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

fn status_for(err: &ImageError) -> StatusCode {
    match err {
        ImageError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ImageError::NotModified => StatusCode::NOT_FOUND,
        ImageError::BadData { .. } | ImageError::Transport(_) => StatusCode::BAD_GATEWAY,
        ImageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ImageError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn cache_size(State(state): State<SharedState>) -> Response {
    match state.manager.cache().disk_stats().await {
        Ok(stats) => Json(CacheSizeResponse::from(stats)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Memory pressure trigger
async fn clear_memory(State(state): State<SharedState>) -> StatusCode {
    state.manager.cache().clear_memory().await;
    info!("Memory cache cleared on request");
    StatusCode::NO_CONTENT
}

async fn clear_disk(State(state): State<SharedState>) -> Response {
    match state.manager.cache().clear_disk().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn clean_expired(State(state): State<SharedState>) -> Response {
    match state.manager.cache().clean_expired().await {
        Ok(report) => Json(CleanResponse::from(&report)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use image::{DynamicImage, Rgba, RgbaImage};
    use image_disk_cache::DiskCacheConfig;
    use image_downloader::DownloaderConfig;
    use image_retrieval::MemoryCacheConfig;
    use std::io::Cursor;
    use std::path::Path;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn create_test_state(dir: &Path) -> SharedState {
        let manager = ImageManager::with_config(
            DiskCacheConfig::new(dir.join("images")),
            MemoryCacheConfig::default(),
            DownloaderConfig::default(),
        )
        .unwrap();
        Arc::new(ServerState::new(manager))
    }

    fn png_bytes() -> Vec<u8> {
        let pixels = RgbaImage::from_pixel(5, 5, Rgba([0, 0, 0, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(pixels)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    async fn spawn_origin() -> std::net::SocketAddr {
        let png = png_bytes();
        let router = Router::new().route(
            "/a.png",
            get(move || {
                let png = png.clone();
                async move { ([(header::CONTENT_TYPE, "image/png")], png) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path()));

        let response = router.oneshot(request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].as_u64().is_some());
        assert!(json["memory"]["entries"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_image_endpoint_serves_and_caches() {
        let origin = spawn_origin().await;
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path());
        let uri = format!("/image?url=http://{}/a.png", origin);

        let response = create_router(state.clone())
            .oneshot(request("GET", &uri))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()["X-Cache"], "none");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), png_bytes().as_slice());

        let response = create_router(state)
            .oneshot(request("GET", &uri))
            .await
            .unwrap();
        assert_eq!(response.headers()["X-Cache"], "memory");
    }

    #[tokio::test]
    async fn test_image_endpoint_invalid_url() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path()));

        let response = router
            .oneshot(request("GET", "/image?url=notaurl"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_clear_memory_then_disk_hit() {
        let origin = spawn_origin().await;
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path());
        let uri = format!("/image?url=http://{}/a.png&key=avatar", origin);

        create_router(state.clone())
            .oneshot(request("GET", &uri))
            .await
            .unwrap();

        let response = create_router(state.clone())
            .oneshot(request("DELETE", "/cache/memory"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = create_router(state)
            .oneshot(request("GET", &uri))
            .await
            .unwrap();
        assert_eq!(response.headers()["X-Cache"], "disk");
    }

    #[tokio::test]
    async fn test_cache_size_and_clear_disk() {
        let origin = spawn_origin().await;
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path());

        create_router(state.clone())
            .oneshot(request("GET", &format!("/image?url=http://{}/a.png", origin)))
            .await
            .unwrap();

        let response = create_router(state.clone())
            .oneshot(request("GET", "/cache/size"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["entries"], 1);
        assert_eq!(json["total_size"], png_bytes().len() as u64);

        let response = create_router(state.clone())
            .oneshot(request("DELETE", "/cache/disk"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = create_router(state)
            .oneshot(request("GET", "/cache/size"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["entries"], 0);
    }

    #[tokio::test]
    async fn test_clean_expired_endpoint() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path()));

        let response = router
            .oneshot(request("POST", "/maintenance/clean-expired"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["expired"], 0);
        assert_eq!(json["evicted"], 0);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ImageError::InvalidRequest("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ImageError::BadData { status: 500 }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ImageError::Cancelled),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

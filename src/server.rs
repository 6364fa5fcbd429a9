use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path as UrlPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::context::ServiceContext;
use crate::dispatch::DispatchError;
use crate::queue::QueueError;

const INDEX_HTML: &str = include_str!("../ui/index.html");

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RowsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Build the dashboard router. Legacy paths (`/start_scan`, `/scan_status`,
/// `/results`) are served alongside the `/api` ones.
pub fn router(ctx: ServiceContext, ui_dir: impl AsRef<Path>) -> Router {
    let api = Router::new()
        .route("/scan", post(post_scan))
        .route("/task/{id}", get(get_task))
        .route("/rows", get(get_rows));

    let static_svc = ServeDir::new(ui_dir.as_ref()).append_index_html_on_directories(false);

    Router::new()
        .route("/", get(index))
        .route("/start_scan", post(post_scan))
        .route("/scan_status/{id}", get(get_task))
        .route("/results", get(get_rows))
        .route("/clear_results", post(clear_results))
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind `bind` and serve `app` until `shutdown` resolves.
pub async fn serve(
    bind: &str,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, "serving dashboard");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;
    Ok(())
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::Queue(QueueError::Full) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Queue(e) => {
                error!(error = %e, "scan submission failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// Every dashboard load starts from an empty findings table. Scans finishing
// concurrently may lose their rows to this clear.
async fn index(State(ctx): State<ServiceContext>) -> impl IntoResponse {
    match ctx.findings.delete_all().await {
        Ok(deleted) => info!(deleted, "findings cleared on dashboard load"),
        Err(e) => warn!(error = %e, "failed to clear findings on dashboard load"),
    }
    Html(INDEX_HTML)
}

async fn post_scan(
    State(ctx): State<ServiceContext>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": rejection.body_text() })),
            )
                .into_response()
        }
    };

    match ctx.dispatcher.request_scan(req.target.as_deref()).await {
        Ok(id) => (StatusCode::ACCEPTED, Json(json!({ "task_id": id }))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_task(State(ctx): State<ServiceContext>, UrlPath(id): UrlPath<String>) -> Response {
    match ctx.dispatcher.get_status(&id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_rows(State(ctx): State<ServiceContext>, Query(q): Query<RowsQuery>) -> Response {
    match ctx.findings.list_recent(q.limit).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to list findings");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn clear_results(State(ctx): State<ServiceContext>) -> Response {
    match ctx.findings.delete_all().await {
        Ok(deleted) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "deleted": deleted })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to clear findings");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

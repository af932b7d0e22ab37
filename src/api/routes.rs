use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::api::auth::UserId;
use crate::api::models::{BookmarkRequest, HealthStatus, RelatedResearchRequest, ResearchErrorBody};
use crate::api::response;
use crate::error::{AppError, Result};
use crate::pipeline::{AnalysisRequest, AnalysisResponse, Viewer};
use crate::research::{normalize_keywords, Audience, RelatedResearch, ResearchContext};
use crate::storage::Interaction;
use crate::AppState;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze_handler))
        .route("/api/public-analyze", post(public_analyze_handler))
        .route("/api/related-research", post(related_research_handler))
        .route("/api/articles", get(list_articles_handler))
        .route("/api/articles/bookmark", post(bookmark_handler))
        .route("/api/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

/// Rejects blank input and anything that is not an absolute http(s) URL.
fn validate_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("URL is required".to_string()));
    }
    let parsed = Url::parse(trimmed).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!("Unsupported URL scheme: {}", parsed.scheme())));
    }
    Ok(trimmed.to_string())
}

async fn run_analysis(state: &AppState, mut req: AnalysisRequest, viewer: Viewer) -> Result<Json<AnalysisResponse>> {
    req.url = validate_url(&req.url)?;
    tracing::info!(url = %req.url, step = ?req.step, member = matches!(viewer, Viewer::Member(_)), "analysis requested");

    let started = std::time::Instant::now();
    let result = state.pipeline.analyze(req, &viewer).await;
    tracing::info!(
        url = %result.url,
        step = %result.current_step,
        error = result.error.as_deref().unwrap_or(""),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "analysis finished"
    );
    Ok(Json(result))
}

async fn analyze_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<AnalysisRequest>,
) -> Result<Json<AnalysisResponse>> {
    run_analysis(&state, req, Viewer::Member(user_id)).await
}

async fn public_analyze_handler(
    State(state): State<AppState>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Json<AnalysisResponse>> {
    run_analysis(&state, req, Viewer::Public).await
}

async fn related_research_handler(
    State(state): State<AppState>,
    UserId(_user_id): UserId,
    Json(req): Json<RelatedResearchRequest>,
) -> Response {
    let context = ResearchContext {
        title: req.title.unwrap_or_default(),
        key_findings: req.key_findings,
    };

    match state
        .research
        .find_related(&req.keywords, &context, Audience::Member, state.tracer.as_ref())
        .await
    {
        Ok(research) => Json(research).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "related research lookup failed");
            let terms = normalize_keywords(&req.keywords, state.config.max_search_results);
            let body = ResearchErrorBody {
                research: RelatedResearch::empty(terms),
                error: err.to_string(),
            };
            (err.status(), Json(body)).into_response()
        }
    }
}

async fn list_articles_handler(State(state): State<AppState>, UserId(user_id): UserId) -> Response {
    response::envelope(state.store.list_for_user(&user_id).await)
}

async fn bookmark_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<BookmarkRequest>,
) -> Response {
    response::envelope(set_bookmark(&state, &user_id, req).await)
}

async fn set_bookmark(state: &AppState, user_id: &str, req: BookmarkRequest) -> Result<Interaction> {
    let url = validate_url(&req.url)?;
    let article = state
        .store
        .find_by_url(&url)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No analysed article for {}", url)))?;
    state.store.set_bookmark(user_id, article.id, req.bookmarked).await
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.store.article_count().await {
        Ok(stored_articles) => response::success(HealthStatus {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            stored_articles,
            checked_at: Utc::now(),
        }),
        Err(err) => response::error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::access::TeacherAccess;
use crate::engine::InsightEngine;
use crate::error::InsightError;
use crate::ingest::SubmissionRequest;
use crate::models::Severity;

pub type SharedEngine = Arc<InsightEngine>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 3000).into(),
            sweep_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Engine errors mapped onto HTTP statuses. Callers see the taxonomy,
/// never internals.
pub struct ApiError(InsightError);

impl From<InsightError> for ApiError {
    fn from(err: InsightError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            InsightError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "validation", "details": errors }),
            ),
            InsightError::Forbidden(message) => (
                StatusCode::FORBIDDEN,
                json!({ "error": "forbidden", "details": message }),
            ),
            InsightError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found", "details": message }),
            ),
            InsightError::InsufficientPool {
                student_id,
                requested,
                available,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({
                    "error": "insufficient_pool",
                    "student_id": student_id,
                    "requested": requested,
                    "available": available,
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Build and return the full router. The upstream session layer injects the
/// authenticated teacher id as an explicit parameter on every operation.
pub fn build_router(engine: SharedEngine) -> Router {
    Router::new()
        .route("/api/access", post(register_access))
        .route("/api/submissions", post(submit))
        .route("/api/classes/{class_id}/overview", get(class_overview))
        .route("/api/students/{student_id}/profile", get(student_profile))
        .route("/api/students/{student_id}/videos", get(video_recommendations))
        .route("/api/outcomes/analysis", get(outcome_analysis))
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/{alert_id}/resolve", post(resolve_alert))
        .route("/api/mini-tests", post(generate_mini_test))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Run the server plus the periodic alert sweep until shutdown.
pub async fn serve(engine: SharedEngine, config: ServerConfig) -> anyhow::Result<()> {
    let sweeper = engine.clone();
    let mut interval = tokio::time::interval(config.sweep_interval);
    tokio::spawn(async move {
        // The first tick fires immediately; skip it so a fresh start does
        // not sweep an empty store.
        interval.tick().await;
        loop {
            interval.tick().await;
            let raised = sweeper.sweep();
            if !raised.is_empty() {
                info!(alerts = raised.len(), "sweep raised alerts");
            }
        }
    });

    let app = build_router(engine);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("listening on http://{}", config.addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RegisterAccessRequest {
    teacher_id: String,
    class_ids: Vec<String>,
    subjects: Vec<String>,
    #[serde(default)]
    is_homeroom: bool,
}

async fn register_access(
    State(engine): State<SharedEngine>,
    Json(request): Json<RegisterAccessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.teacher_id.trim().is_empty() {
        return Err(InsightError::Validation(vec!["teacher_id must not be empty".to_string()]).into());
    }
    engine.register_access(TeacherAccess {
        teacher_id: request.teacher_id,
        class_ids: request.class_ids.into_iter().collect::<HashSet<_>>(),
        subjects: request.subjects.into_iter().collect::<HashSet<_>>(),
        is_homeroom: request.is_homeroom,
    });
    Ok(Json(json!({ "status": "registered" })))
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    submission_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_correct: Option<bool>,
    alerts_raised: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation_errors: Option<Vec<String>>,
}

async fn submit(
    State(engine): State<SharedEngine>,
    Json(request): Json<SubmissionRequest>,
) -> Response {
    match engine.submit(request) {
        Ok(receipt) => Json(SubmitResponse {
            accepted: true,
            submission_id: Some(receipt.submission_id),
            is_correct: Some(receipt.is_correct),
            alerts_raised: receipt.alerts_raised,
            validation_errors: None,
        })
        .into_response(),
        Err(InsightError::Validation(errors)) => (
            StatusCode::BAD_REQUEST,
            Json(SubmitResponse {
                accepted: false,
                submission_id: None,
                is_correct: None,
                alerts_raised: Vec::new(),
                validation_errors: Some(errors),
            }),
        )
            .into_response(),
        Err(other) => ApiError(other).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct OverviewParams {
    teacher_id: String,
    subject: Option<String>,
    timeout_ms: Option<u64>,
}

async fn class_overview(
    State(engine): State<SharedEngine>,
    Path(class_id): Path<String>,
    Query(params): Query<OverviewParams>,
) -> Result<impl IntoResponse, ApiError> {
    let overview = engine.class_overview(
        &params.teacher_id,
        &class_id,
        params.subject.as_deref(),
        params.timeout_ms.map(Duration::from_millis),
    )?;
    Ok(Json(overview))
}

#[derive(Debug, Deserialize)]
struct TeacherParams {
    teacher_id: String,
}

async fn student_profile(
    State(engine): State<SharedEngine>,
    Path(student_id): Path<String>,
    Query(params): Query<TeacherParams>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = engine.student_profile(&params.teacher_id, &student_id)?;
    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
struct AnalysisParams {
    teacher_id: String,
    subject: String,
    learning_outcome: String,
}

async fn outcome_analysis(
    State(engine): State<SharedEngine>,
    Query(params): Query<AnalysisParams>,
) -> Result<impl IntoResponse, ApiError> {
    let analysis = engine.outcome_analysis(
        &params.teacher_id,
        &params.learning_outcome,
        &params.subject,
    )?;
    Ok(Json(analysis))
}

#[derive(Debug, Deserialize)]
struct AlertParams {
    teacher_id: String,
    class_id: Option<String>,
    severity: Option<String>,
}

async fn list_alerts(
    State(engine): State<SharedEngine>,
    Query(params): Query<AlertParams>,
) -> Result<impl IntoResponse, ApiError> {
    let severity = match params.severity.as_deref() {
        Some(raw) => Some(Severity::parse(raw).ok_or_else(|| {
            InsightError::Validation(vec![format!("unknown severity '{raw}'")])
        })?),
        None => None,
    };
    let alerts = engine.alerts(&params.teacher_id, params.class_id.as_deref(), severity)?;
    Ok(Json(alerts))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    teacher_id: String,
    resolution_note: String,
}

async fn resolve_alert(
    State(engine): State<SharedEngine>,
    Path(alert_id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let alert = engine.resolve_alert(&alert_id, &request.teacher_id, &request.resolution_note)?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
struct VideoParams {
    #[serde(default = "default_video_limit")]
    limit: usize,
}

fn default_video_limit() -> usize {
    5
}

async fn video_recommendations(
    State(engine): State<SharedEngine>,
    Path(student_id): Path<String>,
    Query(params): Query<VideoParams>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(engine.video_recommendations(&student_id, params.limit)))
}

#[derive(Debug, Deserialize)]
struct MiniTestRequest {
    teacher_id: String,
    student_ids: Vec<String>,
    subject: String,
    learning_outcome: String,
    question_count: usize,
}

async fn generate_mini_test(
    State(engine): State<SharedEngine>,
    Json(request): Json<MiniTestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let test = engine.generate_mini_test(
        &request.teacher_id,
        &request.student_ids,
        &request.learning_outcome,
        &request.subject,
        request.question_count,
    )?;
    Ok(Json(test))
}

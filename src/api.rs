use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::error::{StoreError, WorkflowError};
use crate::ledger::ChainStatus;
use crate::model::{Complaint, DetectionRecord, NewComplaint, NewUser, User};
use crate::service::{AnalysisReport, CivicService, ComplaintView};

// ==========================================
// 1. 应用状态 (Shared State)
// ==========================================
// 所有请求共享同一个服务门面。sled 自带事务，不再需要外层 Mutex。
pub struct AppState {
    pub service: Arc<CivicService>,
}

// ==========================================
// 2. 错误映射
// ==========================================
#[derive(Debug)]
pub enum ApiError {
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                error!("内部错误: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ComplaintNotFound(_) | StoreError::UserNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            StoreError::EmailTaken(_) => ApiError::Conflict(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Forbidden(_) => ApiError::Forbidden(err.to_string()),
            WorkflowError::InvalidStatus(_) => ApiError::BadRequest(err.to_string()),
            WorkflowError::Store(e) => e.into(),
        }
    }
}

// ==========================================
// 3. 数据传输对象 (DTOs)
// ==========================================

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    pub confidence_threshold: Option<f64>,
}

#[derive(Deserialize)]
pub struct DetectRequest {
    // 上传由外层处理，这里只接收已落盘的图片路径
    pub image_path: String,
    pub confidence_threshold: Option<f64>,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub ai_status: String,
    pub override_type: Option<String>,
    pub admin_id: u64,
}

// ==========================================
// 4. 路由
// ==========================================
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/users", post(create_user))
        .route("/complaints", post(submit_complaint).get(list_complaints))
        .route("/complaints/{id}", get(get_complaint))
        .route("/complaints/{id}/detections", get(get_detections))
        .route("/complaints/{id}/analyze", post(analyze_complaint))
        .route("/complaints/{id}/ledger", get(verify_ledger))
        .route("/complaint/status/{user_id}", get(user_complaints))
        .route("/admin/complaint/{id}/ai-result", get(get_complaint))
        .route("/admin/complaint/{id}/decision", post(submit_decision))
        .route("/detect", post(detect_image))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ==========================================
// 5. 处理函数 (Handlers)
// ==========================================

/// 仲裁和 sled 读写都是阻塞操作，挪到 spawn_blocking 上执行
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("Task join error: {}", e)))?
}

fn check_threshold(threshold: Option<f64>) -> Result<Option<f64>, ApiError> {
    match threshold {
        Some(t) if !t.is_finite() || !(0.0..=1.0).contains(&t) => Err(ApiError::BadRequest(
            format!("confidence_threshold must be within [0, 1], got {}", t),
        )),
        other => Ok(other),
    }
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let service = state.service.clone();
    let user = blocking(move || Ok(service.create_user(req)?)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn submit_complaint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewComplaint>,
) -> Result<(StatusCode, Json<Complaint>), ApiError> {
    let service = state.service.clone();
    let complaint = blocking(move || Ok(service.submit_complaint(req)?)).await?;
    Ok((StatusCode::CREATED, Json(complaint)))
}

async fn list_complaints(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Complaint>>, ApiError> {
    let service = state.service.clone();
    let complaints = blocking(move || Ok(service.store().list_complaints()?)).await?;
    Ok(Json(complaints))
}

async fn user_complaints(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<u64>,
) -> Result<Json<Vec<Complaint>>, ApiError> {
    let service = state.service.clone();
    let complaints = blocking(move || Ok(service.complaints_for_user(user_id)?)).await?;
    Ok(Json(complaints))
}

async fn get_complaint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<ComplaintView>, ApiError> {
    let service = state.service.clone();
    blocking(move || {
        service
            .complaint(id)?
            .map(Json)
            .ok_or_else(|| ApiError::NotFound(format!("complaint {} not found", id)))
    })
    .await
}

async fn get_detections(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<DetectionRecord>>, ApiError> {
    let service = state.service.clone();
    let records = blocking(move || Ok(service.history(id)?)).await?;
    Ok(Json(records))
}

async fn verify_ledger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<ChainStatus>, ApiError> {
    let service = state.service.clone();
    let status = blocking(move || Ok(service.verify_chain(id)?)).await?;
    Ok(Json(status))
}

/// 运行级失败不是 HTTP 错误：照常返回 200，错误写在报告的 `error` 字段
async fn analyze_complaint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisReport>, ApiError> {
    let threshold = check_threshold(req.confidence_threshold)?;
    info!("收到仲裁请求: 投诉={}", id);

    let service = state.service.clone();
    let report = blocking(move || Ok(service.analyze(id, threshold)?)).await?;
    Ok(Json(report))
}

async fn detect_image(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DetectRequest>,
) -> Result<Json<AnalysisReport>, ApiError> {
    let threshold = check_threshold(req.confidence_threshold)?;
    info!("收到检测请求: 图片={}", req.image_path);

    let service = state.service.clone();
    let report = blocking(move || {
        Ok(service.detect(std::path::Path::new(&req.image_path), threshold))
    })
    .await?;
    Ok(Json(report))
}

async fn submit_decision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<Complaint>, ApiError> {
    let service = state.service.clone();
    let complaint = blocking(move || {
        Ok(service.decide(id, &req.ai_status, req.override_type.as_deref(), req.admin_id)?)
    })
    .await?;
    Ok(Json(complaint))
}

use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use pledge_database::basic_db::SafeDatabase;
use pledge_service::analytics::{analytics_history, rollup};
use pledge_service::distribution::{get_community_distribution, DistributionEngine, DistributionOutcome, DistributionView};
use pledge_service::membership::{
    create_community, disqualify_member, get_member_progress, join_community, log_daily_progress, record_attendance,
    AttendanceInput, DailyProgressInput,
};
use pledge_service::parser::community::{
    Community, CommunityAnalyticsSnapshot, MemberProgressDaily, Membership, NewCommunity,
};
use pledge_service::sweeper::{SweepReport, Sweeper};
use pledge_service::{EngineError, EngineResult, LedgerStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Assumed share of winners when previewing an unsettled community.
const DEFAULT_SUCCESS_RATE: f64 = 0.5;

// 쿼리 파라미터
#[derive(Deserialize)]
pub struct IdQuery {
    id: String,
}

#[derive(Deserialize)]
pub struct MemberQuery {
    id: String,
    user: String,
}

#[derive(Deserialize)]
pub struct DistributionQuery {
    id: String,
    success_rate: Option<f64>,
}

#[derive(Deserialize)]
pub struct MemberRequest {
    user_id: String,
}

// 응답 구조체
#[derive(Serialize)]
pub struct CommunitiesResponse {
    communities: Vec<Community>,
}

#[derive(Serialize)]
pub struct MemberProgressResponse {
    community_id: String,
    user_id: String,
    progress_percentage: f64,
    total_meeting_seconds: u64,
    is_disqualified: bool,
}

impl From<Membership> for MemberProgressResponse {
    fn from(m: Membership) -> Self {
        Self {
            community_id: m.community_id,
            user_id: m.user_id,
            progress_percentage: m.progress_percentage,
            total_meeting_seconds: m.total_meeting_seconds,
            is_disqualified: m.is_disqualified,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Engine(err) => match err {
                EngineError::Validation(_) | EngineError::Overflow(_) => StatusCode::BAD_REQUEST,
                EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::NotEnded { .. } | EngineError::Conflict { .. } => StatusCode::CONFLICT,
                EngineError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Consistency(_) | EngineError::Serialization(_) | EngineError::Store(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Engine(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = json!({
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

fn require(value: &str, name: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::ValidationError(format!("{} cannot be empty", name)));
    }
    Ok(())
}

/// Runs a store-bound job off the async runtime, bounded by the configured
/// store timeout. A job that overruns is reported as `Timeout`; it may still
/// finish in the background, which every engine write tolerates.
pub(crate) async fn run_blocking<T, R, F>(state: &AppState<T>, job: F) -> Result<R, ApiError>
where
    T: SafeDatabase,
    R: Send + 'static,
    F: FnOnce(AppState<T>) -> EngineResult<R> + Send + 'static,
{
    let timeout = state.store_timeout();
    let state = state.clone();

    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || job(state))).await {
        Ok(Ok(result)) => result.map_err(ApiError::from),
        Ok(Err(join_err)) => Err(ApiError::Internal(join_err.to_string())),
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Store call timed out");
            Err(ApiError::Engine(EngineError::Timeout))
        }
    }
}

pub async fn save_community<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Json(input): Json<NewCommunity>,
) -> Result<(StatusCode, Json<Community>), ApiError> {
    let community = run_blocking(&state, move |s| create_community(&s.store, input, Utc::now())).await?;
    Ok((StatusCode::CREATED, Json(community)))
}

pub async fn get_all_communities<T: SafeDatabase>(
    State(state): State<AppState<T>>,
) -> Result<Json<CommunitiesResponse>, ApiError> {
    let communities = run_blocking(&state, |s| s.store.list_communities()).await?;
    Ok(Json(CommunitiesResponse { communities }))
}

pub async fn get_community_by_id<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Community>, ApiError> {
    require(&query.id, "id")?;
    let community = run_blocking(&state, move |s| s.store.get_community_required(&query.id)).await?;
    Ok(Json(community))
}

pub async fn join<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<IdQuery>,
    Json(request): Json<MemberRequest>,
) -> Result<(StatusCode, Json<Membership>), ApiError> {
    require(&query.id, "id")?;
    require(&request.user_id, "user_id")?;
    let membership = run_blocking(&state, move |s| {
        join_community(&s.store, &query.id, &request.user_id, Utc::now())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

pub async fn save_attendance<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<IdQuery>,
    Json(input): Json<AttendanceInput>,
) -> Result<Json<Membership>, ApiError> {
    require(&query.id, "id")?;
    let membership = run_blocking(&state, move |s| {
        record_attendance(&s.store, &s.config.engine, &query.id, input, Utc::now())
    })
    .await?;
    Ok(Json(membership))
}

pub async fn save_daily_progress<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<IdQuery>,
    Json(input): Json<DailyProgressInput>,
) -> Result<Json<MemberProgressDaily>, ApiError> {
    require(&query.id, "id")?;
    let row = run_blocking(&state, move |s| log_daily_progress(&s.store, &query.id, input)).await?;
    Ok(Json(row))
}

pub async fn get_progress<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<MemberQuery>,
) -> Result<Json<MemberProgressResponse>, ApiError> {
    require(&query.id, "id")?;
    require(&query.user, "user")?;
    let membership = run_blocking(&state, move |s| {
        get_member_progress(&s.store, &s.config.engine, &query.id, &query.user, Utc::now())
    })
    .await?;
    Ok(Json(membership.into()))
}

pub async fn disqualify<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<IdQuery>,
    Json(request): Json<MemberRequest>,
) -> Result<Json<Membership>, ApiError> {
    require(&query.id, "id")?;
    let membership = run_blocking(&state, move |s| disqualify_member(&s.store, &query.id, &request.user_id)).await?;
    Ok(Json(membership))
}

pub async fn get_analytics<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<CommunityAnalyticsSnapshot>, ApiError> {
    require(&query.id, "id")?;
    let snapshot = run_blocking(&state, move |s| {
        let community = s.store.get_community_required(&query.id)?;
        rollup(&s.store, &community, Utc::now())
    })
    .await?;
    Ok(Json(snapshot))
}

pub async fn get_analytics_history<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Vec<CommunityAnalyticsSnapshot>>, ApiError> {
    require(&query.id, "id")?;
    let history = run_blocking(&state, move |s| analytics_history(&s.store, &query.id)).await?;
    Ok(Json(history))
}

pub async fn get_distribution<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<DistributionQuery>,
) -> Result<Json<DistributionView>, ApiError> {
    require(&query.id, "id")?;
    let rate = query.success_rate.unwrap_or(DEFAULT_SUCCESS_RATE);
    let view = run_blocking(&state, move |s| {
        get_community_distribution(&s.store, &s.config.engine, &query.id, rate)
    })
    .await?;
    Ok(Json(view))
}

pub async fn distribute<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<DistributionOutcome>, ApiError> {
    require(&query.id, "id")?;
    let outcome = run_blocking(&state, move |s| {
        DistributionEngine::new(&s.store, &s.config.engine, s.criteria.as_ref()).distribute(&query.id, Utc::now())
    })
    .await?;
    Ok(Json(outcome))
}

pub async fn sweep<T: SafeDatabase>(State(state): State<AppState<T>>) -> Result<Json<SweepReport>, ApiError> {
    let report = run_blocking(&state, |s| {
        Sweeper::new(&s.store, &s.config.engine, s.criteria.as_ref()).run_once(Utc::now())
    })
    .await?;
    Ok(Json(report))
}

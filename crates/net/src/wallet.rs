use crate::community::{run_blocking, ApiError};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use pledge_database::basic_db::SafeDatabase;
use pledge_service::parser::ledger::EarningEntry;
use pledge_service::wallet::{community_ledger, transaction_history, wallet_summary, CommunityLedger, WalletSummary};
use serde::{Deserialize, Serialize};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Deserialize)]
pub struct UserQuery {
    user: String,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    user: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct CommunityQuery {
    id: String,
}

#[derive(Serialize)]
pub struct TransactionsResponse {
    user_id: String,
    transactions: Vec<EarningEntry>,
}

pub async fn get_wallet<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<UserQuery>,
) -> Result<Json<WalletSummary>, ApiError> {
    if query.user.trim().is_empty() {
        return Err(ApiError::ValidationError("user cannot be empty".to_string()));
    }
    let summary = run_blocking(&state, move |s| wallet_summary(&s.store, &query.user)).await?;
    Ok(Json(summary))
}

pub async fn get_transactions<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    if query.user.trim().is_empty() {
        return Err(ApiError::ValidationError("user cannot be empty".to_string()));
    }
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
    let user_id = query.user.clone();
    let transactions = run_blocking(&state, move |s| transaction_history(&s.store, &query.user, limit)).await?;
    Ok(Json(TransactionsResponse { user_id, transactions }))
}

pub async fn get_community_ledger<T: SafeDatabase>(
    State(state): State<AppState<T>>,
    Query(query): Query<CommunityQuery>,
) -> Result<Json<CommunityLedger>, ApiError> {
    if query.id.trim().is_empty() {
        return Err(ApiError::ValidationError("id cannot be empty".to_string()));
    }
    let ledger = run_blocking(&state, move |s| community_ledger(&s.store, &query.id)).await?;
    Ok(Json(ledger))
}

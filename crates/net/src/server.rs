use crate::community::*;
use crate::router::*;
use crate::state::AppState;
use crate::wallet::*;
use axum::{http, Router};
use chrono::Utc;
use pledge_database::basic_db::SafeDatabase;
use pledge_service::sweeper::Sweeper;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub async fn build_server<T: SafeDatabase>(state: AppState<T>) -> std::io::Result<()> {
    let bind_addr = state.config.server.bind_addr.clone();
    let components = collect_components::<T>();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    let app = main_router(components, state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

/// Runs the sweeper every `every` until the runtime shuts down. A pass that
/// fails is logged and retried on the next tick.
pub fn spawn_sweeper<T: SafeDatabase>(state: AppState<T>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let pass_state = state.clone();
            let pass = tokio::task::spawn_blocking(move || {
                Sweeper::new(&pass_state.store, &pass_state.config.engine, pass_state.criteria.as_ref())
                    .run_once(Utc::now())
            })
            .await;

            match pass {
                Ok(Ok(report)) => debug!(
                    transitions = report.transitions.len(),
                    distributions = report.distributions.len(),
                    "Background sweep done"
                ),
                Ok(Err(err)) => warn!(error = %err, "Background sweep failed"),
                Err(err) => warn!(error = %err, "Background sweep panicked"),
            }
        }
    })
}

pub fn collect_components<T: SafeDatabase>() -> Vec<(String, Router<AppState<T>>)> {
    // 커뮤니티
    let router_community_post = post_router_builder("/api/community", save_community::<T>);
    let router_community_get = get_router_builder("/api/community", get_community_by_id::<T>);
    let router_community_get_all = get_router_builder("/api/communities", get_all_communities::<T>);

    // 참여 / 출석 / 진행도
    let router_join_post = post_router_builder("/api/community/join", join::<T>);
    let router_attendance_post = post_router_builder("/api/community/attendance", save_attendance::<T>);
    let router_progress_post = post_router_builder("/api/community/progress", save_daily_progress::<T>);
    let router_progress_get = get_router_builder("/api/community/progress", get_progress::<T>);
    let router_disqualify_post = post_router_builder("/api/community/disqualify", disqualify::<T>);
    let router_analytics_get = get_router_builder("/api/community/analytics", get_analytics::<T>);
    let router_history_get = get_router_builder("/api/community/analytics/history", get_analytics_history::<T>);

    // 정산
    let router_distribution_get = get_router_builder("/api/community/distribution", get_distribution::<T>);
    let router_distribute_post = post_router_builder("/api/community/distribute", distribute::<T>);
    let router_sweep_post = post_router_builder("/api/admin/sweep", sweep::<T>);

    // 지갑
    let router_wallet_get = get_router_builder("/api/wallet", get_wallet::<T>);
    let router_transactions_get = get_router_builder("/api/wallet/transactions", get_transactions::<T>);
    let router_ledger_get = get_router_builder("/api/community/ledger", get_community_ledger::<T>);

    vec![
        router_community_post,
        router_community_get,
        router_community_get_all,
        router_join_post,
        router_attendance_post,
        router_progress_post,
        router_progress_get,
        router_disqualify_post,
        router_analytics_get,
        router_history_get,
        router_distribution_get,
        router_distribute_post,
        router_sweep_post,
        router_wallet_get,
        router_transactions_get,
        router_ledger_get,
    ]
}

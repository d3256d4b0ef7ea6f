use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::Method;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use contracts::{
    AccountSummary, ApiError, DownlineSummary, ErrorCode, Investment, InvestmentDetail, JobKind,
    JobReport, ManualAccrualResult, PlanTerms, ProjectedReturn, SchedulerStatus, User,
    SCHEMA_VERSION_V1,
};
use ledger_core::{LedgerError, StoreError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::LedgerService;

include!("error.rs");
include!("state.rs");
include!("routes/plans.rs");
include!("routes/accounts.rs");
include!("routes/admin.rs");
include!("util.rs");

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn serve_with_shutdown(
    addr: SocketAddr,
    service: Arc<LedgerService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let app = router(AppState::new(service));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "ledger api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/plans", get(list_plans))
        .route("/api/v1/plans/quote", get(quote_plan))
        .route("/api/v1/plans/validate", get(validate_amount))
        .route("/api/v1/users", post(enroll_user))
        .route("/api/v1/users/{user_id}/summary", get(get_account_summary))
        .route("/api/v1/users/{user_id}/downline", get(get_downline))
        .route("/api/v1/investments", post(open_investment))
        .route("/api/v1/investments/{investment_id}", get(get_investment))
        .route(
            "/api/v1/investments/{investment_id}/mature",
            post(mature_investment),
        )
        .route("/api/v1/admin/accrual/trigger", post(trigger_accrual))
        .route("/api/v1/admin/jobs/{job}/trigger", post(trigger_job))
        .route("/api/v1/admin/scheduler/status", get(get_scheduler_status))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests;

use crate::api::{ApiResponse, state::AppState};
use axum::{Json, extract::State};
use chatdigest_core::DailyCycleReport;

// POST /api/daily-cycle
pub async fn run_daily_cycle(State(state): State<AppState>) -> Json<ApiResponse<DailyCycleReport>> {
    let report = state
        .core
        .registry
        .run_daily_cycle(state.notifier.as_ref())
        .await;

    if report.failed > 0 {
        let message = format!("{} of {} sessions failed to flush", report.failed, report.sessions);
        return Json(ApiResponse::rejected(report, message));
    }
    Json(ApiResponse::ok(report))
}

//! HTTP API for the Attendance Engine.
//!
//! A thin [`axum`] layer over [`AttendanceEngine`].  Engine calls do
//! blocking store work, so handlers run them on the blocking pool.
//! After every attendance write the downstream recalculation hook is
//! fired on a detached task; its failures are logged and never reach
//! the client.

use crate::config::EngineConfig;
use crate::engine::{AttendanceEngine, BatchReport, DayKey, DayOutcome, DownstreamRecalc, LogRecalc};
use crate::error::{AttendanceError, AttendanceResult};
use crate::models::{ConfusedShiftRecord, DailyAttendance, EmployeeId, PunchEvent, ShiftId};
use crate::store::{load_store_from_dir, AttendanceStore};
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Application state shared across requests.
pub struct AppState<S: AttendanceStore> {
    pub engine: Arc<AttendanceEngine<S>>,
    pub recalc: Arc<dyn DownstreamRecalc>,
}

impl<S: AttendanceStore> AppState<S> {
    pub fn new(engine: AttendanceEngine<S>, recalc: Arc<dyn DownstreamRecalc>) -> Self {
        Self {
            engine: Arc::new(engine),
            recalc,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Attendance(AttendanceError),
    Missing(String),
    Internal(String),
}

impl From<AttendanceError> for ApiError {
    fn from(err: AttendanceError) -> Self {
        ApiError::Attendance(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Attendance(err) if err.is_client_error() => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ApiError::Attendance(err) if err.is_not_found() => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::Attendance(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::Missing(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        if status.is_server_error() {
            warn!(%status, error = %message, "request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ReprocessRequest {
    pub pairs: Vec<DayKey>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    #[serde(default)]
    pub in_time: Option<DateTime<Utc>>,
    pub shift_id: ShiftId,
}

/// Runs an engine call on the blocking pool.
async fn run_engine<S, T, F>(state: &AppState<S>, call: F) -> std::result::Result<T, ApiError>
where
    S: AttendanceStore + 'static,
    T: Send + 'static,
    F: FnOnce(&AttendanceEngine<S>) -> AttendanceResult<T> + Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || call(&engine))
        .await
        .map_err(|err| ApiError::Internal(format!("engine task failed: {err}")))?
        .map_err(ApiError::from)
}

fn notify_downstream<S: AttendanceStore>(state: &AppState<S>, attendance: Vec<DailyAttendance>) {
    if attendance.is_empty() {
        return;
    }
    let recalc = state.recalc.clone();
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || {
            for day in &attendance {
                if let Err(err) = recalc.attendance_changed(day) {
                    warn!(
                        employee_id = %day.employee_id,
                        date = %day.date,
                        error = %err,
                        "downstream recalculation failed"
                    );
                }
            }
        })
        .await;
        if let Err(err) = result {
            warn!(error = %err, "downstream recalculation task panicked");
        }
    });
}

/// Handler for POST /api/attendance/process
pub async fn process_handler<S: AttendanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<ProcessRequest>,
) -> ApiResult<DayOutcome> {
    let outcome = run_engine(&state, move |engine| {
        engine.process_day(&request.employee_id, request.date)
    })
    .await?;
    notify_downstream(&state, vec![outcome.attendance.clone()]);
    Ok(Json(outcome))
}

/// Handler for POST /api/attendance/reprocess
pub async fn reprocess_handler<S: AttendanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<ReprocessRequest>,
) -> ApiResult<BatchReport> {
    let (report, written) = run_engine(&state, move |engine| {
        let report = engine.reprocess(&request.pairs);
        let mut written = Vec::new();
        for key in &request.pairs {
            let failed = report
                .failed
                .iter()
                .any(|f| f.employee_id == key.employee_id && f.date == key.date);
            if failed {
                continue;
            }
            if let Some(day) = engine.store().attendance(&key.employee_id, key.date)? {
                written.push(day);
            }
        }
        Ok((report, written))
    })
    .await?;
    notify_downstream(&state, written);
    Ok(Json(report))
}

/// Handler for GET /api/attendance/:employee_id/:date
pub async fn attendance_handler<S: AttendanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((employee_id, date)): Path<(EmployeeId, NaiveDate)>,
) -> ApiResult<DailyAttendance> {
    let lookup_id = employee_id.clone();
    let attendance = run_engine(&state, move |engine| {
        engine.store().attendance(&lookup_id, date)
    })
    .await?;
    attendance
        .map(Json)
        .ok_or_else(|| ApiError::Missing(format!("no attendance for {employee_id} on {date}")))
}

/// Handler for POST /api/punches
pub async fn punch_handler<S: AttendanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(punch): Json<PunchEvent>,
) -> ApiResult<Vec<DayOutcome>> {
    let outcomes = run_engine(&state, move |engine| engine.record_punch(punch)).await?;
    notify_downstream(
        &state,
        outcomes.iter().map(|o| o.attendance.clone()).collect(),
    );
    Ok(Json(outcomes))
}

/// Handler for GET /api/confused/:employee_id/:date
pub async fn confused_handler<S: AttendanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((employee_id, date)): Path<(EmployeeId, NaiveDate)>,
) -> ApiResult<Vec<ConfusedShiftRecord>> {
    let records = run_engine(&state, move |engine| {
        engine.store().confused_records(&employee_id, date)
    })
    .await?;
    Ok(Json(records))
}

/// Handler for POST /api/confused/resolve
pub async fn resolve_handler<S: AttendanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<DayOutcome> {
    let in_time = request.in_time.ok_or_else(|| AttendanceError::Input {
        employee_id: request.employee_id.clone(),
        date: request.date,
    })?;
    let outcome = run_engine(&state, move |engine| {
        engine.resolve_confused(&request.employee_id, request.date, in_time, &request.shift_id)
    })
    .await?;
    notify_downstream(&state, vec![outcome.attendance.clone()]);
    Ok(Json(outcome))
}

pub fn build_router<S: AttendanceStore + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/api/attendance/process", post(process_handler::<S>))
        .route("/api/attendance/reprocess", post(reprocess_handler::<S>))
        .route(
            "/api/attendance/:employee_id/:date",
            get(attendance_handler::<S>),
        )
        .route("/api/punches", post(punch_handler::<S>))
        .route("/api/confused/:employee_id/:date", get(confused_handler::<S>))
        .route("/api/confused/resolve", post(resolve_handler::<S>))
        .with_state(state)
}

/// Loads reference data from `config.data_dir`, builds the engine and
/// serves the API on `config.bind_addr` until the server stops.
pub async fn serve(config: EngineConfig) -> Result<()> {
    let store = load_store_from_dir(&config.data_dir)?;
    let addr = config.bind_addr.clone();
    let engine = AttendanceEngine::new(Arc::new(store), config)?;
    let state = Arc::new(AppState::new(engine, Arc::new(LogRecalc)));
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "attendance engine listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DayStatus, Direction};
    use crate::store::InMemoryStore;
    use crate::test_support::{at, day, employee, punch, shift, store_with_shifts};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRecalc {
        calls: AtomicUsize,
    }

    impl DownstreamRecalc for CountingRecalc {
        fn attendance_changed(&self, _attendance: &DailyAttendance) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("payroll service unavailable")
        }
    }

    fn state(recalc: Arc<dyn DownstreamRecalc>) -> Arc<AppState<InMemoryStore>> {
        let store = store_with_shifts(vec![shift("GEN", "09:00", "18:00")]);
        store.add_employee(employee("E1")).unwrap();
        let engine = AttendanceEngine::new(Arc::new(store), EngineConfig::default()).unwrap();
        Arc::new(AppState::new(engine, recalc))
    }

    #[tokio::test]
    async fn test_punch_webhook_processes_the_day() {
        let state = state(Arc::new(LogRecalc));
        punch_handler(
            State(state.clone()),
            Json(punch("2024-03-01", "09:05", Direction::In)),
        )
        .await
        .unwrap();
        let Json(outcomes) = punch_handler(
            State(state.clone()),
            Json(punch("2024-03-01", "18:00", Direction::Out)),
        )
        .await
        .unwrap();
        assert_eq!(outcomes.last().map(|o| o.attendance.status), Some(DayStatus::Present));

        let Json(stored) = attendance_handler(
            State(state.clone()),
            Path(("E1".to_string(), day("2024-03-01"))),
        )
        .await
        .unwrap();
        assert_eq!(stored.segments.len(), 1);
        assert_eq!(stored.segments[0].shift_id.as_deref(), Some("GEN"));
    }

    #[tokio::test]
    async fn test_missing_attendance_is_not_found() {
        let state = state(Arc::new(LogRecalc));
        let err = attendance_handler(State(state), Path(("E1".to_string(), day("2024-03-01"))))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_employee_is_not_found() {
        let state = state(Arc::new(LogRecalc));
        let err = process_handler(
            State(state),
            Json(ProcessRequest {
                employee_id: "GHOST".into(),
                date: day("2024-03-01"),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resolve_without_in_time_is_bad_request() {
        let state = state(Arc::new(LogRecalc));
        let err = resolve_handler(
            State(state),
            Json(ResolveRequest {
                employee_id: "E1".into(),
                date: day("2024-03-01"),
                in_time: None,
                shift_id: "GEN".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_resolve_unknown_record_is_not_found() {
        let state = state(Arc::new(LogRecalc));
        let err = resolve_handler(
            State(state),
            Json(ResolveRequest {
                employee_id: "E1".into(),
                date: day("2024-03-01"),
                in_time: Some(at("2024-03-01", "09:30")),
                shift_id: "GEN".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_downstream_failure_does_not_fail_request() {
        let recalc = Arc::new(CountingRecalc::default());
        let state = state(recalc.clone());
        let Json(outcome) = process_handler(
            State(state.clone()),
            Json(ProcessRequest {
                employee_id: "E1".into(),
                date: day("2024-03-01"),
            }),
        )
        .await
        .unwrap();
        assert_eq!(outcome.attendance.status, DayStatus::Absent);

        for _ in 0..50 {
            if recalc.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(recalc.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_reports_failures() {
        let state = state(Arc::new(LogRecalc));
        let Json(report) = reprocess_handler(
            State(state),
            Json(ReprocessRequest {
                pairs: vec![
                    DayKey::new("E1", day("2024-03-01")),
                    DayKey::new("GHOST", day("2024-03-01")),
                ],
            }),
        )
        .await
        .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_confused_list_is_empty_for_clean_day() {
        let state = state(Arc::new(LogRecalc));
        let Json(records) = confused_handler(State(state), Path(("E1".to_string(), day("2024-03-01"))))
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}

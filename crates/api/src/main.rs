use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use sayitownit_core::domain::expert::{ExpertMetrics, MetricsHistoryPoint};
use sayitownit_core::domain::recommendation::{
    FlagReason, Outcome, Recommendation, RecommendationEdit,
};
use sayitownit_core::outcome::runner::{process_all_active_recommendations, OutcomeRunSummary};
use sayitownit_core::review::workflow::{self, FlagCheck, FlagStats, RecommendationNotFound, ValidationSummary};
use sayitownit_core::simulation::{ExpertNotFound, SavedSimulation, SimulationParams, SimulationResult};
use sayitownit_core::storage::lock::with_job_lock;
use sayitownit_core::storage::{ExpertStore, PgStore, RecommendationStore, SimulationStore};

const DEFAULT_LEADERBOARD_LIMIT: i64 = 50;
const DEFAULT_HISTORY_DAYS: i64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = sayitownit_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();
    let store: Option<PgStore> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match sayitownit_core::storage::migrate(&pool).await {
                Ok(()) => Some(PgStore::new(pool)),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    if settings.admin_api_token.is_none() {
        tracing::warn!("ADMIN_API_TOKEN not set; admin routes are disabled");
    }

    let state = AppState {
        store,
        admin_token: settings.admin_api_token.clone(),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/leaderboard", get(get_leaderboard))
        .route("/experts/:name/metrics", get(get_expert_metrics))
        .route("/experts/:name/metrics/history", get(get_metrics_history))
        .route("/recommendations/flagged", get(get_flagged))
        .route("/recommendations/:id/outcome", get(get_outcome))
        .route("/simulations/run", post(run_simulation))
        .route("/simulations/:id", get(get_simulation))
        .route("/admin/jobs/outcomes", post(admin_run_outcomes))
        .route("/admin/jobs/metrics", post(admin_run_metrics))
        .route("/admin/recommendations/validate", post(admin_validate_all))
        .route("/admin/recommendations/flag-stats", get(admin_flag_stats))
        .route("/admin/recommendations/:id/approve", post(admin_approve))
        .route("/admin/recommendations/:id", patch(admin_edit))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    store: Option<PgStore>,
    admin_token: Option<String>,
}

impl AppState {
    fn store(&self) -> Result<&PgStore, StatusCode> {
        self.store.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }

    fn require_admin(&self, headers: &HeaderMap) -> Result<&PgStore, StatusCode> {
        let Some(expected) = self.admin_token.as_deref() else {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        };
        let given = headers
            .get("x-admin-token")
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;
        if given != expected {
            return Err(StatusCode::UNAUTHORIZED);
        }
        self.store()
    }
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %format!("{e:#}"), "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn review_error(e: anyhow::Error) -> StatusCode {
    if e.downcast_ref::<RecommendationNotFound>().is_some() {
        StatusCode::NOT_FOUND
    } else {
        internal(e)
    }
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    limit: Option<i64>,
}

async fn get_leaderboard(
    State(state): State<AppState>,
    Query(q): Query<LeaderboardQuery>,
) -> Result<Json<Vec<ExpertMetrics>>, StatusCode> {
    let store = state.store()?;
    let limit = q.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT).clamp(1, 500);
    let board = store.leaderboard(limit).await.map_err(internal)?;
    Ok(Json(board))
}

async fn get_expert_metrics(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ExpertMetrics>, StatusCode> {
    let store = state.store()?;
    let metrics = store
        .latest_metrics(&name)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(metrics))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    days: Option<i64>,
}

async fn get_metrics_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<MetricsHistoryPoint>>, StatusCode> {
    let store = state.store()?;
    let days = q.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    if !(1..=3650).contains(&days) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let since = Utc::now().date_naive() - Duration::days(days);
    let history = store.metrics_history(&name, since).await.map_err(internal)?;
    Ok(Json(history))
}

#[derive(Debug, Serialize)]
struct FlagView {
    code: FlagReason,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct FlaggedRecommendation {
    #[serde(flatten)]
    recommendation: Recommendation,
    flags: Vec<FlagView>,
}

async fn get_flagged(
    State(state): State<AppState>,
) -> Result<Json<Vec<FlaggedRecommendation>>, StatusCode> {
    let store = state.store()?;
    let flagged = store.list_flagged().await.map_err(internal)?;
    Ok(Json(
        flagged
            .into_iter()
            .map(|recommendation| FlaggedRecommendation {
                flags: recommendation
                    .flag_reasons
                    .iter()
                    .map(|r| FlagView {
                        code: *r,
                        message: r.message(),
                    })
                    .collect(),
                recommendation,
            })
            .collect(),
    ))
}

async fn get_outcome(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Outcome>, StatusCode> {
    let store = state.store()?;
    let outcome = store
        .get_outcome(id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct SimulationRequest {
    #[serde(flatten)]
    params: SimulationParams,
    /// When set, the result is stored under this user.
    #[serde(default)]
    save_for_user: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct SimulationResponse {
    simulation_id: Option<Uuid>,
    #[serde(flatten)]
    result: SimulationResult,
}

async fn run_simulation(
    State(state): State<AppState>,
    Json(req): Json<SimulationRequest>,
) -> Result<Json<SimulationResponse>, StatusCode> {
    let store = state.store()?;
    if let Err(e) = req.params.validate() {
        tracing::info!(error = %e, "rejected simulation request");
        return Err(StatusCode::BAD_REQUEST);
    }

    let result = sayitownit_core::simulation::run_simulation(store, store, &req.params)
        .await
        .map_err(|e| {
            if e.downcast_ref::<ExpertNotFound>().is_some() {
                StatusCode::NOT_FOUND
            } else {
                internal(e)
            }
        })?;

    let simulation_id = match req.save_for_user {
        Some(user_id) => Some(
            store
                .save_simulation(user_id, &result)
                .await
                .map_err(internal)?,
        ),
        None => None,
    };

    Ok(Json(SimulationResponse {
        simulation_id,
        result,
    }))
}

async fn get_simulation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SavedSimulation>, StatusCode> {
    let store = state.store()?;
    let saved = store
        .get_simulation(id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(saved))
}

// Admin triggers call the same functions as the worker and honour the same job locks.

async fn admin_run_outcomes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OutcomeRunSummary>, StatusCode> {
    let store = state.require_admin(&headers)?.clone();
    let today = Utc::now().date_naive();
    locked(store, "outcomes", today, |store| async move {
        process_all_active_recommendations(&store, &store).await
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
struct MetricsJobQuery {
    as_of_date: Option<NaiveDate>,
}

async fn admin_run_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<MetricsJobQuery>,
) -> Result<Json<Vec<ExpertMetrics>>, StatusCode> {
    let store = state.require_admin(&headers)?.clone();
    let as_of = q.as_of_date.unwrap_or_else(|| Utc::now().date_naive());
    locked(store, "metrics", as_of, move |store| async move {
        sayitownit_core::metrics::calculate_all_expert_metrics(&store, &store, as_of).await
    })
    .await
    .map(Json)
}

/// Runs a batch job under its (job, date) lock on a detached task. Axum drops the handler
/// future when the client disconnects; the task keeps going and releases the lock itself.
async fn locked<T, F, Fut>(
    store: PgStore,
    job: &'static str,
    as_of: NaiveDate,
    f: F,
) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(PgStore) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let pool = store.pool().clone();
        with_job_lock(&pool, job, as_of, || f(store)).await
    });

    match task.await {
        Ok(Ok(Some(out))) => Ok(out),
        Ok(Ok(None)) => Err(StatusCode::CONFLICT),
        Ok(Err(e)) => Err(internal(e)),
        Err(join_err) => Err(internal(
            anyhow::Error::new(join_err).context(format!("{job} job task failed")),
        )),
    }
}

async fn admin_validate_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ValidationSummary>, StatusCode> {
    let store = state.require_admin(&headers)?;
    let summary = workflow::validate_all(store).await.map_err(internal)?;
    Ok(Json(summary))
}

async fn admin_flag_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FlagStats>, StatusCode> {
    let store = state.require_admin(&headers)?;
    let all = store.list_all().await.map_err(internal)?;
    Ok(Json(workflow::flag_stats(&all)))
}

#[derive(Debug, Default, Deserialize)]
struct ApproveRequest {
    #[serde(default)]
    notes: Option<String>,
}

async fn admin_approve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Option<Json<ApproveRequest>>,
) -> Result<StatusCode, StatusCode> {
    let store = state.require_admin(&headers)?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    workflow::approve(store, id, req.notes.as_deref())
        .await
        .map_err(review_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct EditRequest {
    #[serde(flatten)]
    edit: RecommendationEdit,
    #[serde(default)]
    notes: Option<String>,
}

async fn admin_edit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<EditRequest>,
) -> Result<Json<FlagCheck>, StatusCode> {
    let store = state.require_admin(&headers)?;
    for v in [
        req.edit.recommended_price,
        req.edit.target_price,
        req.edit.stop_loss,
    ]
    .into_iter()
    .flatten()
    {
        if !(v.is_finite() && v > 0.0) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    let check = workflow::edit(store, id, &req.edit, req.notes.as_deref())
        .await
        .map_err(review_error)?;
    Ok(Json(check))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &sayitownit_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

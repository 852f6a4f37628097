mod analysis;
mod extract;
mod http;
mod idempotency;
mod jobs;
mod llm;
mod metrics;
mod models;
mod normalize;
mod pipeline;
mod prompts;
mod security;
mod store;

use axum::{
    Json, Router,
    extract::{Extension, Multipart, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::Utc;
use llm::InlineImage;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AnalyzeResponse, ApiError, AuthResponse, DashboardResponse, GuestResponse, ItemView,
    LoginRequest, RegisterRequest, SoldRequest, StageRequest, StageResponse, UserProfile,
};
use pipeline::{AnalyzeInput, Pipeline, PipelineError, PipelineErrorKind};
use prompts::AnalysisStage;
use security::{AuthContext, AuthState, IdentityKind, require_auth};
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::{net::SocketAddr, sync::Arc, time::Instant};
use store::{ItemUpdate, ListingDetails, StoreError, UserRecord};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "c2c.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let pipeline = Pipeline::from_env();
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let openapi: serde_json::Value =
        serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());
    let state = AppState {
        pipeline,
        queue,
        auth: auth_state.clone(),
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(idempotency::ReplayCache::from_env())),
        prometheus_handle,
        redis,
    };

    let cors = cors_from_env();

    let protected = Router::new()
        .route("/analyze", post(analyze))
        .route("/scanned-items", get(list_items))
        .route("/scanned-items/{id}", get(get_item))
        .route("/scanned-items/{id}", put(update_item))
        .route("/scanned-items/{id}", delete(delete_item))
        .route("/scanned-items/{id}/list", post(mark_listed))
        .route("/scanned-items/{id}/sold", post(mark_sold))
        .route("/profile", get(profile))
        .route("/dashboard", get(dashboard))
        .nest(
            "/stages",
            Router::new()
                .route("/identify", post(stage_identify))
                .route("/price", post(stage_price))
                .route("/history", post(stage_history))
                .route("/prediction", post(stage_prediction))
                .route("/impact", post(stage_impact))
                .route("/suggestions", post(stage_suggestions)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/analyze", post(enqueue_batch))
                .route("/{id}", get(get_job_status)),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/guest", post(guest))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "c2c.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    auth: AuthState,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<idempotency::ReplayCache>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "clutter2cash-api",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Unauthorized("docs key required"));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Clutter2Cash API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

// -------- Auth --------

/// Create an account and mint a user token.
///
/// - Method: `POST`
/// - Path: `/register`
/// - Auth: none, but an `Authorization: Bearer <guest token>` header makes
///   this call adopt the guest's scanned items.
async fn register(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    metrics::inc_requests("/register");
    let name = payload.name.trim().to_string();
    let email = payload.email.trim().to_lowercase();
    if name.is_empty() || !email.contains('@') {
        return Err(AppError::validation("provide a name and a valid email"));
    }
    if payload.password.len() < 6 {
        return Err(AppError::validation(
            "password must be at least 6 characters",
        ));
    }

    let password_hash = security::hash_password(payload.password)
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?;
    let user = UserRecord {
        id: Uuid::new_v4(),
        name,
        email,
        password_hash,
        created_at: Utc::now(),
    };
    state.pipeline.store.create_user(user.clone()).await?;

    let token = state
        .auth
        .signer()
        .issue_user(user.id)
        .map_err(|err| AppError::Internal(err.to_string()))?;

    let migrated = match state.auth.context_from_headers(&headers) {
        Some(guest) if guest.is_guest() => {
            let target = format!("user:{}", user.id);
            match state
                .pipeline
                .store
                .migrate_owner(&guest.owner_id(), &target)
                .await
            {
                Ok(count) => Some(count),
                Err(err) => {
                    warn!(
                        target = "c2c.auth",
                        user_id = %user.id,
                        error = %err,
                        "guest_migration_failed"
                    );
                    None
                }
            }
        }
        _ => None,
    };

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
            migrated,
        }),
    ))
}

/// - Method: `POST`
/// - Path: `/login`
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    metrics::inc_requests("/login");
    let email = payload.email.trim().to_lowercase();
    let Some(user) = state.pipeline.store.find_user_by_email(&email).await? else {
        return Err(AppError::Unauthorized("invalid email or password"));
    };
    let valid = security::verify_password(payload.password, user.password_hash.clone())
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?;
    if !valid {
        return Err(AppError::Unauthorized("invalid email or password"));
    }
    let token = state
        .auth
        .signer()
        .issue_user(user.id)
        .map_err(|err| AppError::Internal(err.to_string()))?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
        migrated: None,
    }))
}

/// Mint an anonymous guest identity so scanning works before signup.
///
/// - Method: `POST`
/// - Path: `/guest`
async fn guest(State(state): State<AppState>) -> Result<Json<GuestResponse>, AppError> {
    metrics::inc_requests("/guest");
    let (guest_id, token) = state
        .auth
        .signer()
        .issue_guest()
        .map_err(|err| AppError::Internal(err.to_string()))?;
    Ok(Json(GuestResponse { token, guest_id }))
}

// -------- Analysis --------

/// Run the full photo-to-valuation pipeline and persist the result.
///
/// - Method: `POST`
/// - Path: `/analyze`
/// - Body: multipart with an optional `image` file part and an optional
///   `description` text part (at least one required)
/// - Honors `Idempotency-Key`
async fn analyze(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: axum::http::HeaderMap,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, AppError> {
    metrics::inc_requests("/analyze");
    let owner = context.owner_id();
    info!(target = "c2c.api", owner = %owner, "analysis requested");

    let input = read_analyze_input(multipart).await?;

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        // scoped per identity so keys cannot replay across accounts
        let cache_key = format!("{owner}:{key}");
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &cache_key).await {
                return Ok(Json(existing));
            }
            let response = run_analysis(&state, input, &context).await?;
            let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(3600);
            idempotency::redis_set(client, &cache_key, &response, ttl).await;
            return Ok(Json(response));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&cache_key) {
            return Ok(Json(existing));
        }
        let response = run_analysis(&state, input, &context).await?;
        state
            .idempotency
            .lock()
            .await
            .insert(cache_key, response.clone());
        return Ok(Json(response));
    }

    let response = run_analysis(&state, input, &context).await?;
    Ok(Json(response))
}

async fn run_analysis(
    state: &AppState,
    input: AnalyzeInput,
    context: &AuthContext,
) -> Result<AnalyzeResponse, AppError> {
    let outcome = state.pipeline.run(input, &context.owner_id()).await?;
    Ok(AnalyzeResponse::from_outcome(outcome, context.is_guest()))
}

/// Pulls the description text and image out of the multipart body. The image
/// is spooled through a temp file that is removed when the handle drops, on
/// success and error paths alike.
async fn read_analyze_input(mut multipart: Multipart) -> Result<AnalyzeInput, AppError> {
    let mut input = AnalyzeInput::default();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::validation(err.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("description") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::validation(err.to_string()))?;
                if !text.trim().is_empty() {
                    input.description = Some(text);
                }
            }
            Some("image") => {
                let filename = field.file_name().unwrap_or("upload.jpg").to_string();
                let mut spool = NamedTempFile::new()
                    .map_err(|err| AppError::Internal(err.to_string()))?;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|err| AppError::validation(err.to_string()))?
                {
                    spool
                        .write_all(&chunk)
                        .map_err(|err| AppError::Internal(err.to_string()))?;
                }
                let bytes = std::fs::read(spool.path())
                    .map_err(|err| AppError::Internal(err.to_string()))?;
                if bytes.is_empty() {
                    return Err(AppError::validation("uploaded image is empty"));
                }
                input.image = Some(InlineImage::from_bytes(&filename, &bytes));
            }
            _ => {}
        }
    }
    Ok(input)
}

// -------- Scanned items --------

async fn list_items(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<ItemView>>, AppError> {
    metrics::inc_requests("/scanned-items");
    let items = state.pipeline.store.list_items(&context.owner_id()).await?;
    Ok(Json(items.into_iter().map(ItemView::from).collect()))
}

async fn get_item(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ItemView>, AppError> {
    let record = state.pipeline.store.get_item(&context.owner_id(), id).await?;
    Ok(Json(record.into()))
}

async fn update_item(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(update): Json<ItemUpdate>,
) -> Result<Json<ItemView>, AppError> {
    let record = state
        .pipeline
        .store
        .update_item(&context.owner_id(), id, update)
        .await?;
    Ok(Json(record.into()))
}

async fn delete_item(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .pipeline
        .store
        .delete_item(&context.owner_id(), id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_listed(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(listing): Json<ListingDetails>,
) -> Result<Json<ItemView>, AppError> {
    if !listing.price.is_finite() || listing.price <= 0.0 {
        return Err(AppError::validation("listing price must be positive"));
    }
    let record = state
        .pipeline
        .store
        .mark_listed(&context.owner_id(), id, listing)
        .await?;
    Ok(Json(record.into()))
}

async fn mark_sold(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SoldRequest>,
) -> Result<Json<ItemView>, AppError> {
    let record = state
        .pipeline
        .store
        .mark_sold(&context.owner_id(), id, payload.sold_price)
        .await?;
    Ok(Json(record.into()))
}

// -------- Profile and dashboard --------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    user: Option<UserProfile>,
    is_guest: bool,
    totals: store::OwnerTotals,
}

async fn profile(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<ProfileResponse>, AppError> {
    metrics::inc_requests("/profile");
    let user = match context.kind {
        IdentityKind::User => {
            let id = Uuid::parse_str(&context.subject)
                .map_err(|err| AppError::Internal(err.to_string()))?;
            state
                .pipeline
                .store
                .find_user(id)
                .await?
                .map(UserProfile::from)
        }
        IdentityKind::Guest => None,
    };
    let totals = state.pipeline.store.owner_totals(&context.owner_id()).await?;
    Ok(Json(ProfileResponse {
        user,
        is_guest: context.is_guest(),
        totals,
    }))
}

async fn dashboard(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<DashboardResponse>, AppError> {
    metrics::inc_requests("/dashboard");
    let owner = context.owner_id();
    let (totals, categories, recent) = tokio::try_join!(
        state.pipeline.store.owner_totals(&owner),
        state.pipeline.store.category_rollups(&owner),
        state.pipeline.store.recent_items(&owner, 5),
    )?;
    Ok(Json(DashboardResponse {
        totals,
        categories,
        recent: recent.into_iter().map(ItemView::from).collect(),
    }))
}

// -------- Granular stage endpoints --------

async fn stage_identify(
    State(state): State<AppState>,
    Json(payload): Json<StageRequest>,
) -> Result<Json<StageResponse>, AppError> {
    run_stage_endpoint(&state, AnalysisStage::Identify, payload).await
}

async fn stage_price(
    State(state): State<AppState>,
    Json(payload): Json<StageRequest>,
) -> Result<Json<StageResponse>, AppError> {
    run_stage_endpoint(&state, AnalysisStage::CurrentPrice, payload).await
}

async fn stage_history(
    State(state): State<AppState>,
    Json(payload): Json<StageRequest>,
) -> Result<Json<StageResponse>, AppError> {
    run_stage_endpoint(&state, AnalysisStage::PriceHistory, payload).await
}

async fn stage_prediction(
    State(state): State<AppState>,
    Json(payload): Json<StageRequest>,
) -> Result<Json<StageResponse>, AppError> {
    run_stage_endpoint(&state, AnalysisStage::Prediction, payload).await
}

async fn stage_impact(
    State(state): State<AppState>,
    Json(payload): Json<StageRequest>,
) -> Result<Json<StageResponse>, AppError> {
    run_stage_endpoint(&state, AnalysisStage::Impact, payload).await
}

async fn stage_suggestions(
    State(state): State<AppState>,
    Json(payload): Json<StageRequest>,
) -> Result<Json<StageResponse>, AppError> {
    run_stage_endpoint(&state, AnalysisStage::Suggestions, payload).await
}

async fn run_stage_endpoint(
    state: &AppState,
    stage: AnalysisStage,
    payload: StageRequest,
) -> Result<Json<StageResponse>, AppError> {
    metrics::inc_requests("/stages");
    let started = Instant::now();
    let inputs = payload.prompt_inputs();
    let outcome = state.pipeline.run_stage(stage, &inputs, None).await?;
    let elapsed_ms = started.elapsed().as_millis();
    metrics::stage_elapsed(stage.name(), elapsed_ms);
    Ok(Json(StageResponse {
        stage: stage.name(),
        elapsed_ms,
        output: outcome.output,
    }))
}

// -------- Jobs --------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueResponse {
    job_id: String,
}

const MAX_BATCH_ITEMS: usize = 10;

async fn enqueue_batch(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<jobs::BatchAnalyzeRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    metrics::inc_requests("/jobs/analyze");
    if payload.items.is_empty() {
        return Err(AppError::validation("batch contains no items"));
    }
    if payload.items.len() > MAX_BATCH_ITEMS {
        return Err(AppError::validation("batch exceeds the item limit"));
    }
    if payload
        .items
        .iter()
        .any(|item| item.description.trim().is_empty())
    {
        return Err(AppError::validation("every batch item needs a description"));
    }
    let id = state
        .queue
        .enqueue_batch(payload, context)
        .await
        .map_err(|err| AppError::Internal(err.error))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return Err(AppError::validation("invalid job id"));
    };
    match state.queue.get(&context.owner_id(), uuid).await {
        Some(info) => Ok(Json(info)),
        None => Err(AppError::Store(StoreError::NotFound)),
    }
}

// -------- Error mapping --------

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Store(StoreError),
    Validation(String),
    Unauthorized(&'static str),
    Internal(String),
}

impl AppError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, detail) = match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput | PipelineErrorKind::Sequencing => {
                        StatusCode::BAD_REQUEST
                    }
                    PipelineErrorKind::ResponseParse => StatusCode::UNPROCESSABLE_ENTITY,
                    PipelineErrorKind::ModelUnavailable => StatusCode::BAD_GATEWAY,
                    PipelineErrorKind::Persistence | PipelineErrorKind::Internal => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.stage().to_string(), err.detail().to_string())
            }
            AppError::Store(err) => {
                let (status, code) = match &err {
                    StoreError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                    StoreError::EmailTaken => (StatusCode::CONFLICT, "email_taken"),
                    StoreError::IllegalTransition { .. } => {
                        (StatusCode::CONFLICT, "illegal_transition")
                    }
                    StoreError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
                };
                (status, code.to_string(), err.to_string())
            }
            AppError::Validation(message) => {
                (StatusCode::BAD_REQUEST, "validation".to_string(), message)
            }
            AppError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".to_string(),
                message.to_string(),
            ),
            AppError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal".to_string(),
                message,
            ),
        };
        let payload = ApiError {
            error: code,
            detail: if is_production() { None } else { Some(detail) },
        };
        (status, Json(payload)).into_response()
    }
}

fn is_production() -> bool {
    std::env::var("APP_ENV")
        .map(|value| value.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

fn cors_from_env() -> CorsLayer {
    match std::env::var("CORS_ALLOWED_ORIGINS") {
        Ok(raw) if !raw.trim().is_empty() && raw.trim() != "*" => {
            let origins: Vec<axum::http::HeaderValue> = raw
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods(Any)
                .allow_origin(origins)
        }
        _ => CorsLayer::new()
            .allow_headers(Any)
            .allow_methods(Any)
            .allow_origin(Any),
    }
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(10 * 1024 * 1024)
}

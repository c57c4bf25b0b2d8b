use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::discovery::DiscoveryError;
use crate::discovery::DiscoveryState;
use crate::onboarding::Action;
use crate::onboarding::Onboarding;
use crate::onboarding::OnboardingError;
use crate::onboarding::Step;
use crate::store::Device;
use crate::store::DeviceId;
use crate::store::Entity;
use crate::store::EntityMetadata;
use crate::store::Store;
use crate::store::StoreError;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Snapshot of the onboarding session as the UI renders it
#[derive(Debug, Serialize, Deserialize)]
pub struct OnboardingView {
    pub step: Step,
    pub name: String,
    pub address: String,
    pub can_submit: bool,
    pub discovery: Option<DiscoveryState>,
    pub actions: Vec<Action>,
    pub device: Option<DeviceId>,
    pub entities: Vec<Entity>,
}

impl OnboardingView {
    fn of(onboarding: &Onboarding) -> Result<Self, ApiError> {
        Ok(Self {
            step: onboarding.step(),
            name: onboarding.name().to_string(),
            address: onboarding.address().to_string(),
            can_submit: onboarding.can_submit(),
            discovery: onboarding.discovery_state(),
            actions: onboarding.legal_actions(),
            device: onboarding.device(),
            entities: onboarding.entities()?,
        })
    }
}

/// Request body for POST /v1/onboarding/device
#[derive(Debug, Deserialize)]
struct DeviceDetails {
    name: String,
    address: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Onboarding(#[from] OnboardingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        let store_status = |e: &StoreError| match e {
            StoreError::UnknownDevice(_) | StoreError::UnknownEntity { .. } => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match self {
            ApiError::Onboarding(OnboardingError::IllegalAction { .. })
            | ApiError::Onboarding(OnboardingError::Transition(_)) => StatusCode::CONFLICT,
            ApiError::Onboarding(OnboardingError::Discovery(DiscoveryError::InvalidAddress)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Onboarding(OnboardingError::Discovery(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Onboarding(OnboardingError::UnknownEntity(_)) => StatusCode::NOT_FOUND,
            ApiError::Onboarding(OnboardingError::Store(e)) | ApiError::Store(e) => store_status(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Shared application state
pub struct AppState {
    version: &'static str,
    onboarding: Mutex<Onboarding>,
    store: Arc<dyn Store>,
}

impl AppState {
    pub fn new(onboarding: Onboarding, store: Arc<dyn Store>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            onboarding: Mutex::new(onboarding),
            store,
        }
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

#[tracing::instrument(skip(state))]
async fn onboarding_view(State(state): State<Arc<AppState>>) -> ApiResult<OnboardingView> {
    let onboarding = state.onboarding.lock().await;
    Ok(Json(OnboardingView::of(&onboarding)?))
}

#[tracing::instrument(skip(state))]
async fn begin(State(state): State<Arc<AppState>>) -> ApiResult<OnboardingView> {
    let mut onboarding = state.onboarding.lock().await;
    onboarding.begin()?;
    Ok(Json(OnboardingView::of(&onboarding)?))
}

#[tracing::instrument(skip(state))]
async fn submit_device(
    State(state): State<Arc<AppState>>,
    Json(details): Json<DeviceDetails>,
) -> ApiResult<OnboardingView> {
    let mut onboarding = state.onboarding.lock().await;
    onboarding.set_name(details.name)?;
    onboarding.set_address(details.address)?;
    onboarding.submit()?;
    Ok(Json(OnboardingView::of(&onboarding)?))
}

#[tracing::instrument(skip(state))]
async fn retry(State(state): State<Arc<AppState>>) -> ApiResult<OnboardingView> {
    let mut onboarding = state.onboarding.lock().await;
    onboarding.retry()?;
    Ok(Json(OnboardingView::of(&onboarding)?))
}

#[tracing::instrument(skip(state))]
async fn skip(State(state): State<Arc<AppState>>) -> ApiResult<OnboardingView> {
    let mut onboarding = state.onboarding.lock().await;
    onboarding.skip()?;
    Ok(Json(OnboardingView::of(&onboarding)?))
}

#[tracing::instrument(skip(state))]
async fn continue_to_entities(State(state): State<Arc<AppState>>) -> ApiResult<OnboardingView> {
    let mut onboarding = state.onboarding.lock().await;
    onboarding.continue_to_entities()?;
    Ok(Json(OnboardingView::of(&onboarding)?))
}

#[tracing::instrument(skip(state))]
async fn edit_entity(
    State(state): State<Arc<AppState>>,
    Path(internal_name): Path<String>,
    Json(metadata): Json<EntityMetadata>,
) -> ApiResult<OnboardingView> {
    let mut onboarding = state.onboarding.lock().await;
    onboarding.edit_entity(&internal_name, metadata)?;
    Ok(Json(OnboardingView::of(&onboarding)?))
}

#[tracing::instrument(skip(state))]
async fn finish(State(state): State<Arc<AppState>>) -> ApiResult<OnboardingView> {
    let mut onboarding = state.onboarding.lock().await;
    onboarding.finish()?;
    Ok(Json(OnboardingView::of(&onboarding)?))
}

#[tracing::instrument(skip(state))]
async fn devices(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Device>> {
    Ok(Json(state.store.devices()?))
}

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/onboarding", get(onboarding_view))
        .route("/v1/onboarding/begin", post(begin))
        .route("/v1/onboarding/device", post(submit_device))
        .route("/v1/onboarding/retry", post(retry))
        .route("/v1/onboarding/skip", post(skip))
        .route("/v1/onboarding/continue", post(continue_to_entities))
        .route("/v1/onboarding/entities/:internal_name", put(edit_entity))
        .route("/v1/onboarding/finish", post(finish))
        .route("/v1/devices", get(devices))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to the configured address and serves until `shutdown_rx` fires.
pub async fn serve(
    config: &ApiConfig,
    state: Arc<AppState>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.listen, config.port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

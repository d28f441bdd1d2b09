use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use jobchat_contracts::{ChatRequest, ChatResponse, JOBS_SCHEMA};
use jobchat_store::{JobRepository, PgStore, QueryStore, StoreError, StoreOptions};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::Instrument;
use ulid::Ulid;

use crate::config::{ModelProvider, ServerConfig, StartupError};
use crate::provider::{CompletionProvider, HttpCompletionClient, MockProvider};

mod compose;
mod jobs;
mod pipeline;

#[cfg(test)]
mod fakes;

pub use pipeline::{Pipeline, PipelineError, PipelineSettings};

use compose::{ChatFailureBody, ChatSuccessBody, SUCCESS_MESSAGE, compose, headline_for, status_for};

pub const REQUEST_ID_HEADER: &str = "x-jobchat-request-id";

#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
    jobs: Arc<dyn JobRepository>,
    store: Arc<dyn QueryStore>,
}

impl AppState {
    pub fn new(
        pipeline: Pipeline,
        jobs: Arc<dyn JobRepository>,
        store: Arc<dyn QueryStore>,
    ) -> Self {
        Self {
            pipeline,
            jobs,
            store,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: ServerConfig) -> Result<Router, StartupError> {
    let store = PgStore::connect(&StoreOptions {
        db_url: config.db_url.clone(),
        max_connections: config.db_max_connections,
        connect_timeout: config.db_connect_timeout,
        query_timeout: config.query_timeout,
    })
    .await
    .map_err(|err| StartupError {
        code: "ERR_DB_UNAVAILABLE",
        message: format!("failed to connect to job store: {}", err),
    })?;

    if config.migrate_on_startup {
        store.migrate().await.map_err(|err| StartupError {
            code: "ERR_MIGRATION_FAILED",
            message: format!("failed to apply migrations: {}", err),
        })?;
    }

    store
        .verify_schema(&JOBS_SCHEMA)
        .await
        .map_err(|err| match err {
            StoreError::SchemaDrift(detail) => StartupError {
                code: "ERR_SCHEMA_DRIFT",
                message: detail,
            },
            other => StartupError {
                code: "ERR_DB_UNAVAILABLE",
                message: format!("failed to inspect job store schema: {}", other),
            },
        })?;

    let provider = build_provider(&config)?;
    let store = Arc::new(store);
    let pipeline = Pipeline::new(
        provider,
        store.clone(),
        &JOBS_SCHEMA,
        PipelineSettings {
            row_cap: config.row_cap,
            display_threshold: config.display_threshold,
            generation_timeout: config.generation_timeout,
            summary_timeout: config.summary_timeout,
        },
    );

    tracing::info!(
        provider = ?config.model_provider,
        model = %config.model,
        row_cap = config.row_cap,
        schema_fingerprint = %JOBS_SCHEMA.fingerprint(),
        "job store ready"
    );

    Ok(app(AppState::new(pipeline, store.clone(), store)))
}

fn build_provider(config: &ServerConfig) -> Result<Arc<dyn CompletionProvider>, StartupError> {
    match config.model_provider {
        ModelProvider::Mock => Ok(Arc::new(MockProvider)),
        ModelProvider::External => {
            let api_key = config.provider_api_key.as_ref().ok_or_else(|| StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "external model provider requires an api key".to_string(),
            })?;
            let client = HttpCompletionClient::new(
                &config.provider_base_url,
                api_key.expose(),
                &config.model,
                config.provider_retry,
            )
            .map_err(|_| StartupError {
                code: "ERR_PROVIDER_INIT",
                message: "failed to initialize completion client".to_string(),
            })?;
            Ok(Arc::new(client))
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/chat", post(chat))
        .route("/jobs", get(jobs::list_jobs))
        .route("/apply", post(jobs::apply))
        .route(
            "/admin/jobs",
            get(jobs::admin_list_jobs).post(jobs::admin_create_job),
        )
        .route(
            "/admin/jobs/{id}",
            put(jobs::admin_update_job).delete(jobs::admin_delete_job),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: ReadyChecks,
}

#[derive(Debug, Serialize)]
struct ReadyChecks {
    store: &'static str,
}

async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                checks: ReadyChecks { store: "ok" },
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    status: "not_ready",
                    checks: ReadyChecks {
                        store: "unavailable",
                    },
                }),
            )
        }
    }
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request_started = Instant::now();
    let request_id = extract_request_id(&headers);

    let span = tracing::info_span!(
        "chat.run",
        request_id = %request_id,
        outcome = tracing::field::Empty,
    );
    let response = async {
        let outcome = match payload {
            Ok(Json(req)) => state.pipeline.run(&req.message).await,
            Err(rejection) => {
                tracing::debug!(error = %rejection.body_text(), "chat body rejected");
                Err(PipelineError::InvalidRequest)
            }
        };

        let response = compose(&outcome);
        tracing::Span::current().record("outcome", response.outcome_label());
        response
    }
    .instrument(span)
    .await;

    let status = status_for(&response);
    crate::metrics::observe_chat_outcome(response.outcome_label());
    crate::metrics::observe_http_request(
        "/chat",
        "POST",
        status.as_u16(),
        request_started.elapsed(),
    );

    let mut out = match response {
        ChatResponse::Success { narrative } => (
            status,
            Json(ChatSuccessBody {
                message: SUCCESS_MESSAGE,
                response: narrative,
            }),
        )
            .into_response(),
        ChatResponse::Failure { reason, detail } => (
            status,
            Json(ChatFailureBody {
                error: headline_for(reason),
                reason,
                detail,
            }),
        )
            .into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        out.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    out
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

fn json_error(status: StatusCode, code: &'static str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code,
        }),
    )
}

//! Web server entrypoints live here.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Request, multipart::MultipartError},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{
    add_extension::AddExtensionLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{CorsConfig, ServerConfig, UploadLimitsConfig};
use crate::intake::{IntakeError, IntakeErrorKind, IntakeProvider, UploadedFile};

const HEALTHZ_PATH: &str = "/healthz";
const UPLOAD_PATH: &str = "/upload";
const UPLOAD_MULTIPLE_PATH: &str = "/upload-multiple";
const FICHA_PATH: &str = "/ficha/{filename}";
const STATUS_PATH: &str = "/processamento/{id}/status";
const RESULT_PATH: &str = "/processamento/{id}/resultado";
const FILES_PATH: &str = "/arquivos";
const PROCESS_WITH_TEMPLATE_PATH: &str = "/processar-com-modelo";
const HEALTHZ_STATUS: &str = "ok";
const REQUEST_ID_HEADER: &str = "x-request-id";
const NO_FILE_ERROR: &str = "Nenhum arquivo enviado.";

pub type DynIntakeProvider = Arc<dyn IntakeProvider>;
type ApiStateHandle = Arc<ApiState>;

#[derive(Clone)]
struct ApiState {
    intake: DynIntakeProvider,
    limits: UploadLimitsConfig,
}

#[derive(Debug, Serialize, Copy, Clone, PartialEq, Eq)]
struct HealthzResponse {
    status: &'static str,
}

/// User-facing failure: structured `{error, details}` JSON, never a bare
/// status code.
#[derive(Debug, Clone)]
struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize)]
struct ApiErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen address may not be empty")]
    EmptyListenAddr,
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to determine local address: {source}")]
    LocalAddr {
        #[source]
        source: std::io::Error,
    },
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CORS configuration: {reason}")]
    CorsConfig { reason: String },
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        ApiError {
            status,
            body: ApiErrorBody {
                error: error.into(),
                details: None,
            },
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.body.details = Some(details.into());
        self
    }

    fn bad_request(error: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, error)
    }

    fn not_found(error: impl Into<String>) -> Self {
        ApiError::new(StatusCode::NOT_FOUND, error)
    }

    fn resource_not_found(path: &str) -> Self {
        debug_assert!(path.starts_with('/'));
        ApiError::not_found(format!("resource `{path}` not found"))
    }

    fn method_not_allowed(method: &str, path: &str) -> Self {
        debug_assert!(!method.is_empty());
        ApiError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("method `{method}` not allowed for `{path}`"),
        )
    }
}

impl From<IntakeError> for ApiError {
    fn from(error: IntakeError) -> Self {
        match error.kind {
            IntakeErrorKind::UploadRejected => ApiError::bad_request(error.message),
            IntakeErrorKind::JobNotFound | IntakeErrorKind::FileNotFound => {
                ApiError::not_found(error.message)
            }
            IntakeErrorKind::Analysis => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Erro ao processar o PDF")
                    .with_details(error.message)
            }
            IntakeErrorKind::Internal => {
                tracing::error!(message = %error.message, "intake request failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Erro interno no servidor.")
                    .with_details(error.message)
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        ApiError::bad_request("Falha ao ler o formulário multipart.").with_details(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub fn build_router(
    config: &ServerConfig,
    intake: DynIntakeProvider,
) -> Result<Router, ServerError> {
    debug_assert!(config.upload.max_files.get() >= 1);

    let state: ApiStateHandle = Arc::new(ApiState {
        intake,
        limits: config.upload,
    });

    let mut router = Router::new()
        .route(HEALTHZ_PATH, get(healthz).fallback(method_not_allowed_handler))
        .route(UPLOAD_PATH, post(upload_single).fallback(method_not_allowed_handler))
        .route(
            UPLOAD_MULTIPLE_PATH,
            post(upload_multiple).fallback(method_not_allowed_handler),
        )
        .route(FICHA_PATH, get(ficha).fallback(method_not_allowed_handler))
        .route(STATUS_PATH, get(job_status).fallback(method_not_allowed_handler))
        .route(RESULT_PATH, get(job_result).fallback(method_not_allowed_handler))
        .route(FILES_PATH, get(list_files).fallback(method_not_allowed_handler))
        .route(
            PROCESS_WITH_TEMPLATE_PATH,
            post(process_with_template).fallback(method_not_allowed_handler),
        )
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(config.upload.request_body_limit()));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                path = %request.uri().path(),
            )
        })
        .on_response(
            |response: &axum::response::Response, latency: Duration, span: &tracing::Span| {
                let status = response.status().as_u16();
                let latency_ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
                tracing::info!(parent: span, status, latency_ms, "request completed");
            },
        );

    if config.cors.enabled {
        router = router.layer(build_cors_layer(&config.cors)?);
    }

    router = router.layer(trace_layer);

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    router = router
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid::default()));

    Ok(router.layer(AddExtensionLayer::new(state)))
}

pub async fn serve(config: ServerConfig, intake: DynIntakeProvider) -> Result<(), ServerError> {
    debug_assert!(!config.listen_addr.contains('\n'));

    let listen_addr = parse_listen_addr(&config.listen_addr)?;
    let listener = bind_listener(listen_addr).await?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::LocalAddr { source })?;
    tracing::info!(%local_addr, "fichario server listening");

    let app = build_router(&config, intake)?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .map_err(|source| ServerError::Serve { source })
}

fn build_cors_layer(config: &CorsConfig) -> Result<CorsLayer, ServerError> {
    debug_assert!(config.enabled);

    let origins: Vec<HeaderValue> = config
        .allow_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|err| ServerError::CorsConfig {
                reason: format!("origin `{origin}` is not a valid header value: {err}"),
            })
        })
        .collect::<Result<_, _>>()?;

    let methods: Vec<Method> = config
        .allow_methods
        .iter()
        .map(|method| {
            Method::from_bytes(method.as_bytes()).map_err(|_| ServerError::CorsConfig {
                reason: format!("method `{method}` is not a valid HTTP method"),
            })
        })
        .collect::<Result<_, _>>()?;

    let headers: Vec<HeaderName> = config
        .allow_headers
        .iter()
        .map(|name| {
            HeaderName::from_bytes(name.as_bytes()).map_err(|err| ServerError::CorsConfig {
                reason: format!("header `{name}` is invalid: {err}"),
            })
        })
        .collect::<Result<_, _>>()?;

    let mut cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::list(methods))
        .allow_credentials(config.allow_credentials)
        .max_age(Duration::from_secs(config.max_age_secs));

    if !headers.is_empty() {
        cors = cors.allow_headers(AllowHeaders::list(headers));
    }

    Ok(cors)
}

async fn healthz() -> impl IntoResponse {
    debug_assert_eq!(HEALTHZ_STATUS, "ok");
    Json(HealthzResponse {
        status: HEALTHZ_STATUS,
    })
}

async fn upload_single(
    Extension(state): Extension<ApiStateHandle>,
    multipart: Multipart,
) -> Result<axum::response::Response, ApiError> {
    let mut files = collect_uploads(multipart, "file", 1).await?;
    let Some(file) = files.pop() else {
        return Err(ApiError::bad_request(NO_FILE_ERROR));
    };
    let stored = state.intake.store_upload(file).await?;
    Ok(Json(stored).into_response())
}

async fn upload_multiple(
    Extension(state): Extension<ApiStateHandle>,
    multipart: Multipart,
) -> Result<axum::response::Response, ApiError> {
    let max_files = state.limits.max_files.get();
    let files = collect_uploads(multipart, "files", max_files).await?;
    if files.is_empty() {
        return Err(ApiError::bad_request(NO_FILE_ERROR));
    }
    let accepted = state.intake.create_batch(files).await?;
    Ok(Json(accepted).into_response())
}

async fn ficha(
    Extension(state): Extension<ApiStateHandle>,
    Path(filename): Path<String>,
) -> Result<axum::response::Response, ApiError> {
    let view = state.intake.analyze_stored(&filename).await?;
    Ok(Json(view).into_response())
}

async fn job_status(
    Extension(state): Extension<ApiStateHandle>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, ApiError> {
    let view = state.intake.job_status(&id).await?;
    Ok(Json(view).into_response())
}

async fn job_result(
    Extension(state): Extension<ApiStateHandle>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, ApiError> {
    let view = state.intake.job_result(&id).await?;
    Ok(Json(view).into_response())
}

async fn list_files(
    Extension(state): Extension<ApiStateHandle>,
) -> Result<axum::response::Response, ApiError> {
    let files = state.intake.list_stored().await?;
    Ok(Json(files).into_response())
}

async fn process_with_template(
    Extension(state): Extension<ApiStateHandle>,
    mut multipart: Multipart,
) -> Result<axum::response::Response, ApiError> {
    let mut document: Option<UploadedFile> = None;
    let mut template: Option<UploadedFile> = None;

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name != "documento" && name != "modelo" {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        let file = UploadedFile::new(name.clone(), original_name, content_type, bytes.to_vec());
        match name.as_str() {
            "documento" => document = Some(file),
            _ => template = Some(file),
        }
    }

    let (Some(document), Some(template)) = (document, template) else {
        return Err(ApiError::bad_request(
            "Envie os campos `documento` e `modelo`.",
        ));
    };

    let view = state
        .intake
        .analyze_with_template(document, template)
        .await?;
    Ok(Json(view).into_response())
}

/// Gathers every part of the form whose field name matches, preserving
/// submission order. Fields with other names are skipped, not rejected.
async fn collect_uploads(
    mut multipart: Multipart,
    field_name: &str,
    max_files: usize,
) -> Result<Vec<UploadedFile>, ApiError> {
    debug_assert!(max_files >= 1);

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name() else {
            continue;
        };
        if name != field_name {
            continue;
        }
        let name = name.to_string();
        let original_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        if files.len() >= max_files {
            return Err(ApiError::bad_request(format!(
                "Número máximo de {max_files} arquivos excedido."
            )));
        }
        files.push(UploadedFile::new(
            name,
            original_name,
            content_type,
            bytes.to_vec(),
        ));
    }
    Ok(files)
}

async fn method_not_allowed_handler(request: Request) -> axum::response::Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    ApiError::method_not_allowed(&method, &path).into_response()
}

async fn not_found_handler(request: Request) -> axum::response::Response {
    debug_assert!(request.uri().path().starts_with('/'));
    let path = request.uri().path().to_string();
    ApiError::resource_not_found(&path).into_response()
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to capture Ctrl+C signal");
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("shutdown requested via Ctrl+C"),
        _ = sigterm => tracing::info!("shutdown requested via SIGTERM"),
    }
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ServerError::EmptyListenAddr);
    }

    trimmed
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: trimmed.to_string(),
            source,
        })
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    debug_assert!(addr.port() > 0 || addr.ip().is_loopback());

    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.to_string(),
            source,
        })
}

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use github_integration::{GitHubClient, OAuthProvider, RepositoryGateway};
use serde::Deserialize;
use server_api::{AuthError, AuthSession, SubmissionError, SubmissionOrchestrator};
use shared::{
    domain::{ImageUpload, Session, SubmissionForm},
    error::{ApiError, ErrorCode},
    protocol::{AuthCheckResponse, LogoutResponse, SlugAvailabilityResponse, SubmitResponse},
};
use storage::{
    InMemorySessionStore, SessionStore, SqliteSessionStore, AUTHENTICATED_SESSION_TTL_HOURS,
    PENDING_SESSION_TTL_HOURS,
};
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod session_cookie;

use app_state::AppState;
use config::{load_settings, Settings};
use session_cookie::SessionCookies;

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
const IMAGE_FIELD_PREFIX: &str = "image";

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
struct LoginQuery {
    #[serde(rename = "returnTo")]
    return_to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlugQuery {
    slug: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = load_settings()?;
    let state = build_state(&settings).await?;
    let app = build_router(Arc::new(state), &settings.allowed_origins());

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid SERVER_BIND '{}'", settings.server_bind))?;
    info!(%addr, upstream = %settings.upstream_repo, base = %settings.base_branch, "server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("server shut down");
    Ok(())
}

async fn build_state(settings: &Settings) -> anyhow::Result<AppState> {
    let github = Arc::new(
        GitHubClient::new(settings.github_config()).context("failed to build github client")?,
    );
    let sessions: Arc<dyn SessionStore> = match settings.session_database_url() {
        Some(database_url) => {
            let store = SqliteSessionStore::new(&database_url).await.map_err(|error| {
                error!(
                    %database_url,
                    error = %error,
                    "failed to open session database; verify parent directory exists and permissions are correct"
                );
                error
            })?;
            store.health_check().await?;
            let purged = store.purge_expired().await?;
            info!(%database_url, purged, "sqlite session store ready");
            Arc::new(store)
        }
        None => {
            info!("using in-memory session store");
            Arc::new(InMemorySessionStore::new())
        }
    };

    let oauth: Arc<dyn OAuthProvider> = github.clone();
    let gateway: Arc<dyn RepositoryGateway> = github;
    Ok(AppState {
        auth: AuthSession::new(oauth, sessions, settings.redirect_uri()),
        submissions: SubmissionOrchestrator::new(gateway, settings.submission_config()?),
        cookies: SessionCookies::new(&settings.cookie_config()),
    })
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn build_router(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/github", get(github_login))
        .route("/auth/github/callback", get(github_callback))
        .route("/auth/check", get(check_auth))
        .route("/auth/logout", get(logout).post(logout))
        .route("/submit", post(submit_device))
        .route("/checkSlug", get(check_slug))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origins)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

fn api_error(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> HttpError {
    (status, Json(ApiError::new(code, message)))
}

fn authentication_required() -> HttpError {
    api_error(
        StatusCode::UNAUTHORIZED,
        ErrorCode::Unauthorized,
        "Authentication required",
    )
}

fn internal_error(context: &str, error: impl std::fmt::Display) -> HttpError {
    error!(%error, "{context}");
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::Internal,
        context.to_string(),
    )
}

fn set_cookie_error(error: session_cookie::SessionCookieError) -> HttpError {
    internal_error("Failed to issue session cookie", error)
}

/// The stored session behind the request cookie, without a remote check.
async fn stored_session(state: &AppState, headers: &HeaderMap) -> Result<Session, HttpError> {
    let id = state
        .cookies
        .session_id(headers)
        .ok_or_else(authentication_required)?;
    state
        .auth
        .current_session(&id)
        .await
        .map_err(|error| match error {
            AuthError::Store(error) => internal_error("Failed to load session", error),
            _ => authentication_required(),
        })
}

async fn healthz() -> &'static str {
    "ok"
}

async fn github_login(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LoginQuery>,
) -> Result<Response, HttpError> {
    let redirect = state
        .auth
        .begin_login(q.return_to.as_deref())
        .await
        .map_err(|error| internal_error("Failed to start login", error))?;
    let cookie = state
        .cookies
        .set_cookie(
            &redirect.session_id,
            Duration::hours(PENDING_SESSION_TTL_HOURS),
        )
        .map_err(set_cookie_error)?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::to(&redirect.authorize_url),
    )
        .into_response())
}

async fn github_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<CallbackQuery>,
) -> Result<Response, HttpError> {
    if let Some(error) = q.error {
        return Err(api_error(StatusCode::BAD_REQUEST, ErrorCode::Unauthorized, error));
    }
    let Some(code) = q.code.filter(|code| !code.is_empty()) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            ErrorCode::Validation,
            "No code provided",
        ));
    };

    let pending = state.cookies.session_id(&headers);
    let login = state
        .auth
        .complete_login(pending.as_ref(), &code, q.state.as_deref())
        .await
        .map_err(|error| match error {
            AuthError::StateMismatch => api_error(
                StatusCode::BAD_REQUEST,
                ErrorCode::Unauthorized,
                "Invalid OAuth state",
            ),
            AuthError::Store(error) => internal_error("Failed to store session", error),
            other => {
                warn!(error = %other, "oauth code exchange failed");
                api_error(
                    StatusCode::BAD_REQUEST,
                    ErrorCode::Unauthorized,
                    "Failed to get access token",
                )
            }
        })?;

    let cookie = state
        .cookies
        .set_cookie(
            &login.session_id,
            Duration::hours(AUTHENTICATED_SESSION_TTL_HOURS),
        )
        .map_err(set_cookie_error)?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::to(&login.return_to),
    )
        .into_response())
}

async fn check_auth(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(id) = state.cookies.session_id(&headers) else {
        return Json(AuthCheckResponse::anonymous()).into_response();
    };
    match state.auth.verify_session(&id).await {
        Ok(session) => Json(AuthCheckResponse::signed_in(session)).into_response(),
        // The provider could not be reached; answer from the stored identity.
        Err(AuthError::Remote(_)) => match state.auth.current_session(&id).await {
            Ok(session) => Json(AuthCheckResponse::signed_in(session)).into_response(),
            Err(_) => Json(AuthCheckResponse::anonymous()).into_response(),
        },
        Err(AuthError::Store(error)) => {
            error!(error = %error, "failed to load session");
            Json(AuthCheckResponse::anonymous()).into_response()
        }
        Err(_) => with_cleared_cookie(&state, Json(AuthCheckResponse::anonymous())),
    }
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(id) = state.cookies.session_id(&headers) {
        state.auth.revoke(&id).await;
    }
    with_cleared_cookie(&state, Json(LogoutResponse { success: true }))
}

fn with_cleared_cookie(state: &AppState, body: impl IntoResponse) -> Response {
    match state.cookies.clear_cookie() {
        Ok(cookie) => ([(header::SET_COOKIE, cookie)], body).into_response(),
        Err(error) => {
            warn!(error = %error, "failed to build session cookie");
            body.into_response()
        }
    }
}

async fn submit_device(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SubmitResponse>, HttpError> {
    let session = stored_session(&state, &headers).await?;
    let multipart = multipart.map_err(|rejection| {
        api_error(
            StatusCode::BAD_REQUEST,
            ErrorCode::Validation,
            rejection.body_text(),
        )
    })?;
    let form = read_submission_form(multipart).await?;

    let pull_request = state
        .submissions
        .submit(&session.identity(), &session.token, form)
        .await
        .map_err(|error| match error {
            SubmissionError::Validation(error) => {
                api_error(StatusCode::BAD_REQUEST, ErrorCode::Validation, error.to_string())
            }
            SubmissionError::Remote {
                ref step,
                last_stage,
                ref source,
            } => {
                error!(
                    login = %session.login,
                    %step,
                    %last_stage,
                    cause = %source,
                    "submission failed"
                );
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error.code(),
                    format!("Failed to create pull request: {error}"),
                )
            }
        })?;

    Ok(Json(SubmitResponse {
        success: true,
        pr_url: pull_request.url,
        message: "Pull request created successfully!".into(),
    }))
}

/// Collects the known text fields and every `image*` file part, in order.
async fn read_submission_form(mut multipart: Multipart) -> Result<SubmissionForm, HttpError> {
    let mut form = SubmissionForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name.starts_with(IMAGE_FIELD_PREFIX) {
            let filename = field.file_name().unwrap_or_default().to_string();
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(multipart_error)?;
            // Browsers send an empty part for an untouched file input.
            if filename.is_empty() && bytes.is_empty() {
                continue;
            }
            form.images.push(ImageUpload {
                filename,
                content_type,
                bytes: bytes.to_vec(),
            });
            continue;
        }

        let slot = match name.as_str() {
            "slug" => &mut form.slug,
            "boardName" => &mut form.board_name,
            "description" => &mut form.description,
            "chipType" => &mut form.chip_type,
            "productLink" => &mut form.product_link,
            "gpioPins" => &mut form.gpio_pins,
            "tags" => &mut form.tags,
            "yamlConfig" => &mut form.yaml_config,
            _ => continue,
        };
        *slot = Some(field.text().await.map_err(multipart_error)?);
    }
    Ok(form)
}

fn multipart_error(error: axum::extract::multipart::MultipartError) -> HttpError {
    api_error(error.status(), ErrorCode::Validation, error.body_text())
}

async fn check_slug(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<SlugQuery>,
) -> Result<Json<SlugAvailabilityResponse>, HttpError> {
    let session = stored_session(&state, &headers).await?;
    let Some(slug) = q.slug.filter(|slug| !slug.trim().is_empty()) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            ErrorCode::Validation,
            "No slug provided",
        ));
    };

    match state.submissions.slug_available(&session.token, &slug).await {
        Ok(Some(available)) => Ok(Json(SlugAvailabilityResponse { available })),
        Ok(None) => Err(api_error(
            StatusCode::BAD_REQUEST,
            ErrorCode::Validation,
            "Invalid slug",
        )),
        Err(error) => {
            error!(%slug, %error, "slug availability check failed");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                error.code(),
                "Failed to check slug availability",
            ))
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

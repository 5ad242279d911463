use crate::{
    bookings::{self, Sourced},
    config::Config,
    messages::{self, MessageError},
    model::{Message, PublicUser, User},
    session::{self, SessionError, SESSION_HEADER},
    store::{self, SharedStore},
    upstream::{UpstreamClient, UpstreamError},
};
use anyhow::Result;
use axum::{
    body::StreamBody,
    extract::{Extension, Path, Query, State},
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{error, info, warn};

/// Response header telling clients whether data is live or a mock fallback.
pub const DATA_SOURCE_HEADER: &str = "x-data-source";

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub upstream: UpstreamClient,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, store: SharedStore) -> Self {
        let upstream = UpstreamClient::new(&config.upstream_base, &config.upstream_token);
        Self {
            store,
            upstream,
            config,
        }
    }

    /// Open the configured store and build the state around it.
    pub async fn open(config: Config) -> Result<Self> {
        let store = store::open(&config).await?;
        Ok(Self::new(config, store))
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/bookings", get(list_bookings))
        .route("/api/bookings/:id", get(booking_detail))
        .route("/api/bookings/:id/attachments", get(booking_attachments))
        .route(
            "/api/bookings/:id/messages",
            get(list_booking_messages).post(post_booking_message),
        )
        .route("/api/attachments/:uuid/download", get(download_attachment))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .route("/api/login", post(login))
        .merge(protected)
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn cors<B>(req: Request<B>, next: Next<B>) -> Response {
    let mut res = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    let headers = res.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type, x-session-token"),
    );
    res
}

async fn session_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response, ApiError> {
    // a header that is present but not visible ASCII can never match a token
    let token = match req.headers().get(SESSION_HEADER) {
        Some(v) => Some(
            v.to_str()
                .map_err(|_| ApiError::from(SessionError::InvalidToken))?
                .to_owned(),
        ),
        None => None,
    };
    let user = session::authenticate(state.store.as_ref(), token.as_deref()).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

/// Failures surfaced to API clients as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Internal(&'static str),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorResp {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::MissingCredentials => ApiError::BadRequest(e.to_string()),
            SessionError::MissingToken | SessionError::InvalidToken => {
                ApiError::Unauthorized(e.to_string())
            }
            SessionError::Store(e) => {
                error!(error = %e, "session store failure");
                ApiError::Internal("server error")
            }
        }
    }
}

impl From<MessageError> for ApiError {
    fn from(e: MessageError) -> Self {
        match e {
            MessageError::EmptyText => ApiError::BadRequest(e.to_string()),
            MessageError::Store(e) => {
                error!(error = %e, "message store failure");
                ApiError::Internal("server error")
            }
        }
    }
}

/// Wrap a proxied payload as `{key: data}` and tag its source.
fn sourced_json(key: &str, res: Sourced) -> Response {
    let mut body = serde_json::Map::new();
    body.insert(key.to_string(), res.data);
    (
        [(DATA_SOURCE_HEADER, res.source.as_str())],
        Json(Value::Object(body)),
    )
        .into_response()
}

#[derive(Deserialize, Default)]
struct LoginReq {
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Serialize)]
struct LoginResp {
    token: String,
    user: PublicUser,
}

async fn login(
    State(state): State<AppState>,
    body: Option<Json<LoginReq>>,
) -> Result<Json<LoginResp>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let (token, user) = session::login(
        state.store.as_ref(),
        req.email.as_deref(),
        req.phone.as_deref(),
    )
    .await?;
    Ok(Json(LoginResp {
        token,
        user: PublicUser::from(&user),
    }))
}

#[derive(Deserialize)]
struct BookingsQuery {
    customer_email: Option<String>,
}

async fn list_bookings(
    State(state): State<AppState>,
    Query(q): Query<BookingsQuery>,
) -> Response {
    let res = bookings::list(
        &state.upstream,
        q.customer_email.as_deref(),
        state.config.forward_customer_filter,
    )
    .await;
    sourced_json("bookings", res)
}

async fn booking_detail(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    sourced_json("booking", bookings::detail(&state.upstream, &id).await)
}

async fn booking_attachments(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    sourced_json(
        "attachments",
        bookings::attachments(&state.upstream, &id).await,
    )
}

async fn download_attachment(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Response, ApiError> {
    let resp = state
        .upstream
        .get_attachment(&uuid)
        .await
        .map_err(|e| match e {
            UpstreamError::MissingToken => {
                warn!(attachment = %uuid, "download requested without upstream token");
                ApiError::Internal("upstream token not configured")
            }
            e => {
                error!(error = %e, attachment = %uuid, "attachment download failed");
                ApiError::Internal("could not fetch attachment")
            }
        })?;
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let body = StreamBody::new(resp.bytes_stream());
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

#[derive(Serialize)]
struct MessagesResp {
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct MessageResp {
    message: Message,
}

#[derive(Deserialize, Default)]
struct PostMessageReq {
    text: Option<String>,
}

async fn list_booking_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResp>, ApiError> {
    let messages = messages::list_messages(state.store.as_ref(), &id).await?;
    Ok(Json(MessagesResp { messages }))
}

async fn post_booking_message(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    body: Option<Json<PostMessageReq>>,
) -> Result<Json<MessageResp>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let message =
        messages::post_message(state.store.as_ref(), &id, &user, req.text.as_deref()).await?;
    Ok(Json(MessageResp { message }))
}

/// Run the HTTP server until Ctrl+C.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::open(config).await?;
    if state.upstream.is_configured() {
        info!(
            base = state.upstream.base(),
            token = %state.upstream.masked_token(),
            "upstream configured"
        );
    } else {
        warn!("upstream token not configured - bookings will be served from mock data");
    }
    info!(%addr, store = ?state.config.store, "portal listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::StoreBackend, store::SqliteStore};
    use axum::body::Body;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn state() -> (AppState, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            bind: "127.0.0.1:0".into(),
            upstream_base: "http://127.0.0.1:1".into(),
            upstream_token: String::new(),
            forward_customer_filter: false,
            store: StoreBackend::Sqlite,
            data_dir: tmp.path().to_path_buf(),
            logging_enabled: false,
        };
        let store = SqliteStore::open(tmp.path().join("portal.sqlite3"))
            .await
            .unwrap();
        (AppState::new(config, Arc::new(store)), tmp)
    }

    async fn body_json(res: Response) -> Value {
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (state, _tmp) = state().await;
        let res = build_router(state)
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn preflight_skips_session_check() {
        let (state, _tmp) = state().await;
        let res = build_router(state)
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/bookings")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(res.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS]
            .to_str()
            .unwrap()
            .contains("x-session-token"));
    }

    #[tokio::test]
    async fn missing_session_header_is_unauthorized() {
        let (state, _tmp) = state().await;
        let res = build_router(state)
            .oneshot(Request::get("/api/bookings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let v = body_json(res).await;
        assert_eq!(
            v["error"],
            "Missing session token in x-session-token header"
        );
    }

    #[tokio::test]
    async fn unreadable_session_header_is_invalid() {
        let (state, _tmp) = state().await;
        let res = build_router(state)
            .oneshot(
                Request::get("/api/bookings")
                    .header(SESSION_HEADER, HeaderValue::from_bytes(b"caf\xe9").unwrap())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["error"], "Invalid session token");
    }

    #[tokio::test]
    async fn login_with_empty_body_is_bad_request() {
        let (state, _tmp) = state().await;
        let res = build_router(state)
            .oneshot(Request::post("/api/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["error"], "email and phone required");
    }

    #[tokio::test]
    async fn login_without_phone_is_bad_request() {
        let (state, _tmp) = state().await;
        let res = build_router(state)
            .oneshot(
                Request::post("/api/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"email\":\"a@b.com\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["error"], "email and phone required");
    }

    #[tokio::test]
    async fn download_without_upstream_token_fails() {
        let (state, _tmp) = state().await;
        let token = {
            let (token, _) = session::login(state.store.as_ref(), Some("a@b.com"), Some("555"))
                .await
                .unwrap();
            token
        };
        let res = build_router(state)
            .oneshot(
                Request::get("/api/attachments/att-1/download")
                    .header(SESSION_HEADER, token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(res).await["error"],
            "upstream token not configured"
        );
    }
}

//! Matchit routing configuration.

use docbase_core::auth::Auth;
use docbase_core::context::AppContext;
use docbase_core::{DbError, ErrorCode};
use hyper::body::{Body, Bytes};
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response};
use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::handlers;
use crate::handlers::request_utils::{build_error_response, read_request_body_with_timeout};

pub const APPLICATION_ID_HEADER: &str = "x-parse-application-id";
pub const MASTER_KEY_HEADER: &str = "x-parse-master-key";
pub const SESSION_TOKEN_HEADER: &str = "x-parse-session-token";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub ctx: AppContext,
    /// Time allowed for reading a request body
    pub request_timeout_ms: u64,
}

/// A request after routing, body read and caller resolved.
#[derive(Debug)]
pub struct RestRequest {
    pub method: Method,
    pub class_name: Option<String>,
    pub object_id: Option<String>,
    pub query: Option<String>,
    pub body: Bytes,
    pub auth: Auth,
}

/// HTTP request router.
pub struct Router {
    inner: MatchitRouter<RouteHandler>,
    state: AppState,
}

impl Router {
    /// Creates a new router with default routes.
    pub fn new(state: AppState) -> Self {
        let mut router = MatchitRouter::new();
        for (path, handler) in [
            ("/classes/{className}", RouteHandler::Class),
            ("/classes/{className}/{objectId}", RouteHandler::Object),
            ("/schemas", RouteHandler::Schemas),
            ("/schemas/{className}", RouteHandler::Schema),
        ] {
            if let Err(e) = router.insert(path, handler) {
                tracing::error!("Failed to insert route {}: {}", path, e);
            }
        }
        Self {
            inner: router,
            state,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Routes an incoming request to the appropriate handler.
    ///
    /// # Returns
    /// `Result<Response<Bytes>, RouterError>` containing the response or an error.
    pub async fn route<B>(&self, req: Request<B>) -> Result<Response<Bytes>, RouterError>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let path = req.uri().path().to_string();
        let (handler, class_name, object_id) = match self.inner.at(&path) {
            Ok(matched) => (
                *matched.value,
                matched.params.get("className").map(decode_segment),
                matched.params.get("objectId").map(decode_segment),
            ),
            Err(_) => return Err(RouterError::NotFound(format!("Cannot {} {}", req.method(), path))),
        };
        debug!("{} {}", req.method(), path);

        let auth = self.resolve_auth(req.headers()).await?;
        let method = req.method().clone();
        let query = req.uri().query().map(str::to_string);
        let body = read_request_body_with_timeout(req, self.state.request_timeout_ms).await?;
        let request = RestRequest {
            method,
            class_name,
            object_id,
            query,
            body,
            auth,
        };
        handler.handle(request, &self.state).await
    }

    /// Routes a request, turning errors into their error response.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Bytes>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        match self.route(req).await {
            Ok(response) => response,
            Err(err) => {
                debug!("Request failed: {}", err);
                err.into()
            }
        }
    }

    /// Checks the application id and derives the caller from the master key
    /// or session token headers.
    async fn resolve_auth(&self, headers: &HeaderMap) -> Result<Auth, RouterError> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        if header(APPLICATION_ID_HEADER) != Some(self.state.ctx.config.app_id.as_str()) {
            return Err(RouterError::Unauthorized);
        }
        if let Some(master_key) = header(MASTER_KEY_HEADER) {
            return match &self.state.ctx.config.master_key {
                Some(expected) if expected == master_key => Ok(Auth::master()),
                _ => Err(RouterError::Unauthorized),
            };
        }
        Ok(self
            .state
            .ctx
            .auth
            .resolve(header(SESSION_TOKEN_HEADER))
            .await?)
    }
}

fn decode_segment(segment: &str) -> String {
    percent_encoding::percent_decode_str(segment)
        .decode_utf8_lossy()
        .into_owned()
}

/// Route handler function.
#[derive(Debug, Clone, Copy)]
enum RouteHandler {
    Class,
    Object,
    Schemas,
    Schema,
}

impl RouteHandler {
    async fn handle(&self, req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
        match (self, &req.method) {
            (RouteHandler::Class, &Method::POST) => handlers::create_object(req, state).await,
            (RouteHandler::Class, &Method::GET) => handlers::find_objects(req, state).await,
            (RouteHandler::Object, &Method::GET) => handlers::get_object(req, state).await,
            (RouteHandler::Object, &Method::PUT) => handlers::update_object(req, state).await,
            (RouteHandler::Object, &Method::DELETE) => handlers::delete_object(req, state).await,
            (RouteHandler::Schemas, &Method::GET) => handlers::list_schemas(req, state).await,
            (RouteHandler::Schemas, &Method::POST) | (RouteHandler::Schema, &Method::POST) => {
                handlers::create_schema(req, state).await
            }
            (RouteHandler::Schema, &Method::GET) => handlers::get_schema(req, state).await,
            (RouteHandler::Schema, &Method::PUT) => handlers::update_schema(req, state).await,
            (RouteHandler::Schema, &Method::DELETE) => handlers::delete_schema(req, state).await,
            _ => Err(RouterError::MethodNotAllowed),
        }
    }
}

/// Router error type.
#[derive(Debug)]
pub enum RouterError {
    MethodNotAllowed,
    NotFound(String),
    Timeout,
    /// Missing or wrong application id or master key
    Unauthorized,
    /// Operation error, reported with its code
    Db(DbError),
    InternalError(String),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::MethodNotAllowed => write!(f, "Method Not Allowed"),
            RouterError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            RouterError::Timeout => write!(f, "Request Timeout"),
            RouterError::Unauthorized => write!(f, "unauthorized"),
            RouterError::Db(e) => write!(f, "{}", e),
            RouterError::InternalError(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<DbError> for RouterError {
    fn from(err: DbError) -> Self {
        RouterError::Db(err)
    }
}

/// HTTP status for an operation error.
pub fn status_for(err: &DbError) -> u16 {
    match err.code {
        ErrorCode::InternalServerError => 500,
        ErrorCode::ObjectNotFound => 404,
        ErrorCode::OperationForbidden if err.message.starts_with("unauthorized") => 403,
        _ => 400,
    }
}

impl From<RouterError> for Response<Bytes> {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::MethodNotAllowed => build_error_response(405, None, "Method Not Allowed"),
            RouterError::NotFound(msg) => build_error_response(404, None, &msg),
            RouterError::Timeout => build_error_response(408, None, "Request Timeout"),
            RouterError::Unauthorized => build_error_response(403, None, "unauthorized"),
            RouterError::Db(e) => build_error_response(status_for(&e), Some(e.code.as_i32()), &e.message),
            RouterError::InternalError(msg) => build_error_response(
                500,
                Some(ErrorCode::InternalServerError.as_i32()),
                &msg,
            ),
        }
    }
}

//! Shared HTTP server module
//!
//! One listener serves both the admin surface (a router injected by the
//! host application) and every HTTP trigger route. Triggers register
//! their routes in a shared table; a fallback handler dispatches
//! matching requests into the engine and translates the outcome back to
//! HTTP.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ConfigMap;
use crate::context::{meta, HttpRail};
use crate::engine::EngineHandle;
use crate::error::EngineError;
use crate::executor::ExecutorError;
use crate::registry::{Module, ModuleError, ModuleFactoryRegistry, Service, ServiceRegistry};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Register the `http.server` factory
pub fn register(registry: &mut ModuleFactoryRegistry) {
    registry.register(
        "http.server",
        Arc::new(|name: &str, config: &ConfigMap| {
            let listen = config.require_str("listen")?;
            let listen: SocketAddr = listen.parse().map_err(|_| {
                ModuleError::Config(format!("'{listen}' is not a valid listen address"))
            })?;

            Ok(Arc::new(HttpServerModule {
                name: name.to_string(),
                handle: Arc::new(HttpServerHandle::new(listen)),
                serve_task: Mutex::new(None),
                shutdown: Mutex::new(None),
            }) as Arc<dyn Module>)
        }),
    );
}

// =============================================================================
// Route Table
// =============================================================================

/// A trigger-registered route
#[derive(Debug, Clone)]
pub struct TriggerRoute {
    /// Upper-cased HTTP method
    pub method: String,

    /// Exact request path
    pub path: String,

    /// Target workflow
    pub workflow: String,

    /// Target action
    pub action: Option<String>,

    /// Static parameters merged into the trigger data
    pub params: Map<String, Value>,
}

/// Shared-server capability handle: the route table plus the hooks the
/// engine and host application attach before the listener starts.
pub struct HttpServerHandle {
    listen: SocketAddr,
    routes: RwLock<Vec<TriggerRoute>>,
    admin: Mutex<Option<Router>>,
    engine: RwLock<Option<EngineHandle>>,
}

impl HttpServerHandle {
    /// Create a handle for the given listen address
    #[must_use]
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            routes: RwLock::new(Vec::new()),
            admin: Mutex::new(None),
            engine: RwLock::new(None),
        }
    }

    /// The configured listen address
    #[must_use]
    pub fn listen(&self) -> SocketAddr {
        self.listen
    }

    /// Add a trigger route
    pub fn add_route(&self, route: TriggerRoute) {
        self.routes
            .write()
            .expect("route table lock poisoned")
            .push(route);
    }

    /// Remove a trigger route by method and path
    pub fn remove_route(&self, method: &str, path: &str) {
        self.routes
            .write()
            .expect("route table lock poisoned")
            .retain(|r| !(r.method == method && r.path == path));
    }

    /// Find the route matching a request
    #[must_use]
    pub fn find_route(&self, method: &str, path: &str) -> Option<TriggerRoute> {
        self.routes
            .read()
            .expect("route table lock poisoned")
            .iter()
            .find(|r| r.method == method && r.path == path)
            .cloned()
    }

    /// Inject the admin router served next to the trigger routes.
    /// Must happen before the module starts.
    pub fn set_admin_router(&self, router: Router) {
        *self.admin.lock().expect("admin router lock poisoned") = Some(router);
    }

    /// Attach the engine handle the dispatcher invokes workflows on
    pub fn attach_engine(&self, engine: EngineHandle) {
        *self.engine.write().expect("engine slot lock poisoned") = Some(engine);
    }

    fn take_admin(&self) -> Option<Router> {
        self.admin.lock().expect("admin router lock poisoned").take()
    }

    fn engine(&self) -> Option<EngineHandle> {
        self.engine
            .read()
            .expect("engine slot lock poisoned")
            .clone()
    }
}

// =============================================================================
// Module
// =============================================================================

struct HttpServerModule {
    name: String,
    handle: Arc<HttpServerHandle>,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<CancellationToken>>,
}

#[async_trait]
impl Module for HttpServerModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, services: &ServiceRegistry) -> Result<(), ModuleError> {
        services.register(&self.name, Service::Http(Arc::clone(&self.handle)))?;
        Ok(())
    }

    async fn start(&self, token: CancellationToken) -> Result<(), ModuleError> {
        let listener = tokio::net::TcpListener::bind(self.handle.listen).await?;
        let local = listener.local_addr()?;

        let dispatch_state = DispatchState {
            http: Arc::clone(&self.handle),
        };
        let triggers: Router = Router::new()
            .fallback(dispatch)
            .with_state(dispatch_state);
        let app = match self.handle.take_admin() {
            Some(admin) => admin.merge(triggers),
            None => triggers,
        }
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

        tracing::info!(module = %self.name, %local, "http server listening");

        let shutdown = token.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(error) = serve.await {
                tracing::error!(%error, "http server exited with error");
            }
        });

        *self.serve_task.lock().expect("serve task lock poisoned") = Some(task);
        *self.shutdown.lock().expect("shutdown lock poisoned") = Some(token);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        if let Some(token) = self.shutdown.lock().expect("shutdown lock poisoned").take() {
            token.cancel();
        }
        let task = self.serve_task.lock().expect("serve task lock poisoned").take();
        if let Some(task) = task {
            task.await
                .map_err(|e| ModuleError::Other(format!("http server task panicked: {e}")))?;
        }
        Ok(())
    }
}

// =============================================================================
// Dispatch
// =============================================================================

#[derive(Clone)]
struct DispatchState {
    http: Arc<HttpServerHandle>,
}

/// Fallback handler: translate a request into a workflow invocation
async fn dispatch(State(state): State<DispatchState>, request: Request) -> Response {
    let method = request.method().as_str().to_uppercase();
    let path = request.uri().path().to_string();

    let Some(route) = state.http.find_route(&method, &path) else {
        return error_response(StatusCode::NOT_FOUND, "no route for this path");
    };
    let Some(engine) = state.http.engine() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "engine not started");
    };

    // Assemble trigger data: static params first, request fields and
    // parsed body on top
    let mut data = route.params.clone();
    data.insert("method".to_string(), Value::String(method.clone()));
    data.insert("path".to_string(), Value::String(path.clone()));
    data.insert(
        "query".to_string(),
        Value::Object(parse_query(request.uri().query())),
    );

    let mut headers = Map::new();
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), Value::String(value.to_string()));
        }
    }
    data.insert("headers".to_string(), Value::Object(headers));

    let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large"),
    };

    if !body.is_empty() {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => {
                for (key, value) in map {
                    data.insert(key, value);
                }
            }
            Ok(other) => {
                data.insert("body".to_string(), other);
            }
            Err(_) => {
                return error_response(StatusCode::BAD_REQUEST, "request body is not valid JSON");
            }
        }
    }

    let mut pc = engine.new_context(data);
    if let Ok(raw) = std::str::from_utf8(&body) {
        pc.set_meta(meta::RAW_BODY, Value::String(raw.to_string()));
    }
    pc.rails.http = Some(HttpRail {
        method,
        path,
        raw_body: body,
        response: None,
        handled: false,
    });

    let token = engine.execution_token();
    match engine
        .run(&token, &route.workflow, route.action.as_deref(), pc)
        .await
    {
        Ok(pc) => {
            if let Some(rail) = pc.rails.http.as_ref() {
                if rail.handled {
                    if let Some(spec) = rail.response.as_ref() {
                        let status = StatusCode::from_u16(spec.status)
                            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                        return (status, Json(spec.body.clone())).into_response();
                    }
                }
            }
            (StatusCode::OK, Json(Value::Object(pc.current))).into_response()
        }
        Err(error) => {
            tracing::error!(%error, workflow = %route.workflow, "http trigger execution failed");
            let status = match &error {
                EngineError::NoSuchWorkflow { .. } => StatusCode::NOT_FOUND,
                EngineError::Executor(ExecutorError::Cancelled) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, &error.to_string())
        }
    }
}

fn parse_query(query: Option<&str>) -> Map<String, Value> {
    let mut map = Map::new();
    let Some(query) = query else {
        return map;
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) => {
                map.insert(key.to_string(), Value::String(value.to_string()));
            }
            None => {
                map.insert(pair.to_string(), Value::String(String::new()));
            }
        }
    }
    map
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_table() {
        let handle = HttpServerHandle::new("127.0.0.1:0".parse().unwrap());
        handle.add_route(TriggerRoute {
            method: "POST".to_string(),
            path: "/orders".to_string(),
            workflow: "orders".to_string(),
            action: None,
            params: Map::new(),
        });

        assert!(handle.find_route("POST", "/orders").is_some());
        assert!(handle.find_route("GET", "/orders").is_none());

        handle.remove_route("POST", "/orders");
        assert!(handle.find_route("POST", "/orders").is_none());
    }

    #[test]
    fn test_parse_query() {
        let parsed = parse_query(Some("a=1&b=two&flag"));
        assert_eq!(parsed["a"], "1");
        assert_eq!(parsed["b"], "two");
        assert_eq!(parsed["flag"], "");
        assert!(parse_query(None).is_empty());
    }
}

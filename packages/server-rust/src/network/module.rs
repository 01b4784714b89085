//! Route table and HTTP listener lifecycle.
//!
//! Routes are recorded as they are registered and turned into an axum
//! [`Router`] only when the server starts (or when a test asks for one), so
//! registration never blocks and never binds a port.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::Method;
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::service::RouteHandler;
use super::handlers::{liveness_handler, readiness_handler, AppState};
use super::middleware::build_http_layers;
use crate::context::SharedHandler;

/// What a route runs.
#[derive(Clone)]
pub enum Endpoint {
    Service(SharedHandler),
    Liveness,
    Readiness,
}

struct Route {
    method: Method,
    path: String,
    endpoint: Endpoint,
}

pub struct HttpServer {
    config: NetworkConfig,
    state: AppState,
    routes: Mutex<Vec<Route>>,
}

impl HttpServer {
    #[must_use]
    pub fn new(config: NetworkConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            routes: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Records a route. `:name` and `*name` segments are accepted as well
    /// as axum's `{name}` form.
    ///
    /// Returns `false`, and keeps the first registration, when the method
    /// and path were already taken or the method cannot be routed.
    pub fn add_route(&self, method: Method, path: &str, endpoint: Endpoint) -> bool {
        let path = axum_path(path);
        if MethodFilter::try_from(method.clone()).is_err() {
            warn!(%method, %path, "unsupported method; route ignored");
            return false;
        }
        let mut routes = self.routes.lock();
        if routes.iter().any(|r| r.method == method && r.path == path) {
            warn!(%method, %path, "route already registered; keeping the first one");
            return false;
        }
        routes.push(Route {
            method,
            path,
            endpoint,
        });
        true
    }

    #[must_use]
    pub fn has_routes(&self) -> bool {
        !self.routes.lock().is_empty()
    }

    /// Builds the router for every route registered so far.
    pub fn build_router(&self) -> Router {
        let mut by_path: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
        for route in self.routes.lock().iter() {
            let Ok(filter) = MethodFilter::try_from(route.method.clone()) else {
                continue;
            };
            let methods = by_path
                .remove(&route.path)
                .unwrap_or_else(MethodRouter::new);
            let methods = attach(methods, filter, &route.path, &route.endpoint);
            by_path.insert(route.path.clone(), methods);
        }

        let router = by_path
            .into_iter()
            .fold(Router::new(), |router, (path, methods)| {
                router.route(&path, methods)
            });
        router
            .layer(build_http_layers(&self.config))
            .with_state(self.state.clone())
    }

    /// Binds the configured address.
    ///
    /// # Errors
    ///
    /// Fails when the address cannot be bound.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "HTTP listener bound");
        Ok(listener)
    }

    /// Serves until `shutdown` resolves, then lets open requests finish.
    ///
    /// # Errors
    ///
    /// Fatal I/O errors from the accept loop.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("HTTP listener closed");
        Ok(())
    }
}

fn attach(
    methods: MethodRouter<AppState>,
    filter: MethodFilter,
    path: &str,
    endpoint: &Endpoint,
) -> MethodRouter<AppState> {
    match endpoint {
        Endpoint::Liveness => methods.on(filter, liveness_handler),
        Endpoint::Readiness => methods.on(filter, readiness_handler),
        Endpoint::Service(handler) => {
            let route = RouteHandler {
                route: Arc::from(path),
                handler: Arc::clone(handler),
            };
            methods.on(
                filter,
                move |state: State<AppState>,
                      params: Option<Path<std::collections::HashMap<String, String>>>,
                      query: Query<std::collections::HashMap<String, String>>,
                      body: Bytes| route.handle(state, params, query, body),
            )
        }
    }
}

/// Rewrites `:name` and `*name` segments into axum's `{name}` / `{*name}`.
fn axum_path(path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::backends::MemoryBackends;
    use crate::context::Context;
    use crate::error::ServiceError;
    use crate::network::ShutdownController;
    use crate::service::resources::Resources;

    fn server() -> HttpServer {
        HttpServer::new(
            NetworkConfig::default(),
            AppState {
                resources: Arc::new(Resources::new(Arc::new(MemoryBackends::new()))),
                shutdown: Arc::new(ShutdownController::new()),
            },
        )
    }

    fn echo() -> Endpoint {
        Endpoint::Service(Arc::new(|ctx: Arc<dyn Context>| async move {
            ctx.respond(
                StatusCode::CREATED,
                json!({
                    "id": ctx.param("id"),
                    "q": ctx.query_param("q"),
                    "body": ctx.read_input(),
                }),
            )
            .await
        }))
    }

    async fn call(router: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    #[test]
    fn colon_segments_become_captures() {
        assert_eq!(axum_path("/users/:id"), "/users/{id}");
        assert_eq!(axum_path("files/*rest"), "/files/{*rest}");
        assert_eq!(axum_path("/plain"), "/plain");
    }

    #[tokio::test]
    async fn handler_sees_path_query_and_body() {
        let server = server();
        assert!(server.add_route(Method::POST, "/users/:id", echo()));
        let (status, body) = call(server.build_router(), Method::POST, "/users/7?q=x", "hello").await;
        assert_eq!(status, StatusCode::CREATED);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"id": "7", "q": "x", "body": "hello"}));
    }

    #[tokio::test]
    async fn routes_without_params_dispatch() {
        let server = server();
        server.add_route(Method::GET, "/ping", echo());
        let (status, body) = call(server.build_router(), Method::GET, "/ping", "").await;
        assert_eq!(status, StatusCode::CREATED);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["id"], "");
    }

    #[tokio::test]
    async fn duplicate_method_and_path_keeps_first() {
        let server = server();
        assert!(server.add_route(Method::GET, "/a", echo()));
        assert!(!server.add_route(
            Method::GET,
            "/a",
            Endpoint::Service(Arc::new(|_ctx: Arc<dyn Context>| async move {
                Err(ServiceError::Internal(anyhow::anyhow!("second")))
            }))
        ));
        assert!(server.add_route(Method::PUT, "/a", echo()));

        let router = server.build_router();
        assert_eq!(call(router.clone(), Method::GET, "/a", "").await.0, StatusCode::CREATED);
        assert_eq!(call(router.clone(), Method::PUT, "/a", "").await.0, StatusCode::CREATED);
        assert_eq!(
            call(router, Method::DELETE, "/a", "").await.0,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn errors_and_silent_handlers() {
        let server = server();
        server.add_route(
            Method::GET,
            "/bad",
            Endpoint::Service(Arc::new(|_ctx: Arc<dyn Context>| async move {
                Err(ServiceError::BadRequest("name is required".into()))
            })),
        );
        server.add_route(
            Method::GET,
            "/quiet",
            Endpoint::Service(Arc::new(|_ctx: Arc<dyn Context>| async move { Ok(()) })),
        );
        let router = server.build_router();

        let (status, body) = call(router.clone(), Method::GET, "/bad", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"error": "name is required"}));

        let (status, body) = call(router, Method::GET, "/quiet", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn bind_uses_ephemeral_port() {
        let server = HttpServer::new(
            NetworkConfig {
                host: "127.0.0.1".into(),
                ..NetworkConfig::default()
            },
            server().state,
        );
        let listener = server.bind().await.unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }
}

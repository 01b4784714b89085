//! The service runtime: registration, startup, and coordinated shutdown.
//!
//! Every `consume*`, `schedule`, async-task and worker registration spawns
//! its loop immediately on the current Tokio runtime, so registration must
//! happen inside one. HTTP routes are only recorded; the listener is bound
//! by [`ServiceRuntime::start`].
//!
//! Shutdown is a single broadcast: [`ServiceRuntime::stop`], SIGINT or
//! SIGTERM cancel the root token, every loop observes its child token after
//! the unit of work in hand, and `start` waits up to the configured grace
//! period for loops and in-flight requests before closing clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::Router;
use relay_core::{escape_name, ASYNC_TASK_GROUP, PTASK_GROUP};
use tokio::time::Instant;
use tracing::{info, warn};

use super::async_task::{accept_endpoint, poll_endpoint};
use super::batch::BatchConfig;
use super::config::ServiceConfig;
use super::consumer::{run_batch_consumer, run_consumer, MessageKind, Subscribe};
use super::ptask::{status_endpoint, submit_endpoint};
use super::registry::{ServiceKind, ServiceRegistry};
use super::resources::Resources;
use super::scheduler::{run_scheduler, validate_interval, ScheduleHandle};
use crate::context::{ServiceHandler, SharedHandler};
use crate::error::ServiceResult;
use crate::network::{AppState, Endpoint, HealthState, HttpServer, ShutdownController};
use crate::queue::{ReadTimeout, TopicSpec};
use crate::traits::Backends;

/// How often `start` checks whether every loop has exited on its own.
const IDLE_POLL: Duration = Duration::from_millis(100);

pub struct ServiceRuntime {
    config: ServiceConfig,
    resources: Arc<Resources>,
    shutdown: Arc<ShutdownController>,
    http: HttpServer,
    registry: ServiceRegistry,
    schedules: AtomicUsize,
}

impl ServiceRuntime {
    #[must_use]
    pub fn new(config: ServiceConfig, backends: Arc<dyn Backends>) -> Self {
        let resources = Arc::new(Resources::new(backends));
        let shutdown = Arc::new(ShutdownController::new());
        let http = HttpServer::new(
            config.network_config(),
            AppState {
                resources: Arc::clone(&resources),
                shutdown: Arc::clone(&shutdown),
            },
        );
        Self {
            config,
            resources,
            shutdown,
            http,
            registry: ServiceRegistry::new(),
            schedules: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Clients shared by every context this runtime builds.
    #[must_use]
    pub fn resources(&self) -> Arc<Resources> {
        Arc::clone(&self.resources)
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.shutdown.health_state()
    }

    /// `(name, kind)` of every background loop registered so far.
    #[must_use]
    pub fn services(&self) -> Vec<(String, ServiceKind)> {
        self.registry.services()
    }

    // -- HTTP ----------------------------------------------------------------

    fn route(&self, method: Method, path: &str, handler: SharedHandler) {
        self.http.add_route(method, path, Endpoint::Service(handler));
    }

    pub fn get<H: ServiceHandler>(&self, path: &str, handler: H) {
        self.route(Method::GET, path, Arc::new(handler));
    }

    pub fn post<H: ServiceHandler>(&self, path: &str, handler: H) {
        self.route(Method::POST, path, Arc::new(handler));
    }

    pub fn put<H: ServiceHandler>(&self, path: &str, handler: H) {
        self.route(Method::PUT, path, Arc::new(handler));
    }

    pub fn patch<H: ServiceHandler>(&self, path: &str, handler: H) {
        self.route(Method::PATCH, path, Arc::new(handler));
    }

    pub fn delete<H: ServiceHandler>(&self, path: &str, handler: H) {
        self.route(Method::DELETE, path, Arc::new(handler));
    }

    /// `GET path` answers 200 `ok` while every opened dependency is healthy.
    pub fn register_liveness_probe_endpoint(&self, path: &str) {
        self.http.add_route(Method::GET, path, Endpoint::Liveness);
    }

    /// `GET path` answers 200 only while the runtime is ready for traffic.
    pub fn register_readiness_probe_endpoint(&self, path: &str) {
        self.http.add_route(Method::GET, path, Endpoint::Readiness);
    }

    // -- Background loops ----------------------------------------------------

    /// Calls `handler` for every message of `topic` seen by consumer group
    /// `group`, one at a time.
    pub fn consume<H: ServiceHandler>(&self, topic: &str, group: &str, timeout: ReadTimeout, handler: H) {
        let source = Subscribe {
            topic: topic.to_owned(),
            group: group.to_owned(),
            timeout,
        };
        self.registry.spawn(
            format!("consume:{topic}"),
            ServiceKind::Consumer,
            run_consumer(
                self.resources(),
                source,
                MessageKind::Plain,
                Arc::new(handler),
                self.shutdown.shutdown_token(),
            ),
        );
    }

    /// Calls `handler` with batches of up to `batch_size` messages, flushing
    /// a partial batch after `batch_timeout` (zero disables the timer).
    pub fn consume_batch<H: ServiceHandler>(
        &self,
        topic: &str,
        group: &str,
        timeout: ReadTimeout,
        batch_size: usize,
        batch_timeout: Duration,
        handler: H,
    ) {
        let source = Subscribe {
            topic: topic.to_owned(),
            group: group.to_owned(),
            timeout,
        };
        self.registry.spawn(
            format!("consume-batch:{topic}"),
            ServiceKind::BatchConsumer,
            run_batch_consumer(
                self.resources(),
                source,
                BatchConfig::new(batch_size, batch_timeout),
                Arc::new(handler),
                self.shutdown.shutdown_token(),
            ),
        );
    }

    /// Calls `handler` every `interval`, first after one full interval.
    ///
    /// The returned handle stops this timer alone; runtime shutdown stops
    /// it as well.
    ///
    /// # Errors
    ///
    /// [`ServiceError::InvalidArgument`](crate::error::ServiceError::InvalidArgument)
    /// for a zero interval.
    pub fn schedule<H: ServiceHandler>(&self, interval: Duration, handler: H) -> ServiceResult<ScheduleHandle> {
        validate_interval(interval)?;
        let name = format!("schedule:{}", self.schedules.fetch_add(1, Ordering::Relaxed));
        let token = self.shutdown.shutdown_token();
        self.registry.spawn(
            name.clone(),
            ServiceKind::Scheduler,
            run_scheduler(
                name.clone(),
                self.resources(),
                interval,
                Arc::new(handler),
                token.clone(),
            ),
        );
        Ok(ScheduleHandle::new(name, token))
    }

    /// Long-running `POST path`: answers `{"ref"}` at once and runs
    /// `handler` in the background. `GET path?ref=` polls the result.
    pub fn async_post<H: ServiceHandler>(&self, path: &str, handler: H) {
        self.async_task(Method::POST, path, Arc::new(handler));
    }

    /// [`async_post`](Self::async_post) for `PUT`.
    pub fn async_put<H: ServiceHandler>(&self, path: &str, handler: H) {
        self.async_task(Method::PUT, path, Arc::new(handler));
    }

    fn async_task(&self, method: Method, path: &str, handler: SharedHandler) {
        let topic = escape_name(&[path]);
        self.spawn_envelope_consumer(
            format!("async-task:{topic}"),
            ServiceKind::AsyncTask,
            topic.clone(),
            ASYNC_TASK_GROUP,
            MessageKind::AsyncTask,
            handler,
        );
        self.route(Method::GET, path, poll_endpoint());
        self.route(method, path, accept_endpoint(topic));
    }

    /// `POST path?task_id=&worker_count=` starts a parallel task and
    /// `GET path?task_id=` reads its record. Workers are registered
    /// separately with [`ptask_worker_node`](Self::ptask_worker_node).
    pub fn ptask_endpoint(&self, path: &str) {
        let topic = escape_name(&["ptask", path]);
        self.route(Method::POST, path, submit_endpoint(topic));
        self.route(Method::GET, path, status_endpoint());
    }

    /// Runs `handler` for each worker message published by the
    /// [`ptask_endpoint`](Self::ptask_endpoint) at the same `path`. The
    /// handler's `respond` merges its result into the task record.
    pub fn ptask_worker_node<H: ServiceHandler>(&self, path: &str, handler: H) {
        let topic = escape_name(&["ptask", path]);
        self.spawn_envelope_consumer(
            format!("ptask-worker:{topic}"),
            ServiceKind::ParallelTaskWorker,
            topic,
            PTASK_GROUP,
            MessageKind::ParallelTask,
            Arc::new(handler),
        );
    }

    /// Creates the topic, then consumes it forever.
    fn spawn_envelope_consumer(
        &self,
        name: String,
        kind: ServiceKind,
        topic: String,
        group: &str,
        messages: MessageKind,
        handler: SharedHandler,
    ) {
        let resources = self.resources();
        let token = self.shutdown.shutdown_token();
        let source = Subscribe {
            topic,
            group: group.to_owned(),
            timeout: ReadTimeout::Infinite,
        };
        self.registry.spawn(name, kind, async move {
            ensure_topic(&resources, &source.topic).await;
            run_consumer(resources, source, messages, handler, token).await;
        });
    }

    // -- Lifecycle -----------------------------------------------------------

    /// The HTTP router for every route registered so far, with middleware.
    pub fn router(&self) -> Router {
        self.http.build_router()
    }

    /// Serves HTTP (when any route is registered) and waits for shutdown.
    ///
    /// Returns after SIGINT/SIGTERM, after [`stop`](Self::stop), or, when no
    /// HTTP route exists, once every registered loop has exited on its own.
    /// Loops and in-flight requests get the shutdown grace period to finish;
    /// clients are closed afterwards.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP listener cannot be bound or stops with an I/O
    /// error.
    pub async fn start(&self) -> anyhow::Result<()> {
        let grace = self.config.shutdown_grace();
        let listener = if self.http.has_routes() {
            Some(self.http.bind().await?)
        } else {
            None
        };
        let serves_http = listener.is_some();
        self.shutdown.set_ready();
        info!(
            service = %self.config.service_id,
            loops = self.registry.len(),
            http = serves_http,
            "service runtime started"
        );

        let serve = async {
            let Some(listener) = listener else {
                return Ok(());
            };
            let token = self.shutdown.shutdown_token();
            let stopping = token.clone();
            let serving = self
                .http
                .serve(listener, async move { token.cancelled_owned().await });
            let result = tokio::select! {
                result = serving => result,
                () = async {
                    stopping.cancelled().await;
                    tokio::time::sleep(grace).await;
                } => {
                    warn!("HTTP connections still open after grace period");
                    Ok(())
                }
            };
            if result.is_err() {
                self.shutdown.trigger_shutdown();
            }
            result
        };

        let wait = async {
            tokio::select! {
                () = termination_signal() => info!("termination signal received"),
                () = self.shutdown.cancelled() => info!("stop requested"),
                () = self.loops_finished(serves_http) => info!("every service loop finished"),
            }
            self.shutdown.trigger_shutdown();
            Instant::now() + grace
        };

        // One grace period covers serving, request drain and loop joins.
        let (served, deadline) = tokio::join!(serve, wait);

        let remaining = || deadline.saturating_duration_since(Instant::now());
        if !self.shutdown.wait_for_drain(remaining()).await {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "requests still in flight after grace period"
            );
        }
        let unfinished = self.registry.join_all(remaining()).await;
        if !unfinished.is_empty() {
            warn!(?unfinished, "service loops still running at exit");
        }
        self.cleanup().await;
        info!(service = %self.config.service_id, "service runtime stopped");
        served
    }

    /// Requests shutdown. Idempotent, and safe before `start`: a later
    /// `start` returns right away.
    pub fn stop(&self) {
        if self.shutdown.trigger_shutdown() {
            info!(service = %self.config.service_id, "stop requested");
        }
    }

    /// Closes every client the runtime opened. Only the first call acts.
    pub async fn cleanup(&self) {
        if self.resources.close().await {
            info!(service = %self.config.service_id, "resources closed");
        }
    }

    /// Resolves once every registered loop has returned. Never resolves
    /// while HTTP is served or when nothing is registered.
    async fn loops_finished(&self, serves_http: bool) {
        if serves_http || self.registry.is_empty() {
            return std::future::pending().await;
        }
        while !self.registry.all_finished() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

async fn ensure_topic(resources: &Resources, topic: &str) {
    let spec = TopicSpec::service_default(topic);
    let created = match resources.queue() {
        Ok(queue) => queue.create_topic(&spec).await,
        Err(e) => Err(e),
    };
    if let Err(e) = created {
        warn!(topic, error = %e, "topic creation failed; consuming anyway");
    }
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable; listening for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use relay_core::{RunStatus, Task};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::backends::MemoryBackends;
    use crate::context::Context;
    use crate::error::{CacheError, QueueError, ServiceError};
    use crate::traits::{Cache, MessageQueue, Producer};

    fn runtime(backends: &MemoryBackends) -> ServiceRuntime {
        let config = ServiceConfig {
            http_host: "127.0.0.1".into(),
            http_port: 0,
            shutdown_grace_secs: 1,
            ..ServiceConfig::default()
        };
        ServiceRuntime::new(config, Arc::new(backends.clone()))
    }

    async fn call(router: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = router
            .clone()
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
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_safe_before_start() {
        let backends = MemoryBackends::new();
        let rt = runtime(&backends);
        rt.stop();
        rt.stop();
        tokio::time::timeout(Duration::from_secs(2), rt.start())
            .await
            .unwrap()
            .unwrap();
        rt.stop();
        rt.cleanup().await;
    }

    #[tokio::test]
    async fn stop_ends_a_serving_runtime() {
        let backends = MemoryBackends::new();
        let rt = Arc::new(runtime(&backends));
        rt.get("/ping", |ctx: Arc<dyn Context>| async move {
            ctx.respond(StatusCode::OK, json!("pong")).await
        });
        rt.consume("events", "g", ReadTimeout::Infinite, |_ctx: Arc<dyn Context>| async {
            Ok(())
        });

        let running = Arc::clone(&rt);
        let started = tokio::spawn(async move { running.start().await });
        for _ in 0..100 {
            if rt.health_state() == HealthState::Ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(rt.health_state(), HealthState::Ready);

        rt.stop();
        tokio::time::timeout(Duration::from_secs(3), started)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(rt.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn runtime_without_http_exits_when_loops_go_idle() {
        let backends = MemoryBackends::new();
        backends.broker().send_message("jobs", "", "1").await.unwrap();
        let rt = runtime(&backends);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        rt.consume_batch(
            "jobs",
            "g",
            ReadTimeout::After(Duration::from_millis(50)),
            10,
            Duration::ZERO,
            move |ctx: Arc<dyn Context>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().extend(ctx.read_inputs());
                    Ok(())
                }
            },
        );
        tokio::time::timeout(Duration::from_secs(3), rt.start())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*seen.lock(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn zero_interval_schedule_is_rejected() {
        let backends = MemoryBackends::new();
        let rt = runtime(&backends);
        let result = rt.schedule(Duration::ZERO, |_ctx: Arc<dyn Context>| async { Ok(()) });
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));
        assert!(rt.services().is_empty());

        let handle = rt
            .schedule(Duration::from_secs(60), |_ctx: Arc<dyn Context>| async { Ok(()) })
            .unwrap();
        assert!(!handle.is_stopped());
        rt.stop();
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn schedule_names_stay_unique() {
        let backends = MemoryBackends::new();
        let rt = runtime(&backends);
        let first = rt
            .schedule(Duration::from_secs(60), |_ctx: Arc<dyn Context>| async { Ok(()) })
            .unwrap();
        rt.consume("events", "g", ReadTimeout::Infinite, |_ctx: Arc<dyn Context>| async {
            Ok(())
        });
        let second = rt
            .schedule(Duration::from_secs(60), |_ctx: Arc<dyn Context>| async { Ok(()) })
            .unwrap();

        rt.stop();
        tokio::time::timeout(Duration::from_secs(3), rt.start())
            .await
            .unwrap()
            .unwrap();
        assert!(rt.services().is_empty());

        let third = rt
            .schedule(Duration::from_secs(60), |_ctx: Arc<dyn Context>| async { Ok(()) })
            .unwrap();
        assert_eq!(first.name(), "schedule:0");
        assert_eq!(second.name(), "schedule:1");
        assert_eq!(third.name(), "schedule:2");
    }

    #[tokio::test]
    async fn shutdown_waits_one_grace_period_in_total() {
        let backends = MemoryBackends::new();
        backends.broker().send_message("slow", "", "1").await.unwrap();
        let rt = Arc::new(runtime(&backends));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let started_tx = Arc::new(parking_lot::Mutex::new(Some(started_tx)));
        rt.consume("slow", "g", ReadTimeout::Infinite, move |_ctx: Arc<dyn Context>| {
            let started_tx = Arc::clone(&started_tx);
            async move {
                let tx = started_tx.lock().take();
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        });

        let running = Arc::clone(&rt);
        let started = tokio::spawn(async move { running.start().await });
        started_rx.await.unwrap();
        // A request that never finishes plus a loop stuck in its handler.
        let _request = rt.shutdown.in_flight_guard();

        let begun = std::time::Instant::now();
        rt.stop();
        tokio::time::timeout(Duration::from_secs(5), started)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let elapsed = begun.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1800), "{elapsed:?}");
    }

    #[tokio::test]
    async fn async_post_correlates_request_and_result() {
        let backends = MemoryBackends::new();
        let rt = runtime(&backends);
        rt.async_post("/register", |ctx: Arc<dyn Context>| async move {
            let input: Value = serde_json::from_str(&ctx.read_input())?;
            ctx.respond(StatusCode::CREATED, json!({ "registered": input["name"] }))
                .await
        });
        let router = rt.router();

        let (status, body) = call(&router, Method::POST, "/register", r#"{"name":"ann"}"#).await;
        assert_eq!(status, StatusCode::OK);
        let reference = body["ref"].as_str().unwrap().to_string();
        assert!(reference.starts_with("atask-"));

        let uri = format!("/register?ref={reference}");
        let mut last = Value::Null;
        for _ in 0..200 {
            let (status, body) = call(&router, Method::GET, &uri, "").await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] == "success" {
                last = body;
                break;
            }
            assert_eq!(body["status"], "processing");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(last, json!({"status": "success", "code": 201, "data": {"registered": "ann"}}));

        assert_eq!(call(&router, Method::GET, "/register", "").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(
            call(&router, Method::GET, "/register?ref=atask-missing", "").await.0,
            StatusCode::NOT_FOUND
        );
        rt.stop();
    }

    #[tokio::test]
    async fn ptask_fans_out_once_and_merges_every_worker() {
        let backends = MemoryBackends::new();
        let rt = runtime(&backends);
        rt.ptask_endpoint("/batch");
        let router = rt.router();

        let (status, body) =
            call(&router, Method::POST, "/batch?task_id=t1&worker_count=4", "payload").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"task_id": "t1"}));
        assert_eq!(backends.broker().len("ptask-batch"), 4);

        // Resubmitting a running task publishes nothing.
        let (status, body) =
            call(&router, Method::POST, "/batch?task_id=t1&worker_count=4", "payload").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"task_id": "t1"}));
        assert_eq!(backends.broker().len("ptask-batch"), 4);

        let (_, body) = call(&router, Method::GET, "/batch?task_id=t1", "").await;
        let task: Task = serde_json::from_value(body).unwrap();
        assert_eq!(task.status, RunStatus::Running);
        assert_eq!(task.workers.len(), 4);

        rt.ptask_worker_node("/batch", |ctx: Arc<dyn Context>| async move {
            ctx.respond(StatusCode::OK, json!(ctx.read_input())).await
        });

        let mut task = None;
        for _ in 0..200 {
            let (_, body) = call(&router, Method::GET, "/batch?task_id=t1", "").await;
            let current: Task = serde_json::from_value(body).unwrap();
            if current.is_complete() {
                task = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let task = task.expect("task never completed");
        assert!(task.workers.iter().all(|w| w.response == json!("payload")));

        let (status, body) = call(&router, Method::GET, "/batch?task_id=never", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
        assert_eq!(call(&router, Method::POST, "/batch", "").await.0, StatusCode::BAD_REQUEST);
        rt.stop();
    }

    struct BrokenCache;

    #[async_trait::async_trait]
    impl Cache for BrokenCache {
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), CacheError> {
            Ok(())
        }
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Ok(None)
        }
        async fn healthcheck(&self) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("PING timed out".into()))
        }
        async fn close(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    struct BrokenCacheBackends(MemoryBackends);

    impl Backends for BrokenCacheBackends {
        fn connect_cache(&self) -> Result<Arc<dyn Cache>, CacheError> {
            Ok(Arc::new(BrokenCache))
        }
        fn connect_producer(&self) -> Result<Arc<dyn Producer>, QueueError> {
            self.0.connect_producer()
        }
        fn connect_queue(&self) -> Result<Arc<dyn MessageQueue>, QueueError> {
            self.0.connect_queue()
        }
    }

    #[tokio::test]
    async fn probes_report_dependencies_and_lifecycle() {
        let healthy = runtime(&MemoryBackends::new());
        healthy.register_liveness_probe_endpoint("/healthz");
        healthy.register_readiness_probe_endpoint("/readyz");
        let router = healthy.router();
        assert_eq!(
            call(&router, Method::GET, "/healthz", "").await,
            (StatusCode::OK, Value::String("ok".into()))
        );
        assert_eq!(
            call(&router, Method::GET, "/readyz", "").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        let broken = ServiceRuntime::new(
            ServiceConfig::default(),
            Arc::new(BrokenCacheBackends(MemoryBackends::new())),
        );
        broken.register_liveness_probe_endpoint("/healthz");
        let router = broken.router();
        // Nothing opened the cache yet.
        assert_eq!(call(&router, Method::GET, "/healthz", "").await.0, StatusCode::OK);

        broken.resources().cache().unwrap();
        let (status, body) = call(&router, Method::GET, "/healthz", "").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            Value::String(
                "Healthcheck failed because of Cacher healthcheck failed: cache unavailable: PING timed out"
                    .into()
            )
        );
    }
}

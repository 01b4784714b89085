//! Request dispatch into user handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::AppState;
use crate::context::{Context, ContextKind, HttpContext, SharedHandler};
use crate::service::consumer::record_failure;

/// Runs `handler` against an [`HttpContext`] built from the request.
///
/// The recorded `respond` call becomes the response; a handler that never
/// responds yields an empty 200. Handler errors are rendered by
/// [`ServiceError`](crate::error::ServiceError)'s `IntoResponse`.
pub async fn dispatch(
    state: AppState,
    handler: SharedHandler,
    route: &str,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Bytes,
) -> Response {
    let _guard = state.shutdown.in_flight_guard();
    let ctx = Arc::new(HttpContext::new(
        state.resources,
        params,
        query,
        String::from_utf8_lossy(&body).into_owned(),
    ));

    match handler.call(Arc::clone(&ctx) as Arc<dyn Context>).await {
        Ok(()) => match ctx.take_response() {
            Some((code, data)) => (code, Json(data)).into_response(),
            None => StatusCode::OK.into_response(),
        },
        Err(e) => {
            record_failure(ContextKind::Http, route, &e);
            e.into_response()
        }
    }
}

/// Axum-facing wrapper for one registered route.
#[derive(Clone)]
pub(crate) struct RouteHandler {
    pub(crate) route: Arc<str>,
    pub(crate) handler: SharedHandler,
}

impl RouteHandler {
    pub(crate) async fn handle(
        self,
        State(state): State<AppState>,
        params: Option<Path<HashMap<String, String>>>,
        Query(query): Query<HashMap<String, String>>,
        body: Bytes,
    ) -> Response {
        let params = params.map(|Path(p)| p).unwrap_or_default();
        dispatch(state, self.handler, &self.route, params, query, body).await
    }
}

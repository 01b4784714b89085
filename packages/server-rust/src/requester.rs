//! Outbound HTTP client handed to handlers through `Context::requester`.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use tracing::debug;

use crate::error::RequestError;

/// Query or form parameters as ordered key/value pairs.
pub type Params<'a> = &'a [(&'a str, &'a str)];

// reqwest clients pool connections; every requester shares this one.
static SHARED_CLIENT: LazyLock<Client> = LazyLock::new(Client::new);

/// Calls a single upstream service rooted at `base_url`.
///
/// Every call returns the response body as text. A 4xx/5xx status is an
/// error carrying that body.
#[derive(Debug, Clone)]
pub struct Requester {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl Requester {
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: SHARED_CLIENT.clone(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            timeout,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// With an empty base URL, `path` is used as the full URL.
    fn url(&self, path: &str) -> String {
        if self.base_url.is_empty() {
            path.to_owned()
        } else if path.is_empty() {
            self.base_url.clone()
        } else if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// `GET path?params`.
    ///
    /// # Errors
    ///
    /// Transport failures and 4xx/5xx responses.
    pub async fn get(&self, path: &str, params: Params<'_>) -> Result<String, RequestError> {
        self.send(self.client.get(self.url(path)).query(params)).await
    }

    /// `POST path` with a form-encoded body.
    ///
    /// # Errors
    ///
    /// Transport failures and 4xx/5xx responses.
    pub async fn post(&self, path: &str, params: Params<'_>) -> Result<String, RequestError> {
        self.send(self.client.post(self.url(path)).form(params)).await
    }

    /// `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// Transport failures and 4xx/5xx responses.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<String, RequestError> {
        self.send(self.client.post(self.url(path)).json(body)).await
    }

    /// `PUT path` with a form-encoded body.
    ///
    /// # Errors
    ///
    /// Transport failures and 4xx/5xx responses.
    pub async fn put(&self, path: &str, params: Params<'_>) -> Result<String, RequestError> {
        self.send(self.client.put(self.url(path)).form(params)).await
    }

    /// `PUT path` with a JSON body.
    ///
    /// # Errors
    ///
    /// Transport failures and 4xx/5xx responses.
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<String, RequestError> {
        self.send(self.client.put(self.url(path)).json(body)).await
    }

    /// `DELETE path?params`.
    ///
    /// # Errors
    ///
    /// Transport failures and 4xx/5xx responses.
    pub async fn delete(&self, path: &str, params: Params<'_>) -> Result<String, RequestError> {
        self.send(self.client.delete(self.url(path)).query(params)).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, RequestError> {
        let response = request.timeout(self.timeout).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), base_url = %self.base_url, "upstream responded");

        if status.is_client_error() || status.is_server_error() {
            return Err(RequestError::Status { status, body });
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Form, Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use super::*;

    async fn upstream() -> String {
        let app = Router::new()
            .route(
                "/echo",
                get(|Query(q): Query<HashMap<String, String>>| async move { Json(json!(q)) })
                    .post(|Form(f): Form<HashMap<String, String>>| async move { Json(json!(f)) })
                    .put(|Json(v): Json<Value>| async move { Json(v) })
                    .delete(|| async { "gone" }),
            )
            .route(
                "/fail",
                get(|| async { (StatusCode::BAD_GATEWAY, "upstream broke") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn get_sends_query_params() {
        let req = Requester::new(upstream().await, Duration::from_secs(5));
        let body = req.get("/echo", &[("name", "ann")]).await.unwrap();
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"name": "ann"}));
    }

    #[tokio::test]
    async fn post_sends_form_body() {
        let req = Requester::new(upstream().await, Duration::from_secs(5));
        let body = req.post("echo", &[("a", "1"), ("b", "2")]).await.unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&body).unwrap(),
            json!({"a": "1", "b": "2"})
        );
    }

    #[tokio::test]
    async fn put_json_round_trips() {
        let req = Requester::new(upstream().await, Duration::from_secs(5));
        let body = req.put_json("/echo", &json!({"x": [1, 2]})).await.unwrap();
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"x": [1, 2]}));
    }

    #[tokio::test]
    async fn delete_returns_body() {
        let req = Requester::new(upstream().await, Duration::from_secs(5));
        assert_eq!(req.delete("/echo", &[]).await.unwrap(), "gone");
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let req = Requester::new(upstream().await, Duration::from_secs(5));
        match req.get("/fail", &[]).await {
            Err(RequestError::Status { status, body }) => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(body, "upstream broke");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn urls_join_cleanly() {
        let req = Requester::new("http://svc/", Duration::from_secs(1));
        assert_eq!(req.url("/a"), "http://svc/a");
        assert_eq!(req.url("a"), "http://svc/a");
        assert_eq!(req.url(""), "http://svc");

        let absolute = Requester::new("", Duration::from_secs(1));
        assert_eq!(absolute.url("http://other/x"), "http://other/x");
    }
}

//! REST adapter
//!
//! Every route takes a JSON body, including the GET routes. POST `/meta`
//! and `/metas` are shared by set and delete; the payload shape decides
//! which one runs.

use crate::error::ApiError;
use crate::handler::{IndexInfo, MetaHandler};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bimeta_proto::payload::{
    Empty, MetaKey, MetaKeyVal, MetaKeyVals, MetaKeys, MetaVal, MetaVals,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::warn;

type AppState = Arc<MetaHandler>;

/// JSON extractor whose rejection is an [`ApiError`]
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_argument(rejection.body_text())
    }
}

/// POST `/meta` body
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetaWrite {
    Set(MetaKeyVal),
    Delete(MetaKey),
}

/// POST `/metas` body
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetasWrite {
    Set(MetaKeyVals),
    Delete(MetaKeys),
}

/// Build the REST router. Every route runs under `timeout`; a panicking
/// handler becomes a 500.
pub fn router(handler: Arc<MetaHandler>, timeout: Duration) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/meta", get(get_meta).post(write_meta))
        .route("/metas", get(get_metas).post(write_metas))
        .route("/inverse/meta", get(get_meta_inverse).post(delete_meta_inverse))
        .route(
            "/inverse/metas",
            get(get_metas_inverse).post(delete_metas_inverse),
        )
        .layer(middleware::from_fn_with_state(timeout, timeout_layer))
        .layer(CatchPanicLayer::new())
        .with_state(handler)
}

/// Answer 408 once the deadline passes. The handler runs as its own task,
/// so a timed-out write still finishes both of its records.
async fn timeout_layer(State(timeout): State<Duration>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let handler = tokio::spawn(next.run(req));
    match tokio::time::timeout(timeout, handler).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Ok(Err(e)) => {
            warn!(path = %path, "Handler task failed: {}", e);
            ApiError::internal("request handler was cancelled").into_response()
        }
        Err(_) => {
            warn!(path = %path, "Handler timed out after {:?}", timeout);
            ApiError::deadline_exceeded(format!(
                "request did not complete within {} ms",
                timeout.as_millis()
            ))
            .into_response()
        }
    }
}

async fn index(State(handler): State<AppState>) -> Result<Json<IndexInfo>, ApiError> {
    Ok(Json(handler.index().await?))
}

async fn get_meta(
    State(handler): State<AppState>,
    JsonBody(req): JsonBody<MetaKey>,
) -> Result<Json<MetaVal>, ApiError> {
    let val = handler.get_meta(&req.key).await?;
    Ok(Json(MetaVal { val }))
}

async fn get_metas(
    State(handler): State<AppState>,
    JsonBody(req): JsonBody<MetaKeys>,
) -> Result<Json<MetaVals>, ApiError> {
    let vals = handler.get_metas(&req.keys).await?;
    Ok(Json(MetaVals { vals }))
}

async fn get_meta_inverse(
    State(handler): State<AppState>,
    JsonBody(req): JsonBody<MetaVal>,
) -> Result<Json<MetaKey>, ApiError> {
    let key = handler.get_meta_inverse(&req.val).await?;
    Ok(Json(MetaKey { key }))
}

async fn get_metas_inverse(
    State(handler): State<AppState>,
    JsonBody(req): JsonBody<MetaVals>,
) -> Result<Json<MetaKeys>, ApiError> {
    let keys = handler.get_metas_inverse(&req.vals).await?;
    Ok(Json(MetaKeys { keys }))
}

async fn write_meta(
    State(handler): State<AppState>,
    JsonBody(req): JsonBody<MetaWrite>,
) -> Result<Response, ApiError> {
    match req {
        MetaWrite::Set(kv) => {
            handler.set_meta(&kv.key, &kv.val).await?;
            Ok(Json(Empty {}).into_response())
        }
        MetaWrite::Delete(req) => {
            let val = handler.delete_meta(&req.key).await?;
            Ok(Json(MetaVal { val }).into_response())
        }
    }
}

async fn write_metas(
    State(handler): State<AppState>,
    JsonBody(req): JsonBody<MetasWrite>,
) -> Result<Response, ApiError> {
    match req {
        MetasWrite::Set(req) => {
            let kvs: Vec<(String, String)> =
                req.kvs.into_iter().map(|kv| (kv.key, kv.val)).collect();
            handler.set_metas(&kvs).await?;
            Ok(Json(Empty {}).into_response())
        }
        MetasWrite::Delete(req) => {
            let vals = handler.delete_metas(&req.keys).await?;
            Ok(Json(MetaVals { vals }).into_response())
        }
    }
}

async fn delete_meta_inverse(
    State(handler): State<AppState>,
    JsonBody(req): JsonBody<MetaVal>,
) -> Result<Json<MetaKey>, ApiError> {
    let key = handler.delete_meta_inverse(&req.val).await?;
    Ok(Json(MetaKey { key }))
}

async fn delete_metas_inverse(
    State(handler): State<AppState>,
    JsonBody(req): JsonBody<MetaVals>,
) -> Result<Json<MetaKeys>, ApiError> {
    let keys = handler.delete_metas_inverse(&req.vals).await?;
    Ok(Json(MetaKeys { keys }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::test_handler;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{self, Method, StatusCode};
    use bimeta_store::{BidirectionalStore, EngineHandle, EngineResult, KvEngine};
    use serde_json::{Value, json};
    use std::path::Path;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const TIMEOUT: Duration = Duration::from_secs(3);

    async fn test_router(dir: &TempDir) -> Router {
        let (handler, _engine) = test_handler(dir).await;
        router(Arc::new(handler), TIMEOUT)
    }

    async fn call(router: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/meta",
            r#"{"key": "user:1", "val": "alice"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, Method::GET, "/meta", r#"{"key": "user:1"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"val": "alice"}));

        let (status, body) = call(&app, Method::GET, "/inverse/meta", r#"{"val": "alice"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"key": "user:1"}));
    }

    #[tokio::test]
    async fn test_post_meta_dispatches_on_shape() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;

        call(&app, Method::POST, "/meta", r#"{"key": "k", "val": "v"}"#).await;

        let (status, body) = call(&app, Method::POST, "/meta", r#"{"key": "k"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"val": "v"}));

        let (status, _) = call(&app, Method::GET, "/meta", r#"{"key": "k"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        // Inverse record is untouched by a forward delete.
        let (status, body) = call(&app, Method::GET, "/inverse/meta", r#"{"val": "v"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"key": "k"}));
    }

    #[tokio::test]
    async fn test_batch_routes() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/metas",
            r#"{"kvs": [{"key": "a", "val": "1"}, {"key": "b", "val": "2"}]}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/metas", r#"{"keys": ["b", "a"]}"#).await;
        assert_eq!(body, json!({"vals": ["2", "1"]}));

        let (_, body) = call(&app, Method::GET, "/inverse/metas", r#"{"vals": ["1"]}"#).await;
        assert_eq!(body, json!({"keys": ["a"]}));

        let (status, body) = call(&app, Method::POST, "/metas", r#"{"keys": ["a", "zz"]}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "UNKNOWN");
        assert_eq!(body["partial"], json!(["1"]));

        let (status, body) =
            call(&app, Method::POST, "/inverse/metas", r#"{"vals": ["2"]}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"keys": ["b"]}));
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;

        let (status, body) = call(&app, Method::GET, "/meta", r#"{"key": "ghost"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
        assert_eq!(body["message"], "GetMeta key ghost not found");
        assert!(body.get("partial").is_none());

        let (status, body) =
            call(&app, Method::POST, "/inverse/meta", r#"{"val": "ghost"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "UNKNOWN");
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;

        let (status, body) = call(&app, Method::GET, "/meta", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ARGUMENT");

        let (status, _) = call(&app, Method::GET, "/meta", r#"{"val": "x"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_index() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;
        call(&app, Method::POST, "/meta", r#"{"key": "a", "val": "1"}"#).await;

        let (status, body) = call(&app, Method::GET, "/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "bimeta-server");
        assert_eq!(body["records"], 2);
    }

    /// Engine whose reads never finish in time. Reading `kv:boom` panics.
    struct SlowEngine;

    #[async_trait]
    impl KvEngine for SlowEngine {
        async fn open(&self, _path: &Path) -> EngineResult<()> {
            Ok(())
        }

        async fn put(&self, _key: &str, _value: &str) -> EngineResult<Option<String>> {
            Ok(None)
        }

        async fn get(&self, key: &str) -> EngineResult<Option<String>> {
            assert_ne!(key, "kv:boom", "engine blew up");
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn delete(&self, _key: &str) -> EngineResult<()> {
            Ok(())
        }

        async fn take(&self, _key: &str) -> EngineResult<Option<String>> {
            Ok(None)
        }

        async fn restore_if(
            &self,
            _key: &str,
            _expected: &str,
            _previous: Option<&str>,
        ) -> EngineResult<bool> {
            Ok(false)
        }

        async fn size(&self) -> EngineResult<u64> {
            Ok(0)
        }

        async fn compact(&self) -> EngineResult<bool> {
            Ok(false)
        }

        async fn pause_compaction(&self) -> EngineResult<()> {
            Ok(())
        }

        async fn resume_compaction(&self) -> EngineResult<()> {
            Ok(())
        }

        async fn close(&self) -> EngineResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let handler = MetaHandler::new(BidirectionalStore::new(Arc::new(SlowEngine)));
        let app = router(Arc::new(handler), Duration::from_millis(50));

        let (status, body) = call(&app, Method::GET, "/meta", r#"{"key": "k"}"#).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body["code"], "DEADLINE_EXCEEDED");
    }

    #[tokio::test]
    async fn test_handler_panic_is_internal_error() {
        let handler = MetaHandler::new(BidirectionalStore::new(Arc::new(SlowEngine)));
        let app = router(Arc::new(handler), TIMEOUT);

        let request = http::Request::builder()
            .method(Method::GET)
            .uri("/meta")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"key": "boom"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    /// Engine wrapper that holds every inverse write for a while
    struct DelayedInverseWrites {
        inner: Arc<EngineHandle>,
        delay: Duration,
    }

    #[async_trait]
    impl KvEngine for DelayedInverseWrites {
        async fn open(&self, path: &Path) -> EngineResult<()> {
            self.inner.open(path).await
        }

        async fn put(&self, key: &str, value: &str) -> EngineResult<Option<String>> {
            if key.starts_with("vk:") {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.put(key, value).await
        }

        async fn get(&self, key: &str) -> EngineResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> EngineResult<()> {
            self.inner.delete(key).await
        }

        async fn take(&self, key: &str) -> EngineResult<Option<String>> {
            self.inner.take(key).await
        }

        async fn restore_if(
            &self,
            key: &str,
            expected: &str,
            previous: Option<&str>,
        ) -> EngineResult<bool> {
            self.inner.restore_if(key, expected, previous).await
        }

        async fn size(&self) -> EngineResult<u64> {
            self.inner.size().await
        }

        async fn compact(&self) -> EngineResult<bool> {
            self.inner.compact().await
        }

        async fn pause_compaction(&self) -> EngineResult<()> {
            self.inner.pause_compaction().await
        }

        async fn resume_compaction(&self) -> EngineResult<()> {
            self.inner.resume_compaction().await
        }

        async fn close(&self) -> EngineResult<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_timed_out_write_still_lands() {
        let dir = TempDir::new().unwrap();
        let (_, engine) = test_handler(&dir).await;
        let delayed = DelayedInverseWrites {
            inner: Arc::clone(&engine),
            delay: Duration::from_millis(200),
        };
        let handler = MetaHandler::new(BidirectionalStore::new(Arc::new(delayed)));
        let app = router(Arc::new(handler), Duration::from_millis(50));

        let (status, body) = call(
            &app,
            Method::POST,
            "/meta",
            r#"{"key": "user:1", "val": "alice"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body["code"], "DEADLINE_EXCEEDED");

        tokio::time::sleep(Duration::from_millis(400)).await;
        let (status, body) = call(&app, Method::GET, "/inverse/meta", r#"{"val": "alice"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"key": "user:1"}));
        assert_eq!(engine.size().await.unwrap(), 2);
    }
}

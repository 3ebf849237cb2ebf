//! Request handler
//!
//! [`MetaHandler`] runs every API operation against the bidirectional store
//! and translates store outcomes into [`ApiError`]s. The gRPC service and the
//! REST routes are thin adapters over it.
//!
//! Client-facing messages name the operation and the key or value the
//! client sent. The underlying [`StoreError`] is only logged.

use crate::error::{ApiError, Partial};
use bimeta_store::{BatchError, BidirectionalStore, StoreError};
use serde::Serialize;
use tracing::{error, instrument, warn};

/// Service information returned by the REST index route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub records: u64,
}

/// Metadata request handler
pub struct MetaHandler {
    store: BidirectionalStore,
}

/// Read path: not-found is reported as such, anything else is internal.
fn read_error(op: &str, subject: &str, err: &StoreError) -> ApiError {
    if err.is_not_found() {
        warn!("{op}: {err}");
        ApiError::not_found(format!("{op} {subject} not found"))
    } else {
        error!("{op} read failed: {err}");
        ApiError::internal(format!("{op} {subject} failed to read"))
    }
}

fn write_error(op: &str, subject: &str, err: &StoreError) -> ApiError {
    error!("{op} write failed: {err}");
    ApiError::internal(format!("{op} {subject} failed to store"))
}

/// Delete path: every failure, not-found included, is reported as unknown.
fn delete_error(op: &str, subject: &str, err: &StoreError) -> ApiError {
    if err.is_not_found() {
        warn!("{op}: {err}");
        ApiError::unknown(format!("{op} {subject} not found"))
    } else {
        error!("{op} delete failed: {err}");
        ApiError::unknown(format!("{op} {subject} failed to delete"))
    }
}

type Translate = fn(&str, &str, &StoreError) -> ApiError;

/// Translate a batch abort; `subject` describes the failing item.
fn batch_error(
    op: &str,
    err: BatchError<String>,
    subject: impl FnOnce(usize) -> String,
    translate: Translate,
    partial: fn(Vec<String>) -> Partial,
) -> ApiError {
    warn!(
        failed_at = err.failed_at,
        completed = err.completed.len(),
        "{op} batch aborted"
    );
    translate(op, &subject(err.failed_at), &err.source).with_partial(partial(err.completed))
}

fn item(items: &[String], index: usize) -> &str {
    items.get(index).map_or("", String::as_str)
}

impl MetaHandler {
    pub const fn new(store: BidirectionalStore) -> Self {
        Self { store }
    }

    #[instrument(name = "Index", skip(self))]
    pub async fn index(&self) -> Result<IndexInfo, ApiError> {
        let records = self
            .store
            .size()
            .await
            .map_err(|e| read_error("Index", "record count", &e))?;
        Ok(IndexInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            records,
        })
    }

    #[instrument(name = "GetMeta", skip(self))]
    pub async fn get_meta(&self, key: &str) -> Result<String, ApiError> {
        self.store
            .get(key)
            .await
            .map_err(|e| read_error("GetMeta", &format!("key {key}"), &e))
    }

    #[instrument(name = "GetMetas", skip_all, fields(count = keys.len()))]
    pub async fn get_metas(&self, keys: &[String]) -> Result<Vec<String>, ApiError> {
        self.store.get_many(keys).await.map_err(|e| {
            batch_error(
                "GetMetas",
                e,
                |i| format!("key {}", item(keys, i)),
                read_error,
                Partial::Vals,
            )
        })
    }

    #[instrument(name = "GetMetaInverse", skip(self))]
    pub async fn get_meta_inverse(&self, val: &str) -> Result<String, ApiError> {
        self.store
            .get_inverse(val)
            .await
            .map_err(|e| read_error("GetMetaInverse", &format!("val {val}"), &e))
    }

    #[instrument(name = "GetMetasInverse", skip_all, fields(count = vals.len()))]
    pub async fn get_metas_inverse(&self, vals: &[String]) -> Result<Vec<String>, ApiError> {
        self.store.get_many_inverse(vals).await.map_err(|e| {
            batch_error(
                "GetMetasInverse",
                e,
                |i| format!("val {}", item(vals, i)),
                read_error,
                Partial::Keys,
            )
        })
    }

    #[instrument(name = "SetMeta", skip(self))]
    pub async fn set_meta(&self, key: &str, val: &str) -> Result<(), ApiError> {
        self.store
            .put(key, val)
            .await
            .map_err(|e| write_error("SetMeta", &format!("key {key} val {val}"), &e))
    }

    #[instrument(name = "SetMetas", skip_all, fields(count = kvs.len()))]
    pub async fn set_metas(&self, kvs: &[(String, String)]) -> Result<(), ApiError> {
        self.store.set_many(kvs).await.map_err(|e| {
            batch_error(
                "SetMetas",
                e,
                |i| match kvs.get(i) {
                    Some((key, val)) => format!("key {key} val {val}"),
                    None => String::new(),
                },
                write_error,
                Partial::Keys,
            )
        })
    }

    #[instrument(name = "DeleteMeta", skip(self))]
    pub async fn delete_meta(&self, key: &str) -> Result<String, ApiError> {
        self.store
            .delete(key)
            .await
            .map_err(|e| delete_error("DeleteMeta", &format!("key {key}"), &e))
    }

    #[instrument(name = "DeleteMetas", skip_all, fields(count = keys.len()))]
    pub async fn delete_metas(&self, keys: &[String]) -> Result<Vec<String>, ApiError> {
        self.store.delete_many(keys).await.map_err(|e| {
            batch_error(
                "DeleteMetas",
                e,
                |i| format!("key {}", item(keys, i)),
                delete_error,
                Partial::Vals,
            )
        })
    }

    #[instrument(name = "DeleteMetaInverse", skip(self))]
    pub async fn delete_meta_inverse(&self, val: &str) -> Result<String, ApiError> {
        self.store
            .delete_inverse(val)
            .await
            .map_err(|e| delete_error("DeleteMetaInverse", &format!("val {val}"), &e))
    }

    #[instrument(name = "DeleteMetasInverse", skip_all, fields(count = vals.len()))]
    pub async fn delete_metas_inverse(&self, vals: &[String]) -> Result<Vec<String>, ApiError> {
        self.store.delete_many_inverse(vals).await.map_err(|e| {
            batch_error(
                "DeleteMetasInverse",
                e,
                |i| format!("val {}", item(vals, i)),
                delete_error,
                Partial::Keys,
            )
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ApiCode;
    use async_trait::async_trait;
    use bimeta_store::{
        EngineError, EngineHandle, EngineOptions, EngineResult, KvEngine, RedbError,
    };
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) async fn test_handler(dir: &TempDir) -> (MetaHandler, Arc<EngineHandle>) {
        let engine = Arc::new(EngineHandle::new(EngineOptions::default()).unwrap());
        engine.open(&dir.path().join("meta.redb")).await.unwrap();
        let store = BidirectionalStore::new(Arc::clone(&engine) as Arc<dyn KvEngine>);
        (MetaHandler::new(store), engine)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_get_translation() {
        let dir = TempDir::new().unwrap();
        let (handler, _engine) = test_handler(&dir).await;

        handler.set_meta("user:1", "alice").await.unwrap();
        assert_eq!(handler.get_meta("user:1").await.unwrap(), "alice");
        assert_eq!(handler.get_meta_inverse("alice").await.unwrap(), "user:1");

        let err = handler.get_meta("user:9").await.unwrap_err();
        assert_eq!(err.code, ApiCode::NotFound);
        assert_eq!(err.message, "GetMeta key user:9 not found");

        let err = handler.get_meta_inverse("nobody").await.unwrap_err();
        assert_eq!(err.message, "GetMetaInverse val nobody not found");
    }

    #[tokio::test]
    async fn test_delete_not_found_is_unknown() {
        let dir = TempDir::new().unwrap();
        let (handler, _engine) = test_handler(&dir).await;

        let err = handler.delete_meta("missing").await.unwrap_err();
        assert_eq!(err.code, ApiCode::Unknown);
        let err = handler.delete_meta_inverse("missing").await.unwrap_err();
        assert_eq!(err.code, ApiCode::Unknown);
    }

    #[tokio::test]
    async fn test_delete_asymmetry() {
        let dir = TempDir::new().unwrap();
        let (handler, _engine) = test_handler(&dir).await;

        handler.set_meta("user:1", "alice").await.unwrap();
        handler.set_meta("user:2", "bob").await.unwrap();

        assert_eq!(handler.delete_meta("user:1").await.unwrap(), "alice");
        assert_eq!(handler.get_meta_inverse("alice").await.unwrap(), "user:1");

        assert_eq!(handler.delete_meta_inverse("bob").await.unwrap(), "user:2");
        assert_eq!(handler.get_meta("user:2").await.unwrap(), "bob");
    }

    #[tokio::test]
    async fn test_batch_partial_results() {
        let dir = TempDir::new().unwrap();
        let (handler, _engine) = test_handler(&dir).await;

        handler
            .set_metas(&[
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ])
            .await
            .unwrap();

        let err = handler
            .get_metas(&strings(&["a", "x", "b"]))
            .await
            .unwrap_err();
        assert_eq!(err.code, ApiCode::NotFound);
        assert_eq!(err.partial, Some(Partial::Vals(strings(&["1"]))));

        let err = handler
            .delete_metas_inverse(&strings(&["2", "x"]))
            .await
            .unwrap_err();
        assert_eq!(err.code, ApiCode::Unknown);
        assert_eq!(err.partial, Some(Partial::Keys(strings(&["b"]))));
    }

    #[tokio::test]
    async fn test_engine_failure_is_internal() {
        let dir = TempDir::new().unwrap();
        let (handler, engine) = test_handler(&dir).await;
        engine.close().await.unwrap();

        assert_eq!(
            handler.get_meta("a").await.unwrap_err().code,
            ApiCode::Internal
        );
        assert_eq!(
            handler.set_meta("a", "1").await.unwrap_err().code,
            ApiCode::Internal
        );
        assert_eq!(
            handler.delete_meta("a").await.unwrap_err().code,
            ApiCode::Unknown
        );
    }

    #[tokio::test]
    async fn test_index_counts_records() {
        let dir = TempDir::new().unwrap();
        let (handler, _engine) = test_handler(&dir).await;
        handler.set_meta("a", "1").await.unwrap();

        let info = handler.index().await.unwrap();
        assert_eq!(info.name, "bimeta-server");
        assert_eq!(info.records, 2);
    }

    /// Engine whose every write fails with a storage-level error
    struct CorruptEngine;

    fn corrupt(key: &str) -> EngineError {
        EngineError::Write {
            key: key.to_string(),
            source: RedbError::Io(std::io::Error::other("checksum mismatch in page 7")),
        }
    }

    #[async_trait]
    impl KvEngine for CorruptEngine {
        async fn open(&self, _path: &Path) -> EngineResult<()> {
            Ok(())
        }
        async fn put(&self, key: &str, _value: &str) -> EngineResult<Option<String>> {
            Err(corrupt(key))
        }
        async fn get(&self, key: &str) -> EngineResult<Option<String>> {
            Err(EngineError::Read {
                key: key.to_string(),
                source: RedbError::Io(std::io::Error::other("checksum mismatch in page 7")),
            })
        }
        async fn delete(&self, key: &str) -> EngineResult<()> {
            Err(corrupt(key))
        }
        async fn take(&self, key: &str) -> EngineResult<Option<String>> {
            Err(corrupt(key))
        }
        async fn restore_if(
            &self,
            key: &str,
            _expected: &str,
            _previous: Option<&str>,
        ) -> EngineResult<bool> {
            Err(corrupt(key))
        }
        async fn size(&self) -> EngineResult<u64> {
            Err(EngineError::WorkerGone)
        }
        async fn compact(&self) -> EngineResult<bool> {
            Err(EngineError::WorkerGone)
        }
        async fn pause_compaction(&self) -> EngineResult<()> {
            Err(EngineError::WorkerGone)
        }
        async fn resume_compaction(&self) -> EngineResult<()> {
            Err(EngineError::WorkerGone)
        }
        async fn close(&self) -> EngineResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_messages_do_not_expose_engine_errors() {
        let handler = MetaHandler::new(BidirectionalStore::new(Arc::new(CorruptEngine)));

        let errors = [
            handler.set_meta("user:1", "alice").await.unwrap_err(),
            handler.get_meta("user:1").await.unwrap_err(),
            handler.delete_meta_inverse("alice").await.unwrap_err(),
            handler
                .set_metas(&[("user:2".to_string(), "bob".to_string())])
                .await
                .unwrap_err(),
            handler.index().await.unwrap_err(),
        ];
        let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            [
                "SetMeta key user:1 val alice failed to store",
                "GetMeta key user:1 failed to read",
                "DeleteMetaInverse val alice failed to delete",
                "SetMetas key user:2 val bob failed to store",
                "Index record count failed to read",
            ]
        );
        for message in messages {
            assert!(!message.contains("kv:"));
            assert!(!message.contains("vk:"));
            assert!(!message.contains("checksum"));
            assert!(!message.contains("io error"));
        }
    }
}

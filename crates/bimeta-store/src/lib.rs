//! bimeta Store - engine binding and bidirectional index
//!
//! [`EngineHandle`] owns the embedded redb database on a dedicated worker
//! thread and serializes every engine call through it.
//! [`BidirectionalStore`] layers the forward (`kv:`) and inverse (`vk:`)
//! records on top of any [`KvEngine`].

pub mod bidi;
pub mod engine;
pub mod error;
mod tables;
mod worker;

// Re-exports
pub use bidi::{BidirectionalStore, Direction};
pub use engine::{EngineHandle, EngineOptions, KvEngine};
pub use error::{BatchError, EngineError, EngineResult, RedbError, StoreError, StoreResult};

//! bimeta Server - gRPC and REST front ends for the bidirectional store
//!
//! Both adapters share one [`MetaHandler`]; [`ServiceLifecycle`] ties the
//! engine and the two servers together.

pub mod error;
pub mod grpc;
pub mod handler;
pub mod lifecycle;
pub mod rest;

pub use error::{ApiCode, ApiError, Partial};
pub use handler::{IndexInfo, MetaHandler};
pub use lifecycle::{LifecycleError, ServeError, ServiceLifecycle, run};

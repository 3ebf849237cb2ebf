//! bimeta Protocol - gRPC service definitions
//!
//! Generated from `proto/meta.proto`. [`payload`] re-exports the message
//! types together with their constructors.

/// Meta service (forward/inverse lookups)
pub mod meta {
    tonic::include_proto!("bimeta.v1");
}

pub mod payload;

pub use meta::meta_client::MetaClient;
pub use meta::meta_server::{Meta, MetaServer};

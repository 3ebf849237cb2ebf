//! bimeta Common - Shared configuration and errors
//!
//! This crate provides the configuration model and the error type
//! used by the store and server crates.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{Error, Result};

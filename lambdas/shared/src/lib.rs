//! Koekalenteri Core Library
//!
//! Shared functionality for the Koekalenteri Lambda functions including:
//! - Domain models
//! - DynamoDB data access behind the [`Store`] trait
//! - Authorization, request/response envelopes and metrics
//! - Email template rendering and sending
//! - Request handlers shared by the public and admin APIs
//! - WebSocket connection count broadcast

pub mod audit;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod dynamo;
pub mod email;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod request;
pub mod response;
pub mod services;
pub mod store;
pub mod tracing_init;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::Config;
pub use dynamo::DynamoClient;
pub use errors::{Error, Result};
pub use metrics::init_metrics;
pub use models::*;
pub use request::ApiRequest;
pub use response::ApiResponse;
pub use services::Services;
pub use store::{Item, Key, Store};
pub use tracing_init::init_tracing;

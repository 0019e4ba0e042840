//! Backend connectors to remote object stores.
//!
//! This module provides:
//! - The [`ObjectBackend`] trait and object metadata types
//! - An S3-compatible HTTP backend with per-endpoint circuit breakers
//! - An in-process backend for tests and local runs
//! - Retry with exponential backoff and per-attempt timeouts

mod circuit_breaker;
mod http;
mod memory;
mod retry;
mod traits;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use retry::{retry_backend, RetryConfig, RetryStats};
pub use traits::{FetchedObject, ObjectBackend, ObjectMeta};

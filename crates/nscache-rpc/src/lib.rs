//! nscache RPC - HTTP front end for the namespace-cache gateway.
//!
//! Serves the JSON-RPC admin interface on `/rpc`, S3-style object access
//! under `/s3`, direct hub writes under `/hub` and a health check.

pub mod handlers;
pub mod server;

pub use server::{build_router, start_server, AppState};

//! API implementation submodules.
//!
//! Each submodule contains `impl Gateway` blocks that extend the public API
//! with one area of operations. The struct definition remains in `lib.rs`.

mod builder;
mod maintenance;
mod objects;
mod resources;
mod state;

pub use builder::GatewayBuilder;
pub use maintenance::GatewayStats;
pub(crate) use state::GatewayInner;

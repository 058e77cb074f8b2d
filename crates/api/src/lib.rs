// Newsletter API library
//
// The binary in main.rs wires configuration, stores and the notifier; the
// router and its handlers live here so they can be tested in-process.

pub mod api;
pub mod config;
pub mod openapi;
pub mod sweeper;
pub mod telemetry;

pub use api::{build_router, build_router_with_prefix, AppState};
pub use config::ApiConfig;

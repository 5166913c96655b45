//! Switchboard: routing registry for external AI providers.
//!
//! Library crate shared by the `switchboard` binary and the integration
//! tests in `tests/`.

pub mod api;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod proxy;
pub mod registry;
pub mod state;
pub mod store;
pub mod vault;

pub use state::AppState;

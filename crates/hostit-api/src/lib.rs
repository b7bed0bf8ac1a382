//! Control-plane API server for hostit.
//!
//! Receives push webhooks and build callbacks, and exposes site and
//! deployment management over a JSON API.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;

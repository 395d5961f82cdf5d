//! HTTP gateway for the deliberation engine: axum routes, the SSE
//! streaming session, and the shared application state.

pub mod api;
pub mod auth;
pub mod errors;
pub mod runtime;
pub mod state;

pub use state::AppState;

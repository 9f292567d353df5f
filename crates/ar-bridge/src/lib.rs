//! HTTP RPC surface for the armada control plane.
//!
//! Thin axum handlers over [`ar_engine::Engine`]: extract the forwarded
//! identity, parse the request DTO, call the engine, map the typed error
//! onto a status line. Queries are `GET`, mutations `POST`. Runner-facing
//! endpoints live under `/internal` and authenticate with a runner token
//! instead of a user identity.

pub mod api_error;
pub mod http_api;
pub mod identity;
pub mod state;

pub use http_api::build_router;
pub use state::ApiState;

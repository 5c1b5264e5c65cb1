//! Brio Core — Transport-agnostic campaign orchestration engine.
//!
//! This crate contains the engine that drives a campaign brief through a
//! fixed pipeline of specialist AI agents: data models, SQLite stores,
//! the agent client, the phase runner, the workflow state machine, and
//! the dispatcher. It has **no HTTP framework dependency** by default,
//! making it suitable for use in:
//!
//! - HTTP servers (via `brio-server`)
//! - Background job hosts
//! - Integration tests with a scripted completion service
//!
//! # Feature Flags
//!
//! - `axum` — Enables `IntoResponse` impl on `EngineError` for use in
//!   axum handlers.

pub mod agent;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod phase;
pub mod state;
pub mod store;
pub mod workflow;

// Convenience re-exports
pub use db::Database;
pub use error::EngineError;
pub use state::{AppState, AppStateInner};

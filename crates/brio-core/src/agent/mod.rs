//! Agent layer — specialist role definitions and the client that invokes
//! them against the external completion service.
//!
//! # Architecture
//!
//! ```text
//! RoleSpec (builtin or YAML) ──► AgentClient::invoke(role, task, context)
//!                                       │
//!                               CompletionService (trait)
//!                                       │
//!                          HttpCompletionService (/v1/messages)
//! ```

pub mod client;
pub mod http;
pub mod roles;

pub use client::{
    AgentClient, AgentClientConfig, AgentError, AgentResult, CompletionError, CompletionRequest,
    CompletionResponse, CompletionService, TaskSpec, TokenCost,
};
pub use http::{HttpCompletionConfig, HttpCompletionService};
pub use roles::{AgentRole, RoleRegistry, RoleSpec};

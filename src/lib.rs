/// Stepwise: workflow graph execution for step-by-step automation builders
///
/// This library provides the editing-session engine behind a visual workflow
/// builder: a DAG of typed nodes, `{{Label.path}}` variable resolution over
/// cached outputs, cancellable single-node tests and sequential batch runs.

// Core configuration and setup
pub mod config;

// Structural and node-level error taxonomy
pub mod error;

// Workflow management layer - definitions, graph model, templates, storage, registry
pub mod workflow;

// Node handlers - HTTP request, code, webhook trigger, base64 conversion
pub mod nodes;

// Secret lookup for credential references
pub mod credentials;

// Expiring public assets written by the convert node
pub mod assets;

// Runtime execution engine - attempts, output cache, batch runs, reaper
pub mod runtime;

// HTTP API layer - workflow CRUD, editing sessions, webhooks, asset downloads
pub mod api;

// Server setup and initialization
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types for external consumers
pub use error::{GraphError, NodeError};
pub use runtime::{ExecutionCoordinator, ExecutionResult, ExecutionStatus};
pub use server::start_server;
pub use workflow::{Edge, GraphModel, Node, NodeType, Workflow};

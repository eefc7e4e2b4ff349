/// Workflow Management Layer
///
/// This module handles workflow definitions, editing and persistence:
/// - Type definitions (Workflow, Node, Edge)
/// - The in-memory graph model with structural validation
/// - Template expressions `{{Label.path}}` and their resolution
/// - SQLite persistence with sqlx
/// - Hot-reload session registry using ArcSwap

// Core workflow type definitions
pub mod types;

// Node/edge graph with DAG and label invariants
pub mod graph;

// Template expression parsing, resolution and label rewriting
pub mod template;

// SQLite persistence layer for workflow storage
pub mod storage;

// Hot-reload registry of editing sessions using ArcSwap
pub mod registry;

// Re-export commonly used types
pub use graph::GraphModel;
pub use types::{Edge, Node, NodeType, TriggerPayload, Workflow};

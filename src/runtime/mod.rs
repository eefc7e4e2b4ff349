/// Runtime Execution Layer
///
/// This module runs nodes and graphs for editing sessions:
/// - Single-node execution with cancellation and deadlines
/// - Per-node attempt tokens and the session output cache
/// - Sequential batch runs in topological order
/// - The background reaper for expiring assets

// Session output cache and the resolver's label view over it
pub mod cache;

// Handler dispatch for a single node attempt
pub mod executor;

// Attempt tokens, supersession and cache commits
pub mod coordinator;

// Batch runs over the graph in dependency order
pub mod engine;

// Per-workflow editing session: graph, coordinator, engine
pub mod session;

// Background tokio-cron-scheduler job reaping expired assets
pub mod scheduler;

// Re-export main types
pub use cache::{CachedOutput, OutputCache};
pub use coordinator::{AttemptPhase, ExecutionCoordinator};
pub use engine::{ExecutionEngine, RunEvent, RunReport};
pub use executor::{ExecutionResult, ExecutionStatus, NodeExecutor};
pub use scheduler::AssetReaperService;
pub use session::EditorSession;

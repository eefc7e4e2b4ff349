/// Session-scoped output cache
///
/// One entry per node: the latest result plus the last successful output.
/// Readers take lock-free snapshots through ArcSwap; only the coordinator
/// writes, and only for the attempt that currently owns the node.

use crate::runtime::executor::{ExecutionResult, ExecutionStatus};
use crate::workflow::template::{LabelLookup, OutputLookup};
use arc_swap::ArcSwap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache entry for one node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedOutput {
    pub latest: ExecutionResult,
    /// Output of the most recent success; survives later errors and cancellations
    pub last_success: Option<Value>,
}

pub type OutputSnapshot = Arc<HashMap<String, CachedOutput>>;

#[derive(Debug)]
pub struct OutputCache {
    entries: ArcSwap<HashMap<String, CachedOutput>>,
}

impl Default for OutputCache {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputCache {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Consistent point-in-time view of every entry
    pub fn snapshot(&self) -> OutputSnapshot {
        self.entries.load_full()
    }

    pub fn get(&self, node_id: &str) -> Option<CachedOutput> {
        self.entries.load().get(node_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a terminal result
    ///
    /// Success replaces the usable output; error and cancelled only replace
    /// `latest`. Skipped results are never stored.
    pub fn commit(&self, result: &ExecutionResult) {
        if result.status == ExecutionStatus::Skipped {
            return;
        }
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            let last_success = match (&result.status, &result.output) {
                (ExecutionStatus::Success, Some(output)) => Some(output.clone()),
                _ => current.get(&result.node_id).and_then(|entry| entry.last_success.clone()),
            };
            next.insert(
                result.node_id.clone(),
                CachedOutput {
                    latest: result.clone(),
                    last_success,
                },
            );
            next
        });
    }

    /// Drop a node's entry; returns whether one existed
    pub fn evict(&self, node_id: &str) -> bool {
        if !self.entries.load().contains_key(node_id) {
            return false;
        }
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(node_id);
            next
        });
        true
    }

    pub fn clear(&self) {
        self.entries.store(Arc::new(HashMap::new()));
    }
}

/// Label-addressed view over a cache snapshot, as seen by the resolver
#[derive(Debug, Clone)]
pub struct OutputScope {
    /// label -> node id
    labels: HashMap<String, String>,
    outputs: OutputSnapshot,
}

impl OutputScope {
    pub fn new(labels: HashMap<String, String>, outputs: OutputSnapshot) -> Self {
        Self { labels, outputs }
    }
}

impl OutputLookup for OutputScope {
    fn lookup(&self, label: &str) -> LabelLookup<'_> {
        let Some(node_id) = self.labels.get(label) else {
            return LabelLookup::UnknownLabel;
        };
        match self.outputs.get(node_id).and_then(|entry| entry.last_success.as_ref()) {
            Some(output) => LabelLookup::Output(output),
            None => LabelLookup::NoOutput,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::workflow::template::{resolve, UnresolvedReason};
    use serde_json::json;
    use std::time::Duration;

    fn ok(node_id: &str, attempt: u64, output: Value) -> ExecutionResult {
        ExecutionResult::success(node_id, attempt, output, Vec::new(), Duration::ZERO)
    }

    #[test]
    fn errors_keep_the_last_success() {
        let cache = OutputCache::new();
        cache.commit(&ok("n1", 1, json!({"v": 1})));
        cache.commit(&ExecutionResult::failure("n1", 2, &NodeError::failed("boom"), Vec::new(), Duration::ZERO));

        let entry = cache.get("n1").unwrap();
        assert_eq!(entry.latest.status, ExecutionStatus::Error);
        assert_eq!(entry.last_success, Some(json!({"v": 1})));

        cache.commit(&ok("n1", 3, json!({"v": 3})));
        assert_eq!(cache.get("n1").unwrap().last_success, Some(json!({"v": 3})));
    }

    #[test]
    fn skipped_results_are_not_cached() {
        let cache = OutputCache::new();
        cache.commit(&ExecutionResult::skipped("n1", "upstream failed"));
        assert!(cache.is_empty());
    }

    #[test]
    fn snapshots_are_stable_while_the_cache_moves_on() {
        let cache = OutputCache::new();
        cache.commit(&ok("n1", 1, json!(1)));
        let before = cache.snapshot();
        cache.commit(&ok("n2", 2, json!(2)));
        assert!(cache.evict("n1"));
        assert!(!cache.evict("n1"));

        assert_eq!(before.len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn scope_distinguishes_unknown_labels_from_missing_output() {
        let cache = OutputCache::new();
        cache.commit(&ok("n1", 1, json!({"base64": "aGk="})));
        cache.commit(&ExecutionResult::failure("n2", 2, &NodeError::failed("boom"), Vec::new(), Duration::ZERO));

        let labels = HashMap::from([
            ("Fetch".to_string(), "n1".to_string()),
            ("Broken".to_string(), "n2".to_string()),
        ]);
        let scope = OutputScope::new(labels, cache.snapshot());

        let resolution = resolve(
            &json!({"a": "{{Fetch.base64}}", "b": "{{Broken.x}}", "c": "{{Gone.x}}"}),
            &scope,
        );
        assert_eq!(resolution.config["a"], json!("aGk="));
        let reasons: Vec<_> = resolution.unresolved.iter().map(|u| (u.field.as_str(), u.reason.clone())).collect();
        assert_eq!(
            reasons,
            vec![("/b", UnresolvedReason::NoOutput), ("/c", UnresolvedReason::UnknownLabel)]
        );
    }
}

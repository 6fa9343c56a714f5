//! Teardown bookkeeping for nodes that have begun setup.

use tracing::{debug, warn};

use crate::node::ServerNode;

/// Indices of nodes that need teardown, in the order they began setup.
///
/// A node is pushed before its `setup` is awaited, so a node whose setup
/// fails halfway is still torn down.
#[derive(Debug, Default)]
pub struct CleanupStack {
    pending: Vec<usize>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize) {
        if !self.pending.contains(&index) {
            self.pending.push(index);
        }
    }

    /// Tears down every registered node in reverse order, exactly once.
    ///
    /// Failures are collected and reported as one warning; the stack is empty
    /// afterwards. Returns one `node: error` entry per failed teardown.
    pub async fn unwind(&mut self, nodes: &mut [Box<dyn ServerNode>]) -> Vec<String> {
        let mut failures = Vec::new();

        while let Some(index) = self.pending.pop() {
            let Some(node) = nodes.get_mut(index) else {
                continue;
            };
            debug!(node = node.name(), "tearing down");
            if let Err(e) = node.teardown().await {
                failures.push(format!("{}: {e}", node.name()));
            }
        }

        if !failures.is_empty() {
            warn!(failures = %failures.join("; "), "teardown incomplete");
        }
        failures
    }
}

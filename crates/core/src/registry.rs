//! The flow registry: flow id -> shared flow.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::ConfigError;
use crate::flow::Flow;

/// Registered flows in registration order. The lock is only contended
/// while flows are (re)registered; executions take cheap `Arc` clones.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: RwLock<IndexMap<String, Arc<Flow>>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        FlowRegistry::default()
    }

    /// Register `flow`, replacing any flow with the same id.
    pub fn register(&self, flow: Flow) -> Arc<Flow> {
        let flow = Arc::new(flow);
        let replaced = self
            .flows
            .write()
            .insert(flow.id().to_string(), Arc::clone(&flow));
        debug!(flow = flow.id(), replaced = replaced.is_some(), "registered flow");
        flow
    }

    pub fn get(&self, flow_id: &str) -> Option<Arc<Flow>> {
        self.flows.read().get(flow_id).cloned()
    }

    pub fn lookup(&self, flow_id: &str) -> Result<Arc<Flow>, ConfigError> {
        self.get(flow_id).ok_or_else(|| ConfigError::UnknownFlow {
            flow_id: flow_id.to_string(),
        })
    }

    pub fn contains(&self, flow_id: &str) -> bool {
        self.flows.read().contains_key(flow_id)
    }

    /// Flow ids in registration order.
    pub fn flow_ids(&self) -> Vec<String> {
        self.flows.read().keys().cloned().collect()
    }

    pub fn flow_ids_excluding(&self, excluded: &[&str]) -> Vec<String> {
        self.flows
            .read()
            .keys()
            .filter(|id| !excluded.contains(&id.as_str()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.flows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.read().is_empty()
    }
}

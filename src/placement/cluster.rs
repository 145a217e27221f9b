use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SchedError};

/// A resource demand or capacity vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_mhz: u64,
    pub memory_mb: u64,
}

impl Resources {
    pub fn new(cpu_mhz: u64, memory_mb: u64) -> Self {
        Self { cpu_mhz, memory_mb }
    }

    /// True if `demand` fits within this capacity.
    pub fn fits(&self, demand: &Resources) -> bool {
        self.cpu_mhz >= demand.cpu_mhz && self.memory_mb >= demand.memory_mb
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpu_mhz: self.cpu_mhz.saturating_sub(other.cpu_mhz),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
        }
    }

    pub fn add(&self, other: &Resources) -> Resources {
        Resources {
            cpu_mhz: self.cpu_mhz + other.cpu_mhz,
            memory_mb: self.memory_mb + other.memory_mb,
        }
    }
}

/// The resource demand of one task group instance, as declared by the job
/// specification. This is the narrow contract with the job-spec collaborator:
/// a reservation, an optional memory ceiling, and a hard node-class
/// constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub resources: Resources,
    /// Declared memory ceiling. Only consulted when memory oversubscription
    /// is enabled cluster-wide; otherwise the reservation is what counts.
    pub memory_max_mb: Option<u64>,
    /// Hard constraint: only nodes of this class are feasible.
    pub node_class: Option<String>,
}

impl TaskRequest {
    pub fn new(cpu_mhz: u64, memory_mb: u64) -> Self {
        Self {
            resources: Resources::new(cpu_mhz, memory_mb),
            memory_max_mb: None,
            node_class: None,
        }
    }

    pub fn with_memory_max(mut self, memory_max_mb: u64) -> Self {
        self.memory_max_mb = Some(memory_max_mb);
        self
    }

    pub fn with_node_class(mut self, class: impl Into<String>) -> Self {
        self.node_class = Some(class.into());
        self
    }

    /// The demand used for feasibility checks.
    ///
    /// With oversubscription enabled, only the reservation must fit; the
    /// task may later burst into node slack up to its declared ceiling.
    /// With it disabled, a declared ceiling must be fully backed by
    /// reserved capacity, so the ceiling is what has to fit.
    pub fn effective_demand(&self, oversubscription_enabled: bool) -> Resources {
        let memory_mb = match self.memory_max_mb {
            Some(max) if !oversubscription_enabled && max > self.resources.memory_mb => max,
            _ => self.resources.memory_mb,
        };
        Resources {
            cpu_mhz: self.resources.cpu_mhz,
            memory_mb,
        }
    }
}

/// A placed task group instance on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Uuid,
    pub job_id: Uuid,
    pub node_id: String,
    /// Inherited from the evaluation's job; preemption victims must have a
    /// strictly lower priority than the preempting evaluation.
    pub priority: i32,
    pub resources: Resources,
    /// Ordering tiebreaker; higher means more recently placed.
    pub create_index: u64,
}

/// A point-in-time view of one node: capacity plus its current allocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub node_class: Option<String>,
    pub capacity: Resources,
    pub allocations: Vec<Allocation>,
}

impl NodeSnapshot {
    pub fn new(node_id: impl Into<String>, capacity: Resources) -> Self {
        Self {
            node_id: node_id.into(),
            node_class: None,
            capacity,
            allocations: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.node_class = Some(class.into());
        self
    }

    pub fn with_allocation(mut self, alloc: Allocation) -> Self {
        self.allocations.push(alloc);
        self
    }

    pub fn used(&self) -> Resources {
        self.allocations
            .iter()
            .fold(Resources::default(), |acc, a| acc.add(&a.resources))
    }

    /// Remaining unreserved capacity.
    pub fn remaining(&self) -> Resources {
        self.capacity.saturating_sub(&self.used())
    }
}

/// Contract with the node/client collaborator: hand out node snapshots and
/// accept placement plans. Snapshot failures are transient and cause the
/// worker to nack, not fail, the evaluation.
pub trait NodeCatalog: Send + Sync {
    fn snapshot(&self) -> Result<Vec<NodeSnapshot>>;

    /// Apply a placement: evict the listed allocations, then add the new one.
    fn apply(&self, alloc: Allocation, evictions: &[Uuid]) -> Result<()>;
}

/// In-memory node catalog. Node lifecycle (registration, heartbeats) is
/// external; this just tracks the view the placement engine reads.
#[derive(Default)]
pub struct ClusterCatalog {
    nodes: RwLock<HashMap<String, NodeSnapshot>>,
}

impl ClusterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_node(&self, node: NodeSnapshot) {
        let mut nodes = self
            .nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracing::debug!(node_id = %node.node_id, "Node registered");
        nodes.insert(node.node_id.clone(), node);
    }

    pub fn remove_node(&self, node_id: &str) -> Option<NodeSnapshot> {
        let mut nodes = self
            .nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        nodes.remove(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<NodeSnapshot> {
        let nodes = self
            .nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        nodes.get(node_id).cloned()
    }
}

impl NodeCatalog for ClusterCatalog {
    fn snapshot(&self) -> Result<Vec<NodeSnapshot>> {
        let nodes = self
            .nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(nodes.values().cloned().collect())
    }

    fn apply(&self, alloc: Allocation, evictions: &[Uuid]) -> Result<()> {
        let mut nodes = self
            .nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let node = nodes
            .get_mut(&alloc.node_id)
            .ok_or_else(|| SchedError::NodeSnapshot(format!("node {} is gone", alloc.node_id)))?;
        node.allocations.retain(|a| !evictions.contains(&a.id));
        tracing::info!(
            alloc_id = %alloc.id,
            job_id = %alloc.job_id,
            node_id = %alloc.node_id,
            evictions = evictions.len(),
            "Placement applied"
        );
        node.allocations.push(alloc);
        Ok(())
    }
}

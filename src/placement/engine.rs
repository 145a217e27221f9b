use uuid::Uuid;

use crate::broker::Evaluation;
use crate::placement::cluster::{Allocation, NodeSnapshot, Resources};
use crate::store::{SchedulerAlgorithm, SchedulerConfiguration};

/// The outcome of a successful placement decision.
#[derive(Debug, Clone)]
pub struct PlacementPlan {
    pub eval_id: Uuid,
    pub node_id: String,
    pub alloc: Allocation,
    /// Allocations to evict before the new one fits. Empty unless
    /// preemption was required.
    pub evictions: Vec<Uuid>,
}

/// Expected non-error outcomes: the evaluation becomes Blocked and waits for
/// capacity, rather than failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementDenied {
    /// No node can satisfy the demand, even with preemption.
    Infeasible(String),
    /// Preemption would free enough capacity, but it is disabled for the
    /// evaluation's scheduler class.
    PreemptionDisabled,
}

impl std::fmt::Display for PlacementDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementDenied::Infeasible(reason) => write!(f, "infeasible: {reason}"),
            PlacementDenied::PreemptionDisabled => write!(f, "preemption disabled"),
        }
    }
}

impl PlacementDenied {
    /// Surface a denial as an error, e.g. when reporting a placement that
    /// stayed blocked past its retry ceiling.
    pub fn into_error(self, class: crate::store::SchedulerClass) -> crate::error::SchedError {
        match self {
            PlacementDenied::Infeasible(reason) => {
                crate::error::SchedError::InfeasiblePlacement(reason)
            }
            PlacementDenied::PreemptionDisabled => crate::error::SchedError::PreemptionDenied(class),
        }
    }
}

/// Chooses a node for one evaluation under the current configuration.
///
/// Stateless; each call works on the snapshot it is handed.
#[derive(Debug, Default)]
pub struct PlacementEngine;

impl PlacementEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(
        &self,
        eval: &Evaluation,
        nodes: &[NodeSnapshot],
        config: &SchedulerConfiguration,
    ) -> Result<PlacementPlan, PlacementDenied> {
        let demand = eval
            .task
            .effective_demand(config.memory_oversubscription_enabled);

        // Hard constraints first; nodes failing them are out entirely, even
        // for preemption.
        let candidates: Vec<&NodeSnapshot> = nodes
            .iter()
            .filter(|node| self.constraints_hold(eval, node))
            .collect();
        if candidates.is_empty() {
            return Err(PlacementDenied::Infeasible(
                "no nodes satisfy the job's constraints".to_string(),
            ));
        }

        let feasible: Vec<&NodeSnapshot> = candidates
            .iter()
            .copied()
            .filter(|node| node.remaining().fits(&demand))
            .collect();

        if let Some(node) = self.pick(eval, &feasible, config.scheduler_algorithm, &demand) {
            tracing::debug!(
                eval_id = %eval.id,
                node_id = %node.node_id,
                algorithm = %config.scheduler_algorithm,
                "Node selected"
            );
            return Ok(self.plan_for(eval, node, Vec::new()));
        }

        // Nothing fits as-is; try to free capacity by evicting strictly
        // lower-priority work.
        if !config.preemption_config.enabled_for(eval.scheduler_class) {
            // Distinguish "would preemption even help" so operators see the
            // right signal: a denial only when victims exist to take.
            if self.any_preemption_candidate(eval, &candidates, &demand) {
                return Err(PlacementDenied::PreemptionDisabled);
            }
            return Err(PlacementDenied::Infeasible(
                "no node has sufficient capacity".to_string(),
            ));
        }

        let mut best: Option<(&NodeSnapshot, Vec<Uuid>)> = None;
        for node in candidates.iter().copied() {
            if let Some(victims) = self.victim_set(eval, node, &demand) {
                let better = match &best {
                    None => true,
                    Some((best_node, best_victims)) => victims.len() < best_victims.len()
                        || (victims.len() == best_victims.len() && node.node_id < best_node.node_id),
                };
                if better {
                    best = Some((node, victims));
                }
            }
        }

        match best {
            Some((node, victims)) => {
                tracing::info!(
                    eval_id = %eval.id,
                    node_id = %node.node_id,
                    victims = victims.len(),
                    "Placement requires preemption"
                );
                Ok(self.plan_for(eval, node, victims))
            }
            None => Err(PlacementDenied::Infeasible(
                "preemption cannot free sufficient capacity on any node".to_string(),
            )),
        }
    }

    fn constraints_hold(&self, eval: &Evaluation, node: &NodeSnapshot) -> bool {
        match &eval.task.node_class {
            Some(required) => node.node_class.as_deref() == Some(required.as_str()),
            None => true,
        }
    }

    /// Score the feasible nodes and return the winner, ties broken by lowest
    /// node ID for determinism.
    fn pick<'n>(
        &self,
        eval: &Evaluation,
        feasible: &[&'n NodeSnapshot],
        algorithm: SchedulerAlgorithm,
        demand: &Resources,
    ) -> Option<&'n NodeSnapshot> {
        feasible
            .iter()
            .min_by(|a, b| {
                let score_a = self.score(eval, a, algorithm, demand);
                let score_b = self.score(eval, b, algorithm, demand);
                score_a
                    .cmp(&score_b)
                    .then_with(|| a.node_id.cmp(&b.node_id))
            })
            .copied()
    }

    /// Lower is better.
    ///
    /// Binpack: post-placement slack (consolidate onto the fullest node that
    /// still fits). Spread: count of this job's existing allocations on the
    /// node (push replicas apart to shrink the blast radius).
    fn score(
        &self,
        eval: &Evaluation,
        node: &NodeSnapshot,
        algorithm: SchedulerAlgorithm,
        demand: &Resources,
    ) -> u64 {
        match algorithm {
            SchedulerAlgorithm::Binpack => {
                let slack = node.remaining().saturating_sub(demand);
                slack.cpu_mhz + slack.memory_mb
            }
            SchedulerAlgorithm::Spread => node
                .allocations
                .iter()
                .filter(|alloc| alloc.job_id == eval.job_id)
                .count() as u64,
        }
    }

    /// The minimal set of evictions on `node` that makes `demand` fit, or
    /// `None` if no such set exists.
    ///
    /// Victims must have strictly lower priority than the evaluation and are
    /// taken lowest-priority first, youngest first within a priority band,
    /// so long-lived work survives preemption longest.
    fn victim_set(
        &self,
        eval: &Evaluation,
        node: &NodeSnapshot,
        demand: &Resources,
    ) -> Option<Vec<Uuid>> {
        let mut evictable: Vec<&Allocation> = node
            .allocations
            .iter()
            .filter(|alloc| alloc.priority < eval.priority)
            .collect();
        evictable.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(b.create_index.cmp(&a.create_index))
        });

        let mut free = node.remaining();
        let mut victims = Vec::new();
        for alloc in evictable {
            if free.fits(demand) {
                break;
            }
            free = free.add(&alloc.resources);
            victims.push(alloc.id);
        }

        if free.fits(demand) {
            Some(victims)
        } else {
            None
        }
    }

    fn any_preemption_candidate(
        &self,
        eval: &Evaluation,
        candidates: &[&NodeSnapshot],
        demand: &Resources,
    ) -> bool {
        candidates
            .iter()
            .any(|node| self.victim_set(eval, node, demand).is_some())
    }

    fn plan_for(&self, eval: &Evaluation, node: &NodeSnapshot, evictions: Vec<Uuid>) -> PlacementPlan {
        PlacementPlan {
            eval_id: eval.id,
            node_id: node.node_id.clone(),
            alloc: Allocation {
                id: Uuid::new_v4(),
                job_id: eval.job_id,
                node_id: node.node_id.clone(),
                priority: eval.priority,
                resources: eval.task.resources,
                create_index: eval.create_index,
            },
            evictions,
        }
    }
}

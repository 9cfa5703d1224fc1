//! Validation and execution planning for a finished net.

use crate::errors::InvalidGraphReason;
use crate::graph::topology::{NodeId, NodeKind, Topology};

/// Backward-pass flags computed for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct LayerSchedule {
    /// The layer takes part in the backward pass.
    pub need_backward: bool,
    /// The layer must write gradients into its input blobs.
    pub need_input_gradient: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BackwardStep {
    pub layer: usize,
    pub need_input_gradient: bool,
    /// Output blobs nobody consumes; they get a zero gradient before the step runs.
    pub detached: Vec<usize>,
}

/// Position of one parameter blob: owning layer and its slot in `parameters()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParamRef {
    pub layer: usize,
    pub slot: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Plan {
    pub forward: Vec<usize>,
    pub backward: Vec<BackwardStep>,
    pub params: Vec<ParamRef>,
    pub layers: Vec<LayerSchedule>,
}

/// Checks the structural rules and returns a topological order of all nodes.
///
/// Acyclicity is checked first, then every blob in insertion order.
pub(crate) fn validate(topology: &Topology) -> Result<Vec<NodeId>, InvalidGraphReason> {
    let order = topology
        .topological_order()
        .map_err(|node| InvalidGraphReason::Cycle {
            node: topology.node(node).name.clone(),
        })?;

    for (_, node) in topology.nodes() {
        if !matches!(node.kind, NodeKind::Blob(_)) {
            continue;
        }
        match node.preds.len() {
            0 => {
                return Err(InvalidGraphReason::OrphanBlob {
                    blob: node.name.clone(),
                })
            }
            1 => {}
            _ => {
                return Err(InvalidGraphReason::MultipleProducers {
                    blob: node.name.clone(),
                    producers: topology.names(&node.preds),
                })
            }
        }
        if node.succs.len() > 1 {
            return Err(InvalidGraphReason::MultipleConsumers {
                blob: node.name.clone(),
                consumers: topology.names(&node.succs),
            });
        }
    }
    Ok(order)
}

/// Propagates backward necessity along `order` and derives the execution plan.
///
/// `param_counts[i]` is the number of parameters of layer `i`.
pub(crate) fn build_plan(topology: &Topology, order: &[NodeId], param_counts: &[usize]) -> Plan {
    let mut node_needs = vec![false; topology.len()];
    let mut layers = vec![LayerSchedule::default(); param_counts.len()];
    let mut forward = Vec::with_capacity(param_counts.len());
    let mut detached = vec![Vec::new(); param_counts.len()];

    for &id in order {
        let node = topology.node(id);
        let upstream = node.preds.iter().any(|&pred| node_needs[pred]);
        match node.kind {
            NodeKind::Layer(layer) => {
                let need_backward = param_counts[layer] > 0 || upstream;
                node_needs[id] = need_backward;
                layers[layer] = LayerSchedule {
                    need_backward,
                    need_input_gradient: upstream,
                };
                forward.push(layer);
            }
            NodeKind::Blob(blob) => {
                node_needs[id] = upstream;
                if node.succs.is_empty() {
                    log::warn!("Blob `{}` is provided but never consumed", node.name);
                    for &pred in &node.preds {
                        if let NodeKind::Layer(layer) = topology.node(pred).kind {
                            detached[layer].push(blob);
                        }
                    }
                }
            }
        }
    }

    let backward: Vec<BackwardStep> = forward
        .iter()
        .rev()
        .filter(|&&layer| layers[layer].need_backward)
        .map(|&layer| BackwardStep {
            layer,
            need_input_gradient: layers[layer].need_input_gradient,
            detached: std::mem::take(&mut detached[layer]),
        })
        .collect();

    let params = forward
        .iter()
        .flat_map(|&layer| (0..param_counts[layer]).map(move |slot| ParamRef { layer, slot }))
        .collect();

    log::debug!(
        "Planned {} forward and {} backward steps",
        forward.len(),
        backward.len()
    );

    Plan {
        forward,
        backward,
        params,
        layers,
    }
}

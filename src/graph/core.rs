//! Net - named layers wired together by named blobs.
//!
//! A net is built incrementally with `add_layer`, validated and planned once by
//! `finish`, then run any number of times with `execute` and `update`.

use std::collections::HashSet;

use super::schedule::{self, BackwardStep, LayerSchedule, ParamRef, Plan};
use super::topology::{NodeId, NodeKind, Topology};
use super::Blob;
use crate::errors::{NetError, Result};
use crate::kernel::Element;
use crate::layers::Layer;

pub(super) struct LayerEntry<A: Element> {
    pub layer: Box<dyn Layer<A>>,
    pub needs: Vec<usize>,
    pub provides: Vec<usize>,
}

pub(super) enum NetState {
    Open,
    Finished(Plan),
    Invalid,
}

/// A directed acyclic graph of layers exchanging blobs.
///
/// Every blob has exactly one producing layer and at most one consuming layer.
/// Blobs are created on first mention by name and owned by the net; layers only
/// see them for the duration of a `forward` or `backward` call.
///
/// # Example
///
/// ```
/// use layernet::prelude::*;
/// use ndarray::array;
///
/// let features = Buffer::from_array(array![[1.0f64, 2.0], [3.0, 4.0]]);
/// let targets = Buffer::from_array(array![[1.0f64], [0.0]]);
///
/// let mut net = Net::new("regression");
/// net.add_layer(
///     ArrayDataLayer::new("data", vec![features, targets]).unwrap(),
///     &[],
///     &["x", "y"],
/// )
/// .unwrap();
/// net.add_layer(InnerProductConfig::new("ip", 1).init().unwrap(), &["x"], &["pred"])
///     .unwrap();
/// net.add_layer(LossLayer::new("loss", Loss::Squared).unwrap(), &["pred", "y"], &[])
///     .unwrap();
/// net.finish().unwrap();
///
/// let loss = net.execute().unwrap();
/// assert_eq!(loss, 1.0);
/// ```
pub struct Net<A: Element> {
    pub(super) name: String,
    pub(super) topology: Topology,
    pub(super) layers: Vec<LayerEntry<A>>,
    pub(super) blobs: Vec<Blob<A>>,
    pub(super) state: NetState,
}

impl<A: Element> Net<A> {
    /// Creates an empty, open net.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topology: Topology::default(),
            layers: Vec::new(),
            blobs: Vec::new(),
            state: NetState::Open,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a layer reading the blobs named in `needs` and writing those named in `provides`.
    ///
    /// Blobs are created on first mention. All name checks run before the net is
    /// touched, so a rejected call leaves it unchanged.
    pub fn add_layer<L>(&mut self, layer: L, needs: &[&str], provides: &[&str]) -> Result<()>
    where
        L: Layer<A> + 'static,
    {
        self.add_boxed_layer(Box::new(layer), needs, provides)
    }

    /// Same as [`Net::add_layer`] for an already boxed layer.
    pub fn add_boxed_layer(
        &mut self,
        layer: Box<dyn Layer<A>>,
        needs: &[&str],
        provides: &[&str],
    ) -> Result<()> {
        self.ensure_open()?;
        let name = layer.name().to_string();
        self.check_names(&name, needs, provides)?;

        let layer_index = self.layers.len();
        let node = self.topology.add_node(&name, NodeKind::Layer(layer_index));
        let mut need_indices = Vec::with_capacity(needs.len());
        for blob in needs {
            let (blob_node, index) = self.blob_node(blob);
            self.topology.add_edge(blob_node, node);
            need_indices.push(index);
        }
        let mut provide_indices = Vec::with_capacity(provides.len());
        for blob in provides {
            let (blob_node, index) = self.blob_node(blob);
            self.topology.add_edge(node, blob_node);
            provide_indices.push(index);
        }

        log::debug!("Net `{}`: added layer `{}` {:?} -> {:?}", self.name, name, needs, provides);
        self.layers.push(LayerEntry {
            layer,
            needs: need_indices,
            provides: provide_indices,
        });
        Ok(())
    }

    /// Validates the graph and computes the execution plan.
    ///
    /// On a structural error the net becomes invalid and every later call fails.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_open()?;
        let order = match schedule::validate(&self.topology) {
            Ok(order) => order,
            Err(reason) => {
                log::warn!("Net `{}` failed validation: {}", self.name, reason);
                self.state = NetState::Invalid;
                return Err(NetError::InvalidGraph(reason));
            }
        };
        let param_counts: Vec<usize> = self
            .layers
            .iter()
            .map(|entry| entry.layer.parameters().len())
            .collect();
        let plan = schedule::build_plan(&self.topology, &order, &param_counts);
        log::info!(
            "Net `{}` finished: {} layers, {} blobs, {} parameters",
            self.name,
            self.layers.len(),
            self.blobs.len(),
            plan.params.len()
        );
        self.state = NetState::Finished(plan);
        Ok(())
    }

    /// Runs the forward pass then the backward pass; returns the summed loss.
    ///
    /// Only the forward return values are summed. Parameter gradients are
    /// left in place for [`Net::update`] or an external solver.
    pub fn execute(&mut self) -> Result<A> {
        let Self {
            topology,
            layers,
            blobs,
            state,
            ..
        } = self;
        let plan = finished_plan(state)?;

        let mut loss = A::zero();
        for &index in &plan.forward {
            loss += run_forward(&mut layers[index], blobs)?;
        }
        for step in &plan.backward {
            run_backward(&mut layers[step.layer], blobs, step, topology)?;
        }
        Ok(loss)
    }

    /// Calls `update` on every layer, in forward order.
    pub fn update(&mut self) -> Result<()> {
        let Self { layers, state, .. } = self;
        let plan = finished_plan(state)?;
        for &index in &plan.forward {
            layers[index].layer.update()?;
        }
        Ok(())
    }

    /// All parameter blobs: layers in forward order, each layer's own order within.
    ///
    /// The order is fixed by `finish`; a layer that later drops a parameter
    /// fails with [`NetError::MissingParameter`].
    pub fn params(&self) -> Result<Vec<&Blob<A>>> {
        let plan = finished_plan(&self.state)?;
        let per_layer: Vec<Vec<&Blob<A>>> = self
            .layers
            .iter()
            .map(|entry| entry.layer.parameters())
            .collect();
        plan.params
            .iter()
            .map(|param| {
                per_layer[param.layer]
                    .get(param.slot)
                    .copied()
                    .ok_or_else(|| missing_parameter(&self.layers, param))
            })
            .collect()
    }

    /// Mutable access to the blobs of [`Net::params`], in the same order.
    pub fn params_mut(&mut self) -> Result<Vec<&mut Blob<A>>> {
        let Self { layers, state, .. } = self;
        let plan = finished_plan(state)?;
        check_params(layers, plan)?;

        let mut per_layer: Vec<Vec<Option<&mut Blob<A>>>> = layers
            .iter_mut()
            .map(|entry| entry.layer.parameters_mut().into_iter().map(Some).collect())
            .collect();
        Ok(plan
            .params
            .iter()
            .filter_map(|param| {
                per_layer[param.layer]
                    .get_mut(param.slot)
                    .and_then(Option::take)
            })
            .collect())
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, NetState::Finished(_))
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn num_blobs(&self) -> usize {
        self.blobs.len()
    }

    pub fn blob(&self, name: &str) -> Option<&Blob<A>> {
        match self.kind(name)? {
            NodeKind::Blob(index) => Some(&self.blobs[index]),
            NodeKind::Layer(_) => None,
        }
    }

    pub fn blob_mut(&mut self, name: &str) -> Option<&mut Blob<A>> {
        match self.kind(name)? {
            NodeKind::Blob(index) => Some(&mut self.blobs[index]),
            NodeKind::Layer(_) => None,
        }
    }

    pub fn layer(&self, name: &str) -> Option<&dyn Layer<A>> {
        match self.kind(name)? {
            NodeKind::Layer(index) => Some(&*self.layers[index].layer),
            NodeKind::Blob(_) => None,
        }
    }

    /// Layer names in insertion order.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|entry| entry.layer.name()).collect()
    }

    /// Layer names in forward execution order.
    pub fn forward_order(&self) -> Result<Vec<&str>> {
        let plan = finished_plan(&self.state)?;
        Ok(plan.forward.iter().map(|&index| self.layer_name(index)).collect())
    }

    /// Layer names in backward execution order, each with its input-gradient flag.
    pub fn backward_order(&self) -> Result<Vec<(&str, bool)>> {
        let plan = finished_plan(&self.state)?;
        Ok(plan
            .backward
            .iter()
            .map(|step| (self.layer_name(step.layer), step.need_input_gradient))
            .collect())
    }

    /// Backward flags computed for the named layer.
    pub fn schedule(&self, name: &str) -> Result<Option<LayerSchedule>> {
        let plan = finished_plan(&self.state)?;
        Ok(match self.kind(name) {
            Some(NodeKind::Layer(index)) => Some(plan.layers[index]),
            _ => None,
        })
    }

    pub(super) fn plan(&self) -> Result<&Plan> {
        finished_plan(&self.state)
    }

    pub(super) fn layer_name(&self, index: usize) -> &str {
        self.layers[index].layer.name()
    }

    pub(super) fn blob_names(&self, indices: &[usize]) -> Vec<String> {
        let mut names = vec![String::new(); self.blobs.len()];
        for (_, node) in self.topology.nodes() {
            if let NodeKind::Blob(index) = node.kind {
                names[index] = node.name.clone();
            }
        }
        indices.iter().map(|&index| names[index].clone()).collect()
    }

    fn kind(&self, name: &str) -> Option<NodeKind> {
        self.topology.lookup(name).map(|id| self.topology.node(id).kind)
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            NetState::Open => Ok(()),
            NetState::Finished(_) => Err(NetError::FinalizedGraph),
            NetState::Invalid => Err(NetError::Invalid),
        }
    }

    fn check_names(&self, layer: &str, needs: &[&str], provides: &[&str]) -> Result<()> {
        if let Some(kind) = self.kind(layer) {
            return Err(NetError::DuplicateName(match kind {
                NodeKind::Layer(_) => format!("layer `{layer}` already exists"),
                NodeKind::Blob(_) => format!("layer name `{layer}` is already used by a blob"),
            }));
        }
        for list in [needs, provides] {
            let mut seen = HashSet::with_capacity(list.len());
            for &blob in list {
                if blob == layer || matches!(self.kind(blob), Some(NodeKind::Layer(_))) {
                    return Err(NetError::NameCollision(blob.to_string()));
                }
                if !seen.insert(blob) {
                    return Err(NetError::DuplicateName(format!(
                        "blob `{blob}` listed twice for layer `{layer}`"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Finds or creates the blob called `name`.
    fn blob_node(&mut self, name: &str) -> (NodeId, usize) {
        if let Some(id) = self.topology.lookup(name) {
            if let NodeKind::Blob(index) = self.topology.node(id).kind {
                return (id, index);
            }
        }
        let index = self.blobs.len();
        self.blobs.push(Blob::new());
        (self.topology.add_node(name, NodeKind::Blob(index)), index)
    }
}

impl<A: Element> Default for Net<A> {
    fn default() -> Self {
        Self::new("net")
    }
}

fn finished_plan(state: &NetState) -> Result<&Plan> {
    match state {
        NetState::Finished(plan) => Ok(plan),
        NetState::Open => Err(NetError::NotFinished),
        NetState::Invalid => Err(NetError::Invalid),
    }
}

/// Moves the listed blobs out of the table for the duration of one layer call.
fn lend<A>(blobs: &mut [Blob<A>], indices: &[usize]) -> Vec<Blob<A>> {
    indices
        .iter()
        .map(|&index| std::mem::take(&mut blobs[index]))
        .collect()
}

fn restore<A>(blobs: &mut [Blob<A>], indices: &[usize], lent: Vec<Blob<A>>) {
    for (&index, blob) in indices.iter().zip(lent) {
        blobs[index] = blob;
    }
}

fn run_forward<A: Element>(entry: &mut LayerEntry<A>, blobs: &mut [Blob<A>]) -> Result<A> {
    let inputs = lend(blobs, &entry.needs);
    let mut outputs = lend(blobs, &entry.provides);
    let result = entry.layer.forward(&inputs, &mut outputs);
    restore(blobs, &entry.needs, inputs);
    restore(blobs, &entry.provides, outputs);
    result
}

fn run_backward<A: Element>(
    entry: &mut LayerEntry<A>,
    blobs: &mut [Blob<A>],
    step: &BackwardStep,
    topology: &Topology,
) -> Result<A> {
    for &index in &step.detached {
        blobs[index].init_gradient()?;
    }
    if let Some(&index) = entry.provides.iter().find(|&&index| !blobs[index].has_gradient()) {
        return Err(NetError::MissingGradient {
            layer: entry.layer.name().to_string(),
            blob: blob_name(topology, index),
        });
    }

    let mut inputs = lend(blobs, &entry.needs);
    let outputs = lend(blobs, &entry.provides);
    let result = entry
        .layer
        .backward(&mut inputs, &outputs, step.need_input_gradient);
    restore(blobs, &entry.needs, inputs);
    restore(blobs, &entry.provides, outputs);
    result
}

fn blob_name(topology: &Topology, index: usize) -> String {
    topology
        .nodes()
        .find(|(_, node)| matches!(node.kind, NodeKind::Blob(blob) if blob == index))
        .map(|(_, node)| node.name.clone())
        .unwrap_or_default()
}

/// Verifies that every cached parameter slot still exists.
fn check_params<A: Element>(layers: &[LayerEntry<A>], plan: &Plan) -> Result<()> {
    let counts: Vec<usize> = layers
        .iter()
        .map(|entry| entry.layer.parameters().len())
        .collect();
    match plan.params.iter().find(|param| param.slot >= counts[param.layer]) {
        Some(param) => Err(missing_parameter(layers, param)),
        None => Ok(()),
    }
}

fn missing_parameter<A: Element>(layers: &[LayerEntry<A>], param: &ParamRef) -> NetError {
    NetError::MissingParameter {
        layer: layers[param.layer].layer.name().to_string(),
        slot: param.slot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::InvalidGraphReason;
    use ndarray::array;

    /// Writes `value` into every output and optionally owns one parameter.
    struct Stub {
        name: String,
        value: f64,
        params: Vec<Blob<f64>>,
        fail: bool,
        /// Writes no input gradients even when asked to.
        silent: bool,
        /// Drops its parameters during forward.
        shed: bool,
    }

    fn stub(name: &str) -> Stub {
        Stub {
            name: name.to_string(),
            value: 1.0,
            params: Vec::new(),
            fail: false,
            silent: false,
            shed: false,
        }
    }

    fn learnable(name: &str) -> Stub {
        Stub {
            params: vec![Blob::from_array(array![1.0, 2.0])],
            ..stub(name)
        }
    }

    impl Layer<f64> for Stub {
        fn name(&self) -> &str {
            &self.name
        }

        fn forward(&mut self, _inputs: &[Blob<f64>], outputs: &mut [Blob<f64>]) -> Result<f64> {
            if self.fail {
                return Err(NetError::BufferBusy);
            }
            if self.shed {
                self.params.clear();
            }
            for output in outputs.iter_mut() {
                output.init_data(&[1])?.fill(self.value);
            }
            Ok(self.value)
        }

        fn backward(
            &mut self,
            inputs: &mut [Blob<f64>],
            _outputs: &[Blob<f64>],
            need_input_gradient: bool,
        ) -> Result<f64> {
            if need_input_gradient && !self.silent {
                for input in inputs.iter_mut() {
                    input.init_gradient()?.fill(1.0);
                }
            }
            for param in &mut self.params {
                param.init_gradient()?.fill(0.5);
            }
            Ok(0.0)
        }

        fn parameters(&self) -> Vec<&Blob<f64>> {
            self.params.iter().collect()
        }

        fn parameters_mut(&mut self) -> Vec<&mut Blob<f64>> {
            self.params.iter_mut().collect()
        }
    }

    fn chain() -> Net<f64> {
        let mut net = Net::new("chain");
        net.add_layer(stub("source"), &[], &["a"]).unwrap();
        net.add_layer(learnable("fc"), &["a"], &["b"]).unwrap();
        net.add_layer(stub("act"), &["b"], &["c"]).unwrap();
        net.add_layer(stub("sink"), &["c"], &[]).unwrap();
        net
    }

    #[test]
    fn test_duplicate_layer_name() {
        let mut net = chain();
        let err = net.add_layer(stub("fc"), &[], &["z"]).unwrap_err();
        assert!(matches!(err, NetError::DuplicateName(_)));
        assert_eq!(net.num_layers(), 4);
        assert!(net.blob("z").is_none());
    }

    #[test]
    fn test_layer_named_like_blob() {
        let mut net = chain();
        assert!(matches!(
            net.add_layer(stub("a"), &[], &[]),
            Err(NetError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_blob_named_like_layer() {
        let mut net = chain();
        assert!(matches!(
            net.add_layer(stub("new"), &["fc"], &[]),
            Err(NetError::NameCollision(name)) if name == "fc"
        ));
        assert!(matches!(
            net.add_layer(stub("self"), &[], &["self"]),
            Err(NetError::NameCollision(_))
        ));
        assert_eq!(net.num_layers(), 4);
    }

    #[test]
    fn test_blob_listed_twice() {
        let mut net = Net::<f64>::new("n");
        assert!(matches!(
            net.add_layer(stub("l"), &["x", "x"], &[]),
            Err(NetError::DuplicateName(_))
        ));
        assert_eq!(net.num_blobs(), 0);
        assert_eq!(net.num_layers(), 0);
    }

    #[test]
    fn test_finished_net_is_frozen() {
        let mut net = chain();
        net.finish().unwrap();
        assert!(matches!(
            net.add_layer(stub("more"), &[], &[]),
            Err(NetError::FinalizedGraph)
        ));
        assert!(matches!(net.finish(), Err(NetError::FinalizedGraph)));
    }

    #[test]
    fn test_execute_requires_finish() {
        let mut net = chain();
        assert!(matches!(net.execute(), Err(NetError::NotFinished)));
        assert!(matches!(net.params(), Err(NetError::NotFinished)));
    }

    #[test]
    fn test_cycle_invalidates_net() {
        let mut net = Net::<f64>::new("cyclic");
        net.add_layer(stub("l1"), &["y"], &["x"]).unwrap();
        net.add_layer(stub("l2"), &["x"], &["y"]).unwrap();
        assert!(matches!(
            net.finish(),
            Err(NetError::InvalidGraph(InvalidGraphReason::Cycle { .. }))
        ));
        assert!(matches!(net.finish(), Err(NetError::Invalid)));
        assert!(matches!(net.execute(), Err(NetError::Invalid)));
        assert!(matches!(
            net.add_layer(stub("l3"), &[], &[]),
            Err(NetError::Invalid)
        ));
    }

    #[test]
    fn test_layer_reading_its_own_output_is_a_cycle() {
        let mut net = Net::<f64>::new("loop");
        net.add_layer(stub("l"), &["x"], &["x"]).unwrap();
        assert!(matches!(
            net.finish(),
            Err(NetError::InvalidGraph(InvalidGraphReason::Cycle { .. }))
        ));
    }

    #[test]
    fn test_orphan_blob() {
        let mut net = Net::<f64>::new("orphan");
        net.add_layer(stub("l"), &["nobody"], &[]).unwrap();
        assert!(matches!(
            net.finish(),
            Err(NetError::InvalidGraph(InvalidGraphReason::OrphanBlob { blob })) if blob == "nobody"
        ));
    }

    #[test]
    fn test_empty_net() {
        let mut net = Net::<f32>::new("empty");
        net.finish().unwrap();
        assert_eq!(net.execute().unwrap(), 0.0);
        assert!(net.params().unwrap().is_empty());
        assert!(net.forward_order().unwrap().is_empty());
        net.update().unwrap();
    }

    #[test]
    fn test_orders_and_flags() {
        let mut net = chain();
        net.finish().unwrap();
        assert_eq!(net.forward_order().unwrap(), vec!["source", "fc", "act", "sink"]);
        assert_eq!(
            net.backward_order().unwrap(),
            vec![("sink", true), ("act", true), ("fc", false)]
        );
        let source = net.schedule("source").unwrap().unwrap();
        assert!(!source.need_backward);
        assert!(net.schedule("b").unwrap().is_none());
    }

    #[test]
    fn test_unconsumed_output_of_learnable_layer() {
        let mut net = chain();
        net.add_layer(learnable("side"), &[], &["dangling"]).unwrap();
        net.finish().unwrap();
        net.execute().unwrap();
        let dangling = net.blob("dangling").unwrap();
        assert!(dangling.gradient().unwrap().iter().all(|&g| g == 0.0));
        assert_eq!(net.params().unwrap().len(), 2);
    }

    #[test]
    fn test_consumer_without_input_gradient() {
        let mut net = Net::<f64>::new("silent");
        net.add_layer(learnable("fc"), &[], &["a"]).unwrap();
        net.add_layer(Stub { silent: true, ..stub("sink") }, &["a"], &[])
            .unwrap();
        net.finish().unwrap();
        assert!(matches!(
            net.execute(),
            Err(NetError::MissingGradient { layer, blob }) if layer == "fc" && blob == "a"
        ));
    }

    #[test]
    fn test_params_follow_the_finished_plan() {
        let mut net = Net::<f64>::new("shed");
        net.add_layer(Stub { shed: true, ..learnable("fc") }, &[], &["a"])
            .unwrap();
        net.add_layer(stub("sink"), &["a"], &[]).unwrap();
        net.finish().unwrap();
        assert_eq!(net.params().unwrap().len(), 1);

        net.execute().unwrap();
        assert!(matches!(
            net.params(),
            Err(NetError::MissingParameter { slot: 0, .. })
        ));
        assert!(matches!(
            net.params_mut(),
            Err(NetError::MissingParameter { .. })
        ));
    }

    #[test]
    fn test_lookup_by_name() {
        let net = chain();
        assert_eq!(net.layer_names(), vec!["source", "fc", "act", "sink"]);
        assert_eq!(net.layer("fc").unwrap().parameters().len(), 1);
        assert!(net.layer("a").is_none());
        assert!(net.blob("fc").is_none());
        assert!(!net.blob("a").unwrap().has_data());
    }

    #[test]
    fn test_execute_sums_forward_values_and_fills_gradients() {
        let mut net = chain();
        net.finish().unwrap();
        assert_eq!(net.execute().unwrap(), 4.0);
        assert!(net.blob("b").unwrap().has_gradient());
        assert!(net.blob("c").unwrap().has_gradient());
        assert!(!net.blob("a").unwrap().has_gradient());
    }

    #[test]
    fn test_params_are_stable() {
        let mut net = chain();
        net.finish().unwrap();
        net.execute().unwrap();
        let first: Vec<*const Blob<f64>> = net.params().unwrap().into_iter().map(|b| b as *const _).collect();
        let second: Vec<*const Blob<f64>> = net.params().unwrap().into_iter().map(|b| b as *const _).collect();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(net.params_mut().unwrap().len(), 1);
    }

    #[test]
    fn test_update_applies_gradients() {
        let mut net = chain();
        net.finish().unwrap();
        net.execute().unwrap();
        net.update().unwrap();
        let params = net.params().unwrap();
        assert_eq!(*params[0].data().unwrap(), array![1.5, 2.5].into_dyn());
    }

    #[test]
    fn test_failing_layer_returns_blobs() {
        let mut net = Net::<f64>::new("fails");
        net.add_layer(stub("src"), &[], &["x"]).unwrap();
        net.add_layer(Stub { fail: true, ..stub("bad") }, &["x"], &["y"]).unwrap();
        net.add_layer(stub("sink"), &["y"], &[]).unwrap();
        net.finish().unwrap();
        assert!(matches!(net.execute(), Err(NetError::BufferBusy)));
        assert!(net.blob("x").unwrap().has_data());
    }
}

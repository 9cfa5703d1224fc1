//! Bipartite layer/blob graph stored as an arena of nodes.

use std::collections::HashMap;

pub(crate) type NodeId = usize;

/// What a node stands for, with its index in the net's layer or blob table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Layer(usize),
    Blob(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub preds: Vec<NodeId>,
    pub succs: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Directed graph with edges blob -> consuming layer and layer -> provided blob.
#[derive(Debug, Default)]
pub(crate) struct Topology {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
}

impl Topology {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate()
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn add_node(&mut self, name: &str, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            kind,
            preds: Vec::new(),
            succs: Vec::new(),
        });
        self.index.insert(name.to_string(), id);
        id
    }

    /// Adds `from -> to`. Parallel edges collapse into one.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if !self.nodes[from].succs.contains(&to) {
            self.nodes[from].succs.push(to);
            self.nodes[to].preds.push(from);
        }
    }

    /// Names of the given nodes, in order.
    pub fn names(&self, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| self.nodes[id].name.clone()).collect()
    }

    /// Depth-first topological sort.
    ///
    /// Roots and successors are walked in reverse insertion order so the reversed
    /// postorder follows insertion order wherever the edges allow. On a cycle the
    /// node that closed it is returned.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, NodeId> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut postorder = Vec::with_capacity(self.nodes.len());

        for root in (0..self.nodes.len()).rev() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::InProgress;
            let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];

            while !stack.is_empty() {
                let top = stack.len() - 1;
                let (node, cursor) = stack[top];
                let succs = &self.nodes[node].succs;
                if cursor < succs.len() {
                    stack[top].1 += 1;
                    let next = succs[succs.len() - 1 - cursor];
                    match marks[next] {
                        Mark::Unvisited => {
                            marks[next] = Mark::InProgress;
                            stack.push((next, 0));
                        }
                        Mark::InProgress => return Err(next),
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    postorder.push(node);
                    stack.pop();
                }
            }
        }

        postorder.reverse();
        Ok(postorder)
    }
}

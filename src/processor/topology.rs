//! Dependency graph analysis
//!
//! Runs once at initialization: depth-first topological sort with cycle
//! detection, and the transitive external-input set per node. Declaration
//! order breaks ties, so the resulting order is stable across runs.

use std::collections::BTreeSet;

use crate::mapping::ConfigError;

use super::node::{NodeId, SignalNode};

/// Result of analyzing the dependency graph.
#[derive(Debug)]
pub(crate) struct Topology {
    /// Evaluation order: every dependency precedes its dependents.
    pub(crate) order: Vec<NodeId>,
    /// Per node, the distinct external input names it transitively needs.
    pub(crate) required_inputs: Vec<BTreeSet<String>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

pub(crate) fn analyze(nodes: &[SignalNode]) -> Result<Topology, ConfigError> {
    let mut order = Vec::with_capacity(nodes.len());
    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut path: Vec<usize> = Vec::new();

    for start in 0..nodes.len() {
        visit(nodes, start, &mut marks, &mut path, &mut order)?;
    }

    // Accumulate transitive input sets along the topological order.
    let mut required_inputs: Vec<BTreeSet<String>> = vec![BTreeSet::new(); nodes.len()];
    for id in &order {
        let node = &nodes[id.as_usize()];
        let mut inputs = BTreeSet::new();
        if let Some(source) = &node.source {
            inputs.insert(source.name.clone());
        }
        for dep in &node.deps {
            inputs.extend(required_inputs[dep.as_usize()].iter().cloned());
        }
        required_inputs[id.as_usize()] = inputs;
    }

    Ok(Topology {
        order,
        required_inputs,
    })
}

fn visit(
    nodes: &[SignalNode],
    index: usize,
    marks: &mut [Mark],
    path: &mut Vec<usize>,
    order: &mut Vec<NodeId>,
) -> Result<(), ConfigError> {
    match marks[index] {
        Mark::Done => return Ok(()),
        Mark::InProgress => {
            // Name the cycle: everything on the path from the first visit of
            // this node, plus the node again to close the loop.
            let from = path.iter().position(|&n| n == index).unwrap_or(0);
            let mut cycle: Vec<String> =
                path[from..].iter().map(|&n| nodes[n].name.clone()).collect();
            cycle.push(nodes[index].name.clone());
            return Err(ConfigError::Cycle(cycle));
        }
        Mark::Unvisited => {}
    }

    marks[index] = Mark::InProgress;
    path.push(index);
    for dep in &nodes[index].deps {
        visit(nodes, dep.as_usize(), marks, path, order)?;
    }
    path.pop();
    marks[index] = Mark::Done;
    order.push(NodeId::new(index));
    Ok(())
}

//! Compiled signal nodes and their mutable state

use std::time::{Duration, Instant};

use std::collections::HashMap;

use crate::expr::Expr;
use crate::mapping::{SignalSource, UpdateTrigger};
use crate::value::{QualifiedValue, ValueType};

/// Index of a node in the processor's arena.
///
/// Nodes never move after initialization, so an index is a stable handle and
/// dependency edges are plain index lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Transform with its expression compiled and its table ready for lookup.
#[derive(Debug)]
pub(crate) enum CompiledTransform {
    /// Pass the sole dependency (or bound input) through.
    Direct,
    /// Evaluate the parsed expression over the dependencies.
    Code(Expr),
    /// Canonical-stringify the sole dependency, look it up, parse the hit
    /// into the declared datatype.
    ValueMap(HashMap<String, String>),
    /// Assemble a struct from all dependencies.
    Assemble,
}

/// Mutable per-node state, owned by the scheduler.
#[derive(Debug)]
pub struct NodeState {
    pub last_value: QualifiedValue,
    pub last_emit: Option<Instant>,
    pub last_eval: Option<Instant>,
    pub dirty: bool,
}

impl NodeState {
    pub(crate) fn new() -> Self {
        Self {
            last_value: QualifiedValue::invalid(),
            last_emit: None,
            last_eval: None,
            dirty: false,
        }
    }
}

/// A node of the signal DAG: immutable configuration plus mutable state.
#[derive(Debug)]
pub struct SignalNode {
    /// Output signal name; also the broker path.
    pub name: String,
    pub datatype: ValueType,
    pub struct_type: Option<String>,
    /// External input binding; `Some` exactly for leaf nodes.
    pub source: Option<SignalSource>,
    pub(crate) transform: CompiledTransform,
    pub(crate) deps: Vec<NodeId>,
    /// Struct field name per dependency (alias or the dependency's name).
    pub(crate) field_names: Vec<String>,
    pub(crate) interval: Duration,
    pub(crate) trigger: UpdateTrigger,
    pub(crate) state: NodeState,
}

impl SignalNode {
    pub fn is_leaf(&self) -> bool {
        self.source.is_some()
    }

    /// The node's current value with its validity.
    pub fn last_value(&self) -> &QualifiedValue {
        &self.state.last_value
    }
}

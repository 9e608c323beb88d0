//! Signal processor DAG
//!
//! The core engine: a user-declared DAG of signal derivations, evaluated
//! tick by tick over batches of external input updates. Construction
//! compiles the mapping list into an index-addressed node arena, resolves
//! and validates the dependency graph, and precomputes a stable topological
//! order. Each [`SignalProcessor::process`] call then walks that order once:
//! activation, evaluation, and the emission decision per node.
//!
//! The processor is single-threaded and never blocks; the driver loop owns
//! the cadence (see [`crate::feeder`]).

pub mod node;
pub mod output;
pub mod topology;

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::expr::{Environment, Expr};
use crate::mapping::{ConfigError, SignalMapping, Transform};
use crate::source::SignalUpdate;
use crate::value::{QualifiedValue, StructValue, Value};

pub use node::{NodeId, NodeState, SignalNode};
pub use output::VssSignal;

use node::CompiledTransform;

/// The signal DAG with its per-node state.
///
/// All nodes are constructed at initialization and never destroyed; state is
/// owned here and mutated only by [`process`](Self::process).
pub struct SignalProcessor {
    nodes: Vec<node::SignalNode>,
    index: HashMap<String, NodeId>,
    order: Vec<NodeId>,
    required_inputs: Vec<BTreeSet<String>>,
    required: BTreeSet<String>,
    bindings: HashMap<String, NodeId>,
}

impl SignalProcessor {
    /// Compile a mapping list into a processor.
    ///
    /// All configuration errors surface here; a processor that constructs
    /// successfully cannot fail at runtime.
    pub fn new(mappings: Vec<SignalMapping>) -> Result<Self, ConfigError> {
        let mut index: HashMap<String, NodeId> = HashMap::with_capacity(mappings.len());
        for (position, mapping) in mappings.iter().enumerate() {
            if index
                .insert(mapping.name.clone(), NodeId::new(position))
                .is_some()
            {
                return Err(ConfigError::DuplicateSignal {
                    signal: mapping.name.clone(),
                });
            }
        }

        let mut nodes: Vec<node::SignalNode> = Vec::with_capacity(mappings.len());
        let mut bindings: HashMap<String, NodeId> = HashMap::new();

        for (position, mapping) in mappings.into_iter().enumerate() {
            mapping.validate()?;
            let mut deps = Vec::with_capacity(mapping.depends_on.len());
            for dependency in &mapping.depends_on {
                let id = index
                    .get(dependency)
                    .copied()
                    .ok_or_else(|| ConfigError::DanglingDependency {
                        signal: mapping.name.clone(),
                        dependency: dependency.clone(),
                    })?;
                deps.push(id);
            }

            let transform = if mapping.is_struct {
                CompiledTransform::Assemble
            } else {
                match mapping.transform {
                    Transform::Direct => CompiledTransform::Direct,
                    Transform::ValueMap(table) => CompiledTransform::ValueMap(table),
                    Transform::Code(text) => {
                        let expr =
                            Expr::parse(&text).map_err(|source| ConfigError::Expression {
                                signal: mapping.name.clone(),
                                source,
                            })?;
                        for ident in expr.identifiers() {
                            if !mapping.depends_on.iter().any(|d| d.as_str() == ident) {
                                return Err(ConfigError::UnknownIdentifier {
                                    signal: mapping.name.clone(),
                                    name: ident.to_string(),
                                });
                            }
                        }
                        CompiledTransform::Code(expr)
                    }
                }
            };

            let field_names = mapping
                .depends_on
                .iter()
                .map(|dep| {
                    mapping
                        .field_aliases
                        .get(dep)
                        .cloned()
                        .unwrap_or_else(|| dep.clone())
                })
                .collect();

            if let Some(source) = &mapping.source {
                let id = NodeId::new(position);
                if let Some(previous) = bindings.insert(source.name.clone(), id) {
                    return Err(ConfigError::DuplicateSourceBinding {
                        input: source.name.clone(),
                        first: nodes[previous.as_usize()].name.clone(),
                        second: mapping.name,
                    });
                }
            }

            nodes.push(node::SignalNode {
                name: mapping.name,
                datatype: mapping.datatype,
                struct_type: mapping.struct_type,
                source: mapping.source,
                transform,
                deps,
                field_names,
                interval: Duration::from_millis(mapping.interval_ms),
                trigger: mapping.update_trigger,
                state: node::NodeState::new(),
            });
        }

        let topology = topology::analyze(&nodes)?;
        let required = topology
            .required_inputs
            .iter()
            .flat_map(|set| set.iter().cloned())
            .collect();

        info!(
            "signal processor ready: {} nodes, {} external inputs",
            nodes.len(),
            bindings.len()
        );

        Ok(Self {
            nodes,
            index,
            order: topology.order,
            required_inputs: topology.required_inputs,
            required,
            bindings,
        })
    }

    /// Distinct external input names the whole DAG depends on. The input
    /// source need only deliver these.
    pub fn required_input_signals(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// External inputs one node transitively depends on.
    pub fn required_inputs_of(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.index
            .get(name)
            .map(|id| &self.required_inputs[id.as_usize()])
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&node::SignalNode> {
        self.index.get(name).map(|id| &self.nodes[id.as_usize()])
    }

    /// The leaf node bound to an external input, if any.
    pub fn bound_node(&self, input: &str) -> Option<&node::SignalNode> {
        self.bindings.get(input).map(|id| &self.nodes[id.as_usize()])
    }

    /// Output signal names, in declaration order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Process one tick: a possibly-empty update batch at monotonic `now`.
    ///
    /// Nodes are visited in topological order, so a dependent always reads
    /// the current tick's value of its dependencies. The batch is one atomic
    /// snapshot; duplicate updates for an input resolve to the last one.
    pub fn process(&mut self, updates: &[SignalUpdate], now: Instant) -> Vec<VssSignal> {
        let mut batch: HashMap<&str, &QualifiedValue> = HashMap::new();
        for update in updates {
            batch.insert(update.name.as_str(), &update.value);
        }

        let mut activated = vec![false; self.nodes.len()];
        let mut emissions = Vec::new();

        for position in 0..self.order.len() {
            let id = self.order[position];

            // Activation and evaluation.
            let computed: Option<QualifiedValue> = {
                let node = &self.nodes[id.as_usize()];
                if let Some(source) = &node.source {
                    batch.get(source.name.as_str()).map(|qv| (*qv).clone())
                } else {
                    let dep_active = node.deps.iter().any(|d| activated[d.as_usize()]);
                    let on_dependency = node.trigger.on_dependency() && dep_active;
                    let periodic_due = node.trigger.periodic()
                        && node
                            .state
                            .last_eval
                            .is_none_or(|t| now.duration_since(t) >= node.interval);
                    if on_dependency || periodic_due {
                        Some(self.evaluate(node))
                    } else {
                        None
                    }
                }
            };

            if let Some(value) = computed {
                let node = &mut self.nodes[id.as_usize()];
                node.state.last_value = value;
                node.state.dirty = true;
                node.state.last_eval = Some(now);
                activated[id.as_usize()] = true;
            }

            // Emission decision.
            let node = &mut self.nodes[id.as_usize()];
            let throttle_open = node.interval.is_zero()
                || node
                    .state
                    .last_emit
                    .is_none_or(|t| now.duration_since(t) >= node.interval);
            if node.state.dirty && node.state.last_value.valid && throttle_open {
                match output::assemble(node) {
                    Ok(signal) => {
                        signal.log();
                        node.state.dirty = false;
                        node.state.last_emit = Some(now);
                        emissions.push(signal);
                    }
                    Err(err) => {
                        warn!("dropping emission of '{}': {}", node.name, err);
                        node.state.dirty = false;
                    }
                }
            }
        }

        emissions
    }

    /// Evaluate a derived node against the current state of its
    /// dependencies. Faults make the node invalid, never abort the tick.
    fn evaluate(&self, node: &node::SignalNode) -> QualifiedValue {
        match &node.transform {
            CompiledTransform::Direct => {
                self.nodes[node.deps[0].as_usize()].state.last_value.clone()
            }
            CompiledTransform::Code(expr) => {
                let mut env = Environment::new();
                for dep in &node.deps {
                    let dep_node = &self.nodes[dep.as_usize()];
                    env.push(dep_node.name.as_str(), &dep_node.state.last_value);
                }
                match expr.eval(&env) {
                    Ok(value) => value,
                    Err(fault) => {
                        debug!("evaluation fault in '{}': {}", node.name, fault);
                        QualifiedValue::invalid()
                    }
                }
            }
            CompiledTransform::ValueMap(table) => {
                let dep = &self.nodes[node.deps[0].as_usize()].state.last_value;
                if !dep.valid {
                    return QualifiedValue::invalid();
                }
                let key = dep.value.to_string();
                match table.get(&key) {
                    Some(to) => match Value::parse_str(node.datatype, to) {
                        Ok(value) => QualifiedValue::new(value),
                        Err(err) => {
                            warn!("value-map for '{}': {}", node.name, err);
                            QualifiedValue::invalid()
                        }
                    },
                    None => {
                        debug!("value-map miss for '{}': no entry for '{}'", node.name, key);
                        QualifiedValue::invalid()
                    }
                }
            }
            CompiledTransform::Assemble => {
                let mut fields = StructValue::new();
                for (dep, field) in node.deps.iter().zip(&node.field_names) {
                    let dep_node = &self.nodes[dep.as_usize()];
                    let qv = &dep_node.state.last_value;
                    if !qv.valid {
                        return QualifiedValue::invalid();
                    }
                    match qv.value.coerce_to(dep_node.datatype) {
                        Ok(value) => fields.push(field.clone(), value),
                        Err(err) => {
                            warn!("struct field '{}' of '{}': {}", field, node.name, err);
                            return QualifiedValue::invalid();
                        }
                    }
                }
                QualifiedValue::new(Value::Struct(fields))
            }
        }
    }
}

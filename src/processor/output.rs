//! Output assembly
//!
//! Turns a node that decided to emit into a `{path, qualified_value}` record
//! for the sink, applying the declared-datatype coercion. Struct nodes and
//! value-map nodes store their values already shaped, so coercion is the
//! identity for them.

use tracing::debug;

use crate::value::{CoercionError, QualifiedValue, ValueType};

use super::node::SignalNode;

/// One emission: an output path and its qualified value.
///
/// Paths equal node names verbatim; whether the path exists in the broker
/// tree is the sink's decision.
#[derive(Debug, Clone, PartialEq)]
pub struct VssSignal {
    pub path: String,
    pub value: QualifiedValue,
}

impl VssSignal {
    /// Single-line log form, e.g. `Vehicle.Speed = 42.5`.
    pub fn log(&self) {
        debug!("{} = {}", self.path, self.value);
    }
}

/// Coerce the node's current value to its declared datatype and package it.
///
/// Callers only pass nodes with a valid `last_value`; invalid values never
/// reach the sink.
pub(crate) fn assemble(node: &SignalNode) -> Result<VssSignal, CoercionError> {
    let coerced = match node.datatype {
        // Struct values are assembled field-by-field at evaluation time;
        // unspecified passes the input type through.
        ValueType::Struct | ValueType::Unspecified => node.state.last_value.value.clone(),
        target => node.state.last_value.value.coerce_to(target)?,
    };
    Ok(VssSignal {
        path: node.name.clone(),
        value: QualifiedValue::new(coerced),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{SignalSource, UpdateTrigger};
    use crate::processor::node::{CompiledTransform, NodeState, SignalNode};
    use crate::value::Value;
    use std::time::Duration;

    fn node_with(datatype: ValueType, value: Value) -> SignalNode {
        let mut state = NodeState::new();
        state.last_value = QualifiedValue::new(value);
        SignalNode {
            name: "Test.Signal".to_string(),
            datatype,
            struct_type: None,
            source: Some(SignalSource {
                source_type: "can".to_string(),
                name: "raw".to_string(),
            }),
            transform: CompiledTransform::Direct,
            deps: Vec::new(),
            field_names: Vec::new(),
            interval: Duration::ZERO,
            trigger: UpdateTrigger::OnDependency,
            state,
        }
    }

    #[test]
    fn test_emission_is_coerced_to_declared_datatype() {
        let node = node_with(ValueType::Float, Value::Double(42.0));
        let signal = assemble(&node).unwrap();
        assert_eq!(signal.path, "Test.Signal");
        assert_eq!(signal.value.value, Value::Float(42.0));
    }

    #[test]
    fn test_unspecified_passes_through() {
        let node = node_with(ValueType::Unspecified, Value::Int32(5));
        let signal = assemble(&node).unwrap();
        assert_eq!(signal.value.value, Value::Int32(5));
    }

    #[test]
    fn test_out_of_range_emission_is_an_error() {
        let node = node_with(ValueType::Uint8, Value::Int64(4096));
        assert!(assemble(&node).is_err());
    }
}

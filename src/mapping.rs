//! Signal mapping configuration
//!
//! The mapping file is a YAML document declaring one entry per output
//! signal:
//!
//! ```yaml
//! mappings:
//!   - signal: Vehicle.Speed
//!     source: {type: can, name: DI_vehicleSpeed}
//!     datatype: float
//!   - signal: Vehicle.SpeedKmh
//!     depends_on: [Vehicle.Speed]
//!     datatype: float
//!     transform: {code: "Vehicle.Speed * 3.6"}
//! ```
//!
//! Entries are deserialized into a permissive raw form first, then checked
//! and converted into [`SignalMapping`]s with precise configuration errors.
//! Graph-level validation (dangling references, cycles) happens when the
//! processor is built from the mapping list.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::expr::ParseError;
use crate::value::ValueType;

/// When a derived node re-evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateTrigger {
    /// Re-evaluate when a dependency changed this tick.
    #[default]
    OnDependency,
    /// Re-evaluate every `interval_ms`, regardless of dependencies.
    Periodic,
    /// Both of the above.
    Both,
}

impl UpdateTrigger {
    pub fn on_dependency(&self) -> bool {
        matches!(self, Self::OnDependency | Self::Both)
    }

    pub fn periodic(&self) -> bool {
        matches!(self, Self::Periodic | Self::Both)
    }
}

/// External input binding of a leaf node, e.g. `{can, "DI_vehicleSpeed"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSource {
    pub source_type: String,
    pub name: String,
}

/// How a node derives its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Pass the sole dependency (or the bound input) through unchanged.
    Direct,
    /// Evaluate an expression over the dependencies.
    Code(String),
    /// Stringify the sole dependency and look it up in a from→to table.
    ValueMap(HashMap<String, String>),
}

/// One validated mapping entry. Immutable after initialization.
#[derive(Debug, Clone)]
pub struct SignalMapping {
    /// Output signal name; also the broker path.
    pub name: String,
    pub source: Option<SignalSource>,
    pub datatype: ValueType,
    pub depends_on: Vec<String>,
    pub transform: Transform,
    pub is_struct: bool,
    pub struct_type: Option<String>,
    /// Minimum inter-emission interval; 0 disables throttling.
    pub interval_ms: u64,
    pub update_trigger: UpdateTrigger,
    /// Struct field names keyed by dependency, where they differ from the
    /// dependency's own name.
    pub field_aliases: HashMap<String, String>,
}

/// Fatal configuration error. Only these terminate the process.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("mapping #{index}: missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("signal '{signal}': unknown datatype '{datatype}'")]
    UnknownDatatype { signal: String, datatype: String },

    #[error("signal '{signal}': unknown update trigger '{trigger}'")]
    UnknownTrigger { signal: String, trigger: String },

    #[error("signal '{signal}' is declared more than once")]
    DuplicateSignal { signal: String },

    #[error("signal '{signal}': 'source' and 'depends_on' are mutually exclusive")]
    SourceAndDependencies { signal: String },

    #[error("signal '{signal}': a mapping needs a 'source' or a non-empty 'depends_on'")]
    MissingSource { signal: String },

    #[error("signal '{signal}': depends on undeclared signal '{dependency}'")]
    DanglingDependency { signal: String, dependency: String },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("signal '{signal}': {transform} transform requires exactly one dependency, found {found}")]
    TransformArity {
        signal: String,
        transform: &'static str,
        found: usize,
    },

    #[error("signal '{signal}': a leaf mapping only supports the direct transform")]
    LeafTransform { signal: String },

    #[error("signal '{signal}': struct nodes assemble their fields; 'transform' is not allowed")]
    StructTransform { signal: String },

    #[error("signal '{signal}': struct datatype requires 'struct_type'")]
    MissingStructType { signal: String },

    #[error("signal '{signal}': invalid expression: {source}")]
    Expression {
        signal: String,
        #[source]
        source: ParseError,
    },

    #[error("signal '{signal}': expression references '{name}', which is not a dependency")]
    UnknownIdentifier { signal: String, name: String },

    #[error("signal '{signal}': datatype may be unspecified only for a direct leaf mapping")]
    UnspecifiedDatatype { signal: String },

    #[error("signal '{signal}': value-map entry is not a scalar")]
    BadMapEntry { signal: String },

    #[error("signal '{signal}': field alias for '{dependency}' matches no dependency")]
    BadFieldAlias { signal: String, dependency: String },

    #[error("external input '{input}' is bound by both '{first}' and '{second}'")]
    DuplicateSourceBinding {
        input: String,
        first: String,
        second: String,
    },
}

// ── Raw (permissive) document form ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MappingDoc {
    mappings: Vec<RawMapping>,
}

#[derive(Debug, Deserialize)]
struct RawMapping {
    signal: Option<String>,
    source: Option<RawSource>,
    datatype: Option<String>,
    interval_ms: Option<u64>,
    depends_on: Option<Vec<String>>,
    transform: Option<RawTransform>,
    update_trigger: Option<String>,
    struct_type: Option<String>,
    field_aliases: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(rename = "type")]
    source_type: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawTransform {
    #[serde(alias = "math")]
    code: Option<String>,
    mapping: Option<Vec<RawMapEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawMapEntry {
    from: serde_yaml::Value,
    to: serde_yaml::Value,
}

/// Stringify a YAML scalar the way value-map lookup stringifies values:
/// booleans as `true`/`false`, numbers in canonical decimal form.
fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RawMapping {
    fn into_mapping(self, index: usize) -> Result<SignalMapping, ConfigError> {
        let name = self
            .signal
            .ok_or(ConfigError::MissingField {
                index,
                field: "signal",
            })?;

        let datatype = match &self.datatype {
            None => ValueType::Unspecified,
            Some(text) => {
                ValueType::from_name(text).ok_or_else(|| ConfigError::UnknownDatatype {
                    signal: name.clone(),
                    datatype: text.clone(),
                })?
            }
        };

        let update_trigger = match self.update_trigger.as_deref() {
            None => UpdateTrigger::default(),
            Some("on-dependency") => UpdateTrigger::OnDependency,
            Some("periodic") => UpdateTrigger::Periodic,
            Some("both") => UpdateTrigger::Both,
            Some(other) => {
                return Err(ConfigError::UnknownTrigger {
                    signal: name,
                    trigger: other.to_string(),
                })
            }
        };

        let transform = match self.transform {
            None => Transform::Direct,
            Some(raw) => {
                if let Some(code) = raw.code {
                    Transform::Code(code)
                } else if let Some(entries) = raw.mapping {
                    let mut table = HashMap::with_capacity(entries.len());
                    for entry in &entries {
                        let from = scalar_to_string(&entry.from).ok_or_else(|| {
                            ConfigError::BadMapEntry {
                                signal: name.clone(),
                            }
                        })?;
                        let to = scalar_to_string(&entry.to).ok_or_else(|| {
                            ConfigError::BadMapEntry {
                                signal: name.clone(),
                            }
                        })?;
                        table.insert(from, to);
                    }
                    Transform::ValueMap(table)
                } else {
                    Transform::Direct
                }
            }
        };

        let depends_on = self.depends_on.unwrap_or_default();
        let source = self.source.map(|s| SignalSource {
            source_type: s.source_type,
            name: s.name,
        });

        let mapping = SignalMapping {
            is_struct: datatype == ValueType::Struct,
            name,
            source,
            datatype,
            depends_on,
            transform,
            struct_type: self.struct_type,
            interval_ms: self.interval_ms.unwrap_or(0),
            update_trigger,
            field_aliases: self.field_aliases.unwrap_or_default(),
        };
        mapping.validate()?;
        Ok(mapping)
    }
}

impl SignalMapping {
    /// Checks that need no knowledge of the other mappings.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let signal = || self.name.clone();

        if self.source.is_some() && !self.depends_on.is_empty() {
            return Err(ConfigError::SourceAndDependencies { signal: signal() });
        }
        if self.source.is_none() && self.depends_on.is_empty() {
            return Err(ConfigError::MissingSource { signal: signal() });
        }

        let is_leaf = self.source.is_some();
        if is_leaf && self.transform != Transform::Direct {
            return Err(ConfigError::LeafTransform { signal: signal() });
        }

        if self.is_struct {
            if self.transform != Transform::Direct {
                return Err(ConfigError::StructTransform { signal: signal() });
            }
            if self.struct_type.is_none() {
                return Err(ConfigError::MissingStructType { signal: signal() });
            }
        } else {
            match &self.transform {
                Transform::Direct if !is_leaf => {
                    if self.depends_on.len() != 1 {
                        return Err(ConfigError::TransformArity {
                            signal: signal(),
                            transform: "direct",
                            found: self.depends_on.len(),
                        });
                    }
                }
                Transform::ValueMap(_) => {
                    if self.depends_on.len() != 1 {
                        return Err(ConfigError::TransformArity {
                            signal: signal(),
                            transform: "value-map",
                            found: self.depends_on.len(),
                        });
                    }
                }
                _ => {}
            }
        }

        // Unspecified output types only work where the input type flows
        // through untouched: a direct leaf.
        if self.datatype == ValueType::Unspecified
            && !(is_leaf && self.transform == Transform::Direct)
        {
            return Err(ConfigError::UnspecifiedDatatype { signal: signal() });
        }

        for dependency in self.field_aliases.keys() {
            if !self.depends_on.iter().any(|d| d == dependency) {
                return Err(ConfigError::BadFieldAlias {
                    signal: signal(),
                    dependency: dependency.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Parse a mapping document from YAML text.
pub fn parse_mappings(text: &str) -> crate::Result<Vec<SignalMapping>> {
    let doc: MappingDoc = serde_yaml::from_str(text)?;
    let mut mappings = Vec::with_capacity(doc.mappings.len());
    for (index, raw) in doc.mappings.into_iter().enumerate() {
        mappings.push(raw.into_mapping(index)?);
    }
    Ok(mappings)
}

/// Load a mapping document from a file.
pub fn load_mappings<P: AsRef<Path>>(path: P) -> crate::Result<Vec<SignalMapping>> {
    let text = std::fs::read_to_string(path)?;
    parse_mappings(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_document() {
        let yaml = r#"
mappings:
  - signal: Vehicle.Speed
    source: {type: can, name: DI_vehicleSpeed}
    datatype: float
  - signal: Vehicle.SpeedKmh
    depends_on: [Vehicle.Speed]
    datatype: float
    interval_ms: 100
    update_trigger: both
    transform:
      code: "Vehicle.Speed * 3.6"
  - signal: Vehicle.Gear
    depends_on: [Vehicle.GearRaw]
    datatype: string
    transform:
      mapping:
        - {from: 0, to: P}
        - {from: 1, to: R}
  - signal: Vehicle.GearRaw
    source: {type: can, name: DI_gear}
    datatype: int32
"#;
        let mappings = parse_mappings(yaml).unwrap();
        assert_eq!(mappings.len(), 4);

        let speed = &mappings[0];
        assert_eq!(speed.name, "Vehicle.Speed");
        assert_eq!(speed.datatype, ValueType::Float);
        assert_eq!(speed.source.as_ref().unwrap().name, "DI_vehicleSpeed");
        assert_eq!(speed.transform, Transform::Direct);
        assert_eq!(speed.interval_ms, 0);
        assert_eq!(speed.update_trigger, UpdateTrigger::OnDependency);

        let kmh = &mappings[1];
        assert_eq!(kmh.depends_on, vec!["Vehicle.Speed".to_string()]);
        assert_eq!(kmh.interval_ms, 100);
        assert_eq!(kmh.update_trigger, UpdateTrigger::Both);
        assert!(matches!(kmh.transform, Transform::Code(_)));

        let gear = &mappings[2];
        match &gear.transform {
            Transform::ValueMap(table) => {
                assert_eq!(table.get("0"), Some(&"P".to_string()));
                assert_eq!(table.get("1"), Some(&"R".to_string()));
            }
            other => panic!("expected value map, got {:?}", other),
        }
    }

    #[test]
    fn test_math_alias_for_code() {
        let yaml = r#"
mappings:
  - signal: Out
    depends_on: [In]
    datatype: double
    transform:
      math: "In * 2"
  - signal: In
    source: {type: can, name: raw}
    datatype: double
"#;
        let mappings = parse_mappings(yaml).unwrap();
        assert_eq!(
            mappings[0].transform,
            Transform::Code("In * 2".to_string())
        );
    }

    #[test]
    fn test_missing_signal_field() {
        let yaml = "mappings:\n  - datatype: float\n";
        let err = parse_mappings(yaml).unwrap_err();
        assert!(err.to_string().contains("missing required field 'signal'"));
    }

    #[test]
    fn test_unknown_datatype_rejected() {
        let yaml = "mappings:\n  - signal: X\n    source: {type: can, name: x}\n    datatype: int128\n";
        let err = parse_mappings(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown datatype 'int128'"));
    }

    #[test]
    fn test_unknown_trigger_rejected() {
        let yaml = "
mappings:
  - signal: X
    source: {type: can, name: x}
    datatype: float
    update_trigger: sometimes
";
        let err = parse_mappings(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown update trigger"));
    }

    #[test]
    fn test_source_and_depends_on_exclusive() {
        let yaml = "
mappings:
  - signal: X
    source: {type: can, name: x}
    datatype: float
    depends_on: [Y]
  - signal: Y
    source: {type: can, name: y}
    datatype: float
";
        let err = parse_mappings(yaml).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_node_without_source_or_deps_rejected() {
        let yaml = "mappings:\n  - signal: X\n    datatype: float\n";
        let err = parse_mappings(yaml).unwrap_err();
        assert!(err.to_string().contains("'source' or a non-empty 'depends_on'"));
    }

    #[test]
    fn test_value_map_needs_exactly_one_dependency() {
        let yaml = "
mappings:
  - signal: X
    depends_on: [A, B]
    datatype: string
    transform:
      mapping:
        - {from: 0, to: off}
  - signal: A
    source: {type: can, name: a}
    datatype: int32
  - signal: B
    source: {type: can, name: b}
    datatype: int32
";
        let err = parse_mappings(yaml).unwrap_err();
        assert!(err.to_string().contains("exactly one dependency"));
    }

    #[test]
    fn test_unspecified_datatype_only_for_direct_leaf() {
        let leaf = "mappings:\n  - signal: X\n    source: {type: can, name: x}\n";
        assert!(parse_mappings(leaf).is_ok());

        let derived = "
mappings:
  - signal: Y
    depends_on: [X]
  - signal: X
    source: {type: can, name: x}
    datatype: float
";
        let err = parse_mappings(derived).unwrap_err();
        assert!(err.to_string().contains("unspecified"));
    }

    #[test]
    fn test_struct_requires_struct_type() {
        let yaml = "
mappings:
  - signal: Pose
    depends_on: [X, Y]
    datatype: struct
  - signal: X
    source: {type: can, name: x}
    datatype: float
  - signal: Y
    source: {type: can, name: y}
    datatype: float
";
        let err = parse_mappings(yaml).unwrap_err();
        assert!(err.to_string().contains("struct_type"));
    }

    #[test]
    fn test_field_alias_must_match_dependency() {
        let yaml = "
mappings:
  - signal: Pose
    depends_on: [X]
    datatype: struct
    struct_type: Point
    field_aliases: {Z: z}
  - signal: X
    source: {type: can, name: x}
    datatype: float
";
        let err = parse_mappings(yaml).unwrap_err();
        assert!(err.to_string().contains("matches no dependency"));
    }
}

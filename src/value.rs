//! Core value types for signal processing
//!
//! Signals flow through the DAG as [`QualifiedValue`]s: a typed payload
//! ([`Value`]) plus a validity flag. Invalid values are treated as absent by
//! downstream consumers and are never emitted to the broker.
//!
//! Coercion follows the VSS promotion lattice: bool promotes to the smallest
//! signed integer, integers widen, integers promote to float/double, and
//! float↔double conversions are lossy-allowed. Narrowing a value outside the
//! target range is an error, never a silent wrap.

use std::fmt;

/// VSS datatype of a signal, as declared in the mapping file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Unspecified,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    String,
    Struct,
}

impl ValueType {
    /// Parse a VSS datatype name (e.g. `"boolean"`, `"uint16"`, `"double"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "unspecified" => Some(Self::Unspecified),
            "boolean" => Some(Self::Bool),
            "int8" => Some(Self::Int8),
            "int16" => Some(Self::Int16),
            "int32" => Some(Self::Int32),
            "int64" => Some(Self::Int64),
            "uint8" => Some(Self::Uint8),
            "uint16" => Some(Self::Uint16),
            "uint32" => Some(Self::Uint32),
            "uint64" => Some(Self::Uint64),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            "string" => Some(Self::String),
            "struct" => Some(Self::Struct),
            _ => None,
        }
    }

    /// The VSS name of this datatype.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Bool => "boolean",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Struct => "struct",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error raised when a value cannot be represented in a target datatype.
#[derive(Debug, thiserror::Error)]
pub enum CoercionError {
    #[error("value {value} out of range for {target}")]
    OutOfRange { value: String, target: ValueType },

    #[error("cannot coerce {from} to {target}")]
    Incompatible { from: ValueType, target: ValueType },

    #[error("non-finite value cannot be coerced to {target}")]
    NotFinite { target: ValueType },

    #[error("cannot parse '{value}' as {target}")]
    Unparseable { value: String, target: ValueType },
}

/// An ordered collection of named struct fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructValue {
    fields: Vec<(String, Value)>,
}

impl StructValue {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field. Field order is preserved.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for StructValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// Integer or floating intermediate used during numeric coercion.
/// i128 covers the full range of every integer variant including uint64.
enum Num {
    Int(i128),
    Float(f64),
}

/// A typed signal value.
///
/// `Unspecified` is the value of a node that has never been fed; it only
/// occurs together with an invalid [`QualifiedValue`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unspecified,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Struct(StructValue),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Unspecified => ValueType::Unspecified,
            Value::Bool(_) => ValueType::Bool,
            Value::Int8(_) => ValueType::Int8,
            Value::Int16(_) => ValueType::Int16,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::Uint8(_) => ValueType::Uint8,
            Value::Uint16(_) => ValueType::Uint16,
            Value::Uint32(_) => ValueType::Uint32,
            Value::Uint64(_) => ValueType::Uint64,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Struct(_) => ValueType::Struct,
        }
    }

    fn numeric(&self) -> Option<Num> {
        match self {
            Value::Bool(b) => Some(Num::Int(i128::from(*b))),
            Value::Int8(v) => Some(Num::Int(i128::from(*v))),
            Value::Int16(v) => Some(Num::Int(i128::from(*v))),
            Value::Int32(v) => Some(Num::Int(i128::from(*v))),
            Value::Int64(v) => Some(Num::Int(i128::from(*v))),
            Value::Uint8(v) => Some(Num::Int(i128::from(*v))),
            Value::Uint16(v) => Some(Num::Int(i128::from(*v))),
            Value::Uint32(v) => Some(Num::Int(i128::from(*v))),
            Value::Uint64(v) => Some(Num::Int(i128::from(*v))),
            Value::Float(v) => Some(Num::Float(f64::from(*v))),
            Value::Double(v) => Some(Num::Float(*v)),
            _ => None,
        }
    }

    /// Coerce this value to the given datatype.
    ///
    /// Coercion to `unspecified` is the identity. Narrowing outside the
    /// target range, NaN/∞ to integer, and string↔numeric crossings are
    /// errors; float→integer truncates toward zero.
    pub fn coerce_to(&self, target: ValueType) -> Result<Value, CoercionError> {
        if target == ValueType::Unspecified || self.value_type() == target {
            return Ok(self.clone());
        }

        let incompatible = || CoercionError::Incompatible {
            from: self.value_type(),
            target,
        };

        match target {
            ValueType::Bool => match self.numeric() {
                Some(Num::Int(i)) => Ok(Value::Bool(i != 0)),
                Some(Num::Float(f)) => Ok(Value::Bool(f != 0.0)),
                None => Err(incompatible()),
            },
            ValueType::Int8 => self.to_int(target).map(|i| Value::Int8(i as i8)),
            ValueType::Int16 => self.to_int(target).map(|i| Value::Int16(i as i16)),
            ValueType::Int32 => self.to_int(target).map(|i| Value::Int32(i as i32)),
            ValueType::Int64 => self.to_int(target).map(|i| Value::Int64(i as i64)),
            ValueType::Uint8 => self.to_int(target).map(|i| Value::Uint8(i as u8)),
            ValueType::Uint16 => self.to_int(target).map(|i| Value::Uint16(i as u16)),
            ValueType::Uint32 => self.to_int(target).map(|i| Value::Uint32(i as u32)),
            ValueType::Uint64 => self.to_int(target).map(|i| Value::Uint64(i as u64)),
            ValueType::Float => match self.numeric() {
                Some(Num::Int(i)) => Ok(Value::Float(i as f32)),
                Some(Num::Float(f)) => Ok(Value::Float(f as f32)),
                None => Err(incompatible()),
            },
            ValueType::Double => match self.numeric() {
                Some(Num::Int(i)) => Ok(Value::Double(i as f64)),
                Some(Num::Float(f)) => Ok(Value::Double(f)),
                None => Err(incompatible()),
            },
            ValueType::String | ValueType::Struct | ValueType::Unspecified => Err(incompatible()),
        }
    }

    /// Range-checked conversion to an integer intermediate.
    fn to_int(&self, target: ValueType) -> Result<i128, CoercionError> {
        let raw = match self.numeric() {
            Some(Num::Int(i)) => i,
            Some(Num::Float(f)) => {
                if !f.is_finite() {
                    return Err(CoercionError::NotFinite { target });
                }
                f.trunc() as i128
            }
            None => {
                return Err(CoercionError::Incompatible {
                    from: self.value_type(),
                    target,
                })
            }
        };

        let (min, max) = match target {
            ValueType::Int8 => (i128::from(i8::MIN), i128::from(i8::MAX)),
            ValueType::Int16 => (i128::from(i16::MIN), i128::from(i16::MAX)),
            ValueType::Int32 => (i128::from(i32::MIN), i128::from(i32::MAX)),
            ValueType::Int64 => (i128::from(i64::MIN), i128::from(i64::MAX)),
            ValueType::Uint8 => (0, i128::from(u8::MAX)),
            ValueType::Uint16 => (0, i128::from(u16::MAX)),
            ValueType::Uint32 => (0, i128::from(u32::MAX)),
            ValueType::Uint64 => (0, i128::from(u64::MAX)),
            _ => unreachable!("to_int called with non-integer target"),
        };

        if raw < min || raw > max {
            return Err(CoercionError::OutOfRange {
                value: self.to_string(),
                target,
            });
        }
        Ok(raw)
    }

    /// Parse a string into a value of the given datatype.
    ///
    /// This is the one sanctioned string→numeric crossing, used when a
    /// value-map hit is converted to the node's declared datatype.
    pub fn parse_str(target: ValueType, text: &str) -> Result<Value, CoercionError> {
        let unparseable = || CoercionError::Unparseable {
            value: text.to_string(),
            target,
        };

        match target {
            ValueType::Unspecified | ValueType::String => Ok(Value::String(text.to_string())),
            ValueType::Bool => match text {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(unparseable()),
            },
            ValueType::Int8 => text.parse().map(Value::Int8).map_err(|_| unparseable()),
            ValueType::Int16 => text.parse().map(Value::Int16).map_err(|_| unparseable()),
            ValueType::Int32 => text.parse().map(Value::Int32).map_err(|_| unparseable()),
            ValueType::Int64 => text.parse().map(Value::Int64).map_err(|_| unparseable()),
            ValueType::Uint8 => text.parse().map(Value::Uint8).map_err(|_| unparseable()),
            ValueType::Uint16 => text.parse().map(Value::Uint16).map_err(|_| unparseable()),
            ValueType::Uint32 => text.parse().map(Value::Uint32).map_err(|_| unparseable()),
            ValueType::Uint64 => text.parse().map(Value::Uint64).map_err(|_| unparseable()),
            ValueType::Float => text.parse().map(Value::Float).map_err(|_| unparseable()),
            ValueType::Double => text.parse().map(Value::Double).map_err(|_| unparseable()),
            ValueType::Struct => Err(unparseable()),
        }
    }
}

/// Canonical stringification: booleans as `true`/`false`, integers base-10,
/// floats in shortest round-trip form. Value-map lookup keys use this form.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Unspecified => write!(f, "unspecified"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Uint8(v) => write!(f, "{}", v),
            Value::Uint16(v) => write!(f, "{}", v),
            Value::Uint32(v) => write!(f, "{}", v),
            Value::Uint64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Struct(v) => write!(f, "{}", v),
        }
    }
}

/// A value paired with its validity.
///
/// Invalid values are treated as absent: dependents of an invalid node go
/// invalid themselves (unless they probe with `isvalid`), and invalid values
/// are suppressed from emission.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedValue {
    pub value: Value,
    pub valid: bool,
}

impl QualifiedValue {
    /// A valid value.
    pub fn new(value: Value) -> Self {
        Self { value, valid: true }
    }

    /// The invalid, unspecified value every node starts with.
    pub fn invalid() -> Self {
        Self {
            value: Value::Unspecified,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl fmt::Display for QualifiedValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.valid {
            write!(f, "{}", self.value)
        } else {
            write!(f, "<invalid>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_names_round_trip() {
        for name in [
            "boolean", "int8", "int16", "int32", "int64", "uint8", "uint16", "uint32", "uint64",
            "float", "double", "string", "struct",
        ] {
            let ty = ValueType::from_name(name).expect(name);
            assert_eq!(ty.name(), name);
        }
        assert!(ValueType::from_name("int128").is_none());
    }

    #[test]
    fn test_integer_widening() {
        let v = Value::Int8(-5).coerce_to(ValueType::Int64).unwrap();
        assert_eq!(v, Value::Int64(-5));
        let v = Value::Uint16(500).coerce_to(ValueType::Int32).unwrap();
        assert_eq!(v, Value::Int32(500));
    }

    #[test]
    fn test_narrowing_out_of_range_is_error() {
        let err = Value::Int32(300).coerce_to(ValueType::Int8).unwrap_err();
        assert!(matches!(err, CoercionError::OutOfRange { .. }));
        let err = Value::Int32(-1).coerce_to(ValueType::Uint8).unwrap_err();
        assert!(matches!(err, CoercionError::OutOfRange { .. }));
    }

    #[test]
    fn test_bool_numeric_crossings() {
        assert_eq!(
            Value::Int32(7).coerce_to(ValueType::Bool).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::Int32(0).coerce_to(ValueType::Bool).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            Value::Bool(true).coerce_to(ValueType::Uint8).unwrap(),
            Value::Uint8(1)
        );
    }

    #[test]
    fn test_float_double_lossy_allowed() {
        assert_eq!(
            Value::Double(1.5).coerce_to(ValueType::Float).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            Value::Float(2.25).coerce_to(ValueType::Double).unwrap(),
            Value::Double(2.25)
        );
    }

    #[test]
    fn test_float_to_int_truncates_and_checks_range() {
        assert_eq!(
            Value::Double(3.9).coerce_to(ValueType::Int32).unwrap(),
            Value::Int32(3)
        );
        assert_eq!(
            Value::Double(-3.9).coerce_to(ValueType::Int32).unwrap(),
            Value::Int32(-3)
        );
        let err = Value::Double(1e10).coerce_to(ValueType::Int16).unwrap_err();
        assert!(matches!(err, CoercionError::OutOfRange { .. }));
        let err = Value::Double(f64::NAN).coerce_to(ValueType::Int32).unwrap_err();
        assert!(matches!(err, CoercionError::NotFinite { .. }));
    }

    #[test]
    fn test_string_numeric_is_incompatible() {
        let err = Value::String("42".into())
            .coerce_to(ValueType::Int32)
            .unwrap_err();
        assert!(matches!(err, CoercionError::Incompatible { .. }));
        let err = Value::Int32(42).coerce_to(ValueType::String).unwrap_err();
        assert!(matches!(err, CoercionError::Incompatible { .. }));
    }

    #[test]
    fn test_parse_str_sanctioned_crossing() {
        assert_eq!(
            Value::parse_str(ValueType::Int32, "-17").unwrap(),
            Value::Int32(-17)
        );
        assert_eq!(
            Value::parse_str(ValueType::Bool, "true").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::parse_str(ValueType::String, "D").unwrap(),
            Value::String("D".into())
        );
        assert!(Value::parse_str(ValueType::Uint8, "256").is_err());
    }

    #[test]
    fn test_canonical_display() {
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Int32(-7).to_string(), "-7");
        assert_eq!(Value::Double(2.0).to_string(), "2");
        assert_eq!(Value::Double(3.25).to_string(), "3.25");
        assert_eq!(Value::Float(0.1).to_string(), "0.1");
    }

    #[test]
    fn test_struct_value_order_and_display() {
        let mut sv = StructValue::new();
        sv.push("x", Value::Float(1.0));
        sv.push("y", Value::Float(2.0));
        assert_eq!(sv.get("y"), Some(&Value::Float(2.0)));
        assert_eq!(sv.to_string(), "{x: 1, y: 2}");
    }

    #[test]
    fn test_initial_state_is_invalid_unspecified() {
        let qv = QualifiedValue::invalid();
        assert!(!qv.is_valid());
        assert_eq!(qv.value, Value::Unspecified);
        assert_eq!(qv.to_string(), "<invalid>");
    }
}

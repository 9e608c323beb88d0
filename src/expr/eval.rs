//! Expression evaluation over a borrowed environment
//!
//! Arithmetic runs over bool / i64 / f64 / string operands. Integer
//! arithmetic is overflow-checked and division by zero is a fault; mixed
//! int/float promotes to f64, where division by zero yields ±∞/NaN the way
//! C does (observable via `isnan`). Validity is sticky: an invalid operand
//! makes the result invalid without raising, except through `isvalid`,
//! which turns validity itself into a boolean.

use crate::value::{QualifiedValue, Value};

use super::parser::{BinOp, Expr, Func, UnaryOp};

/// Fault raised during evaluation. The owning node goes invalid and the
/// fault is logged; processing continues.
#[derive(Debug, thiserror::Error)]
pub enum EvalFault {
    #[error("unknown name '{0}'")]
    UnknownName(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Read-only name→value environment for one evaluation.
///
/// Dependencies are few, so lookup is a linear scan over borrowed entries.
#[derive(Debug, Default)]
pub struct Environment<'a> {
    entries: Vec<(&'a str, &'a QualifiedValue)>,
}

impl<'a> Environment<'a> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, name: &'a str, value: &'a QualifiedValue) {
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&'a QualifiedValue> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}

/// Scalar operand domain used during evaluation.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    fn type_name(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "string",
        }
    }

    fn into_value(self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Int(i) => Value::Int64(i),
            Scalar::Float(f) => Value::Double(f),
            Scalar::Str(s) => Value::String(s),
        }
    }
}

/// Evaluation outcome before faults: either a scalar or "invalid".
#[derive(Debug, Clone, PartialEq)]
enum Evaluated {
    Invalid,
    Scalar(Scalar),
}

/// Numeric operand pair after promotion.
enum NumPair {
    Int(i64, i64),
    Float(f64, f64),
}

fn promote(lhs: &Scalar, rhs: &Scalar, op: &str) -> Result<NumPair, EvalFault> {
    match (lhs, rhs) {
        (Scalar::Int(a), Scalar::Int(b)) => Ok(NumPair::Int(*a, *b)),
        (Scalar::Int(a), Scalar::Float(b)) => Ok(NumPair::Float(*a as f64, *b)),
        (Scalar::Float(a), Scalar::Int(b)) => Ok(NumPair::Float(*a, *b as f64)),
        (Scalar::Float(a), Scalar::Float(b)) => Ok(NumPair::Float(*a, *b)),
        _ => Err(EvalFault::Type(format!(
            "'{}' requires numeric operands, found {} and {}",
            op,
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn normalize(qv: &QualifiedValue) -> Result<Evaluated, EvalFault> {
    if !qv.valid {
        return Ok(Evaluated::Invalid);
    }
    let scalar = match &qv.value {
        Value::Unspecified => return Ok(Evaluated::Invalid),
        Value::Bool(b) => Scalar::Bool(*b),
        Value::Int8(v) => Scalar::Int(i64::from(*v)),
        Value::Int16(v) => Scalar::Int(i64::from(*v)),
        Value::Int32(v) => Scalar::Int(i64::from(*v)),
        Value::Int64(v) => Scalar::Int(*v),
        Value::Uint8(v) => Scalar::Int(i64::from(*v)),
        Value::Uint16(v) => Scalar::Int(i64::from(*v)),
        Value::Uint32(v) => Scalar::Int(i64::from(*v)),
        Value::Uint64(v) => Scalar::Int(i64::try_from(*v).map_err(|_| EvalFault::Overflow)?),
        Value::Float(v) => Scalar::Float(f64::from(*v)),
        Value::Double(v) => Scalar::Float(*v),
        Value::String(v) => Scalar::Str(v.clone()),
        Value::Struct(_) => {
            return Err(EvalFault::Type(
                "struct values cannot be expression operands".into(),
            ))
        }
    };
    Ok(Evaluated::Scalar(scalar))
}

impl Expr {
    /// Evaluate against an environment, yielding a qualified value.
    ///
    /// Integer results surface as `int64`, floats as `double`; the output
    /// assembler narrows to the node's declared datatype on emission.
    pub fn eval(&self, env: &Environment) -> Result<QualifiedValue, EvalFault> {
        Ok(match self.eval_inner(env)? {
            Evaluated::Invalid => QualifiedValue::invalid(),
            Evaluated::Scalar(s) => QualifiedValue::new(s.into_value()),
        })
    }

    fn eval_inner(&self, env: &Environment) -> Result<Evaluated, EvalFault> {
        match self {
            Expr::Int(v) => Ok(Evaluated::Scalar(Scalar::Int(*v))),
            Expr::Float(v) => Ok(Evaluated::Scalar(Scalar::Float(*v))),
            Expr::Str(v) => Ok(Evaluated::Scalar(Scalar::Str(v.clone()))),
            Expr::Bool(v) => Ok(Evaluated::Scalar(Scalar::Bool(*v))),
            Expr::Ident(name) => {
                let qv = env
                    .get(name)
                    .ok_or_else(|| EvalFault::UnknownName(name.clone()))?;
                normalize(qv)
            }
            Expr::Unary(op, operand) => {
                let operand = match operand.eval_inner(env)? {
                    Evaluated::Invalid => return Ok(Evaluated::Invalid),
                    Evaluated::Scalar(s) => s,
                };
                eval_unary(*op, operand).map(Evaluated::Scalar)
            }
            Expr::Binary(BinOp::And, lhs, rhs) => match lhs.eval_inner(env)? {
                Evaluated::Invalid => Ok(Evaluated::Invalid),
                Evaluated::Scalar(Scalar::Bool(false)) => {
                    Ok(Evaluated::Scalar(Scalar::Bool(false)))
                }
                Evaluated::Scalar(Scalar::Bool(true)) => expect_bool(rhs.eval_inner(env)?, "&&"),
                Evaluated::Scalar(other) => Err(bool_operand_fault("&&", &other)),
            },
            Expr::Binary(BinOp::Or, lhs, rhs) => match lhs.eval_inner(env)? {
                Evaluated::Invalid => Ok(Evaluated::Invalid),
                Evaluated::Scalar(Scalar::Bool(true)) => Ok(Evaluated::Scalar(Scalar::Bool(true))),
                Evaluated::Scalar(Scalar::Bool(false)) => expect_bool(rhs.eval_inner(env)?, "||"),
                Evaluated::Scalar(other) => Err(bool_operand_fault("||", &other)),
            },
            Expr::Binary(op, lhs, rhs) => {
                let lhs = match lhs.eval_inner(env)? {
                    Evaluated::Invalid => return Ok(Evaluated::Invalid),
                    Evaluated::Scalar(s) => s,
                };
                let rhs = match rhs.eval_inner(env)? {
                    Evaluated::Invalid => return Ok(Evaluated::Invalid),
                    Evaluated::Scalar(s) => s,
                };
                eval_binary(*op, lhs, rhs).map(Evaluated::Scalar)
            }
            Expr::Ternary {
                cond,
                then_branch,
                else_branch,
            } => match cond.eval_inner(env)? {
                Evaluated::Invalid => Ok(Evaluated::Invalid),
                Evaluated::Scalar(Scalar::Bool(true)) => then_branch.eval_inner(env),
                Evaluated::Scalar(Scalar::Bool(false)) => else_branch.eval_inner(env),
                Evaluated::Scalar(other) => Err(bool_operand_fault("?:", &other)),
            },
            Expr::Call(Func::IsValid, args) => match args[0].eval_inner(env)? {
                Evaluated::Invalid => Ok(Evaluated::Scalar(Scalar::Bool(false))),
                Evaluated::Scalar(_) => Ok(Evaluated::Scalar(Scalar::Bool(true))),
            },
            Expr::Call(func, args) => {
                let mut scalars = Vec::with_capacity(args.len());
                for arg in args {
                    match arg.eval_inner(env)? {
                        Evaluated::Invalid => return Ok(Evaluated::Invalid),
                        Evaluated::Scalar(s) => scalars.push(s),
                    }
                }
                eval_call(*func, scalars).map(Evaluated::Scalar)
            }
        }
    }
}

fn bool_operand_fault(op: &str, found: &Scalar) -> EvalFault {
    EvalFault::Type(format!(
        "'{}' requires boolean operands, found {}",
        op,
        found.type_name()
    ))
}

fn expect_bool(value: Evaluated, op: &str) -> Result<Evaluated, EvalFault> {
    match value {
        Evaluated::Invalid => Ok(Evaluated::Invalid),
        Evaluated::Scalar(Scalar::Bool(b)) => Ok(Evaluated::Scalar(Scalar::Bool(b))),
        Evaluated::Scalar(other) => Err(bool_operand_fault(op, &other)),
    }
}

fn eval_unary(op: UnaryOp, operand: Scalar) -> Result<Scalar, EvalFault> {
    match (op, operand) {
        (UnaryOp::Neg, Scalar::Int(v)) => v
            .checked_neg()
            .map(Scalar::Int)
            .ok_or(EvalFault::Overflow),
        (UnaryOp::Neg, Scalar::Float(v)) => Ok(Scalar::Float(-v)),
        (UnaryOp::Neg, other) => Err(EvalFault::Type(format!(
            "unary '-' requires a numeric operand, found {}",
            other.type_name()
        ))),
        (UnaryOp::Not, Scalar::Bool(v)) => Ok(Scalar::Bool(!v)),
        (UnaryOp::Not, other) => Err(EvalFault::Type(format!(
            "'!' requires a boolean operand, found {}",
            other.type_name()
        ))),
    }
}

fn eval_binary(op: BinOp, lhs: Scalar, rhs: Scalar) -> Result<Scalar, EvalFault> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            eval_arith(op, lhs, rhs)
        }
        BinOp::Eq => eval_equality(lhs, rhs).map(Scalar::Bool),
        BinOp::Ne => eval_equality(lhs, rhs).map(|eq| Scalar::Bool(!eq)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => eval_ordering(op, lhs, rhs),
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
            eval_bitwise(op, lhs, rhs)
        }
        // && and || are short-circuited in eval_inner
        BinOp::And | BinOp::Or => Err(EvalFault::Unsupported(
            "logical operator outside short-circuit path".into(),
        )),
    }
}

fn eval_arith(op: BinOp, lhs: Scalar, rhs: Scalar) -> Result<Scalar, EvalFault> {
    let sym = match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        _ => "%",
    };
    match promote(&lhs, &rhs, sym)? {
        NumPair::Int(a, b) => {
            let result = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => {
                    if b == 0 {
                        return Err(EvalFault::DivisionByZero);
                    }
                    a.checked_div(b)
                }
                _ => {
                    if b == 0 {
                        return Err(EvalFault::DivisionByZero);
                    }
                    a.checked_rem(b)
                }
            };
            result.map(Scalar::Int).ok_or(EvalFault::Overflow)
        }
        NumPair::Float(a, b) => Ok(Scalar::Float(match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            _ => a % b,
        })),
    }
}

fn eval_equality(lhs: Scalar, rhs: Scalar) -> Result<bool, EvalFault> {
    match (&lhs, &rhs) {
        (Scalar::Bool(a), Scalar::Bool(b)) => Ok(a == b),
        (Scalar::Str(a), Scalar::Str(b)) => Ok(a == b),
        _ => match promote(&lhs, &rhs, "==")? {
            NumPair::Int(a, b) => Ok(a == b),
            NumPair::Float(a, b) => Ok(a == b),
        },
    }
}

fn eval_ordering(op: BinOp, lhs: Scalar, rhs: Scalar) -> Result<Scalar, EvalFault> {
    let sym = match op {
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        _ => ">=",
    };
    let result = match promote(&lhs, &rhs, sym)? {
        NumPair::Int(a, b) => match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            _ => a >= b,
        },
        NumPair::Float(a, b) => match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            _ => a >= b,
        },
    };
    Ok(Scalar::Bool(result))
}

fn eval_bitwise(op: BinOp, lhs: Scalar, rhs: Scalar) -> Result<Scalar, EvalFault> {
    let (a, b) = match (&lhs, &rhs) {
        (Scalar::Int(a), Scalar::Int(b)) => (*a, *b),
        _ => {
            return Err(EvalFault::Type(format!(
                "bitwise operators require integer operands, found {} and {}",
                lhs.type_name(),
                rhs.type_name()
            )))
        }
    };
    match op {
        BinOp::BitAnd => Ok(Scalar::Int(a & b)),
        BinOp::BitOr => Ok(Scalar::Int(a | b)),
        BinOp::BitXor => Ok(Scalar::Int(a ^ b)),
        BinOp::Shl | BinOp::Shr => {
            if !(0..64).contains(&b) {
                return Err(EvalFault::Overflow);
            }
            Ok(Scalar::Int(if op == BinOp::Shl {
                a << b
            } else {
                a >> b
            }))
        }
        _ => unreachable!("eval_bitwise called with non-bitwise operator"),
    }
}

fn eval_call(func: Func, mut args: Vec<Scalar>) -> Result<Scalar, EvalFault> {
    let numeric_fault = |found: &Scalar| {
        EvalFault::Type(format!(
            "{} requires a numeric argument, found {}",
            func.name(),
            found.type_name()
        ))
    };

    match func {
        Func::Abs => match args.remove(0) {
            Scalar::Int(v) => v.checked_abs().map(Scalar::Int).ok_or(EvalFault::Overflow),
            Scalar::Float(v) => Ok(Scalar::Float(v.abs())),
            other => Err(numeric_fault(&other)),
        },
        Func::Min | Func::Max => {
            let b = args.remove(1);
            let a = args.remove(0);
            match promote(&a, &b, "min/max")? {
                NumPair::Int(a, b) => Ok(Scalar::Int(if func == Func::Min {
                    a.min(b)
                } else {
                    a.max(b)
                })),
                NumPair::Float(a, b) => Ok(Scalar::Float(if func == Func::Min {
                    a.min(b)
                } else {
                    a.max(b)
                })),
            }
        }
        Func::Clamp => {
            let hi = args.remove(2);
            let lo = args.remove(1);
            let x = args.remove(0);
            // Promote pairwise so int bounds still clamp a float input.
            match (promote(&x, &lo, "clamp")?, promote(&x, &hi, "clamp")?) {
                (NumPair::Int(x, lo), NumPair::Int(_, hi)) => {
                    if lo > hi {
                        return Err(EvalFault::Type("clamp: lo > hi".into()));
                    }
                    Ok(Scalar::Int(x.clamp(lo, hi)))
                }
                (pair_lo, pair_hi) => {
                    let (x, lo) = match pair_lo {
                        NumPair::Int(x, lo) => (x as f64, lo as f64),
                        NumPair::Float(x, lo) => (x, lo),
                    };
                    let hi = match pair_hi {
                        NumPair::Int(_, hi) => hi as f64,
                        NumPair::Float(_, hi) => hi,
                    };
                    if !(lo <= hi) {
                        return Err(EvalFault::Type("clamp: lo > hi".into()));
                    }
                    Ok(Scalar::Float(x.clamp(lo, hi)))
                }
            }
        }
        Func::Round | Func::Floor | Func::Ceil => match args.remove(0) {
            Scalar::Int(v) => Ok(Scalar::Int(v)),
            Scalar::Float(v) => Ok(Scalar::Float(match func {
                Func::Round => v.round(),
                Func::Floor => v.floor(),
                _ => v.ceil(),
            })),
            other => Err(numeric_fault(&other)),
        },
        Func::Sqrt => match args.remove(0) {
            Scalar::Int(v) => Ok(Scalar::Float((v as f64).sqrt())),
            Scalar::Float(v) => Ok(Scalar::Float(v.sqrt())),
            other => Err(numeric_fault(&other)),
        },
        Func::IsNan => match args.remove(0) {
            Scalar::Int(_) => Ok(Scalar::Bool(false)),
            Scalar::Float(v) => Ok(Scalar::Bool(v.is_nan())),
            other => Err(numeric_fault(&other)),
        },
        // Handled in eval_inner: isvalid must see invalidity, not propagate it.
        Func::IsValid => Err(EvalFault::Unsupported(
            "isvalid outside validity-aware path".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, env: &Environment) -> Result<QualifiedValue, EvalFault> {
        Expr::parse(src).expect(src).eval(env)
    }

    fn valid(src: &str, env: &Environment) -> Value {
        let qv = eval(src, env).unwrap();
        assert!(qv.valid, "expected valid result for '{}'", src);
        qv.value
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let env = Environment::new();
        assert_eq!(valid("1 + 2 * 3", &env), Value::Int64(7));
        assert_eq!(valid("(1 + 2) * 3", &env), Value::Int64(9));
        assert_eq!(valid("7 % 4", &env), Value::Int64(3));
        assert_eq!(valid("10.0 / 4", &env), Value::Double(2.5));
    }

    #[test]
    fn test_environment_lookup() {
        let speed = QualifiedValue::new(Value::Double(10.0));
        let mut env = Environment::new();
        env.push("SpeedMs", &speed);
        assert_eq!(valid("SpeedMs * 3.6", &env), Value::Double(36.0));
    }

    #[test]
    fn test_unknown_name_faults() {
        let env = Environment::new();
        assert!(matches!(
            eval("Missing + 1", &env),
            Err(EvalFault::UnknownName(name)) if name == "Missing"
        ));
    }

    #[test]
    fn test_integer_division_by_zero_faults() {
        let env = Environment::new();
        assert!(matches!(eval("1 / 0", &env), Err(EvalFault::DivisionByZero)));
        assert!(matches!(eval("1 % 0", &env), Err(EvalFault::DivisionByZero)));
    }

    #[test]
    fn test_float_division_by_zero_is_not_a_fault() {
        let env = Environment::new();
        assert_eq!(valid("1.0 / 0.0", &env), Value::Double(f64::INFINITY));
        assert_eq!(valid("isnan(0.0 / 0.0)", &env), Value::Bool(true));
    }

    #[test]
    fn test_overflow_faults() {
        let env = Environment::new();
        assert!(matches!(
            eval("9223372036854775807 + 1", &env),
            Err(EvalFault::Overflow)
        ));
        assert!(matches!(eval("1 << 64", &env), Err(EvalFault::Overflow)));
    }

    #[test]
    fn test_short_circuit_skips_rhs() {
        let env = Environment::new();
        // rhs would fault with division by zero if evaluated
        assert_eq!(valid("false && (1 / 0 == 0)", &env), Value::Bool(false));
        assert_eq!(valid("true || (1 / 0 == 0)", &env), Value::Bool(true));
        assert_eq!(valid("true ? 1 : 1 / 0", &env), Value::Int64(1));
    }

    #[test]
    fn test_invalid_operand_propagates() {
        let invalid = QualifiedValue::invalid();
        let mut env = Environment::new();
        env.push("A", &invalid);
        assert!(!eval("A + 1", &env).unwrap().valid);
        assert!(!eval("true && A", &env).unwrap().valid);
        assert!(!eval("A ? 1 : 2", &env).unwrap().valid);
    }

    #[test]
    fn test_invalid_lhs_of_and_is_invalid() {
        let invalid = QualifiedValue::invalid();
        let mut env = Environment::new();
        env.push("A", &invalid);
        assert!(!eval("A && false", &env).unwrap().valid);
    }

    #[test]
    fn test_isvalid_observes_validity_without_fault() {
        let invalid = QualifiedValue::invalid();
        let present = QualifiedValue::new(Value::Int32(5));
        let mut env = Environment::new();
        env.push("A", &invalid);
        env.push("B", &present);
        assert_eq!(valid("isvalid(A)", &env), Value::Bool(false));
        assert_eq!(valid("isvalid(B)", &env), Value::Bool(true));
        assert_eq!(valid("isvalid(A) ? B : 0 - B", &env), Value::Int64(-5));
    }

    #[test]
    fn test_comparisons() {
        let env = Environment::new();
        assert_eq!(valid("3 < 3.5", &env), Value::Bool(true));
        assert_eq!(valid("2 == 2.0", &env), Value::Bool(true));
        assert_eq!(valid("\"D\" == \"D\"", &env), Value::Bool(true));
        assert_eq!(valid("\"D\" != \"P\"", &env), Value::Bool(true));
        assert!(matches!(
            eval("\"a\" < \"b\"", &env),
            Err(EvalFault::Type(_))
        ));
    }

    #[test]
    fn test_string_arithmetic_faults() {
        let env = Environment::new();
        assert!(matches!(eval("\"a\" + 1", &env), Err(EvalFault::Type(_))));
    }

    #[test]
    fn test_bitwise_ops() {
        let env = Environment::new();
        assert_eq!(valid("12 & 10", &env), Value::Int64(8));
        assert_eq!(valid("12 | 3", &env), Value::Int64(15));
        assert_eq!(valid("5 ^ 1", &env), Value::Int64(4));
        assert_eq!(valid("1 << 4", &env), Value::Int64(16));
        assert_eq!(valid("-16 >> 2", &env), Value::Int64(-4));
    }

    #[test]
    fn test_functions() {
        let env = Environment::new();
        assert_eq!(valid("abs(0 - 4)", &env), Value::Int64(4));
        assert_eq!(valid("min(3, 1.5)", &env), Value::Double(1.5));
        assert_eq!(valid("max(3, 1)", &env), Value::Int64(3));
        assert_eq!(valid("clamp(150, 0, 100)", &env), Value::Int64(100));
        assert_eq!(valid("clamp(0.5, 0, 1)", &env), Value::Double(0.5));
        assert_eq!(valid("round(2.5)", &env), Value::Double(3.0));
        assert_eq!(valid("floor(2.9)", &env), Value::Double(2.0));
        assert_eq!(valid("ceil(2.1)", &env), Value::Double(3.0));
        assert_eq!(valid("sqrt(9)", &env), Value::Double(3.0));
        assert_eq!(valid("isnan(sqrt(0.0 - 1.0))", &env), Value::Bool(true));
    }

    #[test]
    fn test_uint64_beyond_i64_overflows() {
        let big = QualifiedValue::new(Value::Uint64(u64::MAX));
        let mut env = Environment::new();
        env.push("Big", &big);
        assert!(matches!(eval("Big + 0", &env), Err(EvalFault::Overflow)));
    }
}

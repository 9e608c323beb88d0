//! Transform expression engine
//!
//! Mapping entries with a `code` transform carry a small C-style expression
//! over the names of their dependencies, e.g. `"SpeedMs * 3.6"` or
//! `"isvalid(Brake) ? Brake : false"`. Expressions are tokenized and parsed
//! once at initialization into an [`Expr`] owned by the node; evaluation
//! borrows a per-tick [`Environment`] of dependency values and never blocks.
//!
//! The language: integer/decimal/string/bool literals, identifiers (dots
//! allowed, since node names are broker paths), C precedence for
//! `+ - * / %`, comparisons, `&& ||`, bitwise `& | ^ << >>`, unary `- !`,
//! the ternary, and a fixed function set (`abs`, `min`, `max`, `clamp`,
//! `round`, `floor`, `ceil`, `sqrt`, `isnan`, `isvalid`).

pub mod eval;
pub mod parser;
pub mod token;

pub use eval::{Environment, EvalFault};
pub use parser::{BinOp, Expr, Func, ParseError, UnaryOp};

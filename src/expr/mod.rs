//! The embeddable scalar expression evaluator (SUPPLEMENT — see
//! `SPEC_FULL.md` §1). Used to compile `WHERE`, `HAVING`, non-aggregating
//! `SELECT` projections and post-aggregation expression templates (§4.6,
//! §4.7) into a tree evaluated against a single `Value` row.
//!
//! Grounded on the teacher's operator evaluation style in
//! `examples/surrealdb-surrealdb/core/src/fnc/operate.rs` (one function per
//! operator, explicit `Try*` coercion) and `sql/operator.rs` for the
//! operator set, adapted from SurrealDB's document-graph operators down to
//! the arithmetic/comparison/LIKE/NULL subset this spec names.
mod like;

use crate::error::{Error, Result};
use crate::idiom::{self, Idiom};
use crate::value::{to_bool, to_float, Value};
use std::fmt;

pub use like::like_match;

#[derive(Clone, Debug, PartialEq)]
pub enum BinaryOp {
	Add,
	Sub,
	Mul,
	Div,
	Rem,
	Eq,
	Neq,
	Lt,
	Lte,
	Gt,
	Gte,
	And,
	Or,
	Like,
	NotLike,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
	Literal(Value),
	Field(Idiom),
	Not(Box<Expr>),
	Neg(Box<Expr>),
	Binary(BinaryOp, Box<Expr>, Box<Expr>),
	/// `expr IS [NOT] NULL`.
	IsNull(Box<Expr>, bool),
	/// An aggregate/window function call, e.g. `SUM(temperature)`. Only
	/// meaningful inside a `post_projection` before the post-aggregation
	/// rewrite (§4.6) replaces it with a [`Expr::Field`] placeholder lookup;
	/// never evaluated directly by [`eval`].
	Call(String, Vec<Expr>),
}

impl fmt::Display for Expr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Expr::Literal(v) => write!(f, "{v}"),
			Expr::Field(i) => write!(f, "{i}"),
			Expr::Not(e) => write!(f, "NOT {e}"),
			Expr::Neg(e) => write!(f, "-{e}"),
			Expr::Binary(op, a, b) => write!(f, "({a} {op:?} {b})"),
			Expr::IsNull(e, neg) => {
				write!(f, "{e} IS {}NULL", if *neg { "NOT " } else { "" })
			}
			Expr::Call(name, args) => {
				write!(f, "{name}(")?;
				for (i, a) in args.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{a}")?;
				}
				write!(f, ")")
			}
		}
	}
}

impl Expr {
	pub fn field(path: &str) -> Self {
		Expr::Field(Idiom::parse(path))
	}

	/// True if this expression is exactly one aggregate call and nothing
	/// else, the "keep it intact" case of §4.6 step 2.
	pub fn is_bare_call(&self) -> bool {
		matches!(self, Expr::Call(..))
	}

	/// Walks the expression collecting every [`Expr::Call`] it contains,
	/// depth-first, including nested calls.
	pub fn collect_calls<'a>(&'a self, out: &mut Vec<&'a Expr>) {
		match self {
			Expr::Call(_, args) => {
				out.push(self);
				for a in args {
					a.collect_calls(out);
				}
			}
			Expr::Not(e) | Expr::Neg(e) | Expr::IsNull(e, _) => e.collect_calls(out),
			Expr::Binary(_, a, b) => {
				a.collect_calls(out);
				b.collect_calls(out);
			}
			Expr::Literal(_) | Expr::Field(_) => {}
		}
	}
}

/// Evaluates `expr` against `row`. Undefined fields resolve to
/// [`Value::Null`] rather than raising (§4.7); coercion failures inside
/// comparisons/arithmetic propagate as [`Error::ExpressionEval`].
pub fn eval(expr: &Expr, row: &Value) -> Result<Value> {
	match expr {
		Expr::Literal(v) => Ok(v.clone()),
		Expr::Field(path) => Ok(idiom::resolve(row, path).cloned().unwrap_or(Value::Null)),
		Expr::Not(e) => {
			let v = eval(e, row)?;
			Ok(Value::Bool(!v.is_truthy()))
		}
		Expr::Neg(e) => {
			let v = eval(e, row)?;
			let f = to_float(&v).map_err(|err| Error::ExpressionEval(err.to_string()))?;
			Ok(Value::Float(-f))
		}
		Expr::IsNull(e, negate) => {
			let v = eval(e, row)?;
			Ok(Value::Bool(v.is_null() != *negate))
		}
		Expr::Binary(op, a, b) => eval_binary(op, a, b, row),
		Expr::Call(name, _) => {
			Err(Error::ExpressionEval(format!("aggregate call `{name}` outside an aggregate context")))
		}
	}
}

/// Evaluates a predicate (WHERE/HAVING). Per §4.7, a coercion failure while
/// evaluating the predicate yields `false` (reject the record) rather than
/// propagating the error.
pub fn eval_predicate(expr: &Expr, row: &Value) -> bool {
	match eval(expr, row) {
		Ok(v) => v.is_truthy(),
		Err(_) => false,
	}
}

fn eval_binary(op: &BinaryOp, a: &Expr, b: &Expr, row: &Value) -> Result<Value> {
	// Short-circuit boolean operators evaluate lazily like any host language.
	match op {
		BinaryOp::And => {
			let va = eval(a, row)?;
			if !va.is_truthy() {
				return Ok(Value::Bool(false));
			}
			return Ok(Value::Bool(eval(b, row)?.is_truthy()));
		}
		BinaryOp::Or => {
			let va = eval(a, row)?;
			if va.is_truthy() {
				return Ok(Value::Bool(true));
			}
			return Ok(Value::Bool(eval(b, row)?.is_truthy()));
		}
		_ => {}
	}

	let va = eval(a, row)?;
	let vb = eval(b, row)?;

	let numeric = |va: &Value, vb: &Value, f: fn(f64, f64) -> f64| -> Result<Value> {
		let x = to_float(va).map_err(|e| Error::ExpressionEval(e.to_string()))?;
		let y = to_float(vb).map_err(|e| Error::ExpressionEval(e.to_string()))?;
		Ok(Value::Float(f(x, y)))
	};

	match op {
		BinaryOp::Add => numeric(&va, &vb, |x, y| x + y),
		BinaryOp::Sub => numeric(&va, &vb, |x, y| x - y),
		BinaryOp::Mul => numeric(&va, &vb, |x, y| x * y),
		BinaryOp::Div => numeric(&va, &vb, |x, y| x / y),
		BinaryOp::Rem => numeric(&va, &vb, |x, y| x % y),
		BinaryOp::Eq => Ok(Value::Bool(values_equal(&va, &vb))),
		BinaryOp::Neq => Ok(Value::Bool(!values_equal(&va, &vb))),
		BinaryOp::Lt => compare(&va, &vb).map(|o| Value::Bool(o == std::cmp::Ordering::Less)),
		BinaryOp::Lte => compare(&va, &vb).map(|o| Value::Bool(o != std::cmp::Ordering::Greater)),
		BinaryOp::Gt => compare(&va, &vb).map(|o| Value::Bool(o == std::cmp::Ordering::Greater)),
		BinaryOp::Gte => compare(&va, &vb).map(|o| Value::Bool(o != std::cmp::Ordering::Less)),
		BinaryOp::Like => like_predicate(&va, &vb, false),
		BinaryOp::NotLike => like_predicate(&va, &vb, true),
		BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
	}
}

/// `= null`/`!= null`/`= nil`/`!= nil` are accepted synonyms for `IS [NOT]
/// NULL` (§4.7); `Value::Null` on either side is handled as a null check
/// rather than attempting a coercion.
fn values_equal(a: &Value, b: &Value) -> bool {
	if a.is_null() || b.is_null() {
		return a.is_null() && b.is_null();
	}
	match (to_float(a), to_float(b)) {
		(Ok(x), Ok(y)) => x == y,
		_ => to_string_loose(a) == to_string_loose(b),
	}
}

fn to_string_loose(v: &Value) -> String {
	crate::value::to_string(v)
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering> {
	match (to_float(a), to_float(b)) {
		(Ok(x), Ok(y)) => Ok(x.total_cmp(&y)),
		_ => Ok(to_string_loose(a).cmp(&to_string_loose(b))),
	}
}

fn like_predicate(subject: &Value, pattern: &Value, negate: bool) -> Result<Value> {
	if subject.is_null() {
		return Ok(Value::Bool(false));
	}
	let s = crate::value::to_string(subject);
	let p = crate::value::to_string(pattern);
	let m = like_match(&s, &p);
	Ok(Value::Bool(m != negate))
}

/// Coerces a [`Value`] to `bool` for contexts (e.g. `COUNT(expr)`-style
/// predicates inside aggregate arguments) where a non-boolean falls back to
/// truthiness rather than failing. Thin wrapper kept here so callers needn't
/// reach back into `value::coerce`.
pub fn truthy(v: &Value) -> bool {
	to_bool(v).unwrap_or_else(|_| v.is_truthy())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	fn row(pairs: &[(&str, Value)]) -> Value {
		let mut m = BTreeMap::new();
		for (k, v) in pairs {
			m.insert((*k).to_owned(), v.clone());
		}
		Value::Object(m)
	}

	#[test]
	fn arithmetic_and_projection() {
		let r = row(&[("temperature", Value::Float(25.5))]);
		let e = Expr::Binary(
			BinaryOp::Add,
			Box::new(Expr::Binary(
				BinaryOp::Mul,
				Box::new(Expr::field("temperature")),
				Box::new(Expr::Literal(Value::Float(1.8))),
			)),
			Box::new(Expr::Literal(Value::Float(32.0))),
		);
		match eval(&e, &r).unwrap() {
			Value::Float(f) => assert!((f - 77.9).abs() < 1e-9),
			other => panic!("expected a float, got {other:?}"),
		}
	}

	#[test]
	fn where_predicate_gt() {
		let r = row(&[("temperature", Value::Float(25.5))]);
		let e = Expr::Binary(
			BinaryOp::Gt,
			Box::new(Expr::field("temperature")),
			Box::new(Expr::Literal(Value::Float(24.0))),
		);
		assert!(eval_predicate(&e, &r));
	}

	#[test]
	fn undefined_field_is_null_not_error() {
		let r = row(&[]);
		let e = Expr::IsNull(Box::new(Expr::field("missing")), false);
		assert!(eval_predicate(&e, &r));
	}

	#[test]
	fn like_operator() {
		let r = row(&[("deviceId", Value::String("sensor001".into()))]);
		let e = Expr::Binary(
			BinaryOp::Like,
			Box::new(Expr::field("deviceId")),
			Box::new(Expr::Literal(Value::String("sensor%".into()))),
		);
		assert!(eval_predicate(&e, &r));
	}

	#[test]
	fn null_synonym_equality() {
		let r = row(&[]);
		let e = Expr::Binary(
			BinaryOp::Eq,
			Box::new(Expr::field("missing")),
			Box::new(Expr::Literal(Value::Null)),
		);
		assert!(eval_predicate(&e, &r));
	}
}

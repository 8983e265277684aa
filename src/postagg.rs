//! The post-aggregation processor (§4.6): rewrites a `post_projection`
//! expression that mixes aggregate calls with other operators into a
//! pre-aggregation placeholder plan plus a post-aggregation expression
//! template, once at compile time, and evaluates that template per emitted
//! group row.
//!
//! Not grounded in a single teacher file — the teacher's `GroupsCollector`
//! (`dbs/group.rs`) only ever evaluates a *single* aggregate per output
//! field, never `SUM(x)/COUNT(x)`-shaped compositions, so this rewrite has
//! no direct teacher analogue. It follows the teacher's general style of
//! "compile once into a flat plan, then evaluate the plan many times"
//! (`dbs/plan.rs`, `idx/planner/plan.rs`).
use crate::expr::{self, Expr};
use crate::idiom::Idiom;
use crate::plan::{AggregationCall, AggregationInput, Plan, Projection};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};

/// One compiled post-aggregation output: the user-facing alias, the
/// rewritten expression template (aggregate calls replaced by placeholder
/// field lookups), and the placeholders it depends on.
#[derive(Clone, Debug)]
pub struct PostAggExpr {
	pub alias: String,
	pub template: Expr,
	pub placeholders: Vec<String>,
}

/// A scalar expression to install on every window instance's
/// [`crate::agg::GroupAggregator`] via `register_expression` (§4.4), used
/// only when a post-aggregation placeholder's own input itself contains
/// nested aggregate calls (§4.6 step 3, the recursive case).
#[derive(Clone, Debug)]
pub struct RegisteredExpr {
	pub alias: String,
	pub expr: Expr,
}

/// The compiled output of the post-aggregation rewrite: the full
/// aggregation list to hand to each window instance's `GroupAggregator`
/// (user aggregations plus synthetic placeholder aggregations), the
/// registered expressions for nested-aggregate inputs, and the per-output
/// expression templates evaluated after `results()` snapshots a group.
#[derive(Clone, Debug, Default)]
pub struct PostAggPlan {
	pub aggregations: Vec<AggregationCall>,
	pub registered_exprs: Vec<RegisteredExpr>,
	pub projections: Vec<PostAggExpr>,
}

/// FNV-1a, 32-bit: a small, dependency-free deterministic hash used only to
/// derive stable placeholder names from a call's textual form (§4.6 step 3
/// — "a deterministic 32-bit hash of the full textual call").
fn fnv1a_32(s: &str) -> u32 {
	let mut hash: u32 = 0x811c9dc5;
	for b in s.bytes() {
		hash ^= b as u32;
		hash = hash.wrapping_mul(0x01000193);
	}
	hash
}

fn placeholder_name(call_text: &str, lowered_fn_name: &str) -> String {
	format!("__{lowered_fn_name}_{:08x}__", fnv1a_32(call_text))
}

/// Compiles every `post_projection` in `plan` into a [`PostAggPlan`].
/// `base_aggregations` is the plan's own `aggregations` list (bare
/// top-level aggregate calls, already given user aliases); the rewrite
/// appends synthetic placeholder aggregations to a copy of it.
pub fn compile(plan: &Plan) -> PostAggPlan {
	let mut aggregations = plan.aggregations.clone();
	let mut registered_exprs = Vec::new();
	let mut projections = Vec::new();
	// De-duplicates identical textual calls across different
	// post_projections (and within the same one) onto one placeholder and
	// one synthetic aggregation, per §4.6 step 3.
	let mut seen: HashMap<String, String> = HashMap::new();

	for Projection { expr, alias } in &plan.post_projections {
		let mut placeholders = Vec::new();
		let template =
			rewrite(expr, &mut aggregations, &mut registered_exprs, &mut seen, &mut placeholders);
		projections.push(PostAggExpr { alias: alias.clone(), template, placeholders });
	}

	PostAggPlan { aggregations, registered_exprs, projections }
}

fn rewrite(
	expr: &Expr,
	aggregations: &mut Vec<AggregationCall>,
	registered_exprs: &mut Vec<RegisteredExpr>,
	seen: &mut HashMap<String, String>,
	placeholders: &mut Vec<String>,
) -> Expr {
	match expr {
		Expr::Call(name, args) if crate::parser::is_aggregate_kind(name) => {
			let text = expr.to_string();
			let lowered = name.to_ascii_lowercase();
			let placeholder = match seen.get(&text) {
				Some(ph) => ph.clone(),
				None => {
					let ph = placeholder_name(&text, &lowered);
					seen.insert(text.clone(), ph.clone());
					let (input, extra_args) = split_call_args(args);
					// Step 3 recursive case: the aggregate's own input
					// contains nested aggregate calls. There is no
					// well-defined per-record value for an
					// aggregate-of-an-aggregate in a streaming engine, so
					// the inner expression is itself rewritten and
					// installed as a registered expression instead of a
					// plain field route; see `DESIGN.md`, "nested
					// aggregate calls".
					let input = match &input {
						AggregationInput::Expression(inner) if contains_aggregate(inner) => {
							let mut nested_placeholders = Vec::new();
							let rewritten = rewrite(
								inner,
								aggregations,
								registered_exprs,
								seen,
								&mut nested_placeholders,
							);
							registered_exprs
								.push(RegisteredExpr { alias: ph.clone(), expr: rewritten });
							AggregationInput::Star
						}
						other => other.clone(),
					};
					aggregations.push(AggregationCall {
						input,
						kind: lowered,
						args: extra_args,
						alias: ph.clone(),
					});
					ph
				}
			};
			placeholders.push(placeholder.clone());
			Expr::Field(Idiom::parse(&placeholder))
		}
		Expr::Call(name, args) => {
			let rewritten: Vec<Expr> = args
				.iter()
				.map(|a| rewrite(a, aggregations, registered_exprs, seen, placeholders))
				.collect();
			Expr::Call(name.clone(), rewritten)
		}
		Expr::Not(inner) => {
			Expr::Not(Box::new(rewrite(inner, aggregations, registered_exprs, seen, placeholders)))
		}
		Expr::Neg(inner) => {
			Expr::Neg(Box::new(rewrite(inner, aggregations, registered_exprs, seen, placeholders)))
		}
		Expr::IsNull(inner, negate) => Expr::IsNull(
			Box::new(rewrite(inner, aggregations, registered_exprs, seen, placeholders)),
			*negate,
		),
		Expr::Binary(op, a, b) => Expr::Binary(
			op.clone(),
			Box::new(rewrite(a, aggregations, registered_exprs, seen, placeholders)),
			Box::new(rewrite(b, aggregations, registered_exprs, seen, placeholders)),
		),
		Expr::Literal(_) | Expr::Field(_) => expr.clone(),
	}
}

fn contains_aggregate(e: &Expr) -> bool {
	match e {
		Expr::Call(name, args) => {
			crate::parser::is_aggregate_kind(name) || args.iter().any(contains_aggregate)
		}
		Expr::Not(inner) | Expr::Neg(inner) | Expr::IsNull(inner, _) => contains_aggregate(inner),
		Expr::Binary(_, a, b) => contains_aggregate(a) || contains_aggregate(b),
		Expr::Literal(_) | Expr::Field(_) => false,
	}
}

fn split_call_args(args: &[Expr]) -> (AggregationInput, Vec<Value>) {
	let input = match args.first() {
		None => AggregationInput::Star,
		Some(Expr::Field(path)) if path.is_wildcard() => AggregationInput::Star,
		Some(Expr::Field(path)) => AggregationInput::Field(path.clone()),
		Some(other) => AggregationInput::Expression(other.clone()),
	};
	let extra_args = args
		.iter()
		.skip(1)
		.filter_map(|e| match e {
			Expr::Literal(v) => Some(v.clone()),
			_ => None,
		})
		.collect();
	(input, extra_args)
}

/// Evaluates every compiled projection against a snapshotted group `row`
/// (§4.6 evaluation). Missing placeholders set that output to null rather
/// than failing the row; an evaluator error does the same (§4.6 failure
/// policy). After all projections are evaluated, every placeholder-named
/// field is stripped from the row.
pub fn evaluate(plan: &PostAggPlan, row: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
	let mut out = row.clone();
	let as_value = Value::Object(row.clone());

	for proj in &plan.projections {
		let missing = proj.placeholders.iter().any(|p| !row.contains_key(p));
		let computed = if missing {
			Value::Null
		} else {
			match expr::eval(&proj.template, &as_value) {
				Ok(v) => collapse_singleton(v),
				Err(_) => Value::Null,
			}
		};
		out.insert(proj.alias.clone(), computed);
	}

	for proj in &plan.projections {
		for p in &proj.placeholders {
			out.remove(p);
		}
	}
	out
}

/// Collapses a nested single-element sequence returned by the evaluator to
/// its element (§4.6 evaluation, final step).
fn collapse_singleton(v: Value) -> Value {
	match v {
		Value::Array(mut a) if a.len() == 1 => a.pop().expect("len checked"),
		other => other,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::parser::parse;

	#[test]
	fn rewrites_division_of_two_aggregates() {
		let plan = parse(
			"SELECT category, SUM(value)/COUNT(value) AS avg_calc FROM stream GROUP BY category",
		)
		.unwrap();
		let compiled = compile(&plan);
		assert_eq!(compiled.projections.len(), 1);
		assert_eq!(compiled.projections[0].placeholders.len(), 2);
		// Two synthetic aggregations (sum, count) were appended.
		assert_eq!(compiled.aggregations.len(), 2);
	}

	#[test]
	fn evaluation_strips_placeholders_and_computes() {
		let plan = parse(
			"SELECT category, SUM(value)/COUNT(value) AS avg_calc FROM stream GROUP BY category",
		)
		.unwrap();
		let compiled = compile(&plan);
		let sum_alias = &compiled.aggregations.iter().find(|a| a.kind == "sum").unwrap().alias;
		let count_alias = &compiled.aggregations.iter().find(|a| a.kind == "count").unwrap().alias;
		let mut row = BTreeMap::new();
		row.insert("category".to_owned(), Value::String("A".into()));
		row.insert(sum_alias.clone(), Value::Float(30.0));
		row.insert(count_alias.clone(), Value::UInt(2));
		let out = evaluate(&compiled, &row);
		assert_eq!(out.get("avg_calc"), Some(&Value::Float(15.0)));
		assert!(!out.contains_key(sum_alias.as_str()));
		assert!(!out.contains_key(count_alias.as_str()));
	}

	#[test]
	fn missing_placeholder_yields_null() {
		let plan = parse(
			"SELECT category, SUM(value)/COUNT(value) AS avg_calc FROM stream GROUP BY category",
		)
		.unwrap();
		let compiled = compile(&plan);
		let mut row = BTreeMap::new();
		row.insert("category".to_owned(), Value::String("A".into()));
		let out = evaluate(&compiled, &row);
		assert_eq!(out.get("avg_calc"), Some(&Value::Null));
	}

	#[test]
	fn identical_calls_share_one_placeholder() {
		let plan = parse(
			"SELECT category, SUM(value) + SUM(value) AS doubled FROM stream GROUP BY category",
		)
		.unwrap();
		let compiled = compile(&plan);
		assert_eq!(compiled.aggregations.len(), 1);
		assert_eq!(compiled.projections[0].placeholders.len(), 2);
		assert_eq!(compiled.projections[0].placeholders[0], compiled.projections[0].placeholders[1]);
	}
}

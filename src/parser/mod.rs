//! A small recursive-descent parser (SUPPLEMENT — see `SPEC_FULL.md` §1)
//! turning the SQL subset in §6 into the [`Plan`] the rest of the engine
//! consumes. Deliberately minimal: one statement shape, one `FROM`, the
//! clauses named in the spec and nothing more.
mod lexer;

use crate::expr::{BinaryOp, Expr};
use crate::idiom::Idiom;
use crate::plan::{
	AggregationCall, AggregationInput, Plan, Projection, TimeUnit, WindowSpec, WithOptions,
};
use crate::error::{Error, Result};
use lexer::{lex, Token};
use std::time::Duration;

/// The lowercase names of aggregate/window/analytic functions the
/// post-aggregation rewrite (§4.6) must recognise. Anything else parses as
/// an ordinary scalar function call and is left for the expression
/// evaluator — but since the supplement evaluator only understands the
/// operators named in §4.7, only this list (plus arithmetic/comparison) is
/// actually reachable.
pub const AGGREGATE_KINDS: &[&str] = &[
	"sum",
	"count",
	"avg",
	"min",
	"max",
	"stddev",
	"variance",
	"median",
	"percentile",
	"first_value",
	"last_value",
	"nth_value",
	"collect",
	"deduplicate",
	"merge_agg",
	"window_start",
	"window_end",
	"lag",
	"latest",
	"changed_col",
	"had_changed",
];

pub fn is_aggregate_kind(name: &str) -> bool {
	AGGREGATE_KINDS.contains(&name.to_ascii_lowercase().as_str())
}

struct Parser {
	toks: Vec<Token>,
	pos: usize,
}

impl Parser {
	fn peek(&self) -> &Token {
		self.toks.get(self.pos).unwrap_or(&Token::Eof)
	}

	fn advance(&mut self) -> Token {
		let t = self.toks.get(self.pos).cloned().unwrap_or(Token::Eof);
		self.pos += 1;
		t
	}

	fn expect_ident(&mut self, expected: &str) -> Result<()> {
		match self.advance() {
			Token::Ident(s) if s.eq_ignore_ascii_case(expected) => Ok(()),
			other => Err(Error::Parse(format!("expected `{expected}`, found {other:?}"))),
		}
	}

	fn at_ident(&self, expected: &str) -> bool {
		matches!(self.peek(), Token::Ident(s) if s.eq_ignore_ascii_case(expected))
	}

	fn expect(&mut self, tok: Token) -> Result<()> {
		let got = self.advance();
		if got == tok {
			Ok(())
		} else {
			Err(Error::Parse(format!("expected {tok:?}, found {got:?}")))
		}
	}

	fn ident(&mut self) -> Result<String> {
		match self.advance() {
			Token::Ident(s) => Ok(s),
			other => Err(Error::Parse(format!("expected identifier, found {other:?}"))),
		}
	}

	fn string_lit(&mut self) -> Result<String> {
		match self.advance() {
			Token::Str(s) => Ok(s),
			other => Err(Error::Parse(format!("expected string literal, found {other:?}"))),
		}
	}

	fn dotted_path(&mut self, first: String) -> Result<String> {
		let mut path = first;
		while *self.peek() == Token::Dot {
			self.advance();
			let seg = self.ident()?;
			path.push('.');
			path.push_str(&seg);
		}
		Ok(path)
	}

	// --- SELECT list -----------------------------------------------------

	fn parse_select_list(&mut self) -> Result<Vec<(Expr, Option<String>)>> {
		let mut out = Vec::new();
		loop {
			if *self.peek() == Token::Star {
				self.advance();
				out.push((Expr::field("*"), None));
			} else {
				let expr = self.parse_expr()?;
				let alias = if self.at_ident("AS") {
					self.advance();
					Some(self.ident()?)
				} else {
					None
				};
				out.push((expr, alias));
			}
			if *self.peek() == Token::Comma {
				self.advance();
				continue;
			}
			break;
		}
		Ok(out)
	}

	// --- expression grammar: or > and > equality > relational > additive >
	// multiplicative > unary > primary ------------------------------------

	fn parse_expr(&mut self) -> Result<Expr> {
		self.parse_or()
	}

	fn parse_or(&mut self) -> Result<Expr> {
		let mut lhs = self.parse_and()?;
		while self.at_ident("OR") {
			self.advance();
			let rhs = self.parse_and()?;
			lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
		}
		Ok(lhs)
	}

	fn parse_and(&mut self) -> Result<Expr> {
		let mut lhs = self.parse_null_check()?;
		while self.at_ident("AND") {
			self.advance();
			let rhs = self.parse_null_check()?;
			lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
		}
		Ok(lhs)
	}

	fn parse_null_check(&mut self) -> Result<Expr> {
		let lhs = self.parse_equality()?;
		if self.at_ident("IS") {
			self.advance();
			let negate = if self.at_ident("NOT") {
				self.advance();
				true
			} else {
				false
			};
			self.expect_ident("NULL")?;
			return Ok(Expr::IsNull(Box::new(lhs), negate));
		}
		Ok(lhs)
	}

	fn parse_equality(&mut self) -> Result<Expr> {
		let mut lhs = self.parse_relational()?;
		loop {
			let op = match self.peek() {
				Token::Eq => BinaryOp::Eq,
				Token::Neq => BinaryOp::Neq,
				_ if self.at_ident("LIKE") => BinaryOp::Like,
				_ if self.at_ident("NOT") => {
					// lookahead for `NOT LIKE`
					if matches!(self.toks.get(self.pos + 1), Some(Token::Ident(s)) if s.eq_ignore_ascii_case("LIKE"))
					{
						self.advance();
						BinaryOp::NotLike
					} else {
						break;
					}
				}
				_ => break,
			};
			self.advance();
			let rhs = self.parse_relational()?;
			lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
		}
		Ok(lhs)
	}

	fn parse_relational(&mut self) -> Result<Expr> {
		let mut lhs = self.parse_additive()?;
		loop {
			let op = match self.peek() {
				Token::Lt => BinaryOp::Lt,
				Token::Lte => BinaryOp::Lte,
				Token::Gt => BinaryOp::Gt,
				Token::Gte => BinaryOp::Gte,
				_ => break,
			};
			self.advance();
			let rhs = self.parse_additive()?;
			lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
		}
		Ok(lhs)
	}

	fn parse_additive(&mut self) -> Result<Expr> {
		let mut lhs = self.parse_multiplicative()?;
		loop {
			let op = match self.peek() {
				Token::Plus => BinaryOp::Add,
				Token::Minus => BinaryOp::Sub,
				_ => break,
			};
			self.advance();
			let rhs = self.parse_multiplicative()?;
			lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
		}
		Ok(lhs)
	}

	fn parse_multiplicative(&mut self) -> Result<Expr> {
		let mut lhs = self.parse_unary()?;
		loop {
			let op = match self.peek() {
				Token::Star => BinaryOp::Mul,
				Token::Slash => BinaryOp::Div,
				Token::Percent => BinaryOp::Rem,
				_ => break,
			};
			self.advance();
			let rhs = self.parse_unary()?;
			lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
		}
		Ok(lhs)
	}

	fn parse_unary(&mut self) -> Result<Expr> {
		match self.peek() {
			Token::Minus => {
				self.advance();
				Ok(Expr::Neg(Box::new(self.parse_unary()?)))
			}
			_ if self.at_ident("NOT") => {
				self.advance();
				Ok(Expr::Not(Box::new(self.parse_unary()?)))
			}
			_ => self.parse_primary(),
		}
	}

	fn parse_primary(&mut self) -> Result<Expr> {
		match self.advance() {
			Token::Number(n) => Ok(Expr::Literal(n.into())),
			Token::Str(s) => Ok(Expr::Literal(s.into())),
			Token::LParen => {
				let e = self.parse_expr()?;
				self.expect(Token::RParen)?;
				Ok(e)
			}
			Token::Ident(name) => {
				if *self.peek() == Token::LParen {
					self.advance();
					let mut args = Vec::new();
					if *self.peek() != Token::RParen {
						loop {
							args.push(self.parse_expr()?);
							if *self.peek() == Token::Comma {
								self.advance();
								continue;
							}
							break;
						}
					}
					self.expect(Token::RParen)?;
					return Ok(Expr::Call(name, args));
				}
				if name.eq_ignore_ascii_case("true") {
					return Ok(Expr::Literal(true.into()));
				}
				if name.eq_ignore_ascii_case("false") {
					return Ok(Expr::Literal(false.into()));
				}
				if name.eq_ignore_ascii_case("null") || name.eq_ignore_ascii_case("nil") {
					return Ok(Expr::Literal(crate::value::Value::Null));
				}
				let path = self.dotted_path(name)?;
				Ok(Expr::field(&path))
			}
			other => Err(Error::Parse(format!("unexpected token {other:?} in expression"))),
		}
	}

	// --- statement ---------------------------------------------------------

	fn parse_statement(&mut self) -> Result<Plan> {
		self.expect_ident("SELECT")?;
		let select_list = self.parse_select_list()?;

		self.expect_ident("FROM")?;
		// stream name: accept an identifier or a dotted path, ignored.
		let first = self.ident()?;
		self.dotted_path(first)?;

		let mut where_clause = None;
		if self.at_ident("WHERE") {
			self.advance();
			where_clause = Some(self.parse_expr()?);
		}

		let mut group_fields = Vec::new();
		let mut window = WindowSpec::None;
		if self.at_ident("GROUP") {
			self.advance();
			self.expect_ident("BY")?;
			loop {
				if let Some(w) = self.try_parse_window()? {
					window = w;
				} else {
					let first = self.ident()?;
					let path = self.dotted_path(first)?;
					group_fields.push(Idiom::parse(&path));
				}
				if *self.peek() == Token::Comma {
					self.advance();
					continue;
				}
				break;
			}
		}

		let mut having = None;
		if self.at_ident("HAVING") {
			self.advance();
			having = Some(self.parse_expr()?);
		}

		let mut options = WithOptions::default();
		if self.at_ident("WITH") {
			self.advance();
			self.expect(Token::LParen)?;
			loop {
				let key = self.ident()?;
				self.expect(Token::Eq)?;
				let val = self.string_lit()?;
				match key.to_ascii_uppercase().as_str() {
					"TIMESTAMP" => options.timestamp_field = Some(val),
					"TIMEUNIT" => {
						options.time_unit = Some(
							TimeUnit::parse(&val)
								.ok_or_else(|| Error::Parse(format!("unknown TIMEUNIT `{val}`")))?,
						)
					}
					other => return Err(Error::Parse(format!("unknown WITH option `{other}`"))),
				}
				if *self.peek() == Token::Comma {
					self.advance();
					continue;
				}
				break;
			}
			self.expect(Token::RParen)?;
		}

		self.expect(Token::Eof)?;

		build_plan(select_list, where_clause, group_fields, window, having, options)
	}

	/// Recognises `TumblingWindow('1s')`, `SlidingWindow('1s','500ms')`,
	/// `SessionWindow('30s')`, `CountingWindow(10)` at the current position.
	/// Returns `Ok(None)` without consuming anything if the next tokens do
	/// not look like a window constructor.
	fn try_parse_window(&mut self) -> Result<Option<WindowSpec>> {
		let name = match self.peek() {
			Token::Ident(s) => s.clone(),
			_ => return Ok(None),
		};
		let lower = name.to_ascii_lowercase();
		let kind = match lower.as_str() {
			"tumblingwindow" => 0,
			"slidingwindow" => 1,
			"sessionwindow" => 2,
			"countingwindow" => 3,
			_ => return Ok(None),
		};
		if self.toks.get(self.pos + 1) != Some(&Token::LParen) {
			return Ok(None);
		}
		self.advance();
		self.advance();
		let spec = match kind {
			0 => {
				let d = self.string_lit()?;
				WindowSpec::Tumbling { size: parse_duration(&d)? }
			}
			1 => {
				let size = self.string_lit()?;
				self.expect(Token::Comma)?;
				let slide = self.string_lit()?;
				WindowSpec::Sliding { size: parse_duration(&size)?, slide: parse_duration(&slide)? }
			}
			2 => {
				let gap = self.string_lit()?;
				WindowSpec::Session { gap: parse_duration(&gap)? }
			}
			3 => {
				let n = match self.advance() {
					Token::Number(n) => n as u64,
					other => return Err(Error::Parse(format!("expected count, found {other:?}"))),
				};
				WindowSpec::Counting { count: n }
			}
			_ => unreachable!(),
		};
		self.expect(Token::RParen)?;
		Ok(Some(spec))
	}
}

/// Parses durations written as `'<n><unit>'` with unit in
/// `ms|s|m|h` (e.g. `'500ms'`, `'3s'`, `'5m'`, `'1h'`).
fn parse_duration(s: &str) -> Result<Duration> {
	let s = s.trim();
	let split_at = s.find(|c: char| !c.is_ascii_digit() && c != '.').unwrap_or(s.len());
	let (num, unit) = s.split_at(split_at);
	let n: f64 =
		num.parse().map_err(|_| Error::Parse(format!("invalid duration literal `{s}`")))?;
	let millis = match unit {
		"ms" => n,
		"s" | "ss" => n * 1000.0,
		"m" => n * 60_000.0,
		"h" => n * 3_600_000.0,
		other => return Err(Error::Parse(format!("unknown duration unit `{other}` in `{s}`"))),
	};
	Ok(Duration::from_millis(millis.round() as u64))
}

/// Splits the compiled SELECT list into scalar projections, raw
/// aggregations, and post-aggregation templates (the §4.6 rewrite), based
/// on whether GROUP BY/windowing makes this an aggregating query and
/// whether each projected expression is a bare aggregate call, a mixed
/// expression containing one, or pure scalar.
fn build_plan(
	select_list: Vec<(Expr, Option<String>)>,
	where_clause: Option<Expr>,
	group_fields: Vec<Idiom>,
	window: WindowSpec,
	having: Option<Expr>,
	options: WithOptions,
) -> Result<Plan> {
	let aggregating = !group_fields.is_empty() || window.is_windowed() || select_list
		.iter()
		.any(|(e, _)| contains_aggregate(e));

	let mut scalar_projections = Vec::new();
	let mut aggregations = Vec::new();
	let mut post_projections = Vec::new();
	let mut selected_aliases = Vec::new();

	for (expr, alias) in select_list {
		let name = alias.clone().unwrap_or_else(|| default_alias(&expr));
		selected_aliases.push(name.clone());
		if !aggregating {
			scalar_projections.push(Projection { expr, alias: name });
			continue;
		}
		if let Expr::Call(fname, args) = &expr {
			if is_aggregate_kind(fname) {
				aggregations.push(call_to_aggregation(fname, args, name)?);
				continue;
			}
		}
		if contains_aggregate(&expr) {
			post_projections.push(Projection { expr, alias: name });
		} else {
			// A plain group-key field projected alongside aggregates; it
			// rides through as-is in the post-aggregation row without
			// needing an accumulator (the group key is already present in
			// the aggregator's snapshot under its own field name).
			post_projections.push(Projection { expr, alias: name });
		}
	}

	Ok(Plan {
		group_fields,
		window,
		aggregations,
		scalar_projections,
		post_projections,
		selected_aliases,
		where_clause,
		having,
		options,
	})
}

fn default_alias(expr: &Expr) -> String {
	match expr {
		Expr::Field(path) => path.to_string(),
		Expr::Call(name, args) => {
			let inner: Vec<String> = args.iter().map(default_alias_expr).collect();
			format!("{name}({})", inner.join(", "))
		}
		_ => expr.to_string(),
	}
}

fn default_alias_expr(e: &Expr) -> String {
	default_alias(e)
}

fn contains_aggregate(e: &Expr) -> bool {
	match e {
		Expr::Call(name, args) => is_aggregate_kind(name) || args.iter().any(contains_aggregate),
		Expr::Not(inner) | Expr::Neg(inner) | Expr::IsNull(inner, _) => contains_aggregate(inner),
		Expr::Binary(_, a, b) => contains_aggregate(a) || contains_aggregate(b),
		Expr::Literal(_) | Expr::Field(_) => false,
	}
}

fn call_to_aggregation(name: &str, args: &[Expr], alias: String) -> Result<AggregationCall> {
	let input = match args.first() {
		None => AggregationInput::Star,
		Some(Expr::Field(path)) if path.is_wildcard() => AggregationInput::Star,
		Some(Expr::Field(path)) => AggregationInput::Field(path.clone()),
		Some(other) => AggregationInput::Expression(other.clone()),
	};
	let extra_args: Vec<crate::value::Value> = args
		.iter()
		.skip(1)
		.map(|e| match e {
			Expr::Literal(v) => Ok(v.clone()),
			other => Err(Error::Parse(format!("aggregate parameter must be a literal, found {other}"))),
		})
		.collect::<Result<Vec<_>>>()?;
	Ok(AggregationCall { input, kind: name.to_ascii_lowercase(), args: extra_args, alias })
}

/// Parses a full SQL statement into a [`Plan`].
pub fn parse(sql: &str) -> Result<Plan> {
	let toks = lex(sql)?;
	let mut p = Parser { toks, pos: 0 };
	p.parse_statement()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_non_aggregating_projection() {
		let plan = parse(
			"SELECT device, temperature*1.8+32 AS f FROM stream WHERE temperature > 24",
		)
		.unwrap();
		assert!(!plan.is_aggregating());
		assert_eq!(plan.scalar_projections.len(), 2);
		assert_eq!(plan.scalar_projections[1].alias, "f");
		assert!(plan.where_clause.is_some());
	}

	#[test]
	fn parses_group_by_sum() {
		let plan = parse(
			"SELECT device, SUM(temperature) AS t_sum, SUM(humidity) AS h_sum FROM stream GROUP BY device",
		)
		.unwrap();
		assert!(plan.is_aggregating());
		assert_eq!(plan.aggregations.len(), 2);
		assert_eq!(plan.group_fields, vec![Idiom::parse("device")]);
	}

	#[test]
	fn parses_tumbling_window() {
		let plan = parse(
			"SELECT device, COUNT(*) AS n FROM stream GROUP BY device, TumblingWindow('3s')",
		)
		.unwrap();
		assert_eq!(plan.window, WindowSpec::Tumbling { size: Duration::from_secs(3) });
	}

	#[test]
	fn parses_post_aggregation_expression() {
		let plan = parse(
			"SELECT category, SUM(value)/COUNT(value) AS avg_calc FROM stream GROUP BY category",
		)
		.unwrap();
		assert_eq!(plan.post_projections.len(), 1);
		assert_eq!(plan.post_projections[0].alias, "avg_calc");
	}

	#[test]
	fn parses_like_filter() {
		let plan = parse("SELECT deviceId FROM stream WHERE deviceId LIKE 'sensor%'").unwrap();
		assert!(plan.where_clause.is_some());
	}

	#[test]
	fn parses_with_options() {
		let plan = parse(
			"SELECT device, COUNT(*) AS n FROM stream GROUP BY device, TumblingWindow('1s') WITH (TIMESTAMP='ts', TIMEUNIT='ms')",
		)
		.unwrap();
		assert_eq!(plan.options.timestamp_field.as_deref(), Some("ts"));
		assert_eq!(plan.options.time_unit, Some(TimeUnit::Millis));
	}
}

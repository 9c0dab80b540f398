//! Predicate engine (C4): evaluating conditional items against facts.
//!
//! Grounded on the teacher's own small hand-rolled parser in
//! `config.rs::load()` — byte/token-level parsing with an explicit match
//! over known shapes rather than reaching for a parser-combinator crate,
//! since the grammar here is tiny and fixed.
use std::str::FromStr;

use crate::facts::FactMap;


/// A condition operator (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator
{
	Eq,
	NotEq,
	Lt,
	Gt,
	Le,
	Ge,
	Like,
	In,
	Contains,
	DoesNotContain,
	BeginsWith,
	EndsWith,
}

impl Operator
{
	/// `NOT` only has a defined inversion for `==`/`!=` and
	/// `CONTAINS`/`DOES_NOT_CONTAIN` (§4.4); anything else passes
	/// through unchanged, since the spec doesn't define an inverse for
	/// e.g. `LIKE`.
	fn negate(self) -> Self
	{
		match self
		{
			Self::Eq             => Self::NotEq,
			Self::NotEq          => Self::Eq,
			Self::Contains       => Self::DoesNotContain,
			Self::DoesNotContain => Self::Contains,
			other                => other,
		}
	}
}

impl FromStr for Operator
{
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err>
	{
		Ok(match s.to_ascii_uppercase().as_str()
		{
			"==" | "EQUALS"     => Self::Eq,
			"!=" | "NOT_EQUALS" => Self::NotEq,
			"<"                 => Self::Lt,
			">"                 => Self::Gt,
			"<="                => Self::Le,
			">="                => Self::Ge,
			"LIKE"              => Self::Like,
			"IN"                => Self::In,
			"CONTAINS"          => Self::Contains,
			"DOES_NOT_CONTAIN"  => Self::DoesNotContain,
			"BEGINSWITH"        => Self::BeginsWith,
			"ENDSWITH"          => Self::EndsWith,
			_ => return Err(()),
		})
	}
}

impl<'de> serde::Deserialize<'de> for Operator
{
	fn deserialize<D>(d: D) -> Result<Self, D::Error>
			where D: serde::Deserializer<'de>
	{
		let s = String::deserialize(d)?;
		s.parse().map_err(|_| serde::de::Error::custom(
				format!("unknown condition operator '{s}'")))
	}
}

impl serde::Serialize for Operator
{
	fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
			where S: serde::Serializer
	{
		let str = match self
		{
			Self::Eq => "==", Self::NotEq => "!=",
			Self::Lt => "<", Self::Gt => ">",
			Self::Le => "<=", Self::Ge => ">=",
			Self::Like => "LIKE", Self::In => "IN",
			Self::Contains => "CONTAINS",
			Self::DoesNotContain => "DOES_NOT_CONTAIN",
			Self::BeginsWith => "BEGINSWITH", Self::EndsWith => "ENDSWITH",
		};
		s.serialize_str(str)
	}
}


/// A condition's right-hand value; either a scalar, or a list (only
/// meaningful for `IN`, but we keep it general since a manifest author
/// may write either).
#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum ConditionValue
{
	Scalar(String),
	List(Vec<String>),
}

impl ConditionValue
{
	/// The elements an `IN` check should compare against, whether the
	/// author wrote a YAML list or a comma-separated string.
	fn as_list(&self) -> Vec<String>
	{
		match self
		{
			Self::List(v) => v.clone(),
			Self::Scalar(s) => s.split(',').map(|p| p.trim().to_string())
					.filter(|p| !p.is_empty()).collect(),
		}
	}

	fn as_scalar(&self) -> String
	{
		match self
		{
			Self::Scalar(s) => s.clone(),
			Self::List(v) => v.join(","),
		}
	}
}


/// A single `(key, operator, value)` triple (§3).
#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct Condition
{
	pub(crate) key: String,
	pub(crate) operator: Operator,
	pub(crate) value: ConditionValue,
}

/// Errors evaluating a single condition.  These are non-fatal to the
/// overall resolve — an erroring condition is logged and treated as
/// false (§4.4).
#[derive(Debug)]
#[derive(thiserror::Error)]
pub(crate) enum EvalErr
{
	#[error("unknown fact key '{0}'")]
	UnknownFact(String),
}

impl Condition
{
	pub(crate) fn evaluate(&self, facts: &FactMap) -> Result<bool, EvalErr>
	{
		let fact = facts.get(&self.key)
				.ok_or_else(|| EvalErr::UnknownFact(self.key.clone()))?;

		let ok = match self.operator
		{
			Operator::Eq | Operator::NotEq =>
			{
				let eq = match (fact.as_f64(), self.value.as_scalar().parse::<f64>())
				{
					(Some(fnum), Ok(vnum)) => fnum == vnum,
					_ => fact.as_compare_str().eq_ignore_ascii_case(
							&self.value.as_scalar()) ||
							fact.as_compare_str() == self.value.as_scalar(),
				};
				if self.operator == Operator::Eq { eq } else { !eq }
			},

			// Flagged in the spec's design notes as likely-buggy
			// lexicographic comparison on what are often numeric facts
			// (e.g. `"10" < "9"` is true). We implement it exactly as
			// specified rather than silently "fixing" it.
			Operator::Lt => fact.as_compare_str() <  self.value.as_scalar(),
			Operator::Gt => fact.as_compare_str() >  self.value.as_scalar(),
			Operator::Le => fact.as_compare_str() <= self.value.as_scalar(),
			Operator::Ge => fact.as_compare_str() >= self.value.as_scalar(),

			Operator::Like =>
			{
				let pattern = self.value.as_scalar().replace('*', "");
				fact.as_compare_str().to_ascii_lowercase()
						.contains(&pattern.to_ascii_lowercase())
			},

			Operator::In =>
			{
				let fstr = fact.as_compare_str();
				self.value.as_list().iter()
						.any(|v| v.eq_ignore_ascii_case(&fstr))
			},

			Operator::Contains =>
				fact.as_compare_str().to_ascii_lowercase()
						.contains(&self.value.as_scalar().to_ascii_lowercase()),
			Operator::DoesNotContain =>
				!fact.as_compare_str().to_ascii_lowercase()
						.contains(&self.value.as_scalar().to_ascii_lowercase()),

			Operator::BeginsWith =>
				fact.as_compare_str().to_ascii_lowercase()
						.starts_with(&self.value.as_scalar().to_ascii_lowercase()),
			Operator::EndsWith =>
				fact.as_compare_str().to_ascii_lowercase()
						.ends_with(&self.value.as_scalar().to_ascii_lowercase()),
		};

		Ok(ok)
	}
}


/// `AND`/`OR` combinator for the complex-string form (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) enum BoolOp { And, Or }


/// The lowered shape of a conditional item's condition: either one
/// simple condition, or several combined by `AND`/`OR`.  The
/// "complex-string" free-form syntax is lowered into this at parse time;
/// no string representation leaks past here (§9 design note).
#[derive(Debug, Clone)]
pub(crate) enum ConditionExpr
{
	Single(Condition),
	Combined { op: BoolOp, conditions: Vec<Condition> },
}

impl Default for ConditionExpr
{
	fn default() -> Self
	{
		Self::Single(Condition {
			key: String::new(),
			operator: Operator::Eq,
			value: ConditionValue::Scalar(String::new()),
		})
	}
}

/// Deserializing the YAML shape: either a plain string (simple- or
/// complex-string form, lowered via `parse_condition_string`), or an
/// already-structured single condition, or an already-structured
/// combined form.
impl<'de> serde::Deserialize<'de> for ConditionExpr
{
	fn deserialize<D>(d: D) -> Result<Self, D::Error>
			where D: serde::Deserializer<'de>
	{
		#[derive(serde::Deserialize)]
		#[serde(untagged)]
		enum Raw
		{
			Str(String),
			Combined { op: BoolOp, conditions: Vec<Condition> },
			Single(Condition),
		}

		let raw = Raw::deserialize(d)?;
		match raw
		{
			Raw::Str(s) => parse_condition_string(&s)
					.map_err(serde::de::Error::custom),
			Raw::Combined { op, conditions } =>
					Ok(ConditionExpr::Combined { op, conditions }),
			Raw::Single(c) => Ok(ConditionExpr::Single(c)),
		}
	}
}

impl serde::Serialize for ConditionExpr
{
	fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
			where S: serde::Serializer
	{
		#[derive(serde::Serialize)]
		#[serde(untagged)]
		enum Raw<'a>
		{
			Combined { op: BoolOp, conditions: &'a [Condition] },
			Single(&'a Condition),
		}

		match self
		{
			Self::Single(c) => Raw::Single(c).serialize(s),
			Self::Combined { op, conditions } =>
					Raw::Combined { op: *op, conditions }.serialize(s),
		}
	}
}


/// Errors lowering a free-form condition string.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub(crate) enum ParseErr
{
	#[error("empty condition string")]
	Empty,

	#[error("condition string '{0}' has too few tokens")]
	TooFewTokens(String),

	#[error("unknown operator '{0}' in condition '{1}'")]
	UnknownOperator(String, String),

	#[error("mismatched quote in condition '{0}'")]
	UnmatchedQuote(String),
}


/// Tokenize a condition string respecting `"…"`/`'…'` quoting (§4.4).
fn tokenize(s: &str) -> Result<Vec<String>, ParseErr>
{
	let mut tokens = Vec::new();
	let mut cur = String::new();
	let mut quote: Option<char> = None;
	let mut chars = s.chars().peekable();

	while let Some(c) = chars.next()
	{
		match quote
		{
			Some(q) if c == q => { quote = None; },
			Some(_) => cur.push(c),
			None =>
			{
				if c == '"' || c == '\'' { quote = Some(c); }
				else if c.is_whitespace()
				{
					if !cur.is_empty() { tokens.push(std::mem::take(&mut cur)); }
				}
				else { cur.push(c); }
			},
		}
	}

	if quote.is_some() { return Err(ParseErr::UnmatchedQuote(s.to_string())); }
	if !cur.is_empty() { tokens.push(cur); }

	Ok(tokens)
}

fn strip_quotes(s: &str) -> String
{
	let s = s.trim();
	let stripped = s.strip_prefix('"').and_then(|s| s.strip_suffix('"'))
			.or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
	stripped.unwrap_or(s).to_string()
}

/// Parse one simple condition string: `[ANY|NOT] <key> <op> <value...>`.
fn parse_simple(raw: &str) -> Result<Condition, ParseErr>
{
	let tokens = tokenize(raw)?;
	if tokens.is_empty() { return Err(ParseErr::Empty); }

	let mut idx = 0;
	let mut negate = false;
	if tokens[0].eq_ignore_ascii_case("any")
	{ idx += 1; }
	else if tokens[0].eq_ignore_ascii_case("not")
	{ negate = true; idx += 1; }

	if tokens.len() < idx + 2
	{ return Err(ParseErr::TooFewTokens(raw.to_string())); }

	let key = tokens[idx].clone();
	let op_tok = &tokens[idx + 1];
	let mut op: Operator = op_tok.parse()
			.map_err(|_| ParseErr::UnknownOperator(op_tok.clone(), raw.to_string()))?;
	if negate { op = op.negate(); }

	let value = tokens[(idx + 2)..].join(" ");
	let value = strip_quotes(&value);

	Ok(Condition { key, operator: op, value: ConditionValue::Scalar(value) })
}

/// Quote-aware search for the first top-level ` AND ` or ` OR `
/// occurrence (case-insensitive).  Returns the connector found and the
/// split positions.
fn find_connector(s: &str) -> Option<&'static str>
{
	let upper = s.to_ascii_uppercase();
	let mut in_quote: Option<char> = None;
	let bytes = s.as_bytes();
	let ubytes = upper.as_bytes();

	let mut i = 0;
	while i < bytes.len()
	{
		let c = bytes[i] as char;
		match in_quote
		{
			Some(q) if c == q => { in_quote = None; i += 1; continue; },
			Some(_) => { i += 1; continue; },
			None =>
			{
				if c == '"' || c == '\'' { in_quote = Some(c); i += 1; continue; }
			},
		}

		if ubytes[i..].starts_with(b" AND ") { return Some("AND"); }
		if ubytes[i..].starts_with(b" OR ")  { return Some("OR"); }
		i += 1;
	}

	None
}

fn split_on(s: &str, connector: &str) -> Vec<String>
{
	let pat = format!(" {connector} ");
	// Split case-insensitively by walking and matching segments; since
	// connector is a fixed ASCII word, a straightforward case-insensitive
	// split is enough here.
	let upper = s.to_ascii_uppercase();
	let upat = pat.to_ascii_uppercase();

	let mut parts = Vec::new();
	let mut rest = s;
	let mut urest = upper.as_str();
	while let Some(pos) = urest.find(&upat)
	{
		parts.push(rest[..pos].trim().to_string());
		rest = &rest[pos + pat.len()..];
		urest = &urest[pos + upat.len()..];
	}
	parts.push(rest.trim().to_string());
	parts
}

/// Lower a free-form condition string (simple or complex) into a
/// `ConditionExpr` (§4.4).
pub(crate) fn parse_condition_string(s: &str) -> Result<ConditionExpr, ParseErr>
{
	let s = s.trim();
	if s.is_empty() { return Err(ParseErr::Empty); }

	match find_connector(s)
	{
		Some(conn) =>
		{
			let op = if conn == "AND" { BoolOp::And } else { BoolOp::Or };
			let parts = split_on(s, conn);
			let conditions: Result<Vec<Condition>, _> =
					parts.iter().map(|p| parse_simple(p)).collect();
			Ok(ConditionExpr::Combined { op, conditions: conditions? })
		},
		None => Ok(ConditionExpr::Single(parse_simple(s)?)),
	}
}

impl ConditionExpr
{
	/// Evaluate this node (not counting its children — that's
	/// [`ConditionalItem::evaluate`]'s job).
	pub(crate) fn evaluate(&self, facts: &FactMap, warn: &mut dyn FnMut(String)) -> bool
	{
		match self
		{
			Self::Single(c) => c.evaluate(facts).unwrap_or_else(|e| {
				warn(format!("condition on '{}' failed: {e}", c.key));
				false
			}),

			Self::Combined { op: BoolOp::Or, conditions } =>
			{
				for c in conditions
				{
					match c.evaluate(facts)
					{
						Ok(true) => return true,
						Ok(false) => continue,
						Err(e) => { warn(format!("OR branch on '{}' \
								failed: {e}", c.key)); continue; },
					}
				}
				false
			},

			Self::Combined { op: BoolOp::And, conditions } =>
			{
				for c in conditions
				{
					match c.evaluate(facts)
					{
						Ok(true) => continue,
						Ok(false) => return false,
						Err(e) => { warn(format!("AND branch on '{}' \
								failed: {e}", c.key)); return false; },
					}
				}
				true
			},
		}
	}
}


/// A conditional item (§3): a condition expression, the five
/// inclusion lists it contributes when true, plus `managed_profiles`/
/// `managed_apps` (consumed only for resolver dedup, §4.5) and a
/// recursive list of children.
#[derive(Debug, Clone, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct ConditionalItem
{
	pub(crate) condition: ConditionExpr,

	#[serde(default)] pub(crate) managed_installs: Vec<String>,
	#[serde(default)] pub(crate) managed_updates: Vec<String>,
	#[serde(default)] pub(crate) managed_uninstalls: Vec<String>,
	#[serde(default)] pub(crate) optional_installs: Vec<String>,
	#[serde(default)] pub(crate) included_manifests: Vec<String>,
	#[serde(default)] pub(crate) managed_profiles: Vec<String>,
	#[serde(default)] pub(crate) managed_apps: Vec<String>,

	#[serde(default)] pub(crate) conditional_items: Vec<ConditionalItem>,
}

/// The merged result of evaluating a conditional item (and its true
/// children), per the C4 contract: `(installs, updates, uninstalls,
/// optionals, profiles, apps)`. We also carry `manifests`, beyond the
/// spec's literal six-tuple — see DESIGN.md: without it a conditionally
/// included manifest could never reach the resolver's BFS queue.
#[derive(Debug, Clone, Default)]
pub(crate) struct MergedLists
{
	pub(crate) installs: Vec<String>,
	pub(crate) updates: Vec<String>,
	pub(crate) uninstalls: Vec<String>,
	pub(crate) optionals: Vec<String>,
	pub(crate) profiles: Vec<String>,
	pub(crate) apps: Vec<String>,
	pub(crate) manifests: Vec<String>,
}

impl MergedLists
{
	fn merge(&mut self, other: MergedLists)
	{
		self.installs.extend(other.installs);
		self.updates.extend(other.updates);
		self.uninstalls.extend(other.uninstalls);
		self.optionals.extend(other.optionals);
		self.profiles.extend(other.profiles);
		self.apps.extend(other.apps);
		self.manifests.extend(other.manifests);
	}
}

impl ConditionalItem
{
	/// Recursively evaluate: a false root contributes nothing (including
	/// from its children — §8's invariant); a true root contributes its
	/// own lists plus whatever its true children yield.
	pub(crate) fn evaluate(&self, facts: &FactMap, warn: &mut dyn FnMut(String))
			-> MergedLists
	{
		let mut out = MergedLists::default();

		if !self.condition.evaluate(facts, warn) { return out; }

		out.installs.extend(self.managed_installs.iter().cloned());
		out.updates.extend(self.managed_updates.iter().cloned());
		out.uninstalls.extend(self.managed_uninstalls.iter().cloned());
		out.optionals.extend(self.optional_installs.iter().cloned());
		out.profiles.extend(self.managed_profiles.iter().cloned());
		out.apps.extend(self.managed_apps.iter().cloned());
		out.manifests.extend(self.included_manifests.iter().cloned());

		for child in &self.conditional_items
		{
			out.merge(child.evaluate(facts, warn));
		}

		out
	}
}


#[cfg(test)]
mod tests
{
	use super::*;
	use crate::facts::FactMap;

	fn facts(pairs: &[(&str, &str)]) -> FactMap
	{
		pairs.iter().map(|(k, v)| (k.to_string(), (*v).into())).collect()
	}

	fn noop_warn(_s: String) {}

	#[test]
	fn simple_equals()
	{
		let f = facts(&[("hostname", "DESK-42")]);
		let c = parse_simple("hostname == DESK-42").unwrap();
		assert!(c.evaluate(&f).unwrap());
	}

	#[test]
	fn does_not_contain_camera()
	{
		let cond = "hostname DOES_NOT_CONTAIN Camera";
		let expr = parse_condition_string(cond).unwrap();

		let mut warn = noop_warn;
		let desk = facts(&[("hostname", "DESK-42")]);
		assert!(expr.evaluate(&desk, &mut warn));

		let cam = facts(&[("hostname", "CAMERA-01")]);
		assert!(!expr.evaluate(&cam, &mut warn));

		let cam_mixed = facts(&[("hostname", "cAmera-x")]);
		assert!(!expr.evaluate(&cam_mixed, &mut warn));
	}

	#[test]
	fn not_prefix_inverts()
	{
		let a = parse_simple("hostname == DESK-42").unwrap();
		let b = parse_simple("NOT hostname == DESK-42").unwrap();
		assert_eq!(a.operator, Operator::Eq);
		assert_eq!(b.operator, Operator::NotEq);
	}

	#[test]
	fn or_short_circuits_true()
	{
		let expr = parse_condition_string(
				"hostname == A OR hostname == B").unwrap();
		let f = facts(&[("hostname", "B")]);
		let mut warn = noop_warn;
		assert!(expr.evaluate(&f, &mut warn));
	}

	#[test]
	fn and_short_circuits_false()
	{
		let expr = parse_condition_string(
				"hostname == A AND arch == x64").unwrap();
		let f = facts(&[("hostname", "B"), ("arch", "x64")]);
		let mut warn = noop_warn;
		assert!(!expr.evaluate(&f, &mut warn));
	}

	#[test]
	fn in_operator_list()
	{
		let c = Condition {
			key: "arch".to_string(),
			operator: Operator::In,
			value: ConditionValue::List(vec!["x64".to_string(), "arm64".to_string()]),
		};
		let f = facts(&[("arch", "arm64")]);
		assert!(c.evaluate(&f).unwrap());
	}

	#[test]
	fn like_strips_wildcards()
	{
		let c = Condition {
			key: "hostname".to_string(),
			operator: Operator::Like,
			value: ConditionValue::Scalar("*esk*".to_string()),
		};
		let f = facts(&[("hostname", "DESK-42")]);
		assert!(c.evaluate(&f).unwrap());
	}

	#[test]
	fn begins_ends_with()
	{
		let f = facts(&[("hostname", "DESK-42")]);
		let begins = parse_simple("hostname BEGINSWITH desk").unwrap();
		let ends = parse_simple("hostname ENDSWITH 42").unwrap();
		assert!(begins.evaluate(&f).unwrap());
		assert!(ends.evaluate(&f).unwrap());
	}

	#[test]
	fn false_root_contributes_nothing_even_with_true_children()
	{
		let child = ConditionalItem {
			condition: ConditionExpr::Single(Condition {
				key: "arch".to_string(), operator: Operator::Eq,
				value: ConditionValue::Scalar("x64".to_string()),
			}),
			managed_installs: vec!["ChildPkg".to_string()],
			..Default::default()
		};
		let root = ConditionalItem {
			condition: ConditionExpr::Single(Condition {
				key: "hostname".to_string(), operator: Operator::Eq,
				value: ConditionValue::Scalar("NOPE".to_string()),
			}),
			managed_installs: vec!["RootPkg".to_string()],
			conditional_items: vec![child],
			..Default::default()
		};

		let f = facts(&[("hostname", "DESK-42"), ("arch", "x64")]);
		let mut warn = noop_warn;
		let merged = root.evaluate(&f, &mut warn);
		assert!(merged.installs.is_empty());
	}

	#[test]
	fn true_root_merges_true_children()
	{
		let child = ConditionalItem {
			condition: ConditionExpr::Single(Condition {
				key: "arch".to_string(), operator: Operator::Eq,
				value: ConditionValue::Scalar("x64".to_string()),
			}),
			managed_installs: vec!["ChildPkg".to_string()],
			..Default::default()
		};
		let root = ConditionalItem {
			condition: ConditionExpr::Single(Condition {
				key: "hostname".to_string(), operator: Operator::Eq,
				value: ConditionValue::Scalar("DESK-42".to_string()),
			}),
			managed_installs: vec!["RootPkg".to_string()],
			conditional_items: vec![child],
			..Default::default()
		};

		let f = facts(&[("hostname", "DESK-42"), ("arch", "x64")]);
		let mut warn = noop_warn;
		let merged = root.evaluate(&f, &mut warn);
		assert_eq!(merged.installs, vec!["RootPkg".to_string(), "ChildPkg".to_string()]);
	}

	#[test]
	fn unknown_operator_fails_node()
	{
		let res = parse_simple("hostname FROBNICATES DESK-42");
		assert!(res.is_err());
	}

	#[test]
	fn quoted_value_with_spaces()
	{
		let c = parse_simple(r#"enrolled_area == "north wing""#).unwrap();
		assert_eq!(c.value.as_scalar(), "north wing");
	}
}

//! In-memory evaluation of a policy against one JSON document.
//!
//! Used where a single descriptor is already loaded and a database round trip
//! would be wasted, e.g. to check access to the record a write request names.
//! Field paths walk the document by segment name: `[]` fans out over an array,
//! `[n]` picks one element. A leaf holds when any reachable value satisfies it,
//! which mirrors the `EXISTS` semantics of the SQL compiler. Inside `$match`,
//! members that share a `[]` prefix are bound to the same element.

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::ast::{ComparisonOp, Expr, Leaf, Literal, Operand, StringOp};
use crate::attribute::{AttributeResolver, NoAttributes};
use crate::error::{Error, Result};
use crate::parser::{FieldPath, Segment, Selector};
use crate::simplify::{constant_value, textual_pattern};
use crate::sql_compiler::reject_field_pairs;

/// Evaluates policies against documents of one root, e.g. `$aasdesc`.
#[derive(Clone, Copy)]
pub struct ModelEvaluator<'a> {
    root: &'a str,
    attributes: &'a dyn AttributeResolver,
}

impl<'a> ModelEvaluator<'a> {
    pub fn new(root: &'a str) -> Self {
        Self {
            root,
            attributes: &NoAttributes,
        }
    }

    pub fn with_attributes(mut self, attributes: &'a dyn AttributeResolver) -> Self {
        self.attributes = attributes;
        self
    }

    /// Whether `document` satisfies `expr`.
    pub fn evaluate(&self, expr: &Expr, document: &JsonValue) -> Result<bool> {
        reject_field_pairs(expr)?;
        let allowed = self.eval(expr, document)?;
        debug!(root = self.root, key = expr.key(), allowed, "Evaluated policy against document");
        Ok(allowed)
    }

    fn eval(&self, expr: &Expr, document: &JsonValue) -> Result<bool> {
        match expr {
            Expr::And(children) => {
                for child in children {
                    if !self.eval(child, document)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expr::Or(children) => {
                for child in children {
                    if self.eval(child, document)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expr::Not(child) => Ok(!self.eval(child, document)?),
            Expr::Match(children) => self.eval_match(children, document),
            leaf => self.eval_leaf(leaf, document),
        }
    }

    /// Binds the first `[]` shared by every member to one element at a time.
    fn eval_match(&self, members: &[Expr], document: &JsonValue) -> Result<bool> {
        let Some(prefix) = shared_wildcard(members) else {
            for member in members {
                if !self.eval(member, document)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        };

        let count = self
            .values(&prefix.with_last_selector(Selector::None), document)?
            .first()
            .and_then(|v| v.as_array())
            .map_or(0, Vec::len);

        for index in 0..count {
            let fragment = prefix.with_last_selector(Selector::Fixed(index as u32));
            let bound: Vec<Expr> = members.iter().map(|m| rebase_expr(m, &fragment)).collect();
            if self.eval_match(&bound, document)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn eval_leaf(&self, leaf: &Expr, document: &JsonValue) -> Result<bool> {
        match leaf.leaf() {
            Some(Leaf::Boolean(value)) => Ok(value),
            Some(Leaf::Compare(op, items)) => {
                let left = self.operand_values(&items[0], op.as_str(), document)?;
                let right = self.operand_values(&items[1], op.as_str(), document)?;
                for l in &left {
                    for r in &right {
                        if compare_coerced(op, l, r)? {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
            Some(Leaf::Pattern(op, items)) => self.eval_pattern(op, items, document),
            None => Err(Error::structure(format!("{} is not a leaf", leaf.key()))),
        }
    }

    fn eval_pattern(&self, op: StringOp, items: &[Operand; 2], document: &JsonValue) -> Result<bool> {
        let operator = op.as_str();
        let [value, pattern] = items;
        if pattern.is_field() {
            return Err(Error::structure(format!("{operator}: the pattern must be a literal")));
        }
        let pattern = match constant_value(pattern, operator, self.attributes)? {
            Some(literal) => textual_pattern(operator, literal)?,
            None => return Err(unresolved(pattern)),
        };
        for value in self.operand_values(value, operator, document)? {
            if op.matches(&value.to_text(), &pattern)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every value an operand takes in `document`. Values that fail an explicit
    /// cast are dropped.
    fn operand_values(&self, operand: &Operand, operator: &str, document: &JsonValue) -> Result<Vec<Literal>> {
        let (base, target) = operand.unwrap_cast();
        let Operand::Field(path) = base else {
            return match constant_value(operand, operator, self.attributes)? {
                Some(literal) => Ok(vec![literal]),
                None => Err(unresolved(operand)),
            };
        };

        let literals = self.values(path, document)?.into_iter().filter_map(json_literal);
        Ok(match target {
            Some(target) => literals.filter_map(|l| l.cast(target)).collect(),
            None => literals.collect(),
        })
    }

    /// Values reachable through `path`. Reference objects stand for the value
    /// of their first key.
    fn values<'d>(&self, path: &FieldPath, document: &'d JsonValue) -> Result<Vec<&'d JsonValue>> {
        if path.root() != self.root {
            return Err(Error::unresolvable(
                path.to_string(),
                format!("the document is a `{}`", self.root),
            ));
        }

        let mut current = vec![document];
        for segment in path.segments() {
            let mut next = Vec::new();
            for value in current {
                let Some(child) = member(value, &segment.name) else {
                    continue;
                };
                match segment.selector {
                    Selector::None => next.push(child),
                    Selector::Fixed(index) => next.extend(child.get(index as usize)),
                    Selector::Any => next.extend(child.as_array().into_iter().flatten()),
                }
            }
            current = next;
        }
        Ok(current.into_iter().map(reference_value).collect())
    }
}

/// Object member by name, falling back to a case-insensitive match
/// (`protocolinformation` vs `protocolInformation`).
fn member<'d>(value: &'d JsonValue, name: &str) -> Option<&'d JsonValue> {
    let object = value.as_object()?;
    object.get(name).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn reference_value(value: &JsonValue) -> &JsonValue {
    value
        .get("keys")
        .and_then(|keys| keys.get(0))
        .and_then(|key| key.get("value"))
        .unwrap_or(value)
}

fn json_literal(value: &JsonValue) -> Option<Literal> {
    match value {
        JsonValue::String(s) => Some(Literal::String(s.clone())),
        JsonValue::Number(n) => n.as_f64().map(Literal::Number),
        JsonValue::Bool(b) => Some(Literal::Boolean(*b)),
        _ => None,
    }
}

/// Compares after the same coercions the SQL compiler applies to a column:
/// text meets a typed value by conversion (no match if it does not convert),
/// a typed value meets text as text.
fn compare_coerced(op: ComparisonOp, left: &Literal, right: &Literal) -> Result<bool> {
    let (lt, rt) = (left.value_type(), right.value_type());
    if lt == rt || (lt.is_textual() && rt.is_textual()) {
        return left.compare(op, right);
    }
    if lt.is_textual() {
        return match left.clone().cast(rt) {
            Some(left) => left.compare(op, right),
            None => Ok(false),
        };
    }
    if rt.is_textual() {
        return match right.clone().cast(lt) {
            Some(right) => left.compare(op, &right),
            None => Literal::String(left.to_text()).compare(op, right),
        };
    }
    Err(Error::type_mismatch(
        op.as_str(),
        format!("cannot compare {lt} with {rt}"),
    ))
}

fn unresolved(operand: &Operand) -> Error {
    let attribute = match operand.unwrap_cast().0 {
        Operand::Attribute(item) => item.to_string(),
        other => format!("{other:?}"),
    };
    Error::UnresolvedAttribute { attribute }
}

/// Prefix ending on the first `[]` that every field of a `$match` passes through.
fn shared_wildcard(members: &[Expr]) -> Option<FieldPath> {
    let fields: Vec<&FieldPath> = members.iter().flat_map(Expr::fields).collect();
    let first = fields.first()?;
    let at = first.segments().iter().position(|s| s.selector == Selector::Any)?;
    let prefix: &[Segment] = &first.segments()[..=at];

    fields
        .iter()
        .all(|path| {
            path.root() == first.root()
                && path.segments().len() > at
                && path.segments()[..=at] == *prefix
        })
        .then(|| first.truncated(at + 1))
}

/// `expr` with every field under `fragment` rewritten to use its indices.
fn rebase_expr(expr: &Expr, fragment: &FieldPath) -> Expr {
    match expr {
        Expr::And(children) => Expr::And(children.iter().map(|c| rebase_expr(c, fragment)).collect()),
        Expr::Or(children) => Expr::Or(children.iter().map(|c| rebase_expr(c, fragment)).collect()),
        Expr::Match(children) => Expr::Match(children.iter().map(|c| rebase_expr(c, fragment)).collect()),
        Expr::Not(child) => Expr::not(rebase_expr(child, fragment)),
        leaf => match leaf.leaf() {
            Some(Leaf::Compare(op, [left, right])) => {
                Expr::compare(op, rebase_operand(left, fragment), rebase_operand(right, fragment))
            }
            Some(Leaf::Pattern(op, [value, pattern])) => {
                Expr::pattern(op, rebase_operand(value, fragment), rebase_operand(pattern, fragment))
            }
            _ => leaf.clone(),
        },
    }
}

fn rebase_operand(operand: &Operand, fragment: &FieldPath) -> Operand {
    let rebase = |inner: &Operand| Box::new(rebase_operand(inner, fragment));
    match operand {
        Operand::Field(path) => Operand::Field(path.rebase(fragment).unwrap_or_else(|| path.clone())),
        Operand::StrCast(inner) => Operand::StrCast(rebase(inner)),
        Operand::NumCast(inner) => Operand::NumCast(rebase(inner)),
        Operand::BoolCast(inner) => Operand::BoolCast(rebase(inner)),
        Operand::DateTimeCast(inner) => Operand::DateTimeCast(rebase(inner)),
        Operand::TimeCast(inner) => Operand::TimeCast(rebase(inner)),
        Operand::HexCast(inner) => Operand::HexCast(rebase(inner)),
        other => other.clone(),
    }
}

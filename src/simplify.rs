//! Partial evaluation of a policy before SQL generation.
//!
//! Leaves whose operands are all literals or resolvable attributes are decided
//! here and replaced by `$boolean`. `$and`/`$or`/`$match`/`$not` short-circuit
//! around decided children. Leaves that read a `$field` are kept for the compiler.

use tracing::trace;

use crate::ast::{Expr, Leaf, Literal, Operand};
use crate::attribute::AttributeResolver;
use crate::error::{Error, Result};

/// Whether a (sub)expression was decided without looking at any row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    True,
    False,
    Undecided,
}

impl Decision {
    fn from_bool(value: bool) -> Self {
        if value {
            Decision::True
        } else {
            Decision::False
        }
    }

    pub fn value(self) -> Option<bool> {
        match self {
            Decision::True => Some(true),
            Decision::False => Some(false),
            Decision::Undecided => None,
        }
    }
}

/// The reduced expression together with its decision.
///
/// A decided expression is always the matching `$boolean` leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct Simplified {
    pub expr: Expr,
    pub decision: Decision,
}

impl Simplified {
    fn decided(value: bool) -> Self {
        Self {
            expr: Expr::Boolean(value),
            decision: Decision::from_bool(value),
        }
    }

    fn undecided(expr: Expr) -> Self {
        Self {
            expr,
            decision: Decision::Undecided,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Group {
    And,
    Or,
    Match,
}

impl Group {
    /// Value that leaves the group unchanged when dropped.
    fn neutral(self) -> bool {
        !matches!(self, Group::Or)
    }

    fn rebuild(self, mut children: Vec<Expr>) -> Expr {
        match self {
            // `$match` keeps its same-element scope even with a single member.
            Group::Match => Expr::Match(children),
            _ if children.len() == 1 => children.remove(0),
            Group::And => Expr::And(children),
            Group::Or => Expr::Or(children),
        }
    }
}

/// Folds everything in `expr` that does not depend on a row.
pub fn simplify(expr: &Expr, attributes: &dyn AttributeResolver) -> Result<Simplified> {
    let simplified = match expr {
        Expr::And(children) => simplify_group(Group::And, children, attributes)?,
        Expr::Or(children) => simplify_group(Group::Or, children, attributes)?,
        Expr::Match(children) => simplify_group(Group::Match, children, attributes)?,
        Expr::Not(child) => {
            let inner = simplify(child, attributes)?;
            match inner.decision.value() {
                Some(value) => Simplified::decided(!value),
                None => Simplified::undecided(Expr::not(inner.expr)),
            }
        }
        leaf => match fold_leaf(leaf, attributes)? {
            Some(value) => {
                trace!(key = leaf.key(), value, "Folded constant leaf");
                Simplified::decided(value)
            }
            None => Simplified::undecided(leaf.clone()),
        },
    };
    Ok(simplified)
}

fn simplify_group(group: Group, children: &[Expr], attributes: &dyn AttributeResolver) -> Result<Simplified> {
    let neutral = group.neutral();
    let mut kept: Vec<Expr> = Vec::with_capacity(children.len());

    for child in children {
        let simplified = simplify(child, attributes)?;
        match simplified.decision.value() {
            Some(value) if value != neutral => return Ok(Simplified::decided(value)),
            Some(_) => {}
            None => {
                if !kept.contains(&simplified.expr) {
                    kept.push(simplified.expr);
                }
            }
        }
    }

    if kept.is_empty() {
        return Ok(Simplified::decided(neutral));
    }
    Ok(Simplified::undecided(group.rebuild(kept)))
}

/// Decides a leaf when neither operand reads a field.
fn fold_leaf(leaf: &Expr, attributes: &dyn AttributeResolver) -> Result<Option<bool>> {
    match leaf.leaf() {
        Some(Leaf::Boolean(value)) => Ok(Some(value)),
        Some(Leaf::Compare(op, items)) => {
            let operator = op.as_str();
            let left = constant_value(&items[0], operator, attributes)?;
            let right = constant_value(&items[1], operator, attributes)?;
            match (left, right) {
                (Some(left), Some(right)) => left.compare(op, &right).map(Some),
                _ => Ok(None),
            }
        }
        Some(Leaf::Pattern(op, items)) => {
            let operator = op.as_str();
            let [value, pattern] = items;
            let value = constant_value(value, operator, attributes)?;
            let pattern = constant_value(pattern, operator, attributes)?;
            match (value, pattern) {
                (Some(value), Some(pattern)) => {
                    let pattern = textual_pattern(operator, pattern)?;
                    op.matches(&value.to_text(), &pattern).map(Some)
                }
                _ => Ok(None),
            }
        }
        None => Ok(None),
    }
}

/// Value of an operand that does not read a field, with its outermost cast
/// applied. `None` for fields and for attributes the resolver has no value for.
pub(crate) fn constant_value(
    operand: &Operand,
    operator: &str,
    attributes: &dyn AttributeResolver,
) -> Result<Option<Literal>> {
    let (base, target) = operand.unwrap_cast();
    let literal = match base {
        Operand::Field(_) => return Ok(None),
        Operand::Attribute(item) => match attributes.resolve(item) {
            Some(literal) => literal,
            None => return Ok(None),
        },
        other => other
            .literal()
            .ok_or_else(|| Error::structure(format!("{operator}: unsupported operand")))?,
    };

    match target {
        Some(target) => {
            let from = literal.value_type();
            literal.cast(target).map(Some).ok_or_else(|| {
                Error::type_mismatch(operator, format!("cannot convert {from} literal to {target}"))
            })
        }
        None => Ok(Some(literal)),
    }
}

/// Text of a string-predicate pattern; other types are rejected.
pub(crate) fn textual_pattern(operator: &str, pattern: Literal) -> Result<String> {
    if !pattern.value_type().is_textual() {
        return Err(Error::type_mismatch(
            operator,
            format!("pattern must be a string, got {}", pattern.value_type()),
        ));
    }
    Ok(pattern.to_text())
}

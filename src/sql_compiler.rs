//! SQL compiler that turns a policy expression into a parameterized sea-query predicate.
//!
//! Paths that stay on the root table compile to direct column comparisons. Paths that
//! leave it compile to a correlated `EXISTS` over the relation steps, with `[n]`
//! contributing `position = n` pins. Inside a conjunction, predicates whose paths
//! start at the same relation instance share one subquery and their join trees are
//! merged, so `$and` over `specificAssetIds[]` means "one element satisfying all".
//!
//! Rows are selected only where the condition is TRUE. Negation is rendered as
//! `(p) IS NOT TRUE`, so a row where `p` is NULL (nullable column, failed guarded
//! cast) lands on exactly one side of `p` / `$not p`.

use sea_query::{
    Alias, Expr, JoinType, PostgresQueryBuilder, Query, SelectStatement, SimpleExpr, Value, Values,
};
use tracing::{debug, warn};

use crate::ast::{ComparisonOp, Expr as PolicyExpr, Leaf, Literal, Operand, StringOp, ValueType};
use crate::attribute::{AttributeResolver, NoAttributes};
use crate::collector::{Collector, InstanceKey, NavigationPlan, Step};
use crate::error::{Error, Result};
use crate::parser::FieldPath;
use crate::simplify::{constant_value, simplify, textual_pattern};

const NUMBER_PATTERN: &str = "^[-+]?[0-9]+([.][0-9]+)?([eE][-+]?[0-9]+)?$";
const BOOLEAN_PATTERN: &str = "^(true|false|t|f|yes|no|1|0)$";
const DATETIME_PATTERN: &str = "^[0-9]{4}-[0-9]{2}-[0-9]{2}";
const TIME_PATTERN: &str = "^[0-9]{2}:[0-9]{2}(:[0-9]{2})?$";

/// Escape character of generated LIKE patterns.
const LIKE_ESCAPE: char = '!';

/// Compiled boolean condition over one root table.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    condition: SimpleExpr,
    table: String,
    alias: String,
    key_column: String,
}

impl Predicate {
    pub fn expr(&self) -> &SimpleExpr {
        &self.condition
    }

    pub fn into_expr(self) -> SimpleExpr {
        self.condition
    }

    /// Conjunction of two predicates over the same root table and alias.
    pub fn and(mut self, other: Predicate) -> Result<Self> {
        if self.table != other.table || self.alias != other.alias {
            return Err(Error::RootMismatch {
                left: format!("{} AS {}", self.table, self.alias),
                right: format!("{} AS {}", other.table, other.alias),
            });
        }
        self.condition = self.condition.and(other.condition);
        Ok(self)
    }

    /// `SELECT <alias>.<key> FROM <table> AS <alias> WHERE <condition>`
    pub fn to_select(&self) -> SelectStatement {
        Query::select()
            .column((Alias::new(&self.alias), Alias::new(&self.key_column)))
            .from_as(Alias::new(&self.table), Alias::new(&self.alias))
            .and_where(self.condition.clone())
            .to_owned()
    }

    /// PostgreSQL text with `$n` placeholders plus the ordered arguments.
    pub fn build(&self) -> (String, Values) {
        self.to_select().build(PostgresQueryBuilder)
    }

    /// PostgreSQL text with the arguments inlined, for display only.
    pub fn to_sql(&self) -> String {
        self.to_select().to_string(PostgresQueryBuilder)
    }

    /// ANDs the condition into a caller's statement. The statement must name the
    /// root table with the collector's alias.
    pub fn apply_to(&self, select: &mut SelectStatement) {
        select.and_where(self.condition.clone());
    }
}

/// Compiles policy expressions against one root binding.
#[derive(Clone, Copy)]
pub struct SqlCompiler<'a> {
    collector: &'a Collector,
    attributes: &'a dyn AttributeResolver,
}

/// Result of compiling one node.
enum Compiled {
    /// Needs nothing beyond the current scope.
    Local(SimpleExpr),
    /// Needs `steps` (non-empty, relative to the current scope) joined.
    Pending { steps: Vec<Step>, condition: SimpleExpr },
}

impl Compiled {
    fn scoped(steps: Vec<Step>, condition: SimpleExpr) -> Self {
        if steps.is_empty() {
            Compiled::Local(condition)
        } else {
            Compiled::Pending { steps, condition }
        }
    }
}

/// Where field paths are resolved from.
struct Scope<'p> {
    /// SubFilter fragment the condition is relative to.
    fragment: Option<&'p FieldPath>,
    /// Relation steps already joined by the enclosing subquery.
    depth: usize,
}

impl Scope<'_> {
    fn root() -> Self {
        Self {
            fragment: None,
            depth: 0,
        }
    }
}

/// Operand after resolution.
enum Term {
    Column { expr: SimpleExpr, value_type: ValueType },
    Value(Literal),
}

/// One conjunct of an `$and`/`$match`, possibly shared by several children.
struct Slot {
    head: Option<InstanceKey>,
    steps: Vec<Step>,
    conditions: Vec<SimpleExpr>,
}

/// Per-compilation SQL aliases: one per relation instance, in encounter order.
struct AliasAllocator {
    root: String,
    assigned: Vec<(InstanceKey, String)>,
}

impl AliasAllocator {
    fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            assigned: Vec::new(),
        }
    }

    fn alias(&mut self, key: &InstanceKey) -> String {
        if key.depth() == 0 {
            return self.root.clone();
        }
        if let Some((_, alias)) = self.assigned.iter().find(|(k, _)| k == key) {
            return alias.clone();
        }
        let base = key.alias();
        let taken = self.assigned.iter().filter(|(k, _)| k.alias() == base).count();
        let alias = if taken == 0 {
            base.to_string()
        } else {
            format!("{base}_{}", taken + 1)
        };
        self.assigned.push((key.clone(), alias.clone()));
        alias
    }
}

impl<'a> SqlCompiler<'a> {
    pub fn new(collector: &'a Collector) -> Self {
        Self {
            collector,
            attributes: &NoAttributes,
        }
    }

    /// Resolver for `$attribute` operands; defaults to [`NoAttributes`].
    pub fn with_attributes(mut self, attributes: &'a dyn AttributeResolver) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn collector(&self) -> &'a Collector {
        self.collector
    }

    /// Compiles `expr` against the root table.
    ///
    /// Row-independent parts are folded first; every field path is still resolved
    /// so a bad path fails even inside a branch that folding removes.
    pub fn evaluate(&self, expr: &PolicyExpr) -> Result<Predicate> {
        reject_field_pairs(expr)?;
        let scope = Scope::root();
        self.check_paths(expr, &scope)?;
        let simplified = simplify(expr, self.attributes)?;

        let mut aliases = AliasAllocator::new(self.collector.alias());
        let compiled = self.compile_condition(&simplified.expr, &scope, &mut aliases)?;
        let condition = materialize(compiled, &mut aliases);

        debug!(
            root = self.collector.token(),
            key = expr.key(),
            decision = ?simplified.decision,
            relations = aliases.assigned.len(),
            "Compiled policy expression"
        );
        Ok(self.predicate(condition))
    }

    /// Compiles `condition` inside a single `EXISTS` over the elements named by
    /// `fragment`. Fields of the condition must lie under the fragment.
    pub fn evaluate_within(&self, fragment: &FieldPath, condition: &PolicyExpr) -> Result<Predicate> {
        reject_field_pairs(condition)?;

        let steps = self.collector.resolve_fragment(fragment)?;
        let mut aliases = AliasAllocator::new(self.collector.alias());
        for step in &steps {
            aliases.alias(&step.instance);
        }
        let scope = Scope {
            fragment: Some(fragment),
            depth: steps.len(),
        };
        self.check_paths(condition, &scope)?;
        let simplified = simplify(condition, self.attributes)?;
        let compiled = self.compile_condition(&simplified.expr, &scope, &mut aliases)?;
        let inner = materialize(compiled, &mut aliases);
        let condition = exists(&steps, inner, &mut aliases);

        debug!(
            root = self.collector.token(),
            fragment = %fragment,
            "Compiled sub-filter"
        );
        Ok(self.predicate(condition))
    }

    fn predicate(&self, condition: SimpleExpr) -> Predicate {
        Predicate {
            condition,
            table: self.collector.table().to_string(),
            alias: self.collector.alias().to_string(),
            key_column: self.collector.key_column().to_string(),
        }
    }

    fn compile_condition(
        &self,
        expr: &PolicyExpr,
        scope: &Scope<'_>,
        aliases: &mut AliasAllocator,
    ) -> Result<Compiled> {
        match expr {
            PolicyExpr::And(children) => {
                let mut flat = Vec::new();
                flatten(children, true, &mut flat);
                self.compile_conjunction(&flat, scope, aliases)
            }
            PolicyExpr::Match(children) => {
                let members: Vec<&PolicyExpr> = children.iter().collect();
                self.compile_conjunction(&members, scope, aliases)
            }
            PolicyExpr::Or(children) => {
                let mut flat = Vec::new();
                flatten(children, false, &mut flat);
                let mut parts = Vec::with_capacity(flat.len());
                for child in flat {
                    let compiled = self.compile_condition(child, scope, aliases)?;
                    parts.push(materialize(compiled, aliases));
                }
                Ok(Compiled::Local(combine_conditions(parts, SimpleExpr::or, false)))
            }
            PolicyExpr::Not(child) => {
                let compiled = self.compile_condition(child, scope, aliases)?;
                Ok(Compiled::Local(negate(materialize(compiled, aliases))))
            }
            leaf => self.compile_leaf(leaf, scope, aliases),
        }
    }

    /// Groups children by the relation instance their paths enter first.
    fn compile_conjunction(
        &self,
        children: &[&PolicyExpr],
        scope: &Scope<'_>,
        aliases: &mut AliasAllocator,
    ) -> Result<Compiled> {
        let mut slots: Vec<Slot> = Vec::new();

        for child in children {
            match self.compile_condition(child, scope, aliases)? {
                Compiled::Local(condition) => slots.push(Slot {
                    head: None,
                    steps: Vec::new(),
                    conditions: vec![condition],
                }),
                Compiled::Pending { steps, condition } => {
                    let head = steps[0].instance.clone();
                    match slots.iter_mut().find(|slot| slot.head.as_ref() == Some(&head)) {
                        Some(slot) => {
                            for step in steps {
                                if !slot.steps.iter().any(|s| s.instance == step.instance) {
                                    slot.steps.push(step);
                                }
                            }
                            slot.conditions.push(condition);
                        }
                        None => slots.push(Slot {
                            head: Some(head),
                            steps,
                            conditions: vec![condition],
                        }),
                    }
                }
            }
        }

        if slots.len() == 1 && slots[0].head.is_some() {
            let slot = slots.remove(0);
            let condition = combine_conditions(slot.conditions, SimpleExpr::and, true);
            return Ok(Compiled::Pending {
                steps: slot.steps,
                condition,
            });
        }

        let mut parts = Vec::with_capacity(slots.len());
        for slot in slots {
            let condition = combine_conditions(slot.conditions, SimpleExpr::and, true);
            parts.push(match slot.head {
                Some(_) => exists(&slot.steps, condition, aliases),
                None => condition,
            });
        }
        Ok(Compiled::Local(combine_conditions(parts, SimpleExpr::and, true)))
    }

    fn compile_leaf(
        &self,
        expr: &PolicyExpr,
        scope: &Scope<'_>,
        aliases: &mut AliasAllocator,
    ) -> Result<Compiled> {
        match expr.leaf() {
            Some(Leaf::Boolean(value)) => Ok(Compiled::Local(constant(value))),
            Some(Leaf::Compare(op, items)) => self.compile_comparison(op, items, scope, aliases),
            Some(Leaf::Pattern(op, items)) => self.compile_pattern(op, items, scope, aliases),
            None => Err(Error::structure(format!("{} is not a leaf", expr.key()))),
        }
    }

    fn compile_comparison(
        &self,
        op: ComparisonOp,
        items: &[Operand; 2],
        scope: &Scope<'_>,
        aliases: &mut AliasAllocator,
    ) -> Result<Compiled> {
        // Keep the field on the left.
        let (op, left, right) = if !items[0].is_field() && items[1].is_field() {
            (op.flipped(), &items[1], &items[0])
        } else {
            (op, &items[0], &items[1])
        };
        let operator = op.as_str();

        let mut steps = Vec::new();
        let left = self.term(left, operator, scope, aliases, &mut steps)?;
        let right = self.term(right, operator, scope, aliases, &mut steps)?;

        let condition = match (left, right) {
            (Term::Column { expr, value_type }, Term::Value(literal)) => {
                let column = coerce(operator, expr, value_type, &literal)?;
                compile_comparison_expr(op, column, literal.to_value().into())
            }
            // Normally folded away before compilation.
            (Term::Value(left), Term::Value(right)) => constant(left.compare(op, &right)?),
            (_, Term::Column { .. }) => {
                return Err(Error::structure(format!(
                    "{operator}: unsupported operand combination"
                )))
            }
        };
        Ok(Compiled::scoped(steps, condition))
    }

    fn compile_pattern(
        &self,
        op: StringOp,
        items: &[Operand; 2],
        scope: &Scope<'_>,
        aliases: &mut AliasAllocator,
    ) -> Result<Compiled> {
        let operator = op.as_str();
        let [value, pattern] = items;
        if pattern.is_field() {
            return Err(Error::structure(format!(
                "{operator}: the pattern (second operand) must be a literal, not a field"
            )));
        }

        let mut steps = Vec::new();
        let value = self.term(value, operator, scope, aliases, &mut steps)?;
        let pattern = match self.term(pattern, operator, scope, aliases, &mut steps)? {
            Term::Value(literal) => textual_pattern(operator, literal)?,
            Term::Column { .. } => {
                return Err(Error::structure(format!("{operator}: the pattern must be a literal")))
            }
        };

        let subject = match value {
            Term::Column { expr, value_type } if value_type.is_textual() => expr,
            Term::Column { expr, .. } => text_cast(expr),
            Term::Value(literal) => {
                return Ok(Compiled::Local(constant(op.matches(&literal.to_text(), &pattern)?)))
            }
        };

        let condition = match op {
            StringOp::Contains => like(subject, "'%' || $2 || '%'", &pattern),
            StringOp::StartsWith => like(subject, "$2 || '%'", &pattern),
            StringOp::EndsWith => like(subject, "'%' || $2", &pattern),
            StringOp::Regex => Expr::cust_with_exprs("($1 ~ $2)", [subject, Expr::val(pattern).into()]),
        };
        Ok(Compiled::scoped(steps, condition))
    }

    /// Resolves an operand. A field's pending relation steps land in `steps`.
    fn term(
        &self,
        operand: &Operand,
        operator: &str,
        scope: &Scope<'_>,
        aliases: &mut AliasAllocator,
        steps: &mut Vec<Step>,
    ) -> Result<Term> {
        let (base, target) = operand.unwrap_cast();

        if let Operand::Field(path) = base {
            let (expr, value_type, pending) = self.resolve_column(path, scope, aliases)?;
            *steps = pending;
            return Ok(match target {
                Some(target) => Term::Column {
                    expr: cast_column(expr, value_type, target),
                    value_type: target,
                },
                None => Term::Column { expr, value_type },
            });
        }

        match constant_value(operand, operator, self.attributes)? {
            Some(literal) => Ok(Term::Value(literal)),
            None => {
                let attribute = match base {
                    Operand::Attribute(item) => item.to_string(),
                    other => format!("{other:?}"),
                };
                debug!(attribute = %attribute, operator, "Attribute has no value");
                Err(Error::UnresolvedAttribute { attribute })
            }
        }
    }

    /// Resolves every field of `expr` without compiling anything.
    fn check_paths(&self, expr: &PolicyExpr, scope: &Scope<'_>) -> Result<()> {
        for path in expr.fields() {
            self.resolve_path(path, scope)?;
        }
        Ok(())
    }

    /// Plan for `path`, rebased onto the scope's fragment when there is one.
    fn resolve_path(&self, path: &FieldPath, scope: &Scope<'_>) -> Result<NavigationPlan> {
        match scope.fragment {
            Some(fragment) => {
                let rebased = path.rebase(fragment).ok_or_else(|| {
                    Error::unresolvable(
                        path.to_string(),
                        format!("field lies outside the fragment `{fragment}`"),
                    )
                })?;
                self.collector.resolve(&rebased)
            }
            None => self.collector.resolve(path),
        }
    }

    /// Column expression, its type, and the relation steps not yet joined by the scope.
    fn resolve_column(
        &self,
        path: &FieldPath,
        scope: &Scope<'_>,
        aliases: &mut AliasAllocator,
    ) -> Result<(SimpleExpr, ValueType, Vec<Step>)> {
        let mut plan = self.resolve_path(path, scope)?;
        for step in &plan.steps {
            aliases.alias(&step.instance);
        }
        let owner = match plan.steps.last() {
            Some(step) => aliases.alias(&step.instance),
            None => plan.root_alias.clone(),
        };
        let column: SimpleExpr =
            Expr::col((Alias::new(owner), Alias::new(plan.column.column.as_str()))).into();
        let pending = plan.steps.split_off(scope.depth.min(plan.steps.len()));
        Ok((column, plan.column.value_type, pending))
    }
}

/// Rejects any leaf comparing two fields, anywhere in the tree.
pub(crate) fn reject_field_pairs(expr: &PolicyExpr) -> Result<()> {
    match expr {
        PolicyExpr::And(children) | PolicyExpr::Or(children) | PolicyExpr::Match(children) => {
            children.iter().try_for_each(reject_field_pairs)
        }
        PolicyExpr::Not(child) => reject_field_pairs(child),
        leaf => match leaf.leaf() {
            Some(Leaf::Compare(_, items)) | Some(Leaf::Pattern(_, items)) => {
                match (items[0].field_path(), items[1].field_path()) {
                    (Some(left), Some(right)) => {
                        warn!(
                            operator = leaf.key(),
                            left = %left,
                            right = %right,
                            "Rejected field-to-field comparison"
                        );
                        Err(Error::FieldToField {
                            operator: leaf.key().to_string(),
                            left: left.to_string(),
                            right: right.to_string(),
                        })
                    }
                    _ => Ok(()),
                }
            }
            _ => Ok(()),
        },
    }
}

/// Same-kind nested `$and`/`$or` collapse into one list.
fn flatten<'e>(children: &'e [PolicyExpr], conjunction: bool, out: &mut Vec<&'e PolicyExpr>) {
    for child in children {
        match (child, conjunction) {
            (PolicyExpr::And(inner), true) | (PolicyExpr::Or(inner), false) => {
                flatten(inner, conjunction, out)
            }
            _ => out.push(child),
        }
    }
}

fn materialize(compiled: Compiled, aliases: &mut AliasAllocator) -> SimpleExpr {
    match compiled {
        Compiled::Local(condition) => condition,
        Compiled::Pending { steps, condition } => exists(&steps, condition, aliases),
    }
}

/// `EXISTS (SELECT 1 FROM s0 INNER JOIN s1 ON ... WHERE s0 correlates AND condition)`
fn exists(steps: &[Step], condition: SimpleExpr, aliases: &mut AliasAllocator) -> SimpleExpr {
    let mut select = Query::select();
    select.expr(Expr::cust("1"));

    for (i, step) in steps.iter().enumerate() {
        let alias = aliases.alias(&step.instance);
        let parent = aliases.alias(&step.instance.parent());
        let mut on = Expr::col((Alias::new(&alias), Alias::new(&step.child_column)))
            .equals((Alias::new(&parent), Alias::new(&step.parent_column)));
        if let Some(pin) = &step.pin {
            on = on.and(Expr::col((Alias::new(&alias), Alias::new(&pin.column))).eq(i64::from(pin.index)));
        }
        if i == 0 {
            select.from_as(Alias::new(&step.table), Alias::new(&alias));
            select.and_where(on);
        } else {
            select.join_as(JoinType::InnerJoin, Alias::new(&step.table), Alias::new(&alias), on);
        }
    }
    select.and_where(condition);

    Expr::exists(select)
}

fn combine_conditions(
    conditions: Vec<SimpleExpr>,
    combine: fn(SimpleExpr, SimpleExpr) -> SimpleExpr,
    empty: bool,
) -> SimpleExpr {
    conditions
        .into_iter()
        .reduce(combine)
        .unwrap_or_else(|| constant(empty))
}

fn constant(value: bool) -> SimpleExpr {
    SimpleExpr::Constant(Value::Bool(Some(value)))
}

/// Two-valued negation: TRUE wherever `condition` is FALSE or NULL.
fn negate(condition: SimpleExpr) -> SimpleExpr {
    Expr::cust_with_exprs("($1) IS NOT TRUE", [condition])
}

fn compile_comparison_expr(op: ComparisonOp, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
    let left = Expr::expr(left);
    match op {
        ComparisonOp::Eq => left.eq(right),
        ComparisonOp::Ne => left.ne(right),
        ComparisonOp::Gt => left.gt(right),
        ComparisonOp::Ge => left.gte(right),
        ComparisonOp::Lt => left.lt(right),
        ComparisonOp::Le => left.lte(right),
    }
}

/// Makes a column comparable with a literal.
fn coerce(operator: &str, column: SimpleExpr, column_type: ValueType, literal: &Literal) -> Result<SimpleExpr> {
    let literal_type = literal.value_type();
    if column_type == literal_type || (column_type.is_textual() && literal_type.is_textual()) {
        Ok(column)
    } else if column_type.is_textual() {
        Ok(guarded_cast(column, literal_type))
    } else if literal_type.is_textual() {
        Ok(text_cast(column))
    } else {
        Err(Error::type_mismatch(
            operator,
            format!("cannot compare a {column_type} field with a {literal_type} literal"),
        ))
    }
}

fn cast_column(column: SimpleExpr, from: ValueType, to: ValueType) -> SimpleExpr {
    if from == to || (from.is_textual() && to.is_textual()) {
        column
    } else if to.is_textual() {
        text_cast(column)
    } else {
        guarded_cast(column, to)
    }
}

fn text_cast(column: SimpleExpr) -> SimpleExpr {
    Expr::cust_with_exprs("($1)::text", [column])
}

/// Casts only values that look like `target`; anything else becomes NULL instead
/// of failing the whole statement.
fn guarded_cast(column: SimpleExpr, target: ValueType) -> SimpleExpr {
    let (matcher, pattern) = match target {
        ValueType::Number => ("~", NUMBER_PATTERN),
        ValueType::Boolean => ("~*", BOOLEAN_PATTERN),
        ValueType::DateTime => ("~", DATETIME_PATTERN),
        ValueType::Time => ("~", TIME_PATTERN),
        ValueType::Text | ValueType::Hex => return text_cast(column),
    };
    Expr::cust_with_exprs(
        format!(
            "(CASE WHEN ($1)::text {matcher} '{pattern}' THEN (($1)::text)::{} END)",
            target.sql_type()
        ),
        [column],
    )
}

fn like(subject: SimpleExpr, pattern_template: &str, pattern: &str) -> SimpleExpr {
    Expr::cust_with_exprs(
        format!("($1 LIKE {pattern_template} ESCAPE '{LIKE_ESCAPE}')"),
        [subject, Expr::val(escape_like(pattern)).into()],
    )
}

/// Escapes LIKE wildcards so the literal matches verbatim.
fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == LIKE_ESCAPE || c == '%' || c == '_' {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

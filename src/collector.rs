//! Schema binding: maps root-qualified field paths onto tables, joins and columns.
//!
//! A [`Collector`] is built once per root from a [`RootConfig`] and is read-only
//! afterwards, so it can be shared freely across threads. Resolution turns a
//! [`FieldPath`] into a [`NavigationPlan`]: the chain of relation steps that leave
//! the root table, any positional pins, and the terminal column.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use tracing::trace;

use crate::ast::ValueType;
use crate::config::{Cardinality, MemberConfig, RelationConfig, RootConfig, SchemaConfig};
use crate::error::{Error, Result};
use crate::parser::{parse_relative, FieldPath, Segment, Selector};

/// A column at the end of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    pub column: String,
    pub value_type: ValueType,
}

/// `position = index` restriction produced by `[n]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pin {
    pub column: String,
    pub index: u32,
}

/// Identity of one joined row set: the relation aliases from the root down to
/// this step, each with its pinned index (`None` for `[]` and one-relations).
///
/// Two steps with equal keys denote the same element, which is what lets sibling
/// predicates share a subquery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey(Vec<(String, Option<u32>)>);

impl InstanceKey {
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Binding alias of the last relation.
    pub fn alias(&self) -> &str {
        self.0.last().map(|(alias, _)| alias.as_str()).unwrap_or("")
    }

    /// Key of the enclosing instance; the root has the empty key.
    pub fn parent(&self) -> InstanceKey {
        InstanceKey(self.0[..self.0.len().saturating_sub(1)].to_vec())
    }

    pub fn is_prefix_of(&self, other: &InstanceKey) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (alias, pin)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match pin {
                Some(n) => write!(f, "{alias}[{n}]")?,
                None => write!(f, "{alias}")?,
            }
        }
        Ok(())
    }
}

/// One relation traversed by a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub instance: InstanceKey,
    pub table: String,
    /// `child.child_column = parent.parent_column`
    pub child_column: String,
    pub parent_column: String,
    pub pin: Option<Pin>,
}

/// Result of resolving a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationPlan {
    pub path: String,
    pub root_alias: String,
    /// Relations leaving the root table, outermost first.
    pub steps: Vec<Step>,
    /// Column on the last step, or on the root when `steps` is empty.
    pub column: ColumnBinding,
    /// True iff the path contains `[]`.
    pub quantified: bool,
}

impl NavigationPlan {
    /// Paths that leave the root table need an EXISTS subquery.
    pub fn is_correlated(&self) -> bool {
        !self.steps.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Node {
    fields: BTreeMap<String, Member>,
}

#[derive(Debug, Clone)]
enum Member {
    Column(ColumnBinding),
    Group(Node),
    Relation(Box<Relation>),
}

#[derive(Debug, Clone)]
struct Relation {
    table: String,
    alias: String,
    cardinality: Cardinality,
    child_column: String,
    parent_column: String,
    position: Option<String>,
    terminal: Option<Vec<Segment>>,
    node: Node,
}

/// Binding of one root token.
#[derive(Debug, Clone)]
pub struct Collector {
    token: String,
    table: String,
    alias: String,
    key_column: String,
    root: Node,
}

struct Walk {
    steps: Vec<Step>,
    column: Option<ColumnBinding>,
    quantified: bool,
}

impl Collector {
    /// Builds and validates the binding for `token` (e.g. `$aasdesc`).
    pub fn from_config(token: &str, config: &RootConfig) -> Result<Self> {
        let valid_token = token
            .strip_prefix('$')
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        if !valid_token {
            return Err(Error::config(format!("invalid root token `{token}`")));
        }
        require_name(token, "table", &config.table)?;
        require_name(token, "key_column", &config.key_column)?;

        let alias = config.alias.clone().unwrap_or_else(|| config.table.clone());
        let mut aliases = BTreeSet::from([alias.clone()]);
        let root = build_node(token, &config.fields, &mut aliases)?;

        Ok(Self {
            token: token.to_string(),
            table: config.table.clone(),
            alias,
            key_column: config.key_column.clone(),
            root,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Alias the caller's query uses for the root table.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Resolves a path ending on a column.
    pub fn resolve(&self, path: &FieldPath) -> Result<NavigationPlan> {
        let walk = self.walk(path, false)?;
        let column = walk
            .column
            .ok_or_else(|| Error::unresolvable(path.to_string(), "path does not end on a column"))?;
        let plan = NavigationPlan {
            path: path.to_string(),
            root_alias: self.alias.clone(),
            steps: walk.steps,
            column,
            quantified: walk.quantified,
        };
        trace!(
            path = %plan.path,
            steps = plan.steps.len(),
            column = %plan.column.column,
            quantified = plan.quantified,
            "Resolved field path"
        );
        Ok(plan)
    }

    /// Resolves a fragment, which must end on a repeated structure.
    pub fn resolve_fragment(&self, path: &FieldPath) -> Result<Vec<Step>> {
        let walk = self.walk(path, true)?;
        if walk.column.is_some() {
            return Err(Error::unresolvable(
                path.to_string(),
                "fragment must name a repeated structure, not a column",
            ));
        }
        Ok(walk.steps)
    }

    fn walk(&self, path: &FieldPath, fragment: bool) -> Result<Walk> {
        if path.root() != self.token {
            return Err(Error::unresolvable(
                path.to_string(),
                format!("path is not rooted at `{}`", self.token),
            ));
        }
        let fail = |reason: String| Error::unresolvable(path.to_string(), reason);

        let mut queue: VecDeque<Segment> = path.segments().iter().cloned().collect();
        let mut node = &self.root;
        let mut key: Vec<(String, Option<u32>)> = Vec::new();
        let mut steps = Vec::new();
        let mut quantified = false;

        while let Some(segment) = queue.pop_front() {
            let member = node
                .fields
                .get(&segment.name)
                .ok_or_else(|| fail(format!("unknown field `{}`", segment.name)))?;

            match member {
                Member::Column(column) => {
                    not_repeated(path, &segment)?;
                    if !queue.is_empty() {
                        return Err(fail(format!("`{}` is a column and has no fields", segment.name)));
                    }
                    return Ok(Walk {
                        steps,
                        column: Some(column.clone()),
                        quantified,
                    });
                }
                Member::Group(inner) => {
                    not_repeated(path, &segment)?;
                    if queue.is_empty() {
                        return Err(fail(format!(
                            "path ends on structure `{}`; select one of its fields",
                            segment.name
                        )));
                    }
                    node = inner;
                }
                Member::Relation(relation) => {
                    let pin = match (relation.cardinality, segment.selector) {
                        (Cardinality::Many, Selector::Any) => {
                            quantified = true;
                            None
                        }
                        (Cardinality::Many, Selector::Fixed(index)) => match &relation.position {
                            Some(column) => Some(Pin {
                                column: column.clone(),
                                index,
                            }),
                            None => {
                                return Err(Error::UnsupportedIndex {
                                    path: path.to_string(),
                                    segment: segment.name.clone(),
                                })
                            }
                        },
                        (Cardinality::Many, Selector::None) => {
                            return Err(fail(format!(
                                "`{0}` is repeated; address it as `{0}[]` or `{0}[n]`",
                                segment.name
                            )))
                        }
                        (Cardinality::One, _) => {
                            not_repeated(path, &segment)?;
                            None
                        }
                    };

                    key.push((relation.alias.clone(), pin.as_ref().map(|p| p.index)));
                    steps.push(Step {
                        instance: InstanceKey(key.clone()),
                        table: relation.table.clone(),
                        child_column: relation.child_column.clone(),
                        parent_column: relation.parent_column.clone(),
                        pin,
                    });

                    if queue.is_empty() {
                        if fragment {
                            return Ok(Walk {
                                steps,
                                column: None,
                                quantified,
                            });
                        }
                        match &relation.terminal {
                            Some(terminal) => queue.extend(terminal.iter().cloned()),
                            None => {
                                return Err(fail(format!(
                                    "path ends on structure `{}`; select one of its fields",
                                    segment.name
                                )))
                            }
                        }
                    }
                    node = &relation.node;
                }
            }
        }

        Err(fail("path does not end on a column".to_string()))
    }
}

/// `[n]` or `[]` on something that is not a repeated structure.
fn not_repeated(path: &FieldPath, segment: &Segment) -> Result<()> {
    match segment.selector {
        Selector::None => Ok(()),
        Selector::Fixed(_) => Err(Error::UnsupportedIndex {
            path: path.to_string(),
            segment: segment.name.clone(),
        }),
        Selector::Any => Err(Error::unresolvable(
            path.to_string(),
            format!("`{}` is not a repeated structure", segment.name),
        )),
    }
}

fn require_name(token: &str, what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::config(format!("{token}: `{what}` must not be empty")));
    }
    Ok(())
}

fn build_node(
    token: &str,
    fields: &BTreeMap<String, MemberConfig>,
    aliases: &mut BTreeSet<String>,
) -> Result<Node> {
    let mut built = BTreeMap::new();
    for (name, member) in fields {
        let member = match member {
            MemberConfig::Column { column, value_type } => {
                require_name(token, name, column)?;
                Member::Column(ColumnBinding {
                    column: column.clone(),
                    value_type: *value_type,
                })
            }
            MemberConfig::Group { fields } => Member::Group(build_node(token, fields, aliases)?),
            MemberConfig::Relation(relation) => {
                Member::Relation(Box::new(build_relation(token, name, relation, aliases)?))
            }
        };
        built.insert(name.clone(), member);
    }
    Ok(Node { fields: built })
}

fn build_relation(
    token: &str,
    name: &str,
    config: &RelationConfig,
    aliases: &mut BTreeSet<String>,
) -> Result<Relation> {
    require_name(token, "table", &config.table)?;
    require_name(token, "join.child_column", &config.join.child_column)?;
    require_name(token, "join.parent_column", &config.join.parent_column)?;
    if !aliases.insert(config.alias.clone()) {
        return Err(Error::config(format!(
            "{token}: alias `{}` of `{name}` is used more than once",
            config.alias
        )));
    }
    if config.position.is_some() && config.cardinality == Cardinality::One {
        return Err(Error::config(format!(
            "{token}: `{name}` is a one-relation and cannot declare a position column"
        )));
    }
    let terminal = config
        .terminal
        .as_deref()
        .map(parse_relative)
        .transpose()
        .map_err(|e| Error::config(format!("{token}: terminal of `{name}`: {e}")))?;

    Ok(Relation {
        table: config.table.clone(),
        alias: config.alias.clone(),
        cardinality: config.cardinality,
        child_column: config.join.child_column.clone(),
        parent_column: config.join.parent_column.clone(),
        position: config.position.clone(),
        terminal,
        node: build_node(token, &config.fields, aliases)?,
    })
}

/// Immutable set of collectors, one per root token.
#[derive(Debug, Clone)]
pub struct CollectorRegistry {
    collectors: BTreeMap<String, Collector>,
}

impl CollectorRegistry {
    pub fn from_config(config: &SchemaConfig) -> Result<Self> {
        let collectors = config
            .roots
            .iter()
            .map(|(token, root)| Ok((token.clone(), Collector::from_config(token, root)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { collectors })
    }

    /// Registry over the built-in bindings.
    pub fn builtin() -> Result<Self> {
        Self::from_config(&SchemaConfig::builtin())
    }

    pub fn get(&self, root: &str) -> Result<&Collector> {
        self.collectors.get(root).ok_or_else(|| Error::UnknownRoot {
            root: root.to_string(),
        })
    }

    /// Dispatches on the path's root.
    pub fn resolve(&self, path: &FieldPath) -> Result<NavigationPlan> {
        self.get(path.root())?.resolve(path)
    }

    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.collectors.keys().map(String::as_str)
    }
}

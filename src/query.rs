//! Query envelope: a top-level condition plus fragment-scoped sub-filters.
//!
//! ```json
//! {"Query": {
//!     "$condition": {"$eq": [{"$field": "$aasdesc#idShort"}, {"$strVal": "motor"}]},
//!     "$filter": [{
//!         "FRAGMENT": "$aasdesc#specificAssetIds[]",
//!         "CONDITION": {"$eq": [{"$field": "$aasdesc#specificAssetIds[].name"}, {"$strVal": "serial"}]}
//!     }]
//! }}
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::Expr;
use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::parser::{FieldPath, Selector};
use crate::sql_compiler::{Predicate, SqlCompiler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Query {
    #[serde(rename = "$condition")]
    pub condition: Expr,
    #[serde(rename = "$filter", default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<SubFilter>,
}

/// Condition evaluated against the elements of one repeated structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubFilter {
    #[serde(rename = "FRAGMENT")]
    pub fragment: FieldPath,
    #[serde(rename = "CONDITION")]
    pub condition: Expr,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope<Q> {
    #[serde(rename = "Query")]
    query: Q,
}

impl Query {
    pub fn new(condition: Expr) -> Self {
        Self {
            condition,
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, fragment: FieldPath, condition: Expr) -> Self {
        self.filters.push(SubFilter {
            fragment,
            condition,
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.condition.validate()?;
        for filter in &self.filters {
            if filter.fragment.last().selector == Selector::None {
                return Err(Error::structure(format!(
                    "FRAGMENT `{}` must end on an indexed segment",
                    filter.fragment
                )));
            }
            filter.condition.validate()?;
        }
        Ok(())
    }

    /// `{"Query": {...}}` text of this query.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&Envelope { query: self })?)
    }
}

impl FromStr for Query {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_query(s.as_bytes())
    }
}

/// Parses and validates a `{"Query": ...}` document.
pub fn parse_query(bytes: &[u8]) -> Result<Query> {
    let Envelope { query } = serde_json::from_slice::<Envelope<Query>>(bytes)?;
    query.validate()?;
    debug!(
        root_key = query.condition.key(),
        filters = query.filters.len(),
        "Parsed query envelope"
    );
    Ok(query)
}

/// Root condition AND one `EXISTS` per sub-filter.
pub fn compile_query(query: &Query, collector: &Collector) -> Result<Predicate> {
    compile_query_with(query, &SqlCompiler::new(collector))
}

/// Like [`compile_query`] with a configured compiler (e.g. one carrying claims).
pub fn compile_query_with(query: &Query, compiler: &SqlCompiler<'_>) -> Result<Predicate> {
    let mut predicate = compiler.evaluate(&query.condition)?;
    for filter in &query.filters {
        let scoped = compiler.evaluate_within(&filter.fragment, &filter.condition)?;
        predicate = predicate.and(scoped)?;
    }
    debug!(
        root = compiler.collector().token(),
        filters = query.filters.len(),
        "Compiled query"
    );
    Ok(predicate)
}

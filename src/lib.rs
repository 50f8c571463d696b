//! Compiler from JSON access-rule documents to parameterized SQL predicates.
//!
//! A policy is parsed into an [`ast::Expr`], its `$field` paths are resolved through
//! a per-root [`Collector`], and the result is a [`Predicate`] that can be merged
//! into a sea-query `SelectStatement` or rendered as PostgreSQL text plus arguments.
//!
//! ```no_run
//! use abac_sql::{parse_expression, CollectorRegistry, SqlCompiler};
//!
//! let registry = CollectorRegistry::builtin()?;
//! let expr = parse_expression(br#"{"$eq": [{"$field": "$sm#idShort"}, {"$strVal": "motor"}]}"#)?;
//! let predicate = SqlCompiler::new(registry.get("$sm")?).evaluate(&expr)?;
//! let (sql, args) = predicate.build();
//! # Ok::<(), abac_sql::Error>(())
//! ```

pub mod ast;
pub mod attribute;
pub mod collector;
pub mod config;
pub mod error;
pub mod lexer;
pub mod model_eval;
pub mod parser;
pub mod query;
pub mod simplify;
pub mod sql_compiler;
pub mod token;

pub use ast::parse_expression;
pub use collector::{Collector, CollectorRegistry};
pub use error::{Error, ErrorKind, Result};
pub use model_eval::ModelEvaluator;
pub use query::{compile_query, parse_query};
pub use simplify::{simplify, Decision, Simplified};
pub use sql_compiler::{Predicate, SqlCompiler};

//! `$attribute` operands and their resolution against caller claims.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::ast::Literal;

/// `{"CLAIM": name}`, `{"GLOBAL": token}` or `{"REFERENCE": name}`.
///
/// Serde's external tagging enforces the single-key shape and restricts
/// GLOBAL to the [`GlobalToken`] enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeItem {
    #[serde(rename = "CLAIM")]
    Claim(String),
    #[serde(rename = "GLOBAL")]
    Global(GlobalToken),
    #[serde(rename = "REFERENCE")]
    Reference(String),
}

impl fmt::Display for AttributeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeItem::Claim(name) => write!(f, "CLAIM {name}"),
            AttributeItem::Global(token) => write!(f, "GLOBAL {}", token.as_str()),
            AttributeItem::Reference(name) => write!(f, "REFERENCE {name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GlobalToken {
    LocalNow,
    UtcNow,
    ClientNow,
    Anonymous,
}

impl GlobalToken {
    pub fn as_str(self) -> &'static str {
        match self {
            GlobalToken::LocalNow => "LOCALNOW",
            GlobalToken::UtcNow => "UTCNOW",
            GlobalToken::ClientNow => "CLIENTNOW",
            GlobalToken::Anonymous => "ANONYMOUS",
        }
    }
}

/// Looks up the concrete value of an attribute at compile time.
///
/// `None` means the caller has no such attribute. A leaf that still needs the
/// value after simplification fails with [`Error::UnresolvedAttribute`].
///
/// [`Error::UnresolvedAttribute`]: crate::error::Error::UnresolvedAttribute
pub trait AttributeResolver {
    fn resolve(&self, item: &AttributeItem) -> Option<Literal>;
}

/// Resolver that knows nothing; every attribute is absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAttributes;

impl AttributeResolver for NoAttributes {
    fn resolve(&self, _item: &AttributeItem) -> Option<Literal> {
        None
    }
}

/// Claims of the calling subject plus optional named references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    values: BTreeMap<String, JsonValue>,
    #[serde(skip)]
    references: BTreeMap<String, String>,
}

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with_reference(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.references.insert(name.into(), value.into());
        self
    }

    /// Scalar text of a claim; arrays yield their first element.
    pub fn claim_text(&self, name: &str) -> Option<String> {
        scalar_text(self.values.get(name)?)
    }

    fn global(&self, token: GlobalToken) -> Option<Literal> {
        match token {
            GlobalToken::Anonymous => Some(Literal::String(token.as_str().to_string())),
            _ => {
                let text = self.claim_text(token.as_str())?;
                Some(match DateTime::parse_from_rfc3339(&text) {
                    Ok(dt) => Literal::DateTime(dt.with_timezone(&Utc)),
                    Err(_) => Literal::String(text),
                })
            }
        }
    }
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Array(items) => items.first().and_then(scalar_text),
        other => Some(other.to_string()),
    }
}

impl AttributeResolver for Claims {
    fn resolve(&self, item: &AttributeItem) -> Option<Literal> {
        match item {
            AttributeItem::Claim(name) => self.claim_text(name).map(Literal::String),
            AttributeItem::Global(token) => self.global(*token),
            AttributeItem::Reference(name) => {
                self.references.get(name).cloned().map(Literal::String)
            }
        }
    }
}

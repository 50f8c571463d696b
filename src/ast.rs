//! 策略表达式的 AST
//!
//! JSON 键到变体的映射由 serde 的外部标签枚举完成：每个对象必须恰好有一个键，
//! 未知键直接报错。长度与嵌套规则由 [`Expr::validate`] 在同一遍中检查。

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use regex::Regex;
use sea_query::Value;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attribute::AttributeItem;
use crate::error::{Error, Result};
use crate::parser::FieldPath;

/// 比较运算的两个操作数
pub type ComparisonItems = [Operand; 2];

/// 字符串谓词的两个操作数，第二个为模式
pub type StringItems = [Operand; 2];

/// 逻辑表达式，每个变体对应一个 JSON 键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    #[serde(rename = "$and")]
    And(Vec<Expr>),
    #[serde(rename = "$or")]
    Or(Vec<Expr>),
    #[serde(rename = "$not")]
    Not(Box<Expr>),
    /// 嵌套分组，成员只能是叶子或 `$match`
    #[serde(rename = "$match")]
    Match(Vec<Expr>),
    #[serde(rename = "$eq")]
    Eq(ComparisonItems),
    #[serde(rename = "$ne")]
    Ne(ComparisonItems),
    #[serde(rename = "$gt")]
    Gt(ComparisonItems),
    #[serde(rename = "$ge")]
    Ge(ComparisonItems),
    #[serde(rename = "$lt")]
    Lt(ComparisonItems),
    #[serde(rename = "$le")]
    Le(ComparisonItems),
    #[serde(rename = "$contains")]
    Contains(StringItems),
    #[serde(rename = "$starts-with")]
    StartsWith(StringItems),
    #[serde(rename = "$ends-with")]
    EndsWith(StringItems),
    #[serde(rename = "$regex")]
    Regex(StringItems),
    /// 常量真/假
    #[serde(rename = "$boolean")]
    Boolean(bool),
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "$eq",
            ComparisonOp::Ne => "$ne",
            ComparisonOp::Gt => "$gt",
            ComparisonOp::Ge => "$ge",
            ComparisonOp::Lt => "$lt",
            ComparisonOp::Le => "$le",
        }
    }

    /// 交换左右操作数后的等价运算符
    pub fn flipped(self) -> Self {
        match self {
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Ge => ComparisonOp::Le,
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Le => ComparisonOp::Ge,
            other => other,
        }
    }

    /// 左操作数与右操作数的大小关系是否满足本运算符
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Eq => ordering == Ordering::Equal,
            ComparisonOp::Ne => ordering != Ordering::Equal,
            ComparisonOp::Gt => ordering == Ordering::Greater,
            ComparisonOp::Ge => ordering != Ordering::Less,
            ComparisonOp::Lt => ordering == Ordering::Less,
            ComparisonOp::Le => ordering != Ordering::Greater,
        }
    }
}

/// 字符串匹配运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

impl StringOp {
    pub fn as_str(self) -> &'static str {
        match self {
            StringOp::Contains => "$contains",
            StringOp::StartsWith => "$starts-with",
            StringOp::EndsWith => "$ends-with",
            StringOp::Regex => "$regex",
        }
    }

    /// 在内存中对文本求值，`pattern` 按字面匹配（`$regex` 除外）
    pub fn matches(self, value: &str, pattern: &str) -> Result<bool> {
        Ok(match self {
            StringOp::Contains => value.contains(pattern),
            StringOp::StartsWith => value.starts_with(pattern),
            StringOp::EndsWith => value.ends_with(pattern),
            StringOp::Regex => Regex::new(pattern)
                .map_err(|e| Error::structure(format!("$regex: invalid pattern {pattern:?}: {e}")))?
                .is_match(value),
        })
    }
}

/// 叶子节点的统一视图
#[derive(Debug, Clone, Copy)]
pub enum Leaf<'a> {
    Boolean(bool),
    Compare(ComparisonOp, &'a ComparisonItems),
    Pattern(StringOp, &'a StringItems),
}

impl Expr {
    pub fn and(children: Vec<Expr>) -> Self {
        Expr::And(children)
    }

    pub fn or(children: Vec<Expr>) -> Self {
        Expr::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Expr) -> Self {
        Expr::Not(Box::new(child))
    }

    pub fn compare(op: ComparisonOp, left: Operand, right: Operand) -> Self {
        let items = [left, right];
        match op {
            ComparisonOp::Eq => Expr::Eq(items),
            ComparisonOp::Ne => Expr::Ne(items),
            ComparisonOp::Gt => Expr::Gt(items),
            ComparisonOp::Ge => Expr::Ge(items),
            ComparisonOp::Lt => Expr::Lt(items),
            ComparisonOp::Le => Expr::Le(items),
        }
    }

    pub fn pattern(op: StringOp, value: Operand, pattern: Operand) -> Self {
        let items = [value, pattern];
        match op {
            StringOp::Contains => Expr::Contains(items),
            StringOp::StartsWith => Expr::StartsWith(items),
            StringOp::EndsWith => Expr::EndsWith(items),
            StringOp::Regex => Expr::Regex(items),
        }
    }

    /// 节点的 JSON 键
    pub fn key(&self) -> &'static str {
        match self {
            Expr::And(_) => "$and",
            Expr::Or(_) => "$or",
            Expr::Not(_) => "$not",
            Expr::Match(_) => "$match",
            Expr::Boolean(_) => "$boolean",
            other => match other.leaf() {
                Some(Leaf::Compare(op, _)) => op.as_str(),
                Some(Leaf::Pattern(op, _)) => op.as_str(),
                _ => "$boolean",
            },
        }
    }

    /// 叶子节点返回统一视图，逻辑节点返回 `None`
    pub fn leaf(&self) -> Option<Leaf<'_>> {
        let leaf = match self {
            Expr::Boolean(b) => Leaf::Boolean(*b),
            Expr::Eq(items) => Leaf::Compare(ComparisonOp::Eq, items),
            Expr::Ne(items) => Leaf::Compare(ComparisonOp::Ne, items),
            Expr::Gt(items) => Leaf::Compare(ComparisonOp::Gt, items),
            Expr::Ge(items) => Leaf::Compare(ComparisonOp::Ge, items),
            Expr::Lt(items) => Leaf::Compare(ComparisonOp::Lt, items),
            Expr::Le(items) => Leaf::Compare(ComparisonOp::Le, items),
            Expr::Contains(items) => Leaf::Pattern(StringOp::Contains, items),
            Expr::StartsWith(items) => Leaf::Pattern(StringOp::StartsWith, items),
            Expr::EndsWith(items) => Leaf::Pattern(StringOp::EndsWith, items),
            Expr::Regex(items) => Leaf::Pattern(StringOp::Regex, items),
            Expr::And(_) | Expr::Or(_) | Expr::Not(_) | Expr::Match(_) => return None,
        };
        Some(leaf)
    }

    /// 结构校验：`$and`/`$or` 至少两项，`$match` 至少一项且只含叶子或 `$match`
    pub fn validate(&self) -> Result<()> {
        match self {
            Expr::And(children) | Expr::Or(children) => {
                if children.len() < 2 {
                    return Err(Error::structure(format!(
                        "field {} length: must be >= 2, got {}",
                        self.key(),
                        children.len()
                    )));
                }
                children.iter().try_for_each(Expr::validate)
            }
            Expr::Match(children) => {
                if children.is_empty() {
                    return Err(Error::structure("field $match length: must be >= 1, got 0"));
                }
                for child in children {
                    if matches!(child, Expr::And(_) | Expr::Or(_) | Expr::Not(_)) {
                        return Err(Error::structure(format!(
                            "{} is not allowed inside $match",
                            child.key()
                        )));
                    }
                    child.validate()?;
                }
                Ok(())
            }
            Expr::Not(child) => child.validate(),
            _ => Ok(()),
        }
    }

    /// 按遇到顺序收集表达式中引用的全部字段
    pub fn fields(&self) -> Vec<&FieldPath> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        match self {
            Expr::And(children) | Expr::Or(children) | Expr::Match(children) => {
                children.iter().for_each(|c| c.collect_fields(out))
            }
            Expr::Not(child) => child.collect_fields(out),
            other => match other.leaf() {
                Some(Leaf::Compare(_, items)) | Some(Leaf::Pattern(_, items)) => {
                    items.iter().filter_map(Operand::field_path).for_each(|f| out.push(f))
                }
                _ => {}
            },
        }
    }
}

impl FromStr for Expr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_expression(s.as_bytes())
    }
}

/// 解析并校验一个 JSON 策略表达式
pub fn parse_expression(bytes: &[u8]) -> Result<Expr> {
    let expr: Expr = serde_json::from_slice(bytes)?;
    expr.validate()?;
    debug!(root_key = expr.key(), "Parsed policy expression");
    Ok(expr)
}

/// 操作数：字段引用、字面量、属性引用或类型转换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    #[serde(rename = "$field")]
    Field(FieldPath),
    #[serde(rename = "$strVal")]
    Str(StandardString),
    #[serde(rename = "$numVal")]
    Num(f64),
    #[serde(rename = "$boolean")]
    Bool(bool),
    #[serde(rename = "$dateTimeVal")]
    DateTime(DateTime<Utc>),
    #[serde(rename = "$timeVal")]
    Time(TimeLiteral),
    #[serde(rename = "$hexVal")]
    Hex(HexLiteral),
    /// 日期时间的年份
    #[serde(rename = "$year")]
    Year(DateTime<Utc>),
    /// 月份，1 到 12
    #[serde(rename = "$month")]
    Month(DateTime<Utc>),
    #[serde(rename = "$dayOfMonth")]
    DayOfMonth(DateTime<Utc>),
    /// ISO 星期，周一为 1、周日为 7
    #[serde(rename = "$dayOfWeek")]
    DayOfWeek(DateTime<Utc>),
    #[serde(rename = "$attribute")]
    Attribute(AttributeItem),
    #[serde(rename = "$strCast")]
    StrCast(Box<Operand>),
    #[serde(rename = "$numCast")]
    NumCast(Box<Operand>),
    #[serde(rename = "$boolCast")]
    BoolCast(Box<Operand>),
    #[serde(rename = "$dateTimeCast")]
    DateTimeCast(Box<Operand>),
    #[serde(rename = "$timeCast")]
    TimeCast(Box<Operand>),
    #[serde(rename = "$hexCast")]
    HexCast(Box<Operand>),
}

impl Operand {
    pub fn field(path: &str) -> Result<Self> {
        Ok(Operand::Field(FieldPath::parse(path)?))
    }

    pub fn string(value: impl Into<String>) -> Result<Self> {
        Ok(Operand::Str(StandardString::try_from(value.into())?))
    }

    pub fn number(value: f64) -> Self {
        Operand::Num(value)
    }

    /// 去掉外层类型转换后的操作数及最外层的目标类型
    pub fn unwrap_cast(&self) -> (&Operand, Option<ValueType>) {
        let (inner, target) = match self {
            Operand::StrCast(inner) => (inner, ValueType::Text),
            Operand::NumCast(inner) => (inner, ValueType::Number),
            Operand::BoolCast(inner) => (inner, ValueType::Boolean),
            Operand::DateTimeCast(inner) => (inner, ValueType::DateTime),
            Operand::TimeCast(inner) => (inner, ValueType::Time),
            Operand::HexCast(inner) => (inner, ValueType::Hex),
            other => return (other, None),
        };
        let (base, _) = inner.unwrap_cast();
        (base, Some(target))
    }

    /// 字段引用（穿过类型转换）
    pub fn field_path(&self) -> Option<&FieldPath> {
        match self.unwrap_cast().0 {
            Operand::Field(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_field(&self) -> bool {
        self.field_path().is_some()
    }

    /// 直接写出的字面量；字段、属性和类型转换返回 `None`。
    /// 日期分量取数值。
    pub fn literal(&self) -> Option<Literal> {
        let literal = match self {
            Operand::Str(s) => Literal::String(s.as_str().to_string()),
            Operand::Num(n) => Literal::Number(*n),
            Operand::Bool(b) => Literal::Boolean(*b),
            Operand::DateTime(dt) => Literal::DateTime(*dt),
            Operand::Year(dt) => Literal::Number(f64::from(dt.year())),
            Operand::Month(dt) => Literal::Number(f64::from(dt.month())),
            Operand::DayOfMonth(dt) => Literal::Number(f64::from(dt.day())),
            Operand::DayOfWeek(dt) => Literal::Number(f64::from(dt.weekday().number_from_monday())),
            Operand::Time(t) => Literal::Time(t.0),
            Operand::Hex(h) => Literal::Hex(h.0.clone()),
            _ => return None,
        };
        Some(literal)
    }
}

/// 不以 `$` 开头的字符串字面量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StandardString(String);

impl StandardString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StandardString {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        if value.starts_with('$') {
            return Err(Error::structure(format!(
                "$strVal must not start with `$`: {value:?}"
            )));
        }
        Ok(Self(value))
    }
}

impl From<StandardString> for String {
    fn from(value: StandardString) -> Self {
        value.0
    }
}

/// `HH:MM` 或 `HH:MM:SS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeLiteral(pub NaiveTime);

impl TimeLiteral {
    pub fn parse(value: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(value, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
            .ok()
    }
}

impl TryFrom<String> for TimeLiteral {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
            .map(Self)
            .ok_or_else(|| Error::structure(format!("invalid $timeVal: {value:?}")))
    }
}

impl From<TimeLiteral> for String {
    fn from(value: TimeLiteral) -> Self {
        value.0.format("%H:%M:%S").to_string()
    }
}

/// `16#` 加大写十六进制数字
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexLiteral(pub String);

impl HexLiteral {
    pub fn is_valid(value: &str) -> bool {
        value
            .strip_prefix("16#")
            .is_some_and(|digits| {
                !digits.is_empty()
                    && digits
                        .chars()
                        .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
            })
    }
}

impl TryFrom<String> for HexLiteral {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(Error::structure(format!("invalid $hexVal: {value:?}")))
        }
    }
}

impl From<HexLiteral> for String {
    fn from(value: HexLiteral) -> Self {
        value.0
    }
}

/// 列或字面量的值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Text,
    Number,
    Boolean,
    DateTime,
    Time,
    Hex,
}

impl ValueType {
    /// PostgreSQL 类型名
    pub fn sql_type(self) -> &'static str {
        match self {
            ValueType::Text | ValueType::Hex => "text",
            ValueType::Number => "double precision",
            ValueType::Boolean => "boolean",
            ValueType::DateTime => "timestamptz",
            ValueType::Time => "time",
        }
    }

    /// 以文本形式存储、比较时不需要转换
    pub fn is_textual(self) -> bool {
        matches!(self, ValueType::Text | ValueType::Hex)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Text => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::DateTime => "datetime",
            ValueType::Time => "time",
            ValueType::Hex => "hex",
        };
        f.write_str(name)
    }
}

/// 类型化的字面量
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Time(NaiveTime),
    Hex(String),
}

impl Literal {
    pub fn value_type(&self) -> ValueType {
        match self {
            Literal::String(_) => ValueType::Text,
            Literal::Number(_) => ValueType::Number,
            Literal::Boolean(_) => ValueType::Boolean,
            Literal::DateTime(_) => ValueType::DateTime,
            Literal::Time(_) => ValueType::Time,
            Literal::Hex(_) => ValueType::Hex,
        }
    }

    /// 编译期类型转换，用于 `$numCast` 等包裹字面量的情况
    pub fn cast(self, target: ValueType) -> Option<Literal> {
        if self.value_type() == target {
            return Some(self);
        }
        let text = self.to_text();
        let cast = match target {
            ValueType::Text => Literal::String(text),
            ValueType::Number => Literal::Number(text.trim().parse().ok()?),
            ValueType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Literal::Boolean(true),
                "false" | "0" => Literal::Boolean(false),
                _ => return None,
            },
            ValueType::DateTime => {
                Literal::DateTime(DateTime::parse_from_rfc3339(text.trim()).ok()?.with_timezone(&Utc))
            }
            ValueType::Time => Literal::Time(TimeLiteral::parse(text.trim())?),
            ValueType::Hex => match self {
                Literal::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= u64::MAX as f64 => {
                    Literal::Hex(format!("16#{:X}", n as u64))
                }
                _ if HexLiteral::is_valid(&text) => Literal::Hex(text),
                _ => return None,
            },
        };
        Some(cast)
    }

    /// 两个字面量比较。类型必须相同，或者都以文本比较；
    /// 无法排序的数值（NaN）不满足任何运算符。
    pub fn compare(&self, op: ComparisonOp, other: &Literal) -> Result<bool> {
        let ordering = match (self, other) {
            (Literal::Number(a), Literal::Number(b)) => a.partial_cmp(b),
            (Literal::Boolean(a), Literal::Boolean(b)) => Some(a.cmp(b)),
            (Literal::DateTime(a), Literal::DateTime(b)) => Some(a.cmp(b)),
            (Literal::Time(a), Literal::Time(b)) => Some(a.cmp(b)),
            (a, b) if a.value_type().is_textual() && b.value_type().is_textual() => {
                Some(a.to_text().cmp(&b.to_text()))
            }
            (a, b) => {
                return Err(Error::type_mismatch(
                    op.as_str(),
                    format!("cannot compare {} with {}", a.value_type(), b.value_type()),
                ))
            }
        };
        Ok(ordering.is_some_and(|o| op.holds(o)))
    }

    /// 文本表示
    pub fn to_text(&self) -> String {
        match self {
            Literal::String(s) | Literal::Hex(s) => s.clone(),
            Literal::Number(n) => n.to_string(),
            Literal::Boolean(b) => b.to_string(),
            Literal::DateTime(dt) => dt.to_rfc3339(),
            Literal::Time(t) => t.format("%H:%M:%S").to_string(),
        }
    }

    /// 转换为 sea-query 绑定参数
    pub fn to_value(&self) -> Value {
        match self {
            Literal::String(s) | Literal::Hex(s) => Value::String(Some(Box::new(s.clone()))),
            Literal::Number(n) => Value::Double(Some(*n)),
            Literal::Boolean(b) => Value::Bool(Some(*b)),
            Literal::DateTime(dt) => Value::ChronoDateTimeUtc(Some(Box::new(*dt))),
            Literal::Time(t) => Value::ChronoTime(Some(Box::new(*t))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<Expr> {
        parse_expression(value.to_string().as_bytes())
    }

    #[test]
    fn test_parse_comparison() {
        let expr = parse(json!({"$eq": [{"$field": "$sm#idShort"}, {"$strVal": "motor"}]})).unwrap();
        match expr.leaf() {
            Some(Leaf::Compare(ComparisonOp::Eq, items)) => {
                assert!(items[0].is_field());
                assert_eq!(items[1].literal(), Some(Literal::String("motor".to_string())));
            }
            other => panic!("Expected $eq leaf, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_logic() {
        let expr = parse(json!({"$and": [
            {"$or": [
                {"$boolean": true},
                {"$gt": [{"$field": "$aasdesc#createdAt"}, {"$dateTimeVal": "2024-01-01T00:00:00Z"}]}
            ]},
            {"$not": {"$regex": [{"$field": "$aasdesc#idShort"}, {"$strVal": "^a.*"}]}}
        ]}))
        .unwrap();
        let Expr::And(children) = &expr else {
            panic!("Expected $and");
        };
        assert!(matches!(children[0], Expr::Or(_)));
        assert!(matches!(children[1], Expr::Not(_)));
        assert_eq!(expr.fields().len(), 2);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(parse(json!({"$xor": [{"$boolean": true}, {"$boolean": false}]})).is_err());
        assert!(parse(json!({"$eq": [{"$field": "$sm#id"}, {"$nope": 1}]})).is_err());
    }

    #[test]
    fn test_two_keys_is_rejected() {
        let err = parse(json!({"$boolean": true, "$not": {"$boolean": true}})).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Structure);
        assert!(parse(json!({})).is_err());
    }

    #[test]
    fn test_operand_arity() {
        assert!(parse(json!({"$eq": [{"$field": "$sm#id"}]})).is_err());
        assert!(parse(json!({"$eq": [{"$strVal": "a"}, {"$strVal": "b"}, {"$strVal": "c"}]})).is_err());
        assert!(parse(json!({"$contains": []})).is_err());
    }

    #[test]
    fn test_min_lengths() {
        assert!(parse(json!({"$and": [{"$boolean": true}]})).is_err());
        assert!(parse(json!({"$or": []})).is_err());
        let err = parse(json!({"$match": []})).unwrap_err();
        assert!(err.to_string().contains("$match"));
        assert!(parse(json!({"$match": [{"$boolean": true}]})).is_ok());
    }

    #[test]
    fn test_match_rejects_logical_members() {
        let doc = json!({"$match": [{"$and": [{"$boolean": true}, {"$boolean": true}]}]});
        assert!(parse(doc).is_err());
        let nested = json!({"$match": [{"$match": [{"$boolean": false}]}]});
        assert!(parse(nested).is_ok());
    }

    #[test]
    fn test_validation_reaches_nested_nodes() {
        let doc = json!({"$not": {"$or": [{"$boolean": true}, {"$match": []}]}});
        assert!(parse(doc).is_err());
    }

    #[test]
    fn test_str_val_must_not_look_like_field() {
        assert!(parse(json!({"$eq": [{"$field": "$sm#id"}, {"$strVal": "$sm#idShort"}]})).is_err());
        assert!(Operand::string("$x").is_err());
        assert!(Operand::string("x$").is_ok());
    }

    #[test]
    fn test_literal_patterns() {
        assert!(parse(json!({"$eq": [{"$field": "$sm#id"}, {"$timeVal": "12:30"}]})).is_ok());
        assert!(parse(json!({"$eq": [{"$field": "$sm#id"}, {"$timeVal": "25:99"}]})).is_err());
        assert!(parse(json!({"$eq": [{"$field": "$sm#id"}, {"$hexVal": "16#FF00"}]})).is_ok());
        assert!(parse(json!({"$eq": [{"$field": "$sm#id"}, {"$hexVal": "0xff"}]})).is_err());
        assert!(parse(json!({"$eq": [{"$field": "$sm#id"}, {"$dateTimeVal": "yesterday"}]})).is_err());
        assert!(parse(json!({"$eq": [{"$field": "$sm#id["}, {"$strVal": "x"}]})).is_err());
    }

    #[test]
    fn test_casts_unwrap_to_field() {
        let operand: Operand =
            serde_json::from_value(json!({"$numCast": {"$strCast": {"$field": "$sm#id"}}})).unwrap();
        let (inner, target) = operand.unwrap_cast();
        assert!(matches!(inner, Operand::Field(_)));
        assert_eq!(target, Some(ValueType::Number));
        assert!(operand.is_field());
        assert_eq!(operand.literal(), None);
    }

    #[test]
    fn test_literal_cast() {
        assert_eq!(
            Literal::String(" 42 ".into()).cast(ValueType::Number),
            Some(Literal::Number(42.0))
        );
        assert_eq!(Literal::Number(1.5).cast(ValueType::Text), Some(Literal::String("1.5".into())));
        assert_eq!(Literal::Number(255.0).cast(ValueType::Hex), Some(Literal::Hex("16#FF".into())));
        assert_eq!(Literal::String("abc".into()).cast(ValueType::Number), None);
        assert_eq!(
            Literal::String("TRUE".into()).cast(ValueType::Boolean),
            Some(Literal::Boolean(true))
        );
    }

    #[test]
    fn test_date_part_operands() {
        let expr = parse(json!({"$eq": [
            {"$field": "$aasdesc#createdAt"},
            {"$year": "2024-03-15T08:00:00Z"}
        ]}))
        .unwrap();
        let Some(Leaf::Compare(_, items)) = expr.leaf() else {
            panic!("Expected comparison leaf");
        };
        assert_eq!(items[1].literal(), Some(Literal::Number(2024.0)));

        let at = |key: &str| -> Operand {
            serde_json::from_value(json!({key: "2024-03-15T08:00:00Z"})).unwrap()
        };
        assert_eq!(at("$month").literal(), Some(Literal::Number(3.0)));
        assert_eq!(at("$dayOfMonth").literal(), Some(Literal::Number(15.0)));
        // 2024-03-15 是周五
        assert_eq!(at("$dayOfWeek").literal(), Some(Literal::Number(5.0)));

        assert!(parse(json!({"$eq": [{"$field": "$sm#id"}, {"$month": "March"}]})).is_err());
    }

    #[test]
    fn test_literal_compare() {
        let n = |v: f64| Literal::Number(v);
        assert!(n(3.0).compare(ComparisonOp::Gt, &n(2.0)).unwrap());
        assert!(n(2.0).compare(ComparisonOp::Le, &n(2.0)).unwrap());
        assert!(!n(f64::NAN).compare(ComparisonOp::Ne, &n(1.0)).unwrap());
        assert!(Literal::String("16#FF".into())
            .compare(ComparisonOp::Eq, &Literal::Hex("16#FF".into()))
            .unwrap());

        let err = Literal::String("1".into())
            .compare(ComparisonOp::Eq, &n(1.0))
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { ref operator, .. } if operator == "$eq"));
    }

    #[test]
    fn test_string_op_matches() {
        assert!(StringOp::Contains.matches("50%_off", "%_").unwrap());
        assert!(!StringOp::StartsWith.matches("motor", "Motor").unwrap());
        assert!(StringOp::EndsWith.matches("shell-a", "-a").unwrap());
        assert!(StringOp::Regex.matches("urn:aas:42", "^urn:aas:[0-9]+$").unwrap());
        assert!(StringOp::Regex.matches("x", "(").is_err());
    }

    #[test]
    fn test_serialize_round_trip_shape() {
        let doc = json!({"$or": [
            {"$starts-with": [{"$field": "$aasdesc#idShort"}, {"$strVal": "shell"}]},
            {"$le": [{"$field": "$aasdesc#createdAt"}, {"$dateTimeVal": "2024-05-01T10:00:00Z"}]}
        ]});
        let expr = parse(doc.clone()).unwrap();
        let back = serde_json::to_value(&expr).unwrap();
        assert_eq!(back, doc);
    }
}

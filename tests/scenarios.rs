//! End-to-end policy compilation against the built-in bindings.

use abac_sql::ast::{parse_expression, ComparisonOp, Expr, Operand};
use abac_sql::config::SchemaConfig;
use abac_sql::query::{compile_query, parse_query};
use abac_sql::{CollectorRegistry, Error, ErrorKind, SqlCompiler};
use sea_query::Value;
use serde_json::{json, Value as Json};

fn registry() -> CollectorRegistry {
    CollectorRegistry::builtin().unwrap()
}

fn compile(root: &str, doc: &Json) -> Result<(String, Vec<Value>), Error> {
    let registry = registry();
    let expr = parse_expression(doc.to_string().as_bytes())?;
    let (sql, values) = SqlCompiler::new(registry.get(root)?).evaluate(&expr)?.build();
    Ok((sql, values.0))
}

fn compile_expr(root: &str, expr: &Expr) -> (String, Vec<Value>) {
    let registry = registry();
    let (sql, values) = SqlCompiler::new(registry.get(root).unwrap())
        .evaluate(expr)
        .unwrap()
        .build();
    (sql, values.0)
}

fn field(path: &str) -> Json {
    json!({"$field": path})
}

fn str_val(value: &str) -> Json {
    json!({"$strVal": value})
}

fn eq(left: Json, right: Json) -> Json {
    json!({"$eq": [left, right]})
}

fn text(value: &str) -> Value {
    Value::String(Some(Box::new(value.to_string())))
}

/// Everything after the outer `WHERE`.
fn where_clause(sql: &str) -> &str {
    sql.split_once(" WHERE ").map(|(_, rest)| rest).unwrap_or("")
}

#[test]
fn test_scenario_a_terminal_path() {
    let doc = eq(field("$sm#semanticId"), str_val("RootLevel_QL2"));
    let (sql, values) = compile("$sm", &doc).unwrap();
    assert!(sql.contains("EXISTS"));
    assert!(values.contains(&text("RootLevel_QL2")));
}

#[test]
fn test_scenario_b_mixed_logic() {
    let doc = json!({"$and": [
        {"$or": [
            eq(field("$aasdesc#idShort"), str_val("shell-short")),
            eq(
                field("$aasdesc#specificAssetIds[0].externalSubjectId.keys[1].value"),
                str_val("WRITTEN_BY_X")
            )
        ]},
        {"$not": {"$contains": [field("$aasdesc#assetType"), str_val("blocked")]}}
    ]});
    let (sql, values) = compile("$aasdesc", &doc).unwrap();

    for keyword in ["EXISTS", "OR", "NOT", "LIKE"] {
        assert!(sql.contains(keyword), "missing {keyword} in {sql}");
    }
    for expected in [
        Value::BigInt(Some(0)),
        Value::BigInt(Some(1)),
        text("shell-short"),
        text("WRITTEN_BY_X"),
        text("blocked"),
    ] {
        assert!(values.contains(&expected), "missing {expected:?} in {values:?}");
    }
}

#[test]
fn test_scenario_c_field_to_field() {
    let doc = eq(field("$aasdesc#idShort"), field("$aasdesc#id"));
    let err = compile("$aasdesc", &doc).unwrap_err();
    assert!(matches!(err, Error::FieldToField { .. }));
    assert_eq!(err.kind(), ErrorKind::Security);
}

#[test]
fn test_scenario_d_unsupported_fixed_index() {
    let doc = eq(field("$aasdesc#endpoints[0]"), str_val("djn"));
    let err = compile("$aasdesc", &doc).unwrap_err();
    assert!(matches!(err, Error::UnsupportedIndex { .. }));
    assert_eq!(err.kind(), ErrorKind::Resolution);
}

#[test]
fn test_scenario_e_empty_match() {
    let err = parse_expression(br#"{"$match": []}"#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structure);

    let err = parse_query(br#"{"Query": {"$condition": {"$match": []}}}"#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structure);
}

#[test]
fn test_determinism() {
    let doc = json!({"$and": [
        {"$match": [
            eq(field("$aasdesc#specificAssetIds[].name"), str_val("a")),
            eq(field("$aasdesc#specificAssetIds[].externalSubjectId.keys[].value"), str_val("b"))
        ]},
        {"$or": [
            eq(field("$aasdesc#submodelDescriptors[2].idShort"), str_val("c")),
            {"$ge": [field("$aasdesc#createdAt"), {"$dateTimeVal": "2024-01-01T00:00:00Z"}]}
        ]}
    ]});
    let first = compile("$aasdesc", &doc).unwrap();
    let second = compile("$aasdesc", &doc).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_field_to_field_regardless_of_nesting() {
    let pair = json!({"$ends-with": [field("$aasdesc#idShort"), field("$aasdesc#assetType")]});
    let docs = [
        pair.clone(),
        json!({"$not": pair.clone()}),
        json!({"$or": [{"$boolean": true}, {"$and": [{"$boolean": true}, pair.clone()]}]}),
        json!({"$match": [{"$match": [pair]}]}),
    ];
    for doc in docs {
        let err = compile("$aasdesc", &doc).unwrap_err();
        assert!(err.is_security_violation(), "{doc}");
    }
}

#[test]
fn test_quantifier_correctness() {
    let quantified = [
        "$aasdesc#specificAssetIds[].name",
        "$aasdesc#endpoints[].interface",
        "$aasdesc#submodelDescriptors[1].endpoints[].protocolinformation.href",
        "$sm#semanticId.keys[].value",
    ];
    for path in quantified {
        let root = path.split('#').next().unwrap();
        let (sql, _) = compile(root, &eq(field(path), str_val("x"))).unwrap();
        assert!(sql.contains("EXISTS"), "{path}");
    }

    for path in ["$aasdesc#idShort", "$aasdesc#globalAssetId", "$bd#aasId", "$sm#id"] {
        let root = path.split('#').next().unwrap();
        let (sql, _) = compile(root, &eq(field(path), str_val("x"))).unwrap();
        assert!(!sql.contains("EXISTS"), "{path}");
    }
}

#[test]
fn test_negation_wraps_the_same_predicate() {
    let inner = json!({"$or": [
        eq(field("$aasdesc#specificAssetIds[].name"), str_val("serial")),
        {"$starts-with": [field("$aasdesc#idShort"), str_val("motor_")]}
    ]});
    let (sql, values) = compile("$aasdesc", &inner).unwrap();
    let (negated_sql, negated_values) = compile("$aasdesc", &json!({"$not": inner})).unwrap();

    let positive = where_clause(&sql);
    let negative = where_clause(&negated_sql);
    // Rows where the inner predicate is NULL must land on the negated side.
    assert!(negative.starts_with('('));
    assert!(negative.ends_with(") IS NOT TRUE"));
    assert!(negative.contains(positive));
    assert_eq!(values, negated_values);
}

#[test]
fn test_unresolved_attribute_cannot_open_a_negation() {
    let doc = json!({"$not": {"$eq": [
        field("$aasdesc#idShort"),
        {"$attribute": {"CLAIM": "x"}}
    ]}});
    let err = compile("$aasdesc", &doc).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);

    // A decided sibling still lets the policy through without the claim.
    let doc = json!({"$or": [{"$boolean": true}, doc]});
    let (sql, values) = compile("$aasdesc", &doc).unwrap();
    assert!(where_clause(&sql).contains("TRUE"));
    assert!(values.is_empty());
}

#[test]
fn test_associativity_after_flattening() {
    let a = Expr::compare(
        ComparisonOp::Eq,
        Operand::field("$aasdesc#specificAssetIds[].name").unwrap(),
        Operand::string("a").unwrap(),
    );
    let b = Expr::compare(
        ComparisonOp::Eq,
        Operand::field("$aasdesc#specificAssetIds[].value").unwrap(),
        Operand::string("b").unwrap(),
    );
    let c = Expr::compare(
        ComparisonOp::Lt,
        Operand::field("$aasdesc#createdAt").unwrap(),
        Operand::DateTime("2025-01-01T00:00:00Z".parse().unwrap()),
    );

    let left = Expr::and(vec![Expr::and(vec![a.clone(), b.clone()]), c.clone()]);
    let right = Expr::and(vec![a.clone(), Expr::and(vec![b.clone(), c.clone()])]);
    assert_eq!(compile_expr("$aasdesc", &left), compile_expr("$aasdesc", &right));

    let left = Expr::or(vec![Expr::or(vec![a.clone(), b.clone()]), c.clone()]);
    let right = Expr::or(vec![a, Expr::or(vec![b, c])]);
    assert_eq!(compile_expr("$aasdesc", &left), compile_expr("$aasdesc", &right));
}

#[test]
fn test_query_with_sub_filters() {
    let registry = registry();
    let query = parse_query(
        json!({"Query": {
            "$condition": {"$gt": [field("$aasdesc#createdAt"), {"$dateTimeVal": "2024-06-01T00:00:00Z"}]},
            "$filter": [
                {
                    "FRAGMENT": "$aasdesc#specificAssetIds[]",
                    "CONDITION": {"$and": [
                        eq(field("$aasdesc#specificAssetIds[].name"), str_val("serial")),
                        eq(field("$aasdesc#specificAssetIds[].value"), str_val("42"))
                    ]}
                },
                {
                    "FRAGMENT": "$aasdesc#endpoints[]",
                    "CONDITION": eq(field("$aasdesc#endpoints[].protocolinformation.endpointProtocol"), str_val("HTTPS"))
                }
            ]
        }})
        .to_string()
        .as_bytes(),
    )
    .unwrap();

    let predicate = compile_query(&query, registry.get("$aasdesc").unwrap()).unwrap();
    let (sql, values) = predicate.build();
    assert_eq!(sql.matches("EXISTS").count(), 2);
    assert!(sql.contains(r#""aas_descriptor_endpoint"."endpoint_protocol" = "#));
    assert_eq!(values.0.len(), 4);
    assert_eq!(values.0[1], text("serial"));
}

#[test]
fn test_custom_schema_configuration() {
    let config = SchemaConfig::from_json_str(
        r#"{"roots": {"$doc": {
            "table": "documents",
            "alias": "d",
            "key_column": "id",
            "fields": {
                "title": {"kind": "column", "column": "title"},
                "pages": {"kind": "column", "column": "pages", "type": "number"},
                "tags": {
                    "kind": "relation",
                    "table": "document_tag",
                    "alias": "tag",
                    "cardinality": "many",
                    "join": {"child_column": "document_id", "parent_column": "id"},
                    "fields": {"name": {"kind": "column", "column": "name"}}
                }
            }
        }}}"#,
    )
    .unwrap();
    let registry = CollectorRegistry::from_config(&config).unwrap();
    let expr = parse_expression(
        json!({"$and": [
            {"$ge": [field("$doc#pages"), {"$numVal": 10}]},
            eq(field("$doc#tags[].name"), str_val("public"))
        ]})
        .to_string()
        .as_bytes(),
    )
    .unwrap();
    let (sql, values) = SqlCompiler::new(registry.get("$doc").unwrap())
        .evaluate(&expr)
        .unwrap()
        .build();

    assert!(sql.starts_with(r#"SELECT "d"."id" FROM "documents" AS "d" WHERE"#));
    assert!(sql.contains(r#""d"."pages" >= $1"#));
    assert!(sql.contains(r#""tag"."document_id" = "d"."id""#));
    assert_eq!(values.0, vec![Value::Double(Some(10.0)), text("public")]);

    let err = registry.get("$aasdesc").unwrap_err();
    assert!(matches!(err, Error::UnknownRoot { .. }));
}

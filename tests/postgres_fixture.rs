//! Runs compiled predicates against a live PostgreSQL and checks that a policy
//! and its `$not` split the rows between them, including rows with NULL columns
//! and text that a guarded cast cannot convert.
//!
//! Skipped unless `ABAC_SQL_TEST_PG_URL` is set, e.g.
//! `ABAC_SQL_TEST_PG_URL="host=localhost user=postgres" cargo test --test postgres_fixture`.

use std::collections::BTreeSet;

use abac_sql::attribute::Claims;
use abac_sql::config::SchemaConfig;
use abac_sql::{parse_expression, CollectorRegistry, SqlCompiler};
use serde_json::{json, Value as Json};
use tokio_postgres::{Client, NoTls};

const URL_VAR: &str = "ABAC_SQL_TEST_PG_URL";

const SCHEMA: &str = r#"{
    "roots": {
        "$aasdesc": {
            "table": "abac_fixture",
            "key_column": "id",
            "fields": {
                "idShort": { "kind": "column", "column": "id_short" },
                "assetType": { "kind": "column", "column": "asset_type" }
            }
        }
    }
}"#;

async fn connect() -> Option<Client> {
    let url = std::env::var(URL_VAR).ok()?;
    let (client, connection) = tokio_postgres::connect(&url, NoTls).await.unwrap();
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            eprintln!("Postgres connection error: {err}");
        }
    });

    client
        .batch_execute(
            "CREATE TEMP TABLE abac_fixture (id integer PRIMARY KEY, id_short text, asset_type text);
             INSERT INTO abac_fixture VALUES (1, 'shell-a', 'pump'), (2, '42', NULL), (3, 'abc', 'valve');",
        )
        .await
        .unwrap();
    Some(client)
}

async fn selected(client: &Client, registry: &CollectorRegistry, claims: &Claims, doc: &Json) -> BTreeSet<i32> {
    let expr = parse_expression(doc.to_string().as_bytes()).unwrap();
    let sql = SqlCompiler::new(registry.get("$aasdesc").unwrap())
        .with_attributes(claims)
        .evaluate(&expr)
        .unwrap()
        .to_sql();
    client
        .query(sql.as_str(), &[])
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<_, i32>(0))
        .collect()
}

#[tokio::test]
async fn test_policy_and_negation_partition_rows() {
    let Some(client) = connect().await else {
        eprintln!("{URL_VAR} not set, skipping");
        return;
    };
    let registry = CollectorRegistry::from_config(&SchemaConfig::from_json_str(SCHEMA).unwrap()).unwrap();
    let claims = Claims::new().with_claim("role", "valve");
    let all: BTreeSet<i32> = [1, 2, 3].into();

    let policies = [
        json!({"$eq": [{"$field": "$aasdesc#assetType"}, {"$strVal": "pump"}]}),
        json!({"$gt": [{"$field": "$aasdesc#idShort"}, {"$numVal": 3}]}),
        json!({"$eq": [{"$field": "$aasdesc#assetType"}, {"$attribute": {"CLAIM": "role"}}]}),
        json!({"$or": [
            {"$eq": [{"$field": "$aasdesc#assetType"}, {"$strVal": "pump"}]},
            {"$gt": [{"$field": "$aasdesc#idShort"}, {"$numVal": 40}]}
        ]}),
        json!({"$and": [
            {"$ne": [{"$field": "$aasdesc#assetType"}, {"$strVal": "pump"}]},
            {"$lt": [{"$field": "$aasdesc#idShort"}, {"$numVal": 100}]}
        ]}),
    ];

    for policy in policies {
        let positive = selected(&client, &registry, &claims, &policy).await;
        let negative = selected(&client, &registry, &claims, &json!({"$not": policy})).await;
        assert!(positive.is_disjoint(&negative), "{policy}");
        assert_eq!(&positive | &negative, all, "{policy}");
    }

    let guarded = json!({"$gt": [{"$field": "$aasdesc#idShort"}, {"$numVal": 3}]});
    assert_eq!(selected(&client, &registry, &claims, &guarded).await, [2].into());
    assert_eq!(
        selected(&client, &registry, &claims, &json!({"$not": guarded})).await,
        [1, 3].into()
    );
}

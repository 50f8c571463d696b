//! 配置模块，负责加载根绑定（schema binding）的 JSON 配置文件
//!
//! 配置文件示例：
//!
//! ```json
//! {
//!   "roots": {
//!     "$sm": {
//!       "table": "submodel",
//!       "alias": "s",
//!       "key_column": "id",
//!       "fields": {
//!         "idShort": { "kind": "column", "column": "id_short" },
//!         "semanticId": {
//!           "kind": "relation",
//!           "table": "reference",
//!           "alias": "semantic_id_reference",
//!           "cardinality": "one",
//!           "join": { "child_column": "id", "parent_column": "semantic_id" },
//!           "terminal": "keys[0].value",
//!           "fields": { "type": { "kind": "column", "column": "type" } }
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ast::ValueType;
use crate::error::{Error, Result};

/// 全部根绑定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// 根标识（如 `$aasdesc`）到绑定的映射
    pub roots: BTreeMap<String, RootConfig>,
}

/// 单个根的绑定：基表、别名、主键以及字段树
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootConfig {
    pub table: String,
    /// 外层查询中使用的别名，缺省为表名
    #[serde(default)]
    pub alias: Option<String>,
    pub key_column: String,
    pub fields: BTreeMap<String, MemberConfig>,
}

/// 字段树中的成员
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemberConfig {
    /// 当前行上的列
    Column {
        column: String,
        #[serde(default, rename = "type")]
        value_type: ValueType,
    },
    /// 与父结构存放在同一行的嵌入结构
    Group {
        fields: BTreeMap<String, MemberConfig>,
    },
    /// 另一张表中的子行
    Relation(RelationConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// `child.child_column = parent.parent_column`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConfig {
    pub child_column: String,
    pub parent_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationConfig {
    pub table: String,
    /// 在同一个根内必须唯一
    pub alias: String,
    pub cardinality: Cardinality,
    pub join: JoinConfig,
    /// 位置列，只有声明了位置列的结构才接受 `[n]`
    #[serde(default)]
    pub position: Option<String>,
    /// 路径停在该结构上时使用的相对路径
    #[serde(default)]
    pub terminal: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, MemberConfig>,
}

impl SchemaConfig {
    /// 从JSON文件加载绑定配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(Error::config(format!(
                "配置文件不存在: {}",
                path_ref.display()
            )));
        }

        let content = fs::read_to_string(path_ref).map_err(|e| {
            Error::config(format!("无法读取配置文件 {}: {}", path_ref.display(), e))
        })?;

        Self::from_json_str(&content).map_err(|e| match e {
            Error::Config { message } => {
                Error::config(format!("{}: {}", path_ref.display(), message))
            }
            other => other,
        })
    }

    /// 从JSON字符串解析绑定配置
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::config(format!("无法解析JSON配置: {}", e)))
    }

    /// 内置的绑定：`$aasdesc`、`$smdesc`、`$sm`、`$bd`
    pub fn builtin() -> Self {
        let mut roots = BTreeMap::new();
        roots.insert("$aasdesc".to_string(), aas_descriptor_root());
        roots.insert("$smdesc".to_string(), submodel_descriptor_root());
        roots.insert("$sm".to_string(), submodel_root());
        roots.insert("$bd".to_string(), discovery_root());
        Self { roots }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RelationConfig {
    fn new(table: &str, alias: &str, cardinality: Cardinality, child: &str, parent: &str) -> Self {
        Self {
            table: table.to_string(),
            alias: alias.to_string(),
            cardinality,
            join: JoinConfig {
                child_column: child.to_string(),
                parent_column: parent.to_string(),
            },
            position: None,
            terminal: None,
            fields: BTreeMap::new(),
        }
    }

    fn positioned(mut self, column: &str) -> Self {
        self.position = Some(column.to_string());
        self
    }

    fn terminal(mut self, path: &str) -> Self {
        self.terminal = Some(path.to_string());
        self
    }

    fn fields(mut self, members: Vec<(&str, MemberConfig)>) -> Self {
        self.fields = fields(members);
        self
    }

    fn member(self) -> MemberConfig {
        MemberConfig::Relation(self)
    }
}

fn fields(members: Vec<(&str, MemberConfig)>) -> BTreeMap<String, MemberConfig> {
    members
        .into_iter()
        .map(|(name, member)| (name.to_string(), member))
        .collect()
}

fn column(name: &str) -> MemberConfig {
    typed(name, ValueType::Text)
}

fn typed(name: &str, value_type: ValueType) -> MemberConfig {
    MemberConfig::Column {
        column: name.to_string(),
        value_type,
    }
}

/// `semanticId` 引用及其有序的 keys
fn semantic_id(reference_alias: &str, key_alias: &str, parent_column: &str) -> MemberConfig {
    RelationConfig::new("reference", reference_alias, Cardinality::One, "id", parent_column)
        .terminal("keys[0].value")
        .fields(vec![
            ("type", column("type")),
            (
                "keys",
                RelationConfig::new("reference_key", key_alias, Cardinality::Many, "reference_id", "id")
                    .positioned("position")
                    .fields(vec![("type", column("type")), ("value", column("value"))])
                    .member(),
            ),
        ])
        .member()
}

fn endpoints(alias: &str, parent_column: &str) -> MemberConfig {
    RelationConfig::new(
        "aas_descriptor_endpoint",
        alias,
        Cardinality::Many,
        "descriptor_id",
        parent_column,
    )
    .fields(vec![
        ("interface", column("interface")),
        (
            "protocolinformation",
            MemberConfig::Group {
                fields: fields(vec![
                    ("href", column("href")),
                    ("endpointProtocol", column("endpoint_protocol")),
                    ("subprotocol", column("sub_protocol")),
                ]),
            },
        ),
    ])
    .member()
}

fn submodel_descriptor_fields() -> Vec<(&'static str, MemberConfig)> {
    vec![
        ("idShort", column("id_short")),
        ("id", column("id")),
        ("createdAt", typed("created_at", ValueType::DateTime)),
        (
            "semanticId",
            semantic_id(
                "aasdesc_submodel_descriptor_semantic_id_reference",
                "aasdesc_submodel_descriptor_semantic_id_reference_key",
                "semantic_id",
            ),
        ),
        ("endpoints", endpoints("submodel_descriptor_endpoint", "descriptor_id")),
    ]
}

fn aas_descriptor_root() -> RootConfig {
    let specific_asset_ids = RelationConfig::new(
        "specific_asset_id",
        "specific_asset_id",
        Cardinality::Many,
        "descriptor_id",
        "descriptor_id",
    )
    .positioned("position")
    .fields(vec![
        ("name", column("name")),
        ("value", column("value")),
        (
            "externalSubjectId",
            RelationConfig::new(
                "reference",
                "external_subject_reference",
                Cardinality::One,
                "id",
                "external_subject_ref",
            )
            .fields(vec![
                ("type", column("type")),
                (
                    "keys",
                    RelationConfig::new(
                        "reference_key",
                        "external_subject_reference_key",
                        Cardinality::Many,
                        "reference_id",
                        "id",
                    )
                    .positioned("position")
                    .fields(vec![("type", column("type")), ("value", column("value"))])
                    .member(),
                ),
            ])
            .member(),
        ),
    ])
    .member();

    let submodel_descriptors = RelationConfig::new(
        "submodel_descriptor",
        "submodel_descriptor",
        Cardinality::Many,
        "aas_descriptor_id",
        "descriptor_id",
    )
    .positioned("position")
    .fields(submodel_descriptor_fields())
    .member();

    RootConfig {
        table: "aas_descriptor".to_string(),
        alias: None,
        key_column: "descriptor_id".to_string(),
        fields: fields(vec![
            ("idShort", column("id_short")),
            ("id", column("id")),
            ("assetKind", column("asset_kind")),
            ("assetType", column("asset_type")),
            ("globalAssetId", column("global_asset_id")),
            ("createdAt", typed("created_at", ValueType::DateTime)),
            ("specificAssetIds", specific_asset_ids),
            ("endpoints", endpoints("aas_descriptor_endpoint", "descriptor_id")),
            ("submodelDescriptors", submodel_descriptors),
        ]),
    }
}

fn submodel_descriptor_root() -> RootConfig {
    RootConfig {
        table: "submodel_descriptor".to_string(),
        alias: None,
        key_column: "descriptor_id".to_string(),
        fields: fields(submodel_descriptor_fields()),
    }
}

fn submodel_root() -> RootConfig {
    RootConfig {
        table: "submodel".to_string(),
        alias: Some("s".to_string()),
        key_column: "id".to_string(),
        fields: fields(vec![
            ("idShort", column("id_short")),
            ("id", column("id")),
            (
                "semanticId",
                semantic_id("semantic_id_reference", "semantic_id_reference_key", "semantic_id"),
            ),
        ]),
    }
}

fn discovery_root() -> RootConfig {
    RootConfig {
        table: "aas_identifier".to_string(),
        alias: None,
        key_column: "id".to_string(),
        fields: fields(vec![
            ("aasId", column("aasid")),
            ("createdAt", typed("created_at", ValueType::DateTime)),
            (
                "specificAssetIds",
                RelationConfig::new("asset_link", "asset_link", Cardinality::Many, "aasref", "id")
                    .fields(vec![("name", column("name")), ("value", column("value"))])
                    .member(),
            ),
        ]),
    }
}

//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 表结构管理
//!
//! 失效子系统自己拥有队列表和变更日志表；目录表只在开发和测试环境中由这里创建。

use crate::error::Result;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement};
use tracing::{debug, info, instrument};

/// 列类型
#[derive(Debug, Clone, Copy)]
enum Column {
    /// 自增主键
    Serial,
    /// 自然主键
    Key,
    Int,
    NullableInt,
    Text(u16),
    NullableText(u16),
}

impl Column {
    fn sql(&self, backend: DatabaseBackend) -> String {
        match (self, backend) {
            (Column::Serial, DatabaseBackend::Postgres) => "BIGSERIAL PRIMARY KEY".to_string(),
            (Column::Serial, DatabaseBackend::MySql) => {
                "BIGINT AUTO_INCREMENT PRIMARY KEY".to_string()
            }
            (Column::Serial, DatabaseBackend::Sqlite) => {
                "INTEGER PRIMARY KEY AUTOINCREMENT".to_string()
            }
            (Column::Key, _) => "BIGINT PRIMARY KEY".to_string(),
            (Column::Int, _) => "BIGINT NOT NULL DEFAULT 0".to_string(),
            (Column::NullableInt, _) => "BIGINT NULL".to_string(),
            (Column::Text(len), _) => format!("VARCHAR({}) NOT NULL", len),
            (Column::NullableText(len), _) => format!("VARCHAR({}) NULL", len),
        }
    }
}

struct Table {
    name: &'static str,
    columns: &'static [(&'static str, Column)],
    indexes: &'static [(&'static str, &'static str)],
}

/// 本子系统拥有的表
const OWNED_TABLES: &[Table] = &[
    Table {
        name: "cache_invalidation_queue",
        columns: &[
            ("id", Column::Serial),
            ("pattern", Column::Text(512)),
            ("batch_id", Column::NullableText(36)),
            ("entity_kind", Column::Text(16)),
            ("entity_id", Column::Int),
            ("changed_at", Column::Int),
            ("change_id", Column::NullableInt),
            ("enqueued_at", Column::Int),
            ("claimed_at", Column::NullableInt),
        ],
        indexes: &[
            ("idx_invalidation_queue_batch", "batch_id"),
            ("idx_invalidation_queue_entity", "entity_id"),
        ],
    },
    Table {
        name: "catalog_change_log",
        columns: &[
            ("change_id", Column::Serial),
            ("entity_kind", Column::Text(16)),
            ("entity_id", Column::Int),
            ("changed_at", Column::Int),
        ],
        indexes: &[("idx_change_log_changed_at", "changed_at")],
    },
];

/// 失效核心读取的目录表
const CATALOG_TABLES: &[Table] = &[
    Table {
        name: "categories",
        columns: &[("category_id", Column::Key), ("parent_id", Column::NullableInt)],
        indexes: &[],
    },
    Table {
        name: "products",
        columns: &[
            ("product_id", Column::Key),
            ("category_id", Column::NullableInt),
            ("quantity", Column::Int),
            ("modified_at", Column::Int),
            ("cache_updated_at", Column::Int),
        ],
        indexes: &[("idx_products_category", "category_id")],
    },
    Table {
        name: "product_images",
        columns: &[
            ("image_id", Column::Key),
            ("product_id", Column::Int),
            ("modified_at", Column::Int),
            ("cache_updated_at", Column::Int),
        ],
        indexes: &[],
    },
    Table {
        name: "product_notes",
        columns: &[
            ("note_id", Column::Key),
            ("product_id", Column::Int),
            ("modified_at", Column::Int),
            ("cache_updated_at", Column::Int),
        ],
        indexes: &[],
    },
    Table {
        name: "product_qa",
        columns: &[
            ("qa_id", Column::Key),
            ("product_id", Column::Int),
            ("modified_at", Column::Int),
            ("cache_updated_at", Column::Int),
        ],
        indexes: &[],
    },
    Table {
        name: "repair_stories",
        columns: &[
            ("story_id", Column::Key),
            ("product_id", Column::Int),
            ("modified_at", Column::Int),
            ("cache_updated_at", Column::Int),
        ],
        indexes: &[],
    },
    Table {
        name: "product_supersessions",
        columns: &[("product_id", Column::Int), ("superseded_by", Column::Int)],
        indexes: &[
            ("idx_supersessions_from", "product_id"),
            ("idx_supersessions_into", "superseded_by"),
        ],
    },
    Table {
        name: "diagram_pages",
        columns: &[("page_id", Column::Key), ("base_product_id", Column::Int)],
        indexes: &[("idx_diagram_pages_base", "base_product_id")],
    },
    Table {
        name: "diagram_group_members",
        columns: &[("group_id", Column::Int), ("product_id", Column::Int)],
        indexes: &[("idx_group_members_product", "product_id")],
    },
    Table {
        name: "diagram_prop_groups",
        columns: &[("prop_id", Column::Int), ("group_id", Column::Int)],
        indexes: &[],
    },
    Table {
        name: "diagram_prop_housings",
        columns: &[("prop_id", Column::Int), ("housing_product_id", Column::Int)],
        indexes: &[("idx_prop_housings_product", "housing_product_id")],
    },
];

fn create_table_sql(table: &Table, backend: DatabaseBackend) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|(name, column)| format!("{} {}", name, column.sql(backend)))
        .collect();
    // MySQL 不支持 CREATE INDEX IF NOT EXISTS，索引随表一起定义
    if backend == DatabaseBackend::MySql {
        for (index, column) in table.indexes {
            parts.push(format!("INDEX {} ({})", index, column));
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table.name,
        parts.join(", ")
    )
}

fn create_index_sql(table: &Table, backend: DatabaseBackend) -> Vec<String> {
    if backend == DatabaseBackend::MySql {
        return Vec::new();
    }
    table
        .indexes
        .iter()
        .map(|(index, column)| {
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                index, table.name, column
            )
        })
        .collect()
}

/// 生成建表语句
pub fn ddl(backend: DatabaseBackend, with_catalog: bool) -> Vec<String> {
    let catalog: &[Table] = if with_catalog { CATALOG_TABLES } else { &[] };
    OWNED_TABLES
        .iter()
        .chain(catalog.iter())
        .flat_map(|table| {
            let mut statements = vec![create_table_sql(table, backend)];
            statements.extend(create_index_sql(table, backend));
            statements
        })
        .collect()
}

/// 创建缺失的表
///
/// `with_catalog` 为真时同时创建目录表（开发和测试用）。可重复执行。
#[instrument(skip(db), level = "info")]
pub async fn migrate(db: &DatabaseConnection, with_catalog: bool) -> Result<()> {
    let backend = db.get_database_backend();
    let statements = ddl(backend, with_catalog);
    for sql in &statements {
        debug!("Executing DDL: {}", sql);
        db.execute(Statement::from_string(backend, sql.clone()))
            .await?;
    }
    info!(
        "Schema ready: {} statement(s) applied on {:?}",
        statements.len(),
        backend
    );
    Ok(())
}

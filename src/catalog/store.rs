//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块实现了基于 sea-orm 原生语句的目录查询。

use super::{CatalogStore, EntityKind, SupersessionEdge};
use crate::database::{int_values, placeholders, IN_CHUNK};
use crate::error::Result;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// 基于 sea-orm 的目录查询实现
///
/// 支持 PostgreSQL、MySQL 和 SQLite；所有查询都是参数化的，
/// ID 列表按 [`IN_CHUNK`] 分块。
#[derive(Clone)]
pub struct SeaOrmCatalogStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmCatalogStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// 查询 `(k, v)` 两列
    ///
    /// `select` 必须选出名为 `k` 和 `v` 的两列，`filter` 为附加条件。
    async fn pairs(
        &self,
        select: &str,
        in_column: &str,
        filter: Option<&str>,
        ids: &[i64],
    ) -> Result<Vec<(i64, i64)>> {
        let unique: Vec<i64> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let backend = self.db.get_database_backend();
        let mut out = Vec::new();
        for chunk in unique.chunks(IN_CHUNK) {
            let mut sql = format!(
                "{} WHERE {} IN ({})",
                select,
                in_column,
                placeholders(backend, 1, chunk.len())
            );
            if let Some(filter) = filter {
                sql.push_str(" AND ");
                sql.push_str(filter);
            }
            sql.push_str(" ORDER BY k, v");

            let rows = self
                .db
                .query_all(Statement::from_sql_and_values(
                    backend,
                    &sql,
                    int_values(chunk),
                ))
                .await?;
            for row in rows {
                let k: i64 = row.try_get("", "k")?;
                let v: i64 = row.try_get("", "v")?;
                out.push((k, v));
            }
        }
        debug!("{} -> {} row(s) for {} id(s)", in_column, out.len(), unique.len());
        Ok(out)
    }

    async fn edges(&self, in_column: &str, ids: &[i64]) -> Result<Vec<SupersessionEdge>> {
        let rows = self
            .pairs(
                "SELECT product_id AS k, superseded_by AS v FROM product_supersessions",
                in_column,
                None,
                ids,
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|(product_id, superseded_by)| SupersessionEdge {
                product_id,
                superseded_by,
            })
            .collect())
    }
}

#[async_trait]
impl CatalogStore for SeaOrmCatalogStore {
    #[instrument(skip(self, ids), level = "debug", fields(count = ids.len()))]
    async fn owning_products(&self, kind: EntityKind, ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        let (table, id_column) = kind.table();
        let select = format!(
            "SELECT {} AS k, product_id AS v FROM {}",
            id_column, table
        );
        self.pairs(&select, id_column, None, ids).await
    }

    #[instrument(skip(self, product_ids), level = "debug", fields(count = product_ids.len()))]
    async fn product_categories(&self, product_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.pairs(
            "SELECT product_id AS k, category_id AS v FROM products",
            "product_id",
            Some("category_id IS NOT NULL"),
            product_ids,
        )
        .await
    }

    #[instrument(skip(self, category_ids), level = "debug", fields(count = category_ids.len()))]
    async fn category_parents(&self, category_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.pairs(
            "SELECT category_id AS k, parent_id AS v FROM categories",
            "category_id",
            Some("parent_id IS NOT NULL"),
            category_ids,
        )
        .await
    }

    #[instrument(skip(self, product_ids), level = "debug", fields(count = product_ids.len()))]
    async fn supersessions_from(&self, product_ids: &[i64]) -> Result<Vec<SupersessionEdge>> {
        self.edges("product_id", product_ids).await
    }

    #[instrument(skip(self, product_ids), level = "debug", fields(count = product_ids.len()))]
    async fn supersessions_into(&self, product_ids: &[i64]) -> Result<Vec<SupersessionEdge>> {
        self.edges("superseded_by", product_ids).await
    }

    #[instrument(skip(self, product_ids), level = "debug", fields(count = product_ids.len()))]
    async fn product_inventory(&self, product_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.pairs(
            "SELECT product_id AS k, quantity AS v FROM products",
            "product_id",
            None,
            product_ids,
        )
        .await
    }

    #[instrument(skip(self, product_ids), level = "debug", fields(count = product_ids.len()))]
    async fn diagram_pages_for_bases(&self, product_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.pairs(
            "SELECT page_id AS k, base_product_id AS v FROM diagram_pages",
            "base_product_id",
            None,
            product_ids,
        )
        .await
    }

    #[instrument(skip(self, product_ids), level = "debug", fields(count = product_ids.len()))]
    async fn group_memberships(&self, product_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.pairs(
            "SELECT group_id AS k, product_id AS v FROM diagram_group_members",
            "product_id",
            None,
            product_ids,
        )
        .await
    }

    #[instrument(skip(self, group_ids), level = "debug", fields(count = group_ids.len()))]
    async fn prop_groups(&self, group_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.pairs(
            "SELECT prop_id AS k, group_id AS v FROM diagram_prop_groups",
            "group_id",
            None,
            group_ids,
        )
        .await
    }

    #[instrument(skip(self, product_ids), level = "debug", fields(count = product_ids.len()))]
    async fn prop_housings(&self, product_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.pairs(
            "SELECT prop_id AS k, housing_product_id AS v FROM diagram_prop_housings",
            "housing_product_id",
            None,
            product_ids,
        )
        .await
    }

    #[instrument(skip(self, prop_ids), level = "debug", fields(count = prop_ids.len()))]
    async fn groups_of_props(&self, prop_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.pairs(
            "SELECT prop_id AS k, group_id AS v FROM diagram_prop_groups",
            "prop_id",
            None,
            prop_ids,
        )
        .await
    }
}

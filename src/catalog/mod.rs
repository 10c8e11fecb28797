//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了目录实体、变更记录以及失效核心所使用的关系查询接口。

pub mod store;

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use store::SeaOrmCatalogStore;

/// 会使缓存过期的目录实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Product,
    Image,
    Note,
    Qa,
    Story,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Product,
        EntityKind::Image,
        EntityKind::Note,
        EntityKind::Qa,
        EntityKind::Story,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Image => "image",
            EntityKind::Note => "note",
            EntityKind::Qa => "qa",
            EntityKind::Story => "story",
        }
    }

    /// 实体所在的表及其主键列
    pub(crate) fn table(&self) -> (&'static str, &'static str) {
        match self {
            EntityKind::Product => ("products", "product_id"),
            EntityKind::Image => ("product_images", "image_id"),
            EntityKind::Note => ("product_notes", "note_id"),
            EntityKind::Qa => ("product_qa", "qa_id"),
            EntityKind::Story => ("repair_stories", "story_id"),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CacheError::InvalidInput(format!("unknown entity kind '{}'", s)))
    }
}

/// 实体标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn product(id: i64) -> Self {
        Self::new(EntityKind::Product, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// 一次目录变更
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChangeRecord {
    pub entity: EntityRef,
    /// 变更时间（毫秒时间戳）
    pub changed_at: i64,
    /// 变更日志行ID（仅变更日志来源）
    pub change_id: Option<i64>,
}

impl ChangeRecord {
    pub fn new(entity: EntityRef, changed_at: i64) -> Self {
        Self {
            entity,
            changed_at,
            change_id: None,
        }
    }
}

/// 替代关系边：`product_id` 被 `superseded_by` 替代
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SupersessionEdge {
    pub product_id: i64,
    pub superseded_by: i64,
}

/// 关系查询接口
///
/// 每个方法接收一组ID并返回 `(键, 值)` 行；实现负责分块和参数化。
/// 所有方法都是只读的，可以并发调用。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// 非产品实体的所属产品：`(entity_id, product_id)`
    async fn owning_products(&self, kind: EntityKind, ids: &[i64]) -> Result<Vec<(i64, i64)>>;

    /// 产品所属分类：`(product_id, category_id)`
    async fn product_categories(&self, product_ids: &[i64]) -> Result<Vec<(i64, i64)>>;

    /// 分类的父分类：`(category_id, parent_id)`
    async fn category_parents(&self, category_ids: &[i64]) -> Result<Vec<(i64, i64)>>;

    /// 从这些产品出发的替代边
    async fn supersessions_from(&self, product_ids: &[i64]) -> Result<Vec<SupersessionEdge>>;

    /// 指向这些产品的替代边
    async fn supersessions_into(&self, product_ids: &[i64]) -> Result<Vec<SupersessionEdge>>;

    /// 产品库存：`(product_id, quantity)`，目录中不存在的产品不返回
    async fn product_inventory(&self, product_ids: &[i64]) -> Result<Vec<(i64, i64)>>;

    /// 以这些产品为基础产品的图纸页面：`(page_id, base_product_id)`
    async fn diagram_pages_for_bases(&self, product_ids: &[i64]) -> Result<Vec<(i64, i64)>>;

    /// 直接组成员关系：`(group_id, product_id)`
    async fn group_memberships(&self, product_ids: &[i64]) -> Result<Vec<(i64, i64)>>;

    /// 属性页与组的关系：`(prop_id, group_id)`
    async fn prop_groups(&self, group_ids: &[i64]) -> Result<Vec<(i64, i64)>>;

    /// 以这些产品为外壳的属性页：`(prop_id, housing_product_id)`
    async fn prop_housings(&self, product_ids: &[i64]) -> Result<Vec<(i64, i64)>>;

    /// 属性页包含的组：`(prop_id, group_id)`
    async fn groups_of_props(&self, prop_ids: &[i64]) -> Result<Vec<(i64, i64)>>;
}

//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了模式生成器：根据变更实体遍历目录关系，生成需要失效的抽象缓存键模式。

use super::supersession::SupersessionGraph;
use super::{Endpoint, KeyPattern};
use crate::catalog::{CatalogStore, ChangeRecord, EntityKind, EntityRef};
use crate::error::{CacheError, Result};
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

/// 实体到抽象模式的映射
pub type PatternMap = BTreeMap<EntityRef, BTreeSet<KeyPattern>>;

type ProductPatterns = BTreeMap<i64, BTreeSet<KeyPattern>>;

/// 生成器配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// 向上遍历的祖先分类层数
    pub listing_depth: u32,
    /// 替代链遍历的最大步数
    pub supersession_max_depth: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            listing_depth: 2,
            supersession_max_depth: 32,
        }
    }
}

/// 模式生成器
///
/// 输出只依赖输入集合和目录状态，与遍历顺序无关。相互独立的子查询并发执行。
#[derive(Clone)]
pub struct PatternGenerator {
    store: Arc<dyn CatalogStore>,
    config: GeneratorConfig,
}

impl PatternGenerator {
    pub fn new(store: Arc<dyn CatalogStore>, config: GeneratorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// 为一组变更生成抽象模式
    ///
    /// 空输入返回空映射。无法解析所属产品的非产品实体只贡献其自身类型的模式。
    #[instrument(skip(self, changes), level = "debug", fields(changes = changes.len()))]
    pub async fn generate(&self, changes: &[ChangeRecord]) -> Result<PatternMap> {
        let entities: BTreeSet<EntityRef> = changes.iter().map(|c| c.entity).collect();
        if entities.is_empty() {
            return Ok(PatternMap::new());
        }

        let owners = self.resolve_owners(&entities).await?;
        let products: BTreeSet<i64> = owners.values().flatten().copied().collect();
        let product_patterns = self.product_patterns(&products).await?;

        let mut map = PatternMap::new();
        for entity in &entities {
            let patterns = map.entry(*entity).or_default();
            if entity.kind == EntityKind::Story {
                patterns.insert(KeyPattern::for_entity(Endpoint::RepairStories, entity.id));
            }
            for product in owners.get(entity).into_iter().flatten() {
                if let Some(found) = product_patterns.get(product) {
                    patterns.extend(found.iter().cloned());
                }
            }
        }

        debug!(
            "Generated patterns for {} entities across {} product(s)",
            map.len(),
            products.len()
        );
        Ok(map)
    }

    /// 合并所有实体的模式
    pub fn flatten(map: &PatternMap) -> BTreeSet<KeyPattern> {
        map.values().flatten().cloned().collect()
    }

    /// 每个实体对应的产品
    async fn resolve_owners(
        &self,
        entities: &BTreeSet<EntityRef>,
    ) -> Result<BTreeMap<EntityRef, BTreeSet<i64>>> {
        let mut by_kind: BTreeMap<EntityKind, Vec<i64>> = BTreeMap::new();
        for entity in entities {
            by_kind.entry(entity.kind).or_default().push(entity.id);
        }

        let mut owners: BTreeMap<EntityRef, BTreeSet<i64>> = BTreeMap::new();
        let mut lookups = Vec::new();
        for (kind, ids) in &by_kind {
            if *kind == EntityKind::Product {
                for id in ids {
                    owners.entry(EntityRef::product(*id)).or_default().insert(*id);
                }
            } else {
                let store = self.store.clone();
                let kind = *kind;
                let ids = ids.clone();
                lookups.push(async move {
                    let rows = store.owning_products(kind, &ids).await?;
                    Ok::<_, CacheError>((kind, rows))
                });
            }
        }

        for (kind, rows) in try_join_all(lookups).await? {
            for (entity_id, product_id) in rows {
                owners
                    .entry(EntityRef::new(kind, entity_id))
                    .or_default()
                    .insert(product_id);
            }
        }
        Ok(owners)
    }

    async fn product_patterns(&self, products: &BTreeSet<i64>) -> Result<ProductPatterns> {
        let mut out = ProductPatterns::new();
        if products.is_empty() {
            return Ok(out);
        }
        let ids: Vec<i64> = products.iter().copied().collect();

        for id in &ids {
            out.entry(*id)
                .or_default()
                .insert(KeyPattern::for_entity(Endpoint::SingleProduct, *id));
        }

        let (listings, pages, diagrams) = futures::try_join!(
            self.listing_patterns(&ids),
            self.diagram_page_patterns(products),
            self.group_prop_patterns(&ids),
        )?;

        for part in [listings, pages, diagrams] {
            for (product, patterns) in part {
                out.entry(product).or_default().extend(patterns);
            }
        }
        Ok(out)
    }

    /// 祖先分类的列表页
    ///
    /// 从产品所在分类沿父分类边最多走 `listing_depth` 步；产品自身的分类不计入。
    async fn listing_patterns(&self, products: &[i64]) -> Result<ProductPatterns> {
        let categories = self.store.product_categories(products).await?;

        // 每个产品的遍历状态：已访问分类与当前边界
        let mut visited: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        let mut frontier: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for (product, category) in categories {
            visited.entry(product).or_default().insert(category);
            frontier.entry(product).or_default().insert(category);
        }

        let mut parents: HashMap<i64, Vec<i64>> = HashMap::new();
        let mut out = ProductPatterns::new();

        for _ in 0..self.config.listing_depth {
            let wanted: Vec<i64> = frontier
                .values()
                .flatten()
                .filter(|c| !parents.contains_key(*c))
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if !wanted.is_empty() {
                for category in &wanted {
                    parents.entry(*category).or_default();
                }
                for (category, parent) in self.store.category_parents(&wanted).await? {
                    parents.entry(category).or_default().push(parent);
                }
            }

            let mut next: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
            for (product, current) in &frontier {
                let seen = visited.entry(*product).or_default();
                for category in current {
                    for parent in parents.get(category).into_iter().flatten() {
                        if seen.insert(*parent) {
                            next.entry(*product).or_default().insert(*parent);
                            out.entry(*product)
                                .or_default()
                                .insert(KeyPattern::for_entity(Endpoint::ProductListing, *parent));
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(out)
    }

    /// 当前有效产品属于变更集合的图纸页面
    async fn diagram_page_patterns(&self, changed: &BTreeSet<i64>) -> Result<ProductPatterns> {
        let max_depth = self.config.supersession_max_depth;
        let mut graph = SupersessionGraph::new(max_depth);

        // 反向闭包：替代链可能到达变更产品的所有基础产品
        let mut bases: BTreeSet<i64> = changed.clone();
        let mut frontier: Vec<i64> = changed.iter().copied().collect();
        for _ in 0..max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for edge in self.store.supersessions_into(&frontier).await? {
                graph.add_edge(edge.product_id, edge.superseded_by);
                if bases.insert(edge.product_id) {
                    next.push(edge.product_id);
                }
            }
            frontier = next;
        }

        let base_ids: Vec<i64> = bases.iter().copied().collect();
        let pages = self.store.diagram_pages_for_bases(&base_ids).await?;
        if pages.is_empty() {
            return Ok(ProductPatterns::new());
        }

        // 正向闭包：页面基础产品的完整替代链
        let page_bases: BTreeSet<i64> = pages.iter().map(|(_, base)| *base).collect();
        let mut nodes: BTreeSet<i64> = page_bases.clone();
        let mut frontier: Vec<i64> = page_bases.into_iter().collect();
        for _ in 0..max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for edge in self.store.supersessions_from(&frontier).await? {
                graph.add_edge(edge.product_id, edge.superseded_by);
                if nodes.insert(edge.superseded_by) {
                    next.push(edge.superseded_by);
                }
            }
            frontier = next;
        }

        let node_ids: Vec<i64> = nodes.into_iter().collect();
        for (product, quantity) in self.store.product_inventory(&node_ids).await? {
            graph.set_inventory(product, quantity);
        }

        let mut out = ProductPatterns::new();
        for (page, base) in pages {
            match graph.resolve_live(base) {
                Some(live) if changed.contains(&live) => {
                    out.entry(live)
                        .or_default()
                        .insert(KeyPattern::for_entity(Endpoint::DiagramPage, page));
                }
                Some(_) => {}
                None => debug!("Diagram page {} has no live product, skipping", page),
            }
        }
        Ok(out)
    }

    /// 图纸组与属性页
    ///
    /// 两条独立路径：直接组成员关系，以及属性页的外壳产品。
    async fn group_prop_patterns(&self, products: &[i64]) -> Result<ProductPatterns> {
        let (memberships, housings) = futures::try_join!(
            self.store.group_memberships(products),
            self.store.prop_housings(products),
        )?;

        let groups: Vec<i64> = memberships
            .iter()
            .map(|(group, _)| *group)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let props: Vec<i64> = housings
            .iter()
            .map(|(prop, _)| *prop)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let (props_by_group, groups_by_prop) = futures::try_join!(
            self.store.prop_groups(&groups),
            self.store.groups_of_props(&props),
        )?;

        let mut props_of_group: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for (prop, group) in props_by_group {
            props_of_group.entry(group).or_default().insert(prop);
        }
        let mut groups_of_prop: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for (prop, group) in groups_by_prop {
            groups_of_prop.entry(prop).or_default().insert(group);
        }

        let mut out = ProductPatterns::new();
        for (group, product) in memberships {
            let patterns = out.entry(product).or_default();
            patterns.insert(KeyPattern::for_entity(Endpoint::DiagramGroup, group));
            for prop in props_of_group.get(&group).into_iter().flatten() {
                patterns.insert(KeyPattern::for_entity(Endpoint::DiagramProp, *prop));
            }
        }
        for (prop, product) in housings {
            let patterns = out.entry(product).or_default();
            patterns.insert(KeyPattern::for_entity(Endpoint::DiagramProp, prop));
            for group in groups_of_prop.get(&prop).into_iter().flatten() {
                patterns.insert(KeyPattern::for_entity(Endpoint::DiagramGroup, *group));
            }
        }
        Ok(out)
    }
}

//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了产品替代关系图，以及为图纸页面选择"当前有效产品"的规则。

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// 替代链中的一个节点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainNode {
    pub product_id: i64,
    /// 距离基础产品的步数（基础产品为0）
    pub depth: u32,
    /// 库存数量
    pub quantity: i64,
}

impl ChainNode {
    pub fn in_stock(&self) -> bool {
        self.quantity > 0
    }
}

/// 产品替代图（"被……替代"方向）
#[derive(Debug, Clone, Default)]
pub struct SupersessionGraph {
    forward: BTreeMap<i64, BTreeSet<i64>>,
    inventory: HashMap<i64, i64>,
    max_depth: u32,
}

impl SupersessionGraph {
    pub fn new(max_depth: u32) -> Self {
        Self {
            forward: BTreeMap::new(),
            inventory: HashMap::new(),
            max_depth,
        }
    }

    /// 记录 `product_id` 被 `superseded_by` 替代
    pub fn add_edge(&mut self, product_id: i64, superseded_by: i64) {
        if product_id != superseded_by {
            self.forward.entry(product_id).or_default().insert(superseded_by);
        }
    }

    /// 记录产品存在于目录中及其库存
    pub fn set_inventory(&mut self, product_id: i64, quantity: i64) {
        self.inventory.insert(product_id, quantity);
    }

    pub fn successors(&self, product_id: i64) -> impl Iterator<Item = i64> + '_ {
        self.forward
            .get(&product_id)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// 从基础产品出发的替代链（广度优先）
    ///
    /// 只包含目录中存在的产品；不存在的产品仍会被穿过，但不会成为候选。
    /// 环路通过已访问集合终止，深度受 `max_depth` 限制。
    pub fn chain(&self, base: i64) -> Vec<ChainNode> {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        let mut chain = Vec::new();

        visited.insert(base);
        queue.push_back((base, 0u32));

        while let Some((product_id, depth)) = queue.pop_front() {
            if let Some(quantity) = self.inventory.get(&product_id) {
                chain.push(ChainNode {
                    product_id,
                    depth,
                    quantity: *quantity,
                });
            }
            if depth >= self.max_depth {
                continue;
            }
            for next in self.successors(product_id) {
                if visited.insert(next) {
                    queue.push_back((next, depth + 1));
                }
            }
        }

        chain
    }

    /// 解析页面的当前有效产品
    pub fn resolve_live(&self, base: i64) -> Option<i64> {
        choose_live(&self.chain(base))
    }
}

/// 从替代链中选出当前有效产品
///
/// 有库存的产品优先；同一优先级内取链上最新（最深）的产品；
/// 深度相同时取产品ID最小者。空链返回 `None`。
pub fn choose_live(chain: &[ChainNode]) -> Option<i64> {
    chain
        .iter()
        .max_by(|a, b| {
            a.in_stock()
                .cmp(&b.in_stock())
                .then(a.depth.cmp(&b.depth))
                .then(b.product_id.cmp(&a.product_id))
        })
        .map(|node| node.product_id)
}

//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了语言展开器：把抽象模式展开为每种已配置语言的具体模式。

use super::{ConcretePattern, KeyPattern, LocaleSet, LocaleSlot};
use std::collections::BTreeSet;

/// 语言展开器
///
/// 纯函数，没有副作用；输出是集合，与输入顺序无关。
#[derive(Debug, Clone)]
pub struct LocaleExpander {
    locales: LocaleSet,
}

impl LocaleExpander {
    pub fn new(locales: LocaleSet) -> Self {
        Self { locales }
    }

    pub fn locales(&self) -> &LocaleSet {
        &self.locales
    }

    /// 展开单个模式
    ///
    /// 带占位符的模式为每种语言产生一个具体模式；已经具体的模式原样返回。
    pub fn expand(&self, pattern: &KeyPattern) -> BTreeSet<ConcretePattern> {
        match &pattern.locale {
            LocaleSlot::Concrete(locale) => {
                let mut out = BTreeSet::new();
                out.insert(ConcretePattern::new(
                    pattern.endpoint,
                    pattern.matcher.clone(),
                    locale.clone(),
                ));
                out
            }
            LocaleSlot::Placeholder => self
                .locales
                .iter()
                .map(|locale| {
                    ConcretePattern::new(pattern.endpoint, pattern.matcher.clone(), locale.clone())
                })
                .collect(),
        }
    }

    /// 展开一组模式并去重
    pub fn expand_all<'a, I>(&self, patterns: I) -> BTreeSet<ConcretePattern>
    where
        I: IntoIterator<Item = &'a KeyPattern>,
    {
        patterns
            .into_iter()
            .flat_map(|pattern| self.expand(pattern))
            .collect()
    }
}

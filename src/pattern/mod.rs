//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存键模式：端点命名空间、匹配表达式和语言槽位。
//!
//! 缓存键的布局为 `{key_prefix}{endpoint}:{match}:{locale}`，例如
//! `/single_product:500:en`。语言槽位未解析的模式称为抽象模式，
//! 必须先经过 [`locale::LocaleExpander`] 展开才能交给驱逐器。

pub mod generator;
pub mod locale;
pub mod supersession;

use crate::error::{CacheError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use generator::{GeneratorConfig, PatternGenerator, PatternMap};
pub use locale::LocaleExpander;
pub use supersession::{ChainNode, SupersessionGraph};

lazy_static! {
    static ref LOCALE_CODE: Regex =
        Regex::new(r"^[a-z]{2}(-[A-Z]{2})?$").expect("locale code regex is valid");
}

/// 语言占位符在 `Display` 中的表示
pub const LOCALE_PLACEHOLDER: &str = "{locale}";

/// 缓存端点命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    BulletinViewer,
    ContactUs,
    Content,
    DiagramGroup,
    DiagramPage,
    DiagramProp,
    DiagramYear,
    GeneralDoc,
    PartsHome,
    ProductListing,
    Redirect,
    RepairStories,
    SingleProduct,
    TechArticle,
}

impl Endpoint {
    /// 所有已知端点
    pub const ALL: [Endpoint; 14] = [
        Endpoint::BulletinViewer,
        Endpoint::ContactUs,
        Endpoint::Content,
        Endpoint::DiagramGroup,
        Endpoint::DiagramPage,
        Endpoint::DiagramProp,
        Endpoint::DiagramYear,
        Endpoint::GeneralDoc,
        Endpoint::PartsHome,
        Endpoint::ProductListing,
        Endpoint::Redirect,
        Endpoint::RepairStories,
        Endpoint::SingleProduct,
        Endpoint::TechArticle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::BulletinViewer => "bulletin_viewer",
            Endpoint::ContactUs => "contact_us",
            Endpoint::Content => "content",
            Endpoint::DiagramGroup => "diagram_group",
            Endpoint::DiagramPage => "diagram_page",
            Endpoint::DiagramProp => "diagram_prop",
            Endpoint::DiagramYear => "diagram_year",
            Endpoint::GeneralDoc => "general_doc",
            Endpoint::PartsHome => "parts_home",
            Endpoint::ProductListing => "product_listing",
            Endpoint::Redirect => "redirect",
            Endpoint::RepairStories => "repair_stories",
            Endpoint::SingleProduct => "single_product",
            Endpoint::TechArticle => "tech_article",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| CacheError::InvalidInput(format!("unknown endpoint '{}'", s)))
    }
}

/// 语言代码，例如 `en`、`pt`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    /// 校验并创建语言代码
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        if !LOCALE_CODE.is_match(&code) {
            return Err(CacheError::InvalidInput(format!(
                "invalid locale code '{}'",
                code
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Locale {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self> {
        Locale::new(value)
    }
}

impl From<Locale> for String {
    fn from(value: Locale) -> Self {
        value.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 有序、去重的受支持语言集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleSet {
    locales: Vec<Locale>,
}

impl LocaleSet {
    /// 从配置的语言代码创建集合
    ///
    /// 空集合、重复代码和格式错误的代码都会被拒绝。
    pub fn new<I, S>(codes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut locales: Vec<Locale> = Vec::new();
        for code in codes {
            let locale = Locale::new(code)?;
            if locales.contains(&locale) {
                return Err(CacheError::ConfigError(format!(
                    "duplicate locale '{}'",
                    locale
                )));
            }
            locales.push(locale);
        }
        if locales.is_empty() {
            return Err(CacheError::ConfigError(
                "at least one locale must be configured".to_string(),
            ));
        }
        Ok(Self { locales })
    }

    /// 解析请求中的语言代码，必须属于已配置的集合
    pub fn parse(&self, code: &str) -> Result<Locale> {
        self.locales
            .iter()
            .find(|l| l.as_str() == code)
            .cloned()
            .ok_or_else(|| CacheError::InvalidInput(format!("locale '{}' is not configured", code)))
    }

    pub fn contains(&self, locale: &Locale) -> bool {
        self.locales.contains(locale)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Locale> {
        self.locales.iter()
    }

    pub fn len(&self) -> usize {
        self.locales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locales.is_empty()
    }
}

impl Default for LocaleSet {
    fn default() -> Self {
        Self {
            locales: ["en", "es", "fr", "pt"]
                .iter()
                .map(|c| Locale(c.to_string()))
                .collect(),
        }
    }
}

/// 转义 Redis glob 元字符
pub fn escape_glob(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// 键中间段的匹配表达式
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchExpr {
    /// 任意内容：`*`
    Any,
    /// 包含子串：`*s*`
    Contains(String),
    /// 精确匹配
    Exact(String),
}

impl MatchExpr {
    /// 请求中的可选子串过滤器
    ///
    /// 过滤器按字面子串匹配：其中的 `*`、`?`、`[`、`]` 会被转义，不再作为通配符。
    pub fn from_filter(filter: Option<&str>) -> Self {
        match filter {
            None => MatchExpr::Any,
            Some(s) if s.is_empty() => MatchExpr::Any,
            Some(s) => MatchExpr::Contains(s.to_string()),
        }
    }

    pub fn id(id: i64) -> Self {
        MatchExpr::Exact(id.to_string())
    }
}

impl fmt::Display for MatchExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchExpr::Any => f.write_str("*"),
            MatchExpr::Contains(s) => write!(f, "*{}*", escape_glob(s)),
            MatchExpr::Exact(s) => f.write_str(&escape_glob(s)),
        }
    }
}

/// 语言槽位
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocaleSlot {
    /// 未解析，需要展开
    Placeholder,
    Concrete(Locale),
}

/// 缓存键模式（抽象或具体）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPattern {
    pub endpoint: Endpoint,
    pub matcher: MatchExpr,
    pub locale: LocaleSlot,
}

impl KeyPattern {
    /// 创建带语言占位符的抽象模式
    pub fn placeholder(endpoint: Endpoint, matcher: MatchExpr) -> Self {
        Self {
            endpoint,
            matcher,
            locale: LocaleSlot::Placeholder,
        }
    }

    /// 实体页面的抽象模式，例如 `single_product:500:{locale}`
    pub fn for_entity(endpoint: Endpoint, id: i64) -> Self {
        Self::placeholder(endpoint, MatchExpr::id(id))
    }

    /// 替换语言槽位
    pub fn with_locale(&self, locale: Locale) -> Self {
        Self {
            endpoint: self.endpoint,
            matcher: self.matcher.clone(),
            locale: LocaleSlot::Concrete(locale),
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self.locale, LocaleSlot::Concrete(_))
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locale {
            LocaleSlot::Placeholder => {
                write!(f, "{}:{}:{}", self.endpoint, self.matcher, LOCALE_PLACEHOLDER)
            }
            LocaleSlot::Concrete(locale) => {
                write!(f, "{}:{}:{}", self.endpoint, self.matcher, locale)
            }
        }
    }
}

/// 语言已解析、可以交给驱逐器的模式
///
/// 只能通过 [`ConcretePattern::new`]、[`ConcretePattern::try_from`] 或语言展开器构造，
/// 因此带占位符的模式在类型层面无法到达驱逐器。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConcretePattern {
    endpoint: Endpoint,
    matcher: MatchExpr,
    locale: Locale,
}

impl ConcretePattern {
    pub fn new(endpoint: Endpoint, matcher: MatchExpr, locale: Locale) -> Self {
        Self {
            endpoint,
            matcher,
            locale,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn matcher(&self) -> &MatchExpr {
        &self.matcher
    }

    pub fn locale(&self) -> &Locale {
        &self.locale
    }

    /// 渲染为发送给缓存的 glob 字符串
    pub fn render(&self, key_prefix: &str) -> String {
        format!("{}{}", key_prefix, self)
    }

    /// 转回通用模式表示
    pub fn to_pattern(&self) -> KeyPattern {
        KeyPattern {
            endpoint: self.endpoint,
            matcher: self.matcher.clone(),
            locale: LocaleSlot::Concrete(self.locale.clone()),
        }
    }
}

impl TryFrom<KeyPattern> for ConcretePattern {
    type Error = CacheError;

    fn try_from(pattern: KeyPattern) -> Result<Self> {
        match pattern.locale {
            LocaleSlot::Concrete(locale) => Ok(Self {
                endpoint: pattern.endpoint,
                matcher: pattern.matcher,
                locale,
            }),
            LocaleSlot::Placeholder => Err(CacheError::InvalidInput(format!(
                "pattern '{}:{}:{}' has an unresolved locale",
                pattern.endpoint, pattern.matcher, LOCALE_PLACEHOLDER
            ))),
        }
    }
}

impl fmt::Display for ConcretePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.endpoint, self.matcher, self.locale)
    }
}

/// 解析队列中存储的模式字符串（不含前缀）
///
/// 格式为 `{endpoint}:{match}:{locale}`；匹配段中转义过的字符原样保留。
impl FromStr for ConcretePattern {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let (endpoint, rest) = s
            .split_once(':')
            .ok_or_else(|| CacheError::InvalidInput(format!("malformed pattern '{}'", s)))?;
        let (matcher, locale) = rest
            .rsplit_once(':')
            .ok_or_else(|| CacheError::InvalidInput(format!("malformed pattern '{}'", s)))?;
        let endpoint: Endpoint = endpoint.parse()?;
        let locale = Locale::new(locale)?;
        let matcher = parse_matcher(matcher);
        Ok(ConcretePattern::new(endpoint, matcher, locale))
    }
}

fn unescape_glob(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn ends_with_unescaped_star(raw: &str) -> bool {
    if !raw.ends_with('*') {
        return false;
    }
    let backslashes = raw[..raw.len() - 1]
        .chars()
        .rev()
        .take_while(|c| *c == '\\')
        .count();
    backslashes % 2 == 0
}

fn parse_matcher(raw: &str) -> MatchExpr {
    if raw == "*" {
        return MatchExpr::Any;
    }
    if raw.len() >= 2 && raw.starts_with('*') && ends_with_unescaped_star(raw) {
        MatchExpr::Contains(unescape_glob(&raw[1..raw.len() - 1]))
    } else {
        MatchExpr::Exact(unescape_glob(raw))
    }
}

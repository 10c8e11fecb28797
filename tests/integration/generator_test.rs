//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 模式生成集成测试：SQLite 目录上的关系遍历与语言展开

#[path = "../common/mod.rs"]
mod common;

use common::{exec, memory_db, seed_scenario_a, setup_logging};
use pilotcache::catalog::store::SeaOrmCatalogStore;
use pilotcache::catalog::{ChangeRecord, EntityKind, EntityRef};
use pilotcache::pattern::{GeneratorConfig, LocaleExpander, LocaleSet, PatternGenerator};
use std::collections::BTreeSet;
use std::sync::Arc;

fn rendered<T: ToString>(patterns: impl IntoIterator<Item = T>) -> BTreeSet<String> {
    patterns.into_iter().map(|p| p.to_string()).collect()
}

#[tokio::test]
async fn test_product_detail_and_ancestor_listing() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;

    let generator = PatternGenerator::new(
        Arc::new(SeaOrmCatalogStore::new(db.clone())),
        GeneratorConfig::default(),
    );
    let map = generator
        .generate(&[ChangeRecord::new(EntityRef::product(500), 2000)])
        .await
        .unwrap();
    let abstract_patterns = PatternGenerator::flatten(&map);
    assert_eq!(
        rendered(&abstract_patterns),
        rendered(["single_product:500:{locale}", "product_listing:3:{locale}"])
    );

    let concrete = LocaleExpander::new(LocaleSet::default()).expand_all(abstract_patterns.iter());
    assert_eq!(concrete.len(), 8);
    assert!(rendered(&concrete).contains("product_listing:3:fr"));
}

#[tokio::test]
async fn test_diagram_page_resolves_through_supersession_chain() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    // 页面 70 的基础产品 400 被 450 替代，450 又被 500 替代；只有 500 有库存
    exec(
        &db,
        "INSERT INTO products (product_id, category_id, quantity, modified_at, cache_updated_at) \
         VALUES (400, NULL, 0, 0, 0), (450, NULL, 0, 0, 0)",
    )
    .await;
    exec(
        &db,
        "INSERT INTO product_supersessions (product_id, superseded_by) VALUES (400, 450), (450, 500)",
    )
    .await;
    exec(
        &db,
        "INSERT INTO diagram_pages (page_id, base_product_id) VALUES (70, 400), (71, 501)",
    )
    .await;

    let generator = PatternGenerator::new(
        Arc::new(SeaOrmCatalogStore::new(db.clone())),
        GeneratorConfig::default(),
    );

    let changed_live = generator
        .generate(&[ChangeRecord::new(EntityRef::product(500), 0)])
        .await
        .unwrap();
    let patterns = rendered(PatternGenerator::flatten(&changed_live));
    assert!(patterns.contains("diagram_page:70:{locale}"));
    assert!(!patterns.contains("diagram_page:71:{locale}"));

    // 中间产品不是当前有效产品，页面不受影响
    let changed_middle = generator
        .generate(&[ChangeRecord::new(EntityRef::product(450), 0)])
        .await
        .unwrap();
    let patterns = rendered(PatternGenerator::flatten(&changed_middle));
    assert_eq!(patterns, rendered(["single_product:450:{locale}"]));
}

#[tokio::test]
async fn test_group_and_prop_paths() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    exec(&db, "INSERT INTO diagram_group_members (group_id, product_id) VALUES (21, 500)").await;
    exec(
        &db,
        "INSERT INTO diagram_prop_groups (prop_id, group_id) VALUES (31, 21), (32, 22)",
    )
    .await;
    exec(
        &db,
        "INSERT INTO diagram_prop_housings (prop_id, housing_product_id) VALUES (32, 500)",
    )
    .await;

    let generator = PatternGenerator::new(
        Arc::new(SeaOrmCatalogStore::new(db.clone())),
        GeneratorConfig::default(),
    );
    let map = generator
        .generate(&[ChangeRecord::new(EntityRef::product(500), 0)])
        .await
        .unwrap();
    let patterns = rendered(PatternGenerator::flatten(&map));
    for expected in [
        "diagram_group:21:{locale}",
        "diagram_prop:31:{locale}",
        "diagram_prop:32:{locale}",
        "diagram_group:22:{locale}",
    ] {
        assert!(patterns.contains(expected), "missing {}", expected);
    }
}

#[tokio::test]
async fn test_owned_entities_resolve_to_product() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    exec(
        &db,
        "INSERT INTO product_images (image_id, product_id, modified_at, cache_updated_at) VALUES (9, 500, 0, 0)",
    )
    .await;
    exec(
        &db,
        "INSERT INTO repair_stories (story_id, product_id, modified_at, cache_updated_at) VALUES (8, 501, 0, 0)",
    )
    .await;

    let generator = PatternGenerator::new(
        Arc::new(SeaOrmCatalogStore::new(db.clone())),
        GeneratorConfig::default(),
    );
    let map = generator
        .generate(&[
            ChangeRecord::new(EntityRef::new(EntityKind::Image, 9), 0),
            ChangeRecord::new(EntityRef::new(EntityKind::Story, 8), 0),
        ])
        .await
        .unwrap();

    let image = rendered(&map[&EntityRef::new(EntityKind::Image, 9)]);
    assert!(image.contains("single_product:500:{locale}"));
    assert!(image.contains("product_listing:3:{locale}"));

    let story = rendered(&map[&EntityRef::new(EntityKind::Story, 8)]);
    assert!(story.contains("repair_stories:8:{locale}"));
    assert!(story.contains("single_product:501:{locale}"));
}

#[tokio::test]
async fn test_generation_is_deterministic() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    let generator = PatternGenerator::new(
        Arc::new(SeaOrmCatalogStore::new(db.clone())),
        GeneratorConfig::default(),
    );
    let changes = [
        ChangeRecord::new(EntityRef::product(501), 0),
        ChangeRecord::new(EntityRef::product(500), 0),
    ];
    let first = generator.generate(&changes).await.unwrap();
    let second = generator.generate(&changes).await.unwrap();
    assert_eq!(first, second);
}

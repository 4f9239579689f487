mod common;

use elif_optimized_queries::{Filter, OptimizerConfig, OrderDirection, OutputFormat, Output, QueryError};
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

fn as_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap()
}

#[tokio::test]
async fn test_article_with_author_and_comments_in_one_statement() {
    let (optimizer, executor) = common::optimizer(OptimizerConfig::default()).await;

    let records = optimizer
        .query("Article")
        .unwrap()
        .select(["id", "title", "published"])
        .with("author")
        .with_columns("comments", ["id", "body", "article_id"])
        .where_eq("id", 1)
        .get()
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(
        as_json(&records[0]),
        json!({
            "id": 1,
            "title": "Hello",
            "published": 1,
            "author": {"id": 10, "name": "John"},
            "comments": [
                {"id": 100, "body": "A", "article_id": 1},
                {"id": 101, "body": "B", "article_id": 1}
            ]
        })
    );
    assert_eq!(executor.executed(), 1);
}

#[tokio::test]
async fn test_missing_relations_decode_to_empty_values() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    let record = optimizer
        .query("Article")
        .unwrap()
        .with_many(["author", "comments", "tags"])
        .find(2)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record["title"], json!("Draft"));
    assert_eq!(record["author"], Value::Null);
    assert_eq!(record["comments"], json!([]));
    assert_eq!(record["tags"], json!([]));
}

#[tokio::test]
async fn test_counts_and_aggregates() {
    let (optimizer, executor) = common::optimizer(OptimizerConfig::default()).await;

    let records = optimizer
        .query("Article")
        .unwrap()
        .select(["id"])
        .with_count("comments")
        .with_count_where("popular_comments", "comments", |f| {
            f.where_op("votes", elif_optimized_queries::Operator::GreaterThanOrEqual, 5)
        })
        .with_sum("comments", "votes")
        .with_max("comments", "votes")
        .order_by("id")
        .get()
        .await
        .unwrap();

    assert_eq!(
        as_json(&records),
        json!([
            {"id": 1, "comments_count": 2, "popular_comments": 1, "sum_comments_votes": 8, "max_comments_votes": 5},
            {"id": 2, "comments_count": 0, "popular_comments": 0, "sum_comments_votes": null, "max_comments_votes": null}
        ])
    );
    assert_eq!(executor.executed(), 1);
}

#[tokio::test]
async fn test_collection_filter_orders_and_limits_related_rows() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    let record = optimizer
        .query("Article")
        .unwrap()
        .with_where("comments", |f| f.order_by("id", OrderDirection::Desc).limit(1))
        .find(1)
        .await
        .unwrap()
        .unwrap();

    let comments = record["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["body"], json!("B"));
}

#[tokio::test]
async fn test_many_to_many_and_nested_paths() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    let record = optimizer
        .query("Article")
        .unwrap()
        .with("tags")
        .with_nested("author.name")
        .find(1)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record["tags"], json!([{"id": 1, "name": "rust"}]));
    assert_eq!(record["author"], json!({"name": "John"}));
}

async fn reactions_and_images(optimizer: &elif_optimized_queries::QueryOptimizer) -> Value {
    let by_id = || Some(Filter::new().order_by("id", OrderDirection::Asc));
    let records = optimizer
        .query("Article")
        .unwrap()
        .select(["id"])
        .with_collection("reactions", ["id", "kind"], by_id())
        .with_collection("images", ["id", "url"], by_id())
        .with_count("reactions")
        .order_by("id")
        .get()
        .await
        .unwrap();
    as_json(&records)
}

#[tokio::test]
async fn test_has_many_through_and_morph_many() {
    let (optimizer, executor) = common::optimizer(OptimizerConfig::default()).await;

    assert_eq!(
        reactions_and_images(&optimizer).await,
        json!([
            {
                "id": 1,
                "reactions": [{"id": 1, "kind": "like"}, {"id": 2, "kind": "wow"}],
                "images": [{"id": 1, "url": "a.png"}, {"id": 3, "url": "c.png"}],
                "reactions_count": 2
            },
            {"id": 2, "reactions": [], "images": [], "reactions_count": 0}
        ])
    );
    assert_eq!(executor.executed(), 1);

    // The per-relation fallback attaches the same rows
    let failing = std::sync::Arc::new(
        common::RecordingExecutor::new(common::seeded_pool().await).failing_on("json_group_array"),
    );
    let (fallback, _) = common::optimizer_with(OptimizerConfig::default(), failing);
    assert_eq!(reactions_and_images(&fallback).await, reactions_and_images(&optimizer).await);
}

#[tokio::test]
async fn test_morph_one_matches_owner_type() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    let users = optimizer
        .query("User")
        .unwrap()
        .with("avatar")
        .order_by("id")
        .get()
        .await
        .unwrap();

    assert_eq!(users.len(), 2);
    assert_eq!(
        users[0]["avatar"],
        json!({"id": 2, "url": "john.png", "imageable_type": "User", "imageable_id": 10})
    );
    assert_eq!(users[1]["avatar"], Value::Null);
}

#[tokio::test]
async fn test_locale_filters_and_orders_on_translated_columns() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    let french = optimizer
        .query("Tag")
        .unwrap()
        .locale("fr")
        .where_eq("label", "rouille")
        .order_by("label")
        .get()
        .await
        .unwrap();
    assert_eq!(as_json(&french), json!([{"id": 1, "name": "rust", "label": "rouille"}]));

    let german = optimizer
        .query("Tag")
        .unwrap()
        .locale("de")
        .where_eq("label", "rouille")
        .get()
        .await
        .unwrap();
    assert!(german.is_empty());
}

#[tokio::test]
async fn test_locale_joins_translated_columns() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;
    let tags = |locale: &'static str| {
        optimizer
            .query("Article")
            .unwrap()
            .select(["id"])
            .with("tags")
            .locale(locale)
            .where_eq("id", 1)
    };

    let french = tags("fr").first().await.unwrap().unwrap();
    assert_eq!(french["tags"], json!([{"id": 1, "name": "rust", "label": "rouille"}]));

    let german = tags("de").first().await.unwrap().unwrap();
    assert_eq!(german["tags"], json!([{"id": 1, "name": "rust", "label": null}]));
}

#[tokio::test]
async fn test_search_matches_base_and_related_columns() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    let by_title = optimizer
        .query("Article")
        .unwrap()
        .search("raf", ["title"])
        .get()
        .await
        .unwrap();
    assert_eq!(by_title.len(), 1);
    assert_eq!(by_title[0]["id"], json!(2));

    let by_comment = optimizer
        .query("Article")
        .unwrap()
        .search("B", ["comments.body"])
        .get()
        .await
        .unwrap();
    assert_eq!(by_comment.len(), 1);
    assert_eq!(by_comment[0]["id"], json!(1));
}

#[derive(Debug, Deserialize, PartialEq)]
struct Article {
    id: i64,
    title: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Comment {
    id: i64,
    body: String,
}

#[tokio::test]
async fn test_entities_carry_loaded_relations() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    let output = optimizer
        .query("Article")
        .unwrap()
        .with("comments")
        .where_eq("id", 1)
        .as_entities()
        .fetch::<Article>()
        .await
        .unwrap();

    assert_eq!(output.format(), OutputFormat::Entity);
    let Output::Entity(articles) = output else {
        panic!("expected entities");
    };
    assert_eq!(
        articles[0].entity,
        Article {
            id: 1,
            title: "Hello".to_string()
        }
    );
    assert!(articles[0].is_loaded("comments"));
    assert!(!articles[0].is_loaded("author"));

    let comments: Vec<Comment> = articles[0].relation("comments").unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0].body, "A");
}

#[tokio::test]
async fn test_objects_expose_typed_fields() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    let objects = optimizer
        .query("Article")
        .unwrap()
        .with("author")
        .order_by("id")
        .get_objects()
        .await
        .unwrap();

    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].get_as::<String>("title").unwrap(), Some("Hello".to_string()));
    assert_eq!(objects[1].get_as::<Value>("author").unwrap(), None);
}

#[tokio::test]
async fn test_count_exists_and_find_or_fail() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    assert_eq!(optimizer.query("Article").unwrap().count().await.unwrap(), 2);
    assert_eq!(
        optimizer
            .query("Article")
            .unwrap()
            .where_eq("published", 1)
            .count()
            .await
            .unwrap(),
        1
    );
    assert!(optimizer.query("Article").unwrap().where_eq("id", 1).exists().await.unwrap());
    assert!(!optimizer.query("Article").unwrap().where_eq("id", 3).exists().await.unwrap());

    let err = optimizer.query("Article").unwrap().find_or_fail(3).await.unwrap_err();
    assert!(matches!(err, QueryError::NotFound(ref table) if table == "articles"));
}

#[tokio::test]
async fn test_paginate() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    let page = optimizer
        .query("Article")
        .unwrap()
        .with("comments")
        .order_by("id")
        .paginate(1, 2)
        .await
        .unwrap();

    assert_eq!(page.total, 2);
    assert_eq!(page.last_page, 2);
    assert!(!page.has_more_pages());
    assert_eq!(page.from(), Some(2));
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0]["id"], json!(2));
    assert_eq!(page.data[0]["comments"], json!([]));
}

#[tokio::test]
async fn test_chunk_and_lazy_visit_every_row() {
    let (optimizer, _) = common::optimizer(OptimizerConfig::default()).await;

    let mut ids = Vec::new();
    optimizer
        .query("Article")
        .unwrap()
        .chunk(1, |chunk| {
            assert_eq!(chunk.len(), 1);
            ids.extend(chunk.into_iter().map(|record| record["id"].clone()));
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(ids, vec![json!(1), json!(2)]);

    let streamed: Vec<_> = optimizer
        .query("Article")
        .unwrap()
        .with_count("comments")
        .lazy(1)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(streamed.len(), 2);
    assert_eq!(streamed[0]["comments_count"], json!(2));
}

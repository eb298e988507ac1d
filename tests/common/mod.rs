//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use event_src::{
    db, Aggregate, AggregateBinding, AggregatorError, CommandDefinition, Event, EventDefinition,
    FieldKind, PayloadSchema, PgEventStore, Registry, ValidationErrors,
};
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;

/// Connect to DATABASE_URL and make sure the schema exists.
///
/// Tests never truncate: each one works on aggregates it creates itself.
pub async fn setup_test_store() -> PgEventStore {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(12)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    db::apply_schema(&pool).await.expect("Failed to apply schema");
    assert!(db::check_schema(&pool).await.unwrap());

    PgEventStore::new(pool)
}

fn copy_field(
    field: &'static str,
) -> impl Fn(&mut Aggregate, &Event) -> Result<(), AggregatorError> + Send + Sync {
    move |aggregate, event| {
        aggregate.set(field, event.get(field).cloned().unwrap_or_default());
        Ok(())
    }
}

/// Post (title, status, owner) and Counter aggregates
pub fn registry() -> Arc<Registry> {
    let post = AggregateBinding::new("Post").with_validator(|post: &Aggregate| {
        match post.get_str("title") {
            Some(title) if title.len() > 40 => Err(ValidationErrors::single(
                "title",
                "is too long (maximum is 40 characters)",
            )),
            _ => Ok(()),
        }
    });

    let registry = Registry::builder()
        .aggregate_binding(post)
        .aggregate("Counter")
        .event(EventDefinition::new(
            "Post::TitleChanged",
            "Post",
            PayloadSchema::new().required("title", FieldKind::String),
            copy_field("title"),
        ))
        .event(EventDefinition::new(
            "Post::StatusChanged",
            "Post",
            PayloadSchema::new().required("status", FieldKind::String),
            |post: &mut Aggregate, event: &Event| {
                let status = event
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !["draft", "published", "archived"].contains(&status) {
                    return Err(AggregatorError::invalid_field(
                        "status",
                        "is not included in the list",
                    ));
                }
                post.set("status", status);
                Ok(())
            },
        ))
        .event(EventDefinition::new(
            "Post::OwnerChanged",
            "Post",
            PayloadSchema::new().required("owner", FieldKind::String),
            copy_field("owner"),
        ))
        .event(EventDefinition::new(
            "Counter::Incremented",
            "Counter",
            PayloadSchema::new().required("by", FieldKind::Integer),
            |counter: &mut Aggregate, event: &Event| {
                let by = event.get("by").and_then(Value::as_i64).unwrap_or(1);
                let count = counter.get_i64("count").unwrap_or(0);
                counter.set("count", count + by);
                Ok(())
            },
        ))
        .build()
        .expect("registry must build");

    Arc::new(registry)
}

pub fn post_command() -> Arc<CommandDefinition> {
    Arc::new(CommandDefinition::new("Post").track_changes(&["title", "status", "owner"]))
}

pub fn increment(registry: &Registry, by: i64) -> Event {
    let mut payload = Map::new();
    payload.insert("by".to_string(), Value::from(by));
    Event::new(registry, "Counter::Incremented", payload).expect("registered event")
}

pub fn map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

//! Command Diffing
//!
//! Turns proposed field values into one event per changed tracked field,
//! and persists a batch of events in a single transaction.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::domain::{OperationContext, ValidationErrors};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::event_store::{EventStore, StoreTransaction};
use crate::registry::{ConfigurationError, Registry};

use super::TrackedField;

/// Build one event per tracked field whose proposed value differs from
/// the target's current value.
///
/// Fields absent from `proposed`, unchanged fields and untracked fields
/// produce nothing. Events come out in tracking order.
pub fn build_events(
    registry: &Registry,
    target: &Aggregate,
    proposed: &Map<String, Value>,
    tracked: &[TrackedField],
    actor_id: Option<Uuid>,
    context: &OperationContext,
) -> std::result::Result<Vec<Event>, ConfigurationError> {
    let mut events = Vec::new();

    for TrackedField { field, event_type } in tracked {
        let value = proposed.get(field);
        if !target.would_change(field, value) {
            continue;
        }
        let Some(value) = value else { continue };

        let mut payload = Map::new();
        payload.insert(field.clone(), value.clone());

        let mut event = Event::new(registry, event_type.as_str(), payload)?
            .with_actor(actor_id)
            .with_metadata(context.clone());
        if let Some(id) = target.id() {
            event = event.with_aggregate_id(id);
        }

        tracing::trace!("Field {} changed, building {}", field, event_type);
        events.push(event);
    }

    Ok(events)
}

/// Persist a batch of events in one transaction.
///
/// Each event runs inside its own savepoint. When an event creates its
/// aggregate, later events of the batch are pointed at it.
///
/// With `raise_on_error`, the first failure rolls the transaction back and
/// is returned. Without it, every event is attempted, failures are folded
/// into `errors`, and any failure still rolls the whole batch back
/// (`Ok(false)`). Configuration errors are always returned.
pub async fn persist_events<S>(
    store: &S,
    registry: &Registry,
    events: &mut [Event],
    raise_on_error: bool,
    errors: &mut ValidationErrors,
) -> Result<bool>
where
    S: EventStore + ?Sized,
{
    if events.is_empty() {
        return Ok(true);
    }

    let original_ids: Vec<Option<Uuid>> = events.iter().map(Event::aggregate_id).collect();
    let mut tx = store.begin().await?;
    let mut success = true;
    let mut created: Option<Uuid> = None;

    for index in 0..events.len() {
        let event = &mut events[index];
        if let Some(id) = created {
            event.adopt_aggregate_id(id);
        }
        let creates_aggregate = event.aggregate_id().is_none();

        match apply_in_savepoint(&mut tx, event, registry).await {
            Ok(()) => {
                if creates_aggregate {
                    created = events[index].aggregate_id();
                }
            }
            Err(err) if raise_on_error || err.is_fatal() => {
                tracing::warn!(
                    "Event {} failed, rolling back batch of {}: {}",
                    events[index].event_type(),
                    events.len(),
                    err
                );
                discard(tx, events, &original_ids).await;
                return Err(err);
            }
            Err(err) => {
                tracing::debug!("Event {} failed: {}", events[index].event_type(), err);
                success = false;
                errors.merge(err.into_field_errors()?);
            }
        }
    }

    if !success {
        tracing::warn!(
            "Rolling back batch of {} events with {} errors",
            original_ids.len(),
            errors.len()
        );
        discard(tx, events, &original_ids).await;
        return Ok(false);
    }

    match tx.commit().await {
        Ok(()) => {
            tracing::info!("Committed batch of {} events", events.len());
            Ok(true)
        }
        Err(err) => {
            revert_all(events, &original_ids);
            let err = Error::from(err);
            if raise_on_error {
                return Err(err);
            }
            errors.merge(err.into_field_errors()?);
            Ok(false)
        }
    }
}

async fn apply_in_savepoint<T>(tx: &mut T, event: &mut Event, registry: &Registry) -> Result<()>
where
    T: StoreTransaction,
{
    tx.savepoint().await?;

    match event.apply_and_persist(tx, registry).await {
        Ok(()) => {
            tx.release_savepoint().await?;
            Ok(())
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback_savepoint().await {
                tracing::warn!("Savepoint rollback failed: {}", rollback_err);
            }
            Err(err)
        }
    }
}

async fn discard<T>(tx: T, events: &mut [Event], original_ids: &[Option<Uuid>])
where
    T: StoreTransaction,
{
    if let Err(err) = tx.rollback().await {
        tracing::warn!("Transaction rollback failed: {}", err);
    }
    revert_all(events, original_ids);
}

fn revert_all(events: &mut [Event], original_ids: &[Option<Uuid>]) {
    for (event, original) in events.iter_mut().zip(original_ids) {
        event.revert_to_draft(*original);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandDefinition;
    use crate::domain::{FieldKind, PayloadSchema};
    use crate::registry::{AggregatorError, EventDefinition};
    use serde_json::json;

    fn copy_field(
        field: &'static str,
    ) -> impl Fn(&mut Aggregate, &Event) -> std::result::Result<(), AggregatorError> + Send + Sync
    {
        move |post, event| {
            post.set(field, event.get(field).cloned().unwrap_or_default());
            Ok(())
        }
    }

    fn registry() -> Registry {
        Registry::builder()
            .aggregate("Post")
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
                copy_field("status"),
            ))
            .build()
            .unwrap()
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_only_changed_tracked_fields_build_events() {
        let registry = registry();
        let definition = CommandDefinition::new("Post").track_changes(&["title", "status"]);
        let target = Aggregate::with_attributes("Post", map(json!({"title": "A", "status": "draft"})));
        let actor = Uuid::new_v4();

        let events = build_events(
            &registry,
            &target,
            &map(json!({"title": "B", "status": "draft", "owner": "x"})),
            definition.tracked(),
            Some(actor),
            &OperationContext::new(),
        )
        .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "Post::TitleChanged");
        assert_eq!(events[0].payload(), &map(json!({"title": "B"})));
        assert_eq!(events[0].actor_id(), Some(actor));
    }

    #[test]
    fn test_absent_and_null_fields_build_nothing() {
        let registry = registry();
        let definition = CommandDefinition::new("Post").track_changes(&["title", "status"]);
        let target = Aggregate::with_attributes("Post", map(json!({"title": "A"})));

        let events = build_events(
            &registry,
            &target,
            &map(json!({"status": null})),
            definition.tracked(),
            None,
            &OperationContext::new(),
        )
        .unwrap();

        assert!(events.is_empty());
    }

    #[test]
    fn test_events_target_persisted_aggregate() {
        let registry = registry();
        let definition = CommandDefinition::new("Post").track_changes(&["title"]);
        let mut target = Aggregate::new("Post");
        let id = Uuid::new_v4();
        target.mark_saved(id, 1, chrono::Utc::now());
        let context = OperationContext::new().with_source("test");

        let events = build_events(
            &registry,
            &target,
            &map(json!({"title": "B"})),
            definition.tracked(),
            None,
            &context,
        )
        .unwrap();

        assert_eq!(events[0].aggregate_id(), Some(id));
        assert_eq!(events[0].metadata(), &context);
    }

    #[test]
    fn test_unregistered_event_type_is_configuration_error() {
        let registry = registry();
        let definition = CommandDefinition::new("Post").track_changes(&["body"]);

        let err = build_events(
            &registry,
            &Aggregate::new("Post"),
            &map(json!({"body": "text"})),
            definition.tracked(),
            None,
            &OperationContext::new(),
        )
        .unwrap_err();

        assert!(matches!(err, ConfigurationError::AggregatorNotSet(_)));
    }
}

//! Watches entity lifecycle hooks and turns tracked changes into events.
//!
//! The host registers each entity type it wants observed, then calls
//! [`created`](ChangeObserver::created) / [`updated`](ChangeObserver::updated)
//! / [`deleted`](ChangeObserver::deleted) from its lifecycle hooks. The
//! observer consults the policy cache, applies field visibility, and publishes
//! a [`ChangeEvent`] when something auditable happened. None of the entry
//! points can fail: a broken policy fetch degrades to "track nothing".

use crate::context::EntitySnapshot;
use crate::event::{ChangeEvent, EventBus};
use crate::policy::{ActionKind, Policy, PolicyCache, TrackedEntity};
use dashmap::DashSet;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

pub struct ChangeObserver {
    api_key: Option<String>,
    policy: Arc<PolicyCache>,
    bus: Arc<EventBus>,
    /// Entity types explicitly registered for observation.
    registered: DashSet<String>,
}

impl ChangeObserver {
    pub fn new(api_key: Option<String>, policy: Arc<PolicyCache>, bus: Arc<EventBus>) -> Self {
        Self {
            api_key,
            policy,
            bus,
            registered: DashSet::new(),
        }
    }

    /// Register an entity type for observation. Unregistered types are never
    /// captured, regardless of policy.
    pub fn register(&self, type_name: impl Into<String>) {
        self.registered.insert(type_name.into());
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.registered.contains(type_name)
    }

    /// Register every entity type the given policy tracks.
    pub fn register_tracked(&self, policy: &Policy) {
        for entity in &policy.tracked_entities {
            self.register(entity.name.clone());
        }
    }

    /// Handle a "created" lifecycle hook.
    pub async fn created(&self, entity: &EntitySnapshot) {
        self.observe(ActionKind::Created, entity, None).await;
    }

    /// Handle an "updated" lifecycle hook. `original` is the attribute map as
    /// it was before the change.
    pub async fn updated(&self, entity: &EntitySnapshot, original: &Map<String, Value>) {
        self.observe(ActionKind::Updated, entity, Some(original)).await;
    }

    /// Handle a "deleted" lifecycle hook with the entity's last known state.
    pub async fn deleted(&self, entity: &EntitySnapshot) {
        self.observe(ActionKind::Deleted, entity, None).await;
    }

    async fn observe(
        &self,
        action: ActionKind,
        entity: &EntitySnapshot,
        original: Option<&Map<String, Value>>,
    ) {
        if !self.registered.contains(&entity.type_name) {
            return;
        }

        let Some(api_key) = self.api_key.as_deref() else {
            debug!("no api key configured, skipping {} observation", action);
            return;
        };

        let policy = self.policy.get_policy(api_key).await;
        if !policy.enabled {
            return;
        }
        let Some(tracked) = policy.entity(&entity.type_name) else {
            debug!("{} is not tracked, skipping {}", entity.type_name, action);
            return;
        };
        if !tracked.allows(action) {
            debug!("{} does not audit {}, skipping", entity.type_name, action);
            return;
        }

        let event = match action {
            ActionKind::Updated => {
                let empty = Map::new();
                let original = original.unwrap_or(&empty);
                match self.diff_event(entity, tracked, original) {
                    Some(event) => event,
                    None => {
                        debug!(
                            "no visible change on {} [{}], suppressing",
                            entity.type_name, entity.entity_id
                        );
                        return;
                    }
                }
            }
            ActionKind::Created | ActionKind::Deleted => ChangeEvent {
                action,
                entity_type: entity.type_name.clone(),
                entity_id: entity.entity_id.clone(),
                old_values: Map::new(),
                new_values: Map::new(),
                full_attributes: tracked.visible_fields.filter(&entity.attributes),
            },
        };

        self.bus.publish(&event).await;
    }

    /// Build an update event carrying only the changed, visible fields. A
    /// field counts as changed when its current value differs from the
    /// original snapshot's (or it is absent there). Returns `None` when
    /// nothing observable changed within the visible field set.
    fn diff_event(
        &self,
        entity: &EntitySnapshot,
        tracked: &TrackedEntity,
        original: &Map<String, Value>,
    ) -> Option<ChangeEvent> {
        let mut old_values = Map::new();
        let mut new_values = Map::new();

        for (field, value) in &entity.attributes {
            if !tracked.visible_fields.allows(field) {
                continue;
            }
            match original.get(field) {
                Some(previous) if previous == value => {}
                Some(previous) => {
                    old_values.insert(field.clone(), previous.clone());
                    new_values.insert(field.clone(), value.clone());
                }
                None => {
                    new_values.insert(field.clone(), value.clone());
                }
            }
        }

        if old_values.is_empty() && new_values.is_empty() {
            return None;
        }

        Some(ChangeEvent {
            action: ActionKind::Updated,
            entity_type: entity.type_name.clone(),
            entity_id: entity.entity_id.clone(),
            old_values,
            new_values,
            full_attributes: Map::new(),
        })
    }
}

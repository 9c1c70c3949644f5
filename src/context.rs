//! Host integration seams: entity snapshots, the current actor, and request
//! metadata. The host implements these; the relay only reads through them.

use serde_json::{Map, Value};

/// Point-in-time state of a record, captured by the host when a lifecycle
/// hook fires.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    /// Entity type name as it appears in the tracking policy.
    pub type_name: String,
    /// Primary key, stringified.
    pub entity_id: String,
    /// Current attribute values.
    pub attributes: Map<String, Value>,
}

impl EntitySnapshot {
    pub fn new(
        type_name: impl Into<String>,
        entity_id: impl Into<String>,
        attributes: Map<String, Value>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            entity_id: entity_id.into(),
            attributes,
        }
    }
}

/// The authenticated principal responsible for a change.
#[derive(Debug, Clone)]
pub struct Actor {
    pub identifier: String,
    pub name: Option<String>,
}

/// Resolves the actor behind the current operation, if any.
pub trait ActorResolver: Send + Sync {
    fn current_actor(&self) -> Option<Actor>;
}

/// Supplies metadata of the request being handled, if one exists.
pub trait RequestMetadata: Send + Sync {
    fn ip_address(&self) -> Option<String>;
    fn user_agent(&self) -> Option<String>;
}

/// Context for background or system-initiated work: no actor, no request.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemContext;

impl ActorResolver for SystemContext {
    fn current_actor(&self) -> Option<Actor> {
        None
    }
}

impl RequestMetadata for SystemContext {
    fn ip_address(&self) -> Option<String> {
        None
    }

    fn user_agent(&self) -> Option<String> {
        None
    }
}

//! Change events and the in-process bus that carries them to delivery.

use crate::error::RelayResult;
use crate::policy::ActionKind;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::error;

/// A change detected on a tracked entity.
///
/// Value maps are already restricted to the policy's visible field set by the
/// observer; consumers must not re-apply filtering. Consumed once by the
/// delivery side and then discarded.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub action: ActionKind,
    pub entity_type: String,
    pub entity_id: String,
    /// Pre-change values of the changed fields (updates only).
    pub old_values: Map<String, Value>,
    /// Post-change values of the changed fields (updates only).
    pub new_values: Map<String, Value>,
    /// Full attribute snapshot (creates and deletes only).
    pub full_attributes: Map<String, Value>,
}

/// Receives change events published on the bus.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, event: &ChangeEvent) -> RelayResult<()>;
}

/// Publish-subscribe seam between observation and delivery.
///
/// Publishing runs each handler to completion within the caller's control
/// flow, in registration order; the bus exists to decouple the two sides, not
/// to introduce concurrency. A failing handler is logged and does not stop
/// its siblings.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<Arc<dyn ChangeHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Registration happens at wiring time, before the
    /// bus is shared.
    pub fn register(&mut self, handler: Arc<dyn ChangeHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub async fn publish(&self, event: &ChangeEvent) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle(event).await {
                error!(
                    "change handler failed for {} {} [{}]: {}",
                    event.action, event.entity_type, event.entity_id, e
                );
            }
        }
    }
}

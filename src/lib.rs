//! crudlog-relay: change-auditing relay for host applications.
//!
//! Observes create/update/delete events on application records, filters them
//! per a remotely-fetched policy, and forwards structured audit entries to
//! the CrudLog API. No error from this crate escapes into the host's primary
//! request path: delivery failures are retried, logged, and surfaced on a
//! dead-letter channel.
//!
//! ```no_run
//! use crudlog_relay::{AuditRelay, EntitySnapshot, RelayConfig, SystemContext};
//! use std::sync::Arc;
//!
//! # async fn example() -> crudlog_relay::RelayResult<()> {
//! let config = RelayConfig::from_env()?;
//! let relay = AuditRelay::initialize(config, Arc::new(SystemContext), Arc::new(SystemContext));
//! relay.attach_tracked().await;
//!
//! let invoice = EntitySnapshot::new(
//!     "Invoice",
//!     "7",
//!     serde_json::json!({"id": 7, "total": 100}).as_object().unwrap().clone(),
//! );
//! relay.observer().created(&invoice).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod event;
pub mod observer;
pub mod policy;
pub mod relay;

pub use config::{DispatchMethod, RelayConfig};
pub use context::{Actor, ActorResolver, EntitySnapshot, RequestMetadata, SystemContext};
pub use delivery::{DeliveryQueue, FailedDelivery, LogDetails, LogRecord, QueueConfig};
pub use error::{RelayError, RelayResult};
pub use event::{ChangeEvent, ChangeHandler, EventBus};
pub use observer::ChangeObserver;
pub use policy::{ActionKind, FieldVisibility, Policy, PolicyCache, TrackedEntity};
pub use relay::AuditRelay;

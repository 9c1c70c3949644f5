//! Top-level wiring and the process-lifetime boot guard.

use crate::config::RelayConfig;
use crate::context::{ActorResolver, RequestMetadata};
use crate::delivery::{DeliveryHandler, DeliveryQueue, FailedDelivery, QueueConfig};
use crate::event::EventBus;
use crate::observer::ChangeObserver;
use crate::policy::PolicyCache;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

static RELAY: OnceCell<Arc<AuditRelay>> = OnceCell::new();

/// The assembled audit pipeline: policy cache -> observer -> bus -> delivery.
pub struct AuditRelay {
    config: RelayConfig,
    policy: Arc<PolicyCache>,
    observer: Arc<ChangeObserver>,
    queue: Arc<DeliveryQueue>,
}

impl AuditRelay {
    /// Build a standalone relay instance with no global registration. Hosts
    /// that manage their own lifetimes, and tests, use this directly. Must be
    /// called within a tokio runtime (the delivery worker is spawned here).
    pub fn new(
        config: RelayConfig,
        queue_config: QueueConfig,
        actor: Arc<dyn ActorResolver>,
        request: Arc<dyn RequestMetadata>,
    ) -> Arc<Self> {
        let policy = Arc::new(PolicyCache::new(
            config.config_endpoint.clone(),
            config.policy_ttl(),
            config.config_timeout(),
        ));
        let queue = DeliveryQueue::new(queue_config);

        let mut bus = EventBus::new();
        bus.register(Arc::new(DeliveryHandler::new(
            config.clone(),
            queue.clone(),
            actor,
            request,
        )));

        let observer = Arc::new(ChangeObserver::new(
            config.api_key.clone(),
            policy.clone(),
            Arc::new(bus),
        ));

        Arc::new(Self {
            config,
            policy,
            observer,
            queue,
        })
    }

    /// Process-wide initialization gate. The first caller builds and installs
    /// the relay; later callers, including concurrent racers, get the
    /// instance the winner installed.
    pub fn initialize(
        config: RelayConfig,
        actor: Arc<dyn ActorResolver>,
        request: Arc<dyn RequestMetadata>,
    ) -> Arc<AuditRelay> {
        RELAY
            .get_or_init(|| {
                info!("initializing crudlog relay");
                AuditRelay::new(config, QueueConfig::default(), actor, request)
            })
            .clone()
    }

    /// The globally installed relay, if [`initialize`](Self::initialize) ran.
    pub fn instance() -> Option<Arc<AuditRelay>> {
        RELAY.get().cloned()
    }

    /// Fetch the current policy and register every entity type it tracks.
    /// Call once at startup after [`initialize`](Self::initialize); a fetch
    /// failure leaves nothing registered until the cache TTL lapses.
    pub async fn attach_tracked(&self) {
        let Some(api_key) = self.config.api_key.as_deref() else {
            // Not configured; nothing will be tracked anyway.
            return;
        };
        let policy = self.policy.get_policy(api_key).await;
        self.observer.register_tracked(&policy);
        info!(
            "attached observers for {} tracked entity types",
            policy.tracked_entities.len()
        );
    }

    /// Entry point for the host's lifecycle hooks.
    pub fn observer(&self) -> Arc<ChangeObserver> {
        self.observer.clone()
    }

    pub fn policy_cache(&self) -> Arc<PolicyCache> {
        self.policy.clone()
    }

    /// Take the dead-letter receiver for deliveries that exhausted their
    /// retries. Can be taken once.
    pub async fn failed_deliveries(&self) -> Option<UnboundedReceiver<FailedDelivery>> {
        self.queue.take_failed().await
    }
}

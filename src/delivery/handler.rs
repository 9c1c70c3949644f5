//! Assembles log records from change events and dispatches them.

use crate::config::{DispatchMethod, RelayConfig};
use crate::context::{ActorResolver, RequestMetadata};
use crate::delivery::queue::{DeliveryQueue, DeliveryTask};
use crate::delivery::record::{LogDetails, LogRecord};
use crate::error::RelayResult;
use crate::event::{ChangeEvent, ChangeHandler};
use crate::policy::ActionKind;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;
use tracing::{error, info};

/// Turns a [`ChangeEvent`] into a [`LogRecord`] and ships it, either through
/// the retrying delivery queue or as a bounded fire-and-forget request.
///
/// The event's value maps were filtered to the policy's visible fields by the
/// observer; no filtering is re-applied here. `handle` never returns an
/// error: every failure ends as a log line so the host's triggering operation
/// proceeds regardless of delivery outcome.
pub struct DeliveryHandler {
    config: RelayConfig,
    client: Client,
    queue: Arc<DeliveryQueue>,
    actor: Arc<dyn ActorResolver>,
    request: Arc<dyn RequestMetadata>,
}

impl DeliveryHandler {
    pub fn new(
        config: RelayConfig,
        queue: Arc<DeliveryQueue>,
        actor: Arc<dyn ActorResolver>,
        request: Arc<dyn RequestMetadata>,
    ) -> Self {
        Self {
            config,
            client: Client::new(),
            queue,
            actor,
            request,
        }
    }

    fn build_record(&self, event: &ChangeEvent) -> LogRecord {
        let (user_identifier, user_name) = match self.actor.current_actor() {
            Some(actor) => (
                Some(actor.identifier),
                actor.name.unwrap_or_else(|| "Unnamed User".to_string()),
            ),
            None => (None, "System/Unknown".to_string()),
        };

        let details = match event.action {
            ActionKind::Updated => LogDetails {
                old_values: Some(event.old_values.clone()),
                new_values: Some(event.new_values.clone()),
                attributes: None,
            },
            ActionKind::Created | ActionKind::Deleted => LogDetails {
                old_values: None,
                new_values: None,
                attributes: Some(event.full_attributes.clone()),
            },
        };

        LogRecord {
            action_type: event.action.to_string(),
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id.clone(),
            user_identifier,
            user_name,
            details,
            logged_at: Utc::now(),
            ip_address: self.request.ip_address(),
            user_agent: self.request.user_agent(),
        }
    }

    async fn send_sync(&self, api_key: &str, endpoint: &str, record: &LogRecord) {
        let result = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.config.sync_timeout())
            .json(record)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => error!("failed to send log to api: status {}", response.status()),
            Err(e) => error!("failed to send log to api: {}", e),
        }
    }
}

#[async_trait]
impl ChangeHandler for DeliveryHandler {
    async fn handle(&self, event: &ChangeEvent) -> RelayResult<()> {
        info!(
            "logging {} on {} [{}]",
            event.action, event.entity_type, event.entity_id
        );

        let (Some(api_key), Some(endpoint)) = (
            self.config.api_key.as_deref(),
            self.config.log_endpoint.as_deref(),
        ) else {
            error!("api key or log endpoint is not configured, logging is disabled");
            return Ok(());
        };

        let record = self.build_record(event);

        match self.config.dispatch_method {
            DispatchMethod::Async => {
                self.queue.enqueue(DeliveryTask::new(
                    record,
                    api_key.to_string(),
                    endpoint.to_string(),
                ));
            }
            DispatchMethod::Sync => self.send_sync(api_key, endpoint, &record).await,
        }

        Ok(())
    }
}

//! TTL cache for remotely-fetched policies.
//!
//! Entries are keyed by a one-way hash of the API key so the raw secret never
//! sits in the map. A miss triggers one authenticated fetch shared by all
//! concurrent callers of that key; a failed fetch caches the empty policy for
//! the full TTL so a failing remote is not hammered on every lookup.

use crate::error::{RelayError, RelayResult};
use crate::policy::types::{Policy, PolicyEnvelope};
use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};

#[derive(Clone)]
struct CachedPolicy {
    policy: Arc<Policy>,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedPolicy {
    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > self.ttl
    }
}

pub struct PolicyCache {
    /// Cache storage: api-key hash -> cached policy
    entries: DashMap<String, CachedPolicy>,
    /// Per-key locks collapsing concurrent misses into one fetch
    flights: DashMap<String, Arc<Mutex<()>>>,
    client: Client,
    config_endpoint: Option<String>,
    ttl: Duration,
    fetch_timeout: Duration,
}

impl PolicyCache {
    pub fn new(config_endpoint: Option<String>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            flights: DashMap::new(),
            client: Client::new(),
            config_endpoint,
            ttl,
            fetch_timeout,
        }
    }

    /// Resolve the policy for an API key, fetching on a cold or expired entry.
    ///
    /// Never fails: any fetch problem degrades to the empty policy, which is
    /// cached for the TTL exactly like a successful result.
    pub async fn get_policy(&self, api_key: &str) -> Arc<Policy> {
        let key = hash_key(api_key);

        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired() {
                debug!("policy cache hit for key {}", &key[..8]);
                return entry.policy.clone();
            }
        }

        let flight = self
            .flights
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // Another caller may have populated the entry while we waited.
        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired() {
                return entry.policy.clone();
            }
        }

        debug!("policy cache miss for key {}", &key[..8]);
        let policy = Arc::new(self.fetch(api_key).await);
        self.entries.insert(
            key.clone(),
            CachedPolicy {
                policy: policy.clone(),
                fetched_at: Instant::now(),
                ttl: self.ttl,
            },
        );
        // Waiters hold their own handle to the flight lock and will hit the
        // fresh entry on re-check; dropping the map slot keeps the table
        // bounded by in-flight fetches rather than distinct keys seen.
        self.flights.remove(&key);
        policy
    }

    /// Drop all cached entries; the next lookup per key refetches.
    pub fn invalidate_all(&self) {
        self.entries.clear();
        self.flights.clear();
    }

    async fn fetch(&self, api_key: &str) -> Policy {
        match self.try_fetch(api_key).await {
            Ok(policy) => {
                debug!(
                    "fetched policy: enabled={}, {} tracked entities",
                    policy.enabled,
                    policy.tracked_entities.len()
                );
                policy
            }
            Err(e) => {
                error!(
                    "policy fetch failed, tracking disabled until next refresh: {}",
                    e
                );
                Policy::default()
            }
        }
    }

    async fn try_fetch(&self, api_key: &str) -> RelayResult<Policy> {
        let endpoint = self
            .config_endpoint
            .as_deref()
            .ok_or_else(|| RelayError::Config("config endpoint is not configured".to_string()))?;

        let response = self
            .client
            .get(endpoint)
            .bearer_auth(api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.fetch_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RelayError::PolicyFetch(format!(
                "config endpoint returned status {}",
                response.status()
            )));
        }

        let envelope: PolicyEnvelope = response.json().await?;
        Ok(envelope.implicit)
    }
}

/// One-way hash so the raw API key is never used as a cache key.
fn hash_key(api_key: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    api_key.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

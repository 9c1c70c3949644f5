//! Policy model fetched from the remote config API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Lifecycle actions the service can audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Created,
    Updated,
    Deleted,
}

impl ActionKind {
    /// Parse a wire event name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "created" => Some(ActionKind::Created),
            "updated" => Some(ActionKind::Updated),
            "deleted" => Some(ActionKind::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Created => write!(f, "created"),
            ActionKind::Updated => write!(f, "updated"),
            ActionKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// Which fields of a tracked entity may appear in audit entries.
///
/// On the wire this is a list of field names; a literal `"*"` entry (or an
/// absent list) opens up every field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldVisibility {
    All,
    Named(HashSet<String>),
}

impl Default for FieldVisibility {
    fn default() -> Self {
        FieldVisibility::All
    }
}

impl<'de> Deserialize<'de> for FieldVisibility {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let names = Vec::<String>::deserialize(deserializer)?;
        if names.iter().any(|n| n == "*") {
            Ok(FieldVisibility::All)
        } else {
            Ok(FieldVisibility::Named(names.into_iter().collect()))
        }
    }
}

impl FieldVisibility {
    pub fn allows(&self, field: &str) -> bool {
        match self {
            FieldVisibility::All => true,
            FieldVisibility::Named(names) => names.contains(field),
        }
    }

    /// Restrict an attribute map to the visible fields.
    pub fn filter(&self, attributes: &Map<String, Value>) -> Map<String, Value> {
        match self {
            FieldVisibility::All => attributes.clone(),
            FieldVisibility::Named(_) => attributes
                .iter()
                .filter(|(field, _)| self.allows(field))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        }
    }
}

/// Tracking rules for one entity type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackedEntity {
    /// Entity type name, matched against [`EntitySnapshot::type_name`].
    ///
    /// [`EntitySnapshot::type_name`]: crate::context::EntitySnapshot
    pub name: String,
    /// Which lifecycle actions are audited for this entity.
    #[serde(default, deserialize_with = "lenient_events")]
    pub events: HashSet<ActionKind>,
    /// Which fields are visible in audit entries.
    #[serde(default, rename = "attributes")]
    pub visible_fields: FieldVisibility,
}

impl TrackedEntity {
    pub fn allows(&self, action: ActionKind) -> bool {
        self.events.contains(&action)
    }
}

/// Accept any list of event names, keeping only the known kinds. The remote
/// service may introduce event types this version does not handle; those must
/// not invalidate the rest of the policy.
fn lenient_events<'de, D>(deserializer: D) -> Result<HashSet<ActionKind>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    Ok(names
        .iter()
        .filter_map(|name| {
            let kind = ActionKind::from_name(name);
            if kind.is_none() {
                debug!("ignoring unknown event name {:?} in policy", name);
            }
            kind
        })
        .collect())
}

/// Remotely-sourced audit policy.
///
/// `Policy::default()` is the empty policy: disabled, nothing tracked. The
/// policy cache degrades to it whenever the remote config API is unreachable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "tracked_models")]
    pub tracked_entities: Vec<TrackedEntity>,
}

impl Policy {
    /// Look up the tracking rules for an entity type. Absence means the type
    /// is not audited at all.
    pub fn entity(&self, type_name: &str) -> Option<&TrackedEntity> {
        self.tracked_entities.iter().find(|e| e.name == type_name)
    }
}

/// Envelope the remote config API wraps the policy in.
#[derive(Debug, Default, Deserialize)]
pub struct PolicyEnvelope {
    #[serde(default)]
    pub implicit: Policy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attributes(value: serde_json::Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_wildcard_visibility_passes_all_fields() {
        let visibility: FieldVisibility = serde_json::from_value(json!(["*"])).unwrap();
        assert_eq!(visibility, FieldVisibility::All);

        let attrs = attributes(json!({"id": 7, "total": 100, "secret": "x"}));
        assert_eq!(visibility.filter(&attrs), attrs);
    }

    #[test]
    fn test_named_visibility_passes_only_named_fields() {
        let visibility: FieldVisibility =
            serde_json::from_value(json!(["total", "status"])).unwrap();

        let attrs = attributes(json!({"id": 7, "total": 100, "secret": "x"}));
        let filtered = visibility.filter(&attrs);

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("total"), Some(&json!(100)));
        assert!(!visibility.allows("secret"));
    }

    #[test]
    fn test_policy_envelope_parsing() {
        let envelope: PolicyEnvelope = serde_json::from_value(json!({
            "implicit": {
                "enabled": true,
                "tracked_models": [
                    {"name": "Invoice", "events": ["created", "deleted"], "attributes": ["*"]},
                    {"name": "Customer", "events": ["updated"], "attributes": ["email"]}
                ]
            }
        }))
        .unwrap();

        let policy = envelope.implicit;
        assert!(policy.enabled);
        assert_eq!(policy.tracked_entities.len(), 2);

        let invoice = policy.entity("Invoice").unwrap();
        assert!(invoice.allows(ActionKind::Created));
        assert!(!invoice.allows(ActionKind::Updated));
        assert_eq!(invoice.visible_fields, FieldVisibility::All);

        assert!(policy.entity("Order").is_none());
    }

    #[test]
    fn test_unknown_event_names_are_ignored() {
        let entity: TrackedEntity = serde_json::from_value(json!({
            "name": "Order",
            "events": ["created", "restored"],
            "attributes": ["*"]
        }))
        .unwrap();

        assert!(entity.allows(ActionKind::Created));
        assert_eq!(entity.events.len(), 1);
    }

    #[test]
    fn test_missing_attributes_default_to_all() {
        let entity: TrackedEntity =
            serde_json::from_value(json!({"name": "Invoice", "events": ["created"]})).unwrap();
        assert_eq!(entity.visible_fields, FieldVisibility::All);
    }

    #[test]
    fn test_empty_policy_tracks_nothing() {
        let policy = Policy::default();
        assert!(!policy.enabled);
        assert!(policy.entity("Invoice").is_none());
    }
}

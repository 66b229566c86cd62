//! Subscription engine.
//!
//! Keeps the registry of active subscriptions and evaluates every
//! committed write against their criteria. Matching notifications fan out
//! to bound client sessions through bounded per-session queues, so a slow
//! consumer can never stall the evaluation loop: a full queue closes the
//! session instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use atrium_fhir::Resource;

use crate::search::registry::SearchParameterRegistry;
use crate::search::{extractor, rows};
use crate::types::WriteOperation;

/// Outbound queue depth per session.
pub const SESSION_QUEUE_CAPACITY: usize = 64;

/// Parsed subscription criteria: a kind plus static parameter filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCriteria {
    /// The kind this subscription watches.
    pub resource_type: String,
    /// `(code, value)` equality filters; comma lists mean membership.
    pub filters: Vec<(String, String)>,
}

impl SubscriptionCriteria {
    /// Parses a criteria string such as `Observation?status=final`.
    pub fn parse(criteria: &str) -> Option<Self> {
        let (resource_type, query) = match criteria.split_once('?') {
            Some((kind, query)) => (kind, Some(query)),
            None => (criteria, None),
        };
        if resource_type.is_empty()
            || !resource_type.chars().next().is_some_and(char::is_uppercase)
        {
            return None;
        }
        let mut filters = Vec::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (code, value) = pair.split_once('=')?;
                filters.push((code.to_string(), value.to_string()));
            }
        }
        Some(Self {
            resource_type: resource_type.to_string(),
            filters,
        })
    }
}

struct Session {
    sender: mpsc::Sender<Value>,
    bound: HashSet<Uuid>,
}

/// Active-subscription registry and per-write matcher.
pub struct SubscriptionEngine {
    registry: Arc<SearchParameterRegistry>,
    subscriptions: RwLock<HashMap<Uuid, SubscriptionCriteria>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SubscriptionEngine {
    /// Creates an engine over the shared parameter registry.
    pub fn new(registry: Arc<SearchParameterRegistry>) -> Self {
        Self {
            registry,
            subscriptions: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the active set from stored Subscription resources,
    /// keeping only `status=active` entries with parseable criteria.
    pub fn load_active(&self, resources: &[Resource]) {
        let mut active = HashMap::new();
        for resource in resources {
            if let Some((id, criteria)) = parse_subscription(resource) {
                active.insert(id, criteria);
            }
        }
        let count = active.len();
        *self.subscriptions.write() = active;
        tracing::debug!(count, "subscription registry loaded");
    }

    /// Applies a write to a Subscription resource to the active set.
    pub fn on_subscription_written(&self, resource: &Resource, operation: WriteOperation) {
        let Some(id) = resource.id().and_then(|id| Uuid::parse_str(id).ok()) else {
            return;
        };
        if operation == WriteOperation::Delete {
            self.subscriptions.write().remove(&id);
            return;
        }
        match parse_subscription(resource) {
            Some((id, criteria)) => {
                self.subscriptions.write().insert(id, criteria);
            }
            None => {
                // No longer active (or criteria unparseable).
                self.subscriptions.write().remove(&id);
            }
        }
    }

    /// Evaluates a committed write against every active subscription and
    /// fans out notifications to bound sessions.
    pub fn evaluate(&self, resource: &Resource, operation: WriteOperation) {
        let matched: Vec<Uuid> = {
            let subscriptions = self.subscriptions.read();
            subscriptions
                .iter()
                .filter(|(_, criteria)| self.matches(criteria, resource))
                .map(|(id, _)| *id)
                .collect()
        };

        for subscription_id in matched {
            let notification = notification_envelope(subscription_id, resource, operation);
            self.fan_out(subscription_id, &notification);
        }
    }

    /// Whether a resource satisfies a subscription's criteria.
    fn matches(&self, criteria: &SubscriptionCriteria, resource: &Resource) -> bool {
        if criteria.resource_type != resource.resource_type() {
            return false;
        }
        let content = resource.to_value();
        criteria.filters.iter().all(|(code, value)| {
            let Some(param) = self.registry.get(&criteria.resource_type, code) else {
                return false;
            };
            let leaves = extractor::extract(&content, &criteria.resource_type, &param.expression);
            let accepted: Vec<&str> = value.split(',').collect();
            leaves.iter().any(|leaf| {
                if let Some(s) = leaf.as_str() {
                    if accepted.contains(&s) {
                        return true;
                    }
                }
                rows::tokens_from_value(leaf).iter().any(|token| {
                    accepted.contains(&token.rendered().as_str())
                        || accepted.contains(&token.code.as_str())
                })
            })
        })
    }

    /// Delivers a notification to every session bound to a subscription.
    /// A full or closed queue removes the session; other sessions are
    /// unaffected.
    fn fan_out(&self, subscription_id: Uuid, notification: &Value) {
        let targets: Vec<Uuid> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, session)| session.bound.contains(&subscription_id))
                .map(|(id, _)| *id)
                .collect()
        };

        for session_id in targets {
            let send_failed = {
                let sessions = self.sessions.read();
                match sessions.get(&session_id) {
                    Some(session) => session.sender.try_send(notification.clone()).is_err(),
                    None => false,
                }
            };
            if send_failed {
                tracing::warn!(%session_id, "subscription session queue full, closing");
                self.remove_session(session_id);
            }
        }
    }

    /// Registers a client session; the receiver drains the session's
    /// outbound queue.
    pub fn register_session(&self) -> (Uuid, mpsc::Receiver<Value>) {
        let (sender, receiver) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        let id = Uuid::new_v4();
        self.sessions.write().insert(
            id,
            Session {
                sender,
                bound: HashSet::new(),
            },
        );
        (id, receiver)
    }

    /// Binds a session to a subscription id. Returns false for unknown
    /// sessions.
    pub fn bind(&self, session_id: Uuid, subscription_id: Uuid) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&session_id) {
            Some(session) => {
                session.bound.insert(subscription_id);
                true
            }
            None => false,
        }
    }

    /// Removes one binding.
    pub fn unbind(&self, session_id: Uuid, subscription_id: Uuid) {
        if let Some(session) = self.sessions.write().get_mut(&session_id) {
            session.bound.remove(&subscription_id);
        }
    }

    /// Drops a session and all of its bindings.
    pub fn remove_session(&self, session_id: Uuid) {
        self.sessions.write().remove(&session_id);
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl std::fmt::Debug for SubscriptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("subscriptions", &self.subscription_count())
            .field("sessions", &self.session_count())
            .finish()
    }
}

/// Extracts (id, criteria) from an active Subscription resource.
fn parse_subscription(resource: &Resource) -> Option<(Uuid, SubscriptionCriteria)> {
    if resource.resource_type() != "Subscription" {
        return None;
    }
    let status = resource.get("status")?.as_str()?;
    if status != "active" {
        return None;
    }
    let id = Uuid::parse_str(resource.id()?).ok()?;
    let criteria = SubscriptionCriteria::parse(resource.get("criteria")?.as_str()?)?;
    Some((id, criteria))
}

/// The history-style notification envelope sent to sessions. The resource
/// entry is omitted on delete.
fn notification_envelope(
    subscription_id: Uuid,
    resource: &Resource,
    operation: WriteOperation,
) -> Value {
    let mut entries = vec![json!({
        "resource": {
            "resourceType": "SubscriptionStatus",
            "type": "event-notification",
            "subscription": {"reference": format!("Subscription/{}", subscription_id)}
        }
    })];
    if operation != WriteOperation::Delete {
        entries.push(json!({"resource": resource.to_value()}));
    }
    json!({
        "resourceType": "Bundle",
        "type": "history",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "entry": entries
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> SubscriptionEngine {
        SubscriptionEngine::new(Arc::new(SearchParameterRegistry::new()))
    }

    fn subscription(id: Uuid, criteria: &str) -> Resource {
        Resource::from_value(json!({
            "resourceType": "Subscription",
            "id": id.to_string(),
            "status": "active",
            "criteria": criteria,
            "channel": {"type": "websocket"}
        }))
        .unwrap()
    }

    fn observation(status: &str) -> Resource {
        Resource::from_value(json!({
            "resourceType": "Observation",
            "id": Uuid::new_v4().to_string(),
            "status": status,
            "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]}
        }))
        .unwrap()
    }

    #[test]
    fn test_criteria_parse() {
        let criteria = SubscriptionCriteria::parse("Observation?status=final&code=8867-4").unwrap();
        assert_eq!(criteria.resource_type, "Observation");
        assert_eq!(criteria.filters.len(), 2);

        let bare = SubscriptionCriteria::parse("Patient").unwrap();
        assert!(bare.filters.is_empty());

        assert!(SubscriptionCriteria::parse("?status=final").is_none());
        assert!(SubscriptionCriteria::parse("Observation?broken").is_none());
    }

    #[test]
    fn test_matching_create_notifies_bound_session() {
        let engine = engine();
        let sub_id = Uuid::new_v4();
        engine.load_active(&[subscription(sub_id, "Observation?status=final")]);

        let (session_id, mut receiver) = engine.register_session();
        assert!(engine.bind(session_id, sub_id));

        engine.evaluate(&observation("final"), WriteOperation::Create);

        let notification = receiver.try_recv().expect("notification expected");
        assert_eq!(notification["type"], "history");
        assert_eq!(
            notification["entry"][0]["resource"]["subscription"]["reference"],
            format!("Subscription/{}", sub_id)
        );
        // Exactly one notification.
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_non_matching_create_is_silent() {
        let engine = engine();
        let sub_id = Uuid::new_v4();
        engine.load_active(&[subscription(sub_id, "Observation?status=final")]);

        let (session_id, mut receiver) = engine.register_session();
        engine.bind(session_id, sub_id);

        engine.evaluate(&observation("preliminary"), WriteOperation::Create);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_token_filter_matches_qualified_form() {
        let engine = engine();
        let sub_id = Uuid::new_v4();
        engine.load_active(&[subscription(
            sub_id,
            "Observation?code=http://loinc.org|8867-4",
        )]);

        let (session_id, mut receiver) = engine.register_session();
        engine.bind(session_id, sub_id);

        engine.evaluate(&observation("final"), WriteOperation::Create);
        assert!(receiver.try_recv().is_ok());
    }

    #[test]
    fn test_delete_notification_omits_resource() {
        let engine = engine();
        let sub_id = Uuid::new_v4();
        engine.load_active(&[subscription(sub_id, "Observation")]);

        let (session_id, mut receiver) = engine.register_session();
        engine.bind(session_id, sub_id);

        engine.evaluate(&observation("final"), WriteOperation::Delete);
        let notification = receiver.try_recv().unwrap();
        assert_eq!(notification["entry"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_disconnect_removes_bindings() {
        let engine = engine();
        let sub_id = Uuid::new_v4();
        engine.load_active(&[subscription(sub_id, "Observation")]);

        let (session_id, receiver) = engine.register_session();
        engine.bind(session_id, sub_id);
        drop(receiver);
        engine.remove_session(session_id);

        // Evaluation must not fail and no session remains.
        engine.evaluate(&observation("final"), WriteOperation::Create);
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn test_queue_overflow_closes_session() {
        let engine = engine();
        let sub_id = Uuid::new_v4();
        engine.load_active(&[subscription(sub_id, "Observation")]);

        let (session_id, receiver) = engine.register_session();
        engine.bind(session_id, sub_id);

        // Never drain; overflow the bounded queue.
        for _ in 0..=SESSION_QUEUE_CAPACITY {
            engine.evaluate(&observation("final"), WriteOperation::Create);
        }
        assert_eq!(engine.session_count(), 0);
        drop(receiver);
    }

    #[test]
    fn test_subscription_write_updates_registry() {
        let engine = engine();
        let sub_id = Uuid::new_v4();

        engine.on_subscription_written(
            &subscription(sub_id, "Patient?gender=male"),
            WriteOperation::Create,
        );
        assert_eq!(engine.subscription_count(), 1);

        // Deactivation removes it.
        let mut inactive = subscription(sub_id, "Patient?gender=male").into_value();
        inactive["status"] = json!("off");
        engine.on_subscription_written(
            &Resource::from_value(inactive).unwrap(),
            WriteOperation::Update,
        );
        assert_eq!(engine.subscription_count(), 0);
    }
}

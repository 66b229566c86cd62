//! Best-effort audit event emission.
//!
//! Audit recording runs after the transaction commits and must never fail
//! the triggering operation; sinks absorb their own errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::ProjectContext;
use crate::types::WriteOperation;

/// One auditable storage event.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// The kind of write.
    pub operation: WriteOperation,
    /// The resource kind.
    pub resource_type: String,
    /// The resource id.
    pub id: Uuid,
    /// The version written.
    pub version_id: Uuid,
    /// Project scope of the operation.
    pub project_id: Option<Uuid>,
    /// Authenticated actor reference.
    pub author: Option<String>,
    /// When the event was recorded.
    pub recorded: DateTime<Utc>,
}

impl AuditEvent {
    /// Builds an event for a committed write.
    pub fn for_write(
        ctx: &ProjectContext,
        operation: WriteOperation,
        resource_type: &str,
        id: Uuid,
        version_id: Uuid,
    ) -> Self {
        Self {
            operation,
            resource_type: resource_type.to_string(),
            id,
            version_id,
            project_id: ctx.project_id(),
            author: ctx.author().map(str::to_string),
            recorded: Utc::now(),
        }
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records one event. Implementations must not propagate failures.
    async fn record(&self, event: AuditEvent);
}

/// Sink that emits structured tracing events.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "atrium::audit",
            operation = ?event.operation,
            resource_type = %event.resource_type,
            id = %event.id,
            version_id = %event.version_id,
            project = ?event.project_id,
            author = event.author.as_deref().unwrap_or("-"),
            "resource written"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracing_sink_never_fails() {
        let ctx = ProjectContext::new(Uuid::new_v4()).with_author("Practitioner/x");
        let event = AuditEvent::for_write(
            &ctx,
            WriteOperation::Create,
            "Patient",
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        TracingAuditSink.record(event).await;
    }

    #[test]
    fn test_event_captures_context() {
        let project = Uuid::new_v4();
        let ctx = ProjectContext::new(project);
        let id = Uuid::new_v4();
        let event =
            AuditEvent::for_write(&ctx, WriteOperation::Delete, "Patient", id, Uuid::new_v4());
        assert_eq!(event.project_id, Some(project));
        assert_eq!(event.id, id);
        assert_eq!(event.operation, WriteOperation::Delete);
    }
}

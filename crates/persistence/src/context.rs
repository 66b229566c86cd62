//! Request context for storage operations.
//!
//! Every repository operation runs under a [`ProjectContext`], the scope
//! derived from the caller's capability token: the active project, the
//! author reference recorded on audit events, and whether the caller may
//! see rows outside its project.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Project scope for a storage operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Project that owns resources written under this context. `None` on
    /// the system context, which sees every project.
    project_id: Option<Uuid>,

    /// Reference of the authenticated actor, e.g. `Practitioner/<id>`.
    author: Option<String>,
}

impl ProjectContext {
    /// Creates a context scoped to a project.
    pub fn new(project_id: Uuid) -> Self {
        Self {
            project_id: Some(project_id),
            author: None,
        }
    }

    /// Creates the unscoped system context used by server-internal work
    /// such as subscription loading.
    pub fn system() -> Self {
        Self {
            project_id: None,
            author: None,
        }
    }

    /// Sets the author reference.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Returns the project id, if scoped.
    pub fn project_id(&self) -> Option<Uuid> {
        self.project_id
    }

    /// Returns the author reference, if known.
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Whether this context may see rows from any project.
    pub fn is_system(&self) -> bool {
        self.project_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_context() {
        let project = Uuid::new_v4();
        let ctx = ProjectContext::new(project).with_author("Practitioner/abc");
        assert_eq!(ctx.project_id(), Some(project));
        assert_eq!(ctx.author(), Some("Practitioner/abc"));
        assert!(!ctx.is_system());
    }

    #[test]
    fn test_system_context() {
        let ctx = ProjectContext::system();
        assert_eq!(ctx.project_id(), None);
        assert!(ctx.is_system());
    }
}

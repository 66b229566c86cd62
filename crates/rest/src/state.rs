//! Shared application state.

use std::sync::Arc;

use axum::http::HeaderMap;
use uuid::Uuid;

use atrium_persistence::query::parser::UnknownParameterBehavior;
use atrium_persistence::{ProjectContext, Repository, SubscriptionEngine};

use crate::config::ServerConfig;
use crate::error::RestError;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    repo: Arc<Repository>,
    subscriptions: Arc<SubscriptionEngine>,
    config: Arc<ServerConfig>,
}

impl AppState {
    /// Creates the state.
    pub fn new(
        repo: Arc<Repository>,
        subscriptions: Arc<SubscriptionEngine>,
        config: ServerConfig,
    ) -> Self {
        Self {
            repo,
            subscriptions,
            config: Arc::new(config),
        }
    }

    /// The repository.
    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// The subscription engine.
    pub fn subscriptions(&self) -> &Arc<SubscriptionEngine> {
        &self.subscriptions
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The external base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.config.base_url_trimmed()
    }

    /// Unknown-search-parameter behavior from configuration.
    pub fn unknown_parameter_behavior(&self) -> UnknownParameterBehavior {
        if self.config.strict_search {
            UnknownParameterBehavior::Error
        } else {
            UnknownParameterBehavior::Drop
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("base_url", &self.base_url())
            .finish_non_exhaustive()
    }
}

/// Derives the project context from request headers.
///
/// The authentication layer in front of this server resolves the
/// capability token and forwards the active project in `X-Project-Id`;
/// absent the header, the system context applies. `X-Author` carries the
/// actor reference recorded on audit events.
pub fn project_context(headers: &HeaderMap) -> Result<ProjectContext, RestError> {
    let Some(raw) = headers.get("x-project-id") else {
        return Ok(ProjectContext::system());
    };
    let project_id = raw
        .to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| RestError::bad_request("X-Project-Id must be a UUID"))?;
    let mut ctx = ProjectContext::new(project_id);
    if let Some(author) = headers.get("x-author").and_then(|v| v.to_str().ok()) {
        ctx = ctx.with_author(author);
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (key, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(key.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_project_context_from_headers() {
        let project = Uuid::new_v4();
        let map = headers(&[
            ("x-project-id", project.to_string().as_str()),
            ("x-author", "Practitioner/p1"),
        ]);
        let ctx = project_context(&map).unwrap();
        assert_eq!(ctx.project_id(), Some(project));
        assert_eq!(ctx.author(), Some("Practitioner/p1"));
    }

    #[test]
    fn test_missing_header_is_system() {
        let ctx = project_context(&HeaderMap::new()).unwrap();
        assert!(ctx.is_system());
    }

    #[test]
    fn test_malformed_project_rejected() {
        let map = headers(&[("x-project-id", "not-a-uuid")]);
        assert!(project_context(&map).is_err());
    }
}

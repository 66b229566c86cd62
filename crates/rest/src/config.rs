//! Server configuration.

use clap::Parser;

/// Runtime configuration for the Atrium FHIR Server.
#[derive(Parser, Debug, Clone)]
#[command(name = "atrium", about = "Atrium FHIR Server", version)]
pub struct ServerConfig {
    /// Host to bind.
    #[arg(long, env = "ATRIUM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind.
    #[arg(long, env = "ATRIUM_PORT", default_value_t = 8103)]
    pub port: u16,

    /// External base URL used in Location headers and paging links.
    #[arg(long, env = "ATRIUM_BASE_URL", default_value = "http://localhost:8103/fhir/R4")]
    pub base_url: String,

    /// Log level directive (e.g. "info", "atrium_persistence=debug").
    #[arg(long, env = "ATRIUM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Reject searches that use unknown parameters instead of dropping
    /// them.
    #[arg(long, env = "ATRIUM_STRICT_SEARCH", default_value_t = true)]
    pub strict_search: bool,

    /// Per-request timeout in seconds.
    #[arg(long, env = "ATRIUM_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    /// The bind address.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The base URL without a trailing slash.
    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

//! Tracing setup and standard span constructors.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG`; defaults to `info`.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();
}

/// Standardized span constructors for event observability.
pub mod spans {
    use tracing::{Span, info_span};

    /// Create a span for a client connection.
    pub fn connection(conn_id: u64, ip: &str) -> Span {
        info_span!("connection", conn_id = conn_id, ip = %ip)
    }

    /// Create a span for one inbound event.
    pub fn event(name: &str, user_id: i64) -> Span {
        info_span!("event", name = %name, user_id = user_id)
    }
}

//! Tracing subscriber setup for hosts embedding the retriever

use crate::error::{ContextError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor an explicit filter is given
pub const DEFAULT_FILTER: &str = "hybrid_context=info";

/// Install a global `fmt` subscriber
///
/// `RUST_LOG` takes precedence over `filter`. Fails if a global subscriber is
/// already installed.
pub fn init_logging(filter: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| ContextError::Config(format!("Failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // The first call may lose to another test in the same binary
        let _ = init_logging(Some("hybrid_context=debug"));
        assert!(init_logging(None).is_err());
    }
}

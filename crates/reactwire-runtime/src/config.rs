//! Reactor configuration
//!
//! Library defaults with `REACTWIRE_*` environment overrides.
//!
//! ```rust,ignore
//! use reactwire_runtime::config::ReactorConfig;
//!
//! let config = ReactorConfig::from_env()
//!     .client_timeout(Some(Duration::from_secs(30)));
//! ```

use std::time::Duration;

use reactwire_core::env::{env_get, env_get_millis};

/// Compile-time defaults
pub mod defaults {
    /// Readiness events fetched per poll
    pub const MAX_EVENTS: usize = 256;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Capacity of the poll event buffer
    pub max_events: usize,
    /// Idle timeout for clients that don't choose their own; `None` disables
    pub client_timeout: Option<Duration>,
    /// Upper bound on a single poll wait; `None` waits for the next deadline
    pub max_wait: Option<Duration>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorConfig {
    /// Defaults only, no environment.
    pub fn new() -> Self {
        Self {
            max_events: defaults::MAX_EVENTS,
            client_timeout: None,
            max_wait: None,
        }
    }

    /// Defaults with environment overrides.
    ///
    /// - `REACTWIRE_MAX_EVENTS` - events per poll
    /// - `REACTWIRE_CLIENT_TIMEOUT_MS` - default idle timeout (0 = off)
    /// - `REACTWIRE_MAX_WAIT_MS` - poll wait cap (0 = none)
    pub fn from_env() -> Self {
        Self {
            max_events: env_get("REACTWIRE_MAX_EVENTS", defaults::MAX_EVENTS).max(1),
            client_timeout: env_get_millis("REACTWIRE_CLIENT_TIMEOUT_MS"),
            max_wait: env_get_millis("REACTWIRE_MAX_WAIT_MS"),
        }
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n.max(1);
        self
    }

    pub fn client_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.client_timeout = timeout;
        self
    }

    pub fn max_wait(mut self, wait: Option<Duration>) -> Self {
        self.max_wait = wait;
        self
    }
}

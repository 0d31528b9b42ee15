//! # reactwire-runtime
//!
//! OS-facing half of reactwire:
//! - `reactor` - single-threaded epoll loop dispatching to [`Client`]s
//! - `timeout` - expiry-ordered registry used to evict idle clients
//! - `config` - reactor configuration with environment overrides
//! - `error` - reactor errors
//!
//! Linux only; the poller is epoll.

pub mod config;
pub mod error;
pub mod timeout;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod reactor;
    } else {
        compile_error!("reactwire-runtime needs epoll (Linux)");
    }
}

// Re-exports
pub use config::ReactorConfig;
pub use error::{BoxError, ReactorError, ReactorResult};
pub use reactor::{Client, Context, Events, Flow, HandlerResult, Reactor, ReactorStats, Token};
pub use timeout::{Clock, ExpiryConfig, ExpiryOwners, ExpiryRegistration, ManualClock, MonotonicClock, TimeoutRegistry};

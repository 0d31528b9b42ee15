//! Reactor error types

use nix::errno::Errno;
use thiserror::Error;

use crate::reactor::{Events, Token};

/// Error a client handler may return; anything `?`-convertible works.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures surfaced by the reactor.
///
/// Everything except `Os` and `UnknownClient` is reported to the affected
/// client's `on_error` and ends that client only; the loop keeps running.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// Hangup or error without the readiness the client asked for
    #[error("peer error: {0:?}")]
    PeerError(Events),

    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error("unknown client {0}")]
    UnknownClient(Token),

    /// System call failure (epoll setup, ctl or wait)
    #[error("os error: {0}")]
    Os(#[from] Errno),
}

impl ReactorError {
    /// Affects a single client rather than the whole loop
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            ReactorError::PeerError(_) | ReactorError::HandlerPanic(_) | ReactorError::Handler(_)
        )
    }
}

pub type ReactorResult<T> = std::result::Result<T, ReactorError>;

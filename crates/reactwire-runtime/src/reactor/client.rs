//! Client trait and dispatch context

use std::os::fd::RawFd;
use std::time::Duration;

use tracing::debug;

use super::{Events, Token};
use crate::error::{BoxError, ReactorError};
use crate::timeout::ExpiryConfig;

/// What a handler wants after a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep the client registered
    Continue,
    /// Unregister and finalize the client after this pass
    Stop,
}

pub type HandlerResult = Result<Flow, BoxError>;

/// An event-driven participant owning one descriptor.
///
/// The reactor owns registered clients. `finalize` runs exactly once when a
/// client leaves the reactor, whatever the reason.
pub trait Client {
    /// Descriptor to poll; must stay open while registered
    fn descriptor(&self) -> RawFd;

    /// Readiness to wait for. Hangup and error are always added.
    fn interest(&self) -> Events;

    /// React to readiness. Must not block.
    fn handle(&mut self, events: Events, ctx: &mut Context<'_>) -> HandlerResult;

    /// The client is being dropped because of `err`.
    fn on_error(&mut self, err: &ReactorError, events: Events) {
        let _ = events;
        debug!(error = %err, "client failed");
    }

    /// Last call before the reactor drops the client
    fn finalize(&mut self) {}

    /// Idle timeout; `None` takes the reactor's default.
    fn expiry(&self) -> Option<ExpiryConfig> {
        None
    }

    /// Idle timeout elapsed; the client is finalized right after.
    fn on_expired(&mut self) {}
}

/// Requests a handler makes of the reactor during a dispatch.
///
/// Registrations and unregistrations are applied once the current pass over
/// ready events has finished, so no handler observes a half-updated
/// reactor.
pub struct Context<'a> {
    pub(crate) token: Token,
    pub(crate) next_token: &'a mut u64,
    pub(crate) pending: &'a mut Vec<(Token, Box<dyn Client>)>,
    pub(crate) deferred: &'a mut Vec<Token>,
    pub(crate) shutdown: &'a mut bool,
    pub(crate) interest: Option<Events>,
    pub(crate) timeout: Option<Option<Duration>>,
}

impl<'a> Context<'a> {
    /// Token of the client being dispatched
    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Add a client (an accepted connection, say). It is polled from the
    /// next iteration on.
    pub fn register(&mut self, client: Box<dyn Client>) -> Token {
        let token = Token(*self.next_token);
        *self.next_token += 1;
        self.pending.push((token, client));
        token
    }

    /// Unregister `token` (possibly this client) after the current pass.
    pub fn unregister_later(&mut self, token: Token) {
        self.deferred.push(token);
    }

    /// Change this client's interest set.
    pub fn set_interest(&mut self, interest: Events) {
        self.interest = Some(interest);
    }

    /// Change this client's idle timeout; `None` disables it.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = Some(timeout);
    }

    /// Unregister every client after this pass, ending `run`.
    pub fn shutdown(&mut self) {
        *self.shutdown = true;
    }
}

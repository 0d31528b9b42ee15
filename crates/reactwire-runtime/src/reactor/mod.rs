//! Single-threaded readiness reactor
//!
//! One epoll instance, one thread, many non-blocking clients. Each loop
//! iteration:
//!
//! ```text
//!   ┌─► sweep idle timeouts ──► on_expired, mark for removal
//!   │   apply pending registrations / removals
//!   │   epoll_wait(min(next deadline, max wait))
//!   │   for each ready client:
//!   │       hangup/error only? ──► on_error(PeerError), mark
//!   │       handle(events, ctx)   (panics caught)
//!   │           Continue ──► apply interest/timeout changes, refresh expiry
//!   │           Stop / Err / panic ──► mark (on_error first for failures)
//!   └── unregister marked: epoll del, timeout unregister, finalize
//! ```
//!
//! Nothing is removed from the reactor while ready events are being walked;
//! removals and registrations requested by handlers land after the pass.

mod client;
mod events;
mod poller;

pub use client::{Client, Context, Flow, HandlerResult};
pub use events::{Events, Token};

use std::any::Any;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::ReactorConfig;
use crate::error::{ReactorError, ReactorResult};
use crate::timeout::{Clock, ExpiryConfig, ExpiryOwners, ExpiryRegistration, MonotonicClock, TimeoutRegistry};
use poller::Poller;

/// Counters since construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactorStats {
    pub iterations: u64,
    pub registered: u64,
    pub dispatched: u64,
    pub peer_errors: u64,
    pub handler_errors: u64,
    pub panics: u64,
    pub expired: u64,
    pub finalized: u64,
}

struct Slot {
    client: Box<dyn Client>,
    fd: RawFd,
    interest: Events,
    expiry: ExpiryRegistration,
}

impl ExpiryOwners<Token> for HashMap<Token, Slot> {
    fn registration(&mut self, owner: Token) -> Option<&mut ExpiryRegistration> {
        self.get_mut(&owner).map(|slot| &mut slot.expiry)
    }
}

pub struct Reactor<C: Clock = MonotonicClock> {
    config: ReactorConfig,
    poller: Poller,
    clients: HashMap<Token, Slot>,
    timeouts: Option<TimeoutRegistry<Token, C>>,
    next_token: u64,
    ready: Vec<(Token, Events)>,
    pending: Vec<(Token, Box<dyn Client>)>,
    deferred: Vec<Token>,
    doomed: Vec<Token>,
    shutdown: bool,
    stats: ReactorStats,
}

impl Reactor<MonotonicClock> {
    /// Reactor with idle timeouts on the monotonic clock
    pub fn new(config: ReactorConfig) -> ReactorResult<Self> {
        Self::with_clock(config, MonotonicClock::new())
    }

    /// Reactor without a timeout registry; client expiry is ignored
    pub fn without_timeouts(config: ReactorConfig) -> ReactorResult<Self> {
        Self::build(config, None)
    }
}

impl<C: Clock> Reactor<C> {
    pub fn with_clock(config: ReactorConfig, clock: C) -> ReactorResult<Self> {
        Self::build(config, Some(TimeoutRegistry::with_clock(clock)))
    }

    fn build(config: ReactorConfig, timeouts: Option<TimeoutRegistry<Token, C>>) -> ReactorResult<Self> {
        let poller = Poller::new(config.max_events)?;
        debug!(max_events = config.max_events, timeouts = timeouts.is_some(), "reactor created");
        Ok(Self {
            config,
            poller,
            clients: HashMap::new(),
            timeouts,
            next_token: 1,
            ready: Vec::new(),
            pending: Vec::new(),
            deferred: Vec::new(),
            doomed: Vec::new(),
            shutdown: false,
            stats: ReactorStats::default(),
        })
    }

    #[inline]
    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    #[inline]
    pub fn stats(&self) -> &ReactorStats {
        &self.stats
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    #[inline]
    pub fn contains(&self, token: Token) -> bool {
        self.clients.contains_key(&token)
    }

    pub fn timeouts(&self) -> Option<&TimeoutRegistry<Token, C>> {
        self.timeouts.as_ref()
    }

    /// Armed idle deadline of `token`, in registry microseconds
    pub fn deadline_of(&self, token: Token) -> Option<u64> {
        let slot = self.clients.get(&token)?;
        self.timeouts.as_ref()?.deadline_of(&slot.expiry)
    }

    /// Start polling `client`.
    ///
    /// On failure the client is finalized before the error is returned.
    pub fn register(&mut self, client: Box<dyn Client>) -> ReactorResult<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.attach(token, client)?;
        Ok(token)
    }

    /// Remove and finalize `token` now. Handlers use
    /// [`Context::unregister_later`] instead.
    pub fn unregister(&mut self, token: Token) -> ReactorResult<()> {
        if self.detach(token) {
            Ok(())
        } else {
            Err(ReactorError::UnknownClient(token))
        }
    }

    fn attach(&mut self, token: Token, mut client: Box<dyn Client>) -> ReactorResult<()> {
        let fd = client.descriptor();
        let interest = client.interest();
        if let Err(err) = self.poller.add(fd, token, interest | Events::ALWAYS) {
            warn!(%token, fd, error = %err, "client registration failed");
            client.finalize();
            self.stats.finalized += 1;
            return Err(err);
        }

        let expiry = client
            .expiry()
            .or_else(|| self.config.client_timeout.map(ExpiryConfig::after))
            .unwrap_or_else(ExpiryConfig::disabled);
        let mut registration = ExpiryRegistration::from_config(expiry);
        if let Some(timeouts) = self.timeouts.as_mut() {
            timeouts.register(token, &mut registration);
        }

        self.clients.insert(
            token,
            Slot {
                client,
                fd,
                interest,
                expiry: registration,
            },
        );
        self.stats.registered += 1;
        debug!(%token, fd, ?interest, ?expiry, "client registered");
        Ok(())
    }

    fn detach(&mut self, token: Token) -> bool {
        let Some(mut slot) = self.clients.remove(&token) else {
            return false;
        };
        if let Err(err) = self.poller.delete(slot.fd) {
            // descriptor may already be closed by the client
            trace!(%token, error = %err, "epoll delete failed");
        }
        if let Some(timeouts) = self.timeouts.as_mut() {
            timeouts.unregister(&mut slot.expiry);
        }
        slot.client.finalize();
        self.stats.finalized += 1;
        debug!(%token, "client finalized");
        true
    }

    /// Run until no client is left.
    ///
    /// Returns immediately when nothing is registered. Only OS failures of
    /// the poller end the loop early.
    pub fn run(&mut self) -> ReactorResult<()> {
        info!(clients = self.clients.len(), "reactor running");
        while !self.clients.is_empty() {
            self.run_once(None)?;
        }
        info!(stats = ?self.stats, "reactor stopped");
        Ok(())
    }

    /// One loop iteration, waiting at most `max_wait` (on top of the
    /// configured cap and the next idle deadline). Returns the number of
    /// clients dispatched.
    pub fn run_once(&mut self, max_wait: Option<Duration>) -> ReactorResult<usize> {
        self.stats.iterations += 1;
        self.expire();
        self.finish_pass();
        if self.clients.is_empty() {
            return Ok(0);
        }

        let wait = self.wait_bound(max_wait);
        let n = self.poller.wait(wait)?;

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(self.poller.ready());
        let mut dispatched = 0;
        for &(token, events) in &ready {
            if self.dispatch(token, events) {
                dispatched += 1;
            }
        }
        self.ready = ready;
        trace!(ready = n, dispatched, "pass complete");

        self.finish_pass();
        Ok(dispatched)
    }

    fn wait_bound(&self, max_wait: Option<Duration>) -> Option<Duration> {
        let deadline = self.timeouts.as_ref().and_then(|t| t.next_deadline());
        [deadline, self.config.max_wait, max_wait].into_iter().flatten().min()
    }

    fn expire(&mut self) {
        let Some(timeouts) = self.timeouts.as_mut() else {
            return;
        };
        let doomed = &mut self.doomed;
        let fired = timeouts.sweep(&mut self.clients, |_, clients, token| {
            if let Some(slot) = clients.get_mut(&token) {
                warn!(%token, timeout = ?slot.expiry.timeout(), "client idle timeout");
                slot.client.on_expired();
                doomed.push(token);
            }
        });
        self.stats.expired += fired as u64;
    }

    /// Returns whether the client's handler or error callback ran.
    fn dispatch(&mut self, token: Token, events: Events) -> bool {
        if self.doomed.contains(&token) {
            return false;
        }
        let Some(slot) = self.clients.get_mut(&token) else {
            trace!(%token, "event for departed client");
            return false;
        };

        if events.is_peer_error(slot.interest) {
            let err = ReactorError::PeerError(events);
            warn!(%token, ?events, "peer error");
            self.stats.peer_errors += 1;
            slot.client.on_error(&err, events);
            self.doomed.push(token);
            return true;
        }

        self.stats.dispatched += 1;
        let mut ctx = Context {
            token,
            next_token: &mut self.next_token,
            pending: &mut self.pending,
            deferred: &mut self.deferred,
            shutdown: &mut self.shutdown,
            interest: None,
            timeout: None,
        };
        let client = &mut slot.client;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| client.handle(events, &mut ctx)));
        let Context { interest, timeout, .. } = ctx;

        let failure = match outcome {
            Ok(Ok(Flow::Continue)) => None,
            Ok(Ok(Flow::Stop)) => {
                trace!(%token, "client stopped");
                self.doomed.push(token);
                return true;
            }
            Ok(Err(err)) => {
                self.stats.handler_errors += 1;
                Some(ReactorError::Handler(err))
            }
            Err(payload) => {
                self.stats.panics += 1;
                Some(ReactorError::HandlerPanic(panic_message(payload.as_ref())))
            }
        };
        if let Some(err) = failure {
            warn!(%token, error = %err, "client handler failed");
            slot.client.on_error(&err, events);
            self.doomed.push(token);
            return true;
        }

        if let Some(interest) = interest.filter(|i| *i != slot.interest) {
            if let Err(err) = self.poller.modify(slot.fd, token, interest | Events::ALWAYS) {
                warn!(%token, error = %err, "interest change failed");
                slot.client.on_error(&err, events);
                self.doomed.push(token);
                return true;
            }
            slot.interest = interest;
        }

        if let Some(timeouts) = self.timeouts.as_mut() {
            match timeout {
                Some(t) => {
                    slot.expiry.set_timeout(t);
                    timeouts.reregister(&mut slot.expiry);
                }
                // activity pushes the idle deadline out
                None => timeouts.register(token, &mut slot.expiry),
            }
        }
        true
    }

    /// Apply what handlers asked for during the pass.
    fn finish_pass(&mut self) {
        for (token, client) in std::mem::take(&mut self.pending) {
            // failure already logged and the client finalized
            let _ = self.attach(token, client);
        }

        self.doomed.append(&mut self.deferred);
        if self.shutdown {
            info!(clients = self.clients.len(), "reactor shutdown requested");
            self.doomed.extend(self.clients.keys().copied());
            self.shutdown = false;
        }

        let mut doomed = std::mem::take(&mut self.doomed);
        for token in doomed.drain(..) {
            self.detach(token);
        }
        self.doomed = doomed;
    }
}

impl<C: Clock> Drop for Reactor<C> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let tokens: Vec<Token> = self.clients.keys().copied().collect();
        for token in tokens {
            self.detach(token);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

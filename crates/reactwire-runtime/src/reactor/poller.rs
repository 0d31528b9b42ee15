//! Thin epoll wrapper
//!
//! Level-triggered, one entry per descriptor, the client token stored in
//! the event's user data.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use tracing::trace;

use super::{Events, Token};
use crate::error::ReactorResult;

pub(crate) struct Poller {
    epfd: OwnedFd,
    events: Vec<libc::epoll_event>,
    ready: usize,
}

impl Poller {
    pub(crate) fn new(capacity: usize) -> ReactorResult<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Errno::last().into());
        }
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            ready: 0,
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: Token, interest: Events) -> ReactorResult<()> {
        let mut ev = libc::epoll_event {
            events: interest.bits(),
            u64: token.0,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }

    pub(crate) fn add(&self, fd: RawFd, token: Token, interest: Events) -> ReactorResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    pub(crate) fn modify(&self, fd: RawFd, token: Token, interest: Events) -> ReactorResult<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    pub(crate) fn delete(&self, fd: RawFd) -> ReactorResult<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, Token(0), Events::empty())
    }

    /// Block for at most `timeout` (`None` = indefinitely). An interrupted
    /// wait reports zero events.
    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> ReactorResult<usize> {
        let timeout_ms = match timeout {
            None => -1,
            // round up so a pending deadline is not polled in a busy loop
            Some(d) => d.as_micros().div_ceil(1000).min(libc::c_int::MAX as u128) as libc::c_int,
        };
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            self.ready = 0;
            let errno = Errno::last();
            if errno == Errno::EINTR {
                return Ok(0);
            }
            return Err(errno.into());
        }
        self.ready = n as usize;
        trace!(ready = self.ready, timeout_ms, "poll returned");
        Ok(self.ready)
    }

    /// Ready events from the last `wait`
    pub(crate) fn ready(&self) -> impl Iterator<Item = (Token, Events)> + '_ {
        self.events[..self.ready].iter().map(|ev| {
            // fields of the packed struct are copied out before use
            let bits = ev.events;
            let data = ev.u64;
            (Token(data), Events::from_epoll(bits))
        })
    }
}

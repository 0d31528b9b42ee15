//! Readiness sets and client tokens

use std::fmt;

bitflags::bitflags! {
    /// Readiness a client asks for, and readiness the kernel reports.
    ///
    /// Bit values are the epoll ones so translation is a truncating cast.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Events: u32 {
        const READ = libc::EPOLLIN as u32;
        const PRIORITY = libc::EPOLLPRI as u32;
        const WRITE = libc::EPOLLOUT as u32;
        const ERROR = libc::EPOLLERR as u32;
        const HANGUP = libc::EPOLLHUP as u32;
        const READ_HANGUP = libc::EPOLLRDHUP as u32;
    }
}

impl Events {
    /// Conditions the kernel reports whether or not they were requested
    pub const ALWAYS: Events = Events::HANGUP.union(Events::ERROR);

    /// Conditions that mean the peer is gone or broken
    pub const TROUBLE: Events = Events::HANGUP.union(Events::ERROR).union(Events::READ_HANGUP);

    /// Translate raw epoll bits, dropping anything unknown.
    #[inline]
    pub fn from_epoll(bits: u32) -> Self {
        Events::from_bits_truncate(bits)
    }

    /// Trouble reported while none of the `interest` readiness is: the
    /// handler has nothing to act on, so this is a peer error.
    pub fn is_peer_error(self, interest: Events) -> bool {
        self.intersects(Events::TROUBLE) && !self.intersects(interest & (Events::READ | Events::WRITE))
    }
}

/// Identity of a registered client. Never reused by a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_epoll() {
        let raw = (libc::EPOLLIN | libc::EPOLLHUP) as u32 | 0x8000_0000;
        let ev = Events::from_epoll(raw);
        assert_eq!(ev, Events::READ | Events::HANGUP);
    }

    #[test]
    fn test_peer_error_classification() {
        let read = Events::READ;
        assert!(Events::HANGUP.is_peer_error(read));
        assert!(Events::ERROR.is_peer_error(read));
        assert!((Events::HANGUP | Events::WRITE).is_peer_error(read));
        // readable + hangup: let the read path find EOF
        assert!(!(Events::HANGUP | Events::READ).is_peer_error(read));
        assert!(!Events::READ.is_peer_error(read));
        assert!(!Events::WRITE.is_peer_error(Events::WRITE));
    }
}

//! When is a sequence of transmitted arrays complete?
//!
//! One [`Terminator`] per transmit operation. Feed it the length of every
//! array as it goes by; it answers "done" exactly once.

/// Shape of one transmit operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransmitPolicy {
    /// Exactly one array
    #[default]
    Single,
    /// Exactly two arrays
    Pair,
    /// Arrays until a zero-length one
    List,
    /// Arrays until two consecutive zero-length ones
    PairList,
}

#[derive(Debug, Clone)]
pub struct Terminator {
    policy: TransmitPolicy,
    transmitted: u64,
    last_empty_at: Option<u64>,
}

impl Terminator {
    pub fn new(policy: TransmitPolicy) -> Self {
        Self {
            policy,
            transmitted: 0,
            last_empty_at: None,
        }
    }

    #[inline]
    pub fn policy(&self) -> TransmitPolicy {
        self.policy
    }

    /// Arrays seen since the last reset
    #[inline]
    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    /// Clear counters. Call at the start of every transmit operation.
    pub fn reset(&mut self) {
        self.transmitted = 0;
        self.last_empty_at = None;
    }

    /// Record one array of `len` elements; true if the sequence is complete.
    pub fn observe(&mut self, len: usize) -> bool {
        let index = self.transmitted;
        self.transmitted += 1;

        match self.policy {
            TransmitPolicy::Single => self.transmitted == 1,
            TransmitPolicy::Pair => self.transmitted == 2,
            TransmitPolicy::List => len == 0,
            TransmitPolicy::PairList => {
                if len != 0 {
                    return false;
                }
                match self.last_empty_at {
                    Some(prev) if index == prev + 1 => true,
                    _ => {
                        self.last_empty_at = Some(index);
                        false
                    }
                }
            }
        }
    }
}

impl Default for Terminator {
    fn default() -> Self {
        Self::new(TransmitPolicy::default())
    }
}

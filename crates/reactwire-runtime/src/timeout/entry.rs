//! Expiry registration and key types

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide unique identity of one [`ExpiryRegistration`]
///
/// Used by the registry's reverse map to find the owning client when a
/// registration is handed back on its own (see `reregister`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

impl RegistrationId {
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        RegistrationId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Position in the expiry index.
///
/// Ordered by deadline; `seq` keeps equal deadlines distinct and in
/// insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpiryKey {
    /// Microseconds since the registry's clock started
    pub deadline_us: u64,
    pub(crate) seq: u64,
}

impl ExpiryKey {
    /// Largest key with the given deadline, for inclusive range scans
    #[inline]
    pub(crate) fn last_at(deadline_us: u64) -> Self {
        Self {
            deadline_us,
            seq: u64::MAX,
        }
    }
}

/// Timeout a client asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryConfig {
    pub enabled: bool,
    pub duration: Duration,
}

impl ExpiryConfig {
    /// Expire after `duration` without activity
    pub fn after(duration: Duration) -> Self {
        Self {
            enabled: true,
            duration,
        }
    }

    /// Never expire
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            duration: Duration::ZERO,
        }
    }
}

/// Per-client timeout state.
///
/// `expiry_key` is `Some` exactly while the registration sits in the
/// registry's index. An inactive registration never has a key.
#[derive(Debug, Clone)]
pub struct ExpiryRegistration {
    id: RegistrationId,
    pub(crate) registered: bool,
    active: bool,
    timeout: Duration,
    pub(crate) expiry_key: Option<ExpiryKey>,
}

impl ExpiryRegistration {
    /// Active registration expiring `timeout` after each (re)registration
    pub fn new(timeout: Duration) -> Self {
        Self {
            id: RegistrationId::new(),
            registered: false,
            active: true,
            timeout,
            expiry_key: None,
        }
    }

    /// Registration that is tracked but never expires
    pub fn inactive() -> Self {
        Self {
            active: false,
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn from_config(config: ExpiryConfig) -> Self {
        if config.enabled {
            Self::new(config.duration)
        } else {
            Self::inactive()
        }
    }

    #[inline]
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Known to a registry (active or not)
    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn expiry_key(&self) -> Option<ExpiryKey> {
        self.expiry_key
    }

    /// Change the timeout; `None` deactivates.
    ///
    /// Takes effect on the next `register` / `reregister`.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        match timeout {
            Some(t) => {
                self.active = true;
                self.timeout = t;
            }
            None => {
                self.active = false;
                self.timeout = Duration::ZERO;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_uniqueness() {
        let ids: Vec<_> = (0..1000).map(|_| RegistrationId::new()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn test_key_ordering() {
        let a = ExpiryKey { deadline_us: 10, seq: 5 };
        let b = ExpiryKey { deadline_us: 10, seq: 6 };
        let c = ExpiryKey { deadline_us: 11, seq: 0 };
        assert!(a < b && b < c);
        assert!(b < ExpiryKey::last_at(10));
        assert!(ExpiryKey::last_at(10) < c);
    }

    #[test]
    fn test_from_config() {
        let reg = ExpiryRegistration::from_config(ExpiryConfig::after(Duration::from_secs(3)));
        assert!(reg.is_active());
        assert_eq!(reg.timeout(), Duration::from_secs(3));
        assert!(!reg.is_registered());
        assert!(reg.expiry_key().is_none());

        let reg = ExpiryRegistration::from_config(ExpiryConfig::disabled());
        assert!(!reg.is_active());
    }

    #[test]
    fn test_set_timeout() {
        let mut reg = ExpiryRegistration::inactive();
        reg.set_timeout(Some(Duration::from_millis(5)));
        assert!(reg.is_active());
        reg.set_timeout(None);
        assert!(!reg.is_active());
        assert_eq!(reg.timeout(), Duration::ZERO);
    }
}

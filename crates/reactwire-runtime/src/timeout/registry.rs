//! TimeoutRegistry - expiry index for reactor clients

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use tracing::trace;

use super::entry::{ExpiryKey, ExpiryRegistration, RegistrationId};
use super::{saturating_micros, Clock, MonotonicClock};

/// Where the registry finds an owner's registration when it fires
pub trait ExpiryOwners<K> {
    fn registration(&mut self, owner: K) -> Option<&mut ExpiryRegistration>;
}

impl<K: Eq + Hash> ExpiryOwners<K> for HashMap<K, ExpiryRegistration> {
    fn registration(&mut self, owner: K) -> Option<&mut ExpiryRegistration> {
        self.get_mut(&owner)
    }
}

/// Expiry-ordered index of owners (client tokens in the reactor).
///
/// Invariants:
/// - every key in the index belongs to exactly one registration whose
///   `expiry_key` is that key
/// - an inactive registration is never in the index
/// - a fired registration is neither indexed nor in the owner map
/// - `now` never decreases
///
/// ```ignore
/// let mut registry = TimeoutRegistry::new();
/// let mut regs = HashMap::new();
/// let reg = regs.entry(token).or_insert(ExpiryRegistration::new(Duration::from_secs(30)));
/// registry.register(token, reg);
///
/// // once per loop iteration
/// registry.sweep(&mut regs, |_, _, token| evict(token));
/// ```
#[derive(Debug)]
pub struct TimeoutRegistry<K, C = MonotonicClock> {
    clock: C,
    now_us: u64,
    next_seq: u64,
    index: BTreeMap<ExpiryKey, (K, RegistrationId)>,
    owners: HashMap<RegistrationId, K>,
}

impl<K> TimeoutRegistry<K, MonotonicClock>
where
    K: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl<K> Default for TimeoutRegistry<K, MonotonicClock>
where
    K: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, C> TimeoutRegistry<K, C>
where
    K: Copy + Eq + Hash + Debug,
    C: Clock,
{
    pub fn with_clock(clock: C) -> Self {
        let now_us = clock.now_us();
        Self {
            clock,
            now_us,
            next_seq: 0,
            index: BTreeMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Cached time of the last `advance`
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Refresh the cached time from the clock.
    pub fn advance(&mut self) -> u64 {
        self.now_us = self.now_us.max(self.clock.now_us());
        self.now_us
    }

    /// Registrations currently waiting to expire
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Associate `reg` with `owner` and (re)arm it at `now + timeout`.
    ///
    /// Any previous index entry for `reg` is dropped first. Inactive
    /// registrations are remembered but never indexed.
    pub fn register(&mut self, owner: K, reg: &mut ExpiryRegistration) {
        self.disarm(reg);
        self.owners.insert(reg.id(), owner);
        reg.registered = true;

        if !reg.is_active() {
            return;
        }
        let now = self.advance();
        let key = ExpiryKey {
            deadline_us: now.saturating_add(saturating_micros(reg.timeout())),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.index.insert(key, (owner, reg.id()));
        reg.expiry_key = Some(key);
        trace!(?owner, deadline_us = key.deadline_us, "expiry armed");
    }

    /// Re-arm after the registration's timeout changed.
    ///
    /// Looks the owner up by registration id; a registration this registry
    /// has never seen is unregistered instead.
    pub fn reregister(&mut self, reg: &mut ExpiryRegistration) {
        match self.owners.get(&reg.id()).copied() {
            Some(owner) => self.register(owner, reg),
            None => self.unregister(reg),
        }
    }

    /// Forget `reg`. Safe to call any number of times.
    pub fn unregister(&mut self, reg: &mut ExpiryRegistration) {
        self.disarm(reg);
        self.owners.remove(&reg.id());
        reg.registered = false;
    }

    fn disarm(&mut self, reg: &mut ExpiryRegistration) {
        if let Some(key) = reg.expiry_key.take() {
            self.index.remove(&key);
        }
    }

    /// Deadline of `reg` if it is armed in this registry
    pub fn deadline_of(&self, reg: &ExpiryRegistration) -> Option<u64> {
        reg.expiry_key()
            .filter(|key| self.index.contains_key(key))
            .map(|key| key.deadline_us)
    }

    /// `reg` is armed and its deadline is strictly before `now`.
    pub fn timed_out(&self, reg: &ExpiryRegistration) -> bool {
        self.deadline_of(reg).is_some_and(|deadline| deadline < self.now_us)
    }

    /// Time until the earliest deadline (zero if already due), measured
    /// against a fresh clock reading.
    pub fn next_deadline(&self) -> Option<Duration> {
        let (first, _) = self.index.first_key_value()?;
        let now = self.now_us.max(self.clock.now_us());
        Some(Duration::from_micros(first.deadline_us.saturating_sub(now)))
    }

    /// First pass of a sweep: advance `now` and list every entry with
    /// deadline `<= now`, earliest first. The index is left untouched.
    pub fn collect_expired(&mut self) -> Vec<(ExpiryKey, K)> {
        let now = self.advance();
        self.index
            .range(..=ExpiryKey::last_at(now))
            .map(|(key, (owner, _))| (*key, *owner))
            .collect()
    }

    /// Second pass of a sweep: retire exactly the listed keys.
    ///
    /// Each retired registration loses its index entry, its owner entry and
    /// its `expiry_key`. Entries re-armed or unregistered in between carry
    /// other keys and are left alone. Returns how many keys were retired.
    pub fn remove_fired<O>(&mut self, fired: &[(ExpiryKey, K)], owners: &mut O) -> usize
    where
        O: ExpiryOwners<K> + ?Sized,
    {
        fired
            .iter()
            .filter(|&&(key, owner)| self.retire(key, owner, &mut *owners))
            .count()
    }

    /// Expire everything due, invoking `on_expired` per owner in deadline
    /// order. Each registration is retired just before its callback, which
    /// may then register or unregister freely. Entries unregistered by an
    /// earlier callback in the same sweep do not fire. Returns the number of
    /// entries that fired.
    pub fn sweep<O, F>(&mut self, owners: &mut O, mut on_expired: F) -> usize
    where
        O: ExpiryOwners<K> + ?Sized,
        F: FnMut(&mut Self, &mut O, K),
    {
        let fired = self.collect_expired();
        let mut count = 0;
        for (key, owner) in fired {
            if self.retire(key, owner, &mut *owners) {
                on_expired(self, &mut *owners, owner);
                count += 1;
            }
        }
        count
    }

    fn retire<O>(&mut self, key: ExpiryKey, owner: K, owners: &mut O) -> bool
    where
        O: ExpiryOwners<K> + ?Sized,
    {
        let Some((_, id)) = self.index.remove(&key) else {
            return false;
        };
        self.owners.remove(&id);
        if let Some(reg) = owners.registration(owner) {
            if reg.expiry_key == Some(key) {
                reg.expiry_key = None;
                reg.registered = false;
            }
        }
        trace!(?owner, deadline_us = key.deadline_us, "expiry fired");
        true
    }

    /// Owners known to the reverse map, armed or not
    #[inline]
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeout::ManualClock;

    fn registry() -> (TimeoutRegistry<u32, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        (TimeoutRegistry::with_clock(clock.clone()), clock)
    }

    fn regs(timeouts_ms: &[(u32, u64)]) -> HashMap<u32, ExpiryRegistration> {
        timeouts_ms
            .iter()
            .map(|&(owner, ms)| (owner, ExpiryRegistration::new(Duration::from_millis(ms))))
            .collect()
    }

    #[test]
    fn test_sweep_in_deadline_order() {
        let (mut reg, clock) = registry();
        let mut regs = regs(&[(3, 30), (1, 10), (2, 20)]);
        for owner in [3, 1, 2] {
            reg.register(owner, regs.get_mut(&owner).unwrap());
        }
        let key3 = regs[&3].expiry_key();

        clock.advance(Duration::from_millis(25));
        let mut fired = Vec::new();
        assert_eq!(reg.sweep(&mut regs, |_, _, owner| fired.push(owner)), 2);
        assert_eq!(fired, vec![1, 2]);

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.deadline_of(&regs[&3]), Some(30_000));
        assert_eq!(regs[&3].expiry_key(), key3);
        assert_eq!(reg.deadline_of(&regs[&1]), None);
    }

    #[test]
    fn test_sweep_clears_fired_registrations() {
        let (mut reg, clock) = registry();
        let mut regs = regs(&[(1, 1)]);
        reg.register(1, regs.get_mut(&1).unwrap());
        assert_eq!(reg.owner_count(), 1);

        clock.advance(Duration::from_millis(2));
        assert_eq!(reg.sweep(&mut regs, |_, _, _| {}), 1);

        assert!(reg.is_empty());
        assert_eq!(reg.owner_count(), 0);
        assert!(regs[&1].expiry_key().is_none());
        assert!(!regs[&1].is_registered());

        // a fired registration can be armed again
        reg.register(1, regs.get_mut(&1).unwrap());
        assert_eq!(reg.deadline_of(&regs[&1]), Some(3_000));
        assert_eq!(reg.owner_count(), 1);
    }

    #[test]
    fn test_two_phase_sweep_retires_listed_keys() {
        let (mut reg, clock) = registry();
        let mut regs = regs(&[(1, 1), (2, 1), (3, 50)]);
        for owner in [1, 2, 3] {
            reg.register(owner, regs.get_mut(&owner).unwrap());
        }
        clock.advance(Duration::from_millis(1));
        let fired = reg.collect_expired();
        assert_eq!(fired.len(), 2);

        // owner 2 leaves between the passes
        reg.unregister(regs.get_mut(&2).unwrap());
        assert_eq!(reg.remove_fired(&fired, &mut regs), 1);
        assert!(regs[&1].expiry_key().is_none());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.owner_count(), 1);
    }

    #[test]
    fn test_unregistered_in_callback_does_not_fire() {
        let (mut reg, clock) = registry();
        let mut regs = regs(&[(1, 1), (2, 2)]);
        for owner in [1, 2] {
            reg.register(owner, regs.get_mut(&owner).unwrap());
        }
        clock.advance(Duration::from_millis(5));
        let mut fired = Vec::new();
        let count = reg.sweep(&mut regs, |registry, regs, owner| {
            fired.push(owner);
            if let Some(other) = regs.get_mut(&2) {
                registry.unregister(other);
            }
        });
        assert_eq!(count, 1);
        assert_eq!(fired, vec![1]);
        assert_eq!(reg.owner_count(), 0);
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let (mut reg, clock) = registry();
        let mut r = ExpiryRegistration::new(Duration::from_millis(18_446_744_073_709_552));
        reg.register(1, &mut r);
        assert_eq!(reg.deadline_of(&r), Some(u64::MAX));

        clock.advance(Duration::from_secs(3600));
        assert!(reg.collect_expired().is_empty());
        assert!(!reg.timed_out(&r));
    }

    #[test]
    fn test_equal_deadlines_keep_insertion_order() {
        let (mut reg, clock) = registry();
        let mut regs: Vec<_> = (0..5).map(|_| ExpiryRegistration::new(Duration::from_millis(1))).collect();
        for (owner, r) in regs.iter_mut().enumerate() {
            reg.register(owner as u32, r);
        }
        clock.advance(Duration::from_millis(1));
        let fired: Vec<_> = reg.collect_expired().into_iter().map(|(_, o)| o).collect();
        assert_eq!(fired, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_boundary_is_inclusive_for_sweep_exclusive_for_timed_out() {
        let (mut reg, clock) = registry();
        let mut r = ExpiryRegistration::new(Duration::from_micros(100));
        reg.register(7, &mut r);

        clock.set_us(100);
        reg.advance();
        assert!(!reg.timed_out(&r));
        assert_eq!(reg.collect_expired().len(), 1);

        clock.set_us(101);
        reg.advance();
        assert!(reg.timed_out(&r));
    }

    #[test]
    fn test_reregister_in_callback_survives() {
        let (mut reg, clock) = registry();
        let mut regs = regs(&[(1, 5)]);
        reg.register(1, regs.get_mut(&1).unwrap());
        let old = regs[&1].expiry_key();

        clock.advance(Duration::from_millis(6));
        let fired = reg.sweep(&mut regs, |registry, regs, owner| {
            if let Some(r) = regs.get_mut(&owner) {
                registry.register(owner, r);
            }
        });

        assert_eq!(fired, 1);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.owner_count(), 1);
        assert_eq!(reg.deadline_of(&regs[&1]), Some(11_000));
        assert_ne!(regs[&1].expiry_key(), old, "old key was removed");
    }

    #[test]
    fn test_inactive_not_indexed() {
        let (mut reg, _clock) = registry();
        let mut r = ExpiryRegistration::inactive();
        reg.register(1, &mut r);
        assert!(r.is_registered());
        assert!(r.expiry_key().is_none());
        assert!(reg.is_empty());
        assert_eq!(reg.next_deadline(), None);

        // turning the timeout on later finds the owner again
        r.set_timeout(Some(Duration::from_millis(2)));
        reg.reregister(&mut r);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.collect_expired().len(), 0);
    }

    #[test]
    fn test_reregister_unknown_unregisters() {
        let (mut reg, _clock) = registry();
        let mut r = ExpiryRegistration::new(Duration::from_millis(1));
        reg.reregister(&mut r);
        assert!(!r.is_registered());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unregister_idempotent() {
        let (mut reg, _clock) = registry();
        let mut r = ExpiryRegistration::new(Duration::from_millis(1));
        reg.register(1, &mut r);
        reg.unregister(&mut r);
        reg.unregister(&mut r);
        assert!(!r.is_registered());
        assert!(r.expiry_key().is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_next_deadline() {
        let (mut reg, clock) = registry();
        let mut a = ExpiryRegistration::new(Duration::from_millis(50));
        let mut b = ExpiryRegistration::new(Duration::from_millis(20));
        reg.register(1, &mut a);
        reg.register(2, &mut b);
        assert_eq!(reg.next_deadline(), Some(Duration::from_millis(20)));

        clock.advance(Duration::from_millis(15));
        assert_eq!(reg.next_deadline(), Some(Duration::from_millis(5)));
        clock.advance(Duration::from_millis(15));
        assert_eq!(reg.next_deadline(), Some(Duration::ZERO));
    }

    #[test]
    fn test_register_refreshes_deadline() {
        let (mut reg, clock) = registry();
        let mut r = ExpiryRegistration::new(Duration::from_millis(10));
        reg.register(1, &mut r);
        clock.advance(Duration::from_millis(8));
        reg.register(1, &mut r);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.deadline_of(&r), Some(18_000));
    }
}

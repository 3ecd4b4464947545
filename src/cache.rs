//! TTL-governed record cache.
//!
//! One slot per (name, type, class); slots are set-valued because several
//! records legitimately coexist under one key (multiple PTR targets for a
//! service type, multiple addresses for a host). All mutation happens on the
//! engine loop, so the cache itself is lock-free and clocked purely by the
//! `Instant`s passed in.

use std::{
    collections::BTreeMap,
    fmt,
    time::{Duration, Instant},
};

use crate::{
    name::DomainName,
    packet::{
        records::{RData, Record},
        Class, Type,
    },
};

/// Identifies one cache slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheKey {
    pub name: DomainName,
    pub ty: Type,
    pub class: Class,
}

impl CacheKey {
    pub fn new(name: DomainName, ty: Type) -> Self {
        Self {
            name,
            ty,
            class: Class::IN,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.class, self.ty)
    }
}

/// A live record held by the cache.
#[derive(Debug, Clone)]
pub struct CachedRecord {
    pub key: CacheKey,
    pub rdata: RData,
    /// TTL the record was received with, in seconds.
    pub original_ttl: u32,
    expires: Instant,
    /// Set once a refresh query has been issued for this record, so the 50%
    /// threshold only triggers one re-query per lifetime.
    refresh_sent: bool,
}

impl CachedRecord {
    /// Seconds until expiry, rounded down. 0 means the record is expired.
    pub fn remaining_ttl(&self, now: Instant) -> u32 {
        self.expires
            .saturating_duration_since(now)
            .as_secs()
            .min(u32::MAX as u64) as u32
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires
    }

    /// Whether less than half the original lifetime remains.
    fn past_half_life(&self, now: Instant) -> bool {
        let original = Duration::from_secs(self.original_ttl.into());
        self.expires.saturating_duration_since(now) * 2 < original
    }
}

/// Outcome of [`RecordCache::insert`], telling the engine whether anything
/// observable changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheChange {
    /// Record was not present before.
    Added,
    /// An identical key+data pair existed; only its TTL was reset.
    Refreshed,
    /// A goodbye (TTL=0) hit an existing record; it dies at the next sweep.
    Goodbye,
    /// A goodbye for a record that was never cached. Nothing to do.
    Ignored,
}

#[derive(Default)]
pub struct RecordCache {
    slots: BTreeMap<CacheKey, Vec<CachedRecord>>,
}

impl RecordCache {
    /// Grace period before a goodbye record is actually dropped; queries
    /// arriving in between still see it with TTL 0.
    const GOODBYE_LINGER: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests a received record.
    ///
    /// An identical key+data pair refreshes in place rather than
    /// duplicating. The mDNS cache-flush bit drops all other data under the
    /// key. A TTL of 0 is a goodbye: the record is scheduled for removal at
    /// the next sweep rather than surviving its nominal lifetime.
    pub fn insert(&mut self, record: &Record, now: Instant) -> CacheChange {
        let key = CacheKey {
            name: record.name.clone(),
            ty: record.rdata.record_type(),
            class: record.class,
        };

        if record.is_goodbye() {
            if let Some(slot) = self.slots.get_mut(&key) {
                if let Some(existing) = slot.iter_mut().find(|e| e.rdata == record.rdata) {
                    existing.expires = now + Self::GOODBYE_LINGER;
                    existing.original_ttl = 0;
                    return CacheChange::Goodbye;
                }
            }
            return CacheChange::Ignored;
        }

        let expires = now + Duration::from_secs(record.ttl.into());
        let slot = self.slots.entry(key.clone()).or_default();

        if record.cache_flush || key.ty == Type::TXT {
            // This record set supersedes whatever else we held under the key.
            // TXT gets the same treatment even without the flush bit: a
            // service has one property set, and a changed TXT must not
            // coexist with its predecessor (RFC 6763 §6.1).
            slot.retain(|e| e.rdata == record.rdata);
        }

        match slot.iter_mut().find(|e| e.rdata == record.rdata) {
            Some(existing) => {
                existing.expires = expires;
                existing.original_ttl = record.ttl;
                existing.refresh_sent = false;
                CacheChange::Refreshed
            }
            None => {
                slot.push(CachedRecord {
                    key,
                    rdata: record.rdata.clone(),
                    original_ttl: record.ttl,
                    expires,
                    refresh_sent: false,
                });
                CacheChange::Added
            }
        }
    }

    /// Returns the live records under `key`.
    pub fn get<'a>(
        &'a self,
        key: &CacheKey,
        now: Instant,
    ) -> impl Iterator<Item = &'a CachedRecord> {
        self.slots
            .get(key)
            .into_iter()
            .flatten()
            .filter(move |e| !e.is_expired(now))
    }

    /// Convenience lookup for the engine's hot path.
    pub fn lookup(&self, name: &DomainName, ty: Type, now: Instant) -> Vec<&CachedRecord> {
        self.get(&CacheKey::new(name.clone(), ty), now).collect()
    }

    /// Removes every expired record and returns them, so the resolver can
    /// emit removal events for entities they belonged to.
    pub fn sweep(&mut self, now: Instant) -> Vec<CachedRecord> {
        let mut removed = Vec::new();
        self.slots.retain(|_, slot| {
            slot.retain(|e| {
                if e.is_expired(now) {
                    removed.push(e.clone());
                    false
                } else {
                    true
                }
            });
            !slot.is_empty()
        });
        removed
    }

    /// Records suitable for the known-answer section of an outgoing query
    /// for `key`: live, and with more than half their lifetime left (a
    /// responder would refresh anything older anyway, RFC 6762 §7.1).
    pub fn known_answers<'a>(
        &'a self,
        key: &CacheKey,
        now: Instant,
    ) -> impl Iterator<Item = &'a CachedRecord> {
        self.get(key, now).filter(move |e| !e.past_half_life(now))
    }

    /// Returns the keys whose records crossed 50% of their lifetime since
    /// the last call, marking them so each record only reports once. The
    /// scheduler turns these into opportunistic re-queries.
    pub fn refresh_due(&mut self, now: Instant) -> Vec<CacheKey> {
        let mut due = Vec::new();
        for (key, slot) in &mut self.slots {
            for e in slot.iter_mut() {
                if !e.refresh_sent && !e.is_expired(now) && e.past_half_life(now) {
                    e.refresh_sent = true;
                    if due.last() != Some(key) {
                        due.push(key.clone());
                    }
                }
            }
        }
        due
    }

    /// The earliest instant at which [`RecordCache::sweep`] will have work.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.slots
            .values()
            .flatten()
            .map(|e| e.expires)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn a_record(name: &str, ttl: u32, addr: [u8; 4]) -> Record {
        Record {
            name: name.parse().unwrap(),
            class: Class::IN,
            cache_flush: false,
            ttl,
            rdata: RData::A(Ipv4Addr::from(addr)),
        }
    }

    fn key(name: &str, ty: Type) -> CacheKey {
        CacheKey::new(name.parse().unwrap(), ty)
    }

    #[test]
    fn insert_then_sweep_after_ttl() {
        let t0 = Instant::now();
        let mut cache = RecordCache::new();

        assert_eq!(
            cache.insert(&a_record("host.local.", 10, [10, 0, 0, 1]), t0),
            CacheChange::Added
        );
        assert_eq!(cache.lookup(&"host.local.".parse().unwrap(), Type::A, t0).len(), 1);

        let removed = cache.sweep(t0 + Duration::from_secs(11));
        assert_eq!(removed.len(), 1);
        assert!(cache
            .lookup(
                &"host.local.".parse().unwrap(),
                Type::A,
                t0 + Duration::from_secs(11)
            )
            .is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn identical_data_refreshes_instead_of_duplicating() {
        let t0 = Instant::now();
        let mut cache = RecordCache::new();
        let rec = a_record("host.local.", 10, [10, 0, 0, 1]);

        cache.insert(&rec, t0);
        assert_eq!(cache.insert(&rec, t0 + Duration::from_secs(8)), CacheChange::Refreshed);

        let k = key("host.local.", Type::A);
        // Still one record, and the refresh pushed expiry past the original.
        let t = t0 + Duration::from_secs(12);
        let live: Vec<_> = cache.get(&k, t).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].remaining_ttl(t), 6);
    }

    #[test]
    fn multiple_values_share_a_slot() {
        let t0 = Instant::now();
        let mut cache = RecordCache::new();
        cache.insert(&a_record("host.local.", 10, [10, 0, 0, 1]), t0);
        cache.insert(&a_record("host.local.", 10, [10, 0, 0, 2]), t0);
        assert_eq!(cache.get(&key("host.local.", Type::A), t0).count(), 2);
    }

    #[test]
    fn cache_flush_drops_other_values() {
        let t0 = Instant::now();
        let mut cache = RecordCache::new();
        cache.insert(&a_record("host.local.", 10, [10, 0, 0, 1]), t0);

        let mut flusher = a_record("host.local.", 10, [10, 0, 0, 2]);
        flusher.cache_flush = true;
        cache.insert(&flusher, t0);

        let live: Vec<_> = cache.get(&key("host.local.", Type::A), t0).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].rdata, RData::A(Ipv4Addr::new(10, 0, 0, 2)));
    }

    fn txt_record(name: &str, entry: &[u8]) -> Record {
        Record {
            name: name.parse().unwrap(),
            class: Class::IN,
            cache_flush: false,
            ttl: 4500,
            rdata: RData::TXT(vec![entry.to_vec().into()]),
        }
    }

    /// A changed TXT replaces the previous one even without the cache-flush
    /// bit; the stale property set must not linger alongside the new one.
    #[test]
    fn changed_txt_supersedes_previous() {
        let t0 = Instant::now();
        let mut cache = RecordCache::new();
        cache.insert(&txt_record("web._http._tcp.local.", b"v=1"), t0);
        assert_eq!(
            cache.insert(&txt_record("web._http._tcp.local.", b"v=2"), t0),
            CacheChange::Added
        );

        let live: Vec<_> = cache
            .get(&key("web._http._tcp.local.", Type::TXT), t0)
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].rdata, RData::TXT(vec![b"v=2".to_vec().into()]));
    }

    #[test]
    fn goodbye_forces_expiry() {
        let t0 = Instant::now();
        let mut cache = RecordCache::new();
        cache.insert(&a_record("host.local.", 3600, [10, 0, 0, 1]), t0);

        let goodbye = a_record("host.local.", 0, [10, 0, 0, 1]);
        assert_eq!(cache.insert(&goodbye, t0), CacheChange::Goodbye);

        let removed = cache.sweep(t0 + Duration::from_secs(2));
        assert_eq!(removed.len(), 1);
        assert!(cache.is_empty());

        // A goodbye for something we never held is a no-op.
        assert_eq!(cache.insert(&goodbye, t0), CacheChange::Ignored);
        assert!(cache.is_empty());
    }

    #[test]
    fn known_answers_require_half_life() {
        let t0 = Instant::now();
        let mut cache = RecordCache::new();
        cache.insert(&a_record("host.local.", 100, [10, 0, 0, 1]), t0);

        let k = key("host.local.", Type::A);
        assert_eq!(cache.known_answers(&k, t0).count(), 1);
        // Past 50% of the lifetime the record no longer suppresses answers.
        assert_eq!(cache.known_answers(&k, t0 + Duration::from_secs(60)).count(), 0);
        // But it is still live for lookups.
        assert_eq!(cache.get(&k, t0 + Duration::from_secs(60)).count(), 1);
    }

    #[test]
    fn refresh_due_reports_once() {
        let t0 = Instant::now();
        let mut cache = RecordCache::new();
        cache.insert(&a_record("host.local.", 100, [10, 0, 0, 1]), t0);

        assert!(cache.refresh_due(t0 + Duration::from_secs(10)).is_empty());
        let due = cache.refresh_due(t0 + Duration::from_secs(60));
        assert_eq!(due, vec![key("host.local.", Type::A)]);
        // Reported once per record lifetime.
        assert!(cache.refresh_due(t0 + Duration::from_secs(70)).is_empty());

        // A refresh resets the marker.
        cache.insert(&a_record("host.local.", 100, [10, 0, 0, 1]), t0 + Duration::from_secs(80));
        assert!(!cache.refresh_due(t0 + Duration::from_secs(140)).is_empty());
    }
}

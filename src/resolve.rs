//! Assembles cache contents into resolved service instances.
//!
//! The resolver is a pure function of the cache plus a small amount of
//! reporting state: which instances have been announced to subscribers, and
//! since when an incomplete instance has been waiting for its remaining
//! records.

use std::{
    collections::BTreeMap,
    net::IpAddr,
    time::{Duration, Instant},
};

use crate::{
    cache::RecordCache,
    name::{DomainName, Label},
    packet::{records::RData, Type},
    service::{ServiceDetails, ServiceEvent, ServiceType, TxtProperties},
};

/// How long an incomplete instance may stay pending before it is reported
/// with whatever subset of records exists.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct TrackedInstance {
    /// When the instance first appeared (via its PTR record).
    pending_since: Instant,
    /// The last details delivered to subscribers; `None` while withheld.
    reported: Option<ServiceDetails>,
}

/// Tracks instances of one or more service types across cache updates and
/// turns state transitions into [`ServiceEvent`]s.
pub struct InstanceResolver {
    resolve_timeout: Duration,
    tracked: BTreeMap<(DomainName, Label), TrackedInstance>,
}

impl InstanceResolver {
    pub fn new(resolve_timeout: Duration) -> Self {
        Self {
            resolve_timeout,
            tracked: BTreeMap::new(),
        }
    }

    /// Reconciles the tracked instances of `service_type` against the cache,
    /// returning the events this update produces.
    ///
    /// Guarantees per instance name: `Added` precedes everything else,
    /// `Removed` is final, and neither `Updated` nor `Removed` is produced
    /// for an instance that was never added.
    pub fn sync(
        &mut self,
        cache: &RecordCache,
        service_type: &ServiceType,
        now: Instant,
    ) -> Vec<ServiceEvent> {
        let type_name = service_type.name().clone();
        let mut events = Vec::new();

        // Live instances per the PTR records under the type name.
        let mut live = Vec::new();
        for rec in cache.lookup(&type_name, Type::PTR, now) {
            let RData::PTR(target) = &rec.rdata else {
                continue;
            };
            let Some((instance, parent)) = target.split_first() else {
                continue;
            };
            if parent != type_name {
                // A PTR pointing outside the browsed type; not ours.
                continue;
            }
            live.push((instance.clone(), target.clone()));
        }

        let mut dead = Vec::new();
        for (instance, full_name) in &live {
            let details = assemble(cache, service_type, instance, full_name, now);
            let state = self
                .tracked
                .entry((type_name.clone(), instance.clone()))
                .or_insert_with(|| TrackedInstance {
                    pending_since: now,
                    reported: None,
                });

            match &state.reported {
                None => {
                    let complete = details.host.is_some() && !details.addresses.is_empty();
                    let timed_out = now >= state.pending_since + self.resolve_timeout;
                    if complete || timed_out {
                        if timed_out && !complete {
                            log::debug!(
                                "reporting {} with partial data after resolution timeout",
                                details
                            );
                        }
                        events.push(ServiceEvent::Added(details.clone()));
                        state.reported = Some(details);
                    }
                }
                Some(prev) => {
                    if prev.host.is_some() && details.host.is_none() {
                        // SRV expired out from under a reported instance;
                        // the instance is gone even though its PTR lingers.
                        events.push(ServiceEvent::Removed {
                            service_type: service_type.clone(),
                            instance: instance.clone(),
                        });
                        dead.push(instance.clone());
                    } else if *prev != details {
                        events.push(ServiceEvent::Updated(details.clone()));
                        state.reported = Some(details);
                    }
                }
            }
        }
        for instance in dead {
            self.tracked.remove(&(type_name.clone(), instance));
        }

        // Instances whose PTR disappeared.
        let gone: Vec<_> = self
            .tracked
            .iter()
            .filter(|((ty, instance), _)| {
                *ty == type_name && !live.iter().any(|(l, _)| l == instance)
            })
            .map(|((_, instance), state)| (instance.clone(), state.reported.is_some()))
            .collect();
        for (instance, was_reported) in gone {
            self.tracked.remove(&(type_name.clone(), instance.clone()));
            if was_reported {
                events.push(ServiceEvent::Removed {
                    service_type: service_type.clone(),
                    instance,
                });
            }
        }

        events
    }

    /// The details last delivered for each reported instance of
    /// `service_type`; lets a subscription added mid-browse catch up.
    pub fn reported_details(&self, service_type: &ServiceType) -> Vec<ServiceDetails> {
        self.tracked
            .iter()
            .filter(|((ty, _), _)| ty == service_type.name())
            .filter_map(|(_, state)| state.reported.clone())
            .collect()
    }

    /// Drops all state for `service_type` without emitting events; used when
    /// the last subscription for the type goes away.
    pub fn forget_type(&mut self, service_type: &ServiceType) {
        let type_name = service_type.name();
        self.tracked.retain(|(ty, _), _| ty != type_name);
    }

    /// The earliest pending-instance deadline, for the engine's timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tracked
            .values()
            .filter(|s| s.reported.is_none())
            .map(|s| s.pending_since + self.resolve_timeout)
            .min()
    }
}

/// Builds the current description of one instance from the cache. Purely a
/// read; missing records simply leave their fields empty.
fn assemble(
    cache: &RecordCache,
    service_type: &ServiceType,
    instance: &Label,
    full_name: &DomainName,
    now: Instant,
) -> ServiceDetails {
    // Lowest priority wins when several SRV records exist (RFC 2782).
    let srv = cache
        .lookup(full_name, Type::SRV, now)
        .into_iter()
        .filter_map(|rec| match &rec.rdata {
            RData::SRV {
                priority,
                weight,
                port,
                target,
            } => Some((*priority, *weight, *port, target.clone())),
            _ => None,
        })
        .min_by_key(|(priority, weight, ..)| (*priority, *weight));

    let properties = cache
        .lookup(full_name, Type::TXT, now)
        .into_iter()
        .find_map(|rec| match &rec.rdata {
            RData::TXT(entries) => Some(TxtProperties::from_entries(
                entries.iter().map(|e| &**e),
            )),
            _ => None,
        })
        .unwrap_or_default();

    let mut addresses: Vec<IpAddr> = Vec::new();
    if let Some((_, _, _, target)) = &srv {
        for ty in [Type::A, Type::AAAA] {
            for rec in cache.lookup(target, ty, now) {
                if let Some(addr) = rec.rdata.ip_addr() {
                    addresses.push(addr);
                }
            }
        }
        addresses.sort();
        addresses.dedup();
    }

    let (priority, weight, port, host) = match srv {
        Some((priority, weight, port, target)) => (priority, weight, port, Some(target)),
        None => (0, 0, 0, None),
    };

    ServiceDetails {
        instance: instance.clone(),
        service_type: service_type.clone(),
        host,
        port,
        priority,
        weight,
        addresses,
        properties,
    }
}

//! The browsing engine and its public handle.
//!
//! All protocol state (cache, query timers, instance resolution,
//! subscriptions) is owned by a single engine thread; reader threads and the
//! caller's thread only communicate with it through a channel. That keeps
//! every mutation on one thread and makes event ordering trivial to reason
//! about.

use std::{
    collections::BTreeSet,
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    cache::{CacheKey, RecordCache},
    name::DomainName,
    packet::{
        decoder::Message,
        encoder::QueryBuilder,
        records::{Question, RData},
        Class, Opcode, Type, MAX_PACKET_SIZE,
    },
    resolve::{InstanceResolver, DEFAULT_RESOLVE_TIMEOUT},
    scheduler::QuerySchedule,
    service::{ServiceEvent, ServiceType, SubscribeError, META_QUERY},
    transport::{IpVersion, MulticastTransport},
};

/// Engine configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    pub ip_version: IpVersion,
    /// How long an instance may stay incomplete before it is reported with
    /// partial data.
    pub resolve_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip_version: IpVersion::default(),
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }
}

/// Handle for one active subscription; pass it back to
/// [`Browser::unsubscribe`] to stop it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
}

type EventSink = Box<dyn FnMut(ServiceEvent) + Send>;
type TypeSink = Box<dyn FnMut(ServiceType) + Send>;

enum EngineMsg {
    Packet(Message),
    Subscribe {
        id: u64,
        service_type: ServiceType,
        sink: EventSink,
    },
    BrowseTypes {
        id: u64,
        sink: TypeSink,
    },
    Unsubscribe {
        id: u64,
        ack: mpsc::Sender<()>,
    },
    Close,
}

/// A running mDNS/DNS-SD browser.
///
/// Cheap operations (subscribing, unsubscribing) go through the engine
/// channel; [`Browser::close`] shuts the engine and its reader threads down
/// and only returns once no further callbacks will run.
pub struct Browser {
    tx: mpsc::Sender<EngineMsg>,
    engine: Option<thread::JoinHandle<()>>,
    next_id: AtomicU64,
}

impl Browser {
    /// Binds the multicast sockets and starts the engine.
    pub fn new(config: Config) -> io::Result<Self> {
        let mut transport = MulticastTransport::open(config.ip_version)?;

        let (tx, rx) = mpsc::channel();
        let packet_tx = tx.clone();
        transport.start(move |msg| {
            // Failure means the engine is gone and we are shutting down.
            let _ = packet_tx.send(EngineMsg::Packet(msg));
        })?;

        let engine = thread::Builder::new()
            .name("mdns-engine".into())
            .spawn(move || engine_loop(rx, transport, config))?;

        Ok(Self {
            tx,
            engine: Some(engine),
            next_id: AtomicU64::new(0),
        })
    }

    /// Starts browsing for instances of `service_type` (e.g.
    /// `"_http._tcp.local."`), delivering [`ServiceEvent`]s to `sink` on the
    /// engine thread.
    ///
    /// Instances that are already known are replayed as `Added` events, so a
    /// late subscriber sees the same picture as an early one.
    pub fn subscribe<F>(&self, service_type: &str, sink: F) -> Result<Subscription, SubscribeError>
    where
        F: FnMut(ServiceEvent) + Send + 'static,
    {
        let service_type = ServiceType::new(service_type)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(EngineMsg::Subscribe {
                id,
                service_type,
                sink: Box::new(sink),
            })
            .map_err(|_| SubscribeError::Closed)?;
        Ok(Subscription { id })
    }

    /// Enumerates the service types present on the network via the
    /// `_services._dns-sd._udp.local.` meta-query. Each distinct type is
    /// reported to `sink` exactly once.
    pub fn discover_all_types<F>(&self, sink: F) -> Result<Subscription, SubscribeError>
    where
        F: FnMut(ServiceType) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(EngineMsg::BrowseTypes {
                id,
                sink: Box::new(sink),
            })
            .map_err(|_| SubscribeError::Closed)?;
        Ok(Subscription { id })
    }

    /// Cancels a subscription. When this returns, its sink will not be
    /// called again.
    pub fn unsubscribe(&self, sub: Subscription) -> Result<(), SubscribeError> {
        let (ack, ack_rx) = mpsc::channel();
        self.tx
            .send(EngineMsg::Unsubscribe { id: sub.id, ack })
            .map_err(|_| SubscribeError::Closed)?;
        ack_rx.recv().map_err(|_| SubscribeError::Closed)
    }

    /// Shuts down the engine and all reader threads and waits for them.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.engine.take() {
            let _ = self.tx.send(EngineMsg::Close);
            if handle.join().is_err() {
                log::warn!("engine thread panicked");
            }
        }
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn engine_loop(rx: mpsc::Receiver<EngineMsg>, mut transport: MulticastTransport, config: Config) {
    let mut core = EngineCore::new(config.resolve_timeout);
    log::debug!("engine running");

    loop {
        let now = Instant::now();
        for packet in core.tick(now) {
            transport.send(&packet);
        }

        let msg = match core.next_deadline() {
            Some(deadline) => {
                match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(msg) => msg,
                    // Timer fired; the tick at the loop top handles it.
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(msg) => msg,
                Err(_) => break,
            },
        };

        match msg {
            EngineMsg::Packet(packet) => core.handle_message(&packet, Instant::now()),
            EngineMsg::Subscribe {
                id,
                service_type,
                sink,
            } => core.subscribe(id, service_type, sink, Instant::now()),
            EngineMsg::BrowseTypes { id, sink } => core.browse_types(id, sink, Instant::now()),
            EngineMsg::Unsubscribe { id, ack } => {
                core.unsubscribe(id);
                let _ = ack.send(());
            }
            EngineMsg::Close => break,
        }
    }

    log::debug!("engine shutting down");
    transport.shutdown();
}

struct SubscriptionState {
    id: u64,
    service_type: ServiceType,
    sink: EventSink,
}

struct TypeBrowser {
    id: u64,
    sink: TypeSink,
    /// Types already delivered to this sink.
    seen: BTreeSet<ServiceType>,
}

/// The engine proper, separated from socket and channel plumbing so its
/// behavior is testable by feeding it messages and instants directly.
struct EngineCore {
    cache: RecordCache,
    scheduler: QuerySchedule,
    resolver: InstanceResolver,
    subscriptions: Vec<SubscriptionState>,
    type_browsers: Vec<TypeBrowser>,
    /// Names that have not been queried yet; their first question carries
    /// the unicast-response bit.
    fresh: BTreeSet<DomainName>,
    meta_name: DomainName,
}

impl EngineCore {
    fn new(resolve_timeout: Duration) -> Self {
        Self {
            cache: RecordCache::new(),
            scheduler: QuerySchedule::new(),
            resolver: InstanceResolver::new(resolve_timeout),
            subscriptions: Vec::new(),
            type_browsers: Vec::new(),
            fresh: BTreeSet::new(),
            meta_name: META_QUERY.parse().unwrap(),
        }
    }

    fn subscribe(&mut self, id: u64, service_type: ServiceType, mut sink: EventSink, now: Instant) {
        log::info!("subscribing to {}", service_type);
        for details in self.resolver.reported_details(&service_type) {
            sink(ServiceEvent::Added(details));
        }
        if !self.scheduler.contains(service_type.name()) {
            self.fresh.insert(service_type.name().clone());
            self.scheduler.add(service_type.name().clone(), now);
        }
        self.subscriptions.push(SubscriptionState {
            id,
            service_type,
            sink,
        });
    }

    fn browse_types(&mut self, id: u64, mut sink: TypeSink, now: Instant) {
        log::info!("browsing service types");
        let mut seen = BTreeSet::new();
        for rec in self.cache.lookup(&self.meta_name, Type::PTR, now) {
            if let RData::PTR(target) = &rec.rdata {
                if let Some(ty) = ServiceType::from_name(target) {
                    if seen.insert(ty.clone()) {
                        sink(ty);
                    }
                }
            }
        }
        if !self.scheduler.contains(&self.meta_name) {
            self.fresh.insert(self.meta_name.clone());
            self.scheduler.add(self.meta_name.clone(), now);
        }
        self.type_browsers.push(TypeBrowser { id, sink, seen });
    }

    fn unsubscribe(&mut self, id: u64) {
        let cancelled: Vec<ServiceType> = self
            .subscriptions
            .iter()
            .filter(|s| s.id == id)
            .map(|s| s.service_type.clone())
            .collect();
        self.subscriptions.retain(|s| s.id != id);
        self.type_browsers.retain(|b| b.id != id);

        // Stop querying for names nothing subscribes to anymore.
        for ty in cancelled {
            if !self.subscriptions.iter().any(|s| s.service_type == ty) {
                self.scheduler.remove(ty.name());
                self.fresh.remove(ty.name());
                self.resolver.forget_type(&ty);
            }
        }
        if self.type_browsers.is_empty() {
            self.scheduler.remove(&self.meta_name);
            self.fresh.remove(&self.meta_name);
        }
    }

    /// Ingests a received message and delivers any events it causes.
    fn handle_message(&mut self, msg: &Message, now: Instant) {
        if !msg.header.is_response() {
            // Queries from other hosts; a pure browser has nothing to answer.
            return;
        }
        if msg.header.opcode() != Opcode::QUERY || msg.header.rcode() != 0 {
            log::trace!("ignoring message with opcode/rcode {:?}", msg.header);
            return;
        }

        for rec in msg.records() {
            if rec.class != Class::IN {
                continue;
            }
            self.cache.insert(rec, now);

            if rec.name == self.meta_name && !rec.is_goodbye() {
                if let RData::PTR(target) = &rec.rdata {
                    match ServiceType::from_name(target) {
                        Some(ty) => self.notify_type(ty),
                        None => log::debug!("meta-query PTR to odd name {}", target),
                    }
                }
            }
        }

        self.emit_events(now);
    }

    fn notify_type(&mut self, ty: ServiceType) {
        for browser in &mut self.type_browsers {
            if browser.seen.insert(ty.clone()) {
                log::debug!("discovered service type {}", ty);
                (browser.sink)(ty.clone());
            }
        }
    }

    /// Runs expired-record cleanup and due queries. Returns the packets to
    /// multicast.
    fn tick(&mut self, now: Instant) -> Vec<Vec<u8>> {
        if self.cache.next_expiry().is_some_and(|e| now >= e) {
            let removed = self.cache.sweep(now);
            log::trace!("swept {} expired records", removed.len());
        }
        self.emit_events(now);

        let due = self.scheduler.due(now);
        let refresh = self.cache.refresh_due(now);
        if due.is_empty() && refresh.is_empty() {
            return Vec::new();
        }
        match self.build_query(&due, &refresh, now) {
            Some(packet) => vec![packet],
            None => Vec::new(),
        }
    }

    /// Reconciles the resolver against the cache for every subscribed type
    /// and fans the resulting events out to the matching sinks.
    fn emit_events(&mut self, now: Instant) {
        let types: BTreeSet<ServiceType> = self
            .subscriptions
            .iter()
            .map(|s| s.service_type.clone())
            .collect();
        for ty in types {
            let events = self.resolver.sync(&self.cache, &ty, now);
            for event in events {
                log::debug!("{:?}", event);
                for sub in &mut self.subscriptions {
                    if sub.service_type == ty {
                        (sub.sink)(event.clone());
                    }
                }
            }
        }
    }

    fn build_query(
        &mut self,
        due: &[DomainName],
        refresh: &[CacheKey],
        now: Instant,
    ) -> Option<Vec<u8>> {
        let mut buf = vec![0; MAX_PACKET_SIZE];
        let mut qb = QueryBuilder::new(&mut buf);

        for name in due {
            let mut question = Question::new(name.clone(), Type::PTR);
            // RFC 6762 §5.4: the first query for a name requests unicast
            // responses to limit multicast traffic.
            question.unicast_response = self.fresh.remove(name);
            qb.question(&question);
        }
        for key in refresh {
            if key.ty == Type::PTR && due.contains(&key.name) {
                continue;
            }
            qb.question(&Question::new(key.name.clone(), key.ty));
        }

        for name in due {
            let key = CacheKey::new(name.clone(), Type::PTR);
            for rec in self.cache.known_answers(&key, now) {
                qb.known_answer(&rec.key.name, rec.remaining_ttl(now), &rec.rdata);
            }
        }

        match qb.finish() {
            Ok(len) => {
                buf.truncate(len);
                Some(buf)
            }
            Err(_) => {
                // Send it anyway; the TC bit is set and responders cope.
                log::warn!("outgoing query truncated at {} bytes", buf.len());
                Some(buf)
            }
        }
    }

    /// The next instant at which [`EngineCore::tick`] has work to do.
    fn next_deadline(&self) -> Option<Instant> {
        [
            self.scheduler.next_deadline(),
            self.cache.next_expiry(),
            self.resolver.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

//! Continuous mDNS/DNS-SD service browsing.
//!
//! A [`Browser`] joins the mDNS multicast groups and keeps subscriptions to
//! DNS-SD service types alive: it sends the periodic queries, maintains the
//! record cache, resolves PTR/SRV/TXT/A/AAAA records into service instances,
//! and reports additions, updates, and removals as [`ServiceEvent`]s.
//!
//! ```no_run
//! use zeroscope::{Browser, Config, ServiceEvent};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let browser = Browser::new(Config::default())?;
//! let sub = browser.subscribe("_http._tcp.local.", |event| match event {
//!     ServiceEvent::Added(details) => println!("found {}", details),
//!     ServiceEvent::Updated(details) => println!("changed {}", details),
//!     ServiceEvent::Removed { instance, .. } => println!("lost {}", instance),
//! })?;
//! std::thread::sleep(std::time::Duration::from_secs(10));
//! let _ = browser.unsubscribe(sub);
//! browser.close();
//! # Ok(())
//! # }
//! ```

use std::net::{Ipv4Addr, Ipv6Addr};

mod browser;
mod cache;
pub mod name;
mod num;
pub mod packet;
mod resolve;
mod scheduler;
pub mod service;
mod transport;

pub use browser::{Browser, Config, Subscription};
pub use resolve::DEFAULT_RESOLVE_TIMEOUT;
pub use service::{
    ServiceDetails, ServiceEvent, ServiceType, SubscribeError, TxtProperties, META_QUERY,
};
pub use transport::IpVersion;

/// The port mDNS operates on.
pub const MDNS_PORT: u16 = 5353;

/// The IPv4 multicast group mDNS messages are exchanged on.
pub const MDNS_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// The link-local IPv6 multicast group mDNS messages are exchanged on.
pub const MDNS_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

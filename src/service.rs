//! DNS-SD service naming and resolved service descriptions.

use std::{collections::BTreeMap, fmt, net::IpAddr, str::FromStr};

use crate::name::{DomainName, Label};

/// The reserved meta-query name; PTR records under it enumerate the service
/// types advertised on the network.
pub const META_QUERY: &str = "_services._dns-sd._udp.local.";

/// A browsable DNS-SD service type such as `_http._tcp.local.`.
///
/// Construction validates the DNS-SD shape: a `_`-prefixed service label,
/// a `_tcp` or `_udp` protocol label, and the `local` domain. Invalid
/// strings are rejected synchronously at subscribe time.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceType {
    name: DomainName,
}

impl ServiceType {
    pub fn new(s: &str) -> Result<Self, SubscribeError> {
        s.parse()
    }

    /// The full query name, e.g. `_airplay._tcp.local.`.
    #[inline]
    pub fn name(&self) -> &DomainName {
        &self.name
    }

    /// Builds the type a PTR target under the meta-query points at, if it
    /// has the DNS-SD shape.
    pub(crate) fn from_name(name: &DomainName) -> Option<Self> {
        let labels = name.labels();
        let [service, proto, domain] = labels else {
            return None;
        };
        if !service.as_bytes().starts_with(b"_") {
            return None;
        }
        if proto.as_bytes() != b"_tcp" && proto.as_bytes() != b"_udp" {
            return None;
        }
        if domain.as_bytes().to_ascii_lowercase() != b"local" {
            return None;
        }
        Some(Self { name: name.clone() })
    }
}

impl FromStr for ServiceType {
    type Err = SubscribeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = DomainName::from_str(s)
            .map_err(|_| SubscribeError::InvalidServiceType(s.to_string()))?;
        ServiceType::from_name(&name).ok_or_else(|| SubscribeError::InvalidServiceType(s.to_string()))
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Errors surfaced to the caller of [`Browser::subscribe`].
///
/// [`Browser::subscribe`]: crate::browser::Browser::subscribe
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubscribeError {
    /// The service-type string does not have the `_name._proto.local.`
    /// shape.
    InvalidServiceType(String),
    /// The engine has been closed.
    Closed,
}

impl fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeError::InvalidServiceType(s) => {
                write!(f, "not a valid DNS-SD service type: {s:?}")
            }
            SubscribeError::Closed => f.write_str("browser is closed"),
        }
    }
}

impl std::error::Error for SubscribeError {}

/// `key=value` properties from a DNS-SD TXT record.
///
/// Keys compare ASCII-case-insensitively; per RFC 6763 §6.4 the first
/// occurrence of a key wins and later duplicates are dropped. A key without
/// `=` is a boolean flag and has no value.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct TxtProperties {
    map: BTreeMap<String, Option<Box<[u8]>>>,
}

impl TxtProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interprets raw TXT entries.
    pub fn from_entries<'a>(entries: impl Iterator<Item = &'a [u8]>) -> Self {
        let mut map = BTreeMap::new();
        for entry in entries {
            if entry.is_empty() {
                continue;
            }
            let mut split = entry.splitn(2, |&b| b == b'=');
            let key = split.next().unwrap();
            let Ok(key) = std::str::from_utf8(key) else {
                log::debug!("ignoring TXT entry with non-UTF-8 key");
                continue;
            };
            let value = split.next().map(|v| v.to_vec().into_boxed_slice());
            map.entry(key.to_ascii_lowercase()).or_insert(value);
        }
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.map
            .get(&key.to_ascii_lowercase())
            .and_then(|v| v.as_deref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(&key.to_ascii_lowercase())
    }

    /// Iterates over `(key, value)` pairs; `None` values are flags.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&[u8]>)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

impl fmt::Debug for TxtProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in self.iter() {
            match v {
                Some(v) => map.entry(&k, &format_args!("\"{}\"", v.escape_ascii())),
                None => map.entry(&k, &format_args!("-")),
            };
        }
        map.finish()
    }
}

impl fmt::Display for TxtProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.iter().enumerate() {
            if i != 0 {
                f.write_str(" ")?;
            }
            f.write_str(k)?;
            if let Some(v) = v {
                write!(f, "={}", v.escape_ascii())?;
            }
        }
        Ok(())
    }
}

/// A resolved service instance, assembled from PTR, SRV, TXT, and address
/// records.
///
/// `host`, `port`, and the SRV weights are absent when the instance was
/// reported after the resolution timeout without an SRV record; callers must
/// tolerate such partial descriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDetails {
    /// The instance's display name (the leading label of its full name).
    pub instance: Label,
    /// The type the instance was discovered under.
    pub service_type: ServiceType,
    /// Target host from the SRV record.
    pub host: Option<DomainName>,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    /// Addresses of the target host, deduplicated, in sorted order.
    pub addresses: Vec<IpAddr>,
    pub properties: TxtProperties,
}

impl ServiceDetails {
    /// The full instance name, e.g. `myserver._http._tcp.local.`.
    pub fn full_name(&self) -> DomainName {
        let mut name = DomainName::from_iter([&self.instance]);
        name.extend(self.service_type.name().labels());
        name
    }
}

impl fmt::Display for ServiceDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance, self.service_type)
    }
}

/// Change notifications delivered to a subscription's sink.
///
/// For any one instance name the order is always `Added`, any number of
/// `Updated`, then `Removed`; an instance that was never added produces no
/// events at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A new instance became resolvable (or its resolution timeout expired
    /// with partial data).
    Added(ServiceDetails),
    /// TXT properties or addresses of a previously added instance changed.
    Updated(ServiceDetails),
    /// The instance's PTR or SRV record expired or was withdrawn.
    Removed {
        service_type: ServiceType,
        instance: Label,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_type_validation() {
        assert!(ServiceType::new("_http._tcp.local.").is_ok());
        assert!(ServiceType::new("_hap._tcp.local").is_ok());
        assert!(ServiceType::new("_sleep-proxy._udp.local.").is_ok());

        for bad in [
            "http._tcp.local.",      // missing underscore
            "_http._sctp.local.",    // unknown protocol
            "_http._tcp.example.",   // not .local
            "_http._tcp.",           // missing domain
            "a._http._tcp.local.",   // instance name, not a type
            "",
        ] {
            assert!(
                matches!(ServiceType::new(bad), Err(SubscribeError::InvalidServiceType(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn txt_first_key_wins() {
        let entries: [&[u8]; 4] = [b"path=/", b"PATH=/other", b"flag", b""];
        let props = TxtProperties::from_entries(entries.into_iter());
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("path"), Some(&b"/"[..]));
        assert_eq!(props.get("Path"), Some(&b"/"[..]));
        assert!(props.contains("flag"));
        assert_eq!(props.get("flag"), None, "flags have no value");
    }

    #[test]
    fn full_name() {
        let details = ServiceDetails {
            instance: Label::new("myserver"),
            service_type: ServiceType::new("_http._tcp.local.").unwrap(),
            host: None,
            port: 0,
            priority: 0,
            weight: 0,
            addresses: Vec::new(),
            properties: TxtProperties::new(),
        };
        assert_eq!(details.full_name().to_string(), "myserver._http._tcp.local.");
    }
}

//! Resource records and their data payloads.

use std::{
    fmt::{self, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use crate::name::DomainName;

use super::{decoder::Reader, encoder::Writer, Class, DecodeError, Type};

/// Decoded record data for the record types the engine consumes.
///
/// Data is held by value so records can outlive the receive buffer they were
/// decoded from; the cache stores these directly.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    /// Points at a service instance (under a service-type name) or a
    /// service-type name (under the meta-query name).
    PTR(DomainName),
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },
    /// Raw `<character-string>` entries; DNS-SD `key=value` interpretation
    /// happens in the service layer.
    TXT(Vec<Box<[u8]>>),
}

impl RData {
    /// The wire type tag corresponding to this payload.
    pub fn record_type(&self) -> Type {
        match self {
            RData::A(_) => Type::A,
            RData::AAAA(_) => Type::AAAA,
            RData::PTR(_) => Type::PTR,
            RData::SRV { .. } => Type::SRV,
            RData::TXT(_) => Type::TXT,
        }
    }

    /// The IP address carried by an `A` or `AAAA` payload.
    pub fn ip_addr(&self) -> Option<IpAddr> {
        match self {
            RData::A(addr) => Some(IpAddr::V4(*addr)),
            RData::AAAA(addr) => Some(IpAddr::V6(*addr)),
            _ => None,
        }
    }

    /// Decodes the RDATA of a record of type `ty`, or returns `None` for
    /// types this crate does not interpret.
    pub(crate) fn decode(ty: Type, r: &mut Reader<'_>) -> Option<Result<Self, DecodeError>> {
        let res = match ty {
            Type::A => r.read_array().map(|octets| RData::A(Ipv4Addr::from(*octets))),
            Type::AAAA => r
                .read_array()
                .map(|octets| RData::AAAA(Ipv6Addr::from(*octets))),
            Type::PTR => r.read_domain_name().map(RData::PTR),
            Type::SRV => (|| {
                Ok(RData::SRV {
                    priority: r.read_u16()?,
                    weight: r.read_u16()?,
                    port: r.read_u16()?,
                    target: r.read_domain_name()?,
                })
            })(),
            Type::TXT => {
                let mut entries = Vec::new();
                // One entry is technically mandatory, but empty TXT records
                // exist in the wild.
                while !r.is_empty() {
                    match r.read_character_string() {
                        Ok(entry) => entries.push(entry.into()),
                        Err(e) => return Some(Err(e)),
                    }
                }
                Ok(RData::TXT(entries))
            }
            _ => return None,
        };
        Some(res)
    }

    /// Writes the RDATA payload (without the length prefix).
    pub(crate) fn encode(&self, w: &mut Writer<'_>) {
        match self {
            RData::A(addr) => w.write_slice(&addr.octets()),
            RData::AAAA(addr) => w.write_slice(&addr.octets()),
            RData::PTR(name) => w.write_domain_name(name),
            RData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                w.write_u16(*priority);
                w.write_u16(*weight);
                w.write_u16(*port);
                w.write_domain_name(target);
            }
            RData::TXT(entries) => {
                for entry in entries {
                    w.write_character_string(entry);
                }
            }
        }
    }
}

impl fmt::Debug for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RData::A(addr) => write!(f, "A {addr}"),
            RData::AAAA(addr) => write!(f, "AAAA {addr}"),
            RData::PTR(name) => write!(f, "PTR {name}"),
            RData::SRV {
                priority,
                weight,
                port,
                target,
            } => write!(f, "SRV {priority} {weight} {port} {target}"),
            RData::TXT(entries) => {
                f.write_str("TXT")?;
                for entry in entries {
                    f.write_char(' ')?;
                    write!(f, "\"{}\"", entry.escape_ascii())?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A fully decoded resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: DomainName,
    pub class: Class,
    /// mDNS cache-flush bit: this record set supersedes any cached records
    /// under the same (name, type, class).
    pub cache_flush: bool,
    /// Remaining lifetime in seconds. 0 is a goodbye: the responder is
    /// withdrawing the record.
    pub ttl: u32,
    pub rdata: RData,
}

impl Record {
    /// Whether this record is a goodbye announcement (RFC 6762 §10.1).
    #[inline]
    pub fn is_goodbye(&self) -> bool {
        self.ttl == 0
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}{}\t{}",
            self.name,
            self.ttl,
            self.class,
            if self.cache_flush { " flush" } else { "" },
            self.rdata,
        )
    }
}

/// A question from the *Question* section of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: DomainName,
    pub qtype: Type,
    pub qclass: Class,
    /// mDNS unicast-response bit: the querier asks for a unicast reply.
    pub unicast_response: bool,
}

impl Question {
    /// A multicast `IN`-class question for `name`.
    pub fn new(name: DomainName, qtype: Type) -> Self {
        Self {
            name,
            qtype,
            qclass: Class::IN,
            unicast_response: false,
        }
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.name, self.qclass, self.qtype)
    }
}

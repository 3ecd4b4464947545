//! mDNS message encoding and decoding.

#[macro_use]
mod macros;
pub mod decoder;
pub mod encoder;
mod error;
pub mod records;

use core::fmt;

use bitflags::bitflags;

use crate::num::U16;

pub use error::DecodeError;

/// Upper bound on mDNS message size this crate will process.
///
/// RFC 6762 allows multicast DNS messages up to 9000 bytes (the largest
/// payload that fits an Ethernet jumbo frame); anything larger is dropped
/// before decoding starts.
pub const MAX_PACKET_SIZE: usize = 9000;

/// Top bit of the class field: cache-flush in resource records, unicast-
/// response in questions (RFC 6762 §10.2 / §5.4).
pub(crate) const CLASS_TOP_BIT: u16 = 0x8000;

wire_enum! {
    /// Resource record types understood by the browsing engine.
    ///
    /// This is deliberately only the DNS-SD subset plus a few types that show
    /// up in mDNS traffic on real networks; records of other types are
    /// carried through undecoded.
    pub enum Type: u16 {
        A = 1,
        NS = 2,
        CNAME = 5,
        PTR = 12,
        HINFO = 13,
        TXT = 16,
        AAAA = 28,
        SRV = 33,
        NSEC = 47,
        ANY = 255,
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

wire_enum! {
    /// Resource record classes. mDNS uses `IN` exclusively.
    pub enum Class: u16 {
        /// The Internet.
        IN = 1,
        /// Query-only wildcard class.
        ANY = 255,
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

wire_enum! {
    /// DNS message operation codes. Anything but `QUERY` is ignored by the
    /// browser.
    pub enum Opcode: u8 {
        QUERY = 0,
        IQUERY = 1,
        STATUS = 2,
        NOTIFY = 4,
        UPDATE = 5,
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// RFC 1035 numbers header flag bits from the MSb down.
const fn be_pos(pos: u16) -> u16 {
    15 - pos
}

bitflags! {
    #[derive(Debug)]
    #[repr(transparent)]
    struct HeaderFlags: u16 {
        /// Response (set) or query (unset).
        const QR = 1 << be_pos(0);
        const OPCODE = Self::OPCODE_MASK;
        /// Authoritative answer. mDNS responders always set this.
        const AA = 1 << be_pos(5);
        /// Message was truncated to fit the transport.
        const TC = 1 << be_pos(6);
        const RD = 1 << be_pos(7);
        const RA = 1 << be_pos(8);
        const Z = 0b111 << be_pos(9);
        const RCODE = 0b1111;
    }
}

impl HeaderFlags {
    const OPCODE_POS: u16 = 11;
    const OPCODE_MASK: u16 = 0b1111 << Self::OPCODE_POS;
}

/// The fixed 12-byte DNS message header.
#[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C, packed)]
pub struct Header {
    id: U16,
    flags: U16,
    qdcount: U16,
    ancount: U16,
    nscount: U16,
    arcount: U16,
}

impl Header {
    fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_retain(self.flags.get())
    }

    fn modify_flags(&mut self, with: impl FnOnce(&mut HeaderFlags)) {
        let mut flags = self.flags();
        with(&mut flags);
        self.flags = flags.bits().into();
    }

    /// Returns the 16-bit message ID.
    ///
    /// Multicast queries use ID 0 and responders are not required to echo it,
    /// so the browser never matches on this field.
    #[inline]
    pub fn id(&self) -> u16 {
        self.id.get()
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.flags().contains(HeaderFlags::QR)
    }

    pub fn set_response(&mut self, response: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::QR, response));
    }

    /// Returns whether the truncation bit is set.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.flags().contains(HeaderFlags::TC)
    }

    pub fn set_truncated(&mut self, trunc: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::TC, trunc));
    }

    pub fn opcode(&self) -> Opcode {
        Opcode(((self.flags.get() & HeaderFlags::OPCODE_MASK) >> HeaderFlags::OPCODE_POS) as u8)
    }

    /// The response code; non-zero codes are meaningless in mDNS and cause
    /// the message to be ignored.
    pub fn rcode(&self) -> u8 {
        (self.flags.get() & HeaderFlags::RCODE.bits()) as u8
    }

    pub fn question_count(&self) -> u16 {
        self.qdcount.get()
    }

    pub fn answer_count(&self) -> u16 {
        self.ancount.get()
    }

    pub fn authority_count(&self) -> u16 {
        self.nscount.get()
    }

    pub fn additional_count(&self) -> u16 {
        self.arcount.get()
    }

    pub(crate) fn set_qdcount(&mut self, qdcount: u16) {
        self.qdcount = qdcount.into();
    }

    pub(crate) fn set_ancount(&mut self, ancount: u16) {
        self.ancount = ancount.into();
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("id", &self.id())
            .field("flags", &self.flags())
            .field("qdcount", &self.qdcount.get())
            .field("ancount", &self.ancount.get())
            .field("nscount", &self.nscount.get())
            .field("arcount", &self.arcount.get())
            .finish()
    }
}

//! mDNS message decoder.
//!
//! Decoding is tolerant by design: mDNS messages regularly bundle many
//! records, and one malformed or unsupported record must not discard the
//! rest. Record payloads are length-framed on the wire, so a bad payload is
//! skipped while decoding continues at the next record. Corruption that
//! destroys the framing itself (header, names, truncated length fields)
//! fails the whole message.

use core::mem;
use std::{cmp, mem::size_of};

use bytemuck::AnyBitPattern;

use crate::{
    name::{DomainName, Label},
    num::{U16, U32},
};

use super::{
    records::{Question, RData, Record},
    Class, DecodeError, Header, Type, CLASS_TOP_BIT, MAX_PACKET_SIZE,
};

/// Cursor over a message buffer.
///
/// Keeps the full buffer around so compression pointers can refer back to
/// earlier data.
#[derive(Debug, Clone)]
pub(crate) struct Reader<'a> {
    full_buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { full_buf: buf, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.full_buf.len()
    }

    fn remaining(&self) -> &'a [u8] {
        &self.full_buf[self.pos..]
    }

    fn read_obj<T: AnyBitPattern>(&mut self) -> Result<T, DecodeError> {
        let bytes = self
            .remaining()
            .get(..size_of::<T>())
            .ok_or(DecodeError::Eof)?;
        self.pos += mem::size_of::<T>();
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn peek_u8(&self) -> Result<u8, DecodeError> {
        self.full_buf.get(self.pos).copied().ok_or(DecodeError::Eof)
    }

    pub(crate) fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        match self.full_buf.get(self.pos..self.pos + len) {
            Some(slice) => {
                self.pos += len;
                Ok(slice)
            }
            None => Err(DecodeError::Eof),
        }
    }

    pub(crate) fn read_array<const LEN: usize>(&mut self) -> Result<&'a [u8; LEN], DecodeError> {
        let slice = self.read_slice(LEN)?;
        Ok(slice.try_into().unwrap())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.read_obj::<u8>()
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(self.read_obj::<U16>()?.get())
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(self.read_obj::<U32>()?.get())
    }

    /// Splits off a sub-reader covering the next `len` bytes.
    ///
    /// The sub-reader keeps access to the preceding message data, which
    /// compressed names inside RDATA refer back to.
    fn split_off(&mut self, len: usize) -> Result<Reader<'a>, DecodeError> {
        if self.remaining().len() < len {
            return Err(DecodeError::Eof);
        }
        let mut sub = self.clone();
        sub.full_buf = &sub.full_buf[..self.pos + len];
        self.pos += len;
        Ok(sub)
    }

    /// Reads a `<character-string>`: a length octet followed by that many
    /// bytes.
    pub(crate) fn read_character_string(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u8()?;
        self.read_slice(len.into())
    }

    /// Reads a possibly-compressed `<domain-name>`.
    ///
    /// Compression pointers must refer strictly backwards; anything else is
    /// rejected as a [`DecodeError::PointerLoop`] to bound the walk.
    pub(crate) fn read_domain_name(&mut self) -> Result<DomainName, DecodeError> {
        let mut name = DomainName::ROOT;
        let mut min_pos = self.pos;
        let mut walk = self.clone();
        loop {
            let len = walk.peek_u8()?;
            match len & 0b1100_0000 {
                0b1100_0000 => {
                    let target = usize::from(walk.read_u16()? & 0b0011_1111_1111_1111);
                    if target >= min_pos {
                        return Err(DecodeError::PointerLoop);
                    }
                    self.pos = cmp::max(self.pos, walk.pos);
                    min_pos = target;
                    walk.pos = target;
                }
                0b0000_0000 => {
                    walk.pos += 1;
                    if len == 0 {
                        break;
                    }
                    let label = walk.read_slice(usize::from(len))?;
                    name.push_label(Label::try_new(label)?);
                }
                // 01 and 10 prefixes are reserved.
                _ => return Err(DecodeError::InvalidValue),
            }
        }

        self.pos = cmp::max(self.pos, walk.pos);
        Ok(name)
    }

    fn read_question(&mut self) -> Result<Question, DecodeError> {
        let name = self.read_domain_name()?;
        let qtype = Type(self.read_u16()?);
        let raw_class = self.read_u16()?;
        Ok(Question {
            name,
            qtype,
            qclass: Class(raw_class & !CLASS_TOP_BIT),
            unicast_response: raw_class & CLASS_TOP_BIT != 0,
        })
    }

    /// Reads one resource record, returning `None` if its payload is
    /// malformed or of an uninterpreted type. Framing is consumed either way.
    fn read_record(&mut self) -> Result<Option<Record>, DecodeError> {
        let name = self.read_domain_name()?;
        let ty = Type(self.read_u16()?);
        let raw_class = self.read_u16()?;
        let ttl = self.read_u32()?;
        let rdlength = self.read_u16()?;
        let mut rdata_reader = self.split_off(usize::from(rdlength))?;

        let rdata = match RData::decode(ty, &mut rdata_reader) {
            Some(Ok(rdata)) => rdata,
            Some(Err(e)) => {
                log::debug!("skipping malformed {:?} record for {}: {}", ty, name, e);
                return Ok(None);
            }
            None => {
                log::trace!("skipping uninterpreted record type {:?} for {}", ty, name);
                return Ok(None);
            }
        };

        Ok(Some(Record {
            name,
            class: Class(raw_class & !CLASS_TOP_BIT),
            cache_flush: raw_class & CLASS_TOP_BIT != 0,
            // TTLs with the high bit set are out of range; clamp to zero.
            ttl: if ttl > i32::MAX as u32 { 0 } else { ttl },
            rdata,
        }))
    }
}

/// A decoded mDNS message.
#[derive(Debug)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    /// Records from the *Answer* section.
    pub answers: Vec<Record>,
    /// Records from the *Additional* section. Responders put A/AAAA records
    /// for SRV targets here, so the cache ingests both sections alike.
    pub additionals: Vec<Record>,
}

impl Message {
    /// Decodes a whole message from `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() > MAX_PACKET_SIZE {
            return Err(DecodeError::Oversized);
        }

        let mut r = Reader::new(buf);
        let header = r.read_obj::<Header>()?;

        let mut questions = Vec::new();
        for _ in 0..header.question_count() {
            questions.push(r.read_question()?);
        }

        let mut answers = Vec::new();
        for _ in 0..header.answer_count() {
            if let Some(rec) = r.read_record()? {
                answers.push(rec);
            }
        }

        // The authority section never carries DNS-SD data; consume it for
        // framing only.
        for _ in 0..header.authority_count() {
            r.read_record()?;
        }

        let mut additionals = Vec::new();
        for _ in 0..header.additional_count() {
            if let Some(rec) = r.read_record()? {
                additionals.push(rec);
            }
        }

        Ok(Self {
            header,
            questions,
            answers,
            additionals,
        })
    }

    /// All ingestible records: answers followed by additionals.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.answers.iter().chain(self.additionals.iter())
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;

    #[test]
    fn decode_domain_name() {
        let mut r = Reader::new(&[
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 5, b'l', b'o', b'c', b'a', b'l', 0,
        ]);
        assert_eq!(r.read_domain_name().unwrap().to_string(), "example.local.");

        let mut r = Reader::new(&[0]);
        assert_eq!(r.read_domain_name().unwrap().to_string(), ".");
    }

    #[test]
    fn decode_compressed_name() {
        let mut r = Reader::new(&[
            b'_', // padding, never read
            5, b'l', b'o', b'c', b'a', b'l', 0, // "local."
            6, b'm', b'y', b'h', b'o', b's', b't',
            0b1100_0000, 1, // pointer back to "local."
        ]);
        r.pos = 1;
        assert_eq!(r.read_domain_name().unwrap().to_string(), "local.");
        assert_eq!(r.read_domain_name().unwrap().to_string(), "myhost.local.");
        assert!(r.is_empty(), "cursor must land after the pointer");
    }

    #[test]
    fn reject_pointer_loops() {
        // Self-referencing pointer.
        let mut r = Reader::new(&[0b1100_0000, 0]);
        assert_eq!(r.read_domain_name(), Err(DecodeError::PointerLoop));

        // Two pointers that chase each other via a label.
        let mut r = Reader::new(&[1, b'a', 0b1100_0000, 0]);
        r.pos = 2;
        assert_eq!(r.read_domain_name(), Err(DecodeError::PointerLoop));

        // Forward/out-of-bounds pointer.
        let mut r = Reader::new(&[0xff, 0xff]);
        assert_eq!(r.read_domain_name(), Err(DecodeError::PointerLoop));
    }

    /// A pointer whose second byte is cut off by the end of the buffer must
    /// decode to an error, not panic.
    #[test]
    fn truncated_pointer_is_an_error() {
        let mut r = Reader::new(&[0b1100_0000]);
        assert_eq!(r.read_domain_name(), Err(DecodeError::Eof));

        // The same, as a full message: header announcing one question, then
        // a lone pointer byte as the question name.
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
        buf.push(0b1100_0000);
        assert_eq!(Message::decode(&buf).unwrap_err(), DecodeError::Eof);
    }

    #[test]
    fn oversized_input_rejected() {
        let buf = vec![0; MAX_PACKET_SIZE + 1];
        assert_eq!(Message::decode(&buf).unwrap_err(), DecodeError::Oversized);
    }

    /// One corrupt RDATA must not discard the rest of the message.
    #[test]
    fn bad_record_is_skipped() {
        let mut buf = Vec::new();
        // Header: response with 2 answers.
        buf.extend_from_slice(&[0, 0, 0x84, 0, 0, 0, 0, 2, 0, 0, 0, 0]);
        // Answer 1: A record for "x." with a short (3-byte) payload.
        buf.extend_from_slice(&[1, b'x', 0]);
        buf.extend_from_slice(&[0, 1, 0, 1]); // TYPE A, CLASS IN
        buf.extend_from_slice(&[0, 0, 0, 120]); // TTL
        buf.extend_from_slice(&[0, 3, 9, 9, 9]); // RDLENGTH 3, bogus RDATA
        // Answer 2: valid A record for "y.".
        buf.extend_from_slice(&[1, b'y', 0]);
        buf.extend_from_slice(&[0, 1, 0, 1]);
        buf.extend_from_slice(&[0, 0, 0, 120]);
        buf.extend_from_slice(&[0, 4, 192, 168, 1, 7]);

        let msg = Message::decode(&buf).unwrap();
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(msg.answers[0].name.to_string(), "y.");
        assert_eq!(msg.answers[0].rdata, RData::A("192.168.1.7".parse().unwrap()));
    }

    #[test]
    fn cache_flush_and_ttl_clamp() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0, 0, 0x84, 0, 0, 0, 0, 1, 0, 0, 0, 0]);
        buf.extend_from_slice(&[1, b'z', 0]);
        buf.extend_from_slice(&[0, 1, 0x80, 1]); // CLASS IN + cache-flush bit
        buf.extend_from_slice(&[0xff, 0, 0, 0]); // TTL with high bit set
        buf.extend_from_slice(&[0, 4, 10, 0, 0, 1]);

        let msg = Message::decode(&buf).unwrap();
        let rec = &msg.answers[0];
        assert!(rec.cache_flush);
        assert_eq!(rec.class, Class::IN);
        assert_eq!(rec.ttl, 0, "out-of-range TTL clamps to zero");
    }

    #[test]
    fn unicast_response_bit() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
        buf.extend_from_slice(&[1, b'q', 0]);
        buf.extend_from_slice(&[0, 12, 0x80, 1]); // PTR, QU bit set

        let msg = Message::decode(&buf).unwrap();
        let q = &msg.questions[0];
        assert!(q.unicast_response);
        assert_eq!(q.qclass, Class::IN);
        assert_eq!(q.qtype, Type::PTR);
    }

    #[test]
    fn debug_snapshot() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0, 0, 0x84, 0, 0, 0, 0, 1, 0, 0, 0, 0]);
        buf.extend_from_slice(&[4, b'h', b'o', b's', b't', 5, b'l', b'o', b'c', b'a', b'l', 0]);
        buf.extend_from_slice(&[0, 1, 0, 1]);
        buf.extend_from_slice(&[0, 0, 0, 60]);
        buf.extend_from_slice(&[0, 4, 192, 168, 0, 9]);

        let msg = Message::decode(&buf).unwrap();
        expect![[r#"
            Record {
                name: host.local.,
                class: IN,
                cache_flush: false,
                ttl: 60,
                rdata: A 192.168.0.9,
            }
        "#]]
        .assert_debug_eq(&msg.answers[0]);
    }
}

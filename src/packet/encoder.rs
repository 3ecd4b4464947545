//! mDNS query encoder.
//!
//! The browser only ever sends queries (questions plus known-answer records),
//! so this is not a general message encoder. Names are written uncompressed;
//! mDNS messages are small enough that correctness wins over size here.

use bytemuck::Zeroable;

use crate::name::DomainName;

use super::{
    records::{Question, RData},
    Class, DecodeError, Header, CLASS_TOP_BIT,
};

pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
    trunc: bool,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            trunc: false,
        }
    }

    pub(crate) fn write_slice(&mut self, data: &[u8]) {
        let buf = &mut self.buf[self.pos..];
        if data.len() > buf.len() {
            self.trunc = true;
            buf.copy_from_slice(&data[..buf.len()]);
            self.pos += buf.len();
        } else {
            buf[..data.len()].copy_from_slice(data);
            self.pos += data.len();
        }
    }

    pub(crate) fn write_u8(&mut self, b: u8) {
        self.write_slice(&[b]);
    }

    pub(crate) fn write_u16(&mut self, v: u16) {
        self.write_slice(&v.to_be_bytes());
    }

    pub(crate) fn write_u32(&mut self, v: u32) {
        self.write_slice(&v.to_be_bytes());
    }

    pub(crate) fn write_domain_name(&mut self, name: &DomainName) {
        for label in name.labels() {
            self.write_u8(label.as_bytes().len() as u8);
            self.write_slice(label.as_bytes());
        }
        // Terminating root label.
        self.write_u8(0);
    }

    pub(crate) fn write_character_string(&mut self, string: &[u8]) {
        debug_assert!(string.len() <= 255);
        self.write_u8(string.len() as u8);
        self.write_slice(string);
    }
}

/// Builds an outgoing mDNS query in a caller-provided buffer.
///
/// Questions must be added before known answers, mirroring the section order
/// of the wire format. If the buffer runs out, the header's TC bit is set and
/// [`QueryBuilder::finish`] reports [`DecodeError::Truncated`]; the caller
/// may still send the truncated message.
pub struct QueryBuilder<'a> {
    w: Writer<'a>,
    qdcount: u16,
    ancount: u16,
}

impl<'a> QueryBuilder<'a> {
    /// Starts a query message in `buf`. mDNS multicast queries carry ID 0.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let mut w = Writer::new(buf);
        let header = Header::zeroed();
        w.write_slice(bytemuck::bytes_of(&header));
        Self {
            w,
            qdcount: 0,
            ancount: 0,
        }
    }

    /// Adds a question to the *Question* section.
    ///
    /// # Panics
    ///
    /// Panics if called after [`QueryBuilder::known_answer`]; questions
    /// cannot follow answers on the wire.
    pub fn question(&mut self, question: &Question) {
        assert_eq!(self.ancount, 0, "question added after known answers");
        self.w.write_domain_name(&question.name);
        self.w.write_u16(question.qtype.0);
        let mut class = question.qclass.0;
        if question.unicast_response {
            class |= CLASS_TOP_BIT;
        }
        self.w.write_u16(class);
        self.qdcount += 1;
    }

    /// Adds a known-answer record to the *Answer* section, letting responders
    /// suppress answers the querier already holds.
    pub fn known_answer(&mut self, name: &DomainName, ttl: u32, rdata: &RData) {
        self.w.write_domain_name(name);
        self.w.write_u16(rdata.record_type().0);
        self.w.write_u16(Class::IN.0);
        self.w.write_u32(ttl);

        // Reserve the length field, encode the payload, then patch the
        // length in.
        let len_pos = self.w.pos;
        self.w.write_u16(0);
        let rdata_start = self.w.pos;
        rdata.encode(&mut self.w);
        let rdata_len = self.w.pos - rdata_start;
        let end = self.w.pos;
        self.w.pos = len_pos;
        self.w
            .write_u16(rdata_len.try_into().expect("RDATA length overflows u16"));
        self.w.pos = end;

        self.ancount += 1;
    }

    /// Finalizes the header and returns the number of bytes written.
    pub fn finish(self) -> Result<usize, DecodeError> {
        let mut header = Header::zeroed();
        header.set_qdcount(self.qdcount);
        header.set_ancount(self.ancount);
        header.set_truncated(self.w.trunc);
        self.w.buf[..std::mem::size_of::<Header>()].copy_from_slice(bytemuck::bytes_of(&header));

        if self.w.trunc {
            Err(DecodeError::Truncated)
        } else {
            Ok(self.w.pos)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::packet::{decoder::Message, Type, MAX_PACKET_SIZE};

    use super::*;

    fn domain(s: &str) -> DomainName {
        s.parse().unwrap()
    }

    #[test]
    fn roundtrip_query() {
        let mut buf = [0; MAX_PACKET_SIZE];
        let mut q = QueryBuilder::new(&mut buf);
        q.question(&Question::new(domain("_http._tcp.local."), Type::PTR));
        q.known_answer(
            &domain("_http._tcp.local."),
            3600,
            &RData::PTR(domain("web._http._tcp.local.")),
        );
        let len = q.finish().unwrap();

        let msg = Message::decode(&buf[..len]).unwrap();
        assert!(!msg.header.is_response());
        assert_eq!(msg.questions.len(), 1);
        assert_eq!(msg.questions[0].name, domain("_http._tcp.local."));
        assert_eq!(msg.questions[0].qtype, Type::PTR);
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(msg.answers[0].ttl, 3600);
        assert_eq!(
            msg.answers[0].rdata,
            RData::PTR(domain("web._http._tcp.local."))
        );
    }

    #[test]
    fn roundtrip_all_rdata() {
        let payloads = [
            RData::A(Ipv4Addr::new(10, 0, 0, 1)),
            RData::AAAA("fe80::1".parse().unwrap()),
            RData::PTR(domain("a.b.local.")),
            RData::SRV {
                priority: 1,
                weight: 5,
                port: 8080,
                target: domain("myhost.local."),
            },
            RData::TXT(vec![b"path=/".to_vec().into(), b"flag".to_vec().into()]),
        ];

        let mut buf = [0; MAX_PACKET_SIZE];
        let mut q = QueryBuilder::new(&mut buf);
        for rdata in &payloads {
            q.known_answer(&domain("x.local."), 120, rdata);
        }
        let len = q.finish().unwrap();

        let msg = Message::decode(&buf[..len]).unwrap();
        let decoded: Vec<_> = msg.answers.iter().map(|r| r.rdata.clone()).collect();
        assert_eq!(decoded, payloads);
    }

    #[test]
    fn unicast_response_bit_roundtrip() {
        let mut buf = [0; 512];
        let mut q = QueryBuilder::new(&mut buf);
        let mut question = Question::new(domain("_ipp._tcp.local."), Type::PTR);
        question.unicast_response = true;
        q.question(&question);
        let len = q.finish().unwrap();

        let msg = Message::decode(&buf[..len]).unwrap();
        assert!(msg.questions[0].unicast_response);
    }

    #[test]
    fn truncation_sets_tc() {
        let mut buf = [0; 24]; // barely larger than the header
        let mut q = QueryBuilder::new(&mut buf);
        q.question(&Question::new(domain("_very-long-name._tcp.local."), Type::PTR));
        assert_eq!(q.finish(), Err(DecodeError::Truncated));

        let header: Header = bytemuck::pod_read_unaligned(&buf[..12]);
        assert!(header.is_truncated());
    }
}

//! DNS wire format as used by multicast DNS.
//!
//! Only what service discovery needs is modelled: names with compression,
//! questions, and A, AAAA, PTR, SRV and TXT records. Records of any other
//! type are parsed into an opaque body so that the rest of a response is
//! still usable.


pub(crate) mod header;
pub(crate) mod name;
mod packer;
pub(crate) mod question;
pub(crate) mod resource;

use std::collections::HashMap;
use std::fmt;

use header::*;
use packer::*;
use question::*;
use resource::*;

use shared::error::*;

// A Type is a type of DNS request and response.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum DnsType {
    A = 1,
    Ptr = 12,
    Txt = 16,
    Aaaa = 28,
    Srv = 33,
    Nsec = 47,

    // question.Type
    All = 255,

    #[default]
    Unsupported = 0,
}

impl From<u16> for DnsType {
    fn from(v: u16) -> Self {
        match v {
            1 => DnsType::A,
            12 => DnsType::Ptr,
            16 => DnsType::Txt,
            28 => DnsType::Aaaa,
            33 => DnsType::Srv,
            47 => DnsType::Nsec,
            255 => DnsType::All,
            _ => DnsType::Unsupported,
        }
    }
}

impl fmt::Display for DnsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            DnsType::A => "A",
            DnsType::Ptr => "PTR",
            DnsType::Txt => "TXT",
            DnsType::Aaaa => "AAAA",
            DnsType::Srv => "SRV",
            DnsType::Nsec => "NSEC",
            DnsType::All => "ALL",
            DnsType::Unsupported => "Unsupported",
        };
        write!(f, "{s}")
    }
}

impl DnsType {
    // pack_type appends the wire format of field to msg.
    pub(crate) fn pack(&self, msg: Vec<u8>) -> Vec<u8> {
        pack_uint16(msg, *self as u16)
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize) -> Result<usize> {
        let (t, o) = unpack_uint16(msg, off)?;
        *self = DnsType::from(t);
        Ok(o)
    }
}

/// DNS class of a question or resource record.
///
/// Multicast DNS reuses the top bit: in questions it asks for a unicast
/// response, in records it is the cache-flush flag.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct DnsClass(pub(crate) u16);

/// Internet class (IN).
pub(crate) const DNSCLASS_INET: DnsClass = DnsClass(1);

// DNSCLASS_FLAG is the mDNS unicast-response / cache-flush bit.
const DNSCLASS_FLAG: u16 = 0x8000;

impl fmt::Display for DnsClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DNSCLASS_INET => write!(f, "ClassINET"),
            _ => write!(f, "{}", self.0),
        }
    }
}

impl DnsClass {
    // pack_class appends the wire format of field to msg.
    pub(crate) fn pack(&self, msg: Vec<u8>) -> Vec<u8> {
        pack_uint16(msg, self.0)
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize) -> Result<usize> {
        let (c, o) = unpack_uint16(msg, off)?;
        *self = DnsClass(c);
        Ok(o)
    }

    pub(crate) fn has_flag(&self) -> bool {
        self.0 & DNSCLASS_FLAG != 0
    }

    pub(crate) fn without_flag(&self) -> DnsClass {
        DnsClass(self.0 & !DNSCLASS_FLAG)
    }
}

// An OpCode is a DNS operation code.
pub(crate) type OpCode = u16;

// Most mDNS messages fit a single Ethernet frame.
const PACK_STARTING_CAP: usize = 512;

// Smallest wire size of a question: root name, type and class.
const MIN_QUESTION_LEN: usize = 5;

// Smallest wire size of a resource: root name, type, class, TTL and length.
const MIN_RESOURCE_LEN: usize = 11;

// Message is a representation of a DNS message.
#[derive(Default, Debug)]
pub(crate) struct Message {
    pub(crate) header: Header,
    pub(crate) questions: Vec<Question>,
    pub(crate) answers: Vec<Resource>,
    pub(crate) authorities: Vec<Resource>,
    pub(crate) additionals: Vec<Resource>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |rs: &[Resource]| {
            rs.iter()
                .map(|r| r.to_string())
                .collect::<Vec<String>>()
                .join(", ")
        };
        let questions: Vec<String> = self.questions.iter().map(|q| q.to_string()).collect();
        write!(
            f,
            "{}; question: {}; answer: {}; authority: {}; additional: {}",
            self.header,
            questions.join(", "),
            join(&self.answers),
            join(&self.authorities),
            join(&self.additionals),
        )
    }
}

impl Message {
    // unpack parses a full Message.
    pub(crate) fn unpack(&mut self, msg: &[u8]) -> Result<()> {
        let mut h = HeaderInternal::default();
        let mut off = h.unpack(msg, 0)?;
        self.header = h.header();

        self.questions =
            Vec::with_capacity(section_capacity(msg, off, h.questions, MIN_QUESTION_LEN));
        for _ in 0..h.questions {
            let mut q = Question::default();
            off = q.unpack(msg, off)?;
            self.questions.push(q);
        }

        let (answers, off) = unpack_section(msg, off, h.answers)?;
        let (authorities, off) = unpack_section(msg, off, h.authorities)?;
        let (additionals, _) = unpack_section(msg, off, h.additionals)?;
        self.answers = answers;
        self.authorities = authorities;
        self.additionals = additionals;
        Ok(())
    }

    // pack packs a full Message.
    pub(crate) fn pack(&mut self) -> Result<Vec<u8>> {
        self.append_pack(Vec::with_capacity(PACK_STARTING_CAP))
    }

    // append_pack is like pack but appends the full Message to b and returns
    // the extended buffer.
    pub(crate) fn append_pack(&mut self, b: Vec<u8>) -> Result<Vec<u8>> {
        if self.questions.len() > u16::MAX as usize
            || self.answers.len() > u16::MAX as usize
            || self.authorities.len() > u16::MAX as usize
            || self.additionals.len() > u16::MAX as usize
        {
            return Err(Error::ErrTooManyRecords);
        }

        let (id, bits) = self.header.pack();
        let h = HeaderInternal {
            id,
            bits,
            questions: self.questions.len() as u16,
            answers: self.answers.len() as u16,
            authorities: self.authorities.len() as u16,
            additionals: self.additionals.len() as u16,
        };

        let compression_off = b.len();
        let mut msg = h.pack(b);

        // Compression is always on; unpackers are required to support it.
        let mut compression = Some(HashMap::new());

        for question in &self.questions {
            msg = question.pack(msg, &mut compression, compression_off)?;
        }
        for answer in &mut self.answers {
            msg = answer.pack(msg, &mut compression, compression_off)?;
        }
        for authority in &mut self.authorities {
            msg = authority.pack(msg, &mut compression, compression_off)?;
        }
        for additional in &mut self.additionals {
            msg = additional.pack(msg, &mut compression, compression_off)?;
        }

        Ok(msg)
    }
}

fn unpack_section(msg: &[u8], mut off: usize, count: u16) -> Result<(Vec<Resource>, usize)> {
    let mut section = Vec::with_capacity(section_capacity(msg, off, count, MIN_RESOURCE_LEN));
    for _ in 0..count {
        let mut r = Resource::default();
        off = r.unpack(msg, off)?;
        section.push(r);
    }
    Ok((section, off))
}

// section_capacity bounds a header count by how many entries of at least
// min_len bytes the rest of msg can hold.
fn section_capacity(msg: &[u8], off: usize, count: u16, min_len: usize) -> usize {
    (count as usize).min(msg.len().saturating_sub(off) / min_len)
}

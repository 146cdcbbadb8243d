pub(crate) mod a;
pub(crate) mod aaaa;
pub(crate) mod ptr;
pub(crate) mod srv;
pub(crate) mod txt;
pub(crate) mod unknown;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use a::*;
use aaaa::*;
use ptr::*;
use srv::*;
use txt::*;
use unknown::*;

use super::name::*;
use super::packer::*;
use super::*;
use shared::error::*;

// A Resource is a DNS resource record.
#[derive(Default, Debug)]
pub(crate) struct Resource {
    pub(crate) header: ResourceHeader,
    pub(crate) body: Option<Box<dyn ResourceBody>>,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.header,
            if let Some(body) = &self.body {
                body.to_string()
            } else {
                "None".to_owned()
            }
        )
    }
}

impl Resource {
    // pack appends the wire format of the Resource to msg.
    pub(crate) fn pack(
        &mut self,
        msg: Vec<u8>,
        compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<Vec<u8>> {
        let body = self.body.as_ref().ok_or(Error::ErrResourceLen)?;
        self.header.typ = body.real_type();
        let (mut msg, len_off) = self.header.pack(msg, compression, compression_off)?;
        let pre_len = msg.len();
        msg = body.pack(msg, compression, compression_off)?;
        self.header.fix_len(&mut msg, len_off, pre_len)?;
        Ok(msg)
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize) -> Result<usize> {
        let off = self.header.unpack(msg, off)?;
        let end = off + self.header.length as usize;
        if end > msg.len() {
            return Err(Error::ErrResourceLen);
        }
        let rb = unpack_resource_body(self.header.typ, self.header.raw_type, msg, off, end)?;
        self.body = Some(rb);
        Ok(end)
    }

    /// Downcasts the body to a concrete record type.
    pub(crate) fn body_as<T: 'static>(&self) -> Option<&T> {
        self.body.as_ref()?.as_any().downcast_ref::<T>()
    }
}

/// Header for a DNS resource record.
///
/// ```text
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |                      NAME                     |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |                      TYPE                     |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |                     CLASS                     |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |                      TTL                      |
/// |                                               |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |                   RDLENGTH                    |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub(crate) struct ResourceHeader {
    /// The domain name for which this resource record pertains.
    pub(crate) name: Name,

    /// The type of the record. Set automatically during packing.
    pub(crate) typ: DnsType,

    /// Type code as found on the wire, kept for unsupported types.
    pub(crate) raw_type: u16,

    /// The class of the record with the cache-flush bit removed.
    pub(crate) class: DnsClass,

    /// Whether the mDNS cache-flush bit was set.
    pub(crate) cache_flush: bool,

    /// Time to live in seconds. Zero announces that the record is gone.
    pub(crate) ttl: u32,

    /// Length of the record data. Set automatically during packing.
    pub(crate) length: u16,
}

impl fmt::Display for ResourceHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.name, self.ttl, self.class, self.typ,
        )
    }
}

impl ResourceHeader {
    // pack appends the wire format of the ResourceHeader to msg.
    //
    // The returned offset is where the Length field was packed.
    pub(crate) fn pack(
        &self,
        mut msg: Vec<u8>,
        compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<(Vec<u8>, usize)> {
        msg = self.name.pack(msg, compression, compression_off)?;
        msg = self.typ.pack(msg);
        let class = if self.cache_flush {
            DnsClass(self.class.0 | 0x8000)
        } else {
            self.class
        };
        msg = class.pack(msg);
        msg = pack_uint32(msg, self.ttl);
        let len_off = msg.len();
        msg = pack_uint16(msg, self.length);
        Ok((msg, len_off))
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize) -> Result<usize> {
        let mut new_off = self.name.unpack(msg, off)?;
        let (raw_type, o) = unpack_uint16(msg, new_off)?;
        self.raw_type = raw_type;
        self.typ = DnsType::from(raw_type);
        new_off = self.class.unpack(msg, o)?;
        self.cache_flush = self.class.has_flag();
        self.class = self.class.without_flag();
        let (ttl, new_off) = unpack_uint32(msg, new_off)?;
        self.ttl = ttl;
        let (l, new_off) = unpack_uint16(msg, new_off)?;
        self.length = l;
        Ok(new_off)
    }

    // fix_len updates a packed ResourceHeader to include the length of the
    // ResourceBody packed after it.
    pub(crate) fn fix_len(&mut self, msg: &mut [u8], len_off: usize, pre_len: usize) -> Result<()> {
        if msg.len() < pre_len || msg.len() > pre_len + u16::MAX as usize {
            return Err(Error::ErrResTooLong);
        }

        let con_len = msg.len() - pre_len;
        msg[len_off] = ((con_len >> 8) & 0xFF) as u8;
        msg[len_off + 1] = (con_len & 0xFF) as u8;
        self.length = con_len as u16;

        Ok(())
    }
}

// A ResourceBody is a DNS resource record minus the header.
pub(crate) trait ResourceBody: fmt::Display + fmt::Debug {
    // real_type returns the actual type of the Resource. This is used to
    // fill in the header Type field.
    fn real_type(&self) -> DnsType;

    // pack packs a Resource except for its header.
    fn pack(
        &self,
        msg: Vec<u8>,
        compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<Vec<u8>>;

    // unpack parses the body occupying msg[off..end].
    fn unpack(&mut self, msg: &[u8], off: usize, end: usize) -> Result<usize>;

    fn as_any(&self) -> &dyn Any;
}

pub(crate) fn unpack_resource_body(
    typ: DnsType,
    raw_type: u16,
    msg: &[u8],
    off: usize,
    end: usize,
) -> Result<Box<dyn ResourceBody>> {
    let mut rb: Box<dyn ResourceBody> = match typ {
        DnsType::A => Box::<AResource>::default(),
        DnsType::Aaaa => Box::<AaaaResource>::default(),
        DnsType::Ptr => Box::<PtrResource>::default(),
        DnsType::Srv => Box::<SrvResource>::default(),
        DnsType::Txt => Box::<TxtResource>::default(),
        _ => Box::new(UnknownResource {
            typ: raw_type,
            data: Vec::new(),
        }),
    };

    let new_off = rb.unpack(msg, off, end)?;
    if new_off != end {
        return Err(Error::ErrResourceLen);
    }

    Ok(rb)
}

use super::*;

// An UnknownResource keeps the raw data of a record type we don't interpret.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnknownResource {
    pub(crate) typ: u16,
    pub(crate) data: Vec<u8>,
}

impl fmt::Display for UnknownResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TYPE{} ({} bytes)", self.typ, self.data.len())
    }
}

impl ResourceBody for UnknownResource {
    fn real_type(&self) -> DnsType {
        DnsType::from(self.typ)
    }

    fn pack(
        &self,
        msg: Vec<u8>,
        _compression: &mut Option<HashMap<String, usize>>,
        _compression_off: usize,
    ) -> Result<Vec<u8>> {
        Ok(pack_bytes(msg, &self.data))
    }

    fn unpack(&mut self, msg: &[u8], off: usize, end: usize) -> Result<usize> {
        if end > msg.len() {
            return Err(Error::ErrResourceLen);
        }
        self.data = msg[off..end].to_vec();
        Ok(end)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

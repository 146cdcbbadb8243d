use super::*;

// A TxtResource is a TXT Resource record.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct TxtResource {
    pub(crate) txt: Vec<Vec<u8>>,
}

impl fmt::Display for TxtResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strings: Vec<String> = self
            .txt
            .iter()
            .map(|t| String::from_utf8_lossy(t).into_owned())
            .collect();
        write!(f, "{}", strings.join(" "))
    }
}

impl ResourceBody for TxtResource {
    fn real_type(&self) -> DnsType {
        DnsType::Txt
    }

    // pack appends the wire format of the TxtResource to msg. An empty TXT
    // record is a single zero-length string.
    fn pack(
        &self,
        mut msg: Vec<u8>,
        _compression: &mut Option<HashMap<String, usize>>,
        _compression_off: usize,
    ) -> Result<Vec<u8>> {
        if self.txt.is_empty() {
            return pack_text(msg, &[]);
        }
        for s in &self.txt {
            msg = pack_text(msg, s)?;
        }
        Ok(msg)
    }

    fn unpack(&mut self, msg: &[u8], mut off: usize, end: usize) -> Result<usize> {
        self.txt.clear();
        while off < end {
            let (t, new_off) = unpack_text(msg, off)?;
            if new_off > end {
                return Err(Error::ErrCalcLen);
            }
            if !t.is_empty() {
                self.txt.push(t);
            }
            off = new_off;
        }
        Ok(off)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

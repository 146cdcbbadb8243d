use std::collections::HashMap;
use std::fmt;

use super::packer::*;
use shared::error::*;

// NAME_LEN is the maximum length of a name on the wire, length octets included.
const NAME_LEN: usize = 255;

// LABEL_LEN is the maximum length of a single label.
const LABEL_LEN: usize = 63;

// MAX_POINTERS bounds how many compression pointers are followed for one name.
const MAX_POINTERS: usize = 10;

/// A domain name in presentation format.
///
/// `data` always ends with a dot. Dots and backslashes that belong to a label
/// are escaped with a backslash, so `My\.Device._http._tcp.local.` has four
/// labels, the first one being `My.Device`.
#[derive(Default, PartialEq, Eq, Debug, Clone)]
pub(crate) struct Name {
    pub(crate) data: String,
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data)
    }
}

impl Name {
    /// Parses a presentation-format name; the trailing dot is optional.
    pub(crate) fn new(data: &str) -> Result<Self> {
        let labels = split_labels(data)?;
        Self::from_labels(&labels)
    }

    /// Builds a name from raw, unescaped labels.
    pub(crate) fn from_labels<L: AsRef<[u8]>>(labels: &[L]) -> Result<Self> {
        let mut wire_len = 1;
        let mut data = Vec::new();
        for label in labels {
            let label = label.as_ref();
            if label.is_empty() {
                return Err(Error::ErrZeroSegLen);
            }
            if label.len() > LABEL_LEN {
                return Err(Error::ErrSegTooLong);
            }
            wire_len += label.len() + 1;
            for &b in label {
                if b == b'.' || b == b'\\' {
                    data.push(b'\\');
                }
                data.push(b);
            }
            data.push(b'.');
        }
        if wire_len > NAME_LEN {
            return Err(Error::ErrNameTooLong);
        }
        if data.is_empty() {
            data.push(b'.');
        }
        Ok(Name {
            data: String::from_utf8_lossy(&data).into_owned(),
        })
    }

    /// Returns the unescaped labels of this name, root excluded.
    pub(crate) fn labels(&self) -> Result<Vec<Vec<u8>>> {
        split_labels(&self.data)
    }

    /// Case-folded form used for comparisons and cache keys.
    pub(crate) fn key(&self) -> String {
        self.data.to_ascii_lowercase()
    }

    pub(crate) fn eq_ignore_case(&self, other: &Name) -> bool {
        self.data.eq_ignore_ascii_case(&other.data)
    }

    // pack appends the wire format of the name to msg.
    //
    // Every suffix written in full is recorded in compression so that later
    // names sharing it are packed as a pointer.
    pub(crate) fn pack(
        &self,
        mut msg: Vec<u8>,
        compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<Vec<u8>> {
        let labels = self.labels()?;
        for i in 0..labels.len() {
            let key = Name::from_labels(&labels[i..])?.key();
            if let Some(comp) = compression.as_ref()
                && let Some(&ptr) = comp.get(&key)
            {
                return Ok(pack_uint16(msg, 0xC000 | ptr as u16));
            }

            let pos = msg.len() - compression_off;
            if pos <= 0x3FFF
                && let Some(comp) = compression.as_mut()
            {
                comp.insert(key, pos);
            }

            msg.push(labels[i].len() as u8);
            msg = pack_bytes(msg, &labels[i]);
        }
        msg.push(0);
        Ok(msg)
    }

    // unpack parses a name starting at off, following compression pointers.
    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize) -> Result<usize> {
        let mut labels: Vec<Vec<u8>> = Vec::new();
        let mut curr = off;
        let mut new_off = off;
        let mut ptr = 0;
        let mut wire_len = 1;

        loop {
            if curr >= msg.len() {
                return Err(Error::ErrBaseLen);
            }
            let c = msg[curr] as usize;
            curr += 1;
            match c & 0xC0 {
                0x00 => {
                    if c == 0 {
                        break;
                    }
                    let end = curr + c;
                    if end > msg.len() {
                        return Err(Error::ErrCalcLen);
                    }
                    wire_len += c + 1;
                    if wire_len > NAME_LEN {
                        return Err(Error::ErrNameTooLong);
                    }
                    labels.push(msg[curr..end].to_vec());
                    curr = end;
                }
                0xC0 => {
                    if curr >= msg.len() {
                        return Err(Error::ErrInvalidPtr);
                    }
                    let c1 = msg[curr] as usize;
                    curr += 1;
                    if ptr == 0 {
                        new_off = curr;
                    }
                    ptr += 1;
                    if ptr > MAX_POINTERS {
                        return Err(Error::ErrTooManyPtr);
                    }
                    curr = ((c ^ 0xC0) << 8) | c1;
                }
                // 0x40 and 0x80 are reserved label types.
                _ => return Err(Error::ErrInvalidPtr),
            }
        }
        if ptr == 0 {
            new_off = curr;
        }

        *self = Name::from_labels(&labels)?;
        Ok(new_off)
    }
}

fn split_labels(data: &str) -> Result<Vec<Vec<u8>>> {
    let mut labels = Vec::new();
    let mut label = Vec::new();
    let mut bytes = data.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'\\' => match bytes.next() {
                Some(escaped) => label.push(escaped),
                None => return Err(Error::ErrTrailingEscape),
            },
            b'.' => {
                if label.is_empty() {
                    // A lone "." is the root name.
                    if labels.is_empty() && data.len() == 1 {
                        break;
                    }
                    return Err(Error::ErrZeroSegLen);
                }
                labels.push(std::mem::take(&mut label));
            }
            _ => label.push(b),
        }
    }
    if !label.is_empty() {
        labels.push(label);
    }
    for label in &labels {
        if label.len() > LABEL_LEN {
            return Err(Error::ErrSegTooLong);
        }
    }
    Ok(labels)
}

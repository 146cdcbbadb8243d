use shared::error::*;

// pack_uint16 appends the wire format of field to msg.
pub(crate) fn pack_uint16(mut msg: Vec<u8>, field: u16) -> Vec<u8> {
    msg.extend_from_slice(&field.to_be_bytes());
    msg
}

pub(crate) fn unpack_uint16(msg: &[u8], off: usize) -> Result<(u16, usize)> {
    if off + UINT16LEN > msg.len() {
        return Err(Error::ErrBaseLen);
    }
    Ok((u16::from_be_bytes([msg[off], msg[off + 1]]), off + UINT16LEN))
}

// pack_uint32 appends the wire format of field to msg.
pub(crate) fn pack_uint32(mut msg: Vec<u8>, field: u32) -> Vec<u8> {
    msg.extend_from_slice(&field.to_be_bytes());
    msg
}

pub(crate) fn unpack_uint32(msg: &[u8], off: usize) -> Result<(u32, usize)> {
    if off + UINT32LEN > msg.len() {
        return Err(Error::ErrBaseLen);
    }
    let v = u32::from_be_bytes([msg[off], msg[off + 1], msg[off + 2], msg[off + 3]]);
    Ok((v, off + UINT32LEN))
}

// pack_bytes appends the wire format of field to msg.
pub(crate) fn pack_bytes(mut msg: Vec<u8>, field: &[u8]) -> Vec<u8> {
    msg.extend_from_slice(field);
    msg
}

pub(crate) fn unpack_bytes(msg: &[u8], off: usize, field: &mut [u8]) -> Result<usize> {
    let new_off = off + field.len();
    if new_off > msg.len() {
        return Err(Error::ErrBaseLen);
    }
    field.copy_from_slice(&msg[off..new_off]);
    Ok(new_off)
}

// pack_text appends a length-prefixed character-string to msg.
pub(crate) fn pack_text(mut msg: Vec<u8>, field: &[u8]) -> Result<Vec<u8>> {
    if field.len() > u8::MAX as usize {
        return Err(Error::ErrStringTooLong);
    }
    msg.push(field.len() as u8);
    msg.extend_from_slice(field);
    Ok(msg)
}

pub(crate) fn unpack_text(msg: &[u8], off: usize) -> Result<(Vec<u8>, usize)> {
    if off >= msg.len() {
        return Err(Error::ErrBaseLen);
    }
    let begin = off + 1;
    let end = begin + msg[off] as usize;
    if end > msg.len() {
        return Err(Error::ErrCalcLen);
    }
    Ok((msg[begin..end].to_vec(), end))
}

// UINT16LEN is the length (in bytes) of a uint16.
pub(crate) const UINT16LEN: usize = 2;

// UINT32LEN is the length (in bytes) of a uint32.
pub(crate) const UINT32LEN: usize = 4;

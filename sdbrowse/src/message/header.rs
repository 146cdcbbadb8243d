use std::fmt;

use super::packer::*;
use super::*;
use shared::error::*;

const HEADER_BIT_QR: u16 = 1 << 15; // query/response (response=1)
const HEADER_BIT_AA: u16 = 1 << 10; // authoritative
const HEADER_BIT_TC: u16 = 1 << 9; // truncated
const HEADER_BIT_RD: u16 = 1 << 8; // recursion desired
const HEADER_BIT_RA: u16 = 1 << 7; // recursion available

// Header is a representation of a DNS message header.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) id: u16,
    pub(crate) response: bool,
    pub(crate) op_code: OpCode,
    pub(crate) authoritative: bool,
    pub(crate) truncated: bool,
    pub(crate) recursion_desired: bool,
    pub(crate) recursion_available: bool,
    pub(crate) rcode: u8,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} qr={} opcode={} aa={} tc={} rcode={}",
            self.id, self.response, self.op_code, self.authoritative, self.truncated, self.rcode
        )
    }
}

impl Header {
    // pack returns the (id, bits) words of the header.
    pub(crate) fn pack(&self) -> (u16, u16) {
        let mut bits = (self.op_code << 11) | self.rcode as u16 & 0x0F;
        if self.recursion_available {
            bits |= HEADER_BIT_RA;
        }
        if self.recursion_desired {
            bits |= HEADER_BIT_RD;
        }
        if self.truncated {
            bits |= HEADER_BIT_TC;
        }
        if self.authoritative {
            bits |= HEADER_BIT_AA;
        }
        if self.response {
            bits |= HEADER_BIT_QR;
        }
        (self.id, bits)
    }
}

// HeaderInternal is the wire layout of a header, section counts included.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeaderInternal {
    pub(crate) id: u16,
    pub(crate) bits: u16,
    pub(crate) questions: u16,
    pub(crate) answers: u16,
    pub(crate) authorities: u16,
    pub(crate) additionals: u16,
}

impl HeaderInternal {
    pub(crate) fn pack(&self, mut msg: Vec<u8>) -> Vec<u8> {
        msg = pack_uint16(msg, self.id);
        msg = pack_uint16(msg, self.bits);
        msg = pack_uint16(msg, self.questions);
        msg = pack_uint16(msg, self.answers);
        msg = pack_uint16(msg, self.authorities);
        pack_uint16(msg, self.additionals)
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize) -> Result<usize> {
        let (id, off) = unpack_uint16(msg, off)?;
        self.id = id;
        let (bits, off) = unpack_uint16(msg, off)?;
        self.bits = bits;
        let (questions, off) = unpack_uint16(msg, off)?;
        self.questions = questions;
        let (answers, off) = unpack_uint16(msg, off)?;
        self.answers = answers;
        let (authorities, off) = unpack_uint16(msg, off)?;
        self.authorities = authorities;
        let (additionals, off) = unpack_uint16(msg, off)?;
        self.additionals = additionals;
        Ok(off)
    }

    pub(crate) fn header(&self) -> Header {
        Header {
            id: self.id,
            response: (self.bits & HEADER_BIT_QR) != 0,
            op_code: (self.bits >> 11) & 0xF,
            authoritative: (self.bits & HEADER_BIT_AA) != 0,
            truncated: (self.bits & HEADER_BIT_TC) != 0,
            recursion_desired: (self.bits & HEADER_BIT_RD) != 0,
            recursion_available: (self.bits & HEADER_BIT_RA) != 0,
            rcode: (self.bits & 0xF) as u8,
        }
    }
}

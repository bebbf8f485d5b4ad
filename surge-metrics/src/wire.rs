//! Binary envelope for sketch transport between processes.
//!
//! Layout: `MAGIC (4) | version (1) | tag (1) | payload length (u32 BE) | payload`.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::period::PeriodData;

pub const MAGIC: [u8; 4] = *b"SRGQ";
pub const VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1 + 1 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvelopeTag {
    DDSketch = 1,
}

impl TryFrom<u8> for EnvelopeTag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::DDSketch),
            _ => Err(Error::Envelope("unknown payload tag")),
        }
    }
}

pub fn encode_envelope(tag: EnvelopeTag, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.put_slice(&MAGIC);
    out.put_u8(VERSION);
    out.put_u8(tag as u8);
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
    out
}

pub fn decode_envelope(buf: &[u8]) -> Result<(EnvelopeTag, &[u8])> {
    if buf.len() < HEADER_LEN {
        return Err(Error::Envelope("truncated header"));
    }
    let mut header = &buf[..HEADER_LEN];
    let mut magic = [0u8; 4];
    header.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(Error::Envelope("bad magic"));
    }
    let version = header.get_u8();
    if version != VERSION {
        return Err(Error::EnvelopeVersion(version));
    }
    let tag = EnvelopeTag::try_from(header.get_u8())?;
    let len = header.get_u32() as usize;

    let payload = &buf[HEADER_LEN..];
    if payload.len() != len {
        return Err(Error::Envelope("payload length mismatch"));
    }
    Ok((tag, payload))
}

/// JSON encoding of a window; every sketch becomes a tagged base64 string.
pub fn serialize_metrics(data: &PeriodData) -> Result<String> {
    Ok(serde_json::to_string(data)?)
}

pub fn deserialize_metrics(s: &str) -> Result<PeriodData> {
    Ok(serde_json::from_str(s)?)
}

pub fn serialize_metrics_list(data: &[PeriodData]) -> Result<String> {
    Ok(serde_json::to_string(data)?)
}

pub fn deserialize_metrics_list(s: &str) -> Result<Vec<PeriodData>> {
    Ok(serde_json::from_str(s)?)
}

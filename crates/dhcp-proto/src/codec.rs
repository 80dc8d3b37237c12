//! Option area codec
//!
//! The option area of a DHCP message starts with the magic cookie and is
//! followed by TLV entries `(code, len, data)`. `Pad` (0) and `End` (255) are
//! single bytes without a length. Decoding checks every declared length
//! against the buffer before touching the payload; encoding checks every
//! entry against the destination capacity and never produces a partial area.

use crate::option::{code, DhcpOption};
use std::net::Ipv4Addr;

/// DHCP magic cookie (RFC 2131)
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Largest payload a single TLV can carry
pub const MAX_OPTION_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("option area is shorter than the magic cookie")]
    MissingMagicCookie,
    #[error("bad magic cookie {0:02x?}")]
    BadMagicCookie([u8; 4]),
    #[error("option {code} at offset {offset} runs past the end of the message")]
    Truncated { code: u8, offset: usize },
    #[error("option {code} payload of {len} bytes exceeds {MAX_OPTION_LEN}")]
    OptionTooLong { code: u8, len: usize },
    #[error("option code {0} cannot carry a payload")]
    ReservedCode(u8),
    #[error("option {code} has length {actual}, expected {expected}")]
    InvalidLength { code: u8, expected: usize, actual: usize },
    #[error("no space left: need {needed} bytes, {remaining} remaining")]
    InsufficientSpace { needed: usize, remaining: usize },
}

/// Decoded options keyed by code
///
/// Entries keep the order in which codes first appeared. When a code repeats
/// the last payload wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    entries: Vec<(u8, Vec<u8>)>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an option area (magic cookie included)
    ///
    /// Parsing stops at the first `End`; bytes after it are ignored. An area
    /// that runs out without `End` is accepted as long as no TLV is cut short.
    pub fn decode(area: &[u8]) -> Result<Self, CodecError> {
        let cookie = area
            .get(..MAGIC_COOKIE.len())
            .ok_or(CodecError::MissingMagicCookie)?;
        if cookie != MAGIC_COOKIE {
            return Err(CodecError::BadMagicCookie([
                cookie[0], cookie[1], cookie[2], cookie[3],
            ]));
        }

        let mut set = Self::new();
        let mut offset = MAGIC_COOKIE.len();

        while let Some(&option_code) = area.get(offset) {
            match option_code {
                code::PAD => {
                    offset += 1;
                    continue;
                }
                code::END => break,
                _ => {}
            }

            let truncated = CodecError::Truncated {
                code: option_code,
                offset,
            };
            let len = usize::from(*area.get(offset + 1).ok_or(truncated.clone())?);
            let start = offset + 2;
            let data = area.get(start..start + len).ok_or(truncated)?;

            set.replace(option_code, data.to_vec());
            offset = start + len;
        }

        Ok(set)
    }

    /// Insert or replace an option payload
    pub fn insert(
        &mut self,
        option_code: u8,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), CodecError> {
        let payload = payload.into();
        if option_code == code::PAD || option_code == code::END {
            return Err(CodecError::ReservedCode(option_code));
        }
        if payload.len() > MAX_OPTION_LEN {
            return Err(CodecError::OptionTooLong {
                code: option_code,
                len: payload.len(),
            });
        }
        self.replace(option_code, payload);
        Ok(())
    }

    /// Insert a typed option
    pub fn set(&mut self, option: &DhcpOption) -> Result<(), CodecError> {
        self.insert(option.code(), option.payload())
    }

    fn replace(&mut self, option_code: u8, payload: Vec<u8>) {
        match self.entries.iter_mut().find(|(c, _)| *c == option_code) {
            Some(entry) => entry.1 = payload,
            None => self.entries.push((option_code, payload)),
        }
    }

    pub fn get(&self, option_code: u8) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(c, _)| *c == option_code)
            .map(|(_, data)| data.as_slice())
    }

    pub fn contains(&self, option_code: u8) -> bool {
        self.get(option_code).is_some()
    }

    pub fn remove(&mut self, option_code: u8) -> Option<Vec<u8>> {
        let index = self.entries.iter().position(|(c, _)| *c == option_code)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.entries.iter().map(|(c, data)| (*c, data.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fixed<const N: usize>(&self, option_code: u8) -> Result<Option<[u8; N]>, CodecError> {
        match self.get(option_code) {
            None => Ok(None),
            Some(data) => <[u8; N]>::try_from(data)
                .map(Some)
                .map_err(|_| CodecError::InvalidLength {
                    code: option_code,
                    expected: N,
                    actual: data.len(),
                }),
        }
    }

    /// One byte option; present with another length is an error
    pub fn get_u8(&self, option_code: u8) -> Result<Option<u8>, CodecError> {
        Ok(self.fixed::<1>(option_code)?.map(|[b]| b))
    }

    pub fn get_u16(&self, option_code: u8) -> Result<Option<u16>, CodecError> {
        Ok(self.fixed::<2>(option_code)?.map(u16::from_be_bytes))
    }

    pub fn get_u32(&self, option_code: u8) -> Result<Option<u32>, CodecError> {
        Ok(self.fixed::<4>(option_code)?.map(u32::from_be_bytes))
    }

    pub fn get_ipv4(&self, option_code: u8) -> Result<Option<Ipv4Addr>, CodecError> {
        Ok(self.fixed::<4>(option_code)?.map(Ipv4Addr::from))
    }

    /// Encode the whole set in insertion order
    pub fn encode(&self, capacity: usize) -> Result<Vec<u8>, CodecError> {
        encode(self, capacity)
    }
}

/// Bounded writer for an option area
///
/// Starts with the magic cookie; every write is checked against the space
/// left before anything is appended.
#[derive(Debug, Clone)]
pub struct OptionWriter {
    buf: Vec<u8>,
    capacity: usize,
    written: [bool; 256],
}

impl OptionWriter {
    pub fn new(capacity: usize) -> Result<Self, CodecError> {
        if capacity < MAGIC_COOKIE.len() {
            return Err(CodecError::InsufficientSpace {
                needed: MAGIC_COOKIE.len(),
                remaining: capacity,
            });
        }
        let mut buf = Vec::with_capacity(capacity);
        buf.extend_from_slice(&MAGIC_COOKIE);
        Ok(Self {
            buf,
            capacity,
            written: [false; 256],
        })
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    fn reserve(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(CodecError::InsufficientSpace { needed, remaining });
        }
        Ok(())
    }

    pub fn has_written(&self, option_code: u8) -> bool {
        self.written[usize::from(option_code)]
    }

    pub fn write(&mut self, option_code: u8, payload: &[u8]) -> Result<(), CodecError> {
        if option_code == code::PAD || option_code == code::END {
            return Err(CodecError::ReservedCode(option_code));
        }
        let len = u8::try_from(payload.len()).map_err(|_| CodecError::OptionTooLong {
            code: option_code,
            len: payload.len(),
        })?;
        self.reserve(2 + payload.len())?;

        self.buf.push(option_code);
        self.buf.push(len);
        self.buf.extend_from_slice(payload);
        self.written[usize::from(option_code)] = true;
        Ok(())
    }

    pub fn write_option(&mut self, option: &DhcpOption) -> Result<(), CodecError> {
        self.write(option.code(), &option.payload())
    }

    pub fn write_set(&mut self, set: &OptionSet) -> Result<(), CodecError> {
        for (option_code, payload) in set.iter() {
            self.write(option_code, payload)?;
        }
        Ok(())
    }

    /// Write the catalog value of every requested code, in request order
    ///
    /// Codes without a catalog entry and codes already written are skipped.
    pub fn fill_requested(
        &mut self,
        requested: &[u8],
        catalog: &OptionSet,
    ) -> Result<(), CodecError> {
        for &option_code in requested {
            if self.has_written(option_code) {
                continue;
            }
            if let Some(payload) = catalog.get(option_code) {
                self.write(option_code, payload)?;
            }
        }
        Ok(())
    }

    /// Terminate with `End` and hand back the area
    pub fn finish(mut self) -> Result<Vec<u8>, CodecError> {
        self.reserve(1)?;
        self.buf.push(code::END);
        Ok(self.buf)
    }
}

/// Encode an option set into an area of at most `capacity` bytes
pub fn encode(set: &OptionSet, capacity: usize) -> Result<Vec<u8>, CodecError> {
    let mut writer = OptionWriter::new(capacity)?;
    writer.write_set(set)?;
    writer.finish()
}

/// Encode the catalog values a client asked for in its parameter request list
pub fn fill_requested(
    requested: &[u8],
    catalog: &OptionSet,
    capacity: usize,
) -> Result<Vec<u8>, CodecError> {
    let mut writer = OptionWriter::new(capacity)?;
    writer.fill_requested(requested, catalog)?;
    writer.finish()
}

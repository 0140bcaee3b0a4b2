//! The fixed envelope that precedes every struct payload.
//!
//! Two layouts exist. A plain one-way message uses the 24-byte v0 header:
//! `{u32 size, u32 version, u32 interface id, u32 ordinal, u32 flags,
//! u32 padding}`. Any message that expects or carries a response uses the
//! 32-byte v1 header, which appends a `u64 request id`.

use axopack::Decoder;
use axopack::Message;

use crate::types::Error;
use crate::types::Result;

pub const MESSAGE_V0_HEADER_SIZE: u32 = 24;
pub const MESSAGE_V1_HEADER_SIZE: u32 = 32;

/// Bit 0: the sender expects a response to this message.
pub const FLAG_EXPECTS_RESPONSE: u32 = 1 << 0;
/// Bit 1: this message is a response.
pub const FLAG_IS_RESPONSE: u32 = 1 << 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub header_size: u32,
    pub version: u32,
    /// Only meaningful for pipe-multiplexed interfaces; always zero here.
    pub interface_id: u32,
    pub ordinal: u32,
    pub flags: u32,
    /// Zero on v0 headers, which carry no request id.
    pub request_id: u64,
}

impl MessageHeader {
    /// Picks the envelope version from the flags: request/response traffic
    /// needs the request id, one-way messages do not.
    pub fn new(ordinal: u32, flags: u32, request_id: u64) -> Self {
        let (header_size, version) = if flags & (FLAG_EXPECTS_RESPONSE | FLAG_IS_RESPONSE) == 0 {
            (MESSAGE_V0_HEADER_SIZE, 0)
        } else {
            (MESSAGE_V1_HEADER_SIZE, 1)
        };
        Self {
            header_size,
            version,
            interface_id: 0,
            ordinal,
            flags,
            request_id,
        }
    }

    pub fn expects_response(&self) -> bool {
        self.flags & FLAG_EXPECTS_RESPONSE != 0
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_IS_RESPONSE != 0
    }

    /// Writes the envelope at the front of an outgoing message.
    pub fn encode(&self, message: &mut Message) {
        message.append_u32(self.header_size);
        message.append_u32(self.version);
        message.append_u32(self.interface_id);
        message.append_u32(self.ordinal);
        message.append_u32(self.flags);
        message.append_u32(0); // padding
        if self.version > 0 {
            message.append_u64(self.request_id);
        }
    }

    /// Parses and validates the envelope at the front of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(data, &[], 0);
        let header_size = decoder.u32()?;
        let version = decoder.u32()?;
        if (version == 0 && header_size != MESSAGE_V0_HEADER_SIZE)
            || (version == 1 && header_size != MESSAGE_V1_HEADER_SIZE)
            || version > 2
        {
            return Err(Error::BadHeader {
                header_size,
                version,
            });
        }
        if version == 2 {
            return Err(Error::UnsupportedVersion(version));
        }
        let interface_id = decoder.u32()?;
        let ordinal = decoder.u32()?;
        let flags = decoder.u32()?;
        let _padding = decoder.u32()?;
        let request_id = if version > 0 { decoder.u64()? } else { 0 };
        Ok(Self {
            header_size,
            version,
            interface_id,
            ordinal,
            flags,
            request_id,
        })
    }
}

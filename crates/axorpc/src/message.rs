//! Whole-message serialization: envelope, inline payload, deferred
//! payloads, in that order.

use axopack::Decoder;
use axopack::Message;
use axopack::StructSpec;
use axopack::Value;
use axopipe::PipeHandle;

use crate::header::MessageHeader;
use crate::types::Result;

/// A finished message ready for `write_message`.
#[derive(Debug)]
pub struct OutgoingMessage {
    pub data: Vec<u8>,
    pub handles: Vec<PipeHandle>,
}

/// Serializes one complete message: the envelope, the parameter struct's
/// inline portion, then every deferred pointer payload.
pub fn serialize_message(
    ordinal: u32,
    request_id: u64,
    flags: u32,
    spec: &StructSpec,
    fields: &[Value],
) -> Result<OutgoingMessage> {
    let header = MessageHeader::new(ordinal, flags, request_id);
    let mut message = Message::new();
    header.encode(&mut message);
    message.append_struct_inline(spec, fields)?;
    let (data, handles) = message.finish()?;
    Ok(OutgoingMessage { data, handles })
}

/// Decodes the struct payload that follows a parsed header.
pub fn deserialize_payload(
    data: &[u8],
    handles: &[PipeHandle],
    header: &MessageHeader,
    spec: &StructSpec,
) -> Result<Vec<Value>> {
    let mut decoder = Decoder::new(data, handles, header.header_size as usize);
    Ok(decoder.struct_inline(spec)?)
}

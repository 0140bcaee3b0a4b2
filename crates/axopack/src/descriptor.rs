//! Type descriptors: one codec capability per wire kind.
//!
//! A descriptor knows how to encode a [`Value`] of its kind into a
//! [`Message`], how to encode the null form of a nullable kind, and how to
//! decode itself back out. Descriptors are immutable, created once per
//! field or element type, and shared through `Arc`ed specs.

use std::sync::Arc;

use crate::decoder::Decoder;
use crate::encoder::Message;
use crate::spec::ArraySpec;
use crate::spec::MapSpec;
use crate::spec::StructSpec;
use crate::types::Error;
use crate::types::Result;
use crate::types::INVALID_HANDLE_INDEX;
use crate::value::Value;

#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    Bool,
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    U64,
    S64,
    F32,
    F64,
    Handle,
    Str,
    /// Enums travel as a 32-bit value.
    Enum,
    Array(Arc<ArraySpec>),
    Map(Arc<MapSpec>),
    Struct(Arc<StructSpec>),
    /// A remote-interface endpoint: handle plus a u32 interface version.
    InterfaceProxy,
    /// A request for an interface implementation: handle only.
    InterfaceRequest,
}

impl TypeDescriptor {
    pub fn array(element: TypeDescriptor, element_nullable: bool) -> Self {
        TypeDescriptor::Array(Arc::new(ArraySpec {
            element,
            element_nullable,
        }))
    }

    pub fn map(key: TypeDescriptor, value: TypeDescriptor, value_nullable: bool) -> Self {
        TypeDescriptor::Map(Arc::new(MapSpec {
            key,
            value,
            value_nullable,
        }))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::S8 => "s8",
            Self::U16 => "u16",
            Self::S16 => "s16",
            Self::U32 => "u32",
            Self::S32 => "s32",
            Self::U64 => "u64",
            Self::S64 => "s64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Handle => "handle",
            Self::Str => "string",
            Self::Enum => "enum",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Struct(_) => "struct",
            Self::InterfaceProxy => "interface proxy",
            Self::InterfaceRequest => "interface request",
        }
    }

    /// Bytes one element of this type occupies inside an array payload.
    /// Pointer-indirect kinds occupy their 8-byte pointer slot. Bool is
    /// special-cased by the array codec and never asks.
    pub fn array_element_size(&self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::S8 => 1,
            Self::U16 | Self::S16 => 2,
            Self::U32 | Self::S32 | Self::F32 | Self::Enum => 4,
            Self::Handle | Self::InterfaceRequest => 4,
            Self::U64 | Self::S64 | Self::F64 => 8,
            Self::Str | Self::Array(_) | Self::Map(_) | Self::Struct(_) => 8,
            Self::InterfaceProxy => 8,
        }
    }

    /// Handles, arrays, maps, structs, and interface types may not key a map.
    pub fn is_valid_map_key(&self) -> bool {
        !matches!(
            self,
            Self::Handle
                | Self::Array(_)
                | Self::Map(_)
                | Self::Struct(_)
                | Self::InterfaceProxy
                | Self::InterfaceRequest
        )
    }

    pub fn encode(&self, value: &Value, message: &mut Message) -> Result<()> {
        match (self, value) {
            (Self::Bool, Value::Bool(v)) => message.append_bool(*v),
            (Self::U8, Value::U8(v)) => message.append_u8(*v),
            (Self::S8, Value::S8(v)) => message.append_s8(*v),
            (Self::U16, Value::U16(v)) => message.append_u16(*v),
            (Self::S16, Value::S16(v)) => message.append_s16(*v),
            (Self::U32, Value::U32(v)) => message.append_u32(*v),
            (Self::S32, Value::S32(v)) => message.append_s32(*v),
            (Self::U64, Value::U64(v)) => message.append_u64(*v),
            (Self::S64, Value::S64(v)) => message.append_s64(*v),
            (Self::F32, Value::F32(v)) => message.append_f32(*v),
            (Self::F64, Value::F64(v)) => message.append_f64(*v),
            (Self::Enum, Value::S32(v)) => message.append_s32(*v),
            (Self::Handle, Value::Handle(h)) => message.append_handle(h.clone()),
            (Self::Str, Value::Str(s)) => message.append_string(s),
            (Self::Array(spec), Value::List(items)) => {
                message.append_array(spec.clone(), items.clone())
            }
            (Self::Map(spec), Value::Map(entries)) => {
                message.append_map(spec.clone(), entries.clone())
            }
            (Self::Struct(spec), Value::Record(fields)) => {
                message.append_struct(spec.clone(), fields.clone())
            }
            (Self::InterfaceProxy, Value::Handle(h)) => {
                message.append_handle(h.clone());
                message.append_u32(0);
            }
            (Self::InterfaceRequest, Value::Handle(h)) => message.append_handle(h.clone()),
            (ty, v) => {
                return Err(Error::TypeMismatch {
                    expected: ty.kind(),
                    found: v.kind(),
                })
            }
        }
        Ok(())
    }

    /// Writes the null form of a nullable kind: a zero pointer or the
    /// invalid handle index. Kinds with no null form refuse.
    pub fn encode_null(&self, message: &mut Message) -> Result<()> {
        match self {
            Self::Handle => message.append_u32(INVALID_HANDLE_INDEX),
            Self::Str | Self::Array(_) | Self::Map(_) | Self::Struct(_) => {
                message.append_null_pointer()
            }
            Self::InterfaceProxy => {
                message.append_u32(INVALID_HANDLE_INDEX);
                message.append_u32(0);
            }
            Self::InterfaceRequest => message.append_u32(INVALID_HANDLE_INDEX),
            other => return Err(Error::UnexpectedNull(other.kind().to_string())),
        }
        Ok(())
    }

    pub fn decode(&self, decoder: &mut Decoder<'_>) -> Result<Value> {
        match self {
            Self::Bool => Ok(Value::Bool(decoder.bool()?)),
            Self::U8 => Ok(Value::U8(decoder.u8()?)),
            Self::S8 => Ok(Value::S8(decoder.s8()?)),
            Self::U16 => Ok(Value::U16(decoder.u16()?)),
            Self::S16 => Ok(Value::S16(decoder.s16()?)),
            Self::U32 => Ok(Value::U32(decoder.u32()?)),
            Self::S32 => Ok(Value::S32(decoder.s32()?)),
            Self::U64 => Ok(Value::U64(decoder.u64()?)),
            Self::S64 => Ok(Value::S64(decoder.s64()?)),
            Self::F32 => Ok(Value::F32(decoder.f32()?)),
            Self::F64 => Ok(Value::F64(decoder.f64()?)),
            Self::Enum => Ok(Value::S32(decoder.s32()?)),
            Self::Handle => decoder.handle_value(),
            Self::Str => decoder.string_value(),
            Self::Array(spec) => decoder.array_value(spec),
            Self::Map(spec) => decoder.map_value(spec),
            Self::Struct(spec) => decoder.struct_value(spec),
            Self::InterfaceProxy => {
                let handle = decoder.handle_value()?;
                let _version = decoder.u32()?;
                Ok(handle)
            }
            Self::InterfaceRequest => decoder.handle_value(),
        }
    }
}

//! Mirror of the encoder: reads a byte buffer plus its out-of-band handle
//! list at a given cursor.

use axopipe::PipeHandle;

use crate::spec::ArraySpec;
use crate::spec::MapSpec;
use crate::spec::StructSpec;
use crate::types::align;
use crate::types::Error;
use crate::types::Result;
use crate::types::INVALID_HANDLE_INDEX;
use crate::types::MAP_DATA_SIZE;
use crate::value::Value;

use crate::descriptor::TypeDescriptor;

/// A cursor view over an incoming message.
///
/// Decoders never mutate the underlying buffer and are cheap to create: a
/// nested array/struct/map is decoded by re-rooting a fresh decoder at the
/// absolute position its pointer resolves to, so nesting depth never
/// matters to the caller.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    data: &'a [u8],
    handles: &'a [PipeHandle],
    cursor: usize,
    bit_offset: u8,
    last_bool_offset: usize,
}

macro_rules! decode_scalar {
    ($name:ident, $ty:ty, $size:expr) => {
        pub fn $name(&mut self) -> Result<$ty> {
            let bytes = self.read_bytes($size)?;
            Ok(<$ty>::from_le_bytes(bytes.try_into().unwrap()))
        }
    };
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8], handles: &'a [PipeHandle], cursor: usize) -> Self {
        Self {
            data,
            handles,
            cursor,
            bit_offset: 0,
            last_bool_offset: usize::MAX,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn align_cursor(&mut self, alignment: usize) {
        if self.bit_offset > 0 {
            self.cursor += 1;
            self.bit_offset = 0;
        }
        self.cursor = align(self.cursor, alignment);
    }

    /// Aligns to `amount` and hands out that many bytes.
    fn read_bytes(&mut self, amount: usize) -> Result<&'a [u8]> {
        self.align_cursor(amount);
        let end = self
            .cursor
            .checked_add(amount)
            .ok_or(Error::OutOfBounds)?;
        if end > self.data.len() {
            return Err(Error::OutOfBounds);
        }
        let slice = &self.data[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    /// A fresh decoder over the same buffer, rooted at `cursor`.
    fn rebase(&self, cursor: usize) -> Decoder<'a> {
        Decoder::new(self.data, self.handles, cursor)
    }

    decode_scalar!(u8, u8, 1);
    decode_scalar!(s8, i8, 1);
    decode_scalar!(u16, u16, 2);
    decode_scalar!(s16, i16, 2);
    decode_scalar!(u32, u32, 4);
    decode_scalar!(s32, i32, 4);
    decode_scalar!(u64, u64, 8);
    decode_scalar!(s64, i64, 8);
    decode_scalar!(f32, f32, 4);
    decode_scalar!(f64, f64, 8);

    /// Unpacks one bit, continuing the current bool run. A run ends as
    /// soon as any non-bool read moved the cursor.
    pub fn bool(&mut self) -> Result<bool> {
        if self.cursor != self.last_bool_offset {
            self.bit_offset = 0;
        }
        if self.cursor >= self.data.len() {
            return Err(Error::OutOfBounds);
        }
        let offset = self.cursor;
        let bit = self.bit_offset;
        self.last_bool_offset = offset;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.cursor += 1;
            self.bit_offset = 0;
        }
        Ok(self.data[offset] & (1 << bit) != 0)
    }

    /// Reads a handle index; the sentinel index decodes as `Null`.
    pub fn handle_value(&mut self) -> Result<Value> {
        let index = self.u32()?;
        if index == INVALID_HANDLE_INDEX {
            return Ok(Value::Null);
        }
        let handle = self
            .handles
            .get(index as usize)
            .ok_or(Error::InvalidHandleIndex(index))?;
        Ok(Value::Handle(handle.clone()))
    }

    /// Reads a 64-bit self-relative pointer and resolves it to an absolute
    /// position; a stored zero means null.
    pub fn offset(&mut self) -> Result<Option<usize>> {
        self.align_cursor(8);
        let base = self.cursor;
        let relative = self.u64()?;
        if relative == 0 {
            return Ok(None);
        }
        let absolute = base
            .checked_add(relative as usize)
            .ok_or(Error::OutOfBounds)?;
        if absolute > self.data.len() {
            return Err(Error::OutOfBounds);
        }
        Ok(Some(absolute))
    }

    pub fn string_value(&mut self) -> Result<Value> {
        let Some(position) = self.offset()? else {
            return Ok(Value::Null);
        };
        let mut inner = self.rebase(position);
        let bytes = inner.bytes_inline()?;
        let text = std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)?;
        Ok(Value::Str(text.to_string()))
    }

    fn bytes_inline(&mut self) -> Result<&'a [u8]> {
        let _size = self.u32()?;
        let count = self.u32()? as usize;
        let end = self.cursor.checked_add(count).ok_or(Error::OutOfBounds)?;
        if end > self.data.len() {
            return Err(Error::OutOfBounds);
        }
        let slice = &self.data[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    pub fn array_value(&mut self, spec: &ArraySpec) -> Result<Value> {
        let Some(position) = self.offset()? else {
            return Ok(Value::Null);
        };
        let mut inner = self.rebase(position);
        inner.array_inline(spec)
    }

    pub fn array_inline(&mut self, spec: &ArraySpec) -> Result<Value> {
        let _size = self.u32()?;
        let count = self.u32()? as usize;

        // Reject counts the remaining bytes cannot possibly hold before
        // reserving element storage.
        let needed = if matches!(spec.element, TypeDescriptor::Bool) {
            (count + 7) / 8
        } else {
            count
                .checked_mul(spec.element.array_element_size())
                .ok_or(Error::OutOfBounds)?
        };
        if self.cursor.checked_add(needed).ok_or(Error::OutOfBounds)? > self.data.len() {
            return Err(Error::OutOfBounds);
        }

        let mut items = Vec::with_capacity(count);
        if matches!(spec.element, TypeDescriptor::Bool) {
            for _ in 0..count {
                items.push(Value::Bool(self.bool()?));
            }
        } else {
            for _ in 0..count {
                let value = spec.element.decode(self)?;
                if value.is_null() && !spec.element_nullable {
                    return Err(Error::UnexpectedNull(
                        "element of a non-nullable array".to_string(),
                    ));
                }
                items.push(value);
            }
        }
        Ok(Value::List(items))
    }

    pub fn map_value(&mut self, spec: &MapSpec) -> Result<Value> {
        if !spec.key.is_valid_map_key() {
            return Err(Error::InvalidMapKey(spec.key.kind()));
        }
        let Some(position) = self.offset()? else {
            return Ok(Value::Null);
        };

        let mut inner = self.rebase(position);
        let size = inner.u32()?;
        let version = inner.u32()?;
        if size != MAP_DATA_SIZE || version != 0 {
            return Err(Error::InvalidMapData);
        }
        let keys = inner.array_value(&ArraySpec {
            element: spec.key.clone(),
            element_nullable: false,
        })?;
        let values = inner.array_value(&ArraySpec {
            element: spec.value.clone(),
            element_nullable: spec.value_nullable,
        })?;
        let (Value::List(keys), Value::List(values)) = (keys, values) else {
            return Err(Error::InvalidMapData);
        };
        if keys.len() != values.len() {
            return Err(Error::InvalidMapData);
        }
        Ok(Value::Map(keys.into_iter().zip(values).collect()))
    }

    pub fn struct_value(&mut self, spec: &StructSpec) -> Result<Value> {
        let Some(position) = self.offset()? else {
            return Ok(Value::Null);
        };
        let mut inner = self.rebase(position);
        Ok(Value::Record(inner.struct_inline(spec)?))
    }

    /// Reads the struct's size/version header, then each field by its
    /// descriptor in declaration order.
    pub fn struct_inline(&mut self, spec: &StructSpec) -> Result<Vec<Value>> {
        let _size = self.u32()?;
        let _version = self.u32()?;
        let mut fields = Vec::with_capacity(spec.fields.len());
        for field in &spec.fields {
            let value = field.ty.decode(self)?;
            if value.is_null() && !field.nullable {
                return Err(Error::UnexpectedNull(format!(
                    "{}.{}",
                    spec.name, field.name
                )));
            }
            fields.push(value);
        }
        Ok(fields)
    }
}

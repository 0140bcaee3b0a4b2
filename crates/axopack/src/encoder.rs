//! Owns an outgoing message buffer and drives serialization.

use std::collections::VecDeque;
use std::sync::Arc;

use axopipe::PipeHandle;

use crate::descriptor::TypeDescriptor;
use crate::spec::ArraySpec;
use crate::spec::MapSpec;
use crate::spec::StructSpec;
use crate::types::align;
use crate::types::Error;
use crate::types::Result;
use crate::types::ARRAY_HEADER_SIZE;
use crate::types::MAP_DATA_SIZE;

use crate::value::Value;

/// A growable little-endian message buffer.
///
/// Scalar appends align the cursor to the value's own size and write in
/// place; bool appends pack bits into the current byte. Pointer-bearing
/// fields reserve an 8-byte slot and enqueue their payload instead, so the
/// flat portion of a struct stays contiguous; [`Message::execute_deferred`]
/// then drains the queue FIFO, patching each slot with the payload's
/// self-relative offset before laying the payload out. Handles never enter
/// the byte buffer at all: they go to the side list and only their index
/// is written.
pub struct Message {
    buf: Vec<u8>,
    cursor: usize,
    bit_offset: u8,
    handles: Vec<PipeHandle>,
    deferred: VecDeque<Deferred>,
}

struct Deferred {
    pointer_offset: usize,
    payload: Pending,
}

enum Pending {
    /// Raw byte payloads (strings), laid out exactly like a u8 array.
    Bytes(Vec<u8>),
    Array {
        spec: Arc<ArraySpec>,
        items: Vec<Value>,
    },
    Map {
        spec: Arc<MapSpec>,
        entries: Vec<(Value, Value)>,
    },
    Struct {
        spec: Arc<StructSpec>,
        fields: Vec<Value>,
    },
}

macro_rules! append_scalar {
    ($name:ident, $ty:ty, $size:expr) => {
        pub fn $name(&mut self, v: $ty) {
            let offset = self.advance_cursor($size);
            self.buf[offset..offset + $size].copy_from_slice(&v.to_le_bytes());
        }
    };
}

impl Message {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            cursor: 0,
            bit_offset: 0,
            handles: Vec::new(),
            deferred: VecDeque::new(),
        }
    }

    /// Current write position. Always <= the buffer length.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    fn grow_to_cursor(&mut self) {
        if self.cursor > self.buf.len() {
            self.buf.resize(self.cursor, 0);
        }
    }

    fn align_cursor(&mut self, alignment: usize) {
        if self.bit_offset != 0 {
            self.cursor += 1;
            self.bit_offset = 0;
        }
        self.cursor = align(self.cursor, alignment);
    }

    /// Aligns to `amount` (a value of N bytes aligns to N), reserves that
    /// many bytes, and returns their offset.
    fn advance_cursor(&mut self, amount: usize) -> usize {
        self.align_cursor(amount);
        let offset = self.cursor;
        self.cursor += amount;
        self.grow_to_cursor();
        offset
    }

    fn write_u32_at(&mut self, offset: usize, v: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn write_u64_at(&mut self, offset: usize, v: u64) {
        self.buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
    }

    append_scalar!(append_u8, u8, 1);
    append_scalar!(append_s8, i8, 1);
    append_scalar!(append_u16, u16, 2);
    append_scalar!(append_s16, i16, 2);
    append_scalar!(append_u32, u32, 4);
    append_scalar!(append_s32, i32, 4);
    append_scalar!(append_u64, u64, 8);
    append_scalar!(append_s64, i64, 8);
    append_scalar!(append_f32, f32, 4);
    append_scalar!(append_f64, f64, 8);

    /// Packs one bit at the current bit offset; eight bools share a byte.
    /// Any non-bool append closes out a partial byte first.
    pub fn append_bool(&mut self, v: bool) {
        if self.cursor == self.buf.len() {
            self.buf.push(0);
        }
        if v {
            self.buf[self.cursor] |= 1 << self.bit_offset;
        } else {
            self.buf[self.cursor] &= !(1 << self.bit_offset);
        }
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.cursor += 1;
        }
    }

    /// Appends the next free handle index and stashes the handle in the
    /// side list.
    pub fn append_handle(&mut self, handle: PipeHandle) {
        let index = self.handles.len() as u32;
        self.append_u32(index);
        self.handles.push(handle);
    }

    /// Reserved bytes are already zeroed, which is the null pointer
    /// encoding, so this only has to advance the cursor.
    pub fn append_null_pointer(&mut self) {
        self.advance_cursor(8);
    }

    pub fn append_string(&mut self, v: &str) {
        self.defer(Pending::Bytes(v.as_bytes().to_vec()));
    }

    pub fn append_array(&mut self, spec: Arc<ArraySpec>, items: Vec<Value>) {
        self.defer(Pending::Array { spec, items });
    }

    pub fn append_map(&mut self, spec: Arc<MapSpec>, entries: Vec<(Value, Value)>) {
        self.defer(Pending::Map { spec, entries });
    }

    pub fn append_struct(&mut self, spec: Arc<StructSpec>, fields: Vec<Value>) {
        self.defer(Pending::Struct { spec, fields });
    }

    fn defer(&mut self, payload: Pending) {
        let pointer_offset = self.advance_cursor(8);
        self.deferred.push_back(Deferred {
            pointer_offset,
            payload,
        });
    }

    /// Drains the deferred queue FIFO. Each entry 8-aligns the cursor,
    /// patches `cursor - pointer_offset` into its reserved slot, then
    /// encodes its payload in place; nested pointers re-enter the queue,
    /// which gives the breadth-first layout.
    pub fn execute_deferred(&mut self) -> Result<()> {
        while let Some(entry) = self.deferred.pop_front() {
            self.align_cursor(8);
            self.grow_to_cursor();
            let relative = (self.cursor - entry.pointer_offset) as u64;
            self.write_u64_at(entry.pointer_offset, relative);
            match entry.payload {
                Pending::Bytes(bytes) => self.append_bytes_inline(&bytes)?,
                Pending::Array { spec, items } => self.append_array_inline(&spec, &items)?,
                Pending::Map { spec, entries } => self.append_map_inline(&spec, &entries)?,
                Pending::Struct { spec, fields } => self.append_struct_inline(&spec, &fields)?,
            }
        }
        Ok(())
    }

    fn append_bytes_inline(&mut self, bytes: &[u8]) -> Result<()> {
        let size = ARRAY_HEADER_SIZE + bytes.len();
        if size > u32::MAX as usize {
            return Err(Error::PayloadTooLarge(size));
        }
        let header = self.advance_cursor(8);
        self.write_u32_at(header, size as u32);
        self.write_u32_at(header + 4, bytes.len() as u32);
        let offset = self.cursor;
        self.cursor += bytes.len();
        self.grow_to_cursor();
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.align_cursor(8);
        self.grow_to_cursor();
        Ok(())
    }

    /// Lays out `{u32 size, u32 count}` followed by the packed elements,
    /// padded out to an 8-byte boundary.
    pub fn append_array_inline(&mut self, spec: &ArraySpec, items: &[Value]) -> Result<()> {
        let size = if matches!(spec.element, TypeDescriptor::Bool) {
            ARRAY_HEADER_SIZE + (items.len() + 7) / 8
        } else {
            let element_size = spec.element.array_element_size();
            items
                .len()
                .checked_mul(element_size)
                .and_then(|n| n.checked_add(ARRAY_HEADER_SIZE))
                .ok_or(Error::PayloadTooLarge(usize::MAX))?
        };
        if size > u32::MAX as usize {
            return Err(Error::PayloadTooLarge(size));
        }

        let header = self.advance_cursor(8);
        self.write_u32_at(header, size as u32);
        self.write_u32_at(header + 4, items.len() as u32);

        if matches!(spec.element, TypeDescriptor::Bool) {
            for item in items {
                match item {
                    Value::Bool(b) => self.append_bool(*b),
                    other => {
                        return Err(Error::TypeMismatch {
                            expected: "bool",
                            found: other.kind(),
                        })
                    }
                }
            }
        } else {
            for item in items {
                if item.is_null() {
                    if !spec.element_nullable {
                        return Err(Error::UnexpectedNull(
                            "element of a non-nullable array".to_string(),
                        ));
                    }
                    spec.element.encode_null(self)?;
                } else {
                    spec.element.encode(item, self)?;
                }
            }
        }
        self.align_cursor(8);
        self.grow_to_cursor();
        Ok(())
    }

    /// Maps are a 24-byte struct holding two array pointers; the keys and
    /// values arrays follow as ordinary deferred payloads.
    pub fn append_map_inline(&mut self, spec: &MapSpec, entries: &[(Value, Value)]) -> Result<()> {
        if !spec.key.is_valid_map_key() {
            return Err(Error::InvalidMapKey(spec.key.kind()));
        }
        let header = self.advance_cursor(8);
        self.write_u32_at(header, MAP_DATA_SIZE);
        self.write_u32_at(header + 4, 0);

        let keys: Vec<Value> = entries.iter().map(|(k, _)| k.clone()).collect();
        let values: Vec<Value> = entries.iter().map(|(_, v)| v.clone()).collect();
        self.append_array(
            Arc::new(ArraySpec {
                element: spec.key.clone(),
                element_nullable: false,
            }),
            keys,
        );
        self.append_array(
            Arc::new(ArraySpec {
                element: spec.value.clone(),
                element_nullable: spec.value_nullable,
            }),
            values,
        );
        Ok(())
    }

    /// Lays out `{u32 size, u32 version}` followed by the fields in
    /// declaration order. The size is patched in once the inline portion
    /// is known; it covers the struct's own storage, not the out-of-line
    /// payloads its pointers reach.
    pub fn append_struct_inline(&mut self, spec: &StructSpec, fields: &[Value]) -> Result<()> {
        if fields.len() != spec.fields.len() {
            return Err(Error::FieldCountMismatch {
                name: spec.name,
                expected: spec.fields.len(),
                found: fields.len(),
            });
        }
        let header = self.advance_cursor(8);
        for (field, value) in spec.fields.iter().zip(fields) {
            if value.is_null() {
                if !field.nullable {
                    return Err(Error::UnexpectedNull(format!(
                        "{}.{}",
                        spec.name, field.name
                    )));
                }
                field.ty.encode_null(self)?;
            } else {
                field.ty.encode(value, self)?;
            }
        }
        self.align_cursor(8);
        self.grow_to_cursor();
        let total = self.cursor - header;
        self.write_u32_at(header, total as u32);
        self.write_u32_at(header + 4, 0);
        Ok(())
    }

    /// Runs any outstanding deferred encodings and hands back the final
    /// buffer and handle list.
    pub fn finish(mut self) -> Result<(Vec<u8>, Vec<PipeHandle>)> {
        self.execute_deferred()?;
        self.align_cursor(1);
        self.grow_to_cursor();
        Ok((self.buf, self.handles))
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

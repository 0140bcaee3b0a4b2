//! # axopack
//!
//! The marshaling core: a little-endian, alignment-aware wire format for
//! structured values, driven entirely by runtime type descriptors.
//!
//! Scalars are written in place, aligned to their own size; booleans are
//! bit-packed eight to a byte. Anything variable-length (strings, arrays,
//! maps, nested structs) is reached through a 64-bit self-relative pointer
//! and laid out after the flat portion of its parent, breadth-first, by a
//! deferred-encoding queue. [`Decoder`]s are cheap cursor views that can be
//! re-rooted at a pointer target to decode nested payloads independently.

pub mod decoder;
pub mod descriptor;
pub mod encoder;
pub mod spec;
pub mod types;
pub mod value;

pub use types::Error;
pub use types::Result;

pub use decoder::Decoder;
pub use descriptor::TypeDescriptor;
pub use encoder::Message;
pub use spec::ArraySpec;
pub use spec::MapSpec;
pub use spec::StructField;
pub use spec::StructSpec;
pub use value::Value;

#[cfg(test)]
mod tests;

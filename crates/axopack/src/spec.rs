//! Schema metadata describing wire layout and field order.
//!
//! Specs are produced once per interface by the external IDL compiler (or
//! by hand in tests), wrapped in `Arc`, and shared across every message of
//! that shape. They carry no I/O of their own.

use crate::descriptor::TypeDescriptor;
use crate::value::Value;

/// Schema for one struct field.
#[derive(Debug, Clone)]
pub struct StructField {
    pub name: &'static str,
    pub ty: TypeDescriptor,
    /// Declared default, carried for reflection. The runtime never
    /// substitutes it: a missing non-nullable value is a hard error.
    pub default: Option<Value>,
    pub nullable: bool,
}

impl StructField {
    pub fn new(
        name: &'static str,
        ty: TypeDescriptor,
        default: Option<Value>,
        nullable: bool,
    ) -> Self {
        Self {
            name,
            ty,
            default,
            nullable,
        }
    }
}

/// Schema for a struct. Field order is significant: it is the wire order
/// and the positional-argument order for proxy/target call signatures.
#[derive(Debug, Clone)]
pub struct StructSpec {
    pub name: &'static str,
    pub fields: Vec<StructField>,
}

impl StructSpec {
    pub fn new(name: &'static str, fields: Vec<StructField>) -> Self {
        Self { name, fields }
    }
}

#[derive(Debug, Clone)]
pub struct ArraySpec {
    pub element: TypeDescriptor,
    pub element_nullable: bool,
}

/// Maps travel as a parallel pair of arrays (keys, values), not as a map
/// structure of their own on the wire.
#[derive(Debug, Clone)]
pub struct MapSpec {
    pub key: TypeDescriptor,
    pub value: TypeDescriptor,
    pub value_nullable: bool,
}

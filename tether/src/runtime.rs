//! The interface a foreign runtime must expose to be driven by a [`Bridge`](crate::Bridge).
//!
//! Methods follow the conventions of an embedding C API: calls that can raise
//! return [`Value::NULL`] on failure and leave the exception on the slate; the
//! caller is expected to drain the slate right after. The bridge wrappers do
//! that, so host code rarely talks to a `Runtime` directly.
use bitflags::bitflags;

use crate::Value;

/// Bit-level representation of a primitive foreign value.
///
/// Boxing a primitive stores the raw bits next to this tag; unboxing is
/// "check the tag, reinterpret the bits".
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BitsKind {
    Bool,
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl BitsKind {
    pub const ALL: [Self; 12] = [
        Self::Bool,
        Self::Char,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Float32,
        Self::Float64,
    ];

    /// foreign name of the datatype carrying this representation
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Bool => "Bool",
            Self::Char => "Char",
            Self::Int8 => "Int8",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::UInt8 => "UInt8",
            Self::UInt16 => "UInt16",
            Self::UInt32 => "UInt32",
            Self::UInt64 => "UInt64",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == name)
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64
        )
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub const fn size_in_bits(self) -> u32 {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 8,
            Self::Int16 | Self::UInt16 => 16,
            Self::Char | Self::Int32 | Self::UInt32 | Self::Float32 => 32,
            Self::Int64 | Self::UInt64 | Self::Float64 => 64,
        }
    }

    /// widens the low `size_in_bits` bits, two's complement
    pub const fn sign_extend(self, bits: u64) -> i64 {
        match self.size_in_bits() {
            64 => bits as i64,
            size => {
                let shift = 64 - size;
                ((bits << shift) as i64) >> shift
            }
        }
    }

    /// `bits` truncated to the width of this kind
    pub const fn truncate(self, bits: u64) -> u64 {
        match self.size_in_bits() {
            64 => bits,
            size => bits & ((1 << size) - 1),
        }
    }
}

bitflags! {
    /// Classification bits of a foreign datatype descriptor.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u16 {
        const ABSTRACT = 1 << 0;
        const PRIMITIVE = 1 << 1;
        const ISBITS = 1 << 2;
        const MUTABLE = 1 << 3;
        const STRUCT = 1 << 4;
        const TUPLE = 1 << 5;
        const NAMED_TUPLE = 1 << 6;
        const UNION = 1 << 7;
        const UNIONALL = 1 << 8;
        const ARRAY = 1 << 9;
        const ABSTRACT_REF = 1 << 10;
        const OPAQUE_CLOSURE = 1 << 11;
        const TYPE_TYPE = 1 << 12;
    }
}

pub trait Runtime: Send + Sync {
    // calls: may allocate, may collect, may raise

    fn evaluate(&self, source: &str) -> Value;
    fn call(&self, function: Value, args: &[Value]) -> Value;
    fn get_field(&self, value: Value, field: &str) -> Value;
    fn set_field(&self, value: Value, field: &str, new_value: Value);

    // collector

    /// reentrant, collection is deferred while the counter is nonzero
    fn pause_collection(&self);
    fn resume_collection(&self);
    /// collects now, or at the next safepoint after the last resume
    fn collect_garbage(&self);

    // root set

    /// makes `value` reachable under `symbol` until [`Runtime::unanchor`]
    fn anchor(&self, value: Value, symbol: &str);
    fn unanchor(&self, symbol: &str);

    // exception slate

    fn last_exception(&self) -> Option<Value>;
    fn clear_exception(&self);
    /// message of a foreign exception object, read without allocating
    fn exception_message(&self, exception: Value) -> Option<String>;

    // direct queries, never allocate

    /// `false` once the collector reclaimed the object behind `value`
    fn is_live(&self, value: Value) -> bool;
    fn type_of(&self, value: Value) -> Value;
    fn isa(&self, value: Value, ty: Value) -> bool;
    fn is_subtype(&self, sub: Value, sup: Value) -> bool;
    fn is_identical(&self, a: Value, b: Value) -> bool;
    fn type_name(&self, ty: Value) -> String;
    fn type_flags(&self, ty: Value) -> TypeFlags;
    fn supertype(&self, ty: Value) -> Value;
    fn singleton_instance(&self, ty: Value) -> Option<Value>;

    // array header and backing storage, 0-based

    fn array_rank(&self, array: Value) -> usize;
    fn array_dimension(&self, array: Value, axis: usize) -> usize;
    fn array_length(&self, array: Value) -> usize;
    fn array_ref(&self, array: Value, index: usize) -> Value;
    fn array_set(&self, array: Value, index: usize, element: Value);

    // scalars

    fn nothing(&self) -> Value;
    fn box_bits(&self, kind: BitsKind, bits: u64) -> Value;
    fn unbox_bits(&self, value: Value) -> Option<(BitsKind, u64)>;
    fn box_string(&self, text: &str) -> Value;
    fn unbox_string(&self, value: Value) -> Option<String>;
    fn box_symbol(&self, name: &str) -> Value;
    fn unbox_symbol(&self, value: Value) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_kinds_round_trip_their_names() {
        for kind in BitsKind::ALL {
            assert_eq!(BitsKind::from_type_name(kind.type_name()), Some(kind));
        }
        assert_eq!(BitsKind::from_type_name("String"), None);
    }

    #[test]
    fn bits_kind_classification() {
        assert!(BitsKind::Int32.is_signed());
        assert!(BitsKind::UInt8.is_unsigned());
        assert!(BitsKind::Float32.is_float());
        assert!(!BitsKind::Bool.is_signed());
        assert_eq!(BitsKind::Char.size_in_bits(), 32);
    }

    #[test]
    fn sign_extension_and_truncation() {
        assert_eq!(BitsKind::Int8.sign_extend(0xff), -1);
        assert_eq!(BitsKind::Int16.sign_extend(0x7fff), i16::MAX as i64);
        assert_eq!(BitsKind::Int64.sign_extend(u64::MAX), -1);
        assert_eq!(BitsKind::Int8.truncate(-1i64 as u64), 0xff);
        assert_eq!(BitsKind::UInt64.truncate(u64::MAX), u64::MAX);
    }
}

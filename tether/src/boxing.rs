//! Boxing: conversion between host values and foreign values.
//!
//! Dispatch is resolved at compile time through [`Boxable`] and
//! [`Unboxable`]. Scalars map onto tagged bits, containers recurse through
//! the foreign container constructors. Both traits expect to be driven from
//! inside a [`GcPause`](crate::GcPause), which [`box_value`] and [`unbox`]
//! take for you.
use std::{
    collections::HashMap,
    fmt,
    hash::{BuildHasher, Hash},
};

use crate::{BitsKind, Bridge, Error, Result, TypeFlags, Value};

/// foreign name of the top type, elements of this type are not asserted
pub const ANY: &str = "Any";

pub trait Boxable {
    fn box_value(&self, bridge: &Bridge) -> Result<Value>;

    /// foreign type expression used when a container of `Self` is built
    fn foreign_type_name() -> String
    where
        Self: Sized;
}

pub trait Unboxable: Sized {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self>;
}

pub fn box_value<T: Boxable + ?Sized>(bridge: &Bridge, value: &T) -> Result<Value> {
    let _pause = bridge.pause();
    value.box_value(bridge)
}

pub fn unbox<T: Unboxable>(bridge: &Bridge, value: Value) -> Result<T> {
    let _pause = bridge.pause();
    T::unbox_value(bridge, value)
}

pub(crate) fn mismatch<T>(bridge: &Bridge, value: Value) -> Error {
    let runtime = bridge.runtime();
    Error::unboxing(
        std::any::type_name::<T>(),
        runtime.type_name(runtime.type_of(value)),
    )
}

/// An interned foreign name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl Boxable for Symbol {
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        Ok(bridge.runtime().box_symbol(&self.0))
    }

    fn foreign_type_name() -> String {
        "Symbol".to_string()
    }
}

impl Unboxable for Symbol {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        bridge
            .runtime()
            .unbox_symbol(value)
            .map(Symbol)
            .ok_or_else(|| mismatch::<Self>(bridge, value))
    }
}

// raw values box to themselves, the caller keeps them reachable
impl Boxable for Value {
    #[inline]
    fn box_value(&self, _bridge: &Bridge) -> Result<Value> {
        Ok(*self)
    }

    fn foreign_type_name() -> String {
        ANY.to_string()
    }
}

impl Unboxable for Value {
    #[inline]
    fn unbox_value(_bridge: &Bridge, value: Value) -> Result<Self> {
        Ok(value)
    }
}

enum Number {
    Integer(i128),
    Float(f64),
}

fn number<T>(bridge: &Bridge, value: Value) -> Result<Number> {
    let Some((kind, bits)) = bridge.runtime().unbox_bits(value) else {
        return Err(mismatch::<T>(bridge, value));
    };
    Ok(match kind {
        BitsKind::Char => return Err(mismatch::<T>(bridge, value)),
        BitsKind::Float32 => Number::Float(f32::from_bits(bits as u32) as f64),
        BitsKind::Float64 => Number::Float(f64::from_bits(bits)),
        BitsKind::Bool => Number::Integer(bits as i128),
        kind if kind.is_unsigned() => Number::Integer(bits as i128),
        kind => Number::Integer(kind.sign_extend(bits) as i128),
    })
}

/// integers of any width, `Bool` and integral floats
fn unbox_integer<T>(bridge: &Bridge, value: Value) -> Result<i128> {
    match number::<T>(bridge, value)? {
        Number::Integer(n) => Ok(n),
        Number::Float(f) if f.fract() == 0.0 => Ok(f as i128),
        Number::Float(_) => Err(mismatch::<T>(bridge, value)),
    }
}

macro_rules! integer_boxing {
    ($($host:ty => $kind:ident),* $(,)?) => {$(
        impl Boxable for $host {
            #[inline]
            fn box_value(&self, bridge: &Bridge) -> Result<Value> {
                let kind = BitsKind::$kind;
                Ok(bridge.runtime().box_bits(kind, kind.truncate(*self as u64)))
            }

            fn foreign_type_name() -> String {
                BitsKind::$kind.type_name().to_string()
            }
        }

        impl Unboxable for $host {
            fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
                let n = unbox_integer::<Self>(bridge, value)?;
                <$host>::try_from(n).map_err(|_| mismatch::<Self>(bridge, value))
            }
        }
    )*};
}

#[rustfmt::skip]
integer_boxing!(
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64, isize => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64, usize => UInt64,
);

impl Boxable for f64 {
    #[inline]
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        Ok(bridge.runtime().box_bits(BitsKind::Float64, self.to_bits()))
    }

    fn foreign_type_name() -> String {
        BitsKind::Float64.type_name().to_string()
    }
}

impl Unboxable for f64 {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        match number::<Self>(bridge, value)? {
            Number::Float(f) => Ok(f),
            Number::Integer(n) if (n as f64) as i128 == n => Ok(n as f64),
            Number::Integer(_) => Err(mismatch::<Self>(bridge, value)),
        }
    }
}

impl Boxable for f32 {
    #[inline]
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        Ok(bridge
            .runtime()
            .box_bits(BitsKind::Float32, self.to_bits() as u64))
    }

    fn foreign_type_name() -> String {
        BitsKind::Float32.type_name().to_string()
    }
}

impl Unboxable for f32 {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        match number::<Self>(bridge, value)? {
            Number::Float(f) if f.is_nan() || (f as f32) as f64 == f => Ok(f as f32),
            Number::Integer(n) if (n as f32) as i128 == n => Ok(n as f32),
            _ => Err(mismatch::<Self>(bridge, value)),
        }
    }
}

impl Boxable for bool {
    #[inline]
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        Ok(bridge.runtime().box_bits(BitsKind::Bool, *self as u64))
    }

    fn foreign_type_name() -> String {
        BitsKind::Bool.type_name().to_string()
    }
}

impl Unboxable for bool {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        match bridge.runtime().unbox_bits(value) {
            Some((BitsKind::Bool, bits)) => Ok(bits != 0),
            _ => Err(mismatch::<Self>(bridge, value)),
        }
    }
}

impl Boxable for char {
    #[inline]
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        Ok(bridge.runtime().box_bits(BitsKind::Char, *self as u64))
    }

    fn foreign_type_name() -> String {
        BitsKind::Char.type_name().to_string()
    }
}

impl Unboxable for char {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        match bridge.runtime().unbox_bits(value) {
            Some((BitsKind::Char, bits)) => u32::try_from(bits)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| mismatch::<Self>(bridge, value)),
            _ => Err(mismatch::<Self>(bridge, value)),
        }
    }
}

impl Boxable for String {
    #[inline]
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        Ok(bridge.runtime().box_string(self))
    }

    fn foreign_type_name() -> String {
        "String".to_string()
    }
}

impl Boxable for &str {
    #[inline]
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        Ok(bridge.runtime().box_string(self))
    }

    fn foreign_type_name() -> String {
        "String".to_string()
    }
}

impl Unboxable for String {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        bridge
            .runtime()
            .unbox_string(value)
            .ok_or_else(|| mismatch::<Self>(bridge, value))
    }
}

/// `()` is the foreign `nothing`
impl Boxable for () {
    #[inline]
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        Ok(bridge.runtime().nothing())
    }

    fn foreign_type_name() -> String {
        "Nothing".to_string()
    }
}

impl Unboxable for () {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        let runtime = bridge.runtime();
        if runtime.is_identical(value, runtime.nothing()) {
            Ok(())
        } else {
            Err(mismatch::<Self>(bridge, value))
        }
    }
}

impl<T: Boxable> Boxable for Option<T> {
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        let Some(value) = self else {
            return Ok(bridge.runtime().nothing());
        };
        let boxed = value.box_value(bridge)?;
        let runtime = bridge.runtime();
        if runtime.is_identical(boxed, runtime.nothing()) {
            return Err(Error::AmbiguousNothing {
                target: std::any::type_name::<Self>().to_string(),
            });
        }
        Ok(boxed)
    }

    fn foreign_type_name() -> String {
        format!("Union{{Nothing, {}}}", T::foreign_type_name())
    }
}

impl<T: Unboxable> Unboxable for Option<T> {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        let runtime = bridge.runtime();
        if runtime.is_identical(value, runtime.nothing()) {
            return Ok(None);
        }
        T::unbox_value(bridge, value).map(Some)
    }
}

/// `Vector{T}(undef, n)` filled element by element
pub(crate) fn box_sequence<T: Boxable>(bridge: &Bridge, items: &[T]) -> Result<Value> {
    let _pause = bridge.pause();
    let vector_type = bridge.global(&format!("Vector{{{}}}", T::foreign_type_name()))?;
    let undef = bridge.global("undef")?;
    let len = items.len() as i64;
    let vector = bridge.safe_call(vector_type, &[&undef, &len], Ok)?;
    let runtime = bridge.runtime();
    for (index, item) in items.iter().enumerate() {
        let element = item.box_value(bridge)?;
        runtime.array_set(vector, index, element);
        bridge.forward_last_exception()?;
    }
    Ok(vector)
}

impl<T: Boxable> Boxable for Vec<T> {
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        box_sequence(bridge, self)
    }

    fn foreign_type_name() -> String {
        format!("Vector{{{}}}", T::foreign_type_name())
    }
}

impl<T: Boxable> Boxable for &[T] {
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        box_sequence(bridge, self)
    }

    fn foreign_type_name() -> String {
        format!("Vector{{{}}}", T::foreign_type_name())
    }
}

/// any array, read in linear (column-major) order
impl<T: Unboxable> Unboxable for Vec<T> {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        let runtime = bridge.runtime();
        if !runtime
            .type_flags(runtime.type_of(value))
            .contains(TypeFlags::ARRAY)
        {
            return Err(mismatch::<Self>(bridge, value));
        }
        (0..runtime.array_length(value))
            .map(|index| {
                let element = runtime.array_ref(value, index);
                bridge.forward_last_exception()?;
                T::unbox_value(bridge, element)
            })
            .collect()
    }
}

impl<K: Boxable, V: Boxable, S> Boxable for HashMap<K, V, S> {
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        let _pause = bridge.pause();
        let dict_type = bridge.global(&Self::foreign_type_name())?;
        let dict = bridge.safe_call(dict_type, &[], Ok)?;
        let setindex = bridge.global("setindex!")?;
        for (key, value) in self {
            bridge.safe_call(setindex, &[&dict, value, key], |_| Ok(()))?;
        }
        Ok(dict)
    }

    fn foreign_type_name() -> String {
        format!(
            "Dict{{{}, {}}}",
            K::foreign_type_name(),
            V::foreign_type_name()
        )
    }
}

impl<K, V, S> Unboxable for HashMap<K, V, S>
where
    K: Unboxable + Eq + Hash,
    V: Unboxable,
    S: BuildHasher + Default,
{
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        let _pause = bridge.pause();
        let abstract_dict = bridge.global("AbstractDict")?;
        if !bridge.runtime().isa(value, abstract_dict) {
            return Err(mismatch::<Self>(bridge, value));
        }
        let keys_function = bridge.global("keys")?;
        let values_function = bridge.global("values")?;
        let keys = bridge.safe_call(keys_function, &[&value], |keys| {
            Vec::<K>::unbox_value(bridge, keys)
        })?;
        let values = bridge.safe_call(values_function, &[&value], |values| {
            Vec::<V>::unbox_value(bridge, values)
        })?;
        Ok(keys.into_iter().zip(values).collect())
    }
}

fn field_or_mismatch<T>(bridge: &Bridge, value: Value, name: &str) -> Result<Value> {
    let field = bridge.runtime().get_field(value, name);
    if bridge.take_exception().is_some() {
        return Err(mismatch::<T>(bridge, value));
    }
    Ok(field)
}

/// `(A, B)` is a foreign `Pair{A, B}`
impl<A: Boxable, B: Boxable> Boxable for (A, B) {
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        let _pause = bridge.pause();
        let pair_type = bridge.global(&Self::foreign_type_name())?;
        bridge.safe_call(pair_type, &[&self.0, &self.1], Ok)
    }

    fn foreign_type_name() -> String {
        format!(
            "Pair{{{}, {}}}",
            A::foreign_type_name(),
            B::foreign_type_name()
        )
    }
}

/// from a `Pair` or a tuple of at least two elements
impl<A: Unboxable, B: Unboxable> Unboxable for (A, B) {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        let _pause = bridge.pause();
        let runtime = bridge.runtime();
        let pair = bridge.global("Pair")?;
        let (first, second) = if runtime.isa(value, pair) {
            ("first", "second")
        } else if runtime
            .type_flags(runtime.type_of(value))
            .contains(TypeFlags::TUPLE)
        {
            ("1", "2")
        } else {
            return Err(mismatch::<Self>(bridge, value));
        };
        let first = field_or_mismatch::<Self>(bridge, value, first)?;
        let second = field_or_mismatch::<Self>(bridge, value, second)?;
        Ok((
            A::unbox_value(bridge, first)?,
            B::unbox_value(bridge, second)?,
        ))
    }
}

/// `(A, B, C)` is a foreign `Tuple{A, B, C}`
impl<A: Boxable, B: Boxable, C: Boxable> Boxable for (A, B, C) {
    fn box_value(&self, bridge: &Bridge) -> Result<Value> {
        let _pause = bridge.pause();
        let tuple = bridge.global("tuple")?;
        bridge.safe_call(tuple, &[&self.0, &self.1, &self.2], Ok)
    }

    fn foreign_type_name() -> String {
        format!(
            "Tuple{{{}, {}, {}}}",
            A::foreign_type_name(),
            B::foreign_type_name(),
            C::foreign_type_name()
        )
    }
}

impl<A: Unboxable, B: Unboxable, C: Unboxable> Unboxable for (A, B, C) {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        let runtime = bridge.runtime();
        if !runtime
            .type_flags(runtime.type_of(value))
            .contains(TypeFlags::TUPLE)
        {
            return Err(mismatch::<Self>(bridge, value));
        }
        let first = field_or_mismatch::<Self>(bridge, value, "1")?;
        let second = field_or_mismatch::<Self>(bridge, value, "2")?;
        let third = field_or_mismatch::<Self>(bridge, value, "3")?;
        Ok((
            A::unbox_value(bridge, first)?,
            B::unbox_value(bridge, second)?,
            C::unbox_value(bridge, third)?,
        ))
    }
}

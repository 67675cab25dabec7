//! Typed views over foreign arrays.
//!
//! Host indices are 0-based, the foreign side is 1-based; the conversion
//! happens here and nowhere else. Every access is bounds checked against the
//! array header before the runtime is called.
use std::{fmt, marker::PhantomData, ops::Deref};

use log::debug;

use crate::{
    Boxable, Bridge, Error, GeneratorExpression, Proxy, Result, TypeFlags, Unboxable, Value,
    boxing::{self, box_sequence},
};

fn array_type_name(element: &str, rank: usize) -> String {
    if rank == 1 {
        format!("Vector{{{element}}}")
    } else {
        format!("Array{{{element}, {rank}}}")
    }
}

/// `Array{V, R}`, or any array of rank `R` when `V` is `Any`.
fn assert_array<V: Boxable>(bridge: &Bridge, value: Value, rank: usize) -> Result<()> {
    let element = V::foreign_type_name();
    let runtime = bridge.runtime();
    let found = runtime.type_of(value);
    let matches = if element == boxing::ANY {
        runtime.type_flags(found).contains(TypeFlags::ARRAY) && runtime.array_rank(value) == rank
    } else {
        let expected = bridge.global(&array_type_name(&element, rank))?;
        runtime.isa(value, expected)
    };
    if matches {
        Ok(())
    } else {
        Err(Error::TypeAssertion {
            expected: array_type_name(&element, rank),
            found: runtime.type_name(found),
        })
    }
}

/// View over a foreign `Array{V, R}`.
pub struct Array<V, const R: usize> {
    proxy: Proxy,
    _element: PhantomData<fn() -> V>,
}

impl<V, const R: usize> Clone for Array<V, R> {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.clone(),
            _element: PhantomData,
        }
    }
}

impl<V, const R: usize> fmt::Debug for Array<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("rank", &R)
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl<V: Boxable, const R: usize> Array<V, R> {
    pub fn new(proxy: Proxy) -> Result<Self> {
        assert_array::<V>(proxy.bridge(), proxy.as_raw(), R)?;
        debug!("rank {R} array view over {}", proxy.name());
        Ok(Self {
            proxy,
            _element: PhantomData,
        })
    }

    pub fn from_value(bridge: &Bridge, value: Value) -> Result<Self> {
        Self::new(Proxy::new(bridge, value, None))
    }

    #[inline]
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub fn into_proxy(self) -> Proxy {
        self.proxy
    }

    /// Extent along the 0-based `axis`, read from the array header.
    pub fn dimension_size(&self, axis: usize) -> usize {
        self.proxy
            .bridge()
            .runtime()
            .array_dimension(self.proxy.as_raw(), axis)
    }

    pub fn dimensions(&self) -> [usize; R] {
        std::array::from_fn(|axis| self.dimension_size(axis))
    }

    /// Length read from the array header, no foreign call.
    pub fn element_count(&self) -> usize {
        self.proxy
            .bridge()
            .runtime()
            .array_length(self.proxy.as_raw())
    }

    pub fn is_empty(&self) -> bool {
        self.element_count() == 0
    }

    fn check_linear(&self, index: usize) -> Result<()> {
        let length = self.element_count();
        if index >= length {
            return Err(Error::IndexOutOfRange {
                index,
                axis: None,
                length,
            });
        }
        Ok(())
    }

    /// Column-major: `sum(indices[k] * prod(dims[..k]))`, each coordinate
    /// checked against its own axis first.
    fn linear_index(&self, indices: [usize; R]) -> Result<usize> {
        let dimensions = self.dimensions();
        for (axis, (&index, &length)) in indices.iter().zip(&dimensions).enumerate() {
            if index >= length {
                return Err(Error::IndexOutOfRange {
                    index,
                    axis: Some(axis),
                    length,
                });
            }
        }
        let mut linear = 0;
        let mut stride = 1;
        for (index, length) in indices.into_iter().zip(dimensions) {
            linear += index * stride;
            stride *= length;
        }
        Ok(linear)
    }

    pub fn linear_get(&self, index: usize) -> Result<V>
    where
        V: Unboxable,
    {
        self.linear_get_as(index)
    }

    pub fn linear_get_as<T: Unboxable>(&self, index: usize) -> Result<T> {
        self.check_linear(index)?;
        let bridge = self.proxy.bridge();
        let _pause = bridge.pause();
        let element = bridge.runtime().array_ref(self.proxy.as_raw(), index);
        bridge.forward_last_exception()?;
        T::unbox_value(bridge, element)
    }

    /// The element at `index` as its own anchored proxy.
    pub fn element(&self, index: usize) -> Result<Proxy> {
        self.check_linear(index)?;
        let bridge = self.proxy.bridge();
        let _lock = bridge.lock();
        let element = bridge.runtime().array_ref(self.proxy.as_raw(), index);
        bridge.forward_last_exception()?;
        Ok(self.proxy.child(element, format!("[{index}]")))
    }

    pub fn linear_set(&self, index: usize, value: &V) -> Result<()> {
        self.check_linear(index)?;
        let bridge = self.proxy.bridge();
        let _pause = bridge.pause();
        let element = value.box_value(bridge)?;
        bridge
            .runtime()
            .array_set(self.proxy.as_raw(), index, element);
        bridge.forward_last_exception()
    }

    pub fn at(&self, indices: [usize; R]) -> Result<V>
    where
        V: Unboxable,
    {
        let index = self.linear_index(indices)?;
        self.linear_get(index)
    }

    pub fn set_at(&self, indices: [usize; R], value: &V) -> Result<()> {
        let index = self.linear_index(indices)?;
        self.linear_set(index, value)
    }

    /// Gathers the elements at `positions` into a new vector with a single
    /// `getindex` call. Every position is validated first.
    pub fn subscript(&self, positions: &[usize]) -> Result<Vector<V>> {
        let length = self.element_count();
        if let Some(&index) = positions.iter().find(|&&index| index >= length) {
            return Err(Error::IndexOutOfRange {
                index,
                axis: None,
                length,
            });
        }
        let indices = positions
            .iter()
            .map(|&index| index as i64 + 1)
            .collect::<Vec<_>>();
        let bridge = self.proxy.bridge();
        let getindex = bridge.global("getindex")?;
        let gathered = bridge.safe_call(getindex, &[&self.proxy, &indices], |value| {
            Ok(Proxy::new(bridge, value, None))
        })?;
        Vector::from_proxy(gathered)
    }

    /// [`subscript`](Self::subscript) with positions drawn from a foreign
    /// iterable.
    pub fn subscript_generator(&self, generator: &GeneratorExpression) -> Result<Vector<V>> {
        self.subscript(&generator.indices()?)
    }

    /// Restartable sequence of element accessors, bounded by the length at
    /// the time of the call.
    pub fn iter(&self) -> Elements<'_, V, R> {
        Elements {
            array: self,
            next: 0,
            end: self.element_count(),
        }
    }

    pub fn front(&self) -> Result<V>
    where
        V: Unboxable,
    {
        self.linear_get(0)
    }

    pub fn back(&self) -> Result<V>
    where
        V: Unboxable,
    {
        let last = self.element_count().checked_sub(1).ok_or(Error::IndexOutOfRange {
            index: 0,
            axis: None,
            length: 0,
        })?;
        self.linear_get(last)
    }
}

impl<V, const R: usize> Deref for Array<V, R> {
    type Target = Proxy;

    fn deref(&self) -> &Proxy {
        &self.proxy
    }
}

impl<V: Boxable, const R: usize> Boxable for Array<V, R> {
    #[inline]
    fn box_value(&self, _bridge: &Bridge) -> Result<Value> {
        Ok(self.proxy.as_raw())
    }

    fn foreign_type_name() -> String {
        array_type_name(&V::foreign_type_name(), R)
    }
}

impl<V: Boxable, const R: usize> Unboxable for Array<V, R> {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        Self::from_value(bridge, value)
    }
}

impl<'a, V: Boxable, const R: usize> IntoIterator for &'a Array<V, R> {
    type Item = Element<'a, V, R>;
    type IntoIter = Elements<'a, V, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct Elements<'a, V, const R: usize> {
    array: &'a Array<V, R>,
    next: usize,
    end: usize,
}

impl<V, const R: usize> Clone for Elements<'_, V, R> {
    fn clone(&self) -> Self {
        Self {
            array: self.array,
            next: self.next,
            end: self.end,
        }
    }
}

impl<'a, V, const R: usize> Iterator for Elements<'a, V, R> {
    type Item = Element<'a, V, R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let element = Element {
            array: self.array,
            index: self.next,
        };
        self.next += 1;
        Some(element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl<V, const R: usize> ExactSizeIterator for Elements<'_, V, R> {}

/// Accessor for one linear position; every read or write is a fresh
/// bounds-checked access.
pub struct Element<'a, V, const R: usize> {
    array: &'a Array<V, R>,
    index: usize,
}

impl<V: Boxable, const R: usize> Element<'_, V, R> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self) -> Result<V>
    where
        V: Unboxable,
    {
        self.array.linear_get(self.index)
    }

    pub fn get_as<T: Unboxable>(&self) -> Result<T> {
        self.array.linear_get_as(self.index)
    }

    pub fn set(&self, value: &V) -> Result<()> {
        self.array.linear_set(self.index, value)
    }

    pub fn proxy(&self) -> Result<Proxy> {
        self.array.element(self.index)
    }
}

/// View over a foreign `Vector{V}`, adds the growable operations.
pub struct Vector<V> {
    array: Array<V, 1>,
}

impl<V> Clone for Vector<V> {
    fn clone(&self) -> Self {
        Self {
            array: self.array.clone(),
        }
    }
}

impl<V> fmt::Debug for Vector<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Vector").field(&self.array.proxy).finish()
    }
}

impl<V: Boxable> Vector<V> {
    /// An empty `Vector{V}`.
    pub fn new(bridge: &Bridge) -> Result<Self> {
        Self::from_slice(bridge, &[])
    }

    pub fn from_slice(bridge: &Bridge, items: &[V]) -> Result<Self> {
        let _pause = bridge.pause();
        let value = box_sequence(bridge, items)?;
        Self::from_proxy(Proxy::new(bridge, value, None))
    }

    pub fn from_generator(bridge: &Bridge, generator: &GeneratorExpression) -> Result<Self>
    where
        V: Unboxable,
    {
        let items = generator
            .iter()
            .map(|element| element?.get::<V>())
            .collect::<Result<Vec<_>>>()?;
        Self::from_slice(bridge, &items)
    }

    pub fn from_proxy(proxy: Proxy) -> Result<Self> {
        Ok(Self {
            array: Array::new(proxy)?,
        })
    }

    pub fn from_value(bridge: &Bridge, value: Value) -> Result<Self> {
        Self::from_proxy(Proxy::new(bridge, value, None))
    }

    pub fn into_array(self) -> Array<V, 1> {
        self.array
    }

    fn mutate(&self, function: &str, args: &[&dyn Boxable]) -> Result<()> {
        let bridge = self.array.proxy.bridge();
        let function = bridge.global(function)?;
        bridge.safe_call(function, args, |_| Ok(()))
    }

    /// Inserts before the 0-based `position`, `position == len` appends.
    pub fn insert(&self, position: usize, value: &V) -> Result<()> {
        let length = self.element_count();
        if position > length {
            return Err(Error::IndexOutOfRange {
                index: position,
                axis: None,
                length,
            });
        }
        self.mutate(
            "insert!",
            &[&self.array.proxy, &(position as i64 + 1), value],
        )
    }

    pub fn erase(&self, position: usize) -> Result<()> {
        let length = self.element_count();
        if position >= length {
            return Err(Error::IndexOutOfRange {
                index: position,
                axis: None,
                length,
            });
        }
        self.mutate("deleteat!", &[&self.array.proxy, &(position as i64 + 1)])
    }

    pub fn push_front(&self, value: &V) -> Result<()> {
        self.mutate("pushfirst!", &[&self.array.proxy, value])
    }

    pub fn push_back(&self, value: &V) -> Result<()> {
        self.mutate("push!", &[&self.array.proxy, value])
    }
}

impl<V> Deref for Vector<V> {
    type Target = Array<V, 1>;

    fn deref(&self) -> &Array<V, 1> {
        &self.array
    }
}

impl<V: Boxable> Boxable for Vector<V> {
    #[inline]
    fn box_value(&self, _bridge: &Bridge) -> Result<Value> {
        Ok(self.array.proxy.as_raw())
    }

    fn foreign_type_name() -> String {
        array_type_name(&V::foreign_type_name(), 1)
    }
}

impl<V: Boxable> Unboxable for Vector<V> {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        Self::from_value(bridge, value)
    }
}

//! Value: a raw foreign word, opaque to the host
//!
//! The adapter decides what the bits mean. The reference [`Machine`](crate::Machine)
//! packs a heap slot index into the high half and the slot generation into the
//! low half, so a word that outlived its object is recognized as stale instead
//! of silently aliasing whatever reuses the slot.
//!
//! A `Value` is not GC safe on its own. Wrap it in a [`Proxy`](crate::Proxy)
//! before it crosses a foreign call.
use std::fmt;

const GENERATION_BITS: u64 = 32;
const GENERATION_MASK: u64 = (1 << GENERATION_BITS) - 1;

#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Value(u64);

impl Value {
    /// the word every failed foreign call returns
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// generation 0 is reserved so that no slot ever encodes to `NULL`
    #[inline]
    pub const fn from_parts(index: u32, generation: u32) -> Self {
        debug_assert!(generation != 0, "generation 0 is reserved for NULL");
        Self(((index as u64) << GENERATION_BITS) | generation as u64)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        (self.0 >> GENERATION_BITS) as u32
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 & GENERATION_MASK) as u32
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `None` for `NULL`, so results can be chained with `?`-style combinators
    #[inline]
    pub fn non_null(self) -> Option<Self> {
        if self.is_null() { None } else { Some(self) }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("Value(NULL)");
        }
        write!(f, "Value({}@{})", self.index(), self.generation())
    }
}

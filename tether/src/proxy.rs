//! Proxy: a reference counted, anchored handle to one foreign value.
//!
//! The value is anchored under its binding symbol when the first proxy is
//! created and unanchored when the last clone drops. Proxies reached through a
//! field or an element keep a weak link to their owner, only to print the path
//! they were reached through.
use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{Boxable, Bridge, Result, Type, Unboxable, Value, boxing};

struct Origin {
    owner: Weak<ProxyValue>,
    /// `.field` or `[index]`
    segment: String,
}

pub(crate) struct ProxyValue {
    bridge: Bridge,
    value: Value,
    symbol: String,
    origin: Option<Origin>,
}

impl Drop for ProxyValue {
    fn drop(&mut self) {
        self.bridge.release(&self.symbol);
    }
}

impl ProxyValue {
    fn name(&self) -> String {
        match &self.origin {
            None => self.symbol.clone(),
            Some(origin) => match origin.owner.upgrade() {
                Some(owner) => format!("{}{}", owner.name(), origin.segment),
                None => format!("<expired>{}", origin.segment),
            },
        }
    }
}

#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyValue>,
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proxy({} = {:?})", self.name(), self.inner.value)
    }
}

impl Proxy {
    /// Anchors `value` under `symbol`, or under a fresh symbol from the
    /// bridge counter.
    ///
    /// An explicit symbol already bound by a live proxy is suffixed, see
    /// [`binding`](Self::binding) for the one actually used.
    pub fn new(bridge: &Bridge, value: Value, symbol: Option<&str>) -> Self {
        let symbol = symbol.map_or_else(|| bridge.next_symbol(), str::to_string);
        let symbol = bridge.anchor(value, symbol);
        Self {
            inner: Arc::new(ProxyValue {
                bridge: bridge.clone(),
                value,
                symbol,
                origin: None,
            }),
        }
    }

    /// A proxy reached from `self` through `segment`, anchored on its own.
    pub(crate) fn child(&self, value: Value, segment: String) -> Self {
        let bridge = self.bridge();
        let symbol = bridge.anchor(value, bridge.next_symbol());
        Self {
            inner: Arc::new(ProxyValue {
                bridge: bridge.clone(),
                value,
                symbol,
                origin: Some(Origin {
                    owner: Arc::downgrade(&self.inner),
                    segment,
                }),
            }),
        }
    }

    /// The raw value, valid as long as this proxy (or a clone) lives.
    #[inline]
    pub fn as_raw(&self) -> Value {
        self.inner.value
    }

    #[inline]
    pub fn bridge(&self) -> &Bridge {
        &self.inner.bridge
    }

    pub fn field(&self, name: &str) -> Result<Proxy> {
        let bridge = self.bridge();
        let _lock = bridge.lock();
        let value = bridge.runtime().get_field(self.as_raw(), name);
        bridge.forward_last_exception()?;
        Ok(self.child(value, format!(".{name}")))
    }

    pub fn set_field(&self, name: &str, value: &dyn Boxable) -> Result<()> {
        let bridge = self.bridge();
        let _pause = bridge.pause();
        let value = value.box_value(bridge)?;
        bridge.runtime().set_field(self.as_raw(), name, value);
        bridge.forward_last_exception()
    }

    pub fn get<T: Unboxable>(&self) -> Result<T> {
        boxing::unbox(self.bridge(), self.as_raw())
    }

    pub fn call(&self, args: &[&dyn Boxable]) -> Result<Proxy> {
        self.bridge().call(self, args)
    }

    pub fn type_of(&self) -> Result<Type> {
        let bridge = self.bridge();
        let _lock = bridge.lock();
        Type::from_value(bridge, bridge.runtime().type_of(self.as_raw()))
    }

    pub fn isa(&self, ty: &Type) -> bool {
        let bridge = self.bridge();
        let _lock = bridge.lock();
        bridge.runtime().isa(self.as_raw(), ty.as_raw())
    }

    /// Binding symbol followed by the path this proxy was reached through,
    /// e.g. `#tether#4.data[2]`.
    pub fn name(&self) -> String {
        self.inner.name()
    }

    #[inline]
    pub fn binding(&self) -> &str {
        &self.inner.symbol
    }

    /// Number of live clones sharing this value.
    #[inline]
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Boxable for Proxy {
    #[inline]
    fn box_value(&self, _bridge: &Bridge) -> Result<Value> {
        Ok(self.as_raw())
    }

    fn foreign_type_name() -> String {
        boxing::ANY.to_string()
    }
}

impl Unboxable for Proxy {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        Ok(Proxy::new(bridge, value, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bridge, stress_bridge};

    #[test]
    fn clones_share_one_anchor() {
        let bridge = bridge();
        let before = bridge.anchored_count();
        let proxy = bridge.create(&"shared").unwrap();
        let copy = proxy.clone();
        assert_eq!(proxy.use_count(), 2);
        assert_eq!(bridge.anchored_count(), before + 1);
        drop(proxy);
        assert_eq!(copy.use_count(), 1);
        assert_eq!(copy.get::<String>().unwrap(), "shared");
        drop(copy);
        assert_eq!(bridge.anchored_count(), before);
    }

    #[test]
    fn anchored_values_survive_collection() {
        let bridge = stress_bridge();
        let proxy = bridge.eval("[\"a\", \"b\"]").unwrap();
        let copy = proxy.clone();
        drop(proxy);
        bridge.collect_garbage();
        // stress mode collects again on entry of every evaluation
        bridge.eval("1 + 1").unwrap();
        assert!(bridge.runtime().is_live(copy.as_raw()));
        assert_eq!(copy.get::<Vec<String>>().unwrap(), ["a", "b"]);
    }

    #[test]
    fn dropped_proxies_become_collectible() {
        let bridge = bridge();
        let proxy = bridge.eval("[1, 2]").unwrap();
        let raw = proxy.as_raw();
        drop(proxy);
        bridge.collect_garbage();
        assert!(!bridge.runtime().is_live(raw));
    }

    #[test]
    fn explicit_symbols_are_used_as_bindings() {
        let bridge = bridge();
        let value = bridge.runtime().box_string("named");
        let proxy = Proxy::new(&bridge, value, Some("greeting"));
        assert_eq!(proxy.binding(), "greeting");
        assert_eq!(proxy.name(), "greeting");
        bridge.collect_garbage();
        assert_eq!(proxy.get::<String>().unwrap(), "named");
    }

    #[test]
    fn repeated_explicit_symbols_get_distinct_bindings() {
        let bridge = bridge();
        let before = bridge.anchored_count();
        let first = Proxy::new(&bridge, bridge.runtime().box_string("first"), Some("shared"));
        let second = Proxy::new(&bridge, bridge.runtime().box_string("second"), Some("shared"));
        assert_eq!(first.binding(), "shared");
        assert_ne!(second.binding(), first.binding());
        assert!(second.binding().starts_with("shared#"));
        assert_eq!(bridge.anchored_count(), before + 2);

        drop(first);
        assert_eq!(bridge.anchored_count(), before + 1);
        bridge.collect_garbage();
        assert!(bridge.runtime().is_live(second.as_raw()));
        assert_eq!(second.get::<String>().unwrap(), "second");

        let third = Proxy::new(&bridge, bridge.runtime().box_string("third"), Some("shared"));
        assert_eq!(third.binding(), "shared");
    }

    #[test]
    fn fields_outlive_their_owner() {
        let bridge = bridge();
        let pair = bridge.eval("Pair(\"key\", [1, 2, 3])").unwrap();
        let second = pair.field("second").unwrap();
        assert_eq!(second.name(), format!("{}.second", pair.binding()));
        drop(pair);
        bridge.collect_garbage();
        assert!(second.name().starts_with("<expired>"));
        assert_eq!(second.get::<Vec<i64>>().unwrap(), [1, 2, 3]);
    }

    #[test]
    fn mutable_fields_can_be_set() {
        let bridge = bridge();
        bridge
            .eval("mutable struct Counter\n  count::Int64\nend")
            .unwrap();
        let counter = bridge.eval("Counter(1)").unwrap();
        counter.set_field("count", &5i32).unwrap();
        assert_eq!(counter.field("count").unwrap().get::<i64>().unwrap(), 5);

        let err = counter.set_field("count", &"five").unwrap_err();
        assert!(err.is_foreign());
        let err = counter.field("missing").unwrap_err();
        assert!(err.is_foreign());
    }

    #[test]
    fn calls_and_types() {
        let bridge = bridge();
        let length = bridge.function("length").unwrap();
        let result = length.call(&[&vec![1u8, 2, 3]]).unwrap();
        assert_eq!(result.get::<u64>().unwrap(), 3);
        let ty = result.type_of().unwrap();
        assert_eq!(ty.name(), "Int64");
        assert!(result.isa(&ty));
        assert!(!result.isa(&bridge.resolve_type("String").unwrap()));
    }
}

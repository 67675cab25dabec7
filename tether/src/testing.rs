//! Bridges over a fresh [`Machine`] for the unit tests.
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    BitsKind, Bridge, BridgeCreateInfo, Machine, MachineCreateInfo, Runtime, TypeFlags, Value,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn bridge() -> Bridge {
    init_logging();
    Bridge::with_machine(MachineCreateInfo::default())
}

/// Collects at every safepoint, anything left unanchored disappears.
pub fn stress_bridge() -> Bridge {
    init_logging();
    Bridge::with_machine(MachineCreateInfo {
        stress_collection: Some(true),
        ..Default::default()
    })
}

/// A bridge whose runtime counts evaluations, calls and field accesses.
pub fn counting_bridge() -> (Bridge, Arc<AtomicUsize>) {
    init_logging();
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = CountingRuntime {
        inner: Machine::default(),
        calls: calls.clone(),
    };
    (Bridge::new(runtime, BridgeCreateInfo::default()), calls)
}

pub struct CountingRuntime {
    inner: Machine,
    calls: Arc<AtomicUsize>,
}

impl CountingRuntime {
    #[inline]
    fn count(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[rustfmt::skip]
impl Runtime for CountingRuntime {
    fn evaluate(&self, source: &str) -> Value { self.count(); self.inner.evaluate(source) }
    fn call(&self, function: Value, args: &[Value]) -> Value { self.count(); self.inner.call(function, args) }
    fn get_field(&self, value: Value, field: &str) -> Value { self.count(); self.inner.get_field(value, field) }
    fn set_field(&self, value: Value, field: &str, new_value: Value) { self.count(); self.inner.set_field(value, field, new_value) }

    fn pause_collection(&self) { self.inner.pause_collection() }
    fn resume_collection(&self) { self.inner.resume_collection() }
    fn collect_garbage(&self) { self.inner.collect_garbage() }
    fn anchor(&self, value: Value, symbol: &str) { self.inner.anchor(value, symbol) }
    fn unanchor(&self, symbol: &str) { self.inner.unanchor(symbol) }
    fn last_exception(&self) -> Option<Value> { self.inner.last_exception() }
    fn clear_exception(&self) { self.inner.clear_exception() }
    fn exception_message(&self, exception: Value) -> Option<String> { self.inner.exception_message(exception) }

    fn is_live(&self, value: Value) -> bool { self.inner.is_live(value) }
    fn type_of(&self, value: Value) -> Value { self.inner.type_of(value) }
    fn isa(&self, value: Value, ty: Value) -> bool { self.inner.isa(value, ty) }
    fn is_subtype(&self, sub: Value, sup: Value) -> bool { self.inner.is_subtype(sub, sup) }
    fn is_identical(&self, a: Value, b: Value) -> bool { self.inner.is_identical(a, b) }
    fn type_name(&self, ty: Value) -> String { self.inner.type_name(ty) }
    fn type_flags(&self, ty: Value) -> TypeFlags { self.inner.type_flags(ty) }
    fn supertype(&self, ty: Value) -> Value { self.inner.supertype(ty) }
    fn singleton_instance(&self, ty: Value) -> Option<Value> { self.inner.singleton_instance(ty) }

    fn array_rank(&self, array: Value) -> usize { self.inner.array_rank(array) }
    fn array_dimension(&self, array: Value, axis: usize) -> usize { self.inner.array_dimension(array, axis) }
    fn array_length(&self, array: Value) -> usize { self.inner.array_length(array) }
    fn array_ref(&self, array: Value, index: usize) -> Value { self.inner.array_ref(array, index) }
    fn array_set(&self, array: Value, index: usize, element: Value) { self.inner.array_set(array, index, element) }

    fn nothing(&self) -> Value { self.inner.nothing() }
    fn box_bits(&self, kind: BitsKind, bits: u64) -> Value { self.inner.box_bits(kind, bits) }
    fn unbox_bits(&self, value: Value) -> Option<(BitsKind, u64)> { self.inner.unbox_bits(value) }
    fn box_string(&self, text: &str) -> Value { self.inner.box_string(text) }
    fn unbox_string(&self, value: Value) -> Option<String> { self.inner.unbox_string(value) }
    fn box_symbol(&self, name: &str) -> Value { self.inner.box_symbol(name) }
    fn unbox_symbol(&self, value: Value) -> Option<String> { self.inner.unbox_symbol(value) }
}

//! Type: read-only view over a foreign datatype.
//!
//! Classification predicates read the descriptor flags directly. Subtyping
//! and identity are relayed to the runtime, never recomputed host-side.
use std::{cmp::Ordering, fmt, ops::Deref};

use crate::{
    Boxable, Bridge, Error, Proxy, Result, TypeFlags, Unboxable, Value,
    boxing::{self, Symbol},
};

#[derive(Clone)]
pub struct Type {
    proxy: Proxy,
}

impl Type {
    /// Asserts that `proxy` references a type.
    pub fn new(proxy: Proxy) -> Result<Self> {
        let bridge = proxy.bridge();
        let type_type = bridge.global("Type")?;
        let runtime = bridge.runtime();
        if !runtime.isa(proxy.as_raw(), type_type) {
            return Err(Error::TypeAssertion {
                expected: "Type".to_string(),
                found: runtime.type_name(runtime.type_of(proxy.as_raw())),
            });
        }
        Ok(Self { proxy })
    }

    pub fn from_value(bridge: &Bridge, value: Value) -> Result<Self> {
        Self::new(Proxy::new(bridge, value, None))
    }

    #[inline]
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    #[inline]
    fn flags(&self) -> TypeFlags {
        self.proxy.bridge().runtime().type_flags(self.as_raw())
    }

    pub fn name(&self) -> String {
        self.proxy.bridge().runtime().type_name(self.as_raw())
    }

    /// One hop up the hierarchy, `Any` is its own supertype.
    pub fn supertype(&self) -> Result<Type> {
        let bridge = self.proxy.bridge();
        let _lock = bridge.lock();
        Type::from_value(bridge, bridge.runtime().supertype(self.as_raw()))
    }

    /// `reflection(self)` collected into a host vector
    fn reflect<T: Unboxable>(&self, reflection: &str) -> Result<Vec<T>> {
        let bridge = self.proxy.bridge();
        let _pause = bridge.pause();
        let reflection = bridge.global(reflection)?;
        let collect = bridge.global("collect")?;
        let tuple = bridge.safe_call(reflection, &[&self.proxy], Ok)?;
        bridge.safe_call(collect, &[&tuple], |elements| {
            Vec::<T>::unbox_value(bridge, elements)
        })
    }

    fn count(&self, reflection: &str) -> Result<usize> {
        let bridge = self.proxy.bridge();
        let function = bridge.global(reflection)?;
        bridge.safe_call(function, &[&self.proxy], |count| {
            usize::unbox_value(bridge, count)
        })
    }

    /// Declared field names with their field types, in declaration order.
    pub fn fields(&self) -> Result<Vec<(String, Type)>> {
        let names = self.reflect::<Symbol>("fieldnames")?;
        let types = self.reflect::<Type>("fieldtypes")?;
        Ok(names.into_iter().map(|name| name.0).zip(types).collect())
    }

    pub fn field_count(&self) -> Result<usize> {
        self.count("fieldcount")
    }

    /// Parameter names with their values: the bound type, `Int64` for an
    /// integer parameter such as an array rank, or `Any` when unbound.
    pub fn parameters(&self) -> Result<Vec<(String, Type)>> {
        let bridge = self.proxy.bridge();
        let _pause = bridge.pause();
        let names = self.reflect::<Symbol>("typeparameternames")?;
        let values = self.reflect::<Value>("typeparameters")?;
        let type_type = bridge.global("Type")?;
        let any = bridge.global(boxing::ANY)?;
        let runtime = bridge.runtime();
        names
            .into_iter()
            .zip(values)
            .map(|(name, value)| {
                let ty = if runtime.is_identical(value, runtime.nothing()) {
                    any
                } else if runtime.isa(value, type_type) {
                    value
                } else {
                    runtime.type_of(value)
                };
                Ok((name.0, Type::from_value(bridge, ty)?))
            })
            .collect()
    }

    pub fn parameter_count(&self) -> Result<usize> {
        self.count("nparameters")
    }

    pub fn singleton_instance(&self) -> Option<Proxy> {
        let bridge = self.proxy.bridge();
        let _lock = bridge.lock();
        let instance = bridge.runtime().singleton_instance(self.as_raw())?;
        Some(Proxy::new(bridge, instance, None))
    }

    pub fn is_subtype_of(&self, other: &Type) -> bool {
        self.proxy
            .bridge()
            .runtime()
            .is_subtype(self.as_raw(), other.as_raw())
    }

    pub fn is_supertype_of(&self, other: &Type) -> bool {
        other.is_subtype_of(self)
    }

    pub fn is_same_as(&self, other: &Type) -> bool {
        self.proxy
            .bridge()
            .runtime()
            .is_identical(self.as_raw(), other.as_raw())
    }

    pub fn is_primitive(&self) -> bool {
        self.flags().contains(TypeFlags::PRIMITIVE)
    }

    pub fn is_struct_type(&self) -> bool {
        self.flags().contains(TypeFlags::STRUCT)
    }

    pub fn is_isbits(&self) -> bool {
        self.flags().contains(TypeFlags::ISBITS)
    }

    pub fn is_singleton(&self) -> bool {
        self.proxy
            .bridge()
            .runtime()
            .singleton_instance(self.as_raw())
            .is_some()
    }

    pub fn is_abstract_type(&self) -> bool {
        self.flags().contains(TypeFlags::ABSTRACT)
    }

    pub fn is_abstract_ref_type(&self) -> bool {
        self.flags().contains(TypeFlags::ABSTRACT_REF)
    }

    pub fn is_array_type(&self) -> bool {
        self.flags().contains(TypeFlags::ARRAY)
    }

    pub fn is_opaque_closure_type(&self) -> bool {
        self.flags().contains(TypeFlags::OPAQUE_CLOSURE)
    }

    pub fn is_tuple_type(&self) -> bool {
        self.flags().contains(TypeFlags::TUPLE)
    }

    pub fn is_named_tuple_type(&self) -> bool {
        self.flags().contains(TypeFlags::NAMED_TUPLE)
    }

    pub fn is_type_type(&self) -> bool {
        self.flags().contains(TypeFlags::TYPE_TYPE)
    }

    pub fn is_union_type(&self) -> bool {
        self.flags().contains(TypeFlags::UNION)
    }

    pub fn is_unionall_type(&self) -> bool {
        self.flags().contains(TypeFlags::UNIONALL)
    }

    pub fn is_mutable(&self) -> bool {
        self.flags().contains(TypeFlags::MUTABLE)
    }
}

impl Deref for Type {
    type Target = Proxy;

    fn deref(&self) -> &Proxy {
        &self.proxy
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_as(other)
    }
}

/// the subtype partial order
impl PartialOrd for Type {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_same_as(other) {
            Some(Ordering::Equal)
        } else if self.is_subtype_of(other) {
            Some(Ordering::Less)
        } else if self.is_supertype_of(other) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.name())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Boxable for Type {
    #[inline]
    fn box_value(&self, _bridge: &Bridge) -> Result<Value> {
        Ok(self.as_raw())
    }

    fn foreign_type_name() -> String {
        "Type".to_string()
    }
}

impl Unboxable for Type {
    fn unbox_value(bridge: &Bridge, value: Value) -> Result<Self> {
        Type::from_value(bridge, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bridge, counting_bridge};

    #[test]
    fn non_types_are_rejected() {
        let bridge = bridge();
        let value = bridge.eval("1").unwrap();
        let err = Type::new(value).unwrap_err();
        assert!(matches!(
            err,
            Error::TypeAssertion { ref expected, ref found }
                if expected == "Type" && found == "Int64"
        ));
    }

    #[test]
    fn hierarchy_is_relayed() {
        let bridge = bridge();
        let int = bridge.resolve_type("Int64").unwrap();
        let signed = int.supertype().unwrap();
        assert_eq!(signed.name(), "Signed");
        let number = bridge.resolve_type("Number").unwrap();
        let string = bridge.resolve_type("String").unwrap();
        assert!(int.is_subtype_of(&number));
        assert!(number.is_supertype_of(&int));
        assert!(int < number);
        assert!(number > signed);
        assert_eq!(int.partial_cmp(&string), None);
        assert_eq!(int, bridge.resolve_type("Int").unwrap());
        assert_ne!(int, string);
        let any = bridge.resolve_type("Any").unwrap();
        assert_eq!(any.supertype().unwrap(), any);
    }

    #[test]
    fn parametric_types_are_invariant() {
        let bridge = bridge();
        let ints = bridge.resolve_type("Vector{Int64}").unwrap();
        let numbers = bridge.resolve_type("Vector{Number}").unwrap();
        assert!(!ints.is_subtype_of(&numbers));
        assert!(ints.is_subtype_of(&bridge.resolve_type("Vector").unwrap()));
    }

    #[test]
    fn fields_and_parameters() {
        let bridge = bridge();
        let pair = bridge.resolve_type("Pair{Int64, String}").unwrap();
        let fields = pair.fields().unwrap();
        let names: Vec<_> = fields.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(fields[1].1.name(), "String");
        assert_eq!(pair.field_count().unwrap(), 2);

        let parameters = pair.parameters().unwrap();
        assert_eq!(parameters[0].0, "A");
        assert_eq!(parameters[0].1.name(), "Int64");
        assert_eq!(pair.parameter_count().unwrap(), 2);

        let vector = bridge.resolve_type("Vector").unwrap();
        let parameters = vector.parameters().unwrap();
        assert_eq!(parameters[0], ("T".to_string(), bridge.resolve_type("Any").unwrap()));
        assert_eq!(parameters[1].1.name(), "Int64");
    }

    #[test]
    fn predicates_read_the_descriptor() {
        let (bridge, calls) = counting_bridge();
        let float = bridge.resolve_type("Float64").unwrap();
        let real = bridge.resolve_type("Real").unwrap();
        let vector = bridge.resolve_type("Vector{String}").unwrap();
        let tuple = bridge.resolve_type("Tuple{Int64, Bool}").unwrap();
        let union = bridge.resolve_type("Union{Nothing, Int64}").unwrap();
        let nothing = bridge.resolve_type("Nothing").unwrap();
        let type_type = bridge.resolve_type("Type").unwrap();
        let before = calls.load(std::sync::atomic::Ordering::Relaxed);

        assert!(float.is_primitive() && float.is_isbits() && !float.is_struct_type());
        assert!(real.is_abstract_type() && !real.is_primitive());
        assert!(vector.is_array_type() && vector.is_mutable() && !vector.is_isbits());
        assert!(tuple.is_tuple_type() && !tuple.is_unionall_type());
        assert!(union.is_union_type());
        assert!(nothing.is_singleton() && !float.is_singleton());
        assert!(type_type.is_type_type());
        assert!(!vector.is_named_tuple_type() && !vector.is_opaque_closure_type());
        assert!(!float.is_abstract_ref_type());
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), before);

        let instance = nothing.singleton_instance().unwrap();
        assert!(instance.get::<()>().is_ok());
        assert!(float.singleton_instance().is_none());
    }

    #[test]
    fn usertype_structs_report_mutability() {
        let bridge = bridge();
        bridge
            .eval("struct Point\n  x::Float64\n  y::Float64\nend")
            .unwrap();
        let point = bridge.resolve_type("Point").unwrap();
        assert!(point.is_struct_type() && point.is_isbits() && !point.is_mutable());
        assert_eq!(point.field_count().unwrap(), 2);
    }
}

use log::trace;

use crate::{ExceptionKind, ExecutionResult, MachineState, Thrown, Value};

mod array;
mod collection;
mod construct;
mod general;
mod reflection;
mod vector;

pub(crate) use construct::{construct, convert_bits};

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimitiveMessageIndex(usize);

pub type PrimitiveFunction = fn(&mut PrimitiveContext) -> ExecutionResult;

/// A builtin function, `inputs` is the accepted argument count range.
#[derive(Debug, Copy, Clone)]
pub struct PrimitiveMessage<'a> {
    pub name: &'a str,
    pub min_inputs: usize,
    /// `None` for variadic builtins
    pub max_inputs: Option<usize>,
    pub ptr: PrimitiveFunction,
}

impl<'a> PrimitiveMessage<'a> {
    pub const fn new(name: &'a str, inputs: usize, ptr: PrimitiveFunction) -> Self {
        Self {
            name,
            min_inputs: inputs,
            max_inputs: Some(inputs),
            ptr,
        }
    }

    pub const fn ranged(name: &'a str, min: usize, max: usize, ptr: PrimitiveFunction) -> Self {
        Self {
            name,
            min_inputs: min,
            max_inputs: Some(max),
            ptr,
        }
    }

    pub const fn variadic(name: &'a str, min: usize, ptr: PrimitiveFunction) -> Self {
        Self {
            name,
            min_inputs: min,
            max_inputs: None,
            ptr,
        }
    }

    #[inline]
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_inputs && self.max_inputs.is_none_or(|max| count <= max)
    }
}

pub struct PrimitiveContext<'m, 'arg> {
    pub state: &'m mut MachineState,
    pub name: &'static str,
    pub arguments: &'arg [Value],
}

impl PrimitiveContext<'_, '_> {
    pub fn method_error(&self) -> Thrown {
        let types = self
            .arguments
            .iter()
            .map(|&arg| format!("::{}", self.state.type_display(self.state.type_of(arg))))
            .collect::<Vec<_>>();
        Thrown::raise(
            ExceptionKind::Method,
            format!("MethodError: no method matching {}({})", self.name, types.join(", ")),
        )
    }
}

/// The first `N` arguments, the arity check already guaranteed they exist.
#[inline]
pub fn inputs<const N: usize>(ctx: &PrimitiveContext) -> [Value; N] {
    std::array::from_fn(|i| ctx.arguments[i])
}

#[rustfmt::skip]
pub const PRIMITIVES: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("typeof", 1, general::type_of),
    PrimitiveMessage::new("isa", 2, general::isa),
    PrimitiveMessage::new("supertype", 1, general::supertype),
    PrimitiveMessage::new("===", 2, general::identical),
    PrimitiveMessage::new("==", 2, general::equal),
    PrimitiveMessage::new("isequal", 2, general::equal),
    PrimitiveMessage::ranged("-", 1, 2, general::sub),
    PrimitiveMessage::new("+", 2, general::add),
    PrimitiveMessage::new("*", 2, general::mul),
    PrimitiveMessage::new("/", 2, general::div),
    PrimitiveMessage::ranged("error", 0, 1, general::error),
    PrimitiveMessage::new("throw", 1, general::throw),
    PrimitiveMessage::variadic("tuple", 0, general::tuple),
    PrimitiveMessage::variadic("string", 0, general::string),
    PrimitiveMessage::new("getfield", 2, general::getfield),
    PrimitiveMessage::new("setfield!", 3, general::setfield),
    PrimitiveMessage::new("fieldnames", 1, reflection::fieldnames),
    PrimitiveMessage::new("fieldtypes", 1, reflection::fieldtypes),
    PrimitiveMessage::new("fieldcount", 1, reflection::fieldcount),
    PrimitiveMessage::new("typeparameters", 1, reflection::typeparameters),
    PrimitiveMessage::new("typeparameternames", 1, reflection::typeparameternames),
    PrimitiveMessage::new("nparameters", 1, reflection::nparameters),
    PrimitiveMessage::ranged("size", 1, 2, array::size),
    PrimitiveMessage::new("ndims", 1, array::ndims),
    PrimitiveMessage::variadic("getindex", 1, array::getindex),
    PrimitiveMessage::variadic("setindex!", 2, array::setindex),
    PrimitiveMessage::variadic("reshape", 2, array::reshape),
    PrimitiveMessage::variadic("zeros", 0, array::zeros),
    PrimitiveMessage::variadic("push!", 1, vector::push),
    PrimitiveMessage::new("pushfirst!", 2, vector::pushfirst),
    PrimitiveMessage::new("insert!", 3, vector::insert),
    PrimitiveMessage::new("deleteat!", 2, vector::deleteat),
    PrimitiveMessage::new("pop!", 1, vector::pop),
    PrimitiveMessage::new("length", 1, collection::length),
    PrimitiveMessage::ranged("iterate", 1, 2, collection::iterate),
    PrimitiveMessage::new("collect", 1, collection::collect),
    PrimitiveMessage::new("keys", 1, collection::keys),
    PrimitiveMessage::new("values", 1, collection::values),
    PrimitiveMessage::new("haskey", 2, collection::haskey),
];

pub fn get_primitive(id: PrimitiveMessageIndex) -> PrimitiveMessage<'static> {
    debug_assert!(id.0 < PRIMITIVES.len());
    PRIMITIVES[id.0]
}

pub fn call_primitive(
    state: &mut MachineState,
    index: usize,
    arguments: &[Value],
) -> ExecutionResult {
    let primitive = get_primitive(PrimitiveMessageIndex(index));
    let mut ctx = PrimitiveContext {
        state,
        name: primitive.name,
        arguments,
    };
    if !primitive.accepts(arguments.len()) {
        return Err(ctx.method_error());
    }
    trace!("builtin {} with {} arguments", primitive.name, arguments.len());
    (primitive.ptr)(&mut ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_names_are_unique() {
        let mut names: Vec<_> = PRIMITIVES.iter().map(|p| p.name).collect();
        names.sort_unstable();
        let count = names.len();
        names.dedup();
        assert_eq!(count, names.len());
    }

    #[test]
    fn arity_ranges() {
        let size = PRIMITIVES.iter().find(|p| p.name == "size").unwrap();
        assert!(!size.accepts(0));
        assert!(size.accepts(1));
        assert!(size.accepts(2));
        assert!(!size.accepts(3));
        let push = PRIMITIVES.iter().find(|p| p.name == "push!").unwrap();
        assert!(push.accepts(5));
    }
}

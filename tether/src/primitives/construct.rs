use crate::{
    ArrayObject, BitsKind, DictObject, ExceptionKind, ExecutionResult, MachineState, Object,
    Thrown, TypeFlags, TypeParam, Value,
};

/// Calls a type: constructors for arrays, dicts, pairs, ranges, structs and
/// conversions into the primitive number types.
pub(crate) fn construct(state: &mut MachineState, ty: Value, args: &[Value]) -> ExecutionResult {
    for &arg in args {
        state.object(arg)?;
    }
    let root = state.root_type(ty);
    let Some(data) = state.datatype(ty).cloned() else {
        return Err(state.type_error("Type", ty));
    };

    if root == state.types.array {
        return construct_array(state, ty, args);
    }
    if root == state.types.dict {
        if !args.is_empty() {
            return Err(no_method(state, ty, args));
        }
        let ty = match data.parameters[..] {
            [TypeParam::Unbound, TypeParam::Unbound] => {
                let any = TypeParam::Type(state.types.any);
                state.apply_type(ty, &[any, any])?
            }
            _ if data.has_unbound_parameters() => return Err(no_method(state, ty, args)),
            _ => ty,
        };
        return Ok(state.heap.allocate(ty, Object::Dict(DictObject::default())));
    }
    if root == state.types.pair {
        let [first, second] = *args else {
            return Err(no_method(state, ty, args));
        };
        let ty = match data.parameters[..] {
            [TypeParam::Unbound, TypeParam::Unbound] => {
                let params = [
                    TypeParam::Type(state.type_of(first)),
                    TypeParam::Type(state.type_of(second)),
                ];
                state.apply_type(ty, &params)?
            }
            _ if data.has_unbound_parameters() => return Err(no_method(state, ty, args)),
            _ => ty,
        };
        return construct_struct(state, ty, args);
    }
    if let Some(kind) = data.bits {
        let [value] = *args else {
            return Err(no_method(state, ty, args));
        };
        return convert_bits(state, kind, value);
    }
    if let Some(instance) = data.instance {
        if args.is_empty() {
            return Ok(instance);
        }
    }
    if ty == state.types.string {
        if let [value] = *args {
            if let Some(name) = state.symbol_of(value) {
                return Ok(state.alloc_string(&name));
            }
        }
        return Err(no_method(state, ty, args));
    }
    if data.flags.contains(TypeFlags::STRUCT)
        && !data.is_abstract()
        && !data.has_unbound_parameters()
    {
        return construct_struct(state, ty, args);
    }
    if data.is_abstract() {
        return Err(Thrown::raise(
            ExceptionKind::Method,
            format!(
                "MethodError: no constructors have been defined for abstract type {}",
                state.type_display(ty)
            ),
        ));
    }
    Err(no_method(state, ty, args))
}

fn no_method(state: &MachineState, ty: Value, args: &[Value]) -> Thrown {
    let types = args
        .iter()
        .map(|&arg| format!("::{}", state.type_display(state.type_of(arg))))
        .collect::<Vec<_>>();
    Thrown::raise(
        ExceptionKind::Method,
        format!(
            "MethodError: no method matching {}({})",
            state.type_display(ty),
            types.join(", ")
        ),
    )
}

fn construct_struct(state: &mut MachineState, ty: Value, args: &[Value]) -> ExecutionResult {
    let field_types = state
        .datatype(ty)
        .map(|data| data.field_types.clone())
        .unwrap_or_default();
    if field_types.len() != args.len() {
        return Err(no_method(state, ty, args));
    }
    let fields = field_types
        .iter()
        .zip(args)
        .map(|(&field_type, &arg)| state.coerce(field_type, arg))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(state.alloc_struct(ty, fields))
}

/// `Array{T,N}(undef, dims...)` and `Vector{T}()`
fn construct_array(state: &mut MachineState, ty: Value, args: &[Value]) -> ExecutionResult {
    let params = state
        .datatype(ty)
        .map(|data| data.parameters.clone())
        .unwrap_or_default();
    let TypeParam::Type(element) = params[0] else {
        return Err(no_method(state, ty, args));
    };

    let dims = match args.split_first() {
        None => vec![0],
        Some((&first, rest)) if first == state.undef() => dims_of(state, rest)?,
        Some(_) => return Err(no_method(state, ty, args)),
    };
    let ty = match params[1] {
        TypeParam::Int(rank) if rank as usize == dims.len() => ty,
        TypeParam::Unbound => state.apply_type(ty, &[TypeParam::Int(dims.len() as i64)])?,
        _ => return Err(no_method(state, ty, args)),
    };

    let len: usize = dims.iter().product();
    let data = (0..len).map(|_| state.default_element(element)).collect();
    Ok(state.alloc_array(ty, ArrayObject { dims, data }))
}

fn dims_of(state: &MachineState, args: &[Value]) -> Result<Vec<usize>, Thrown> {
    let values = match args {
        [single] => match state.object(*single)? {
            Object::Tuple(elements) => elements.clone(),
            _ => vec![*single],
        },
        _ => args.to_vec(),
    };
    values
        .iter()
        .map(|&v| {
            let n = state.int_of(v)?;
            usize::try_from(n).map_err(|_| {
                Thrown::raise(
                    ExceptionKind::Argument,
                    format!("invalid Array dimensions: {n}"),
                )
            })
        })
        .collect()
}

fn integer_range(kind: BitsKind) -> (i128, i128) {
    match kind {
        BitsKind::Bool => (0, 1),
        kind if kind.is_signed() => {
            let bits = kind.size_in_bits();
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        }
        kind => (0, (1i128 << kind.size_in_bits()) - 1),
    }
}

enum Number {
    Integer(i128),
    Float(f64),
}

/// Converts a number into `kind`, raising `InexactError` when the value is
/// not representable.
pub(crate) fn convert_bits(
    state: &mut MachineState,
    kind: BitsKind,
    value: Value,
) -> ExecutionResult {
    let Some(source) = state.bits_of(value) else {
        return Err(state.type_error(kind.type_name(), value));
    };
    if source.kind == kind {
        return Ok(value);
    }
    let number = match source.kind {
        BitsKind::Float32 | BitsKind::Float64 => {
            Number::Float(state.float_of(value).unwrap_or_default())
        }
        source_kind if source_kind.is_unsigned() || source_kind == BitsKind::Char => {
            Number::Integer(source.bits as i128)
        }
        source_kind => Number::Integer(source_kind.sign_extend(source.bits) as i128),
    };
    let inexact = || {
        Thrown::raise(
            ExceptionKind::Inexact,
            format!("InexactError: {}({})", kind.type_name(), state.repr(value)),
        )
    };

    let bits = match (kind, number) {
        (BitsKind::Float64, Number::Integer(n)) => (n as f64).to_bits(),
        (BitsKind::Float64, Number::Float(f)) => f.to_bits(),
        (BitsKind::Float32, Number::Integer(n)) => (n as f32).to_bits() as u64,
        (BitsKind::Float32, Number::Float(f)) => (f as f32).to_bits() as u64,
        (BitsKind::Char, Number::Integer(n)) => {
            match u32::try_from(n).ok().and_then(char::from_u32) {
                Some(c) => c as u64,
                None => return Err(inexact()),
            }
        }
        (BitsKind::Char, Number::Float(_)) => return Err(inexact()),
        (kind, number) => {
            let n = match number {
                Number::Integer(n) => n,
                Number::Float(f) if f.fract() == 0.0 && f.is_finite() => f as i128,
                Number::Float(_) => return Err(inexact()),
            };
            let (min, max) = integer_range(kind);
            if n < min || n > max {
                return Err(inexact());
            }
            // two's complement truncated to the target width
            let width = kind.size_in_bits();
            (n as u64) & (u64::MAX >> (64 - width))
        }
    };
    Ok(state.alloc_bits(kind, bits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Machine, MachineCreateInfo, Runtime};

    fn exception_name(machine: &Machine, code: &str) -> String {
        machine.evaluate(code);
        let exception = machine.last_exception().expect("expected an exception");
        machine.clear_exception();
        machine.type_name(machine.type_of(exception))
    }

    #[test]
    fn integer_ranges() {
        assert_eq!(integer_range(BitsKind::Int8), (-128, 127));
        assert_eq!(integer_range(BitsKind::UInt16), (0, 65535));
        assert_eq!(integer_range(BitsKind::Bool), (0, 1));
    }

    #[test]
    fn conversions() {
        let machine = Machine::new(MachineCreateInfo::default());
        let v = machine.evaluate("Int8(-5)");
        assert_eq!(machine.unbox_bits(v), Some((BitsKind::Int8, 0xfb)));
        let v = machine.evaluate("Float32(2)");
        assert_eq!(machine.unbox_bits(v), Some((BitsKind::Float32, 2.0f32.to_bits() as u64)));
        let v = machine.evaluate("Int64(3.0)");
        assert_eq!(machine.unbox_bits(v), Some((BitsKind::Int64, 3)));
        let v = machine.evaluate("Char(65)");
        assert_eq!(machine.unbox_bits(v), Some((BitsKind::Char, 'A' as u64)));
        assert_eq!(exception_name(&machine, "UInt8(256)"), "InexactError");
        assert_eq!(exception_name(&machine, "Int64(2.5)"), "InexactError");
        assert_eq!(exception_name(&machine, "UInt64(-1)"), "InexactError");
    }

    #[test]
    fn arrays_from_undef() {
        let machine = Machine::new(MachineCreateInfo::default());
        let a = machine.evaluate("Array{String, 2}(undef, 2, 2)");
        assert_eq!(machine.array_length(a), 4);
        assert_eq!(machine.array_ref(a, 0), machine.nothing());
        let v = machine.evaluate("Vector{Int64}(undef, 3)");
        assert_eq!(machine.type_name(machine.type_of(v)), "Vector{Int64}");
        let e = machine.evaluate("Vector{Any}()");
        assert_eq!(machine.array_length(e), 0);
        let inferred = machine.evaluate("Array{Int64}(undef, (2, 3, 4))");
        assert_eq!(machine.array_rank(inferred), 3);
        assert_eq!(exception_name(&machine, "Array{Int64, 2}(undef, 3)"), "MethodError");
        assert_eq!(exception_name(&machine, "Vector(undef, 3)"), "MethodError");
    }

    #[test]
    fn pairs_and_dicts() {
        let machine = Machine::new(MachineCreateInfo::default());
        let p = machine.evaluate("Pair(1, \"one\")");
        assert_eq!(machine.type_name(machine.type_of(p)), "Pair{Int64, String}");
        let d = machine.evaluate("Dict()");
        assert_eq!(machine.type_name(machine.type_of(d)), "Dict{Any, Any}");
        assert_eq!(exception_name(&machine, "Pair{Int64, Int64}(1, \"x\")"), "TypeError");
    }

    #[test]
    fn singletons_and_abstract_types() {
        let machine = Machine::new(MachineCreateInfo::default());
        assert_eq!(machine.evaluate("Nothing()"), machine.nothing());
        assert_eq!(exception_name(&machine, "Number(1)"), "MethodError");
        assert_eq!(exception_name(&machine, "UnitRange(1)"), "MethodError");
    }
}

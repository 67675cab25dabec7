use crate::{
    ArrayObject, BitsKind, ExceptionKind, ExecutionResult, MachineState, Object, PrimitiveContext,
    Thrown, TypeParam, Value, primitives::inputs,
};

fn dims_of(state: &MachineState, array: Value) -> Option<Vec<usize>> {
    match state.object(array).ok()? {
        Object::Array(array) => Some(array.dims.clone()),
        _ => None,
    }
}

/// Column-major offset of 1-based `indices`, `None` if any is out of range.
/// With fewer indices than dimensions the last one spans the trailing
/// dimensions, indices past the rank must be 1.
pub(crate) fn linear_offset(dims: &[usize], indices: &[i64]) -> Option<usize> {
    let last = indices.len().checked_sub(1)?;
    let mut offset = 0usize;
    let mut stride = 1usize;
    for (axis, &index) in indices.iter().enumerate() {
        let extent = match dims.get(axis..) {
            Some(trailing) if axis == last => trailing.iter().product(),
            Some(trailing) => trailing.first().copied().unwrap_or(1),
            None => 1,
        };
        let zero_based = usize::try_from(index - 1).ok()?;
        if zero_based >= extent {
            return None;
        }
        offset += zero_based * stride;
        stride *= extent;
    }
    Some(offset)
}

pub fn size(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let array = ctx.arguments[0];
    let dims = match dims_of(ctx.state, array) {
        Some(dims) => dims,
        None => match ctx.state.object(array)? {
            Object::Tuple(elements) => vec![elements.len()],
            _ => return Err(ctx.method_error()),
        },
    };
    if let Some(&axis) = ctx.arguments.get(1) {
        let axis = ctx.state.int_of(axis)?;
        if axis < 1 {
            return Err(Thrown::raise(
                ExceptionKind::Argument,
                format!("arraysize: dimension out of range {axis}"),
            ));
        }
        let extent = dims.get(axis as usize - 1).copied().unwrap_or(1);
        return Ok(ctx.state.alloc_int(extent as i64));
    }
    let extents = dims
        .iter()
        .map(|&extent| ctx.state.alloc_int(extent as i64))
        .collect();
    Ok(ctx.state.alloc_tuple(extents))
}

pub fn ndims(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [array] = inputs(ctx);
    let rank = dims_of(ctx.state, array).ok_or_else(|| ctx.method_error())?.len();
    Ok(ctx.state.alloc_int(rank as i64))
}

/// integer indices, or the elements of a single vector or range argument
fn index_list(state: &MachineState, index: Value) -> Result<Option<Vec<i64>>, Thrown> {
    match state.object(index)? {
        Object::Array(array) if array.rank() == 1 => {
            let indices = array
                .data
                .iter()
                .map(|&i| state.int_of(i))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(indices))
        }
        Object::Struct(range) if state.type_of(index) == state.types.unit_range => {
            let start = state.int_of(range.fields[0])?;
            let stop = state.int_of(range.fields[1])?;
            Ok(Some((start..=stop).collect()))
        }
        _ => Ok(None),
    }
}

pub fn getindex(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let collection = ctx.arguments[0];
    let indices = &ctx.arguments[1..];
    let state = &mut *ctx.state;
    let ty = state.type_of(collection);

    match state.object(collection)? {
        Object::Array(array) => {
            if let [index] = *indices {
                if let Some(list) = index_list(state, index)? {
                    return gather(state, collection, &list);
                }
            }
            let positions = indices
                .iter()
                .map(|&i| state.int_of(i))
                .collect::<Result<Vec<_>, _>>()?;
            let offset = match positions[..] {
                [] => (array.len() == 1).then_some(0),
                _ => linear_offset(&array.dims, &positions),
            };
            offset
                .map(|offset| array.data[offset])
                .ok_or_else(|| state.bounds_error(collection, &positions))
        }
        Object::Tuple(elements) => {
            let [index] = *indices else {
                return Err(ctx.method_error());
            };
            let position = state.int_of(index)?;
            usize::try_from(position - 1)
                .ok()
                .and_then(|i| elements.get(i).copied())
                .ok_or_else(|| state.bounds_error(collection, &[position]))
        }
        Object::Dict(dict) => {
            let [key] = *indices else {
                return Err(ctx.method_error());
            };
            dict.entries
                .iter()
                .find(|&&(k, _)| state.values_equal(k, key))
                .map(|&(_, v)| v)
                .ok_or_else(|| {
                    Thrown::raise(
                        ExceptionKind::Key,
                        format!("KeyError: key {} not found", state.repr(key)),
                    )
                })
        }
        Object::Struct(object) if state.root_type(ty) == state.types.pair => {
            let [index] = *indices else {
                return Err(ctx.method_error());
            };
            let position = state.int_of(index)?;
            usize::try_from(position - 1)
                .ok()
                .and_then(|i| object.fields.get(i).copied())
                .ok_or_else(|| state.bounds_error(collection, &[position]))
        }
        Object::Struct(range) if ty == state.types.unit_range => {
            let [index] = *indices else {
                return Err(ctx.method_error());
            };
            let start = state.int_of(range.fields[0])?;
            let stop = state.int_of(range.fields[1])?;
            let position = state.int_of(index)?;
            if position < 1 || start + position - 1 > stop {
                return Err(state.bounds_error(collection, &[position]));
            }
            Ok(state.alloc_int(start + position - 1))
        }
        _ => Err(ctx.method_error()),
    }
}

/// `a[[i, j, ...]]`, a new vector with the same element type
fn gather(state: &mut MachineState, array: Value, indices: &[i64]) -> ExecutionResult {
    let Ok(Object::Array(object)) = state.object(array) else {
        return Err(state.type_error("Array", array));
    };
    let mut elements = Vec::with_capacity(indices.len());
    for &index in indices {
        match usize::try_from(index - 1).ok().and_then(|i| object.data.get(i)) {
            Some(&element) => elements.push(element),
            None => return Err(state.bounds_error(array, &[index])),
        }
    }
    let element_type = state
        .array_parameters(state.type_of(array))
        .map_or(state.types.any, |(element, _)| element);
    let ty = state.apply_type(
        state.types.array,
        &[TypeParam::Type(element_type), TypeParam::Int(1)],
    )?;
    Ok(state.alloc_array(ty, ArrayObject::vector(elements)))
}

/// `setindex!(a, value, indices...)`, returns the collection
pub fn setindex(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let collection = ctx.arguments[0];
    let value = ctx.arguments[1];
    let indices = &ctx.arguments[2..];
    let state = &mut *ctx.state;
    state.object(value)?;

    match state.object(collection)? {
        Object::Array(array) => {
            let positions = indices
                .iter()
                .map(|&i| state.int_of(i))
                .collect::<Result<Vec<_>, _>>()?;
            let offset = match positions[..] {
                [] => (array.len() == 1).then_some(0),
                _ => linear_offset(&array.dims, &positions),
            };
            let Some(offset) = offset else {
                return Err(state.bounds_error(collection, &positions));
            };
            state.array_put(collection, offset, value)?;
            Ok(collection)
        }
        Object::Dict(_) => {
            let [key] = *indices else {
                return Err(ctx.method_error());
            };
            let (key, value) = coerce_entry(state, collection, key, value)?;
            let existing = match state.object(collection)? {
                Object::Dict(dict) => dict
                    .entries
                    .iter()
                    .position(|&(k, _)| state.values_equal(k, key)),
                _ => None,
            };
            if let Object::Dict(dict) = state.object_mut(collection)? {
                match existing {
                    Some(index) => dict.entries[index].1 = value,
                    None => dict.entries.push((key, value)),
                }
            }
            Ok(collection)
        }
        _ => Err(ctx.method_error()),
    }
}

fn coerce_entry(
    state: &mut MachineState,
    dict: Value,
    key: Value,
    value: Value,
) -> Result<(Value, Value), Thrown> {
    let params = state
        .datatype(state.type_of(dict))
        .map(|data| data.parameters.clone())
        .unwrap_or_default();
    match params[..] {
        [TypeParam::Type(k), TypeParam::Type(v)] => {
            let key = state.coerce(k, key)?;
            let value = state.coerce(v, value)?;
            Ok((key, value))
        }
        _ => Ok((key, value)),
    }
}

fn dims_argument(state: &MachineState, args: &[Value]) -> Result<Vec<usize>, Thrown> {
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
                    format!("invalid Array dimensions {n}"),
                )
            })
        })
        .collect()
}

/// Same elements in a new shape, the element count must not change.
pub fn reshape(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let array = ctx.arguments[0];
    let dims = dims_argument(ctx.state, &ctx.arguments[1..])?;
    let state = &mut *ctx.state;
    let Ok(Object::Array(object)) = state.object(array) else {
        return Err(ctx.method_error());
    };
    let data = object.data.clone();
    if dims.iter().product::<usize>() != data.len() {
        return Err(Thrown::raise(
            ExceptionKind::Dimension,
            format!(
                "DimensionMismatch: new dimensions {dims:?} must be consistent with array size {}",
                data.len()
            ),
        ));
    }
    let element = state
        .array_parameters(state.type_of(array))
        .map_or(state.types.any, |(element, _)| element);
    let ty = state.apply_type(
        state.types.array,
        &[TypeParam::Type(element), TypeParam::Int(dims.len() as i64)],
    )?;
    Ok(state.alloc_array(ty, ArrayObject { dims, data }))
}

/// `zeros(T, dims...)`, `T` defaults to `Float64`
pub fn zeros(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let state = &mut *ctx.state;
    let (element, dims) = match ctx.arguments.split_first() {
        Some((&first, rest)) if state.is_type(first) => (first, rest),
        _ => (state.types.bits_type(BitsKind::Float64), ctx.arguments),
    };
    let Some(kind) = state.datatype(element).and_then(|data| data.bits) else {
        return Err(Thrown::raise(
            ExceptionKind::Method,
            format!(
                "MethodError: no method matching zero(::Type{{{}}})",
                state.type_display(element)
            ),
        ));
    };
    let dims = dims_argument(state, dims)?;
    let ty = state.apply_type(
        state.types.array,
        &[TypeParam::Type(element), TypeParam::Int(dims.len() as i64)],
    )?;
    let len: usize = dims.iter().product();
    let data = (0..len).map(|_| state.alloc_bits(kind, 0)).collect();
    Ok(state.alloc_array(ty, ArrayObject { dims, data }))
}

#[cfg(test)]
mod tests {
    use super::linear_offset;
    use crate::{BitsKind, Machine, MachineCreateInfo, Runtime};

    fn int(machine: &Machine, code: &str) -> i64 {
        let value = machine.evaluate(code);
        assert!(machine.last_exception().is_none(), "{code} raised");
        let (_, bits) = machine.unbox_bits(value).unwrap();
        bits as i64
    }

    fn raised(machine: &Machine, code: &str) -> String {
        machine.evaluate(code);
        let exception = machine.last_exception().expect("expected an exception");
        machine.clear_exception();
        machine.type_name(machine.type_of(exception))
    }

    #[test]
    fn column_major_offsets() {
        let dims = [2, 3];
        assert_eq!(linear_offset(&dims, &[1, 1]), Some(0));
        assert_eq!(linear_offset(&dims, &[2, 1]), Some(1));
        assert_eq!(linear_offset(&dims, &[1, 2]), Some(2));
        assert_eq!(linear_offset(&dims, &[2, 3]), Some(5));
        assert_eq!(linear_offset(&dims, &[3, 1]), None);
        assert_eq!(linear_offset(&dims, &[0, 1]), None);
        assert_eq!(linear_offset(&dims, &[1, 1, 1]), Some(0));
        assert_eq!(linear_offset(&dims, &[1, 1, 2]), None);
    }

    #[test]
    fn multidimensional_indexing() {
        let machine = Machine::new(MachineCreateInfo::default());
        machine.evaluate("a = reshape([1, 2, 3, 4, 5, 6], 2, 3)");
        assert_eq!(int(&machine, "a[2, 1]"), 2);
        assert_eq!(int(&machine, "a[1, 3]"), 5);
        assert_eq!(int(&machine, "a[6]"), 6);
        assert_eq!(int(&machine, "size(a, 2)"), 3);
        assert_eq!(int(&machine, "ndims(a)"), 2);
        assert_eq!(raised(&machine, "a[3, 1]"), "BoundsError");
    }

    #[test]
    fn gather_with_vector_index() {
        let machine = Machine::new(MachineCreateInfo::default());
        machine.evaluate("v = [10, 20, 30, 40]; w = v[[4, 1]]");
        assert_eq!(int(&machine, "w[1]"), 40);
        assert_eq!(int(&machine, "length(w)"), 2);
        assert_eq!(int(&machine, "v[2:3][2]"), 30);
        assert_eq!(raised(&machine, "v[[5]]"), "BoundsError");
    }

    #[test]
    fn dict_indexing() {
        let machine = Machine::new(MachineCreateInfo::default());
        machine.evaluate("d = Dict{String, Int64}(); d[\"a\"] = 1; d[\"a\"] = 2");
        assert_eq!(int(&machine, "d[\"a\"]"), 2);
        assert_eq!(int(&machine, "length(d)"), 1);
        assert_eq!(raised(&machine, "d[\"b\"]"), "KeyError");
        assert_eq!(raised(&machine, "d[1] = 1"), "TypeError");
    }

    #[test]
    fn tuples_pairs_and_ranges() {
        let machine = Machine::new(MachineCreateInfo::default());
        assert_eq!(int(&machine, "(5, 6)[2]"), 6);
        assert_eq!(int(&machine, "Pair(7, \"x\")[1]"), 7);
        assert_eq!(int(&machine, "(3:9)[2]"), 4);
        assert_eq!(raised(&machine, "(3:4)[3]"), "BoundsError");
    }

    #[test]
    fn zeros_and_reshape_checks() {
        let machine = Machine::new(MachineCreateInfo::default());
        let z = machine.evaluate("zeros(Int32, 2, 2)");
        assert_eq!(machine.array_length(z), 4);
        let element = machine.array_ref(z, 3);
        assert_eq!(machine.unbox_bits(element), Some((BitsKind::Int32, 0)));
        let f = machine.evaluate("zeros(3)");
        assert_eq!(machine.type_name(machine.type_of(f)), "Vector{Float64}");
        assert_eq!(raised(&machine, "reshape([1, 2, 3], 2, 2)"), "DimensionMismatch");
    }

    #[test]
    fn setindex_converts_numbers() {
        let machine = Machine::new(MachineCreateInfo::default());
        machine.evaluate("f = zeros(2); f[1] = 3");
        let element = machine.evaluate("f[1]");
        assert_eq!(
            machine.unbox_bits(element),
            Some((BitsKind::Float64, 3.0f64.to_bits()))
        );
        assert_eq!(raised(&machine, "i = [1, 2]; i[1] = 1.5"), "InexactError");
    }
}

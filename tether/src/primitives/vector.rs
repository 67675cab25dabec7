// growable operations only apply to rank-1 arrays, every element is
// converted to the vector's element type before the vector is touched

use crate::{
    ExceptionKind, ExecutionResult, MachineState, Object, PrimitiveContext, Thrown, Value,
    primitives::inputs,
};

fn vector_len(ctx: &PrimitiveContext, vector: Value) -> Result<usize, Thrown> {
    match ctx.state.object(vector)? {
        Object::Array(array) if array.rank() == 1 => Ok(array.len()),
        _ => Err(ctx.method_error()),
    }
}

fn with_vector(
    state: &mut MachineState,
    vector: Value,
    f: impl FnOnce(&mut Vec<Value>),
) -> Result<(), Thrown> {
    if let Object::Array(array) = state.object_mut(vector)? {
        f(&mut array.data);
        array.sync_vector_dims();
    }
    Ok(())
}

/// `push!(v, items...)`
pub fn push(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let vector = ctx.arguments[0];
    vector_len(ctx, vector)?;
    let items = ctx.arguments[1..]
        .iter()
        .map(|&item| ctx.state.coerce_element(vector, item))
        .collect::<Result<Vec<_>, _>>()?;
    with_vector(ctx.state, vector, |data| data.extend(items))?;
    Ok(vector)
}

pub fn pushfirst(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [vector, item] = inputs(ctx);
    vector_len(ctx, vector)?;
    let item = ctx.state.coerce_element(vector, item)?;
    with_vector(ctx.state, vector, |data| data.insert(0, item))?;
    Ok(vector)
}

/// `insert!(v, i, item)` with `1 <= i <= length(v) + 1`
pub fn insert(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [vector, index, item] = inputs(ctx);
    let len = vector_len(ctx, vector)?;
    let position = ctx.state.int_of(index)?;
    let offset = usize::try_from(position - 1).ok().filter(|&i| i <= len);
    let Some(offset) = offset else {
        return Err(ctx.state.bounds_error(vector, &[position]));
    };
    let item = ctx.state.coerce_element(vector, item)?;
    with_vector(ctx.state, vector, |data| data.insert(offset, item))?;
    Ok(vector)
}

/// `deleteat!(v, i)`, also accepts a vector or range of sorted indices
pub fn deleteat(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [vector, index] = inputs(ctx);
    let len = vector_len(ctx, vector)?;
    let positions = match ctx.state.object(index)? {
        Object::Array(list) => list
            .data
            .iter()
            .map(|&i| ctx.state.int_of(i))
            .collect::<Result<Vec<_>, _>>()?,
        _ => vec![ctx.state.int_of(index)?],
    };
    let mut offsets = Vec::with_capacity(positions.len());
    for &position in &positions {
        match usize::try_from(position - 1).ok().filter(|&i| i < len) {
            Some(offset) => offsets.push(offset),
            None => return Err(ctx.state.bounds_error(vector, &[position])),
        }
    }
    if offsets.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(Thrown::raise(
            ExceptionKind::Argument,
            "indices must be unique and sorted",
        ));
    }
    with_vector(ctx.state, vector, |data| {
        for &offset in offsets.iter().rev() {
            data.remove(offset);
        }
    })?;
    Ok(vector)
}

pub fn pop(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [vector] = inputs(ctx);
    if vector_len(ctx, vector)? == 0 {
        return Err(Thrown::raise(
            ExceptionKind::Argument,
            "array must be non-empty",
        ));
    }
    let mut popped = None;
    with_vector(ctx.state, vector, |data| popped = data.pop())?;
    popped.ok_or_else(|| ctx.method_error())
}

use crate::{
    ArrayObject, BitsKind, ExecutionResult, MachineState, Object, PrimitiveContext, Thrown,
    TypeParam, Value, primitives::inputs,
};

/// Iteration view over the supported collections.
enum Source {
    Elements(Vec<Value>),
    Range(i64, i64),
    Entries(Vec<(Value, Value)>),
    Chars(Vec<char>),
}

impl Source {
    fn of(state: &MachineState, collection: Value) -> Option<Self> {
        let ty = state.type_of(collection);
        Some(match state.object(collection).ok()? {
            Object::Array(array) => Self::Elements(array.data.clone()),
            Object::Tuple(elements) => Self::Elements(elements.clone()),
            Object::Dict(dict) => Self::Entries(dict.entries.clone()),
            Object::String(text) => Self::Chars(text.chars().collect()),
            Object::Struct(range) if ty == state.types.unit_range => Self::Range(
                state.int_of(range.fields[0]).ok()?,
                state.int_of(range.fields[1]).ok()?,
            ),
            Object::Struct(pair) if state.root_type(ty) == state.types.pair => {
                Self::Elements(pair.fields.clone())
            }
            _ => return None,
        })
    }

    fn len(&self) -> usize {
        match self {
            Self::Elements(elements) => elements.len(),
            Self::Range(start, stop) => (stop - start + 1).max(0) as usize,
            Self::Entries(entries) => entries.len(),
            Self::Chars(chars) => chars.len(),
        }
    }

    /// the element at 0-based `index`, allocated if necessary
    fn element(&self, state: &mut MachineState, index: usize) -> Result<Value, Thrown> {
        Ok(match self {
            Self::Elements(elements) => elements[index],
            Self::Range(start, _) => state.alloc_int(start + index as i64),
            Self::Chars(chars) => state.alloc_bits(BitsKind::Char, chars[index] as u64),
            Self::Entries(entries) => {
                let (key, value) = entries[index];
                let key_type = state.type_of(key);
                let value_type = state.type_of(value);
                let ty = state.apply_type(
                    state.types.pair,
                    &[TypeParam::Type(key_type), TypeParam::Type(value_type)],
                )?;
                state.alloc_struct(ty, vec![key, value])
            }
        })
    }
}

fn source(ctx: &PrimitiveContext, collection: Value) -> Result<Source, Thrown> {
    ctx.state.object(collection)?;
    Source::of(ctx.state, collection).ok_or_else(|| ctx.method_error())
}

pub fn length(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [collection] = inputs(ctx);
    let len = source(ctx, collection)?.len();
    Ok(ctx.state.alloc_int(len as i64))
}

/// `iterate(x)` and `iterate(x, state)`: `(element, next_state)` or
/// `nothing` once exhausted, the state is the next 1-based position.
pub fn iterate(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let collection = ctx.arguments[0];
    let source = source(ctx, collection)?;
    let position = match ctx.arguments.get(1) {
        Some(&state) => ctx.state.int_of(state)?,
        None => 1,
    };
    let Some(index) = usize::try_from(position - 1).ok().filter(|&i| i < source.len()) else {
        return Ok(ctx.state.nothing());
    };
    let element = source.element(ctx.state, index)?;
    let next = ctx.state.alloc_int(position + 1);
    Ok(ctx.state.alloc_tuple(vec![element, next]))
}

/// materializes any iterable into a `Vector`
pub fn collect(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [collection] = inputs(ctx);
    let source = source(ctx, collection)?;
    let state = &mut *ctx.state;
    let elements = (0..source.len())
        .map(|index| source.element(state, index))
        .collect::<Result<Vec<_>, _>>()?;
    let element = match source {
        Source::Range(..) => state.types.bits_type(BitsKind::Int64),
        Source::Chars(_) => state.types.bits_type(BitsKind::Char),
        _ => match state.array_parameters(state.type_of(collection)) {
            Some((element, _)) => element,
            None => common_type(state, &elements),
        },
    };
    vector_of(state, element, elements)
}

fn common_type(state: &MachineState, elements: &[Value]) -> Value {
    let first = elements.first().map_or(state.types.any, |&e| state.type_of(e));
    if elements.iter().all(|&e| state.type_of(e) == first) {
        first
    } else {
        state.types.any
    }
}

fn vector_of(state: &mut MachineState, element: Value, data: Vec<Value>) -> ExecutionResult {
    let ty = state.apply_type(
        state.types.array,
        &[TypeParam::Type(element), TypeParam::Int(1)],
    )?;
    Ok(state.alloc_array(ty, ArrayObject::vector(data)))
}

fn dict_parts(
    ctx: &PrimitiveContext,
    dict: Value,
) -> Result<(Vec<(Value, Value)>, Value, Value), Thrown> {
    let Object::Dict(object) = ctx.state.object(dict)? else {
        return Err(ctx.method_error());
    };
    let params = ctx
        .state
        .datatype(ctx.state.type_of(dict))
        .map(|data| data.parameters.clone())
        .unwrap_or_default();
    let any = ctx.state.types.any;
    let (key, value) = match params[..] {
        [TypeParam::Type(k), TypeParam::Type(v)] => (k, v),
        _ => (any, any),
    };
    Ok((object.entries.clone(), key, value))
}

/// keys in insertion order, as a `Vector`
pub fn keys(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [dict] = inputs(ctx);
    let (entries, key, _) = dict_parts(ctx, dict)?;
    vector_of(ctx.state, key, entries.iter().map(|&(k, _)| k).collect())
}

pub fn values(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [dict] = inputs(ctx);
    let (entries, _, value) = dict_parts(ctx, dict)?;
    vector_of(ctx.state, value, entries.iter().map(|&(_, v)| v).collect())
}

pub fn haskey(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [dict, key] = inputs(ctx);
    let (entries, _, _) = dict_parts(ctx, dict)?;
    let found = entries.iter().any(|&(k, _)| ctx.state.values_equal(k, key));
    Ok(ctx.state.alloc_bool(found))
}

#[cfg(test)]
mod tests {
    use crate::{BitsKind, Machine, MachineCreateInfo, Runtime};

    fn int(machine: &Machine, code: &str) -> i64 {
        let value = machine.evaluate(code);
        assert!(machine.last_exception().is_none(), "{code} raised");
        let (_, bits) = machine.unbox_bits(value).unwrap();
        bits as i64
    }

    #[test]
    fn lengths() {
        let machine = Machine::new(MachineCreateInfo::default());
        assert_eq!(int(&machine, "length([1, 2, 3])"), 3);
        assert_eq!(int(&machine, "length((1, 2))"), 2);
        assert_eq!(int(&machine, "length(\"héllo\")"), 5);
        assert_eq!(int(&machine, "length(4:6)"), 3);
        assert_eq!(int(&machine, "length(6:4)"), 0);
    }

    #[test]
    fn iterate_protocol() {
        let machine = Machine::new(MachineCreateInfo::default());
        machine.evaluate("v = [7, 8]");
        assert_eq!(int(&machine, "iterate(v)[1]"), 7);
        assert_eq!(int(&machine, "iterate(v)[2]"), 2);
        assert_eq!(int(&machine, "iterate(v, 2)[1]"), 8);
        let done = machine.evaluate("iterate(v, 3)");
        assert_eq!(done, machine.nothing());
        assert_eq!(int(&machine, "iterate(10:12, 3)[1]"), 12);
    }

    #[test]
    fn collect_ranges_and_tuples() {
        let machine = Machine::new(MachineCreateInfo::default());
        let v = machine.evaluate("collect(1:4)");
        assert_eq!(machine.type_name(machine.type_of(v)), "Vector{Int64}");
        assert_eq!(machine.array_length(v), 4);
        let t = machine.evaluate("collect((1, \"a\"))");
        assert_eq!(machine.type_name(machine.type_of(t)), "Vector{Any}");
    }

    #[test]
    fn dict_keys_values_and_pairs() {
        let machine = Machine::new(MachineCreateInfo::default());
        machine.evaluate("d = Dict{Symbol, Int64}(); d[:b] = 2; d[:a] = 1");
        let keys = machine.evaluate("keys(d)");
        assert_eq!(machine.type_name(machine.type_of(keys)), "Vector{Symbol}");
        let first = machine.array_ref(keys, 0);
        assert_eq!(machine.unbox_symbol(first).as_deref(), Some("b"));
        assert_eq!(int(&machine, "values(d)[2]"), 1);
        let pair = machine.evaluate("iterate(d)[1]");
        assert_eq!(machine.type_name(machine.type_of(pair)), "Pair{Symbol, Int64}");
        let found = machine.evaluate("haskey(d, :a)");
        assert_eq!(machine.unbox_bits(found), Some((BitsKind::Bool, 1)));
    }
}

use crate::{
    BitsKind, ExceptionKind, ExecutionResult, PrimitiveContext, Thrown, primitives::inputs,
};

pub fn type_of(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [value] = inputs(ctx);
    Ok(ctx.state.type_of(value))
}

pub fn isa(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [value, ty] = inputs(ctx);
    if !ctx.state.is_type(ty) {
        return Err(ctx.state.type_error("Type", ty));
    }
    let result = ctx.state.isa(value, ty);
    Ok(ctx.state.alloc_bool(result))
}

pub fn supertype(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [ty] = inputs(ctx);
    if !ctx.state.is_type(ty) {
        return Err(ctx.method_error());
    }
    Ok(ctx.state.supertype_of(ty))
}

pub fn identical(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [a, b] = inputs(ctx);
    let result = ctx.state.values_identical(a, b);
    Ok(ctx.state.alloc_bool(result))
}

pub fn equal(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [a, b] = inputs(ctx);
    let result = ctx.state.values_equal(a, b);
    Ok(ctx.state.alloc_bool(result))
}

enum Operands {
    Integers(i64, i64),
    Floats(f64, f64),
}

fn operands(ctx: &PrimitiveContext) -> Result<Operands, Thrown> {
    let [a, b] = inputs(ctx);
    let state = &*ctx.state;
    let is_float = |value| {
        state
            .bits_of(value)
            .is_some_and(|bits| bits.kind.is_float())
    };
    if !is_float(a) && !is_float(b) {
        if let (Ok(x), Ok(y)) = (state.int_of(a), state.int_of(b)) {
            return Ok(Operands::Integers(x, y));
        }
    }
    match (state.float_of(a), state.float_of(b)) {
        (Some(x), Some(y)) => Ok(Operands::Floats(x, y)),
        _ => Err(ctx.method_error()),
    }
}

fn arithmetic(
    ctx: &mut PrimitiveContext,
    integers: fn(i64, i64) -> i64,
    floats: fn(f64, f64) -> f64,
) -> ExecutionResult {
    match operands(ctx)? {
        Operands::Integers(x, y) => Ok(ctx.state.alloc_int(integers(x, y))),
        Operands::Floats(x, y) => Ok(ctx.state.alloc_float(floats(x, y))),
    }
}

pub fn add(ctx: &mut PrimitiveContext) -> ExecutionResult {
    arithmetic(ctx, i64::wrapping_add, |x, y| x + y)
}

pub fn mul(ctx: &mut PrimitiveContext) -> ExecutionResult {
    arithmetic(ctx, i64::wrapping_mul, |x, y| x * y)
}

pub fn sub(ctx: &mut PrimitiveContext) -> ExecutionResult {
    if let [value] = *ctx.arguments {
        let state = &mut *ctx.state;
        return match state.bits_of(value) {
            Some(bits) if bits.kind.is_float() => {
                let x = state.float_of(value).unwrap_or_default();
                Ok(state.alloc_float(-x))
            }
            Some(_) => {
                let x = state.int_of(value)?;
                Ok(state.alloc_int(x.wrapping_neg()))
            }
            None => Err(ctx.method_error()),
        };
    }
    arithmetic(ctx, i64::wrapping_sub, |x, y| x - y)
}

/// `/` always divides as floats
pub fn div(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let (x, y) = match operands(ctx)? {
        Operands::Integers(x, y) => (x as f64, y as f64),
        Operands::Floats(x, y) => (x, y),
    };
    Ok(ctx.state.alloc_float(x / y))
}

pub fn error(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let message = match ctx.arguments.first() {
        None => String::new(),
        Some(&value) => match ctx.state.string_of(value) {
            Some(text) => text.to_string(),
            None => ctx.state.repr(value),
        },
    };
    Err(Thrown::raise(ExceptionKind::Error, message))
}

pub fn throw(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [exception] = inputs(ctx);
    ctx.state.object(exception)?;
    Err(Thrown::Value(exception))
}

pub fn tuple(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let elements = ctx.arguments.to_vec();
    Ok(ctx.state.alloc_tuple(elements))
}

/// concatenates strings as is and everything else by its representation
pub fn string(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let mut out = String::new();
    for &value in ctx.arguments {
        match ctx.state.string_of(value) {
            Some(text) => out.push_str(&text),
            None => match ctx.state.bits_of(value) {
                Some(bits) if bits.kind == BitsKind::Char => {
                    out.extend(char::from_u32(bits.bits as u32));
                }
                _ => out.push_str(&ctx.state.repr(value)),
            },
        }
    }
    Ok(ctx.state.alloc_string(&out))
}

fn field_name(ctx: &PrimitiveContext, field: crate::Value) -> Result<String, Thrown> {
    if let Some(name) = ctx.state.symbol_of(field) {
        return Ok(name.to_string());
    }
    match ctx.state.int_of(field) {
        Ok(index) => ctx.state.field_name_at(ctx.state.type_of(ctx.arguments[0]), index),
        Err(_) => Err(ctx.method_error()),
    }
}

/// `getfield(x, :name)` or `getfield(x, i)` with a 1-based position
pub fn getfield(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [object, field] = inputs(ctx);
    let name = field_name(ctx, field)?;
    ctx.state.get_field(object, &name)
}

pub fn setfield(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [object, field, value] = inputs(ctx);
    let name = field_name(ctx, field)?;
    ctx.state.set_field(object, &name, value)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use crate::{BitsKind, Machine, MachineCreateInfo, Runtime};

    fn eval(machine: &Machine, code: &str) -> crate::Value {
        let value = machine.evaluate(code);
        assert!(machine.last_exception().is_none(), "{code} raised");
        value
    }

    #[test]
    fn arithmetic_promotes_to_float() {
        let machine = Machine::new(MachineCreateInfo::default());
        let sum = eval(&machine, "1 + 2.5");
        assert_eq!(machine.unbox_bits(sum), Some((BitsKind::Float64, 3.5f64.to_bits())));
        let product = eval(&machine, "6 * 7");
        assert_eq!(machine.unbox_bits(product), Some((BitsKind::Int64, 42)));
        let quotient = eval(&machine, "1 / 4");
        assert_eq!(machine.unbox_bits(quotient), Some((BitsKind::Float64, 0.25f64.to_bits())));
        let negated = eval(&machine, "x = 3; -x");
        assert_eq!(machine.unbox_bits(negated), Some((BitsKind::Int64, (-3i64) as u64)));
    }

    #[test]
    fn equality_is_numeric_across_kinds() {
        let machine = Machine::new(MachineCreateInfo::default());
        let result = eval(&machine, "1 == 1.0");
        assert_eq!(machine.unbox_bits(result), Some((BitsKind::Bool, 1)));
        let result = eval(&machine, "\"a\" == \"b\"");
        assert_eq!(machine.unbox_bits(result), Some((BitsKind::Bool, 0)));
    }

    #[test]
    fn throw_keeps_the_exception_object() {
        let machine = Machine::new(MachineCreateInfo::default());
        let result = machine.evaluate("throw(ArgumentError(\"bad input\"))");
        assert!(result.is_null());
        let exception = machine.last_exception().unwrap();
        assert_eq!(machine.type_name(machine.type_of(exception)), "ArgumentError");
        assert_eq!(machine.exception_message(exception).as_deref(), Some("bad input"));
    }

    #[test]
    fn string_concatenates() {
        let machine = Machine::new(MachineCreateInfo::default());
        let result = eval(&machine, "string(\"n=\", 3, 'x', :s)");
        assert_eq!(machine.unbox_string(result).as_deref(), Some("n=3x:s"));
    }

    #[test]
    fn arithmetic_on_strings_is_a_method_error() {
        let machine = Machine::new(MachineCreateInfo::default());
        machine.evaluate("1 + \"a\"");
        let exception = machine.last_exception().unwrap();
        assert_eq!(machine.type_name(machine.type_of(exception)), "MethodError");
    }
}

use crate::{DataType, ExecutionResult, PrimitiveContext, Thrown, TypeParam, primitives::inputs};

fn datatype(ctx: &PrimitiveContext) -> Result<DataType, Thrown> {
    let [ty] = inputs(ctx);
    ctx.state.datatype(ty).cloned().ok_or_else(|| ctx.method_error())
}

pub fn fieldnames(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let data = datatype(ctx)?;
    let names = data
        .field_names
        .iter()
        .filter_map(|&id| ctx.state.strings.get(id))
        .collect::<Vec<_>>();
    let symbols = names
        .iter()
        .map(|name| ctx.state.alloc_symbol(name))
        .collect();
    Ok(ctx.state.alloc_tuple(symbols))
}

pub fn fieldtypes(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let data = datatype(ctx)?;
    Ok(ctx.state.alloc_tuple(data.field_types))
}

pub fn fieldcount(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let data = datatype(ctx)?;
    Ok(ctx.state.alloc_int(data.field_types.len() as i64))
}

/// Bound parameters as given, integer parameters boxed and free ones as
/// `nothing`.
pub fn typeparameters(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let data = datatype(ctx)?;
    let params = data
        .parameters
        .iter()
        .map(|param| match *param {
            TypeParam::Type(ty) => ty,
            TypeParam::Int(n) => ctx.state.alloc_int(n),
            TypeParam::Unbound => ctx.state.nothing(),
        })
        .collect();
    Ok(ctx.state.alloc_tuple(params))
}

pub fn typeparameternames(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let [ty] = inputs(ctx);
    let root = ctx.state.root_type(ty);
    let names = match ctx.state.datatype(root) {
        Some(data) if !data.is_union() => data.parameter_names.clone(),
        Some(_) => Vec::new(),
        None => return Err(ctx.method_error()),
    };
    let count = datatype(ctx)?.parameters.len();
    let mut symbols = names
        .iter()
        .map(|name| ctx.state.alloc_symbol(name))
        .collect::<Vec<_>>();
    // tuples and unions have positional parameters only
    while symbols.len() < count {
        let name = format!("T{}", symbols.len() + 1);
        symbols.push(ctx.state.alloc_symbol(&name));
    }
    Ok(ctx.state.alloc_tuple(symbols))
}

pub fn nparameters(ctx: &mut PrimitiveContext) -> ExecutionResult {
    let data = datatype(ctx)?;
    Ok(ctx.state.alloc_int(data.parameters.len() as i64))
}

#[cfg(test)]
mod tests {
    use crate::{Machine, MachineCreateInfo, Object, Runtime};

    #[test]
    fn field_reflection_of_pair() {
        let machine = Machine::new(MachineCreateInfo::default());
        let names = machine.evaluate("fieldnames(Pair{Int64, String})");
        let count = machine.evaluate("fieldcount(Pair{Int64, String})");
        assert!(machine.last_exception().is_none());
        machine.with_state(|state| {
            let Ok(Object::Tuple(symbols)) = state.object(names) else {
                panic!("expected a tuple");
            };
            let symbols = symbols.clone();
            let names: Vec<_> = symbols
                .iter()
                .map(|&s| state.symbol_of(s).unwrap().to_string())
                .collect();
            assert_eq!(names, ["first", "second"]);
            assert_eq!(state.int_of(count).unwrap(), 2);
        });
        let types = machine.evaluate("fieldtypes(Pair{Int64, String})");
        let second = machine.evaluate("String");
        machine.with_state(|state| {
            let Ok(Object::Tuple(types)) = state.object(types) else {
                panic!("expected a tuple");
            };
            assert_eq!(types[1], second);
        });
    }

    #[test]
    fn parameters_of_partially_applied_types() {
        let machine = Machine::new(MachineCreateInfo::default());
        let params = machine.evaluate("typeparameters(Vector)");
        let names = machine.evaluate("typeparameternames(Vector)");
        let nothing = machine.nothing();
        machine.with_state(|state| {
            let Ok(Object::Tuple(params)) = state.object(params) else {
                panic!("expected a tuple");
            };
            assert_eq!(params[0], nothing);
            assert_eq!(state.int_of(params[1]).unwrap(), 1);
            let Ok(Object::Tuple(names)) = state.object(names) else {
                panic!("expected a tuple");
            };
            assert_eq!(state.symbol_of(names[0]).as_deref(), Some("T"));
            assert_eq!(state.symbol_of(names[1]).as_deref(), Some("N"));
        });
    }
}

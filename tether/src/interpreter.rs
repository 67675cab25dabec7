use std::sync::Arc;

use log::trace;

use crate::{
    BitsKind, ExceptionKind, ExecutionResult, MachineState, Object, Thrown, TypeFlags, TypeParam,
    Value,
    parser::{Expr, Parser, StructDefinition},
    primitives,
};

const MODULES: [&str; 3] = ["Base", "Core", "Main"];

impl MachineState {
    /// Parses and evaluates `code`, the value of the last statement is the
    /// result.
    pub fn evaluate_source(&mut self, code: &str) -> ExecutionResult {
        let statements = Parser::parse_program(code)
            .map_err(|error| Thrown::raise(ExceptionKind::Parse, error.to_string()))?;
        trace!("evaluating {} statements", statements.len());
        let mut result = self.nothing();
        for statement in &statements {
            result = self.eval(statement)?;
        }
        Ok(result)
    }

    pub fn eval(&mut self, expr: &Expr) -> ExecutionResult {
        match expr {
            Expr::Integer(n) => Ok(self.alloc_int(*n)),
            Expr::Float(f) => Ok(self.alloc_float(*f)),
            Expr::String(s) => Ok(self.alloc_string(s)),
            Expr::Char(c) => Ok(self.alloc_bits(BitsKind::Char, *c as u64)),
            Expr::Symbol(name) => Ok(self.alloc_symbol(name)),
            Expr::Name(name) => self.lookup(name),
            Expr::Field(object, field) => match &**object {
                Expr::Name(module) if MODULES.contains(&module.as_str()) => self.lookup(field),
                object => {
                    let object = self.eval(object)?;
                    self.get_field(object, field)
                }
            },
            Expr::Call(callee, args) => {
                let function = self.eval(callee)?;
                let args = self.eval_all(args)?;
                self.call_value(function, &args)
            }
            Expr::Curly(base, params) => {
                let base = self.eval(base)?;
                let params = params
                    .iter()
                    .map(|param| self.type_param(param))
                    .collect::<Result<Vec<_>, _>>()?;
                self.apply_type(base, &params)
            }
            Expr::Index(collection, indices) => {
                let mut args = vec![self.eval(collection)?];
                args.extend(self.eval_all(indices)?);
                self.call_global("getindex", &args)
            }
            Expr::Vector(items) => {
                let items = self.eval_all(items)?;
                Ok(self.vector_literal(items))
            }
            Expr::Tuple(items) => {
                let items = self.eval_all(items)?;
                Ok(self.alloc_tuple(items))
            }
            Expr::Assign(name, value) => {
                let value = self.eval(value)?;
                self.define_global(name, value);
                Ok(value)
            }
            Expr::Struct(definition) => self.eval_struct(definition),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, Thrown> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn lookup(&self, name: &str) -> ExecutionResult {
        self.global(name).ok_or_else(|| {
            Thrown::raise(
                ExceptionKind::UndefVar,
                format!("UndefVarError: `{name}` not defined"),
            )
        })
    }

    fn type_param(&mut self, expr: &Expr) -> Result<TypeParam, Thrown> {
        if let Expr::Integer(n) = expr {
            return Ok(TypeParam::Int(*n));
        }
        let value = self.eval(expr)?;
        if self.is_type(value) {
            return Ok(TypeParam::Type(value));
        }
        match self.bits_of(value) {
            Some(_) => Ok(TypeParam::Int(self.int_of(value)?)),
            None => Err(self.type_error("Type", value)),
        }
    }

    fn vector_literal(&mut self, items: Vec<Value>) -> Value {
        let mut element = items
            .first()
            .map_or(self.types.any, |&first| self.type_of(first));
        if items.iter().any(|&item| self.type_of(item) != element) {
            element = self.types.any;
        }
        let ty = self
            .apply_type(
                self.types.array,
                &[TypeParam::Type(element), TypeParam::Int(1)],
            )
            .unwrap_or(self.types.array);
        self.alloc_array(ty, crate::ArrayObject::vector(items))
    }

    fn eval_struct(&mut self, definition: &StructDefinition) -> ExecutionResult {
        let mut fields: Vec<(Arc<str>, Value)> = Vec::with_capacity(definition.fields.len());
        for (name, ty) in &definition.fields {
            let ty = match ty {
                Some(expr) => {
                    let ty = self.eval(expr)?;
                    if !self.is_type(ty) {
                        return Err(self.type_error("Type", ty));
                    }
                    ty
                }
                None => self.types.any,
            };
            match fields.iter_mut().find(|(field, _)| **field == **name) {
                Some(existing) => existing.1 = ty,
                None => fields.push((Arc::from(name.as_str()), ty)),
            }
        }
        self.define_struct(&definition.name, definition.mutable, &fields)?;
        Ok(self.nothing())
    }

    pub fn call_global(&mut self, name: &str, args: &[Value]) -> ExecutionResult {
        let function = self.lookup(name)?;
        self.call_value(function, args)
    }

    pub fn call_value(&mut self, function: Value, args: &[Value]) -> ExecutionResult {
        match self.object(function)? {
            Object::Builtin(builtin) => {
                let index = builtin.index;
                primitives::call_primitive(self, index, args)
            }
            Object::DataType(_) => primitives::construct(self, function, args),
            _ => Err(Thrown::raise(
                ExceptionKind::Method,
                format!(
                    "MethodError: objects of type {} are not callable",
                    self.type_display(self.type_of(function))
                ),
            )),
        }
    }

    pub fn get_field(&self, value: Value, name: &str) -> ExecutionResult {
        let ty = self.type_of(value);
        match self.object(value)? {
            Object::Struct(object) => {
                let index = self.field_index(ty, name)?;
                Ok(object.fields[index])
            }
            Object::Tuple(elements) => {
                let element = name
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| i.checked_sub(1))
                    .and_then(|i| elements.get(i).copied());
                element.ok_or_else(|| self.no_field(ty, name))
            }
            _ => Err(self.no_field(ty, name)),
        }
    }

    pub fn set_field(&mut self, value: Value, name: &str, field: Value) -> Result<(), Thrown> {
        let ty = self.type_of(value);
        self.object(field)?;
        if !matches!(self.object(value)?, Object::Struct(_)) {
            return Err(self.no_field(ty, name));
        }
        if !self.type_flags(ty).contains(TypeFlags::MUTABLE) {
            return Err(Thrown::raise(
                ExceptionKind::Error,
                format!(
                    "setfield!: immutable struct of type {} cannot be changed",
                    self.type_display(ty)
                ),
            ));
        }
        let index = self.field_index(ty, name)?;
        let field_type = self
            .datatype(ty)
            .and_then(|data| data.field_types.get(index).copied())
            .unwrap_or(self.types.any);
        let field = self.coerce(field_type, field)?;
        if let Object::Struct(object) = self.object_mut(value)? {
            object.fields[index] = field;
        }
        Ok(())
    }

    /// name of the 1-based field `position`, tuples name fields by position
    pub fn field_name_at(&self, ty: Value, position: i64) -> Result<String, Thrown> {
        let data = self.datatype(ty);
        if data.is_some_and(|data| data.is_tuple()) {
            return Ok(position.to_string());
        }
        usize::try_from(position - 1)
            .ok()
            .and_then(|index| data?.field_names.get(index).copied())
            .and_then(|id| self.strings.get(id))
            .map(|name| name.to_string())
            .ok_or_else(|| {
                Thrown::raise(
                    ExceptionKind::Bounds,
                    format!(
                        "BoundsError: attempt to access {} at index [{position}]",
                        self.type_display(ty)
                    ),
                )
            })
    }

    fn field_index(&self, ty: Value, name: &str) -> Result<usize, Thrown> {
        self.strings
            .lookup(name)
            .and_then(|id| self.datatype(ty)?.field_index(id))
            .ok_or_else(|| self.no_field(ty, name))
    }

    fn no_field(&self, ty: Value, name: &str) -> Thrown {
        Thrown::raise(
            ExceptionKind::Field,
            format!("type {} has no field {name}", self.type_display(ty)),
        )
    }

    /// Checks `value` against `ty`, numeric values are converted to a bits
    /// target without loss.
    pub fn coerce(&mut self, ty: Value, value: Value) -> ExecutionResult {
        if self.isa(value, ty) {
            return Ok(value);
        }
        match self.datatype(ty).and_then(|data| data.bits) {
            Some(kind) if self.bits_of(value).is_some() => {
                primitives::convert_bits(self, kind, value)
            }
            _ => Err(Thrown::raise(
                ExceptionKind::Type,
                format!(
                    "TypeError: expected {}, got a value of type {}",
                    self.type_display(ty),
                    self.type_display(self.type_of(value))
                ),
            )),
        }
    }

    /// 0-based element read, bounds checked
    pub fn array_get(&self, array: Value, index: usize) -> ExecutionResult {
        match self.object(array)? {
            Object::Array(object) => object
                .data
                .get(index)
                .copied()
                .ok_or_else(|| self.bounds_error(array, &[index as i64 + 1])),
            _ => Err(self.type_error("Array", array)),
        }
    }

    /// 0-based element write, converted to the element type
    pub fn array_put(&mut self, array: Value, index: usize, element: Value) -> Result<(), Thrown> {
        self.object(element)?;
        let length = match self.object(array)? {
            Object::Array(object) => object.len(),
            _ => return Err(self.type_error("Array", array)),
        };
        if index >= length {
            return Err(self.bounds_error(array, &[index as i64 + 1]));
        }
        let element = self.coerce_element(array, element)?;
        if let Object::Array(object) = self.object_mut(array)? {
            object.data[index] = element;
        }
        Ok(())
    }

    pub fn coerce_element(&mut self, array: Value, element: Value) -> ExecutionResult {
        match self.array_parameters(self.type_of(array)) {
            Some((element_type, _)) => self.coerce(element_type, element),
            None => Ok(element),
        }
    }

    /// `indices` are the 1-based indices as the caller wrote them
    pub fn bounds_error(&self, collection: Value, indices: &[i64]) -> Thrown {
        let description = match self.heap.get(collection).map(|entry| &entry.object) {
            Some(Object::Array(array)) if array.rank() == 1 => {
                format!("{}-element {}", array.len(), self.type_display(self.type_of(collection)))
            }
            Some(Object::Array(array)) => {
                let dims = array.dims.iter().map(usize::to_string).collect::<Vec<_>>();
                format!("{} {}", dims.join("×"), self.type_display(self.type_of(collection)))
            }
            _ => self.repr(collection),
        };
        let indices = indices.iter().map(i64::to_string).collect::<Vec<_>>();
        Thrown::raise(
            ExceptionKind::Bounds,
            format!(
                "BoundsError: attempt to access {description} at index [{}]",
                indices.join(", ")
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::{BitsKind, ExceptionKind, Machine, MachineCreateInfo, Object, Thrown};

    fn run<R>(
        code: &str,
        check: impl FnOnce(&mut crate::MachineState, crate::ExecutionResult) -> R,
    ) -> R {
        let machine = Machine::new(MachineCreateInfo::default());
        machine.with_state(|state| {
            let result = state.evaluate_source(code);
            check(state, result)
        })
    }

    fn raised(result: crate::ExecutionResult) -> ExceptionKind {
        match result {
            Err(Thrown::Raise { kind, .. }) => kind,
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn assignment_defines_globals() {
        run("x = 40; y = x + 2", |state, result| {
            let y = result.unwrap();
            assert_eq!(state.int_of(y).unwrap(), 42);
            assert_eq!(state.global("Main.y"), Some(y));
        });
    }

    #[test]
    fn vector_literals_pick_a_common_element_type() {
        run("[1, 2, 3]", |state, result| {
            let v = result.unwrap();
            assert_eq!(state.type_display(state.type_of(v)), "Vector{Int64}");
        });
        run("[1, \"a\"]", |state, result| {
            let v = result.unwrap();
            assert_eq!(state.type_display(state.type_of(v)), "Vector{Any}");
        });
    }

    #[test]
    fn struct_definitions_create_constructors() {
        let code = "mutable struct Point\n x::Float64\n y::Float64\nend\np = Point(1.0, 2)\np.y";
        run(code, |state, result| {
            let y = result.unwrap();
            assert_eq!(state.bits_of(y).unwrap().kind, BitsKind::Float64);
            assert_eq!(state.float_of(y), Some(2.0));
        });
    }

    #[test]
    fn immutable_structs_reject_setfield() {
        let code = "struct Frozen\n a::Int64\nend\nf = Frozen(1)\nf.a = 2";
        run(code, |_, result| assert_eq!(raised(result), ExceptionKind::Error));
    }

    #[test]
    fn mutable_struct_fields_are_type_checked() {
        let code = "mutable struct Named\n name::String\nend\nn = Named(\"a\")\nn.name = 5";
        run(code, |_, result| assert_eq!(raised(result), ExceptionKind::Type));
    }

    #[test]
    fn indexing_and_setindex() {
        run("v = [10, 20, 30]; v[2] = 25; v[2]", |state, result| {
            assert_eq!(state.int_of(result.unwrap()).unwrap(), 25);
        });
        run("v = [10, 20, 30]; v[4]", |_, result| {
            assert_eq!(raised(result), ExceptionKind::Bounds);
        });
    }

    #[test]
    fn module_prefixes_resolve_to_globals() {
        run("Base.length([1, 2])", |state, result| {
            assert_eq!(state.int_of(result.unwrap()).unwrap(), 2);
        });
        run("Core.Int64", |state, result| {
            assert_eq!(result.unwrap(), state.types.bits_type(BitsKind::Int64));
        });
    }

    #[test]
    fn parse_errors_raise() {
        run("f(", |_, result| assert_eq!(raised(result), ExceptionKind::Parse));
    }

    #[test]
    fn calling_a_non_function_is_a_method_error() {
        run("x = 1; x(2)", |_, result| assert_eq!(raised(result), ExceptionKind::Method));
    }

    #[test]
    fn tuple_fields_by_position() {
        run("t = (1, :b); getfield(t, 2)", |state, result| {
            let value = result.unwrap();
            assert!(matches!(state.object(value), Ok(Object::Symbol(_))));
        });
    }
}

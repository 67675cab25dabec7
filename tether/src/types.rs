//! Datatype hierarchy of the reference machine.
//!
//! Single inheritance rooted at `Any`, parametric types canonicalized per
//! (generic, parameters) so identity is type equality, invariant parameters,
//! covariant tuples and flattened unions.
use std::{collections::HashMap, sync::Arc};

use crate::{
    BitsKind, DataType, ExceptionKind, MachineState, Object, StructObject, Thrown, TypeFlags,
    TypeParam, Value,
};

/// Well-known datatypes, all of them also reachable as globals.
#[derive(Debug, Clone, Default)]
pub struct SpecialTypes {
    pub any: Value,
    pub type_: Value,
    pub datatype: Value,
    pub union: Value,
    pub function: Value,
    pub builtin: Value,
    pub bits: [Value; BitsKind::ALL.len()],
    pub string: Value,
    pub symbol: Value,
    pub nothing: Value,
    pub undef_initializer: Value,
    pub abstract_array: Value,
    pub array: Value,
    pub vector: Value,
    pub abstract_dict: Value,
    pub dict: Value,
    pub pair: Value,
    pub tuple: Value,
    pub unit_range: Value,
    pub exception: Value,
    pub exceptions: HashMap<ExceptionKind, Value>,
}

impl SpecialTypes {
    #[inline]
    pub fn bits_type(&self, kind: BitsKind) -> Value {
        self.bits[kind as usize]
    }
}

#[derive(Debug, Default)]
pub struct TypeCache {
    pub applied: HashMap<(Value, Vec<TypeParam>), Value, ahash::RandomState>,
    pub unions: HashMap<Vec<Value>, Value, ahash::RandomState>,
}

impl TypeCache {
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.applied.values().chain(self.unions.values()).copied()
    }
}

impl MachineState {
    pub(crate) fn bootstrap_types(&mut self) {
        // DataType is its own type
        let datatype = self.heap.allocate(
            Value::NULL,
            Object::DataType(DataType::new("DataType", None, TypeFlags::empty())),
        );
        self.heap.set_type(datatype, datatype);
        self.types.datatype = datatype;

        let any = self.define_type("Any", None, TypeFlags::ABSTRACT);
        self.types.any = any;

        let type_ = self.define_generic(
            "Type",
            Some(any),
            TypeFlags::ABSTRACT | TypeFlags::TYPE_TYPE,
            &["T"],
        );
        self.types.type_ = type_;
        if let Some(ty) = self.datatype_mut(datatype) {
            ty.supertype = Some(type_);
        }
        self.define_global("DataType", datatype);

        self.types.union = self.define_type("Union", Some(type_), TypeFlags::empty());

        self.types.function = self.define_type("Function", Some(any), TypeFlags::ABSTRACT);
        self.types.builtin =
            self.define_type("Builtin", Some(self.types.function), TypeFlags::empty());

        self.bootstrap_numbers();

        let abstract_char = self.define_type("AbstractChar", Some(any), TypeFlags::ABSTRACT);
        let char_ = self.define_bits_type(BitsKind::Char, abstract_char);
        self.types.bits[BitsKind::Char as usize] = char_;

        let abstract_string = self.define_type("AbstractString", Some(any), TypeFlags::ABSTRACT);
        self.types.string = self.define_type("String", Some(abstract_string), TypeFlags::empty());
        self.types.symbol = self.define_type("Symbol", Some(any), TypeFlags::empty());

        self.types.nothing = self.define_singleton("Nothing", "nothing");
        self.types.undef_initializer = self.define_singleton("UndefInitializer", "undef");

        self.types.abstract_array = self.define_generic(
            "AbstractArray",
            Some(any),
            TypeFlags::ABSTRACT,
            &["T", "N"],
        );
        self.types.array = self.define_generic(
            "Array",
            Some(self.types.abstract_array),
            TypeFlags::ARRAY | TypeFlags::MUTABLE,
            &["T", "N"],
        );
        self.types.abstract_dict =
            self.define_generic("AbstractDict", Some(any), TypeFlags::ABSTRACT, &["K", "V"]);
        self.types.dict = self.define_generic(
            "Dict",
            Some(self.types.abstract_dict),
            TypeFlags::MUTABLE,
            &["K", "V"],
        );
        self.types.pair = self.define_generic("Pair", Some(any), TypeFlags::STRUCT, &["A", "B"]);
        let (first, second) = (self.strings.add("first"), self.strings.add("second"));
        if let Some(pair) = self.datatype_mut(self.types.pair) {
            pair.field_names = vec![first, second];
            pair.field_types = vec![any, any];
        }
        self.types.tuple =
            self.define_type("Tuple", Some(any), TypeFlags::TUPLE | TypeFlags::UNIONALL);

        let int = self.types.bits_type(BitsKind::Int64);
        self.types.unit_range =
            self.define_type("UnitRange", Some(any), TypeFlags::STRUCT | TypeFlags::ISBITS);
        let (start, stop) = (self.strings.add("start"), self.strings.add("stop"));
        if let Some(range) = self.datatype_mut(self.types.unit_range) {
            range.field_names = vec![start, stop];
            range.field_types = vec![int, int];
        }

        self.define_generic(
            "Ref",
            Some(any),
            TypeFlags::ABSTRACT | TypeFlags::ABSTRACT_REF,
            &["T"],
        );

        self.bootstrap_exceptions();
    }

    fn bootstrap_numbers(&mut self) {
        let any = self.types.any;
        let number = self.define_type("Number", Some(any), TypeFlags::ABSTRACT);
        let real = self.define_type("Real", Some(number), TypeFlags::ABSTRACT);
        let integer = self.define_type("Integer", Some(real), TypeFlags::ABSTRACT);
        let signed = self.define_type("Signed", Some(integer), TypeFlags::ABSTRACT);
        let unsigned = self.define_type("Unsigned", Some(integer), TypeFlags::ABSTRACT);
        let float = self.define_type("AbstractFloat", Some(real), TypeFlags::ABSTRACT);

        for kind in BitsKind::ALL {
            let supertype = match kind {
                BitsKind::Char => continue,
                BitsKind::Bool => integer,
                kind if kind.is_signed() => signed,
                kind if kind.is_unsigned() => unsigned,
                _ => float,
            };
            let ty = self.define_bits_type(kind, supertype);
            self.types.bits[kind as usize] = ty;
        }
    }

    fn bootstrap_exceptions(&mut self) {
        let exception = self.define_type("Exception", Some(self.types.any), TypeFlags::ABSTRACT);
        self.types.exception = exception;
        let msg = self.strings.add("msg");
        let string = self.types.string;
        for kind in ExceptionKind::ALL {
            let ty = self.define_type(kind.type_name(), Some(exception), TypeFlags::STRUCT);
            if let Some(data) = self.datatype_mut(ty) {
                data.field_names = vec![msg];
                data.field_types = vec![string];
            }
            self.types.exceptions.insert(kind, ty);
        }
    }

    pub(crate) fn define_type(
        &mut self,
        name: &str,
        supertype: Option<Value>,
        flags: TypeFlags,
    ) -> Value {
        let ty = self.heap.allocate(
            self.types.datatype,
            Object::DataType(DataType::new(name, supertype, flags)),
        );
        self.define_global(name, ty);
        ty
    }

    /// field-less immutable struct, its only value becomes `global`
    fn define_singleton(&mut self, name: &str, global: &str) -> Value {
        let ty = self.define_type(
            name,
            Some(self.types.any),
            TypeFlags::STRUCT | TypeFlags::ISBITS,
        );
        let instance = self.attach_instance(ty);
        self.define_global(global, instance);
        ty
    }

    fn attach_instance(&mut self, ty: Value) -> Value {
        let instance = self
            .heap
            .allocate(ty, Object::Struct(StructObject { fields: Vec::new() }));
        if let Some(data) = self.datatype_mut(ty) {
            data.instance = Some(instance);
        }
        instance
    }

    fn define_bits_type(&mut self, kind: BitsKind, supertype: Value) -> Value {
        let ty = self.define_type(
            kind.type_name(),
            Some(supertype),
            TypeFlags::PRIMITIVE | TypeFlags::ISBITS,
        );
        if let Some(data) = self.datatype_mut(ty) {
            data.bits = Some(kind);
        }
        ty
    }

    fn define_generic(
        &mut self,
        name: &str,
        supertype: Option<Value>,
        flags: TypeFlags,
        params: &[&str],
    ) -> Value {
        let ty = self.define_type(name, supertype, flags | TypeFlags::UNIONALL);
        if let Some(data) = self.datatype_mut(ty) {
            data.parameter_names = params.iter().map(|&p| Arc::from(p)).collect();
            data.parameters = vec![TypeParam::Unbound; params.len()];
        }
        ty
    }

    /// Defines a concrete struct type; fields are `(name, type)` pairs.
    pub(crate) fn define_struct(
        &mut self,
        name: &str,
        mutable: bool,
        fields: &[(Arc<str>, Value)],
    ) -> Result<Value, Thrown> {
        if self.globals.contains_key(name) {
            return Err(Thrown::raise(
                ExceptionKind::Error,
                format!("invalid redefinition of constant {name}"),
            ));
        }
        let mut flags = TypeFlags::STRUCT;
        if mutable {
            flags |= TypeFlags::MUTABLE;
        } else if fields.iter().all(|&(_, ty)| self.type_flags(ty).contains(TypeFlags::ISBITS)) {
            flags |= TypeFlags::ISBITS;
        }
        let field_names = fields
            .iter()
            .map(|(field, _)| self.strings.add(field))
            .collect();
        let field_types = fields.iter().map(|&(_, ty)| ty).collect();

        let ty = self.heap.allocate(
            self.types.datatype,
            Object::DataType(DataType {
                field_names,
                field_types,
                ..DataType::new(name, Some(self.types.any), flags)
            }),
        );
        if fields.is_empty() && !mutable {
            self.attach_instance(ty);
        }
        self.define_global(name, ty);
        Ok(ty)
    }

    #[inline]
    pub fn datatype(&self, ty: Value) -> Option<&DataType> {
        match &self.heap.get(ty)?.object {
            Object::DataType(data) => Some(data),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn datatype_mut(&mut self, ty: Value) -> Option<&mut DataType> {
        match &mut self.heap.get_mut(ty)?.object {
            Object::DataType(data) => Some(data),
            _ => None,
        }
    }

    pub fn type_of(&self, value: Value) -> Value {
        self.heap.get(value).map_or(Value::NULL, |entry| entry.ty)
    }

    pub fn type_flags(&self, ty: Value) -> TypeFlags {
        self.datatype(ty).map_or(TypeFlags::empty(), |data| data.flags)
    }

    pub fn is_type(&self, value: Value) -> bool {
        self.datatype(value).is_some()
    }

    /// the generic a parametric type was applied from, or the type itself
    pub fn root_type(&self, ty: Value) -> Value {
        self.datatype(ty).and_then(|data| data.generic).unwrap_or(ty)
    }

    pub fn isa(&self, value: Value, ty: Value) -> bool {
        self.is_subtype(self.type_of(value), ty)
    }

    pub fn is_subtype(&self, sub: Value, sup: Value) -> bool {
        if sub == sup {
            return true;
        }
        let (Some(a), Some(b)) = (self.datatype(sub), self.datatype(sup)) else {
            return false;
        };
        if sup == self.types.any {
            return true;
        }
        if a.is_union() {
            return union_members(a).all(|member| self.is_subtype(member, sup));
        }
        if b.is_union() {
            return union_members(b).any(|member| self.is_subtype(sub, member));
        }

        if self.root_type(sub) == self.root_type(sup) {
            if b.is_tuple() {
                if b.generic.is_none() {
                    return true;
                }
                return a.parameters.len() == b.parameters.len()
                    && a.parameters.iter().zip(&b.parameters).all(|pair| match pair {
                        (TypeParam::Type(x), TypeParam::Type(y)) => self.is_subtype(*x, *y),
                        (x, y) => x == y,
                    });
            }
            return a.parameters.len() == b.parameters.len()
                && a.parameters.iter().zip(&b.parameters).all(|pair| match pair {
                    (_, TypeParam::Unbound) => true,
                    (TypeParam::Unbound, _) => false,
                    (x, y) => x == y,
                });
        }

        match a.supertype {
            Some(supertype) if supertype != sub => self.is_subtype(supertype, sup),
            _ => false,
        }
    }

    /// `supertype(Any) == Any`
    pub fn supertype_of(&self, ty: Value) -> Value {
        match self.datatype(ty) {
            Some(data) => data.supertype.unwrap_or(self.types.any),
            None => Value::NULL,
        }
    }

    /// `base{args...}`, canonicalized
    pub fn apply_type(&mut self, base: Value, args: &[TypeParam]) -> Result<Value, Thrown> {
        let Some(data) = self.datatype(base) else {
            return Err(Thrown::raise(
                ExceptionKind::Type,
                "type application on a value that is not a type",
            ));
        };

        if base == self.types.union {
            let members = args
                .iter()
                .map(|arg| match *arg {
                    TypeParam::Type(ty) => Ok(ty),
                    _ => Err(Thrown::raise(
                        ExceptionKind::Type,
                        "Union parameters must be types",
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(self.make_union(&members));
        }

        let root = data.generic.unwrap_or(base);
        if root == self.types.tuple {
            if args.iter().any(|arg| !matches!(arg, TypeParam::Type(_))) {
                return Err(Thrown::raise(
                    ExceptionKind::Type,
                    "Tuple parameters must be types",
                ));
            }
            return Ok(self.applied_type(root, args.to_vec()));
        }

        let mut params = data.parameters.clone();
        let mut args = args.iter();
        for slot in params.iter_mut() {
            if matches!(slot, TypeParam::Unbound) {
                match args.next() {
                    Some(arg) => *slot = *arg,
                    None => break,
                }
            }
        }
        if args.next().is_some() {
            let name = self.type_display(base);
            return Err(Thrown::raise(
                ExceptionKind::Type,
                format!("too many parameters for type {name}"),
            ));
        }
        Ok(self.applied_type(root, params))
    }

    fn applied_type(&mut self, root: Value, params: Vec<TypeParam>) -> Value {
        let key = (root, params);
        if let Some(&ty) = self.type_cache.applied.get(&key) {
            return ty;
        }
        let (root, params) = key;
        let Some(template) = self.datatype(root).cloned() else {
            return Value::NULL;
        };

        let all_bound = params.iter().all(|p| !matches!(p, TypeParam::Unbound));
        let mut flags = template.flags;
        if all_bound {
            flags.remove(TypeFlags::UNIONALL);
        }
        if template.is_tuple()
            && params.iter().all(|p| match *p {
                TypeParam::Type(ty) => self.type_flags(ty).contains(TypeFlags::ISBITS),
                _ => false,
            })
        {
            flags |= TypeFlags::ISBITS;
        }

        // Array{T,N} <: AbstractArray{T,N}, Dict{K,V} <: AbstractDict{K,V}
        let supertype = match template.supertype {
            Some(supertype)
                if self
                    .datatype(supertype)
                    .is_some_and(|s| {
                        s.parameters.len() == params.len() && s.has_unbound_parameters()
                    }) =>
            {
                Some(self.applied_type(supertype, params.clone()))
            }
            other => other,
        };

        // generic structs bind their fields to the parameter at the same position
        let field_types = if template.field_types.len() == params.len() {
            params
                .iter()
                .zip(&template.field_types)
                .map(|(param, &default)| match *param {
                    TypeParam::Type(ty) => ty,
                    _ => default,
                })
                .collect()
        } else {
            template.field_types.clone()
        };

        let ty = self.heap.allocate(
            self.types.datatype,
            Object::DataType(DataType {
                name: template.name.clone(),
                supertype,
                generic: Some(root),
                parameter_names: template.parameter_names.clone(),
                parameters: params.clone(),
                field_names: template.field_names.clone(),
                field_types,
                flags,
                instance: None,
                bits: None,
            }),
        );
        self.type_cache.applied.insert((root, params), ty);
        ty
    }

    pub fn make_union(&mut self, members: &[Value]) -> Value {
        let mut flat = Vec::with_capacity(members.len());
        for &member in members {
            match self.datatype(member) {
                Some(data) if data.is_union() => flat.extend(union_members(data)),
                _ => flat.push(member),
            }
        }
        flat.sort();
        flat.dedup();
        if let [single] = flat[..] {
            return single;
        }
        if let Some(&ty) = self.type_cache.unions.get(&flat) {
            return ty;
        }
        let mut data = DataType::new("Union", Some(self.types.type_), TypeFlags::UNION);
        data.parameters = flat.iter().map(|&ty| TypeParam::Type(ty)).collect();
        let ty = self.heap.allocate(self.types.union, Object::DataType(data));
        self.type_cache.unions.insert(flat, ty);
        ty
    }

    pub fn tuple_type(&mut self, elements: &[Value]) -> Value {
        let params = elements
            .iter()
            .map(|&element| TypeParam::Type(self.type_of(element)))
            .collect();
        self.applied_type(self.types.tuple, params)
    }

    /// element type and rank of an array type
    pub fn array_parameters(&self, ty: Value) -> Option<(Value, usize)> {
        let data = self.datatype(ty)?;
        if self.root_type(ty) != self.types.array {
            return None;
        }
        match data.parameters[..] {
            [TypeParam::Type(element), TypeParam::Int(rank)] => Some((element, rank as usize)),
            _ => None,
        }
    }

    pub fn type_display(&self, ty: Value) -> String {
        let Some(data) = self.datatype(ty) else {
            return "<invalid>".to_string();
        };
        if data.is_union() {
            let members = union_members(data)
                .map(|member| self.type_display(member))
                .collect::<Vec<_>>();
            return format!("Union{{{}}}", members.join(", "));
        }
        if data.generic.is_none() || data.parameters.is_empty() {
            return data.name.to_string();
        }
        if self.root_type(ty) == self.types.array {
            match data.parameters[..] {
                [TypeParam::Type(element), TypeParam::Int(1)] => {
                    return format!("Vector{{{}}}", self.type_display(element));
                }
                [TypeParam::Unbound, TypeParam::Int(1)] => return "Vector".to_string(),
                _ => (),
            }
        }
        let bound = data
            .parameters
            .iter()
            .take_while(|p| !matches!(p, TypeParam::Unbound))
            .map(|p| match *p {
                TypeParam::Type(param) => self.type_display(param),
                TypeParam::Int(n) => n.to_string(),
                TypeParam::Unbound => unreachable!(),
            })
            .collect::<Vec<_>>();
        if bound.is_empty() {
            return data.name.to_string();
        }
        format!("{}{{{}}}", data.name, bound.join(", "))
    }
}

pub(crate) fn union_members(data: &DataType) -> impl Iterator<Item = Value> + '_ {
    data.parameters.iter().filter_map(|param| match *param {
        TypeParam::Type(ty) => Some(ty),
        _ => None,
    })
}

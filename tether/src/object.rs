use std::sync::Arc;

use crate::{BitsKind, InternedId, TypeFlags, Value, Visitable, Visitor};

/// Everything the reference machine can allocate.
#[derive(Debug, Clone)]
pub enum Object {
    Bits(BitsObject),
    String(Arc<str>),
    Symbol(InternedId),
    Array(ArrayObject),
    Tuple(Vec<Value>),
    Dict(DictObject),
    Struct(StructObject),
    DataType(DataType),
    Builtin(BuiltinObject),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitsObject {
    pub kind: BitsKind,
    pub bits: u64,
}

/// Column-major n-dimensional array, every element boxed.
#[derive(Debug, Clone)]
pub struct ArrayObject {
    pub dims: Vec<usize>,
    pub data: Vec<Value>,
}

/// Insertion-ordered dictionary; lookups compare keys with
/// [`MachineState::values_equal`](crate::MachineState::values_equal).
#[derive(Debug, Clone, Default)]
pub struct DictObject {
    pub entries: Vec<(Value, Value)>,
}

#[derive(Debug, Clone)]
pub struct StructObject {
    pub fields: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct BuiltinObject {
    pub index: usize,
}

/// A type parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeParam {
    /// free type variable, the type is a `UnionAll` while any slot is unbound
    Unbound,
    Type(Value),
    Int(i64),
}

/// Foreign datatype descriptor.
#[derive(Debug, Clone)]
pub struct DataType {
    pub name: Arc<str>,
    pub supertype: Option<Value>,
    /// the unparameterized type this one was applied from
    pub generic: Option<Value>,
    pub parameter_names: Vec<Arc<str>>,
    pub parameters: Vec<TypeParam>,
    pub field_names: Vec<InternedId>,
    pub field_types: Vec<Value>,
    pub flags: TypeFlags,
    pub instance: Option<Value>,
    /// set for primitive types only
    pub bits: Option<BitsKind>,
}

impl DataType {
    pub fn new(name: &str, supertype: Option<Value>, flags: TypeFlags) -> Self {
        Self {
            name: Arc::from(name),
            supertype,
            generic: None,
            parameter_names: Vec::new(),
            parameters: Vec::new(),
            field_names: Vec::new(),
            field_types: Vec::new(),
            flags,
            instance: None,
            bits: None,
        }
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeFlags::ABSTRACT)
    }

    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.flags.contains(TypeFlags::MUTABLE)
    }

    #[inline]
    pub fn is_union(&self) -> bool {
        self.flags.contains(TypeFlags::UNION)
    }

    #[inline]
    pub fn is_tuple(&self) -> bool {
        self.flags.contains(TypeFlags::TUPLE)
    }

    pub fn field_index(&self, name: InternedId) -> Option<usize> {
        self.field_names.iter().position(|&field| field == name)
    }

    pub fn has_unbound_parameters(&self) -> bool {
        self.parameters
            .iter()
            .any(|param| matches!(param, TypeParam::Unbound))
    }
}

impl ArrayObject {
    pub fn new(dims: Vec<usize>, fill: Value) -> Self {
        let len = dims.iter().product();
        Self {
            dims,
            data: vec![fill; len],
        }
    }

    pub fn vector(data: Vec<Value>) -> Self {
        Self {
            dims: vec![data.len()],
            data,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// keeps the single extent of a vector in sync after a resize
    pub fn sync_vector_dims(&mut self) {
        if self.dims.len() == 1 {
            self.dims[0] = self.data.len();
        }
    }
}

impl Visitable for Object {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        match self {
            Self::Bits(_) | Self::String(_) | Self::Symbol(_) | Self::Builtin(_) => (),
            Self::Array(array) => array.data.iter().for_each(|&v| visitor.visit(v)),
            Self::Tuple(elements) => elements.iter().for_each(|&v| visitor.visit(v)),
            Self::Dict(dict) => dict.entries.iter().for_each(|&(k, v)| {
                visitor.visit(k);
                visitor.visit(v);
            }),
            Self::Struct(object) => object.fields.iter().for_each(|&v| visitor.visit(v)),
            Self::DataType(ty) => ty.visit_edges(visitor),
        }
    }
}

impl Visitable for DataType {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        self.supertype.into_iter().for_each(|v| visitor.visit(v));
        self.generic.into_iter().for_each(|v| visitor.visit(v));
        self.instance.into_iter().for_each(|v| visitor.visit(v));
        for param in &self.parameters {
            if let TypeParam::Type(v) = *param {
                visitor.visit(v);
            }
        }
        self.field_types.iter().for_each(|&v| visitor.visit(v));
    }
}

use std::{collections::HashMap, sync::Arc};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::{
    ArrayObject, BitsKind, BitsObject, BuiltinObject, GarbageCollectionStats, Heap, HeapSettings,
    InternedStrings, Object, PRIMITIVES, Runtime, SpecialTypes, StructObject, TypeCache, TypeFlags,
    TypeParam, Value,
};

/// Exception types the reference machine raises by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    Error,
    Argument,
    Bounds,
    Domain,
    Inexact,
    Key,
    Method,
    Type,
    UndefRef,
    UndefVar,
    Field,
    Parse,
    Dimension,
}

impl ExceptionKind {
    pub const ALL: [Self; 13] = [
        Self::Error,
        Self::Argument,
        Self::Bounds,
        Self::Domain,
        Self::Inexact,
        Self::Key,
        Self::Method,
        Self::Type,
        Self::UndefRef,
        Self::UndefVar,
        Self::Field,
        Self::Parse,
        Self::Dimension,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            Self::Error => "ErrorException",
            Self::Argument => "ArgumentError",
            Self::Bounds => "BoundsError",
            Self::Domain => "DomainError",
            Self::Inexact => "InexactError",
            Self::Key => "KeyError",
            Self::Method => "MethodError",
            Self::Type => "TypeError",
            Self::UndefRef => "UndefRefError",
            Self::UndefVar => "UndefVarError",
            Self::Field => "FieldError",
            Self::Parse => "ParseError",
            Self::Dimension => "DimensionMismatch",
        }
    }
}

/// Unwinding state of a foreign computation.
#[derive(Debug, Clone, PartialEq)]
pub enum Thrown {
    Raise { kind: ExceptionKind, message: String },
    /// an exception object thrown with `throw`
    Value(Value),
}

impl Thrown {
    pub fn raise(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self::Raise {
            kind,
            message: message.into(),
        }
    }
}

pub type ExecutionResult = Result<Value, Thrown>;

/// Optional overrides, everything left `None` takes the [`MachineSettings`]
/// default.
#[derive(Debug, Clone, Default)]
pub struct MachineCreateInfo {
    pub gc_threshold: Option<usize>,
    pub initial_capacity: Option<usize>,
    /// collect at every safepoint, exposes values that are not anchored
    pub stress_collection: Option<bool>,
}

#[derive(Debug, Default)]
pub struct MachineSettings {
    pub heap: HeapSettings,
    pub stress_collection: bool,
}

impl From<MachineCreateInfo> for MachineSettings {
    fn from(info: MachineCreateInfo) -> Self {
        let defaults = HeapSettings::default();
        Self {
            heap: HeapSettings {
                gc_threshold: info.gc_threshold.unwrap_or(defaults.gc_threshold),
                initial_capacity: info.initial_capacity.unwrap_or(defaults.initial_capacity),
            },
            stress_collection: info.stress_collection.unwrap_or(false),
        }
    }
}

/// Everything the reference machine owns, guarded by the [`Machine`] lock.
#[derive(Debug)]
pub struct MachineState {
    pub heap: Heap,
    pub strings: InternedStrings,
    pub types: SpecialTypes,
    pub type_cache: TypeCache,
    pub globals: HashMap<Arc<str>, Value, ahash::RandomState>,
    pub anchors: HashMap<String, Value, ahash::RandomState>,
    pub exception: Option<Value>,
    stress_collection: bool,
}

const MODULE_PREFIXES: [&str; 3] = ["Base.", "Core.", "Main."];

impl MachineState {
    pub fn new(settings: MachineSettings) -> Self {
        let mut state = Self {
            heap: Heap::new(settings.heap),
            strings: InternedStrings::new(),
            types: SpecialTypes::default(),
            type_cache: TypeCache::default(),
            globals: HashMap::default(),
            anchors: HashMap::default(),
            exception: None,
            stress_collection: settings.stress_collection,
        };
        state.bootstrap_types();
        state.install_primitives();

        let vector = state.apply_type(
            state.types.array,
            &[TypeParam::Unbound, TypeParam::Int(1)],
        );
        if let Ok(vector) = vector {
            state.types.vector = vector;
            state.define_global("Vector", vector);
        }
        for (alias, kind) in [("Int", BitsKind::Int64), ("UInt", BitsKind::UInt64)] {
            let ty = state.types.bits_type(kind);
            state.define_global(alias, ty);
        }
        for (name, value) in [("true", true), ("false", false)] {
            let v = state.alloc_bool(value);
            state.define_global(name, v);
        }
        debug!(
            "machine bootstrapped with {} globals, {} live objects",
            state.globals.len(),
            state.heap.live_count()
        );
        state
    }

    fn install_primitives(&mut self) {
        for (index, primitive) in PRIMITIVES.iter().enumerate() {
            let builtin = self
                .heap
                .allocate(self.types.builtin, Object::Builtin(BuiltinObject { index }));
            self.define_global(primitive.name, builtin);
        }
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.globals.insert(Arc::from(name), value);
    }

    /// Resolves a global, `Base.`, `Core.` and `Main.` prefixes are optional.
    pub fn global(&self, name: &str) -> Option<Value> {
        let bare = MODULE_PREFIXES
            .iter()
            .find_map(|prefix| name.strip_prefix(prefix))
            .unwrap_or(name);
        self.globals.get(bare).copied()
    }

    #[inline]
    pub fn nothing(&self) -> Value {
        self.datatype(self.types.nothing)
            .and_then(|data| data.instance)
            .unwrap_or(Value::NULL)
    }

    #[inline]
    pub fn undef(&self) -> Value {
        self.datatype(self.types.undef_initializer)
            .and_then(|data| data.instance)
            .unwrap_or(Value::NULL)
    }

    /// Collects if one is due, `temporaries` are rooted for the duration.
    pub fn safepoint(&mut self, temporaries: &[Value]) {
        if self.heap.is_paused() {
            return;
        }
        if self.heap.should_collect() || self.stress_collection {
            self.collect(temporaries);
        }
    }

    pub fn collect(&mut self, temporaries: &[Value]) -> usize {
        let roots: Vec<Value> = self
            .globals
            .values()
            .chain(self.anchors.values())
            .copied()
            .chain(self.type_cache.roots())
            .chain(self.exception)
            .chain(temporaries.iter().copied())
            .collect();
        self.heap.collect(&roots)
    }

    // allocation

    pub fn alloc_bits(&mut self, kind: BitsKind, bits: u64) -> Value {
        let ty = self.types.bits_type(kind);
        let bits = kind.truncate(bits);
        self.heap.allocate(ty, Object::Bits(BitsObject { kind, bits }))
    }

    pub fn alloc_int(&mut self, value: i64) -> Value {
        self.alloc_bits(BitsKind::Int64, value as u64)
    }

    pub fn alloc_bool(&mut self, value: bool) -> Value {
        self.alloc_bits(BitsKind::Bool, value as u64)
    }

    pub fn alloc_float(&mut self, value: f64) -> Value {
        self.alloc_bits(BitsKind::Float64, value.to_bits())
    }

    pub fn alloc_string(&mut self, value: &str) -> Value {
        self.heap
            .allocate(self.types.string, Object::String(Arc::from(value)))
    }

    pub fn alloc_symbol(&mut self, name: &str) -> Value {
        let id = self.strings.add(name);
        self.heap.allocate(self.types.symbol, Object::Symbol(id))
    }

    pub fn alloc_array(&mut self, ty: Value, array: ArrayObject) -> Value {
        self.heap.allocate(ty, Object::Array(array))
    }

    pub fn alloc_tuple(&mut self, elements: Vec<Value>) -> Value {
        let ty = self.tuple_type(&elements);
        self.heap.allocate(ty, Object::Tuple(elements))
    }

    pub fn alloc_struct(&mut self, ty: Value, fields: Vec<Value>) -> Value {
        self.heap.allocate(ty, Object::Struct(StructObject { fields }))
    }

    /// zero of a bits type, `nothing` for everything else
    pub fn default_element(&mut self, element: Value) -> Value {
        match self.datatype(element).and_then(|data| data.bits) {
            Some(kind) => self.alloc_bits(kind, 0),
            None => self.nothing(),
        }
    }

    // access

    pub fn object(&self, value: Value) -> Result<&Object, Thrown> {
        self.heap.get(value).map(|entry| &entry.object).ok_or_else(|| {
            Thrown::raise(
                ExceptionKind::UndefRef,
                format!("access to undefined reference {value:?}"),
            )
        })
    }

    pub fn object_mut(&mut self, value: Value) -> Result<&mut Object, Thrown> {
        match self.heap.get_mut(value) {
            Some(entry) => Ok(&mut entry.object),
            None => Err(Thrown::raise(
                ExceptionKind::UndefRef,
                format!("access to undefined reference {value:?}"),
            )),
        }
    }

    pub fn bits_of(&self, value: Value) -> Option<BitsObject> {
        match self.heap.get(value)?.object {
            Object::Bits(bits) => Some(bits),
            _ => None,
        }
    }

    /// any integer or `Bool` widened to `i64`
    pub fn int_of(&self, value: Value) -> Result<i64, Thrown> {
        match self.bits_of(value) {
            Some(BitsObject { kind, bits }) if kind == BitsKind::Bool || kind.is_signed() => {
                Ok(kind.sign_extend(bits))
            }
            Some(BitsObject { kind, bits }) if kind.is_unsigned() => {
                i64::try_from(bits).map_err(|_| {
                    Thrown::raise(ExceptionKind::Inexact, format!("InexactError: Int64({bits})"))
                })
            }
            _ => Err(self.type_error("Integer", value)),
        }
    }

    /// 1-based index argument converted to a 0-based offset
    pub fn index_of(&self, value: Value) -> Result<i64, Thrown> {
        Ok(self.int_of(value)? - 1)
    }

    pub fn float_of(&self, value: Value) -> Option<f64> {
        let BitsObject { kind, bits } = self.bits_of(value)?;
        Some(match kind {
            BitsKind::Float64 => f64::from_bits(bits),
            BitsKind::Float32 => f32::from_bits(bits as u32) as f64,
            kind if kind.is_unsigned() => bits as f64,
            BitsKind::Char => return None,
            kind => kind.sign_extend(bits) as f64,
        })
    }

    pub fn string_of(&self, value: Value) -> Option<Arc<str>> {
        match &self.heap.get(value)?.object {
            Object::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn symbol_of(&self, value: Value) -> Option<Arc<str>> {
        match self.heap.get(value)?.object {
            Object::Symbol(id) => self.strings.get(id),
            _ => None,
        }
    }

    pub fn type_error(&self, expected: &str, found: Value) -> Thrown {
        Thrown::raise(
            ExceptionKind::Type,
            format!(
                "TypeError: expected {expected}, got a value of type {}",
                self.type_display(self.type_of(found))
            ),
        )
    }

    /// `isequal` semantics: identity, numeric equality and structural
    /// equality for strings, symbols, tuples and pairs.
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        if a == b {
            return true;
        }
        let (Some(x), Some(y)) = (self.heap.get(a), self.heap.get(b)) else {
            return false;
        };
        match (&x.object, &y.object) {
            (Object::Bits(p), Object::Bits(q)) => {
                if p.kind == q.kind {
                    return p.bits == q.bits;
                }
                if p.kind == BitsKind::Char || q.kind == BitsKind::Char {
                    return false;
                }
                if let (Ok(m), Ok(n)) = (self.int_of(a), self.int_of(b)) {
                    return m == n;
                }
                matches!((self.float_of(a), self.float_of(b)), (Some(m), Some(n)) if m == n)
            }
            (Object::String(p), Object::String(q)) => p == q,
            (Object::Symbol(p), Object::Symbol(q)) => p == q,
            (Object::Tuple(p), Object::Tuple(q)) => {
                p.len() == q.len() && p.iter().zip(q).all(|(&m, &n)| self.values_equal(m, n))
            }
            (Object::Struct(p), Object::Struct(q))
                if x.ty == y.ty && !self.type_flags(x.ty).contains(TypeFlags::MUTABLE) =>
            {
                p.fields.len() == q.fields.len()
                    && p.fields.iter().zip(&q.fields).all(|(&m, &n)| self.values_equal(m, n))
            }
            _ => false,
        }
    }

    /// `===`: same object or indistinguishable immutable values
    pub fn values_identical(&self, a: Value, b: Value) -> bool {
        if a == b {
            return true;
        }
        let (Some(x), Some(y)) = (self.heap.get(a), self.heap.get(b)) else {
            return false;
        };
        match (&x.object, &y.object) {
            (Object::Bits(p), Object::Bits(q)) => p == q,
            (Object::String(p), Object::String(q)) => p == q,
            (Object::Symbol(p), Object::Symbol(q)) => p == q,
            (Object::Tuple(p), Object::Tuple(q)) => {
                p.len() == q.len() && p.iter().zip(q).all(|(&m, &n)| self.values_identical(m, n))
            }
            _ => false,
        }
    }

    /// short rendering used in error messages
    pub fn repr(&self, value: Value) -> String {
        let Some(entry) = self.heap.get(value) else {
            return "#undef".to_string();
        };
        match &entry.object {
            Object::Bits(BitsObject { kind, bits }) => match kind {
                BitsKind::Bool => (*bits != 0).to_string(),
                BitsKind::Char => char::from_u32(*bits as u32)
                    .map_or_else(|| "'?'".to_string(), |c| format!("{c:?}")),
                BitsKind::Float32 | BitsKind::Float64 => {
                    let f = self.float_of(value).unwrap_or_default();
                    format!("{f:?}")
                }
                _ => match self.int_of(value) {
                    Ok(n) => n.to_string(),
                    Err(_) => bits.to_string(),
                },
            },
            Object::String(s) => format!("{s:?}"),
            Object::Symbol(id) => format!(":{}", self.strings.get(*id).as_deref().unwrap_or("?")),
            Object::DataType(_) => self.type_display(value),
            Object::Builtin(builtin) => PRIMITIVES
                .get(builtin.index)
                .map_or("builtin", |p| p.name)
                .to_string(),
            Object::Tuple(elements) => {
                let items = elements.iter().map(|&e| self.repr(e)).collect::<Vec<_>>();
                match items.len() {
                    1 => format!("({},)", items[0]),
                    _ => format!("({})", items.join(", ")),
                }
            }
            Object::Array(array) if array.rank() == 1 => {
                let items = array.data.iter().map(|&e| self.repr(e)).collect::<Vec<_>>();
                format!("[{}]", items.join(", "))
            }
            Object::Array(array) => {
                let dims = array.dims.iter().map(usize::to_string).collect::<Vec<_>>();
                format!("{} {}", dims.join("×"), self.type_display(entry.ty))
            }
            Object::Struct(_) if entry.ty == self.types.nothing => "nothing".to_string(),
            Object::Struct(object) => {
                let fields = object.fields.iter().map(|&f| self.repr(f)).collect::<Vec<_>>();
                format!("{}({})", self.type_display(entry.ty), fields.join(", "))
            }
            Object::Dict(dict) => {
                let ty = self.type_display(entry.ty);
                format!("{ty} with {} entries", dict.entries.len())
            }
        }
    }

    pub fn raise(&mut self, thrown: Thrown) {
        let exception = match thrown {
            Thrown::Value(value) => value,
            Thrown::Raise { kind, message } => self.new_exception(kind, &message),
        };
        trace!("raised {}", self.repr(exception));
        self.exception = Some(exception);
    }

    pub fn new_exception(&mut self, kind: ExceptionKind, message: &str) -> Value {
        let ty = self
            .types
            .exceptions
            .get(&kind)
            .copied()
            .unwrap_or(self.types.exception);
        let msg = self.alloc_string(message);
        self.alloc_struct(ty, vec![msg])
    }

    pub fn exception_message(&self, exception: Value) -> Option<String> {
        let ty = self.type_of(exception);
        let msg = self.strings.lookup("msg")?;
        let index = self.datatype(ty)?.field_index(msg)?;
        match self.heap.get(exception)?.object {
            Object::Struct(ref object) => {
                self.string_of(*object.fields.get(index)?).map(|s| s.to_string())
            }
            _ => None,
        }
    }

    /// Runs `body`, turning an escaping exception into the pending one.
    fn guarded(&mut self, body: impl FnOnce(&mut Self) -> ExecutionResult) -> Value {
        match body(self) {
            Ok(value) => value,
            Err(thrown) => {
                self.raise(thrown);
                Value::NULL
            }
        }
    }
}

/// In-process foreign runtime: a small dynamically typed language with
/// parametric types, n-dimensional column-major arrays and a tracing
/// collector.
#[derive(Debug)]
pub struct Machine {
    state: Mutex<MachineState>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineCreateInfo::default())
    }
}

impl Machine {
    pub fn new(info: MachineCreateInfo) -> Self {
        Self {
            state: Mutex::new(MachineState::new(info.into())),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut MachineState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn stats(&self) -> GarbageCollectionStats {
        self.state.lock().heap.stats()
    }
}

impl Runtime for Machine {
    fn evaluate(&self, code: &str) -> Value {
        let mut state = self.state.lock();
        state.safepoint(&[]);
        state.guarded(|state| state.evaluate_source(code))
    }

    fn call(&self, function: Value, args: &[Value]) -> Value {
        let mut state = self.state.lock();
        let mut temporaries = Vec::with_capacity(args.len() + 1);
        temporaries.push(function);
        temporaries.extend_from_slice(args);
        state.safepoint(&temporaries);
        state.guarded(|state| {
            for &value in &temporaries {
                state.object(value)?;
            }
            state.call_value(function, args)
        })
    }

    fn get_field(&self, value: Value, name: &str) -> Value {
        let mut state = self.state.lock();
        state.guarded(|state| state.get_field(value, name))
    }

    fn set_field(&self, value: Value, name: &str, field: Value) {
        let mut state = self.state.lock();
        state.guarded(|state| state.set_field(value, name, field).map(|()| Value::NULL));
    }

    fn pause_collection(&self) {
        self.state.lock().heap.pause();
    }

    fn resume_collection(&self) {
        self.state.lock().heap.resume();
    }

    fn collect_garbage(&self) {
        let mut state = self.state.lock();
        if state.heap.is_paused() {
            state.heap.request_collection();
            return;
        }
        state.collect(&[]);
    }

    fn anchor(&self, value: Value, name: &str) {
        self.state.lock().anchors.insert(name.to_string(), value);
    }

    fn unanchor(&self, name: &str) {
        self.state.lock().anchors.remove(name);
    }

    fn last_exception(&self) -> Option<Value> {
        self.state.lock().exception
    }

    fn clear_exception(&self) {
        self.state.lock().exception = None;
    }

    fn exception_message(&self, exception: Value) -> Option<String> {
        self.state.lock().exception_message(exception)
    }

    fn is_live(&self, value: Value) -> bool {
        self.state.lock().heap.contains(value)
    }

    fn type_of(&self, value: Value) -> Value {
        self.state.lock().type_of(value)
    }

    fn isa(&self, value: Value, ty: Value) -> bool {
        self.state.lock().isa(value, ty)
    }

    fn is_subtype(&self, sub: Value, sup: Value) -> bool {
        self.state.lock().is_subtype(sub, sup)
    }

    fn is_identical(&self, a: Value, b: Value) -> bool {
        self.state.lock().values_identical(a, b)
    }

    fn type_name(&self, ty: Value) -> String {
        self.state.lock().type_display(ty)
    }

    fn type_flags(&self, ty: Value) -> TypeFlags {
        self.state.lock().type_flags(ty)
    }

    fn supertype(&self, ty: Value) -> Value {
        self.state.lock().supertype_of(ty)
    }

    fn singleton_instance(&self, ty: Value) -> Option<Value> {
        self.state.lock().datatype(ty).and_then(|data| data.instance)
    }

    fn array_rank(&self, array: Value) -> usize {
        match self.state.lock().object(array) {
            Ok(Object::Array(array)) => array.rank(),
            _ => 0,
        }
    }

    fn array_dimension(&self, array: Value, axis: usize) -> usize {
        match self.state.lock().object(array) {
            Ok(Object::Array(array)) => array.dims.get(axis).copied().unwrap_or(1),
            _ => 0,
        }
    }

    fn array_length(&self, array: Value) -> usize {
        match self.state.lock().object(array) {
            Ok(Object::Array(array)) => array.len(),
            _ => 0,
        }
    }

    fn array_ref(&self, array: Value, index: usize) -> Value {
        let mut state = self.state.lock();
        state.guarded(|state| state.array_get(array, index))
    }

    fn array_set(&self, array: Value, index: usize, element: Value) {
        let mut state = self.state.lock();
        state.guarded(|state| state.array_put(array, index, element).map(|()| Value::NULL));
    }

    fn nothing(&self) -> Value {
        self.state.lock().nothing()
    }

    fn box_bits(&self, kind: BitsKind, bits: u64) -> Value {
        self.state.lock().alloc_bits(kind, bits)
    }

    fn unbox_bits(&self, value: Value) -> Option<(BitsKind, u64)> {
        self.state
            .lock()
            .bits_of(value)
            .map(|BitsObject { kind, bits }| (kind, bits))
    }

    fn box_string(&self, value: &str) -> Value {
        self.state.lock().alloc_string(value)
    }

    fn unbox_string(&self, value: Value) -> Option<String> {
        self.state.lock().string_of(value).map(|s| s.to_string())
    }

    fn box_symbol(&self, name: &str) -> Value {
        self.state.lock().alloc_symbol(name)
    }

    fn unbox_symbol(&self, value: Value) -> Option<String> {
        self.state.lock().symbol_of(value).map(|s| s.to_string())
    }
}

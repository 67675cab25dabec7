mod array;
mod boxing;
mod bridge;
mod datatype;
mod error;
mod generator;
mod heap;
mod interning;
mod interpreter;
mod machine;
mod object;
mod parser;
mod primitives;
mod proxy;
mod runtime;
mod types;
mod usertype;
mod value;
mod visitor;

#[cfg(test)]
mod testing;

pub use array::{Array, Element, Elements, Vector};
pub use boxing::{ANY, Boxable, Symbol, Unboxable, box_value, unbox};
pub use bridge::{Bridge, BridgeCreateInfo, BridgeSettings, GcPause};
pub use datatype::Type;
pub use error::{Error, ForeignException, Result};
pub use generator::{GeneratorExpression, GeneratorIter};
pub use heap::{DEFAULT_GC_THRESHOLD, GarbageCollectionStats, Heap, HeapEntry, HeapSettings};
pub use interning::{InternedId, InternedStrings};
pub use machine::*;
pub use object::*;
pub use parser::{Expr, ParseError, Parser, StructDefinition};
pub use primitives::{PRIMITIVES, PrimitiveContext, PrimitiveFunction, PrimitiveMessage};
pub use proxy::Proxy;
pub use runtime::{BitsKind, Runtime, TypeFlags};
pub use types::{SpecialTypes, TypeCache};
pub use usertype::{FieldGetter, FieldMapping, FieldSetter, Usertype, UsertypeInfo};
pub use value::Value;
pub use visitor::{Visitable, Visitor};

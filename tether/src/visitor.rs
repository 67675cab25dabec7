use crate::Value;

/// Something that holds edges to other heap values.
pub trait Visitable {
    /// Calls `visitor.visit` once per outgoing edge.
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        let _ = visitor;
    }
}

pub trait Visitor: Sized {
    fn visit(&mut self, value: Value);
}

impl<F: FnMut(Value)> Visitor for F {
    fn visit(&mut self, value: Value) {
        self(value)
    }
}

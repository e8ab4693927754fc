use crate::{ObjectId, Value};

/// Anything that exposes its outgoing references to the GC.
pub trait Visitable {
    fn visit_edges(&self, visitor: &mut impl Visitor);
}

pub trait Visitor {
    fn visit(&mut self, value: Value);

    #[inline]
    fn visit_id(&mut self, id: ObjectId) {
        self.visit(Value::from_object(id));
    }

    #[inline]
    fn visit_opt(&mut self, id: Option<ObjectId>) {
        if let Some(id) = id {
            self.visit_id(id);
        }
    }

    #[inline]
    fn visit_all<'a>(&mut self, values: impl IntoIterator<Item = &'a Value>) {
        for value in values {
            self.visit(*value);
        }
    }

    #[inline]
    fn visit_ids<'a>(&mut self, ids: impl IntoIterator<Item = &'a ObjectId>) {
        for id in ids {
            self.visit_id(*id);
        }
    }
}

impl<F: FnMut(Value)> Visitor for F {
    #[inline]
    fn visit(&mut self, value: Value) {
        self(value)
    }
}

/// Collects every reference edge, smis are skipped.
#[derive(Debug, Default)]
pub struct EdgeCollector {
    pub edges: Vec<ObjectId>,
}

impl Visitor for EdgeCollector {
    fn visit(&mut self, value: Value) {
        if let Some(id) = value.as_object() {
            self.edges.push(id);
        }
    }
}

use crate::{ClassId, ObjectId, Value, Visitable, Visitor};

/// Instance of a user-defined or core class.
///
/// Fields are addressed by slot index, the layout comes from the class
/// finalizer. Generic classes keep their type arguments in a slot too.
#[derive(Debug, Clone)]
pub struct Instance {
    pub class_id: ClassId,
    pub fields: Vec<Value>,
}

impl Instance {
    pub fn new(class_id: ClassId, num_slots: usize) -> Self {
        Self {
            class_id,
            fields: vec![Value::NULL; num_slots],
        }
    }

    pub fn field_at(&self, slot: usize) -> Value {
        self.fields[slot]
    }

    pub fn set_field_at(&mut self, slot: usize, value: Value) {
        self.fields[slot] = value;
    }
}

impl Visitable for Instance {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_all(&self.fields);
    }
}

#[derive(Debug, Clone)]
pub struct Array {
    immutable: bool,
    pub type_arguments: Option<ObjectId>,
    elements: Vec<Value>,
}

impl Array {
    pub fn new(len: usize, immutable: bool) -> Self {
        Self {
            immutable,
            type_arguments: None,
            elements: vec![Value::NULL; len],
        }
    }

    pub fn from_values(elements: Vec<Value>, immutable: bool) -> Self {
        Self {
            immutable,
            type_arguments: None,
            elements,
        }
    }

    pub fn class_id(&self) -> ClassId {
        if self.immutable {
            ClassId::IMMUTABLE_ARRAY
        } else {
            ClassId::ARRAY
        }
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn make_immutable(&mut self) {
        self.immutable = true;
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn at(&self, index: usize) -> Value {
        self.elements[index]
    }

    pub fn set(&mut self, index: usize, value: Value) {
        self.elements[index] = value;
    }

    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    /// Copy with `new_len` elements, new slots are null.
    pub fn grow(&self, new_len: usize) -> Self {
        debug_assert!(new_len >= self.len());
        let mut elements = self.elements.clone();
        elements.resize(new_len, Value::NULL);
        Self {
            immutable: false,
            type_arguments: self.type_arguments,
            elements,
        }
    }
}

impl Visitable for Array {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_opt(self.type_arguments);
        visitor.visit_all(&self.elements);
    }
}

/// Captured variables of a closure, chained to the enclosing scope.
#[derive(Debug, Clone)]
pub struct Context {
    pub parent: Value,
    pub variables: Vec<Value>,
}

impl Context {
    pub fn new(num_variables: usize) -> Self {
        Self {
            parent: Value::NULL,
            variables: vec![Value::NULL; num_variables],
        }
    }
}

impl Visitable for Context {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit(self.parent);
        visitor.visit_all(&self.variables);
    }
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub instantiator_type_arguments: Option<ObjectId>,
    pub function_type_arguments: Option<ObjectId>,
    pub delayed_type_arguments: Option<ObjectId>,
    pub function: ObjectId,
    pub context: Value,
}

impl Closure {
    pub fn new(function: ObjectId, context: Value) -> Self {
        Self {
            instantiator_type_arguments: None,
            function_type_arguments: None,
            delayed_type_arguments: None,
            function,
            context,
        }
    }
}

impl Visitable for Closure {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_opt(self.instantiator_type_arguments);
        visitor.visit_opt(self.function_type_arguments);
        visitor.visit_opt(self.delayed_type_arguments);
        visitor.visit_id(self.function);
        visitor.visit(self.context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EdgeCollector;

    #[test]
    fn array_grow_keeps_elements_and_null_fills() {
        let mut array = Array::new(2, false);
        array.set(0, Value::from_smi(1));
        let grown = array.grow(4);
        assert_eq!(grown.len(), 4);
        assert_eq!(grown.at(0), Value::from_smi(1));
        assert!(grown.at(3).is_null());
    }

    #[test]
    fn immutable_arrays_change_class() {
        let mut array = Array::new(0, false);
        assert_eq!(array.class_id(), ClassId::ARRAY);
        array.make_immutable();
        assert_eq!(array.class_id(), ClassId::IMMUTABLE_ARRAY);
    }

    #[test]
    fn closure_edges() {
        let mut closure = Closure::new(ObjectId(5), Value::NULL);
        closure.delayed_type_arguments = Some(ObjectId(8));
        let mut collector = EdgeCollector::default();
        closure.visit_edges(&mut collector);
        assert_eq!(collector.edges, vec![ObjectId(8), ObjectId(5), ObjectId::NULL]);
    }
}

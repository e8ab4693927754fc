use crate::{Array, Isolate, ObjectError, ObjectId, ObjectResult, Space, Value};

/// Shape of the arguments passed at a call site.
///
/// ```text
/// type_args_len:  number of explicit type arguments, 0 if none
/// count:          positional + named arguments, receiver included
/// named:          (name symbol, argument position) per named argument
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentsDescriptor {
    pub type_args_len: usize,
    pub count: usize,
    pub named: Vec<(ObjectId, usize)>,
}

impl ArgumentsDescriptor {
    /// Named arguments are the trailing `names.len()` arguments.
    pub fn new(type_args_len: usize, count: usize, names: &[ObjectId]) -> Self {
        debug_assert!(names.len() <= count);
        let first_named = count - names.len();
        Self {
            type_args_len,
            count,
            named: names
                .iter()
                .enumerate()
                .map(|(i, &name)| (name, first_named + i))
                .collect(),
        }
    }

    pub fn positional(type_args_len: usize, count: usize) -> Self {
        Self::new(type_args_len, count, &[])
    }

    pub fn positional_count(&self) -> usize {
        self.count - self.named.len()
    }

    pub fn named_count(&self) -> usize {
        self.named.len()
    }

    pub fn name_at(&self, index: usize) -> ObjectId {
        self.named[index].0
    }

    pub fn position_at(&self, index: usize) -> usize {
        self.named[index].1
    }

    /// Argument slots including the type argument vector.
    pub fn size_with_type_args(&self) -> usize {
        self.count + usize::from(self.type_args_len > 0)
    }

    // [type_args_len, count, positional_count, (name, position)*]
    fn to_values(&self) -> Vec<Value> {
        let mut values = vec![
            Value::from_smi(self.type_args_len as i64),
            Value::from_smi(self.count as i64),
            Value::from_smi(self.positional_count() as i64),
        ];
        for &(name, position) in &self.named {
            values.push(name.value());
            values.push(Value::from_smi(position as i64));
        }
        values
    }

    fn from_values(values: &[Value]) -> Option<Self> {
        let [type_args_len, count, positional, rest @ ..] = values else {
            return None;
        };
        let type_args_len = type_args_len.as_smi()? as usize;
        let count = count.as_smi()? as usize;
        let positional = positional.as_smi()? as usize;
        let named = rest
            .chunks_exact(2)
            .map(|pair| Some((pair[0].as_object()?, pair[1].as_smi()? as usize)))
            .collect::<Option<Vec<_>>>()?;
        (positional + named.len() == count).then_some(Self {
            type_args_len,
            count,
            named,
        })
    }
}

impl Isolate {
    /// Canonical immutable array encoding `descriptor`.
    pub fn new_arguments_descriptor(
        &self,
        descriptor: &ArgumentsDescriptor,
    ) -> ObjectResult<ObjectId> {
        let array = self.allocate(Array::from_values(descriptor.to_values(), true), Space::Old)?;
        self.canonicalize_instance(array)
    }

    pub fn arguments_descriptor(&self, id: ObjectId) -> ObjectResult<ArgumentsDescriptor> {
        self.heap()
            .read::<Array, _>(id, |array| ArgumentsDescriptor::from_values(array.elements()))
            .ok_or_else(|| ObjectError::api(format!("{id} is not an arguments descriptor")))
    }
}

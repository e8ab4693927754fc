use crate::{
    ArgumentsDescriptor, Array, ClassId, Instance, Isolate, ObjectError, ObjectId, ObjectResult,
    Space, StringObject, UnhandledException, Value, scrub_name,
};

/// What kind of member an invocation was trying to reach.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InvocationKind {
    Method = 0,
    Getter = 1,
    Setter = 2,
    Field = 3,
    LocalVar = 4,
}

/// Where the member was looked up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InvocationLevel {
    Dynamic = 0,
    Super = 1,
    Static = 2,
    Constructor = 3,
    TopLevel = 4,
}

/// Kind and level of a failed invocation, packed into one small integer
/// for the managed error classes.
///
/// ```text
/// bits 0..3   kind
/// bits 3..6   level
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvocationMirror {
    pub kind: InvocationKind,
    pub level: InvocationLevel,
}

impl InvocationMirror {
    const KIND_BITS: i64 = 3;
    const KIND_MASK: i64 = (1 << Self::KIND_BITS) - 1;

    pub fn new(kind: InvocationKind, level: InvocationLevel) -> Self {
        Self { kind, level }
    }

    pub fn encode(self) -> i64 {
        ((self.level as i64) << Self::KIND_BITS) | self.kind as i64
    }

    pub fn decode(encoded: i64) -> Option<Self> {
        let kind = match encoded & Self::KIND_MASK {
            0 => InvocationKind::Method,
            1 => InvocationKind::Getter,
            2 => InvocationKind::Setter,
            3 => InvocationKind::Field,
            4 => InvocationKind::LocalVar,
            _ => return None,
        };
        let level = match encoded >> Self::KIND_BITS {
            0 => InvocationLevel::Dynamic,
            1 => InvocationLevel::Super,
            2 => InvocationLevel::Static,
            3 => InvocationLevel::Constructor,
            4 => InvocationLevel::TopLevel,
            _ => return None,
        };
        Some(Self { kind, level })
    }
}

/// Slots of the arguments array handed to the no-such-method constructor.
pub mod nsm_arguments {
    pub const RECEIVER: usize = 0;
    pub const MEMBER_NAME: usize = 1;
    pub const INVOCATION_TYPE: usize = 2;
    pub const TYPE_ARGUMENTS: usize = 3;
    pub const ARGUMENTS: usize = 4;
    pub const NAMED_ARGUMENTS: usize = 5;
    pub const LEN: usize = 6;
}

impl Isolate {
    fn throw(exception: ObjectId) -> ObjectError {
        ObjectError::Unhandled(UnhandledException {
            exception: exception.value(),
            stacktrace: Value::NULL,
        })
    }

    fn new_string(&self, value: &str) -> ObjectResult<ObjectId> {
        self.allocate(StringObject::new(value), Space::New)
    }

    /// Allocates an instance of a core error class with its fields set in
    /// declaration order.
    fn new_error_instance(&self, cid: ClassId, values: &[Value]) -> ObjectResult<ObjectId> {
        let error = self.new_instance(cid, Space::New)?;
        let heap = self.heap();
        let slots: Vec<usize> = self
            .fields_of(cid)
            .into_iter()
            .map(|field| heap.read::<crate::Field, _>(field, |f| f.host_offset()))
            .collect();
        debug_assert_eq!(slots.len(), values.len());
        heap.write::<Instance, _>(error, |instance| {
            for (&slot, &value) in slots.iter().zip(values) {
                instance.set_field_at(slot, value);
            }
        });
        Ok(error)
    }

    /// Field `name` of a core error instance.
    pub fn error_field(&self, exception: Value, name: &str) -> Option<Value> {
        let id = exception.as_non_null()?;
        let cid = self.heap().cell(id).class_id();
        let field = self.lookup_field_allow_private(cid, name)?;
        let slot = self
            .heap()
            .read::<crate::Field, _>(field, |f| f.has_host_offset().then(|| f.host_offset()))?;
        self.heap().try_read::<Instance, _>(id, |i| i.field_at(slot))
    }

    /// Arguments array for a no-such-method error. `arguments` holds the
    /// receiver first, named arguments are placed as in `descriptor`.
    pub fn new_invocation_arguments(
        &self,
        member_name: &str,
        mirror: InvocationMirror,
        type_arguments: Option<ObjectId>,
        arguments: &[Value],
        descriptor: &ArgumentsDescriptor,
    ) -> ObjectResult<ObjectId> {
        let receiver = arguments.first().copied().unwrap_or(Value::NULL);
        let member_name = self.symbol(member_name)?;
        let positional = self.allocate(
            Array::from_values(arguments.to_vec(), false),
            Space::New,
        )?;
        let named = (descriptor.named_count() > 0)
            .then(|| {
                let names = descriptor.named.iter().map(|&(name, _)| name.value()).collect();
                self.allocate(Array::from_values(names, true), Space::New)
            })
            .transpose()?;

        let mut values = vec![Value::NULL; nsm_arguments::LEN];
        values[nsm_arguments::RECEIVER] = receiver;
        values[nsm_arguments::MEMBER_NAME] = member_name.value();
        values[nsm_arguments::INVOCATION_TYPE] = Value::from_smi(mirror.encode());
        values[nsm_arguments::TYPE_ARGUMENTS] = Value::from(type_arguments);
        values[nsm_arguments::ARGUMENTS] = positional.value();
        values[nsm_arguments::NAMED_ARGUMENTS] = Value::from(named);
        self.allocate(Array::from_values(values, true), Space::New)
    }

    pub fn new_no_such_method_error(&self, invocation_arguments: ObjectId) -> ObjectResult<ObjectId> {
        let values = self
            .heap()
            .read::<Array, _>(invocation_arguments, |a| a.elements().to_vec());
        if values.len() != nsm_arguments::LEN {
            return Err(ObjectError::api(format!(
                "invocation arguments must have {} entries, got {}",
                nsm_arguments::LEN,
                values.len()
            )));
        }
        self.new_error_instance(ClassId::NO_SUCH_METHOD_ERROR, &values)
    }

    /// Builds and throws a no-such-method error.
    pub fn no_such_method(
        &self,
        member_name: &str,
        mirror: InvocationMirror,
        type_arguments: Option<ObjectId>,
        arguments: &[Value],
        descriptor: &ArgumentsDescriptor,
    ) -> ObjectError {
        let error = self
            .new_invocation_arguments(member_name, mirror, type_arguments, arguments, descriptor)
            .and_then(|array| self.new_no_such_method_error(array));
        match error {
            Ok(error) => Self::throw(error),
            Err(error) => error,
        }
    }

    /// Checks the call shape before invoking `fun` dynamically.
    pub fn check_dynamic_call(
        &self,
        fun: ObjectId,
        arguments: &[Value],
        descriptor: &ArgumentsDescriptor,
    ) -> ObjectResult<()> {
        match self.check_arguments(fun, descriptor) {
            Ok(()) => Ok(()),
            Err(reason) => {
                let name = self.function_name(fun);
                log::debug!("no such method {name}: {reason}");
                let mirror = InvocationMirror::new(InvocationKind::Method, InvocationLevel::Dynamic);
                Err(self.no_such_method(&name, mirror, None, arguments, descriptor))
            }
        }
    }

    pub fn new_type_error(&self, message: &str) -> ObjectResult<ObjectId> {
        let message = self.new_string(message)?;
        self.new_error_instance(ClassId::TYPE_ERROR, &[message.value()])
    }

    /// Name of the runtime type of `value` as the user sees it.
    pub fn runtime_type_name(&self, value: Value) -> String {
        let cid = self.heap().class_id_of(value);
        if cid.is_integer() {
            return "int".to_owned();
        }
        if cid.is_string() {
            return "String".to_owned();
        }
        scrub_name(&self.class_name(cid)).into_owned()
    }

    /// Failed assignability check of `value` against `dst_type`.
    pub fn type_error(&self, value: Value, dst_type: ObjectId, dst_name: &str) -> ObjectError {
        let message = format!(
            "type '{}' is not a subtype of type '{}' of '{dst_name}'",
            self.runtime_type_name(value),
            self.type_name(dst_type)
        );
        match self.new_type_error(&message) {
            Ok(error) => Self::throw(error),
            Err(error) => error,
        }
    }

    /// Assignability check at a call boundary.
    pub fn check_assignable(&self, value: Value, dst_type: ObjectId, dst_name: &str) -> ObjectResult<()> {
        if self.is_instance_of(value, dst_type, None, None)? {
            return Ok(());
        }
        Err(self.type_error(value, dst_type, dst_name))
    }

    pub fn cyclic_initialization_error(&self, variable_name: &str) -> ObjectError {
        let error = self
            .new_string(variable_name)
            .and_then(|name| self.new_error_instance(ClassId::CYCLIC_INITIALIZATION_ERROR, &[name.value()]));
        match error {
            Ok(error) => Self::throw(error),
            Err(error) => error,
        }
    }
}

use bitflags::bitflags;

use crate::{
    ClassId, Isolate, ObjectError, ObjectId, ObjectResult, Space, TokenPosition, TypeEquality,
    Trail, Value, Visitable, Visitor,
};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FieldFlags: u16 {
        const STATIC = 1 << 0;
        const FINAL = 1 << 1;
        const CONST = 1 << 2;
        const LATE = 1 << 3;
        const REFLECTABLE = 1 << 4;
        const COVARIANT = 1 << 5;
        const GENERIC_COVARIANT_IMPL = 1 << 6;
        const HAS_INITIALIZER = 1 << 7;
    }
}

/// Length feedback for fields holding fixed length lists.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ListLengthGuard {
    Unknown,
    NoFixedLength,
    Length(usize),
}

/// How exactly stored values match the declared generic type. Moves only
/// towards `NotExact`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StaticTypeExactness {
    Uninitialized,
    NotTracking,
    NotExact,
    HasExactSuperType,
    HasExactSuperClass,
    TriviallyExact,
}

const UNASSIGNED: usize = usize::MAX;

pub struct Field {
    pub name: ObjectId,
    pub owner: ClassId,
    pub declared_type: ObjectId,
    pub flags: FieldFlags,
    pub token_pos: TokenPosition,
    pub initializer_function: Option<ObjectId>,
    guarded_cid: ClassId,
    is_nullable: bool,
    guarded_list_length: ListLengthGuard,
    exactness: StaticTypeExactness,
    dependent_code: Vec<ObjectId>,
    // slot of an instance field, field table index of a static field
    host_offset_or_field_id: usize,
}

impl Field {
    pub fn new(name: ObjectId, declared_type: ObjectId, flags: FieldFlags) -> Self {
        Self {
            name,
            owner: ClassId::ILLEGAL,
            declared_type,
            flags,
            token_pos: TokenPosition::NO_SOURCE,
            initializer_function: None,
            guarded_cid: ClassId::ILLEGAL,
            is_nullable: false,
            guarded_list_length: ListLengthGuard::Unknown,
            exactness: StaticTypeExactness::NotTracking,
            dependent_code: Vec::new(),
            host_offset_or_field_id: UNASSIGNED,
        }
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }

    pub fn is_final(&self) -> bool {
        self.flags.intersects(FieldFlags::FINAL | FieldFlags::CONST)
    }

    pub fn is_late(&self) -> bool {
        self.flags.contains(FieldFlags::LATE)
    }

    pub fn guarded_cid(&self) -> ClassId {
        self.guarded_cid
    }

    pub fn is_nullable(&self) -> bool {
        self.is_nullable
    }

    pub fn guarded_list_length(&self) -> ListLengthGuard {
        self.guarded_list_length
    }

    pub fn static_type_exactness(&self) -> StaticTypeExactness {
        self.exactness
    }

    pub fn host_offset(&self) -> usize {
        assert_ne!(self.host_offset_or_field_id, UNASSIGNED, "field has no offset yet");
        self.host_offset_or_field_id
    }

    pub fn has_host_offset(&self) -> bool {
        self.host_offset_or_field_id != UNASSIGNED
    }

    pub(crate) fn set_host_offset(&mut self, offset: usize) {
        self.host_offset_or_field_id = offset;
    }

    pub fn field_id(&self) -> Option<usize> {
        (self.is_static() && self.has_host_offset()).then_some(self.host_offset_or_field_id)
    }

    /// Class id and nullability feedback, true when it changed.
    fn update_guarded_cid(&mut self, cid: ClassId, list_length: Option<usize>) -> bool {
        if self.guarded_cid == ClassId::ILLEGAL {
            self.guarded_cid = cid;
            self.is_nullable = cid == ClassId::NULL;
            self.guarded_list_length = match list_length {
                Some(len) => ListLengthGuard::Length(len),
                None => ListLengthGuard::NoFixedLength,
            };
            return true;
        }
        if cid == self.guarded_cid || (cid == ClassId::NULL && self.is_nullable) {
            if let ListLengthGuard::Length(expected) = self.guarded_list_length
                && cid != ClassId::NULL
                && list_length != Some(expected)
            {
                self.guarded_list_length = ListLengthGuard::NoFixedLength;
                return true;
            }
            return false;
        }
        if cid == ClassId::NULL {
            self.is_nullable = true;
            return true;
        }
        if self.guarded_cid == ClassId::NULL {
            // only null was stored so far
            self.guarded_cid = cid;
            self.guarded_list_length = match list_length {
                Some(len) => ListLengthGuard::Length(len),
                None => ListLengthGuard::NoFixedLength,
            };
            return true;
        }
        if self.guarded_cid == ClassId::DYNAMIC {
            return false;
        }
        self.guarded_cid = ClassId::DYNAMIC;
        self.is_nullable = true;
        self.guarded_list_length = ListLengthGuard::NoFixedLength;
        true
    }

    fn update_exactness(&mut self, observed: StaticTypeExactness) -> bool {
        let merged = match (self.exactness, observed) {
            (StaticTypeExactness::NotTracking, _) => return false,
            (StaticTypeExactness::Uninitialized, observed) => observed,
            (current, observed) if current == observed => return false,
            _ => StaticTypeExactness::NotExact,
        };
        let changed = merged != self.exactness;
        self.exactness = merged;
        changed
    }
}

impl Visitable for Field {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_id(self.name);
        visitor.visit_id(self.declared_type);
        visitor.visit_opt(self.initializer_function);
        visitor.visit_ids(&self.dependent_code);
    }
}

/// Value slot of a static field in the isolate field table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StaticSlot {
    Uninitialized,
    Initializing,
    Initialized(Value),
}

impl Isolate {
    pub fn new_field(
        &self,
        name: &str,
        declared_type: ObjectId,
        flags: FieldFlags,
    ) -> ObjectResult<ObjectId> {
        let name = self.symbol(name)?;
        let mut field = Field::new(name, declared_type, flags);
        let declared_class = self.type_class_id(declared_type);
        if declared_class != ClassId::ILLEGAL
            && !self.is_function_type(declared_type)
            && self.num_type_arguments(declared_class) > 0
        {
            field.exactness = StaticTypeExactness::Uninitialized;
        }
        self.allocate(field, Space::Old)
    }

    pub fn field_name(&self, field: ObjectId) -> String {
        let name = self.heap().read::<Field, _>(field, |f| f.name);
        self.heap().string_value(name)
    }

    /// Code whose guards depend on the feedback of `field`.
    pub fn register_field_dependent_code(&self, field: ObjectId, code: ObjectId) {
        self.heap().write::<Field, _>(field, |f| {
            if !f.dependent_code.contains(&code) {
                f.dependent_code.push(code);
            }
        });
    }

    /// Updates guarded class, nullability, list length and exactness with a
    /// stored value. Changed feedback disables dependent code.
    pub fn record_store(&self, field: ObjectId, value: Value) -> bool {
        let heap = self.heap();
        let cid = heap.class_id_of(value);
        let list_length = value
            .as_non_null()
            .filter(|_| cid.is_array())
            .map(|id| heap.read::<crate::Array, _>(id, |a| a.len()));
        let declared = heap.read::<Field, _>(field, |f| f.declared_type);
        let tracking = heap.read::<Field, _>(field, |f| f.exactness != StaticTypeExactness::NotTracking);
        let observed = if tracking && !value.is_null() {
            Some(self.exactness_of(value, declared))
        } else {
            None
        };
        let changed = heap.write::<Field, _>(field, |f| {
            let mut changed = f.update_guarded_cid(cid, list_length);
            if let Some(observed) = observed {
                changed |= f.update_exactness(observed);
            }
            changed
        });
        if changed {
            self.disable_field_dependent_code(field);
        }
        changed
    }

    fn disable_field_dependent_code(&self, field: ObjectId) {
        let codes = self
            .heap()
            .write::<Field, _>(field, |f| std::mem::take(&mut f.dependent_code));
        if codes.is_empty() {
            return;
        }
        log::debug!(
            "guard of field {} changed, disabling {} code objects",
            self.field_name(field),
            codes.len()
        );
        for code in codes {
            self.disable_code(code);
        }
    }

    fn exactness_of(&self, value: Value, declared: ObjectId) -> StaticTypeExactness {
        let heap = self.heap();
        let declared_class = self.type_class_id(declared);
        let declared_args = self.type_arguments_of(declared);
        let same_args = |args: Option<ObjectId>| {
            self.type_arguments_equivalent(
                args,
                declared_args,
                TypeEquality::Syntactical,
                &mut Trail::new(),
            )
        };
        let mut cid = heap.class_id_of(value);
        let mut args = self.instance_type_arguments(value);
        if cid == declared_class {
            return if same_args(args) {
                StaticTypeExactness::TriviallyExact
            } else {
                StaticTypeExactness::NotExact
            };
        }
        // walk the super classes, instantiating their arguments
        while let Some(super_type) = self.super_type_of(cid) {
            let super_cid = self.type_class_id(super_type);
            if super_cid == cid {
                break;
            }
            let super_args = match self.type_arguments_of(super_type) {
                Some(super_args) if !self.is_instantiated(super_type) => {
                    match self.instantiate_type_arguments_from(
                        super_args,
                        args,
                        None,
                        crate::ALL_FREE,
                        &mut Trail::new(),
                        Space::New,
                    ) {
                        Ok(Some(result)) => result,
                        _ => return StaticTypeExactness::NotExact,
                    }
                }
                super_args => super_args,
            };
            if super_cid == declared_class {
                return if same_args(super_args) {
                    StaticTypeExactness::HasExactSuperClass
                } else {
                    StaticTypeExactness::NotExact
                };
            }
            cid = super_cid;
            args = super_args;
        }
        if self.instance_class_is_subtype_of(heap.class_id_of(value), self.instance_type_arguments(value), declared) {
            StaticTypeExactness::HasExactSuperType
        } else {
            StaticTypeExactness::NotExact
        }
    }

    // ── static fields ──────────────────────────────────────────────

    /// Assigns a field table slot to a static field, once.
    pub fn register_static_field(&self, field: ObjectId) -> usize {
        if let Some(id) = self.heap().read::<Field, _>(field, Field::field_id) {
            return id;
        }
        let id = {
            let mut table = self.field_table().write();
            table.push(StaticSlot::Uninitialized);
            table.len() - 1
        };
        self.heap().write::<Field, _>(field, |f| f.set_host_offset(id));
        id
    }

    fn static_slot(&self, field: ObjectId) -> StaticSlot {
        let id = self.register_static_field(field);
        self.field_table().read()[id]
    }

    fn set_static_slot(&self, field: ObjectId, slot: StaticSlot) {
        let id = self.register_static_field(field);
        self.field_table().write()[id] = slot;
    }

    pub fn static_value(&self, field: ObjectId) -> Option<Value> {
        match self.static_slot(field) {
            StaticSlot::Initialized(value) => Some(value),
            _ => None,
        }
    }

    pub fn set_static_value(&self, field: ObjectId, value: Value) {
        self.set_static_slot(field, StaticSlot::Initialized(value));
    }

    /// Runs the initializer once. Reentering while it runs is a cyclic
    /// initialization error, a failed initializer leaves the field
    /// uninitialized.
    pub fn initialize_static_field(
        &self,
        field: ObjectId,
        initializer: impl FnOnce() -> ObjectResult<Value>,
    ) -> ObjectResult<Value> {
        match self.static_slot(field) {
            StaticSlot::Initialized(value) => return Ok(value),
            StaticSlot::Initializing => {
                return Err(self.cyclic_initialization_error(&self.field_name(field)));
            }
            StaticSlot::Uninitialized => self.set_static_slot(field, StaticSlot::Initializing),
        }
        match initializer() {
            Ok(value) => {
                self.set_static_slot(field, StaticSlot::Initialized(value));
                Ok(value)
            }
            Err(error) => {
                self.set_static_slot(field, StaticSlot::Uninitialized);
                Err(error)
            }
        }
    }

    /// Static fields with an initializer run it on first read.
    pub fn static_field_value(
        &self,
        field: ObjectId,
        run: impl FnOnce(ObjectId) -> ObjectResult<Value>,
    ) -> ObjectResult<Value> {
        if let Some(value) = self.static_value(field) {
            return Ok(value);
        }
        let initializer = self
            .heap()
            .read::<Field, _>(field, |f| f.initializer_function)
            .ok_or_else(|| {
                ObjectError::api(format!("static field {} has no initializer", self.field_name(field)))
            })?;
        self.initialize_static_field(field, || run(initializer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Array, testing::*};

    fn dynamic_field(isolate: &Isolate) -> ObjectId {
        isolate
            .new_field("f", isolate.dynamic_type(), FieldFlags::empty())
            .unwrap()
    }

    #[test]
    fn guarded_cid_goes_from_exact_to_dynamic() {
        let isolate = test_isolate();
        let field = dynamic_field(&isolate);
        assert!(isolate.record_store(field, Value::from_smi(1)));
        assert!(!isolate.record_store(field, Value::from_smi(2)));
        isolate.heap().read::<Field, _>(field, |f| {
            assert_eq!(f.guarded_cid(), ClassId::SMI);
            assert!(!f.is_nullable());
        });
        assert!(isolate.record_store(field, Value::NULL));
        assert!(isolate.heap().read::<Field, _>(field, Field::is_nullable));
        let double = isolate.new_double(1.0, Space::New).unwrap();
        assert!(isolate.record_store(field, double.value()));
        assert_eq!(
            isolate.heap().read::<Field, _>(field, Field::guarded_cid),
            ClassId::DYNAMIC
        );
        assert!(!isolate.record_store(field, Value::from_smi(3)));
    }

    #[test]
    fn list_length_is_tracked() {
        let isolate = test_isolate();
        let field = dynamic_field(&isolate);
        let three = isolate.allocate(Array::new(3, false), Space::New).unwrap();
        let four = isolate.allocate(Array::new(4, false), Space::New).unwrap();
        isolate.record_store(field, three.value());
        assert_eq!(
            isolate.heap().read::<Field, _>(field, Field::guarded_list_length),
            ListLengthGuard::Length(3)
        );
        assert!(isolate.record_store(field, four.value()));
        assert_eq!(
            isolate.heap().read::<Field, _>(field, Field::guarded_list_length),
            ListLengthGuard::NoFixedLength
        );
    }

    #[test]
    fn changed_guards_disable_dependent_code() {
        let isolate = test_isolate();
        let field = dynamic_field(&isolate);
        isolate.record_store(field, Value::from_smi(1));
        let code = isolate.new_code(&[0x90], true).unwrap();
        isolate.register_field_dependent_code(field, code);
        isolate.record_store(field, Value::from_smi(5));
        assert!(isolate.is_code_alive(code), "same class keeps the guard");
        isolate.record_store(field, Value::NULL);
        assert!(!isolate.is_code_alive(code));
    }

    #[test]
    fn exactness_of_generic_fields() {
        let isolate = test_isolate();
        let (cid, _) = generic_class(&isolate, "Box");
        let box_of_int = class_type(&isolate, cid, &[isolate.int_type()]);
        let field = isolate
            .new_field("box", box_of_int, FieldFlags::empty())
            .unwrap();
        assert_eq!(
            isolate.heap().read::<Field, _>(field, Field::static_type_exactness),
            StaticTypeExactness::Uninitialized
        );
        let instance = isolate.new_instance(cid, Space::New).unwrap();
        let args = isolate
            .new_type_arguments(vec![isolate.int_type()], Space::Old)
            .unwrap();
        isolate.set_instance_type_arguments(instance, Some(args));
        isolate.record_store(field, instance.value());
        assert_eq!(
            isolate.heap().read::<Field, _>(field, Field::static_type_exactness),
            StaticTypeExactness::TriviallyExact
        );

        let other = isolate.new_instance(cid, Space::New).unwrap();
        isolate.record_store(field, other.value());
        assert_eq!(
            isolate.heap().read::<Field, _>(field, Field::static_type_exactness),
            StaticTypeExactness::NotExact
        );
    }

    #[test]
    fn static_initializer_runs_once() {
        let isolate = test_isolate();
        let field = isolate
            .new_field("counter", isolate.int_type(), FieldFlags::STATIC)
            .unwrap();
        let mut runs = 0;
        let value = isolate
            .initialize_static_field(field, || {
                runs += 1;
                Ok(Value::from_smi(10))
            })
            .unwrap();
        assert_eq!(value, Value::from_smi(10));
        let again = isolate
            .initialize_static_field(field, || unreachable!("already initialized"))
            .unwrap();
        assert_eq!(again, value);
        assert_eq!(runs, 1);
    }

    #[test]
    fn cyclic_static_initialization_is_reported() {
        let isolate = test_isolate();
        let field = isolate
            .new_field("loop", isolate.int_type(), FieldFlags::STATIC)
            .unwrap();
        let error = isolate
            .initialize_static_field(field, || {
                isolate.initialize_static_field(field, || Ok(Value::from_smi(1)))
            })
            .unwrap_err();
        let ObjectError::Unhandled(exception) = error else {
            panic!("expected an exception, got {error}");
        };
        let exception = exception.exception.as_object().unwrap();
        assert_eq!(
            isolate.heap().cell(exception).class_id(),
            ClassId::CYCLIC_INITIALIZATION_ERROR
        );
        assert_eq!(isolate.static_value(field), None, "failed initializer resets the slot");
    }
}

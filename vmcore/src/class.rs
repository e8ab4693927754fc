use std::sync::OnceLock;

use ahash::AHashMap;
use bitflags::bitflags;

use crate::{
    ArgumentsDescriptor, ClassId, Field, Function, FunctionData, FunctionKind, HEADER_SIZE,
    Instance, Isolate, ObjectError, ObjectId, ObjectResult, Space, TokenPosition, Value,
    Visitable, Visitor, WORD_SIZE, align_up, equals_ignoring_private_key, getter_name,
    scrub_name, setter_name,
};

/// Monotonic, every setter asserts the state it comes from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassState {
    Allocated,
    DeclarationLoaded,
    TypeFinalized,
    Prefinalized,
    Finalized,
}

impl ClassState {
    pub fn is_finalized(self) -> bool {
        self >= Self::Prefinalized
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ClassFlags: u16 {
        const ABSTRACT = 1 << 0;
        const ENUM = 1 << 1;
        const TOP_LEVEL = 1 << 2;
        const MIXIN_APPLICATION = 1 << 3;
        const IMPLEMENTED = 1 << 4;
        const ALLOCATED = 1 << 5;
        const CONST = 1 << 6;
        const SYNTHETIC = 1 << 7;
    }
}

/// Which members a lookup accepts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemberKind {
    Any,
    Instance,
    Static,
    Constructor,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Dispatcher {
    name: ObjectId,
    arguments_descriptor: ObjectId,
    kind: FunctionKind,
    function: ObjectId,
}

pub struct Class {
    pub id: ClassId,
    pub name: ObjectId,
    pub library: Option<ObjectId>,
    pub script: Option<ObjectId>,
    pub token_pos: TokenPosition,
    pub flags: ClassFlags,
    super_type: Option<ObjectId>,
    interfaces: Vec<ObjectId>,
    type_parameters: Option<ObjectId>,
    num_type_arguments: Option<u16>,
    declaration_type: Option<ObjectId>,
    fields: Vec<ObjectId>,
    functions: Vec<ObjectId>,
    functions_index: Option<AHashMap<ObjectId, ObjectId>>,
    offset_to_field: OnceLock<AHashMap<usize, ObjectId>>,
    constants: Vec<ObjectId>,
    dispatchers: Vec<Dispatcher>,
    direct_subclasses: Vec<ClassId>,
    direct_implementors: Vec<ClassId>,
    dependent_code: Vec<ObjectId>,
    allocation_stub: Option<ObjectId>,
    state: ClassState,
    // instance layout in slots, the header is not counted
    next_field_offset: usize,
    instance_size: usize,
    type_arguments_field_offset: Option<usize>,
}

impl Class {
    pub fn new(name: ObjectId, library: Option<ObjectId>) -> Self {
        Self {
            id: ClassId::ILLEGAL,
            name,
            library,
            script: None,
            token_pos: TokenPosition::NO_SOURCE,
            flags: ClassFlags::empty(),
            super_type: None,
            interfaces: Vec::new(),
            type_parameters: None,
            num_type_arguments: None,
            declaration_type: None,
            fields: Vec::new(),
            functions: Vec::new(),
            functions_index: None,
            offset_to_field: OnceLock::new(),
            constants: Vec::new(),
            dispatchers: Vec::new(),
            direct_subclasses: Vec::new(),
            direct_implementors: Vec::new(),
            dependent_code: Vec::new(),
            allocation_stub: None,
            state: ClassState::Allocated,
            next_field_offset: 0,
            instance_size: 0,
            type_arguments_field_offset: None,
        }
    }

    pub fn state(&self) -> ClassState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state.is_finalized()
    }

    pub fn super_type(&self) -> Option<ObjectId> {
        self.super_type
    }

    pub fn interfaces(&self) -> &[ObjectId] {
        &self.interfaces
    }

    pub fn type_parameters(&self) -> Option<ObjectId> {
        self.type_parameters
    }

    pub fn fields(&self) -> &[ObjectId] {
        &self.fields
    }

    pub fn functions(&self) -> &[ObjectId] {
        &self.functions
    }

    pub fn constants(&self) -> &[ObjectId] {
        &self.constants
    }

    pub fn direct_subclasses(&self) -> &[ClassId] {
        &self.direct_subclasses
    }

    pub fn direct_implementors(&self) -> &[ClassId] {
        &self.direct_implementors
    }

    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// Slots of an instance, the type argument slot included.
    pub fn num_instance_slots(&self) -> usize {
        self.next_field_offset
    }

    pub fn type_arguments_field_offset(&self) -> Option<usize> {
        self.type_arguments_field_offset
    }

    pub fn allocation_stub(&self) -> Option<ObjectId> {
        self.allocation_stub
    }

    pub(crate) fn advance_state(&mut self, state: ClassState) {
        assert!(
            state >= self.state,
            "class {} cannot go from {:?} back to {state:?}",
            self.id,
            self.state
        );
        self.state = state;
    }

    pub(crate) fn set_layout(
        &mut self,
        num_slots: usize,
        type_arguments_field_offset: Option<usize>,
        alignment: usize,
    ) {
        self.next_field_offset = num_slots;
        self.type_arguments_field_offset = type_arguments_field_offset;
        self.offset_to_field.take();
        self.instance_size = align_up(HEADER_SIZE + num_slots * WORD_SIZE, alignment);
    }

    pub(crate) fn set_num_type_arguments(&mut self, count: u16) {
        self.num_type_arguments = Some(count);
    }

    pub(crate) fn set_declaration_type(&mut self, ty: ObjectId) {
        self.declaration_type = Some(ty);
    }

    pub(crate) fn replace_super_type(&mut self, ty: Option<ObjectId>) {
        self.super_type = ty;
    }

    pub(crate) fn replace_interfaces(&mut self, interfaces: Vec<ObjectId>) {
        self.interfaces = interfaces;
    }
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Visitable for Class {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_id(self.name);
        visitor.visit_opt(self.library);
        visitor.visit_opt(self.script);
        visitor.visit_opt(self.super_type);
        visitor.visit_ids(&self.interfaces);
        visitor.visit_opt(self.type_parameters);
        visitor.visit_opt(self.declaration_type);
        visitor.visit_ids(&self.fields);
        visitor.visit_ids(&self.functions);
        visitor.visit_ids(&self.constants);
        for dispatcher in &self.dispatchers {
            visitor.visit_id(dispatcher.name);
            visitor.visit_id(dispatcher.arguments_descriptor);
            visitor.visit_id(dispatcher.function);
        }
        visitor.visit_ids(&self.dependent_code);
        visitor.visit_opt(self.allocation_stub);
    }
}

fn kind_matches(fun: &Function, kind: MemberKind) -> bool {
    match kind {
        MemberKind::Any => true,
        MemberKind::Instance => fun.is_dynamic_function(),
        MemberKind::Static => fun.is_static() && fun.kind != FunctionKind::Constructor,
        MemberKind::Constructor => fun.kind == FunctionKind::Constructor,
    }
}

impl Isolate {
    // ── class table ────────────────────────────────────────────────

    /// Allocates a class in declaration state and registers it under the
    /// next free class id.
    pub fn new_class(&self, name: &str, library: Option<ObjectId>) -> ObjectResult<ClassId> {
        let name = self.symbol(name)?;
        self.register_class(Class::new(name, library))
    }

    pub fn with_class<R>(&self, cid: ClassId, f: impl FnOnce(&Class) -> R) -> R {
        self.heap().read::<Class, _>(self.class_object(cid), f)
    }

    pub(crate) fn write_class<R>(&self, cid: ClassId, f: impl FnOnce(&mut Class) -> R) -> R {
        self.heap().write::<Class, _>(self.class_object(cid), f)
    }

    pub fn class_state(&self, cid: ClassId) -> ClassState {
        self.with_class(cid, Class::state)
    }

    pub fn is_class_finalized(&self, cid: ClassId) -> bool {
        self.with_class(cid, Class::is_finalized)
    }

    /// Scrubbed user visible name, empty for the top level class.
    pub fn class_name(&self, cid: ClassId) -> String {
        let Some(class) = self.try_class_object(cid) else {
            return format!("<{cid}>");
        };
        let name = self.heap().read::<Class, _>(class, |c| c.name);
        scrub_name(&self.heap().string_value(name)).into_owned()
    }

    pub fn is_top_level_class(&self, cid: ClassId) -> bool {
        self.with_class(cid, |c| c.flags.contains(ClassFlags::TOP_LEVEL))
    }

    // ── declaration ────────────────────────────────────────────────

    pub fn set_super_type(&self, cid: ClassId, super_type: Option<ObjectId>) {
        self.write_class(cid, |c| {
            assert!(
                c.state < ClassState::TypeFinalized,
                "super type of {cid} set after type finalization"
            );
            c.super_type = super_type;
        });
    }

    pub fn set_interfaces(&self, cid: ClassId, interfaces: Vec<ObjectId>) {
        self.write_class(cid, |c| {
            assert!(
                c.state < ClassState::TypeFinalized,
                "interfaces of {cid} set after type finalization"
            );
            c.interfaces = interfaces;
        });
    }

    /// Type parameters may only change before the class is prefinalized.
    pub fn set_type_parameters(&self, cid: ClassId, type_parameters: Option<ObjectId>) {
        self.write_class(cid, |c| {
            assert!(
                c.state < ClassState::Prefinalized,
                "type parameters of {cid} set after prefinalization"
            );
            c.type_parameters = type_parameters;
            c.num_type_arguments = None;
        });
    }

    pub fn mark_declaration_loaded(&self, cid: ClassId) {
        self.write_class(cid, |c| c.advance_state(ClassState::DeclarationLoaded));
    }

    pub fn super_type_of(&self, cid: ClassId) -> Option<ObjectId> {
        self.with_class(cid, Class::super_type)
    }

    pub fn super_class_of(&self, cid: ClassId) -> Option<ClassId> {
        self.super_type_of(cid).map(|ty| self.type_class_id(ty))
    }

    pub fn interfaces_of(&self, cid: ClassId) -> Vec<ObjectId> {
        self.with_class(cid, |c| c.interfaces.clone())
    }

    pub fn type_parameters_of(&self, cid: ClassId) -> Option<ObjectId> {
        self.with_class(cid, Class::type_parameters)
    }

    /// Own type parameters.
    pub fn num_type_parameters(&self, cid: ClassId) -> usize {
        let Some(class) = self.try_class_object(cid) else {
            return 0;
        };
        let type_params = self.heap().read::<Class, _>(class, |c| c.type_parameters);
        self.type_arguments_len(type_params)
    }

    /// Length of the flattened type argument vector: the super class
    /// arguments followed by the own parameters.
    pub fn num_type_arguments(&self, cid: ClassId) -> usize {
        let Some(class) = self.try_class_object(cid) else {
            return 0;
        };
        if let Some(count) = self.heap().read::<Class, _>(class, |c| c.num_type_arguments) {
            return count as usize;
        }
        let own = self.num_type_parameters(cid);
        let inherited = self
            .super_class_of(cid)
            .filter(|&super_cid| super_cid != cid)
            .map_or(0, |super_cid| self.num_type_arguments(super_cid));
        own + inherited
    }

    /// `C<T0, .., Tn>` of a type finalized class.
    pub fn declaration_type_of(&self, cid: ClassId) -> ObjectId {
        match self.with_class(cid, |c| c.declaration_type) {
            Some(ty) => ty,
            None => panic!("class {} has no declaration type yet", self.class_name(cid)),
        }
    }

    pub fn try_declaration_type_of(&self, cid: ClassId) -> Option<ObjectId> {
        self.try_class_object(cid)
            .and_then(|class| self.heap().read::<Class, _>(class, |c| c.declaration_type))
    }

    // ── members ────────────────────────────────────────────────────

    pub fn add_field(&self, cid: ClassId, field: ObjectId) {
        self.write_class(cid, |c| {
            debug_assert!(!c.is_finalized(), "adding field to finalized class {cid}");
            c.fields.push(field);
            c.offset_to_field.take();
        });
        self.heap().write::<Field, _>(field, |f| f.owner = cid);
    }

    /// Adds a function, the name index is built once the method count
    /// crosses the configured threshold.
    pub fn add_function(&self, cid: ClassId, fun: ObjectId) {
        let threshold = self.settings().function_hash_threshold;
        let name = self.heap().read::<Function, _>(fun, |f| f.name);
        let names: Option<Vec<(ObjectId, ObjectId)>> = self.with_class(cid, |c| {
            (c.functions_index.is_none() && c.functions.len() + 1 >= threshold).then(|| {
                c.functions.iter().map(|&f| (self.heap().read::<Function, _>(f, |f| f.name), f)).collect()
            })
        });
        let builds_index = names.is_some();
        self.write_class(cid, |c| {
            c.functions.push(fun);
            if let Some(names) = names {
                let mut index = AHashMap::with_capacity(names.len() + 1);
                for (name, fun) in names {
                    index.entry(name).or_insert(fun);
                }
                c.functions_index = Some(index);
            }
            if let Some(index) = &mut c.functions_index {
                index.entry(name).or_insert(fun);
            }
        });
        if builds_index {
            log::debug!("class {cid} builds a function index at {threshold} functions");
        }
    }

    pub fn functions_of(&self, cid: ClassId) -> Vec<ObjectId> {
        self.with_class(cid, |c| c.functions.clone())
    }

    pub fn fields_of(&self, cid: ClassId) -> Vec<ObjectId> {
        self.with_class(cid, |c| c.fields.clone())
    }

    /// Function named exactly `name` in this class only.
    pub fn lookup_function(&self, cid: ClassId, name: &str, kind: MemberKind) -> Option<ObjectId> {
        // member names are symbols, no symbol means no member
        let symbol = self.lookup_symbol(name)?;
        let heap = self.heap();
        let (indexed, functions) = self.with_class(cid, |c| {
            let indexed = c.functions_index.as_ref().map(|index| index.get(&symbol).copied());
            (indexed, c.functions.clone())
        });
        match indexed {
            Some(found) => found.filter(|&fun| heap.read::<Function, _>(fun, |f| kind_matches(f, kind))),
            None => functions.into_iter().find(|&fun| {
                heap.read::<Function, _>(fun, |f| f.name == symbol && kind_matches(f, kind))
            }),
        }
    }

    /// Like `lookup_function` but a private `name` matches whatever library
    /// key the member was mangled with.
    pub fn lookup_function_allow_private(
        &self,
        cid: ClassId,
        name: &str,
        kind: MemberKind,
    ) -> Option<ObjectId> {
        let heap = self.heap();
        self.functions_of(cid).into_iter().find(|&fun| {
            let (fun_name, matches) = heap.read::<Function, _>(fun, |f| (f.name, kind_matches(f, kind)));
            matches && equals_ignoring_private_key(&heap.string_value(fun_name), name)
        })
    }

    pub fn lookup_getter(&self, cid: ClassId, field_name: &str) -> Option<ObjectId> {
        self.lookup_function(cid, &getter_name(field_name), MemberKind::Any)
    }

    pub fn lookup_setter(&self, cid: ClassId, field_name: &str) -> Option<ObjectId> {
        self.lookup_function(cid, &setter_name(field_name), MemberKind::Any)
    }

    pub fn lookup_field(&self, cid: ClassId, name: &str, kind: MemberKind) -> Option<ObjectId> {
        let symbol = self.lookup_symbol(name)?;
        let heap = self.heap();
        self.fields_of(cid).into_iter().find(|&field| {
            heap.read::<Field, _>(field, |f| {
                f.name == symbol
                    && match kind {
                        MemberKind::Any => true,
                        MemberKind::Instance => !f.is_static(),
                        MemberKind::Static => f.is_static(),
                        MemberKind::Constructor => false,
                    }
            })
        })
    }

    pub fn lookup_field_allow_private(&self, cid: ClassId, name: &str) -> Option<ObjectId> {
        let heap = self.heap();
        self.fields_of(cid).into_iter().find(|&field| {
            let field_name = heap.read::<Field, _>(field, |f| f.name);
            equals_ignoring_private_key(&heap.string_value(field_name), name)
        })
    }

    /// Instance function found by walking the super class chain.
    pub fn resolve_dynamic_function(&self, cid: ClassId, name: &str) -> Option<ObjectId> {
        let mut current = Some(cid);
        while let Some(cid) = current {
            if let Some(fun) = self.lookup_function(cid, name, MemberKind::Instance) {
                return Some(fun);
            }
            current = self.super_class_of(cid).filter(|&super_cid| super_cid != cid);
        }
        None
    }

    /// Instance field stored at slot `offset`, inherited fields included.
    pub fn field_by_offset(&self, cid: ClassId, offset: usize) -> Option<ObjectId> {
        if let Some(found) = self.with_class(cid, |c| {
            c.offset_to_field.get().map(|map| map.get(&offset).copied())
        }) {
            return found;
        }
        let heap = self.heap();
        let mut map = AHashMap::new();
        let mut current = Some(cid);
        while let Some(class) = current {
            for field in self.fields_of(class) {
                // fields of a class not laid out yet have no slot
                if let Some(slot) = heap.read::<Field, _>(field, |f| {
                    (!f.is_static() && f.has_host_offset()).then(|| f.host_offset())
                }) {
                    map.entry(slot).or_insert(field);
                }
            }
            current = self.super_class_of(class).filter(|&super_cid| super_cid != class);
        }
        let found = map.get(&offset).copied();
        self.with_class(cid, |c| {
            let _ = c.offset_to_field.set(map);
        });
        found
    }

    // ── dispatchers ────────────────────────────────────────────────

    /// Cached no-such-method or invoke-field dispatcher for a call shape,
    /// created on demand.
    pub fn invocation_dispatcher(
        &self,
        cid: ClassId,
        name: &str,
        arguments_descriptor: ObjectId,
        kind: FunctionKind,
        create_if_absent: bool,
    ) -> ObjectResult<Option<ObjectId>> {
        debug_assert!(kind.is_dispatcher(), "{kind:?} is not a dispatcher kind");
        let name = self.symbol(name)?;
        let find = |c: &Class| {
            c.dispatchers
                .iter()
                .find(|d| {
                    d.name == name && d.arguments_descriptor == arguments_descriptor && d.kind == kind
                })
                .map(|d| d.function)
        };
        if let Some(found) = self.with_class(cid, find) {
            return Ok(Some(found));
        }
        if !create_if_absent {
            return Ok(None);
        }
        let _guard = self.dispatcher_mutex().lock();
        if let Some(found) = self.with_class(cid, find) {
            return Ok(Some(found));
        }
        let function = self.new_dispatcher(cid, name, arguments_descriptor, kind)?;
        self.write_class(cid, |c| {
            c.dispatchers.push(Dispatcher {
                name,
                arguments_descriptor,
                kind,
                function,
            })
        });
        Ok(Some(function))
    }

    fn new_dispatcher(
        &self,
        cid: ClassId,
        name: ObjectId,
        arguments_descriptor: ObjectId,
        kind: FunctionKind,
    ) -> ObjectResult<ObjectId> {
        let descriptor: ArgumentsDescriptor = self.arguments_descriptor(arguments_descriptor)?;
        let dynamic = self.dynamic_type();
        let mut names = Vec::with_capacity(descriptor.count);
        for i in 0..descriptor.positional_count() {
            names.push(if i == 0 {
                self.symbol("this")?
            } else {
                self.symbol(&format!(":p{i}"))?
            });
        }
        names.extend(descriptor.named.iter().map(|&(name, _)| name));
        let mut dispatcher = Function::new(name, kind, cid, dynamic).with_parameters(
            vec![dynamic; descriptor.count],
            names,
            descriptor.named_count(),
            true,
        );
        dispatcher.data = FunctionData::Dispatcher {
            arguments_descriptor,
        };
        self.allocate(dispatcher, Space::Old)
    }

    // ── hierarchy ──────────────────────────────────────────────────

    pub fn add_direct_subclass(&self, cid: ClassId, subclass: ClassId) {
        self.write_class(cid, |c| {
            if !c.direct_subclasses.contains(&subclass) {
                c.direct_subclasses.push(subclass);
            }
        });
    }

    pub fn add_direct_implementor(&self, cid: ClassId, implementor: ClassId) {
        self.write_class(cid, |c| {
            c.flags |= ClassFlags::IMPLEMENTED;
            if !c.direct_implementors.contains(&implementor) {
                c.direct_implementors.push(implementor);
            }
        });
    }

    pub fn direct_subclasses_of(&self, cid: ClassId) -> Vec<ClassId> {
        self.with_class(cid, |c| c.direct_subclasses.clone())
    }

    pub fn direct_implementors_of(&self, cid: ClassId) -> Vec<ClassId> {
        self.with_class(cid, |c| c.direct_implementors.clone())
    }

    /// Records optimized code that assumed the current hierarchy below `cid`.
    pub fn register_cha_dependent_code(&self, cid: ClassId, code: ObjectId) {
        self.write_class(cid, |c| {
            if !c.dependent_code.contains(&code) {
                c.dependent_code.push(code);
            }
        });
    }

    /// Disables all code depending on the hierarchy below `cid`, returns
    /// how many were still alive.
    pub fn disable_cha_dependent_code(&self, cid: ClassId) -> usize {
        let codes = self.write_class(cid, |c| std::mem::take(&mut c.dependent_code));
        let mut disabled = 0;
        for code in codes {
            if self.is_code_alive(code) {
                self.disable_code(code);
                disabled += 1;
            }
        }
        if disabled > 0 {
            log::debug!("hierarchy change below {} disabled {disabled} code objects", self.class_name(cid));
        }
        disabled
    }

    // ── constants & stubs ──────────────────────────────────────────

    pub fn add_class_constant(&self, cid: ClassId, constant: ObjectId) {
        if self.try_class_object(cid).is_some() {
            self.write_class(cid, |c| c.constants.push(constant));
        }
    }

    /// Canonical constants of the class in registration order.
    pub fn class_constants(&self, cid: ClassId) -> Vec<ObjectId> {
        self.with_class(cid, |c| c.constants.clone())
    }

    pub fn allocation_stub(&self, cid: ClassId) -> Option<ObjectId> {
        self.with_class(cid, Class::allocation_stub)
    }

    pub fn set_allocation_stub(&self, cid: ClassId, stub: ObjectId) {
        self.write_class(cid, |c| {
            debug_assert!(c.allocation_stub.is_none(), "allocation stub of {cid} already set");
            c.allocation_stub = Some(stub);
        });
    }

    pub fn disable_allocation_stub(&self, cid: ClassId) {
        if let Some(stub) = self.write_class(cid, |c| c.allocation_stub.take()) {
            self.disable_code(stub);
        }
    }

    // ── instances ──────────────────────────────────────────────────

    /// Null filled instance of a finalized class.
    pub fn new_instance(&self, cid: ClassId, space: Space) -> ObjectResult<ObjectId> {
        let (finalized, slots) = self.with_class(cid, |c| (c.is_finalized(), c.num_instance_slots()));
        if !finalized {
            return Err(ObjectError::api(format!(
                "cannot allocate an instance of unfinalized class {}",
                self.class_name(cid)
            )));
        }
        self.write_class(cid, |c| c.flags |= ClassFlags::ALLOCATED);
        self.allocate(Instance::new(cid, slots), space)
    }

    pub fn set_instance_type_arguments(&self, instance: ObjectId, args: Option<ObjectId>) {
        let cid = self.heap().cell(instance).class_id();
        let Some(slot) = self.with_class(cid, Class::type_arguments_field_offset) else {
            panic!("instances of {} carry no type arguments", self.class_name(cid));
        };
        self.heap()
            .write::<Instance, _>(instance, |i| i.set_field_at(slot, Value::from(args)));
    }

    /// Type arguments of a generic instance, the null vector otherwise.
    pub fn instance_type_arguments(&self, value: Value) -> Option<ObjectId> {
        let id = value.as_non_null()?;
        let heap = self.heap();
        let cid = heap.cell(id).class_id();
        if cid.is_array() {
            return heap.read::<crate::Array, _>(id, |a| a.type_arguments);
        }
        if cid == ClassId::CLOSURE {
            return heap.read::<crate::Closure, _>(id, |c| c.instantiator_type_arguments);
        }
        let slot = self.try_class_object(cid).and_then(|class| {
            heap.read::<Class, _>(class, Class::type_arguments_field_offset)
        })?;
        heap.try_read::<Instance, _>(id, |i| i.field_at(slot).as_non_null())
            .flatten()
    }
}

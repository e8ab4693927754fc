use std::{
    cell::Cell,
    sync::{Arc, OnceLock},
};

use parking_lot::{Mutex, RwLock};

use crate::{
    Array, CanonicalTables, Class, ClassId, FieldFlags, FunctionKind, Heap, HeapCreateInfo,
    HeapError, Instance, Nullability, Object, ObjectError, ObjectId, ObjectResult, Space,
    StaticSlot, TypeParameter, UnhandledException, Value,
};

#[derive(Debug, Default)]
pub struct IsolateCreateInfo {
    pub heap: HeapCreateInfo,
    // initial bucket count of new megamorphic caches, a power of two
    pub megamorphic_initial_capacity: Option<usize>,
    // method count at which a class builds its name index
    pub function_hash_threshold: Option<usize>,
    // checks an inline cache holds before the call site goes megamorphic
    pub ic_data_max_checks: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct IsolateSettings {
    pub megamorphic_initial_capacity: usize,
    pub function_hash_threshold: usize,
    pub ic_data_max_checks: usize,
}

impl Default for IsolateSettings {
    fn default() -> Self {
        Self {
            megamorphic_initial_capacity: 4,
            function_hash_threshold: 16,
            ic_data_max_checks: 8,
        }
    }
}

impl IsolateSettings {
    pub fn from_info(info: &IsolateCreateInfo) -> Self {
        let mut settings = Self::default();
        info.megamorphic_initial_capacity
            .inspect(|&val| settings.megamorphic_initial_capacity = val.next_power_of_two().max(2));
        info.function_hash_threshold
            .inspect(|&val| settings.function_hash_threshold = val.max(1));
        info.ic_data_max_checks
            .inspect(|&val| settings.ic_data_max_checks = val.max(1));
        settings
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThreadKind {
    Mutator,
    BackgroundCompiler,
}

thread_local! {
    static THREAD_KIND: Cell<ThreadKind> = const { Cell::new(ThreadKind::Mutator) };
    static EXCEPTION_SCOPES: Cell<usize> = const { Cell::new(0) };
}

pub fn current_thread_kind() -> ThreadKind {
    THREAD_KIND.with(Cell::get)
}

/// Runs `f` with the current thread acting as the background compiler.
pub fn run_as_background_compiler<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(ThreadKind);

    impl Drop for Restore {
        fn drop(&mut self) {
            THREAD_KIND.with(|kind| kind.set(self.0));
        }
    }

    let _restore = Restore(THREAD_KIND.with(|kind| kind.replace(ThreadKind::BackgroundCompiler)));
    f()
}

/// Marks an active managed handler on this thread. Out of memory inside a
/// scope becomes a thrown exception instead of a fatal error.
pub struct ExceptionScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ExceptionScope {
    pub fn enter() -> Self {
        EXCEPTION_SCOPES.with(|scopes| scopes.set(scopes.get() + 1));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }

    pub fn is_active() -> bool {
        EXCEPTION_SCOPES.with(Cell::get) > 0
    }
}

impl Drop for ExceptionScope {
    fn drop(&mut self) {
        EXCEPTION_SCOPES.with(|scopes| scopes.set(scopes.get() - 1));
    }
}

/// Well-known objects created during bootstrap.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    pub true_value: ObjectId,
    pub false_value: ObjectId,
    pub empty_array: ObjectId,
    pub out_of_memory: ObjectId,
    pub megamorphic_miss_function: ObjectId,
}

pub struct IsolateShared {
    settings: IsolateSettings,
    heap: Heap,
    class_table: RwLock<Vec<ObjectId>>,
    canonical_tables: CanonicalTables,
    object_store: OnceLock<ObjectStore>,
    field_table: RwLock<Vec<StaticSlot>>,
    libraries: RwLock<Vec<ObjectId>>,
    closure_function_mutex: Mutex<()>,
    dispatcher_mutex: Mutex<()>,
    megamorphic_mutex: Mutex<()>,
    subtype_test_cache_mutex: Mutex<()>,
}

/// Owner of the heap, class table and every isolate wide table.
#[derive(Clone)]
pub struct Isolate {
    inner: Arc<IsolateShared>,
}

const PREDEFINED_CLASSES: [(ClassId, &str); ClassId::NUM_PREDEFINED.0 as usize - 1] = [
    (ClassId::CLASS, "Class"),
    (ClassId::FUNCTION, "_Function"),
    (ClassId::FIELD, "Field"),
    (ClassId::LIBRARY, "Library"),
    (ClassId::NAMESPACE, "Namespace"),
    (ClassId::SCRIPT, "Script"),
    (ClassId::CODE, "Code"),
    (ClassId::BYTECODE, "Bytecode"),
    (ClassId::OBJECT_POOL, "ObjectPool"),
    (ClassId::PC_DESCRIPTORS, "PcDescriptors"),
    (ClassId::EXCEPTION_HANDLERS, "ExceptionHandlers"),
    (ClassId::LOCAL_VAR_DESCRIPTORS, "LocalVarDescriptors"),
    (ClassId::CONTEXT, "Context"),
    (ClassId::IC_DATA, "ICData"),
    (ClassId::MEGAMORPHIC_CACHE, "MegamorphicCache"),
    (ClassId::SUBTYPE_TEST_CACHE, "SubtypeTestCache"),
    (ClassId::SINGLE_TARGET_CACHE, "SingleTargetCache"),
    (ClassId::UNLINKED_CALL, "UnlinkedCall"),
    (ClassId::TYPE_ARGUMENTS, "TypeArguments"),
    (ClassId::OBJECT, "Object"),
    (ClassId::NULL, "Null"),
    (ClassId::DYNAMIC, "dynamic"),
    (ClassId::VOID, "void"),
    (ClassId::NEVER, "Never"),
    (ClassId::BOOL, "bool"),
    (ClassId::SMI, "_Smi"),
    (ClassId::MINT, "_Mint"),
    (ClassId::DOUBLE, "double"),
    (ClassId::ONE_BYTE_STRING, "_OneByteString"),
    (ClassId::TWO_BYTE_STRING, "_TwoByteString"),
    (ClassId::EXTERNAL_ONE_BYTE_STRING, "_ExternalOneByteString"),
    (ClassId::EXTERNAL_TWO_BYTE_STRING, "_ExternalTwoByteString"),
    (ClassId::ARRAY, "List"),
    (ClassId::IMMUTABLE_ARRAY, "_ImmutableList"),
    (ClassId::CLOSURE, "_Closure"),
    (ClassId::TYPE, "_Type"),
    (ClassId::TYPE_REF, "_TypeRef"),
    (ClassId::TYPE_PARAMETER, "_TypeParameter"),
    (ClassId::FUNCTION_INTERFACE, "Function"),
    (ClassId::FUTURE, "Future"),
    (ClassId::FUTURE_OR, "FutureOr"),
    (ClassId::INT, "int"),
    (ClassId::STRING, "String"),
    (ClassId::NO_SUCH_METHOD_ERROR, "NoSuchMethodError"),
    (ClassId::TYPE_ERROR, "TypeError"),
    (ClassId::OUT_OF_MEMORY_ERROR, "OutOfMemoryError"),
    (ClassId::CYCLIC_INITIALIZATION_ERROR, "CyclicInitializationError"),
    (ClassId::STACK_TRACE, "StackTrace"),
];

// instance fields of the predefined error classes, in slot order
const ERROR_FIELDS: [(ClassId, &[&str]); 3] = [
    (
        ClassId::NO_SUCH_METHOD_ERROR,
        &[
            "_receiver",
            "_memberName",
            "_invocationType",
            "_typeArguments",
            "_arguments",
            "_namedArguments",
        ],
    ),
    (ClassId::TYPE_ERROR, &["_message"]),
    (ClassId::CYCLIC_INITIALIZATION_ERROR, &["variableName"]),
];

impl Isolate {
    pub fn new(info: IsolateCreateInfo) -> Self {
        let settings = IsolateSettings::from_info(&info);
        log::debug!("creating isolate with {settings:?}");
        let isolate = Self {
            inner: Arc::new(IsolateShared {
                settings,
                heap: Heap::new(info.heap),
                class_table: RwLock::new(Vec::new()),
                canonical_tables: CanonicalTables::default(),
                object_store: OnceLock::new(),
                field_table: RwLock::new(Vec::new()),
                libraries: RwLock::new(Vec::new()),
                closure_function_mutex: Mutex::new(()),
                dispatcher_mutex: Mutex::new(()),
                megamorphic_mutex: Mutex::new(()),
                subtype_test_cache_mutex: Mutex::new(()),
            }),
        };
        // there is no handler while bootstrapping, a failure here is fatal
        if let Err(error) = isolate.bootstrap() {
            log::error!("isolate bootstrap failed: {error}");
            panic!("isolate bootstrap failed: {error}");
        }
        isolate
    }

    pub fn heap(&self) -> &Heap {
        &self.inner.heap
    }

    pub fn settings(&self) -> &IsolateSettings {
        &self.inner.settings
    }

    pub fn canonical_tables(&self) -> &CanonicalTables {
        &self.inner.canonical_tables
    }

    pub fn object_store(&self) -> &ObjectStore {
        match self.inner.object_store.get() {
            Some(store) => store,
            None => panic!("object store used before bootstrap finished"),
        }
    }

    pub fn bool_value(&self, value: bool) -> Value {
        let store = self.object_store();
        if value {
            store.true_value.value()
        } else {
            store.false_value.value()
        }
    }

    pub(crate) fn field_table(&self) -> &RwLock<Vec<StaticSlot>> {
        &self.inner.field_table
    }

    pub(crate) fn closure_function_mutex(&self) -> &Mutex<()> {
        &self.inner.closure_function_mutex
    }

    pub(crate) fn dispatcher_mutex(&self) -> &Mutex<()> {
        &self.inner.dispatcher_mutex
    }

    pub(crate) fn megamorphic_mutex(&self) -> &Mutex<()> {
        &self.inner.megamorphic_mutex
    }

    pub(crate) fn subtype_test_cache_mutex(&self) -> &Mutex<()> {
        &self.inner.subtype_test_cache_mutex
    }

    // ── allocation ─────────────────────────────────────────────────

    /// Allocates through the heap. Running out of memory throws the
    /// preallocated error inside an exception scope and is fatal outside.
    pub fn allocate(&self, object: impl Into<Object>, space: Space) -> ObjectResult<ObjectId> {
        self.heap()
            .allocate(object.into(), space)
            .map_err(|error| self.allocation_failed(error))
    }

    /// Old space copy of a new space object, old objects are returned as is.
    pub fn promote(&self, id: ObjectId) -> ObjectResult<ObjectId> {
        self.heap()
            .promote(id)
            .map_err(|error| self.allocation_failed(error))
    }

    fn allocation_failed(&self, error: HeapError) -> ObjectError {
        match error {
            HeapError::OutOfMemory { .. } => {
                let preallocated = self.inner.object_store.get().map(|store| store.out_of_memory);
                match preallocated {
                    Some(exception) if ExceptionScope::is_active() => {
                        log::warn!("{error}, throwing OutOfMemoryError");
                        ObjectError::Unhandled(UnhandledException {
                            exception: exception.value(),
                            stacktrace: Value::NULL,
                        })
                    }
                    _ => {
                        log::error!("{error} without an active exception handler");
                        panic!("VM out of memory: {error}");
                    }
                }
            }
            HeapError::Misaligned { .. } => ObjectError::api(error.to_string()),
        }
    }

    // ── class table ────────────────────────────────────────────────

    pub(crate) fn register_class(&self, mut class: Class) -> ObjectResult<ClassId> {
        let mut table = self.inner.class_table.write();
        // id 0 is the illegal class id
        let cid = ClassId(table.len() as u32 + 1);
        class.id = cid;
        let id = self.allocate(class, Space::Old)?;
        table.push(id);
        Ok(cid)
    }

    pub fn try_class_object(&self, cid: ClassId) -> Option<ObjectId> {
        if cid == ClassId::ILLEGAL {
            return None;
        }
        self.inner.class_table.read().get(cid.index() - 1).copied()
    }

    pub fn class_object(&self, cid: ClassId) -> ObjectId {
        match self.try_class_object(cid) {
            Some(id) => id,
            None => panic!("no class registered under {cid}"),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.inner.class_table.read().len()
    }

    // ── libraries ──────────────────────────────────────────────────

    pub(crate) fn register_library(&self, library: ObjectId) -> usize {
        let mut libraries = self.inner.libraries.write();
        libraries.push(library);
        libraries.len() - 1
    }

    pub fn libraries(&self) -> Vec<ObjectId> {
        self.inner.libraries.read().clone()
    }

    // ── bootstrap ──────────────────────────────────────────────────

    fn bootstrap(&self) -> ObjectResult<()> {
        let heap = self.heap();
        let null = self.allocate(Object::Null, Space::Old)?;
        debug_assert_eq!(null, ObjectId::NULL);
        heap.set_canonical(null);
        let true_value = self.allocate(Object::Bool(true), Space::Old)?;
        let false_value = self.allocate(Object::Bool(false), Space::Old)?;
        heap.set_canonical(true_value);
        heap.set_canonical(false_value);

        for (cid, name) in PREDEFINED_CLASSES {
            let registered = self.new_class(name, None)?;
            debug_assert_eq!(registered, cid, "predefined class {name} out of order");
        }

        self.ensure_is_finalized(ClassId::OBJECT)?;
        for index in ClassId::CLASS.0..=ClassId::TYPE_ARGUMENTS.0 {
            self.prefinalize(ClassId(index))?;
        }

        let object = self.object_type();
        let generic = [
            (ClassId::ARRAY, "E"),
            (ClassId::IMMUTABLE_ARRAY, "E"),
            (ClassId::FUTURE, "T"),
            (ClassId::FUTURE_OR, "T"),
        ];
        for (cid, name) in generic {
            let name = self.symbol(name)?;
            let param = self.new_type_parameter(TypeParameter::for_class(cid, 0, name, object))?;
            let params = self.new_type_arguments(vec![param], Space::Old)?;
            self.set_type_parameters(cid, Some(params));
        }

        for index in ClassId::NULL.0..ClassId::NUM_PREDEFINED.0 {
            let cid = ClassId(index);
            if !matches!(cid, ClassId::DYNAMIC | ClassId::VOID | ClassId::NEVER) {
                self.set_super_type(cid, Some(object));
            }
        }
        self.ensure_is_finalized(ClassId::DYNAMIC)?;
        let dynamic = self.dynamic_type();
        for (cid, fields) in ERROR_FIELDS {
            for name in fields {
                let field = self.new_field(name, dynamic, FieldFlags::FINAL)?;
                self.add_field(cid, field);
            }
        }

        // core interfaces first, the instance kinds refer to them
        for cid in [ClassId::FUNCTION_INTERFACE, ClassId::INT, ClassId::STRING] {
            self.ensure_is_finalized(cid)?;
        }
        let int = self.int_type();
        self.set_super_type(ClassId::SMI, Some(int));
        self.set_super_type(ClassId::MINT, Some(int));
        let string = self.string_type();
        for cid in [
            ClassId::ONE_BYTE_STRING,
            ClassId::TWO_BYTE_STRING,
            ClassId::EXTERNAL_ONE_BYTE_STRING,
            ClassId::EXTERNAL_TWO_BYTE_STRING,
        ] {
            self.set_interfaces(cid, vec![string]);
        }
        self.set_interfaces(ClassId::CLOSURE, vec![self.function_interface_type()]);
        let element = self.type_at(
            self.type_parameters_of(ClassId::IMMUTABLE_ARRAY)
                .ok_or_else(|| ObjectError::api("immutable list without type parameter"))?,
            0,
        );
        let element_args = self.new_type_arguments(vec![element], Space::Old)?;
        let list_of_element =
            self.new_type(ClassId::ARRAY, Some(element_args), Nullability::NonNullable, Space::Old)?;
        self.set_interfaces(ClassId::IMMUTABLE_ARRAY, vec![list_of_element]);

        for index in ClassId::OBJECT.0..ClassId::NUM_PREDEFINED.0 {
            self.ensure_is_finalized(ClassId(index))?;
        }

        let empty_array = self.allocate(Array::new(0, true), Space::Old)?;
        heap.set_canonical(empty_array);
        let out_of_memory = self.allocate(
            Instance::new(ClassId::OUT_OF_MEMORY_ERROR, 0),
            Space::Old,
        )?;
        let megamorphic_miss_function = self.new_function(
            "megamorphicMiss",
            FunctionKind::Regular,
            ClassId::OBJECT,
            self.dynamic_type(),
        )?;
        let store = ObjectStore {
            true_value,
            false_value,
            empty_array,
            out_of_memory,
            megamorphic_miss_function,
        };
        if self.inner.object_store.set(store).is_err() {
            return Err(ObjectError::api("isolate bootstrapped twice"));
        }
        log::debug!(
            "bootstrapped isolate: {} classes, {} objects",
            self.num_classes(),
            heap.len()
        );
        Ok(())
    }
}

impl std::fmt::Debug for Isolate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Isolate")
            .field("classes", &self.num_classes())
            .field("objects", &self.heap().len())
            .finish()
    }
}

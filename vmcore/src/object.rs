use std::mem;

use crate::{
    Array, Bytecode, Class, ClassId, Closure, Code, Context, ExceptionHandlers, Field, Function,
    ICData, Instance, Library, LocalVarDescriptors, MegamorphicCache, Namespace, ObjectPool,
    PcDescriptors, Script, SingleTargetCache, StringObject, SubtypeTestCache, Type, TypeArguments,
    TypeParameter, TypeRef, UnlinkedCall, Visitable, Visitor,
};

pub const WORD_SIZE: usize = 8;
pub const HEADER_SIZE: usize = WORD_SIZE;

#[inline]
pub const fn align_up(size: usize, alignment: usize) -> usize {
    (size + alignment - 1) & !(alignment - 1)
}

/// Every heap resident entity.
///
/// Built-in representations form a closed set, user classes share the
/// `Instance` variant.
pub enum Object {
    Null,
    Bool(bool),
    Mint(i64),
    Double(f64),
    String(StringObject),
    Array(Array),
    Instance(Instance),
    Closure(Closure),
    Context(Context),
    Type(Type),
    TypeRef(TypeRef),
    TypeParameter(TypeParameter),
    TypeArguments(TypeArguments),
    Class(Class),
    Function(Function),
    Field(Field),
    Library(Library),
    Namespace(Namespace),
    Script(Script),
    Code(Code),
    Bytecode(Bytecode),
    ObjectPool(ObjectPool),
    PcDescriptors(PcDescriptors),
    ExceptionHandlers(ExceptionHandlers),
    LocalVarDescriptors(LocalVarDescriptors),
    ICData(ICData),
    MegamorphicCache(MegamorphicCache),
    SubtypeTestCache(SubtypeTestCache),
    SingleTargetCache(SingleTargetCache),
    UnlinkedCall(UnlinkedCall),
}

impl Object {
    pub fn class_id(&self) -> ClassId {
        match self {
            Self::Null => ClassId::NULL,
            Self::Bool(_) => ClassId::BOOL,
            Self::Mint(_) => ClassId::MINT,
            Self::Double(_) => ClassId::DOUBLE,
            Self::String(string) => string.class_id(),
            Self::Array(array) => array.class_id(),
            Self::Instance(instance) => instance.class_id,
            Self::Closure(_) => ClassId::CLOSURE,
            Self::Context(_) => ClassId::CONTEXT,
            Self::Type(_) => ClassId::TYPE,
            Self::TypeRef(_) => ClassId::TYPE_REF,
            Self::TypeParameter(_) => ClassId::TYPE_PARAMETER,
            Self::TypeArguments(_) => ClassId::TYPE_ARGUMENTS,
            Self::Class(_) => ClassId::CLASS,
            Self::Function(_) => ClassId::FUNCTION,
            Self::Field(_) => ClassId::FIELD,
            Self::Library(_) => ClassId::LIBRARY,
            Self::Namespace(_) => ClassId::NAMESPACE,
            Self::Script(_) => ClassId::SCRIPT,
            Self::Code(_) => ClassId::CODE,
            Self::Bytecode(_) => ClassId::BYTECODE,
            Self::ObjectPool(_) => ClassId::OBJECT_POOL,
            Self::PcDescriptors(_) => ClassId::PC_DESCRIPTORS,
            Self::ExceptionHandlers(_) => ClassId::EXCEPTION_HANDLERS,
            Self::LocalVarDescriptors(_) => ClassId::LOCAL_VAR_DESCRIPTORS,
            Self::ICData(_) => ClassId::IC_DATA,
            Self::MegamorphicCache(_) => ClassId::MEGAMORPHIC_CACHE,
            Self::SubtypeTestCache(_) => ClassId::SUBTYPE_TEST_CACHE,
            Self::SingleTargetCache(_) => ClassId::SINGLE_TARGET_CACHE,
            Self::UnlinkedCall(_) => ClassId::UNLINKED_CALL,
        }
    }

    /// Payload size in words, not counting the header.
    fn payload_words(&self) -> usize {
        fn words_of<T>(_: &T) -> usize {
            mem::size_of::<T>().div_ceil(WORD_SIZE)
        }
        match self {
            Self::Null | Self::Bool(_) | Self::Mint(_) | Self::Double(_) => 1,
            Self::String(string) => string.payload_words(),
            // type arguments + length + elements
            Self::Array(array) => 2 + array.len(),
            Self::Instance(instance) => instance.fields.len(),
            Self::Context(context) => 2 + context.variables.len(),
            Self::TypeArguments(arguments) => 3 + arguments.len(),
            Self::Code(code) => words_of(code) + code.instructions().len().div_ceil(WORD_SIZE),
            Self::Closure(inner) => words_of(inner),
            Self::Type(inner) => words_of(inner),
            Self::TypeRef(inner) => words_of(inner),
            Self::TypeParameter(inner) => words_of(inner),
            Self::Class(inner) => words_of(inner),
            Self::Function(inner) => words_of(inner),
            Self::Field(inner) => words_of(inner),
            Self::Library(inner) => words_of(inner),
            Self::Namespace(inner) => words_of(inner),
            Self::Script(inner) => words_of(inner),
            Self::Bytecode(inner) => words_of(inner),
            Self::ObjectPool(pool) => 1 + 2 * pool.len(),
            Self::PcDescriptors(inner) => words_of(inner),
            Self::ExceptionHandlers(inner) => words_of(inner),
            Self::LocalVarDescriptors(inner) => words_of(inner),
            Self::ICData(inner) => words_of(inner),
            Self::MegamorphicCache(inner) => words_of(inner),
            Self::SubtypeTestCache(inner) => words_of(inner),
            Self::SingleTargetCache(inner) => words_of(inner),
            Self::UnlinkedCall(inner) => words_of(inner),
        }
    }

    /// Heap size in bytes, rounded to `alignment`.
    pub fn heap_size(&self, alignment: usize) -> usize {
        align_up(HEADER_SIZE + self.payload_words() * WORD_SIZE, alignment)
    }

    /// Copy of a value-like object, used for cloning and promotion.
    /// Metadata kinds with interior caches are not cloneable this way.
    pub fn try_clone(&self) -> Option<Object> {
        let cloned = match self {
            Self::Null => Self::Null,
            Self::Bool(value) => Self::Bool(*value),
            Self::Mint(value) => Self::Mint(*value),
            Self::Double(value) => Self::Double(*value),
            Self::String(string) => Self::String(string.clone()),
            Self::Array(array) => Self::Array(array.clone()),
            Self::Instance(instance) => Self::Instance(instance.clone()),
            Self::Closure(closure) => Self::Closure(closure.clone()),
            Self::Context(context) => Self::Context(context.clone()),
            Self::Type(ty) => Self::Type(ty.clone()),
            Self::TypeParameter(param) => Self::TypeParameter(param.clone()),
            Self::TypeArguments(arguments) => Self::TypeArguments(arguments.clone()),
            Self::ICData(ic_data) => Self::ICData(ic_data.clone()),
            _ => return None,
        };
        Some(cloned)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Mint(_) => "Mint",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::Array(_) => "Array",
            Self::Instance(_) => "Instance",
            Self::Closure(_) => "Closure",
            Self::Context(_) => "Context",
            Self::Type(_) => "Type",
            Self::TypeRef(_) => "TypeRef",
            Self::TypeParameter(_) => "TypeParameter",
            Self::TypeArguments(_) => "TypeArguments",
            Self::Class(_) => "Class",
            Self::Function(_) => "Function",
            Self::Field(_) => "Field",
            Self::Library(_) => "Library",
            Self::Namespace(_) => "Namespace",
            Self::Script(_) => "Script",
            Self::Code(_) => "Code",
            Self::Bytecode(_) => "Bytecode",
            Self::ObjectPool(_) => "ObjectPool",
            Self::PcDescriptors(_) => "PcDescriptors",
            Self::ExceptionHandlers(_) => "ExceptionHandlers",
            Self::LocalVarDescriptors(_) => "LocalVarDescriptors",
            Self::ICData(_) => "ICData",
            Self::MegamorphicCache(_) => "MegamorphicCache",
            Self::SubtypeTestCache(_) => "SubtypeTestCache",
            Self::SingleTargetCache(_) => "SingleTargetCache",
            Self::UnlinkedCall(_) => "UnlinkedCall",
        }
    }
}

// Idea:
// visiting an object visits only its direct edges, the variant decides which
// of its fields are references.
impl Visitable for Object {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        match self {
            Self::Null | Self::Bool(_) | Self::Mint(_) | Self::Double(_) => (),
            Self::String(_) | Self::PcDescriptors(_) => (),
            Self::Array(inner) => inner.visit_edges(visitor),
            Self::Instance(inner) => inner.visit_edges(visitor),
            Self::Closure(inner) => inner.visit_edges(visitor),
            Self::Context(inner) => inner.visit_edges(visitor),
            Self::Type(inner) => inner.visit_edges(visitor),
            Self::TypeRef(inner) => inner.visit_edges(visitor),
            Self::TypeParameter(inner) => inner.visit_edges(visitor),
            Self::TypeArguments(inner) => inner.visit_edges(visitor),
            Self::Class(inner) => inner.visit_edges(visitor),
            Self::Function(inner) => inner.visit_edges(visitor),
            Self::Field(inner) => inner.visit_edges(visitor),
            Self::Library(inner) => inner.visit_edges(visitor),
            Self::Namespace(inner) => inner.visit_edges(visitor),
            Self::Script(inner) => inner.visit_edges(visitor),
            Self::Code(inner) => inner.visit_edges(visitor),
            Self::Bytecode(inner) => inner.visit_edges(visitor),
            Self::ObjectPool(inner) => inner.visit_edges(visitor),
            Self::ExceptionHandlers(inner) => inner.visit_edges(visitor),
            Self::LocalVarDescriptors(inner) => inner.visit_edges(visitor),
            Self::ICData(inner) => inner.visit_edges(visitor),
            Self::MegamorphicCache(inner) => inner.visit_edges(visitor),
            Self::SubtypeTestCache(inner) => inner.visit_edges(visitor),
            Self::SingleTargetCache(inner) => inner.visit_edges(visitor),
            Self::UnlinkedCall(inner) => inner.visit_edges(visitor),
        }
    }
}

/// Typed view into an `Object` variant.
pub trait HeapObject: Sized {
    const NAME: &'static str;

    fn cast(object: &Object) -> Option<&Self>;
    fn cast_mut(object: &mut Object) -> Option<&mut Self>;
}

macro_rules! heap_objects {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl HeapObject for $ty {
                const NAME: &'static str = stringify!($variant);

                #[inline]
                fn cast(object: &Object) -> Option<&Self> {
                    match object {
                        Object::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                #[inline]
                fn cast_mut(object: &mut Object) -> Option<&mut Self> {
                    match object {
                        Object::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Object {
                fn from(inner: $ty) -> Self {
                    Object::$variant(inner)
                }
            }
        )*
    };
}

heap_objects! {
    String => StringObject,
    Array => Array,
    Instance => Instance,
    Closure => Closure,
    Context => Context,
    Type => Type,
    TypeRef => TypeRef,
    TypeParameter => TypeParameter,
    TypeArguments => TypeArguments,
    Class => Class,
    Function => Function,
    Field => Field,
    Library => Library,
    Namespace => Namespace,
    Script => Script,
    Code => Code,
    Bytecode => Bytecode,
    ObjectPool => ObjectPool,
    PcDescriptors => PcDescriptors,
    ExceptionHandlers => ExceptionHandlers,
    LocalVarDescriptors => LocalVarDescriptors,
    ICData => ICData,
    MegamorphicCache => MegamorphicCache,
    SubtypeTestCache => SubtypeTestCache,
    SingleTargetCache => SingleTargetCache,
    UnlinkedCall => UnlinkedCall,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_granularity() {
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
    }

    #[test]
    fn primitive_sizes() {
        assert_eq!(Object::Mint(5).heap_size(16), 16);
        assert_eq!(Object::Double(1.5).heap_size(16), 16);
        assert_eq!(Object::Mint(5).class_id(), ClassId::MINT);
    }

    #[test]
    fn cast_checks_the_variant() {
        let object = Object::from(Array::new(3, false));
        assert!(Array::cast(&object).is_some());
        assert!(Instance::cast(&object).is_none());
        assert_eq!(object.heap_size(16), align_up(8 + 5 * 8, 16));
    }
}

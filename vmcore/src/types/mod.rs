//! Types, type parameters, type references and type argument vectors.
//!
//! Every type is a heap object addressed by `ObjectId`. A type argument
//! vector is an `Option<ObjectId>` where `None` is the null vector, meaning
//! "all dynamic" of whatever length the context expects.
mod canonicalize;
mod equivalence;
mod instantiate;
mod subtype;
mod trail;
mod type_arguments;

use std::fmt::Write as _;

pub use canonicalize::*;
pub use equivalence::*;
pub use instantiate::*;
pub use subtype::*;
pub use trail::*;
pub use type_arguments::*;

use crate::{
    ClassId, Function, Isolate, ObjectId, ObjectResult, Space, TokenPosition, Visitable, Visitor,
};

/// `num_free_fun_type_params` value meaning every function type parameter is
/// free.
pub const ALL_FREE: usize = i32::MAX as usize;
pub const NONE_FREE: usize = 0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Nullability {
    Nullable,
    NonNullable,
    Legacy,
}

impl Nullability {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Nullable => "?",
            Self::NonNullable | Self::Legacy => "",
        }
    }
}

/// Monotonic: a type never moves back to an earlier state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeState {
    Allocated,
    BeingFinalized,
    FinalizedUninstantiated,
    FinalizedInstantiated,
}

impl TypeState {
    pub fn is_finalized(self) -> bool {
        self >= Self::FinalizedUninstantiated
    }
}

/// Which free type parameters `is_instantiated` looks at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Genericity {
    Any,
    CurrentClass,
    Functions,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AbstractTypeKind {
    Type,
    TypeRef,
    TypeParameter,
}

/// A parameterized class reference, a function type when `signature` is set.
#[derive(Debug, Clone)]
pub struct Type {
    pub class_id: ClassId,
    pub arguments: Option<ObjectId>,
    pub signature: Option<ObjectId>,
    pub nullability: Nullability,
    pub state: TypeState,
    pub token_pos: TokenPosition,
    pub(crate) hash: u32,
}

impl Type {
    pub fn new(class_id: ClassId, arguments: Option<ObjectId>, nullability: Nullability) -> Self {
        Self {
            class_id,
            arguments,
            signature: None,
            nullability,
            state: TypeState::Allocated,
            token_pos: TokenPosition::NO_SOURCE,
            hash: 0,
        }
    }

    /// Function type whose shape is described by a signature function.
    pub fn function(signature: ObjectId, nullability: Nullability) -> Self {
        Self {
            signature: Some(signature),
            ..Self::new(ClassId::CLOSURE, None, nullability)
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.state.is_finalized()
    }

    pub fn is_function_type(&self) -> bool {
        self.signature.is_some()
    }
}

impl Visitable for Type {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_opt(self.arguments);
        visitor.visit_opt(self.signature);
    }
}

/// Back reference closing a cycle in a recursive type.
#[derive(Debug)]
pub struct TypeRef {
    pub target: Option<ObjectId>,
}

impl Visitable for TypeRef {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_opt(self.target);
    }
}

/// Type variable of a generic class or function.
///
/// `index` points into the flattened vector: for class parameters the full
/// class type argument vector, for function parameters the parent functions'
/// parameters followed by the own ones.
#[derive(Debug, Clone)]
pub struct TypeParameter {
    pub parameterized_class: ClassId,
    pub parameterized_function: Option<ObjectId>,
    pub index: u16,
    pub name: ObjectId,
    pub bound: ObjectId,
    pub nullability: Nullability,
    pub state: TypeState,
    pub is_generic_covariant_impl: bool,
    pub token_pos: TokenPosition,
}

impl TypeParameter {
    pub fn for_class(class: ClassId, index: u16, name: ObjectId, bound: ObjectId) -> Self {
        Self {
            parameterized_class: class,
            parameterized_function: None,
            index,
            name,
            bound,
            nullability: Nullability::Legacy,
            state: TypeState::Allocated,
            is_generic_covariant_impl: false,
            token_pos: TokenPosition::NO_SOURCE,
        }
    }

    pub fn for_function(function: ObjectId, index: u16, name: ObjectId, bound: ObjectId) -> Self {
        Self {
            parameterized_class: ClassId::ILLEGAL,
            parameterized_function: Some(function),
            ..Self::for_class(ClassId::ILLEGAL, index, name, bound)
        }
    }

    pub fn is_class_type_parameter(&self) -> bool {
        self.parameterized_class != ClassId::ILLEGAL
    }

    pub fn is_function_type_parameter(&self) -> bool {
        self.parameterized_function.is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.state.is_finalized()
    }
}

impl Visitable for TypeParameter {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_opt(self.parameterized_function);
        visitor.visit_id(self.name);
        visitor.visit_id(self.bound);
    }
}

impl Isolate {
    pub fn abstract_type_kind(&self, id: ObjectId) -> AbstractTypeKind {
        match self.heap().cell(id).class_id() {
            ClassId::TYPE => AbstractTypeKind::Type,
            ClassId::TYPE_REF => AbstractTypeKind::TypeRef,
            ClassId::TYPE_PARAMETER => AbstractTypeKind::TypeParameter,
            cid => panic!("{id} is a {cid}, not an abstract type"),
        }
    }

    /// Follows type references, an unresolved reference is returned as is.
    pub fn deref_type(&self, mut id: ObjectId) -> ObjectId {
        while let Some(Some(target)) = self.heap().try_read::<TypeRef, _>(id, |r| r.target) {
            id = target;
        }
        id
    }

    pub fn is_type_ref(&self, id: ObjectId) -> bool {
        self.heap().is::<TypeRef>(id)
    }

    pub fn is_type_parameter(&self, id: ObjectId) -> bool {
        self.heap().is::<TypeParameter>(self.deref_type(id))
    }

    /// Class of a `Type`, `ClassId::ILLEGAL` for type parameters.
    pub fn type_class_id(&self, id: ObjectId) -> ClassId {
        let id = self.deref_type(id);
        self.heap()
            .try_read::<Type, _>(id, |ty| ty.class_id)
            .unwrap_or(ClassId::ILLEGAL)
    }

    pub fn type_arguments_of(&self, id: ObjectId) -> Option<ObjectId> {
        let id = self.deref_type(id);
        self.heap().try_read::<Type, _>(id, |ty| ty.arguments).flatten()
    }

    pub fn type_signature(&self, id: ObjectId) -> Option<ObjectId> {
        let id = self.deref_type(id);
        self.heap().try_read::<Type, _>(id, |ty| ty.signature).flatten()
    }

    pub fn type_nullability(&self, id: ObjectId) -> Nullability {
        let id = self.deref_type(id);
        let heap = self.heap();
        heap.try_read::<Type, _>(id, |ty| ty.nullability)
            .or_else(|| heap.try_read::<TypeParameter, _>(id, |param| param.nullability))
            .unwrap_or(Nullability::Legacy)
    }

    pub fn is_type_finalized(&self, id: ObjectId) -> bool {
        let id = self.deref_type(id);
        let heap = self.heap();
        heap.try_read::<Type, _>(id, |ty| ty.is_finalized())
            .or_else(|| heap.try_read::<TypeParameter, _>(id, |param| param.is_finalized()))
            .unwrap_or(false)
    }

    pub fn is_function_type(&self, id: ObjectId) -> bool {
        self.type_signature(id).is_some()
    }

    fn is_plain_class_type(&self, id: ObjectId, cid: ClassId) -> bool {
        let id = self.deref_type(id);
        self.heap()
            .try_read::<Type, _>(id, |ty| ty.class_id == cid && ty.signature.is_none())
            .unwrap_or(false)
    }

    pub fn is_dynamic_type(&self, id: ObjectId) -> bool {
        self.is_plain_class_type(id, ClassId::DYNAMIC)
    }

    pub fn is_void_type(&self, id: ObjectId) -> bool {
        self.is_plain_class_type(id, ClassId::VOID)
    }

    pub fn is_never_type(&self, id: ObjectId) -> bool {
        self.is_plain_class_type(id, ClassId::NEVER)
    }

    pub fn is_null_type(&self, id: ObjectId) -> bool {
        self.is_plain_class_type(id, ClassId::NULL)
    }

    pub fn is_object_type(&self, id: ObjectId) -> bool {
        self.is_plain_class_type(id, ClassId::OBJECT)
    }

    /// The `Function` interface, not a function type.
    pub fn is_function_interface_type(&self, id: ObjectId) -> bool {
        self.is_plain_class_type(id, ClassId::FUNCTION_INTERFACE)
    }

    pub fn is_future_or_type(&self, id: ObjectId) -> bool {
        self.is_plain_class_type(id, ClassId::FUTURE_OR)
    }

    /// `X` of `FutureOr<X>`, dynamic for a raw `FutureOr`.
    pub fn future_or_type_argument(&self, id: ObjectId) -> ObjectId {
        match self.type_arguments_of(id) {
            Some(args) => {
                let len = self.type_arguments_len(Some(args));
                self.type_at(args, len - 1)
            }
            None => self.dynamic_type(),
        }
    }

    /// Types every other type is a subtype of. Nullability is ignored.
    pub fn is_top_type_for_subtyping(&self, id: ObjectId) -> bool {
        let id = self.deref_type(id);
        if self.is_dynamic_type(id) || self.is_void_type(id) || self.is_object_type(id) {
            return true;
        }
        if self.is_future_or_type(id) {
            return self.is_top_type_for_subtyping(self.future_or_type_argument(id));
        }
        false
    }

    pub fn is_type_instantiated(
        &self,
        id: ObjectId,
        genericity: Genericity,
        num_free_fun_type_params: usize,
        trail: &mut Trail,
    ) -> bool {
        match self.abstract_type_kind(id) {
            AbstractTypeKind::TypeRef => {
                let Some(target) = self.heap().read::<TypeRef, _>(id, |r| r.target) else {
                    return false;
                };
                trail.test_and_add(id)
                    || self.is_type_instantiated(target, genericity, num_free_fun_type_params, trail)
            }
            AbstractTypeKind::TypeParameter => {
                let (is_class, index) = self.heap().read::<TypeParameter, _>(id, |param| {
                    (param.is_class_type_parameter(), param.index as usize)
                });
                if is_class {
                    // class parameter bounds are not checked by the vm
                    return genericity == Genericity::Functions;
                }
                genericity == Genericity::CurrentClass || index >= num_free_fun_type_params
            }
            AbstractTypeKind::Type => {
                let ty = self.heap().read::<Type, _>(id, |ty| ty.clone());
                if ty.state == TypeState::FinalizedInstantiated {
                    return true;
                }
                if genericity == Genericity::Any
                    && num_free_fun_type_params == ALL_FREE
                    && ty.state == TypeState::FinalizedUninstantiated
                {
                    return false;
                }
                if let Some(signature) = ty.signature
                    && !self.has_instantiated_signature(
                        signature,
                        genericity,
                        num_free_fun_type_params,
                        trail,
                    )
                {
                    return false;
                }
                let Some(args) = ty.arguments else {
                    return true;
                };
                let num_type_args = self.type_arguments_len(Some(args));
                let own = self.num_type_parameters(ty.class_id).min(num_type_args);
                own == 0
                    || self.is_subvector_instantiated(
                        args,
                        num_type_args - own,
                        own,
                        genericity,
                        num_free_fun_type_params,
                        trail,
                    )
            }
        }
    }

    pub fn is_instantiated(&self, id: ObjectId) -> bool {
        self.is_type_instantiated(id, Genericity::Any, ALL_FREE, &mut Trail::new())
    }

    pub fn has_instantiated_signature(
        &self,
        signature: ObjectId,
        genericity: Genericity,
        mut num_free_fun_type_params: usize,
        trail: &mut Trail,
    ) -> bool {
        if genericity != Genericity::CurrentClass {
            let is_generic = self.is_generic_function(signature) || self.has_generic_parent(signature);
            if is_generic {
                num_free_fun_type_params =
                    num_free_fun_type_params.min(self.num_parent_type_parameters(signature));
            }
        }
        let (result_type, parameter_types) = self
            .heap()
            .read::<Function, _>(signature, |fun| (fun.result_type, fun.parameter_types.clone()));
        std::iter::once(result_type)
            .chain(parameter_types)
            .all(|ty| self.is_type_instantiated(ty, genericity, num_free_fun_type_params, trail))
    }

    // ── construction ───────────────────────────────────────────────

    pub fn new_type(
        &self,
        class_id: ClassId,
        arguments: Option<ObjectId>,
        nullability: Nullability,
        space: Space,
    ) -> ObjectResult<ObjectId> {
        self.allocate(Type::new(class_id, arguments, nullability), space)
    }

    pub fn new_function_type(
        &self,
        signature: ObjectId,
        nullability: Nullability,
        space: Space,
    ) -> ObjectResult<ObjectId> {
        self.allocate(Type::function(signature, nullability), space)
    }

    pub fn new_type_ref(&self, target: Option<ObjectId>) -> ObjectResult<ObjectId> {
        self.allocate(TypeRef { target }, Space::Old)
    }

    pub fn set_type_ref_target(&self, type_ref: ObjectId, target: ObjectId) {
        debug_assert!(!self.is_type_ref(target), "type refs point to types");
        self.heap().write::<TypeRef, _>(type_ref, |r| r.target = Some(target));
    }

    pub fn new_type_parameter(&self, param: TypeParameter) -> ObjectResult<ObjectId> {
        self.allocate(param, Space::Old)
    }

    /// Copy of a type with another nullability, `id` itself if unchanged.
    pub fn type_with_nullability(
        &self,
        id: ObjectId,
        nullability: Nullability,
        space: Space,
    ) -> ObjectResult<ObjectId> {
        let id = self.deref_type(id);
        if self.type_nullability(id) == nullability {
            return Ok(id);
        }
        let heap = self.heap();
        let copy = if let Some(mut ty) = heap.try_read::<Type, _>(id, Type::clone) {
            ty.nullability = nullability;
            ty.hash = 0;
            self.allocate(ty, space)?
        } else {
            let mut param = heap.read::<TypeParameter, _>(id, TypeParameter::clone);
            param.nullability = nullability;
            self.allocate(param, space)?
        };
        Ok(copy)
    }

    // ── well-known types ───────────────────────────────────────────

    pub fn dynamic_type(&self) -> ObjectId {
        self.declaration_type_of(ClassId::DYNAMIC)
    }

    pub fn void_type(&self) -> ObjectId {
        self.declaration_type_of(ClassId::VOID)
    }

    pub fn never_type(&self) -> ObjectId {
        self.declaration_type_of(ClassId::NEVER)
    }

    pub fn null_type(&self) -> ObjectId {
        self.declaration_type_of(ClassId::NULL)
    }

    pub fn object_type(&self) -> ObjectId {
        self.declaration_type_of(ClassId::OBJECT)
    }

    pub fn function_interface_type(&self) -> ObjectId {
        self.declaration_type_of(ClassId::FUNCTION_INTERFACE)
    }

    pub fn int_type(&self) -> ObjectId {
        self.declaration_type_of(ClassId::INT)
    }

    pub fn double_type(&self) -> ObjectId {
        self.declaration_type_of(ClassId::DOUBLE)
    }

    pub fn bool_type(&self) -> ObjectId {
        self.declaration_type_of(ClassId::BOOL)
    }

    pub fn string_type(&self) -> ObjectId {
        self.declaration_type_of(ClassId::STRING)
    }

    // ── names ──────────────────────────────────────────────────────

    /// User visible name such as `List<int>?` or `int Function(String)`.
    pub fn type_name(&self, id: ObjectId) -> String {
        let mut out = String::new();
        self.print_type_name(id, &mut out);
        out
    }

    fn print_type_name(&self, id: ObjectId, out: &mut String) {
        let heap = self.heap();
        match self.abstract_type_kind(id) {
            AbstractTypeKind::TypeRef => match heap.read::<TypeRef, _>(id, |r| r.target) {
                // only the class name, the arguments may lead back here
                Some(target) => out.push_str(&self.class_name(self.type_class_id(target))),
                None => out.push_str("null"),
            },
            AbstractTypeKind::TypeParameter => {
                let (name, nullability) =
                    heap.read::<TypeParameter, _>(id, |param| (param.name, param.nullability));
                out.push_str(&heap.string_value(name));
                out.push_str(nullability.suffix());
            }
            AbstractTypeKind::Type => {
                let ty = heap.read::<Type, _>(id, Type::clone);
                if let Some(signature) = ty.signature {
                    self.print_signature_name(signature, out);
                } else {
                    out.push_str(&self.class_name(ty.class_id));
                    let own = self.num_type_parameters(ty.class_id);
                    if let Some(args) = ty.arguments
                        && own > 0
                    {
                        let len = self.type_arguments_len(Some(args));
                        let from = len.saturating_sub(own);
                        if !self.type_arguments_is_raw(Some(args), from, own) {
                            self.print_subvector_name(args, from, len - from, out);
                        }
                    }
                }
                let always_nullable = matches!(
                    ty.class_id,
                    ClassId::DYNAMIC | ClassId::VOID | ClassId::NULL
                );
                if !always_nullable {
                    out.push_str(ty.nullability.suffix());
                }
            }
        }
    }

    fn print_subvector_name(&self, args: ObjectId, from: usize, len: usize, out: &mut String) {
        out.push('<');
        for i in 0..len {
            if i > 0 {
                out.push_str(", ");
            }
            self.print_type_name(self.type_at(args, from + i), out);
        }
        out.push('>');
    }

    pub(crate) fn print_signature_name(&self, signature: ObjectId, out: &mut String) {
        let fun = self.heap().read::<Function, _>(signature, |fun| {
            (
                fun.result_type,
                fun.parameter_types.clone(),
                fun.parameter_names.clone(),
                fun.type_parameters,
                fun.num_fixed_parameters(),
                fun.num_optional_parameters(),
                fun.has_optional_named_parameters(),
                fun.num_implicit_parameters(),
            )
        });
        let (result, params, names, type_params, num_fixed, num_optional, named, implicit) = fun;
        self.print_type_name(result, out);
        out.push_str(" Function");
        if let Some(type_params) = type_params {
            out.push('<');
            for i in 0..self.type_arguments_len(Some(type_params)) {
                if i > 0 {
                    out.push_str(", ");
                }
                let param = self.type_at(type_params, i);
                let (name, bound) =
                    self.heap().read::<TypeParameter, _>(param, |p| (p.name, p.bound));
                out.push_str(&self.heap().string_value(name));
                if !self.is_object_type(bound) && !self.is_dynamic_type(bound) {
                    out.push_str(" extends ");
                    self.print_type_name(bound, out);
                }
            }
            out.push('>');
        }
        out.push('(');
        for (i, &param) in params.iter().enumerate().skip(implicit) {
            if i > implicit {
                out.push_str(", ");
            }
            if i == num_fixed {
                out.push(if named { '{' } else { '[' });
            }
            self.print_type_name(param, out);
            if named && i >= num_fixed {
                let _ = write!(out, " {}", self.heap().string_value(names[i]));
            }
        }
        if num_optional > 0 {
            out.push(if named { '}' } else { ']' });
        }
        out.push(')');
    }
}

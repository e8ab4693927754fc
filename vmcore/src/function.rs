use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use bitflags::bitflags;
use parking_lot::RwLock;

use crate::{
    ArgumentsDescriptor, ClassId, Isolate, Nullability, ObjectError, ObjectId, ObjectResult,
    Space, TokenPosition, Type, TypeState, Value, Visitable, Visitor, scrub_name,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Regular,
    ClosureFunction,
    ImplicitClosureFunction,
    Signature,
    Getter,
    Setter,
    Constructor,
    ImplicitGetter,
    ImplicitSetter,
    ImplicitStaticGetter,
    FieldInitializer,
    MethodExtractor,
    NoSuchMethodDispatcher,
    InvokeFieldDispatcher,
    IrregexpFunction,
    DynamicInvocationForwarder,
    FfiTrampoline,
}

impl FunctionKind {
    pub fn is_closure(self) -> bool {
        matches!(self, Self::ClosureFunction | Self::ImplicitClosureFunction)
    }

    pub fn is_dispatcher(self) -> bool {
        matches!(self, Self::NoSuchMethodDispatcher | Self::InvokeFieldDispatcher)
    }

    pub fn is_field_accessor(self) -> bool {
        matches!(
            self,
            Self::ImplicitGetter
                | Self::ImplicitSetter
                | Self::ImplicitStaticGetter
                | Self::FieldInitializer
        )
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FunctionFlags: u16 {
        const STATIC = 1 << 0;
        const CONST = 1 << 1;
        const ABSTRACT = 1 << 2;
        const EXTERNAL = 1 << 3;
        const NATIVE = 1 << 4;
        const REFLECTABLE = 1 << 5;
        const VISIBLE = 1 << 6;
        const DEBUGGABLE = 1 << 7;
        const OPTIMIZABLE = 1 << 8;
        const INTRINSIC = 1 << 9;
        const REDIRECTING = 1 << 10;
    }
}

/// Kind specific payload of a function.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionData {
    None,
    /// closures, `signature_type` caches the function type once built
    Closure {
        parent: ObjectId,
        signature_type: Option<ObjectId>,
    },
    Signature {
        parent: Option<ObjectId>,
    },
    /// redirecting factory constructors
    Redirection {
        target: ObjectId,
    },
    Regexp {
        regexp: Value,
        string_class_id: ClassId,
        sticky: bool,
    },
    Native {
        name: ObjectId,
    },
    FfiTrampoline {
        c_signature: ObjectId,
        callback_target: Option<ObjectId>,
    },
    /// no-such-method and invoke-field dispatchers
    Dispatcher {
        arguments_descriptor: ObjectId,
    },
    Forwarder {
        target: ObjectId,
    },
    FieldAccessor {
        field: ObjectId,
    },
    MethodExtractor {
        method: ObjectId,
    },
}

/// Which code runs when the function is invoked. Exactly one is active.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CodeState {
    LazyCompile,
    Compiled {
        current: ObjectId,
        unoptimized: Option<ObjectId>,
    },
    Interpreted {
        bytecode: ObjectId,
    },
}

pub struct Function {
    pub name: ObjectId,
    pub kind: FunctionKind,
    pub owner: ClassId,
    pub flags: FunctionFlags,
    pub token_pos: TokenPosition,
    pub end_token_pos: TokenPosition,
    pub result_type: ObjectId,
    /// implicit parameters included
    pub parameter_types: Vec<ObjectId>,
    pub parameter_names: Vec<ObjectId>,
    pub type_parameters: Option<ObjectId>,
    pub data: FunctionData,
    num_fixed_parameters: u16,
    num_optional_parameters: u16,
    has_named_parameters: bool,
    code: CodeState,
    implicit_closure_function: Option<ObjectId>,
    ic_data_array: RwLock<Option<Arc<[ObjectId]>>>,
    usage_counter: AtomicU32,
    deoptimization_counter: u16,
}

impl Function {
    pub fn new(name: ObjectId, kind: FunctionKind, owner: ClassId, result_type: ObjectId) -> Self {
        Self {
            name,
            kind,
            owner,
            flags: FunctionFlags::VISIBLE | FunctionFlags::DEBUGGABLE | FunctionFlags::OPTIMIZABLE,
            token_pos: TokenPosition::NO_SOURCE,
            end_token_pos: TokenPosition::NO_SOURCE,
            result_type,
            parameter_types: Vec::new(),
            parameter_names: Vec::new(),
            type_parameters: None,
            data: FunctionData::None,
            num_fixed_parameters: 0,
            num_optional_parameters: 0,
            has_named_parameters: false,
            code: CodeState::LazyCompile,
            implicit_closure_function: None,
            ic_data_array: RwLock::new(None),
            usage_counter: AtomicU32::new(0),
            deoptimization_counter: 0,
        }
    }

    /// Signature function of a function type. Signatures have no name and
    /// no implicit parameters.
    pub fn new_signature(owner: ClassId, parent: Option<ObjectId>, result_type: ObjectId) -> Self {
        let mut signature = Self::new(ObjectId::NULL, FunctionKind::Signature, owner, result_type);
        signature.flags = FunctionFlags::STATIC;
        signature.data = FunctionData::Signature { parent };
        signature
    }

    /// Sets the parameter list in one go.
    pub fn with_parameters(
        mut self,
        types: Vec<ObjectId>,
        names: Vec<ObjectId>,
        num_optional: usize,
        named: bool,
    ) -> Self {
        debug_assert_eq!(types.len(), names.len());
        let num_fixed = types.len() - num_optional;
        self.parameter_types = types;
        self.parameter_names = names;
        self.set_num_fixed_parameters(num_fixed);
        self.set_num_optional_parameters(num_optional, !named);
        self
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(FunctionFlags::STATIC)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(FunctionFlags::ABSTRACT)
    }

    pub fn is_const(&self) -> bool {
        self.flags.contains(FunctionFlags::CONST)
    }

    pub fn is_native(&self) -> bool {
        self.flags.contains(FunctionFlags::NATIVE)
    }

    pub fn is_closure_function(&self) -> bool {
        self.kind.is_closure()
    }

    /// Instance members take the receiver as first parameter.
    pub fn is_dynamic_function(&self) -> bool {
        !self.is_static()
            && !matches!(
                self.kind,
                FunctionKind::Constructor
                    | FunctionKind::ClosureFunction
                    | FunctionKind::ImplicitClosureFunction
                    | FunctionKind::Signature
                    | FunctionKind::ImplicitStaticGetter
                    | FunctionKind::FieldInitializer
                    | FunctionKind::IrregexpFunction
                    | FunctionKind::FfiTrampoline
            )
    }

    // ── parameters ─────────────────────────────────────────────────

    pub fn num_fixed_parameters(&self) -> usize {
        self.num_fixed_parameters as usize
    }

    pub fn set_num_fixed_parameters(&mut self, n: usize) {
        assert!(n <= u16::MAX as usize, "too many fixed parameters: {n}");
        self.num_fixed_parameters = n as u16;
    }

    pub fn num_optional_parameters(&self) -> usize {
        self.num_optional_parameters as usize
    }

    pub fn set_num_optional_parameters(&mut self, n: usize, are_positional: bool) {
        assert!(n <= u16::MAX as usize, "too many optional parameters: {n}");
        self.num_optional_parameters = n as u16;
        self.has_named_parameters = n > 0 && !are_positional;
    }

    pub fn has_optional_named_parameters(&self) -> bool {
        self.has_named_parameters
    }

    pub fn has_optional_positional_parameters(&self) -> bool {
        self.num_optional_parameters > 0 && !self.has_named_parameters
    }

    pub fn num_optional_positional_parameters(&self) -> usize {
        if self.has_named_parameters {
            0
        } else {
            self.num_optional_parameters()
        }
    }

    pub fn num_optional_named_parameters(&self) -> usize {
        if self.has_named_parameters {
            self.num_optional_parameters()
        } else {
            0
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.num_fixed_parameters() + self.num_optional_parameters()
    }

    /// Receiver, closure or nothing.
    pub fn num_implicit_parameters(&self) -> usize {
        match self.kind {
            FunctionKind::Signature => 0,
            FunctionKind::ClosureFunction | FunctionKind::ImplicitClosureFunction => 1,
            FunctionKind::Constructor => 1,
            _ if self.is_static() => 0,
            _ => 1,
        }
    }

    // ── kind specific data ─────────────────────────────────────────

    /// Enclosing function of closures and nested signatures.
    pub fn parent_function(&self) -> Option<ObjectId> {
        match self.data {
            FunctionData::Closure { parent, .. } => Some(parent),
            FunctionData::Signature { parent } => parent,
            _ => None,
        }
    }

    pub fn redirection_target(&self) -> Option<ObjectId> {
        match self.data {
            FunctionData::Redirection { target } => Some(target),
            _ => None,
        }
    }

    pub fn native_name(&self) -> Option<ObjectId> {
        match self.data {
            FunctionData::Native { name } => Some(name),
            _ => None,
        }
    }

    pub fn accessor_field(&self) -> Option<ObjectId> {
        match self.data {
            FunctionData::FieldAccessor { field } => Some(field),
            _ => None,
        }
    }

    pub fn forwarding_target(&self) -> Option<ObjectId> {
        match self.data {
            FunctionData::Forwarder { target } => Some(target),
            _ => None,
        }
    }

    pub fn extracted_method(&self) -> Option<ObjectId> {
        match self.data {
            FunctionData::MethodExtractor { method } => Some(method),
            _ => None,
        }
    }

    pub fn saved_arguments_descriptor(&self) -> Option<ObjectId> {
        match self.data {
            FunctionData::Dispatcher {
                arguments_descriptor,
            } => Some(arguments_descriptor),
            _ => None,
        }
    }

    pub fn implicit_closure_function(&self) -> Option<ObjectId> {
        self.implicit_closure_function
    }

    // ── code ───────────────────────────────────────────────────────

    pub fn code_state(&self) -> CodeState {
        self.code
    }

    pub fn current_code(&self) -> Option<ObjectId> {
        match self.code {
            CodeState::Compiled { current, .. } => Some(current),
            _ => None,
        }
    }

    pub fn unoptimized_code(&self) -> Option<ObjectId> {
        match self.code {
            CodeState::Compiled { unoptimized, .. } => unoptimized,
            _ => None,
        }
    }

    pub fn bytecode(&self) -> Option<ObjectId> {
        match self.code {
            CodeState::Interpreted { bytecode } => Some(bytecode),
            _ => None,
        }
    }

    pub fn has_code(&self) -> bool {
        matches!(self.code, CodeState::Compiled { .. })
    }

    pub fn has_optimized_code(&self) -> bool {
        matches!(
            self.code,
            CodeState::Compiled { current, unoptimized } if unoptimized != Some(current)
        )
    }

    // ── feedback ───────────────────────────────────────────────────

    /// Publishes a fully built array with a single store, readers never see
    /// a partially filled one.
    pub fn set_ic_data_array(&self, array: Arc<[ObjectId]>) {
        *self.ic_data_array.write() = Some(array);
    }

    pub fn ic_data_array(&self) -> Option<Arc<[ObjectId]>> {
        self.ic_data_array.read().clone()
    }

    pub fn clear_ic_data_array(&self) {
        *self.ic_data_array.write() = None;
    }

    /// Racy by intent, lost increments are acceptable for a profile counter.
    pub fn increment_usage_counter(&self) -> u32 {
        let count = self.usage_counter.load(Ordering::Relaxed).saturating_add(1);
        self.usage_counter.store(count, Ordering::Relaxed);
        count
    }

    pub fn usage_counter(&self) -> u32 {
        self.usage_counter.load(Ordering::Relaxed)
    }

    pub fn set_usage_counter(&self, value: u32) {
        self.usage_counter.store(value, Ordering::Relaxed);
    }

    pub fn deoptimization_counter(&self) -> u16 {
        self.deoptimization_counter
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

impl Visitable for Function {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_id(self.name);
        visitor.visit_id(self.result_type);
        visitor.visit_ids(&self.parameter_types);
        visitor.visit_ids(&self.parameter_names);
        visitor.visit_opt(self.type_parameters);
        match &self.data {
            FunctionData::None => (),
            FunctionData::Closure {
                parent,
                signature_type,
            } => {
                visitor.visit_id(*parent);
                visitor.visit_opt(*signature_type);
            }
            FunctionData::Signature { parent } => visitor.visit_opt(*parent),
            FunctionData::Redirection { target } | FunctionData::Forwarder { target } => {
                visitor.visit_id(*target)
            }
            FunctionData::Regexp { regexp, .. } => visitor.visit(*regexp),
            FunctionData::Native { name } => visitor.visit_id(*name),
            FunctionData::FfiTrampoline {
                c_signature,
                callback_target,
            } => {
                visitor.visit_id(*c_signature);
                visitor.visit_opt(*callback_target);
            }
            FunctionData::Dispatcher {
                arguments_descriptor,
            } => visitor.visit_id(*arguments_descriptor),
            FunctionData::FieldAccessor { field } => visitor.visit_id(*field),
            FunctionData::MethodExtractor { method } => visitor.visit_id(*method),
        }
        match self.code {
            CodeState::LazyCompile => (),
            CodeState::Compiled {
                current,
                unoptimized,
            } => {
                visitor.visit_id(current);
                visitor.visit_opt(unoptimized);
            }
            CodeState::Interpreted { bytecode } => visitor.visit_id(bytecode),
        }
        visitor.visit_opt(self.implicit_closure_function);
        if let Some(array) = self.ic_data_array.read().as_ref() {
            visitor.visit_ids(array.iter());
        }
    }
}

impl Isolate {
    /// Allocates a function named `name` in old space.
    pub fn new_function(
        &self,
        name: &str,
        kind: FunctionKind,
        owner: ClassId,
        result_type: ObjectId,
    ) -> ObjectResult<ObjectId> {
        let name = self.symbol(name)?;
        self.allocate(Function::new(name, kind, owner, result_type), Space::Old)
    }

    pub fn is_generic_function(&self, fun: ObjectId) -> bool {
        self.num_type_parameters_of_function(fun) > 0
    }

    pub fn num_type_parameters_of_function(&self, fun: ObjectId) -> usize {
        let type_params = self.heap().read::<Function, _>(fun, |f| f.type_parameters);
        self.type_arguments_len(type_params)
    }

    pub fn parent_function(&self, fun: ObjectId) -> Option<ObjectId> {
        self.heap().read::<Function, _>(fun, Function::parent_function)
    }

    pub fn has_generic_parent(&self, fun: ObjectId) -> bool {
        let mut parent = self.parent_function(fun);
        while let Some(current) = parent {
            if self.is_generic_function(current) {
                return true;
            }
            parent = self.parent_function(current);
        }
        false
    }

    /// Type parameters of all enclosing generic functions.
    pub fn num_parent_type_parameters(&self, fun: ObjectId) -> usize {
        let mut count = 0;
        let mut parent = self.parent_function(fun);
        while let Some(current) = parent {
            count += self.num_type_parameters_of_function(current);
            parent = self.parent_function(current);
        }
        count
    }

    /// Checks a call shape against the parameters of `fun`. The error is
    /// the user-visible reason for a no-such-method failure.
    pub fn check_arguments(
        &self,
        fun: ObjectId,
        descriptor: &ArgumentsDescriptor,
    ) -> Result<(), String> {
        let num_type_params = self.num_type_parameters_of_function(fun);
        if descriptor.type_args_len > 0 && descriptor.type_args_len != num_type_params {
            return Err(format!(
                "{} type arguments passed, but {num_type_params} expected",
                descriptor.type_args_len
            ));
        }
        let (num_fixed, num_positional_optional, named, names, implicit) =
            self.heap().read::<Function, _>(fun, |f| {
                (
                    f.num_fixed_parameters(),
                    f.num_optional_positional_parameters(),
                    f.has_optional_named_parameters(),
                    f.parameter_names.clone(),
                    f.num_implicit_parameters(),
                )
            });
        let num_positional = descriptor.positional_count();
        if descriptor.named_count() > 0 && !named {
            return Err(format!(
                "{} named arguments passed, but none expected",
                descriptor.named_count()
            ));
        }
        if num_positional < num_fixed {
            return Err(format!(
                "{} positional arguments passed, but {} required",
                num_positional.saturating_sub(implicit),
                num_fixed - implicit
            ));
        }
        let max_positional = num_fixed + num_positional_optional;
        if num_positional > max_positional {
            return Err(format!(
                "{} positional arguments passed, but at most {} expected",
                num_positional.saturating_sub(implicit),
                max_positional - implicit
            ));
        }
        for &(name, _) in &descriptor.named {
            if !names[num_fixed..].contains(&name) {
                return Err(format!(
                    "no named parameter with name '{}' found",
                    self.heap().string_value(name)
                ));
            }
        }
        Ok(())
    }

    // ── closures ───────────────────────────────────────────────────

    /// Tear-off closure function of a method, created once.
    pub fn implicit_closure_function(&self, fun: ObjectId) -> ObjectResult<ObjectId> {
        let heap = self.heap();
        if let Some(existing) = heap.read::<Function, _>(fun, |f| f.implicit_closure_function) {
            return Ok(existing);
        }
        let _guard = self.closure_function_mutex().lock();
        if let Some(existing) = heap.read::<Function, _>(fun, |f| f.implicit_closure_function) {
            return Ok(existing);
        }
        let closure = heap.read::<Function, _>(fun, |f| {
            debug_assert!(!f.kind.is_closure(), "closures have no tear-off");
            let implicit = f.num_implicit_parameters();
            let mut closure =
                Function::new(f.name, FunctionKind::ImplicitClosureFunction, f.owner, f.result_type);
            closure.flags = f.flags & !FunctionFlags::ABSTRACT;
            closure.token_pos = f.token_pos;
            closure.type_parameters = f.type_parameters;
            closure.data = FunctionData::Closure {
                parent: fun,
                signature_type: None,
            };
            // the closure object replaces the receiver
            closure.parameter_types = std::iter::once(self.dynamic_type())
                .chain(f.parameter_types[implicit..].iter().copied())
                .collect();
            closure.parameter_names = std::iter::once(ObjectId::NULL)
                .chain(f.parameter_names[implicit..].iter().copied())
                .collect();
            closure.set_num_fixed_parameters(f.num_fixed_parameters() - implicit + 1);
            closure.set_num_optional_parameters(
                f.num_optional_parameters(),
                !f.has_optional_named_parameters(),
            );
            closure
        });
        let closure = self.allocate(closure, Space::Old)?;
        heap.write::<Function, _>(fun, |f| f.implicit_closure_function = Some(closure));
        log::trace!("created implicit closure {closure} for {fun}");
        Ok(closure)
    }

    /// Canonical function type of a function, implicit parameters dropped.
    pub fn function_signature_type(&self, fun: ObjectId) -> ObjectResult<ObjectId> {
        let heap = self.heap();
        if let FunctionData::Closure {
            signature_type: Some(ty),
            ..
        } = heap.read::<Function, _>(fun, |f| f.data.clone())
        {
            return Ok(ty);
        }
        let signature = heap.read::<Function, _>(fun, |f| {
            let implicit = f.num_implicit_parameters();
            let mut signature = Function::new_signature(f.owner, f.parent_function(), f.result_type);
            signature.type_parameters = f.type_parameters;
            signature.parameter_types = f.parameter_types[implicit..].to_vec();
            signature.parameter_names = f.parameter_names[implicit..].to_vec();
            signature.set_num_fixed_parameters(f.num_fixed_parameters() - implicit);
            signature.set_num_optional_parameters(
                f.num_optional_parameters(),
                !f.has_optional_named_parameters(),
            );
            signature
        });
        let signature = self.allocate(signature, Space::Old)?;
        let mut ty = Type::function(signature, Nullability::Legacy);
        ty.state = TypeState::Allocated;
        let ty = self.allocate(ty, Space::Old)?;
        self.mark_type_finalized(ty);
        let ty = self.canonicalize_type(ty)?;
        heap.write::<Function, _>(fun, |f| {
            if let FunctionData::Closure { signature_type, .. } = &mut f.data {
                *signature_type = Some(ty);
            }
        });
        Ok(ty)
    }

    // ── code state ─────────────────────────────────────────────────

    /// Installs unoptimized code, replacing bytecode or the lazy stub.
    pub fn attach_code(&self, fun: ObjectId, code: ObjectId) {
        self.set_code_owner(code, fun);
        self.heap().write::<Function, _>(fun, |f| {
            debug_assert!(!f.has_code(), "{fun} already has code");
            f.code = CodeState::Compiled {
                current: code,
                unoptimized: Some(code),
            };
        });
    }

    /// Installs optimized code. The active optimized code, if any, is
    /// disabled first.
    pub fn install_optimized_code(&self, fun: ObjectId, code: ObjectId) -> ObjectResult<()> {
        let state = self.heap().read::<Function, _>(fun, |f| f.code);
        let CodeState::Compiled {
            current,
            unoptimized,
        } = state
        else {
            return Err(ObjectError::api(format!(
                "{fun} has no unoptimized code to fall back to"
            )));
        };
        if unoptimized != Some(current) {
            self.disable_code(current);
        }
        self.set_code_owner(code, fun);
        self.heap().write::<Function, _>(fun, |f| {
            f.code = CodeState::Compiled {
                current: code,
                unoptimized,
            }
        });
        log::debug!("installed optimized code {code} for {}", self.function_name(fun));
        Ok(())
    }

    /// Deoptimization, falls back to the unoptimized code or the lazy stub.
    pub fn switch_to_unoptimized_code(&self, fun: ObjectId) {
        let state = self.heap().read::<Function, _>(fun, |f| f.code);
        if let CodeState::Compiled {
            current,
            unoptimized,
        } = state
            && unoptimized != Some(current)
        {
            self.disable_code(current);
            self.heap().write::<Function, _>(fun, |f| {
                f.code = match unoptimized {
                    Some(code) => CodeState::Compiled {
                        current: code,
                        unoptimized,
                    },
                    None => CodeState::LazyCompile,
                };
                f.deoptimization_counter = f.deoptimization_counter.saturating_add(1);
            });
        }
    }

    pub fn attach_bytecode(&self, fun: ObjectId, bytecode: ObjectId) {
        self.heap().write::<Function, _>(fun, |f| {
            debug_assert_eq!(f.code, CodeState::LazyCompile, "bytecode replaces the lazy stub only");
            f.code = CodeState::Interpreted { bytecode };
        });
    }

    /// Back to the lazy compile stub, all code is disabled.
    pub fn clear_code(&self, fun: ObjectId) {
        let state = self.heap().read::<Function, _>(fun, |f| f.code);
        if let CodeState::Compiled {
            current,
            unoptimized,
        } = state
        {
            self.disable_code(current);
            if let Some(unoptimized) = unoptimized {
                self.disable_code(unoptimized);
            }
        }
        self.heap().write::<Function, _>(fun, |f| f.code = CodeState::LazyCompile);
    }

    // ── names ──────────────────────────────────────────────────────

    pub fn function_name(&self, fun: ObjectId) -> String {
        let name = self.heap().read::<Function, _>(fun, |f| f.name);
        self.heap().string_value(name)
    }

    /// Scrubbed name, closures are `<anonymous closure>` unless they are
    /// tear-offs.
    pub fn function_user_visible_name(&self, fun: ObjectId) -> String {
        let (kind, name) = self.heap().read::<Function, _>(fun, |f| (f.kind, f.name));
        match kind {
            FunctionKind::ClosureFunction => "<anonymous closure>".into(),
            FunctionKind::Signature => "<signature>".into(),
            _ => scrub_name(&self.heap().string_value(name)).into_owned(),
        }
    }

    /// `Class.method`, closures qualified by their parent chain.
    pub fn function_qualified_name(&self, fun: ObjectId) -> String {
        let (owner, parent, is_static) =
            self.heap()
                .read::<Function, _>(fun, |f| (f.owner, f.parent_function(), f.is_static()));
        let name = self.function_user_visible_name(fun);
        if let Some(parent) = parent {
            return format!("{}.{name}", self.function_qualified_name(parent));
        }
        let owner_name = self.class_name(owner);
        if owner_name.is_empty() || (is_static && self.is_top_level_class(owner)) {
            name
        } else {
            format!("{owner_name}.{name}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn method(isolate: &Isolate, fixed: usize, optional: usize, named: bool) -> ObjectId {
        let dynamic = isolate.dynamic_type();
        let count = fixed + optional;
        let names = (0..count)
            .map(|i| isolate.symbol(&format!("p{i}")).unwrap())
            .collect();
        let fun = Function::new(
            isolate.symbol("m").unwrap(),
            FunctionKind::Regular,
            ClassId::OBJECT,
            dynamic,
        )
        .with_parameters(vec![dynamic; count], names, optional, named);
        isolate.allocate(fun, Space::Old).unwrap()
    }

    #[test]
    fn parameter_counts() {
        let isolate = test_isolate();
        let fun = method(&isolate, 2, 2, true);
        isolate.heap().read::<Function, _>(fun, |f| {
            assert_eq!(f.num_fixed_parameters(), 2);
            assert_eq!(f.num_optional_named_parameters(), 2);
            assert_eq!(f.num_optional_positional_parameters(), 0);
            assert_eq!(f.num_parameters(), 4);
            assert_eq!(f.num_implicit_parameters(), 1, "instance method takes a receiver");
            assert!(f.is_dynamic_function());
        });
    }

    #[test]
    fn argument_shapes_are_checked() {
        let isolate = test_isolate();
        let positional = method(&isolate, 2, 1, false);
        assert!(isolate.check_arguments(positional, &ArgumentsDescriptor::positional(0, 2)).is_ok());
        assert!(isolate.check_arguments(positional, &ArgumentsDescriptor::positional(0, 3)).is_ok());
        let too_few = isolate
            .check_arguments(positional, &ArgumentsDescriptor::positional(0, 1))
            .unwrap_err();
        assert_eq!(too_few, "0 positional arguments passed, but 1 required");
        assert!(isolate.check_arguments(positional, &ArgumentsDescriptor::positional(0, 4)).is_err());
        assert!(isolate.check_arguments(positional, &ArgumentsDescriptor::positional(2, 2)).is_err());

        let named = method(&isolate, 1, 1, true);
        let known = isolate.symbol("p1").unwrap();
        let unknown = isolate.symbol("nope").unwrap();
        assert!(isolate.check_arguments(named, &ArgumentsDescriptor::new(0, 2, &[known])).is_ok());
        let error = isolate
            .check_arguments(named, &ArgumentsDescriptor::new(0, 2, &[unknown]))
            .unwrap_err();
        assert!(error.contains("'nope'"), "{error}");
    }

    #[test]
    fn code_state_machine() {
        let isolate = test_isolate();
        let fun = method(&isolate, 1, 0, false);
        let unoptimized = isolate.new_code(&[0x90; 4], false).unwrap();
        let first = isolate.new_code(&[0x90; 4], true).unwrap();
        let second = isolate.new_code(&[0x90; 4], true).unwrap();

        isolate.attach_code(fun, unoptimized);
        isolate.install_optimized_code(fun, first).unwrap();
        isolate.install_optimized_code(fun, second).unwrap();
        assert!(!isolate.is_code_alive(first), "replaced optimized code is disabled");
        assert!(isolate.is_code_alive(second));
        assert!(isolate.heap().read::<Function, _>(fun, |f| f.has_optimized_code()));

        isolate.switch_to_unoptimized_code(fun);
        assert!(!isolate.is_code_alive(second));
        let state = isolate.heap().read::<Function, _>(fun, |f| f.code_state());
        assert_eq!(
            state,
            CodeState::Compiled {
                current: unoptimized,
                unoptimized: Some(unoptimized)
            }
        );
        isolate.clear_code(fun);
        assert!(!isolate.is_code_alive(unoptimized));
        assert_eq!(
            isolate.heap().read::<Function, _>(fun, |f| f.code_state()),
            CodeState::LazyCompile
        );
    }

    #[test]
    fn optimized_code_needs_a_fallback() {
        let isolate = test_isolate();
        let fun = method(&isolate, 0, 0, false);
        let code = isolate.new_code(&[], true).unwrap();
        assert!(isolate.install_optimized_code(fun, code).is_err());
    }

    #[test]
    fn implicit_closure_is_created_once() {
        let isolate = test_isolate();
        let fun = method(&isolate, 2, 0, false);
        let closure = isolate.implicit_closure_function(fun).unwrap();
        assert_eq!(isolate.implicit_closure_function(fun).unwrap(), closure);
        isolate.heap().read::<Function, _>(closure, |c| {
            assert_eq!(c.kind, FunctionKind::ImplicitClosureFunction);
            assert_eq!(c.parent_function(), Some(fun));
            assert_eq!(c.num_fixed_parameters(), 2, "receiver replaced by the closure");
        });
        let ty = isolate.function_signature_type(closure).unwrap();
        assert_eq!(isolate.type_name(ty), "dynamic Function(dynamic)");
        assert_eq!(isolate.function_signature_type(closure).unwrap(), ty);
    }

    #[test]
    fn ic_data_array_is_published_whole() {
        let isolate = test_isolate();
        let fun = method(&isolate, 0, 0, false);
        let array: Arc<[ObjectId]> = Arc::from(vec![ObjectId(3), ObjectId(4)]);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                isolate
                    .heap()
                    .read::<Function, _>(fun, |f| f.set_ic_data_array(array.clone()))
            });
        });
        let seen = isolate.heap().read::<Function, _>(fun, Function::ic_data_array);
        assert_eq!(seen.as_deref(), Some(&[ObjectId(3), ObjectId(4)][..]));
    }

    #[test]
    fn generic_parents_are_counted() {
        let isolate = test_isolate();
        let (outer, _) = generic_function(&isolate, "outer");
        let dynamic = isolate.dynamic_type();
        let mut inner = Function::new(
            isolate.symbol("inner").unwrap(),
            FunctionKind::ClosureFunction,
            ClassId::OBJECT,
            dynamic,
        );
        inner.data = FunctionData::Closure {
            parent: outer,
            signature_type: None,
        };
        let inner = isolate.allocate(inner, Space::Old).unwrap();
        assert!(isolate.is_generic_function(outer));
        assert!(!isolate.is_generic_function(inner));
        assert!(isolate.has_generic_parent(inner));
        assert_eq!(isolate.num_parent_type_parameters(inner), 1);
        assert_eq!(isolate.function_user_visible_name(inner), "<anonymous closure>");
    }
}

use crate::{
    ALL_FREE, AbstractTypeKind, ClassId, Function, Genericity, InstantiationEntry, Isolate,
    Nullability, ObjectId, ObjectResult, Space, Trail, Type, TypeArguments, TypeParameter,
    TypeRef, TypeState,
};

/// A type argument vector, `None` being the all-dynamic null vector.
pub type TypeVector = Option<ObjectId>;

// Instantiation results:
// `Ok(None)` is a failed instantiation, which only happens on paths that are
// dynamically dead but were reached by an optimizing compiler. It must be
// propagated to the caller, never replaced by dynamic.

impl Isolate {
    /// Substitutes free type parameters of `ty`.
    ///
    /// Class type parameters index `instantiator`, function type parameters
    /// with an index below `num_free_fun_type_params` index `function`, other
    /// function type parameters are left alone. A fully instantiated type is
    /// returned as is.
    pub fn instantiate_type_from(
        &self,
        ty: ObjectId,
        instantiator: TypeVector,
        function: TypeVector,
        num_free_fun_type_params: usize,
        trail: &mut Trail,
        space: Space,
    ) -> ObjectResult<Option<ObjectId>> {
        if self.is_type_instantiated(ty, Genericity::Any, num_free_fun_type_params, &mut Trail::new())
        {
            return Ok(Some(ty));
        }
        match self.abstract_type_kind(ty) {
            AbstractTypeKind::TypeParameter => self.instantiate_type_parameter(
                ty,
                instantiator,
                function,
                num_free_fun_type_params,
                space,
            ),
            AbstractTypeKind::TypeRef => self.instantiate_type_ref(
                ty,
                instantiator,
                function,
                num_free_fun_type_params,
                trail,
                space,
            ),
            AbstractTypeKind::Type => self.instantiate_class_type(
                ty,
                instantiator,
                function,
                num_free_fun_type_params,
                trail,
                space,
            ),
        }
    }

    pub fn instantiate_type(
        &self,
        ty: ObjectId,
        instantiator: TypeVector,
        function: TypeVector,
    ) -> ObjectResult<Option<ObjectId>> {
        self.instantiate_type_from(ty, instantiator, function, ALL_FREE, &mut Trail::new(), Space::Old)
    }

    fn instantiate_type_parameter(
        &self,
        param: ObjectId,
        instantiator: TypeVector,
        function: TypeVector,
        num_free_fun_type_params: usize,
        space: Space,
    ) -> ObjectResult<Option<ObjectId>> {
        let (is_function, index, nullability) = self.heap().read::<TypeParameter, _>(param, |p| {
            (p.is_function_type_parameter(), p.index as usize, p.nullability)
        });
        let (vector, kind) = if is_function {
            if index >= num_free_fun_type_params {
                return Ok(Some(param));
            }
            (function, "function")
        } else {
            (instantiator, "instantiator")
        };
        let Some(vector) = vector else {
            return Ok(Some(self.dynamic_type()));
        };
        if index >= self.type_arguments_len(Some(vector)) {
            log::warn!(
                "type parameter {param} index {index} is out of range of {kind} vector {vector}"
            );
            return Ok(None);
        }
        let result = self.type_at(vector, index);
        self.with_instantiated_nullability(result, nullability, space)
            .map(Some)
    }

    // a nullable parameter makes its argument nullable
    fn with_instantiated_nullability(
        &self,
        ty: ObjectId,
        param_nullability: Nullability,
        space: Space,
    ) -> ObjectResult<ObjectId> {
        if param_nullability != Nullability::Nullable
            || self.is_type_ref(ty)
            || self.is_top_type_for_subtyping(ty)
            || self.is_null_type(ty)
            || self.type_nullability(ty) == Nullability::Nullable
        {
            return Ok(ty);
        }
        self.type_with_nullability(ty, Nullability::Nullable, space)
    }

    fn instantiate_type_ref(
        &self,
        type_ref: ObjectId,
        instantiator: TypeVector,
        function: TypeVector,
        num_free_fun_type_params: usize,
        trail: &mut Trail,
        space: Space,
    ) -> ObjectResult<Option<ObjectId>> {
        if let Some(in_progress) = trail.only_buddy(type_ref) {
            return Ok(Some(in_progress));
        }
        let instantiated_ref = self.new_type_ref(None)?;
        trail.add_only_buddy(type_ref, instantiated_ref);
        let target = self.heap().read::<TypeRef, _>(type_ref, |r| r.target);
        let Some(target) = target else {
            panic!("instantiating unresolved type ref {type_ref}");
        };
        let Some(instantiated) = self.instantiate_type_from(
            target,
            instantiator,
            function,
            num_free_fun_type_params,
            trail,
            space,
        )?
        else {
            return Ok(None);
        };
        self.set_type_ref_target(instantiated_ref, self.deref_type(instantiated));
        Ok(Some(instantiated_ref))
    }

    fn instantiate_class_type(
        &self,
        ty: ObjectId,
        instantiator: TypeVector,
        function: TypeVector,
        num_free_fun_type_params: usize,
        trail: &mut Trail,
        space: Space,
    ) -> ObjectResult<Option<ObjectId>> {
        let original = self.heap().read::<Type, _>(ty, Type::clone);
        debug_assert!(original.state >= TypeState::BeingFinalized, "{ty} is not finalized");

        let mut arguments = original.arguments;
        if let Some(args) = original.arguments {
            let args_instantiated = self.type_arguments_is_instantiated(
                Some(args),
                Genericity::Any,
                num_free_fun_type_params,
                &mut Trail::new(),
            );
            // arguments of a function type only document a generic typedef
            if original.signature.is_none() || !args_instantiated {
                match self.instantiate_type_arguments_from(
                    args,
                    instantiator,
                    function,
                    num_free_fun_type_params,
                    trail,
                    space,
                )? {
                    Some(instantiated) => arguments = instantiated,
                    None => return Ok(None),
                }
            }
        }

        let mut signature = original.signature;
        if let Some(sig) = original.signature
            && original.is_finalized()
            && !self.has_instantiated_signature(
                sig,
                Genericity::Any,
                num_free_fun_type_params,
                &mut Trail::new(),
            )
        {
            match self.instantiate_signature_from(
                sig,
                instantiator,
                function,
                num_free_fun_type_params,
                trail,
                space,
            )? {
                Some(instantiated) => signature = Some(instantiated),
                None => return Ok(None),
            }
        }

        let mut instantiated = Type::new(original.class_id, arguments, original.nullability);
        instantiated.signature = signature;
        instantiated.token_pos = original.token_pos;
        instantiated.state = if original.is_finalized() {
            original.state
        } else {
            TypeState::BeingFinalized
        };
        let id = self.allocate(instantiated, space)?;
        if original.is_finalized() {
            self.mark_type_finalized(id);
        }
        self.normalize_future_or(id, space).map(Some)
    }

    /// Sets the finalized state matching the type's instantiation status.
    pub fn mark_type_finalized(&self, ty: ObjectId) {
        self.heap().write::<Type, _>(ty, |ty| ty.state = TypeState::BeingFinalized);
        let state = if self.is_type_instantiated(ty, Genericity::Any, ALL_FREE, &mut Trail::new()) {
            TypeState::FinalizedInstantiated
        } else {
            TypeState::FinalizedUninstantiated
        };
        self.heap().write::<Type, _>(ty, |ty| ty.state = state);
    }

    /// Instantiates every uninstantiated entry of `args`. The null vector
    /// result is only produced by the identity short cut.
    pub fn instantiate_type_arguments_from(
        &self,
        args: ObjectId,
        instantiator: TypeVector,
        function: TypeVector,
        num_free_fun_type_params: usize,
        trail: &mut Trail,
        space: Space,
    ) -> ObjectResult<Option<TypeVector>> {
        let types = self.type_arguments_types(args);
        let instantiator_len = self.type_arguments_len(instantiator);
        if (instantiator.is_none() || instantiator_len == types.len())
            && self.is_uninstantiated_identity(args)
        {
            return Ok(Some(instantiator));
        }
        let mut instantiated = Vec::with_capacity(types.len());
        for ty in types {
            let is_instantiated = self.is_type_instantiated(
                ty,
                Genericity::Any,
                num_free_fun_type_params,
                &mut Trail::new(),
            );
            if is_instantiated {
                instantiated.push(ty);
                continue;
            }
            match self.instantiate_type_from(
                ty,
                instantiator,
                function,
                num_free_fun_type_params,
                trail,
                space,
            )? {
                Some(ty) => instantiated.push(ty),
                None => return Ok(None),
            }
        }
        self.new_type_arguments(instantiated, space).map(|id| Some(Some(id)))
    }

    /// Instantiates and canonicalizes `args`, memoized in the vector's
    /// instantiation cache. Failed instantiations are not cached.
    pub fn instantiate_and_canonicalize_from(
        &self,
        args: ObjectId,
        instantiator: TypeVector,
        function: TypeVector,
    ) -> ObjectResult<Option<TypeVector>> {
        debug_assert!(instantiator.is_none_or(|id| self.heap().is_canonical(id)));
        debug_assert!(function.is_none_or(|id| self.heap().is_canonical(id)));
        let cached = self
            .heap()
            .read::<TypeArguments, _>(args, |a| a.lookup_instantiation(instantiator, function));
        if let Some(result) = cached {
            return Ok(Some(result));
        }
        let Some(result) = self.instantiate_type_arguments_from(
            args,
            instantiator,
            function,
            ALL_FREE,
            &mut Trail::new(),
            Space::Old,
        )?
        else {
            return Ok(None);
        };
        let result = self.canonicalize_type_arguments(result)?;
        self.heap().read::<TypeArguments, _>(args, |a| {
            a.add_instantiation(InstantiationEntry {
                instantiator,
                function,
                result,
            })
        });
        Ok(Some(result))
    }

    /// Copy of signature function `sig` with its free type parameters
    /// substituted. Own type parameters of a generic signature stay free.
    pub fn instantiate_signature_from(
        &self,
        sig: ObjectId,
        instantiator: TypeVector,
        function: TypeVector,
        mut num_free_fun_type_params: usize,
        trail: &mut Trail,
        space: Space,
    ) -> ObjectResult<Option<ObjectId>> {
        if self.is_generic_function(sig) || self.has_generic_parent(sig) {
            num_free_fun_type_params =
                num_free_fun_type_params.min(self.num_parent_type_parameters(sig));
        }
        let original = self.heap().read::<Function, _>(sig, |fun| {
            (
                fun.owner,
                fun.parent_function(),
                fun.type_parameters,
                fun.result_type,
                fun.parameter_types.clone(),
                fun.parameter_names.clone(),
                fun.num_fixed_parameters(),
                fun.num_optional_parameters(),
                fun.has_optional_named_parameters(),
            )
        });
        let (owner, parent, type_params, result_type, params, names, num_fixed, num_optional, named) =
            original;

        let instantiate = |ty: ObjectId, trail: &mut Trail| -> ObjectResult<Option<ObjectId>> {
            if self.is_type_instantiated(ty, Genericity::Any, num_free_fun_type_params, &mut Trail::new())
            {
                return Ok(Some(ty));
            }
            self.instantiate_type_from(
                ty,
                instantiator,
                function,
                num_free_fun_type_params,
                trail,
                space,
            )
        };

        let mut instantiated = Function::new_signature(owner, parent, result_type);
        let instantiated_result = match instantiate(result_type, trail)? {
            Some(ty) => ty,
            None => return Ok(None),
        };
        let mut instantiated_params = Vec::with_capacity(params.len());
        for param in params {
            match instantiate(param, trail)? {
                Some(ty) => instantiated_params.push(ty),
                None => return Ok(None),
            }
        }
        instantiated.result_type = instantiated_result;
        instantiated.parameter_types = instantiated_params;
        instantiated.parameter_names = names;
        instantiated.set_num_fixed_parameters(num_fixed);
        instantiated.set_num_optional_parameters(num_optional, !named);
        let new_sig = self.allocate(instantiated, space)?;

        // bounds of the own type parameters may refer to outer parameters
        if let Some(type_params) = type_params {
            let mut copies = Vec::new();
            let mut changed = false;
            for param in self.type_arguments_types(type_params) {
                let mut copy = self.heap().read::<TypeParameter, _>(param, TypeParameter::clone);
                if !self.is_type_instantiated(
                    copy.bound,
                    Genericity::Any,
                    num_free_fun_type_params,
                    &mut Trail::new(),
                ) {
                    let Some(bound) = instantiate(copy.bound, trail)? else {
                        return Ok(None);
                    };
                    copy.bound = bound;
                    copy.parameterized_function = Some(new_sig);
                    copy.state = TypeState::FinalizedUninstantiated;
                    copies.push(self.new_type_parameter(copy)?);
                    changed = true;
                } else {
                    copies.push(param);
                }
            }
            let vector = if changed {
                self.new_type_arguments(copies, space)?
            } else {
                type_params
            };
            self.heap()
                .write::<Function, _>(new_sig, |fun| fun.type_parameters = Some(vector));
        }
        Ok(Some(new_sig))
    }
}

impl Isolate {
    /// `FutureOr<T>` where `T` is a top type is `T`, `FutureOr<Never>` is
    /// `Future<Never>`.
    pub fn normalize_future_or(&self, ty: ObjectId, space: Space) -> ObjectResult<ObjectId> {
        if !self.is_future_or_type(ty) {
            return Ok(ty);
        }
        let argument = self.deref_type(self.future_or_type_argument(ty));
        if self.is_top_type_for_subtyping(argument) {
            return Ok(argument);
        }
        if self.is_never_type(argument) {
            let args = self.new_type_arguments(vec![argument], space)?;
            let nullability = self.type_nullability(ty);
            let future = self.new_type(ClassId::FUTURE, Some(args), nullability, space)?;
            self.mark_type_finalized(future);
            return Ok(future);
        }
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn instantiated_types_are_returned_unchanged() {
        let isolate = test_isolate();
        let int_type = isolate.int_type();
        let result = isolate.instantiate_type(int_type, None, None).unwrap();
        assert_eq!(result, Some(int_type));

        let (class, _) = generic_class(&isolate, "Holder");
        let holder_of_int = class_type(&isolate, class, &[int_type]);
        assert_eq!(
            isolate.instantiate_type(holder_of_int, None, None).unwrap(),
            Some(holder_of_int)
        );
    }

    #[test]
    fn class_parameters_index_the_instantiator() {
        let isolate = test_isolate();
        let (class, param) = generic_class(&isolate, "Holder");
        let string_args = isolate
            .new_type_arguments(vec![isolate.string_type()], Space::Old)
            .unwrap();
        let result = isolate.instantiate_type(param, Some(string_args), None).unwrap();
        assert_eq!(result, Some(isolate.string_type()));

        let holder_of_t = isolate.declaration_type_of(class);
        let result = isolate
            .instantiate_type(holder_of_t, Some(string_args), None)
            .unwrap()
            .unwrap();
        assert_eq!(isolate.type_name(result), "Holder<String>");
        assert!(isolate.is_instantiated(result));
    }

    #[test]
    fn null_instantiator_yields_dynamic() {
        let isolate = test_isolate();
        let (_, param) = generic_class(&isolate, "Holder");
        let result = isolate.instantiate_type(param, None, None).unwrap();
        assert_eq!(result, Some(isolate.dynamic_type()));
    }

    #[test]
    fn out_of_range_parameter_fails_instead_of_guessing() {
        let isolate = test_isolate();
        let (class, _) = generic_class(&isolate, "Holder");
        let second = isolate
            .new_type_parameter(TypeParameter {
                state: TypeState::FinalizedUninstantiated,
                ..TypeParameter::for_class(class, 3, isolate.symbol("U").unwrap(), isolate.object_type())
            })
            .unwrap();
        let short = isolate
            .new_type_arguments(vec![isolate.int_type()], Space::Old)
            .unwrap();
        assert_eq!(isolate.instantiate_type(second, Some(short), None).unwrap(), None);

        let list = isolate.new_type_arguments(vec![second], Space::Old).unwrap();
        let result = isolate
            .instantiate_type_arguments_from(list, Some(short), None, ALL_FREE, &mut Trail::new(), Space::Old)
            .unwrap();
        assert_eq!(result, None, "failure propagates out of vectors");
    }

    #[test]
    fn identity_vector_short_cut_returns_the_instantiator() {
        let isolate = test_isolate();
        let (_, param) = generic_class(&isolate, "Holder");
        let identity = isolate.new_type_arguments(vec![param], Space::Old).unwrap();
        let args = isolate
            .new_type_arguments(vec![isolate.int_type()], Space::Old)
            .unwrap();
        let result = isolate
            .instantiate_type_arguments_from(identity, Some(args), None, ALL_FREE, &mut Trail::new(), Space::Old)
            .unwrap();
        assert_eq!(result, Some(Some(args)));
        let result = isolate
            .instantiate_type_arguments_from(identity, None, None, ALL_FREE, &mut Trail::new(), Space::Old)
            .unwrap();
        assert_eq!(result, Some(None));
    }

    #[test]
    fn function_parameters_beyond_free_count_stay() {
        let isolate = test_isolate();
        let (fun, param) = generic_function(&isolate, "pick");
        let args = isolate
            .new_type_arguments(vec![isolate.int_type()], Space::Old)
            .unwrap();
        let kept = isolate
            .instantiate_type_from(param, None, Some(args), 0, &mut Trail::new(), Space::Old)
            .unwrap();
        assert_eq!(kept, Some(param));
        let replaced = isolate
            .instantiate_type_from(param, None, Some(args), 1, &mut Trail::new(), Space::Old)
            .unwrap();
        assert_eq!(replaced, Some(isolate.int_type()));
        assert_eq!(isolate.num_type_parameters_of_function(fun), 1);
    }

    #[test]
    fn recursive_types_instantiate_through_type_refs() {
        let isolate = test_isolate();
        let (class, param) = generic_class(&isolate, "Node");
        // Node<T> with an argument referring back to Node<T>
        let node_of_t = isolate.declaration_type_of(class);
        let back = isolate.new_type_ref(Some(node_of_t)).unwrap();
        let args = isolate.new_type_arguments(vec![param, back], Space::Old).unwrap();
        let int_args = isolate
            .new_type_arguments(vec![isolate.int_type()], Space::Old)
            .unwrap();
        let mut trail = Trail::new();
        let result = isolate
            .instantiate_type_arguments_from(args, Some(int_args), None, ALL_FREE, &mut trail, Space::Old)
            .unwrap()
            .unwrap()
            .unwrap();
        let types = isolate.type_arguments_types(result);
        assert_eq!(types[0], isolate.int_type());
        assert!(isolate.is_type_ref(types[1]));
        assert_eq!(isolate.type_name(isolate.deref_type(types[1])), "Node<int>");
    }

    #[test]
    fn instantiation_cache_is_used() {
        let isolate = test_isolate();
        let (_, param) = generic_class(&isolate, "Holder");
        let list_of_t = list_of(&isolate, param);
        let args = isolate.new_type_arguments(vec![list_of_t], Space::Old).unwrap();
        let args = isolate.canonicalize_type_arguments(Some(args)).unwrap().unwrap();
        let int_args = isolate
            .new_type_arguments(vec![isolate.int_type()], Space::Old)
            .unwrap();
        let int_args = isolate.canonicalize_type_arguments(Some(int_args)).unwrap();

        let first = isolate.instantiate_and_canonicalize_from(args, int_args, None).unwrap();
        let second = isolate.instantiate_and_canonicalize_from(args, int_args, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            isolate.heap().read::<TypeArguments, _>(args, |a| a.num_cached_instantiations()),
            1
        );
    }

    #[test]
    fn future_or_normalization() {
        let isolate = test_isolate();
        let future_or_dynamic = future_or_of(&isolate, isolate.dynamic_type());
        assert_eq!(
            isolate.normalize_future_or(future_or_dynamic, Space::Old).unwrap(),
            isolate.dynamic_type()
        );
        let future_or_never = future_or_of(&isolate, isolate.never_type());
        let normalized = isolate.normalize_future_or(future_or_never, Space::Old).unwrap();
        assert_eq!(isolate.type_name(normalized), "Future<Never>");
        let future_or_int = future_or_of(&isolate, isolate.int_type());
        assert_eq!(
            isolate.normalize_future_or(future_or_int, Space::Old).unwrap(),
            future_or_int
        );
    }
}

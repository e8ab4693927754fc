use crate::{
    ClassId, Function, Isolate, Nullability, ObjectId, Trail, TypeEquality,
    TypeParameter, TypeRef,
};

// Subtyping ignores nullability, every type is treated as legacy.

impl Isolate {
    /// `s <: t` for finalized types.
    pub fn is_subtype_of(&self, s: ObjectId, t: ObjectId) -> bool {
        self.is_subtype_of_with_trail(s, t, &mut Trail::new())
    }

    pub fn is_subtype_of_with_trail(&self, s: ObjectId, t: ObjectId, trail: &mut Trail) -> bool {
        debug_assert!(self.is_type_finalized(s), "subtype test on unfinalized {s}");
        debug_assert!(self.is_type_finalized(t), "subtype test on unfinalized {t}");

        // recursive types are assumed related while their expansion is in flight
        if self.is_type_ref(s) {
            if trail.test_and_add_buddy(s, t) {
                return true;
            }
            return match self.heap().read::<TypeRef, _>(s, |r| r.target) {
                Some(target) => self.is_subtype_of_with_trail(target, t, trail),
                None => false,
            };
        }
        let t = self.deref_type(t);

        if self.is_equivalent(s, t, TypeEquality::InSubtypeTest, &mut Trail::new()) {
            return true;
        }
        if self.is_top_type_for_subtyping(t) {
            return true;
        }
        if self.is_null_type(s) || self.is_never_type(s) {
            return true;
        }
        // dynamic and void are only subtypes of top types
        if self.is_dynamic_type(s) || self.is_void_type(s) {
            return false;
        }

        if self.is_type_parameter(s) {
            return self.type_parameter_is_subtype_of(s, t, trail);
        }
        if self.is_type_parameter(t) {
            // undecidable before instantiation
            return false;
        }

        if self.is_future_or_type(s) {
            // FutureOr<X> <: T iff Future<X> <: T and X <: T
            let argument = self.future_or_type_argument(s);
            return self.class_is_subtype_of(ClassId::FUTURE, self.type_arguments_of(s), t, trail)
                && self.is_subtype_of_with_trail(argument, t, trail);
        }
        if self.is_future_or_type(t) {
            let argument = self.future_or_type_argument(t);
            if self.is_subtype_of_with_trail(s, argument, trail) {
                return true;
            }
        }

        if let Some(s_sig) = self.type_signature(s) {
            if self.is_function_interface_type(t) {
                return true;
            }
            return match self.type_signature(t) {
                Some(t_sig) => self.signature_is_subtype_of(s_sig, t_sig, trail),
                None => {
                    self.is_future_or_type(t) && {
                        let argument = self.future_or_type_argument(t);
                        self.is_function_interface_type(argument)
                    }
                }
            };
        }
        if self.is_function_type(t) {
            return false;
        }

        let s_cid = self.type_class_id(s);
        self.class_is_subtype_of(s_cid, self.type_arguments_of(s), t, trail)
    }

    fn type_parameter_is_subtype_of(&self, s: ObjectId, t: ObjectId, trail: &mut Trail) -> bool {
        let s = self.deref_type(s);
        let (s_bound, s_index, s_is_function) =
            self.heap().read::<TypeParameter, _>(s, |param| {
                (param.bound, param.index, param.is_function_type_parameter())
            });
        if self.is_type_parameter(t) {
            let (t_index, t_is_function) = self.heap().read::<TypeParameter, _>(t, |param| {
                (param.index, param.is_function_type_parameter())
            });
            // same position of two generic signatures being compared
            if s_is_function && t_is_function && s_index == t_index {
                return true;
            }
        }
        // a bound referring back to the parameter must not loop
        if trail.test_and_add_buddy(s, t) {
            return false;
        }
        self.is_subtype_of_with_trail(s_bound, t, trail)
    }

    /// Walks `class_id` with flattened `arguments` up the hierarchy looking
    /// for the class of `other`.
    fn class_is_subtype_of(
        &self,
        class_id: ClassId,
        arguments: Option<ObjectId>,
        other: ObjectId,
        trail: &mut Trail,
    ) -> bool {
        let other_cid = self.type_class_id(other);
        if other_cid == ClassId::OBJECT || other_cid == ClassId::DYNAMIC {
            return true;
        }
        // FutureOr<X> as supertype is reached through Future<X>
        let target_cid = if other_cid == ClassId::FUTURE_OR {
            ClassId::FUTURE
        } else {
            other_cid
        };
        let target_args = self.type_arguments_of(other);

        let mut class_id = class_id;
        let mut arguments = arguments;
        let mut visited = Vec::new();
        loop {
            if class_id == target_cid {
                return self.own_arguments_are_subtypes(class_id, arguments, target_args, trail);
            }
            if visited.contains(&class_id) {
                return false;
            }
            visited.push(class_id);

            for interface in self.interfaces_of(class_id) {
                // implementing Function carries no subtyping meaning
                if self.is_function_interface_type(interface) {
                    continue;
                }
                let interface_cid = self.type_class_id(interface);
                let Some(interface_args) =
                    self.instantiate_supertype_arguments(interface, arguments)
                else {
                    continue;
                };
                if self.class_is_subtype_of(interface_cid, interface_args, other, trail) {
                    return true;
                }
            }

            let Some(super_type) = self.super_type_of(class_id) else {
                return false;
            };
            let Some(super_args) = self.instantiate_supertype_arguments(super_type, arguments)
            else {
                return false;
            };
            class_id = self.type_class_id(super_type);
            arguments = super_args;
        }
    }

    // Arguments of a supertype as seen from a subclass instantiated with
    // `arguments`, canonical and memoized in the supertype vector's
    // instantiation cache. `None` when the instantiation failed.
    fn instantiate_supertype_arguments(
        &self,
        super_type: ObjectId,
        arguments: Option<ObjectId>,
    ) -> Option<Option<ObjectId>> {
        let super_args = self.type_arguments_of(super_type);
        let Some(args) = super_args else {
            return Some(None);
        };
        if self.is_instantiated(super_type) {
            return Some(super_args);
        }
        let instantiated = self
            .canonicalize_type_arguments(arguments)
            .and_then(|instantiator| self.instantiate_and_canonicalize_from(args, instantiator, None));
        match instantiated {
            Ok(result) => result,
            Err(error) => {
                log::warn!("instantiating supertype {super_type} failed: {error}");
                None
            }
        }
    }

    fn own_arguments_are_subtypes(
        &self,
        class_id: ClassId,
        arguments: Option<ObjectId>,
        other_args: Option<ObjectId>,
        trail: &mut Trail,
    ) -> bool {
        let own = self.num_type_parameters(class_id);
        if own == 0 || other_args.is_none() {
            return true;
        }
        let len = self.num_type_arguments(class_id);
        let from = len - own;
        (from..len).all(|i| {
            let s_arg = self.type_at_or_dynamic(arguments, i);
            let t_arg = self.type_at_or_dynamic(other_args, i);
            self.is_subtype_of_with_trail(s_arg, t_arg, trail)
        })
    }

    /// Function type subtyping: covariant result, contravariant parameters.
    pub fn signature_is_subtype_of(&self, s: ObjectId, t: ObjectId, trail: &mut Trail) -> bool {
        if !self.has_same_type_parameters_and_bounds(s, t, TypeEquality::InSubtypeTest, trail) {
            return false;
        }
        let heap = self.heap();
        let shape = |fun: &Function| {
            let implicit = fun.num_implicit_parameters();
            (
                fun.num_fixed_parameters() - implicit,
                fun.num_optional_positional_parameters(),
                fun.result_type,
                fun.parameter_types[implicit..].to_vec(),
                fun.parameter_names[implicit..].to_vec(),
                fun.has_optional_named_parameters(),
            )
        };
        let (s_fixed, s_optional, s_result, s_params, s_names, s_named) =
            heap.read::<Function, _>(s, shape);
        let (t_fixed, t_optional, t_result, t_params, t_names, t_named) =
            heap.read::<Function, _>(t, shape);

        // s must accept every call t accepts
        if s_fixed > t_fixed || s_fixed + s_optional < t_fixed + t_optional {
            return false;
        }
        if !self.is_void_type(t_result)
            && !self.is_subtype_of_with_trail(s_result, t_result, trail)
        {
            return false;
        }
        for i in 0..t_fixed + t_optional {
            if !self.is_subtype_of_with_trail(t_params[i], s_params[i], trail) {
                return false;
            }
        }
        if !t_named {
            return true;
        }
        if !s_named {
            return false;
        }
        for (t_index, t_name) in t_names.iter().enumerate().skip(t_fixed) {
            let found = s_names
                .iter()
                .enumerate()
                .skip(s_fixed)
                .find(|(_, s_name)| *s_name == t_name);
            match found {
                Some((s_index, _)) => {
                    if !self.is_subtype_of_with_trail(t_params[t_index], s_params[s_index], trail) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }

    /// `null is ty`: only Null, nullable types, dynamic, void and a
    /// nullable or legacy Object accept null, directly or through `FutureOr`.
    pub fn null_is_instance_of(&self, ty: ObjectId) -> bool {
        let ty = self.deref_type(ty);
        if self.is_null_type(ty) || self.is_dynamic_type(ty) || self.is_void_type(ty) {
            return true;
        }
        let nullability = self.type_nullability(ty);
        if nullability == Nullability::Nullable {
            return true;
        }
        if self.is_object_type(ty) {
            return nullability != Nullability::NonNullable;
        }
        if self.is_future_or_type(ty) {
            return self.null_is_instance_of(self.future_or_type_argument(ty));
        }
        false
    }

    /// `value is type` for an instance of class `class_id`, used by the
    /// subtype test cache miss path.
    pub fn instance_class_is_subtype_of(
        &self,
        class_id: ClassId,
        arguments: Option<ObjectId>,
        ty: ObjectId,
    ) -> bool {
        if class_id == ClassId::NULL {
            return self.null_is_instance_of(ty);
        }
        if self.is_top_type_for_subtyping(ty) {
            return true;
        }
        if self.is_future_or_type(ty) {
            let argument = self.future_or_type_argument(ty);
            if self.instance_class_is_subtype_of(class_id, arguments, argument) {
                return true;
            }
        }
        if self.is_type_parameter(ty) || self.is_function_type(ty) {
            return false;
        }
        self.class_is_subtype_of(class_id, arguments, self.deref_type(ty), &mut Trail::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Space, testing::*};

    #[test]
    fn top_and_bottom_laws() {
        let isolate = test_isolate();
        let list_of_int = list_of(&isolate, isolate.int_type());
        let function = signature_type(&isolate, isolate.int_type(), &[], 0);
        for ty in [isolate.int_type(), isolate.string_type(), list_of_int, function] {
            assert!(isolate.is_subtype_of(ty, isolate.dynamic_type()), "{ty} <: dynamic");
            assert!(isolate.is_subtype_of(ty, isolate.object_type()), "{ty} <: Object");
            assert!(isolate.is_subtype_of(ty, isolate.void_type()), "{ty} <: void");
            assert!(isolate.is_subtype_of(isolate.null_type(), ty), "Null <: {ty}");
            assert!(isolate.is_subtype_of(ty, ty), "{ty} <: {ty}");
        }
        assert!(!isolate.is_subtype_of(isolate.dynamic_type(), isolate.int_type()));
    }

    #[test]
    fn nominal_hierarchy() {
        let isolate = test_isolate();
        let (animal, _) = plain_subclass(&isolate, "Animal", None);
        let (dog, dog_type) = plain_subclass(&isolate, "Dog", Some(animal));
        let animal_type = isolate.declaration_type_of(animal);
        assert_eq!(isolate.type_class_id(dog_type), dog);
        assert!(isolate.is_subtype_of(dog_type, animal_type));
        assert!(!isolate.is_subtype_of(animal_type, dog_type));
        assert!(!isolate.is_subtype_of(isolate.int_type(), animal_type));
    }

    #[test]
    fn generic_arguments_are_covariant() {
        let isolate = test_isolate();
        let (animal, _) = plain_subclass(&isolate, "Animal", None);
        let (_, dog_type) = plain_subclass(&isolate, "Dog", Some(animal));
        let animal_type = isolate.declaration_type_of(animal);
        let list_of_dog = list_of(&isolate, dog_type);
        let list_of_animal = list_of(&isolate, animal_type);
        assert!(isolate.is_subtype_of(list_of_dog, list_of_animal));
        assert!(!isolate.is_subtype_of(list_of_animal, list_of_dog));
        let raw_list = isolate.declaration_type_of(ClassId::ARRAY);
        let list_of_dynamic = list_of(&isolate, isolate.dynamic_type());
        assert!(isolate.is_subtype_of(list_of_dog, list_of_dynamic));
        assert!(isolate.is_type_finalized(raw_list));
    }

    #[test]
    fn nullability_is_ignored() {
        let isolate = test_isolate();
        let nullable_int = isolate
            .type_with_nullability(isolate.int_type(), Nullability::Nullable, Space::Old)
            .unwrap();
        assert!(isolate.is_subtype_of(nullable_int, isolate.int_type()));
        assert!(isolate.is_subtype_of(isolate.int_type(), nullable_int));
    }

    #[test]
    fn future_or_rules() {
        let isolate = test_isolate();
        let future_or_int = future_or_of(&isolate, isolate.int_type());
        let future_of_int = class_type(&isolate, ClassId::FUTURE, &[isolate.int_type()]);
        assert!(isolate.is_subtype_of(isolate.int_type(), future_or_int));
        assert!(isolate.is_subtype_of(future_of_int, future_or_int));
        assert!(!isolate.is_subtype_of(isolate.string_type(), future_or_int));
        assert!(!isolate.is_subtype_of(future_or_int, isolate.int_type()));
        assert!(!isolate.is_subtype_of(future_or_int, future_of_int));
        let future_or_object = future_or_of(&isolate, isolate.object_type());
        assert!(isolate.is_subtype_of(future_or_int, future_or_object));
    }

    #[test]
    fn function_types_are_structural() {
        let isolate = test_isolate();
        let int = isolate.int_type();
        let object = isolate.object_type();
        let takes_object = signature_type(&isolate, int, &[object], 0);
        let takes_int = signature_type(&isolate, int, &[int], 0);
        let returns_object = signature_type(&isolate, object, &[int], 0);
        let optional_second = signature_type(&isolate, int, &[int, int], 1);

        assert!(isolate.is_subtype_of(takes_object, takes_int), "parameters are contravariant");
        assert!(!isolate.is_subtype_of(takes_int, takes_object));
        assert!(isolate.is_subtype_of(takes_int, returns_object), "results are covariant");
        assert!(!isolate.is_subtype_of(returns_object, takes_int));
        assert!(isolate.is_subtype_of(optional_second, takes_int), "accepts more calls");
        assert!(!isolate.is_subtype_of(takes_int, optional_second));
        assert!(isolate.is_subtype_of(takes_int, isolate.function_interface_type()));
        assert!(!isolate.is_subtype_of(isolate.function_interface_type(), takes_int));
        assert!(!isolate.is_subtype_of(takes_int, isolate.int_type()));
    }

    #[test]
    fn type_parameters_use_their_bound() {
        let isolate = test_isolate();
        let (_, param) = generic_class(&isolate, "Holder");
        assert!(isolate.is_subtype_of(param, isolate.object_type()));
        assert!(!isolate.is_subtype_of(param, isolate.int_type()));
        assert!(!isolate.is_subtype_of(isolate.int_type(), param), "undecided before instantiation");
        assert!(isolate.is_subtype_of(param, param));
    }

    #[test]
    fn instances_of_classes() {
        let isolate = test_isolate();
        let list_of_int = list_of(&isolate, isolate.int_type());
        let args = isolate.type_arguments_of(list_of_int);
        assert!(isolate.instance_class_is_subtype_of(ClassId::ARRAY, args, list_of_int));
        assert!(!isolate.instance_class_is_subtype_of(ClassId::NULL, None, list_of_int));
        assert!(!isolate.instance_class_is_subtype_of(ClassId::INT, None, list_of_int));
    }

    #[test]
    fn generic_supertype_walks_do_not_grow_the_heap() {
        let isolate = test_isolate();
        let (base, _) = generic_class(&isolate, "Base");
        // class Sub<U> extends Base<U>
        let sub = isolate.new_class("Sub", None).unwrap();
        let u = isolate
            .new_type_parameter(TypeParameter::for_class(
                sub,
                0,
                isolate.symbol("U").unwrap(),
                isolate.object_type(),
            ))
            .unwrap();
        let params = isolate.new_type_arguments(vec![u], Space::Old).unwrap();
        isolate.set_type_parameters(sub, Some(params));
        let u_args = isolate.new_type_arguments(vec![u], Space::Old).unwrap();
        let base_of_u = isolate
            .new_type(base, Some(u_args), Nullability::Legacy, Space::Old)
            .unwrap();
        isolate.set_super_type(sub, Some(base_of_u));
        isolate.ensure_is_finalized(sub).unwrap();

        let string = isolate.string_type();
        let sub_of_string = class_type(&isolate, sub, &[string, string]);
        let base_of_string = class_type(&isolate, base, &[string]);
        let base_of_int = class_type(&isolate, base, &[isolate.int_type()]);
        assert!(isolate.is_subtype_of(sub_of_string, base_of_string));
        assert!(!isolate.is_subtype_of(sub_of_string, base_of_int));

        let before = isolate.heap().len();
        for _ in 0..50 {
            assert!(isolate.is_subtype_of(sub_of_string, base_of_string));
            assert!(!isolate.is_subtype_of(sub_of_string, base_of_int));
        }
        assert_eq!(isolate.heap().len(), before, "repeated checks allocate nothing");
    }

    #[test]
    fn null_only_matches_types_that_admit_it() {
        let isolate = test_isolate();
        let nullable = |ty| {
            isolate
                .type_with_nullability(ty, Nullability::Nullable, Space::Old)
                .unwrap()
        };
        let non_nullable = |ty| {
            isolate
                .type_with_nullability(ty, Nullability::NonNullable, Space::Old)
                .unwrap()
        };
        assert!(!isolate.null_is_instance_of(isolate.int_type()));
        assert!(!isolate.null_is_instance_of(non_nullable(isolate.object_type())));
        assert!(!isolate.null_is_instance_of(future_or_of(&isolate, isolate.int_type())));
        assert!(isolate.null_is_instance_of(isolate.dynamic_type()));
        assert!(isolate.null_is_instance_of(isolate.void_type()));
        assert!(isolate.null_is_instance_of(isolate.null_type()));
        assert!(isolate.null_is_instance_of(nullable(isolate.object_type())));
        assert!(isolate.null_is_instance_of(nullable(isolate.int_type())));
        let int_or_null = nullable(isolate.int_type());
        assert!(isolate.null_is_instance_of(future_or_of(&isolate, int_or_null)));
    }
}

use crate::{
    AbstractTypeKind, ClassId, Function, Isolate, Nullability, ObjectId, ObjectResult, Space,
    Trail, Type, TypeParameter, TypeRef,
};

/// Structural key of a canonical type, children are canonical ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeKey {
    class_id: ClassId,
    nullability: Nullability,
    arguments: Option<ObjectId>,
    signature: Option<SignatureKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureKey {
    type_parameters: Option<ObjectId>,
    result: ObjectId,
    parameters: Vec<ObjectId>,
    named_parameters: Vec<ObjectId>,
    num_fixed: usize,
    num_optional: usize,
    named: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeParameterKey {
    class: ClassId,
    function: Option<ObjectId>,
    index: u16,
    nullability: Nullability,
    bound: ObjectId,
}

impl Isolate {
    /// Unique representative of a finalized type.
    ///
    /// Types only reachable through a cycle of type references stay their
    /// own representative.
    pub fn canonicalize_type(&self, ty: ObjectId) -> ObjectResult<ObjectId> {
        self.canonicalize_type_with_trail(ty, &mut Trail::new())
    }

    pub fn canonicalize_type_with_trail(
        &self,
        ty: ObjectId,
        trail: &mut Trail,
    ) -> ObjectResult<ObjectId> {
        if self.heap().is_canonical(ty) {
            return Ok(ty);
        }
        match self.abstract_type_kind(ty) {
            AbstractTypeKind::TypeRef => {
                if trail.test_and_add(ty) {
                    return Ok(ty);
                }
                let Some(target) = self.heap().read::<TypeRef, _>(ty, |r| r.target) else {
                    return Ok(ty);
                };
                let canonical = self.canonicalize_type_with_trail(target, trail)?;
                self.set_type_ref_target(ty, self.deref_type(canonical));
                Ok(ty)
            }
            AbstractTypeKind::TypeParameter => self.canonicalize_type_parameter(ty, trail),
            AbstractTypeKind::Type => self.canonicalize_class_type(ty, trail),
        }
    }

    fn canonicalize_class_type(&self, ty: ObjectId, trail: &mut Trail) -> ObjectResult<ObjectId> {
        let heap = self.heap();
        debug_assert!(self.is_type_finalized(ty), "canonicalizing unfinalized type {ty}");

        let normalized = self.normalize_future_or(ty, Space::Old)?;
        if normalized != ty {
            return self.canonicalize_type_with_trail(normalized, trail);
        }

        let (class_id, nullability, arguments, signature) = heap.read::<Type, _>(ty, |ty| {
            (ty.class_id, ty.nullability, ty.arguments, ty.signature)
        });

        let canonical_args = self.canonicalize_type_arguments_with_trail(arguments, trail)?;
        // canonicalizing the arguments of a recursive type can make this
        // type canonical
        if heap.is_canonical(ty) {
            return Ok(ty);
        }
        if canonical_args != arguments {
            heap.write::<Type, _>(ty, |ty| {
                ty.arguments = canonical_args;
                ty.hash = 0;
            });
        }

        let signature_key = match signature {
            Some(sig) => Some(self.canonicalize_signature(sig, trail)?),
            None => None,
        };
        if heap.is_canonical(ty) {
            return Ok(ty);
        }

        let key = TypeKey {
            class_id,
            nullability,
            arguments: canonical_args,
            signature: signature_key,
        };
        self.type_hash(ty);
        self.canonicalize_with(&self.canonical_tables().types, key, || Ok(ty))
    }

    fn canonicalize_signature(&self, sig: ObjectId, trail: &mut Trail) -> ObjectResult<SignatureKey> {
        let heap = self.heap();
        let (type_params, result, params, names, num_fixed, num_optional, named) =
            heap.read::<Function, _>(sig, |fun| {
                (
                    fun.type_parameters,
                    fun.result_type,
                    fun.parameter_types.clone(),
                    fun.parameter_names.clone(),
                    fun.num_fixed_parameters(),
                    fun.num_optional_parameters(),
                    fun.has_optional_named_parameters(),
                )
            });

        let type_params = self.canonicalize_type_arguments_with_trail(type_params, trail)?;
        let result = self.canonicalize_type_with_trail(result, trail)?;
        let mut canonical_params = Vec::with_capacity(params.len());
        for param in params {
            canonical_params.push(self.canonicalize_type_with_trail(param, trail)?);
        }
        let parameters = canonical_params.clone();
        heap.write::<Function, _>(sig, |fun| {
            fun.type_parameters = type_params;
            fun.result_type = result;
            fun.parameter_types = canonical_params;
        });

        let named_parameters = if named {
            names[num_fixed..].to_vec()
        } else {
            Vec::new()
        };
        Ok(SignatureKey {
            type_parameters: type_params,
            result,
            parameters,
            named_parameters,
            num_fixed,
            num_optional,
            named,
        })
    }

    fn canonicalize_type_parameter(&self, param: ObjectId, trail: &mut Trail) -> ObjectResult<ObjectId> {
        let heap = self.heap();
        if let Some(canonical) = trail.resolved(param) {
            return Ok(canonical);
        }
        // reached again through its own bound
        if trail.test_and_add(param) {
            return Ok(param);
        }
        let bound = heap.read::<TypeParameter, _>(param, |p| p.bound);
        let canonical_bound = self.canonicalize_type_with_trail(bound, trail)?;
        if heap.is_canonical(param) {
            return Ok(param);
        }
        if canonical_bound != bound {
            heap.write::<TypeParameter, _>(param, |p| p.bound = canonical_bound);
        }
        let key = heap.read::<TypeParameter, _>(param, |p| TypeParameterKey {
            class: p.parameterized_class,
            function: p.parameterized_function,
            index: p.index,
            nullability: p.nullability,
            bound: p.bound,
        });
        let canonical =
            self.canonicalize_with(&self.canonical_tables().type_parameters, key, || Ok(param))?;
        trail.set_resolved(param, canonical);
        Ok(canonical)
    }

    /// Canonical vector, the null vector for raw ones.
    pub fn canonicalize_type_arguments(&self, args: Option<ObjectId>) -> ObjectResult<Option<ObjectId>> {
        self.canonicalize_type_arguments_with_trail(args, &mut Trail::new())
    }

    pub fn canonicalize_type_arguments_with_trail(
        &self,
        args: Option<ObjectId>,
        trail: &mut Trail,
    ) -> ObjectResult<Option<ObjectId>> {
        let Some(args) = args else {
            return Ok(None);
        };
        let heap = self.heap();
        if heap.is_canonical(args) {
            return Ok(Some(args));
        }
        let types = self.type_arguments_types(args);
        if self.type_arguments_is_raw(Some(args), 0, types.len()) {
            return Ok(None);
        }
        let mut canonical = Vec::with_capacity(types.len());
        for &ty in &types {
            canonical.push(self.canonicalize_type_with_trail(ty, trail)?);
            if heap.is_canonical(args) {
                return Ok(Some(args));
            }
        }
        for (index, (&old, &new)) in types.iter().zip(&canonical).enumerate() {
            if old != new {
                self.set_type_at(args, index, new);
            }
        }
        self.type_arguments_hash(Some(args));
        let table = &self.canonical_tables().type_arguments;
        self.canonicalize_with(table, canonical, || Ok(args)).map(Some)
    }

    /// Canonical `C<args>` built from scratch, finalized.
    pub fn canonical_type_of(
        &self,
        class_id: ClassId,
        arguments: &[ObjectId],
        nullability: Nullability,
    ) -> ObjectResult<ObjectId> {
        let args = if arguments.is_empty() {
            None
        } else {
            Some(self.new_type_arguments(arguments.to_vec(), Space::Old)?)
        };
        let ty = self.new_type(class_id, args, nullability, Space::Old)?;
        self.mark_type_finalized(ty);
        self.canonicalize_type(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TypeState, testing::*};

    #[test]
    fn equal_types_canonicalize_to_one_object() {
        let isolate = test_isolate();
        let a = list_of(&isolate, isolate.int_type());
        let b = list_of(&isolate, isolate.int_type());
        let ca = isolate.canonicalize_type(a).unwrap();
        let cb = isolate.canonicalize_type(b).unwrap();
        assert_eq!(ca, cb);
        assert!(isolate.heap().is_canonical(ca));
        assert_eq!(isolate.canonicalize_type(ca).unwrap(), ca, "idempotent");
    }

    #[test]
    fn young_types_are_promoted_before_registration() {
        let isolate = test_isolate();
        let args = isolate
            .new_type_arguments(vec![isolate.double_type()], Space::Old)
            .unwrap();
        let young = isolate
            .new_type(ClassId::ARRAY, Some(args), Nullability::Legacy, Space::New)
            .unwrap();
        isolate.mark_type_finalized(young);
        let canonical = isolate.canonicalize_type(young).unwrap();
        assert_ne!(canonical, young);
        assert_eq!(isolate.heap().space_of(canonical), Space::Old);
        assert_eq!(isolate.canonicalize_type(young).unwrap(), canonical);
    }

    #[test]
    fn raw_vectors_canonicalize_to_null() {
        let isolate = test_isolate();
        let dynamic = isolate.dynamic_type();
        let raw = isolate.new_type_arguments(vec![dynamic, dynamic], Space::Old).unwrap();
        assert_eq!(isolate.canonicalize_type_arguments(Some(raw)).unwrap(), None);
        let list_of_dynamic = list_of(&isolate, dynamic);
        let canonical = isolate.canonicalize_type(list_of_dynamic).unwrap();
        assert_eq!(isolate.type_arguments_of(canonical), None);
    }

    #[test]
    fn vectors_canonicalize_by_content() {
        let isolate = test_isolate();
        let make = || {
            isolate
                .new_type_arguments(vec![isolate.int_type(), isolate.string_type()], Space::New)
                .unwrap()
        };
        let a = isolate.canonicalize_type_arguments(Some(make())).unwrap();
        let b = isolate.canonicalize_type_arguments(Some(make())).unwrap();
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn nullability_is_part_of_the_canonical_identity() {
        let isolate = test_isolate();
        let nullable = isolate
            .canonical_type_of(ClassId::INT, &[], Nullability::Nullable)
            .unwrap();
        let legacy = isolate
            .canonical_type_of(ClassId::INT, &[], Nullability::Legacy)
            .unwrap();
        assert_ne!(nullable, legacy);
        assert_eq!(legacy, isolate.int_type());
    }

    #[test]
    fn function_types_canonicalize_structurally() {
        let isolate = test_isolate();
        let a = signature_type(&isolate, isolate.int_type(), &[isolate.string_type()], 0);
        let b = signature_type(&isolate, isolate.int_type(), &[isolate.string_type()], 0);
        let c = signature_type(&isolate, isolate.int_type(), &[isolate.int_type()], 0);
        let ca = isolate.canonicalize_type(a).unwrap();
        assert_eq!(ca, isolate.canonicalize_type(b).unwrap());
        assert_ne!(ca, isolate.canonicalize_type(c).unwrap());
    }

    #[test]
    fn repeated_duplicate_parameter_canonicalizes_every_slot() {
        let isolate = test_isolate();
        let (class, t1) = generic_class(&isolate, "C");
        let t1 = isolate.canonicalize_type(t1).unwrap();
        let name = isolate.symbol("T").unwrap();
        let t2 = isolate
            .new_type_parameter(TypeParameter::for_class(class, 0, name, isolate.object_type()))
            .unwrap();
        assert_ne!(t1, t2);

        let same = isolate.new_type_arguments(vec![t1, t1], Space::Old).unwrap();
        let duplicate = isolate.new_type_arguments(vec![t2, t2], Space::Old).unwrap();
        let a = isolate.canonicalize_type_arguments(Some(same)).unwrap();
        let b = isolate.canonicalize_type_arguments(Some(duplicate)).unwrap();
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(isolate.type_arguments_types(b.unwrap()), vec![t1, t1]);
    }

    #[test]
    fn recursive_type_canonicalizes_without_looping() {
        let isolate = test_isolate();
        let (class, _) = generic_class(&isolate, "Chain");
        // Chain<Chain<...>> closed by a reference to itself
        let back = isolate.new_type_ref(None).unwrap();
        let args = isolate.new_type_arguments(vec![back], Space::Old).unwrap();
        let chain = isolate
            .new_type(class, Some(args), Nullability::Legacy, Space::Old)
            .unwrap();
        isolate.set_type_ref_target(back, chain);
        isolate
            .heap()
            .write::<Type, _>(chain, |ty| ty.state = TypeState::FinalizedInstantiated);
        let canonical = isolate.canonicalize_type(chain).unwrap();
        assert!(isolate.heap().is_canonical(canonical));
        assert_eq!(isolate.canonicalize_type(canonical).unwrap(), canonical);
    }
}

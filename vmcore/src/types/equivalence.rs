use crate::{
    AbstractTypeKind, Function, Isolate, Nullability, ObjectId, StringHasher, Trail, Type,
    TypeArguments, TypeParameter, TypeRef,
};

/// How strictly two types are compared.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TypeEquality {
    /// Identity of canonical representatives, nullability included.
    Canonical,
    /// Legacy and non-nullable are not distinguished.
    Syntactical,
    /// Nullability is ignored and function type parameters compare by
    /// position only.
    InSubtypeTest,
}

impl TypeEquality {
    fn nullability_matches(self, a: Nullability, b: Nullability) -> bool {
        match self {
            Self::Canonical => a == b,
            Self::Syntactical => (a == Nullability::Nullable) == (b == Nullability::Nullable),
            Self::InSubtypeTest => true,
        }
    }
}

impl Isolate {
    pub fn is_equivalent(
        &self,
        a: ObjectId,
        b: ObjectId,
        kind: TypeEquality,
        trail: &mut Trail,
    ) -> bool {
        if a == b {
            return true;
        }
        match self.abstract_type_kind(a) {
            AbstractTypeKind::TypeRef => {
                if trail.test_and_add_buddy(a, b) {
                    return true;
                }
                self.heap()
                    .read::<TypeRef, _>(a, |r| r.target)
                    .is_some_and(|target| self.is_equivalent(target, b, kind, trail))
            }
            AbstractTypeKind::TypeParameter => {
                let b = self.deref_type(b);
                a == b || self.type_parameters_equivalent(a, b, kind)
            }
            AbstractTypeKind::Type => {
                let b = self.deref_type(b);
                a == b || self.class_types_equivalent(a, b, kind, trail)
            }
        }
    }

    pub fn is_type_equal(&self, a: ObjectId, b: ObjectId) -> bool {
        self.is_equivalent(a, b, TypeEquality::Canonical, &mut Trail::new())
    }

    fn type_parameters_equivalent(&self, a: ObjectId, b: ObjectId, kind: TypeEquality) -> bool {
        let heap = self.heap();
        let Some(other) = heap.try_read::<TypeParameter, _>(b, TypeParameter::clone) else {
            return false;
        };
        heap.read::<TypeParameter, _>(a, |this| {
            this.parameterized_class == other.parameterized_class
                && this.index == other.index
                && (kind == TypeEquality::InSubtypeTest
                    || this.parameterized_function == other.parameterized_function)
                && kind.nullability_matches(this.nullability, other.nullability)
        })
    }

    fn class_types_equivalent(
        &self,
        a: ObjectId,
        b: ObjectId,
        kind: TypeEquality,
        trail: &mut Trail,
    ) -> bool {
        let heap = self.heap();
        let Some(other) = heap.try_read::<Type, _>(b, Type::clone) else {
            return false;
        };
        let this = heap.read::<Type, _>(a, Type::clone);
        if this.is_function_type() != other.is_function_type()
            || this.class_id != other.class_id
            || !kind.nullability_matches(this.nullability, other.nullability)
        {
            return false;
        }
        // too early to decide
        if !this.is_finalized() || !other.is_finalized() {
            return false;
        }
        if this.arguments == other.arguments && this.signature == other.signature {
            return true;
        }

        let num_type_params = self.num_type_parameters(this.class_id);
        if num_type_params > 0 {
            let num_type_args = self.num_type_arguments(this.class_id);
            let from = num_type_args - num_type_params;
            let equivalent = match (this.arguments, other.arguments) {
                (None, None) => true,
                (None, other_args) => self.type_arguments_is_raw(other_args, 0, num_type_args),
                (this_args, None) => self.type_arguments_is_raw(this_args, 0, num_type_args),
                (Some(this_args), Some(other_args)) => self.is_subvector_equivalent(
                    this_args,
                    other_args,
                    from,
                    num_type_params,
                    kind,
                    trail,
                ),
            };
            if !equivalent {
                return false;
            }
        }

        match (this.signature, other.signature) {
            (Some(this_sig), Some(other_sig)) => {
                self.signatures_equivalent(this_sig, other_sig, kind, trail)
            }
            _ => true,
        }
    }

    pub fn is_subvector_equivalent(
        &self,
        a: ObjectId,
        b: ObjectId,
        from: usize,
        len: usize,
        kind: TypeEquality,
        trail: &mut Trail,
    ) -> bool {
        if a == b {
            return true;
        }
        let this = self.type_arguments_types(a);
        let other = self.type_arguments_types(b);
        if this.len() < from + len || other.len() < from + len {
            return false;
        }
        (from..from + len).all(|i| self.is_equivalent(this[i], other[i], kind, trail))
    }

    pub fn type_arguments_equivalent(
        &self,
        a: Option<ObjectId>,
        b: Option<ObjectId>,
        kind: TypeEquality,
        trail: &mut Trail,
    ) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(args), None) | (None, Some(args)) => {
                let len = self.type_arguments_len(Some(args));
                self.type_arguments_is_raw(Some(args), 0, len)
            }
            (Some(a), Some(b)) => {
                let len = self.type_arguments_len(Some(a));
                len == self.type_arguments_len(Some(b))
                    && self.is_subvector_equivalent(a, b, 0, len, kind, trail)
            }
        }
    }

    /// Same number of own type parameters with equivalent bounds.
    pub fn has_same_type_parameters_and_bounds(
        &self,
        a: ObjectId,
        b: ObjectId,
        kind: TypeEquality,
        trail: &mut Trail,
    ) -> bool {
        let heap = self.heap();
        let this = heap.read::<Function, _>(a, |fun| fun.type_parameters);
        let other = heap.read::<Function, _>(b, |fun| fun.type_parameters);
        let len = self.type_arguments_len(this);
        if len != self.type_arguments_len(other) {
            return false;
        }
        let (Some(this), Some(other)) = (this, other) else {
            return true;
        };
        (0..len).all(|i| {
            let this_bound = heap.read::<TypeParameter, _>(self.type_at(this, i), |p| p.bound);
            let other_bound = heap.read::<TypeParameter, _>(self.type_at(other, i), |p| p.bound);
            self.is_equivalent(this_bound, other_bound, kind, trail)
        })
    }

    pub fn signatures_equivalent(
        &self,
        a: ObjectId,
        b: ObjectId,
        kind: TypeEquality,
        trail: &mut Trail,
    ) -> bool {
        if a == b {
            return true;
        }
        if !self.has_same_type_parameters_and_bounds(a, b, kind, trail) {
            return false;
        }
        let shape = |fun: &Function| {
            (
                fun.num_fixed_parameters(),
                fun.num_optional_positional_parameters(),
                fun.num_optional_named_parameters(),
            )
        };
        let heap = self.heap();
        let (this_shape, this_result, this_params, this_names) = heap.read::<Function, _>(a, |fun| {
            (shape(fun), fun.result_type, fun.parameter_types.clone(), fun.parameter_names.clone())
        });
        let (other_shape, other_result, other_params, other_names) =
            heap.read::<Function, _>(b, |fun| {
                (shape(fun), fun.result_type, fun.parameter_types.clone(), fun.parameter_names.clone())
            });
        if this_shape != other_shape || this_params.len() != other_params.len() {
            return false;
        }
        if !self.is_equivalent(this_result, other_result, kind, trail) {
            return false;
        }
        let params_equivalent = this_params
            .iter()
            .zip(&other_params)
            .all(|(&this, &other)| self.is_equivalent(this, other, kind, trail));
        if !params_equivalent {
            return false;
        }
        // named parameter names are symbols, compared by identity
        let first_named = this_shape.0 + this_shape.1;
        this_names
            .iter()
            .zip(&other_names)
            .skip(first_named)
            .all(|(this, other)| this == other)
    }

    // ── hashing ────────────────────────────────────────────────────

    /// Structural hash, equal for types equivalent under
    /// `TypeEquality::Syntactical`. Cached on finalized types.
    pub fn type_hash(&self, id: ObjectId) -> u32 {
        let heap = self.heap();
        match self.abstract_type_kind(id) {
            AbstractTypeKind::TypeRef => {
                // only the class, following the reference may cycle
                let mut hasher = StringHasher::default();
                let target = heap.read::<TypeRef, _>(id, |r| r.target);
                hasher.add(target.map_or(0, |target| self.type_class_id(target).0));
                hasher.finish()
            }
            AbstractTypeKind::TypeParameter => {
                let mut hasher = StringHasher::default();
                heap.read::<TypeParameter, _>(id, |param| {
                    hasher.add(param.parameterized_class.0);
                    hasher.add(param.index as u32);
                    hasher.add(param.is_function_type_parameter() as u32);
                    hasher.add((param.nullability == Nullability::Nullable) as u32);
                });
                hasher.finish()
            }
            AbstractTypeKind::Type => {
                let ty = heap.read::<Type, _>(id, Type::clone);
                if ty.hash != 0 {
                    return ty.hash;
                }
                let mut hasher = StringHasher::default();
                hasher.add(ty.class_id.0);
                hasher.add((ty.nullability == Nullability::Nullable) as u32);
                let own = self.num_type_parameters(ty.class_id);
                if own > 0
                    && let Some(args) = ty.arguments
                    && !self.type_arguments_is_raw(Some(args), 0, self.type_arguments_len(Some(args)))
                {
                    let types = self.type_arguments_types(args);
                    for &arg in &types[types.len().saturating_sub(own)..] {
                        hasher.add(self.type_hash(arg));
                    }
                }
                if let Some(sig) = ty.signature {
                    self.hash_signature(sig, &mut hasher);
                }
                let hash = hasher.finish();
                if ty.is_finalized() {
                    heap.write::<Type, _>(id, |ty| ty.hash = hash);
                }
                hash
            }
        }
    }

    fn hash_signature(&self, sig: ObjectId, hasher: &mut StringHasher) {
        let (result, params, names, num_fixed, num_optional, named, num_type_params) =
            self.heap().read::<Function, _>(sig, |fun| {
                (
                    fun.result_type,
                    fun.parameter_types.clone(),
                    fun.parameter_names.clone(),
                    fun.num_fixed_parameters(),
                    fun.num_optional_parameters(),
                    fun.has_optional_named_parameters(),
                    fun.type_parameters,
                )
            });
        hasher.add(self.type_arguments_len(num_type_params) as u32);
        hasher.add(self.type_hash(result));
        hasher.add(num_fixed as u32);
        hasher.add(num_optional as u32);
        hasher.add(named as u32);
        for param in params {
            hasher.add(self.type_hash(param));
        }
        if named {
            for &name in &names[num_fixed..] {
                hasher.add(self.heap().read::<crate::StringObject, _>(name, |s| s.hash()));
            }
        }
    }

    pub fn type_arguments_hash(&self, args: Option<ObjectId>) -> u32 {
        let Some(args) = args else {
            return 0;
        };
        let cached = self.heap().read::<TypeArguments, _>(args, |a| a.hash);
        if cached != 0 {
            return cached;
        }
        let mut hasher = StringHasher::default();
        for ty in self.type_arguments_types(args) {
            hasher.add(self.type_hash(ty));
        }
        let hash = hasher.finish();
        self.heap().write::<TypeArguments, _>(args, |a| a.hash = hash);
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Space, testing::*};

    #[test]
    fn structurally_equal_types_are_equivalent() {
        let isolate = test_isolate();
        let a = list_of(&isolate, isolate.int_type());
        let b = list_of(&isolate, isolate.int_type());
        let c = list_of(&isolate, isolate.string_type());
        assert_ne!(a, b);
        assert!(isolate.is_type_equal(a, b));
        assert!(!isolate.is_type_equal(a, c));
        assert_eq!(isolate.type_hash(a), isolate.type_hash(b));
    }

    #[test]
    fn raw_and_all_dynamic_arguments_are_equivalent() {
        let isolate = test_isolate();
        let raw = isolate
            .new_type(crate::ClassId::ARRAY, None, Nullability::Legacy, Space::Old)
            .unwrap();
        isolate.mark_type_finalized(raw);
        let dynamic_list = list_of(&isolate, isolate.dynamic_type());
        assert!(isolate.is_type_equal(raw, dynamic_list));
    }

    #[test]
    fn nullability_depends_on_equality_kind() {
        let isolate = test_isolate();
        let legacy = isolate.int_type();
        let non_nullable = isolate
            .type_with_nullability(legacy, Nullability::NonNullable, Space::Old)
            .unwrap();
        let nullable = isolate
            .type_with_nullability(legacy, Nullability::Nullable, Space::Old)
            .unwrap();
        let mut trail = Trail::new();
        assert!(!isolate.is_equivalent(legacy, non_nullable, TypeEquality::Canonical, &mut trail));
        assert!(isolate.is_equivalent(legacy, non_nullable, TypeEquality::Syntactical, &mut trail));
        assert!(!isolate.is_equivalent(legacy, nullable, TypeEquality::Syntactical, &mut trail));
        assert!(isolate.is_equivalent(legacy, nullable, TypeEquality::InSubtypeTest, &mut trail));
    }

    #[test]
    fn signatures_compare_structurally() {
        let isolate = test_isolate();
        let int_type = isolate.int_type();
        let a = signature_type(&isolate, int_type, &[isolate.string_type()], 0);
        let b = signature_type(&isolate, int_type, &[isolate.string_type()], 0);
        let c = signature_type(&isolate, int_type, &[isolate.string_type()], 1);
        assert!(isolate.is_type_equal(a, b));
        assert!(!isolate.is_type_equal(a, c), "optional parameter count differs");
        assert_eq!(isolate.type_hash(a), isolate.type_hash(b));
    }

    #[test]
    fn recursive_references_terminate() {
        let isolate = test_isolate();
        let (class, param) = generic_class(&isolate, "Tree");
        let tree_of_t = isolate.declaration_type_of(class);
        let back_a = isolate.new_type_ref(Some(tree_of_t)).unwrap();
        let back_b = isolate.new_type_ref(Some(tree_of_t)).unwrap();
        let a = isolate.new_type_arguments(vec![param, back_a], Space::Old).unwrap();
        let b = isolate.new_type_arguments(vec![param, back_b], Space::Old).unwrap();
        assert!(isolate.type_arguments_equivalent(
            Some(a),
            Some(b),
            TypeEquality::Canonical,
            &mut Trail::new()
        ));
        assert_eq!(isolate.type_arguments_hash(Some(a)), isolate.type_arguments_hash(Some(b)));
    }
}

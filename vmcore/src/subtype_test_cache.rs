use crate::{
    ClassId, Closure, Isolate, ObjectId, ObjectResult, Space, TypeVector, Value, Visitable,
    Visitor,
};

/// What identifies the tested instance. Closures are keyed by their
/// function, everything else by class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TestedInstance {
    Class(ClassId),
    Closure(ObjectId),
}

/// Inputs a cached type test depends on, the tested type is fixed per cache.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubtypeTestKey {
    pub instance: TestedInstance,
    pub instance_type_arguments: TypeVector,
    pub instantiator_type_arguments: TypeVector,
    pub function_type_arguments: TypeVector,
    pub parent_function_type_arguments: TypeVector,
    pub delayed_type_arguments: TypeVector,
}

/// Results of one `is`/`as` site, appended on every miss.
#[derive(Default)]
pub struct SubtypeTestCache {
    entries: Vec<(SubtypeTestKey, bool)>,
}

impl SubtypeTestCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, key: &SubtypeTestKey) -> Option<bool> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == key)
            .map(|&(_, result)| result)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&SubtypeTestKey, bool)> {
        self.entries.iter().map(|(key, result)| (key, *result))
    }
}

impl Visitable for SubtypeTestCache {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        for (key, _) in &self.entries {
            if let TestedInstance::Closure(function) = key.instance {
                visitor.visit_id(function);
            }
            visitor.visit_opt(key.instance_type_arguments);
            visitor.visit_opt(key.instantiator_type_arguments);
            visitor.visit_opt(key.function_type_arguments);
            visitor.visit_opt(key.parent_function_type_arguments);
            visitor.visit_opt(key.delayed_type_arguments);
        }
    }
}

impl Isolate {
    pub fn new_subtype_test_cache(&self) -> ObjectResult<ObjectId> {
        self.allocate(SubtypeTestCache::default(), Space::Old)
    }

    pub fn subtype_test_cache_lookup(&self, cache: ObjectId, key: &SubtypeTestKey) -> Option<bool> {
        self.heap()
            .read::<SubtypeTestCache, _>(cache, |c| c.lookup(key))
    }

    /// Appends `key` unless a racing thread already did, returns the cached
    /// result either way.
    pub fn subtype_test_cache_add(&self, cache: ObjectId, key: SubtypeTestKey, result: bool) -> bool {
        let _guard = self.subtype_test_cache_mutex().lock();
        self.heap().write::<SubtypeTestCache, _>(cache, |c| {
            if let Some(existing) = c.lookup(&key) {
                debug_assert_eq!(existing, result, "subtype test result changed for {key:?}");
                return existing;
            }
            c.entries.push((key, result));
            result
        })
    }

    pub fn subtype_test_key(
        &self,
        instance: Value,
        instantiator: TypeVector,
        function: TypeVector,
    ) -> SubtypeTestKey {
        let heap = self.heap();
        let closure = instance
            .as_non_null()
            .filter(|&id| heap.cell(id).class_id() == ClassId::CLOSURE);
        match closure {
            Some(id) => heap.read::<Closure, _>(id, |c| SubtypeTestKey {
                instance: TestedInstance::Closure(c.function),
                instance_type_arguments: None,
                instantiator_type_arguments: instantiator,
                function_type_arguments: function,
                parent_function_type_arguments: c.function_type_arguments,
                delayed_type_arguments: c.delayed_type_arguments,
            }),
            None => SubtypeTestKey {
                instance: TestedInstance::Class(heap.class_id_of(instance)),
                instance_type_arguments: self.instance_type_arguments(instance),
                instantiator_type_arguments: instantiator,
                function_type_arguments: function,
                parent_function_type_arguments: None,
                delayed_type_arguments: None,
            },
        }
    }

    /// `instance is ty` with `ty` instantiated from the given vectors.
    /// Types that cannot be instantiated never match.
    pub fn is_instance_of(
        &self,
        instance: Value,
        ty: ObjectId,
        instantiator: TypeVector,
        function: TypeVector,
    ) -> ObjectResult<bool> {
        let Some(ty) = self.instantiate_type(ty, instantiator, function)? else {
            return Ok(false);
        };
        if instance.is_null() {
            return Ok(self.null_is_instance_of(ty));
        }
        if self.is_top_type_for_subtyping(ty) {
            return Ok(true);
        }
        let heap = self.heap();
        let cid = heap.class_id_of(instance);
        if cid == ClassId::CLOSURE
            && let Some(id) = instance.as_non_null()
        {
            if self.is_function_interface_type(ty) {
                return Ok(true);
            }
            if self.is_function_type(ty) {
                let function = heap.read::<Closure, _>(id, |c| c.function);
                let signature = self.function_signature_type(function)?;
                return Ok(self.is_subtype_of(signature, ty));
            }
        }
        Ok(self.instance_class_is_subtype_of(cid, self.instance_type_arguments(instance), ty))
    }

    /// Type test through `cache`, computing and recording the result on a
    /// miss.
    pub fn cached_is_instance_of(
        &self,
        cache: ObjectId,
        instance: Value,
        ty: ObjectId,
        instantiator: TypeVector,
        function: TypeVector,
    ) -> ObjectResult<bool> {
        let key = self.subtype_test_key(instance, instantiator, function);
        if let Some(result) = self.subtype_test_cache_lookup(cache, &key) {
            return Ok(result);
        }
        let result = self.is_instance_of(instance, ty, instantiator, function)?;
        Ok(self.subtype_test_cache_add(cache, key, result))
    }
}

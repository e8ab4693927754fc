use parking_lot::Mutex;

use crate::{
    Genericity, Isolate, ObjectId, ObjectResult, Space, Trail, TypeParameter, Visitable, Visitor,
};

// entries kept per canonical vector, later instantiations are not cached
const MAX_CACHED_INSTANTIATIONS: usize = 64;

/// One cached `(instantiator, function type arguments) -> result` triple.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InstantiationEntry {
    pub instantiator: Option<ObjectId>,
    pub function: Option<ObjectId>,
    pub result: Option<ObjectId>,
}

#[derive(Debug)]
pub struct TypeArguments {
    types: Vec<ObjectId>,
    pub(crate) hash: u32,
    instantiations: Mutex<Vec<InstantiationEntry>>,
}

impl TypeArguments {
    pub fn new(types: Vec<ObjectId>) -> Self {
        Self {
            types,
            hash: 0,
            instantiations: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn type_at(&self, index: usize) -> ObjectId {
        self.types[index]
    }

    pub fn types(&self) -> &[ObjectId] {
        &self.types
    }

    pub(crate) fn set_type_at(&mut self, index: usize, ty: ObjectId) {
        self.types[index] = ty;
        self.hash = 0;
    }

    pub fn lookup_instantiation(
        &self,
        instantiator: Option<ObjectId>,
        function: Option<ObjectId>,
    ) -> Option<Option<ObjectId>> {
        self.instantiations
            .lock()
            .iter()
            .find(|entry| entry.instantiator == instantiator && entry.function == function)
            .map(|entry| entry.result)
    }

    pub fn add_instantiation(&self, entry: InstantiationEntry) {
        let mut cache = self.instantiations.lock();
        let present = cache
            .iter()
            .any(|e| e.instantiator == entry.instantiator && e.function == entry.function);
        if !present && cache.len() < MAX_CACHED_INSTANTIATIONS {
            cache.push(entry);
        }
    }

    pub fn num_cached_instantiations(&self) -> usize {
        self.instantiations.lock().len()
    }
}

impl Clone for TypeArguments {
    // the copy starts with an empty instantiation cache
    fn clone(&self) -> Self {
        Self {
            types: self.types.clone(),
            hash: self.hash,
            instantiations: Mutex::new(Vec::new()),
        }
    }
}

impl Visitable for TypeArguments {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_ids(&self.types);
        for entry in self.instantiations.lock().iter() {
            visitor.visit_opt(entry.instantiator);
            visitor.visit_opt(entry.function);
            visitor.visit_opt(entry.result);
        }
    }
}

impl Isolate {
    pub fn new_type_arguments(&self, types: Vec<ObjectId>, space: Space) -> ObjectResult<ObjectId> {
        self.allocate(TypeArguments::new(types), space)
    }

    /// Length of a vector, the null vector has length zero.
    pub fn type_arguments_len(&self, args: Option<ObjectId>) -> usize {
        args.map_or(0, |args| self.heap().read::<TypeArguments, _>(args, |a| a.len()))
    }

    pub fn type_at(&self, args: ObjectId, index: usize) -> ObjectId {
        self.heap().read::<TypeArguments, _>(args, |a| a.type_at(index))
    }

    /// Entry of a possibly null vector, dynamic for the null vector.
    pub fn type_at_or_dynamic(&self, args: Option<ObjectId>, index: usize) -> ObjectId {
        match args {
            Some(args) => self.type_at(args, index),
            None => self.dynamic_type(),
        }
    }

    pub fn type_arguments_types(&self, args: ObjectId) -> Vec<ObjectId> {
        self.heap().read::<TypeArguments, _>(args, |a| a.types().to_vec())
    }

    pub fn set_type_at(&self, args: ObjectId, index: usize, ty: ObjectId) {
        assert!(
            !self.heap().is_canonical(args),
            "canonical type arguments {args} must not be mutated"
        );
        self.heap().write::<TypeArguments, _>(args, |a| a.set_type_at(index, ty));
    }

    /// True if `len` entries starting at `from` are all dynamic.
    pub fn type_arguments_is_raw(&self, args: Option<ObjectId>, from: usize, len: usize) -> bool {
        let Some(args) = args else {
            return true;
        };
        (from..from + len).all(|i| self.is_dynamic_type(self.type_at(args, i)))
    }

    pub fn is_subvector_instantiated(
        &self,
        args: ObjectId,
        from: usize,
        len: usize,
        genericity: Genericity,
        num_free_fun_type_params: usize,
        trail: &mut Trail,
    ) -> bool {
        let types = self.type_arguments_types(args);
        types[from..from + len]
            .iter()
            .all(|&ty| self.is_type_instantiated(ty, genericity, num_free_fun_type_params, trail))
    }

    pub fn type_arguments_is_instantiated(
        &self,
        args: Option<ObjectId>,
        genericity: Genericity,
        num_free_fun_type_params: usize,
        trail: &mut Trail,
    ) -> bool {
        match args {
            Some(args) => {
                let len = self.type_arguments_len(Some(args));
                self.is_subvector_instantiated(args, 0, len, genericity, num_free_fun_type_params, trail)
            }
            None => true,
        }
    }

    /// `<T0, .., Tn>` where every `Ti` is the class type parameter of index
    /// `i` with an `Object` or `dynamic` bound. Instantiating such a vector
    /// yields the instantiator itself.
    pub fn is_uninstantiated_identity(&self, args: ObjectId) -> bool {
        let heap = self.heap();
        self.type_arguments_types(args)
            .into_iter()
            .enumerate()
            .all(|(i, ty)| {
                let Some((index, is_function, bound)) =
                    heap.try_read::<TypeParameter, _>(ty, |param| {
                        (param.index as usize, param.is_function_type_parameter(), param.bound)
                    })
                else {
                    return false;
                };
                index == i
                    && !is_function
                    && (self.is_object_type(bound) || self.is_dynamic_type(bound))
            })
    }

    /// `<int, String>`, or `dynamic` for the null vector.
    pub fn type_arguments_name(&self, args: Option<ObjectId>) -> String {
        let Some(args) = args else {
            return "dynamic".into();
        };
        let names: Vec<String> = self
            .type_arguments_types(args)
            .into_iter()
            .map(|ty| self.type_name(ty))
            .collect();
        format!("<{}>", names.join(", "))
    }
}

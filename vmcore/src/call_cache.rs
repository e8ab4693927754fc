use crate::{ClassId, Isolate, ObjectId, ObjectResult, Space, Visitable, Visitor};

/// Call site bound to one target for a contiguous range of class ids.
#[derive(Debug, Clone)]
pub struct SingleTargetCache {
    pub target: Option<ObjectId>,
    pub entry_point: usize,
    pub lower_limit: ClassId,
    pub upper_limit: ClassId,
}

impl SingleTargetCache {
    pub fn new() -> Self {
        Self {
            target: None,
            entry_point: 0,
            lower_limit: ClassId::ILLEGAL,
            upper_limit: ClassId::ILLEGAL,
        }
    }

    /// Inclusive on both ends. An unset cache covers nothing.
    pub fn covers(&self, cid: ClassId) -> bool {
        self.target.is_some() && self.lower_limit <= cid && cid <= self.upper_limit
    }
}

impl Default for SingleTargetCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Visitable for SingleTargetCache {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_opt(self.target);
    }
}

/// Call site that was never executed, carrying what the first call needs
/// to link it.
#[derive(Debug, Clone)]
pub struct UnlinkedCall {
    pub target_name: ObjectId,
    pub arguments_descriptor: ObjectId,
    pub can_patch_to_monomorphic: bool,
}

impl Visitable for UnlinkedCall {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_id(self.target_name);
        visitor.visit_id(self.arguments_descriptor);
    }
}

impl Isolate {
    pub fn new_single_target_cache(&self) -> ObjectResult<ObjectId> {
        self.allocate(SingleTargetCache::new(), Space::Old)
    }

    pub fn set_single_target(
        &self,
        cache: ObjectId,
        target: ObjectId,
        entry_point: usize,
        lower_limit: ClassId,
        upper_limit: ClassId,
    ) {
        debug_assert!(lower_limit <= upper_limit);
        self.heap().write::<SingleTargetCache, _>(cache, |c| {
            c.target = Some(target);
            c.entry_point = entry_point;
            c.lower_limit = lower_limit;
            c.upper_limit = upper_limit;
        });
    }

    pub fn single_target_lookup(&self, cache: ObjectId, cid: ClassId) -> Option<ObjectId> {
        self.heap()
            .read::<SingleTargetCache, _>(cache, |c| c.covers(cid).then_some(c.target).flatten())
    }

    pub fn new_unlinked_call(
        &self,
        target_name: &str,
        arguments_descriptor: ObjectId,
    ) -> ObjectResult<ObjectId> {
        let target_name = self.symbol(target_name)?;
        self.allocate(
            UnlinkedCall {
                target_name,
                arguments_descriptor,
                can_patch_to_monomorphic: true,
            },
            Space::Old,
        )
    }

    /// Resolves an unlinked call for its first receiver.
    pub fn link_unlinked_call(&self, call: ObjectId, receiver_cid: ClassId) -> Option<ObjectId> {
        let name = self.heap().read::<UnlinkedCall, _>(call, |c| c.target_name);
        let name = self.heap().string_value(name);
        self.resolve_dynamic_function(receiver_cid, &name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArgumentsDescriptor, Function, FunctionKind, testing::*};

    #[test]
    fn single_target_range_is_inclusive() {
        let isolate = test_isolate();
        let cache = isolate.new_single_target_cache().unwrap();
        assert_eq!(isolate.single_target_lookup(cache, ClassId::ILLEGAL), None);

        let fun = isolate
            .new_function("run", FunctionKind::Regular, ClassId::OBJECT, isolate.dynamic_type())
            .unwrap();
        isolate.set_single_target(cache, fun, 0x40, ClassId(60), ClassId(64));
        assert_eq!(isolate.single_target_lookup(cache, ClassId(60)), Some(fun));
        assert_eq!(isolate.single_target_lookup(cache, ClassId(64)), Some(fun));
        assert_eq!(isolate.single_target_lookup(cache, ClassId(59)), None);
        assert_eq!(isolate.single_target_lookup(cache, ClassId(65)), None);
    }

    #[test]
    fn unlinked_call_resolves_through_supers() {
        let isolate = test_isolate();
        let (base, _) = plain_subclass(&isolate, "Base", None);
        let (derived, _) = plain_subclass(&isolate, "Derived", Some(base));
        let name = isolate.symbol("describe").unwrap();
        let method = isolate
            .allocate(Function::new(name, FunctionKind::Regular, base, isolate.dynamic_type()), Space::Old)
            .unwrap();
        isolate.add_function(base, method);

        let descriptor = isolate
            .new_arguments_descriptor(&ArgumentsDescriptor::positional(0, 1))
            .unwrap();
        let call = isolate.new_unlinked_call("describe", descriptor).unwrap();
        assert_eq!(isolate.link_unlinked_call(call, derived), Some(method));
        assert_eq!(isolate.link_unlinked_call(call, ClassId::SMI), None);
    }
}

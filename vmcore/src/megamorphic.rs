use crate::{ClassId, ICData, Isolate, ObjectId, ObjectResult, Space, Visitable, Visitor};

const SPREAD_FACTOR: usize = 7;

/// Class id to target table of a call site that saw too many receivers.
///
/// Open addressing over a power of two bucket count with linear probing.
/// Unfilled buckets hold `ClassId::ILLEGAL` and the miss handler. The table
/// is at most half full and never shrinks.
pub struct MegamorphicCache {
    pub target_name: ObjectId,
    pub arguments_descriptor: ObjectId,
    miss_handler: ObjectId,
    buckets: Vec<(ClassId, ObjectId)>,
    filled_entry_count: usize,
}

impl MegamorphicCache {
    pub fn new(
        target_name: ObjectId,
        arguments_descriptor: ObjectId,
        miss_handler: ObjectId,
        capacity: usize,
    ) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            target_name,
            arguments_descriptor,
            miss_handler,
            buckets: vec![(ClassId::ILLEGAL, miss_handler); capacity],
            filled_entry_count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub fn filled_entry_count(&self) -> usize {
        self.filled_entry_count
    }

    pub fn miss_handler(&self) -> ObjectId {
        self.miss_handler
    }

    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }

    fn first_probe(&self, cid: ClassId) -> usize {
        cid.index().wrapping_mul(SPREAD_FACTOR) & self.mask()
    }

    /// Target for `cid`, `None` on a miss.
    pub fn lookup(&self, cid: ClassId) -> Option<ObjectId> {
        let mask = self.mask();
        let mut index = self.first_probe(cid);
        for _ in 0..self.buckets.len() {
            let (bucket_cid, target) = self.buckets[index];
            if bucket_cid == cid {
                return Some(target);
            }
            if bucket_cid == ClassId::ILLEGAL {
                return None;
            }
            index = (index + 1) & mask;
        }
        None
    }

    /// Target for `cid`, the miss handler if none is cached.
    pub fn target_for(&self, cid: ClassId) -> ObjectId {
        self.lookup(cid).unwrap_or(self.miss_handler)
    }

    /// Returns true if the table was rehashed.
    fn ensure_capacity(&mut self) -> bool {
        if (self.filled_entry_count + 1) * 2 <= self.buckets.len() {
            return false;
        }
        let new_capacity = self.buckets.len() * 2;
        let old = std::mem::replace(
            &mut self.buckets,
            vec![(ClassId::ILLEGAL, self.miss_handler); new_capacity],
        );
        self.filled_entry_count = 0;
        for (cid, target) in old {
            if cid != ClassId::ILLEGAL {
                self.place(cid, target);
            }
        }
        true
    }

    fn place(&mut self, cid: ClassId, target: ObjectId) {
        let mask = self.mask();
        let mut index = self.first_probe(cid);
        for _ in 0..self.buckets.len() {
            let bucket_cid = self.buckets[index].0;
            if bucket_cid == cid {
                self.buckets[index].1 = target;
                return;
            }
            if bucket_cid == ClassId::ILLEGAL {
                self.buckets[index] = (cid, target);
                self.filled_entry_count += 1;
                return;
            }
            index = (index + 1) & mask;
        }
        panic!(
            "megamorphic cache full: {} of {} buckets filled",
            self.filled_entry_count,
            self.buckets.len()
        );
    }

    /// Callers must hold the isolate's megamorphic cache lock.
    fn insert(&mut self, cid: ClassId, target: ObjectId) -> bool {
        debug_assert!(cid != ClassId::ILLEGAL);
        let rehashed = self.lookup(cid).is_none() && self.ensure_capacity();
        self.place(cid, target);
        debug_assert!(self.filled_entry_count * 2 <= self.buckets.len());
        rehashed
    }

    pub fn entries(&self) -> impl Iterator<Item = (ClassId, ObjectId)> + '_ {
        self.buckets
            .iter()
            .copied()
            .filter(|&(cid, _)| cid != ClassId::ILLEGAL)
    }
}

impl Visitable for MegamorphicCache {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_id(self.target_name);
        visitor.visit_id(self.arguments_descriptor);
        visitor.visit_id(self.miss_handler);
        for (_, target) in &self.buckets {
            visitor.visit_id(*target);
        }
    }
}

impl Isolate {
    pub fn new_megamorphic_cache(
        &self,
        target_name: &str,
        arguments_descriptor: ObjectId,
    ) -> ObjectResult<ObjectId> {
        let name = self.symbol(target_name)?;
        let cache = MegamorphicCache::new(
            name,
            arguments_descriptor,
            self.object_store().megamorphic_miss_function,
            self.settings().megamorphic_initial_capacity,
        );
        self.allocate(cache, Space::Old)
    }

    pub fn megamorphic_insert(&self, cache: ObjectId, cid: ClassId, target: ObjectId) {
        let _guard = self.megamorphic_mutex().lock();
        let (rehashed, capacity) = self
            .heap()
            .write::<MegamorphicCache, _>(cache, |c| (c.insert(cid, target), c.capacity()));
        if rehashed {
            log::debug!("megamorphic cache {cache} rehashed to {capacity} buckets");
        }
    }

    /// Target for a receiver of class `cid`, the shared miss handler if the
    /// cache has no entry.
    pub fn megamorphic_lookup(&self, cache: ObjectId, cid: ClassId) -> ObjectId {
        self.heap()
            .read::<MegamorphicCache, _>(cache, |c| c.target_for(cid))
    }

    /// Moves the receiver feedback of a one-argument call site into a new
    /// megamorphic cache and flags the site megamorphic.
    pub fn megamorphic_cache_from_ic_data(&self, ic_data: ObjectId) -> ObjectResult<ObjectId> {
        let (name, descriptor, checks) = self.heap().read::<ICData, _>(ic_data, |ic| {
            debug_assert_eq!(ic.num_args_tested(), 1);
            let checks: Vec<_> = ic
                .checks()
                .filter_map(|check| Some((check.class_ids[0], check.target?)))
                .collect();
            (ic.target_name, ic.arguments_descriptor, checks)
        });
        let name = self.heap().string_value(name);
        let cache = self.new_megamorphic_cache(&name, descriptor)?;
        for (cid, target) in checks {
            self.megamorphic_insert(cache, cid, target);
        }
        self.heap()
            .write::<ICData, _>(ic_data, |ic| ic.set_is_megamorphic(true));
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArgumentsDescriptor, FunctionKind, RebindRule, testing::*};

    fn cache(isolate: &Isolate) -> ObjectId {
        let descriptor = isolate
            .new_arguments_descriptor(&ArgumentsDescriptor::positional(0, 1))
            .unwrap();
        isolate.new_megamorphic_cache("toString", descriptor).unwrap()
    }

    fn target(isolate: &Isolate) -> ObjectId {
        isolate
            .new_function("target", FunctionKind::Regular, ClassId::OBJECT, isolate.dynamic_type())
            .unwrap()
    }

    fn shape(isolate: &Isolate, cache: ObjectId) -> (usize, usize) {
        isolate.heap().read::<MegamorphicCache, _>(cache, |c| {
            (c.filled_entry_count(), c.capacity())
        })
    }

    #[test]
    fn grows_before_exceeding_half_load() {
        let isolate = test_isolate();
        let cache = cache(&isolate);
        let fun = target(&isolate);
        assert_eq!(shape(&isolate, cache), (0, 4));

        isolate.megamorphic_insert(cache, ClassId(100), fun);
        isolate.megamorphic_insert(cache, ClassId(101), fun);
        assert_eq!(shape(&isolate, cache), (2, 4));

        isolate.megamorphic_insert(cache, ClassId(102), fun);
        assert_eq!(shape(&isolate, cache), (3, 8), "third insert doubles first");

        isolate.megamorphic_insert(cache, ClassId(103), fun);
        assert_eq!(shape(&isolate, cache), (4, 8));

        isolate.megamorphic_insert(cache, ClassId(104), fun);
        assert_eq!(shape(&isolate, cache), (5, 16));
    }

    #[test]
    fn load_factor_holds_with_collisions() {
        let isolate = test_isolate();
        let cache = cache(&isolate);
        let fun = target(&isolate);
        // multiples of the capacity all start probing at bucket 0
        for i in 1..=40u32 {
            isolate.megamorphic_insert(cache, ClassId(i * 64), fun);
            let (filled, capacity) = shape(&isolate, cache);
            assert!(filled * 2 <= capacity, "{filled} of {capacity} after {i} inserts");
        }
        for i in 1..=40u32 {
            assert_eq!(isolate.megamorphic_lookup(cache, ClassId(i * 64)), fun);
        }
    }

    #[test]
    fn misses_return_the_shared_handler() {
        let isolate = test_isolate();
        let cache = cache(&isolate);
        let fun = target(&isolate);
        isolate.megamorphic_insert(cache, ClassId::STRING, fun);
        assert_eq!(isolate.megamorphic_lookup(cache, ClassId::STRING), fun);
        assert_eq!(
            isolate.megamorphic_lookup(cache, ClassId::DOUBLE),
            isolate.object_store().megamorphic_miss_function
        );
    }

    #[test]
    fn reinsert_updates_target() {
        let isolate = test_isolate();
        let cache = cache(&isolate);
        let first = target(&isolate);
        let second = target(&isolate);
        isolate.megamorphic_insert(cache, ClassId::STRING, first);
        isolate.megamorphic_insert(cache, ClassId::STRING, second);
        assert_eq!(shape(&isolate, cache).0, 1);
        assert_eq!(isolate.megamorphic_lookup(cache, ClassId::STRING), second);
    }

    #[test]
    fn reinsert_at_the_threshold_keeps_capacity() {
        let isolate = test_isolate();
        let cache = cache(&isolate);
        let first = target(&isolate);
        let second = target(&isolate);
        isolate.megamorphic_insert(cache, ClassId(100), first);
        isolate.megamorphic_insert(cache, ClassId(101), first);
        assert_eq!(shape(&isolate, cache), (2, 4));
        isolate.megamorphic_insert(cache, ClassId(101), second);
        assert_eq!(shape(&isolate, cache), (2, 4), "updating an entry never grows");
        assert_eq!(isolate.megamorphic_lookup(cache, ClassId(101)), second);
    }

    #[test]
    fn concurrent_inserts_keep_every_entry() {
        let isolate = test_isolate();
        let cache = cache(&isolate);
        let fun = target(&isolate);
        std::thread::scope(|scope| {
            for thread in 0..4u32 {
                let isolate = &isolate;
                scope.spawn(move || {
                    for i in 0..50u32 {
                        isolate.megamorphic_insert(cache, ClassId(1000 + thread * 50 + i), fun);
                    }
                });
            }
        });
        let (filled, capacity) = shape(&isolate, cache);
        assert_eq!(filled, 200);
        assert!(filled * 2 <= capacity);
    }

    #[test]
    fn built_from_inline_cache_feedback() {
        let isolate = test_isolate();
        let fun = target(&isolate);
        let descriptor = isolate
            .new_arguments_descriptor(&ArgumentsDescriptor::positional(0, 1))
            .unwrap();
        let ic = isolate
            .new_ic_data(fun, "hashCode", descriptor, 0, 1, RebindRule::Instance)
            .unwrap();
        isolate.record_receiver(ic, ClassId::STRING, fun);
        isolate.record_receiver(ic, ClassId::DOUBLE, fun);

        let cache = isolate.megamorphic_cache_from_ic_data(ic).unwrap();
        assert_eq!(shape(&isolate, cache).0, 2);
        assert_eq!(isolate.megamorphic_lookup(cache, ClassId::DOUBLE), fun);
        assert!(isolate.heap().read::<ICData, _>(ic, ICData::is_megamorphic));
    }
}
